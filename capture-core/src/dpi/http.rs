//! Minimal HTTP/1.x request-line and `Host:` header scan, enough to fill
//! `info`/`url` per the DPI extraction rules. Not a general HTTP parser:
//! no chunked bodies, no multi-line headers, no response parsing.

const METHODS: &[&str] = &["GET", "POST", "HEAD", "PUT", "DELETE", "OPTIONS", "PATCH", "CONNECT"];

pub struct Request {
    pub path: String,
    pub host: String,
}

/// Scans `buf` for a CRLF-terminated request line followed by a `Host:` header.
/// Returns `None` if either is missing, which includes a request split across more
/// packets than have arrived yet.
pub fn parse_request(buf: &[u8]) -> Option<Request> {
    let text = std::str::from_utf8(buf).ok()?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next()?;
    let mut parts = request_line.split(' ');
    let method = parts.next()?;
    if !METHODS.contains(&method) {
        return None;
    }
    let path = parts.next()?.to_string();
    let version = parts.next()?;
    if !version.starts_with("HTTP/1.") {
        return None;
    }

    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("host") {
                return Some(Request {
                    path,
                    host: value.trim().to_string(),
                });
            }
        }
    }

    None
}

pub fn build_url(host: &str, path: &str) -> String {
    format!("http://{host}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_and_path() {
        let req = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test\r\n\r\n";
        let parsed = parse_request(req).unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.path, "/index.html");
        assert_eq!(build_url(&parsed.host, &parsed.path), "http://example.com/index.html");
    }

    #[test]
    fn non_http_payload_is_rejected() {
        assert!(parse_request(&[0xff, 0x00, 0x16, 0x03]).is_none());
    }

    #[test]
    fn missing_host_header_yields_none() {
        let req = b"GET / HTTP/1.1\r\nUser-Agent: test\r\n\r\n";
        assert!(parse_request(req).is_none());
    }
}
