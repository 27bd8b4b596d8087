//! Hand-rolled walk of a TLS ClientHello far enough to pull out the SNI
//! extension, the same narrow-wire-format style as [`super::dns_wire`].

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const SNI_HOST_NAME: u8 = 0;

/// Returns the SNI host name if `buf` looks like a TLS record carrying a ClientHello.
/// Returns `None` on anything that doesn't parse, including a ClientHello truncated
/// across a packet boundary — callers retry on the next packet.
pub fn parse_client_hello_sni(buf: &[u8]) -> Option<String> {
    if buf.first()? != &CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    let record_len = u16::from_be_bytes([*buf.get(3)?, *buf.get(4)?]) as usize;
    let body = buf.get(5..5 + record_len)?;

    if body.first()? != &HANDSHAKE_TYPE_CLIENT_HELLO {
        return None;
    }
    let hs_len = u32::from_be_bytes([0, *body.get(1)?, *body.get(2)?, *body.get(3)?]) as usize;
    let hello = body.get(4..4 + hs_len)?;

    let mut off = 2 + 32; // client_version + random
    let session_id_len = *hello.get(off)? as usize;
    off += 1 + session_id_len;

    let cipher_suites_len = u16::from_be_bytes([*hello.get(off)?, *hello.get(off + 1)?]) as usize;
    off += 2 + cipher_suites_len;

    let compression_len = *hello.get(off)? as usize;
    off += 1 + compression_len;

    if off + 2 > hello.len() {
        return None;
    }
    let extensions_len = u16::from_be_bytes([*hello.get(off)?, *hello.get(off + 1)?]) as usize;
    off += 2;
    let extensions = hello.get(off..off + extensions_len)?;

    let mut ext_off = 0;
    while ext_off + 4 <= extensions.len() {
        let ext_type = u16::from_be_bytes([extensions[ext_off], extensions[ext_off + 1]]);
        let ext_len = u16::from_be_bytes([extensions[ext_off + 2], extensions[ext_off + 3]]) as usize;
        let ext_data = extensions.get(ext_off + 4..ext_off + 4 + ext_len)?;

        if ext_type == EXTENSION_SERVER_NAME {
            if let Some(name) = parse_server_name_list(ext_data) {
                return Some(name);
            }
        }

        ext_off += 4 + ext_len;
    }

    None
}

fn parse_server_name_list(data: &[u8]) -> Option<String> {
    let list_len = u16::from_be_bytes([*data.get(0)?, *data.get(1)?]) as usize;
    let list = data.get(2..2 + list_len)?;

    let mut off = 0;
    while off + 3 <= list.len() {
        let name_type = list[off];
        let name_len = u16::from_be_bytes([list[off + 1], list[off + 2]]) as usize;
        let name = list.get(off + 3..off + 3 + name_len)?;

        if name_type == SNI_HOST_NAME {
            return Some(String::from_utf8_lossy(name).into_owned());
        }

        off += 3 + name_len;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_client_hello_with_sni(sni: &str) -> Vec<u8> {
        let mut server_name = vec![SNI_HOST_NAME];
        server_name.extend_from_slice(&(sni.len() as u16).to_be_bytes());
        server_name.extend_from_slice(sni.as_bytes());

        let mut server_name_list = (server_name.len() as u16).to_be_bytes().to_vec();
        server_name_list.extend_from_slice(&server_name);

        let mut sni_ext = vec![0x00, 0x00]; // extension type = server_name
        sni_ext.extend_from_slice(&(server_name_list.len() as u16).to_be_bytes());
        sni_ext.extend_from_slice(&server_name_list);

        let extensions = sni_ext;

        let mut hello = Vec::new();
        hello.extend_from_slice(&[0x03, 0x03]); // client_version
        hello.extend_from_slice(&[0u8; 32]); // random
        hello.push(0); // session_id_len
        hello.extend_from_slice(&[0, 2]); // cipher_suites_len
        hello.extend_from_slice(&[0x13, 0x01]);
        hello.push(1); // compression_len
        hello.push(0);
        hello.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        hello.extend_from_slice(&extensions);

        let mut handshake = vec![HANDSHAKE_TYPE_CLIENT_HELLO];
        handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&hello);

        let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x03];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn extracts_sni_from_client_hello() {
        let record = build_client_hello_with_sni("example.com");
        assert_eq!(parse_client_hello_sni(&record).as_deref(), Some("example.com"));
    }

    #[test]
    fn non_handshake_record_is_ignored() {
        let record = [0x17, 0x03, 0x03, 0x00, 0x01, 0xff];
        assert_eq!(parse_client_hello_sni(&record), None);
    }

    #[test]
    fn truncated_record_does_not_panic() {
        let mut record = build_client_hello_with_sni("example.com");
        record.truncate(10);
        assert_eq!(parse_client_hello_sni(&record), None);
    }
}
