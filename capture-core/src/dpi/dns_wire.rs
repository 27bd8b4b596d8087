//! Narrow DNS wire-format reader: just enough of RFC 1035 to support the DNS
//! policy gate (header flags, question count) and the DPI driver's DNS
//! extraction rule (question name, A/AAAA answers). Not a general DNS
//! message library, in the same spirit as `etherparse-ext`'s header slices.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const HEADER_LEN: usize = 12;

const TYPE_A: u16 = 1;
const TYPE_AAAA: u16 = 28;
const MAX_POINTER_HOPS: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
    pub qdcount: u16,
    pub ancount: u16,
}

impl Header {
    /// `flags & 0x8000 == 0` means this is a query, not a response.
    pub fn is_query(&self) -> bool {
        self.flags & 0x8000 == 0
    }
}

pub fn parse_header(buf: &[u8]) -> Option<Header> {
    if buf.len() < HEADER_LEN {
        return None;
    }

    Some(Header {
        id: u16::from_be_bytes([buf[0], buf[1]]),
        flags: u16::from_be_bytes([buf[2], buf[3]]),
        qdcount: u16::from_be_bytes([buf[4], buf[5]]),
        ancount: u16::from_be_bytes([buf[8], buf[9]]),
    })
}

/// Reads a (possibly compressed) domain name starting at `offset`, returning the decoded
/// name and the offset immediately after it in the original buffer (i.e. not following
/// through a compression pointer, so callers can keep parsing subsequent records).
fn read_name(buf: &[u8], mut offset: usize) -> Option<(String, usize)> {
    let mut labels = Vec::new();
    let mut end_offset = None;
    let mut hops = 0;

    loop {
        let len = *buf.get(offset)?;

        if len == 0 {
            if end_offset.is_none() {
                end_offset = Some(offset + 1);
            }
            break;
        }

        if len & 0xc0 == 0xc0 {
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return None;
            }
            let b2 = *buf.get(offset + 1)?;
            if end_offset.is_none() {
                end_offset = Some(offset + 2);
            }
            offset = (((len & 0x3f) as usize) << 8) | b2 as usize;
            continue;
        }

        let len = len as usize;
        let label = buf.get(offset + 1..offset + 1 + len)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        offset += 1 + len;
    }

    Some((labels.join("."), end_offset?))
}

pub struct Question {
    pub name: String,
}

/// Parses the first question, immediately after the 12-byte header.
pub fn parse_question(buf: &[u8]) -> Option<(Question, usize)> {
    let (name, mut offset) = read_name(buf, HEADER_LEN)?;
    offset += 4; // qtype + qclass
    Some((Question { name }, offset))
}

pub struct Answer {
    pub rtype: u16,
    pub addr: Option<IpAddr>,
}

/// Parses up to `ancount` answer resource records starting at `offset`, returning every
/// A/AAAA address found.
pub fn parse_answers(buf: &[u8], mut offset: usize, ancount: u16) -> Vec<Answer> {
    let mut out = Vec::new();

    for _ in 0..ancount {
        let Some((_name, after_name)) = read_name(buf, offset) else {
            break;
        };
        offset = after_name;

        let Some(rtype_bytes) = buf.get(offset..offset + 2) else {
            break;
        };
        let rtype = u16::from_be_bytes([rtype_bytes[0], rtype_bytes[1]]);

        let Some(rdlength_bytes) = buf.get(offset + 8..offset + 10) else {
            break;
        };
        let rdlength = u16::from_be_bytes([rdlength_bytes[0], rdlength_bytes[1]]) as usize;

        let rdata_start = offset + 10;
        let Some(rdata) = buf.get(rdata_start..rdata_start + rdlength) else {
            break;
        };

        let addr = match (rtype, rdlength) {
            (TYPE_A, 4) => Some(IpAddr::V4(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]))),
            (TYPE_AAAA, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(rdata);
                Some(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            _ => None,
        };

        out.push(Answer { rtype, addr });
        offset = rdata_start + rdlength;
    }

    out
}

/// An address is worth caching only if it is a plausible public/global destination:
/// a non-zero IPv4 host, or a global-unicast IPv6 address (`addr[0] & 0xE0 == 0x20`).
pub fn is_cacheable(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => !v4.is_unspecified(),
        IpAddr::V6(v6) => v6.octets()[0] & 0xE0 == 0x20,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_query(name: &str) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[4] = 0;
        buf[5] = 1; // qdcount = 1
        for label in name.split('.') {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
        buf.extend_from_slice(&[0, 1, 0, 1]); // QTYPE=A, QCLASS=IN
        buf
    }

    #[test]
    fn parses_query_header_and_question() {
        let buf = build_query("example.com");
        let header = parse_header(&buf).unwrap();
        assert!(header.is_query());
        assert_eq!(header.qdcount, 1);

        let (question, _) = parse_question(&buf).unwrap();
        assert_eq!(question.name, "example.com");
    }

    #[test]
    fn response_flag_is_detected() {
        let mut buf = build_query("example.com");
        buf[2] = 0x81; // QR=1
        let header = parse_header(&buf).unwrap();
        assert!(!header.is_query());
    }

    #[test]
    fn parses_a_record_answer() {
        let mut buf = build_query("example.com");
        buf[8] = 0;
        buf[9] = 1; // ancount = 1

        // Answer: name = pointer to offset 12, type A, class IN, ttl, rdlength 4, rdata.
        buf.extend_from_slice(&[0xc0, 0x0c]);
        buf.extend_from_slice(&[0, 1]); // TYPE A
        buf.extend_from_slice(&[0, 1]); // CLASS IN
        buf.extend_from_slice(&[0, 0, 0, 60]); // TTL
        buf.extend_from_slice(&[0, 4]); // RDLENGTH
        buf.extend_from_slice(&[93, 184, 216, 34]);

        let (_, after_question) = parse_question(&buf).unwrap();
        let answers = parse_answers(&buf, after_question, 1);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].addr, Some(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))));
        assert!(is_cacheable(&answers[0].addr.unwrap()));
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(parse_header(&[0u8; 4]).is_none());
    }
}
