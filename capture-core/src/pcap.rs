//! PCAP framer (C7): classic libpcap little-endian header/record layout,
//! a 512 KiB host-buffer sink with 1 s flush cadence, and a remote-collector
//! framer and socket for UDP/TCP sinks. Multi-byte fields are written with
//! explicit little-endian encoding, the same discipline `etherparse-ext`/
//! `ip-packet` use to stay independent of host endianness.

const MAGIC: u32 = 0xa1b2c3d4;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;
/// LINKTYPE_RAW: the link-layer carries a raw IP packet, no L2 framing.
const LINKTYPE_RAW: u32 = 101;

const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;

pub const HOST_BUFFER_CAPACITY: usize = 512 * 1024;
pub const HOST_FLUSH_INTERVAL_MS: u64 = 1_000;

pub fn global_header_bytes(snaplen: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(GLOBAL_HEADER_LEN);
    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.extend_from_slice(&VERSION_MAJOR.to_le_bytes());
    buf.extend_from_slice(&VERSION_MINOR.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes()); // thiszone
    buf.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
    buf.extend_from_slice(&snaplen.to_le_bytes());
    buf.extend_from_slice(&LINKTYPE_RAW.to_le_bytes());
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeader {
    pub snaplen: u32,
    pub linktype: u32,
}

pub fn parse_global_header(buf: &[u8]) -> Option<GlobalHeader> {
    if buf.len() < GLOBAL_HEADER_LEN || u32::from_le_bytes(buf[0..4].try_into().ok()?) != MAGIC {
        return None;
    }
    Some(GlobalHeader {
        snaplen: u32::from_le_bytes(buf[16..20].try_into().ok()?),
        linktype: u32::from_le_bytes(buf[20..24].try_into().ok()?),
    })
}

/// Appends one record (header + payload) to `buf`, returning the number of bytes written.
pub fn write_record(buf: &mut Vec<u8>, ts_micros: u64, payload: &[u8]) -> usize {
    let ts_sec = (ts_micros / 1_000_000) as u32;
    let ts_usec = (ts_micros % 1_000_000) as u32;
    let len = payload.len() as u32;

    buf.extend_from_slice(&ts_sec.to_le_bytes());
    buf.extend_from_slice(&ts_usec.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);

    RECORD_HEADER_LEN + payload.len()
}

pub struct ParsedRecord<'a> {
    pub ts_micros: u64,
    pub payload: &'a [u8],
}

pub fn parse_record(buf: &[u8]) -> Option<(ParsedRecord<'_>, usize)> {
    if buf.len() < RECORD_HEADER_LEN {
        return None;
    }
    let ts_sec = u32::from_le_bytes(buf[0..4].try_into().ok()?) as u64;
    let ts_usec = u32::from_le_bytes(buf[4..8].try_into().ok()?) as u64;
    let incl_len = u32::from_le_bytes(buf[8..12].try_into().ok()?) as usize;
    let total = RECORD_HEADER_LEN + incl_len;
    let payload = buf.get(RECORD_HEADER_LEN..total)?;

    Some((
        ParsedRecord {
            ts_micros: ts_sec * 1_000_000 + ts_usec,
            payload,
        },
        total,
    ))
}

/// Accumulates records for delivery to the host as a single opaque byte array.
pub struct HostBufferSink {
    buf: Vec<u8>,
    last_flush_ms: u64,
}

impl Default for HostBufferSink {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBufferSink {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            last_flush_ms: 0,
        }
    }

    /// Appends one record, flushing first (and returning the flushed bytes) if the record
    /// would not otherwise fit in [`HOST_BUFFER_CAPACITY`] (invariant 6).
    pub fn append(&mut self, ts_micros: u64, payload: &[u8], now_ms: u64) -> Option<Vec<u8>> {
        let record_len = RECORD_HEADER_LEN + payload.len();
        let flushed = if self.buf.len() + record_len > HOST_BUFFER_CAPACITY {
            Some(self.flush(now_ms))
        } else {
            None
        };

        write_record(&mut self.buf, ts_micros, payload);
        flushed
    }

    pub fn flush(&mut self, now_ms: u64) -> Vec<u8> {
        self.last_flush_ms = now_ms;
        std::mem::take(&mut self.buf)
    }

    pub fn due_for_time_flush(&self, now_ms: u64) -> bool {
        !self.buf.is_empty() && now_ms.saturating_sub(self.last_flush_ms) >= HOST_FLUSH_INTERVAL_MS
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Frames records for a remote collector. On TCP the global header is sent once, right
/// after connect, via [`Self::connect_header`]; on UDP it rides along in the first
/// datagram instead, since there is no connect-time round trip to piggyback on.
pub struct RemoteFramer {
    transport: Transport,
    header_sent: bool,
    snaplen: u32,
}

impl RemoteFramer {
    pub fn new(transport: Transport, snaplen: u32) -> Self {
        Self {
            transport,
            header_sent: false,
            snaplen,
        }
    }

    /// TCP only: the bytes to send immediately after connecting, before any record.
    pub fn connect_header(&mut self) -> Vec<u8> {
        debug_assert_eq!(self.transport, Transport::Tcp);
        self.header_sent = true;
        global_header_bytes(self.snaplen)
    }

    /// Frames one record as a single send/sendto payload.
    pub fn frame_record(&mut self, ts_micros: u64, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        if self.transport == Transport::Udp && !self.header_sent {
            buf.extend_from_slice(&global_header_bytes(self.snaplen));
            self.header_sent = true;
        }
        write_record(&mut buf, ts_micros, payload);
        buf
    }
}

enum RemotePcapSocket {
    Udp(std::net::UdpSocket),
    Tcp(std::net::TcpStream),
}

impl RemotePcapSocket {
    #[cfg(unix)]
    fn fd(&self) -> std::os::raw::c_int {
        use std::os::unix::io::AsRawFd;
        match self {
            RemotePcapSocket::Udp(sock) => sock.as_raw_fd(),
            RemotePcapSocket::Tcp(sock) => sock.as_raw_fd(),
        }
    }

    #[cfg(not(unix))]
    fn fd(&self) -> std::os::raw::c_int {
        -1
    }
}

/// Owns the real socket backing a [`RemoteFramer`]: connects (and, for TCP, sends the
/// global header) up front, then frames and sends each record as it arrives.
pub struct RemotePcapSink {
    framer: RemoteFramer,
    socket: RemotePcapSocket,
}

impl RemotePcapSink {
    pub fn connect(addr: std::net::SocketAddr, transport: Transport, snaplen: u32) -> std::io::Result<Self> {
        let mut framer = RemoteFramer::new(transport, snaplen);

        let socket = match transport {
            Transport::Udp => {
                let bind_addr: std::net::SocketAddr = match addr {
                    std::net::SocketAddr::V4(_) => "0.0.0.0:0".parse().unwrap(),
                    std::net::SocketAddr::V6(_) => "[::]:0".parse().unwrap(),
                };
                let sock = std::net::UdpSocket::bind(bind_addr)?;
                sock.connect(addr)?;
                sock.set_nonblocking(true)?;
                RemotePcapSocket::Udp(sock)
            }
            Transport::Tcp => {
                use std::io::Write as _;
                let sock = std::net::TcpStream::connect(addr)?;
                (&sock).write_all(&framer.connect_header())?;
                sock.set_nonblocking(true)?;
                RemotePcapSocket::Tcp(sock)
            }
        };

        Ok(Self { framer, socket })
    }

    pub fn fd(&self) -> std::os::raw::c_int {
        self.socket.fd()
    }

    /// Frames and sends one record. Transport errors are logged and swallowed, matching
    /// §7's per-packet error severity for host-callback/IO failures on the collector path.
    pub fn send_record(&mut self, ts_micros: u64, payload: &[u8]) {
        use std::io::Write as _;

        let framed = self.framer.frame_record(ts_micros, payload);

        let result = match &mut self.socket {
            RemotePcapSocket::Udp(sock) => sock.send(&framed).map(|_| ()),
            RemotePcapSocket::Tcp(sock) => sock.write_all(&framed),
        };

        if let Err(e) = result {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                tracing::debug!(error = %e, "failed to send pcap record to remote collector");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_header_round_trips() {
        let bytes = global_header_bytes(1500);
        let parsed = parse_global_header(&bytes).unwrap();
        assert_eq!(parsed.snaplen, 1500);
        assert_eq!(parsed.linktype, LINKTYPE_RAW);
    }

    #[test]
    fn record_round_trips() {
        let mut buf = Vec::new();
        write_record(&mut buf, 1_700_000_000_123_456, b"hello");

        let (record, consumed) = parse_record(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(record.payload, b"hello");
        assert_eq!(record.ts_micros, 1_700_000_000_123_456);
    }

    #[test]
    fn invariant_6_buffer_index_tracks_header_plus_payload() {
        let mut sink = HostBufferSink::new();
        let before = sink.len();

        sink.append(0, b"0123456789", 0);

        assert_eq!(sink.len(), before + RECORD_HEADER_LEN + 10);
        assert!(sink.len() <= HOST_BUFFER_CAPACITY);
    }

    #[test]
    fn buffer_flushes_before_overflowing_capacity() {
        let mut sink = HostBufferSink::new();
        let payload = vec![0u8; HOST_BUFFER_CAPACITY - RECORD_HEADER_LEN];
        sink.append(0, &payload, 0);
        assert_eq!(sink.len(), HOST_BUFFER_CAPACITY);

        let flushed = sink.append(1, b"x", 0);
        assert!(flushed.is_some());
        assert_eq!(flushed.unwrap().len(), HOST_BUFFER_CAPACITY);
        assert_eq!(sink.len(), RECORD_HEADER_LEN + 1);
    }

    #[test]
    fn time_based_flush_respects_cadence() {
        let mut sink = HostBufferSink::new();
        sink.append(0, b"x", 0);

        assert!(!sink.due_for_time_flush(500));
        assert!(sink.due_for_time_flush(1_000));
    }

    #[test]
    fn invariant_7_tcp_header_precedes_first_record_exactly_once() {
        let mut framer = RemoteFramer::new(Transport::Tcp, 1500);
        let header = framer.connect_header();
        assert!(parse_global_header(&header).is_some());

        let record = framer.frame_record(0, b"payload");
        assert!(parse_global_header(&record).is_none());
        assert!(parse_record(&record).is_some());
    }

    #[test]
    fn invariant_7_udp_header_rides_with_first_record_only() {
        let mut framer = RemoteFramer::new(Transport::Udp, 1500);

        let first = framer.frame_record(0, b"payload");
        let header = parse_global_header(&first).unwrap();
        assert_eq!(header.snaplen, 1500);
        let (_, consumed) = parse_record(&first[GLOBAL_HEADER_LEN..]).unwrap();
        assert_eq!(consumed, first.len() - GLOBAL_HEADER_LEN);

        let second = framer.frame_record(1, b"payload2");
        assert!(parse_global_header(&second).is_none());
    }
}
