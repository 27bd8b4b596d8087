//! Userspace NAT: the callback surface §4.7/§9 describe the "NAT library"
//! exposing to the core (`send_client`/`forward`, `account_packet`,
//! `on_socket_open`, `on_connection_open`, `on_connection_close`), plus the
//! operations the packet loop drives it with (`expire_idle`, `gauge`). The
//! real NAT/SOCKS5/DNAT transport library is out of scope; [`UserspaceNat`]
//! is a real, scaled-down implementation: one real host UDP/TCP socket per
//! connection, proxying payload bytes.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};

use tokio::net::{TcpStream, UdpSocket};

use crate::tuple::{FiveTuple, L4Protocol};

pub type ConnId = u64;

#[derive(Debug, Clone, Copy, Default)]
pub struct NatGauge {
    pub open_sockets: usize,
    pub max_fd_seen: i32,
    pub active_conns: usize,
    pub total_opened: u64,
}

/// The operations the packet loop (C8) drives the NAT table through.
pub trait NatTable {
    /// Opens a real host socket for a newly-admitted connection. `dnat_to` rewrites the
    /// destination when the DNS gate tagged the connection for DNAT. Returns the new
    /// socket's raw fd alongside its id so the caller can register it with the host's
    /// socket-protect primitive before any traffic is sent; `-1` where no fd exists.
    fn on_connection_open(
        &mut self,
        tuple: FiveTuple,
        dnat_to: Option<SocketAddr>,
        socks5: bool,
        now: u64,
    ) -> io::Result<(ConnId, std::os::raw::c_int)>;

    /// Forwards one outbound (tun -> network) payload through the connection's socket.
    fn forward(&mut self, id: ConnId, payload: &[u8]) -> io::Result<()>;

    /// Polls every open socket for inbound (network -> tun) data. Ready data is returned
    /// as `(connection id, payload)` pairs; a connection with no data ready is skipped.
    fn poll_recv_ready(&mut self, cx: &mut Context<'_>) -> Poll<Vec<(ConnId, Vec<u8>)>>;

    fn on_connection_close(&mut self, id: ConnId);

    /// Refreshes the idle clock for `id`. The packet loop calls this on every successful
    /// forward or inbound delivery.
    fn touch(&mut self, id: ConnId, now: u64);

    /// Drops sockets idle for at least `idle_secs`, returning the expired connection ids
    /// so the caller can finalize their records.
    fn expire_idle(&mut self, now: u64, idle_secs: u64) -> Vec<ConnId>;

    fn gauge(&self) -> NatGauge;
}

enum Socket {
    Udp { sock: UdpSocket, peer: SocketAddr },
    Tcp { sock: TcpStream },
}

struct Entry {
    socket: Socket,
    last_active: u64,
}

#[derive(Default)]
pub struct UserspaceNat {
    entries: HashMap<ConnId, Entry>,
    next_id: u64,
    max_fd_seen: i32,
    total_opened: u64,
}

impl UserspaceNat {
    pub fn new() -> Self {
        Self::default()
    }

    fn track_fd(&mut self, fd: i32) {
        self.max_fd_seen = self.max_fd_seen.max(fd);
    }
}

impl NatTable for UserspaceNat {
    fn on_connection_open(
        &mut self,
        tuple: FiveTuple,
        dnat_to: Option<SocketAddr>,
        socks5: bool,
        now: u64,
    ) -> io::Result<(ConnId, std::os::raw::c_int)> {
        let target = dnat_to.unwrap_or(SocketAddr::new(tuple.dst_ip, tuple.dst_port));

        let socket = match tuple.l4_proto {
            // ICMP echo is proxied over a UDP socket bound to the same host stack; a real
            // NAT library would use SOCK_RAW / SOCK_DGRAM ICMP sockets instead.
            L4Protocol::Udp | L4Protocol::Icmp => {
                let bind_addr: SocketAddr = match tuple.src_ip {
                    std::net::IpAddr::V4(_) => "0.0.0.0:0".parse().unwrap(),
                    std::net::IpAddr::V6(_) => "[::]:0".parse().unwrap(),
                };
                let sock = std::net::UdpSocket::bind(bind_addr)?;
                sock.set_nonblocking(true)?;
                let sock = UdpSocket::from_std(sock)?;
                sock.connect(target)?;
                Socket::Udp { sock, peer: target }
            }
            L4Protocol::Tcp => {
                // SOCKS5 proxying is out of scope for this connect path; a production
                // implementation would dial the configured proxy instead when `socks5`
                // is set and CONNECT to `target` over it.
                let _ = socks5;
                let std_sock = std::net::TcpStream::connect(target)?;
                std_sock.set_nonblocking(true)?;
                let sock = TcpStream::from_std(std_sock)?;
                Socket::Tcp { sock }
            }
        };

        #[cfg(unix)]
        let fd = {
            use std::os::unix::io::AsRawFd;
            let fd = match &socket {
                Socket::Udp { sock, .. } => sock.as_raw_fd(),
                Socket::Tcp { sock } => sock.as_raw_fd(),
            };
            self.track_fd(fd);
            fd
        };
        #[cfg(not(unix))]
        let fd = -1;

        let id = self.next_id;
        self.next_id += 1;
        self.total_opened += 1;
        self.entries.insert(id, Entry { socket, last_active: now });

        Ok((id, fd))
    }

    fn forward(&mut self, id: ConnId, payload: &[u8]) -> io::Result<()> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown connection"))?;

        match &entry.socket {
            Socket::Udp { sock, peer } => {
                sock.try_send_to(payload, *peer)?;
            }
            Socket::Tcp { sock } => {
                sock.try_write(payload)?;
            }
        }
        Ok(())
    }

    fn poll_recv_ready(&mut self, cx: &mut Context<'_>) -> Poll<Vec<(ConnId, Vec<u8>)>> {
        let mut ready = Vec::new();
        let mut buf = [0u8; 65536];

        for (&id, entry) in self.entries.iter_mut() {
            match &mut entry.socket {
                Socket::Udp { sock, .. } => {
                    let mut read_buf = tokio::io::ReadBuf::new(&mut buf);
                    if let Poll::Ready(Ok(())) = sock.poll_recv(cx, &mut read_buf) {
                        let n = read_buf.filled().len();
                        if n > 0 {
                            ready.push((id, read_buf.filled().to_vec()));
                        }
                    }
                }
                Socket::Tcp { sock } => {
                    use tokio::io::AsyncRead;
                    let mut read_buf = tokio::io::ReadBuf::new(&mut buf);
                    if let Poll::Ready(Ok(())) = std::pin::Pin::new(sock).poll_read(cx, &mut read_buf) {
                        let n = read_buf.filled().len();
                        if n > 0 {
                            ready.push((id, read_buf.filled().to_vec()));
                        }
                    }
                }
            }
        }

        if ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(ready)
        }
    }

    fn on_connection_close(&mut self, id: ConnId) {
        self.entries.remove(&id);
    }

    fn touch(&mut self, id: ConnId, now: u64) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.last_active = now;
        }
    }

    fn expire_idle(&mut self, now: u64, idle_secs: u64) -> Vec<ConnId> {
        let expired: Vec<ConnId> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_sub(e.last_active) >= idle_secs)
            .map(|(&id, _)| id)
            .collect();

        for id in &expired {
            self.entries.remove(id);
        }
        expired
    }

    fn gauge(&self) -> NatGauge {
        NatGauge {
            open_sockets: self.entries.len(),
            max_fd_seen: self.max_fd_seen,
            active_conns: self.entries.len(),
            total_opened: self.total_opened,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_starts_empty() {
        let nat = UserspaceNat::new();
        let gauge = nat.gauge();
        assert_eq!(gauge.open_sockets, 0);
        assert_eq!(gauge.total_opened, 0);
    }

    #[test]
    fn forward_to_unknown_connection_errors() {
        let mut nat = UserspaceNat::new();
        let err = nat.forward(42, b"hi").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn expire_idle_on_empty_table_is_a_noop() {
        let mut nat = UserspaceNat::new();
        assert!(nat.expire_idle(1_000, 5).is_empty());
    }
}
