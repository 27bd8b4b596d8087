use std::net::IpAddr;

/// L4 protocol portion of the 5-tuple key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum L4Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl L4Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            L4Protocol::Tcp => "TCP",
            L4Protocol::Udp => "UDP",
            L4Protocol::Icmp => "ICMP",
        }
    }
}

/// The canonical, immutable connection key: `(ip_version, l4_proto, src_ip, src_port, dst_ip, dst_port)`.
///
/// `src_port`/`dst_port` are `0` for ICMP, where they instead stand for the echo identifier
/// at the call sites that need one (see [`crate::dpi::Direction`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    pub l4_proto: L4Protocol,
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl FiveTuple {
    pub fn new(l4_proto: L4Protocol, src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16) -> Self {
        Self {
            l4_proto,
            src_ip,
            src_port,
            dst_ip,
            dst_port,
        }
    }

    pub fn ip_version(&self) -> u8 {
        match self.src_ip {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        }
    }

    /// The tuple as seen from the other direction (reply packets, flipped DNAT lookups).
    pub fn reversed(&self) -> Self {
        Self {
            l4_proto: self.l4_proto,
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }
}

/// Which side originated a packet within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the tun device towards the network.
    Outbound,
    /// From the network towards the tun device.
    Inbound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn reversed_swaps_src_and_dst() {
        let t = FiveTuple::new(
            L4Protocol::Udp,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            51000,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            53,
        );

        let r = t.reversed();

        assert_eq!(r.src_ip, t.dst_ip);
        assert_eq!(r.src_port, t.dst_port);
        assert_eq!(r.dst_ip, t.src_ip);
        assert_eq!(r.dst_port, t.src_port);
    }
}
