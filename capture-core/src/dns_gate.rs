//! DNS policy gate (C6): invoked exactly once per new connection, before
//! admission to the NAT table. Implements the 5-step decision procedure
//! from §4.2 using the `dns_wire` header reader shared with the DPI driver.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::dpi::dns_wire;
use crate::known_dns::KnownDnsSet;
use crate::tuple::{FiveTuple, L4Protocol};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Admit the connection. `dnat_to`, when set, is the external DNS server the
    /// connection should be rewritten to target instead of the internal tun-side IP.
    Allow { dnat_to: Option<SocketAddr> },
    /// Reject pre-admission; the NAT library never creates a connection record.
    Block,
}

pub struct DnsGate {
    known: KnownDnsSet,
    vpn_dns: Ipv4Addr,
    ipv6_dns: Option<IpAddr>,
    external_dns: SocketAddr,
    pending_new_server: Option<Ipv4Addr>,
    dns_request_count: u64,
}

impl DnsGate {
    pub fn new(vpn_dns: Ipv4Addr, ipv6_dns: Option<IpAddr>, external_dns: SocketAddr) -> Self {
        Self {
            known: KnownDnsSet::new(),
            vpn_dns,
            ipv6_dns,
            external_dns,
            pending_new_server: None,
            dns_request_count: 0,
        }
    }

    /// Flags a new external DNS server address for atomic install on the next evaluation
    /// (step 1). Mirrors the process-global `new_dns_server` flag from the design notes,
    /// scoped here to one gate instance instead of a process-wide global.
    pub fn request_new_dns_server(&mut self, addr: Ipv4Addr) {
        self.pending_new_server = Some(addr);
    }

    pub fn dns_request_count(&self) -> u64 {
        self.dns_request_count
    }

    /// Runs the 5-step decision procedure. `l7_payload` is the packet's payload beyond
    /// the transport header, needed only when `tuple` targets port 53/UDP.
    pub fn evaluate(&mut self, tuple: &FiveTuple, l7_payload: &[u8]) -> GateDecision {
        if let Some(addr) = self.pending_new_server.take() {
            self.external_dns = SocketAddr::new(IpAddr::V4(addr), 53);
        }

        let is_internal_dns = matches!(tuple.dst_ip, IpAddr::V4(v4) if v4 == self.vpn_dns);
        let is_v6_dns = self.ipv6_dns == Some(tuple.dst_ip);
        let is_known = self.known.contains(&tuple.dst_ip);
        let is_dns_server = is_internal_dns || is_v6_dns || is_known;

        if !is_dns_server {
            return GateDecision::Allow { dnat_to: None };
        }

        let is_plaintext_dns_query = tuple.l4_proto == L4Protocol::Udp
            && tuple.dst_port == 53
            && dns_wire::parse_header(l7_payload).is_some_and(|h| h.is_query());

        if is_plaintext_dns_query {
            self.dns_request_count += 1;
            let dnat_to = is_internal_dns.then_some(self.external_dns);
            return GateDecision::Allow { dnat_to };
        }

        GateDecision::Block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn vpn_dns() -> Ipv4Addr {
        Ipv4Addr::new(10, 215, 0, 1)
    }

    fn external_dns() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53)
    }

    fn dns_query(name: &str) -> Vec<u8> {
        let mut buf = vec![0u8; dns_wire::HEADER_LEN];
        buf[2] = 0x01; // flags 0x0100: recursion desired, query
        buf[5] = 1;
        for label in name.split('.') {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
        buf.extend_from_slice(&[0, 1, 0, 1]);
        buf
    }

    fn gate() -> DnsGate {
        DnsGate::new(vpn_dns(), None, external_dns())
    }

    #[test]
    fn s1_plaintext_query_to_internal_dns_is_dnated() {
        let mut gate = gate();
        let tuple = FiveTuple::new(
            L4Protocol::Udp,
            IpAddr::V4(Ipv4Addr::new(10, 215, 0, 2)),
            51000,
            IpAddr::V4(vpn_dns()),
            53,
        );

        let decision = gate.evaluate(&tuple, &dns_query("example.com"));

        assert_eq!(decision, GateDecision::Allow { dnat_to: Some(external_dns()) });
        assert_eq!(gate.dns_request_count(), 1);
    }

    #[test]
    fn s2_probe_on_non_dns_port_is_allowed_without_dnat() {
        let mut gate = gate();
        let tuple = FiveTuple::new(
            L4Protocol::Udp,
            IpAddr::V4(Ipv4Addr::new(10, 215, 0, 2)),
            51000,
            IpAddr::V4(vpn_dns()),
            12345,
        );

        let decision = gate.evaluate(&tuple, &[]);

        assert_eq!(decision, GateDecision::Allow { dnat_to: None });
        assert_eq!(gate.dns_request_count(), 0);
    }

    #[test]
    fn s3_dot_to_known_dns_server_is_blocked() {
        let mut gate = gate();
        let tuple = FiveTuple::new(
            L4Protocol::Tcp,
            IpAddr::V4(Ipv4Addr::new(10, 215, 0, 2)),
            44000,
            IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
            853,
        );

        let decision = gate.evaluate(&tuple, &[]);

        assert_eq!(decision, GateDecision::Block);
        assert_eq!(gate.dns_request_count(), 0);
    }

    #[test]
    fn dns_response_arriving_as_a_query_candidate_is_blocked() {
        let mut gate = gate();
        let tuple = FiveTuple::new(
            L4Protocol::Udp,
            IpAddr::V4(Ipv4Addr::new(10, 215, 0, 2)),
            51000,
            IpAddr::V4(vpn_dns()),
            53,
        );
        let mut response = dns_query("example.com");
        response[2] = 0x81; // QR=1: this is a response, not a query

        let decision = gate.evaluate(&tuple, &response);

        assert_eq!(decision, GateDecision::Block);
    }

    #[test]
    fn unrelated_destination_is_allowed() {
        let mut gate = gate();
        let tuple = FiveTuple::new(
            L4Protocol::Tcp,
            IpAddr::V4(Ipv4Addr::new(10, 215, 0, 2)),
            45000,
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
            443,
        );

        assert_eq!(gate.evaluate(&tuple, &[]), GateDecision::Allow { dnat_to: None });
    }

    #[test]
    fn new_dns_server_is_installed_before_next_evaluation() {
        let mut gate = gate();
        gate.request_new_dns_server(Ipv4Addr::new(9, 9, 9, 9));

        let tuple = FiveTuple::new(
            L4Protocol::Udp,
            IpAddr::V4(Ipv4Addr::new(10, 215, 0, 2)),
            51000,
            IpAddr::V4(vpn_dns()),
            53,
        );

        let decision = gate.evaluate(&tuple, &dns_query("example.com"));

        assert_eq!(
            decision,
            GateDecision::Allow {
                dnat_to: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)), 53))
            }
        );
    }
}
