//! Connection collector (C4): stages "new" and "updated" batches between
//! loop iterations, and the reportability filter (§4.4) that decides whether
//! a connection gets an `incr_id` at all.

use std::net::IpAddr;

use serde::Serialize;

use crate::connection::{Connection, Status};
use crate::tuple::FiveTuple;

/// A connection is ignored (no `incr_id`, no batch entry) if it targets the tun-side DNS IP
/// on any port other than 53 — an internal DNS-health probe, not user traffic.
pub fn is_reportable(tuple: &FiveTuple, vpn_dns: IpAddr) -> bool {
    !(tuple.dst_ip == vpn_dns && tuple.dst_port != 53)
}

/// The wire shape of one connection entry in a dump, matching the field list in §4.8.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub info: Option<String>,
    pub url: Option<String>,
    pub proto_name: String,
    pub status: Status,
    pub ip_version: u8,
    pub l4_proto: &'static str,
    pub src_port: u16,
    pub dst_port: u16,
    pub first_seen: u64,
    pub last_seen: u64,
    pub sent_bytes: u64,
    pub rcvd_bytes: u64,
    pub sent_pkts: u64,
    pub rcvd_pkts: u64,
    pub uid: u32,
    pub incr_id: u64,
}

/// Protocols worth reporting by DPI master name instead of falling back to the L3 protocol.
/// Stands in for the DPI library's "master protocols bitmap" (§4.8).
pub const REPORTABLE_MASTERS: &[&str] = &["DNS", "HTTP", "TLS"];

impl ConnectionSnapshot {
    pub fn from_connection(conn: &Connection, incr_id: u64) -> Self {
        Self {
            src_ip: conn.tuple.src_ip,
            dst_ip: conn.tuple.dst_ip,
            info: conn.info.clone(),
            url: conn.url.clone(),
            proto_name: conn.l7.report_name(conn.tuple.l4_proto.name(), REPORTABLE_MASTERS),
            status: conn.status,
            ip_version: conn.tuple.ip_version(),
            l4_proto: conn.tuple.l4_proto.name(),
            src_port: conn.tuple.src_port,
            dst_port: conn.tuple.dst_port,
            first_seen: conn.first_seen,
            last_seen: conn.last_seen,
            sent_bytes: conn.sent_bytes,
            rcvd_bytes: conn.rcvd_bytes,
            sent_pkts: conn.sent_pkts,
            rcvd_pkts: conn.rcvd_pkts,
            uid: conn.uid,
            incr_id,
        }
    }
}

/// Stages reportable connection changes between reporting cycles.
#[derive(Default)]
pub struct Collector {
    new_conns: Vec<(FiveTuple, ConnectionSnapshot)>,
    updated_conns: Vec<(FiveTuple, ConnectionSnapshot)>,
    next_incr_id: u64,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call once, the first time a connection is observed. Assigns `incr_id` if reportable
    /// and stages a `new_conns` entry; does nothing for non-reportable connections
    /// (invariant 2/3).
    pub fn note_new(&mut self, conn: &mut Connection) {
        if !conn.reportable || conn.incr_id.is_some() {
            return;
        }

        let id = self.next_incr_id;
        self.next_incr_id += 1;
        conn.incr_id = Some(id);
        conn.pending_notification = true;

        self.new_conns
            .push((conn.tuple, ConnectionSnapshot::from_connection(conn, id)));
    }

    /// Call on every subsequent change to a reportable connection (counters, status, DPI
    /// outcome). No-op if the connection was never admitted to `new_conns` (invariant 3:
    /// a connection appears in `new_conns` exactly once, then only ever in `updated_conns`).
    pub fn note_update(&mut self, conn: &mut Connection) {
        let Some(id) = conn.incr_id else {
            return;
        };

        conn.pending_notification = true;
        self.updated_conns
            .push((conn.tuple, ConnectionSnapshot::from_connection(conn, id)));
    }

    /// Drains both sequences atomically, returning them for delivery to the host. Keeps
    /// each snapshot's [`FiveTuple`] alongside it so the caller can clear
    /// `pending_notification` on the matching live connection once delivery completes.
    pub fn drain(&mut self) -> (Vec<(FiveTuple, ConnectionSnapshot)>, Vec<(FiveTuple, ConnectionSnapshot)>) {
        (std::mem::take(&mut self.new_conns), std::mem::take(&mut self.updated_conns))
    }

    pub fn is_empty(&self) -> bool {
        self.new_conns.is_empty() && self.updated_conns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::L4Protocol;
    use std::net::Ipv4Addr;

    fn vpn_dns() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 215, 0, 1))
    }

    #[test]
    fn s2_probe_on_other_port_is_not_reportable() {
        let t = FiveTuple::new(
            L4Protocol::Udp,
            IpAddr::V4(Ipv4Addr::new(10, 215, 0, 2)),
            51000,
            vpn_dns(),
            12345,
        );

        assert!(!is_reportable(&t, vpn_dns()));
    }

    #[test]
    fn s1_dns_query_on_port_53_is_reportable() {
        let t = FiveTuple::new(
            L4Protocol::Udp,
            IpAddr::V4(Ipv4Addr::new(10, 215, 0, 2)),
            51000,
            vpn_dns(),
            53,
        );

        assert!(is_reportable(&t, vpn_dns()));
    }

    #[test]
    fn s6_incr_id_is_dense_and_ordered() {
        let mut collector = Collector::new();

        for n in 0..10u16 {
            let t = FiveTuple::new(
                L4Protocol::Tcp,
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
                40000 + n,
                IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
                443,
            );
            let mut conn = Connection::new(t, 0, super::super::connection::UID_UNKNOWN);
            conn.reportable = true;
            collector.note_new(&mut conn);
            assert_eq!(conn.incr_id, Some(n as u64));
        }

        let (new_conns, _) = collector.drain();
        let ids: Vec<u64> = new_conns.iter().map(|(_, c)| c.incr_id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn note_new_is_idempotent_once_incr_id_assigned() {
        let t = FiveTuple::new(
            L4Protocol::Tcp,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            40000,
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
            443,
        );
        let mut conn = Connection::new(t, 0, super::super::connection::UID_UNKNOWN);
        conn.reportable = true;

        let mut collector = Collector::new();
        collector.note_new(&mut conn);
        collector.note_new(&mut conn);

        let (new_conns, _) = collector.drain();
        assert_eq!(new_conns.len(), 1);
    }

    #[test]
    fn one_packet_then_closed_is_reported_twice_with_identical_counters() {
        let t = FiveTuple::new(
            L4Protocol::Udp,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            51000,
            IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            53,
        );
        let mut conn = Connection::new(t, 0, super::super::connection::UID_UNKNOWN);
        conn.reportable = true;
        conn.account(crate::tuple::Direction::Outbound, 64, 0);

        let mut collector = Collector::new();
        collector.note_new(&mut conn);

        conn.status = Status::Closed;
        collector.note_update(&mut conn);

        let (new_conns, updated_conns) = collector.drain();
        assert_eq!(new_conns.len(), 1);
        assert_eq!(updated_conns.len(), 1);
        assert_eq!(new_conns[0].1.sent_bytes, updated_conns[0].1.sent_bytes);
    }
}
