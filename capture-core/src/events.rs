//! Core -> host callback surface (C9), and the aggregate-stats payload
//! shape from §4.8. Connection-batch payloads reuse
//! [`crate::batch::ConnectionSnapshot`] directly, since its field list
//! already matches §4.8's serialization list verbatim.

use serde::Serialize;

use crate::batch::ConnectionSnapshot;
use crate::nat::NatGauge;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AggregateStats {
    pub sent_bytes: u64,
    pub rcvd_bytes: u64,
    pub sent_pkts: u64,
    pub rcvd_pkts: u64,
    pub dropped_conns: u64,
    pub open_sockets: usize,
    pub max_fd_seen: i32,
    pub active_conns: usize,
    pub total_opened_conns: u64,
    pub dns_requests: u64,
}

impl AggregateStats {
    pub fn new(
        sent_bytes: u64,
        rcvd_bytes: u64,
        sent_pkts: u64,
        rcvd_pkts: u64,
        gauge: NatGauge,
        dropped_conns: u64,
        dns_requests: u64,
    ) -> Self {
        Self {
            sent_bytes,
            rcvd_bytes,
            sent_pkts,
            rcvd_pkts,
            dropped_conns,
            open_sockets: gauge.open_sockets,
            max_fd_seen: gauge.max_fd_seen,
            active_conns: gauge.active_conns,
            total_opened_conns: gauge.total_opened,
            dns_requests,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Started,
    Stopped,
}

/// Mirrors §6's "Core -> host (callbacks)": `getApplicationByUid`, `protect`,
/// `dumpPcapData`, `sendConnectionsDump`, `sendStatsDump`, `sendServiceStatus`.
///
/// Per §7, a host-callback exception is a per-packet error: logged and cleared, never
/// propagated. Implementations should swallow their own I/O errors internally rather
/// than returning `Result`, matching that severity.
pub trait EventSink {
    /// Resolves a UID to an application identifier. Special UIDs
    /// ([`crate::connection::UID_ROOT`], [`crate::connection::UID_NETD`]) are
    /// short-circuited by the caller and never reach this method.
    fn application_by_uid(&self, uid: u32) -> String;

    /// Registers `fd` with the host's socket-protect primitive, preventing routing loops
    /// back through the VPN. Called once per socket, before any traffic is sent.
    fn protect(&self, fd: std::os::raw::c_int) -> bool;

    fn dump_pcap_data(&self, bytes: Vec<u8>);

    fn send_connections_dump(&self, new_conns: Vec<ConnectionSnapshot>, updated_conns: Vec<ConnectionSnapshot>);

    fn send_stats_dump(&self, stats: AggregateStats);

    fn send_service_status(&self, status: ServiceStatus);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        statuses: Mutex<Vec<ServiceStatus>>,
    }

    impl EventSink for RecordingSink {
        fn application_by_uid(&self, _uid: u32) -> String {
            "com.example.app".to_string()
        }

        fn protect(&self, _fd: std::os::raw::c_int) -> bool {
            true
        }

        fn dump_pcap_data(&self, _bytes: Vec<u8>) {}

        fn send_connections_dump(&self, _new_conns: Vec<ConnectionSnapshot>, _updated_conns: Vec<ConnectionSnapshot>) {}

        fn send_stats_dump(&self, _stats: AggregateStats) {}

        fn send_service_status(&self, status: ServiceStatus) {
            self.statuses.lock().unwrap().push(status);
        }
    }

    #[test]
    fn sink_records_service_status_transitions() {
        let sink = RecordingSink::default();
        sink.send_service_status(ServiceStatus::Started);
        sink.send_service_status(ServiceStatus::Stopped);

        assert_eq!(*sink.statuses.lock().unwrap(), vec![ServiceStatus::Started, ServiceStatus::Stopped]);
    }

    #[test]
    fn aggregate_stats_carries_gauge_fields_through() {
        let gauge = NatGauge {
            open_sockets: 3,
            max_fd_seen: 17,
            active_conns: 3,
            total_opened: 9,
        };
        let stats = AggregateStats::new(100, 200, 4, 6, gauge, 2, 5);

        assert_eq!(stats.open_sockets, 3);
        assert_eq!(stats.dropped_conns, 2);
        assert_eq!(stats.dns_requests, 5);
        assert_eq!(stats.sent_bytes, 100);
        assert_eq!(stats.rcvd_bytes, 200);
        assert_eq!(stats.sent_pkts, 4);
        assert_eq!(stats.rcvd_pkts, 6);
    }
}
