//! A minimal [`EventSink`] for running the capture core standalone: emits
//! every callback as a JSON line on stdout (connection dumps, stats dumps)
//! or a `tracing` event (service status, pcap data), rather than crossing
//! into a managed host runtime's IPC.

use capture_core::batch::ConnectionSnapshot;
use capture_core::connection::{UID_NETD, UID_ROOT};
use capture_core::events::{AggregateStats, EventSink, ServiceStatus};

pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn application_by_uid(&self, uid: u32) -> String {
        match uid {
            UID_ROOT => "ROOT".to_string(),
            UID_NETD => "netd".to_string(),
            uid => format!("uid:{uid}"),
        }
    }

    fn protect(&self, _fd: std::os::raw::c_int) -> bool {
        true
    }

    fn dump_pcap_data(&self, bytes: Vec<u8>) {
        tracing::debug!(bytes = bytes.len(), "pcap data ready for host delivery");
    }

    fn send_connections_dump(&self, new_conns: Vec<ConnectionSnapshot>, updated_conns: Vec<ConnectionSnapshot>) {
        for conn in new_conns.iter().chain(updated_conns.iter()) {
            match serde_json::to_string(conn) {
                Ok(line) => println!("{line}"),
                Err(error) => tracing::warn!(%error, "failed to serialize connection snapshot"),
            }
        }
    }

    fn send_stats_dump(&self, stats: AggregateStats) {
        match serde_json::to_string(&stats) {
            Ok(line) => println!("{line}"),
            Err(error) => tracing::warn!(%error, "failed to serialize stats dump"),
        }
    }

    fn send_service_status(&self, status: ServiceStatus) {
        tracing::info!(?status, "service status changed");
    }
}
