//! Run lifecycle and the narrow set of flags the host mutates from outside
//! the loop thread (§5 "Externally mutated flags", §9 design note (a)).
//!
//! The source models these as process-global state; a re-architecture must
//! either encapsulate them in a runtime object reset on every `start()`, or
//! keep the global layout but gate every write through atomics and reset
//! explicitly. This repo takes option (a): [`Runtime`] owns the atomics and
//! resets them in [`Runtime::new`], so no state can leak between runs.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Thin, `Clone`-able handle the host control thread uses to signal the loop. Cloning
/// shares the same underlying flags; it does not create a second run.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<Flags>,
}

struct Flags {
    running: AtomicBool,
    dump_vpn_stats_now: AtomicBool,
    dump_capture_stats_now: AtomicBool,
    /// `0` means "no pending update"; a real update is an IPv4 address, which can never
    /// be `0.0.0.0` in this deployment, so it doubles as the flag's own sentinel.
    new_dns_server: AtomicU32,
}

impl Handle {
    pub fn request_stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub fn request_vpn_stats_dump(&self) {
        self.inner.dump_vpn_stats_now.store(true, Ordering::SeqCst);
    }

    pub fn request_capture_stats_dump(&self) {
        self.inner.dump_capture_stats_now.store(true, Ordering::SeqCst);
    }

    pub fn request_new_dns_server(&self, addr: Ipv4Addr) {
        self.inner.new_dns_server.store(u32::from(addr), Ordering::SeqCst);
    }
}

/// Owns the flags for a single run. The loop reads and clears them at well-defined
/// points; writes come only from a cloned [`Handle`], and are single-word stores/loads
/// (write-once-read-many, eventually observed within one loop tick per §5).
pub struct Runtime {
    flags: Arc<Flags>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            flags: Arc::new(Flags {
                running: AtomicBool::new(true),
                dump_vpn_stats_now: AtomicBool::new(false),
                dump_capture_stats_now: AtomicBool::new(false),
                new_dns_server: AtomicU32::new(0),
            }),
        }
    }

    pub fn handle(&self) -> Handle {
        Handle {
            inner: self.flags.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.flags.running.load(Ordering::SeqCst)
    }

    /// Reads and clears the forced-VPN-stats-dump flag.
    pub fn take_vpn_stats_dump_request(&self) -> bool {
        self.flags.dump_vpn_stats_now.swap(false, Ordering::SeqCst)
    }

    /// Reads and clears the forced-capture-stats-dump flag.
    pub fn take_capture_stats_dump_request(&self) -> bool {
        self.flags.dump_capture_stats_now.swap(false, Ordering::SeqCst)
    }

    /// Reads and clears a pending "install this DNS server" address, if any.
    pub fn take_new_dns_server(&self) -> Option<Ipv4Addr> {
        let raw = self.flags.new_dns_server.swap(0, Ordering::SeqCst);
        if raw == 0 {
            None
        } else {
            Some(Ipv4Addr::from(raw))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_starts_clean_regardless_of_prior_run() {
        let first = Runtime::new();
        first.handle().request_stop();
        assert!(!first.is_running());

        let second = Runtime::new();
        assert!(second.is_running());
    }

    #[test]
    fn dump_requests_are_cleared_on_read() {
        let rt = Runtime::new();
        rt.handle().request_vpn_stats_dump();

        assert!(rt.take_vpn_stats_dump_request());
        assert!(!rt.take_vpn_stats_dump_request());
    }

    #[test]
    fn new_dns_server_round_trips_through_the_handle() {
        let rt = Runtime::new();
        assert_eq!(rt.take_new_dns_server(), None);

        rt.handle().request_new_dns_server(Ipv4Addr::new(9, 9, 9, 9));

        assert_eq!(rt.take_new_dns_server(), Some(Ipv4Addr::new(9, 9, 9, 9)));
        assert_eq!(rt.take_new_dns_server(), None);
    }
}
