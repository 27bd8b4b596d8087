//! Per-5-tuple connection state (C3) and the table that owns it.
//!
//! Per the design notes, the NAT library only ever hands back a connection
//! id; the record itself is owned here as a keyed side-table, not inside the
//! NAT implementation.

use std::collections::HashMap;

use crate::tuple::FiveTuple;

/// Sentinel for a UID the host could not resolve.
pub const UID_UNKNOWN: u32 = u32::MAX;
pub const UID_ROOT: u32 = 0;
pub const UID_NETD: u32 = 1051;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    New,
    Active,
    Closed,
    Error,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Closed | Status::Error)
    }
}

/// The `(app, master)` classification pair DPI fills in once it concludes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct L7Protocol {
    pub app: Option<String>,
    pub master: Option<String>,
}

impl L7Protocol {
    /// Fills `master` with `app` when DPI never assigned a master protocol, per §4.5
    /// ("fill `master` with `app` if `master == UNKNOWN`").
    pub fn finalize(&mut self) {
        if self.master.is_none() {
            self.master = self.app.clone();
        }
    }

    /// `proto_name` derivation from §4.8: report the DPI master-protocol name when it is
    /// one of the protocols worth reporting, otherwise fall back to the L3 protocol name.
    pub fn report_name(&self, l4_name: &'static str, reportable_masters: &[&str]) -> String {
        match &self.master {
            Some(master) if reportable_masters.contains(&master.as_str()) => master.clone(),
            _ => l4_name.to_string(),
        }
    }
}

/// Per-5-tuple connection record.
#[derive(Debug, Clone)]
pub struct Connection {
    pub tuple: FiveTuple,
    pub status: Status,
    /// Wall-clock seconds since the Unix epoch.
    pub first_seen: u64,
    pub last_seen: u64,
    pub sent_pkts: u64,
    pub rcvd_pkts: u64,
    pub sent_bytes: u64,
    pub rcvd_bytes: u64,
    pub uid: u32,
    /// Assigned only once the connection is judged reportable; dense and gap-free per run.
    pub incr_id: Option<u64>,
    pub l7: L7Protocol,
    pub info: Option<String>,
    pub url: Option<String>,
    pub pending_notification: bool,
    /// Whether this connection passes the reportability filter (§4.4).
    pub reportable: bool,
    /// Set when the DNS gate tags this connection for DNAT to the configured resolver.
    pub dnat_to_resolver: bool,
    /// Set when SOCKS5 proxying applies to this (TCP) connection.
    pub socks5: bool,
    /// The NAT table's connection id for this 5-tuple, assigned on admission.
    pub nat_id: u64,
    /// The DPI driver's flow handle, freed (and cleared) once DPI concludes.
    pub dpi_flow: Option<u64>,
}

impl Connection {
    pub fn new(tuple: FiveTuple, now: u64, uid: u32) -> Self {
        Self {
            tuple,
            status: Status::New,
            first_seen: now,
            last_seen: now,
            sent_pkts: 0,
            rcvd_pkts: 0,
            sent_bytes: 0,
            rcvd_bytes: 0,
            uid,
            incr_id: None,
            l7: L7Protocol::default(),
            info: None,
            url: None,
            pending_notification: false,
            reportable: false,
            dnat_to_resolver: false,
            socks5: false,
            nat_id: 0,
            dpi_flow: None,
        }
    }

    /// Accounts one packet of `len` bytes in `dir`, refreshing `last_seen` (invariant 1).
    pub fn account(&mut self, dir: crate::tuple::Direction, len: u64, now: u64) {
        match dir {
            crate::tuple::Direction::Outbound => {
                self.sent_pkts += 1;
                self.sent_bytes += len;
            }
            crate::tuple::Direction::Inbound => {
                self.rcvd_pkts += 1;
                self.rcvd_bytes += len;
            }
        }
        self.last_seen = now;
    }
}

/// Owns every live [`Connection`], keyed by its [`FiveTuple`].
#[derive(Default)]
pub struct ConnectionTable {
    conns: HashMap<FiveTuple, Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tuple: &FiveTuple) -> Option<&Connection> {
        self.conns.get(tuple)
    }

    pub fn get_mut(&mut self, tuple: &FiveTuple) -> Option<&mut Connection> {
        self.conns.get_mut(tuple)
    }

    pub fn insert(&mut self, conn: Connection) {
        self.conns.insert(conn.tuple, conn);
    }

    pub fn remove(&mut self, tuple: &FiveTuple) -> Option<Connection> {
        self.conns.remove(tuple)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FiveTuple, &Connection)> {
        self.conns.iter()
    }

    /// Drops every record whose `last_seen` is older than `idle_secs`, returning how many
    /// were expired. Grounds C8 step 5d ("ask the NAT library to expire idle connections").
    pub fn expire_idle(&mut self, now: u64, idle_secs: u64) -> usize {
        let before = self.conns.len();
        self.conns
            .retain(|_, c| now.saturating_sub(c.last_seen) < idle_secs);
        before - self.conns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Direction, L4Protocol};
    use std::net::{IpAddr, Ipv4Addr};

    fn tuple() -> FiveTuple {
        FiveTuple::new(
            L4Protocol::Udp,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            51000,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            53,
        )
    }

    #[test]
    fn account_sums_bytes_by_direction() {
        let mut c = Connection::new(tuple(), 0, UID_UNKNOWN);

        c.account(Direction::Outbound, 100, 1);
        c.account(Direction::Outbound, 50, 2);
        c.account(Direction::Inbound, 200, 3);

        assert_eq!(c.sent_bytes, 150);
        assert_eq!(c.sent_pkts, 2);
        assert_eq!(c.rcvd_bytes, 200);
        assert_eq!(c.rcvd_pkts, 1);
        assert_eq!(c.last_seen, 3);
    }

    #[test]
    fn finalize_fills_unset_master_with_app() {
        let mut l7 = L7Protocol {
            app: Some("HTTP".to_string()),
            master: None,
        };
        l7.finalize();
        assert_eq!(l7.master.as_deref(), Some("HTTP"));
    }

    #[test]
    fn report_name_falls_back_to_l3_when_master_not_reportable() {
        let l7 = L7Protocol {
            app: Some("SOMETHING_OBSCURE".to_string()),
            master: Some("SOMETHING_OBSCURE".to_string()),
        };

        assert_eq!(l7.report_name("TCP", &["DNS", "HTTP", "TLS"]), "TCP");
    }

    #[test]
    fn expire_idle_drops_stale_connections_only() {
        let mut table = ConnectionTable::new();
        let mut c = Connection::new(tuple(), 0, UID_UNKNOWN);
        c.last_seen = 0;
        table.insert(c);

        let expired = table.expire_idle(10_000, 5_000);

        assert_eq!(expired, 1);
        assert!(table.is_empty());
    }
}
