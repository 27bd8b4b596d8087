//! Packet-processing core for a mobile traffic-capture tool: reads raw IP
//! packets from a tun device, userspace-NATs them to real host sockets,
//! classifies connections with a DPI driver, enforces a DNS interception
//! policy, and emits pcap captures and structured connection events back
//! to the host.

pub mod batch;
pub mod config;
pub mod connection;
pub mod dns_gate;
pub mod dpi;
pub mod error;
pub mod events;
pub mod host_lru;
pub mod known_dns;
pub mod nat;
pub mod packet_loop;
pub mod pcap;
pub mod runtime;
pub mod tuple;

pub use config::{Config, RawConfig};
pub use connection::{Connection, ConnectionTable, Status};
pub use error::{ConfigError, ConnectionError, FatalError, PacketError};
pub use events::{AggregateStats, EventSink, ServiceStatus};
pub use nat::{NatTable, UserspaceNat};
pub use packet_loop::PacketLoop;
pub use runtime::{Handle, Runtime};
pub use tuple::{Direction, FiveTuple, L4Protocol};
