//! The three error severities from the core's error-handling design: fatal
//! errors stop the run, connection errors abandon one flow, packet errors are
//! logged and skipped.

use std::net::AddrParseError;

/// A fatal error terminates the run loop; [`crate::Runtime::run`] returns it to the caller.
#[derive(thiserror::Error, Debug)]
pub enum FatalError {
    #[error("failed to read from tun device")]
    TunRead(#[source] std::io::Error),
    #[error("failed to write to tun device")]
    TunWrite(#[source] std::io::Error),
    #[error("NAT table failed to initialize")]
    NatInit(#[source] anyhow::Error),
    #[error("pcap collector connection failed")]
    PcapCollectorConnect(#[source] std::io::Error),
    #[error("failed to allocate pcap host buffer")]
    PcapBufferAlloc,
}

/// A per-connection error: the offending connection is abandoned, the loop continues.
#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error("NAT table failed to forward packet")]
    ForwardFailed(#[source] anyhow::Error),
    #[error("DPI engine failed to allocate a flow")]
    DpiAllocFailed,
}

/// A per-packet error: logged and the packet is skipped, the connection survives.
#[derive(thiserror::Error, Debug)]
pub enum PacketError {
    #[error("failed to parse IP packet")]
    Parse(#[source] anyhow::Error),
    #[error("tun read returned a transient error")]
    TransientTunRead(#[source] std::io::Error),
    #[error("tun write would block (ENOBUFS)")]
    TunWriteWouldBlock,
    #[error("host callback failed")]
    HostCallback(#[source] anyhow::Error),
}

/// Errors constructing a [`crate::config::Config`] from host-supplied values.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{field} is not a valid IP address: {source}")]
    InvalidAddress {
        field: &'static str,
        #[source]
        source: AddrParseError,
    },
    #[error("{field} is out of range for a port number: {value}")]
    InvalidPort { field: &'static str, value: i64 },
}
