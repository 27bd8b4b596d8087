//! Packet loop (C8): the single-threaded, cooperative event loop described
//! in §4.7. Implemented with `tokio::select!` over the tun device's
//! readiness, the NAT table's socket readiness, and a 500 ms tick — the
//! idiomatic Rust rendering of "build an `fd_set`, block in `select` with a
//! 500 ms timeout".

use std::future::poll_fn;
use std::time::Duration;

use ip_packet::IpPacket;
use tracing::{debug, warn};
use tun::Tun;

use crate::batch::Collector;
use crate::config::Config;
use crate::connection::{Connection, ConnectionTable, Status};
use crate::dns_gate::{DnsGate, GateDecision};
use crate::dpi::{Driver, DriverStep};
use crate::error::FatalError;
use crate::events::{AggregateStats, EventSink, ServiceStatus};
use crate::host_lru::HostLru;
use crate::nat::NatTable;
use crate::pcap::{HostBufferSink, RemotePcapSink, Transport};
use crate::runtime::Runtime;
use crate::tuple::{Direction, FiveTuple, L4Protocol};

const STATS_CADENCE_MS: u64 = 300;
const CONNS_DUMP_CADENCE_MS: u64 = 1_000;
const PCAP_FLUSH_CADENCE_MS: u64 = 1_000;
const PURGE_CADENCE_MS: u64 = 5_000;
const NAT_IDLE_SECS: u64 = 300;
const TUN_BATCH_SIZE: usize = 64;

/// Derives the connection 5-tuple from a parsed IP packet, per §4.7 step 3.
fn five_tuple_of(packet: &IpPacket) -> Option<FiveTuple> {
    let src_ip = packet.source();
    let dst_ip = packet.destination();

    let (l4_proto, src_port, dst_port) = if let Some(tcp) = packet.as_tcp() {
        (L4Protocol::Tcp, tcp.source_port(), tcp.destination_port())
    } else if let Some(udp) = packet.as_udp() {
        (L4Protocol::Udp, udp.source_port(), udp.destination_port())
    } else if packet.is_icmp() || packet.is_icmpv6() {
        let id = packet.source_protocol().ok()?.value();
        (L4Protocol::Icmp, id, id)
    } else {
        return None;
    };

    Some(FiveTuple::new(l4_proto, src_ip, src_port, dst_ip, dst_port))
}

/// Wraps a reply payload arriving from the NAT-side socket back into an IP packet
/// addressed from the connection's remote endpoint back to the tun-side client, i.e.
/// the reverse of `tuple`.
fn build_reply_packet(tuple: &FiveTuple, payload: Vec<u8>) -> anyhow::Result<IpPacket> {
    let reversed = tuple.reversed();

    match tuple.l4_proto {
        L4Protocol::Udp => ip_packet::make::udp_packet(
            reversed.src_ip,
            reversed.dst_ip,
            reversed.src_port,
            reversed.dst_port,
            payload,
        ),
        L4Protocol::Tcp => ip_packet::make::tcp_packet(
            reversed.src_ip,
            reversed.dst_ip,
            reversed.src_port,
            reversed.dst_port,
            ip_packet::make::TcpFlags::default(),
            payload,
        ),
        L4Protocol::Icmp => ip_packet::make::icmp_reply_packet(
            reversed.src_ip,
            reversed.dst_ip,
            0,
            reversed.src_port,
            &payload,
        ),
    }
}

/// A SYN without ACK is the start of a brand-new outbound handshake; anything else
/// arriving for an unknown tuple is either an established session or a stray packet,
/// neither of which may originate a new connection record (§4.7 step 3).
fn is_new_tcp_handshake(packet: &IpPacket) -> bool {
    packet
        .as_tcp()
        .map(|tcp| tcp.syn() && !tcp.ack())
        .unwrap_or(true)
}

/// A FIN or RST on an established TCP connection is a close signal from the tun side.
fn is_tcp_close_signal(packet: &IpPacket) -> bool {
    packet.as_tcp().map(|tcp| tcp.fin() || tcp.rst()).unwrap_or(false)
}

pub struct PacketLoop<T, N, S> {
    tun: T,
    nat: N,
    sink: S,
    config: Config,
    runtime: Runtime,
    conns: ConnectionTable,
    collector: Collector,
    dns_gate: DnsGate,
    dpi: Driver<crate::dpi::HeuristicDpi>,
    host_lru: HostLru,
    host_pcap: HostBufferSink,
    remote_pcap: Option<RemotePcapSink>,
    dropped_conns: u64,
    last_stats_emit_ms: u64,
    last_conns_dump_ms: u64,
    last_pcap_flush_ms: u64,
    last_purge_ms: u64,
    capture_stats_dirty: bool,
}

impl<T, N, S> PacketLoop<T, N, S>
where
    T: Tun,
    N: NatTable,
    S: EventSink,
{
    /// Builds the loop, connecting the remote pcap collector socket (if configured) and
    /// registering it with the host's socket-protect primitive before returning. Fails if
    /// the collector is configured but the connect itself fails (§7: fatal).
    pub fn new(tun: T, nat: N, sink: S, config: Config, dns_gate: DnsGate) -> Result<Self, FatalError> {
        let remote_pcap = config
            .pcap_collector
            .map(|addr| {
                let transport = if config.dump_pcap_to_udp { Transport::Udp } else { Transport::Tcp };
                RemotePcapSink::connect(addr, transport, ip_packet::MAX_IP_SIZE as u32)
                    .map_err(FatalError::PcapCollectorConnect)
            })
            .transpose()?;

        if let Some(remote) = &remote_pcap {
            if !sink.protect(remote.fd()) {
                warn!(fd = remote.fd(), "host failed to protect pcap collector socket");
            }
        }

        Ok(Self {
            tun,
            nat,
            sink,
            config,
            runtime: Runtime::new(),
            conns: ConnectionTable::new(),
            collector: Collector::new(),
            dns_gate,
            dpi: Driver::new(crate::dpi::HeuristicDpi::new()),
            host_lru: HostLru::new(),
            host_pcap: HostBufferSink::new(),
            remote_pcap,
            dropped_conns: 0,
            last_stats_emit_ms: 0,
            last_conns_dump_ms: 0,
            last_pcap_flush_ms: 0,
            last_purge_ms: 0,
            capture_stats_dirty: false,
        })
    }

    pub fn handle(&self) -> crate::runtime::Handle {
        self.runtime.handle()
    }

    /// Runs until the host requests a stop via the [`crate::runtime::Handle`].
    pub async fn run(&mut self) {
        self.sink.send_service_status(ServiceStatus::Started);

        let mut tick = tokio::time::interval(Duration::from_millis(500));
        let mut tun_batch: Vec<IpPacket> = Vec::with_capacity(TUN_BATCH_SIZE);

        while self.runtime.is_running() {
            tun_batch.clear();

            tokio::select! {
                n = poll_fn(|cx| self.tun.poll_recv_many(cx, &mut tun_batch, TUN_BATCH_SIZE)) => {
                    for packet in tun_batch.drain(..n) {
                        self.on_tun_packet(packet, now_ms());
                    }
                }
                ready = poll_fn(|cx| self.nat.poll_recv_ready(cx)) => {
                    self.on_nat_ready(ready, now_ms());
                }
                _ = tick.tick() => {}
            }

            self.housekeeping(now_ms());
        }

        self.teardown(now_ms());
    }

    fn on_tun_packet(&mut self, packet: IpPacket, now: u64) {
        if matches!(packet.version(), ip_packet::IpVersion::V6) && !self.config.ipv6_enabled {
            return;
        }

        let Some(tuple) = five_tuple_of(&packet) else {
            debug!("dropping packet with unsupported transport");
            return;
        };

        let is_new_handshake = tuple.l4_proto != L4Protocol::Tcp || is_new_tcp_handshake(&packet);

        if self.conns.get(&tuple).is_none() {
            if !is_new_handshake {
                return;
            }
            if !self.admit_connection(tuple, packet.payload(), now) {
                return;
            }
        }

        let is_close_signal = tuple.l4_proto == L4Protocol::Tcp && is_tcp_close_signal(&packet);

        self.forward_outbound(tuple, packet.payload(), now);

        if is_close_signal {
            self.close_connection(tuple, Status::Closed, now);
        }
    }

    /// Runs the DNS gate, opens the NAT-side socket, and seeds a [`Connection`] record.
    /// Returns `false` if the connection was blocked or could not be opened.
    fn admit_connection(&mut self, tuple: FiveTuple, l7_payload: &[u8], now: u64) -> bool {
        let decision = self.dns_gate.evaluate(&tuple, l7_payload);

        let dnat_to = match decision {
            GateDecision::Block => return false,
            GateDecision::Allow { dnat_to } => dnat_to,
        };

        let socks5 = self.config.socks5_enabled && tuple.l4_proto == L4Protocol::Tcp;

        let (nat_id, fd) = match self.nat.on_connection_open(tuple, dnat_to, socks5, now) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "NAT table failed to open connection");
                self.dropped_conns += 1;
                return false;
            }
        };

        if fd >= 0 && !self.sink.protect(fd) {
            warn!(fd, "host failed to protect NAT connection socket");
        }

        // No host callback resolves a per-packet UID (getApplicationByUid only goes the
        // other way), so every connection carries UID_UNKNOWN here.
        let mut conn = Connection::new(tuple, now, crate::connection::UID_UNKNOWN);
        conn.nat_id = nat_id;
        conn.dpi_flow = Some(self.dpi.new_flow());
        conn.dnat_to_resolver = dnat_to.is_some();
        conn.socks5 = socks5;
        conn.reportable = crate::batch::is_reportable(&tuple, self.config.vpn_dns);

        if let Some(name) = self.host_lru.find(tuple.dst_ip) {
            conn.info = Some(name);
        }

        self.collector.note_new(&mut conn);
        self.conns.insert(conn);
        self.capture_stats_dirty = true;
        true
    }

    fn forward_outbound(&mut self, tuple: FiveTuple, payload: &[u8], now: u64) {
        let Some(conn) = self.conns.get_mut(&tuple) else {
            return;
        };
        let nat_id = conn.nat_id;
        let dpi_flow = conn.dpi_flow;

        conn.account(Direction::Outbound, payload.len() as u64, now);
        if conn.status == Status::New {
            conn.status = Status::Active;
        }

        self.record_dpi_packet(&tuple, dpi_flow, payload, Direction::Outbound, now);
        self.frame_pcap(payload, now);

        if let Err(e) = self.nat.forward(nat_id, payload) {
            warn!(error = %e, "NAT forward failed, closing connection");
            self.dropped_conns += 1;
            self.close_connection(tuple, Status::Error, now);
            return;
        }
        self.nat.touch(nat_id, now);

        if let Some(conn) = self.conns.get_mut(&tuple) {
            self.collector.note_update(conn);
        }
    }

    fn on_nat_ready(&mut self, ready: Vec<(crate::nat::ConnId, Vec<u8>)>, now: u64) {
        for (nat_id, payload) in ready {
            self.nat.touch(nat_id, now);

            let Some((&tuple, dpi_flow)) = self
                .conns
                .iter()
                .find(|(_, c)| c.nat_id == nat_id)
                .map(|(t, c)| (t, c.dpi_flow))
            else {
                continue;
            };

            // A zero-length read on a TCP connection's NAT-side socket is the remote
            // half-closing; there is no reply payload to forward, just a close to record.
            if tuple.l4_proto == L4Protocol::Tcp && payload.is_empty() {
                self.close_connection(tuple, Status::Closed, now);
                continue;
            }

            self.frame_pcap(&payload, now);

            if let Some(conn) = self.conns.get_mut(&tuple) {
                conn.account(Direction::Inbound, payload.len() as u64, now);
            }

            self.record_dpi_packet(&tuple, dpi_flow, &payload, Direction::Inbound, now);

            match build_reply_packet(&tuple, payload) {
                Ok(packet) => {
                    if let Err(e) = self.tun.send(packet) {
                        warn!(error = %e, "failed to write reply packet to tun device");
                    }
                }
                Err(e) => warn!(error = %e, "failed to build reply packet"),
            }

            if let Some(conn) = self.conns.get_mut(&tuple) {
                self.collector.note_update(conn);
            }
        }
    }

    fn record_dpi_packet(
        &mut self,
        tuple: &FiveTuple,
        dpi_flow: Option<u64>,
        payload: &[u8],
        dir: Direction,
        now: u64,
    ) {
        let Some(flow) = dpi_flow else { return };

        let step = self.dpi.on_packet(flow, payload, dir, now * 1_000);
        if matches!(step, DriverStep::Continue) {
            return;
        }

        self.apply_dpi_result(tuple, step);

        if let Some(conn) = self.conns.get_mut(tuple) {
            self.collector.note_update(conn);
        }
    }

    /// Applies a concluded DPI verdict to the matching connection: fills in `l7`/`info`/
    /// `url`, clears `dpi_flow`, and feeds any DNS answer into the host LRU. Shared between
    /// the normal DPI-terminates-on-its-own path and the forced-finish close path.
    fn apply_dpi_result(&mut self, tuple: &FiveTuple, step: DriverStep) {
        let DriverStep::Finished { l7, extract } = step else {
            return;
        };

        if let Some(conn) = self.conns.get_mut(tuple) {
            conn.l7 = l7;
            conn.info = extract.info.or_else(|| conn.info.clone());
            conn.url = extract.url.or_else(|| conn.url.clone());
            conn.dpi_flow = None;
        }

        if let Some((host, addr)) = extract.dns_answer {
            self.host_lru.add(addr, host);
        }
    }

    /// Finalizes a connection on close: forces DPI to conclude, asks the NAT table to
    /// drop its socket, and queues the closing update. Does not remove the record from
    /// `self.conns` — that happens once the closing update has actually been delivered
    /// (`free_closed_connections`), so the host always sees the final snapshot.
    fn close_connection(&mut self, tuple: FiveTuple, status: Status, now: u64) {
        let Some(conn) = self.conns.get(&tuple) else {
            return;
        };
        if conn.status.is_terminal() {
            return;
        }
        let dpi_flow = conn.dpi_flow;
        let nat_id = conn.nat_id;

        if let Some(flow) = dpi_flow {
            let step = self.dpi.finish(flow);
            self.apply_dpi_result(&tuple, step);
        }

        self.nat.on_connection_close(nat_id);

        let Some(conn) = self.conns.get_mut(&tuple) else {
            return;
        };
        conn.status = status;
        conn.last_seen = now;
        self.collector.note_update(conn);
    }

    fn frame_pcap(&mut self, payload: &[u8], now: u64) {
        if self.config.dump_pcap_to_host {
            if let Some(flushed) = self.host_pcap.append(now * 1_000, payload, now) {
                self.sink.dump_pcap_data(flushed);
            }
        }
        if let Some(remote) = self.remote_pcap.as_mut() {
            remote.send_record(now * 1_000, payload);
        }
    }

    /// Housekeeping (§4.7 step 5): at most one branch per iteration, priority-ordered.
    fn housekeeping(&mut self, now: u64) {
        let forced_stats = self.runtime.take_vpn_stats_dump_request();
        let forced_conns = self.runtime.take_capture_stats_dump_request();
        let forced_purge = false;

        if let Some(addr) = self.runtime.take_new_dns_server() {
            self.dns_gate.request_new_dns_server(addr);
        }

        if self.capture_stats_dirty && (now.saturating_sub(self.last_stats_emit_ms) >= STATS_CADENCE_MS || forced_stats) {
            self.emit_stats(now);
        } else if forced_conns || now.saturating_sub(self.last_conns_dump_ms) >= CONNS_DUMP_CADENCE_MS {
            self.emit_conns_dump(now);
        } else if !self.host_pcap.is_empty() && self.host_pcap.due_for_time_flush(now) {
            let flushed = self.host_pcap.flush(now);
            self.sink.dump_pcap_data(flushed);
            self.last_pcap_flush_ms = now;
        } else if now.saturating_sub(self.last_purge_ms) >= PURGE_CADENCE_MS || forced_purge {
            self.purge_idle(now);
        }
    }

    fn emit_stats(&mut self, now: u64) {
        let gauge = self.nat.gauge();
        let (sent_bytes, rcvd_bytes, sent_pkts, rcvd_pkts) = self.conns.iter().fold(
            (0u64, 0u64, 0u64, 0u64),
            |(sent_bytes, rcvd_bytes, sent_pkts, rcvd_pkts), (_, c)| {
                (
                    sent_bytes + c.sent_bytes,
                    rcvd_bytes + c.rcvd_bytes,
                    sent_pkts + c.sent_pkts,
                    rcvd_pkts + c.rcvd_pkts,
                )
            },
        );

        let stats = AggregateStats::new(
            sent_bytes,
            rcvd_bytes,
            sent_pkts,
            rcvd_pkts,
            gauge,
            self.dropped_conns,
            self.dns_gate.dns_request_count(),
        );
        self.sink.send_stats_dump(stats);
        self.last_stats_emit_ms = now;
        self.capture_stats_dirty = false;
    }

    fn emit_conns_dump(&mut self, now: u64) {
        let (new_conns, updated_conns) = self.collector.drain();

        if !new_conns.is_empty() || !updated_conns.is_empty() {
            let tuples: Vec<FiveTuple> = new_conns.iter().chain(updated_conns.iter()).map(|(t, _)| *t).collect();
            let new_snapshots = new_conns.into_iter().map(|(_, s)| s).collect();
            let updated_snapshots = updated_conns.into_iter().map(|(_, s)| s).collect();

            self.sink.send_connections_dump(new_snapshots, updated_snapshots);

            for tuple in tuples {
                if let Some(conn) = self.conns.get_mut(&tuple) {
                    conn.pending_notification = false;
                }
            }
        }

        self.free_closed_connections();
        self.last_conns_dump_ms = now;
    }

    fn free_closed_connections(&mut self) {
        let closed: Vec<FiveTuple> = self
            .conns
            .iter()
            .filter(|(_, c)| c.status.is_terminal() && !c.pending_notification)
            .map(|(t, _)| *t)
            .collect();
        for tuple in closed {
            self.conns.remove(&tuple);
        }
    }

    fn purge_idle(&mut self, now: u64) {
        let expired_ids = self.nat.expire_idle(now, NAT_IDLE_SECS);
        if expired_ids.is_empty() {
            self.last_purge_ms = now;
            return;
        }

        let expired_tuples: Vec<FiveTuple> = self
            .conns
            .iter()
            .filter(|(_, c)| expired_ids.contains(&c.nat_id))
            .map(|(t, _)| *t)
            .collect();

        for tuple in expired_tuples {
            self.close_connection(tuple, Status::Closed, now);
        }

        self.last_purge_ms = now;
    }

    fn teardown(&mut self, now: u64) {
        if !self.host_pcap.is_empty() {
            let flushed = self.host_pcap.flush(now);
            self.sink.dump_pcap_data(flushed);
        }

        let (new_conns, updated_conns) = self.collector.drain();
        if !new_conns.is_empty() || !updated_conns.is_empty() {
            let new_snapshots = new_conns.into_iter().map(|(_, s)| s).collect();
            let updated_snapshots = updated_conns.into_iter().map(|(_, s)| s).collect();
            self.sink.send_connections_dump(new_snapshots, updated_snapshots);
        }

        // The run is ending: every connection record is freed regardless of whether its
        // closing notification was ever queued, not just the terminal ones.
        self.conns = ConnectionTable::new();

        self.sink.send_service_status(ServiceStatus::Stopped);
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
