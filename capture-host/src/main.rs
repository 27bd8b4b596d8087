//! Binary entry point: wires the capture core to a real tun device and real
//! host sockets, and runs it until SIGINT/SIGTERM.

mod cli;
mod signals;
mod sink;

use std::net::IpAddr;

use anyhow::{Context as _, Result, anyhow};
use capture_core::dns_gate::DnsGate;
use capture_core::nat::UserspaceNat;
use capture_core::packet_loop::PacketLoop;
use clap::Parser;
use tun::unix::UnixTun;

use crate::cli::Cli;
use crate::sink::StdoutSink;

fn main() -> Result<()> {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }

    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.log_dir).context("failed to create log directory")?;
    let (file_layer, _guard) = logging::file::layer(&cli.log_dir, "capture-host");
    let _reload_handle = logging::setup_global_subscriber(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        file_layer,
        false,
    )
    .context("failed to install the tracing subscriber")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let tun_name = cli.tun_name.clone();
    let log_dir_display = cli.log_dir.display().to_string();

    let config = cli
        .into_raw_config()
        .validate()
        .context("invalid configuration")?;

    let vpn_dns = match config.vpn_dns {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => return Err(anyhow!("vpn_dns must be an IPv4 address")),
    };
    let dns_gate = DnsGate::new(vpn_dns, config.ipv6_dns_server, config.dns_server);

    let tun = UnixTun::new(&tun_name).with_context(|| format!("failed to open tun device {tun_name}"))?;
    let nat = UserspaceNat::new();
    let sink = StdoutSink;

    let mut packet_loop = PacketLoop::new(tun, nat, sink, config, dns_gate).context("failed to initialize packet loop")?;
    let handle = packet_loop.handle();

    tracing::info!(tun_name, log_dir = log_dir_display, "capture-host starting");

    let mut terminate = signals::Terminate::new().context("failed to install signal handlers")?;

    tokio::select! {
        () = packet_loop.run() => {}
        () = terminate.recv() => {
            tracing::info!("received shutdown signal");
            handle.request_stop();
            packet_loop.run().await;
        }
    }

    Ok(())
}
