//! Command-line surface: one flag per host getter in §6 of the design, plus
//! the handful of process-level knobs (tun device name, log directory).

use std::path::PathBuf;

use capture_core::RawConfig;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Userspace NAT + DPI capture core", long_about = None)]
pub struct Cli {
    /// Name of the tun device to attach to, e.g. "tun0".
    #[arg(long, env = "CAPTURE_TUN_NAME")]
    pub tun_name: String,

    /// File logging directory. Created if it doesn't exist.
    #[arg(long, env = "CAPTURE_LOG_DIR", default_value = "/var/log/capture-host")]
    pub log_dir: PathBuf,

    #[arg(long, env = "CAPTURE_VPN_IPV4")]
    pub vpn_ipv4: String,

    #[arg(long, env = "CAPTURE_VPN_DNS")]
    pub vpn_dns: String,

    #[arg(long, env = "CAPTURE_DNS_SERVER")]
    pub dns_server: String,

    #[arg(long, env = "CAPTURE_DNS_SERVER_PORT", default_value_t = 53)]
    pub dns_server_port: i64,

    #[arg(long, env = "CAPTURE_IPV6_DNS_SERVER")]
    pub ipv6_dns_server: Option<String>,

    #[arg(long, env = "CAPTURE_PCAP_COLLECTOR_ADDRESS")]
    pub pcap_collector_address: Option<String>,

    #[arg(long, env = "CAPTURE_PCAP_COLLECTOR_PORT", default_value_t = 0)]
    pub pcap_collector_port: i64,

    #[arg(long, env = "CAPTURE_SOCKS5_PROXY_ADDRESS")]
    pub socks5_proxy_address: Option<String>,

    #[arg(long, env = "CAPTURE_SOCKS5_PROXY_PORT", default_value_t = 0)]
    pub socks5_proxy_port: i64,

    #[arg(long, env = "CAPTURE_DUMP_PCAP_TO_HOST")]
    pub dump_pcap_to_host: bool,

    #[arg(long, env = "CAPTURE_DUMP_PCAP_TO_UDP")]
    pub dump_pcap_to_udp: bool,

    #[arg(long, env = "CAPTURE_SOCKS5_ENABLED")]
    pub socks5_enabled: bool,

    #[arg(long, env = "CAPTURE_IPV6_ENABLED")]
    pub ipv6_enabled: bool,
}

impl Cli {
    pub fn into_raw_config(self) -> RawConfig {
        RawConfig {
            vpn_ipv4: self.vpn_ipv4,
            vpn_dns: self.vpn_dns,
            dns_server: self.dns_server,
            dns_server_port: self.dns_server_port,
            ipv6_dns_server: self.ipv6_dns_server,
            pcap_collector_address: self.pcap_collector_address,
            pcap_collector_port: self.pcap_collector_port,
            socks5_proxy_address: self.socks5_proxy_address,
            socks5_proxy_port: self.socks5_proxy_port,
            dump_pcap_to_host: self.dump_pcap_to_host,
            dump_pcap_to_udp: self.dump_pcap_to_udp,
            socks5_enabled: self.socks5_enabled,
            ipv6_enabled: self.ipv6_enabled,
        }
    }
}
