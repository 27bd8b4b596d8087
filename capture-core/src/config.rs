//! Host-provided configuration (C11): the getters §6 says the host calls
//! once at startup, plus the validation that turns their raw string/int
//! form into typed values.

use std::net::{IpAddr, SocketAddr};

use crate::error::ConfigError;

/// Everything the host must supply before a run starts. Mirrors §6's
/// `getVpnIPv4`/`getVpnDns`/`getDnsServer`/`getIpv6DnsServer`/`getPcapCollectorAddress`/
/// `getPcapCollectorPort`/`getSocks5ProxyAddress`/`getSocks5ProxyPort` plus the
/// boolean-as-int flags `dumpPcapToJava`/`dumpPcapToUdp`/`getSocks5Enabled`/`getIPv6Enabled`.
#[derive(Debug, Clone)]
pub struct Config {
    pub vpn_ipv4: IpAddr,
    pub vpn_dns: IpAddr,
    pub dns_server: SocketAddr,
    pub ipv6_dns_server: Option<IpAddr>,
    pub pcap_collector: Option<SocketAddr>,
    pub socks5_proxy: Option<SocketAddr>,
    pub dump_pcap_to_host: bool,
    pub dump_pcap_to_udp: bool,
    pub socks5_enabled: bool,
    pub ipv6_enabled: bool,
}

/// Raw host-provided values before parsing/validation, one field per getter in §6.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    pub vpn_ipv4: String,
    pub vpn_dns: String,
    pub dns_server: String,
    pub dns_server_port: i64,
    pub ipv6_dns_server: Option<String>,
    pub pcap_collector_address: Option<String>,
    pub pcap_collector_port: i64,
    pub socks5_proxy_address: Option<String>,
    pub socks5_proxy_port: i64,
    pub dump_pcap_to_host: bool,
    pub dump_pcap_to_udp: bool,
    pub socks5_enabled: bool,
    pub ipv6_enabled: bool,
}

fn parse_addr(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value.parse().map_err(|source| ConfigError::InvalidAddress { field, source })
}

fn parse_port(field: &'static str, value: i64) -> Result<u16, ConfigError> {
    u16::try_from(value).map_err(|_| ConfigError::InvalidPort { field, value })
}

impl RawConfig {
    pub fn validate(self) -> Result<Config, ConfigError> {
        let vpn_ipv4 = parse_addr("vpn_ipv4", &self.vpn_ipv4)?;
        let vpn_dns = parse_addr("vpn_dns", &self.vpn_dns)?;
        let dns_server_ip = parse_addr("dns_server", &self.dns_server)?;
        let dns_server = SocketAddr::new(dns_server_ip, parse_port("dns_server_port", self.dns_server_port)?);

        let ipv6_dns_server = self
            .ipv6_dns_server
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| parse_addr("ipv6_dns_server", s))
            .transpose()?;

        let pcap_collector = self
            .pcap_collector_address
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| -> Result<SocketAddr, ConfigError> {
                let ip = parse_addr("pcap_collector_address", s)?;
                Ok(SocketAddr::new(ip, parse_port("pcap_collector_port", self.pcap_collector_port)?))
            })
            .transpose()?;

        let socks5_proxy = self
            .socks5_proxy_address
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| -> Result<SocketAddr, ConfigError> {
                let ip = parse_addr("socks5_proxy_address", s)?;
                Ok(SocketAddr::new(ip, parse_port("socks5_proxy_port", self.socks5_proxy_port)?))
            })
            .transpose()?;

        Ok(Config {
            vpn_ipv4,
            vpn_dns,
            dns_server,
            ipv6_dns_server,
            pcap_collector,
            socks5_proxy,
            dump_pcap_to_host: self.dump_pcap_to_host,
            dump_pcap_to_udp: self.dump_pcap_to_udp,
            socks5_enabled: self.socks5_enabled,
            ipv6_enabled: self.ipv6_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_raw() -> RawConfig {
        RawConfig {
            vpn_ipv4: "10.215.0.2".to_string(),
            vpn_dns: "10.215.0.1".to_string(),
            dns_server: "8.8.8.8".to_string(),
            dns_server_port: 53,
            ipv6_dns_server: None,
            pcap_collector_address: None,
            pcap_collector_port: 0,
            socks5_proxy_address: None,
            socks5_proxy_port: 0,
            dump_pcap_to_host: true,
            dump_pcap_to_udp: false,
            socks5_enabled: false,
            ipv6_enabled: true,
        }
    }

    #[test]
    fn validates_a_well_formed_config() {
        let config = valid_raw().validate().unwrap();
        assert_eq!(config.vpn_ipv4, "10.215.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(config.dns_server.port(), 53);
        assert!(config.pcap_collector.is_none());
    }

    #[test]
    fn rejects_unparseable_address() {
        let mut raw = valid_raw();
        raw.vpn_ipv4 = "not-an-ip".to_string();
        assert!(matches!(raw.validate(), Err(ConfigError::InvalidAddress { field: "vpn_ipv4", .. })));
    }

    #[test]
    fn rejects_out_of_range_port() {
        let mut raw = valid_raw();
        raw.dns_server_port = 70_000;
        assert!(matches!(raw.validate(), Err(ConfigError::InvalidPort { field: "dns_server_port", .. })));
    }

    #[test]
    fn parses_optional_pcap_collector_when_present() {
        let mut raw = valid_raw();
        raw.pcap_collector_address = Some("192.0.2.10".to_string());
        raw.pcap_collector_port = 4729;

        let config = raw.validate().unwrap();
        assert_eq!(config.pcap_collector, Some("192.0.2.10:4729".parse().unwrap()));
    }
}
