//! Static set of well-known public DNS server addresses, consulted by the
//! DNS policy gate (`is_dns_server`). A flat `Vec` equality scan is enough:
//! the set has 8 fixed members and is looked up once per new connection, not
//! once per packet.

use std::net::IpAddr;

pub struct KnownDnsSet {
    addrs: Vec<IpAddr>,
}

impl Default for KnownDnsSet {
    fn default() -> Self {
        Self::new()
    }
}

impl KnownDnsSet {
    pub fn new() -> Self {
        let addrs = [
            "8.8.8.8",
            "8.8.4.4",
            "1.1.1.1",
            "1.0.0.1",
            "2001:4860:4860::8888",
            "2001:4860:4860::8844",
            "2606:4700:4700::64",
            "2606:4700:4700::6400",
        ]
        .into_iter()
        .map(|s| s.parse().expect("addresses are valid literals"))
        .collect();

        Self { addrs }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.addrs.contains(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_v4_and_v6_members() {
        let set = KnownDnsSet::new();

        assert!(set.contains(&"8.8.8.8".parse().unwrap()));
        assert!(set.contains(&"2606:4700:4700::64".parse().unwrap()));
    }

    #[test]
    fn rejects_unrelated_address() {
        let set = KnownDnsSet::new();

        assert!(!set.contains(&"93.184.216.34".parse().unwrap()));
    }
}
