//! Bounded `IP -> host name` cache, populated from DNS answers and consulted
//! on new-connection admission. Same bounded-`LruCache` shape as other
//! fixed-size lookup tables in this workspace, keyed by `IpAddr` and holding
//! an owned `String` per entry.

use std::net::IpAddr;
use std::num::NonZeroUsize;

use lru::LruCache;

/// Fixed at 128 entries; see invariant 5 ("Host LRU size never exceeds 128").
pub const CAPACITY: usize = 128;

pub struct HostLru {
    inner: LruCache<IpAddr, String>,
}

impl Default for HostLru {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLru {
    pub fn new() -> Self {
        Self {
            inner: LruCache::new(NonZeroUsize::new(CAPACITY).expect("CAPACITY > 0")),
        }
    }

    /// Inserts or refreshes `(ip, name)`. Evicts the least-recently-used entry if this
    /// insertion pushes the cache past [`CAPACITY`].
    pub fn add(&mut self, ip: IpAddr, name: String) {
        self.inner.put(ip, name);
    }

    /// Returns a copy of the cached name for `ip`, promoting it to most-recently-used.
    pub fn find(&mut self, ip: IpAddr) -> Option<String> {
        self.inner.get(&ip).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(1, 2, 3, n))
    }

    #[test]
    fn find_promotes_and_evicts_lru() {
        let mut lru = HostLru::new();

        for n in 0..CAPACITY as u8 {
            lru.add(ip(n), format!("host{n}"));
        }
        assert_eq!(lru.len(), CAPACITY);

        // Touch entry 0, making entry 1 the new least-recently-used.
        assert_eq!(lru.find(ip(0)), Some("host0".to_string()));

        lru.add(ip(CAPACITY as u8), "hostN".to_string());

        assert_eq!(lru.len(), CAPACITY);
        assert_eq!(lru.find(ip(0)), Some("host0".to_string()));
        assert_eq!(lru.find(ip(1)), None);
    }

    #[test]
    fn s5_150_dns_replies_keeps_last_128() {
        let mut lru = HostLru::new();

        for n in 0..150u16 {
            let addr = IpAddr::V4(Ipv4Addr::new(1, 2, 3, (n % 255) as u8));
            lru.add(addr, format!("host{n}.example"));
        }

        assert_eq!(lru.len(), CAPACITY);
    }

    #[test]
    fn never_expires_by_time() {
        let mut lru = HostLru::new();
        lru.add(ip(1), "host1".to_string());

        // No sleep, no time source involved: the entry is still there on next lookup.
        assert_eq!(lru.find(ip(1)), Some("host1".to_string()));
    }
}
