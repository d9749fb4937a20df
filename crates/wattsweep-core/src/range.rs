//! CIDR address ranges and host enumeration

use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("Missing prefix length in {0:?} (expected a.b.c.d/n)")]
    MissingPrefix(String),
    #[error("Invalid base address in {0:?}")]
    InvalidAddress(String),
    #[error("Invalid prefix length in {0:?} (expected 0-32)")]
    InvalidPrefix(String),
}

/// An IPv4 range in CIDR notation, e.g. `192.168.1.0/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl AddressRange {
    /// Build a range; host bits of `base` are masked off.
    pub fn new(base: Ipv4Addr, prefix_len: u8) -> Result<Self, RangeError> {
        if prefix_len > 32 {
            return Err(RangeError::InvalidPrefix(format!("{}/{}", base, prefix_len)));
        }
        let network = Ipv4Addr::from(u32::from(base) & mask(prefix_len));
        Ok(Self { network, prefix_len })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Number of addresses covered, boundary addresses included
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    /// Check if an address falls inside this range
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        (u32::from(ip) & mask(self.prefix_len)) == u32::from(self.network)
    }

    /// Every address to probe, in ascending order.
    ///
    /// Ranges of more than two addresses skip the network and broadcast
    /// addresses; `/31` and `/32` are returned whole.
    pub fn hosts(&self) -> Vec<Ipv4Addr> {
        let first = u64::from(u32::from(self.network));
        let last = first + self.size() - 1;

        let (start, end) = if self.size() > 2 {
            (first + 1, last - 1)
        } else {
            (first, last)
        };

        (start..=end).map(|ip| Ipv4Addr::from(ip as u32)).collect()
    }
}

impl FromStr for AddressRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| RangeError::MissingPrefix(s.to_string()))?;

        let base = Ipv4Addr::from_str(addr).map_err(|_| RangeError::InvalidAddress(s.to_string()))?;
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| RangeError::InvalidPrefix(s.to_string()))?;

        Self::new(base, prefix_len)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Enumerate the hosts of a range descriptor.
///
/// A malformed descriptor is logged and yields no addresses, so a bad
/// setting makes discovery find nothing instead of stopping it.
pub fn enumerate_hosts(descriptor: &str) -> Vec<Ipv4Addr> {
    match descriptor.parse::<AddressRange>() {
        Ok(range) => range.hosts(),
        Err(e) => {
            warn!(range = %descriptor, error = %e, "Failed to parse network range");
            Vec::new()
        }
    }
}

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else if prefix_len >= 32 {
        0xFFFFFFFF
    } else {
        !((1u32 << (32 - prefix_len)) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_masks_host_bits() {
        let range: AddressRange = "192.168.186.77/24".parse().unwrap();
        assert_eq!(range.network(), Ipv4Addr::new(192, 168, 186, 0));
        assert_eq!(range.prefix_len(), 24);
        assert_eq!(range.to_string(), "192.168.186.0/24");
    }

    #[test]
    fn test_hosts_skip_boundaries() {
        let range: AddressRange = "10.10.10.0/24".parse().unwrap();
        let hosts = range.hosts();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts.first(), Some(&Ipv4Addr::new(10, 10, 10, 1)));
        assert_eq!(hosts.last(), Some(&Ipv4Addr::new(10, 10, 10, 254)));
        assert!(hosts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_hosts_small_ranges() {
        for prefix in 24..=30u8 {
            let range = AddressRange::new(Ipv4Addr::new(172, 16, 4, 0), prefix).unwrap();
            let hosts = range.hosts();
            assert_eq!(hosts.len() as u64, range.size() - 2, "prefix /{}", prefix);
            assert!(!hosts.contains(&range.network()));
            let broadcast = Ipv4Addr::from(u32::from(range.network()) + range.size() as u32 - 1);
            assert!(!hosts.contains(&broadcast));
            assert!(hosts.iter().all(|ip| range.contains(*ip)));
        }
    }

    #[test]
    fn test_hosts_two_or_fewer_returned_whole() {
        let pair: AddressRange = "10.0.0.4/31".parse().unwrap();
        assert_eq!(
            pair.hosts(),
            vec![Ipv4Addr::new(10, 0, 0, 4), Ipv4Addr::new(10, 0, 0, 5)]
        );

        let single: AddressRange = "10.0.0.9/32".parse().unwrap();
        assert_eq!(single.hosts(), vec![Ipv4Addr::new(10, 0, 0, 9)]);
    }

    #[test]
    fn test_hosts_top_of_address_space() {
        let range: AddressRange = "255.255.255.252/30".parse().unwrap();
        assert_eq!(
            range.hosts(),
            vec![Ipv4Addr::new(255, 255, 255, 253), Ipv4Addr::new(255, 255, 255, 254)]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "10.0.0.0".parse::<AddressRange>(),
            Err(RangeError::MissingPrefix(_))
        ));
        assert!(matches!(
            "10.0.0/24".parse::<AddressRange>(),
            Err(RangeError::InvalidAddress(_))
        ));
        assert!(matches!(
            "10.0.0.0/33".parse::<AddressRange>(),
            Err(RangeError::InvalidPrefix(_))
        ));
        assert!(matches!(
            "10.0.0.0/abc".parse::<AddressRange>(),
            Err(RangeError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn test_enumerate_malformed_is_empty() {
        assert!(enumerate_hosts("not-a-range").is_empty());
        assert!(enumerate_hosts("").is_empty());
    }

    #[test]
    fn test_enumerate_hosts() {
        let hosts = enumerate_hosts("192.168.1.0/29");
        assert_eq!(
            hosts,
            (1..=6).map(|i| Ipv4Addr::new(192, 168, 1, i)).collect::<Vec<_>>()
        );
    }
}
