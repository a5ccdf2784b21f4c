// src/resource/ips.rs

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// IPv4 network in CIDR notation, e.g. `10.2.0.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub const DEFAULT: Ipv4Cidr = Ipv4Cidr {
        network: Ipv4Addr::new(10, 2, 0, 0),
        prefix: 24,
    };

    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, String> {
        if prefix > 32 {
            return Err(format!("invalid prefix length /{prefix}"));
        }
        let mask = Self::mask_for(prefix);
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & mask),
            prefix,
        })
    }

    fn mask_for(prefix: u8) -> u32 {
        if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !Self::mask_for(self.prefix))
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask_for(self.prefix) == u32::from(self.network)
    }

    fn host_range(&self) -> Option<(u32, u32)> {
        let first = u32::from(self.network).checked_add(1)?;
        let last = u32::from(self.broadcast()).checked_sub(1)?;
        (first <= last).then_some((first, last))
    }

    /// Lowest host address not in `used`.
    pub fn first_free(&self, used: &[Ipv4Addr]) -> Option<Ipv4Addr> {
        let (first, last) = self.host_range()?;
        (first..=last)
            .map(Ipv4Addr::from)
            .find(|ip| !used.contains(ip))
    }

    /// Uniformly random host address.
    pub fn random_host(&self) -> Option<Ipv4Addr> {
        let (first, last) = self.host_range()?;
        Some(Ipv4Addr::from(rand::thread_rng().gen_range(first..=last)))
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("invalid CIDR {s}: missing '/'"))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| format!("invalid CIDR {s}: {e}"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| format!("invalid CIDR {s}: {e}"))?;
        Self::new(addr, prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(c: Ipv4Cidr) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_free_skips_network_and_used() {
        let cidr: Ipv4Cidr = "10.0.0.0/29".parse().unwrap();
        let used = [Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)];
        assert_eq!(cidr.first_free(&used), Some(Ipv4Addr::new(10, 0, 0, 3)));
    }

    #[test]
    fn exhausted_range() {
        let cidr: Ipv4Cidr = "10.0.0.0/30".parse().unwrap();
        let used = [Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)];
        assert_eq!(cidr.first_free(&used), None);
    }

    #[test]
    fn random_host_stays_inside() {
        let cidr: Ipv4Cidr = "192.168.4.0/24".parse().unwrap();
        for _ in 0..50 {
            let ip = cidr.random_host().unwrap();
            assert!(cidr.contains(ip));
            assert_ne!(ip, cidr.network());
            assert_ne!(ip, cidr.broadcast());
        }
    }
}
