// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS locators and the fixed-capacity remote locator sets.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// UDPv4 locator kind (RTPS v2.3 Sec.9.3.1).
pub const LOCATOR_KIND_UDPV4: i32 = 1;

/// Transport address: kind + port + 16-byte address.
///
/// IPv4 addresses occupy the last 4 bytes, the rest zeroed, matching the
/// RTPS wire layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator {
    pub kind: i32,
    pub port: u32,
    pub address: [u8; 16],
}

impl Locator {
    /// Invalid locator (kind -1).
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            kind: -1,
            port: 0,
            address: [0; 16],
        }
    }

    /// UDPv4 locator from address octets and port.
    #[must_use]
    pub fn udpv4(octets: [u8; 4], port: u32) -> Self {
        let mut address = [0u8; 16];
        address[12..16].copy_from_slice(&octets);
        Self {
            kind: LOCATOR_KIND_UDPV4,
            port,
            address,
        }
    }

    /// Build a locator from a socket address (IPv4 only).
    #[must_use]
    pub fn from_socket_addr(addr: &SocketAddr) -> Option<Self> {
        match addr.ip() {
            IpAddr::V4(ipv4) => Some(Self::udpv4(ipv4.octets(), u32::from(addr.port()))),
            IpAddr::V6(_) => None,
        }
    }

    /// Extract the IPv4 address of a UDPv4 locator.
    #[must_use]
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        if self.kind == LOCATOR_KIND_UDPV4 {
            Some(Ipv4Addr::new(
                self.address[12],
                self.address[13],
                self.address[14],
                self.address[15],
            ))
        } else {
            None
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_ipv4() {
            Some(ip) => write!(f, "{}:{}", ip, self.port),
            None => write!(f, "kind{}:{}", self.kind, self.port),
        }
    }
}

/// Remote unicast + multicast locators of one proxy, with fixed capacity.
///
/// Capacity is set once at allocation; pushes beyond it are dropped, and
/// duplicates are ignored. Keeping the bound here (instead of growing) is
/// what makes the proxy pool allocation-stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLocatorSet {
    unicast: Vec<Locator>,
    multicast: Vec<Locator>,
    max_unicast: usize,
    max_multicast: usize,
}

impl RemoteLocatorSet {
    #[must_use]
    pub fn new(max_unicast: usize, max_multicast: usize) -> Self {
        Self {
            unicast: Vec::with_capacity(max_unicast),
            multicast: Vec::with_capacity(max_multicast),
            max_unicast,
            max_multicast,
        }
    }

    /// Add a unicast locator; ignored when duplicate or at capacity.
    pub fn add_unicast_locator(&mut self, locator: Locator) {
        if self.unicast.contains(&locator) {
            return;
        }
        if self.unicast.len() < self.max_unicast {
            self.unicast.push(locator);
        } else {
            log::debug!(
                "[locators] Dropping unicast locator {} (capacity {})",
                locator,
                self.max_unicast
            );
        }
    }

    /// Add a multicast locator; ignored when duplicate or at capacity.
    pub fn add_multicast_locator(&mut self, locator: Locator) {
        if self.multicast.contains(&locator) {
            return;
        }
        if self.multicast.len() < self.max_multicast {
            self.multicast.push(locator);
        } else {
            log::debug!(
                "[locators] Dropping multicast locator {} (capacity {})",
                locator,
                self.max_multicast
            );
        }
    }

    #[must_use]
    pub fn unicast(&self) -> &[Locator] {
        &self.unicast
    }

    #[must_use]
    pub fn multicast(&self) -> &[Locator] {
        &self.multicast
    }

    #[must_use]
    pub fn max_unicast(&self) -> usize {
        self.max_unicast
    }

    #[must_use]
    pub fn max_multicast(&self) -> usize {
        self.max_multicast
    }

    /// Drop all locators, keeping the configured capacity.
    pub fn clear(&mut self) {
        self.unicast.clear();
        self.multicast.clear();
    }

    /// Copy locators from another set, respecting our own capacity.
    pub fn copy_from(&mut self, other: &RemoteLocatorSet) {
        self.clear();
        for loc in other.unicast() {
            self.add_unicast_locator(*loc);
        }
        for loc in other.multicast() {
            self.add_multicast_locator(*loc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_udpv4_roundtrip() {
        let loc = Locator::udpv4([192, 168, 1, 10], 7410);
        assert_eq!(loc.kind, LOCATOR_KIND_UDPV4);
        assert_eq!(loc.as_ipv4(), Some(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(loc.to_string(), "192.168.1.10:7410");
    }

    #[test]
    fn test_locator_from_socket_addr() {
        let addr: SocketAddr = "127.0.0.1:7400".parse().expect("valid socket address");
        let loc = Locator::from_socket_addr(&addr).expect("IPv4 locator");
        assert_eq!(loc.port, 7400);
        assert_eq!(loc.as_ipv4(), Some(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_remote_locator_set_capacity() {
        let mut set = RemoteLocatorSet::new(2, 1);
        set.add_unicast_locator(Locator::udpv4([10, 0, 0, 1], 1));
        set.add_unicast_locator(Locator::udpv4([10, 0, 0, 2], 2));
        set.add_unicast_locator(Locator::udpv4([10, 0, 0, 3], 3)); // over capacity
        assert_eq!(set.unicast().len(), 2);

        set.add_multicast_locator(Locator::udpv4([239, 255, 0, 1], 7400));
        set.add_multicast_locator(Locator::udpv4([239, 255, 0, 2], 7400)); // over capacity
        assert_eq!(set.multicast().len(), 1);
    }

    #[test]
    fn test_remote_locator_set_dedup() {
        let mut set = RemoteLocatorSet::new(4, 1);
        let loc = Locator::udpv4([10, 0, 0, 1], 7411);
        set.add_unicast_locator(loc);
        set.add_unicast_locator(loc);
        assert_eq!(set.unicast().len(), 1);
    }

    #[test]
    fn test_remote_locator_set_copy_respects_capacity() {
        let mut src = RemoteLocatorSet::new(4, 1);
        for i in 1..=4u8 {
            src.add_unicast_locator(Locator::udpv4([10, 0, 0, i], u32::from(i)));
        }

        let mut dst = RemoteLocatorSet::new(2, 1);
        dst.copy_from(&src);
        assert_eq!(dst.unicast().len(), 2);
        assert_eq!(dst.max_unicast(), 2);
    }
}
