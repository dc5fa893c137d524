// workbridge-core/src/net.rs
// ============================================================================
// Module: Address Matching
// Description: CIDR-style address matching for the admission allow-list.
// Purpose: Match peer addresses against configured addresses and blocks.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Allow-list entries are either bare addresses (`127.0.0.1`, `::1`) or CIDR
//! blocks (`10.0.0.0/8`, `fd00::/16`). Bare addresses imply a full-length
//! prefix. Matching is exact-family: an IPv4 peer never matches an IPv6
//! block.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Allow-list entry parse errors.
#[derive(Debug, Error)]
pub enum NetParseError {
    /// The entry is not an address or CIDR block.
    #[error("invalid address or cidr block: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// A single allow-list network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowedNet {
    /// IPv4 network with prefix length.
    V4 {
        /// Network address.
        addr: Ipv4Addr,
        /// Prefix length in bits (0-32).
        prefix: u8,
    },
    /// IPv6 network with prefix length.
    V6 {
        /// Network address.
        addr: Ipv6Addr,
        /// Prefix length in bits (0-128).
        prefix: u8,
    },
}

impl AllowedNet {
    /// Parses an address or CIDR block. Bare addresses imply /32 or /128.
    ///
    /// # Errors
    ///
    /// Returns [`NetParseError`] when the entry cannot be parsed.
    pub fn parse(entry: &str) -> Result<Self, NetParseError> {
        let entry = entry.trim();
        let (addr_part, prefix_part) = match entry.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (entry, None),
        };
        let addr: IpAddr = addr_part
            .parse()
            .map_err(|_| NetParseError::Invalid(entry.to_string()))?;
        match addr {
            IpAddr::V4(addr) => {
                let prefix = parse_prefix(prefix_part, 32, entry)?;
                Ok(Self::V4 {
                    addr,
                    prefix,
                })
            }
            IpAddr::V6(addr) => {
                let prefix = parse_prefix(prefix_part, 128, entry)?;
                Ok(Self::V6 {
                    addr,
                    prefix,
                })
            }
        }
    }

    /// Returns true when the peer address falls inside this network.
    #[must_use]
    pub fn contains(&self, peer: IpAddr) -> bool {
        match (self, peer) {
            (
                Self::V4 {
                    addr,
                    prefix,
                },
                IpAddr::V4(peer),
            ) => {
                let mask = prefix_mask_v4(*prefix);
                u32::from(*addr) & mask == u32::from(peer) & mask
            }
            (
                Self::V6 {
                    addr,
                    prefix,
                },
                IpAddr::V6(peer),
            ) => {
                let mask = prefix_mask_v6(*prefix);
                u128::from(*addr) & mask == u128::from(peer) & mask
            }
            _ => false,
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn parse_prefix(part: Option<&str>, max: u8, entry: &str) -> Result<u8, NetParseError> {
    let Some(part) = part else {
        return Ok(max);
    };
    let prefix: u8 = part.parse().map_err(|_| NetParseError::Invalid(entry.to_string()))?;
    if prefix > max {
        return Err(NetParseError::Invalid(entry.to_string()));
    }
    Ok(prefix)
}

const fn prefix_mask_v4(prefix: u8) -> u32 {
    if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) }
}

const fn prefix_mask_v6(prefix: u8) -> u128 {
    if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::AllowedNet;

    fn ip(text: &str) -> IpAddr {
        text.parse().expect("ip literal")
    }

    #[test]
    fn bare_address_implies_full_prefix() {
        let net = AllowedNet::parse("127.0.0.1").expect("parse");
        assert!(net.contains(ip("127.0.0.1")));
        assert!(!net.contains(ip("127.0.0.2")));
    }

    #[test]
    fn v4_cidr_block_matches_members() {
        let net = AllowedNet::parse("10.0.0.0/8").expect("parse");
        assert!(net.contains(ip("10.200.1.2")));
        assert!(!net.contains(ip("11.0.0.1")));
    }

    #[test]
    fn v6_loopback_and_blocks() {
        let loopback = AllowedNet::parse("::1").expect("parse");
        assert!(loopback.contains(ip("::1")));
        let net = AllowedNet::parse("fd00::/16").expect("parse");
        assert!(net.contains(ip("fd00::42")));
        assert!(!net.contains(ip("fe80::1")));
    }

    #[test]
    fn families_never_cross_match() {
        let net = AllowedNet::parse("0.0.0.0/0").expect("parse");
        assert!(net.contains(ip("203.0.113.9")));
        assert!(!net.contains(ip("::1")));
    }

    #[test]
    fn rejects_garbage_and_oversized_prefixes() {
        assert!(AllowedNet::parse("not-an-ip").is_err());
        assert!(AllowedNet::parse("10.0.0.0/33").is_err());
        assert!(AllowedNet::parse("::1/129").is_err());
        assert!(AllowedNet::parse("10.0.0.0/abc").is_err());
    }
}
