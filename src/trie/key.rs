//! Conversion between IP prefix values and the trie's fixed 16-byte
//! big-endian key representation.

use super::{key_from_ipv4, key_from_ipv6};
use std::net::IpAddr;

/// A `(key, bitlen)` pair ready to feed to [`super::PatriciaTrie`] insert and
/// query methods, plus the family it came from so callers can pick the
/// matching v4 or v6 trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieKey {
    pub family: super::Family,
    pub key: [u8; 16],
    pub bitlen: u8,
}

impl TrieKey {
    pub fn from_addr(addr: IpAddr, bitlen: u8) -> Self {
        match addr {
            IpAddr::V4(a) => TrieKey {
                family: super::Family::V4,
                key: key_from_ipv4(a),
                bitlen,
            },
            IpAddr::V6(a) => TrieKey {
                family: super::Family::V6,
                key: key_from_ipv6(a),
                bitlen,
            },
        }
    }

    pub fn from_ipnet(net: ipnet::IpNet) -> Self {
        Self::from_addr(net.addr(), net.prefix_len())
    }
}
