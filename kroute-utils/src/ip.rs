//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

// Address Family identifier.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Returns length of the IP address in bytes.
    fn length(&self) -> usize;

    // Returns vector of bytes that make up this address.
    fn bytes(&self) -> Vec<u8>;

    // Returns the address family of this address.
    fn address_family(&self) -> AddressFamily;
}

// Extension methods for IpNetwork.
pub trait IpNetworkExt {
    // Apply mask to prefix.
    #[must_use]
    fn apply_mask(&self) -> IpNetwork;

    // Returns the address family of this network.
    fn address_family(&self) -> AddressFamily;
}

// ===== impl AddressFamily =====

impl AddressFamily {
    // Maximum prefix length of the address family.
    pub const fn max_prefixlen(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }

    // Returns the corresponding socket address family value.
    pub const fn to_af_value(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => libc::AF_INET as u8,
            AddressFamily::Ipv6 => libc::AF_INET6 as u8,
        }
    }

    // Maps a socket address family value to an AddressFamily.
    pub fn from_af_value(value: u8) -> Option<AddressFamily> {
        match value as i32 {
            libc::AF_INET => Some(AddressFamily::Ipv4),
            libc::AF_INET6 => Some(AddressFamily::Ipv6),
            _ => None,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn length(&self) -> usize {
        match self {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 16,
        }
    }

    fn bytes(&self) -> Vec<u8> {
        match self {
            IpAddr::V4(addr) => addr.octets().to_vec(),
            IpAddr::V6(addr) => addr.octets().to_vec(),
        }
    }

    fn address_family(&self) -> AddressFamily {
        match self {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }
}

// ===== impl IpNetwork =====

impl IpNetworkExt for IpNetwork {
    fn apply_mask(&self) -> IpNetwork {
        match self {
            IpNetwork::V4(network) => {
                let prefix = network.prefix();
                let addr = network.ip() & network.mask();
                IpNetwork::V4(
                    ipnetwork::Ipv4Network::new(addr, prefix)
                        .expect("prefix length was already validated"),
                )
            }
            IpNetwork::V6(network) => {
                let prefix = network.prefix();
                let addr = network.ip() & network.mask();
                IpNetwork::V6(
                    ipnetwork::Ipv6Network::new(addr, prefix)
                        .expect("prefix length was already validated"),
                )
            }
        }
    }

    fn address_family(&self) -> AddressFamily {
        match self {
            IpNetwork::V4(_) => AddressFamily::Ipv4,
            IpNetwork::V6(_) => AddressFamily::Ipv6,
        }
    }
}
