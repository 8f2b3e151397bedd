//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::str::FromStr;

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

// The route types understood by the route exchange protocol.
//
// The discriminants are the on-wire route type values and must not change.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Kernel = 1,
    Connected = 2,
    Static = 3,
    Rip = 4,
    Ripng = 5,
    Ospf = 6,
    Ospf6 = 7,
    Isis = 8,
    Bgp = 9,
    Pim = 10,
}

// ===== impl Protocol =====

impl Protocol {
    // Default administrative distance of routes originated by this protocol.
    pub const fn default_distance(&self) -> u8 {
        match self {
            Protocol::Kernel => 0,
            Protocol::Connected => 0,
            Protocol::Static => 1,
            Protocol::Rip | Protocol::Ripng => 120,
            Protocol::Ospf | Protocol::Ospf6 => 110,
            Protocol::Isis => 115,
            Protocol::Bgp => 20,
            Protocol::Pim => 110,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Kernel => write!(f, "kernel"),
            Protocol::Connected => write!(f, "connected"),
            Protocol::Static => write!(f, "static"),
            Protocol::Rip => write!(f, "rip"),
            Protocol::Ripng => write!(f, "ripng"),
            Protocol::Ospf => write!(f, "ospf"),
            Protocol::Ospf6 => write!(f, "ospf6"),
            Protocol::Isis => write!(f, "isis"),
            Protocol::Bgp => write!(f, "bgp"),
            Protocol::Pim => write!(f, "pim"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "kernel" => Ok(Protocol::Kernel),
            "connected" => Ok(Protocol::Connected),
            "static" => Ok(Protocol::Static),
            "rip" => Ok(Protocol::Rip),
            "ripng" => Ok(Protocol::Ripng),
            "ospf" => Ok(Protocol::Ospf),
            "ospf6" => Ok(Protocol::Ospf6),
            "isis" => Ok(Protocol::Isis),
            "bgp" => Ok(Protocol::Bgp),
            "pim" => Ok(Protocol::Pim),
            _ => Err(()),
        }
    }
}
