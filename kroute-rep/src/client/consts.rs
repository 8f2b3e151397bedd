//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Framing header: 2-octet total length (header included) + 1-octet command.
pub const REP_HEADER_SIZE: u16 = 3;

// Path of the route manager's listening socket.
pub const REP_SOCKET_PATH: &str = "/var/run/kroute.api";

pub mod rep_message_types_t {
    pub type Type = u8;
    pub const INTERFACE_ADD: Type = 1;
    pub const INTERFACE_DELETE: Type = 2;
    pub const INTERFACE_ADDRESS_ADD: Type = 3;
    pub const INTERFACE_ADDRESS_DELETE: Type = 4;
    pub const INTERFACE_UP: Type = 5;
    pub const INTERFACE_DOWN: Type = 6;
    pub const IPV4_ROUTE_ADD: Type = 7;
    pub const IPV4_ROUTE_DELETE: Type = 8;
    pub const IPV6_ROUTE_ADD: Type = 9;
    pub const IPV6_ROUTE_DELETE: Type = 10;
    pub const REDISTRIBUTE_ADD: Type = 11;
    pub const REDISTRIBUTE_DELETE: Type = 12;
    pub const REDISTRIBUTE_DEFAULT_ADD: Type = 13;
    pub const REDISTRIBUTE_DEFAULT_DELETE: Type = 14;
    pub const IPV4_NEXTHOP_LOOKUP: Type = 15;
    pub const ROUTER_ID_UPDATE: Type = 17;
}

// Optional-field presence bits of route records.
pub mod rep_message_flags_t {
    pub type Type = u8;
    pub const NEXTHOP: Type = 0x01;
    pub const IFINDEX: Type = 0x02;
    pub const DISTANCE: Type = 0x04;
    pub const METRIC: Type = 0x08;
    pub const VALID_MASK: Type = 0x0F;
}

// Fixed width of interface names on the wire.
pub const INTERFACE_NAMSIZ: usize = 20;
