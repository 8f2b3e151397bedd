//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use ipnetwork::IpNetwork;
use kroute_utils::bytes::{BytesExt, BytesMutExt};
use kroute_utils::ip::{AddressFamily, IpAddrExt};
use kroute_utils::protocol::Protocol;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::client::consts::{
    INTERFACE_NAMSIZ, REP_HEADER_SIZE, rep_message_flags_t,
    rep_message_types_t,
};
use crate::client::error::{DecodeError, DecodeResult};

// REP Rx messages (route manager -> protocol daemon).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum RepRxMsg {
    RouterIdUpd(RepRouterIdInfo),
    IfaceAdd(RepIfaceInfo),
    IfaceDel(RepIfaceInfo),
    IfaceUp(RepIfaceInfo),
    IfaceDown(RepIfaceInfo),
    AddressAdd(RepAddressInfo),
    AddressDel(RepAddressInfo),
    RouteAdd(RepRouteInfo),
    RouteDel(RepRouteInfo),
    NexthopLookupReply(RepLookupReplyInfo),
}

// REP Tx messages (protocol daemon -> route manager).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum RepTxMsg {
    RouteAdd(RepRouteInfo),
    RouteDel(RepRouteInfo),
    RedistributeAdd(Protocol),
    RedistributeDel(Protocol),
    RedistributeDfltAdd,
    RedistributeDfltDel,
    NexthopLookup(RepLookupInfo),
}

#[derive(Clone, Debug, Deserialize, Serialize, new)]
pub struct RepRouterIdInfo {
    pub router_id: Option<Ipv4Addr>,
}

#[derive(Clone, Debug, Deserialize, Serialize, new)]
pub struct RepIfaceInfo {
    pub ifname: String,
    pub ifindex: u32,
    pub mtu: u32,
    pub operative: bool,
    pub loopback: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, new)]
pub struct RepAddressInfo {
    pub ifindex: u32,
    pub addr: IpNetwork,
}

// A route record.
//
// The optional fields are present on the wire only when the corresponding
// presence bit is set; an absent field stays absent through a decode/encode
// round-trip.
#[derive(Clone, Debug, Deserialize, Serialize, new)]
pub struct RepRouteInfo {
    pub proto: Protocol,
    pub flags: u8,
    pub prefix: IpNetwork,
    pub nexthops: Vec<IpAddr>,
    pub ifindexes: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize, new)]
pub struct RepLookupInfo {
    pub addr: Ipv4Addr,
}

#[derive(Clone, Debug, Deserialize, Serialize, new)]
pub struct RepLookupReplyInfo {
    pub addr: Ipv4Addr,
    pub distance: u8,
    pub metric: u32,
    pub nexthops: Vec<RepLookupNexthop>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize, new)]
pub struct RepLookupNexthop {
    pub gateway: Ipv4Addr,
    pub ifindex: u32,
}

// ===== impl RepRxMsg =====

impl RepRxMsg {
    pub fn decode(buf: Bytes, cmd: u8) -> DecodeResult<Self> {
        let msg = match cmd {
            rep_message_types_t::ROUTER_ID_UPDATE => {
                RepRxMsg::RouterIdUpd(RepRouterIdInfo::decode(buf)?)
            }
            rep_message_types_t::INTERFACE_ADD => {
                RepRxMsg::IfaceAdd(RepIfaceInfo::decode(buf)?)
            }
            rep_message_types_t::INTERFACE_DELETE => {
                RepRxMsg::IfaceDel(RepIfaceInfo::decode(buf)?)
            }
            rep_message_types_t::INTERFACE_UP => {
                RepRxMsg::IfaceUp(RepIfaceInfo::decode(buf)?)
            }
            rep_message_types_t::INTERFACE_DOWN => {
                RepRxMsg::IfaceDown(RepIfaceInfo::decode(buf)?)
            }
            rep_message_types_t::INTERFACE_ADDRESS_ADD => {
                RepRxMsg::AddressAdd(RepAddressInfo::decode(buf)?)
            }
            rep_message_types_t::INTERFACE_ADDRESS_DELETE => {
                RepRxMsg::AddressDel(RepAddressInfo::decode(buf)?)
            }
            rep_message_types_t::IPV4_ROUTE_ADD => RepRxMsg::RouteAdd(
                RepRouteInfo::decode(AddressFamily::Ipv4, buf)?,
            ),
            rep_message_types_t::IPV4_ROUTE_DELETE => RepRxMsg::RouteDel(
                RepRouteInfo::decode(AddressFamily::Ipv4, buf)?,
            ),
            rep_message_types_t::IPV6_ROUTE_ADD => RepRxMsg::RouteAdd(
                RepRouteInfo::decode(AddressFamily::Ipv6, buf)?,
            ),
            rep_message_types_t::IPV6_ROUTE_DELETE => RepRxMsg::RouteDel(
                RepRouteInfo::decode(AddressFamily::Ipv6, buf)?,
            ),
            rep_message_types_t::IPV4_NEXTHOP_LOOKUP => {
                RepRxMsg::NexthopLookupReply(RepLookupReplyInfo::decode(buf)?)
            }
            _ => return Err(DecodeError::UnknownCommand(cmd)),
        };

        Ok(msg)
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(1024);

        let cmd = match self {
            RepRxMsg::RouterIdUpd(_) => rep_message_types_t::ROUTER_ID_UPDATE,
            RepRxMsg::IfaceAdd(_) => rep_message_types_t::INTERFACE_ADD,
            RepRxMsg::IfaceDel(_) => rep_message_types_t::INTERFACE_DELETE,
            RepRxMsg::IfaceUp(_) => rep_message_types_t::INTERFACE_UP,
            RepRxMsg::IfaceDown(_) => rep_message_types_t::INTERFACE_DOWN,
            RepRxMsg::AddressAdd(_) => {
                rep_message_types_t::INTERFACE_ADDRESS_ADD
            }
            RepRxMsg::AddressDel(_) => {
                rep_message_types_t::INTERFACE_ADDRESS_DELETE
            }
            RepRxMsg::RouteAdd(info) => match info.prefix {
                IpNetwork::V4(_) => rep_message_types_t::IPV4_ROUTE_ADD,
                IpNetwork::V6(_) => rep_message_types_t::IPV6_ROUTE_ADD,
            },
            RepRxMsg::RouteDel(info) => match info.prefix {
                IpNetwork::V4(_) => rep_message_types_t::IPV4_ROUTE_DELETE,
                IpNetwork::V6(_) => rep_message_types_t::IPV6_ROUTE_DELETE,
            },
            RepRxMsg::NexthopLookupReply(_) => {
                rep_message_types_t::IPV4_NEXTHOP_LOOKUP
            }
        };
        encode_rep_header(&mut buf, cmd);

        match self {
            RepRxMsg::RouterIdUpd(info) => info.encode(&mut buf),
            RepRxMsg::IfaceAdd(info)
            | RepRxMsg::IfaceDel(info)
            | RepRxMsg::IfaceUp(info)
            | RepRxMsg::IfaceDown(info) => info.encode(&mut buf),
            RepRxMsg::AddressAdd(info) | RepRxMsg::AddressDel(info) => {
                info.encode(&mut buf)
            }
            RepRxMsg::RouteAdd(info) | RepRxMsg::RouteDel(info) => {
                info.encode(&mut buf)
            }
            RepRxMsg::NexthopLookupReply(info) => info.encode(&mut buf),
        }

        rewrite_rep_length(&mut buf);
        buf
    }
}

impl std::fmt::Display for RepRxMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepRxMsg::RouterIdUpd(_) => write!(f, "router-id-update"),
            RepRxMsg::IfaceAdd(_) => write!(f, "interface-add"),
            RepRxMsg::IfaceDel(_) => write!(f, "interface-delete"),
            RepRxMsg::IfaceUp(_) => write!(f, "interface-up"),
            RepRxMsg::IfaceDown(_) => write!(f, "interface-down"),
            RepRxMsg::AddressAdd(_) => write!(f, "address-add"),
            RepRxMsg::AddressDel(_) => write!(f, "address-delete"),
            RepRxMsg::RouteAdd(_) => write!(f, "route-add"),
            RepRxMsg::RouteDel(_) => write!(f, "route-delete"),
            RepRxMsg::NexthopLookupReply(_) => {
                write!(f, "nexthop-lookup-reply")
            }
        }
    }
}

// ===== impl RepTxMsg =====

impl RepTxMsg {
    pub fn decode(mut buf: Bytes, cmd: u8) -> DecodeResult<Self> {
        let msg = match cmd {
            rep_message_types_t::IPV4_ROUTE_ADD => RepTxMsg::RouteAdd(
                RepRouteInfo::decode(AddressFamily::Ipv4, buf)?,
            ),
            rep_message_types_t::IPV4_ROUTE_DELETE => RepTxMsg::RouteDel(
                RepRouteInfo::decode(AddressFamily::Ipv4, buf)?,
            ),
            rep_message_types_t::IPV6_ROUTE_ADD => RepTxMsg::RouteAdd(
                RepRouteInfo::decode(AddressFamily::Ipv6, buf)?,
            ),
            rep_message_types_t::IPV6_ROUTE_DELETE => RepTxMsg::RouteDel(
                RepRouteInfo::decode(AddressFamily::Ipv6, buf)?,
            ),
            rep_message_types_t::REDISTRIBUTE_ADD => {
                RepTxMsg::RedistributeAdd(decode_proto(&mut buf)?)
            }
            rep_message_types_t::REDISTRIBUTE_DELETE => {
                RepTxMsg::RedistributeDel(decode_proto(&mut buf)?)
            }
            rep_message_types_t::REDISTRIBUTE_DEFAULT_ADD => {
                RepTxMsg::RedistributeDfltAdd
            }
            rep_message_types_t::REDISTRIBUTE_DEFAULT_DELETE => {
                RepTxMsg::RedistributeDfltDel
            }
            rep_message_types_t::IPV4_NEXTHOP_LOOKUP => {
                RepTxMsg::NexthopLookup(RepLookupInfo::decode(buf)?)
            }
            _ => return Err(DecodeError::UnknownCommand(cmd)),
        };

        Ok(msg)
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(1024);

        let cmd = match self {
            RepTxMsg::RouteAdd(info) => match info.prefix {
                IpNetwork::V4(_) => rep_message_types_t::IPV4_ROUTE_ADD,
                IpNetwork::V6(_) => rep_message_types_t::IPV6_ROUTE_ADD,
            },
            RepTxMsg::RouteDel(info) => match info.prefix {
                IpNetwork::V4(_) => rep_message_types_t::IPV4_ROUTE_DELETE,
                IpNetwork::V6(_) => rep_message_types_t::IPV6_ROUTE_DELETE,
            },
            RepTxMsg::RedistributeAdd(_) => {
                rep_message_types_t::REDISTRIBUTE_ADD
            }
            RepTxMsg::RedistributeDel(_) => {
                rep_message_types_t::REDISTRIBUTE_DELETE
            }
            RepTxMsg::RedistributeDfltAdd => {
                rep_message_types_t::REDISTRIBUTE_DEFAULT_ADD
            }
            RepTxMsg::RedistributeDfltDel => {
                rep_message_types_t::REDISTRIBUTE_DEFAULT_DELETE
            }
            RepTxMsg::NexthopLookup(_) => {
                rep_message_types_t::IPV4_NEXTHOP_LOOKUP
            }
        };
        encode_rep_header(&mut buf, cmd);

        match self {
            RepTxMsg::RouteAdd(info) | RepTxMsg::RouteDel(info) => {
                info.encode(&mut buf)
            }
            RepTxMsg::RedistributeAdd(proto)
            | RepTxMsg::RedistributeDel(proto) => {
                buf.put_u8(*proto as u8);
            }
            RepTxMsg::RedistributeDfltAdd | RepTxMsg::RedistributeDfltDel => {}
            RepTxMsg::NexthopLookup(info) => info.encode(&mut buf),
        }

        rewrite_rep_length(&mut buf);
        buf
    }
}

impl std::fmt::Display for RepTxMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepTxMsg::RouteAdd(_) => write!(f, "route-add"),
            RepTxMsg::RouteDel(_) => write!(f, "route-delete"),
            RepTxMsg::RedistributeAdd(_) => write!(f, "redistribute-add"),
            RepTxMsg::RedistributeDel(_) => write!(f, "redistribute-delete"),
            RepTxMsg::RedistributeDfltAdd => {
                write!(f, "redistribute-default-add")
            }
            RepTxMsg::RedistributeDfltDel => {
                write!(f, "redistribute-default-delete")
            }
            RepTxMsg::NexthopLookup(_) => write!(f, "nexthop-lookup"),
        }
    }
}

// ===== impl RepRouterIdInfo =====

impl RepRouterIdInfo {
    fn decode(mut buf: Bytes) -> DecodeResult<Self> {
        ensure(&buf, 6)?;
        let family = buf.get_u8();
        if AddressFamily::from_af_value(family) != Some(AddressFamily::Ipv4) {
            return Err(DecodeError::MalformedMessage(format!(
                "invalid router-id address-family: {}",
                family
            )));
        }
        let router_id = buf.get_opt_ipv4();
        let _plen = buf.get_u8();

        Ok(RepRouterIdInfo { router_id })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(AddressFamily::Ipv4.to_af_value());
        buf.put_ipv4(&self.router_id.unwrap_or(Ipv4Addr::UNSPECIFIED));
        buf.put_u8(AddressFamily::Ipv4.max_prefixlen());
    }
}

// ===== impl RepIfaceInfo =====

impl RepIfaceInfo {
    fn decode(mut buf: Bytes) -> DecodeResult<Self> {
        ensure(&buf, INTERFACE_NAMSIZ + 16)?;
        let mut ifname = [0; INTERFACE_NAMSIZ];
        buf.copy_to_slice(&mut ifname);
        let ifname = String::from_utf8_lossy(&ifname)
            .trim_matches(char::from(0))
            .to_string();
        let ifindex = buf.get_u32();
        let mtu = buf.get_u32();
        let flags = buf.get_u64();

        let operative = flags & (libc::IFF_RUNNING as u64) != 0;
        let loopback = flags & (libc::IFF_LOOPBACK as u64) != 0;

        Ok(RepIfaceInfo {
            ifname,
            ifindex,
            mtu,
            operative,
            loopback,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        let mut ifname = [0u8; INTERFACE_NAMSIZ];
        let len = self.ifname.len().min(INTERFACE_NAMSIZ);
        ifname[..len].copy_from_slice(&self.ifname.as_bytes()[..len]);
        buf.put_slice(&ifname);
        buf.put_u32(self.ifindex);
        buf.put_u32(self.mtu);
        let mut flags = 0u64;
        if self.operative {
            flags |= (libc::IFF_UP | libc::IFF_RUNNING) as u64;
        }
        if self.loopback {
            flags |= libc::IFF_LOOPBACK as u64;
        }
        buf.put_u64(flags);
    }
}

// ===== impl RepAddressInfo =====

impl RepAddressInfo {
    fn decode(mut buf: Bytes) -> DecodeResult<Self> {
        ensure(&buf, 5)?;
        let ifindex = buf.get_u32();
        let family = buf.get_u8();
        let af = AddressFamily::from_af_value(family).ok_or_else(|| {
            DecodeError::MalformedMessage(format!(
                "invalid address-family: {}",
                family
            ))
        })?;
        ensure(&buf, af_addr_len(af) + 1)?;
        let addr = buf.get_ip(af);
        let plen = buf.get_u8();
        if plen > af.max_prefixlen() {
            return Err(DecodeError::InvalidPrefixLength(plen));
        }
        let addr = IpNetwork::new(addr, plen)?;

        Ok(RepAddressInfo { ifindex, addr })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ifindex);
        match self.addr {
            IpNetwork::V4(addr) => {
                buf.put_u8(AddressFamily::Ipv4.to_af_value());
                buf.put_ipv4(&addr.ip());
            }
            IpNetwork::V6(addr) => {
                buf.put_u8(AddressFamily::Ipv6.to_af_value());
                buf.put_ipv6(&addr.ip());
            }
        }
        buf.put_u8(self.addr.prefix());
    }
}

// ===== impl RepRouteInfo =====

impl RepRouteInfo {
    fn decode(af: AddressFamily, mut buf: Bytes) -> DecodeResult<Self> {
        ensure(&buf, 4)?;
        let proto = buf.get_u8();
        let proto = Protocol::from_u8(proto)
            .ok_or(DecodeError::UnknownProtocol(proto))?;
        let flags = buf.get_u8();

        // Optional-field presence bits. Unknown bits make the remainder of
        // the record impossible to delimit.
        let message = buf.get_u8();
        if message & !rep_message_flags_t::VALID_MASK != 0 {
            return Err(DecodeError::MalformedMessage(format!(
                "unknown optional-field bits: {:#04x}",
                message
            )));
        }

        // Parse packed prefix.
        let plen = buf.get_u8();
        if plen > af.max_prefixlen() {
            return Err(DecodeError::InvalidPrefixLength(plen));
        }
        let pwire_len = prefix_wire_len(plen);
        ensure(&buf, pwire_len)?;
        let addr = match af {
            AddressFamily::Ipv4 => {
                let mut bytes = [0u8; 4];
                buf.copy_to_slice(&mut bytes[..pwire_len]);
                IpAddr::from(bytes)
            }
            AddressFamily::Ipv6 => {
                let mut bytes = [0u8; 16];
                buf.copy_to_slice(&mut bytes[..pwire_len]);
                IpAddr::from(bytes)
            }
        };
        let prefix = IpNetwork::new(addr, plen)?;

        // Parse nexthop addresses.
        let mut nexthops = vec![];
        if message & rep_message_flags_t::NEXTHOP != 0 {
            ensure(&buf, 1)?;
            let count = buf.get_u8();
            ensure(&buf, count as usize * af_addr_len(af))?;
            for _ in 0..count {
                nexthops.push(buf.get_ip(af));
            }
        }

        // Parse outgoing interfaces.
        let mut ifindexes = vec![];
        if message & rep_message_flags_t::IFINDEX != 0 {
            ensure(&buf, 1)?;
            let count = buf.get_u8();
            ensure(&buf, count as usize * 4)?;
            for _ in 0..count {
                ifindexes.push(buf.get_u32());
            }
        }

        // When both vectors are present they pair up one-to-one.
        if message & rep_message_flags_t::NEXTHOP != 0
            && message & rep_message_flags_t::IFINDEX != 0
            && nexthops.len() != ifindexes.len()
        {
            return Err(DecodeError::NexthopCountMismatch(
                nexthops.len() as u8,
                ifindexes.len() as u8,
            ));
        }

        let distance = if message & rep_message_flags_t::DISTANCE != 0 {
            ensure(&buf, 1)?;
            Some(buf.get_u8())
        } else {
            None
        };
        let metric = if message & rep_message_flags_t::METRIC != 0 {
            ensure(&buf, 4)?;
            Some(buf.get_u32())
        } else {
            None
        };

        if buf.remaining() != 0 {
            return Err(DecodeError::TrailingBytes(buf.remaining()));
        }

        Ok(RepRouteInfo {
            proto,
            flags,
            prefix,
            nexthops,
            ifindexes,
            distance,
            metric,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.proto as u8);
        buf.put_u8(self.flags);

        let mut message = 0;
        if !self.nexthops.is_empty() {
            message |= rep_message_flags_t::NEXTHOP;
        }
        if !self.ifindexes.is_empty() {
            message |= rep_message_flags_t::IFINDEX;
        }
        if self.distance.is_some() {
            message |= rep_message_flags_t::DISTANCE;
        }
        if self.metric.is_some() {
            message |= rep_message_flags_t::METRIC;
        }
        buf.put_u8(message);

        let plen = self.prefix.prefix();
        let pwire_len = prefix_wire_len(plen);
        let prefix_bytes = self.prefix.ip().bytes();
        buf.put_u8(plen);
        buf.put_slice(&prefix_bytes[0..pwire_len]);

        if !self.nexthops.is_empty() {
            buf.put_u8(self.nexthops.len() as u8);
            for nexthop in &self.nexthops {
                buf.put_ip(nexthop);
            }
        }

        if !self.ifindexes.is_empty() {
            buf.put_u8(self.ifindexes.len() as u8);
            for ifindex in &self.ifindexes {
                buf.put_u32(*ifindex);
            }
        }

        if let Some(distance) = self.distance {
            buf.put_u8(distance);
        }
        if let Some(metric) = self.metric {
            buf.put_u32(metric);
        }
    }
}

// ===== impl RepLookupInfo =====

impl RepLookupInfo {
    fn decode(mut buf: Bytes) -> DecodeResult<Self> {
        ensure(&buf, 4)?;
        let addr = buf.get_ipv4();
        Ok(RepLookupInfo { addr })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.addr);
    }
}

// ===== impl RepLookupReplyInfo =====

impl RepLookupReplyInfo {
    fn decode(mut buf: Bytes) -> DecodeResult<Self> {
        ensure(&buf, 10)?;
        let addr = buf.get_ipv4();
        let distance = buf.get_u8();
        let metric = buf.get_u32();
        let count = buf.get_u8();
        ensure(&buf, count as usize * 8)?;
        let mut nexthops = vec![];
        for _ in 0..count {
            let gateway = buf.get_ipv4();
            let ifindex = buf.get_u32();
            nexthops.push(RepLookupNexthop { gateway, ifindex });
        }

        Ok(RepLookupReplyInfo {
            addr,
            distance,
            metric,
            nexthops,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.addr);
        buf.put_u8(self.distance);
        buf.put_u32(self.metric);
        buf.put_u8(self.nexthops.len() as u8);
        for nexthop in &self.nexthops {
            buf.put_ipv4(&nexthop.gateway);
            buf.put_u32(nexthop.ifindex);
        }
    }
}

// ===== helper functions =====

fn encode_rep_header(buf: &mut BytesMut, cmd: u8) {
    buf.put_u16(REP_HEADER_SIZE);
    buf.put_u8(cmd);
}

// Rewrites the message length in the REP header once the body size is known.
fn rewrite_rep_length(buf: &mut BytesMut) {
    let msg_len = buf.len() as u16;
    buf[0..2].copy_from_slice(&msg_len.to_be_bytes());
}

fn decode_proto(buf: &mut Bytes) -> DecodeResult<Protocol> {
    ensure(buf, 1)?;
    let proto = buf.get_u8();
    Protocol::from_u8(proto).ok_or(DecodeError::UnknownProtocol(proto))
}

fn prefix_wire_len(plen: u8) -> usize {
    plen.div_ceil(8) as usize
}

const fn af_addr_len(af: AddressFamily) -> usize {
    match af {
        AddressFamily::Ipv4 => 4,
        AddressFamily::Ipv6 => 16,
    }
}

fn ensure(buf: &Bytes, len: usize) -> DecodeResult<()> {
    if buf.remaining() < len {
        return Err(DecodeError::MalformedMessage(format!(
            "truncated message: missing {} bytes",
            len - buf.remaining()
        )));
    }
    Ok(())
}
