//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::sync::LazyLock;

use bytes::Bytes;
use const_addrs::ip4;
use kroute_rep::client::error::DecodeError;
use kroute_rep::client::messages::{
    RepAddressInfo, RepIfaceInfo, RepLookupNexthop, RepLookupReplyInfo,
    RepRouteInfo, RepRxMsg, RepTxMsg,
};
use kroute_utils::protocol::Protocol;

// Reference encoding of a fully populated IPv4 route record.
static ROUTE_ADD_IPV4: LazyLock<(Vec<u8>, RepTxMsg)> = LazyLock::new(|| {
    (
        vec![
            0x00, 0x18, 0x07, // header: length 24, IPV4_ROUTE_ADD
            0x04, // type: rip
            0x00, // flags
            0x0f, // message: nexthop | ifindex | distance | metric
            0x10, 0x0a, 0x01, // prefix: 10.1.0.0/16
            0x01, 0xc0, 0x00, 0x02, 0x01, // nexthops: [192.0.2.1]
            0x01, 0x00, 0x00, 0x00, 0x07, // ifindexes: [7]
            0x78, // distance: 120
            0x00, 0x00, 0x00, 0x02, // metric: 2
        ],
        RepTxMsg::RouteAdd(RepRouteInfo::new(
            Protocol::Rip,
            0,
            "10.1.0.0/16".parse().unwrap(),
            vec![IpAddr::V4(ip4!("192.0.2.1"))],
            vec![7],
            Some(120),
            Some(2),
        )),
    )
});

fn decode_tx_frame(frame: &[u8]) -> Result<RepTxMsg, DecodeError> {
    let size = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    assert_eq!(size, frame.len());
    RepTxMsg::decode(Bytes::copy_from_slice(&frame[3..]), frame[2])
}

fn decode_rx_frame(frame: &[u8]) -> Result<RepRxMsg, DecodeError> {
    let size = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    assert_eq!(size, frame.len());
    RepRxMsg::decode(Bytes::copy_from_slice(&frame[3..]), frame[2])
}

#[test]
fn route_add_encode() {
    let (ref bytes, ref msg) = *ROUTE_ADD_IPV4;
    assert_eq!(msg.encode().as_ref(), bytes.as_slice());
}

#[test]
fn route_add_decode() {
    let (ref bytes, _) = *ROUTE_ADD_IPV4;
    let msg = decode_tx_frame(bytes).unwrap();
    let RepTxMsg::RouteAdd(info) = msg else {
        panic!("unexpected message type");
    };
    assert_eq!(info.proto, Protocol::Rip);
    assert_eq!(info.prefix, "10.1.0.0/16".parse().unwrap());
    assert_eq!(info.nexthops, vec![IpAddr::V4(ip4!("192.0.2.1"))]);
    assert_eq!(info.ifindexes, vec![7]);
    assert_eq!(info.distance, Some(120));
    assert_eq!(info.metric, Some(2));
}

// An absent optional field must stay absent through a round-trip, not
// reappear as a zero value.
#[test]
fn route_del_optional_fields_absent() {
    let msg = RepTxMsg::RouteDel(RepRouteInfo::new(
        Protocol::Static,
        0,
        "203.0.113.0/24".parse().unwrap(),
        vec![],
        vec![],
        None,
        None,
    ));
    let frame = msg.encode();

    // No presence bits set.
    assert_eq!(frame[5], 0);

    let RepTxMsg::RouteDel(info) = decode_tx_frame(&frame).unwrap() else {
        panic!("unexpected message type");
    };
    assert!(info.nexthops.is_empty());
    assert!(info.ifindexes.is_empty());
    assert_eq!(info.distance, None);
    assert_eq!(info.metric, None);
}

#[test]
fn route_add_ipv6_roundtrip() {
    let msg = RepTxMsg::RouteAdd(RepRouteInfo::new(
        Protocol::Ripng,
        0,
        "2001:db8:1::/48".parse().unwrap(),
        vec!["fe80::1".parse().unwrap()],
        vec![3],
        None,
        Some(4),
    ));
    let frame = msg.encode();

    // IPV6_ROUTE_ADD command, packed prefix of 6 bytes.
    assert_eq!(frame[2], 9);

    let RepTxMsg::RouteAdd(info) = decode_tx_frame(&frame).unwrap() else {
        panic!("unexpected message type");
    };
    assert_eq!(info.prefix, "2001:db8:1::/48".parse().unwrap());
    assert_eq!(info.nexthops.len(), 1);
    assert_eq!(info.distance, None);
    assert_eq!(info.metric, Some(4));
}

#[test]
fn route_unknown_presence_bits() {
    let (ref bytes, _) = *ROUTE_ADD_IPV4;
    let mut bytes = bytes.clone();
    bytes[5] |= 0x10;
    assert!(matches!(
        decode_tx_frame(&bytes),
        Err(DecodeError::MalformedMessage(_))
    ));
}

#[test]
fn route_nexthop_count_mismatch() {
    // One nexthop but two ifindexes.
    let frame = vec![
        0x00, 0x17, 0x07, // header
        0x04, 0x00, 0x03, // type, flags, message: nexthop | ifindex
        0x10, 0x0a, 0x01, // prefix: 10.1.0.0/16
        0x01, 0xc0, 0x00, 0x02, 0x01, // nexthops: [192.0.2.1]
        0x02, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x08, // ifindexes
    ];
    assert!(matches!(
        decode_tx_frame(&frame),
        Err(DecodeError::NexthopCountMismatch(1, 2))
    ));
}

#[test]
fn route_invalid_prefix_length() {
    let frame = vec![
        0x00, 0x08, 0x07, // header
        0x04, 0x00, 0x00, // type, flags, message
        0x21, 0x0a, // prefix length 33 on an IPv4 route
    ];
    assert!(matches!(
        decode_tx_frame(&frame),
        Err(DecodeError::InvalidPrefixLength(33))
    ));
}

#[test]
fn route_trailing_bytes() {
    let (ref bytes, _) = *ROUTE_ADD_IPV4;
    let mut bytes = bytes.clone();
    bytes.extend_from_slice(&[0xde, 0xad]);
    bytes[1] += 2;
    assert!(matches!(
        decode_tx_frame(&bytes),
        Err(DecodeError::TrailingBytes(2))
    ));
}

#[test]
fn route_truncated() {
    let (ref bytes, _) = *ROUTE_ADD_IPV4;
    let mut bytes = bytes[..12].to_vec();
    bytes[1] = bytes.len() as u8;
    assert!(matches!(
        decode_tx_frame(&bytes),
        Err(DecodeError::MalformedMessage(_))
    ));
}

#[test]
fn redistribute_roundtrip() {
    let frame = RepTxMsg::RedistributeAdd(Protocol::Bgp).encode();
    assert_eq!(frame.as_ref(), &[0x00, 0x04, 0x0b, 0x09]);
    assert!(matches!(
        decode_tx_frame(&frame).unwrap(),
        RepTxMsg::RedistributeAdd(Protocol::Bgp)
    ));

    let frame = RepTxMsg::RedistributeDel(Protocol::Bgp).encode();
    assert!(matches!(
        decode_tx_frame(&frame).unwrap(),
        RepTxMsg::RedistributeDel(Protocol::Bgp)
    ));
}

#[test]
fn redistribute_unknown_protocol() {
    let frame = vec![0x00, 0x04, 0x0b, 0xff];
    assert!(matches!(
        decode_tx_frame(&frame),
        Err(DecodeError::UnknownProtocol(0xff))
    ));
}

#[test]
fn unknown_command() {
    let frame = vec![0x00, 0x03, 0x63];
    assert!(matches!(
        decode_tx_frame(&frame),
        Err(DecodeError::UnknownCommand(0x63))
    ));
}

#[test]
fn iface_roundtrip() {
    let msg = RepRxMsg::IfaceUp(RepIfaceInfo::new(
        "eth0".to_owned(),
        2,
        1500,
        true,
        false,
    ));
    let frame = msg.encode();
    let RepRxMsg::IfaceUp(info) = decode_rx_frame(&frame).unwrap() else {
        panic!("unexpected message type");
    };
    assert_eq!(info.ifname, "eth0");
    assert_eq!(info.ifindex, 2);
    assert_eq!(info.mtu, 1500);
    assert!(info.operative);
    assert!(!info.loopback);
}

#[test]
fn address_roundtrip() {
    let msg = RepRxMsg::AddressAdd(RepAddressInfo::new(
        2,
        "192.0.2.1/24".parse().unwrap(),
    ));
    let frame = msg.encode();
    let RepRxMsg::AddressAdd(info) = decode_rx_frame(&frame).unwrap() else {
        panic!("unexpected message type");
    };
    assert_eq!(info.ifindex, 2);
    assert_eq!(info.addr, "192.0.2.1/24".parse().unwrap());
}

#[test]
fn lookup_reply_roundtrip() {
    let msg = RepRxMsg::NexthopLookupReply(RepLookupReplyInfo::new(
        ip4!("198.51.100.10"),
        110,
        20,
        vec![
            RepLookupNexthop::new(ip4!("192.0.2.1"), 2),
            RepLookupNexthop::new(ip4!("192.0.2.9"), 3),
        ],
    ));
    let frame = msg.encode();
    let RepRxMsg::NexthopLookupReply(info) = decode_rx_frame(&frame).unwrap()
    else {
        panic!("unexpected message type");
    };
    assert_eq!(info.addr, ip4!("198.51.100.10"));
    assert_eq!(info.distance, 110);
    assert_eq!(info.metric, 20);
    assert_eq!(info.nexthops.len(), 2);
    assert_eq!(info.nexthops[0], RepLookupNexthop::new(ip4!("192.0.2.1"), 2));
}

// Unreachable destinations are encoded as a reply with no nexthops.
#[test]
fn lookup_reply_unreachable() {
    let msg = RepRxMsg::NexthopLookupReply(RepLookupReplyInfo::new(
        ip4!("198.51.100.10"),
        0,
        0,
        vec![],
    ));
    let frame = msg.encode();
    let RepRxMsg::NexthopLookupReply(info) = decode_rx_frame(&frame).unwrap()
    else {
        panic!("unexpected message type");
    };
    assert!(info.nexthops.is_empty());
}
