//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::IpNetwork;
use kroute_rep::client::messages::{
    RepLookupNexthop, RepLookupReplyInfo, RepRouteInfo, RepRxMsg, RepTxMsg,
};
use kroute_utils::UnboundedSender;
use kroute_utils::protocol::Protocol;

use crate::debug::Debug;
use crate::rib::{Rib, Route};

pub type ConnId = u64;

// Server side of the route exchange protocol.
//
// Tracks one entry per connected protocol daemon. The transport glue owns
// the sockets and forwards decoded messages here; outbound messages go
// through each connection's channel.
#[derive(Debug, Default)]
pub struct RepServer {
    // Connected protocol daemons.
    connections: BTreeMap<ConnId, Connection>,
    // Next connection ID.
    next_conn_id: ConnId,
}

#[derive(Debug)]
struct Connection {
    // Outbound message channel.
    tx: UnboundedSender<RepRxMsg>,
    // Protocols whose routes this daemon asked to receive.
    interests: BTreeSet<Protocol>,
    // Whether this daemon asked to receive the default route.
    redistribute_default: bool,
}

// ===== impl RepServer =====

impl RepServer {
    // Registers a new connection and returns its ID.
    pub fn accept(&mut self, tx: UnboundedSender<RepRxMsg>) -> ConnId {
        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;
        self.connections.insert(
            conn_id,
            Connection {
                tx,
                interests: Default::default(),
                redistribute_default: false,
            },
        );
        Debug::ConnAccept(conn_id).log();
        conn_id
    }

    // Discards all state associated with the given connection.
    //
    // Interest registrations die with the connection. A daemon that
    // reconnects is expected to replay them from scratch.
    pub fn disconnect(&mut self, conn_id: ConnId) {
        Debug::ConnClose(conn_id).log();
        self.connections.remove(&conn_id);
    }

    // Processes a message received from a protocol daemon.
    pub fn process_client_msg(
        &mut self,
        conn_id: ConnId,
        msg: RepTxMsg,
        rib: &mut Rib,
    ) {
        Debug::ClientMsgRx(conn_id, &msg).log();

        match msg {
            RepTxMsg::RouteAdd(info) => {
                rib.ip_route_add(info);
            }
            RepTxMsg::RouteDel(info) => {
                rib.ip_route_del(info);
            }
            RepTxMsg::RedistributeAdd(proto) => {
                let Some(conn) = self.connections.get_mut(&conn_id) else {
                    return;
                };
                conn.interests.insert(proto);

                // Send a snapshot of the matching routes before any delta.
                for (prefix, route) in rib
                    .iter_active()
                    .filter(|(_, route)| route.protocol == proto)
                {
                    let info = route_to_info(prefix, route);
                    conn.send(conn_id, RepRxMsg::RouteAdd(info));
                }
            }
            RepTxMsg::RedistributeDel(proto) => {
                if let Some(conn) = self.connections.get_mut(&conn_id) {
                    conn.interests.remove(&proto);
                }
            }
            RepTxMsg::RedistributeDfltAdd => {
                let Some(conn) = self.connections.get_mut(&conn_id) else {
                    return;
                };
                conn.redistribute_default = true;

                // Send the default route if one is active.
                if let Some((prefix, route)) = rib
                    .iter_active()
                    .find(|(prefix, _)| prefix.prefix() == 0)
                {
                    let info = route_to_info(prefix, route);
                    conn.send(conn_id, RepRxMsg::RouteAdd(info));
                }
            }
            RepTxMsg::RedistributeDfltDel => {
                if let Some(conn) = self.connections.get_mut(&conn_id) {
                    conn.redistribute_default = false;
                }
            }
            RepTxMsg::NexthopLookup(info) => {
                let reply = nexthop_lookup(rib, info.addr);
                if let Some(conn) = self.connections.get(&conn_id) {
                    conn.send(conn_id, RepRxMsg::NexthopLookupReply(reply));
                }
            }
        }
    }

    // Notifies subscribed daemons about an added or updated route.
    pub(crate) fn notify_route_add(&self, prefix: IpNetwork, route: &Route) {
        for (conn_id, conn) in self
            .connections
            .iter()
            .filter(|(_, conn)| conn.wants_route(prefix, route.protocol))
        {
            let info = route_to_info(prefix, route);
            conn.send(*conn_id, RepRxMsg::RouteAdd(info));
        }
    }

    // Notifies subscribed daemons about a deleted route.
    pub(crate) fn notify_route_del(
        &self,
        prefix: IpNetwork,
        protocol: Protocol,
    ) {
        for (conn_id, conn) in self
            .connections
            .iter()
            .filter(|(_, conn)| conn.wants_route(prefix, protocol))
        {
            let info = RepRouteInfo::new(
                protocol,
                0,
                prefix,
                vec![],
                vec![],
                None,
                None,
            );
            conn.send(*conn_id, RepRxMsg::RouteDel(info));
        }
    }

    // Sends a message to every connected daemon.
    //
    // Used for interface, address and Router-ID events.
    pub(crate) fn notify_all(&self, msg: RepRxMsg) {
        for (conn_id, conn) in self.connections.iter() {
            conn.send(*conn_id, msg.clone());
        }
    }

    // Sends a message to a single connection.
    pub(crate) fn notify(&self, conn_id: ConnId, msg: RepRxMsg) {
        if let Some(conn) = self.connections.get(&conn_id) {
            conn.send(conn_id, msg);
        }
    }

    // Returns the registered interests of the given connection.
    pub fn interests(&self, conn_id: ConnId) -> Option<&BTreeSet<Protocol>> {
        self.connections.get(&conn_id).map(|conn| &conn.interests)
    }
}

// ===== impl Connection =====

impl Connection {
    fn send(&self, conn_id: ConnId, msg: RepRxMsg) {
        Debug::ClientMsgTx(conn_id, &msg).log();

        // The socket task might be gone already if the daemon disconnected.
        let _ = self.tx.send(msg);
    }

    fn wants_route(&self, prefix: IpNetwork, protocol: Protocol) -> bool {
        self.interests.contains(&protocol)
            || (self.redistribute_default && prefix.prefix() == 0)
    }
}

// ===== helper functions =====

// Answers a best-match lookup query.
//
// An unreachable destination yields a reply with an empty nexthop list.
fn nexthop_lookup(rib: &Rib, addr: Ipv4Addr) -> RepLookupReplyInfo {
    match rib.best_match(addr.into()) {
        Some((_, route)) => {
            let nexthops = route
                .nexthops
                .iter()
                .filter_map(|nexthop| match (nexthop.gateway, nexthop.ifindex)
                {
                    (Some(IpAddr::V4(gateway)), Some(ifindex)) => {
                        Some(RepLookupNexthop::new(gateway, ifindex))
                    }
                    _ => None,
                })
                .collect();
            RepLookupReplyInfo::new(
                addr,
                u8::try_from(route.distance).unwrap_or(u8::MAX),
                route.metric,
                nexthops,
            )
        }
        None => RepLookupReplyInfo::new(addr, 0, 0, vec![]),
    }
}

// Builds the wire record for an active route.
fn route_to_info(prefix: IpNetwork, route: &Route) -> RepRouteInfo {
    let nexthops = route
        .nexthops
        .iter()
        .filter_map(|nexthop| nexthop.gateway)
        .collect();
    let ifindexes = route
        .nexthops
        .iter()
        .filter_map(|nexthop| nexthop.ifindex)
        .collect();
    RepRouteInfo::new(
        route.protocol,
        0,
        prefix,
        nexthops,
        ifindexes,
        Some(u8::try_from(route.distance).unwrap_or(u8::MAX)),
        Some(route.metric),
    )
}
