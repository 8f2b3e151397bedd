//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use const_addrs::ip4;
use kroute_rep::client::messages::{
    RepLookupInfo, RepRouteInfo, RepRxMsg, RepTxMsg,
};
use kroute_routing::fib::{FibOperation, RecordingFib};
use kroute_routing::server::ConnId;
use kroute_routing::{ManagerMsg, Master};
use kroute_utils::UnboundedReceiver;
use kroute_utils::protocol::Protocol;
use tokio::sync::{mpsc, oneshot};

fn new_master() -> Master<RecordingFib> {
    Master::new(RecordingFib::default())
}

async fn connect(
    master: &mut Master<RecordingFib>,
) -> (ConnId, UnboundedReceiver<RepRxMsg>) {
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    let (responder, receiver) = oneshot::channel();
    master.process_msg(ManagerMsg::ClientConnect { msg_tx, responder });
    let conn_id = receiver.await.unwrap();

    // Discard the connection-time snapshot.
    while msg_rx.try_recv().is_ok() {}

    (conn_id, msg_rx)
}

fn drain(msg_rx: &mut UnboundedReceiver<RepRxMsg>) -> Vec<RepRxMsg> {
    let mut msgs = vec![];
    while let Ok(msg) = msg_rx.try_recv() {
        msgs.push(msg);
    }
    msgs
}

fn route(
    proto: Protocol,
    prefix: &str,
    gateway: &str,
    ifindex: u32,
) -> RepRouteInfo {
    RepRouteInfo::new(
        proto,
        0,
        prefix.parse().unwrap(),
        vec![gateway.parse().unwrap()],
        vec![ifindex],
        None,
        None,
    )
}

// Withdrawing the best route while an alternative exists must translate
// into a single replacing install, with no uninstall in between.
#[tokio::test]
async fn best_path_removal_no_blackhole() {
    let mut master = new_master();
    let (conn_id, _msg_rx) = connect(&mut master).await;

    // Best route (static, distance 1) plus a backup (OSPF, distance 110).
    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::RouteAdd(route(
            Protocol::Static,
            "192.168.1.0/24",
            "10.0.1.1",
            2,
        )),
    ));
    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::RouteAdd(route(
            Protocol::Ospf,
            "192.168.1.0/24",
            "10.0.2.1",
            3,
        )),
    ));
    master.process_update_queue().await;

    // Withdraw the best route.
    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::RouteDel(route(
            Protocol::Static,
            "192.168.1.0/24",
            "10.0.1.1",
            2,
        )),
    ));
    master.process_update_queue().await;

    // The backup must have been installed with replace semantics.
    let last = master.fib.log.last().unwrap();
    assert!(matches!(
        last,
        FibOperation::Install { protocol: Protocol::Ospf, .. }
    ));
    assert!(
        !master
            .fib
            .log
            .iter()
            .any(|op| matches!(op, FibOperation::Uninstall { .. }))
    );

    // Withdrawing the last candidate uninstalls the prefix.
    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::RouteDel(route(
            Protocol::Ospf,
            "192.168.1.0/24",
            "10.0.2.1",
            3,
        )),
    ));
    master.process_update_queue().await;
    assert!(matches!(
        master.fib.log.last().unwrap(),
        FibOperation::Uninstall { protocol: Protocol::Ospf, .. }
    ));
}

// A new subscriber must receive a snapshot of the existing matching routes
// before any delta.
#[tokio::test]
async fn redistribute_snapshot_then_deltas() {
    let mut master = new_master();
    let (conn1, _msg_rx1) = connect(&mut master).await;

    master.process_msg(ManagerMsg::ClientMsg(
        conn1,
        RepTxMsg::RouteAdd(route(Protocol::Rip, "10.1.0.0/16", "10.0.1.1", 2)),
    ));
    master.process_msg(ManagerMsg::ClientMsg(
        conn1,
        RepTxMsg::RouteAdd(route(Protocol::Rip, "10.2.0.0/16", "10.0.1.1", 2)),
    ));
    master.process_update_queue().await;

    // Subscribe after the fact.
    let (conn2, mut msg_rx2) = connect(&mut master).await;
    master.process_msg(ManagerMsg::ClientMsg(
        conn2,
        RepTxMsg::RedistributeAdd(Protocol::Rip),
    ));
    let snapshot = drain(&mut msg_rx2);
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|msg| matches!(
        msg,
        RepRxMsg::RouteAdd(info) if info.proto == Protocol::Rip
    )));

    // Deltas flow after the snapshot.
    master.process_msg(ManagerMsg::ClientMsg(
        conn1,
        RepTxMsg::RouteAdd(route(Protocol::Rip, "10.3.0.0/16", "10.0.1.1", 2)),
    ));
    master.process_update_queue().await;
    let deltas = drain(&mut msg_rx2);
    assert_eq!(deltas.len(), 1);
    assert!(matches!(
        &deltas[0],
        RepRxMsg::RouteAdd(info) if info.prefix == "10.3.0.0/16".parse().unwrap()
    ));

    // Cancelling the interest stops the deltas.
    master.process_msg(ManagerMsg::ClientMsg(
        conn2,
        RepTxMsg::RedistributeDel(Protocol::Rip),
    ));
    master.process_msg(ManagerMsg::ClientMsg(
        conn1,
        RepTxMsg::RouteAdd(route(Protocol::Rip, "10.4.0.0/16", "10.0.1.1", 2)),
    ));
    master.process_update_queue().await;
    assert!(drain(&mut msg_rx2).is_empty());
}

// Route withdrawals reach subscribers too.
#[tokio::test]
async fn redistribute_route_del() {
    let mut master = new_master();
    let (conn1, _msg_rx1) = connect(&mut master).await;
    let (conn2, mut msg_rx2) = connect(&mut master).await;

    master.process_msg(ManagerMsg::ClientMsg(
        conn2,
        RepTxMsg::RedistributeAdd(Protocol::Bgp),
    ));
    master.process_msg(ManagerMsg::ClientMsg(
        conn1,
        RepTxMsg::RouteAdd(route(
            Protocol::Bgp,
            "203.0.113.0/24",
            "10.0.1.1",
            2,
        )),
    ));
    master.process_update_queue().await;
    drain(&mut msg_rx2);

    master.process_msg(ManagerMsg::ClientMsg(
        conn1,
        RepTxMsg::RouteDel(route(
            Protocol::Bgp,
            "203.0.113.0/24",
            "10.0.1.1",
            2,
        )),
    ));
    master.process_update_queue().await;
    let msgs = drain(&mut msg_rx2);
    assert_eq!(msgs.len(), 1);
    assert!(matches!(
        &msgs[0],
        RepRxMsg::RouteDel(info) if info.proto == Protocol::Bgp
    ));
}

// Best-match lookups answer from the active routes; unreachable
// destinations yield an empty nexthop list.
#[tokio::test]
async fn nexthop_lookup() {
    let mut master = new_master();
    let (conn_id, mut msg_rx) = connect(&mut master).await;

    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::RouteAdd(route(
            Protocol::Static,
            "10.0.0.0/8",
            "192.0.2.1",
            2,
        )),
    ));
    master.process_update_queue().await;

    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::NexthopLookup(RepLookupInfo::new(ip4!("10.1.2.3"))),
    ));
    let msgs = drain(&mut msg_rx);
    assert_eq!(msgs.len(), 1);
    let RepRxMsg::NexthopLookupReply(reply) = &msgs[0] else {
        panic!("unexpected message type");
    };
    assert_eq!(reply.addr, ip4!("10.1.2.3"));
    assert_eq!(reply.nexthops.len(), 1);
    assert_eq!(reply.nexthops[0].gateway, ip4!("192.0.2.1"));
    assert_eq!(reply.nexthops[0].ifindex, 2);

    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::NexthopLookup(RepLookupInfo::new(ip4!("172.16.0.1"))),
    ));
    let msgs = drain(&mut msg_rx);
    assert_eq!(msgs.len(), 1);
    let RepRxMsg::NexthopLookupReply(reply) = &msgs[0] else {
        panic!("unexpected message type");
    };
    assert!(reply.nexthops.is_empty());
}

// A dropped connection takes its interest registrations with it.
#[tokio::test]
async fn disconnect_discards_interests() {
    let mut master = new_master();
    let (conn_id, _msg_rx) = connect(&mut master).await;

    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::RedistributeAdd(Protocol::Rip),
    ));
    assert_eq!(master.server.interests(conn_id).unwrap().len(), 1);

    master.process_msg(ManagerMsg::ClientDisconnect(conn_id));
    assert!(master.server.interests(conn_id).is_none());
}

// The most specific covering prefix wins the lookup.
#[tokio::test]
async fn nexthop_lookup_longest_match() {
    let mut master = new_master();
    let (conn_id, mut msg_rx) = connect(&mut master).await;

    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::RouteAdd(route(
            Protocol::Static,
            "10.0.0.0/8",
            "192.0.2.1",
            2,
        )),
    ));
    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::RouteAdd(route(
            Protocol::Ospf,
            "10.1.0.0/16",
            "192.0.2.9",
            3,
        )),
    ));
    master.process_update_queue().await;

    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::NexthopLookup(RepLookupInfo::new(ip4!("10.1.2.3"))),
    ));
    let msgs = drain(&mut msg_rx);
    let RepRxMsg::NexthopLookupReply(reply) = &msgs[0] else {
        panic!("unexpected message type");
    };
    assert_eq!(reply.nexthops[0].gateway, ip4!("192.0.2.9"));
    assert_eq!(reply.nexthops[0].ifindex, 3);
}

// An explicit distance takes precedence over the advertising protocol's
// default when selecting the best route.
#[tokio::test]
async fn explicit_distance_overrides_default() {
    let mut master = new_master();
    let (conn_id, _msg_rx) = connect(&mut master).await;

    // OSPF route demoted to distance 200, losing to RIP's default of 120.
    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::RouteAdd(RepRouteInfo::new(
            Protocol::Ospf,
            0,
            "10.9.0.0/16".parse().unwrap(),
            vec![IpAddr::V4(ip4!("10.0.2.1"))],
            vec![3],
            Some(200),
            None,
        )),
    ));
    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::RouteAdd(route(Protocol::Rip, "10.9.0.0/16", "10.0.1.1", 2)),
    ));
    master.process_update_queue().await;

    assert!(matches!(
        master.fib.log.last().unwrap(),
        FibOperation::Install { protocol: Protocol::Rip, .. }
    ));
}

// Multipath routes keep all their nexthops through the RIB.
#[tokio::test]
async fn multipath_install() {
    let mut master = new_master();
    let (conn_id, _msg_rx) = connect(&mut master).await;

    master.process_msg(ManagerMsg::ClientMsg(
        conn_id,
        RepTxMsg::RouteAdd(RepRouteInfo::new(
            Protocol::Bgp,
            0,
            "198.51.100.0/24".parse().unwrap(),
            vec![
                IpAddr::V4(ip4!("10.0.1.1")),
                IpAddr::V4(ip4!("10.0.2.1")),
            ],
            vec![2, 3],
            None,
            Some(100),
        )),
    ));
    master.process_update_queue().await;

    let FibOperation::Install { nexthops, .. } = master.fib.log.last().unwrap()
    else {
        panic!("unexpected FIB operation");
    };
    assert_eq!(nexthops.len(), 2);
}
