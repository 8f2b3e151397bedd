//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use derive_new::new;
use kroute_utils::UnboundedSender;
#[cfg(feature = "testing")]
use kroute_utils::UnboundedReceiver;
#[cfg(not(feature = "testing"))]
use kroute_utils::task::Task;
use kroute_utils::protocol::Protocol;
use tokio::sync::oneshot;

use crate::client::RepClient;
use crate::client::messages::{
    RepLookupInfo, RepLookupReplyInfo, RepRouteInfo, RepTxMsg,
};
use crate::debug::Debug;

#[derive(Debug, new)]
pub struct RepTx {
    // REP client.
    pub client: Arc<RepClient>,

    // REP Tx channel (transmission end).
    pub channel_tx: UnboundedSender<RepTxMsg>,

    // REP Tx channel (receiving end).
    //
    // This channel can be used in a testing environment to collect the sent
    // REP messages.
    #[cfg(feature = "testing")]
    pub channel_rx: Option<UnboundedReceiver<RepTxMsg>>,

    // REP session task.
    #[cfg(not(feature = "testing"))]
    pub task: Task<()>,
}

// ===== impl RepTx =====

impl RepTx {
    pub fn send(&self, msg: RepTxMsg) {
        Debug::MsgTx(&msg).log();
        self.channel_tx.send(msg).unwrap();
    }

    // Announces a route to the route manager.
    pub fn route_add(&self, info: RepRouteInfo) {
        self.send(RepTxMsg::RouteAdd(info));
    }

    // Withdraws a route from the route manager.
    pub fn route_del(&self, info: RepRouteInfo) {
        self.send(RepTxMsg::RouteDel(info));
    }

    // Registers interest in routes originated by the given protocol.
    //
    // The registration is recorded so it survives reconnections.
    pub fn redistribute_add(&self, proto: Protocol) {
        self.client.redist_record(proto);
        self.send(RepTxMsg::RedistributeAdd(proto));
    }

    // Cancels interest in routes originated by the given protocol.
    pub fn redistribute_del(&self, proto: Protocol) {
        self.client.redist_forget(proto);
        self.send(RepTxMsg::RedistributeDel(proto));
    }

    // Asks the route manager for the best-matching route to the given
    // destination and waits for the reply.
    //
    // Returns `None` if the connection was lost before the reply arrived.
    pub async fn nexthop_lookup(
        &self,
        addr: Ipv4Addr,
    ) -> Option<RepLookupReplyInfo> {
        let (responder, receiver) = oneshot::channel();
        self.client.lookup_register(addr, responder);
        self.send(RepTxMsg::NexthopLookup(RepLookupInfo::new(addr)));
        receiver.await.ok()
    }
}
