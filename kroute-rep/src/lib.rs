//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]
#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod client;
pub mod debug;
pub mod rx;
pub mod tx;

use std::sync::Arc;

use kroute_utils::protocol::Protocol;
use tokio::sync::mpsc;

use crate::client::RepClient;
use crate::client::messages::RepRxMsg;
use crate::debug::Debug;
use crate::rx::{RepRx, RepRxCallbacks};
use crate::tx::RepTx;

// ===== global functions =====

// Starts the REP layer for the given protocol.
pub fn start(protocol: Protocol) -> (RepTx, RepRx) {
    // Initialize reference-counted client.
    let client = Arc::new(RepClient::new(protocol));

    // Create REP channels.
    let (rep_txp, rep_txc) = mpsc::unbounded_channel();
    let (rep_rxp, rep_rxc) = mpsc::channel(4);

    #[cfg(not(feature = "testing"))]
    {
        // Start the session task. It owns both directions of the stream and
        // reconnects (replaying registrations) whenever the connection is
        // lost.
        let session_client = client.clone();
        let task = kroute_utils::task::Task::spawn(async move {
            session_client.session_loop(rep_txc, rep_rxp).await;
        });

        let tx = RepTx::new(client.clone(), rep_txp, task);
        let rx = RepRx::new(client, rep_rxc);
        (tx, rx)
    }
    #[cfg(feature = "testing")]
    {
        let tx = RepTx::new(client.clone(), rep_txp, Some(rep_txc));
        let rx = RepRx::new(client, Some(rep_rxp), rep_rxc);
        (tx, rx)
    }
}

// Processes a message coming from the route manager.
pub async fn process_rep_msg<ProtocolInstance>(
    instance: &mut ProtocolInstance,
    msg: RepRxMsg,
) where
    ProtocolInstance: RepRxCallbacks,
{
    Debug::MsgRx(&msg).log();

    match msg {
        RepRxMsg::RouterIdUpd(msg) => {
            instance.process_router_id_upd(msg).await;
        }
        RepRxMsg::IfaceAdd(msg) => {
            instance.process_iface_add(msg).await;
        }
        RepRxMsg::IfaceDel(msg) => {
            instance.process_iface_del(msg).await;
        }
        RepRxMsg::IfaceUp(msg) => {
            instance.process_iface_up(msg).await;
        }
        RepRxMsg::IfaceDown(msg) => {
            instance.process_iface_down(msg).await;
        }
        RepRxMsg::AddressAdd(msg) => {
            instance.process_addr_add(msg).await;
        }
        RepRxMsg::AddressDel(msg) => {
            instance.process_addr_del(msg).await;
        }
        RepRxMsg::RouteAdd(msg) => {
            instance.process_route_add(msg).await;
        }
        RepRxMsg::RouteDel(msg) => {
            instance.process_route_del(msg).await;
        }
        RepRxMsg::NexthopLookupReply(msg) => {
            instance.process_lookup_reply(msg).await;
        }
    }
}
