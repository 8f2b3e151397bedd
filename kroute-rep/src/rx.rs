//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use async_trait::async_trait;
use derive_new::new;
use kroute_utils::Receiver;
#[cfg(feature = "testing")]
use kroute_utils::Sender;

use crate::client::RepClient;
use crate::client::messages::{
    RepAddressInfo, RepIfaceInfo, RepLookupReplyInfo, RepRouteInfo,
    RepRouterIdInfo, RepRxMsg,
};

#[derive(Debug, new)]
pub struct RepRx {
    // REP client.
    pub client: Arc<RepClient>,

    // REP Rx channel (transmission end).
    //
    // This channel can be used in a testing environment to inject REP
    // messages.
    #[cfg(feature = "testing")]
    pub channel_tx: Option<Sender<RepRxMsg>>,

    // REP Rx channel (receiving end).
    pub channel_rx: Receiver<RepRxMsg>,
}

#[async_trait]
pub trait RepRxCallbacks: Send {
    // Process a Router-ID update message.
    async fn process_router_id_upd(&mut self, _msg: RepRouterIdInfo) {}

    // Process an interface addition message.
    async fn process_iface_add(&mut self, _msg: RepIfaceInfo) {}

    // Process an interface removal message.
    async fn process_iface_del(&mut self, _msg: RepIfaceInfo) {}

    // Process an interface link-up message.
    async fn process_iface_up(&mut self, _msg: RepIfaceInfo) {}

    // Process an interface link-down message.
    async fn process_iface_down(&mut self, _msg: RepIfaceInfo) {}

    // Process an address addition message.
    async fn process_addr_add(&mut self, _msg: RepAddressInfo) {}

    // Process an address removal message.
    async fn process_addr_del(&mut self, _msg: RepAddressInfo) {}

    // Process a redistributed route addition message.
    async fn process_route_add(&mut self, _msg: RepRouteInfo) {}

    // Process a redistributed route deletion message.
    async fn process_route_del(&mut self, _msg: RepRouteInfo) {}

    // Process a nexthop lookup reply that no pending lookup claimed.
    async fn process_lookup_reply(&mut self, _msg: RepLookupReplyInfo) {}
}

// ===== impl RepRx =====

impl RepRx {
    pub async fn recv(&mut self) -> Option<RepRxMsg> {
        self.channel_rx.recv().await
    }
}
