//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use async_trait::async_trait;
use derive_new::new;
use kroute_rep::client::messages::{RepIfaceInfo, RepRouteInfo};
use kroute_rep::rx::RepRxCallbacks;
use kroute_rep::tx::RepTx;

use crate::debug::Debug;
use crate::events;
use crate::instance::Instance;
use crate::kernel::McastControl;
use crate::nexthop::{Nexthop, NexthopResolver, ResolvedRoute};
use crate::tasks::messages::input::ScanIntervalMsg;

// Unicast route resolution backed by the route manager.
//
// Every query goes through a REP nexthop lookup. The nexthop cache sits
// on top of this, so lookups only happen on cache misses and during the
// periodic scan.
#[derive(Debug, new)]
pub struct RepRouteResolver {
    rep_tx: RepTx,
}

// ===== impl RepRouteResolver =====

#[async_trait]
impl NexthopResolver for RepRouteResolver {
    async fn resolve(&mut self, addr: Ipv4Addr) -> Option<ResolvedRoute> {
        let reply = self.rep_tx.nexthop_lookup(addr).await?;
        if reply.nexthops.is_empty() {
            return None;
        }

        let nexthops = reply
            .nexthops
            .iter()
            .map(|nexthop| Nexthop::new(nexthop.gateway, nexthop.ifindex))
            .collect();
        Some(ResolvedRoute::new(
            nexthops,
            reply.metric,
            reply.distance.into(),
        ))
    }
}

// ===== impl Instance =====

#[async_trait]
impl<R, M> RepRxCallbacks for Instance<R, M>
where
    R: NexthopResolver,
    M: McastControl,
{
    async fn process_iface_add(&mut self, msg: RepIfaceInfo) {
        if msg.loopback || !msg.operative {
            return;
        }
        events::process_vif_add(self, msg.ifname, msg.ifindex).await;
    }

    async fn process_iface_up(&mut self, msg: RepIfaceInfo) {
        if msg.loopback {
            return;
        }
        events::process_vif_add(self, msg.ifname, msg.ifindex).await;
    }

    async fn process_iface_down(&mut self, msg: RepIfaceInfo) {
        events::process_vif_del(self, msg.ifindex).await;
        self.schedule_scan();
    }

    async fn process_iface_del(&mut self, msg: RepIfaceInfo) {
        events::process_vif_del(self, msg.ifindex).await;
        self.schedule_scan();
    }

    // PIM resolves through explicit lookups, so redistributed routes are
    // only traced.
    async fn process_route_add(&mut self, msg: RepRouteInfo) {
        Debug::RedistRx(&msg).log();
    }

    async fn process_route_del(&mut self, msg: RepRouteInfo) {
        Debug::RedistRx(&msg).log();
    }
}

// ===== impl Instance (helpers) =====

impl<R, M> Instance<R, M>
where
    R: NexthopResolver,
    M: McastControl,
{
    // Schedules an early nexthop cache scan on top of the periodic one.
    fn schedule_scan(&self) {
        let _ = self.tx.nexthop_scan.send(ScanIntervalMsg {});
    }
}
