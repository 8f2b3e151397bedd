//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, btree_map};
use std::net::IpAddr;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use derive_new::new;
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use itertools::{EitherOrBoth, Itertools};
use kroute_rep::client::messages::{RepAddressInfo, RepRouteInfo};
use kroute_utils::ip::IpNetworkExt;
use kroute_utils::protocol::Protocol;
use kroute_utils::{UnboundedReceiver, UnboundedSender};
use prefix_trie::map::PrefixMap;
use tokio::sync::mpsc;

use crate::debug::Debug;
use crate::fib::KernelFib;
use crate::server::RepServer;

#[derive(Debug)]
pub struct Rib {
    pub ipv4: PrefixMap<Ipv4Network, BTreeMap<u32, Route>>,
    pub ipv6: PrefixMap<Ipv6Network, BTreeMap<u32, Route>>,
    pub update_queue: BTreeSet<IpNetwork>,
    pub update_queue_tx: UnboundedSender<()>,
    pub update_queue_rx: UnboundedReceiver<()>,
}

#[derive(Clone, Debug, new)]
pub struct Route {
    pub protocol: Protocol,
    pub distance: u32,
    pub metric: u32,
    pub nexthops: BTreeSet<RouteNexthop>,
    pub last_updated: DateTime<Utc>,
    pub flags: RouteFlags,
}

// One forwarding path of a route. Recursive routes carry only a gateway,
// connected routes only an outgoing interface.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, new)]
pub struct RouteNexthop {
    pub gateway: Option<IpAddr>,
    pub ifindex: Option<u32>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteFlags: u8 {
        const ACTIVE = 0x01;
        const REMOVED = 0x02;
    }
}

// ===== impl Rib =====

impl Rib {
    // Adds connected route to the RIB.
    pub(crate) fn connected_route_add(&mut self, msg: &RepAddressInfo) {
        let prefix = msg.addr.apply_mask();
        let rib_prefix = self.prefix_entry(prefix);
        let distance = 0;
        match rib_prefix.entry(distance) {
            btree_map::Entry::Vacant(v) => {
                // If the route does not exist, create a new entry.
                v.insert(Route::new(
                    Protocol::Connected,
                    distance,
                    0,
                    [RouteNexthop::new(None, Some(msg.ifindex))]
                        .into_iter()
                        .collect(),
                    Utc::now(),
                    RouteFlags::empty(),
                ));
            }
            btree_map::Entry::Occupied(o) => {
                let route = o.into_mut();

                // Update the existing route with the new information.
                route
                    .nexthops
                    .insert(RouteNexthop::new(None, Some(msg.ifindex)));
                route.last_updated = Utc::now();
                route.flags.remove(RouteFlags::REMOVED);
            }
        }

        // Add route to the update queue.
        self.update_queue_add(prefix);
    }

    // Removes connected route from the RIB.
    pub(crate) fn connected_route_del(&mut self, msg: &RepAddressInfo) {
        // Find route entry from the same advertising protocol.
        let prefix = msg.addr.apply_mask();
        let rib_prefix = self.prefix_entry(prefix);
        if let Some(route) = rib_prefix
            .values_mut()
            .find(|route| route.protocol == Protocol::Connected)
        {
            route
                .nexthops
                .remove(&RouteNexthop::new(None, Some(msg.ifindex)));

            // Mark the route as removed once its last address is gone.
            if route.nexthops.is_empty() {
                route.flags.insert(RouteFlags::REMOVED);
            }

            // Add route to the update queue.
            self.update_queue_add(prefix);
        }
    }

    // Adds route received from a protocol daemon to the RIB.
    pub(crate) fn ip_route_add(&mut self, msg: RepRouteInfo) {
        let distance = msg
            .distance
            .unwrap_or_else(|| msg.proto.default_distance());
        let distance = u32::from(distance);
        let metric = msg.metric.unwrap_or(0);
        let nexthops = route_nexthops(&msg);

        let rib_prefix = self.prefix_entry(msg.prefix);
        match rib_prefix.entry(distance) {
            btree_map::Entry::Vacant(v) => {
                // If the route does not exist, create a new entry.
                v.insert(Route::new(
                    msg.proto,
                    distance,
                    metric,
                    nexthops,
                    Utc::now(),
                    RouteFlags::empty(),
                ));
            }
            btree_map::Entry::Occupied(o) => {
                let route = o.into_mut();

                // Update the existing route with the new information.
                route.protocol = msg.proto;
                route.metric = metric;
                route.nexthops = nexthops;
                route.last_updated = Utc::now();
                route.flags.remove(RouteFlags::REMOVED);
            }
        }

        // Add route to the update queue.
        self.update_queue_add(msg.prefix);
    }

    // Removes route withdrawn by a protocol daemon from the RIB.
    pub(crate) fn ip_route_del(&mut self, msg: RepRouteInfo) {
        let rib_prefix = self.prefix_entry(msg.prefix);

        // Find route entry from the same advertising protocol.
        if let Some(route) = rib_prefix
            .values_mut()
            .find(|route| route.protocol == msg.proto)
        {
            // Mark route as removed.
            route.flags.insert(RouteFlags::REMOVED);

            // Add route to the update queue.
            self.update_queue_add(msg.prefix);
        }
    }

    // Processes prefixes present in the update queue.
    //
    // When the active route is withdrawn and another candidate survives, the
    // kernel sees a single replacing install of the new best route. An
    // uninstall happens only when no candidate is left, so the forwarding
    // table never goes through an empty window for a still-reachable prefix.
    pub(crate) async fn process_update_queue<F>(
        &mut self,
        fib: &mut F,
        server: &mut RepServer,
    ) where
        F: KernelFib,
    {
        while let Some(prefix) = self.update_queue.pop_first() {
            let rib_prefix = self.prefix_entry(prefix);

            // Find the protocol of the old best route, if one exists.
            let old_best_protocol = rib_prefix
                .values()
                .find(|route| route.flags.contains(RouteFlags::ACTIVE))
                .map(|route| route.protocol);

            // Remove routes marked with the REMOVED flag.
            rib_prefix
                .retain(|_, route| !route.flags.contains(RouteFlags::REMOVED));

            // Select and (re)install the best route for this prefix.
            for (idx, route) in rib_prefix.values_mut().enumerate() {
                if idx == 0 {
                    // Mark the route as the preferred one.
                    route.flags.insert(RouteFlags::ACTIVE);

                    // Install the route in the kernel.
                    if !matches!(
                        route.protocol,
                        Protocol::Kernel | Protocol::Connected
                    ) {
                        Debug::RouteInstall(&prefix, route).log();
                        fib.route_install(prefix, route).await;
                    }

                    // Notify subscribed daemons about the updated route.
                    server.notify_route_add(prefix, route);
                } else {
                    // Remove the preferred flag for other routes.
                    route.flags.remove(RouteFlags::ACTIVE);
                }
            }

            // Check if there are no routes left for this prefix.
            if rib_prefix.is_empty() {
                if let Some(protocol) = old_best_protocol {
                    // Uninstall the old best route from the kernel.
                    if !matches!(
                        protocol,
                        Protocol::Kernel | Protocol::Connected
                    ) {
                        Debug::RouteUninstall(&prefix, protocol).log();
                        fib.route_uninstall(prefix, protocol).await;
                    }

                    // Notify subscribed daemons about the deleted route.
                    server.notify_route_del(prefix, protocol);
                }

                // Remove prefix entry from the RIB.
                match prefix {
                    IpNetwork::V4(prefix) => {
                        self.ipv4.remove(&prefix);
                    }
                    IpNetwork::V6(prefix) => {
                        self.ipv6.remove(&prefix);
                    }
                }
            }
        }
    }

    // Returns the active route that best matches the given destination.
    pub(crate) fn best_match(
        &self,
        addr: IpAddr,
    ) -> Option<(IpNetwork, &Route)> {
        match addr {
            IpAddr::V4(addr) => self
                .ipv4
                .get_lpm(&Ipv4Network::from(addr))
                .map(|(prefix, routes)| (IpNetwork::V4(*prefix), routes)),
            IpAddr::V6(addr) => self
                .ipv6
                .get_lpm(&Ipv6Network::from(addr))
                .map(|(prefix, routes)| (IpNetwork::V6(*prefix), routes)),
        }
        .and_then(|(prefix, routes)| {
            routes
                .values()
                .find(|route| route.flags.contains(RouteFlags::ACTIVE))
                .map(|route| (prefix, route))
        })
    }

    // Returns an iterator over all active routes.
    //
    // Routes are ordered by their prefixes, IPv4 first.
    pub(crate) fn iter_active(
        &self,
    ) -> impl Iterator<Item = (IpNetwork, &'_ Route)> + '_ {
        let ipv4 = self
            .ipv4
            .iter()
            .map(|(prefix, routes)| (IpNetwork::V4(*prefix), routes));
        let ipv6 = self
            .ipv6
            .iter()
            .map(|(prefix, routes)| (IpNetwork::V6(*prefix), routes));
        ipv4.chain(ipv6).filter_map(|(prefix, routes)| {
            routes
                .values()
                .find(|route| route.flags.contains(RouteFlags::ACTIVE))
                .map(|route| (prefix, route))
        })
    }

    // Returns RIB entry associated to the given IP prefix.
    fn prefix_entry(&mut self, prefix: IpNetwork) -> &mut BTreeMap<u32, Route> {
        match prefix {
            IpNetwork::V4(prefix) => self.ipv4.entry(prefix).or_default(),
            IpNetwork::V6(prefix) => self.ipv6.entry(prefix).or_default(),
        }
    }

    // Adds prefix to the update queue.
    fn update_queue_add(&mut self, prefix: IpNetwork) {
        self.update_queue.insert(prefix);
        let _ = self.update_queue_tx.send(());
    }
}

impl Default for Rib {
    fn default() -> Self {
        let (update_queue_tx, update_queue_rx) = mpsc::unbounded_channel();
        Self {
            ipv4: Default::default(),
            ipv6: Default::default(),
            update_queue: Default::default(),
            update_queue_tx,
            update_queue_rx,
        }
    }
}

// ===== helper functions =====

// Pairs up the received nexthop addresses and interface indexes.
fn route_nexthops(msg: &RepRouteInfo) -> BTreeSet<RouteNexthop> {
    msg.nexthops
        .iter()
        .zip_longest(msg.ifindexes.iter())
        .map(|pair| match pair {
            EitherOrBoth::Both(gateway, ifindex) => {
                RouteNexthop::new(Some(*gateway), Some(*ifindex))
            }
            EitherOrBoth::Left(gateway) => {
                RouteNexthop::new(Some(*gateway), None)
            }
            EitherOrBoth::Right(ifindex) => {
                RouteNexthop::new(None, Some(*ifindex))
            }
        })
        .collect()
}
