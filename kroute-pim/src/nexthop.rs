//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use bitflags::bitflags;
use derive_new::new;
use generational_arena::{Arena, Index};
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::error::Error;

// Metric advertised for destinations with no route.
pub const INFINITE_ASSERT_METRIC: u32 = u32::MAX;

pub type NexthopId = Index;

// One resolved forwarding path. Immutable once resolved; changed chains are
// swapped in whole.
#[derive(
    Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Deserialize,
    Serialize, new,
)]
pub struct Nexthop {
    pub gateway: Ipv4Addr,
    pub ifindex: u32,
}

// The resolution snapshot of one cached destination.
#[derive(Clone, Debug, Default, Eq, PartialEq, new)]
pub struct NexthopChain {
    pub nexthops: Vec<Nexthop>,
    pub metric: u32,
    pub preference: u32,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct NexthopFlags: u8 {
        // Entry was never successfully resolved since it was created or
        // since it last went unreferenced.
        const NEW = 0x01;
        // Negative cache entry. The chain is empty.
        const UNREACHABLE = 0x02;
        // Some watcher uses this destination as an RP address.
        const RP = 0x04;
        // Some watcher uses this destination as a source address.
        const SOURCE = 0x08;
    }
}

#[derive(Debug)]
pub struct NexthopEntry {
    pub addr: Ipv4Addr,
    pub flags: NexthopFlags,
    // Shared snapshot. Readers clone the Arc; the scan replaces the whole
    // chain so an in-flight reader never sees a partial update.
    chain: Arc<NexthopChain>,
    refcount: u32,
}

// Cache of resolved nexthops keyed by destination address.
//
// Entries are shared by multiple watchers through explicit reference
// counting. An entry is evicted only when it is unreferenced and was never
// successfully resolved, so transiently idle but reachable entries stay
// warm for reuse.
#[derive(Debug, Default)]
pub struct NexthopCache {
    arena: Arena<NexthopEntry>,
    by_addr: BTreeMap<Ipv4Addr, NexthopId>,
}

// Best-match route resolution, answered by the route manager.
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct ResolvedRoute {
    pub nexthops: Vec<Nexthop>,
    pub metric: u32,
    pub preference: u32,
}

#[async_trait]
pub trait NexthopResolver: Send {
    // Returns `None` when there is no route to the destination.
    async fn resolve(&mut self, addr: Ipv4Addr) -> Option<ResolvedRoute>;
}

// Change notification fired by the periodic scan.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NexthopChange {
    pub addr: Ipv4Addr,
    pub rp: bool,
    pub source: bool,
}

// ===== impl NexthopEntry =====

impl NexthopEntry {
    pub fn is_unreachable(&self) -> bool {
        self.flags.contains(NexthopFlags::UNREACHABLE)
    }

    // Returns the current resolution snapshot.
    pub fn chain(&self) -> &Arc<NexthopChain> {
        &self.chain
    }

    // Returns the preferred forwarding path.
    pub fn first_nexthop(&self) -> Option<&Nexthop> {
        self.chain.nexthops.first()
    }

    pub fn metric(&self) -> u32 {
        if self.is_unreachable() {
            INFINITE_ASSERT_METRIC
        } else {
            self.chain.metric
        }
    }

    pub fn preference(&self) -> u32 {
        if self.is_unreachable() {
            INFINITE_ASSERT_METRIC
        } else {
            self.chain.preference
        }
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }
}

// ===== impl NexthopCache =====

impl NexthopCache {
    // Returns the ID of the cache entry for the given destination.
    pub fn get(&self, addr: Ipv4Addr) -> Option<NexthopId> {
        self.by_addr.get(&addr).copied()
    }

    // Returns a reference to the given cache entry.
    pub fn entry(&self, id: NexthopId) -> Option<&NexthopEntry> {
        self.arena.get(id)
    }

    // Looks up the nexthop information for the given destination.
    //
    // On a cache miss the route manager is queried and the result is
    // inserted, negatively when there is no route. Unreachability is
    // signaled through the entry flags, never by the absence of an entry.
    pub async fn lookup<R>(
        &mut self,
        resolver: &mut R,
        addr: Ipv4Addr,
    ) -> NexthopId
    where
        R: NexthopResolver,
    {
        if let Some(id) = self.get(addr) {
            return id;
        }

        let (chain, flags) = match resolver.resolve(addr).await {
            Some(resolved) if !resolved.nexthops.is_empty() => (
                NexthopChain::new(
                    resolved.nexthops,
                    resolved.metric,
                    resolved.preference,
                ),
                NexthopFlags::NEW,
            ),
            _ => (
                NexthopChain::default(),
                NexthopFlags::NEW | NexthopFlags::UNREACHABLE,
            ),
        };
        Debug::NexthopFill(&addr, &chain, flags).log();

        let entry = NexthopEntry {
            addr,
            flags,
            chain: Arc::new(chain),
            refcount: 0,
        };
        let id = self.arena.insert(entry);
        self.by_addr.insert(addr, id);
        id
    }

    // Registers one more watcher of the given entry.
    pub fn incr_ref(&mut self, id: NexthopId) {
        if let Some(entry) = self.arena.get_mut(id) {
            entry.refcount += 1;
        }
    }

    // Unregisters a watcher of the given entry.
    //
    // The entry is evicted once unreferenced if it was never successfully
    // resolved. A reachable entry is kept for reuse.
    pub fn decr_ref(&mut self, id: NexthopId) {
        let Some(entry) = self.arena.get_mut(id) else {
            return;
        };

        if entry.refcount == 0 {
            // Clamp instead of wrapping. This is a watcher bookkeeping bug.
            Error::NexthopRefcountUnderflow(entry.addr).log();
        } else {
            entry.refcount -= 1;
        }

        if entry.refcount == 0
            && entry
                .flags
                .contains(NexthopFlags::NEW | NexthopFlags::UNREACHABLE)
        {
            self.evict(id);
        }
    }

    // Marks the entry as used to reach an RP.
    pub fn mark_rp(&mut self, id: NexthopId) {
        if let Some(entry) = self.arena.get_mut(id) {
            entry.flags.insert(NexthopFlags::RP);
        }
    }

    // Marks the entry as used to reach a source.
    pub fn mark_source(&mut self, id: NexthopId) {
        if let Some(entry) = self.arena.get_mut(id) {
            entry.flags.insert(NexthopFlags::SOURCE);
        }
    }

    // Re-resolves every cached destination.
    //
    // A changed resolution is swapped in atomically and reported through
    // the returned notifications. On an entry's first successful
    // resolution both the RP and the source notifications fire so late
    // watchers can initialize.
    pub async fn scan<R>(&mut self, resolver: &mut R) -> Vec<NexthopChange>
    where
        R: NexthopResolver,
    {
        Debug::NexthopScan.log();

        let mut changes = vec![];
        let ids = self.by_addr.values().copied().collect::<Vec<_>>();
        for id in ids {
            let Some(entry) = self.arena.get(id) else {
                continue;
            };
            let addr = entry.addr;

            let new_chain = match resolver.resolve(addr).await {
                Some(resolved) if !resolved.nexthops.is_empty() => {
                    NexthopChain::new(
                        resolved.nexthops,
                        resolved.metric,
                        resolved.preference,
                    )
                }
                _ => NexthopChain::default(),
            };
            let reachable = !new_chain.nexthops.is_empty();

            let entry = &mut self.arena[id];
            let was_new = entry.flags.contains(NexthopFlags::NEW);
            let changed = chain_changed(&entry.chain, &new_chain);
            if changed {
                // Replace the whole snapshot. Watchers holding the old Arc
                // keep reading a consistent chain.
                entry.chain = Arc::new(new_chain);
            }

            if reachable {
                entry.flags.remove(NexthopFlags::UNREACHABLE);
                entry.flags.remove(NexthopFlags::NEW);
            } else {
                entry.flags.insert(NexthopFlags::UNREACHABLE);
                if entry.refcount == 0 {
                    // Nobody is watching. Rearm the entry for eviction.
                    entry.flags.insert(NexthopFlags::NEW);
                }
            }

            if changed || (was_new && reachable) {
                let change = NexthopChange {
                    addr,
                    rp: was_new || entry.flags.contains(NexthopFlags::RP),
                    source: was_new
                        || entry.flags.contains(NexthopFlags::SOURCE),
                };
                Debug::NexthopChange(&change).log();
                changes.push(change);
            }
        }

        // Evict unreferenced negative entries.
        let stale = self
            .arena
            .iter()
            .filter(|(_, entry)| {
                entry.refcount == 0
                    && entry.flags.contains(
                        NexthopFlags::NEW | NexthopFlags::UNREACHABLE,
                    )
            })
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        for id in stale {
            self.evict(id);
        }

        changes
    }

    // Returns an iterator visiting all cache entries.
    //
    // Entries are ordered by their destination addresses.
    pub fn iter(&self) -> impl Iterator<Item = &'_ NexthopEntry> + '_ {
        self.by_addr.values().map(|id| &self.arena[*id])
    }

    // Drops every entry regardless of outstanding references.
    //
    // Only valid on shutdown, when no watcher will resolve again.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.by_addr.clear();
    }

    fn evict(&mut self, id: NexthopId) {
        if let Some(entry) = self.arena.remove(id) {
            Debug::NexthopEvict(&entry.addr).log();
            self.by_addr.remove(&entry.addr);
        }
    }
}

// ===== helper functions =====

// Chains that differ only in ordering are not considered changed. Metric
// and preference differences always count.
fn chain_changed(old: &NexthopChain, new: &NexthopChain) -> bool {
    if old.metric != new.metric
        || old.preference != new.preference
        || old.nexthops.len() != new.nexthops.len()
    {
        return true;
    }
    let mut old_nhs = old.nexthops.clone();
    let mut new_nhs = new.nexthops.clone();
    old_nhs.sort();
    new_nhs.sort();
    old_nhs != new_nhs
}

// Resolver backed by a static route table.
#[cfg(feature = "testing")]
#[derive(Debug, Default)]
pub struct StaticResolver {
    routes: BTreeMap<ipnetwork::Ipv4Network, ResolvedRoute>,
}

#[cfg(feature = "testing")]
impl StaticResolver {
    pub fn route_add(
        &mut self,
        prefix: ipnetwork::Ipv4Network,
        route: ResolvedRoute,
    ) {
        self.routes.insert(prefix, route);
    }

    pub fn route_del(&mut self, prefix: &ipnetwork::Ipv4Network) {
        self.routes.remove(prefix);
    }
}

#[cfg(feature = "testing")]
#[async_trait]
impl NexthopResolver for StaticResolver {
    async fn resolve(&mut self, addr: Ipv4Addr) -> Option<ResolvedRoute> {
        self.routes
            .iter()
            .filter(|(prefix, _)| prefix.contains(addr))
            .max_by_key(|(prefix, _)| prefix.prefix())
            .map(|(_, route)| route.clone())
    }
}
