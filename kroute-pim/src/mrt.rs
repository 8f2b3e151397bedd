//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use ipnetwork::Ipv4Network;
use kroute_utils::mcast::{MAXVIFS, VifIndex, VifSet};
use kroute_utils::task::TimeoutTask;

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::ProtocolInputChannelsTx;
use crate::kernel::{McastControl, ttl_array};
use crate::nexthop::{
    NexthopCache, NexthopChange, NexthopId, NexthopResolver,
};
use crate::tasks;
use crate::vif::PimVifs;

// (S,G) keepalive period, in seconds.
pub const KEEPALIVE_PERIOD: u16 = 210;

// Join/prune override interval, in seconds.
pub const JP_OVERRIDE_INTERVAL: u16 = 3;

// Identifies one tree entry in the multicast routing table.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum MrtKey {
    StarStarRp { rp: Ipv4Addr },
    StarG { group: Ipv4Addr },
    Sg { source: Ipv4Addr, group: Ipv4Addr },
    SgRpt { source: Ipv4Addr, group: Ipv4Addr },
}

// Protocol events driving the tree state machines.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MrtEvent {
    JoinRx(VifIndex),
    PruneRx(VifIndex),
    PruneOverrideExpiry(VifIndex),
    LocalMembershipChanged(VifIndex, bool),
    AssertWinnerChanged(VifIndex, bool),
    RpfNeighborChanged,
    KeepaliveExpiry,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UpstreamState {
    #[default]
    NotJoined,
    Joined,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UpstreamRptState {
    #[default]
    NotJoined,
    NotPruned,
    Pruned,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DownstreamState {
    #[default]
    NoInfo,
    Join,
    PrunePending,
    Prune,
}

// Per-VIF downstream join/prune state of one tree entry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DownstreamVifs([DownstreamState; MAXVIFS]);

// RPF information of one tree entry, derived from the nexthop cache.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RpfState {
    pub nexthop: Option<NexthopId>,
    pub neighbor: Option<Ipv4Addr>,
    pub iif: Option<VifIndex>,
}

#[derive(Debug)]
pub struct StarStarRpEntry {
    pub rp: Ipv4Addr,
    pub up: UpstreamState,
    pub downstream: DownstreamVifs,
    pub rpf: RpfState,
}

#[derive(Debug)]
pub struct StarGEntry {
    pub group: Ipv4Addr,
    pub rp: Ipv4Addr,
    pub up: UpstreamState,
    pub downstream: DownstreamVifs,
    pub local: VifSet,
    pub assert_losers: VifSet,
    pub rpf: RpfState,
}

#[derive(Debug)]
pub struct SgEntry {
    pub source: Ipv4Addr,
    pub group: Ipv4Addr,
    pub up: UpstreamState,
    pub downstream: DownstreamVifs,
    pub local: VifSet,
    pub assert_losers: VifSet,
    pub rpf: RpfState,
    // Derived outgoing interface list, refreshed on every resync.
    pub inherited_olist: VifSet,
    pub keepalive: Option<TimeoutTask>,
    // Kernel forwarding entry currently programmed, if any.
    installed: Option<(VifIndex, VifSet)>,
}

#[derive(Debug)]
pub struct SgRptEntry {
    pub source: Ipv4Addr,
    pub group: Ipv4Addr,
    pub rpt_state: UpstreamRptState,
    pub downstream: DownstreamVifs,
    pub inherited_olist: VifSet,
}

// Tree information base.
//
// Holds the four kinds of tree entries plus the static RP configuration.
// Entries are created on demand by join, prune and membership events and
// destroyed once all their inputs are gone.
#[derive(Debug, Default)]
pub struct Tib {
    rp_set: BTreeMap<Ipv4Network, Ipv4Addr>,
    star_star_rp: BTreeMap<Ipv4Addr, StarStarRpEntry>,
    star_g: BTreeMap<Ipv4Addr, StarGEntry>,
    sg: BTreeMap<(Ipv4Addr, Ipv4Addr), SgEntry>,
    sg_rpt: BTreeMap<(Ipv4Addr, Ipv4Addr), SgRptEntry>,
    // Open join override windows, keyed by entry and VIF.
    prune_pending: BTreeMap<(MrtKey, VifIndex), TimeoutTask>,
}

// The per-entry sets the olist derivation draws from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OlistInputs {
    pub star_star_rp_joined: VifSet,
    pub star_g_joined: VifSet,
    pub star_g_local: VifSet,
    pub star_g_lost_assert: VifSet,
    pub sg_rpt_pruned: VifSet,
    pub sg_joined: VifSet,
    pub sg_local: VifSet,
    pub sg_lost_assert: VifSet,
}

// Collaborators the tree state machines act through.
pub struct TibCtx<'a, R, M> {
    pub cache: &'a mut NexthopCache,
    pub resolver: &'a mut R,
    pub vifs: &'a PimVifs,
    pub mcast: &'a mut M,
    pub tx: &'a ProtocolInputChannelsTx,
}

// ===== impl MrtKey =====

impl std::fmt::Display for MrtKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MrtKey::StarStarRp { rp } => {
                write!(f, "(*,*,RP={})", rp)
            }
            MrtKey::StarG { group } => {
                write!(f, "(*,{})", group)
            }
            MrtKey::Sg { source, group } => {
                write!(f, "({},{})", source, group)
            }
            MrtKey::SgRpt { source, group } => {
                write!(f, "({},{},rpt)", source, group)
            }
        }
    }
}

// ===== impl UpstreamState =====

impl UpstreamState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            UpstreamState::NotJoined => "not-joined",
            UpstreamState::Joined => "joined",
        }
    }
}

// ===== impl UpstreamRptState =====

impl UpstreamRptState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            UpstreamRptState::NotJoined => "rpt-not-joined",
            UpstreamRptState::NotPruned => "not-pruned",
            UpstreamRptState::Pruned => "pruned",
        }
    }
}

// ===== impl DownstreamVifs =====

impl DownstreamVifs {
    pub fn get(&self, vif: VifIndex) -> DownstreamState {
        self.0[vif as usize]
    }

    pub fn set(&mut self, vif: VifIndex, state: DownstreamState) {
        self.0[vif as usize] = state;
    }

    // VIFs with downstream receivers.
    pub fn joined(&self) -> VifSet {
        (0..MAXVIFS as VifIndex)
            .filter(|vif| {
                matches!(
                    self.0[*vif as usize],
                    DownstreamState::Join | DownstreamState::PrunePending
                )
            })
            .collect()
    }

    // VIFs that asked not to receive this tree. A prune held in its
    // override window does not count until the window closes.
    pub fn pruned(&self) -> VifSet {
        (0..MAXVIFS as VifIndex)
            .filter(|vif| self.0[*vif as usize] == DownstreamState::Prune)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0
            .iter()
            .all(|state| *state == DownstreamState::NoInfo)
    }
}

// ===== impl Tib =====

impl Tib {
    // Adds a static group-to-RP mapping.
    pub fn rp_add(&mut self, prefix: Ipv4Network, rp: Ipv4Addr) {
        self.rp_set.insert(prefix, rp);
    }

    pub fn rp_del(&mut self, prefix: &Ipv4Network) {
        self.rp_set.remove(prefix);
    }

    // Returns the RP responsible for the given group, using the most
    // specific matching group range.
    pub fn rp_for_group(&self, group: Ipv4Addr) -> Option<Ipv4Addr> {
        self.rp_set
            .iter()
            .filter(|(prefix, _)| prefix.contains(group))
            .max_by_key(|(prefix, _)| prefix.prefix())
            .map(|(_, rp)| *rp)
    }

    pub fn star_star_rp_entry(
        &self,
        rp: Ipv4Addr,
    ) -> Option<&StarStarRpEntry> {
        self.star_star_rp.get(&rp)
    }

    pub fn star_g_entry(&self, group: Ipv4Addr) -> Option<&StarGEntry> {
        self.star_g.get(&group)
    }

    pub fn sg_entry(
        &self,
        source: Ipv4Addr,
        group: Ipv4Addr,
    ) -> Option<&SgEntry> {
        self.sg.get(&(source, group))
    }

    pub fn sg_rpt_entry(
        &self,
        source: Ipv4Addr,
        group: Ipv4Addr,
    ) -> Option<&SgRptEntry> {
        self.sg_rpt.get(&(source, group))
    }

    // Assembles the inputs of the olist derivation for the given flow from
    // all related tree entries.
    pub fn olist_inputs(
        &self,
        source: Ipv4Addr,
        group: Ipv4Addr,
    ) -> OlistInputs {
        let mut inputs = OlistInputs::default();

        if let Some(rp) = self.rp_for_group(group)
            && let Some(entry) = self.star_star_rp.get(&rp)
        {
            inputs.star_star_rp_joined = entry.downstream.joined();
        }
        if let Some(entry) = self.star_g.get(&group) {
            inputs.star_g_joined = entry.downstream.joined();
            inputs.star_g_local = entry.local;
            inputs.star_g_lost_assert = entry.assert_losers;
        }
        if let Some(entry) = self.sg_rpt.get(&(source, group)) {
            inputs.sg_rpt_pruned = entry.downstream.pruned();
        }
        if let Some(entry) = self.sg.get(&(source, group)) {
            inputs.sg_joined = entry.downstream.joined();
            inputs.sg_local = entry.local;
            inputs.sg_lost_assert = entry.assert_losers;
        }

        inputs
    }

    // Single entry point for all protocol events. Applies the event to the
    // addressed tree entry, runs the upstream state machines and resyncs
    // the kernel forwarding cache.
    pub async fn process_event<R, M>(
        &mut self,
        ctx: &mut TibCtx<'_, R, M>,
        key: MrtKey,
        event: MrtEvent,
    ) where
        R: NexthopResolver,
        M: McastControl,
    {
        match key {
            MrtKey::StarStarRp { rp } => {
                self.star_star_rp_event(ctx, rp, event).await;
            }
            MrtKey::StarG { group } => {
                self.star_g_event(ctx, group, event).await;
            }
            MrtKey::Sg { source, group } => {
                self.sg_event(ctx, source, group, event).await;
            }
            MrtKey::SgRpt { source, group } => {
                self.sg_rpt_event(ctx, source, group, event);
            }
        }

        self.sync(ctx).await;
    }

    // Applies the nexthop cache scan results to every tree entry whose RPF
    // destination was affected.
    pub async fn process_nexthop_change<R, M>(
        &mut self,
        ctx: &mut TibCtx<'_, R, M>,
        changes: &[NexthopChange],
    ) where
        R: NexthopResolver,
        M: McastControl,
    {
        for change in changes {
            if change.rp {
                for entry in self
                    .star_star_rp
                    .values_mut()
                    .filter(|entry| entry.rp == change.addr)
                {
                    rpf_refresh(ctx.cache, ctx.vifs, &mut entry.rpf);
                    let desired = !entry.downstream.joined().is_empty()
                        && entry.rpf.neighbor.is_some();
                    upstream_step(
                        &MrtKey::StarStarRp { rp: entry.rp },
                        &mut entry.up,
                        desired,
                    );
                }
                for entry in self
                    .star_g
                    .values_mut()
                    .filter(|entry| entry.rp == change.addr)
                {
                    rpf_refresh(ctx.cache, ctx.vifs, &mut entry.rpf);
                    let immediate = (entry.downstream.joined() | entry.local)
                        - entry.assert_losers;
                    let desired = !immediate.is_empty()
                        && entry.rpf.neighbor.is_some();
                    upstream_step(
                        &MrtKey::StarG { group: entry.group },
                        &mut entry.up,
                        desired,
                    );
                }
            }
            if change.source {
                let keys = self
                    .sg
                    .keys()
                    .filter(|(source, _)| *source == change.addr)
                    .copied()
                    .collect::<Vec<_>>();
                for (source, group) in keys {
                    if let Some(entry) = self.sg.get_mut(&(source, group)) {
                        rpf_refresh(ctx.cache, ctx.vifs, &mut entry.rpf);
                    }
                    self.sg_upstream_step(source, group);
                }
            }
        }

        self.sync(ctx).await;
    }

    // Handles the removal of a VIF. Downstream, membership and assert
    // state bound to the VIF is dropped and RPF interfaces are recomputed.
    pub async fn process_vif_down<R, M>(
        &mut self,
        ctx: &mut TibCtx<'_, R, M>,
        vif_index: VifIndex,
    ) where
        R: NexthopResolver,
        M: McastControl,
    {
        self.prune_pending.retain(|(_, vif), _| *vif != vif_index);
        for entry in self.star_star_rp.values_mut() {
            entry.downstream.set(vif_index, DownstreamState::NoInfo);
            rpf_refresh(ctx.cache, ctx.vifs, &mut entry.rpf);
            let desired = !entry.downstream.joined().is_empty()
                && entry.rpf.neighbor.is_some();
            upstream_step(
                &MrtKey::StarStarRp { rp: entry.rp },
                &mut entry.up,
                desired,
            );
        }
        for entry in self.star_g.values_mut() {
            entry.downstream.set(vif_index, DownstreamState::NoInfo);
            entry.local.remove(vif_index);
            entry.assert_losers.remove(vif_index);
            rpf_refresh(ctx.cache, ctx.vifs, &mut entry.rpf);
            let immediate = (entry.downstream.joined() | entry.local)
                - entry.assert_losers;
            let desired =
                !immediate.is_empty() && entry.rpf.neighbor.is_some();
            upstream_step(
                &MrtKey::StarG { group: entry.group },
                &mut entry.up,
                desired,
            );
        }
        for entry in self.sg_rpt.values_mut() {
            entry.downstream.set(vif_index, DownstreamState::NoInfo);
        }
        let keys = self.sg.keys().copied().collect::<Vec<_>>();
        for (source, group) in keys {
            if let Some(entry) = self.sg.get_mut(&(source, group)) {
                entry.downstream.set(vif_index, DownstreamState::NoInfo);
                entry.local.remove(vif_index);
                entry.assert_losers.remove(vif_index);
                rpf_refresh(ctx.cache, ctx.vifs, &mut entry.rpf);
            }
            self.sg_upstream_step(source, group);
        }

        self.sync(ctx).await;
    }

    // Handles multicast data arrival for a flow, creating or refreshing
    // the (S,G) entry and its keepalive.
    pub async fn process_sg_data<R, M>(
        &mut self,
        ctx: &mut TibCtx<'_, R, M>,
        source: Ipv4Addr,
        group: Ipv4Addr,
        keepalive: Option<TimeoutTask>,
    ) where
        R: NexthopResolver,
        M: McastControl,
    {
        if !self.sg.contains_key(&(source, group)) {
            let rpf = rpf_lookup(ctx, source, false).await;
            let key = MrtKey::Sg { source, group };
            Debug::MrtEntryCreate(&key).log();
            self.sg.insert(
                (source, group),
                SgEntry {
                    source,
                    group,
                    up: Default::default(),
                    downstream: Default::default(),
                    local: VifSet::empty(),
                    assert_losers: VifSet::empty(),
                    rpf,
                    inherited_olist: VifSet::empty(),
                    keepalive: None,
                    installed: None,
                },
            );
        }
        if let Some(entry) = self.sg.get_mut(&(source, group)) {
            entry.keepalive = keepalive;
        }
        self.sg_upstream_step(source, group);

        self.sync(ctx).await;
    }

    async fn star_star_rp_event<R, M>(
        &mut self,
        ctx: &mut TibCtx<'_, R, M>,
        rp: Ipv4Addr,
        event: MrtEvent,
    ) where
        R: NexthopResolver,
        M: McastControl,
    {
        if !self.star_star_rp.contains_key(&rp) {
            if !matches!(event, MrtEvent::JoinRx(_)) {
                return;
            }
            let rpf = rpf_lookup(ctx, rp, true).await;
            let key = MrtKey::StarStarRp { rp };
            Debug::MrtEntryCreate(&key).log();
            self.star_star_rp.insert(
                rp,
                StarStarRpEntry {
                    rp,
                    up: Default::default(),
                    downstream: Default::default(),
                    rpf,
                },
            );
        }
        let overridable = self
            .star_star_rp
            .get(&rp)
            .is_some_and(|entry| prune_overridable(&entry.downstream, event));
        let key = MrtKey::StarStarRp { rp };
        let hold = self.prune_override_step(ctx, key, event, overridable);
        let Some(entry) = self.star_star_rp.get_mut(&rp) else {
            return;
        };

        match event {
            MrtEvent::JoinRx(vif) => {
                entry.downstream.set(vif, DownstreamState::Join);
            }
            MrtEvent::PruneRx(vif) => {
                let state = if hold {
                    DownstreamState::PrunePending
                } else {
                    DownstreamState::NoInfo
                };
                entry.downstream.set(vif, state);
            }
            MrtEvent::PruneOverrideExpiry(vif) => {
                if entry.downstream.get(vif) == DownstreamState::PrunePending
                {
                    entry.downstream.set(vif, DownstreamState::NoInfo);
                }
            }
            MrtEvent::RpfNeighborChanged => {
                rpf_refresh(ctx.cache, ctx.vifs, &mut entry.rpf);
            }
            _ => (),
        }

        let desired = !entry.downstream.joined().is_empty()
            && entry.rpf.neighbor.is_some();
        upstream_step(&MrtKey::StarStarRp { rp }, &mut entry.up, desired);
    }

    async fn star_g_event<R, M>(
        &mut self,
        ctx: &mut TibCtx<'_, R, M>,
        group: Ipv4Addr,
        event: MrtEvent,
    ) where
        R: NexthopResolver,
        M: McastControl,
    {
        if !self.star_g.contains_key(&group) {
            let create = matches!(
                event,
                MrtEvent::JoinRx(_)
                    | MrtEvent::LocalMembershipChanged(_, true)
            );
            if !create {
                return;
            }
            let Some(rp) = self.rp_for_group(group) else {
                Error::NoRpForGroup(group).log();
                return;
            };
            let rpf = rpf_lookup(ctx, rp, true).await;
            let key = MrtKey::StarG { group };
            Debug::MrtEntryCreate(&key).log();
            self.star_g.insert(
                group,
                StarGEntry {
                    group,
                    rp,
                    up: Default::default(),
                    downstream: Default::default(),
                    local: VifSet::empty(),
                    assert_losers: VifSet::empty(),
                    rpf,
                },
            );
        }
        let overridable = self
            .star_g
            .get(&group)
            .is_some_and(|entry| prune_overridable(&entry.downstream, event));
        let key = MrtKey::StarG { group };
        let hold = self.prune_override_step(ctx, key, event, overridable);
        let Some(entry) = self.star_g.get_mut(&group) else {
            return;
        };

        match event {
            MrtEvent::JoinRx(vif) => {
                entry.downstream.set(vif, DownstreamState::Join);
            }
            MrtEvent::PruneRx(vif) => {
                let state = if hold {
                    DownstreamState::PrunePending
                } else {
                    DownstreamState::NoInfo
                };
                entry.downstream.set(vif, state);
            }
            MrtEvent::PruneOverrideExpiry(vif) => {
                if entry.downstream.get(vif) == DownstreamState::PrunePending
                {
                    entry.downstream.set(vif, DownstreamState::NoInfo);
                }
            }
            MrtEvent::LocalMembershipChanged(vif, include) => {
                entry.local.set(vif, include);
            }
            MrtEvent::AssertWinnerChanged(vif, lost) => {
                entry.assert_losers.set(vif, lost);
            }
            MrtEvent::RpfNeighborChanged => {
                rpf_refresh(ctx.cache, ctx.vifs, &mut entry.rpf);
            }
            MrtEvent::KeepaliveExpiry => (),
        }

        let immediate =
            (entry.downstream.joined() | entry.local) - entry.assert_losers;
        let desired = !immediate.is_empty() && entry.rpf.neighbor.is_some();
        upstream_step(&MrtKey::StarG { group }, &mut entry.up, desired);
    }

    async fn sg_event<R, M>(
        &mut self,
        ctx: &mut TibCtx<'_, R, M>,
        source: Ipv4Addr,
        group: Ipv4Addr,
        event: MrtEvent,
    ) where
        R: NexthopResolver,
        M: McastControl,
    {
        if !self.sg.contains_key(&(source, group)) {
            let create = matches!(
                event,
                MrtEvent::JoinRx(_)
                    | MrtEvent::LocalMembershipChanged(_, true)
            );
            if !create {
                return;
            }
            let rpf = rpf_lookup(ctx, source, false).await;
            let key = MrtKey::Sg { source, group };
            Debug::MrtEntryCreate(&key).log();
            self.sg.insert(
                (source, group),
                SgEntry {
                    source,
                    group,
                    up: Default::default(),
                    downstream: Default::default(),
                    local: VifSet::empty(),
                    assert_losers: VifSet::empty(),
                    rpf,
                    inherited_olist: VifSet::empty(),
                    keepalive: None,
                    installed: None,
                },
            );
        }
        let overridable = self
            .sg
            .get(&(source, group))
            .is_some_and(|entry| prune_overridable(&entry.downstream, event));
        let key = MrtKey::Sg { source, group };
        let hold = self.prune_override_step(ctx, key, event, overridable);
        if let Some(entry) = self.sg.get_mut(&(source, group)) {
            match event {
                MrtEvent::JoinRx(vif) => {
                    entry.downstream.set(vif, DownstreamState::Join);
                }
                MrtEvent::PruneRx(vif) => {
                    let state = if hold {
                        DownstreamState::PrunePending
                    } else {
                        DownstreamState::NoInfo
                    };
                    entry.downstream.set(vif, state);
                }
                MrtEvent::PruneOverrideExpiry(vif) => {
                    if entry.downstream.get(vif)
                        == DownstreamState::PrunePending
                    {
                        entry.downstream.set(vif, DownstreamState::NoInfo);
                    }
                }
                MrtEvent::LocalMembershipChanged(vif, include) => {
                    entry.local.set(vif, include);
                }
                MrtEvent::AssertWinnerChanged(vif, lost) => {
                    entry.assert_losers.set(vif, lost);
                }
                MrtEvent::RpfNeighborChanged => {
                    rpf_refresh(ctx.cache, ctx.vifs, &mut entry.rpf);
                }
                MrtEvent::KeepaliveExpiry => {
                    entry.keepalive = None;
                }
            }
        }

        self.sg_upstream_step(source, group);
    }

    fn sg_rpt_event<R, M>(
        &mut self,
        ctx: &TibCtx<'_, R, M>,
        source: Ipv4Addr,
        group: Ipv4Addr,
        event: MrtEvent,
    ) {
        if !self.sg_rpt.contains_key(&(source, group)) {
            if !matches!(event, MrtEvent::PruneRx(_)) {
                return;
            }
            let key = MrtKey::SgRpt { source, group };
            Debug::MrtEntryCreate(&key).log();
            self.sg_rpt.insert(
                (source, group),
                SgRptEntry {
                    source,
                    group,
                    rpt_state: Default::default(),
                    downstream: Default::default(),
                    inherited_olist: VifSet::empty(),
                },
            );
        }
        // A repeated prune on an already pruned VIF is a refresh, not a
        // candidate for the override window.
        let overridable = match event {
            MrtEvent::PruneRx(vif) => {
                self.sg_rpt.get(&(source, group)).is_some_and(|entry| {
                    entry.downstream.get(vif) != DownstreamState::Prune
                })
            }
            _ => false,
        };
        let key = MrtKey::SgRpt { source, group };
        let hold = self.prune_override_step(ctx, key, event, overridable);
        if let Some(entry) = self.sg_rpt.get_mut(&(source, group)) {
            match event {
                // An RPT join cancels the source-specific prune.
                MrtEvent::JoinRx(vif) => {
                    entry.downstream.set(vif, DownstreamState::NoInfo);
                }
                MrtEvent::PruneRx(vif) => {
                    let state = if hold {
                        DownstreamState::PrunePending
                    } else {
                        DownstreamState::Prune
                    };
                    entry.downstream.set(vif, state);
                }
                MrtEvent::PruneOverrideExpiry(vif) => {
                    if entry.downstream.get(vif)
                        == DownstreamState::PrunePending
                    {
                        entry.downstream.set(vif, DownstreamState::Prune);
                    }
                }
                _ => (),
            }
        }

        self.sg_rpt_upstream_step(source, group);
    }

    // Rederives the (S,G) olist and runs the upstream state machine.
    fn sg_upstream_step(&mut self, source: Ipv4Addr, group: Ipv4Addr) {
        let inputs = self.olist_inputs(source, group);
        let olist = inherited_olist_sg(&inputs);
        if let Some(entry) = self.sg.get_mut(&(source, group)) {
            entry.inherited_olist = olist;
            let desired =
                !olist.is_empty() && entry.rpf.neighbor.is_some();
            upstream_step(
                &MrtKey::Sg { source, group },
                &mut entry.up,
                desired,
            );
        }
        self.sg_rpt_upstream_step(source, group);
    }

    // Rederives the (S,G,rpt) olist and runs the RPT prune state machine.
    fn sg_rpt_upstream_step(&mut self, source: Ipv4Addr, group: Ipv4Addr) {
        let inputs = self.olist_inputs(source, group);
        let inherited = inherited_olist_sg_rpt(&inputs);
        let rpt_joined = self
            .star_g
            .get(&group)
            .map(|entry| entry.up == UpstreamState::Joined)
            .unwrap_or(false);
        if let Some(entry) = self.sg_rpt.get_mut(&(source, group)) {
            entry.inherited_olist = inherited;
            let prune_desired = rpt_joined && inherited.is_empty();
            let new_state =
                upstream_rpt_fsm(entry.rpt_state, rpt_joined, prune_desired);
            if new_state != entry.rpt_state {
                Debug::UpstreamTransition(
                    &MrtKey::SgRpt { source, group },
                    entry.rpt_state.as_str(),
                    new_state.as_str(),
                )
                .log();
                entry.rpt_state = new_state;
            }
        }
    }

    // Join override bookkeeping. A join or window expiry closes any open
    // window on its VIF. An overridable prune on a VIF with other
    // downstream routers opens a window instead of taking effect at once,
    // in which case true is returned.
    fn prune_override_step<R, M>(
        &mut self,
        ctx: &TibCtx<'_, R, M>,
        key: MrtKey,
        event: MrtEvent,
        overridable: bool,
    ) -> bool {
        match event {
            MrtEvent::JoinRx(vif) | MrtEvent::PruneOverrideExpiry(vif) => {
                self.prune_pending.remove(&(key, vif));
                false
            }
            MrtEvent::PruneRx(vif) if overridable => {
                let hold = ctx
                    .vifs
                    .get(vif)
                    .is_some_and(|pvif| pvif.neighbors.len() > 1);
                if hold {
                    let task = tasks::prune_override(
                        Duration::from_secs(JP_OVERRIDE_INTERVAL.into()),
                        key,
                        vif,
                        &ctx.tx.prune_override,
                    );
                    self.prune_pending.insert((key, vif), task);
                }
                hold
            }
            _ => false,
        }
    }

    // Resyncs the kernel forwarding cache with the derived olists and
    // destroys entries whose inputs are all gone.
    async fn sync<R, M>(&mut self, ctx: &mut TibCtx<'_, R, M>)
    where
        R: NexthopResolver,
        M: McastControl,
    {
        let keys = self.sg.keys().copied().collect::<Vec<_>>();
        for (source, group) in keys {
            let inputs = self.olist_inputs(source, group);
            let olist = inherited_olist_sg(&inputs);
            let Some(entry) = self.sg.get_mut(&(source, group)) else {
                continue;
            };
            entry.inherited_olist = olist;

            // With no usable RPF interface the entry stays out of the
            // kernel, so the flow cannot be blackholed into a stale VIF.
            let desired = entry
                .rpf
                .iif
                .map(|iif| {
                    let mut olist = olist;
                    olist.remove(iif);
                    (iif, olist)
                })
                .filter(|(_, olist)| !olist.is_empty());
            if entry.installed == desired {
                continue;
            }

            // Remove the stale kernel entry when the incoming interface
            // changed or forwarding is no longer desired.
            if let Some((old_iif, _)) = entry.installed
                && desired.is_none_or(|(iif, _)| iif != old_iif)
            {
                Debug::MfcDel(&source, &group).log();
                if let Err(error) = ctx
                    .mcast
                    .remove_forwarding_entry(source, group, old_iif)
                    .await
                {
                    Error::MfcDel(source, group, error).log();
                }
                entry.installed = None;
            }

            if let Some((iif, olist)) = desired {
                Debug::MfcAdd(&source, &group, iif, &olist).log();
                match ctx
                    .mcast
                    .add_forwarding_entry(
                        source,
                        group,
                        iif,
                        ttl_array(&olist, ctx.vifs),
                    )
                    .await
                {
                    Ok(()) => entry.installed = desired,
                    Err(error) => {
                        Error::MfcAdd(source, group, error).log();
                        entry.installed = None;
                    }
                }
            }
        }

        // Refresh the derived (S,G,rpt) olists too.
        let keys = self.sg_rpt.keys().copied().collect::<Vec<_>>();
        for (source, group) in keys {
            let inputs = self.olist_inputs(source, group);
            let inherited = inherited_olist_sg_rpt(&inputs);
            if let Some(entry) = self.sg_rpt.get_mut(&(source, group)) {
                entry.inherited_olist = inherited;
            }
        }

        self.destroy_idle_entries(ctx).await;
    }

    async fn destroy_idle_entries<R, M>(&mut self, ctx: &mut TibCtx<'_, R, M>)
    where
        R: NexthopResolver,
        M: McastControl,
    {
        let doomed = self
            .sg_rpt
            .iter()
            .filter(|(_, entry)| entry.downstream.is_empty())
            .map(|(key, _)| *key)
            .collect::<Vec<_>>();
        for (source, group) in doomed {
            self.sg_rpt.remove(&(source, group));
            Debug::MrtEntryDelete(&MrtKey::SgRpt { source, group }).log();
        }

        let doomed = self
            .sg
            .iter()
            .filter(|(_, entry)| {
                entry.downstream.is_empty()
                    && entry.local.is_empty()
                    && entry.keepalive.is_none()
            })
            .map(|(key, _)| *key)
            .collect::<Vec<_>>();
        for (source, group) in doomed {
            if let Some(entry) = self.sg.remove(&(source, group)) {
                Debug::MrtEntryDelete(&MrtKey::Sg { source, group }).log();
                if let Some((iif, _)) = entry.installed {
                    Debug::MfcDel(&source, &group).log();
                    if let Err(error) = ctx
                        .mcast
                        .remove_forwarding_entry(source, group, iif)
                        .await
                    {
                        Error::MfcDel(source, group, error).log();
                    }
                }
                if let Some(id) = entry.rpf.nexthop {
                    ctx.cache.decr_ref(id);
                }
            }
        }

        let doomed = self
            .star_g
            .iter()
            .filter(|(_, entry)| {
                entry.downstream.is_empty() && entry.local.is_empty()
            })
            .map(|(group, _)| *group)
            .collect::<Vec<_>>();
        for group in doomed {
            if let Some(entry) = self.star_g.remove(&group) {
                Debug::MrtEntryDelete(&MrtKey::StarG { group }).log();
                if let Some(id) = entry.rpf.nexthop {
                    ctx.cache.decr_ref(id);
                }
            }
        }

        let doomed = self
            .star_star_rp
            .iter()
            .filter(|(_, entry)| entry.downstream.is_empty())
            .map(|(rp, _)| *rp)
            .collect::<Vec<_>>();
        for rp in doomed {
            if let Some(entry) = self.star_star_rp.remove(&rp) {
                Debug::MrtEntryDelete(&MrtKey::StarStarRp { rp }).log();
                if let Some(id) = entry.rpf.nexthop {
                    ctx.cache.decr_ref(id);
                }
            }
        }
    }
}

// ===== impl SgEntry =====

impl SgEntry {
    // Kernel forwarding entry currently programmed for this flow.
    pub fn installed(&self) -> Option<(VifIndex, VifSet)> {
        self.installed
    }
}

// ===== global functions =====

// Derives the outgoing interface list a flow inherits from the shared
// tree. The derivation is a pure function of its inputs.
pub fn inherited_olist_sg_rpt(inputs: &OlistInputs) -> VifSet {
    ((inputs.star_star_rp_joined | inputs.star_g_joined)
        - inputs.sg_rpt_pruned
        | inputs.star_g_local)
        - inputs.star_g_lost_assert
}

// Derives the effective outgoing interface list of a source tree,
// layering the source-specific state on top of the shared tree.
pub fn inherited_olist_sg(inputs: &OlistInputs) -> VifSet {
    (inherited_olist_sg_rpt(inputs) | inputs.sg_joined | inputs.sg_local)
        - inputs.sg_lost_assert
}

// Upstream join state machine shared by the (*,*,RP), (*,G) and (S,G)
// entries.
pub fn upstream_fsm(
    state: UpstreamState,
    join_desired: bool,
) -> UpstreamState {
    match (state, join_desired) {
        (UpstreamState::NotJoined, true) => UpstreamState::Joined,
        (UpstreamState::Joined, false) => UpstreamState::NotJoined,
        (state, _) => state,
    }
}

// Upstream (S,G,rpt) prune state machine. It only has meaning while the
// router is joined to the group's shared tree.
pub fn upstream_rpt_fsm(
    state: UpstreamRptState,
    rpt_joined: bool,
    prune_desired: bool,
) -> UpstreamRptState {
    if !rpt_joined {
        return UpstreamRptState::NotJoined;
    }
    match (state, prune_desired) {
        (UpstreamRptState::NotJoined, true) => UpstreamRptState::Pruned,
        (UpstreamRptState::NotJoined, false) => UpstreamRptState::NotPruned,
        (UpstreamRptState::NotPruned, true) => UpstreamRptState::Pruned,
        (UpstreamRptState::Pruned, false) => UpstreamRptState::NotPruned,
        (state, _) => state,
    }
}

// ===== helper functions =====

// Whether a prune carried by the event targets a VIF that is currently
// forwarding, making it eligible for the join override window.
fn prune_overridable(downstream: &DownstreamVifs, event: MrtEvent) -> bool {
    match event {
        MrtEvent::PruneRx(vif) => matches!(
            downstream.get(vif),
            DownstreamState::Join | DownstreamState::PrunePending
        ),
        _ => false,
    }
}

fn upstream_step(key: &MrtKey, state: &mut UpstreamState, desired: bool) {
    let new_state = upstream_fsm(*state, desired);
    if new_state != *state {
        Debug::UpstreamTransition(key, state.as_str(), new_state.as_str())
            .log();
        *state = new_state;
    }
}

// Resolves the RPF destination of a new tree entry and takes a reference
// on the cache entry.
async fn rpf_lookup<R, M>(
    ctx: &mut TibCtx<'_, R, M>,
    addr: Ipv4Addr,
    rp: bool,
) -> RpfState
where
    R: NexthopResolver,
    M: McastControl,
{
    let id = ctx.cache.lookup(ctx.resolver, addr).await;
    ctx.cache.incr_ref(id);
    if rp {
        ctx.cache.mark_rp(id);
    } else {
        ctx.cache.mark_source(id);
    }

    let mut rpf = RpfState {
        nexthop: Some(id),
        neighbor: None,
        iif: None,
    };
    rpf_refresh(ctx.cache, ctx.vifs, &mut rpf);
    rpf
}

// Recomputes the RPF neighbor and incoming interface from the current
// resolution snapshot.
fn rpf_refresh(
    cache: &NexthopCache,
    vifs: &PimVifs,
    rpf: &mut RpfState,
) -> bool {
    let (neighbor, iif) = rpf
        .nexthop
        .and_then(|id| cache.entry(id))
        .filter(|entry| !entry.is_unreachable())
        .and_then(|entry| entry.first_nexthop().copied())
        .map(|nexthop| {
            (
                Some(nexthop.gateway),
                vifs.get_by_ifindex(nexthop.ifindex)
                    .map(|vif| vif.vif_index),
            )
        })
        .unwrap_or((None, None));

    let changed = rpf.neighbor != neighbor || rpf.iif != iif;
    rpf.neighbor = neighbor;
    rpf.iif = iif;
    changed
}
