//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use kroute_utils::mcast::{DEFAULT_TTL_THRESHOLD, MAXVIFS, VifIndex};
use kroute_utils::task::TimeoutTask;

use crate::debug::Debug;
use crate::error::Error;
use crate::kernel::McastControl;

// Protocol timing defaults.
pub const HELLO_PERIOD: u16 = 30;
pub const TRIGGERED_HELLO_DELAY: u16 = 5;
pub const JOIN_PRUNE_PERIOD: u16 = 60;
pub const DEFAULT_DR_PRIORITY: u32 = 1;

// PIM state of one multicast-enabled interface.
#[derive(Debug)]
pub struct PimVif {
    pub ifname: String,
    pub ifindex: u32,
    pub vif_index: VifIndex,
    pub primary_addr: Option<Ipv4Addr>,
    pub ttl_threshold: u8,
    pub cfg: VifCfg,
    // Neighbors learned from Hello processing, keyed by address.
    pub neighbors: BTreeMap<Ipv4Addr, Neighbor>,
}

#[derive(Clone, Debug)]
pub struct VifCfg {
    pub hello_period: u16,
    pub holdtime: u16,
    pub jp_period: u16,
    pub dr_priority: u32,
}

#[derive(Debug)]
pub struct Neighbor {
    pub addr: Ipv4Addr,
    pub dr_priority: u32,
    pub holdtime: u16,
    // Liveness timeout, reset on every Hello.
    pub expiry: Option<TimeoutTask>,
}

#[derive(Debug, Default)]
pub struct PimVifs {
    vifs: BTreeMap<VifIndex, PimVif>,
    by_ifindex: HashMap<u32, VifIndex>,
}

// ===== impl VifCfg =====

impl Default for VifCfg {
    fn default() -> VifCfg {
        VifCfg {
            hello_period: HELLO_PERIOD,
            holdtime: holdtime(HELLO_PERIOD),
            jp_period: JOIN_PRUNE_PERIOD,
            dr_priority: DEFAULT_DR_PRIORITY,
        }
    }
}

// ===== impl PimVif =====

impl PimVif {
    // Elects the designated router among this VIF and its neighbors.
    //
    // Highest DR priority wins, highest address breaks the tie.
    pub fn dr(&self) -> Option<Ipv4Addr> {
        let local = self
            .primary_addr
            .map(|addr| (self.cfg.dr_priority, addr));
        self.neighbors
            .values()
            .map(|nbr| (nbr.dr_priority, nbr.addr))
            .chain(local)
            .max()
            .map(|(_, addr)| addr)
    }
}

// ===== impl PimVifs =====

impl PimVifs {
    // Creates a VIF for the given interface and attaches it to the kernel.
    pub async fn create<M>(
        &mut self,
        mcast: &mut M,
        ifname: String,
        ifindex: u32,
    ) -> Result<VifIndex, Error>
    where
        M: McastControl,
    {
        if let Some(vif_index) = self.by_ifindex.get(&ifindex).copied() {
            return Ok(vif_index);
        }

        // Allocate the first free VIF index.
        let vif_index = (0..MAXVIFS as VifIndex)
            .find(|vif_index| !self.vifs.contains_key(vif_index))
            .ok_or(Error::VifLimitReached)?;

        mcast
            .attach_vif(vif_index, ifindex)
            .await
            .map_err(|error| Error::VifAttach(vif_index, error))?;
        Debug::VifCreate(&ifname, vif_index).log();

        self.vifs.insert(
            vif_index,
            PimVif {
                ifname,
                ifindex,
                vif_index,
                primary_addr: None,
                ttl_threshold: DEFAULT_TTL_THRESHOLD,
                cfg: VifCfg::default(),
                neighbors: Default::default(),
            },
        );
        self.by_ifindex.insert(ifindex, vif_index);
        Ok(vif_index)
    }

    // Destroys the VIF associated with the given interface.
    //
    // Neighbor state and timers die with the VIF.
    pub async fn destroy<M>(&mut self, mcast: &mut M, ifindex: u32)
    where
        M: McastControl,
    {
        let Some(vif_index) = self.by_ifindex.remove(&ifindex) else {
            return;
        };
        let Some(vif) = self.vifs.remove(&vif_index) else {
            return;
        };
        Debug::VifDelete(&vif.ifname, vif_index).log();

        if let Err(error) = mcast.detach_vif(vif_index).await {
            Error::VifDetach(vif_index, error).log();
        }
    }

    pub fn get(&self, vif_index: VifIndex) -> Option<&PimVif> {
        self.vifs.get(&vif_index)
    }

    pub fn get_mut(&mut self, vif_index: VifIndex) -> Option<&mut PimVif> {
        self.vifs.get_mut(&vif_index)
    }

    pub fn get_by_ifindex(&self, ifindex: u32) -> Option<&PimVif> {
        self.by_ifindex
            .get(&ifindex)
            .and_then(|vif_index| self.vifs.get(vif_index))
    }

    // Returns an iterator visiting all VIFs ordered by index.
    pub fn iter(&self) -> impl Iterator<Item = &'_ PimVif> + '_ {
        self.vifs.values()
    }

    // Adds or refreshes a neighbor on the given VIF.
    pub fn neighbor_update(
        &mut self,
        vif_index: VifIndex,
        addr: Ipv4Addr,
        dr_priority: u32,
        holdtime: u16,
        expiry: Option<TimeoutTask>,
    ) {
        let Some(vif) = self.vifs.get_mut(&vif_index) else {
            return;
        };
        let nbr = vif.neighbors.entry(addr).or_insert_with(|| {
            Debug::NeighborUp(vif_index, &addr).log();
            Neighbor {
                addr,
                dr_priority,
                holdtime,
                expiry: None,
            }
        });
        nbr.dr_priority = dr_priority;
        nbr.holdtime = holdtime;
        nbr.expiry = expiry;
    }

    // Removes a neighbor from the given VIF.
    pub fn neighbor_del(&mut self, vif_index: VifIndex, addr: Ipv4Addr) {
        if let Some(vif) = self.vifs.get_mut(&vif_index)
            && vif.neighbors.remove(&addr).is_some()
        {
            Debug::NeighborDown(vif_index, &addr).log();
        }
    }
}

// ===== helper functions =====

// Hello holdtime is 3.5 times the Hello period.
pub const fn holdtime(hello_period: u16) -> u16 {
    hello_period * 7 / 2
}
