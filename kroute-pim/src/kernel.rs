//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use async_trait::async_trait;
use kroute_utils::mcast::{
    DEFAULT_TTL_THRESHOLD, MAXVIFS, SgCounters, VifIndex, VifSet,
};

use crate::vif::PimVifs;

// Kernel multicast forwarding programming.
//
// The platform collaborator maps this onto the OS multicast-routing
// syscalls. The outgoing interfaces of a forwarding entry are given as a
// per-VIF TTL threshold array, zero meaning the VIF is not part of the
// entry.
#[async_trait]
pub trait McastControl: Send {
    async fn add_forwarding_entry(
        &mut self,
        source: Ipv4Addr,
        group: Ipv4Addr,
        iif: VifIndex,
        ttls: [u8; MAXVIFS],
    ) -> Result<(), std::io::Error>;

    async fn remove_forwarding_entry(
        &mut self,
        source: Ipv4Addr,
        group: Ipv4Addr,
        iif: VifIndex,
    ) -> Result<(), std::io::Error>;

    async fn attach_vif(
        &mut self,
        vif_index: VifIndex,
        ifindex: u32,
    ) -> Result<(), std::io::Error>;

    async fn detach_vif(
        &mut self,
        vif_index: VifIndex,
    ) -> Result<(), std::io::Error>;

    async fn sg_counters(
        &mut self,
        source: Ipv4Addr,
        group: Ipv4Addr,
    ) -> Result<SgCounters, std::io::Error>;
}

// Translates a derived outgoing-interface list into the TTL array form the
// kernel expects, using each VIF's configured threshold.
pub fn ttl_array(olist: &VifSet, vifs: &PimVifs) -> [u8; MAXVIFS] {
    let mut ttls = [0; MAXVIFS];
    for vif_index in olist.iter() {
        ttls[vif_index as usize] = vifs
            .get(vif_index)
            .map(|vif| vif.ttl_threshold)
            .unwrap_or(DEFAULT_TTL_THRESHOLD);
    }
    ttls
}

// Multicast control that records the requested operations instead of
// programming a kernel.
#[cfg(feature = "testing")]
#[derive(Debug, Default)]
pub struct RecordingMcast {
    pub log: Vec<McastOperation>,
}

#[cfg(feature = "testing")]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum McastOperation {
    AddEntry {
        source: Ipv4Addr,
        group: Ipv4Addr,
        iif: VifIndex,
        ttls: [u8; MAXVIFS],
    },
    RemoveEntry {
        source: Ipv4Addr,
        group: Ipv4Addr,
        iif: VifIndex,
    },
    AttachVif {
        vif_index: VifIndex,
        ifindex: u32,
    },
    DetachVif {
        vif_index: VifIndex,
    },
}

// ===== impl RecordingMcast =====

#[cfg(feature = "testing")]
#[async_trait]
impl McastControl for RecordingMcast {
    async fn add_forwarding_entry(
        &mut self,
        source: Ipv4Addr,
        group: Ipv4Addr,
        iif: VifIndex,
        ttls: [u8; MAXVIFS],
    ) -> Result<(), std::io::Error> {
        self.log.push(McastOperation::AddEntry {
            source,
            group,
            iif,
            ttls,
        });
        Ok(())
    }

    async fn remove_forwarding_entry(
        &mut self,
        source: Ipv4Addr,
        group: Ipv4Addr,
        iif: VifIndex,
    ) -> Result<(), std::io::Error> {
        self.log
            .push(McastOperation::RemoveEntry { source, group, iif });
        Ok(())
    }

    async fn attach_vif(
        &mut self,
        vif_index: VifIndex,
        ifindex: u32,
    ) -> Result<(), std::io::Error> {
        self.log
            .push(McastOperation::AttachVif { vif_index, ifindex });
        Ok(())
    }

    async fn detach_vif(
        &mut self,
        vif_index: VifIndex,
    ) -> Result<(), std::io::Error> {
        self.log.push(McastOperation::DetachVif { vif_index });
        Ok(())
    }

    async fn sg_counters(
        &mut self,
        _source: Ipv4Addr,
        _group: Ipv4Addr,
    ) -> Result<SgCounters, std::io::Error> {
        Ok(SgCounters::default())
    }
}
