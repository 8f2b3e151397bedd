//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use kroute_rep::client::messages::RepRouteInfo;
use kroute_utils::mcast::{VifIndex, VifSet};
use tracing::{debug, debug_span};

use crate::mrt::MrtKey;
use crate::nexthop::{NexthopChain, NexthopChange, NexthopFlags};

// PIM debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    NexthopFill(&'a Ipv4Addr, &'a NexthopChain, NexthopFlags),
    NexthopScan,
    NexthopChange(&'a NexthopChange),
    NexthopEvict(&'a Ipv4Addr),
    MrtEntryCreate(&'a MrtKey),
    MrtEntryDelete(&'a MrtKey),
    UpstreamTransition(&'a MrtKey, &'static str, &'static str),
    MfcAdd(&'a Ipv4Addr, &'a Ipv4Addr, VifIndex, &'a VifSet),
    MfcDel(&'a Ipv4Addr, &'a Ipv4Addr),
    VifCreate(&'a str, VifIndex),
    VifDelete(&'a str, VifIndex),
    NeighborUp(VifIndex, &'a Ipv4Addr),
    NeighborDown(VifIndex, &'a Ipv4Addr),
    RedistRx(&'a RepRouteInfo),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::NexthopFill(addr, chain, flags) => {
                debug_span!("nexthop-cache").in_scope(|| {
                    debug!(%addr, ?chain, ?flags, "{}", self);
                });
            }
            Debug::NexthopScan => {
                debug_span!("nexthop-cache").in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::NexthopChange(change) => {
                debug_span!("nexthop-cache").in_scope(|| {
                    debug!(
                        addr = %change.addr,
                        rp = %change.rp,
                        source = %change.source,
                        "{}", self
                    );
                });
            }
            Debug::NexthopEvict(addr) => {
                debug_span!("nexthop-cache").in_scope(|| {
                    debug!(%addr, "{}", self);
                });
            }
            Debug::MrtEntryCreate(key) | Debug::MrtEntryDelete(key) => {
                debug!(entry = %key, "{}", self);
            }
            Debug::UpstreamTransition(key, old_state, new_state) => {
                debug!(entry = %key, %old_state, %new_state, "{}", self);
            }
            Debug::MfcAdd(source, group, iif, olist) => {
                debug!(%source, %group, %iif, %olist, "{}", self);
            }
            Debug::MfcDel(source, group) => {
                debug!(%source, %group, "{}", self);
            }
            Debug::VifCreate(ifname, vif_index)
            | Debug::VifDelete(ifname, vif_index) => {
                debug!(%ifname, %vif_index, "{}", self);
            }
            Debug::NeighborUp(vif_index, addr)
            | Debug::NeighborDown(vif_index, addr) => {
                debug!(%vif_index, %addr, "{}", self);
            }
            Debug::RedistRx(info) => {
                debug!(proto = %info.proto, prefix = %info.prefix, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::NexthopFill(..) => {
                write!(f, "nexthop cache fill")
            }
            Debug::NexthopScan => {
                write!(f, "nexthop cache scan")
            }
            Debug::NexthopChange(..) => {
                write!(f, "nexthop resolution change")
            }
            Debug::NexthopEvict(..) => {
                write!(f, "nexthop cache eviction")
            }
            Debug::MrtEntryCreate(..) => {
                write!(f, "tree entry created")
            }
            Debug::MrtEntryDelete(..) => {
                write!(f, "tree entry deleted")
            }
            Debug::UpstreamTransition(..) => {
                write!(f, "upstream state transition")
            }
            Debug::MfcAdd(..) => {
                write!(f, "adding kernel forwarding entry")
            }
            Debug::MfcDel(..) => {
                write!(f, "removing kernel forwarding entry")
            }
            Debug::VifCreate(..) => {
                write!(f, "VIF created")
            }
            Debug::VifDelete(..) => {
                write!(f, "VIF deleted")
            }
            Debug::NeighborUp(..) => {
                write!(f, "neighbor up")
            }
            Debug::NeighborDown(..) => {
                write!(f, "neighbor down")
            }
            Debug::RedistRx(..) => {
                write!(f, "redistributed route")
            }
        }
    }
}
