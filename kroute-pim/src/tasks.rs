//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::Duration;

use kroute_utils::UnboundedSender;
use kroute_utils::mcast::VifIndex;
use kroute_utils::task::{IntervalTask, TimeoutTask};

use crate::mrt::MrtKey;

//
// PIM tasks diagram:
//                                 +--------------+
//                                 |  northbound  |
//                                 +--------------+
//                                       | ^
//                                       V |
//                                 +--------------+
//                 nexthop_scan -> |              |
//                 sg_keepalive -> |   instance   |
//               prune_override -> |              |
//                  nbr_timeout -> |              |
//                                 +--------------+
//                                       | ^
//                                       V |
//                                 +--------------+
//                                 |  rep client  |
//                                 +--------------+
//

// PIM inter-task message types.
pub mod messages {
    use super::*;

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use super::*;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            ScanInterval(ScanIntervalMsg),
            KeepaliveExpiry(KeepaliveExpiryMsg),
            PruneOverride(PruneOverrideMsg),
            NbrTimeout(NbrTimeoutMsg),
        }

        #[derive(Debug)]
        pub struct ScanIntervalMsg {}

        #[derive(Debug)]
        pub struct KeepaliveExpiryMsg {
            pub source: Ipv4Addr,
            pub group: Ipv4Addr,
        }

        #[derive(Debug)]
        pub struct PruneOverrideMsg {
            pub key: MrtKey,
            pub vif_index: VifIndex,
        }

        #[derive(Debug)]
        pub struct NbrTimeoutMsg {
            pub vif_index: VifIndex,
            pub addr: Ipv4Addr,
        }
    }
}

// ===== PIM tasks =====

// Periodic nexthop cache scan timer.
pub(crate) fn nexthop_scan(
    interval: Duration,
    scan_intervalp: &UnboundedSender<messages::input::ScanIntervalMsg>,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        let scan_intervalp = scan_intervalp.clone();
        IntervalTask::new(interval, false, move || {
            let scan_intervalp = scan_intervalp.clone();
            async move {
                let msg = messages::input::ScanIntervalMsg {};
                let _ = scan_intervalp.send(msg);
            }
        })
    }
    #[cfg(feature = "testing")]
    {
        let _ = scan_intervalp;
        IntervalTask {}
    }
}

// (S,G) keepalive timeout.
pub(crate) fn sg_keepalive(
    timeout: Duration,
    source: Ipv4Addr,
    group: Ipv4Addr,
    keepalive_expiryp: &UnboundedSender<messages::input::KeepaliveExpiryMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let keepalive_expiryp = keepalive_expiryp.clone();
        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::KeepaliveExpiryMsg { source, group };
            let _ = keepalive_expiryp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        let _ = (timeout, source, group, keepalive_expiryp);
        TimeoutTask {}
    }
}

// Join override window timeout.
pub(crate) fn prune_override(
    timeout: Duration,
    key: MrtKey,
    vif_index: VifIndex,
    prune_overridep: &UnboundedSender<messages::input::PruneOverrideMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let prune_overridep = prune_overridep.clone();
        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::PruneOverrideMsg { key, vif_index };
            let _ = prune_overridep.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        let _ = (timeout, key, vif_index, prune_overridep);
        TimeoutTask {}
    }
}

// Neighbor liveness timeout.
pub(crate) fn nbr_timeout(
    timeout: Duration,
    vif_index: VifIndex,
    addr: Ipv4Addr,
    nbr_timeoutp: &UnboundedSender<messages::input::NbrTimeoutMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let nbr_timeoutp = nbr_timeoutp.clone();
        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::NbrTimeoutMsg { vif_index, addr };
            let _ = nbr_timeoutp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        let _ = (timeout, vif_index, addr, nbr_timeoutp);
        TimeoutTask {}
    }
}
