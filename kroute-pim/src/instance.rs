//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use kroute_utils::{UnboundedReceiver, UnboundedSender};
use kroute_utils::task::IntervalTask;
use tokio::sync::mpsc;

use crate::events;
use crate::kernel::McastControl;
use crate::mrt::Tib;
use crate::nexthop::{NexthopCache, NexthopResolver};
use crate::tasks;
use crate::tasks::messages::input::{
    KeepaliveExpiryMsg, NbrTimeoutMsg, PruneOverrideMsg, ScanIntervalMsg,
};
use crate::vif::PimVifs;

// Default nexthop cache scan interval, in seconds.
pub const DEFAULT_SCAN_INTERVAL: u16 = 10;

#[derive(Clone, Copy, Debug)]
pub struct InstanceCfg {
    pub scan_interval: u16,
}

// PIM protocol instance.
pub struct Instance<R, M> {
    // Instance configuration.
    pub cfg: InstanceCfg,
    // Nexthop cache.
    pub cache: NexthopCache,
    // Tree information base.
    pub tib: Tib,
    // Multicast-enabled interfaces.
    pub vifs: PimVifs,
    // Unicast route resolution.
    pub resolver: R,
    // Kernel forwarding programming.
    pub mcast: M,
    // Instance input channels (transmission end).
    pub tx: ProtocolInputChannelsTx,
    // Nexthop cache scan task.
    scan_task: Option<IntervalTask>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    pub nexthop_scan: UnboundedSender<ScanIntervalMsg>,
    pub sg_keepalive: UnboundedSender<KeepaliveExpiryMsg>,
    pub prune_override: UnboundedSender<PruneOverrideMsg>,
    pub nbr_timeout: UnboundedSender<NbrTimeoutMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub nexthop_scan: UnboundedReceiver<ScanIntervalMsg>,
    pub sg_keepalive: UnboundedReceiver<KeepaliveExpiryMsg>,
    pub prune_override: UnboundedReceiver<PruneOverrideMsg>,
    pub nbr_timeout: UnboundedReceiver<NbrTimeoutMsg>,
}

// ===== impl InstanceCfg =====

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            scan_interval: DEFAULT_SCAN_INTERVAL,
        }
    }
}

// ===== impl Instance =====

impl<R, M> Instance<R, M>
where
    R: NexthopResolver,
    M: McastControl,
{
    pub fn new(
        cfg: InstanceCfg,
        resolver: R,
        mcast: M,
    ) -> (Instance<R, M>, ProtocolInputChannelsRx) {
        let (nexthop_scan_tx, nexthop_scan_rx) = mpsc::unbounded_channel();
        let (sg_keepalive_tx, sg_keepalive_rx) = mpsc::unbounded_channel();
        let (prune_override_tx, prune_override_rx) =
            mpsc::unbounded_channel();
        let (nbr_timeout_tx, nbr_timeout_rx) = mpsc::unbounded_channel();

        let instance = Instance {
            cfg,
            cache: Default::default(),
            tib: Default::default(),
            vifs: Default::default(),
            resolver,
            mcast,
            tx: ProtocolInputChannelsTx {
                nexthop_scan: nexthop_scan_tx,
                sg_keepalive: sg_keepalive_tx,
                prune_override: prune_override_tx,
                nbr_timeout: nbr_timeout_tx,
            },
            scan_task: None,
        };
        let rx = ProtocolInputChannelsRx {
            nexthop_scan: nexthop_scan_rx,
            sg_keepalive: sg_keepalive_rx,
            prune_override: prune_override_rx,
            nbr_timeout: nbr_timeout_rx,
        };

        (instance, rx)
    }

    // Starts the periodic nexthop cache scan.
    pub fn start(&mut self) {
        let interval = Duration::from_secs(self.cfg.scan_interval.into());
        self.scan_task =
            Some(tasks::nexthop_scan(interval, &self.tx.nexthop_scan));
    }

    // Stops the instance, dropping all timers and cached state.
    pub fn stop(&mut self) {
        self.scan_task = None;
        self.cache.clear();
    }

    // Instance main loop.
    pub async fn run(&mut self, mut rx: ProtocolInputChannelsRx) {
        self.start();

        loop {
            tokio::select! {
                msg = rx.nexthop_scan.recv() => match msg {
                    Some(_) => events::process_nexthop_scan(self).await,
                    None => break,
                },
                msg = rx.sg_keepalive.recv() => match msg {
                    Some(msg) => {
                        events::process_keepalive_expiry(
                            self, msg.source, msg.group,
                        )
                        .await;
                    }
                    None => break,
                },
                msg = rx.prune_override.recv() => match msg {
                    Some(msg) => {
                        events::process_prune_override_expiry(
                            self, msg.key, msg.vif_index,
                        )
                        .await;
                    }
                    None => break,
                },
                msg = rx.nbr_timeout.recv() => match msg {
                    Some(msg) => {
                        events::process_nbr_timeout(
                            self, msg.vif_index, msg.addr,
                        )
                        .await;
                    }
                    None => break,
                },
            }
        }
    }
}
