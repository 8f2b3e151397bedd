//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::Duration;

use kroute_utils::mcast::VifIndex;

use crate::instance::Instance;
use crate::kernel::McastControl;
use crate::mrt::{KEEPALIVE_PERIOD, MrtEvent, MrtKey, TibCtx};
use crate::nexthop::NexthopResolver;
use crate::tasks;

// Splits the instance into the collaborators the tree state machines
// operate on, leaving the TIB itself free to borrow.
macro_rules! tib_ctx {
    ($instance:expr) => {
        TibCtx {
            cache: &mut $instance.cache,
            resolver: &mut $instance.resolver,
            vifs: &$instance.vifs,
            mcast: &mut $instance.mcast,
            tx: &$instance.tx,
        }
    };
}

// ===== Nexthop cache scan interval =====

pub async fn process_nexthop_scan<R, M>(instance: &mut Instance<R, M>)
where
    R: NexthopResolver,
    M: McastControl,
{
    let changes = instance.cache.scan(&mut instance.resolver).await;
    if changes.is_empty() {
        return;
    }

    let mut ctx = tib_ctx!(instance);
    instance.tib.process_nexthop_change(&mut ctx, &changes).await;
}

// ===== Join/Prune messages =====

pub async fn process_join_rx<R, M>(
    instance: &mut Instance<R, M>,
    key: MrtKey,
    vif_index: VifIndex,
) where
    R: NexthopResolver,
    M: McastControl,
{
    let mut ctx = tib_ctx!(instance);
    instance
        .tib
        .process_event(&mut ctx, key, MrtEvent::JoinRx(vif_index))
        .await;
}

pub async fn process_prune_rx<R, M>(
    instance: &mut Instance<R, M>,
    key: MrtKey,
    vif_index: VifIndex,
) where
    R: NexthopResolver,
    M: McastControl,
{
    let mut ctx = tib_ctx!(instance);
    instance
        .tib
        .process_event(&mut ctx, key, MrtEvent::PruneRx(vif_index))
        .await;
}

// ===== Join override window expiration =====

pub async fn process_prune_override_expiry<R, M>(
    instance: &mut Instance<R, M>,
    key: MrtKey,
    vif_index: VifIndex,
) where
    R: NexthopResolver,
    M: McastControl,
{
    let mut ctx = tib_ctx!(instance);
    instance
        .tib
        .process_event(
            &mut ctx,
            key,
            MrtEvent::PruneOverrideExpiry(vif_index),
        )
        .await;
}

// ===== Local membership reports =====

// A `None` source denotes an any-source (*,G) report.
pub async fn process_local_membership<R, M>(
    instance: &mut Instance<R, M>,
    source: Option<Ipv4Addr>,
    group: Ipv4Addr,
    vif_index: VifIndex,
    include: bool,
) where
    R: NexthopResolver,
    M: McastControl,
{
    let key = match source {
        Some(source) => MrtKey::Sg { source, group },
        None => MrtKey::StarG { group },
    };

    let mut ctx = tib_ctx!(instance);
    instance
        .tib
        .process_event(
            &mut ctx,
            key,
            MrtEvent::LocalMembershipChanged(vif_index, include),
        )
        .await;
}

// ===== Assert resolution =====

pub async fn process_assert_winner<R, M>(
    instance: &mut Instance<R, M>,
    key: MrtKey,
    vif_index: VifIndex,
    lost: bool,
) where
    R: NexthopResolver,
    M: McastControl,
{
    let mut ctx = tib_ctx!(instance);
    instance
        .tib
        .process_event(
            &mut ctx,
            key,
            MrtEvent::AssertWinnerChanged(vif_index, lost),
        )
        .await;
}

// ===== Multicast data arrival =====

pub async fn process_sg_data<R, M>(
    instance: &mut Instance<R, M>,
    source: Ipv4Addr,
    group: Ipv4Addr,
) where
    R: NexthopResolver,
    M: McastControl,
{
    let keepalive = tasks::sg_keepalive(
        Duration::from_secs(KEEPALIVE_PERIOD.into()),
        source,
        group,
        &instance.tx.sg_keepalive,
    );

    let mut ctx = tib_ctx!(instance);
    instance
        .tib
        .process_sg_data(&mut ctx, source, group, Some(keepalive))
        .await;
}

// ===== (S,G) keepalive expiration =====

pub async fn process_keepalive_expiry<R, M>(
    instance: &mut Instance<R, M>,
    source: Ipv4Addr,
    group: Ipv4Addr,
) where
    R: NexthopResolver,
    M: McastControl,
{
    let key = MrtKey::Sg { source, group };
    let mut ctx = tib_ctx!(instance);
    instance
        .tib
        .process_event(&mut ctx, key, MrtEvent::KeepaliveExpiry)
        .await;
}

// ===== Hello processing =====

pub async fn process_hello_rx<R, M>(
    instance: &mut Instance<R, M>,
    vif_index: VifIndex,
    addr: Ipv4Addr,
    dr_priority: u32,
    holdtime: u16,
) where
    R: NexthopResolver,
    M: McastControl,
{
    let expiry = tasks::nbr_timeout(
        Duration::from_secs(holdtime.into()),
        vif_index,
        addr,
        &instance.tx.nbr_timeout,
    );
    instance.vifs.neighbor_update(
        vif_index,
        addr,
        dr_priority,
        holdtime,
        Some(expiry),
    );
}

// ===== Neighbor liveness expiration =====

pub async fn process_nbr_timeout<R, M>(
    instance: &mut Instance<R, M>,
    vif_index: VifIndex,
    addr: Ipv4Addr,
) where
    R: NexthopResolver,
    M: McastControl,
{
    instance.vifs.neighbor_del(vif_index, addr);
}

// ===== Interface events =====

pub async fn process_vif_add<R, M>(
    instance: &mut Instance<R, M>,
    ifname: String,
    ifindex: u32,
) where
    R: NexthopResolver,
    M: McastControl,
{
    if let Err(error) = instance
        .vifs
        .create(&mut instance.mcast, ifname, ifindex)
        .await
    {
        error.log();
    }
}

pub async fn process_vif_del<R, M>(
    instance: &mut Instance<R, M>,
    ifindex: u32,
) where
    R: NexthopResolver,
    M: McastControl,
{
    let Some(vif_index) = instance
        .vifs
        .get_by_ifindex(ifindex)
        .map(|vif| vif.vif_index)
    else {
        return;
    };
    instance.vifs.destroy(&mut instance.mcast, ifindex).await;

    let mut ctx = tib_ctx!(instance);
    instance.tib.process_vif_down(&mut ctx, vif_index).await;
}
