//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use const_addrs::ip4;
use kroute_pim::events;
use kroute_pim::instance::{Instance, InstanceCfg};
use kroute_pim::kernel::{McastOperation, RecordingMcast};
use kroute_pim::mrt::{
    DownstreamState, MrtKey, OlistInputs, UpstreamRptState, UpstreamState,
    inherited_olist_sg, inherited_olist_sg_rpt,
};
use kroute_pim::nexthop::{Nexthop, ResolvedRoute, StaticResolver};
use kroute_utils::mcast::{VifIndex, VifSet};

fn vifset(vifs: &[VifIndex]) -> VifSet {
    vifs.iter().copied().collect()
}

fn source() -> Ipv4Addr {
    ip4!("10.200.0.9")
}

fn group() -> Ipv4Addr {
    ip4!("239.1.1.1")
}

// Instance with three VIFs (0..=2 on ifindexes 1..=3), a static RP for
// the whole multicast range and a unicast route covering both the RP and
// the test source, reachable through VIF 0.
async fn new_instance() -> Instance<StaticResolver, RecordingMcast> {
    let (mut instance, _rx) = Instance::new(
        InstanceCfg::default(),
        StaticResolver::default(),
        RecordingMcast::default(),
    );

    for (ifindex, ifname) in [(1, "eth0"), (2, "eth1"), (3, "eth2")] {
        events::process_vif_add(&mut instance, ifname.to_owned(), ifindex)
            .await;
    }
    instance.resolver.route_add(
        "10.0.0.0/8".parse().unwrap(),
        ResolvedRoute::new(vec![Nexthop::new(ip4!("10.0.1.1"), 1)], 10, 110),
    );
    instance
        .tib
        .rp_add("224.0.0.0/4".parse().unwrap(), ip4!("10.100.0.1"));
    instance.mcast.log.clear();

    instance
}

// The olist derivation is a pure function of its inputs.
#[test]
fn olist_derivation() {
    let mut inputs = OlistInputs::default();
    inputs.star_g_joined = vifset(&[1, 2]);
    inputs.sg_rpt_pruned = vifset(&[2]);
    inputs.sg_joined = vifset(&[3]);
    inputs.sg_lost_assert = vifset(&[1]);

    assert_eq!(inherited_olist_sg_rpt(&inputs), vifset(&[1]));
    assert_eq!(inherited_olist_sg(&inputs), vifset(&[3]));

    // Same inputs, same outputs.
    assert_eq!(inherited_olist_sg(&inputs), inherited_olist_sg(&inputs));

    // Local membership survives an rpt prune, assert loss trumps both.
    inputs.star_g_local = vifset(&[2]);
    assert_eq!(inherited_olist_sg_rpt(&inputs), vifset(&[1, 2]));
    inputs.star_g_lost_assert = vifset(&[2]);
    assert_eq!(inherited_olist_sg_rpt(&inputs), vifset(&[1]));
}

// A source tree join programs the kernel with the RPF interface of the
// source and the joined VIF; the prune withdraws everything.
#[tokio::test]
async fn sg_join_prune_forwarding() {
    let mut instance = new_instance().await;
    let key = MrtKey::Sg { source: source(), group: group() };

    events::process_join_rx(&mut instance, key, 2).await;
    let entry = instance.tib.sg_entry(source(), group()).unwrap();
    assert_eq!(entry.up, UpstreamState::Joined);
    assert_eq!(entry.rpf.neighbor, Some(ip4!("10.0.1.1")));
    assert_eq!(entry.rpf.iif, Some(0));
    assert_eq!(entry.inherited_olist, vifset(&[2]));
    let (iif, olist) = entry.installed().unwrap();
    assert_eq!(iif, 0);
    assert_eq!(olist, vifset(&[2]));
    assert!(matches!(
        instance.mcast.log.last().unwrap(),
        McastOperation::AddEntry { iif: 0, .. }
    ));

    events::process_prune_rx(&mut instance, key, 2).await;
    assert!(instance.tib.sg_entry(source(), group()).is_none());
    assert!(matches!(
        instance.mcast.log.last().unwrap(),
        McastOperation::RemoveEntry { iif: 0, .. }
    ));
}

// Losing an assert removes the VIF from the derived olist without
// touching the downstream join state.
#[tokio::test]
async fn assert_loss_excludes_vif() {
    let mut instance = new_instance().await;
    let key = MrtKey::Sg { source: source(), group: group() };

    events::process_join_rx(&mut instance, key, 1).await;
    events::process_join_rx(&mut instance, key, 2).await;
    let entry = instance.tib.sg_entry(source(), group()).unwrap();
    assert_eq!(entry.inherited_olist, vifset(&[1, 2]));

    events::process_assert_winner(&mut instance, key, 2, true).await;
    let entry = instance.tib.sg_entry(source(), group()).unwrap();
    assert_eq!(entry.inherited_olist, vifset(&[1]));
    let (_, olist) = entry.installed().unwrap();
    assert_eq!(olist, vifset(&[1]));

    // Winning it back restores the VIF.
    events::process_assert_winner(&mut instance, key, 2, false).await;
    let entry = instance.tib.sg_entry(source(), group()).unwrap();
    assert_eq!(entry.inherited_olist, vifset(&[1, 2]));
}

// With other downstream routers on the VIF, a prune is held for the
// override window. A join from any of them cancels it, an expired
// window lets it take effect.
#[tokio::test]
async fn prune_override_window() {
    let mut instance = new_instance().await;
    events::process_hello_rx(&mut instance, 2, ip4!("10.2.0.1"), 1, 105)
        .await;
    events::process_hello_rx(&mut instance, 2, ip4!("10.2.0.2"), 1, 105)
        .await;

    let key = MrtKey::Sg { source: source(), group: group() };
    events::process_join_rx(&mut instance, key, 2).await;

    // The prune is held and forwarding continues.
    events::process_prune_rx(&mut instance, key, 2).await;
    let entry = instance.tib.sg_entry(source(), group()).unwrap();
    assert_eq!(entry.downstream.get(2), DownstreamState::PrunePending);
    assert_eq!(entry.inherited_olist, vifset(&[2]));
    assert!(entry.installed().is_some());

    // Another downstream router overrides the prune.
    events::process_join_rx(&mut instance, key, 2).await;
    let entry = instance.tib.sg_entry(source(), group()).unwrap();
    assert_eq!(entry.downstream.get(2), DownstreamState::Join);

    // Without an override the window closes and the prune takes effect.
    events::process_prune_rx(&mut instance, key, 2).await;
    events::process_prune_override_expiry(&mut instance, key, 2).await;
    assert!(instance.tib.sg_entry(source(), group()).is_none());
    assert!(matches!(
        instance.mcast.log.last().unwrap(),
        McastOperation::RemoveEntry { .. }
    ));
}

// A prune received on a VIF with a single downstream router takes effect
// immediately.
#[tokio::test]
async fn prune_without_override_window() {
    let mut instance = new_instance().await;
    events::process_hello_rx(&mut instance, 2, ip4!("10.2.0.1"), 1, 105)
        .await;

    let key = MrtKey::Sg { source: source(), group: group() };
    events::process_join_rx(&mut instance, key, 2).await;
    events::process_prune_rx(&mut instance, key, 2).await;
    assert!(instance.tib.sg_entry(source(), group()).is_none());
}

// An (S,G,rpt) prune with other routers downstream only takes effect
// once its override window closes.
#[tokio::test]
async fn sg_rpt_prune_override() {
    let mut instance = new_instance().await;
    events::process_hello_rx(&mut instance, 1, ip4!("10.1.0.1"), 1, 105)
        .await;
    events::process_hello_rx(&mut instance, 1, ip4!("10.1.0.2"), 1, 105)
        .await;

    let star_g = MrtKey::StarG { group: group() };
    events::process_join_rx(&mut instance, star_g, 1).await;

    let sg_rpt = MrtKey::SgRpt { source: source(), group: group() };
    events::process_prune_rx(&mut instance, sg_rpt, 1).await;
    let entry = instance.tib.sg_rpt_entry(source(), group()).unwrap();
    assert_eq!(entry.downstream.get(1), DownstreamState::PrunePending);
    assert_eq!(entry.inherited_olist, vifset(&[1]));
    assert_eq!(entry.rpt_state, UpstreamRptState::NotPruned);

    events::process_prune_override_expiry(&mut instance, sg_rpt, 1).await;
    let entry = instance.tib.sg_rpt_entry(source(), group()).unwrap();
    assert_eq!(entry.downstream.get(1), DownstreamState::Prune);
    assert!(entry.inherited_olist.is_empty());
    assert_eq!(entry.rpt_state, UpstreamRptState::Pruned);
}

// An (S,G,rpt) prune carves the source out of the shared tree without
// disturbing the remaining shared-tree receivers.
#[tokio::test]
async fn sg_rpt_prune_inheritance() {
    let mut instance = new_instance().await;
    let star_g = MrtKey::StarG { group: group() };

    events::process_join_rx(&mut instance, star_g, 1).await;
    events::process_join_rx(&mut instance, star_g, 2).await;
    let entry = instance.tib.star_g_entry(group()).unwrap();
    assert_eq!(entry.rp, ip4!("10.100.0.1"));
    assert_eq!(entry.up, UpstreamState::Joined);

    let sg_rpt = MrtKey::SgRpt { source: source(), group: group() };
    events::process_prune_rx(&mut instance, sg_rpt, 2).await;
    let entry = instance.tib.sg_rpt_entry(source(), group()).unwrap();
    assert_eq!(entry.inherited_olist, vifset(&[1]));
    assert_eq!(entry.rpt_state, UpstreamRptState::NotPruned);

    // Pruning the last receiver leaves nothing to inherit and the prune
    // propagates upstream.
    events::process_prune_rx(&mut instance, sg_rpt, 1).await;
    let entry = instance.tib.sg_rpt_entry(source(), group()).unwrap();
    assert!(entry.inherited_olist.is_empty());
    assert_eq!(entry.rpt_state, UpstreamRptState::Pruned);
}

// A source with no unicast route never reaches the kernel. The entry
// exists but stays frozen until the scan finds a route.
#[tokio::test]
async fn unreachable_rpf_freezes_entry() {
    let mut instance = new_instance().await;
    let source = ip4!("192.168.5.5");
    let key = MrtKey::Sg { source, group: group() };

    events::process_join_rx(&mut instance, key, 2).await;
    let entry = instance.tib.sg_entry(source, group()).unwrap();
    assert_eq!(entry.up, UpstreamState::NotJoined);
    assert_eq!(entry.rpf.iif, None);
    assert!(entry.installed().is_none());
    assert!(
        !instance
            .mcast
            .log
            .iter()
            .any(|op| matches!(op, McastOperation::AddEntry { .. }))
    );

    // A route shows up and the next scan thaws the entry.
    instance.resolver.route_add(
        "192.168.0.0/16".parse().unwrap(),
        ResolvedRoute::new(vec![Nexthop::new(ip4!("192.168.1.1"), 2)], 10, 110),
    );
    events::process_nexthop_scan(&mut instance).await;
    let entry = instance.tib.sg_entry(source, group()).unwrap();
    assert_eq!(entry.up, UpstreamState::Joined);
    assert_eq!(entry.rpf.iif, Some(1));
    assert!(entry.installed().is_some());
}

// Withdrawal of the covering unicast route withdraws the kernel entry on
// the next scan.
#[tokio::test]
async fn rpf_loss_withdraws_forwarding() {
    let mut instance = new_instance().await;
    let key = MrtKey::Sg { source: source(), group: group() };

    events::process_join_rx(&mut instance, key, 2).await;
    assert!(instance.tib.sg_entry(source(), group()).unwrap().installed().is_some());

    instance.resolver.route_del(&"10.0.0.0/8".parse().unwrap());
    events::process_nexthop_scan(&mut instance).await;

    let entry = instance.tib.sg_entry(source(), group()).unwrap();
    assert_eq!(entry.up, UpstreamState::NotJoined);
    assert_eq!(entry.rpf.iif, None);
    assert!(entry.installed().is_none());
    assert!(matches!(
        instance.mcast.log.last().unwrap(),
        McastOperation::RemoveEntry { .. }
    ));
}

// The kernel olist carries each VIF's configured TTL threshold.
#[tokio::test]
async fn mfc_ttl_translation() {
    let mut instance = new_instance().await;
    instance.vifs.get_mut(2).unwrap().ttl_threshold = 64;

    let key = MrtKey::Sg { source: source(), group: group() };
    events::process_join_rx(&mut instance, key, 1).await;
    events::process_join_rx(&mut instance, key, 2).await;

    let Some(McastOperation::AddEntry { ttls, .. }) =
        instance.mcast.log.last()
    else {
        panic!("unexpected kernel operation");
    };
    assert_eq!(ttls[0], 0);
    assert_eq!(ttls[1], 1);
    assert_eq!(ttls[2], 64);
}

// Shared tree joins drive the (*,*,RP) upstream machine.
#[tokio::test]
async fn star_star_rp_upstream() {
    let mut instance = new_instance().await;
    let rp = ip4!("10.100.0.1");
    let key = MrtKey::StarStarRp { rp };

    events::process_join_rx(&mut instance, key, 1).await;
    let entry = instance.tib.star_star_rp_entry(rp).unwrap();
    assert_eq!(entry.up, UpstreamState::Joined);

    events::process_prune_rx(&mut instance, key, 1).await;
    assert!(instance.tib.star_star_rp_entry(rp).is_none());
}

// Data-driven (S,G) state lives exactly as long as its keepalive.
#[tokio::test]
async fn sg_keepalive_lifetime() {
    let mut instance = new_instance().await;

    events::process_sg_data(&mut instance, source(), group()).await;
    assert!(instance.tib.sg_entry(source(), group()).is_some());

    events::process_keepalive_expiry(&mut instance, source(), group()).await;
    assert!(instance.tib.sg_entry(source(), group()).is_none());
}

// Tearing an interface down clears the state bound to its VIF.
#[tokio::test]
async fn vif_down_clears_tree_state() {
    let mut instance = new_instance().await;
    let key = MrtKey::Sg { source: source(), group: group() };

    events::process_join_rx(&mut instance, key, 1).await;
    events::process_join_rx(&mut instance, key, 2).await;

    // ifindex 3 backs VIF 2.
    events::process_vif_del(&mut instance, 3).await;
    let entry = instance.tib.sg_entry(source(), group()).unwrap();
    assert_eq!(entry.inherited_olist, vifset(&[1]));

    events::process_vif_del(&mut instance, 2).await;
    assert!(instance.tib.sg_entry(source(), group()).is_none());
}
