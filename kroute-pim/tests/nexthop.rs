//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::ip4;
use kroute_pim::nexthop::{
    INFINITE_ASSERT_METRIC, Nexthop, NexthopCache, ResolvedRoute,
    StaticResolver,
};

fn route(gateway: &str, ifindex: u32, metric: u32) -> ResolvedRoute {
    ResolvedRoute::new(
        vec![Nexthop::new(gateway.parse().unwrap(), ifindex)],
        metric,
        110,
    )
}

// An unresolvable destination is cached negatively and turns reachable
// once the periodic scan sees a covering route, firing both notification
// kinds for the freshly initialized entry.
#[tokio::test]
async fn negative_entry_turns_reachable() {
    let mut resolver = StaticResolver::default();
    let mut cache = NexthopCache::default();

    let addr = ip4!("10.1.2.3");
    let id = cache.lookup(&mut resolver, addr).await;
    let entry = cache.entry(id).unwrap();
    assert!(entry.is_unreachable());
    assert_eq!(entry.metric(), INFINITE_ASSERT_METRIC);
    assert_eq!(entry.preference(), INFINITE_ASSERT_METRIC);

    // A covering route shows up before the next scan.
    resolver.route_add("10.0.0.0/8".parse().unwrap(), route("10.0.1.1", 2, 5));
    let changes = cache.scan(&mut resolver).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].addr, addr);
    assert!(changes[0].rp);
    assert!(changes[0].source);

    let entry = cache.entry(id).unwrap();
    assert!(!entry.is_unreachable());
    assert_eq!(entry.metric(), 5);
    assert_eq!(entry.first_nexthop().unwrap().gateway, ip4!("10.0.1.1"));
}

// Readers holding a resolution snapshot keep seeing it unchanged while
// the scan swaps in a new one.
#[tokio::test]
async fn snapshot_stable_across_scan() {
    let mut resolver = StaticResolver::default();
    let mut cache = NexthopCache::default();

    resolver.route_add("10.0.0.0/8".parse().unwrap(), route("10.0.1.1", 2, 5));
    let id = cache.lookup(&mut resolver, ip4!("10.1.2.3")).await;
    cache.incr_ref(id);
    let snapshot = cache.entry(id).unwrap().chain().clone();

    resolver.route_add("10.0.0.0/8".parse().unwrap(), route("10.0.9.9", 3, 5));
    let changes = cache.scan(&mut resolver).await;
    assert_eq!(changes.len(), 1);

    // The old snapshot is intact, the entry moved on.
    assert_eq!(snapshot.nexthops[0].gateway, ip4!("10.0.1.1"));
    let entry = cache.entry(id).unwrap();
    assert_eq!(entry.first_nexthop().unwrap().gateway, ip4!("10.0.9.9"));
}

// A never-resolved entry is evicted as soon as its last watcher leaves;
// a resolved one is kept warm.
#[tokio::test]
async fn decrement_evicts_only_negative_entries() {
    let mut resolver = StaticResolver::default();
    let mut cache = NexthopCache::default();

    let unreachable = ip4!("192.0.2.1");
    let id = cache.lookup(&mut resolver, unreachable).await;
    cache.incr_ref(id);
    cache.decr_ref(id);
    assert!(cache.get(unreachable).is_none());

    resolver.route_add("10.0.0.0/8".parse().unwrap(), route("10.0.1.1", 2, 5));
    let reachable = ip4!("10.1.2.3");
    let id = cache.lookup(&mut resolver, reachable).await;
    cache.incr_ref(id);
    cache.decr_ref(id);
    assert!(cache.get(reachable).is_some());
}

// A spurious decrement is clamped instead of wrapping the counter.
#[tokio::test]
async fn refcount_underflow_is_clamped() {
    let mut resolver = StaticResolver::default();
    let mut cache = NexthopCache::default();

    resolver.route_add("10.0.0.0/8".parse().unwrap(), route("10.0.1.1", 2, 5));
    let id = cache.lookup(&mut resolver, ip4!("10.1.2.3")).await;
    cache.decr_ref(id);
    cache.decr_ref(id);

    let entry = cache.entry(id).unwrap();
    assert_eq!(entry.refcount(), 0);
}

// An idle reachable entry that loses its route is rearmed for eviction
// and dropped by the scan that noticed the loss.
#[tokio::test]
async fn scan_evicts_idle_unreachable_entries() {
    let mut resolver = StaticResolver::default();
    let mut cache = NexthopCache::default();

    let prefix = "10.0.0.0/8".parse().unwrap();
    resolver.route_add(prefix, route("10.0.1.1", 2, 5));
    let addr = ip4!("10.1.2.3");
    let id = cache.lookup(&mut resolver, addr).await;
    cache.incr_ref(id);
    cache.incr_ref(id);

    // Both watchers leave. The entry stays cached for reuse.
    cache.decr_ref(id);
    cache.decr_ref(id);
    assert!(cache.get(addr).is_some());

    // The route goes away and the next scan collects the entry.
    resolver.route_del(&prefix);
    let changes = cache.scan(&mut resolver).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].addr, addr);
    assert!(cache.get(addr).is_none());
}

// A destination that stays unresolved is reported only when its
// resolution actually changes, not on every scan pass.
#[tokio::test]
async fn unresolved_entry_scans_quietly() {
    let mut resolver = StaticResolver::default();
    let mut cache = NexthopCache::default();

    let addr = ip4!("10.1.2.3");
    let id = cache.lookup(&mut resolver, addr).await;
    cache.incr_ref(id);
    cache.mark_rp(id);

    // Still no route. Repeated scans stay silent.
    assert!(cache.scan(&mut resolver).await.is_empty());
    assert!(cache.scan(&mut resolver).await.is_empty());

    // The first successful resolution reports both roles.
    resolver.route_add("10.0.0.0/8".parse().unwrap(), route("10.0.1.1", 2, 5));
    let changes = cache.scan(&mut resolver).await;
    assert_eq!(changes.len(), 1);
    assert!(changes[0].rp);
    assert!(changes[0].source);

    // From here on only real changes are reported.
    assert!(cache.scan(&mut resolver).await.is_empty());
}

// Multipath resolutions that differ only in nexthop ordering are not
// reported as changes.
#[tokio::test]
async fn nexthop_order_is_not_a_change() {
    let mut resolver = StaticResolver::default();
    let mut cache = NexthopCache::default();

    let prefix = "10.0.0.0/8".parse().unwrap();
    let nh1 = Nexthop::new(ip4!("10.0.1.1"), 2);
    let nh2 = Nexthop::new(ip4!("10.0.2.1"), 3);
    resolver.route_add(prefix, ResolvedRoute::new(vec![nh1, nh2], 5, 110));
    let id = cache.lookup(&mut resolver, ip4!("10.1.2.3")).await;
    cache.incr_ref(id);

    // Settle the freshly created entry.
    let changes = cache.scan(&mut resolver).await;
    assert_eq!(changes.len(), 1);

    // Same nexthop set, different order.
    resolver.route_add(prefix, ResolvedRoute::new(vec![nh2, nh1], 5, 110));
    let changes = cache.scan(&mut resolver).await;
    assert!(changes.is_empty());

    // A metric change on the same set is a change.
    resolver.route_add(prefix, ResolvedRoute::new(vec![nh2, nh1], 7, 110));
    let changes = cache.scan(&mut resolver).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(cache.entry(id).unwrap().metric(), 7);
}
