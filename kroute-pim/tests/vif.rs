//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::ip4;
use kroute_pim::error::Error;
use kroute_pim::kernel::{McastOperation, RecordingMcast};
use kroute_pim::vif::{HELLO_PERIOD, PimVifs, holdtime};
use kroute_utils::mcast::MAXVIFS;

// VIF indexes are allocated first-free and handed back on destroy.
#[tokio::test]
async fn vif_lifecycle() {
    let mut mcast = RecordingMcast::default();
    let mut vifs = PimVifs::default();

    let vif0 = vifs.create(&mut mcast, "eth0".to_owned(), 10).await.unwrap();
    let vif1 = vifs.create(&mut mcast, "eth1".to_owned(), 11).await.unwrap();
    assert_eq!(vif0, 0);
    assert_eq!(vif1, 1);
    assert!(matches!(
        mcast.log.last().unwrap(),
        McastOperation::AttachVif { vif_index: 1, ifindex: 11 }
    ));

    // Creating the same interface twice reuses the VIF.
    let again = vifs.create(&mut mcast, "eth0".to_owned(), 10).await.unwrap();
    assert_eq!(again, vif0);

    vifs.destroy(&mut mcast, 10).await;
    assert!(vifs.get(vif0).is_none());
    assert!(matches!(
        mcast.log.last().unwrap(),
        McastOperation::DetachVif { vif_index: 0 }
    ));

    // The freed index is the next one allocated.
    let vif = vifs.create(&mut mcast, "eth2".to_owned(), 12).await.unwrap();
    assert_eq!(vif, 0);
}

// The kernel VIF table is a hard limit.
#[tokio::test]
async fn vif_limit() {
    let mut mcast = RecordingMcast::default();
    let mut vifs = PimVifs::default();

    for ifindex in 0..MAXVIFS as u32 {
        vifs.create(&mut mcast, format!("eth{}", ifindex), ifindex + 1)
            .await
            .unwrap();
    }
    let result = vifs
        .create(&mut mcast, "one-too-many".to_owned(), 1000)
        .await;
    assert!(matches!(result, Err(Error::VifLimitReached)));
}

// Highest DR priority wins the election, highest address breaks ties.
#[tokio::test]
async fn dr_election() {
    let mut mcast = RecordingMcast::default();
    let mut vifs = PimVifs::default();

    let vif_index = vifs.create(&mut mcast, "eth0".to_owned(), 1).await.unwrap();
    let vif = vifs.get_mut(vif_index).unwrap();
    vif.primary_addr = Some(ip4!("10.0.1.2"));

    // Alone on the link, we are the DR.
    assert_eq!(vifs.get(vif_index).unwrap().dr(), Some(ip4!("10.0.1.2")));

    // Equal priority, higher address wins.
    vifs.neighbor_update(
        vif_index,
        ip4!("10.0.1.3"),
        1,
        holdtime(HELLO_PERIOD),
        None,
    );
    assert_eq!(vifs.get(vif_index).unwrap().dr(), Some(ip4!("10.0.1.3")));

    // Priority beats address.
    vifs.neighbor_update(
        vif_index,
        ip4!("10.0.1.1"),
        10,
        holdtime(HELLO_PERIOD),
        None,
    );
    assert_eq!(vifs.get(vif_index).unwrap().dr(), Some(ip4!("10.0.1.1")));

    // The expired neighbor drops out of the election.
    vifs.neighbor_del(vif_index, ip4!("10.0.1.1"));
    assert_eq!(vifs.get(vif_index).unwrap().dr(), Some(ip4!("10.0.1.3")));
}

#[test]
fn hello_holdtime() {
    assert_eq!(holdtime(HELLO_PERIOD), 105);
    assert_eq!(holdtime(30), 105);
}
