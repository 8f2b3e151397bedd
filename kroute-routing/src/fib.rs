//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use kroute_utils::protocol::Protocol;

use crate::rib::Route;

// Kernel forwarding table programming.
//
// The platform collaborator implements this on top of the OS routing API.
// Installs have replace semantics, so updating the best route for a prefix
// takes a single call.
#[async_trait]
pub trait KernelFib: Send {
    async fn route_install(&mut self, prefix: IpNetwork, route: &Route);

    async fn route_uninstall(&mut self, prefix: IpNetwork, protocol: Protocol);
}

// FIB that records the requested operations instead of programming a kernel.
#[cfg(feature = "testing")]
#[derive(Debug, Default)]
pub struct RecordingFib {
    pub log: Vec<FibOperation>,
}

#[cfg(feature = "testing")]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FibOperation {
    Install {
        prefix: IpNetwork,
        protocol: Protocol,
        nexthops: Vec<crate::rib::RouteNexthop>,
    },
    Uninstall {
        prefix: IpNetwork,
        protocol: Protocol,
    },
}

// ===== impl RecordingFib =====

#[cfg(feature = "testing")]
#[async_trait]
impl KernelFib for RecordingFib {
    async fn route_install(&mut self, prefix: IpNetwork, route: &Route) {
        self.log.push(FibOperation::Install {
            prefix,
            protocol: route.protocol,
            nexthops: route.nexthops.iter().copied().collect(),
        });
    }

    async fn route_uninstall(&mut self, prefix: IpNetwork, protocol: Protocol) {
        self.log.push(FibOperation::Uninstall { prefix, protocol });
    }
}
