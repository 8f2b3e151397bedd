//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::IpNetwork;
use kroute_rep::client::messages::{RepRxMsg, RepTxMsg};
use kroute_utils::protocol::Protocol;
use tracing::{debug, debug_span};

use crate::rib::Route;
use crate::server::ConnId;

// Debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    ConnAccept(ConnId),
    ConnClose(ConnId),
    ClientMsgRx(ConnId, &'a RepTxMsg),
    ClientMsgTx(ConnId, &'a RepRxMsg),
    RouteInstall(&'a IpNetwork, &'a Route),
    RouteUninstall(&'a IpNetwork, Protocol),
    RouterIdUpdate(Option<Ipv4Addr>),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::ConnAccept(conn_id) | Debug::ConnClose(conn_id) => {
                debug_span!("rep-server").in_scope(|| {
                    debug!(%conn_id, "{}", self);
                });
            }
            Debug::ClientMsgRx(conn_id, msg) => {
                debug_span!("rep-server").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(%conn_id, r#type = %msg, %data, "{}", self);
                    })
                });
            }
            Debug::ClientMsgTx(conn_id, msg) => {
                debug_span!("rep-server").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(%conn_id, r#type = %msg, %data, "{}", self);
                    })
                });
            }
            Debug::RouteInstall(prefix, route) => {
                debug!(%prefix, protocol = %route.protocol, "{}", self);
            }
            Debug::RouteUninstall(prefix, protocol) => {
                debug!(%prefix, %protocol, "{}", self);
            }
            Debug::RouterIdUpdate(router_id) => {
                debug!(?router_id, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::ConnAccept(..) => {
                write!(f, "client connected")
            }
            Debug::ConnClose(..) => {
                write!(f, "client disconnected")
            }
            Debug::ClientMsgRx(..) | Debug::ClientMsgTx(..) => {
                write!(f, "message")
            }
            Debug::RouteInstall(..) => {
                write!(f, "installing route")
            }
            Debug::RouteUninstall(..) => {
                write!(f, "uninstalling route")
            }
            Debug::RouterIdUpdate(..) => {
                write!(f, "router-id update")
            }
        }
    }
}
