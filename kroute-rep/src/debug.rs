//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, debug_span};

use crate::client::messages::{RepRxMsg, RepTxMsg};

// Debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    Connected,
    MsgTx(&'a RepTxMsg),
    MsgRx(&'a RepRxMsg),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub fn log(&self) {
        match self {
            Debug::Connected => {
                debug_span!("rep").in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::MsgTx(msg) => {
                debug_span!("rep").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(r#type = %msg, %data, "{}", self);
                    })
                });
            }
            Debug::MsgRx(msg) => {
                debug_span!("rep").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(r#type = %msg, %data, "{}", self);
                    })
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::Connected => {
                write!(f, "connected to the route manager")
            }
            Debug::MsgTx(..) | Debug::MsgRx(..) => {
                write!(f, "message")
            }
        }
    }
}
