//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use kroute_utils::mcast::VifIndex;
use tracing::{error, warn};

// PIM errors.
#[derive(Debug)]
pub enum Error {
    NexthopRefcountUnderflow(Ipv4Addr),
    NoRpForGroup(Ipv4Addr),
    VifLimitReached,
    VifAttach(VifIndex, std::io::Error),
    VifDetach(VifIndex, std::io::Error),
    MfcAdd(Ipv4Addr, Ipv4Addr, std::io::Error),
    MfcDel(Ipv4Addr, Ipv4Addr, std::io::Error),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::NexthopRefcountUnderflow(addr) => {
                error!(%addr, "{}", self);
            }
            Error::NoRpForGroup(group) => {
                warn!(%group, "{}", self);
            }
            Error::VifLimitReached => {
                warn!("{}", self);
            }
            Error::VifAttach(vif_index, error)
            | Error::VifDetach(vif_index, error) => {
                warn!(%vif_index, error = %with_source(error), "{}", self);
            }
            Error::MfcAdd(source, group, error)
            | Error::MfcDel(source, group, error) => {
                warn!(
                    %source, %group, error = %with_source(error), "{}", self
                );
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NexthopRefcountUnderflow(..) => {
                write!(f, "nexthop reference count underflow")
            }
            Error::NoRpForGroup(..) => {
                write!(f, "no RP configured for group")
            }
            Error::VifLimitReached => {
                write!(f, "all kernel VIF slots are in use")
            }
            Error::VifAttach(..) => {
                write!(f, "failed to attach VIF")
            }
            Error::VifDetach(..) => {
                write!(f, "failed to detach VIF")
            }
            Error::MfcAdd(..) => {
                write!(f, "failed to add kernel forwarding entry")
            }
            Error::MfcDel(..) => {
                write!(f, "failed to remove kernel forwarding entry")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::VifAttach(_, error)
            | Error::VifDetach(_, error)
            | Error::MfcAdd(_, _, error)
            | Error::MfcDel(_, _, error) => Some(error),
            _ => None,
        }
    }
}

// ===== helper functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
