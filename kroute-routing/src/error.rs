//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use kroute_rep::client::error::DecodeError;
use tracing::warn;

use crate::server::ConnId;

// Route manager errors.
#[derive(Debug)]
pub enum Error {
    ClientDecode(ConnId, DecodeError),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::ClientDecode(conn_id, error) => {
                warn!(%conn_id, error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ClientDecode(..) => {
                write!(f, "failed to decode client message")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ClientDecode(_, error) => Some(error),
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
