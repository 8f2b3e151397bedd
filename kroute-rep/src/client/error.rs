//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetworkError;
use tracing::{warn, warn_span};

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// REP client errors.
#[derive(Debug)]
pub enum Error {
    ConnectError(std::io::Error),
    ReadError(std::io::Error),
    WriteError(std::io::Error),
    Disconnected,
    DecodeError(DecodeError),
}

// REP message decoding errors.
//
// Apart from `PartialMessage`, all of these are fatal to the connection:
// once a peer emits a malformed record there is no safe way to find the
// start of the next one.
#[derive(Debug)]
pub enum DecodeError {
    PartialMessage,
    InvalidLength(u16),
    UnknownCommand(u8),
    UnknownProtocol(u8),
    InvalidPrefixLength(u8),
    MalformedMessage(String),
    MalformedPrefix(IpNetworkError),
    NexthopCountMismatch(u8, u8),
    TrailingBytes(usize),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::ConnectError(error)
            | Error::ReadError(error)
            | Error::WriteError(error) => {
                warn_span!("rep").in_scope(|| {
                    warn!(%error, "{}", self);
                });
            }
            Error::Disconnected => {
                warn_span!("rep").in_scope(|| {
                    warn!("{}", self);
                });
            }
            Error::DecodeError(error) => {
                warn_span!("rep").in_scope(|| {
                    warn!(%error, "{}", self);
                });
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ConnectError(error)
            | Error::ReadError(error)
            | Error::WriteError(error) => Some(error),
            Error::DecodeError(error) => Some(error),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ConnectError(..) => {
                write!(f, "failed to connect to the route manager")
            }
            Error::ReadError(..) => {
                write!(f, "failed to read data from the route manager")
            }
            Error::WriteError(..) => {
                write!(f, "failed to send data to the route manager")
            }
            Error::Disconnected => {
                write!(f, "disconnected from the route manager")
            }
            Error::DecodeError(..) => {
                write!(f, "error parsing REP message")
            }
        }
    }
}

impl From<DecodeError> for Error {
    fn from(error: DecodeError) -> Error {
        Error::DecodeError(error)
    }
}

// ===== impl DecodeError =====

impl std::error::Error for DecodeError {}

impl std::fmt::Display for DecodeError {
    #[rustfmt::skip]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::PartialMessage =>
                write!(f, "incomplete message"),
            DecodeError::InvalidLength(size) =>
                write!(f, "invalid message length: {}", size),
            DecodeError::UnknownCommand(cmd) =>
                write!(f, "unknown command: {}", cmd),
            DecodeError::UnknownProtocol(proto) =>
                write!(f, "unknown protocol: {}", proto),
            DecodeError::InvalidPrefixLength(plen) =>
                write!(f, "invalid prefix length: {}", plen),
            DecodeError::MalformedMessage(err) =>
                write!(f, "{}", err),
            DecodeError::MalformedPrefix(err) =>
                write!(f, "malformed prefix: {}", err),
            DecodeError::NexthopCountMismatch(nexthops, ifindexes) =>
                write!(f, "nexthop/ifindex count mismatch: {} vs {}", nexthops, ifindexes),
            DecodeError::TrailingBytes(count) =>
                write!(f, "{} trailing bytes after message body", count),
        }
    }
}

impl From<IpNetworkError> for DecodeError {
    fn from(error: IpNetworkError) -> DecodeError {
        DecodeError::MalformedPrefix(error)
    }
}
