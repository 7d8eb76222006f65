// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for ROP connections and calls.

use crate::frame::AbortReason;
use crate::value::Value;
use std::fmt;
use std::io;

/// Result type for ROP operations
pub type RopResult<T> = Result<T, RopError>;

/// Runtime fault carried by a Return with a negative discriminant.
///
/// Faults are raised by the peer's runtime, not by the called object's
/// declared result variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultCode {
    /// The target object id is not a live skeleton
    UnknownObject,
    /// The method index is out of range for the target's interface
    UnknownMethod,
    /// The servant panicked while handling the call
    ServantPanicked,
    /// The servant returned a value that does not fit the declared result
    InvalidReply,
    /// The servant reported a failure of its own
    ServantFailed,
    /// Discriminant this runtime does not know
    Other(i32),
}

impl FaultCode {
    /// Wire discriminant (always negative).
    pub fn discriminant(self) -> i32 {
        match self {
            Self::UnknownObject => -1,
            Self::UnknownMethod => -2,
            Self::ServantPanicked => -3,
            Self::InvalidReply => -4,
            Self::ServantFailed => -5,
            Self::Other(code) => code,
        }
    }

    /// Decode a negative wire discriminant.
    pub fn from_discriminant(code: i32) -> Self {
        match code {
            -1 => Self::UnknownObject,
            -2 => Self::UnknownMethod,
            -3 => Self::ServantPanicked,
            -4 => Self::InvalidReply,
            -5 => Self::ServantFailed,
            other => Self::Other(other),
        }
    }
}

/// Errors that can occur on a connection or a remote call
#[derive(Clone, Debug)]
pub enum RopError {
    /// Connection was closed (peer EOF, local shutdown or earlier failure)
    ConnectionClosed(String),

    /// Socket I/O failure
    Io {
        kind: io::ErrorKind,
        message: String,
    },

    /// A frame on `port` violated its expected shape
    Malformed { port: i32, reason: AbortReason },

    /// Method index is not part of the object's interface
    UnknownMethod { object: i32, method: u16 },

    /// Remote object raised application-level result variant `variant`
    Remote { variant: u32, payload: Value },

    /// Remote runtime reported a fault instead of a result
    Fault { code: FaultCode, message: String },

    /// Arguments or results do not fit the declared shapes
    ShapeMismatch(String),

    /// A string, byte blob or list is longer than the configured limit
    LimitExceeded { len: usize, max: u32 },

    /// Stub belongs to a different connection
    ForeignObject,

    /// Name or method not found
    NotFound(String),

    /// Invalid connection configuration
    InvalidConfig(String),
}

impl RopError {
    /// True for failures that end the whole connection.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed(_) | Self::Io { .. } | Self::Malformed { .. }
        )
    }

    /// True when the remote object answered with an exception variant.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    pub(crate) fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed(reason.into())
    }
}

impl fmt::Display for RopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionClosed(reason) => write!(f, "Connection closed: {}", reason),
            Self::Io { kind, message } => write!(f, "I/O error ({:?}): {}", kind, message),
            Self::Malformed { port, reason } => {
                write!(f, "Malformed frame on port {}: {}", port, reason)
            }
            Self::UnknownMethod { object, method } => {
                write!(f, "Unknown method {} on object {}", method, object)
            }
            Self::Remote { variant, payload } => {
                write!(f, "Remote exception variant {}: {:?}", variant, payload)
            }
            Self::Fault { code, message } => write!(f, "Remote fault {:?}: {}", code, message),
            Self::ShapeMismatch(msg) => write!(f, "Shape mismatch: {}", msg),
            Self::LimitExceeded { len, max } => {
                write!(f, "Value length {} exceeds limit {}", len, max)
            }
            Self::ForeignObject => write!(f, "Object reference belongs to another connection"),
            Self::NotFound(name) => write!(f, "Not found: {}", name),
            Self::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for RopError {}

impl From<io::Error> for RopError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionClosed(e.to_string()),
            kind => Self::Io {
                kind,
                message: e.to_string(),
            },
        }
    }
}
