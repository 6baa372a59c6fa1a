//! Error types for cairn-store.
//!
//! Every store call reports a [`StoreError`] tagged with a closed
//! [`ErrorKind`]. Callers decide per call site which kinds they absorb.

use std::fmt;

use thiserror::Error;

/// Closed classification of store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The call exceeded its timeout.
    Timeout,
    /// The store answered but has no result for the request (unresolvable
    /// name, missing link, unknown content).
    NotFound,
    /// Connection-level failure.
    Network,
    /// The store rejected the request.
    Api,
    /// The response could not be decoded.
    Decode,
}

impl ErrorKind {
    /// Timeout and unknown-result failures mean "nothing there yet", not a
    /// broken run.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::NotFound)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::Api => write!(f, "api"),
            ErrorKind::Decode => write!(f, "decode"),
        }
    }
}

/// A failed store call.
#[derive(Debug, Clone, Error)]
#[error("{op} failed ({kind}): {message}")]
pub struct StoreError {
    pub kind: ErrorKind,
    /// Store operation name, e.g. `name/resolve`.
    pub op: &'static str,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: ErrorKind, op: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            op,
            message: message.into(),
        }
    }

    pub fn not_found(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, op, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}
