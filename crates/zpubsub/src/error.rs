// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for zpubsub.
//!
//! Construction-time failures are returned synchronously, so no partially
//! usable `Publisher`, `Subscriber` or `Receiver` is ever handed out.
//! Steady-state operations (`publish`, `subscribe`, `unsubscribe`) report
//! failure through a `bool` and a log line instead. `receive()` only fails
//! with [`Error::Protocol`] or [`Error::Poll`].

use std::fmt;
use std::io;

/// Errors returned by zpubsub operations.
///
/// # Example
///
/// ```rust,no_run
/// use zpubsub::{Error, Subscriber};
///
/// match Subscriber::with_uri("tcp://*:0") {
///     Err(Error::Config(msg)) => println!("bad uri: {}", msg),
///     Err(e) => println!("other error: {}", e),
///     Ok(_) => println!("connected"),
/// }
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Empty or invalid session, malformed or under-qualified URI.
    Config(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Socket creation, bind or connect failed.
    Connection(String),
    /// The multiplexing wait itself failed (fatal to the `receive()` call).
    Poll(io::Error),

    // ========================================================================
    // Discovery Errors
    // ========================================================================
    /// A required discovery operation was unavailable.
    Discovery(String),

    // ========================================================================
    // Data Errors
    // ========================================================================
    /// Wire framing violated the filter => delivery contract.
    Protocol(String),
    /// Event payload could not be encoded or decoded.
    Serialization(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Connection(msg) => write!(f, "Connection error: {}", msg),
            Error::Poll(e) => write!(f, "Poll failed: {}", e),
            Error::Discovery(msg) => write!(f, "Discovery error: {}", msg),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Poll(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_carries_message() {
        let err = Error::Config("session must not be empty".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: session must not be empty"
        );
    }

    #[test]
    fn test_poll_error_exposes_source() {
        let err = Error::Poll(io::Error::new(io::ErrorKind::Other, "epoll_wait"));
        assert!(err.source().is_some());
        assert!(Error::Protocol("x".into()).source().is_none());
        assert!(Error::Connection("x".into()).source().is_none());
    }
}
