// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! zpubsub configuration constants and session resolution.
//!
//! Every tunable the library reads lives here: discovery service type,
//! environment variable names, multicast group, scheduler wait slice.

use crate::error::{Error, Result};
use std::net::Ipv4Addr;
use std::time::Duration;

// =======================================================================
// Discovery
// =======================================================================

/// Service type announced and browsed on the discovery substrate.
pub const SERVICE_TYPE: &str = "_zpubsub._tcp";

/// Multicast group used by the built-in discovery substrate.
pub const DISCOVERY_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 42, 99);

/// UDP port used by the built-in discovery substrate.
pub const DISCOVERY_MULTICAST_PORT: u16 = 7447;

/// Interval between periodic re-announcements of local records.
pub const DISCOVERY_ANNOUNCE_PERIOD: Duration = Duration::from_secs(1);

/// A remote record not refreshed within this lease is forgotten.
pub const DISCOVERY_LEASE: Duration = Duration::from_secs(5);

// =======================================================================
// Environment
// =======================================================================

/// Overrides the OS-user-derived default session.
pub const SESSION_ENV_VAR: &str = "ZPUBSUB_SESSION";

/// Forces the host address filled in after bind (avoids docker0 and friends).
pub const HOST_IP_ENV_VAR: &str = "ZPUBSUB_HOST_IP";

// =======================================================================
// Scheduler
// =======================================================================

/// Upper bound on a single poll wait inside `receive()`.
///
/// Discovery state is re-applied at least this often, even while a caller
/// is blocked in an indefinite receive.
pub const MAX_WAIT_SLICE: Duration = Duration::from_millis(1000);

/// Number of slices a finite `receive()` timeout is divided into.
pub const WAIT_SLICES_PER_TIMEOUT: u32 = 10;

// =======================================================================
// Transport
// =======================================================================

/// Default maximum frame body size (16 MB, anti-OOM protection).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default per-peer outbound queue bound before messages are dropped.
pub const DEFAULT_SEND_QUEUE_LIMIT: usize = 4 * 1024 * 1024;

/// Minimum delay between reconnect attempts to the same endpoint.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

/// Only URI scheme understood by the transport.
pub const DEFAULT_SCHEME: &str = "tcp";

// =======================================================================
// Session
// =======================================================================

/// Session scoping automatic discovery matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Session {
    /// `ZPUBSUB_SESSION` if set, otherwise the OS user name.
    #[default]
    Default,
    /// Reserved sentinel: discovery is disabled entirely.
    Null,
    /// Explicit session name.
    Named(String),
}

impl Session {
    /// Shorthand for `Session::Named`.
    pub fn named(name: impl Into<String>) -> Self {
        Session::Named(name.into())
    }

    /// True for the discovery-disabling sentinel.
    pub fn is_null(&self) -> bool {
        matches!(self, Session::Null)
    }

    /// Resolve to the concrete session string.
    ///
    /// Returns `Ok(None)` for [`Session::Null`] and `Error::Config` when the
    /// resolved name is empty.
    pub fn resolve(&self) -> Result<Option<String>> {
        let resolved = match self {
            Session::Null => return Ok(None),
            Session::Named(name) => name.clone(),
            Session::Default => default_session(),
        };
        if resolved.is_empty() {
            return Err(Error::Config("session must not be empty".to_string()));
        }
        Ok(Some(resolved))
    }
}

impl From<&str> for Session {
    fn from(name: &str) -> Self {
        Session::Named(name.to_string())
    }
}

impl From<String> for Session {
    fn from(name: String) -> Self {
        Session::Named(name)
    }
}

/// Session used when no user name can be determined.
pub const FALLBACK_SESSION: &str = "default";

/// Session used when [`Session::Default`] is requested.
///
/// An explicitly set but empty `ZPUBSUB_SESSION` is kept (and rejected).
fn default_session() -> String {
    std::env::var(SESSION_ENV_VAR).unwrap_or_else(|_| {
        let user = os_user();
        if user.is_empty() {
            FALLBACK_SESSION.to_string()
        } else {
            user
        }
    })
}

/// Name of the user owning this process, empty when unknown.
pub fn os_user() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_default()
}

/// Application name announced to browsers (executable file stem).
pub fn application_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "zpubsub".to_string())
}

/// Tunables for the wire transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest accepted frame body; larger frames close the connection.
    pub max_frame_size: usize,
    /// Bytes queued per peer before further messages are dropped.
    pub send_queue_limit: usize,
    /// Minimum delay between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Disable Nagle on data connections.
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            send_queue_limit: DEFAULT_SEND_QUEUE_LIMIT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            nodelay: true,
        }
    }
}

impl TransportConfig {
    /// Set the maximum frame size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the per-peer outbound queue bound.
    pub fn with_send_queue_limit(mut self, limit: usize) -> Self {
        self.send_queue_limit = limit;
        self
    }

    /// Set the reconnect interval.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_session_resolves_verbatim() {
        let session = Session::named("s1");
        assert_eq!(session.resolve().unwrap(), Some("s1".to_string()));
    }

    #[test]
    fn test_null_session_resolves_to_none() {
        assert!(Session::Null.is_null());
        assert_eq!(Session::Null.resolve().unwrap(), None);
    }

    #[test]
    fn test_empty_session_is_config_error() {
        let result = Session::named("").resolve();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_transport_config_builders() {
        let cfg = TransportConfig::default()
            .with_max_frame_size(1024)
            .with_send_queue_limit(2048)
            .with_reconnect_interval(Duration::from_millis(5));
        assert_eq!(cfg.max_frame_size, 1024);
        assert_eq!(cfg.send_queue_limit, 2048);
        assert_eq!(cfg.reconnect_interval, Duration::from_millis(5));
        assert!(cfg.nodelay);
    }
}
