// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service discovery substrate.
//!
//! Publishers announce one record per bound endpoint under
//! [`SERVICE_TYPE`](crate::config::SERVICE_TYPE); subscribers browse that
//! service type and connect to every record whose session matches theirs.
//!
//! | Key           | Value                                   |
//! |---------------|-----------------------------------------|
//! | `id`          | announcing process identity (UUID)      |
//! | `host`        | host the publisher is reachable on      |
//! | `port`        | TCP port                                |
//! | `application` | executable name, informational          |
//! | `user`        | OS user, informational                  |
//! | `session`     | session scope (may be absent)           |
//!
//! Two substrates ship with the crate: [`LocalDiscovery`] (in-process,
//! used by tests and single-process applications) and, with the
//! `multicast-discovery` feature, [`MulticastDiscovery`] (UDP multicast on
//! the local network).

mod local;
#[cfg(feature = "multicast-discovery")]
mod multicast;

pub use local::LocalDiscovery;
#[cfg(feature = "multicast-discovery")]
pub use multicast::MulticastDiscovery;

use crate::error::Result;
use crate::identity::ProcessIdentity;
use crate::uri::Uri;

/// Property keys of a discovery record.
pub mod keys {
    /// Announcing process identity.
    pub const ID: &str = "id";
    /// Reachable host.
    pub const HOST: &str = "host";
    /// TCP port.
    pub const PORT: &str = "port";
    /// Executable name.
    pub const APPLICATION: &str = "application";
    /// OS user.
    pub const USER: &str = "user";
    /// Session scope.
    pub const SESSION: &str = "session";
}

/// Key/value store of announced service instances.
///
/// Implementations must be usable from any thread. A substrate that cannot
/// currently reach its backing service reports `is_available() == false`
/// and fails `announce` with `Error::Discovery`.
pub trait Discovery: Send + Sync {
    /// Publish `record` under `service_type`, replacing any record with the
    /// same instance name.
    fn announce(&self, service_type: &str, record: &DiscoveryRecord) -> Result<()>;

    /// Retract a previously announced instance.
    fn withdraw(&self, instance: &str) -> Result<()>;

    /// Instance names currently announced under `service_type`.
    fn browse(&self, service_type: &str) -> Result<Vec<String>>;

    /// Property `key` of `instance`.
    fn get(&self, instance: &str, key: &str) -> Option<String>;

    /// True when `instance` carries property `key`.
    fn contains_key(&self, instance: &str, key: &str) -> bool {
        self.get(instance, key).is_some()
    }

    /// True when the substrate can currently announce and browse.
    fn is_available(&self) -> bool {
        true
    }
}

/// One announced publisher endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    /// Unique instance name on the substrate.
    pub instance: String,
    /// Identity of the announcing process, `None` if absent or unparsable.
    pub id: Option<ProcessIdentity>,
    /// Host the publisher is reachable on.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Executable name.
    pub application: String,
    /// OS user.
    pub user: String,
    /// Session scope; `None` when the record carries no session key.
    pub session: Option<String>,
}

impl DiscoveryRecord {
    /// Instance name derived from the application and endpoint.
    pub fn instance_name(application: &str, uri: &Uri) -> String {
        format!("{}@{}", application, uri.address())
    }

    /// Properties in announcement order.
    pub fn properties(&self) -> Vec<(String, String)> {
        let mut props = Vec::with_capacity(6);
        if let Some(id) = self.id {
            props.push((keys::ID.to_string(), id.to_string()));
        }
        props.push((keys::HOST.to_string(), self.host.clone()));
        props.push((keys::PORT.to_string(), self.port.to_string()));
        props.push((keys::APPLICATION.to_string(), self.application.clone()));
        props.push((keys::USER.to_string(), self.user.clone()));
        if let Some(session) = &self.session {
            props.push((keys::SESSION.to_string(), session.clone()));
        }
        props
    }

    /// Read `instance` back from a substrate.
    ///
    /// Returns `None` when the record lacks a usable host or port.
    pub fn fetch(discovery: &dyn Discovery, instance: &str) -> Option<Self> {
        let host = discovery.get(instance, keys::HOST).filter(|h| !h.is_empty())?;
        let port = discovery
            .get(instance, keys::PORT)?
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)?;
        Some(Self {
            instance: instance.to_string(),
            id: discovery
                .get(instance, keys::ID)
                .and_then(|s| ProcessIdentity::parse(&s)),
            host,
            port,
            application: discovery
                .get(instance, keys::APPLICATION)
                .unwrap_or_default(),
            user: discovery.get(instance, keys::USER).unwrap_or_default(),
            session: discovery.get(instance, keys::SESSION),
        })
    }

    /// Endpoint to connect to.
    pub fn uri(&self) -> Uri {
        Uri::new(self.host.clone(), self.port)
    }
}

/// How a record without a `session` key is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPolicy {
    /// A missing session key matches any subscriber session.
    #[default]
    AllowMissing,
    /// Only records carrying an identical session match.
    Strict,
}

impl SessionPolicy {
    /// Does a record announcing `theirs` match a subscriber in `ours`?
    pub fn matches(self, ours: &str, theirs: Option<&str>) -> bool {
        match theirs {
            Some(session) => session == ours,
            None => self == SessionPolicy::AllowMissing,
        }
    }
}
