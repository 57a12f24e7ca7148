// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messaging context shared by publishers and subscribers.

use crate::config::TransportConfig;
use crate::discovery::{Discovery, SessionPolicy};
use crate::identity::ProcessIdentity;
use std::fmt;
use std::sync::Arc;

/// Process-level state every endpoint is created against.
///
/// Holds the identity used for self-suppression, transport tunables, the
/// discovery substrate and the session matching policy. Endpoints built
/// without an explicit context get a private default one; passing the same
/// `Arc<Context>` to several endpoints makes them share it.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use zpubsub::{Context, LocalDiscovery, ProcessIdentity};
///
/// let registry = LocalDiscovery::new();
/// let machine_a = Context::builder()
///     .identity(ProcessIdentity::new())
///     .discovery(Arc::new(registry.clone()))
///     .build();
/// assert!(machine_a.discovery().is_some());
/// ```
pub struct Context {
    identity: ProcessIdentity,
    transport: TransportConfig,
    discovery: Option<Arc<dyn Discovery>>,
    session_policy: SessionPolicy,
}

impl Context {
    /// Default context: process identity, default transport and the
    /// process-wide discovery substrate (when available).
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    /// Start building a context.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Identity announced by publishers and compared by subscribers.
    pub fn identity(&self) -> ProcessIdentity {
        self.identity
    }

    /// Transport tunables.
    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    /// Discovery substrate, if any.
    pub fn discovery(&self) -> Option<&Arc<dyn Discovery>> {
        self.discovery.as_ref()
    }

    /// How records without a session are matched.
    pub fn session_policy(&self) -> SessionPolicy {
        self.session_policy
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("identity", &self.identity)
            .field("transport", &self.transport)
            .field("discovery", &self.discovery.is_some())
            .field("session_policy", &self.session_policy)
            .finish()
    }
}

#[derive(Default)]
enum DiscoveryChoice {
    #[default]
    ProcessDefault,
    Custom(Arc<dyn Discovery>),
    Disabled,
}

/// Builder for [`Context`].
#[derive(Default)]
pub struct ContextBuilder {
    identity: Option<ProcessIdentity>,
    transport: TransportConfig,
    discovery: DiscoveryChoice,
    session_policy: SessionPolicy,
}

impl ContextBuilder {
    /// Use `identity` instead of the process identity.
    pub fn identity(mut self, identity: ProcessIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Transport tunables.
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Use a specific discovery substrate.
    pub fn discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = DiscoveryChoice::Custom(discovery);
        self
    }

    /// Build without any discovery substrate.
    pub fn no_discovery(mut self) -> Self {
        self.discovery = DiscoveryChoice::Disabled;
        self
    }

    /// Session matching policy.
    pub fn session_policy(mut self, policy: SessionPolicy) -> Self {
        self.session_policy = policy;
        self
    }

    /// Build the context.
    pub fn build(self) -> Arc<Context> {
        let discovery = match self.discovery {
            DiscoveryChoice::Custom(d) => Some(d),
            DiscoveryChoice::Disabled => None,
            DiscoveryChoice::ProcessDefault => process_discovery(),
        };
        Arc::new(Context {
            identity: self.identity.unwrap_or_else(ProcessIdentity::process),
            transport: self.transport,
            discovery,
            session_policy: self.session_policy,
        })
    }
}

#[cfg(feature = "multicast-discovery")]
fn process_discovery() -> Option<Arc<dyn Discovery>> {
    match crate::discovery::MulticastDiscovery::shared() {
        Ok(d) => Some(d),
        Err(e) => {
            log::warn!("[context] Discovery unavailable: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "multicast-discovery"))]
fn process_discovery() -> Option<Arc<dyn Discovery>> {
    log::debug!("[context] Built without a discovery substrate");
    None
}
