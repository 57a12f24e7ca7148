// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publishing endpoint.
//!
//! A [`Publisher`] binds a pub socket, announces the bound endpoint on the
//! discovery substrate (unless its session is [`Session::Null`]) and sends
//! every event as a two-frame message: the 16-byte [`EventId`] header,
//! then the payload. An empty payload is sent as the header frame alone.

use crate::config::{application_name, os_user, Session, SERVICE_TYPE};
use crate::context::Context;
use crate::discovery::DiscoveryRecord;
use crate::error::{Error, Result};
use crate::event::{Event, EventId, EventRegistry};
use crate::sender::Sender;
use crate::transport::PubSocket;
use crate::uri::Uri;
use std::sync::Arc;

/// Default bind URI: any interface, OS-assigned port.
pub const DEFAULT_PUBLISHER_URI: &str = "tcp://*:0";

/// Bound, optionally announced publishing endpoint.
///
/// # Example
///
/// ```rust,no_run
/// use zpubsub::{EventId, Publisher};
///
/// let mut publisher = Publisher::with_session("demo")?;
/// publisher.publish(EventId::from_name("demo.Ping"), b"hello");
/// # Ok::<(), zpubsub::Error>(())
/// ```
#[derive(Debug)]
pub struct Publisher {
    sender: Sender<PubSocket>,
    session: Option<String>,
    announced: Option<String>,
}

impl Publisher {
    /// Bind to `tcp://*:0` in the default session.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Bind to `tcp://*:0` in `session`.
    pub fn with_session(session: impl Into<Session>) -> Result<Self> {
        Self::builder().session(session).build()
    }

    /// Bind to `uri` in the default session.
    pub fn with_uri(uri: &str) -> Result<Self> {
        Self::builder().uri(uri).build()
    }

    /// Bind to `uri` in `session`.
    pub fn with_uri_and_session(uri: &str, session: impl Into<Session>) -> Result<Self> {
        Self::builder().uri(uri).session(session).build()
    }

    /// Start building a publisher.
    pub fn builder() -> PublisherBuilder {
        PublisherBuilder::default()
    }

    /// Send `payload` under `id` to every matching subscriber.
    ///
    /// Never blocks: subscribers whose queue is full miss the message.
    /// Returns `false` (and logs) when the transport rejected the message.
    pub fn publish(&mut self, id: EventId, payload: &[u8]) -> bool {
        let header = id.to_wire();
        let result = if payload.is_empty() {
            self.sender.socket_mut().send(&[header.as_slice()])
        } else {
            self.sender.socket_mut().send(&[header.as_slice(), payload])
        };
        match result {
            Ok(peers) => {
                log::trace!("[pub] {} -> {} peer(s), {} bytes", id, peers, payload.len());
                true
            }
            Err(e) => {
                log::warn!("[pub] Failed to publish {} on {}: {}", id, self.uri(), e);
                false
            }
        }
    }

    /// Encode and publish a typed event.
    pub fn publish_event<E: Event>(&mut self, event: &E) -> bool {
        match event.encode() {
            Ok(payload) => self.publish(E::event_id(), &payload),
            Err(e) => {
                log::warn!("[pub] Failed to encode {}: {}", E::NAME, e);
                false
            }
        }
    }

    /// Encode `json` with the schema registered as `name` and publish it.
    pub fn publish_json(
        &mut self,
        registry: &EventRegistry,
        name: &str,
        json: &serde_json::Value,
    ) -> bool {
        match registry.from_json(name, json) {
            Ok((id, payload)) => self.publish(id, &payload),
            Err(e) => {
                log::warn!("[pub] Failed to encode {} from JSON: {}", name, e);
                false
            }
        }
    }

    /// Accept new subscribers, apply their subscriptions and flush queued
    /// output without sending anything.
    pub fn flush(&mut self) -> bool {
        match self.sender.socket_mut().service() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[pub] Service failed on {}: {}", self.uri(), e);
                false
            }
        }
    }

    /// Bound endpoint, fully qualified.
    pub fn uri(&self) -> &Uri {
        self.sender.uri()
    }

    /// `host:port` of the bound endpoint.
    pub fn address(&self) -> String {
        self.sender.address()
    }

    /// Resolved session, `None` when discovery is disabled.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Instance name on the discovery substrate, if announced.
    pub fn instance(&self) -> Option<&str> {
        self.announced.as_deref()
    }

    /// Number of connected subscribers.
    pub fn peer_count(&self) -> usize {
        self.sender.socket().peer_count()
    }

    /// Messages dropped because a subscriber queue was full.
    pub fn dropped(&self) -> u64 {
        self.sender.socket().dropped()
    }

    /// Context the publisher was created in.
    pub fn context(&self) -> &Arc<Context> {
        self.sender.context()
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        let Some(instance) = self.announced.take() else {
            return;
        };
        if let Some(discovery) = self.sender.context().discovery() {
            if let Err(e) = discovery.withdraw(&instance) {
                log::debug!("[pub] Failed to withdraw {}: {}", instance, e);
            }
        }
    }
}

/// Builder for [`Publisher`].
#[derive(Debug)]
pub struct PublisherBuilder {
    uri: String,
    session: Session,
    context: Option<Arc<Context>>,
    application: Option<String>,
    require_discovery: bool,
}

impl Default for PublisherBuilder {
    fn default() -> Self {
        Self {
            uri: DEFAULT_PUBLISHER_URI.to_string(),
            session: Session::Default,
            context: None,
            application: None,
            require_discovery: false,
        }
    }
}

impl PublisherBuilder {
    /// Bind URI (default `tcp://*:0`).
    pub fn uri(mut self, uri: &str) -> Self {
        self.uri = uri.to_string();
        self
    }

    /// Session scope (default: `ZPUBSUB_SESSION` or the OS user).
    pub fn session(mut self, session: impl Into<Session>) -> Self {
        self.session = session.into();
        self
    }

    /// Create in `context` instead of a private default one.
    pub fn context(mut self, context: Arc<Context>) -> Self {
        self.context = Some(context);
        self
    }

    /// Application name announced to browsers (default: executable name).
    pub fn application(mut self, application: &str) -> Self {
        self.application = Some(application.to_string());
        self
    }

    /// Fail construction instead of running unannounced when the discovery
    /// substrate is unavailable.
    pub fn require_discovery(mut self, require: bool) -> Self {
        self.require_discovery = require;
        self
    }

    /// Bind, fill in the endpoint and announce it.
    pub fn build(self) -> Result<Publisher> {
        let session = self.session.resolve()?;
        let uri = Uri::parse(&self.uri)?;
        let context = self.context.unwrap_or_else(Context::new);

        let mut sender: Sender<PubSocket> = Sender::new(uri, context)?;
        sender.init_uri()?;
        log::info!("[pub] Bound {}", sender.uri());

        let mut publisher = Publisher {
            sender,
            session,
            announced: None,
        };

        if let Some(session) = publisher.session.clone() {
            let application = self.application.unwrap_or_else(application_name);
            publisher.announced =
                announce(&publisher, session, &application, self.require_discovery)?;
        }
        Ok(publisher)
    }
}

fn announce(
    publisher: &Publisher,
    session: String,
    application: &str,
    required: bool,
) -> Result<Option<String>> {
    let context = publisher.context();
    let Some(discovery) = context.discovery() else {
        if required {
            return Err(Error::Discovery(
                "no discovery substrate configured".to_string(),
            ));
        }
        log::debug!("[pub] No discovery substrate, {} not announced", publisher.uri());
        return Ok(None);
    };

    let uri = publisher.uri();
    let record = DiscoveryRecord {
        instance: DiscoveryRecord::instance_name(application, uri),
        id: Some(context.identity()),
        host: uri.host().unwrap_or_default().to_string(),
        port: uri.port().unwrap_or_default(),
        application: application.to_string(),
        user: os_user(),
        session: Some(session),
    };

    match discovery.announce(SERVICE_TYPE, &record) {
        Ok(()) => {
            log::info!(
                "[pub] Announced {} in session '{}'",
                record.instance,
                record.session.as_deref().unwrap_or_default()
            );
            Ok(Some(record.instance))
        }
        Err(e) if required => Err(e),
        Err(e) => {
            log::warn!("[pub] Running unannounced: {}", e);
            Ok(None)
        }
    }
}
