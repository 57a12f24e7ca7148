// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscribing endpoint.
//!
//! A [`Subscriber`] either connects to one explicit endpoint or browses the
//! discovery substrate and connects to every publisher announced in its
//! session (skipping publishers of its own process). Callbacks are keyed by
//! [`EventId`] and run on the thread calling [`Subscriber::receive`].
//!
//! Callbacks run while the receive group is locked: they must not call back
//! into a subscriber of the same group.

use crate::config::{Session, SERVICE_TYPE};
use crate::context::Context;
use crate::discovery::DiscoveryRecord;
use crate::error::{Error, Result};
use crate::event::{Event, EventId, EventRegistry};
use crate::receiver::{Participant, ReadySocket, Receiver, ReceiverGroup, SocketSet, Timeout};
use crate::sender::Sender;
use crate::transport::SubSocket;
use crate::uri::Uri;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked with the payload of a received event (empty for an
/// event published without payload).
pub type Callback = Box<dyn FnMut(&[u8]) + Send>;

/// Receiving side state, polled by the group scheduler.
struct SubscriberCore {
    sender: Sender<SubSocket>,
    session: Option<String>,
    discovery_enabled: bool,
    callbacks: HashMap<EventId, Callback>,
}

impl SubscriberCore {
    fn browse(&mut self) {
        let context = Arc::clone(self.sender.context());
        let Some(discovery) = context.discovery() else {
            return;
        };
        let Some(session) = self.session.as_deref() else {
            return;
        };

        let instances = match discovery.browse(SERVICE_TYPE) {
            Ok(instances) => instances,
            Err(e) => {
                log::debug!("[sub] Browse failed: {}", e);
                return;
            }
        };

        for instance in instances {
            let Some(record) = DiscoveryRecord::fetch(&**discovery, &instance) else {
                continue;
            };
            if record.id == Some(context.identity()) {
                continue;
            }
            if !context
                .session_policy()
                .matches(session, record.session.as_deref())
            {
                continue;
            }
            let uri = record.uri();
            let socket = self.sender.socket_mut();
            if socket.is_connected_to(&uri) {
                continue;
            }
            match socket.connect(&uri) {
                Ok(_) => log::info!("[sub] Discovered {} at {}", record.instance, uri),
                Err(e) => log::warn!("[sub] Cannot connect to {}: {}", uri, e),
            }
        }
    }

    fn dispatch(&mut self, parts: Vec<Vec<u8>>) -> Result<bool> {
        if parts.len() > 2 {
            return Err(Error::Protocol(format!(
                "expected at most 2 frames, got {}",
                parts.len()
            )));
        }
        let header = parts.first().map(Vec::as_slice).unwrap_or_default();
        let id = EventId::from_wire(header).ok_or_else(|| {
            Error::Protocol(format!(
                "header frame must be 16 bytes, got {}",
                header.len()
            ))
        })?;
        let callback = self
            .callbacks
            .get_mut(&id)
            .ok_or_else(|| Error::Protocol(format!("no callback registered for {}", id)))?;
        let payload = parts.get(1).map(Vec::as_slice).unwrap_or_default();
        callback(payload);
        Ok(true)
    }
}

impl Participant for SubscriberCore {
    fn add_sockets(&mut self, sockets: &mut SocketSet<'_>) {
        self.sender.socket_mut().add_sockets(sockets);
    }

    fn process(&mut self, ready: ReadySocket) -> Result<bool> {
        let socket = self.sender.socket_mut();
        socket.service(&ready);
        match socket.recv(ready.token) {
            Some(parts) => self.dispatch(parts),
            None => Ok(false),
        }
    }

    fn update(&mut self) {
        if self.discovery_enabled {
            self.browse();
        }
        self.sender.socket_mut().reconnect();
    }

    fn add_connection(&mut self, uri: &str) -> Result<bool> {
        let uri = parse_endpoint(uri)?;
        self.sender.socket_mut().connect(&uri)
    }
}

fn parse_endpoint(uri: &str) -> Result<Uri> {
    let uri = Uri::parse(uri)?;
    if !uri.is_fully_qualified() {
        return Err(Error::Config(format!(
            "subscriber uri '{}' needs an explicit host and a non-zero port",
            uri
        )));
    }
    Ok(uri)
}

/// Receiving endpoint with per-event callbacks.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use zpubsub::{EventId, Subscriber};
///
/// let subscriber = Subscriber::with_session("demo")?;
/// subscriber.subscribe(EventId::from_name("demo.Ping"), |payload| {
///     println!("got {} bytes", payload.len());
/// });
/// while subscriber.receive(Duration::from_millis(100))? {}
/// # Ok::<(), zpubsub::Error>(())
/// ```
pub struct Subscriber {
    core: Arc<Mutex<SubscriberCore>>,
    receiver: Receiver,
}

impl Subscriber {
    /// Discover publishers in the default session.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Discover publishers in `session`.
    pub fn with_session(session: impl Into<Session>) -> Result<Self> {
        Self::builder().session(session).build()
    }

    /// Connect to one explicit endpoint, bypassing discovery.
    pub fn with_uri(uri: &str) -> Result<Self> {
        Self::builder().uri(uri).build()
    }

    /// Start building a subscriber.
    pub fn builder() -> SubscriberBuilder {
        SubscriberBuilder::default()
    }

    /// Register `callback` for `id`.
    ///
    /// Returns `false` and leaves the existing callback in place when `id`
    /// is already subscribed.
    pub fn subscribe<F>(&self, id: EventId, callback: F) -> bool
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let mut core = self.core.lock();
        if core.callbacks.contains_key(&id) {
            log::debug!("[sub] {} already subscribed", id);
            return false;
        }
        core.callbacks.insert(id, Box::new(callback));
        core.sender.socket_mut().subscribe(&id.to_wire());
        log::debug!("[sub] Subscribed to {}", id);
        true
    }

    /// Register a typed callback for `E`; undecodable payloads are logged
    /// and skipped.
    pub fn subscribe_event<E, F>(&self, mut callback: F) -> bool
    where
        E: Event,
        F: FnMut(E) + Send + 'static,
    {
        self.subscribe(E::event_id(), move |payload| match E::decode(payload) {
            Ok(event) => callback(event),
            Err(e) => log::warn!("[sub] Failed to decode {}: {}", E::NAME, e),
        })
    }

    /// Keep `target` updated with the latest decoded `E`.
    pub fn subscribe_into<E: Event>(&self, target: Arc<Mutex<E>>) -> bool {
        self.subscribe_event::<E, _>(move |event: E| {
            *target.lock() = event;
        })
    }

    /// Render every received `id` through `registry` as JSON.
    pub fn subscribe_json<F>(&self, registry: &EventRegistry, id: EventId, mut callback: F) -> bool
    where
        F: FnMut(serde_json::Value) + Send + 'static,
    {
        let registry = registry.clone();
        self.subscribe(id, move |payload| match registry.to_json(id, payload) {
            Ok(json) => callback(json),
            Err(e) => log::warn!("[sub] Failed to render {} as JSON: {}", id, e),
        })
    }

    /// Remove the callback for `id`; returns `false` if there was none.
    ///
    /// Messages for `id` already in flight are discarded.
    pub fn unsubscribe(&self, id: EventId) -> bool {
        let mut core = self.core.lock();
        if core.callbacks.remove(&id).is_none() {
            return false;
        }
        core.sender.socket_mut().unsubscribe(&id.to_wire());
        log::debug!("[sub] Unsubscribed from {}", id);
        true
    }

    /// True when a callback is registered for `id`.
    pub fn is_subscribed(&self, id: EventId) -> bool {
        self.core.lock().callbacks.contains_key(&id)
    }

    /// Event ids with a registered callback, in no particular order.
    pub fn subscribed(&self) -> Vec<EventId> {
        self.core.lock().callbacks.keys().copied().collect()
    }

    /// Deliver at most one message to any member of this subscriber's
    /// receive group.
    ///
    /// Returns `Ok(false)` on timeout. Fails with [`Error::Protocol`] when a
    /// message cannot be dispatched and [`Error::Poll`] when the wait fails.
    pub fn receive(&self, timeout: impl Into<Timeout>) -> Result<bool> {
        self.receiver.receive(timeout)
    }

    /// Apply discovery and reconnect broken endpoints now.
    pub fn update(&self) {
        self.core.lock().update();
    }

    /// Connect to an additional explicit endpoint.
    ///
    /// Returns `Ok(false)` when already connected to it.
    pub fn add_connection(&self, uri: &str) -> Result<bool> {
        self.core.lock().add_connection(uri)
    }

    /// Endpoints this subscriber knows, in connection order.
    pub fn connections(&self) -> Vec<String> {
        self.core.lock().sender.socket().endpoints()
    }

    /// Resolved session, `None` for explicit-URI or null-session subscribers.
    pub fn session(&self) -> Option<String> {
        self.core.lock().session.clone()
    }

    /// Receive group this subscriber polls through.
    pub fn group(&self) -> &ReceiverGroup {
        self.receiver.group()
    }

    /// Context the subscriber was created in.
    pub fn context(&self) -> Arc<Context> {
        Arc::clone(self.core.lock().sender.context())
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.lock();
        f.debug_struct("Subscriber")
            .field("session", &core.session)
            .field("connections", &core.sender.socket().endpoints())
            .field("subscriptions", &core.callbacks.len())
            .finish()
    }
}

/// Builder for [`Subscriber`].
#[derive(Default)]
pub struct SubscriberBuilder {
    uri: Option<String>,
    session: Session,
    context: Option<Arc<Context>>,
    group: Option<ReceiverGroup>,
}

impl SubscriberBuilder {
    /// Connect to this endpoint instead of browsing.
    pub fn uri(mut self, uri: &str) -> Self {
        self.uri = Some(uri.to_string());
        self
    }

    /// Session to browse in (default: `ZPUBSUB_SESSION` or the OS user).
    pub fn session(mut self, session: impl Into<Session>) -> Self {
        self.session = session.into();
        self
    }

    /// Create in `context` instead of a private default one.
    pub fn context(mut self, context: Arc<Context>) -> Self {
        self.context = Some(context);
        self
    }

    /// Join an existing receive group.
    pub fn group(mut self, group: ReceiverGroup) -> Self {
        self.group = Some(group);
        self
    }

    /// Join the receive group of `other`.
    pub fn shared_with(self, other: &Subscriber) -> Self {
        self.group(other.group().clone())
    }

    /// Connect (or start browsing) and join the receive group.
    pub fn build(self) -> Result<Subscriber> {
        let explicit = self.uri.as_deref().map(parse_endpoint).transpose()?;
        // Explicit endpoints bypass discovery, so the session is never used
        let session = match explicit {
            Some(_) => None,
            None => self.session.resolve()?,
        };
        let context = self.context.unwrap_or_else(Context::new);

        let mut sender: Sender<SubSocket> = Sender::new(Uri::any(), context)?;
        let discovery_enabled = explicit.is_none() && session.is_some();
        if let Some(uri) = &explicit {
            sender.socket_mut().connect(uri)?;
            log::info!("[sub] Connecting to {}", uri);
        } else if let Some(session) = &session {
            log::info!("[sub] Browsing session '{}'", session);
        }

        let mut core = SubscriberCore {
            sender,
            session,
            discovery_enabled,
            callbacks: HashMap::new(),
        };
        if discovery_enabled {
            core.browse();
        }

        let core = Arc::new(Mutex::new(core));
        let participant: Arc<Mutex<dyn Participant>> = core.clone();
        let receiver = match self.group {
            Some(group) => group.join(Arc::downgrade(&participant)),
            None => Receiver::new(Arc::downgrade(&participant))?,
        };
        Ok(Subscriber { core, receiver })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> Arc<Context> {
        Context::builder().no_discovery().build()
    }

    #[test]
    fn test_explicit_uri_must_be_fully_qualified() {
        for uri in ["tcp://*:0", "tcp://127.0.0.1:0", "tcp://*:4000"] {
            let result = Subscriber::builder().uri(uri).context(quiet()).build();
            assert!(matches!(result, Err(Error::Config(_))), "{}", uri);
        }
    }

    #[test]
    fn test_empty_session_rejected() {
        let result = Subscriber::builder().session("").context(quiet()).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_double_subscribe_and_unsubscribe() {
        let subscriber = Subscriber::builder()
            .session(Session::Null)
            .context(quiet())
            .build()
            .unwrap();
        let id = EventId::from_name("a");
        assert!(subscriber.subscribe(id, |_| {}));
        assert!(!subscriber.subscribe(id, |_| {}));
        assert!(subscriber.is_subscribed(id));
        assert_eq!(subscriber.subscribed(), vec![id]);
        assert!(subscriber.unsubscribe(id));
        assert!(!subscriber.unsubscribe(id));
        assert!(!subscriber.is_subscribed(id));
    }

    #[test]
    fn test_dispatch_rejects_malformed_messages() {
        let subscriber = Subscriber::builder()
            .session(Session::Null)
            .context(quiet())
            .build()
            .unwrap();
        let id = EventId::from_name("a");
        subscriber.subscribe(id, |_| {});
        let mut core = subscriber.core.lock();

        let header = id.to_wire().to_vec();
        assert!(core.dispatch(vec![header.clone()]).unwrap());
        assert!(core.dispatch(vec![header.clone(), b"x".to_vec()]).unwrap());
        assert!(matches!(
            core.dispatch(vec![header.clone(), Vec::new(), Vec::new()]),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            core.dispatch(vec![vec![0u8; 15]]),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            core.dispatch(vec![EventId::from_name("b").to_wire().to_vec()]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_shared_group() {
        let a = Subscriber::builder()
            .session(Session::Null)
            .context(quiet())
            .build()
            .unwrap();
        let b = Subscriber::builder()
            .session(Session::Null)
            .context(quiet())
            .shared_with(&a)
            .build()
            .unwrap();
        assert!(a.group().ptr_eq(b.group()));
        assert_eq!(a.group().len(), 2);
        drop(b);
        assert_eq!(a.group().len(), 1);
    }

    #[test]
    fn test_add_connection_deduplicates() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let subscriber = Subscriber::builder()
            .session(Session::Null)
            .context(quiet())
            .build()
            .unwrap();
        let uri = format!("tcp://127.0.0.1:{}", port);
        assert!(subscriber.add_connection(&uri).unwrap());
        assert!(!subscriber.add_connection(&uri).unwrap());
        assert_eq!(subscriber.connections(), vec![uri]);
    }
}
