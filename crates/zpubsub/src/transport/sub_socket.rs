// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscribing socket: one connection per publisher endpoint.

use super::connection::{Connection, ConnectionState};
use super::frame::{Command, Inbound};
use super::pub_socket::hex;
use super::{SocketKind, TransportSocket};
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::receiver::{ReadySocket, Registration, SocketSet};
use crate::uri::Uri;
use mio::Token;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

/// Multipart message as received.
pub type Message = Vec<Vec<u8>>;

struct Endpoint {
    uri: Uri,
    key: String,
    /// Resolved address; two URIs naming the same address share one endpoint
    addr: SocketAddr,
    conn: Option<Connection>,
    registration: Registration,
    inbox: VecDeque<Message>,
    /// Peer gone, but buffered messages still wait for dispatch
    draining: bool,
    last_attempt: Instant,
}

impl Endpoint {
    fn is_live(&self) -> bool {
        self.conn.is_some() && !self.draining
    }
}

/// Subscriber socket.
///
/// Keeps one connection per distinct endpoint URI and re-establishes broken
/// ones after the configured reconnect interval, replaying every active
/// subscription on the new connection. Messages are filtered on the
/// publisher side and again locally, so nothing matching a retracted prefix
/// is handed out even if it was already in flight.
pub struct SubSocket {
    config: TransportConfig,
    endpoints: Vec<Endpoint>,
    filters: Vec<Vec<u8>>,
    filtered_out: u64,
}

impl SubSocket {
    /// Create an unconnected socket.
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            config: config.clone(),
            endpoints: Vec::new(),
            filters: Vec::new(),
            filtered_out: 0,
        }
    }

    /// Connect to a publisher endpoint.
    ///
    /// Returns `Ok(false)` when an endpoint resolving to the same address is
    /// already known (connected or waiting to reconnect).
    pub fn connect(&mut self, uri: &Uri) -> Result<bool> {
        let addr = uri.connect_addr()?;
        if self.endpoints.iter().any(|e| e.addr == addr) {
            return Ok(false);
        }
        let key = uri.to_string();
        let conn = open(uri, addr, &self.filters, &self.config)?;
        log::debug!("[sub] Connecting to {} ({})", key, addr);
        self.endpoints.push(Endpoint {
            uri: uri.clone(),
            key,
            addr,
            conn: Some(conn),
            registration: Registration::default(),
            inbox: VecDeque::new(),
            draining: false,
            last_attempt: Instant::now(),
        });
        Ok(true)
    }

    /// True when `uri` resolves to one of the known endpoints.
    pub fn is_connected_to(&self, uri: &Uri) -> bool {
        match uri.connect_addr() {
            Ok(addr) => self.endpoints.iter().any(|e| e.addr == addr),
            Err(_) => false,
        }
    }

    /// Known endpoint URIs, in connection order.
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.key.clone()).collect()
    }

    /// Number of endpoints whose publisher has completed the greeting.
    pub fn live_connections(&self) -> usize {
        self.endpoints
            .iter()
            .filter(|e| e.is_live() && e.conn.as_ref().is_some_and(Connection::is_greeted))
            .count()
    }

    /// Messages discarded by the local filter.
    pub fn filtered_out(&self) -> u64 {
        self.filtered_out
    }

    /// Start receiving messages whose first frame starts with `prefix`.
    ///
    /// Returns `false` when the prefix was already subscribed.
    pub fn subscribe(&mut self, prefix: &[u8]) -> bool {
        if self.filters.iter().any(|f| f == prefix) {
            return false;
        }
        self.filters.push(prefix.to_vec());
        self.broadcast(&Command::Subscribe(prefix.to_vec()));
        true
    }

    /// Stop receiving messages for `prefix`.
    ///
    /// Returns `false` when the prefix was not subscribed.
    pub fn unsubscribe(&mut self, prefix: &[u8]) -> bool {
        let Some(pos) = self.filters.iter().position(|f| f == prefix) else {
            return false;
        };
        self.filters.remove(pos);
        let filters = &self.filters;
        for ep in &mut self.endpoints {
            ep.inbox.retain(|parts| {
                let topic = parts.first().map(Vec::as_slice).unwrap_or_default();
                filters.iter().any(|f| topic.starts_with(f))
            });
        }
        self.broadcast(&Command::Unsubscribe(prefix.to_vec()));
        true
    }

    fn broadcast(&mut self, command: &Command) {
        for ep in &mut self.endpoints {
            if !ep.is_live() {
                continue;
            }
            let result = match ep.conn.as_mut() {
                Some(conn) => {
                    conn.queue_command(command);
                    conn.flush()
                }
                None => Ok(()),
            };
            if let Err(e) = result {
                close(ep, &e);
            }
        }
    }

    /// Re-open broken endpoints whose reconnect interval has elapsed and
    /// release drained ones.
    pub fn reconnect(&mut self) {
        let interval = self.config.reconnect_interval;
        for ep in &mut self.endpoints {
            if ep.draining && ep.inbox.is_empty() {
                ep.conn = None;
                ep.registration = Registration::default();
                ep.draining = false;
            }
            if ep.conn.is_some() || ep.last_attempt.elapsed() < interval {
                continue;
            }
            ep.last_attempt = Instant::now();
            match open(&ep.uri, ep.addr, &self.filters, &self.config) {
                Ok(conn) => {
                    log::debug!("[sub] Reconnecting to {}", ep.key);
                    ep.conn = Some(conn);
                }
                Err(e) => {
                    log::debug!("[sub] Reconnect to {} failed: {}", ep.key, e);
                }
            }
        }
    }

    /// Add every connection to the poll set.
    pub fn add_sockets(&mut self, sockets: &mut SocketSet<'_>) {
        for ep in &mut self.endpoints {
            let pending = !ep.inbox.is_empty();
            let Some(conn) = ep.conn.as_mut() else {
                continue;
            };
            if let Err(e) = sockets.add(conn.stream_mut(), &mut ep.registration, pending) {
                log::warn!("[sub] Failed to register connection to {}: {}", ep.key, e);
                close(ep, &e);
            }
        }
    }

    /// Perform the I/O signalled for one connection.
    pub fn service(&mut self, ready: &ReadySocket) {
        let Some(ep) = self
            .endpoints
            .iter_mut()
            .find(|e| e.registration.token() == Some(ready.token))
        else {
            return;
        };
        if ep.draining {
            return;
        }
        let Some(conn) = ep.conn.as_mut() else {
            return;
        };
        if let Err(e) = pump(conn, ready, &self.filters, &mut ep.inbox, &mut self.filtered_out)
        {
            close(ep, &e);
        }
    }

    /// Pop the next buffered message received on `token`.
    pub fn recv(&mut self, token: Token) -> Option<Message> {
        self.endpoints
            .iter_mut()
            .find(|e| e.registration.token() == Some(token))
            .and_then(|e| e.inbox.pop_front())
    }

    /// True when any connection holds a buffered message.
    pub fn has_pending(&self) -> bool {
        self.endpoints.iter().any(|e| !e.inbox.is_empty())
    }
}

impl TransportSocket for SubSocket {
    const KIND: SocketKind = SocketKind::Sub;

    fn open(_uri: &Uri, config: &TransportConfig) -> io::Result<Self> {
        Ok(Self::new(config))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl std::fmt::Debug for SubSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubSocket")
            .field("endpoints", &self.endpoints())
            .field("filters", &self.filters.iter().map(|p| hex(p)).collect::<Vec<_>>())
            .finish()
    }
}

fn open(
    uri: &Uri,
    addr: SocketAddr,
    filters: &[Vec<u8>],
    config: &TransportConfig,
) -> Result<Connection> {
    let mut conn = Connection::connect(addr, SocketKind::Sub, config)
        .map_err(|e| Error::Connection(format!("connect to {} failed: {}", uri, e)))?;
    for prefix in filters {
        conn.queue_command(&Command::Subscribe(prefix.clone()));
    }
    conn.flush()
        .map_err(|e| Error::Connection(format!("connect to {} failed: {}", uri, e)))?;
    Ok(conn)
}

fn pump(
    conn: &mut Connection,
    ready: &ReadySocket,
    filters: &[Vec<u8>],
    inbox: &mut VecDeque<Message>,
    filtered_out: &mut u64,
) -> io::Result<()> {
    conn.flush()?;
    let eof = if ready.readable || ready.closed {
        conn.read_available()?
    } else {
        false
    };

    while let Some(unit) = conn.next_inbound()? {
        match unit {
            Inbound::Message(parts) => {
                let topic = parts.first().map(Vec::as_slice).unwrap_or_default();
                if filters.iter().any(|f| topic.starts_with(f)) {
                    inbox.push_back(parts);
                } else {
                    *filtered_out += 1;
                    log::trace!("[sub] Dropping message for unsubscribed {}", hex(topic));
                }
            }
            Inbound::Command(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "publisher sent a subscription command",
                ));
            }
            Inbound::Greeting(_) => {}
        }
    }

    if eof {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    if ready.closed && conn.state() == ConnectionState::Connecting {
        return Err(io::ErrorKind::ConnectionRefused.into());
    }
    Ok(())
}

fn close(ep: &mut Endpoint, reason: &io::Error) {
    log::debug!("[sub] Connection to {} closed: {}", ep.key, reason);
    ep.last_attempt = Instant::now();
    if ep.inbox.is_empty() {
        ep.conn = None;
        ep.registration = Registration::default();
    } else {
        ep.draining = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PubSocket;

    fn listener() -> (PubSocket, Uri) {
        let socket =
            PubSocket::bind("127.0.0.1:0".parse().unwrap(), &TransportConfig::default()).unwrap();
        let uri = Uri::new("127.0.0.1", socket.local_addr().port());
        (socket, uri)
    }

    #[test]
    fn test_connect_is_deduplicated() {
        let (_publisher, uri) = listener();
        let mut socket = SubSocket::new(&TransportConfig::default());
        assert!(socket.connect(&uri).unwrap());
        assert!(!socket.connect(&uri).unwrap());
        assert!(socket.is_connected_to(&uri));
        assert_eq!(socket.live_connections(), 0);
        assert_eq!(socket.endpoints(), vec![uri.to_string()]);
    }

    #[test]
    fn test_connect_deduplicates_resolved_address() {
        let (_publisher, uri) = listener();
        let port = uri.port().unwrap();
        let by_name = Uri::parse(&format!("tcp://localhost:{}", port)).unwrap();

        let mut socket = SubSocket::new(&TransportConfig::default());
        assert!(socket.connect(&uri).unwrap());
        assert!(socket.is_connected_to(&by_name));
        assert!(!socket.connect(&by_name).unwrap());
        assert_eq!(socket.endpoints(), vec![uri.to_string()]);
    }

    #[test]
    fn test_connect_requires_full_uri() {
        let mut socket = SubSocket::new(&TransportConfig::default());
        let result = socket.connect(&Uri::parse("tcp://*:0").unwrap());
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(socket.endpoints().is_empty());
    }

    #[test]
    fn test_subscription_bookkeeping() {
        let mut socket = SubSocket::new(&TransportConfig::default());
        assert!(socket.subscribe(b"abc"));
        assert!(!socket.subscribe(b"abc"));
        assert!(socket.unsubscribe(b"abc"));
        assert!(!socket.unsubscribe(b"abc"));
        assert!(!socket.has_pending());
    }
}
