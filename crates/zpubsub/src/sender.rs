// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket holder shared by publishers and subscribers.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::transport::{primary_host, TransportSocket};
use crate::uri::Uri;
use std::sync::Arc;

/// Owns one transport socket, its endpoint URI and the context it was
/// created in.
///
/// For a binding socket, [`init_uri`](Self::init_uri) replaces an
/// unspecified host and port with the real interface address and the
/// OS-assigned port.
#[derive(Debug)]
pub struct Sender<S> {
    context: Arc<Context>,
    uri: Uri,
    socket: S,
}

impl<S: TransportSocket> Sender<S> {
    /// Create the socket for `uri`.
    pub fn new(uri: Uri, context: Arc<Context>) -> Result<Self> {
        let socket = S::open(&uri, context.transport()).map_err(|e| {
            Error::Connection(format!("cannot open {:?} socket on {}: {}", S::KIND, uri, e))
        })?;
        Ok(Self {
            context,
            uri,
            socket,
        })
    }

    /// Fill in the unspecified host and port from the bound address.
    ///
    /// An unspecified host becomes the `ZPUBSUB_HOST_IP` override, the first
    /// non-loopback IPv4 interface or loopback, in that order. A no-op for
    /// sockets that do not bind.
    pub fn init_uri(&mut self) -> Result<()> {
        let Some(bound) = self.socket.local_addr() else {
            return Ok(());
        };
        if self.uri.host().is_none() {
            if bound.ip().is_unspecified() {
                self.uri.set_host(primary_host());
            } else {
                self.uri.set_host(bound.ip().to_string());
            }
        }
        if self.uri.port().is_none() {
            self.uri.set_port(bound.port());
        }
        if !self.uri.is_fully_qualified() {
            return Err(Error::Connection(format!(
                "bound endpoint {} has no usable port",
                self.uri
            )));
        }
        log::debug!("[sender] Endpoint is {}", self.uri);
        Ok(())
    }

    /// `host:port` of the endpoint.
    pub fn address(&self) -> String {
        self.uri.address()
    }

    /// Endpoint URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Context the socket was created in.
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Underlying socket.
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Underlying socket, mutably.
    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{PubSocket, SubSocket};

    fn context() -> Arc<Context> {
        Context::builder().no_discovery().build()
    }

    #[test]
    fn test_init_uri_fills_host_and_port() {
        let mut sender: Sender<PubSocket> =
            Sender::new(Uri::parse("tcp://*:0").unwrap(), context()).unwrap();
        sender.init_uri().unwrap();
        let uri = sender.uri();
        assert!(uri.is_fully_qualified());
        assert_ne!(uri.port(), Some(0));
        assert_eq!(uri.port(), Some(sender.socket().local_addr().port()));
        assert!(!sender.address().contains('*'));
    }

    #[test]
    fn test_init_uri_keeps_explicit_host() {
        let mut sender: Sender<PubSocket> =
            Sender::new(Uri::parse("tcp://127.0.0.1:0").unwrap(), context()).unwrap();
        sender.init_uri().unwrap();
        assert_eq!(sender.uri().host(), Some("127.0.0.1"));
    }

    #[test]
    fn test_bind_conflict_is_connection_error() {
        let blocker = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let taken = blocker.local_addr().unwrap().port();

        let result: Result<Sender<PubSocket>> =
            Sender::new(Uri::new("127.0.0.1", taken), context());
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[test]
    fn test_sub_sender_does_not_bind() {
        let mut sender: Sender<SubSocket> = Sender::new(Uri::any(), context()).unwrap();
        sender.init_uri().unwrap();
        assert_eq!(sender.uri(), &Uri::any());
    }
}
