// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP transport with publisher-side and subscriber-side topic filtering.
//!
//! # Architecture
//!
//! ```text
//! +------------------+                          +------------------+
//! |    PubSocket     |  <-- greeting, SUB cmds  |    SubSocket     |
//! |  mio listener    |                          |  one Connection  |
//! |  per-peer prefix |  --> greeting, messages  |  per endpoint    |
//! |  filter tables   |                          |  local filter    |
//! +------------------+                          +------------------+
//! ```
//!
//! Nothing here owns a thread. The publisher side is serviced whenever the
//! application sends; the subscriber side is serviced by the
//! [`Receiver`](crate::Receiver) that polls its connections.

mod connection;
pub mod frame;
mod pub_socket;
mod sub_socket;

pub use frame::{Command, FrameCodec, Inbound};
pub use pub_socket::PubSocket;
pub use sub_socket::SubSocket;

use crate::config::{TransportConfig, HOST_IP_ENV_VAR};
use crate::uri::Uri;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Role of a transport socket, announced in the connection greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    /// Fan-out sender, binds and accepts.
    Pub,
    /// Filtered receiver, connects to publishers.
    Sub,
}

impl SocketKind {
    pub(crate) fn wire_code(self) -> u8 {
        match self {
            SocketKind::Pub => 1,
            SocketKind::Sub => 2,
        }
    }

    pub(crate) fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SocketKind::Pub),
            2 => Some(SocketKind::Sub),
            _ => None,
        }
    }

    /// Kind expected at the other end of a connection.
    pub fn peer(self) -> Self {
        match self {
            SocketKind::Pub => SocketKind::Sub,
            SocketKind::Sub => SocketKind::Pub,
        }
    }
}

/// Socket owned by a [`Sender`](crate::Sender).
pub trait TransportSocket: Sized + Send {
    /// Role of this socket.
    const KIND: SocketKind;

    /// Create the socket for `uri` (binding it when the role requires).
    fn open(uri: &Uri, config: &TransportConfig) -> io::Result<Self>;

    /// Locally bound address, if the socket binds.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Host name filled into an unspecified bound URI.
///
/// Honors `ZPUBSUB_HOST_IP`, then the first non-loopback IPv4 interface,
/// then falls back to loopback.
pub fn primary_host() -> String {
    if let Ok(var) = std::env::var(HOST_IP_ENV_VAR) {
        if let Ok(addr) = var.parse::<IpAddr>() {
            log::debug!("[transport] Using {} override: {}", HOST_IP_ENV_VAR, addr);
            return addr.to_string();
        }
        log::debug!(
            "[transport] Invalid {}='{}' -- falling back to auto-detect",
            HOST_IP_ENV_VAR,
            var
        );
    }

    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => {
            for (name, ip) in interfaces {
                if let IpAddr::V4(ipv4) = ip {
                    if !ipv4.is_loopback() {
                        log::debug!("[transport] Using interface {} ({})", ipv4, name);
                        return ipv4.to_string();
                    }
                }
            }
        }
        Err(e) => {
            log::debug!("[transport] Failed to list network interfaces: {}", e);
        }
    }

    log::debug!("[transport] No non-loopback interface found, using loopback");
    Ipv4Addr::LOCALHOST.to_string()
}
