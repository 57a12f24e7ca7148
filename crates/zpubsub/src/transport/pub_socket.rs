// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publishing socket: accepts subscribers and forwards matching messages.

use super::connection::Connection;
use super::frame::{self, Command, Inbound};
use super::{SocketKind, TransportSocket};
use crate::config::TransportConfig;
use crate::uri::Uri;
use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

/// Listen backlog for the publisher socket.
const LISTEN_BACKLOG: i32 = 128;

struct Peer {
    conn: Connection,
    /// Prefix -> subscription count
    subscriptions: HashMap<Vec<u8>, usize>,
    closed: bool,
}

impl Peer {
    fn matches(&self, topic: &[u8]) -> bool {
        self.subscriptions
            .keys()
            .any(|prefix| topic.starts_with(prefix))
    }

    /// Read subscription commands and flush pending output.
    fn pump(&mut self) -> io::Result<()> {
        let eof = self.conn.read_available()?;
        while let Some(unit) = self.conn.next_inbound()? {
            match unit {
                Inbound::Command(Command::Subscribe(prefix)) => {
                    log::debug!(
                        "[pub] {} subscribed to {}",
                        self.conn.remote_addr(),
                        hex(&prefix)
                    );
                    *self.subscriptions.entry(prefix).or_insert(0) += 1;
                }
                Inbound::Command(Command::Unsubscribe(prefix)) => {
                    log::debug!(
                        "[pub] {} unsubscribed from {}",
                        self.conn.remote_addr(),
                        hex(&prefix)
                    );
                    if let Some(count) = self.subscriptions.get_mut(&prefix) {
                        *count -= 1;
                        if *count == 0 {
                            self.subscriptions.remove(&prefix);
                        }
                    }
                }
                Inbound::Message(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "subscriber sent a data message",
                    ));
                }
                Inbound::Greeting(_) => {}
            }
        }
        if eof {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.conn.flush()
    }
}

/// Bound publisher socket.
///
/// Not internally threaded: [`service`](Self::service) (called from
/// [`send`](Self::send) and by the owner) accepts new subscribers, applies
/// their subscription commands and flushes queued output. Peers whose queue
/// exceeds the configured limit drop new messages instead of blocking.
pub struct PubSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: TransportConfig,
    peers: Vec<Peer>,
    dropped: u64,
}

impl PubSocket {
    /// Bind to `addr` with `SO_REUSEADDR`.
    pub fn bind(addr: SocketAddr, config: &TransportConfig) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;

        let std_listener: std::net::TcpListener = socket.into();
        let local_addr = std_listener.local_addr()?;
        let listener = TcpListener::from_std(std_listener);
        log::debug!("[pub] Listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            config: config.clone(),
            peers: Vec::new(),
            dropped: 0,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected subscribers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Messages dropped because a peer queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Accept pending subscribers, apply their commands and flush output.
    pub fn service(&mut self) -> io::Result<()> {
        self.accept_pending()?;
        for peer in &mut self.peers {
            if let Err(e) = peer.pump() {
                log::debug!("[pub] Closing {}: {}", peer.conn.remote_addr(), e);
                peer.closed = true;
            }
        }
        self.peers.retain(|p| !p.closed);
        Ok(())
    }

    /// Send a multipart message to every peer subscribed to its first frame.
    ///
    /// Returns the number of peers the message was queued for.
    pub fn send<B: AsRef<[u8]>>(&mut self, parts: &[B]) -> io::Result<usize> {
        let Some(topic) = parts.first() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "message has no frames",
            ));
        };
        if parts.len() > frame::MAX_MESSAGE_FRAMES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} frames exceeds max {}",
                    parts.len(),
                    frame::MAX_MESSAGE_FRAMES
                ),
            ));
        }
        if let Some(part) = parts
            .iter()
            .find(|p| p.as_ref().len() > self.config.max_frame_size)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame of {} bytes exceeds max {}",
                    part.as_ref().len(),
                    self.config.max_frame_size
                ),
            ));
        }

        self.service()?;

        let topic = topic.as_ref();
        let len = frame::encoded_len(parts);
        let limit = self.config.send_queue_limit;
        let mut encoded: Option<Vec<u8>> = None;
        let mut delivered = 0;

        for peer in &mut self.peers {
            if !peer.matches(topic) {
                continue;
            }
            if peer.conn.queued_len() + len > limit {
                self.dropped += 1;
                log::debug!(
                    "[pub] Queue full for {} ({} bytes), dropping message",
                    peer.conn.remote_addr(),
                    peer.conn.queued_len()
                );
                continue;
            }
            let bytes = encoded.get_or_insert_with(|| {
                let mut buf = Vec::with_capacity(len);
                frame::encode_message(parts, &mut buf);
                buf
            });
            peer.conn.queue(bytes);
            if let Err(e) = peer.conn.flush() {
                log::debug!("[pub] Closing {}: {}", peer.conn.remote_addr(), e);
                peer.closed = true;
                continue;
            }
            delivered += 1;
        }
        self.peers.retain(|p| !p.closed);
        Ok(delivered)
    }

    fn accept_pending(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, remote_addr)) => {
                    log::debug!("[pub] Accepted subscriber {}", remote_addr);
                    let conn =
                        Connection::accepted(stream, remote_addr, SocketKind::Pub, &self.config);
                    self.peers.push(Peer {
                        conn,
                        subscriptions: HashMap::new(),
                        closed: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl TransportSocket for PubSocket {
    const KIND: SocketKind = SocketKind::Pub;

    fn open(uri: &Uri, config: &TransportConfig) -> io::Result<Self> {
        let addr = uri
            .bind_addr()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        Self::bind(addr, config)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }
}

impl std::fmt::Debug for PubSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSocket")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.peers.len())
            .field("dropped", &self.dropped)
            .finish()
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::time::{Duration, Instant};

    fn raw_subscriber(addr: SocketAddr, prefixes: &[&[u8]]) -> std::net::TcpStream {
        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        let mut buf = frame::encode_greeting(SocketKind::Sub).to_vec();
        for prefix in prefixes {
            frame::encode_command(&Command::Subscribe(prefix.to_vec()), &mut buf);
        }
        stream.write_all(&buf).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        stream
    }

    fn wait_for_peers(socket: &mut PubSocket, subscribed: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            socket.service().unwrap();
            let ready = socket
                .peers
                .iter()
                .filter(|p| !p.subscriptions.is_empty())
                .count();
            if ready >= subscribed {
                return;
            }
            assert!(Instant::now() < deadline, "subscribers never arrived");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let socket = PubSocket::bind("127.0.0.1:0".parse().unwrap(), &TransportConfig::default())
            .unwrap();
        assert_ne!(socket.local_addr().port(), 0);
        assert_eq!(socket.peer_count(), 0);
    }

    #[test]
    fn test_prefix_filtering() {
        let mut socket =
            PubSocket::bind("127.0.0.1:0".parse().unwrap(), &TransportConfig::default()).unwrap();
        let addr = socket.local_addr();
        let mut matching = raw_subscriber(addr, &[b"ab"]);
        let _other = raw_subscriber(addr, &[b"zz"]);
        wait_for_peers(&mut socket, 2);

        assert_eq!(socket.send(&[b"abc".as_slice(), b"x".as_slice()]).unwrap(), 1);
        assert_eq!(socket.send(&[b"nomatch".as_slice()]).unwrap(), 0);

        let mut greeting = [0u8; frame::GREETING_SIZE];
        matching.read_exact(&mut greeting).unwrap();
        assert_eq!(greeting, frame::encode_greeting(SocketKind::Pub));

        let mut expected = Vec::new();
        frame::encode_message(&[b"abc".as_slice(), b"x".as_slice()], &mut expected);
        let mut body = vec![0u8; expected.len()];
        matching.read_exact(&mut body).unwrap();
        assert_eq!(body, expected);
    }

    #[test]
    fn test_queue_limit_drops() {
        let config = TransportConfig::default().with_send_queue_limit(64);
        let mut socket = PubSocket::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        let _sub = raw_subscriber(socket.local_addr(), &[b""]);
        wait_for_peers(&mut socket, 1);

        let big = vec![0u8; 128];
        assert_eq!(socket.send(&[big.as_slice()]).unwrap(), 0);
        assert_eq!(socket.dropped(), 1);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let config = TransportConfig::default().with_max_frame_size(8);
        let mut socket = PubSocket::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        let err = socket.send(&[[0u8; 9].as_slice()]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_too_many_frames_rejected() {
        let mut socket =
            PubSocket::bind("127.0.0.1:0".parse().unwrap(), &TransportConfig::default()).unwrap();
        let parts = vec![b"x".to_vec(); frame::MAX_MESSAGE_FRAMES + 1];
        let err = socket.send(&parts).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_disconnected_peer_removed() {
        let mut socket =
            PubSocket::bind("127.0.0.1:0".parse().unwrap(), &TransportConfig::default()).unwrap();
        let sub = raw_subscriber(socket.local_addr(), &[b""]);
        wait_for_peers(&mut socket, 1);
        drop(sub);

        let deadline = Instant::now() + Duration::from_secs(5);
        while socket.peer_count() > 0 {
            assert!(Instant::now() < deadline);
            socket.service().unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}
