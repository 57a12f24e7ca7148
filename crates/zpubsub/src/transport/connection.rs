// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One non-blocking TCP connection with framing and an outbound queue.

use super::frame::{self, Command, FrameCodec, Inbound};
use super::SocketKind;
use crate::config::TransportConfig;
use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

/// Read chunk size for draining the socket.
const READ_CHUNK: usize = 16 * 1024;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    /// Non-blocking connect in progress
    Connecting,

    /// Connection established and operational
    Connected,
}

/// Framed connection shared by both socket roles.
///
/// Writes are queued and flushed opportunistically; reads drain the socket
/// until `WouldBlock` so edge-triggered readiness is never lost.
#[derive(Debug)]
pub(crate) struct Connection {
    stream: TcpStream,
    remote_addr: SocketAddr,
    state: ConnectionState,
    codec: FrameCodec,
    expected_peer: SocketKind,
    peer_greeted: bool,
    send_queue: Vec<u8>,
    send_offset: usize,
}

impl Connection {
    /// Start a non-blocking connect to `addr`.
    pub(crate) fn connect(
        addr: SocketAddr,
        local: SocketKind,
        config: &TransportConfig,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self::new(
            stream,
            addr,
            ConnectionState::Connecting,
            local,
            config,
        ))
    }

    /// Wrap a stream returned by `accept`.
    pub(crate) fn accepted(
        stream: TcpStream,
        addr: SocketAddr,
        local: SocketKind,
        config: &TransportConfig,
    ) -> Self {
        Self::new(stream, addr, ConnectionState::Connected, local, config)
    }

    fn new(
        stream: TcpStream,
        remote_addr: SocketAddr,
        state: ConnectionState,
        local: SocketKind,
        config: &TransportConfig,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(config.nodelay) {
            log::debug!("[transport] set_nodelay failed for {}: {}", remote_addr, e);
        }
        let mut conn = Self {
            stream,
            remote_addr,
            state,
            codec: FrameCodec::new(config.max_frame_size),
            expected_peer: local.peer(),
            peer_greeted: false,
            send_queue: Vec::new(),
            send_offset: 0,
        };
        conn.queue(&frame::encode_greeting(local));
        conn
    }

    pub(crate) fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Append raw encoded bytes to the outbound queue.
    pub(crate) fn queue(&mut self, bytes: &[u8]) {
        self.send_queue.extend_from_slice(bytes);
    }

    /// Append a subscription command to the outbound queue.
    pub(crate) fn queue_command(&mut self, command: &Command) {
        frame::encode_command(command, &mut self.send_queue);
    }

    /// Bytes queued but not yet written.
    pub(crate) fn queued_len(&self) -> usize {
        self.send_queue.len() - self.send_offset
    }

    /// Write as much of the queue as the socket accepts.
    ///
    /// While the connect is still in progress this only checks for a
    /// completed or failed handshake.
    pub(crate) fn flush(&mut self) -> io::Result<()> {
        if self.state == ConnectionState::Connecting {
            if let Some(e) = self.stream.take_error()? {
                return Err(e);
            }
            match self.stream.peer_addr() {
                Ok(_) => {
                    log::debug!("[transport] Connected to {}", self.remote_addr);
                    self.state = ConnectionState::Connected;
                }
                Err(e) if e.kind() == io::ErrorKind::NotConnected => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        while self.send_offset < self.send_queue.len() {
            match self.stream.write(&self.send_queue[self.send_offset..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.send_offset += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if self.send_offset == self.send_queue.len() {
            self.send_queue.clear();
            self.send_offset = 0;
        } else if self.send_offset > self.send_queue.len() / 2 {
            self.send_queue.drain(..self.send_offset);
            self.send_offset = 0;
        }
        Ok(())
    }

    /// Drain the socket into the codec.
    ///
    /// Returns `Ok(true)` when the peer closed its side.
    pub(crate) fn read_available(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => self.codec.feed(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::NotConnected
                        && self.state == ConnectionState::Connecting =>
                {
                    return Ok(false)
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Next decoded message or command; the peer greeting is validated here.
    pub(crate) fn next_inbound(&mut self) -> io::Result<Option<Inbound>> {
        loop {
            match self.codec.decode()? {
                Some(Inbound::Greeting(kind)) => {
                    if kind != self.expected_peer {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!(
                                "peer greeted as {:?}, expected {:?}",
                                kind, self.expected_peer
                            ),
                        ));
                    }
                    self.peer_greeted = true;
                }
                other => return Ok(other),
            }
        }
    }

    /// True once the peer's greeting has been validated.
    pub(crate) fn is_greeted(&self) -> bool {
        self.peer_greeted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn pump_until<F: FnMut() -> bool>(mut done: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_greeting_and_message_exchange() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = TransportConfig::default();

        let mut client = Connection::connect(addr, SocketKind::Sub, &config).unwrap();
        let (accepted, peer) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        let mut server = Connection::accepted(
            TcpStream::from_std(accepted),
            peer,
            SocketKind::Pub,
            &config,
        );

        client.queue_command(&Command::Subscribe(b"ab".to_vec()));
        pump_until(|| {
            client.flush().unwrap();
            client.state() == ConnectionState::Connected && client.queued_len() == 0
        });

        let mut received = None;
        pump_until(|| {
            server.read_available().unwrap();
            received = server.next_inbound().unwrap();
            received.is_some()
        });
        assert!(server.is_greeted());
        assert_eq!(
            received,
            Some(Inbound::Command(Command::Subscribe(b"ab".to_vec())))
        );

        let mut buf = Vec::new();
        frame::encode_message(&[b"ab".as_slice(), b"payload".as_slice()], &mut buf);
        server.queue(&buf);
        server.flush().unwrap();

        let mut received = None;
        pump_until(|| {
            client.read_available().unwrap();
            received = client.next_inbound().unwrap();
            received.is_some()
        });
        assert_eq!(
            received,
            Some(Inbound::Message(vec![b"ab".to_vec(), b"payload".to_vec()]))
        );
    }

    #[test]
    fn test_wrong_peer_kind_rejected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = TransportConfig::default();

        let mut client = Connection::connect(addr, SocketKind::Pub, &config).unwrap();
        let (accepted, peer) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        let mut server = Connection::accepted(
            TcpStream::from_std(accepted),
            peer,
            SocketKind::Pub,
            &config,
        );

        pump_until(|| {
            client.flush().unwrap();
            client.queued_len() == 0
        });

        let mut result = Ok(None);
        pump_until(|| {
            server.read_available().unwrap();
            result = server.next_inbound();
            result.is_err()
        });
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }
}
