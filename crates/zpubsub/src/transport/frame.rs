// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multipart framing codec for the pub/sub wire protocol.
//!
//! TCP is a stream protocol without message boundaries. Every connection
//! starts with a fixed greeting from each side, followed by frames:
//!
//! ```text
//! Greeting:  +-----+-----+-----+---------+------+
//!            | 'Z' | 'P' | 'S' | version | kind |
//!            +-----+-----+-----+---------+------+
//!
//! Frame:     +-----------+----------------+-------------+
//!            | flags (1) | length (4B BE) | body        |
//!            +-----------+----------------+-------------+
//! ```
//!
//! - `flags` bit 0 (`MORE`): another frame of the same message follows.
//! - `flags` bit 2 (`COMMAND`): subscription command, always a single frame.
//!
//! A data message is one or more frames; the last one has `MORE` cleared.
//! A command body is `[1] + prefix` (subscribe) or `[0] + prefix`
//! (unsubscribe).

use super::SocketKind;
use std::io;

/// Greeting magic.
pub const GREETING_MAGIC: &[u8; 3] = b"ZPS";

/// Wire protocol version carried in the greeting.
pub const PROTOCOL_VERSION: u8 = 1;

/// Greeting size (magic + version + kind).
pub const GREETING_SIZE: usize = 5;

/// Frame header size (flags + 4-byte length).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Maximum number of frames in one data message.
pub const MAX_MESSAGE_FRAMES: usize = 16;

/// Another frame of the same message follows.
pub const FLAG_MORE: u8 = 0x01;

/// Frame carries a subscription command.
pub const FLAG_COMMAND: u8 = 0x04;

const CMD_UNSUBSCRIBE: u8 = 0;
const CMD_SUBSCRIBE: u8 = 1;

/// Encode the greeting for a socket of `kind`.
pub fn encode_greeting(kind: SocketKind) -> [u8; GREETING_SIZE] {
    let m = GREETING_MAGIC;
    [m[0], m[1], m[2], PROTOCOL_VERSION, kind.wire_code()]
}

/// Subscription command sent from a subscriber to a publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start forwarding messages whose first frame starts with the prefix.
    Subscribe(Vec<u8>),
    /// Retract one earlier subscription of the prefix.
    Unsubscribe(Vec<u8>),
}

impl Command {
    fn encode_body(&self) -> Vec<u8> {
        let (code, prefix) = match self {
            Command::Subscribe(p) => (CMD_SUBSCRIBE, p),
            Command::Unsubscribe(p) => (CMD_UNSUBSCRIBE, p),
        };
        let mut body = Vec::with_capacity(1 + prefix.len());
        body.push(code);
        body.extend_from_slice(prefix);
        body
    }

    fn parse(body: &[u8]) -> io::Result<Self> {
        match body.split_first() {
            Some((&CMD_SUBSCRIBE, prefix)) => Ok(Command::Subscribe(prefix.to_vec())),
            Some((&CMD_UNSUBSCRIBE, prefix)) => Ok(Command::Unsubscribe(prefix.to_vec())),
            Some((code, _)) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown command code {}", code),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty command frame",
            )),
        }
    }
}

/// Unit decoded from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Peer greeting (always the first unit on a connection).
    Greeting(SocketKind),
    /// Complete multipart data message.
    Message(Vec<Vec<u8>>),
    /// Subscription command.
    Command(Command),
}

/// Encode a multipart message into `buf`.
pub fn encode_message<B: AsRef<[u8]>>(parts: &[B], buf: &mut Vec<u8>) {
    let last = parts.len().saturating_sub(1);
    for (i, part) in parts.iter().enumerate() {
        let flags = if i < last { FLAG_MORE } else { 0 };
        encode_frame(flags, part.as_ref(), buf);
    }
}

/// Encode a subscription command into `buf`.
pub fn encode_command(command: &Command, buf: &mut Vec<u8>) {
    encode_frame(FLAG_COMMAND, &command.encode_body(), buf);
}

/// Encoded size of a multipart message.
pub fn encoded_len<B: AsRef<[u8]>>(parts: &[B]) -> usize {
    parts
        .iter()
        .map(|p| FRAME_HEADER_SIZE + p.as_ref().len())
        .sum()
}

fn encode_frame(flags: u8, body: &[u8], buf: &mut Vec<u8>) {
    buf.push(flags);
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(body);
}

/// Incremental decoder for one connection.
///
/// Bytes read from the socket are [`feed`](Self::feed)-ed into an
/// accumulator; [`decode`](Self::decode) extracts complete units, keeping
/// partial state across calls so non-blocking reads can stop anywhere.
#[derive(Debug)]
pub struct FrameCodec {
    /// Bytes received but not yet consumed
    accumulator: Vec<u8>,

    /// Read position in accumulator
    accumulator_pos: usize,

    /// Frames of the message currently being assembled
    parts: Vec<Vec<u8>>,

    /// Greeting not yet received
    awaiting_greeting: bool,

    /// Maximum allowed frame body (anti-OOM protection)
    max_size: usize,

    /// Statistics: messages decoded
    messages_decoded: u64,

    /// Statistics: payload bytes decoded
    bytes_decoded: u64,
}

impl FrameCodec {
    /// Create a codec with the given maximum frame size.
    pub fn new(max_size: usize) -> Self {
        Self {
            accumulator: Vec::with_capacity(16384),
            accumulator_pos: 0,
            parts: Vec::new(),
            awaiting_greeting: true,
            max_size,
            messages_decoded: 0,
            bytes_decoded: 0,
        }
    }

    /// Maximum allowed frame size.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of data messages decoded.
    pub fn messages_decoded(&self) -> u64 {
        self.messages_decoded
    }

    /// Total frame body bytes decoded.
    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    /// Forget all partial state (connection reset).
    pub fn reset(&mut self) {
        self.accumulator.clear();
        self.accumulator_pos = 0;
        self.parts.clear();
        self.awaiting_greeting = true;
    }

    /// Append bytes read from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        // Compact once more than half the accumulator has been consumed
        if self.accumulator_pos > 0 && self.accumulator_pos > self.accumulator.len() / 2 {
            self.accumulator.drain(..self.accumulator_pos);
            self.accumulator_pos = 0;
        }
        self.accumulator.extend_from_slice(data);
    }

    /// True when unconsumed bytes remain.
    pub fn has_buffered_data(&self) -> bool {
        self.accumulator_pos < self.accumulator.len()
    }

    /// Try to decode the next complete unit.
    ///
    /// Returns:
    /// - `Ok(Some(unit))` - a greeting, message or command was decoded
    /// - `Ok(None)` - need more data
    /// - `Err(e)` - protocol violation (`InvalidData`); the connection must be dropped
    pub fn decode(&mut self) -> io::Result<Option<Inbound>> {
        if self.awaiting_greeting {
            return self.decode_greeting();
        }

        loop {
            let available = &self.accumulator[self.accumulator_pos..];
            if available.len() < FRAME_HEADER_SIZE {
                return Ok(None);
            }

            let flags = available[0];
            let len =
                u32::from_be_bytes([available[1], available[2], available[3], available[4]])
                    as usize;
            if len > self.max_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame too large: {} bytes (max {})", len, self.max_size),
                ));
            }
            if available.len() < FRAME_HEADER_SIZE + len {
                return Ok(None);
            }

            let body = available[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len].to_vec();
            self.accumulator_pos += FRAME_HEADER_SIZE + len;
            self.bytes_decoded += len as u64;

            if flags & FLAG_COMMAND != 0 {
                if flags & FLAG_MORE != 0 || !self.parts.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "command frame inside a multipart message",
                    ));
                }
                return Command::parse(&body).map(|c| Some(Inbound::Command(c)));
            }

            self.parts.push(body);
            if flags & FLAG_MORE != 0 && self.parts.len() >= MAX_MESSAGE_FRAMES {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("message exceeds {} frames", MAX_MESSAGE_FRAMES),
                ));
            }
            if flags & FLAG_MORE == 0 {
                self.messages_decoded += 1;
                return Ok(Some(Inbound::Message(std::mem::take(&mut self.parts))));
            }
        }
    }

    fn decode_greeting(&mut self) -> io::Result<Option<Inbound>> {
        let available = &self.accumulator[self.accumulator_pos..];
        if available.len() < GREETING_SIZE {
            return Ok(None);
        }
        if &available[..3] != GREETING_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad greeting magic",
            ));
        }
        if available[3] != PROTOCOL_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported protocol version {}", available[3]),
            ));
        }
        let kind = SocketKind::from_wire_code(available[4]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown socket kind {}", available[4]),
            )
        })?;
        self.accumulator_pos += GREETING_SIZE;
        self.awaiting_greeting = false;
        Ok(Some(Inbound::Greeting(kind)))
    }
}

// ============================================================================
// Tests
// ============================================================================
