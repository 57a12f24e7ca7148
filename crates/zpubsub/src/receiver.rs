// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive scheduler: one poll loop shared by a group of participants.
//!
//! # Architecture
//!
//! ```text
//!  Receiver (handle) --+
//!  Receiver (handle) --+--> ReceiverGroup = Arc<Mutex<Scheduler>>
//!  Receiver (handle) --+         |
//!                                +-- mio::Poll + token table
//!                                +-- Weak<Mutex<dyn Participant>> per member
//! ```
//!
//! Each `receive()` iteration asks every live member to `update()` (apply
//! discovery, reconnect) and to list its sockets, then waits on the poll and
//! dispatches every socket that became ready in the snapshot, in member
//! order, one message per socket. Calling `receive()` through any handle of
//! a group services every member of the group.
//!
//! # Locking
//!
//! `receive()` holds the group lock for its whole duration and each
//! member's lock while calling into it. Callbacks invoked from
//! [`Participant::process`] therefore must not call back into any member of
//! the same group (subscribe, receive, drop a subscriber): doing so
//! deadlocks.

use crate::config::{MAX_WAIT_SLICE, WAIT_SLICES_PER_TIMEOUT};
use crate::error::{Error, Result};
use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Poll event capacity per iteration.
const EVENTS_CAPACITY: usize = 256;

/// How long `receive()` may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until a message is delivered.
    Indefinite,
    /// Give up after the duration.
    After(Duration),
}

impl Timeout {
    /// Finite timeout in milliseconds.
    pub fn millis(ms: u64) -> Self {
        Timeout::After(Duration::from_millis(ms))
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

/// Per-socket registration state, owned next to the socket.
///
/// A socket is registered with the group's poll the first time it is added
/// to a [`SocketSet`] and keeps its token for as long as it lives. A
/// replacement socket (reconnect) needs a fresh `Registration`.
#[derive(Debug, Default)]
pub struct Registration {
    token: Option<Token>,
}

impl Registration {
    /// Token assigned at first registration.
    pub fn token(&self) -> Option<Token> {
        self.token
    }
}

/// Readiness of one socket in a poll snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadySocket {
    /// Token of the socket
    pub token: Token,
    /// Data may be read
    pub readable: bool,
    /// Data may be written (or a connect completed)
    pub writable: bool,
    /// Peer hung up or the socket reported an error
    pub closed: bool,
}

impl ReadySocket {
    fn idle(token: Token) -> Self {
        Self {
            token,
            readable: false,
            writable: false,
            closed: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SocketEntry {
    token: Token,
    member: usize,
    pending: bool,
}

/// Sockets collected from the members for one poll iteration.
pub struct SocketSet<'a> {
    registry: &'a Registry,
    next_token: &'a mut usize,
    entries: &'a mut Vec<SocketEntry>,
    member: usize,
}

impl SocketSet<'_> {
    /// Add `source` to this iteration.
    ///
    /// `pending` signals that the participant already holds a buffered
    /// message for this socket: the poll then does not block and the socket
    /// is dispatched even without new readiness.
    pub fn add<S>(
        &mut self,
        source: &mut S,
        registration: &mut Registration,
        pending: bool,
    ) -> io::Result<Token>
    where
        S: Source + ?Sized,
    {
        let token = match registration.token {
            Some(token) => token,
            None => {
                let token = Token(*self.next_token);
                self.registry
                    .register(source, token, Interest::READABLE | Interest::WRITABLE)?;
                *self.next_token += 1;
                registration.token = Some(token);
                token
            }
        };
        self.entries.push(SocketEntry {
            token,
            member: self.member,
            pending,
        });
        Ok(token)
    }

    /// Number of sockets collected so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no socket has been collected yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Member of a receive group.
pub trait Participant: Send {
    /// List the sockets to poll this iteration.
    fn add_sockets(&mut self, sockets: &mut SocketSet<'_>);

    /// Service a ready socket; returns `true` when a message was delivered.
    fn process(&mut self, ready: ReadySocket) -> Result<bool>;

    /// Periodic hook run before every poll (discovery, reconnects).
    fn update(&mut self) {}

    /// Connect to an explicit endpoint; `Ok(false)` when already connected.
    fn add_connection(&mut self, uri: &str) -> Result<bool>;
}

/// Shared handle to a participant.
pub type SharedParticipant = Arc<Mutex<dyn Participant>>;

struct Member {
    id: u64,
    participant: Weak<Mutex<dyn Participant>>,
}

struct Scheduler {
    poll: Poll,
    events: Events,
    members: Vec<Member>,
    next_member_id: u64,
    next_token: usize,
    entries: Vec<SocketEntry>,
}

impl Scheduler {
    fn new() -> Result<Self> {
        Ok(Self {
            poll: Poll::new().map_err(Error::Poll)?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            members: Vec::new(),
            next_member_id: 0,
            next_token: 0,
            entries: Vec::new(),
        })
    }

    fn live_members(&mut self) -> Vec<SharedParticipant> {
        let mut live = Vec::with_capacity(self.members.len());
        self.members.retain(|m| match m.participant.upgrade() {
            Some(p) => {
                live.push(p);
                true
            }
            None => false,
        });
        live
    }

    fn rebuild(&mut self, live: &[SharedParticipant]) {
        self.entries.clear();
        let registry = self.poll.registry();
        for (index, member) in live.iter().enumerate() {
            let mut set = SocketSet {
                registry,
                next_token: &mut self.next_token,
                entries: &mut self.entries,
                member: index,
            };
            member.lock().add_sockets(&mut set);
        }
    }

    fn receive(&mut self, timeout: Timeout) -> Result<bool> {
        let (slice, deadline) = match timeout {
            Timeout::Indefinite => (MAX_WAIT_SLICE, None),
            Timeout::After(t) => (
                (t / WAIT_SLICES_PER_TIMEOUT).min(MAX_WAIT_SLICE),
                Some(Instant::now() + t),
            ),
        };

        loop {
            let live = self.live_members();
            for member in &live {
                member.lock().update();
            }
            self.rebuild(&live);

            let wait = if self.entries.iter().any(|e| e.pending) {
                Duration::ZERO
            } else {
                match deadline {
                    Some(d) => slice.min(d.saturating_duration_since(Instant::now())),
                    None => slice,
                }
            };

            match self.poll.poll(&mut self.events, Some(wait)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => self.events.clear(),
                Err(e) => return Err(Error::Poll(e)),
            }

            let mut readiness: HashMap<Token, ReadySocket> = HashMap::new();
            for event in self.events.iter() {
                let ready = readiness
                    .entry(event.token())
                    .or_insert_with(|| ReadySocket::idle(event.token()));
                ready.readable |= event.is_readable();
                ready.writable |= event.is_writable();
                ready.closed |=
                    event.is_read_closed() || event.is_write_closed() || event.is_error();
            }

            let mut delivered = false;
            for entry in &self.entries {
                let ready = match readiness.remove(&entry.token) {
                    Some(ready) => ready,
                    None if entry.pending => ReadySocket::idle(entry.token),
                    None => continue,
                };
                if live[entry.member].lock().process(ready)? {
                    delivered = true;
                }
            }

            if delivered {
                return Ok(true);
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Ok(false);
                }
            }
        }
    }
}

/// Shared scheduler a set of [`Receiver`]s poll through.
#[derive(Clone)]
pub struct ReceiverGroup {
    inner: Arc<Mutex<Scheduler>>,
}

impl ReceiverGroup {
    /// New group with its own poll instance.
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(Scheduler::new()?)),
        })
    }

    /// Add `participant` to the group.
    ///
    /// The group only keeps a weak reference; the returned handle removes
    /// the member when dropped.
    pub fn join(&self, participant: Weak<Mutex<dyn Participant>>) -> Receiver {
        let mut scheduler = self.inner.lock();
        let id = scheduler.next_member_id;
        scheduler.next_member_id += 1;
        scheduler.members.push(Member { id, participant });
        log::debug!(
            "[receiver] Member {} joined group ({} members)",
            id,
            scheduler.members.len()
        );
        Receiver {
            group: self.clone(),
            id,
        }
    }

    /// Number of registered members.
    pub fn len(&self) -> usize {
        self.inner.lock().members.len()
    }

    /// True when no member is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Service all members until one message is delivered or `timeout` elapses.
    pub fn receive(&self, timeout: impl Into<Timeout>) -> Result<bool> {
        self.inner.lock().receive(timeout.into())
    }

    /// True when both handles refer to the same scheduler.
    pub fn ptr_eq(&self, other: &ReceiverGroup) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ReceiverGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverGroup")
            .field("ptr", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

/// Membership of one participant in a [`ReceiverGroup`].
#[derive(Debug)]
pub struct Receiver {
    group: ReceiverGroup,
    id: u64,
}

impl Receiver {
    /// Create a fresh group with `participant` as its only member.
    pub fn new(participant: Weak<Mutex<dyn Participant>>) -> Result<Self> {
        Ok(ReceiverGroup::new()?.join(participant))
    }

    /// Add `participant` to the group `existing` belongs to.
    pub fn join(existing: &Receiver, participant: Weak<Mutex<dyn Participant>>) -> Self {
        existing.group.join(participant)
    }

    /// Group this receiver polls through.
    pub fn group(&self) -> &ReceiverGroup {
        &self.group
    }

    /// Block until one message has been delivered to any member of the
    /// group (`Ok(true)`) or the timeout elapses (`Ok(false)`).
    ///
    /// With [`Timeout::Indefinite`] the wait is sliced so `update()` still
    /// runs at least once per second; with a finite timeout `T` the slice is
    /// `min(1s, T/10)`.
    pub fn receive(&self, timeout: impl Into<Timeout>) -> Result<bool> {
        self.group.receive(timeout)
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        let mut scheduler = self.group.inner.lock();
        scheduler.members.retain(|m| m.id != self.id);
        log::debug!("[receiver] Member {} left group", self.id);
    }
}
