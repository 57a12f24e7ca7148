// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # zpubsub - Zero-configuration publish/subscribe
//!
//! Publishers bind a TCP endpoint and announce it on a discovery substrate;
//! subscribers browse the substrate, connect to every publisher in their
//! session and receive the events they subscribed to, filtered by a 128-bit
//! [`EventId`] carried in the first frame of each message.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use zpubsub::{EventId, Publisher, Result, Subscriber};
//!
//! fn main() -> Result<()> {
//!     let ping = EventId::from_name("demo.Ping");
//!
//!     let mut publisher = Publisher::with_session("demo")?;
//!     let subscriber = Subscriber::with_uri(&publisher.uri().to_string())?;
//!     subscriber.subscribe(ping, |payload| println!("{:?}", payload));
//!
//!     for _ in 0..10 {
//!         publisher.publish(ping, b"hello");
//!         if subscriber.receive(Duration::from_millis(100))? {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |   Publisher (bind + announce)        Subscriber (browse + connect)  |
//! +---------------------------------------------------------------------+
//! |   Sender<PubSocket>                  Sender<SubSocket>              |
//! |                                      Receiver -> ReceiverGroup      |
//! +---------------------------------------------------------------------+
//! |   Transport: greeting + multipart frames, prefix subscriptions      |
//! +---------------------------------------------------------------------+
//! |   Discovery: LocalDiscovery | MulticastDiscovery                    |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Publisher`] | Binds, announces and fans out events |
//! | [`Subscriber`] | Connects to publishers and dispatches callbacks |
//! | [`Receiver`] | Membership in a shared receive scheduler |
//! | [`Context`] | Identity, transport tunables, discovery substrate |
//! | [`EventId`] | 128-bit identifier, 16 little-endian bytes on the wire |
//! | [`EventRegistry`] | Explicit `EventId` -> schema map for JSON bridges |
//!
//! ## Environment
//!
//! - `ZPUBSUB_SESSION` overrides the OS-user default session.
//! - `ZPUBSUB_HOST_IP` forces the host announced for wildcard binds.
//! - `RUST_LOG` controls logging in the bundled tools (the library only
//!   emits through the `log` facade).

pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod event;
pub mod identity;
pub mod publisher;
pub mod receiver;
pub mod sender;
pub mod subscriber;
pub mod transport;
pub mod uri;

pub use config::{Session, TransportConfig};
pub use context::{Context, ContextBuilder};
#[cfg(feature = "multicast-discovery")]
pub use discovery::MulticastDiscovery;
pub use discovery::{Discovery, DiscoveryRecord, LocalDiscovery, SessionPolicy};
pub use error::{Error, Result};
pub use event::{Event, EventId, EventRegistry, EventSchema, EVENT_ID_WIRE_SIZE};
pub use identity::ProcessIdentity;
pub use publisher::{Publisher, PublisherBuilder};
pub use receiver::{
    Participant, ReadySocket, Receiver, ReceiverGroup, Registration, SharedParticipant, SocketSet,
    Timeout,
};
pub use sender::Sender;
pub use subscriber::{Callback, Subscriber, SubscriberBuilder};
pub use transport::SocketKind;
pub use uri::Uri;
