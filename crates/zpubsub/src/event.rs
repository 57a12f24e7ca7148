// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event identifiers, the typed [`Event`] contract, and the JSON
//! [`EventRegistry`].
//!
//! # Wire Order
//!
//! An [`EventId`] is a 128-bit value made of two 64-bit words. On the wire
//! it always travels as 16 little-endian bytes of `(hi << 64) | lo`,
//! whatever the host byte order:
//!
//! ```text
//! byte:  0 ........ 7 | 8 ........ 15
//!        lo (LE)      | hi (LE)
//! ```
//!
//! The transport filters on this 16-byte prefix, so both ends must agree
//! on it exactly.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Size of an encoded [`EventId`] header frame.
pub const EVENT_ID_WIRE_SIZE: usize = 16;

/// 128-bit opaque identifier naming a message schema.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventId(u128);

impl EventId {
    /// Build from the two 64-bit words.
    pub const fn from_parts(hi: u64, lo: u64) -> Self {
        Self(((hi as u128) << 64) | lo as u128)
    }

    /// Build from the full 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    /// Stable id derived from a schema name (MD5 digest of the name).
    pub fn from_name(name: &str) -> Self {
        use md5::{Digest, Md5};
        let mut hasher = Md5::new();
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; EVENT_ID_WIRE_SIZE];
        bytes.copy_from_slice(&digest);
        Self(u128::from_be_bytes(bytes))
    }

    /// High 64-bit word.
    pub const fn hi(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// Low 64-bit word.
    pub const fn lo(&self) -> u64 {
        self.0 as u64
    }

    /// Full 128-bit value.
    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    /// Encode in the fixed little-endian wire order.
    pub const fn to_wire(&self) -> [u8; EVENT_ID_WIRE_SIZE] {
        self.0.to_le_bytes()
    }

    /// Decode from wire order. `None` unless `bytes` is exactly 16 bytes.
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        let array: [u8; EVENT_ID_WIRE_SIZE] = bytes.try_into().ok()?;
        Some(Self(u128::from_le_bytes(array)))
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({:016x}:{:016x})", self.hi(), self.lo())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for EventId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() || digits.len() > 32 {
            return Err(Error::Config(format!("invalid event id: {}", s)));
        }
        u128::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| Error::Config(format!("invalid event id: {}", s)))
    }
}

impl From<u128> for EventId {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

/// Typed event contract: a schema name plus a binary encoding.
///
/// # Example
///
/// ```rust
/// use zpubsub::{Event, Result};
///
/// struct Echo(String);
///
/// impl Event for Echo {
///     const NAME: &'static str = "demo.Echo";
///
///     fn encode(&self) -> Result<Vec<u8>> {
///         Ok(self.0.as_bytes().to_vec())
///     }
///
///     fn decode(bytes: &[u8]) -> Result<Self> {
///         Ok(Echo(String::from_utf8_lossy(bytes).into_owned()))
///     }
/// }
/// ```
pub trait Event: Sized + Send + 'static {
    /// Schema name; the default [`Event::event_id`] is derived from it.
    const NAME: &'static str;

    /// Identifier carried in the header frame.
    fn event_id() -> EventId {
        EventId::from_name(Self::NAME)
    }

    /// Encode to the payload frame.
    fn encode(&self) -> Result<Vec<u8>>;

    /// Decode from the payload frame.
    fn decode(bytes: &[u8]) -> Result<Self>;
}

type ToJson = dyn Fn(&[u8]) -> Result<serde_json::Value> + Send + Sync;
type FromJson = dyn Fn(&serde_json::Value) -> Result<Vec<u8>> + Send + Sync;

/// Schema entry held by an [`EventRegistry`].
pub struct EventSchema {
    name: String,
    id: EventId,
    to_json: Box<ToJson>,
    from_json: Box<FromJson>,
}

impl EventSchema {
    /// Schema name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event identifier.
    pub fn id(&self) -> EventId {
        self.id
    }
}

impl fmt::Debug for EventSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSchema")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

/// Explicitly constructed mapping EventId -> schema for JSON (de)serialisation.
///
/// Components that translate between JSON and wire payloads (bridges, CLI
/// tools) receive a registry instead of consulting hidden global state.
#[derive(Debug, Default, Clone)]
pub struct EventRegistry {
    by_id: HashMap<EventId, Arc<EventSchema>>,
    by_name: HashMap<String, EventId>,
}

impl EventRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed event whose value also has a serde representation.
    ///
    /// Returns `false` if the id or name is already taken.
    pub fn register<T>(&mut self) -> bool
    where
        T: Event + Serialize + DeserializeOwned,
    {
        self.insert(EventSchema {
            name: T::NAME.to_string(),
            id: T::event_id(),
            to_json: Box::new(|bytes| {
                let value = T::decode(bytes)?;
                Ok(serde_json::to_value(&value)?)
            }),
            from_json: Box::new(|json| {
                let value: T = serde_json::from_value(json.clone())?;
                value.encode()
            }),
        })
    }

    /// Register an event whose payload is UTF-8 text, rendered as a JSON string.
    pub fn register_text(&mut self, name: &str, id: EventId) -> bool {
        self.insert(EventSchema {
            name: name.to_string(),
            id,
            to_json: Box::new(|bytes| {
                std::str::from_utf8(bytes)
                    .map(|s| serde_json::Value::String(s.to_string()))
                    .map_err(|e| Error::Serialization(e.to_string()))
            }),
            from_json: Box::new(|json| match json {
                serde_json::Value::String(s) => Ok(s.as_bytes().to_vec()),
                other => Err(Error::Serialization(format!(
                    "expected a JSON string, got {}",
                    other
                ))),
            }),
        })
    }

    fn insert(&mut self, schema: EventSchema) -> bool {
        if self.by_id.contains_key(&schema.id) || self.by_name.contains_key(&schema.name) {
            return false;
        }
        self.by_name.insert(schema.name.clone(), schema.id);
        self.by_id.insert(schema.id, Arc::new(schema));
        true
    }

    /// Schema registered for `id`.
    pub fn schema(&self, id: EventId) -> Option<&EventSchema> {
        self.by_id.get(&id).map(Arc::as_ref)
    }

    /// Id registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<EventId> {
        self.by_name.get(name).copied()
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Render a wire payload as JSON.
    pub fn to_json(&self, id: EventId, payload: &[u8]) -> Result<serde_json::Value> {
        let schema = self
            .by_id
            .get(&id)
            .ok_or_else(|| Error::Serialization(format!("no schema registered for {}", id)))?;
        (schema.to_json)(payload)
    }

    /// Encode a JSON value for the schema registered under `name`.
    pub fn from_json(&self, name: &str, json: &serde_json::Value) -> Result<(EventId, Vec<u8>)> {
        let id = self
            .lookup(name)
            .ok_or_else(|| Error::Serialization(format!("no schema registered as {}", name)))?;
        let schema = &self.by_id[&id];
        Ok((id, (schema.from_json)(json)?))
    }
}
