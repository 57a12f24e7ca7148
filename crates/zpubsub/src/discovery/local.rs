// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process discovery substrate.

use super::{Discovery, DiscoveryRecord};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Entry {
    service_type: String,
    properties: HashMap<String, String>,
}

#[derive(Debug)]
struct Inner {
    entries: RwLock<HashMap<String, Entry>>,
    available: AtomicBool,
}

/// Discovery registry living in process memory.
///
/// Clones share the same registry, so a clone handed to several
/// [`Context`](crate::Context)s lets their publishers and subscribers find
/// each other without touching the network.
#[derive(Debug, Clone)]
pub struct LocalDiscovery {
    inner: Arc<Inner>,
}

impl LocalDiscovery {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Insert a record with arbitrary properties.
    ///
    /// Useful for simulating foreign announcers (for example one that does
    /// not carry a session key).
    pub fn announce_raw(&self, service_type: &str, instance: &str, properties: &[(&str, &str)]) {
        let properties = properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.inner.entries.write().insert(
            instance.to_string(),
            Entry {
                service_type: service_type.to_string(),
                properties,
            },
        );
    }

    /// Simulate the backing service going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::Relaxed);
    }

    /// Number of announced instances across all service types.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// True when nothing is announced.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery for LocalDiscovery {
    fn announce(&self, service_type: &str, record: &DiscoveryRecord) -> Result<()> {
        if !self.is_available() {
            return Err(Error::Discovery("local registry unavailable".to_string()));
        }
        log::debug!(
            "[discovery] Announcing {} ({}) locally",
            record.instance,
            service_type
        );
        self.inner.entries.write().insert(
            record.instance.clone(),
            Entry {
                service_type: service_type.to_string(),
                properties: record.properties().into_iter().collect(),
            },
        );
        Ok(())
    }

    fn withdraw(&self, instance: &str) -> Result<()> {
        if self.inner.entries.write().remove(instance).is_some() {
            log::debug!("[discovery] Withdrew {} locally", instance);
        }
        Ok(())
    }

    fn browse(&self, service_type: &str) -> Result<Vec<String>> {
        if !self.is_available() {
            return Err(Error::Discovery("local registry unavailable".to_string()));
        }
        let entries = self.inner.entries.read();
        let mut instances: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.service_type == service_type)
            .map(|(name, _)| name.clone())
            .collect();
        instances.sort();
        Ok(instances)
    }

    fn get(&self, instance: &str, key: &str) -> Option<String> {
        self.inner
            .entries
            .read()
            .get(instance)
            .and_then(|e| e.properties.get(key).cloned())
    }

    fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::Relaxed)
    }
}
