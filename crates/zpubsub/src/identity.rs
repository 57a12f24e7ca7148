// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process identity used to suppress self-connections during discovery.

use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

/// UUID identifying one process (or one simulated machine in tests).
///
/// Publishers announce it as the instance `id`; browsing subscribers skip
/// records carrying their own identity. The process-wide value is created
/// lazily on first use and never changes afterwards. Tests that need two
/// "machines" in one process build separate identities and hand them to
/// separate [`Context`](crate::Context)s instead of mutating the global one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessIdentity(Uuid);

static PROCESS_IDENTITY: OnceLock<ProcessIdentity> = OnceLock::new();

impl ProcessIdentity {
    /// Fresh random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Identity shared by every default context in this process.
    pub fn process() -> Self {
        *PROCESS_IDENTITY.get_or_init(Self::new)
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Parse the textual form announced on the discovery substrate.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ProcessIdentity {
    fn default() -> Self {
        Self::process()
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
