// Copyright 2025 Duckgate Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Session correlation cache.
//!
//! The upstream backend has no conversation id, so correlation is entirely
//! content-driven: the cache maps a fingerprint of the conversation turns
//! to the upstream session that produced them. An exact-fingerprint hit is
//! a non-destructive resume; a hit on the fingerprint of the list minus
//! its final turn means the client replaced that turn (a continuation, or
//! a redo of the last question) and consumes the entry.
//!
//! Entries never expire by size or time. The only removal paths are
//! prefix consumption and explicit eviction. Concurrent requests with the
//! same fingerprint can both miss and race their inserts; the last writer
//! wins and the losing session is simply dropped once unreferenced. That
//! is accepted behavior for a single-process, best-effort cache.

use crate::upstream::{SharedSession, Turn};
use dashmap::DashMap;
use tracing::debug;

/// Canonical content-only encoding of a turn sequence.
///
/// Role fields are deliberately ignored: the cache correlates on what was
/// said, not on who is labeled as saying it. The length prefix keeps the
/// encoding injective, so `["ab", "c"]` and `["a", "bc"]` cannot collide.
pub fn fingerprint(turns: &[Turn]) -> String {
    let mut key = String::new();
    for turn in turns {
        key.push_str(&turn.content.len().to_string());
        key.push(':');
        key.push_str(&turn.content);
        key.push(';');
    }
    key
}

/// In-memory fingerprint → session map. Created once at process start and
/// shared by reference; cleared only by process restart.
#[derive(Default)]
pub struct SessionCache {
    entries: DashMap<String, SharedSession>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Find the session for `turns`.
    ///
    /// Exact fingerprint match wins and leaves the cache untouched.
    /// Otherwise the fingerprint of `turns` minus its final turn is tried;
    /// a hit there is consumed, so the slot cannot be handed out again to
    /// a later lookup and resume a session this caller is about to
    /// advance. `None` is a normal miss, not an error.
    pub fn lookup(&self, turns: &[Turn]) -> Option<SharedSession> {
        let full = fingerprint(turns);
        if let Some(entry) = self.entries.get(&full) {
            debug!(turns = turns.len(), "exact fingerprint hit");
            return Some(entry.value().clone());
        }

        if turns.is_empty() {
            return None;
        }

        let prefix = fingerprint(&turns[..turns.len() - 1]);
        self.entries.remove(&prefix).map(|(_, session)| {
            debug!(turns = turns.len(), "prefix fingerprint hit, slot consumed");
            session
        })
    }

    /// Store `session` under the fingerprint of `turns`, overwriting any
    /// existing entry for that fingerprint.
    pub fn insert(&self, turns: &[Turn], session: SharedSession) {
        self.entries.insert(fingerprint(turns), session);
    }

    /// Remove the entry keyed by the full fingerprint of `turns`.
    pub fn evict(&self, turns: &[Turn]) {
        self.entries.remove(&fingerprint(turns));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
