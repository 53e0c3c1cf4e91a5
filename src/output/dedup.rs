// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Mutex;

use super::ResultEvent;

/// Suppresses duplicate result events. Two events with the same
/// (template-id, matched-at, matcher-name, extracted-values) collapse to
/// one emitted event. Inserts serialize on the lock; the set only grows.
#[derive(Default)]
pub struct ResultDeduplicator {
    seen: Mutex<HashSet<String>>,
}

impl ResultDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fingerprint(event: &ResultEvent) -> String {
        let mut hasher = Sha256::new();
        hasher.update(event.template_id.as_bytes());
        hasher.update(b"|");
        hasher.update(event.matched_at.as_bytes());
        hasher.update(b"|");
        hasher.update(event.matcher_name.as_deref().unwrap_or_default().as_bytes());
        for value in &event.extracted_results {
            hasher.update(b"|");
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Returns true the first time this event's fingerprint is seen.
    pub fn unique(&self, event: &ResultEvent) -> bool {
        let fingerprint = Self::fingerprint(event);
        self.seen
            .lock()
            .expect("dedup lock poisoned")
            .insert(fingerprint)
    }
}
