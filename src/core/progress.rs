// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Progress Tracking
 * Request counters and aggregated warning accounting
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

/// Scan-wide counters. Warnings are throttled: the first failure of each
/// kind logs, the rest only count toward the summary.
#[derive(Default)]
pub struct Progress {
    total: AtomicU64,
    requests: AtomicU64,
    matched: AtomicU64,
    errors: AtomicU64,
    skipped: AtomicU64,
    unsigned_skipped: AtomicU64,
    warning_kinds: Mutex<HashMap<&'static str, u64>>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_total(&self, count: u64) {
        self.total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_matched(&self) {
        self.matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_unsigned_skipped(&self) {
        self.unsigned_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an error under its kind; logs only the first of each kind.
    pub fn record_error(&self, kind: &'static str, message: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let mut kinds = self.warning_kinds.lock().expect("progress lock poisoned");
        let seen = kinds.entry(kind).or_insert(0);
        *seen += 1;
        if *seen == 1 {
            warn!(kind, "{}", message);
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn matched(&self) -> u64 {
        self.matched.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn unsigned_skipped(&self) -> u64 {
        self.unsigned_skipped.load(Ordering::Relaxed)
    }

    /// End-of-scan summary printed to the log sink (stderr), never mixed
    /// into the result stream.
    pub fn log_summary(&self) {
        let mut aggregated: Vec<(&'static str, u64)> = {
            let kinds = self.warning_kinds.lock().expect("progress lock poisoned");
            kinds.iter().map(|(k, v)| (*k, *v)).collect()
        };
        aggregated.sort_by(|a, b| b.1.cmp(&a.1));
        for (kind, count) in aggregated {
            if count > 1 {
                warn!(kind, count, "suppressed repeated warnings");
            }
        }
        info!(
            total = self.total.load(Ordering::Relaxed),
            requests = self.requests(),
            matched = self.matched(),
            errors = self.errors(),
            skipped = self.skipped(),
            unsigned_skipped = self.unsigned_skipped(),
            "scan finished"
        );
    }
}
