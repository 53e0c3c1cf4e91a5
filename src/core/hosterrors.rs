// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Host Error Budget
 * Per-host transient error accounting with a sliding window
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::errors::BudgetError;

#[derive(Debug)]
struct HostState {
    errors: u32,
    window_start: Instant,
    tripped_logged: bool,
}

/// Tracks transient failures per host. Once a host exceeds the budget
/// within the window, every remaining task for it is skipped. A single
/// mutex guards the map; contention is bounded by the scan's bulk size.
pub struct HostErrorCache {
    max_errors: u32,
    window: Duration,
    hosts: Mutex<HashMap<String, HostState>>,
}

impl HostErrorCache {
    pub fn new(max_errors: u32, window: Duration) -> Self {
        Self {
            max_errors,
            window,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the host has tripped its budget. The budget exhaustion is
    /// logged once per host, not per skipped task.
    pub fn check(&self, host: &str) -> bool {
        if self.max_errors == 0 {
            return false;
        }
        let mut hosts = self.hosts.lock().expect("host error cache poisoned");
        let expired = match hosts.get(host) {
            None => return false,
            Some(state) => state.window_start.elapsed() > self.window,
        };
        if expired {
            hosts.remove(host);
            return false;
        }
        let state = hosts.get_mut(host).expect("checked above");
        if state.errors < self.max_errors {
            return false;
        }
        if !state.tripped_logged {
            state.tripped_logged = true;
            let err = BudgetError::HostErrorsExceeded {
                host: host.to_string(),
                errors: state.errors,
            };
            warn!("{}, skipping remaining tasks", err);
        }
        true
    }

    /// Record one transient error against the host.
    pub fn record(&self, host: &str) {
        if self.max_errors == 0 {
            return;
        }
        let mut hosts = self.hosts.lock().expect("host error cache poisoned");
        let now = Instant::now();
        let state = hosts.entry(host.to_string()).or_insert(HostState {
            errors: 0,
            window_start: now,
            tripped_logged: false,
        });
        if state.window_start.elapsed() > self.window {
            state.errors = 0;
            state.window_start = now;
            state.tripped_logged = false;
        }
        state.errors += 1;
    }

    pub fn error_count(&self, host: &str) -> u32 {
        let hosts = self.hosts.lock().expect("host error cache poisoned");
        hosts.get(host).map(|s| s.errors).unwrap_or(0)
    }
}
