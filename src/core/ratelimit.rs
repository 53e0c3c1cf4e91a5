// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Rate Limiter
 * Token bucket limits, global and optionally per host
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use nonzero_ext::*;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::cancel::CancelToken;
use crate::errors::BudgetError;

type DirectLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token bucket rate limiting for the whole scan. Acquisition is a
/// suspension point; a zero global rate disables limiting entirely.
pub struct ScanRateLimiter {
    global: Option<Arc<DirectLimiter>>,
    per_host_rps: u32,
    hosts: RwLock<HashMap<String, Arc<DirectLimiter>>>,
    cancel: CancelToken,
}

impl ScanRateLimiter {
    pub fn new(global_rps: u32, per_host_rps: u32, cancel: CancelToken) -> Self {
        let global = NonZeroU32::new(global_rps)
            .map(|rps| Arc::new(GovernorRateLimiter::direct(Quota::per_second(rps))));
        if let Some(rps) = NonZeroU32::new(global_rps) {
            debug!(rps = rps.get(), "rate limiter active");
        }
        Self {
            global,
            per_host_rps,
            hosts: RwLock::new(HashMap::new()),
            cancel,
        }
    }

    /// Acquire a global token, then the host token when per-host limits
    /// are configured. Returns `RateLimitCanceled` if the scan is torn
    /// down while waiting.
    pub async fn acquire(&self, host: &str) -> Result<(), BudgetError> {
        if let Some(global) = &self.global {
            tokio::select! {
                _ = global.until_ready() => {}
                _ = self.cancel.canceled() => return Err(BudgetError::RateLimitCanceled),
            }
        }

        if self.per_host_rps > 0 {
            let limiter = {
                let hosts = self.hosts.read().await;
                hosts.get(host).cloned()
            };
            let limiter = match limiter {
                Some(limiter) => limiter,
                None => {
                    let mut hosts = self.hosts.write().await;
                    hosts
                        .entry(host.to_string())
                        .or_insert_with(|| {
                            let rps =
                                NonZeroU32::new(self.per_host_rps).unwrap_or(nonzero!(1u32));
                            Arc::new(GovernorRateLimiter::direct(Quota::per_second(rps)))
                        })
                        .clone()
                }
            };
            tokio::select! {
                _ = limiter.until_ready() => {}
                _ = self.cancel.canceled() => return Err(BudgetError::RateLimitCanceled),
            }
        }

        Ok(())
    }
}
