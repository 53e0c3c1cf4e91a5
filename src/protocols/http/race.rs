// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

/// Synchronization gate for race-condition probes. Every worker prepares
/// its request, then waits on the gate so all copies hit the wire at the
/// same approximated instant. The gate opens when all workers arrive or
/// after a small timeout so a stuck worker cannot wedge the block.
#[derive(Clone)]
pub struct RaceGate {
    barrier: Arc<Barrier>,
    timeout: Duration,
}

impl RaceGate {
    pub fn new(workers: usize) -> Self {
        Self {
            barrier: Arc::new(Barrier::new(workers.max(1))),
            timeout: Duration::from_secs(2),
        }
    }

    pub async fn wait(&self) {
        let _ = tokio::time::timeout(self.timeout, self.barrier.wait()).await;
    }
}
