// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Core
 * Engine, scheduling substrate and shared scan state
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod cancel;
pub mod engine;
pub mod hosterrors;
pub mod inputs;
pub mod progress;
pub mod ratelimit;
pub mod resume;

pub use cancel::CancelToken;
pub use engine::ScanEngine;
pub use hosterrors::HostErrorCache;
pub use inputs::{InputProvider, MetaInput, SimpleInputProvider};
pub use progress::Progress;
pub use ratelimit::ScanRateLimiter;
pub use resume::ResumeConfig;
