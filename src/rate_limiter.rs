// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Replay Rate Limiter
 * Per-execution token bucket; delays, never errors
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use nonzero_ext::*;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

/// Token-bucket limiter scoped to one execution. Two executions in
/// different flows never throttle each other.
pub struct ExecutionRateLimiter {
    rps: u32,
    limiter: Arc<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl ExecutionRateLimiter {
    pub fn new(rps: u32) -> Self {
        let rps = NonZeroU32::new(rps).unwrap_or(nonzero!(1u32));
        let quota = Quota::per_second(rps);
        debug!(rps = rps.get(), "execution rate limiter created");
        Self {
            rps: rps.get(),
            limiter: Arc::new(GovernorRateLimiter::direct(quota)),
        }
    }

    /// Wait until the bucket grants a slot. Target-side 429s are recorded
    /// as response data elsewhere; this limiter only paces the client.
    pub async fn wait_for_slot(&self) {
        self.limiter.until_ready().await;
    }

    pub fn rps(&self) -> u32 {
        self.rps
    }
}
