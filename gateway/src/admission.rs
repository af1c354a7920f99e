//! Per-caller admission control.

use std::sync::Arc;

use fxql_common::{CallerId, FxqlError, Result};
use tracing::debug;

use crate::config::{LimiterConfig, RateLimitConfig};
use crate::rate_counter::RateCounterStore;

/// Applies the sustained and burst limiters to each caller.
pub struct AdmissionControl {
    counters: Arc<RateCounterStore>,
    limits: RateLimitConfig,
}

impl AdmissionControl {
    /// Create admission control over a counter store.
    pub fn new(counters: Arc<RateCounterStore>, limits: RateLimitConfig) -> Self {
        Self { counters, limits }
    }

    /// Count this request against the caller and refuse it if over a ceiling.
    ///
    /// The sustained limiter is checked first; a refusal there leaves the
    /// burst counter untouched.
    pub async fn admit(&self, caller: &CallerId) -> Result<()> {
        self.check(caller, &self.limits.sustained).await?;
        self.check(caller, &self.limits.burst).await
    }

    async fn check(&self, caller: &CallerId, limiter: &LimiterConfig) -> Result<()> {
        let key = counter_key(caller, &limiter.name);
        let hit = self.counters.increment(&key, limiter.window).await;

        if hit.count > limiter.limit {
            debug!(
                caller = %caller,
                limiter = %limiter.name,
                count = hit.count,
                limit = limiter.limit,
                "Request refused by rate limiter"
            );
            return Err(FxqlError::RateLimited {
                limiter: limiter.name.clone(),
                limit: limiter.limit,
                retry_after_ms: u64::try_from(hit.time_remaining.as_millis()).unwrap_or(u64::MAX),
            });
        }
        Ok(())
    }
}

/// Counter key for one caller and limiter.
pub fn counter_key(caller: &CallerId, limiter: &str) -> String {
    format!("{}:{}", caller, limiter)
}
