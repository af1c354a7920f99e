//! Simulation metrics.

use std::collections::VecDeque;

use fxql_protocol::Reply;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total requests sent.
    pub total_requests: u64,
    /// Requests answered with 2xx.
    pub successful_requests: u64,
    /// Requests refused by a rate limiter.
    pub rate_limited_requests: u64,
    /// Other rejections.
    pub rejected_requests: u64,
    /// Replies served from the idempotency cache.
    pub replayed_requests: u64,
    /// Latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            rate_limited_requests: 0,
            rejected_requests: 0,
            replayed_requests: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record one reply and how long it took.
    pub fn record(&mut self, reply: &Reply, latency_ms: u64) {
        self.total_requests += 1;
        if reply.is_success() {
            self.successful_requests += 1;
        } else if reply.status == 429 {
            self.rate_limited_requests += 1;
        } else {
            self.rejected_requests += 1;
        }
        if reply.replayed {
            self.replayed_requests += 1;
        }

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p50 latency.
    pub fn p50_latency_ms(&self) -> u64 {
        self.percentile_latency(50)
    }

    /// Get p99 latency.
    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }

        self.successful_requests as f64 / self.total_requests as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
