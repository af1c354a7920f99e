//! Metrics collection for gateway monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fxql_common::ErrorKind;

use crate::audit::{Outcome, OutcomeSink};

/// Gateway metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total requests seen.
    pub requests_total: AtomicU64,
    /// Requests past admission control.
    pub requests_admitted: AtomicU64,
    /// Requests refused by a rate limiter.
    pub requests_rate_limited: AtomicU64,
    /// Successful requests.
    pub requests_success: AtomicU64,
    /// Replies served from the idempotency cache.
    pub idempotency_hits: AtomicU64,
    /// Keyed requests computed fresh.
    pub idempotency_misses: AtomicU64,
    /// Keys reused with a different body.
    pub idempotency_conflicts: AtomicU64,
    /// Syntax rejections.
    pub parse_failures: AtomicU64,
    /// Rule rejections.
    pub validation_failures: AtomicU64,
    /// Batch size rejections.
    pub batch_limit_failures: AtomicU64,
    /// Entries persisted.
    pub entries_persisted: AtomicU64,
    /// Persistence failures.
    pub storage_failures: AtomicU64,
    /// Remote-to-local counter switches.
    pub counter_failovers: AtomicU64,
    /// 1 while counting remotely, 0 while in local fallback.
    pub counter_remote_active: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failover counter from the counter store.
    pub fn set_counter_failovers(&self, count: u64) {
        self.counter_failovers.store(count, Ordering::Relaxed);
    }

    /// Set whether the remote counter is in use.
    pub fn set_counter_remote_active(&self, active: bool) {
        self.counter_remote_active
            .store(u64::from(active), Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_admitted: self.requests_admitted.load(Ordering::Relaxed),
            requests_rate_limited: self.requests_rate_limited.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            idempotency_hits: self.idempotency_hits.load(Ordering::Relaxed),
            idempotency_misses: self.idempotency_misses.load(Ordering::Relaxed),
            idempotency_conflicts: self.idempotency_conflicts.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            batch_limit_failures: self.batch_limit_failures.load(Ordering::Relaxed),
            entries_persisted: self.entries_persisted.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            counter_failovers: self.counter_failovers.load(Ordering::Relaxed),
            counter_remote_active: self.counter_remote_active.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let series = [
            ("requests_total", "counter", "Total requests received", snapshot.requests_total),
            ("requests_admitted", "counter", "Requests past admission control", snapshot.requests_admitted),
            ("requests_rate_limited", "counter", "Requests refused by a rate limiter", snapshot.requests_rate_limited),
            ("requests_success", "counter", "Successful requests", snapshot.requests_success),
            ("idempotency_hits", "counter", "Replies served from the idempotency cache", snapshot.idempotency_hits),
            ("idempotency_misses", "counter", "Keyed requests computed fresh", snapshot.idempotency_misses),
            ("idempotency_conflicts", "counter", "Idempotency keys reused with a different body", snapshot.idempotency_conflicts),
            ("parse_failures", "counter", "Requests rejected for syntax", snapshot.parse_failures),
            ("validation_failures", "counter", "Requests rejected by validation rules", snapshot.validation_failures),
            ("batch_limit_failures", "counter", "Requests over the batch size limit", snapshot.batch_limit_failures),
            ("entries_persisted", "counter", "Entries handed to persistence", snapshot.entries_persisted),
            ("storage_failures", "counter", "Persistence failures", snapshot.storage_failures),
            ("counter_failovers", "counter", "Remote to local rate counter switches", snapshot.counter_failovers),
            ("counter_remote_active", "gauge", "Whether the remote rate counter is in use", snapshot.counter_remote_active),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            out.push_str(&format!(
                "# HELP fxql_{name} {help}\n# TYPE fxql_{name} {kind}\nfxql_{name} {value}\n\n"
            ));
        }
        out
    }
}

impl OutcomeSink for Metrics {
    fn record(&self, outcome: &Outcome) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if outcome.kind != Some(ErrorKind::RateLimit) && outcome.kind != Some(ErrorKind::Unavailable) {
            self.requests_admitted.fetch_add(1, Ordering::Relaxed);
        }

        if outcome.idempotency_key.is_some() {
            match (outcome.replayed, outcome.kind) {
                (true, _) => self.idempotency_hits.fetch_add(1, Ordering::Relaxed),
                (false, Some(ErrorKind::Conflict)) => {
                    self.idempotency_conflicts.fetch_add(1, Ordering::Relaxed)
                }
                (false, Some(ErrorKind::RateLimit | ErrorKind::Auth | ErrorKind::Unavailable)) => 0,
                (false, _) => self.idempotency_misses.fetch_add(1, Ordering::Relaxed),
            };
        }

        let counter = match outcome.kind {
            None => {
                self.requests_success.fetch_add(1, Ordering::Relaxed);
                if !outcome.replayed {
                    self.entries_persisted
                        .fetch_add(outcome.entries as u64, Ordering::Relaxed);
                }
                return;
            }
            Some(ErrorKind::RateLimit) => &self.requests_rate_limited,
            Some(ErrorKind::Syntax) => &self.parse_failures,
            Some(ErrorKind::Validation) => &self.validation_failures,
            Some(ErrorKind::BatchLimit) => &self.batch_limit_failures,
            Some(ErrorKind::Storage) => &self.storage_failures,
            Some(_) => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_admitted: u64,
    pub requests_rate_limited: u64,
    pub requests_success: u64,
    pub idempotency_hits: u64,
    pub idempotency_misses: u64,
    pub idempotency_conflicts: u64,
    pub parse_failures: u64,
    pub validation_failures: u64,
    pub batch_limit_failures: u64,
    pub entries_persisted: u64,
    pub storage_failures: u64,
    pub counter_failovers: u64,
    pub counter_remote_active: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
