//! Windowed hit counters with remote-to-local failover.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RemoteCounterConfig;

/// Count reported after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterHit {
    /// Hits in the current window, including this one.
    pub count: u64,
    /// Time until the window resets.
    pub time_remaining: Duration,
}

/// Remote counter failures.
#[derive(Debug, Clone, Error)]
pub enum CounterError {
    /// Could not reach the remote store.
    #[error("Remote counter unavailable: {0}")]
    Unavailable(String),

    /// A call did not finish in time.
    #[error("Remote counter call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote answered with something unexpected.
    #[error("Unexpected remote counter reply: {0}")]
    Protocol(String),
}

/// Shared counter store reachable over the network.
#[async_trait]
pub trait RemoteCounter: Send + Sync {
    /// Atomically add one hit to `key`, starting a window if none is running.
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterHit, CounterError>;

    /// Check the remote is reachable.
    async fn ping(&self) -> Result<(), CounterError>;
}

/// Which store answers increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMode {
    /// The remote store is in use.
    RemoteActive,
    /// The in-process counter is in use.
    LocalFallback,
}

impl CounterMode {
    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterMode::RemoteActive => "remote",
            CounterMode::LocalFallback => "local",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LocalEntry {
    hits: u64,
    expires_at: Instant,
}

/// In-process windowed counter.
#[derive(Debug, Default)]
pub struct LocalCounter {
    entries: DashMap<String, LocalEntry>,
}

impl LocalCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one hit to `key`.
    pub fn increment(&self, key: &str, window: Duration) -> CounterHit {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(LocalEntry {
            hits: 0,
            expires_at: now + window,
        });

        if entry.expires_at <= now {
            entry.hits = 0;
            entry.expires_at = now + window;
        }
        entry.hits += 1;

        CounterHit {
            count: entry.hits,
            time_remaining: entry.expires_at.saturating_duration_since(now),
        }
    }

    /// Drop expired windows, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let live = entry.expires_at > now;
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Forget every window.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rate counter store with automatic failover.
///
/// Never fails an increment: when the remote store cannot answer within the
/// retry budget the store switches to the local counter and answers from it.
pub struct RateCounterStore {
    remote: Option<Arc<dyn RemoteCounter>>,
    local: LocalCounter,
    mode: RwLock<CounterMode>,
    config: RemoteCounterConfig,
    failovers: AtomicU64,
}

impl RateCounterStore {
    /// Store that only ever counts locally.
    pub fn local_only(config: RemoteCounterConfig) -> Self {
        Self {
            remote: None,
            local: LocalCounter::new(),
            mode: RwLock::new(CounterMode::LocalFallback),
            config,
            failovers: AtomicU64::new(0),
        }
    }

    /// Store backed by `remote`, starting in remote mode.
    pub fn with_remote(remote: Arc<dyn RemoteCounter>, config: RemoteCounterConfig) -> Self {
        Self {
            remote: Some(remote),
            local: LocalCounter::new(),
            mode: RwLock::new(CounterMode::RemoteActive),
            config,
            failovers: AtomicU64::new(0),
        }
    }

    /// Current mode.
    pub fn mode(&self) -> CounterMode {
        *self.mode.read()
    }

    /// Whether a remote store is configured at all.
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Number of switches from remote to local.
    pub fn failover_count(&self) -> u64 {
        self.failovers.load(Ordering::Relaxed)
    }

    /// The in-process counter.
    pub fn local(&self) -> &LocalCounter {
        &self.local
    }

    /// Add one hit to `key` in the active store.
    pub async fn increment(&self, key: &str, window: Duration) -> CounterHit {
        if let (CounterMode::RemoteActive, Some(remote)) = (self.mode(), &self.remote) {
            match self.increment_remote(remote.as_ref(), key, window).await {
                Ok(hit) => return hit,
                Err(e) => self.enter_fallback(&e),
            }
        }
        self.local.increment(key, window)
    }

    async fn increment_remote(
        &self,
        remote: &dyn RemoteCounter,
        key: &str,
        window: Duration,
    ) -> Result<CounterHit, CounterError> {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(
                self.config.attempt_timeout,
                remote.increment(key, window),
            )
            .await
            .unwrap_or(Err(CounterError::Timeout(self.config.attempt_timeout)));

            match result {
                Ok(hit) => return Ok(hit),
                Err(e) if attempt >= self.config.max_retries => return Err(e),
                Err(e) => {
                    attempt += 1;
                    debug!(attempt, error = %e, "Remote counter attempt failed, retrying");
                    let backoff = (self.config.backoff_step * attempt).min(self.config.backoff_cap);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn enter_fallback(&self, error: &CounterError) {
        let mut mode = self.mode.write();
        if *mode == CounterMode::LocalFallback {
            return;
        }
        *mode = CounterMode::LocalFallback;
        self.local.clear();
        self.failovers.fetch_add(1, Ordering::Relaxed);
        warn!(error = %error, "Remote rate counter unavailable, falling back to local counting");
    }

    /// Ping the remote while in fallback and switch back when it answers.
    ///
    /// Returns whether the store is in remote mode afterwards.
    pub async fn probe_remote(&self) -> bool {
        let Some(remote) = &self.remote else {
            return false;
        };
        if self.mode() == CounterMode::RemoteActive {
            return true;
        }

        match tokio::time::timeout(self.config.probe_timeout, remote.ping()).await {
            Ok(Ok(())) => {
                *self.mode.write() = CounterMode::RemoteActive;
                info!("Remote rate counter reachable again, leaving local fallback");
                true
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Remote rate counter still unavailable");
                false
            }
            Err(_) => {
                debug!("Remote rate counter probe timed out");
                false
            }
        }
    }

    /// Check the remote at startup, falling back at once if it is unreachable.
    pub async fn connect(&self) {
        let Some(remote) = &self.remote else {
            return;
        };

        match tokio::time::timeout(self.config.probe_timeout, remote.ping()).await {
            Ok(Ok(())) => info!("Remote rate counter connected"),
            Ok(Err(e)) => self.enter_fallback(&e),
            Err(_) => self.enter_fallback(&CounterError::Timeout(self.config.probe_timeout)),
        }
    }

    /// Periodically reclaim expired local windows.
    pub async fn run_sweep_loop(self: Arc<Self>, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            let removed = self.local.sweep();
            if removed > 0 {
                debug!(removed, "Swept expired local rate windows");
            }
        }
    }

    /// Periodically probe the remote while in fallback.
    pub async fn run_probe_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.probe_interval).await;
            if self.mode() == CounterMode::LocalFallback {
                self.probe_remote().await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    /// Remote counter backed by a local counter that can be switched off.
    #[derive(Default)]
    pub(crate) struct ScriptedRemote {
        pub counter: LocalCounter,
        pub down: AtomicBool,
        pub hang: AtomicBool,
        pub calls: AtomicU64,
    }

    #[async_trait]
    impl RemoteCounter for ScriptedRemote {
        async fn increment(&self, key: &str, window: Duration) -> Result<CounterHit, CounterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(CounterError::Unavailable("connection refused".to_string()));
            }
            Ok(self.counter.increment(key, window))
        }

        async fn ping(&self) -> Result<(), CounterError> {
            if self.down.load(Ordering::SeqCst) {
                Err(CounterError::Unavailable("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn fast_config() -> RemoteCounterConfig {
        RemoteCounterConfig {
            enabled: true,
            attempt_timeout: Duration::from_millis(20),
            backoff_step: Duration::from_millis(5),
            backoff_cap: Duration::from_millis(10),
            probe_timeout: Duration::from_millis(50),
            ..RemoteCounterConfig::default()
        }
    }

    #[test]
    fn test_local_counter_windows() {
        let counter = LocalCounter::new();
        let window = Duration::from_millis(50);

        assert_eq!(counter.increment("a", window).count, 1);
        assert_eq!(counter.increment("a", window).count, 2);
        assert_eq!(counter.increment("b", window).count, 1);
        assert!(counter.increment("a", window).time_remaining <= window);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(counter.increment("a", window).count, 1);
        assert_eq!(counter.sweep(), 1);
        assert_eq!(counter.len(), 1);
    }

    #[tokio::test]
    async fn test_local_only_store() {
        let store = RateCounterStore::local_only(RemoteCounterConfig::default());
        assert_eq!(store.mode(), CounterMode::LocalFallback);
        assert!(!store.probe_remote().await);

        let hit = store.increment("caller:burst", Duration::from_secs(1)).await;
        assert_eq!(hit.count, 1);
        assert_eq!(store.failover_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_counts_used_while_active() {
        let remote = Arc::new(ScriptedRemote::default());
        let store = RateCounterStore::with_remote(remote.clone(), fast_config());

        store.increment("k", Duration::from_secs(1)).await;
        let hit = store.increment("k", Duration::from_secs(1)).await;

        assert_eq!(hit.count, 2);
        assert_eq!(remote.counter.len(), 1);
        assert!(store.local().is_empty());
    }

    #[tokio::test]
    async fn test_failover_discards_local_counts_and_recovers() {
        let remote = Arc::new(ScriptedRemote::default());
        let store = RateCounterStore::with_remote(remote.clone(), fast_config());
        store.local().increment("k", Duration::from_secs(1));

        remote.down.store(true, Ordering::SeqCst);
        let hit = store.increment("k", Duration::from_secs(1)).await;

        assert_eq!(hit.count, 1);
        assert_eq!(store.mode(), CounterMode::LocalFallback);
        assert_eq!(store.failover_count(), 1);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);

        assert!(!store.probe_remote().await);
        remote.down.store(false, Ordering::SeqCst);
        assert!(store.probe_remote().await);
        assert_eq!(store.mode(), CounterMode::RemoteActive);
    }

    #[tokio::test]
    async fn test_hanging_remote_bounded_by_timeouts() {
        let remote = Arc::new(ScriptedRemote::default());
        remote.hang.store(true, Ordering::SeqCst);
        let config = fast_config();
        let budget = config.worst_case_delay();
        let store = RateCounterStore::with_remote(remote, config);

        let started = Instant::now();
        let hit = store.increment("k", Duration::from_secs(1)).await;

        assert_eq!(hit.count, 1);
        assert_eq!(store.mode(), CounterMode::LocalFallback);
        assert!(started.elapsed() < budget + Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_connect_falls_back_when_unreachable() {
        let remote = Arc::new(ScriptedRemote::default());
        remote.down.store(true, Ordering::SeqCst);
        let store = RateCounterStore::with_remote(remote, fast_config());

        store.connect().await;
        assert_eq!(store.mode(), CounterMode::LocalFallback);
    }
}
