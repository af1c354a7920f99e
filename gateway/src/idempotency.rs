//! Idempotency cache for replaying responses to retried requests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use fxql_common::{constants, now, CallerId, IdempotencyKey, Timestamp};
use fxql_protocol::{FxqlRequest, FxqlResponse, Reply};

use crate::config::IdempotencyConfig;

/// Identity of a cached response: the key scoped to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    /// Caller-supplied idempotency key.
    pub idempotency_key: IdempotencyKey,
    /// Caller the key belongs to.
    pub caller: CallerId,
}

impl RecordKey {
    /// Create a record key.
    pub fn new(idempotency_key: IdempotencyKey, caller: CallerId) -> Self {
        Self {
            idempotency_key,
            caller,
        }
    }
}

/// A cached response.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    /// Key the record is stored under.
    pub key: RecordKey,
    /// SHA-256 of the serialized request body.
    pub request_hash: String,
    /// Serialized response envelope.
    pub response: String,
    /// Status returned with the response.
    pub status_code: u16,
    /// When the record was written.
    pub created_at: Timestamp,
    /// When the record stops being replayable.
    pub expires_at: Timestamp,
}

impl IdempotencyRecord {
    /// Whether the record is past its expiry at `at`.
    pub fn is_expired_at(&self, at: Timestamp) -> bool {
        self.expires_at <= at
    }
}

/// Idempotency backend failures.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend could not be reached.
    #[error("Idempotency backend unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded.
    #[error("Corrupt idempotency record: {0}")]
    Corrupt(String),
}

/// Storage behind the idempotency cache.
#[async_trait]
pub trait IdempotencyBackend: Send + Sync {
    /// Fetch the record for `key`, expired or not.
    async fn find(&self, key: &RecordKey) -> Result<Option<IdempotencyRecord>, BackendError>;

    /// Insert `record` unless a live record holds the slot.
    ///
    /// An expired record in the slot is replaced. Returns whether the record
    /// was written.
    async fn insert_if_absent(&self, record: IdempotencyRecord) -> Result<bool, BackendError>;

    /// Remove the record for `key` if it is still expired at `at`.
    async fn remove_if_expired(&self, key: &RecordKey, at: Timestamp) -> Result<bool, BackendError>;

    /// Remove every record expired at `at`, returning how many went.
    async fn purge_expired(&self, at: Timestamp) -> Result<usize, BackendError>;
}

/// In-process backend with per-entry locking.
#[derive(Debug, Default)]
pub struct MemoryIdempotencyBackend {
    records: DashMap<RecordKey, IdempotencyRecord>,
}

impl MemoryIdempotencyBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held, expired or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdempotencyBackend for MemoryIdempotencyBackend {
    async fn find(&self, key: &RecordKey) -> Result<Option<IdempotencyRecord>, BackendError> {
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    async fn insert_if_absent(&self, record: IdempotencyRecord) -> Result<bool, BackendError> {
        let at = record.created_at;
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_expired_at(at) {
                    existing.insert(record);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn remove_if_expired(&self, key: &RecordKey, at: Timestamp) -> Result<bool, BackendError> {
        Ok(self
            .records
            .remove_if(key, |_, record| record.is_expired_at(at))
            .is_some())
    }

    async fn purge_expired(&self, at: Timestamp) -> Result<usize, BackendError> {
        let mut removed = 0;
        self.records.retain(|_, record| {
            let live = !record.is_expired_at(at);
            if !live {
                removed += 1;
            }
            live
        });
        Ok(removed)
    }
}

/// A response ready for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    /// The original envelope.
    pub response: FxqlResponse,
    /// The original status.
    pub status_code: u16,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Nothing replayable.
    Miss,
    /// A live record for the same request.
    Hit(CachedResponse),
    /// A live record for a different request body.
    Conflict,
}

/// Held while a fresh response is computed for one record key.
///
/// Duplicates for the same key wait on the gate and then find the cached
/// record.
pub struct InflightPermit<'a> {
    gate: &'a DashMap<RecordKey, Arc<Mutex<()>>>,
    key: RecordKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InflightPermit<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.gate
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Maps (idempotency key, caller) to a previously computed response.
pub struct IdempotencyCache {
    backend: Arc<dyn IdempotencyBackend>,
    config: IdempotencyConfig,
    inflight: DashMap<RecordKey, Arc<Mutex<()>>>,
}

impl IdempotencyCache {
    /// Create a cache over `backend`.
    pub fn new(backend: Arc<dyn IdempotencyBackend>, config: IdempotencyConfig) -> Self {
        Self {
            backend,
            config,
            inflight: DashMap::new(),
        }
    }

    /// Create a cache over a fresh in-memory backend.
    pub fn in_memory(config: IdempotencyConfig) -> Self {
        Self::new(Arc::new(MemoryIdempotencyBackend::new()), config)
    }

    /// Content hash identifying a request body.
    pub fn request_hash(body: &FxqlRequest) -> fxql_crypto::Result<String> {
        fxql_crypto::content_hash(body)
    }

    /// Find a replayable response for `key`.
    ///
    /// Expired records are evicted on the way. Backend trouble is logged and
    /// treated as a miss.
    pub async fn lookup(&self, key: &RecordKey, request_hash: &str) -> Lookup {
        let record = match self.backend.find(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return Lookup::Miss,
            Err(e) => {
                warn!(key = %key.idempotency_key, error = %e, "Idempotency lookup failed");
                return Lookup::Miss;
            }
        };

        let at = now();
        if record.is_expired_at(at) {
            debug!(key = %key.idempotency_key, "Idempotency record expired");
            if let Err(e) = self.backend.remove_if_expired(key, at).await {
                warn!(key = %key.idempotency_key, error = %e, "Failed to evict expired record");
            }
            return Lookup::Miss;
        }

        if self.config.enforce_request_hash && record.request_hash != request_hash {
            return Lookup::Conflict;
        }

        match serde_json::from_str::<FxqlResponse>(&record.response) {
            Ok(response) => {
                info!(key = %key.idempotency_key, "Returning cached response");
                Lookup::Hit(CachedResponse {
                    response,
                    status_code: record.status_code,
                })
            }
            Err(e) => {
                let e = BackendError::Corrupt(e.to_string());
                warn!(key = %key.idempotency_key, error = %e, "Ignoring cached response");
                Lookup::Miss
            }
        }
    }

    /// Cache `reply` for `key`. Only 2xx replies are kept.
    ///
    /// Losing a race to a concurrent writer is not an error. Returns whether
    /// a record was written.
    pub async fn store(&self, key: &RecordKey, body: &FxqlRequest, reply: &Reply) -> bool {
        if !reply.is_success() {
            return false;
        }

        let (request_hash, response) =
            match (Self::request_hash(body), serde_json::to_string(&reply.response)) {
                (Ok(hash), Ok(response)) => (hash, response),
                (Err(e), _) => {
                    warn!(key = %key.idempotency_key, error = %e, "Failed to hash request");
                    return false;
                }
                (_, Err(e)) => {
                    warn!(key = %key.idempotency_key, error = %e, "Failed to serialize response");
                    return false;
                }
            };

        let created_at = now();
        let record = IdempotencyRecord {
            key: key.clone(),
            request_hash,
            response,
            status_code: reply.status,
            created_at,
            expires_at: created_at + self.retention(),
        };

        match self.backend.insert_if_absent(record).await {
            Ok(true) => {
                info!(key = %key.idempotency_key, "Cached response");
                true
            }
            Ok(false) => {
                debug!(key = %key.idempotency_key, "Response already cached by a concurrent request");
                false
            }
            Err(e) => {
                warn!(key = %key.idempotency_key, error = %e, "Failed to cache response");
                false
            }
        }
    }

    /// Delete every expired record. Failures are logged.
    pub async fn cleanup(&self) -> usize {
        match self.backend.purge_expired(now()).await {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, "Cleaned up expired idempotency records");
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, "Idempotency cleanup failed");
                0
            }
        }
    }

    /// Wait until no other request is computing a response for `key`.
    pub async fn acquire(&self, key: &RecordKey) -> InflightPermit<'_> {
        let lock = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;

        InflightPermit {
            gate: &self.inflight,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys with a response being computed.
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Run [`cleanup`](Self::cleanup) on the configured interval.
    pub async fn run_cleanup_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.cleanup_interval).await;
            self.cleanup().await;
        }
    }

    fn retention(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| constants::idempotency_retention())
    }

    /// Cleanup interval in force.
    pub fn cleanup_interval(&self) -> Duration {
        self.config.cleanup_interval
    }
}
