//! Gateway service: owns the pipeline, its shared state and background tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use fxql_common::{FxqlError, Result};
use fxql_protocol::{FxqlRequest, Reply, RequestEnvelope, RequestMetadata};
use fxql_statement::StatementEngine;
use fxql_store::EntryStore;

use crate::admission::AdmissionControl;
use crate::audit::AuditSink;
use crate::config::GatewayConfig;
use crate::idempotency::IdempotencyCache;
use crate::metrics::{Metrics, SharedMetrics};
use crate::pipeline::{AdmissionStage, ApiKeyStage, IdempotencyStage, Pipeline, StatementHandler};
use crate::rate_counter::{CounterMode, RateCounterStore, RemoteCounter};
use crate::redis_counter::RedisCounter;
use crate::state::ServiceState;

/// Suggested retry delay while the service is not running.
const UNAVAILABLE_RETRY_MS: u64 = 1000;

/// The FXQL ingestion service.
pub struct FxqlService {
    config: GatewayConfig,
    state: Arc<RwLock<ServiceState>>,
    pipeline: Pipeline,
    counters: Arc<RateCounterStore>,
    idempotency: Arc<IdempotencyCache>,
    metrics: SharedMetrics,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    in_flight: AtomicUsize,
}

impl FxqlService {
    /// Build the service, using Redis for rate counting when enabled.
    pub fn new(config: GatewayConfig, store: Arc<dyn EntryStore>) -> Self {
        let remote = &config.remote_counter;
        let counters = if remote.enabled {
            match RedisCounter::new(&remote.url, remote.key_prefix.clone()) {
                Ok(redis) => RateCounterStore::with_remote(Arc::new(redis), remote.clone()),
                Err(e) => {
                    warn!(error = %e, "Remote rate counter misconfigured, counting locally");
                    RateCounterStore::local_only(remote.clone())
                }
            }
        } else {
            info!("Remote rate counter disabled, counting locally");
            RateCounterStore::local_only(remote.clone())
        };
        Self::build(config, store, counters)
    }

    /// Build the service over a caller-supplied remote counter.
    pub fn with_remote_counter(
        config: GatewayConfig,
        store: Arc<dyn EntryStore>,
        remote: Arc<dyn RemoteCounter>,
    ) -> Self {
        let counters = RateCounterStore::with_remote(remote, config.remote_counter.clone());
        Self::build(config, store, counters)
    }

    fn build(config: GatewayConfig, store: Arc<dyn EntryStore>, counters: RateCounterStore) -> Self {
        let counters = Arc::new(counters);
        let idempotency = Arc::new(IdempotencyCache::in_memory(config.idempotency.clone()));
        let metrics: SharedMetrics = Arc::new(Metrics::new());

        let handler = StatementHandler::new(StatementEngine::new(config.rules.clone()), store);
        let admission = AdmissionControl::new(counters.clone(), config.rate_limits.clone());

        let mut pipeline =
            Pipeline::new(Arc::new(handler)).with_stage(Arc::new(AdmissionStage::new(admission)));
        if !config.api_keys.is_empty() {
            pipeline = pipeline.with_stage(Arc::new(ApiKeyStage::new(config.api_keys.iter().cloned())));
        }
        let pipeline = pipeline
            .with_stage(Arc::new(IdempotencyStage::new(idempotency.clone())))
            .with_sink(metrics.clone())
            .with_sink(Arc::new(AuditSink));

        Self {
            config,
            state: Arc::new(RwLock::new(ServiceState::Starting)),
            pipeline,
            counters,
            idempotency,
            metrics,
            tasks: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Start accepting requests and launch background tasks.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        info!(stages = ?self.pipeline.stage_names(), "Starting FXQL service");

        self.counters.connect().await;
        self.start_background_tasks();

        *self.state.write() = ServiceState::Running;
        info!(
            counter_mode = self.counters.mode().as_str(),
            rules_version = %self.config.rules.version,
            "FXQL service started"
        );
        Ok(())
    }

    /// Stop accepting requests, wait for in-flight ones and stop background tasks.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping FXQL service");
        *self.state.write() = ServiceState::ShuttingDown;

        self.drain_in_flight().await;

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        *self.state.write() = ServiceState::Stopped;
        info!("FXQL service stopped");
        Ok(())
    }

    /// Handle one request.
    pub async fn handle(&self, body: FxqlRequest, metadata: RequestMetadata) -> Reply {
        if !self.is_accepting_requests() {
            return Reply::error(&FxqlError::ServiceUnavailable {
                retry_after_ms: UNAVAILABLE_RETRY_MS,
            });
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let reply = self.pipeline.process(body, metadata).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }

    /// Handle one request in wire form.
    pub async fn handle_envelope(&self, envelope: RequestEnvelope) -> Reply {
        match envelope.into_parts() {
            Ok((body, metadata)) => self.handle(body, metadata).await,
            Err(e) => {
                warn!(error = %e, "Request envelope refused");
                Reply::error(&e)
            }
        }
    }

    /// Check if the service is accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state.read().accepts_requests()
    }

    /// Get the current service state.
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Configuration in force.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Shared metrics.
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Metrics in Prometheus text format.
    pub fn metrics_text(&self) -> String {
        self.metrics.set_counter_failovers(self.counters.failover_count());
        self.metrics
            .set_counter_remote_active(self.counters.mode() == CounterMode::RemoteActive);
        self.metrics.to_prometheus()
    }

    /// Rate counter store.
    pub fn counters(&self) -> &Arc<RateCounterStore> {
        &self.counters
    }

    /// Idempotency cache.
    pub fn idempotency(&self) -> &Arc<IdempotencyCache> {
        &self.idempotency
    }

    /// Number of requests currently in the pipeline.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    // --- Private methods ---

    fn start_background_tasks(&self) {
        let mut tasks = self.tasks.lock();

        let idempotency = self.idempotency.clone();
        tasks.push(tokio::spawn(async move {
            idempotency.run_cleanup_loop().await;
        }));

        let counters = self.counters.clone();
        let sweep_interval = self.config.counter_sweep_interval;
        tasks.push(tokio::spawn(async move {
            counters.run_sweep_loop(sweep_interval).await;
        }));

        if self.counters.has_remote() {
            let counters = self.counters.clone();
            tasks.push(tokio::spawn(async move {
                counters.run_probe_loop().await;
            }));
        }
    }

    async fn drain_in_flight(&self) {
        let drain_timeout = Duration::from_secs(30);

        let drained = tokio::time::timeout(drain_timeout, async {
            loop {
                let pending = self.in_flight();
                if pending == 0 {
                    break;
                }
                info!(pending, "Waiting for in-flight requests to complete");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(pending = self.in_flight(), "Gave up waiting for in-flight requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxql_store::MemoryEntryStore;

    fn service() -> FxqlService {
        FxqlService::new(GatewayConfig::default(), Arc::new(MemoryEntryStore::new()))
    }

    #[tokio::test]
    async fn test_service_creation() {
        let service = service();
        assert_eq!(service.state(), ServiceState::Starting);
        assert_eq!(service.counters().mode(), CounterMode::LocalFallback);
        assert_eq!(service.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_service_start_stop() {
        let service = service();

        service.start().await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);
        assert_eq!(service.tasks.lock().len(), 2);

        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(service.tasks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_requests_refused_unless_running() {
        let service = service();
        let body = FxqlRequest::new("USD-GBP { BUY 1 SELL 1 CAP 1 }");

        let reply = service.handle(body.clone(), RequestMetadata::new("alpha")).await;
        assert_eq!(reply.status, 503);
        assert_eq!(reply.response.code, "FXQL_E_SERVICE_UNAVAILABLE");

        service.start().await.unwrap();
        assert!(service.handle(body.clone(), RequestMetadata::new("alpha")).await.is_success());

        service.stop().await.unwrap();
        assert_eq!(service.handle(body, RequestMetadata::new("alpha")).await.status, 503);
    }

    #[tokio::test]
    async fn test_api_key_stage_only_when_configured() {
        let config = GatewayConfig {
            api_keys: vec!["key1".to_string()],
            ..GatewayConfig::default()
        };
        let keyed = FxqlService::new(config, Arc::new(MemoryEntryStore::new()));
        assert_eq!(
            keyed.pipeline.stage_names(),
            vec!["admission", "api_key", "idempotency"]
        );
        assert_eq!(
            service().pipeline.stage_names(),
            vec!["admission", "idempotency"]
        );
    }

    #[tokio::test]
    async fn test_metrics_text_reports_counter_mode() {
        let service = service();
        service.start().await.unwrap();
        service
            .handle(
                FxqlRequest::new("USD-GBP { BUY 1 SELL 1 CAP 1 }"),
                RequestMetadata::new("alpha"),
            )
            .await;

        let text = service.metrics_text();
        assert!(text.contains("fxql_requests_success 1"));
        assert!(text.contains("fxql_counter_remote_active 0"));
        service.stop().await.unwrap();
    }
}
