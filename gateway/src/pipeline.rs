//! Request pipeline: an ordered chain of stages ending in a handler.
//!
//! Stages run in the order they were added. Each one either answers the
//! request itself or passes it on through [`Next::run`].

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, instrument, warn};

use fxql_common::{FxqlError, PersistedEntry, Result};
use fxql_protocol::{FxqlRequest, Reply, RequestMetadata};
use fxql_statement::StatementEngine;
use fxql_store::EntryStore;

use crate::admission::AdmissionControl;
use crate::audit::{Outcome, OutcomeSink};
use crate::idempotency::{IdempotencyCache, Lookup, RecordKey};

/// A request travelling through the pipeline.
#[derive(Debug, Clone)]
pub struct Request {
    /// Statement body.
    pub body: FxqlRequest,
    /// Caller metadata.
    pub metadata: RequestMetadata,
}

/// One step of request decoration.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Handle the request or hand it to `next`.
    async fn process(&self, request: &Request, next: Next<'_>) -> Reply;
}

/// Terminal step producing the entries for a request.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Produce the persisted entries for a request.
    async fn handle(&self, request: &Request) -> Result<Vec<PersistedEntry>>;
}

/// The rest of the chain after the current stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    handler: &'a dyn Handler,
}

impl Next<'_> {
    /// Run the remaining stages and the handler.
    pub async fn run(self, request: &Request) -> Reply {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    handler: self.handler,
                };
                stage.process(request, next).await
            }
            None => match self.handler.handle(request).await {
                Ok(entries) => Reply::success(entries),
                Err(e) => Reply::error(&e),
            },
        }
    }
}

/// Composed stage chain plus outcome observers.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    handler: Arc<dyn Handler>,
    sinks: Vec<Arc<dyn OutcomeSink>>,
}

impl Pipeline {
    /// Pipeline with no stages in front of `handler`.
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            stages: Vec::new(),
            handler,
            sinks: Vec::new(),
        }
    }

    /// Append a stage to the chain.
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Add an outcome observer.
    pub fn with_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run a request through the chain.
    ///
    /// Never fails: errors and panics become error replies.
    #[instrument(skip_all, fields(
        caller = %metadata.caller,
        request_id = metadata.request_id.as_ref().map(|id| id.as_str()),
    ))]
    pub async fn process(&self, body: FxqlRequest, metadata: RequestMetadata) -> Reply {
        let started = Instant::now();
        let request = Request { body, metadata };
        let next = Next {
            stages: &self.stages,
            handler: self.handler.as_ref(),
        };

        let reply = match AssertUnwindSafe(next.run(&request)).catch_unwind().await {
            Ok(reply) => reply,
            Err(panic) => {
                error!(panic = %panic_message(&*panic), "Request processing panicked");
                Reply::error(&FxqlError::Internal("request processing failed".to_string()))
            }
        };

        debug!(status = reply.status, code = %reply.response.code, replayed = reply.replayed, "Request finished");
        self.notify(&request, &reply, started);
        reply
    }

    fn notify(&self, request: &Request, reply: &Reply, started: Instant) {
        if self.sinks.is_empty() {
            return;
        }

        let outcome = Outcome::new(
            request.metadata.request_id.clone(),
            request.metadata.caller.clone(),
            request.metadata.idempotency_key.clone(),
            fxql_crypto::content_hash(&request.body).ok(),
            reply,
            started.elapsed(),
        );

        for sink in &self.sinks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| sink.record(&outcome))).is_err() {
                warn!("Outcome sink panicked");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Refuses callers over their admission ceilings.
pub struct AdmissionStage {
    admission: AdmissionControl,
}

impl AdmissionStage {
    /// Create the stage.
    pub fn new(admission: AdmissionControl) -> Self {
        Self { admission }
    }
}

#[async_trait]
impl Stage for AdmissionStage {
    fn name(&self) -> &'static str {
        "admission"
    }

    async fn process(&self, request: &Request, next: Next<'_>) -> Reply {
        match self.admission.admit(&request.metadata.caller).await {
            Ok(()) => next.run(request).await,
            Err(e) => Reply::error(&e),
        }
    }
}

/// Refuses callers whose identity is not an accepted API key.
pub struct ApiKeyStage {
    keys: HashSet<String>,
}

impl ApiKeyStage {
    /// Create the stage over the accepted keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Stage for ApiKeyStage {
    fn name(&self) -> &'static str {
        "api_key"
    }

    async fn process(&self, request: &Request, next: Next<'_>) -> Reply {
        if self.keys.contains(request.metadata.caller.as_str()) {
            next.run(request).await
        } else {
            Reply::error(&FxqlError::InvalidApiKey)
        }
    }
}

/// Replays cached responses and caches fresh successful ones.
pub struct IdempotencyStage {
    cache: Arc<IdempotencyCache>,
}

impl IdempotencyStage {
    /// Create the stage over a cache.
    pub fn new(cache: Arc<IdempotencyCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Stage for IdempotencyStage {
    fn name(&self) -> &'static str {
        "idempotency"
    }

    async fn process(&self, request: &Request, next: Next<'_>) -> Reply {
        let Some(idempotency_key) = request.metadata.idempotency_key.clone() else {
            return next.run(request).await;
        };
        if !idempotency_key.is_valid() {
            warn!(key_len = idempotency_key.as_str().len(), "Ignoring unusable idempotency key");
            return next.run(request).await;
        }

        let key = RecordKey::new(idempotency_key, request.metadata.caller.clone());
        let request_hash = match IdempotencyCache::request_hash(&request.body) {
            Ok(hash) => hash,
            Err(e) => return Reply::error(&FxqlError::Internal(e.to_string())),
        };

        let _permit = self.cache.acquire(&key).await;
        match self.cache.lookup(&key, &request_hash).await {
            Lookup::Hit(cached) => return Reply::replay(cached.status_code, cached.response),
            Lookup::Conflict => {
                return Reply::error(&FxqlError::IdempotencyConflict {
                    key: key.idempotency_key.to_string(),
                })
            }
            Lookup::Miss => {}
        }

        let reply = next.run(request).await;
        self.cache.store(&key, &request.body, &reply).await;
        reply
    }
}

/// Parses, validates and persists the statements in a request.
pub struct StatementHandler {
    engine: StatementEngine,
    store: Arc<dyn EntryStore>,
}

impl StatementHandler {
    /// Create the handler.
    pub fn new(engine: StatementEngine, store: Arc<dyn EntryStore>) -> Self {
        Self { engine, store }
    }
}

#[async_trait]
impl Handler for StatementHandler {
    #[instrument(skip_all)]
    async fn handle(&self, request: &Request) -> Result<Vec<PersistedEntry>> {
        let entries = self.engine.process(&request.body.fxql)?;
        self.store.accept(entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxql_common::CallerId;
    use fxql_store::MemoryEntryStore;
    use parking_lot::Mutex;

    struct PanickingHandler;

    #[async_trait]
    impl Handler for PanickingHandler {
        async fn handle(&self, _request: &Request) -> Result<Vec<PersistedEntry>> {
            panic!("handler exploded");
        }
    }

    struct RecordingStage {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Stage for RecordingStage {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn process(&self, request: &Request, next: Next<'_>) -> Reply {
            self.log.lock().push(self.name);
            next.run(request).await
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<Outcome>>);

    impl OutcomeSink for CollectingSink {
        fn record(&self, outcome: &Outcome) {
            self.0.lock().push(outcome.clone());
        }
    }

    fn handler(store: Arc<MemoryEntryStore>) -> Arc<dyn Handler> {
        Arc::new(StatementHandler::new(StatementEngine::default(), store))
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(handler(Arc::new(MemoryEntryStore::new())))
            .with_stage(Arc::new(RecordingStage { name: "first", log: log.clone() }))
            .with_stage(Arc::new(RecordingStage { name: "second", log: log.clone() }));

        let reply = pipeline
            .process(
                FxqlRequest::new("USD-GBP { BUY 1 SELL 1 CAP 1 }"),
                RequestMetadata::new("alpha"),
            )
            .await;

        assert!(reply.is_success());
        assert_eq!(pipeline.stage_names(), vec!["first", "second"]);
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let sink = Arc::new(CollectingSink::default());
        let pipeline = Pipeline::new(Arc::new(PanickingHandler)).with_sink(sink.clone());

        let reply = pipeline
            .process(FxqlRequest::new("x"), RequestMetadata::new("alpha"))
            .await;

        assert_eq!(reply.status, 500);
        assert_eq!(reply.response.code, "FXQL-500");
        assert_eq!(sink.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_api_key_stage() {
        let store = Arc::new(MemoryEntryStore::new());
        let pipeline = Pipeline::new(handler(store.clone()))
            .with_stage(Arc::new(ApiKeyStage::new(["key1", "key2"])));
        let body = FxqlRequest::new("USD-GBP { BUY 1 SELL 1 CAP 1 }");

        let refused = pipeline
            .process(body.clone(), RequestMetadata::new(CallerId::anonymous()))
            .await;
        assert_eq!(refused.status, 403);
        assert!(store.is_empty());

        let accepted = pipeline.process(body, RequestMetadata::new("key2")).await;
        assert!(accepted.is_success());
    }

    #[tokio::test]
    async fn test_storage_failure_reported() {
        let store = Arc::new(MemoryEntryStore::new());
        store.set_unavailable(true);
        let pipeline = Pipeline::new(handler(store));

        let reply = pipeline
            .process(
                FxqlRequest::new("USD-GBP { BUY 1 SELL 1 CAP 1 }"),
                RequestMetadata::new("alpha"),
            )
            .await;

        assert_eq!(reply.status, 500);
        assert_eq!(reply.response.code, "FXQL_E_STORAGE_FAILED");
    }

    #[tokio::test]
    async fn test_outcome_carries_hash_not_body() {
        let sink = Arc::new(CollectingSink::default());
        let pipeline =
            Pipeline::new(handler(Arc::new(MemoryEntryStore::new()))).with_sink(sink.clone());
        let body = FxqlRequest::new("USD-GBP { BUY 1 SELL 1 CAP 1 }");

        pipeline
            .process(body.clone(), RequestMetadata::new("alpha").with_idempotency_key("k-1"))
            .await;

        let outcomes = sink.0.lock();
        assert_eq!(
            outcomes[0].request_hash.as_deref(),
            Some(fxql_crypto::content_hash(&body).unwrap().as_str())
        );
        assert_eq!(outcomes[0].entries, 1);
    }
}
