//! End-to-end tests driving the gateway service through its public API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use proptest::prelude::*;
use rust_decimal_macros::dec;
use tokio_test::assert_ok;

use fxql_gateway::config::{LimiterConfig, RateLimitConfig, RemoteCounterConfig};
use fxql_gateway::rate_counter::LocalCounter;
use fxql_gateway::{
    CounterError, CounterHit, CounterMode, FxqlService, GatewayConfig, RemoteCounter,
};
use fxql_protocol::{FxqlRequest, RequestEnvelope, RequestMetadata};
use fxql_store::MemoryEntryStore;

const EXAMPLE: &str = "USD-GBP {\n BUY 100\n SELL 200\n CAP 93800\n}";

fn generous_limits() -> RateLimitConfig {
    RateLimitConfig {
        sustained: LimiterConfig::new("sustained", Duration::from_secs(60), 10_000),
        burst: LimiterConfig::new("burst", Duration::from_secs(1), 10_000),
    }
}

fn config() -> GatewayConfig {
    GatewayConfig {
        rate_limits: generous_limits(),
        ..GatewayConfig::default()
    }
}

async fn started(config: GatewayConfig) -> (Arc<FxqlService>, Arc<MemoryEntryStore>) {
    let store = Arc::new(MemoryEntryStore::new());
    let service = Arc::new(FxqlService::new(config, store.clone()));
    assert_ok!(service.start().await);
    (service, store)
}

fn statement(pair: &str, buy: &str, sell: &str, cap: &str) -> String {
    format!("{pair} {{ BUY {buy} SELL {sell} CAP {cap} }}")
}

/// Remote counter that answers from its own local window until switched off.
#[derive(Default)]
struct SwitchableRemote {
    counter: LocalCounter,
    down: AtomicBool,
}

#[async_trait]
impl RemoteCounter for SwitchableRemote {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterHit, CounterError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CounterError::Unavailable("connection reset".to_string()));
        }
        Ok(self.counter.increment(key, window))
    }

    async fn ping(&self) -> Result<(), CounterError> {
        if self.down.load(Ordering::SeqCst) {
            Err(CounterError::Unavailable("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn test_single_statement_accepted() {
    let (service, store) = started(config()).await;

    let reply = service
        .handle(FxqlRequest::new(EXAMPLE), RequestMetadata::new("alpha"))
        .await;

    assert_eq!(reply.status, 200);
    assert_eq!(reply.response.code, "FXQL-200");
    assert_eq!(reply.response.message, "Rates Parsed Successfully.");
    let data = reply.response.data.as_ref().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].entry.source_currency.code(), "USD");
    assert_eq!(data[0].entry.destination_currency.code(), "GBP");
    assert_eq!(data[0].entry.buy_price, dec!(100));
    assert_eq!(data[0].entry.sell_price, dec!(200));
    assert_eq!(data[0].entry.cap_amount, 93800);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_multiple_statements_keep_order() {
    let (service, _) = started(config()).await;
    let text = [
        statement("USD-GBP", "100", "200", "93800"),
        statement("EUR-JPY", "80", "90", "350"),
        statement("NGN-USD", "0.0022", "0.0023", "2000000"),
    ]
    .join("\n\n");

    let reply = service.handle(FxqlRequest::new(text), RequestMetadata::new("alpha")).await;

    let pairs: Vec<String> = reply
        .response
        .data
        .unwrap()
        .iter()
        .map(|e| e.entry.pair())
        .collect();
    assert_eq!(pairs, vec!["USD-GBP", "EUR-JPY", "NGN-USD"]);
}

#[tokio::test]
async fn test_unknown_currency_rejected() {
    let (service, store) = started(config()).await;

    let reply = service
        .handle(
            FxqlRequest::new(statement("XXX-GBP", "1", "1", "1")),
            RequestMetadata::new("alpha"),
        )
        .await;

    assert_eq!(reply.status, 400);
    assert_eq!(reply.response.code, "FXQL_E_BAD_ISO");
    let details = reply.response.details.unwrap();
    assert_eq!(details[0].field.as_deref(), Some("sourceCurrency"));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_malformed_statement_rejected() {
    let (service, store) = started(config()).await;

    let reply = service
        .handle(
            FxqlRequest::new("usd-GBP { BUY 100 SELL 200 CAP 93800 }"),
            RequestMetadata::new("alpha"),
        )
        .await;

    assert_eq!(reply.status, 400);
    assert_eq!(reply.response.code, "FXQL_E_MALFORMED_SYNTAX");
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_batch_limit_rejects_whole_request() {
    let (service, store) = started(config()).await;
    let text = vec![statement("USD-GBP", "1", "1", "1"); 1001].join("\n");

    let reply = service.handle(FxqlRequest::new(text), RequestMetadata::new("alpha")).await;

    assert_eq!(reply.status, 400);
    assert_eq!(reply.response.code, "FXQL_E_EXCEEDS_MAX_PAIRS");
    assert!(store.is_empty());
    assert_eq!(store.batch_count(), 0);
}

#[tokio::test]
async fn test_boundary_values() {
    let (service, _) = started(config()).await;

    let zero_cap = service
        .handle(
            FxqlRequest::new(statement("USD-GBP", "1", "1", "0")),
            RequestMetadata::new("alpha"),
        )
        .await;
    assert_eq!(zero_cap.status, 200);

    let max_price = service
        .handle(
            FxqlRequest::new(statement("USD-GBP", "999999999", "999999999", "1")),
            RequestMetadata::new("alpha"),
        )
        .await;
    assert_eq!(max_price.status, 200);

    let over_price = service
        .handle(
            FxqlRequest::new(statement("USD-GBP", "1000000000", "1", "1")),
            RequestMetadata::new("alpha"),
        )
        .await;
    assert_eq!(over_price.status, 400);
    assert_eq!(over_price.response.code, "FXQL_E_PRICE_OUT_OF_RANGE");
}

#[tokio::test]
async fn test_idempotent_replay_is_identical() {
    let (service, store) = started(config()).await;
    let metadata = RequestMetadata::new("alpha").with_idempotency_key("order-42");

    let first = service.handle(FxqlRequest::new(EXAMPLE), metadata.clone()).await;
    let second = service.handle(FxqlRequest::new(EXAMPLE), metadata).await;

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.status, second.status);
    assert_eq!(
        serde_json::to_string(&first.response).unwrap(),
        serde_json::to_string(&second.response).unwrap()
    );
    assert_eq!(store.batch_count(), 1);
    assert_eq!(service.metrics().snapshot().idempotency_hits, 1);
}

#[tokio::test]
async fn test_idempotency_key_scoped_per_caller() {
    let (service, store) = started(config()).await;

    service
        .handle(
            FxqlRequest::new(EXAMPLE),
            RequestMetadata::new("alpha").with_idempotency_key("shared"),
        )
        .await;
    let other = service
        .handle(
            FxqlRequest::new(EXAMPLE),
            RequestMetadata::new("beta").with_idempotency_key("shared"),
        )
        .await;

    assert!(!other.replayed);
    assert_eq!(store.batch_count(), 2);
}

#[tokio::test]
async fn test_rejections_are_not_cached() {
    let (service, store) = started(config()).await;
    let metadata = RequestMetadata::new("alpha").with_idempotency_key("retry-me");

    let failed = service
        .handle(FxqlRequest::new(statement("XXX-GBP", "1", "1", "1")), metadata.clone())
        .await;
    assert_eq!(failed.status, 400);

    // Same key, same body: recomputed, not replayed.
    let again = service
        .handle(FxqlRequest::new(statement("XXX-GBP", "1", "1", "1")), metadata)
        .await;
    assert!(!again.replayed);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_reused_key_with_different_body_conflicts() {
    let (service, store) = started(config()).await;
    let metadata = RequestMetadata::new("alpha").with_idempotency_key("order-7");

    service.handle(FxqlRequest::new(EXAMPLE), metadata.clone()).await;
    let reply = service
        .handle(FxqlRequest::new(statement("EUR-GBP", "1", "1", "1")), metadata)
        .await;

    assert_eq!(reply.status, 422);
    assert_eq!(reply.response.code, "FXQL_E_IDEMPOTENCY_CONFLICT");
    assert_eq!(store.batch_count(), 1);
}

#[tokio::test]
async fn test_reused_key_replays_when_hash_not_enforced() {
    let mut config = config();
    config.idempotency.enforce_request_hash = false;
    let (service, store) = started(config).await;
    let metadata = RequestMetadata::new("alpha").with_idempotency_key("order-7");

    let first = service.handle(FxqlRequest::new(EXAMPLE), metadata.clone()).await;
    let second = service
        .handle(FxqlRequest::new(statement("EUR-GBP", "1", "1", "1")), metadata)
        .await;

    assert!(second.replayed);
    assert_eq!(first.response, second.response);
    assert_eq!(store.batch_count(), 1);
}

#[tokio::test]
async fn test_expired_record_is_recomputed() {
    let mut config = config();
    config.idempotency.retention = Duration::from_millis(50);
    let (service, store) = started(config).await;
    let metadata = RequestMetadata::new("alpha").with_idempotency_key("short-lived");

    service.handle(FxqlRequest::new(EXAMPLE), metadata.clone()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let again = service.handle(FxqlRequest::new(EXAMPLE), metadata).await;

    assert!(!again.replayed);
    assert_eq!(store.batch_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_processed_once() {
    let (service, store) = started(config()).await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .handle(
                        FxqlRequest::new(EXAMPLE),
                        RequestMetadata::new("alpha").with_idempotency_key("burst-key"),
                    )
                    .await
            })
        })
        .collect();

    let mut replies = Vec::new();
    for handle in handles {
        replies.push(handle.await.unwrap());
    }

    assert!(replies.iter().all(|r| r.status == 200));
    assert_eq!(replies.iter().filter(|r| !r.replayed).count(), 1);
    assert_eq!(store.batch_count(), 1);
    assert_eq!(service.idempotency().inflight_count(), 0);
}

#[tokio::test]
async fn test_rate_ceiling_and_window_reset() {
    let config = GatewayConfig {
        rate_limits: RateLimitConfig {
            sustained: LimiterConfig::new("sustained", Duration::from_secs(60), 100),
            burst: LimiterConfig::new("burst", Duration::from_millis(200), 3),
        },
        ..GatewayConfig::default()
    };
    let (service, store) = started(config).await;
    let body = FxqlRequest::new(EXAMPLE);

    for _ in 0..3 {
        let reply = service.handle(body.clone(), RequestMetadata::new("alpha")).await;
        assert_eq!(reply.status, 200);
    }

    let refused = service.handle(body.clone(), RequestMetadata::new("alpha")).await;
    assert_eq!(refused.status, 429);
    assert_eq!(refused.response.code, "FXQL_E_RATE_LIMIT_EXCEEDED");
    assert_eq!(store.batch_count(), 3);

    // A different caller has its own window.
    let other = service.handle(body.clone(), RequestMetadata::new("beta")).await;
    assert_eq!(other.status, 200);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let admitted = service.handle(body, RequestMetadata::new("alpha")).await;
    assert_eq!(admitted.status, 200);
}

#[tokio::test]
async fn test_remote_counter_failure_is_invisible_to_callers() {
    let remote = Arc::new(SwitchableRemote::default());
    let config = GatewayConfig {
        rate_limits: generous_limits(),
        remote_counter: RemoteCounterConfig {
            enabled: true,
            attempt_timeout: Duration::from_millis(20),
            backoff_step: Duration::from_millis(5),
            backoff_cap: Duration::from_millis(10),
            ..RemoteCounterConfig::default()
        },
        ..GatewayConfig::default()
    };
    let worst_case = config.remote_counter.worst_case_delay();
    let service = FxqlService::with_remote_counter(
        config,
        Arc::new(MemoryEntryStore::new()),
        remote.clone(),
    );
    assert_ok!(service.start().await);
    assert_eq!(service.counters().mode(), CounterMode::RemoteActive);

    let reply = service.handle(FxqlRequest::new(EXAMPLE), RequestMetadata::new("alpha")).await;
    assert_eq!(reply.status, 200);

    remote.down.store(true, Ordering::SeqCst);
    let started = Instant::now();
    let reply = service.handle(FxqlRequest::new(EXAMPLE), RequestMetadata::new("alpha")).await;
    assert_eq!(reply.status, 200);
    assert!(started.elapsed() < worst_case + Duration::from_millis(500));
    assert_eq!(service.counters().mode(), CounterMode::LocalFallback);
    assert_eq!(service.counters().failover_count(), 1);

    remote.down.store(false, Ordering::SeqCst);
    assert!(service.counters().probe_remote().await);
    assert!(service.metrics_text().contains("fxql_counter_failovers 1"));
    assert_ok!(service.stop().await);
}

#[tokio::test]
async fn test_envelope_round_trip() {
    let (service, _) = started(config()).await;
    let envelope: RequestEnvelope = serde_json::from_str(
        r#"{"caller":"alpha","idempotencyKey":"env-1","FXQL":"USD-GBP { BUY 1 SELL 2 CAP 3 }"}"#,
    )
    .unwrap();

    let first = service.handle_envelope(envelope.clone()).await;
    let second = service.handle_envelope(envelope).await;

    assert_eq!(first.status, 200);
    assert!(second.replayed);
    let wire: serde_json::Value = serde_json::to_value(&second).unwrap();
    assert_eq!(wire["response"]["code"], "FXQL-200");
    assert_eq!(wire["response"]["data"][0]["sourceCurrency"], "USD");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_admitted_never_exceeds_ceiling(limit in 1u64..8, extra in 1usize..5) {
        tokio_test::block_on(async {
            let config = GatewayConfig {
                rate_limits: RateLimitConfig {
                    sustained: LimiterConfig::new("sustained", Duration::from_secs(60), limit),
                    burst: LimiterConfig::new("burst", Duration::from_secs(60), 1_000),
                },
                ..GatewayConfig::default()
            };
            let store = Arc::new(MemoryEntryStore::new());
            let service = FxqlService::new(config, store.clone());
            service.start().await.unwrap();

            let mut admitted = 0u64;
            for _ in 0..(limit as usize + extra) {
                let reply = service
                    .handle(FxqlRequest::new(EXAMPLE), RequestMetadata::new("alpha"))
                    .await;
                if reply.status == 200 {
                    admitted += 1;
                }
            }

            service.stop().await.unwrap();
            assert_eq!(admitted, limit);
            assert_eq!(store.batch_count(), limit);
        });
    }
}
