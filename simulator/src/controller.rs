//! Simulation controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use fxql_common::{IdempotencyKey, RequestId};
use fxql_gateway::{FxqlService, GatewayConfig};
use fxql_protocol::{FxqlRequest, Reply, RequestMetadata};
use fxql_store::MemoryEntryStore;

use crate::client::{ClientFactory, SimulatedClient, StatementGenerator};
use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, Scenario, ScenarioStep};

/// Controls the simulation.
pub struct SimulationController {
    /// Number of clients.
    client_count: usize,
    /// Simulation speed multiplier.
    speed: f64,
    /// Random number generator.
    rng: Arc<Mutex<StdRng>>,
    /// Simulated clients.
    clients: Arc<RwLock<Vec<Arc<SimulatedClient>>>>,
    /// Gateway under test.
    service: Arc<FxqlService>,
    /// Where accepted entries land.
    store: Arc<MemoryEntryStore>,
    /// Last reply per client.
    last_replies: Arc<RwLock<HashMap<String, Reply>>>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
    /// Running flag.
    running: Arc<RwLock<bool>>,
}

impl SimulationController {
    /// Create a new simulation controller around an in-process gateway.
    pub fn new(config: GatewayConfig, client_count: usize, speed: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let store = Arc::new(MemoryEntryStore::new());

        Self {
            client_count,
            speed,
            rng: Arc::new(Mutex::new(rng)),
            clients: Arc::new(RwLock::new(Vec::new())),
            service: Arc::new(FxqlService::new(config, store.clone())),
            store,
            last_replies: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Initialize the simulation.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        info!("Initializing simulation with {} clients", self.client_count);

        let clients = ClientFactory::create_clients(self.client_count);
        for client in &clients {
            info!("Registered client {} ({})", client.id, client.name);
        }
        *self.clients.write().await = clients.into_iter().map(Arc::new).collect();

        self.service.start().await?;
        Ok(())
    }

    /// Run a scenario. Fails on the first unmet assertion.
    pub async fn run_scenario(&self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        *self.running.write().await = true;

        let result = async {
            for step in &scenario.steps {
                if !*self.running.read().await {
                    break;
                }
                self.execute_step(step).await?;
            }
            Ok::<_, anyhow::Error>(())
        }
        .await;

        *self.running.write().await = false;
        result
    }

    /// Run in continuous mode.
    pub async fn run(&self, duration: Option<Duration>) -> anyhow::Result<()> {
        info!("Running simulation in continuous mode");

        *self.running.write().await = true;

        let clients = self.clients.clone();
        let service = self.service.clone();
        let metrics = self.metrics.clone();
        let last_replies = self.last_replies.clone();
        let rng = self.rng.clone();
        let running = self.running.clone();
        let speed = self.speed;

        let handle = tokio::spawn(async move {
            loop {
                if !*running.read().await {
                    break;
                }

                let client = {
                    let clients = clients.read().await;
                    if clients.is_empty() {
                        drop(clients);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                    let idx = rng.lock().await.gen_range(0..clients.len());
                    clients[idx].clone()
                };

                let (fxql, keyed) = {
                    let mut rng = rng.lock().await;
                    let statements = rng.gen_range(1..=5);
                    (StatementGenerator::batch(&mut *rng, statements), rng.gen_bool(0.5))
                };

                let sequence = client.next_sequence();
                let mut metadata =
                    RequestMetadata::new(client.id.clone()).with_request_id(RequestId::generate());
                if keyed {
                    metadata = metadata.with_idempotency_key(IdempotencyKey::new(client.idempotency_key(sequence)));
                }

                let started = Instant::now();
                let reply = service.handle(FxqlRequest::new(fxql), metadata).await;
                let latency = elapsed_ms(started);

                info!(
                    "{} request {} -> {} {}",
                    client.id, sequence, reply.status, reply.response.code
                );
                metrics.write().await.record(&reply, latency);
                last_replies.write().await.insert(client.id.to_string(), reply);

                let delay = Duration::from_millis((1000.0 / speed) as u64);
                tokio::time::sleep(delay).await;
            }
        });

        match duration {
            Some(d) => {
                tokio::time::sleep(d).await;
            }
            None => {
                tokio::signal::ctrl_c().await?;
            }
        }

        *self.running.write().await = false;
        handle.await?;

        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                let adjusted = (*millis as f64 / self.speed) as u64;
                info!("Waiting {}ms (adjusted: {}ms)", millis, adjusted);
                tokio::time::sleep(Duration::from_millis(adjusted)).await;
            }
            ScenarioStep::Submit {
                client,
                fxql,
                idempotency_key,
            } => {
                let client = self.client(client).await?;
                self.submit(&client, fxql.clone(), idempotency_key.clone()).await;
            }
            ScenarioStep::SubmitGenerated { client, statements } => {
                let client = self.client(client).await?;
                let fxql = StatementGenerator::batch(&mut *self.rng.lock().await, *statements);
                self.submit(&client, fxql, None).await;
            }
            ScenarioStep::DuplicateBurst {
                client,
                idempotency_key,
                copies,
            } => {
                let client = self.client(client).await?;
                let fxql = StatementGenerator::batch(&mut *self.rng.lock().await, 2);
                info!("Sending {} concurrent copies of {}", copies, idempotency_key);

                let submissions = (0..*copies).map(|_| {
                    self.submit(&client, fxql.clone(), Some(idempotency_key.clone()))
                });
                let replies = futures::future::join_all(submissions).await;

                let replayed = replies.iter().filter(|r| r.replayed).count();
                info!("{} of {} copies replayed", replayed, copies);
            }
            ScenarioStep::Flood { client, requests } => {
                let client = self.client(client).await?;
                for _ in 0..*requests {
                    let fxql = StatementGenerator::statement(&mut *self.rng.lock().await);
                    self.submit(&client, fxql, None).await;
                }
            }
            ScenarioStep::Assert { condition } => {
                info!("Asserting condition: {:?}", condition);
                self.check(condition).await?;
            }
        }

        Ok(())
    }

    async fn client(&self, id: &str) -> anyhow::Result<Arc<SimulatedClient>> {
        self.clients
            .read()
            .await
            .iter()
            .find(|c| c.id.as_str() == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Client not found: {}", id))
    }

    async fn submit(
        &self,
        client: &SimulatedClient,
        fxql: String,
        idempotency_key: Option<String>,
    ) -> Reply {
        let sequence = client.next_sequence();
        let mut metadata =
            RequestMetadata::new(client.id.clone()).with_request_id(RequestId::generate());
        if let Some(key) = idempotency_key {
            metadata = metadata.with_idempotency_key(IdempotencyKey::new(key));
        }

        let started = Instant::now();
        let reply = self.service.handle(FxqlRequest::new(fxql), metadata).await;
        let latency = elapsed_ms(started);

        info!(
            "{} request {} -> {} {}{}",
            client.id,
            sequence,
            reply.status,
            reply.response.code,
            if reply.replayed { " (replayed)" } else { "" }
        );

        self.metrics.write().await.record(&reply, latency);
        self.last_replies
            .write()
            .await
            .insert(client.id.to_string(), reply.clone());
        reply
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        let failure = match condition {
            AssertCondition::LastStatus { client, status } => {
                let replies = self.last_replies.read().await;
                match replies.get(client) {
                    Some(reply) if reply.status == *status => None,
                    Some(reply) => Some(format!("{} last status {} != {}", client, reply.status, status)),
                    None => Some(format!("{} has no replies", client)),
                }
            }
            AssertCondition::LastCode { client, code } => {
                let replies = self.last_replies.read().await;
                match replies.get(client) {
                    Some(reply) if reply.response.code == *code => None,
                    Some(reply) => Some(format!(
                        "{} last code {} != {}",
                        client, reply.response.code, code
                    )),
                    None => Some(format!("{} has no replies", client)),
                }
            }
            AssertCondition::EntriesPersisted { count } => {
                let stored = self.store.len();
                (stored != *count).then(|| format!("{} entries persisted, expected {}", stored, count))
            }
            AssertCondition::BatchesPersisted { count } => {
                let stored = self.store.batch_count();
                (stored != *count).then(|| format!("{} batches persisted, expected {}", stored, count))
            }
        };

        match failure {
            Some(message) => {
                warn!("Assertion failed: {}", message);
                Err(anyhow::anyhow!("Assertion failed: {}", message))
            }
            None => Ok(()),
        }
    }

    /// Get simulation metrics.
    pub async fn get_metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }

    /// Gateway metrics in Prometheus text format.
    pub fn gateway_metrics(&self) -> String {
        self.service.metrics_text()
    }

    /// Stop the simulation and the gateway.
    pub async fn stop(&self) -> anyhow::Result<()> {
        *self.running.write().await = false;
        for client in self.clients.read().await.iter() {
            info!("Client {} sent {} requests", client.id, client.sent_count());
        }
        self.service.stop().await?;
        Ok(())
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn controller() -> SimulationController {
        let mut controller = SimulationController::new(GatewayConfig::default(), 3, 1.0, Some(42));
        controller.initialize().await.unwrap();
        controller
    }

    #[tokio::test]
    async fn test_scenarios_pass() {
        for name in ["single-statement", "invalid-currency", "batch-limit", "duplicate-burst", "mixed"] {
            let controller = controller().await;
            controller.run_scenario(Scenario::load(name).unwrap()).await.unwrap();
            controller.stop().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failed_assertion_reported() {
        let controller = controller().await;
        let scenario = Scenario {
            name: "wrong".to_string(),
            description: "expects an entry that never arrives".to_string(),
            steps: vec![ScenarioStep::Assert {
                condition: AssertCondition::EntriesPersisted { count: 1 },
            }],
        };

        assert!(controller.run_scenario(scenario).await.is_err());
    }

    #[tokio::test]
    async fn test_continuous_mode_records_requests() {
        let mut controller = SimulationController::new(GatewayConfig::default(), 2, 50.0, Some(1));
        controller.initialize().await.unwrap();

        controller.run(Some(Duration::from_millis(200))).await.unwrap();

        let metrics = controller.get_metrics().await;
        assert!(metrics.total_requests > 0);
        assert_eq!(
            metrics.total_requests,
            metrics.successful_requests + metrics.rate_limited_requests + metrics.rejected_requests
        );
    }
}
