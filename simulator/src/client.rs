//! Simulated API clients and statement generation.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use rust_decimal::Decimal;

use fxql_common::CallerId;

/// Codes every rule set accepts, including the conservative fallback.
const CURRENCIES: &[&str] = &["USD", "EUR", "GBP", "JPY", "NGN"];

/// A simulated caller of the gateway.
pub struct SimulatedClient {
    /// Caller identity.
    pub id: CallerId,
    /// Display name.
    pub name: String,
    /// Requests sent so far.
    sent: AtomicU64,
}

impl SimulatedClient {
    /// Create a new simulated client.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: CallerId::new(id),
            name: name.into(),
            sent: AtomicU64::new(0),
        }
    }

    /// Count one request and return its sequence number.
    pub fn next_sequence(&self) -> u64 {
        self.sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Requests sent so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Idempotency key for the given sequence number.
    pub fn idempotency_key(&self, sequence: u64) -> String {
        format!("{}-{}", self.id, sequence)
    }
}

/// Client factory for creating test callers.
pub struct ClientFactory;

impl ClientFactory {
    /// Create N simulated clients.
    pub fn create_clients(count: usize) -> Vec<SimulatedClient> {
        let client_names = [
            ("CLIENT_A", "Alpha Exchange"),
            ("CLIENT_B", "Bureau de Change"),
            ("CLIENT_C", "Corridor Payments"),
            ("CLIENT_D", "Delta Remit"),
            ("CLIENT_E", "Eastern FX"),
        ];

        (0..count)
            .map(|i| match client_names.get(i) {
                Some((id, name)) => SimulatedClient::new(*id, *name),
                None => SimulatedClient::new(format!("CLIENT_{}", i + 1), format!("Client {}", i + 1)),
            })
            .collect()
    }
}

/// Produces well-formed FXQL statement text.
pub struct StatementGenerator;

impl StatementGenerator {
    /// One random statement.
    pub fn statement<R: Rng>(rng: &mut R) -> String {
        let source = rng.gen_range(0..CURRENCIES.len());
        let mut destination = rng.gen_range(0..CURRENCIES.len());
        while destination == source {
            destination = rng.gen_range(0..CURRENCIES.len());
        }

        let buy = Decimal::new(rng.gen_range(1..10_000_000), 4);
        let sell = buy + Decimal::new(rng.gen_range(0..50_000), 4);
        let cap: u64 = rng.gen_range(0..5_000_000);

        format!(
            "{}-{} {{\n BUY {}\n SELL {}\n CAP {}\n}}",
            CURRENCIES[source], CURRENCIES[destination], buy, sell, cap
        )
    }

    /// `count` random statements separated by blank lines.
    pub fn batch<R: Rng>(rng: &mut R, count: usize) -> String {
        (0..count)
            .map(|_| Self::statement(rng))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
