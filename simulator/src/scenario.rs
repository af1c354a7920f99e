//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Submit fixed statement text.
    Submit {
        client: String,
        fxql: String,
        idempotency_key: Option<String>,
    },
    /// Submit generated statements.
    SubmitGenerated { client: String, statements: usize },
    /// Submit the same keyed request concurrently.
    DuplicateBurst {
        client: String,
        idempotency_key: String,
        copies: usize,
    },
    /// Submit unkeyed requests back to back.
    Flood { client: String, requests: usize },
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// The client's last reply had this status.
    LastStatus { client: String, status: u16 },
    /// The client's last reply had this response code.
    LastCode { client: String, code: String },
    /// The store holds this many entries.
    EntriesPersisted { count: usize },
    /// The store accepted this many batches.
    BatchesPersisted { count: u64 },
}

impl Scenario {
    /// Names accepted by [`Scenario::load`].
    pub const NAMES: &'static [&'static str] = &[
        "single-statement",
        "invalid-currency",
        "batch-limit",
        "duplicate-burst",
        "rate-limit",
        "mixed",
    ];

    /// Load a built-in scenario by name, or a scenario file ending in `.json`.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        if name.ends_with(".json") {
            let text = std::fs::read_to_string(name)?;
            return Self::from_json(&text);
        }

        match name {
            "single-statement" => Ok(Self::single_statement()),
            "invalid-currency" => Ok(Self::invalid_currency()),
            "batch-limit" => Ok(Self::batch_limit()),
            "duplicate-burst" => Ok(Self::duplicate_burst()),
            "rate-limit" => Ok(Self::rate_limit()),
            "mixed" => Ok(Self::mixed()),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (expected one of {})",
                name,
                Self::NAMES.join(", ")
            )),
        }
    }

    /// Parse a scenario from JSON.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// One well-formed statement, accepted and persisted.
    fn single_statement() -> Self {
        Self {
            name: "single-statement".to_string(),
            description: "One USD-GBP quote accepted end to end".to_string(),
            steps: vec![
                ScenarioStep::Submit {
                    client: "CLIENT_A".to_string(),
                    fxql: "USD-GBP {\n BUY 100\n SELL 200\n CAP 93800\n}".to_string(),
                    idempotency_key: None,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::LastStatus {
                        client: "CLIENT_A".to_string(),
                        status: 200,
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::EntriesPersisted { count: 1 },
                },
            ],
        }
    }

    /// An unsupported currency rejects the request and persists nothing.
    fn invalid_currency() -> Self {
        Self {
            name: "invalid-currency".to_string(),
            description: "Unsupported currency code rejected".to_string(),
            steps: vec![
                ScenarioStep::Submit {
                    client: "CLIENT_A".to_string(),
                    fxql: "USD-GBP { BUY 1 SELL 1 CAP 1 }\n\nUSD-QQQ { BUY 1 SELL 1 CAP 1 }"
                        .to_string(),
                    idempotency_key: None,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::LastCode {
                        client: "CLIENT_A".to_string(),
                        code: "FXQL_E_BAD_ISO".to_string(),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::EntriesPersisted { count: 0 },
                },
            ],
        }
    }

    /// A batch over the statement limit is rejected whole.
    fn batch_limit() -> Self {
        Self {
            name: "batch-limit".to_string(),
            description: "Oversized batch rejected without persisting".to_string(),
            steps: vec![
                ScenarioStep::SubmitGenerated {
                    client: "CLIENT_A".to_string(),
                    statements: 1001,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::LastCode {
                        client: "CLIENT_A".to_string(),
                        code: "FXQL_E_EXCEEDS_MAX_PAIRS".to_string(),
                    },
                },
                ScenarioStep::SubmitGenerated {
                    client: "CLIENT_B".to_string(),
                    statements: 1000,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::EntriesPersisted { count: 1000 },
                },
            ],
        }
    }

    /// Concurrent retries of one keyed request persist once.
    fn duplicate_burst() -> Self {
        Self {
            name: "duplicate-burst".to_string(),
            description: "Concurrent duplicates of one idempotency key".to_string(),
            steps: vec![
                ScenarioStep::DuplicateBurst {
                    client: "CLIENT_A".to_string(),
                    idempotency_key: "order-0001".to_string(),
                    copies: 5,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::LastStatus {
                        client: "CLIENT_A".to_string(),
                        status: 200,
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BatchesPersisted { count: 1 },
                },
            ],
        }
    }

    /// A client over its burst ceiling is refused, then admitted again.
    fn rate_limit() -> Self {
        Self {
            name: "rate-limit".to_string(),
            description: "Burst ceiling refusal and window reset".to_string(),
            steps: vec![
                ScenarioStep::Flood {
                    client: "CLIENT_A".to_string(),
                    requests: 6,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::LastStatus {
                        client: "CLIENT_A".to_string(),
                        status: 429,
                    },
                },
                ScenarioStep::Wait { millis: 1100 },
                ScenarioStep::SubmitGenerated {
                    client: "CLIENT_A".to_string(),
                    statements: 1,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::LastStatus {
                        client: "CLIENT_A".to_string(),
                        status: 200,
                    },
                },
            ],
        }
    }

    /// Several clients with accepted, rejected and replayed traffic.
    fn mixed() -> Self {
        Self {
            name: "mixed".to_string(),
            description: "Accepted, rejected and replayed requests across clients".to_string(),
            steps: vec![
                ScenarioStep::SubmitGenerated {
                    client: "CLIENT_A".to_string(),
                    statements: 3,
                },
                ScenarioStep::Submit {
                    client: "CLIENT_B".to_string(),
                    fxql: "USD-GBP { BUY 0.85 SELL 0.90 CAP 10000 }".to_string(),
                    idempotency_key: Some("mixed-1".to_string()),
                },
                ScenarioStep::Submit {
                    client: "CLIENT_B".to_string(),
                    fxql: "USD-GBP { BUY 0.85 SELL 0.90 CAP 10000 }".to_string(),
                    idempotency_key: Some("mixed-1".to_string()),
                },
                ScenarioStep::Submit {
                    client: "CLIENT_C".to_string(),
                    fxql: "USD-GBP { BUY 0.85 SELL 0.90 }".to_string(),
                    idempotency_key: None,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::LastCode {
                        client: "CLIENT_C".to_string(),
                        code: "FXQL_E_MALFORMED_SYNTAX".to_string(),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::EntriesPersisted { count: 4 },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BatchesPersisted { count: 2 },
                },
            ],
        }
    }
}
