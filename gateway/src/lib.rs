//! FXQL Gateway
//!
//! Accepts FXQL statement batches, admits them against per-caller rate
//! limits, replays idempotent retries and hands validated entries to
//! persistence.

pub mod admission;
pub mod audit;
pub mod config;
pub mod idempotency;
pub mod metrics;
pub mod pipeline;
pub mod rate_counter;
pub mod redis_counter;
pub mod service;
pub mod state;
pub mod stdio;

pub use config::GatewayConfig;
pub use rate_counter::{CounterError, CounterHit, CounterMode, RateCounterStore, RemoteCounter};
pub use service::FxqlService;
pub use state::ServiceState;
