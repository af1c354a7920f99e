//! FXQL Statement Engine
//!
//! Parses FXQL text into candidate statements and checks them against a
//! configurable rule set.
//!
//! # Example
//!
//! ```rust,ignore
//! use fxql_statement::{StatementEngine, ValidationRuleSet};
//!
//! let engine = StatementEngine::new(ValidationRuleSet::default());
//! let entries = engine.process("USD-GBP { BUY 0.85 SELL 0.90 CAP 10000 }")?;
//! assert_eq!(entries[0].pair(), "USD-GBP");
//! ```

pub mod currencies;
pub mod engine;
pub mod error;
pub mod parser;
pub mod rules;
pub mod validator;

pub use currencies::{CONSERVATIVE_CURRENCY_CODES, DEFAULT_CURRENCY_CODES};
pub use engine::StatementEngine;
pub use error::{RuleSetError, RuleSetResult};
pub use parser::{parse, Statement};
pub use rules::ValidationRuleSet;
pub use validator::Validator;
