//! Parse-then-validate entry point.

use fxql_common::{ParsedEntry, Result};
use tracing::{debug, instrument};

use crate::parser;
use crate::rules::ValidationRuleSet;
use crate::validator::Validator;

/// Turns request text into validated entries.
#[derive(Debug, Clone)]
pub struct StatementEngine {
    validator: Validator,
}

impl Default for StatementEngine {
    fn default() -> Self {
        Self::new(ValidationRuleSet::default())
    }
}

impl StatementEngine {
    /// Create an engine over the given rule set.
    pub fn new(rules: ValidationRuleSet) -> Self {
        Self {
            validator: Validator::new(rules),
        }
    }

    /// The rule set in force.
    pub fn rules(&self) -> &ValidationRuleSet {
        self.validator.rules()
    }

    /// Parse and validate every statement in `text`.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub fn process(&self, text: &str) -> Result<Vec<ParsedEntry>> {
        let statements = parser::parse(text)?;
        debug!(statements = statements.len(), "Parsed statements");

        let entries = self.validator.validate(&statements)?;
        debug!(entries = entries.len(), "Statements validated");
        Ok(entries)
    }
}
