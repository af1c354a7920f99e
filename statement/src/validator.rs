//! Rule checks turning candidate statements into typed entries.

use fxql_common::{FxqlError, ParsedEntry, Result};
use rust_decimal::Decimal;

use crate::parser::Statement;
use crate::rules::ValidationRuleSet;

/// Applies a [`ValidationRuleSet`] to parsed statements.
#[derive(Debug, Clone)]
pub struct Validator {
    rules: ValidationRuleSet,
}

impl Validator {
    /// Create a validator over a fixed rule set.
    pub fn new(rules: ValidationRuleSet) -> Self {
        Self { rules }
    }

    /// The rule set in force.
    pub fn rules(&self) -> &ValidationRuleSet {
        &self.rules
    }

    /// Validate a whole batch.
    ///
    /// The first failing statement aborts the batch. The entry count is
    /// checked only once every statement has passed.
    pub fn validate(&self, statements: &[Statement<'_>]) -> Result<Vec<ParsedEntry>> {
        let entries = statements
            .iter()
            .map(|s| self.validate_statement(s))
            .collect::<Result<Vec<_>>>()?;

        let max = self.rules.max_entries_per_request;
        if entries.len() > max {
            return Err(FxqlError::ExceedsMaxEntries {
                count: entries.len(),
                max,
            });
        }

        Ok(entries)
    }

    /// Validate one statement: currencies, then prices, then cap.
    pub fn validate_statement(&self, statement: &Statement<'_>) -> Result<ParsedEntry> {
        self.check_currency("sourceCurrency", statement.source, statement)?;
        self.check_currency("destinationCurrency", statement.destination, statement)?;
        let buy = self.check_price("buyPrice", statement.buy, statement)?;
        let sell = self.check_price("sellPrice", statement.sell, statement)?;
        let cap = self.check_cap(statement)?;

        Ok(ParsedEntry::new(
            statement.source.into(),
            statement.destination.into(),
            buy,
            sell,
            cap,
        ))
    }

    fn check_currency(
        &self,
        field: &'static str,
        code: &str,
        statement: &Statement<'_>,
    ) -> Result<()> {
        if self.rules.is_currency_valid(code) {
            Ok(())
        } else {
            Err(FxqlError::InvalidCurrency {
                field,
                code: code.to_string(),
                location: statement.location(),
            })
        }
    }

    fn check_price(
        &self,
        field: &'static str,
        raw: &str,
        statement: &Statement<'_>,
    ) -> Result<Decimal> {
        // Digits beyond Decimal's precision are refused, not rounded.
        match Decimal::from_str_exact(raw) {
            Ok(price) if self.rules.is_price_valid(price) => Ok(price),
            _ => Err(FxqlError::InvalidPrice {
                field,
                value: raw.to_string(),
                min: self.rules.min_price,
                max: self.rules.max_price,
                location: statement.location(),
            }),
        }
    }

    fn check_cap(&self, statement: &Statement<'_>) -> Result<u64> {
        match statement.cap.parse::<u64>() {
            Ok(cap) if self.rules.is_cap_valid(cap) => Ok(cap),
            _ => Err(FxqlError::InvalidCap {
                value: statement.cap.to_string(),
                min: self.rules.min_cap,
                max: self.rules.max_cap,
                location: statement.location(),
            }),
        }
    }
}
