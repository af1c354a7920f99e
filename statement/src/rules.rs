//! Configurable validation rules.

use std::collections::HashSet;

use rust_decimal::Decimal;

use crate::currencies::{CONSERVATIVE_CURRENCY_CODES, DEFAULT_CURRENCY_CODES};
use crate::error::{RuleSetError, RuleSetResult};

/// Business rules every statement in a request must satisfy.
///
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRuleSet {
    /// Version label of the rules document.
    pub version: String,
    valid_currency_codes: HashSet<String>,
    /// Lowest accepted buy or sell price.
    pub min_price: Decimal,
    /// Highest accepted buy or sell price.
    pub max_price: Decimal,
    /// Lowest accepted cap amount.
    pub min_cap: u64,
    /// Highest accepted cap amount.
    pub max_cap: u64,
    /// Most statements one request may carry.
    pub max_entries_per_request: usize,
}

impl Default for ValidationRuleSet {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            valid_currency_codes: DEFAULT_CURRENCY_CODES.iter().map(|c| c.to_string()).collect(),
            min_price: Decimal::ZERO,
            max_price: Decimal::from(999_999_999u64),
            min_cap: 0,
            max_cap: i32::MAX as u64,
            max_entries_per_request: 1000,
        }
    }
}

impl ValidationRuleSet {
    /// Rule set used when the configured one is missing or unusable.
    pub fn conservative() -> Self {
        Self::default().with_currencies(CONSERVATIVE_CURRENCY_CODES.iter().copied())
    }

    /// Replace the accepted currency codes.
    pub fn with_currencies<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_currency_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the inclusive price bounds.
    pub fn with_price_bounds(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_price = min;
        self.max_price = max;
        self
    }

    /// Set the inclusive cap bounds.
    pub fn with_cap_bounds(mut self, min: u64, max: u64) -> Self {
        self.min_cap = min;
        self.max_cap = max;
        self
    }

    /// Set the batch size ceiling.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries_per_request = max;
        self
    }

    /// Set the version label.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Check the rule set is internally consistent.
    pub fn validate(&self) -> RuleSetResult<()> {
        if self.valid_currency_codes.is_empty() {
            return Err(RuleSetError::EmptyCurrencySet);
        }

        if let Some(bad) = self
            .valid_currency_codes
            .iter()
            .find(|c| c.len() != 3 || !c.bytes().all(|b| b.is_ascii_uppercase()))
        {
            return Err(RuleSetError::MalformedCurrencyCode(bad.clone()));
        }

        if self.min_price.is_sign_negative() || self.min_price > self.max_price {
            return Err(RuleSetError::InvalidPriceBounds {
                min: self.min_price,
                max: self.max_price,
            });
        }

        if self.min_cap > self.max_cap {
            return Err(RuleSetError::InvalidCapBounds {
                min: self.min_cap,
                max: self.max_cap,
            });
        }

        if self.max_entries_per_request == 0 {
            return Err(RuleSetError::ZeroMaxEntries);
        }

        Ok(())
    }

    /// Exact, case-sensitive membership in the configured code set.
    pub fn is_currency_valid(&self, code: &str) -> bool {
        self.valid_currency_codes.contains(code)
    }

    /// Whether a price lies within the inclusive bounds.
    pub fn is_price_valid(&self, price: Decimal) -> bool {
        price >= self.min_price && price <= self.max_price
    }

    /// Whether a cap lies within the inclusive bounds.
    pub fn is_cap_valid(&self, cap: u64) -> bool {
        cap >= self.min_cap && cap <= self.max_cap
    }

    /// Number of accepted currency codes.
    pub fn currency_count(&self) -> usize {
        self.valid_currency_codes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_rules_are_valid() {
        let rules = ValidationRuleSet::default();
        assert!(rules.validate().is_ok());
        assert!(rules.currency_count() > 150);
        assert!(rules.is_currency_valid("NGN"));
        assert!(!rules.is_currency_valid("XXX"));
        assert!(!rules.is_currency_valid("usd"));
    }

    #[test]
    fn test_conservative_rules() {
        let rules = ValidationRuleSet::conservative();
        assert!(rules.validate().is_ok());
        assert_eq!(rules.currency_count(), 5);
        assert!(!rules.is_currency_valid("CHF"));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let rules = ValidationRuleSet::default().with_price_bounds(dec!(0.5), dec!(2.0));
        assert!(rules.is_price_valid(dec!(0.5)));
        assert!(rules.is_price_valid(dec!(2.0)));
        assert!(!rules.is_price_valid(dec!(2.00001)));
        assert!(rules.is_cap_valid(0));
        assert!(rules.is_cap_valid(2_147_483_647));
        assert!(!rules.is_cap_valid(2_147_483_648));
    }

    #[test]
    fn test_inconsistent_rules_rejected() {
        let inverted = ValidationRuleSet::default().with_price_bounds(dec!(5), dec!(1));
        assert!(matches!(
            inverted.validate(),
            Err(RuleSetError::InvalidPriceBounds { .. })
        ));

        let empty = ValidationRuleSet::default().with_currencies(Vec::<String>::new());
        assert_eq!(empty.validate(), Err(RuleSetError::EmptyCurrencySet));

        let lower = ValidationRuleSet::default().with_currencies(["usd"]);
        assert_eq!(
            lower.validate(),
            Err(RuleSetError::MalformedCurrencyCode("usd".to_string()))
        );

        let zero = ValidationRuleSet::default().with_max_entries(0);
        assert_eq!(zero.validate(), Err(RuleSetError::ZeroMaxEntries));
    }
}
