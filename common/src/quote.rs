//! Quote types produced by the statement pipeline.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::EntryId;

/// ISO 4217 style three-letter currency code, as written in a statement.
///
/// Construction does not check membership in any configured code set; that
/// is a validation rule, not a property of the type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Create a currency code from its textual form.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Get the code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Whether the code has the `[A-Z]{3}` shape.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 3 && self.0.bytes().all(|b| b.is_ascii_uppercase())
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A validated currency-pair quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedEntry {
    /// Currency being quoted.
    pub source_currency: CurrencyCode,
    /// Currency the quote is priced in.
    pub destination_currency: CurrencyCode,
    /// Buy price.
    pub buy_price: Decimal,
    /// Sell price.
    pub sell_price: Decimal,
    /// Maximum transactable volume.
    pub cap_amount: u64,
}

impl ParsedEntry {
    /// Create a new entry.
    pub fn new(
        source_currency: CurrencyCode,
        destination_currency: CurrencyCode,
        buy_price: Decimal,
        sell_price: Decimal,
        cap_amount: u64,
    ) -> Self {
        Self {
            source_currency,
            destination_currency,
            buy_price,
            sell_price,
            cap_amount,
        }
    }

    /// The `SRC-DST` pair label.
    pub fn pair(&self) -> String {
        format!("{}-{}", self.source_currency, self.destination_currency)
    }
}

impl fmt::Display for ParsedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} BUY {} SELL {} CAP {}",
            self.pair(),
            self.buy_price,
            self.sell_price,
            self.cap_amount
        )
    }
}

/// An entry after the persistence delegate accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEntry {
    /// Persistence-assigned identifier.
    #[serde(rename = "EntryId")]
    pub entry_id: EntryId,
    /// The quote itself.
    #[serde(flatten)]
    pub entry: ParsedEntry,
    /// When the delegate stored the entry.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl PersistedEntry {
    /// Wrap an entry with a fresh id and timestamp.
    pub fn new(entry: ParsedEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            entry_id: EntryId::new(),
            entry,
            created_at,
        }
    }
}
