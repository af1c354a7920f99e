//! Gateway configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fxql_common::{constants, DurationExt};
use fxql_statement::{RuleSetError, ValidationRuleSet};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Default location of the validation rules document.
pub const DEFAULT_RULES_PATH: &str = "config/validation-rules.yaml";

/// Default remote counter address.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Rules file could not be read.
    #[error("Failed to read rules file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rules file is not valid YAML for the expected shape.
    #[error("Failed to parse rules file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Rules are internally inconsistent.
    #[error("Invalid validation rules: {0}")]
    Rules(#[from] RuleSetError),

    /// Some other setting is unusable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One named admission limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Name used in counter keys and rejections.
    pub name: String,
    /// Window the ceiling applies to.
    pub window: Duration,
    /// Requests admitted per window.
    pub limit: u64,
}

impl LimiterConfig {
    /// Create a limiter configuration.
    pub fn new(name: impl Into<String>, window: Duration, limit: u64) -> Self {
        Self {
            name: name.into(),
            window,
            limit,
        }
    }
}

/// Admission limits applied per caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Longer window, higher ceiling. Checked first.
    pub sustained: LimiterConfig,
    /// One-second window, low ceiling.
    pub burst: LimiterConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sustained: LimiterConfig::new("sustained", constants::sustained_window().as_std(), 10),
            burst: LimiterConfig::new("burst", constants::burst_window().as_std(), 5),
        }
    }
}

/// Remote rate counter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCounterConfig {
    /// Use the remote store at all.
    pub enabled: bool,
    /// Connection URL.
    pub url: String,
    /// Prefix for every counter key.
    pub key_prefix: String,
    /// Deadline for a single remote call.
    pub attempt_timeout: Duration,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Backoff added per retry.
    pub backoff_step: Duration,
    /// Upper bound on a single backoff.
    pub backoff_cap: Duration,
    /// How often to ping the remote while in fallback.
    pub probe_interval: Duration,
    /// Deadline for a reconnection probe.
    pub probe_timeout: Duration,
}

impl Default for RemoteCounterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: "throttle".to_string(),
            attempt_timeout: Duration::from_millis(100),
            max_retries: 2,
            backoff_step: Duration::from_millis(25),
            backoff_cap: Duration::from_millis(100),
            probe_interval: constants::remote_probe_interval().as_std(),
            probe_timeout: Duration::from_secs(1),
        }
    }
}

impl RemoteCounterConfig {
    /// Worst-case time spent on the remote before falling back.
    pub fn worst_case_delay(&self) -> Duration {
        let attempts = self.max_retries + 1;
        let backoff: Duration = (1..=self.max_retries)
            .map(|n| (self.backoff_step * n).min(self.backoff_cap))
            .sum();
        self.attempt_timeout * attempts + backoff
    }
}

/// Idempotency cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    /// How long a cached response stays replayable.
    pub retention: Duration,
    /// Interval between expired-record sweeps.
    pub cleanup_interval: Duration,
    /// Refuse a reused key carrying a different request body.
    pub enforce_request_hash: bool,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            retention: constants::idempotency_retention().as_std(),
            cleanup_interval: constants::idempotency_cleanup_interval().as_std(),
            enforce_request_hash: true,
        }
    }
}

/// Main gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Where the rules were loaded from.
    pub rules_path: PathBuf,
    /// Validation rules.
    pub rules: ValidationRuleSet,
    /// Admission limits.
    pub rate_limits: RateLimitConfig,
    /// Remote counter settings.
    pub remote_counter: RemoteCounterConfig,
    /// Interval between local counter sweeps.
    pub counter_sweep_interval: Duration,
    /// Idempotency settings.
    pub idempotency: IdempotencyConfig,
    /// Accepted API keys. Empty disables the check.
    pub api_keys: Vec<String>,
    /// Log level.
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from(DEFAULT_RULES_PATH),
            rules: ValidationRuleSet::default(),
            rate_limits: RateLimitConfig::default(),
            remote_counter: RemoteCounterConfig::default(),
            counter_sweep_interval: constants::local_counter_sweep_interval().as_std(),
            idempotency: IdempotencyConfig::default(),
            api_keys: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables and the rules file.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration using `lookup` in place of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("FXQL_RULES_PATH") {
            config.rules_path = PathBuf::from(path);
        }
        config.load_rules();

        if let Some(enabled) = lookup("REDIS_ENABLED") {
            config.remote_counter.enabled = enabled.trim() == "true";
        }

        if let Some(url) = lookup("REDIS_URL") {
            config.remote_counter.url = url;
        }

        if let Some(keys) = lookup("API_KEYS") {
            config.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(enforce) = lookup("IDEMPOTENCY_ENFORCE_HASH") {
            config.idempotency.enforce_request_hash = enforce.trim() != "false";
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Replace the rules from `rules_path`, falling back to the conservative
    /// set when the file is missing or unusable.
    pub fn load_rules(&mut self) {
        match RulesDocument::load(&self.rules_path) {
            Ok(document) => {
                info!(
                    path = %self.rules_path.display(),
                    version = %document.version,
                    "Loaded validation rules"
                );
                document.apply(self);
            }
            Err(e) => {
                warn!(
                    path = %self.rules_path.display(),
                    error = %e,
                    "Using conservative validation rules"
                );
                self.rules = ValidationRuleSet::conservative();
            }
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rules.validate()?;

        for limiter in [&self.rate_limits.sustained, &self.rate_limits.burst] {
            if limiter.limit == 0 {
                return Err(ConfigError::Invalid(format!(
                    "Limiter {} must admit at least one request",
                    limiter.name
                )));
            }
            if limiter.window.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "Limiter {} window cannot be zero",
                    limiter.name
                )));
            }
        }

        if self.rate_limits.sustained.name == self.rate_limits.burst.name {
            return Err(ConfigError::Invalid(
                "Limiter names must be distinct".to_string(),
            ));
        }

        if self.remote_counter.enabled && self.remote_counter.url.is_empty() {
            return Err(ConfigError::Invalid(
                "Remote counter URL cannot be empty".to_string(),
            ));
        }

        if self.idempotency.retention.is_zero() {
            return Err(ConfigError::Invalid(
                "Idempotency retention cannot be zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// On-disk shape of the validation rules document.
#[derive(Debug, Clone, Deserialize)]
pub struct RulesDocument {
    #[serde(default = "default_version")]
    pub version: String,
    pub currencies: CurrencySection,
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub rate_limits: Option<RateLimitSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencySection {
    pub valid_codes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusinessRules {
    pub max_currency_pairs_per_request: usize,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub min_cap_amount: u64,
    pub max_cap_amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    pub default_ttl_seconds: u64,
    pub default_limit: u64,
    #[serde(default)]
    pub burst_limit: Option<u64>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl RulesDocument {
    /// Read and check a rules document.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse and check a rules document.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let document: RulesDocument = serde_yaml::from_str(text)?;
        document.rule_set().validate()?;
        Ok(document)
    }

    /// The rule set this document describes.
    pub fn rule_set(&self) -> ValidationRuleSet {
        let rules = &self.business_rules;
        ValidationRuleSet::default()
            .with_version(self.version.clone())
            .with_currencies(self.currencies.valid_codes.iter().cloned())
            .with_price_bounds(rules.min_price, rules.max_price)
            .with_cap_bounds(rules.min_cap_amount, rules.max_cap_amount)
            .with_max_entries(rules.max_currency_pairs_per_request)
    }

    fn apply(&self, config: &mut GatewayConfig) {
        config.rules = self.rule_set();
        if let Some(limits) = &self.rate_limits {
            let sustained = &mut config.rate_limits.sustained;
            sustained.window = Duration::from_secs(limits.default_ttl_seconds);
            sustained.limit = limits.default_limit;
            if let Some(burst) = limits.burst_limit {
                config.rate_limits.burst.limit = burst;
            }
        }
    }
}
