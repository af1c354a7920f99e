//! Time utilities and constants for the FXQL gateway.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Gateway timing constants.
pub mod constants {
    use super::Duration;

    /// How long an idempotent response stays replayable (24 hours).
    pub fn idempotency_retention() -> Duration {
        Duration::hours(24)
    }

    /// Interval between idempotency record sweeps (1 hour).
    pub fn idempotency_cleanup_interval() -> Duration {
        Duration::hours(1)
    }

    /// Interval between local rate counter sweeps (60 seconds).
    pub fn local_counter_sweep_interval() -> Duration {
        Duration::seconds(60)
    }

    /// Default sustained admission window (60 seconds).
    pub fn sustained_window() -> Duration {
        Duration::seconds(60)
    }

    /// Burst admission window (1 second).
    pub fn burst_window() -> Duration {
        Duration::seconds(1)
    }

    /// Interval between remote counter reconnection probes (5 seconds).
    pub fn remote_probe_interval() -> Duration {
        Duration::seconds(5)
    }
}

/// A timestamp, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Render a timestamp the way response envelopes carry it
/// (ISO-8601, millisecond precision, `Z` suffix).
pub fn iso8601(timestamp: Timestamp) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Duration extensions for convenient conversion.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}
