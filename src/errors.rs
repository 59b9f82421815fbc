// =============================================================================
// Error Taxonomy — typed failure kinds shared by every subsystem
// =============================================================================
//
// Each variant maps to one recovery policy:
//
//   InvalidInput / ConfigurationError  — surface to the caller, never recover
//   ProviderDegraded / Timeout         — recover locally (fallback, TTL x2)
//   IntegrityFailure                   — quarantine the source, then surface
//   AnomalyQuarantined                 — symbol parked until recovery streak
//   StaleData / NotFound               — caller decides
//
// HTTP handlers serialize errors as `{error, message, timestamp}`.
// =============================================================================

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

/// Sub-code attached to [`ScanError::ProviderDegraded`] describing which
/// provider-side limit tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    RateLimited,
    BudgetExceeded,
    CircuitOpen,
    Http5xx,
}

impl std::fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::Http5xx => write!(f, "http_5xx"),
        }
    }
}

/// The scanner-wide error type.
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    /// Schema, type, pattern, or range failure in caller-supplied data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Timestamp beyond the tier TTL plus clock-skew tolerance.
    #[error("stale data: {0}")]
    StaleData(String),

    /// Checksum or decompression failure; the source is quarantined.
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    /// A provider-side limit tripped; callers fall back to another venue.
    #[error("provider degraded ({reason}): {message}")]
    ProviderDegraded {
        reason: DegradedReason,
        message: String,
    },

    /// A deadline elapsed; the caller may retry with backoff.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Weight sums, threshold ranges, missing profiles. Fatal at startup.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// MAD / spike / corruption quarantine.
    #[error("anomaly quarantined: {0}")]
    AnomalyQuarantined(String),

    /// Snapshot, symbol, or regime missing.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ScanError {
    /// Stable machine-readable kind string used in HTTP bodies and metrics
    /// labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::StaleData(_) => "STALE_DATA",
            Self::IntegrityFailure(_) => "INTEGRITY_FAILURE",
            Self::ProviderDegraded { .. } => "PROVIDER_DEGRADED",
            Self::Timeout(_) => "TIMEOUT",
            Self::ConfigurationError(_) => "CONFIGURATION_ERROR",
            Self::AnomalyQuarantined(_) => "ANOMALY_QUARANTINED",
            Self::NotFound(_) => "NOT_FOUND",
        }
    }

    /// The degradation sub-code, when this is a provider degradation.
    pub fn subcode(&self) -> Option<DegradedReason> {
        match self {
            Self::ProviderDegraded { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Whether the scan pipeline may recover from this error locally
    /// (fallback venue, TTL doubling, retry with backoff).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProviderDegraded { .. } | Self::Timeout(_) | Self::StaleData(_)
        )
    }

    pub fn degraded(reason: DegradedReason, message: impl Into<String>) -> Self {
        Self::ProviderDegraded {
            reason,
            message: message.into(),
        }
    }
}

/// JSON body returned by HTTP handlers on failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorBody {
    pub fn from_error(err: &ScanError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
