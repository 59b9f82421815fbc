// =============================================================================
// Shared types — ingested data envelopes and tier labels
// =============================================================================
//
// An Envelope is the unit of ingested market data: one validated point-in-time
// record for a (venue, symbol) pair. Envelopes are owned by the facade fetch
// that produced them and copied into the cache; the `series_source` tag
// travels with the envelope so downstream consumers can distinguish
// exchange-native from aggregator-backed data.
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{ScanError, ScanResult};

/// Default tolerated clock skew between producer and scanner, in seconds.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 3;

/// Symbol pattern enforced at ingress and on the explain route.
pub const SYMBOL_PATTERN: &str = r"^[A-Z]{2,5}-[A-Z]{3,4}$";

// =============================================================================
// Source tier
// =============================================================================

/// Which latency tier produced a record. Hot data is streamed or
/// near-realtime, warm is periodic REST, cold is historical backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    Hot,
    Warm,
    Cold,
}

impl std::fmt::Display for SourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hot => write!(f, "hot"),
            Self::Warm => write!(f, "warm"),
            Self::Cold => write!(f, "cold"),
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Top-of-book summary carried by envelopes that include depth data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSummary {
    /// Bid/ask spread in basis points.
    pub spread_bps: f64,
    /// USD depth within ±2 % of mid.
    pub depth_usd_2pc: f64,
    /// Volume-adjusted depth ratio.
    pub vadr: f64,
}

/// A validated point-in-time data record for one (venue, symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub symbol: String,
    pub venue: String,
    pub source_tier: SourceTier,
    pub timestamp: DateTime<Utc>,

    /// Monotone per-(venue, symbol) sequence. Required semantics only for
    /// hot-tier data; warm/cold envelopes may omit it.
    #[serde(default)]
    pub sequence: Option<u64>,

    /// Price fields by name (e.g. "last", "mid", "close_1h").
    pub prices: BTreeMap<String, f64>,

    /// Volume fields by name (e.g. "vol_24h", "vol_1h").
    pub volumes: BTreeMap<String, f64>,

    #[serde(default)]
    pub order_book: Option<OrderBookSummary>,

    /// `exchange_native_<venue>` or `aggregator_fallback_<venue>`.
    pub series_source: String,

    /// sha256 hex over the canonical price/volume content.
    pub signature_hash: String,
}

impl Envelope {
    /// Build an envelope, computing its signature hash from the price and
    /// volume maps.
    pub fn new(
        symbol: impl Into<String>,
        venue: impl Into<String>,
        source_tier: SourceTier,
        timestamp: DateTime<Utc>,
        prices: BTreeMap<String, f64>,
        volumes: BTreeMap<String, f64>,
    ) -> Self {
        let venue = venue.into();
        let signature_hash = compute_signature(&prices, &volumes);
        Self {
            symbol: symbol.into(),
            series_source: format!("exchange_native_{venue}"),
            venue,
            source_tier,
            timestamp,
            sequence: None,
            prices,
            volumes,
            order_book: None,
            signature_hash,
        }
    }

    /// Recompute the signature and compare it to the stored one.
    pub fn signature_intact(&self) -> bool {
        compute_signature(&self.prices, &self.volumes) == self.signature_hash
    }

    /// Convenience accessor for the primary price field.
    pub fn last_price(&self) -> Option<f64> {
        self.prices.get("last").copied()
    }
}

/// sha256 hex over the canonical JSON of the price and volume maps. BTreeMap
/// keeps key order deterministic so equal content always hashes equally.
pub fn compute_signature(prices: &BTreeMap<String, f64>, volumes: &BTreeMap<String, f64>) -> String {
    let canonical = serde_json::json!({ "prices": prices, "volumes": volumes });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

// =============================================================================
// Ingress timestamp parsing
// =============================================================================

/// Parse an ingress timestamp string. Accepts RFC3339 and RFC3339Nano;
/// rejects bare Unix integers (those are a silent source of ms-vs-s bugs and
/// are refused at the boundary).
pub fn parse_ingress_timestamp(raw: &str) -> ScanResult<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScanError::InvalidInput("empty timestamp".into()));
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(ScanError::InvalidInput(format!(
            "unix integer timestamps are not accepted at ingress: '{trimmed}'"
        )));
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ScanError::InvalidInput(format!("unparseable timestamp '{trimmed}': {e}")))
}

// =============================================================================
// Envelope validator
// =============================================================================

/// Structural validator applied before an envelope may enter the cache.
/// Sequence monotonicity for hot data is enforced separately by the scan
/// pipeline, which owns the per-(venue, symbol) sequence watermarks.
pub struct EnvelopeValidator {
    symbol_pattern: Regex,
    venue_whitelist: Vec<String>,
    clock_skew_secs: i64,
}

impl EnvelopeValidator {
    pub fn new(venue_whitelist: Vec<String>, clock_skew_secs: i64) -> Self {
        Self {
            symbol_pattern: Regex::new(SYMBOL_PATTERN).expect("symbol pattern is valid"),
            venue_whitelist,
            clock_skew_secs,
        }
    }

    /// Validate the envelope invariants: non-zero timestamp no further than
    /// the skew tolerance into the future, symbol matching the configured
    /// pattern, and a whitelisted venue.
    pub fn validate(&self, envelope: &Envelope, now: DateTime<Utc>) -> ScanResult<()> {
        if envelope.timestamp.timestamp() == 0 {
            return Err(ScanError::InvalidInput(format!(
                "{}: zero timestamp",
                envelope.symbol
            )));
        }
        let horizon = now + chrono::Duration::seconds(self.clock_skew_secs);
        if envelope.timestamp > horizon {
            return Err(ScanError::InvalidInput(format!(
                "{}: timestamp {} is beyond now + {}s skew",
                envelope.symbol, envelope.timestamp, self.clock_skew_secs
            )));
        }
        if !self.symbol_pattern.is_match(&envelope.symbol) {
            return Err(ScanError::InvalidInput(format!(
                "symbol '{}' does not match {}",
                envelope.symbol, SYMBOL_PATTERN
            )));
        }
        if !self.venue_whitelist.iter().any(|v| v == &envelope.venue) {
            return Err(ScanError::InvalidInput(format!(
                "venue '{}' is not whitelisted",
                envelope.venue
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope(ts: DateTime<Utc>) -> Envelope {
        let mut prices = BTreeMap::new();
        prices.insert("last".to_string(), 43_250.5);
        let mut volumes = BTreeMap::new();
        volumes.insert("vol_24h".to_string(), 1_200_000.0);
        Envelope::new("BTC-USD", "kraken", SourceTier::Hot, ts, prices, volumes)
    }

    fn validator() -> EnvelopeValidator {
        EnvelopeValidator::new(
            vec!["kraken".into(), "binance".into(), "okx".into()],
            DEFAULT_CLOCK_SKEW_SECS,
        )
    }

    #[test]
    fn valid_envelope_passes() {
        let now = Utc::now();
        let env = sample_envelope(now);
        assert!(validator().validate(&env, now).is_ok());
    }

    #[test]
    fn zero_timestamp_rejected() {
        let env = sample_envelope(DateTime::from_timestamp(0, 0).unwrap());
        let err = validator().validate(&env, Utc::now()).unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }

    #[test]
    fn future_timestamp_beyond_skew_rejected() {
        let now = Utc::now();
        let env = sample_envelope(now + chrono::Duration::seconds(10));
        assert!(validator().validate(&env, now).is_err());

        // Inside the skew window is fine.
        let env = sample_envelope(now + chrono::Duration::seconds(2));
        assert!(validator().validate(&env, now).is_ok());
    }

    #[test]
    fn malformed_symbol_rejected() {
        let now = Utc::now();
        let mut env = sample_envelope(now);
        env.symbol = "btcusd".to_string();
        assert!(validator().validate(&env, now).is_err());

        env.symbol = "BTC-USDTX".to_string();
        assert!(validator().validate(&env, now).is_err());

        env.symbol = "SOL-USDT".to_string();
        assert!(validator().validate(&env, now).is_ok());
    }

    #[test]
    fn unlisted_venue_rejected() {
        let now = Utc::now();
        let mut env = sample_envelope(now);
        env.venue = "shadyexchange".to_string();
        assert!(validator().validate(&env, now).is_err());
    }

    #[test]
    fn signature_detects_tampering() {
        let env = sample_envelope(Utc::now());
        assert!(env.signature_intact());

        let mut tampered = env.clone();
        tampered.prices.insert("last".to_string(), 1.0);
        assert!(!tampered.signature_intact());
    }

    #[test]
    fn equal_content_hashes_equally() {
        let a = sample_envelope(Utc::now());
        let b = sample_envelope(Utc::now());
        assert_eq!(a.signature_hash, b.signature_hash);
    }

    #[test]
    fn rfc3339_timestamps_accepted() {
        assert!(parse_ingress_timestamp("2025-06-01T12:00:00Z").is_ok());
        assert!(parse_ingress_timestamp("2025-06-01T12:00:00.123456789Z").is_ok());
        assert!(parse_ingress_timestamp("2025-06-01T12:00:00+02:00").is_ok());
    }

    #[test]
    fn unix_integers_rejected_at_ingress() {
        let err = parse_ingress_timestamp("1717243200").unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
        assert!(parse_ingress_timestamp("").is_err());
        assert!(parse_ingress_timestamp("not-a-time").is_err());
    }

    #[test]
    fn series_source_defaults_to_exchange_native() {
        let env = sample_envelope(Utc::now());
        assert_eq!(env.series_source, "exchange_native_kraken");
    }
}
