// =============================================================================
// Data-quality validator — MAD anomaly detection with quarantine bookkeeping
// =============================================================================
//
// Before any envelope enters the cache it passes eight checks: schema, type,
// pattern, range, freshness, integrity, partitioning, anomaly. Corruption
// (NaN, ±inf, negative price/volume, zero price) quarantines immediately.
// Other blocking failures count toward a consecutive-failure quarantine
// (default 3); a quarantined symbol recovers after a consecutive-success
// streak (default 2).
//
// Anomaly detection is rolling Median Absolute Deviation on price plus a
// volume spike detector (volume above N× the rolling median).
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{ScanError, ScanResult};
use crate::types::{Envelope, SourceTier, SYMBOL_PATTERN};

// =============================================================================
// Config
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityConfig {
    pub mad_window: usize,
    pub mad_threshold: f64,
    pub spike_multiplier: f64,
    pub quarantine_threshold: u32,
    pub recovery_threshold: u32,
    /// Sub-score weights for the 0–100 quality score.
    pub weight_freshness: f64,
    pub weight_completeness: f64,
    pub weight_consistency: f64,
    pub weight_anomaly_free: f64,
    /// Freshness horizon per tier, seconds.
    pub hot_ttl_secs: i64,
    pub warm_ttl_secs: i64,
    pub cold_ttl_secs: i64,
    pub clock_skew_secs: i64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            mad_window: 20,
            mad_threshold: 3.0,
            spike_multiplier: 3.0,
            quarantine_threshold: 3,
            recovery_threshold: 2,
            weight_freshness: 0.30,
            weight_completeness: 0.25,
            weight_consistency: 0.25,
            weight_anomaly_free: 0.20,
            hot_ttl_secs: 30,
            warm_ttl_secs: 300,
            cold_ttl_secs: 3600,
            clock_skew_secs: 3,
        }
    }
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub symbol: String,
    pub checks: Vec<QualityCheck>,
    /// Weighted 0–100 score over the sub-dimensions.
    pub quality_score: f64,
    /// Whether the envelope may enter the cache.
    pub accepted: bool,
}

impl QualityReport {
    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect()
    }
}

// =============================================================================
// Validator
// =============================================================================

#[derive(Debug, Default)]
struct SymbolHistory {
    prices: VecDeque<f64>,
    volumes: VecDeque<f64>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    quarantined: bool,
}

pub struct QualityValidator {
    cfg: QualityConfig,
    symbol_pattern: Regex,
    venue_whitelist: Vec<String>,
    history: Mutex<HashMap<String, SymbolHistory>>,
}

impl QualityValidator {
    pub fn new(cfg: QualityConfig, venue_whitelist: Vec<String>) -> Self {
        Self {
            cfg,
            symbol_pattern: Regex::new(SYMBOL_PATTERN).expect("symbol pattern is valid"),
            venue_whitelist,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_quarantined(&self, symbol: &str) -> bool {
        self.history
            .lock()
            .get(symbol)
            .map(|h| h.quarantined)
            .unwrap_or(false)
    }

    /// Validate one envelope. `Err(AnomalyQuarantined)` when the symbol is
    /// parked (or becomes parked by this envelope); otherwise the report
    /// says whether the envelope is cacheable.
    pub fn validate(&self, envelope: &Envelope, now: DateTime<Utc>) -> ScanResult<QualityReport> {
        // Corruption first: it always quarantines, regardless of streaks.
        if let Some(reason) = corruption(envelope) {
            let mut history = self.history.lock();
            let h = history.entry(envelope.symbol.clone()).or_default();
            h.quarantined = true;
            h.consecutive_failures += 1;
            h.consecutive_successes = 0;
            warn!(symbol = %envelope.symbol, reason, "corrupt envelope quarantined symbol");
            return Err(ScanError::AnomalyQuarantined(format!(
                "{}: {reason}",
                envelope.symbol
            )));
        }

        let checks = self.run_checks(envelope, now);
        let blocking_failed = checks.iter().any(|c| !c.passed);
        let quality_score = self.score(&checks);

        let mut history = self.history.lock();
        let h = history.entry(envelope.symbol.clone()).or_default();

        // Record the price/volume observations for future MAD windows even
        // on failure; a quarantined symbol needs fresh context to recover.
        if let Some(price) = envelope.last_price() {
            push_bounded(&mut h.prices, price, self.cfg.mad_window);
        }
        if let Some(vol) = envelope.volumes.values().next().copied() {
            push_bounded(&mut h.volumes, vol, self.cfg.mad_window);
        }

        if blocking_failed {
            h.consecutive_failures += 1;
            h.consecutive_successes = 0;
            if h.consecutive_failures >= self.cfg.quarantine_threshold {
                h.quarantined = true;
            }
        } else {
            h.consecutive_successes += 1;
            h.consecutive_failures = 0;
            if h.quarantined && h.consecutive_successes >= self.cfg.recovery_threshold {
                h.quarantined = false;
                debug!(symbol = %envelope.symbol, "symbol recovered from quarantine");
            }
        }

        if h.quarantined {
            return Err(ScanError::AnomalyQuarantined(format!(
                "{}: parked after {} consecutive failures",
                envelope.symbol, h.consecutive_failures
            )));
        }

        Ok(QualityReport {
            symbol: envelope.symbol.clone(),
            accepted: !blocking_failed,
            quality_score,
            checks,
        })
    }

    // -------------------------------------------------------------------------
    // Checks
    // -------------------------------------------------------------------------

    fn run_checks(&self, envelope: &Envelope, now: DateTime<Utc>) -> Vec<QualityCheck> {
        let mut checks = Vec::with_capacity(8);

        // schema: the primary price field and at least one volume field.
        let schema_ok = envelope.prices.contains_key("last") && !envelope.volumes.is_empty();
        checks.push(check("schema", schema_ok, "last price + volume present"));

        // type: all numeric fields finite.
        let type_ok = envelope
            .prices
            .values()
            .chain(envelope.volumes.values())
            .all(|v| v.is_finite());
        checks.push(check("type", type_ok, "all numeric fields finite"));

        // pattern: symbol shape.
        let pattern_ok = self.symbol_pattern.is_match(&envelope.symbol);
        checks.push(check("pattern", pattern_ok, "symbol matches pattern"));

        // range: positive price, non-negative volumes.
        let range_ok = envelope.last_price().map(|p| p > 0.0).unwrap_or(false)
            && envelope.volumes.values().all(|v| *v >= 0.0);
        checks.push(check("range", range_ok, "price > 0, volumes >= 0"));

        // freshness: within the tier TTL + clock skew.
        let horizon = match envelope.source_tier {
            SourceTier::Hot => self.cfg.hot_ttl_secs,
            SourceTier::Warm => self.cfg.warm_ttl_secs,
            SourceTier::Cold => self.cfg.cold_ttl_secs,
        } + self.cfg.clock_skew_secs;
        let age = (now - envelope.timestamp).num_seconds();
        let fresh_ok = age <= horizon && age >= -self.cfg.clock_skew_secs;
        checks.push(check(
            "freshness",
            fresh_ok,
            format!("age {age}s within {horizon}s"),
        ));

        // integrity: signature hash intact.
        checks.push(check(
            "integrity",
            envelope.signature_intact(),
            "signature hash matches content",
        ));

        // partitioning: whitelisted venue; hot data carries a sequence.
        let partition_ok = self.venue_whitelist.iter().any(|v| v == &envelope.venue)
            && (envelope.source_tier != SourceTier::Hot || envelope.sequence.is_some());
        checks.push(check(
            "partitioning",
            partition_ok,
            "venue whitelisted, hot data sequenced",
        ));

        // anomaly: rolling MAD on price + volume spike.
        let anomaly_ok = self.anomaly_check(envelope);
        checks.push(check("anomaly", anomaly_ok, "no MAD outlier or volume spike"));

        checks
    }

    fn anomaly_check(&self, envelope: &Envelope) -> bool {
        let history = self.history.lock();
        let Some(h) = history.get(&envelope.symbol) else {
            return true;
        };

        if let Some(price) = envelope.last_price() {
            if h.prices.len() >= self.cfg.mad_window / 2 {
                let values: Vec<f64> = h.prices.iter().copied().collect();
                let med = median(&values);
                let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
                let mad = median(&deviations);
                if mad > 0.0 && (price - med).abs() > self.cfg.mad_threshold * mad {
                    return false;
                }
            }
        }

        if let Some(vol) = envelope.volumes.values().next().copied() {
            if h.volumes.len() >= self.cfg.mad_window / 2 {
                let values: Vec<f64> = h.volumes.iter().copied().collect();
                let med = median(&values);
                if med > 0.0 && vol > self.cfg.spike_multiplier * med {
                    return false;
                }
            }
        }

        true
    }

    fn score(&self, checks: &[QualityCheck]) -> f64 {
        let sub = |names: &[&str]| -> f64 {
            let related: Vec<&QualityCheck> = checks
                .iter()
                .filter(|c| names.contains(&c.name.as_str()))
                .collect();
            if related.is_empty() {
                return 100.0;
            }
            related.iter().filter(|c| c.passed).count() as f64 / related.len() as f64 * 100.0
        };

        let freshness = sub(&["freshness"]);
        let completeness = sub(&["schema", "partitioning"]);
        let consistency = sub(&["type", "range", "pattern", "integrity"]);
        let anomaly_free = sub(&["anomaly"]);

        let total_weight = self.cfg.weight_freshness
            + self.cfg.weight_completeness
            + self.cfg.weight_consistency
            + self.cfg.weight_anomaly_free;

        ((freshness * self.cfg.weight_freshness
            + completeness * self.cfg.weight_completeness
            + consistency * self.cfg.weight_consistency
            + anomaly_free * self.cfg.weight_anomaly_free)
            / total_weight)
            .clamp(0.0, 100.0)
    }
}

fn check(name: &str, passed: bool, detail: impl Into<String>) -> QualityCheck {
    QualityCheck {
        name: name.to_string(),
        passed,
        detail: detail.into(),
    }
}

fn corruption(envelope: &Envelope) -> Option<&'static str> {
    let price = envelope.last_price();
    if envelope
        .prices
        .values()
        .chain(envelope.volumes.values())
        .any(|v| v.is_nan())
    {
        return Some("NaN field");
    }
    if envelope
        .prices
        .values()
        .chain(envelope.volumes.values())
        .any(|v| v.is_infinite())
    {
        return Some("infinite field");
    }
    match price {
        Some(p) if p < 0.0 => return Some("negative price"),
        Some(p) if p == 0.0 => return Some("zero price"),
        _ => {}
    }
    if envelope.volumes.values().any(|v| *v < 0.0) {
        return Some("negative volume");
    }
    None
}

fn push_bounded(q: &mut VecDeque<f64>, value: f64, cap: usize) {
    if q.len() == cap {
        q.pop_front();
    }
    q.push_back(value);
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
