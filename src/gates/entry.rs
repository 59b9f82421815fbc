// =============================================================================
// Entry gates — freshness, fatigue, late-fill, microstructure
// =============================================================================
//
// Every gate is evaluated on every candidate (no short-circuit) so the
// explain surface can show the full picture. The overall verdict is the AND
// of all evaluated gates; the overall reason is the name of the first
// failing gate in evaluation order.
//
// Boundary semantics: late-fill, freshness and microstructure limits are
// inclusive (a value exactly at the limit passes). The fatigue block
// condition is inclusive on its thresholds (momentum >= 12 % AND RSI >= 70
// blocks) with the acceleration override at >= 2.0.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GuardsConfig;

// =============================================================================
// Types
// =============================================================================

/// Outcome of one gate, with the measurements that drove it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub metrics: HashMap<String, f64>,
}

impl GateResult {
    fn pass(name: &str, message: impl Into<String>, metrics: HashMap<String, f64>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.into(),
            metrics,
        }
    }

    fn fail(name: &str, message: impl Into<String>, metrics: HashMap<String, f64>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.into(),
            metrics,
        }
    }
}

/// Everything the entry gates need for one candidate.
#[derive(Debug, Clone)]
pub struct GateInputs {
    /// Age of the signal bar, in bars.
    pub bars_age: u32,
    /// Price change since the signal bar, in quote units.
    pub price_change: f64,
    /// 1-hour ATR in quote units. Non-positive ATR fails freshness.
    pub atr_1h: f64,

    /// 24-hour momentum, percent.
    pub momentum_24h: f64,
    /// 4-hour RSI.
    pub rsi_4h: f64,
    /// Momentum acceleration (d(momentum)/dt), percent per bar.
    pub acceleration: f64,

    pub signal_ts: DateTime<Utc>,
    pub execution_ts: DateTime<Utc>,
    /// Provider p99 latency, milliseconds.
    pub p99_latency_ms: f64,
    /// Absolute price move since the signal, in quote units.
    pub price_move_since_signal: f64,

    /// Microstructure inputs; the gate only runs when all three are present.
    pub spread_bps: Option<f64>,
    pub depth_usd: Option<f64>,
    pub vadr: Option<f64>,
}

/// Aggregated verdict over all evaluated gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryGateReport {
    pub results: Vec<GateResult>,
    pub overall_passed: bool,
    /// Name of the first failing gate, if any.
    pub overall_reason: Option<String>,
}

// =============================================================================
// Engine
// =============================================================================

pub struct EntryGateEngine {
    cfg: GuardsConfig,
}

impl EntryGateEngine {
    pub fn new(cfg: GuardsConfig) -> Self {
        Self { cfg }
    }

    /// Evaluate every gate; nothing short-circuits.
    pub fn evaluate(&self, inputs: &GateInputs) -> EntryGateReport {
        let mut results = vec![
            self.freshness_gate(inputs),
            self.fatigue_gate(inputs),
            self.late_fill_gate(inputs, false),
        ];
        if let Some(micro) = self.microstructure_gate(inputs) {
            results.push(micro);
        }

        let overall_passed = results.iter().all(|r| r.passed);
        let overall_reason = results.iter().find(|r| !r.passed).map(|r| r.name.clone());

        EntryGateReport {
            results,
            overall_passed,
            overall_reason,
        }
    }

    /// Same as [`evaluate`] but for pre-execution checks, where the
    /// execution delay is not yet known.
    pub fn evaluate_pre_execution(&self, inputs: &GateInputs) -> EntryGateReport {
        let mut results = vec![
            self.freshness_gate(inputs),
            self.fatigue_gate(inputs),
            self.late_fill_gate(inputs, true),
        ];
        if let Some(micro) = self.microstructure_gate(inputs) {
            results.push(micro);
        }

        let overall_passed = results.iter().all(|r| r.passed);
        let overall_reason = results.iter().find(|r| !r.passed).map(|r| r.name.clone());

        EntryGateReport {
            results,
            overall_passed,
            overall_reason,
        }
    }

    // -------------------------------------------------------------------------
    // Individual gates
    // -------------------------------------------------------------------------

    fn freshness_gate(&self, inputs: &GateInputs) -> GateResult {
        let cfg = &self.cfg.freshness;
        let mut metrics = HashMap::new();
        metrics.insert("bars_age".to_string(), inputs.bars_age as f64);
        metrics.insert("price_change".to_string(), inputs.price_change);
        metrics.insert("atr_1h".to_string(), inputs.atr_1h);

        if inputs.bars_age > cfg.max_bars_age {
            return GateResult::fail(
                "freshness",
                format!("stale_bars: age {} > {}", inputs.bars_age, cfg.max_bars_age),
                metrics,
            );
        }
        if inputs.atr_1h <= 0.0 || !inputs.atr_1h.is_finite() {
            return GateResult::fail("freshness", "atr_unavailable", metrics);
        }

        let move_ratio = inputs.price_change.abs() / inputs.atr_1h;
        metrics.insert("move_ratio".to_string(), move_ratio);
        if move_ratio > cfg.atr_factor {
            return GateResult::fail(
                "freshness",
                format!(
                    "excessive_move: |Δprice|/ATR {:.3} > {:.2}",
                    move_ratio, cfg.atr_factor
                ),
                metrics,
            );
        }

        GateResult::pass("freshness", "bars fresh, move within ATR budget", metrics)
    }

    fn fatigue_gate(&self, inputs: &GateInputs) -> GateResult {
        let cfg = &self.cfg.fatigue;
        let mut metrics = HashMap::new();
        metrics.insert("momentum_24h".to_string(), inputs.momentum_24h);
        metrics.insert("rsi_4h".to_string(), inputs.rsi_4h);
        metrics.insert("acceleration".to_string(), inputs.acceleration);

        let overheated = inputs.momentum_24h >= cfg.momentum_24h_threshold
            && inputs.rsi_4h >= cfg.rsi_4h_threshold;

        if overheated {
            if inputs.acceleration >= cfg.accel_override {
                return GateResult::pass(
                    "fatigue",
                    format!(
                        "overheated but accelerating ({:.2} >= {:.2})",
                        inputs.acceleration, cfg.accel_override
                    ),
                    metrics,
                );
            }
            return GateResult::fail(
                "fatigue",
                format!(
                    "momentum {:.1}% with RSI {:.1} and no acceleration",
                    inputs.momentum_24h, inputs.rsi_4h
                ),
                metrics,
            );
        }

        GateResult::pass("fatigue", "not overheated", metrics)
    }

    fn late_fill_gate(&self, inputs: &GateInputs, pre_execution: bool) -> GateResult {
        let cfg = &self.cfg.late_fill;
        let mut metrics = HashMap::new();
        metrics.insert("p99_latency_ms".to_string(), inputs.p99_latency_ms);

        if !pre_execution {
            let delay_secs = (inputs.execution_ts - inputs.signal_ts).num_seconds();
            metrics.insert("delay_secs".to_string(), delay_secs as f64);
            if delay_secs > cfg.max_delay_secs {
                return GateResult::fail(
                    "late_fill",
                    format!("delay {delay_secs}s > {}s", cfg.max_delay_secs),
                    metrics,
                );
            }
        }

        if inputs.p99_latency_ms > cfg.p99_latency_ms {
            return GateResult::fail(
                "late_fill",
                format!(
                    "provider p99 {:.0}ms > {:.0}ms",
                    inputs.p99_latency_ms, cfg.p99_latency_ms
                ),
                metrics,
            );
        }

        if inputs.atr_1h > 0.0 {
            let move_ratio = inputs.price_move_since_signal.abs() / inputs.atr_1h;
            metrics.insert("move_ratio".to_string(), move_ratio);
            if move_ratio > cfg.atr_factor {
                return GateResult::fail(
                    "late_fill",
                    format!("price moved {:.3} ATR since signal", move_ratio),
                    metrics,
                );
            }
        }

        GateResult::pass("late_fill", "fill window intact", metrics)
    }

    /// `None` when any microstructure input is missing: the gate is skipped
    /// entirely rather than failed.
    fn microstructure_gate(&self, inputs: &GateInputs) -> Option<GateResult> {
        let cfg = &self.cfg.microstructure;
        let (spread, depth, vadr) = match (inputs.spread_bps, inputs.depth_usd, inputs.vadr) {
            (Some(s), Some(d), Some(v)) => (s, d, v),
            _ => return None,
        };

        let mut metrics = HashMap::new();
        metrics.insert("spread_bps".to_string(), spread);
        metrics.insert("depth_usd".to_string(), depth);
        metrics.insert("vadr".to_string(), vadr);

        if spread > cfg.max_spread_bps {
            return Some(GateResult::fail(
                "microstructure",
                format!("spread {spread:.1}bps > {:.1}bps", cfg.max_spread_bps),
                metrics,
            ));
        }
        if depth < cfg.min_depth_usd {
            return Some(GateResult::fail(
                "microstructure",
                format!("depth ${depth:.0} < ${:.0}", cfg.min_depth_usd),
                metrics,
            ));
        }
        if vadr < cfg.min_vadr {
            return Some(GateResult::fail(
                "microstructure",
                format!("VADR {vadr:.2} < {:.2}", cfg.min_vadr),
                metrics,
            ));
        }

        Some(GateResult::pass(
            "microstructure",
            "spread/depth/VADR within limits",
            metrics,
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> EntryGateEngine {
        EntryGateEngine::new(GuardsConfig::default())
    }

    fn clean_inputs() -> GateInputs {
        let now = Utc::now();
        GateInputs {
            bars_age: 1,
            price_change: 50.0,
            atr_1h: 100.0,
            momentum_24h: 5.0,
            rsi_4h: 55.0,
            acceleration: 0.0,
            signal_ts: now,
            execution_ts: now + chrono::Duration::seconds(5),
            p99_latency_ms: 150.0,
            price_move_since_signal: 10.0,
            spread_bps: Some(20.0),
            depth_usd: Some(250_000.0),
            vadr: Some(2.1),
        }
    }

    #[test]
    fn clean_candidate_passes_all_gates() {
        let report = engine().evaluate(&clean_inputs());
        assert!(report.overall_passed);
        assert!(report.overall_reason.is_none());
        assert_eq!(report.results.len(), 4);
    }

    // ---- freshness -------------------------------------------------------

    #[test]
    fn freshness_boundary_move_ratio() {
        let mut inputs = clean_inputs();
        inputs.price_change = 120.0;
        inputs.atr_1h = 100.0;
        let report = engine().evaluate(&inputs);
        assert!(report.results[0].passed, "1.2 ATR exactly passes");

        inputs.price_change = 121.0;
        let report = engine().evaluate(&inputs);
        assert!(!report.results[0].passed);
        assert!(report.results[0].message.contains("excessive_move"));
        assert_eq!(report.overall_reason.as_deref(), Some("freshness"));
    }

    #[test]
    fn freshness_stale_bars() {
        let mut inputs = clean_inputs();
        inputs.bars_age = 3;
        let report = engine().evaluate(&inputs);
        assert!(!report.results[0].passed);
        assert!(report.results[0].message.contains("stale_bars"));

        inputs.bars_age = 2;
        assert!(engine().evaluate(&inputs).results[0].passed);
    }

    #[test]
    fn freshness_requires_usable_atr() {
        let mut inputs = clean_inputs();
        inputs.atr_1h = 0.0;
        let report = engine().evaluate(&inputs);
        assert!(!report.results[0].passed);
        assert!(report.results[0].message.contains("atr_unavailable"));
    }

    // ---- fatigue ---------------------------------------------------------

    #[test]
    fn fatigue_boundary_blocks_without_acceleration() {
        let mut inputs = clean_inputs();
        inputs.momentum_24h = 12.0;
        inputs.rsi_4h = 70.0;
        inputs.acceleration = 0.0;
        let report = engine().evaluate(&inputs);
        let fatigue = &report.results[1];
        assert!(!fatigue.passed);
        assert_eq!(report.overall_reason.as_deref(), Some("fatigue"));
    }

    #[test]
    fn fatigue_acceleration_override() {
        let mut inputs = clean_inputs();
        inputs.momentum_24h = 12.0;
        inputs.rsi_4h = 70.0;
        inputs.acceleration = 2.5;
        assert!(engine().evaluate(&inputs).results[1].passed);

        inputs.acceleration = 2.0;
        assert!(engine().evaluate(&inputs).results[1].passed, "floor inclusive");

        inputs.acceleration = 1.9;
        assert!(!engine().evaluate(&inputs).results[1].passed);
    }

    #[test]
    fn fatigue_requires_both_conditions() {
        let mut inputs = clean_inputs();
        inputs.momentum_24h = 20.0;
        inputs.rsi_4h = 60.0;
        assert!(engine().evaluate(&inputs).results[1].passed);

        inputs.momentum_24h = 8.0;
        inputs.rsi_4h = 85.0;
        assert!(engine().evaluate(&inputs).results[1].passed);
    }

    // ---- late-fill -------------------------------------------------------

    #[test]
    fn late_fill_delay_boundary() {
        let mut inputs = clean_inputs();
        inputs.execution_ts = inputs.signal_ts + chrono::Duration::seconds(30);
        assert!(engine().evaluate(&inputs).results[2].passed, "30s passes");

        inputs.execution_ts = inputs.signal_ts + chrono::Duration::seconds(31);
        let report = engine().evaluate(&inputs);
        assert!(!report.results[2].passed);
        assert_eq!(report.overall_reason.as_deref(), Some("late_fill"));
    }

    #[test]
    fn late_fill_latency_and_move_checks() {
        let mut inputs = clean_inputs();
        inputs.p99_latency_ms = 400.0;
        assert!(engine().evaluate(&inputs).results[2].passed, "400ms inclusive");

        inputs.p99_latency_ms = 401.0;
        assert!(!engine().evaluate(&inputs).results[2].passed);

        inputs.p99_latency_ms = 150.0;
        inputs.price_move_since_signal = 130.0; // 1.3 ATR
        assert!(!engine().evaluate(&inputs).results[2].passed);
    }

    #[test]
    fn pre_execution_skips_delay_but_keeps_other_checks() {
        let mut inputs = clean_inputs();
        inputs.execution_ts = inputs.signal_ts + chrono::Duration::seconds(300);
        let report = engine().evaluate_pre_execution(&inputs);
        assert!(report.results[2].passed, "delay ignored pre-execution");

        inputs.p99_latency_ms = 500.0;
        let report = engine().evaluate_pre_execution(&inputs);
        assert!(!report.results[2].passed, "latency still enforced");
    }

    // ---- microstructure --------------------------------------------------

    #[test]
    fn microstructure_spread_boundary() {
        let mut inputs = clean_inputs();
        inputs.spread_bps = Some(50.0);
        let report = engine().evaluate(&inputs);
        assert!(report.results[3].passed, "50.0 exactly passes");

        inputs.spread_bps = Some(50.1);
        let report = engine().evaluate(&inputs);
        assert!(!report.results[3].passed);
    }

    #[test]
    fn microstructure_depth_and_vadr_boundaries() {
        let mut inputs = clean_inputs();
        inputs.depth_usd = Some(100_000.0);
        inputs.vadr = Some(1.75);
        let report = engine().evaluate(&inputs);
        assert!(report.results[3].passed);

        inputs.depth_usd = Some(99_999.0);
        assert!(!engine().evaluate(&inputs).results[3].passed);

        inputs.depth_usd = Some(100_000.0);
        inputs.vadr = Some(1.74);
        assert!(!engine().evaluate(&inputs).results[3].passed);
    }

    #[test]
    fn microstructure_skipped_when_inputs_missing() {
        let mut inputs = clean_inputs();
        inputs.vadr = None;
        let report = engine().evaluate(&inputs);
        assert_eq!(report.results.len(), 3);
        assert!(report.overall_passed);
    }

    // ---- aggregation -----------------------------------------------------

    #[test]
    fn all_gates_evaluated_despite_early_failure() {
        let mut inputs = clean_inputs();
        inputs.bars_age = 9; // freshness fails first
        inputs.spread_bps = Some(80.0); // microstructure would also fail
        let report = engine().evaluate(&inputs);
        assert_eq!(report.results.len(), 4, "no short-circuit");
        assert!(!report.overall_passed);
        assert_eq!(report.overall_reason.as_deref(), Some("freshness"));
        assert!(!report.results[3].passed, "later gate still evaluated");
    }
}
