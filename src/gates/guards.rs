// =============================================================================
// Safety guards — regime-aware advisory and blocking checks
// =============================================================================
//
// Guards run alongside the entry gates. A guard that fails with
// `is_warning = true` is advisory (CAUTION); a failure without the warning
// flag blocks the trade. The summary folds results into a recommendation and
// a 0–100 score where warnings halve a guard's contribution and blocking
// failures zero it, weighted by guard confidence.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::regime::detector::Regime;

/// Outcome of one safety guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardResult {
    pub name: String,
    pub passed: bool,
    pub is_warning: bool,
    /// Guard's confidence in its own verdict, in [0, 1].
    pub confidence: f64,
    pub reason: String,
}

impl GuardResult {
    pub fn pass(name: &str, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            is_warning: false,
            confidence,
            reason: reason.into(),
        }
    }

    pub fn warn(name: &str, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            is_warning: true,
            confidence,
            reason: reason.into(),
        }
    }

    pub fn block(name: &str, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            is_warning: false,
            confidence,
            reason: reason.into(),
        }
    }
}

/// Final recommendation derived from the guard battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Approve,
    Caution,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardSummary {
    pub all_passed: bool,
    pub blocking_failures: usize,
    pub warnings: usize,
    pub recommendation: Recommendation,
    /// Confidence-weighted score in [0, 100].
    pub overall_score: f64,
}

/// A trade is allowed unless some guard failed without the warning flag.
/// An empty battery means no guards are configured, which allows.
pub fn is_trade_allowed(results: &[GuardResult]) -> bool {
    results.iter().all(|r| r.passed || r.is_warning)
}

/// Fold guard results into the summary.
pub fn summarize(results: &[GuardResult]) -> GuardSummary {
    let blocking_failures = results
        .iter()
        .filter(|r| !r.passed && !r.is_warning)
        .count();
    let warnings = results.iter().filter(|r| !r.passed && r.is_warning).count();
    let all_passed = blocking_failures == 0;

    let recommendation = if blocking_failures > 0 {
        Recommendation::Reject
    } else if warnings > 0 {
        Recommendation::Caution
    } else {
        Recommendation::Approve
    };

    let overall_score = if results.is_empty() {
        100.0
    } else {
        let mut weight_sum = 0.0;
        let mut contribution = 0.0;
        for r in results {
            let weight = r.confidence.clamp(0.0, 1.0).max(f64::EPSILON);
            let factor = if r.passed {
                1.0
            } else if r.is_warning {
                0.5
            } else {
                0.0
            };
            weight_sum += weight;
            contribution += weight * factor;
        }
        (contribution / weight_sum * 100.0).clamp(0.0, 100.0)
    };

    GuardSummary {
        all_passed,
        blocking_failures,
        warnings,
        recommendation,
        overall_score,
    }
}

// =============================================================================
// Built-in guard battery
// =============================================================================

/// Raw readings for the standard guard battery.
#[derive(Debug, Clone, Copy)]
pub struct SafetyGuardInputs {
    /// Peak-to-now drawdown, percent (negative when under water).
    pub drawdown_pct: f64,
    /// Current volatility as a multiple of its trailing median.
    pub volatility_spike_ratio: f64,
    /// Data-quality score from the facade validator, [0, 100].
    pub data_quality_score: f64,
}

/// Evaluate the standard battery. High-vol regimes expect elevated
/// volatility, so the spike guard downgrades to a warning there instead of
/// blocking.
pub fn evaluate_safety_guards(regime: Regime, inputs: &SafetyGuardInputs) -> Vec<GuardResult> {
    let mut results = Vec::with_capacity(3);

    // Data quality guard.
    if inputs.data_quality_score < 60.0 {
        results.push(GuardResult::block(
            "data_quality",
            0.9,
            format!("quality score {:.0} below 60", inputs.data_quality_score),
        ));
    } else if inputs.data_quality_score < 75.0 {
        results.push(GuardResult::warn(
            "data_quality",
            0.9,
            format!("quality score {:.0} marginal", inputs.data_quality_score),
        ));
    } else {
        results.push(GuardResult::pass("data_quality", 0.9, "quality healthy"));
    }

    // Volatility spike guard (regime-aware).
    if inputs.volatility_spike_ratio > 3.0 {
        let reason = format!(
            "volatility {:.1}x trailing median",
            inputs.volatility_spike_ratio
        );
        if regime == Regime::HighVol {
            results.push(GuardResult::warn("volatility_spike", 0.8, reason));
        } else {
            results.push(GuardResult::block("volatility_spike", 0.8, reason));
        }
    } else {
        results.push(GuardResult::pass(
            "volatility_spike",
            0.8,
            "volatility within expectations",
        ));
    }

    // Drawdown guard.
    if inputs.drawdown_pct <= -20.0 {
        results.push(GuardResult::block(
            "drawdown",
            0.7,
            format!("drawdown {:.1}%", inputs.drawdown_pct),
        ));
    } else if inputs.drawdown_pct <= -10.0 {
        results.push(GuardResult::warn(
            "drawdown",
            0.7,
            format!("drawdown {:.1}%", inputs.drawdown_pct),
        ));
    } else {
        results.push(GuardResult::pass("drawdown", 0.7, "drawdown acceptable"));
    }

    results
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_results_allow_trade() {
        assert!(is_trade_allowed(&[]));
        let summary = summarize(&[]);
        assert!(summary.all_passed);
        assert_eq!(summary.recommendation, Recommendation::Approve);
        assert!((summary.overall_score - 100.0).abs() < 1e-12);
    }

    #[test]
    fn warnings_allow_but_blocking_failures_do_not() {
        let warn_only = vec![
            GuardResult::pass("a", 0.9, "ok"),
            GuardResult::warn("b", 0.8, "meh"),
        ];
        assert!(is_trade_allowed(&warn_only));

        let with_block = vec![
            GuardResult::pass("a", 0.9, "ok"),
            GuardResult::block("b", 0.8, "bad"),
        ];
        assert!(!is_trade_allowed(&with_block));
    }

    #[test]
    fn recommendation_ladder() {
        let all_pass = vec![GuardResult::pass("a", 1.0, "ok")];
        assert_eq!(summarize(&all_pass).recommendation, Recommendation::Approve);

        let warned = vec![
            GuardResult::pass("a", 1.0, "ok"),
            GuardResult::warn("b", 1.0, "hmm"),
        ];
        assert_eq!(summarize(&warned).recommendation, Recommendation::Caution);

        let blocked = vec![
            GuardResult::warn("a", 1.0, "hmm"),
            GuardResult::block("b", 1.0, "no"),
        ];
        let summary = summarize(&blocked);
        assert_eq!(summary.recommendation, Recommendation::Reject);
        assert_eq!(summary.blocking_failures, 1);
        assert_eq!(summary.warnings, 1);
        assert!(!summary.all_passed);
    }

    #[test]
    fn score_halves_warnings_and_zeroes_failures() {
        // Equal confidences: pass=100, warn=50, block=0.
        let results = vec![
            GuardResult::pass("a", 1.0, "ok"),
            GuardResult::warn("b", 1.0, "hmm"),
        ];
        assert!((summarize(&results).overall_score - 75.0).abs() < 1e-9);

        let results = vec![
            GuardResult::pass("a", 1.0, "ok"),
            GuardResult::block("b", 1.0, "no"),
        ];
        assert!((summarize(&results).overall_score - 50.0).abs() < 1e-9);

        let results = vec![GuardResult::block("a", 1.0, "no")];
        assert!(summarize(&results).overall_score.abs() < 1e-9);
    }

    #[test]
    fn score_respects_confidence_weighting() {
        // Low-confidence failure should dent the score less than a
        // high-confidence one.
        let weak_fail = vec![
            GuardResult::pass("a", 1.0, "ok"),
            GuardResult::block("b", 0.1, "no"),
        ];
        let strong_fail = vec![
            GuardResult::pass("a", 1.0, "ok"),
            GuardResult::block("b", 1.0, "no"),
        ];
        assert!(
            summarize(&weak_fail).overall_score > summarize(&strong_fail).overall_score
        );
    }

    #[test]
    fn battery_blocks_on_poor_quality() {
        let results = evaluate_safety_guards(
            Regime::Choppy,
            &SafetyGuardInputs {
                drawdown_pct: -2.0,
                volatility_spike_ratio: 1.0,
                data_quality_score: 40.0,
            },
        );
        assert!(!is_trade_allowed(&results));
        assert_eq!(summarize(&results).recommendation, Recommendation::Reject);
    }

    #[test]
    fn volatility_spike_is_warning_in_high_vol_regime() {
        let inputs = SafetyGuardInputs {
            drawdown_pct: 0.0,
            volatility_spike_ratio: 4.0,
            data_quality_score: 95.0,
        };

        let choppy = evaluate_safety_guards(Regime::Choppy, &inputs);
        assert!(!is_trade_allowed(&choppy));

        let high_vol = evaluate_safety_guards(Regime::HighVol, &inputs);
        assert!(is_trade_allowed(&high_vol));
        assert_eq!(
            summarize(&high_vol).recommendation,
            Recommendation::Caution
        );
    }

    #[test]
    fn clean_battery_approves() {
        let results = evaluate_safety_guards(
            Regime::TrendingBull,
            &SafetyGuardInputs {
                drawdown_pct: -1.0,
                volatility_spike_ratio: 1.2,
                data_quality_score: 92.0,
            },
        );
        let summary = summarize(&results);
        assert!(summary.all_passed);
        assert_eq!(summary.recommendation, Recommendation::Approve);
        assert!((summary.overall_score - 100.0).abs() < 1e-9);
    }
}
