// =============================================================================
// Dip-specific vetoes — news-shock, stair-step, time-decay
// =============================================================================
//
// A dip entry is attractive only while the dip thesis is intact. Three
// vetoes kill a candidate whose dip has turned into a knife:
//
//   news-shock  — a 24h return at or below -15 % requires a rebound of at
//                 least 3 % within the rebound window; no rebound, no entry
//   stair-step  — two or more successive lower highs inside the look-back
//                 window mark persistent distribution
//   time-decay  — the signal expires after `bars_to_live` bars, and a price
//                 that drifted more than 5 % from the dip price no longer
//                 offers the entry that was scored
//
// All vetoes are evaluated; the first failure becomes the veto reason.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::DipConfig;
use crate::gates::entry::GateResult;

/// Observations for the dip veto battery.
#[derive(Debug, Clone)]
pub struct DipInputs {
    /// 24-hour return, percent.
    pub return_24h: f64,
    /// Best rebound observed within the rebound window, percent.
    pub rebound_pct: f64,
    /// Bar highs, oldest first; the stair-step scan uses the tail window.
    pub bar_highs: Vec<f64>,
    /// Bars elapsed since the dip was detected.
    pub bars_since_detection: u32,
    /// Price at dip detection.
    pub dip_price: f64,
    /// Current execution price.
    pub current_price: f64,
}

/// Battery outcome; `veto_reason` names the first failing veto.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DipDecision {
    pub results: Vec<GateResult>,
    pub blocked: bool,
    pub veto_reason: Option<String>,
}

/// Evaluate all three vetoes.
pub fn evaluate_dip_guards(cfg: &DipConfig, inputs: &DipInputs) -> DipDecision {
    let results = vec![
        news_shock_veto(cfg, inputs),
        stair_step_veto(cfg, inputs),
        time_decay_veto(cfg, inputs),
    ];

    let blocked = results.iter().any(|r| !r.passed);
    let veto_reason = results.iter().find(|r| !r.passed).map(|r| r.name.clone());

    DipDecision {
        results,
        blocked,
        veto_reason,
    }
}

fn news_shock_veto(cfg: &DipConfig, inputs: &DipInputs) -> GateResult {
    let mut metrics = HashMap::new();
    metrics.insert("return_24h".to_string(), inputs.return_24h);
    metrics.insert("rebound_pct".to_string(), inputs.rebound_pct);

    if inputs.return_24h <= cfg.return_24h_min {
        if inputs.rebound_pct >= cfg.accel_rebound {
            return GateResult {
                name: "news_shock".to_string(),
                passed: true,
                message: format!(
                    "shock {:.1}% but rebounded {:.1}%",
                    inputs.return_24h, inputs.rebound_pct
                ),
                metrics,
            };
        }
        return GateResult {
            name: "news_shock".to_string(),
            passed: false,
            message: format!(
                "24h return {:.1}% with rebound {:.1}% < {:.1}%",
                inputs.return_24h, inputs.rebound_pct, cfg.accel_rebound
            ),
            metrics,
        };
    }

    GateResult {
        name: "news_shock".to_string(),
        passed: true,
        message: "no news shock".to_string(),
        metrics,
    }
}

fn stair_step_veto(cfg: &DipConfig, inputs: &DipInputs) -> GateResult {
    let lower_highs = count_lower_highs(&inputs.bar_highs, cfg.lower_high_window as usize);
    let mut metrics = HashMap::new();
    metrics.insert("lower_highs".to_string(), lower_highs as f64);

    if lower_highs >= cfg.max_lower_highs {
        return GateResult {
            name: "stair_step".to_string(),
            passed: false,
            message: format!(
                "{lower_highs} lower highs within {} bars",
                cfg.lower_high_window
            ),
            metrics,
        };
    }

    GateResult {
        name: "stair_step".to_string(),
        passed: true,
        message: "no stair-step distribution".to_string(),
        metrics,
    }
}

fn time_decay_veto(cfg: &DipConfig, inputs: &DipInputs) -> GateResult {
    let mut metrics = HashMap::new();
    metrics.insert(
        "bars_since_detection".to_string(),
        inputs.bars_since_detection as f64,
    );

    if inputs.bars_since_detection > cfg.bars_to_live {
        return GateResult {
            name: "time_decay".to_string(),
            passed: false,
            message: format!(
                "signal is {} bars old, expires at {}",
                inputs.bars_since_detection, cfg.bars_to_live
            ),
            metrics,
        };
    }

    if inputs.dip_price > 0.0 {
        let drift_pct =
            (inputs.current_price - inputs.dip_price).abs() / inputs.dip_price * 100.0;
        metrics.insert("drift_pct".to_string(), drift_pct);
        if drift_pct > cfg.max_drift_pct {
            return GateResult {
                name: "time_decay".to_string(),
                passed: false,
                message: format!(
                    "price drifted {drift_pct:.1}% from dip price, limit {:.1}%",
                    cfg.max_drift_pct
                ),
                metrics,
            };
        }
    }

    GateResult {
        name: "time_decay".to_string(),
        passed: true,
        message: "signal still live".to_string(),
        metrics,
    }
}

/// Count successive lower local highs within the trailing `window` entries.
/// A local high is a bar whose high is at least its neighbors'; each peak
/// below the previous peak counts once.
fn count_lower_highs(highs: &[f64], window: usize) -> u32 {
    if highs.len() < 3 || window < 3 {
        return 0;
    }
    let tail = &highs[highs.len().saturating_sub(window)..];

    let mut peaks = Vec::new();
    for i in 1..tail.len() - 1 {
        if tail[i] >= tail[i - 1] && tail[i] >= tail[i + 1] {
            peaks.push(tail[i]);
        }
    }

    let mut count = 0;
    for pair in peaks.windows(2) {
        if pair[1] < pair[0] {
            count += 1;
        }
    }
    count
}
