// =============================================================================
// Pre-move gate combinations — 2-of-3 with optional volume confirmation
// =============================================================================
//
// Three independent structural gates watch for accumulation ahead of a move:
// funding divergence, supply squeeze, whale accumulation. A candidate
// qualifies when at least `min_gates_passed` (default 2) pass. When volume
// confirmation is required and the volume gate reports not-OK, the candidate
// is rejected regardless of how many structural gates passed.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PremoveConfig;
use crate::gates::entry::GateResult;

/// Boolean verdicts for the three structural gates plus the volume gate.
#[derive(Debug, Clone, Copy)]
pub struct PremoveInputs {
    pub funding_divergence: bool,
    pub supply_squeeze: bool,
    pub whale_accumulation: bool,
    /// `None` when the volume gate did not run (treated as OK).
    pub volume_confirm: Option<bool>,
}

impl PremoveInputs {
    /// Derive gate verdicts from raw subscores and book depth:
    /// funding z at or past 2.0, reserve ratio under 0.8 with positive depth
    /// drain, and net whale inflow over 1 M USD.
    pub fn from_signals(
        funding_z: f64,
        reserve_ratio: f64,
        depth_drain: f64,
        whale_net_inflow_usd: f64,
        volume_confirm: Option<bool>,
    ) -> Self {
        Self {
            funding_divergence: funding_z.abs() >= 2.0,
            supply_squeeze: reserve_ratio < 0.8 && depth_drain > 0.0,
            whale_accumulation: whale_net_inflow_usd >= 1_000_000.0,
            volume_confirm,
        }
    }
}

/// Outcome of the 2-of-3 evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremoveDecision {
    pub gates_passed: usize,
    pub qualified: bool,
    /// True when the volume-confirm requirement alone rejected the
    /// candidate.
    pub volume_vetoed: bool,
    pub results: Vec<GateResult>,
}

/// Evaluate the 2-of-3 combination.
pub fn evaluate_premove(cfg: &PremoveConfig, inputs: &PremoveInputs) -> PremoveDecision {
    let named = [
        ("funding_divergence", inputs.funding_divergence),
        ("supply_squeeze", inputs.supply_squeeze),
        ("whale_accumulation", inputs.whale_accumulation),
    ];

    let mut results: Vec<GateResult> = named
        .iter()
        .map(|(name, passed)| {
            let mut metrics = HashMap::new();
            metrics.insert("passed".to_string(), if *passed { 1.0 } else { 0.0 });
            GateResult {
                name: (*name).to_string(),
                passed: *passed,
                message: if *passed {
                    "gate confirmed".to_string()
                } else {
                    "gate not confirmed".to_string()
                },
                metrics,
            }
        })
        .collect();

    let gates_passed = named.iter().filter(|(_, p)| *p).count();
    let enough_gates = gates_passed >= cfg.min_gates_passed;

    let volume_vetoed =
        cfg.require_volume_confirm && matches!(inputs.volume_confirm, Some(false));
    if cfg.require_volume_confirm {
        let volume_ok = !matches!(inputs.volume_confirm, Some(false));
        let mut metrics = HashMap::new();
        metrics.insert("passed".to_string(), if volume_ok { 1.0 } else { 0.0 });
        results.push(GateResult {
            name: "volume_confirm".to_string(),
            passed: volume_ok,
            message: if volume_ok {
                "volume confirms".to_string()
            } else {
                "volume gate not OK".to_string()
            },
            metrics,
        });
    }

    let qualified = enough_gates && !volume_vetoed;

    debug!(
        gates_passed,
        required = cfg.min_gates_passed,
        volume_vetoed,
        qualified,
        "premove combination evaluated"
    );

    PremoveDecision {
        gates_passed,
        qualified,
        volume_vetoed,
        results,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(funding: bool, supply: bool, whale: bool, volume: Option<bool>) -> PremoveInputs {
        PremoveInputs {
            funding_divergence: funding,
            supply_squeeze: supply,
            whale_accumulation: whale,
            volume_confirm: volume,
        }
    }

    #[test]
    fn two_of_three_qualifies_without_volume_requirement() {
        let cfg = PremoveConfig::default();
        let d = evaluate_premove(&cfg, &inputs(true, true, false, Some(false)));
        assert_eq!(d.gates_passed, 2);
        assert!(d.qualified, "volume not required by default");
        assert!(!d.volume_vetoed);
    }

    #[test]
    fn one_of_three_does_not_qualify() {
        let cfg = PremoveConfig::default();
        let d = evaluate_premove(&cfg, &inputs(true, false, false, None));
        assert_eq!(d.gates_passed, 1);
        assert!(!d.qualified);
    }

    #[test]
    fn volume_requirement_vetoes_despite_gate_count() {
        let cfg = PremoveConfig {
            require_volume_confirm: true,
            ..PremoveConfig::default()
        };
        let d = evaluate_premove(&cfg, &inputs(true, true, false, Some(false)));
        assert_eq!(d.gates_passed, 2);
        assert!(!d.qualified);
        assert!(d.volume_vetoed);
        // The volume gate shows up in the transparency trail.
        assert_eq!(d.results.len(), 4);
        assert!(!d.results[3].passed);
    }

    #[test]
    fn volume_requirement_satisfied_allows_alert() {
        let cfg = PremoveConfig {
            require_volume_confirm: true,
            ..PremoveConfig::default()
        };
        let d = evaluate_premove(&cfg, &inputs(true, true, false, Some(true)));
        assert!(d.qualified);

        // Unknown volume state does not veto.
        let d = evaluate_premove(&cfg, &inputs(true, true, false, None));
        assert!(d.qualified);
    }

    #[test]
    fn all_three_gates_reported() {
        let cfg = PremoveConfig::default();
        let d = evaluate_premove(&cfg, &inputs(false, false, false, None));
        assert_eq!(d.results.len(), 3);
        assert_eq!(d.gates_passed, 0);
        let names: Vec<&str> = d.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["funding_divergence", "supply_squeeze", "whale_accumulation"]
        );
    }

    #[test]
    fn from_signals_thresholds() {
        let p = PremoveInputs::from_signals(2.0, 0.7, 5_000.0, 1_000_000.0, None);
        assert!(p.funding_divergence);
        assert!(p.supply_squeeze);
        assert!(p.whale_accumulation);

        let p = PremoveInputs::from_signals(1.9, 0.9, -1.0, 999_999.0, None);
        assert!(!p.funding_divergence);
        assert!(!p.supply_squeeze);
        assert!(!p.whale_accumulation);
    }

    #[test]
    fn custom_min_gate_count() {
        let cfg = PremoveConfig {
            min_gates_passed: 3,
            require_volume_confirm: false,
        };
        assert!(!evaluate_premove(&cfg, &inputs(true, true, false, None)).qualified);
        assert!(evaluate_premove(&cfg, &inputs(true, true, true, None)).qualified);
    }
}
