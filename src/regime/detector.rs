// =============================================================================
// Market Regime Detector — 3-signal majority vote on a 4-hour cadence
// =============================================================================
//
// Classifies the market into one of three regimes from three breadth/vol
// signals. Each signal casts exactly one vote:
//
//   realized_vol_7d   >= 0.60 -> HIGH_VOL      <= 0.25 -> TRENDING_BULL
//                     otherwise CHOPPY
//   pct_above_20ma    >= 0.60 -> TRENDING_BULL  otherwise CHOPPY
//   breadth_thrust    >= 0.70 -> TRENDING_BULL  <= 0.30 -> HIGH_VOL
//                     otherwise CHOPPY
//
// Strict plurality wins. A 1-1-1 tie retains the previous regime (stability
// bias) rather than thrashing. Detections are cached for four hours: calls
// inside the window return the cached detection with an identical
// detection-time, so every consumer in a scan cycle sees the same regime.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{ScanError, ScanResult};

/// Re-evaluation cadence. Inside this window detections are served from
/// cache; regime transitions also require this much time since the last
/// change.
pub const REGIME_CADENCE_HOURS: i64 = 4;

// =============================================================================
// Types
// =============================================================================

/// Canonical market-state classification.
///
/// Aliases from older config files are accepted on parse: `calm` and
/// `normal` map to Choppy, `volatile` to HighVol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    TrendingBull,
    Choppy,
    HighVol,
}

impl Regime {
    /// Numeric code used by the HTTP surface: choppy 0, bull 1, high-vol 2.
    pub fn numeric(self) -> u8 {
        match self {
            Self::Choppy => 0,
            Self::TrendingBull => 1,
            Self::HighVol => 2,
        }
    }

    /// Parse a regime name, accepting legacy aliases.
    pub fn parse(name: &str) -> ScanResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "trending_bull" | "bull" => Ok(Self::TrendingBull),
            "choppy" | "calm" | "normal" => Ok(Self::Choppy),
            "high_vol" | "volatile" => Ok(Self::HighVol),
            other => Err(ScanError::InvalidInput(format!(
                "unknown regime '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrendingBull => write!(f, "trending_bull"),
            Self::Choppy => write!(f, "choppy"),
            Self::HighVol => write!(f, "high_vol"),
        }
    }
}

/// Raw inputs for one detection pass.
#[derive(Debug, Clone, Copy)]
pub struct RegimeInputs {
    /// 7-day realized volatility of the benchmark basket.
    pub realized_vol_7d: f64,
    /// Share of universe closes above their 20-period MA, in [0, 1].
    pub pct_above_20ma: f64,
    /// Breadth thrust oscillator, in [-1, 1].
    pub breadth_thrust: f64,
    /// Evaluation time; drives the cadence window.
    pub now: DateTime<Utc>,
}

/// One signal's contribution to the vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalVote {
    pub name: String,
    pub value: f64,
    pub vote: Regime,
    pub weight: f64,
}

/// A complete detection result. Cached and shared across the scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeDetection {
    pub regime: Regime,
    /// winning_votes / 3.
    pub confidence: f64,
    pub indicators: Vec<SignalVote>,
    pub detected_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
    /// True when this detection kept the previous regime (same winner, or a
    /// tie resolved by stability bias).
    pub stable: bool,
}

/// Vote thresholds. Defaults match the production profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeThresholds {
    pub vol_low: f64,
    pub vol_high: f64,
    pub breadth_bull: f64,
    pub thrust_bull: f64,
    pub thrust_bear: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            vol_low: 0.25,
            vol_high: 0.60,
            breadth_bull: 0.60,
            thrust_bull: 0.70,
            thrust_bear: 0.30,
        }
    }
}

// =============================================================================
// Detector
// =============================================================================

/// Thread-safe detector caching the latest detection. Wrap in an `Arc` and
/// share across the runtime.
pub struct RegimeDetector {
    thresholds: RegimeThresholds,
    state: RwLock<Option<RegimeDetection>>,
}

impl RegimeDetector {
    pub fn new(thresholds: RegimeThresholds) -> Self {
        Self {
            thresholds,
            state: RwLock::new(None),
        }
    }

    /// Run a detection pass, honoring the 4-hour cadence: inside the window
    /// the cached detection is returned verbatim (identical `detected_at`).
    pub fn detect(&self, inputs: RegimeInputs) -> ScanResult<RegimeDetection> {
        validate_inputs(&inputs)?;

        if let Some(cached) = self.state.read().as_ref() {
            let age = inputs.now - cached.detected_at;
            if age < Duration::hours(REGIME_CADENCE_HOURS) && age >= Duration::zero() {
                debug!(regime = %cached.regime, age_mins = age.num_minutes(), "regime served from cadence cache");
                return Ok(cached.clone());
            }
        }

        let votes = cast_votes(
            &self.thresholds,
            inputs.realized_vol_7d,
            inputs.pct_above_20ma,
            inputs.breadth_thrust,
        );
        let (winner, winning_votes, tied) = tally(&votes);

        let prev = self.state.read().clone();
        let (regime, stable, confidence) = match (&prev, winner) {
            // Tie: retain the previous regime.
            (Some(p), None) => {
                let kept_votes = votes.iter().filter(|v| v.vote == p.regime).count();
                (p.regime, true, kept_votes as f64 / 3.0)
            }
            // Tie on the very first evaluation: neutral default.
            (None, None) => (Regime::Choppy, false, 1.0 / 3.0),
            (Some(p), Some(w)) => {
                if w == p.regime {
                    (w, true, winning_votes as f64 / 3.0)
                } else if inputs.now - p.last_changed_at
                    < Duration::hours(REGIME_CADENCE_HOURS)
                {
                    // A differing vote inside the change window keeps the
                    // current regime.
                    let kept_votes = votes.iter().filter(|v| v.vote == p.regime).count();
                    (p.regime, true, (kept_votes.max(1)) as f64 / 3.0)
                } else {
                    (w, false, winning_votes as f64 / 3.0)
                }
            }
            (None, Some(w)) => (w, false, winning_votes as f64 / 3.0),
        };

        let last_changed_at = match &prev {
            Some(p) if p.regime == regime => p.last_changed_at,
            _ => inputs.now,
        };

        let detection = RegimeDetection {
            regime,
            confidence,
            indicators: votes,
            detected_at: inputs.now,
            last_changed_at,
            stable,
        };

        if prev.as_ref().map(|p| p.regime) != Some(regime) {
            info!(regime = %regime, confidence, tied, "regime changed");
        } else {
            debug!(regime = %regime, confidence, "regime re-confirmed");
        }

        *self.state.write() = Some(detection.clone());
        Ok(detection)
    }

    /// Latest detection without recomputing.
    pub fn current(&self) -> Option<RegimeDetection> {
        self.state.read().clone()
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new(RegimeThresholds::default())
    }
}

// =============================================================================
// Vote mechanics
// =============================================================================

fn validate_inputs(inputs: &RegimeInputs) -> ScanResult<()> {
    if inputs.now.timestamp() == 0 {
        return Err(ScanError::InvalidInput("zero detection timestamp".into()));
    }
    if !(0.0..=2.5).contains(&inputs.realized_vol_7d) || !inputs.realized_vol_7d.is_finite() {
        return Err(ScanError::InvalidInput(format!(
            "realized_vol_7d {} outside [0, 2.5]",
            inputs.realized_vol_7d
        )));
    }
    if !(0.0..=1.0).contains(&inputs.pct_above_20ma) || !inputs.pct_above_20ma.is_finite() {
        return Err(ScanError::InvalidInput(format!(
            "pct_above_20ma {} outside [0, 1]",
            inputs.pct_above_20ma
        )));
    }
    if !(-1.0..=1.0).contains(&inputs.breadth_thrust) || !inputs.breadth_thrust.is_finite() {
        return Err(ScanError::InvalidInput(format!(
            "breadth_thrust {} outside [-1, 1]",
            inputs.breadth_thrust
        )));
    }
    Ok(())
}

fn cast_votes(t: &RegimeThresholds, vol: f64, breadth: f64, thrust: f64) -> Vec<SignalVote> {
    let vol_vote = if vol >= t.vol_high {
        Regime::HighVol
    } else if vol <= t.vol_low {
        Regime::TrendingBull
    } else {
        Regime::Choppy
    };

    let breadth_vote = if breadth >= t.breadth_bull {
        Regime::TrendingBull
    } else {
        Regime::Choppy
    };

    let thrust_vote = if thrust >= t.thrust_bull {
        Regime::TrendingBull
    } else if thrust <= t.thrust_bear {
        Regime::HighVol
    } else {
        Regime::Choppy
    };

    vec![
        SignalVote {
            name: "realized_vol_7d".into(),
            value: vol,
            vote: vol_vote,
            weight: 1.0,
        },
        SignalVote {
            name: "pct_above_20ma".into(),
            value: breadth,
            vote: breadth_vote,
            weight: 1.0,
        },
        SignalVote {
            name: "breadth_thrust".into(),
            value: thrust,
            vote: thrust_vote,
            weight: 1.0,
        },
    ]
}

/// One-shot majority vote over raw signal values, shared with the
/// scheduler's regime-refresh job. Returns the winner (`None` on a 1-1-1
/// tie) and the cast votes.
pub fn majority_vote(
    t: &RegimeThresholds,
    vol: f64,
    breadth: f64,
    thrust: f64,
) -> (Option<Regime>, Vec<SignalVote>) {
    let votes = cast_votes(t, vol, breadth, thrust);
    let (winner, _, _) = tally(&votes);
    (winner, votes)
}

/// Returns (winner, winning_votes, tied). `winner` is `None` on a 1-1-1 tie.
fn tally(votes: &[SignalVote]) -> (Option<Regime>, usize, bool) {
    let count =
        |r: Regime| -> usize { votes.iter().filter(|v| v.vote == r).count() };

    let candidates = [Regime::TrendingBull, Regime::Choppy, Regime::HighVol];
    let best = candidates
        .into_iter()
        .map(|r| (r, count(r)))
        .max_by_key(|&(_, c)| c)
        .expect("candidates nonempty");

    if best.1 >= 2 {
        (Some(best.0), best.1, false)
    } else {
        (None, 1, true)
    }
}
