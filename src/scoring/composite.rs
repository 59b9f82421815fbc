// =============================================================================
// Unified Composite Scorer — residualized factor blend with social cap
// =============================================================================
//
// Scoring contract:
//
//   final = Σ(weight_i · residual_i) + clamp(social, -cap, +cap) + boost
//
// The factor tuple is residualized in the fixed order [MomentumCore,
// Technical, Volume, Quality] with MomentumCore protected. Social is never
// orthogonalized and never part of the 100 % allocation: it is clamped to
// the profile cap and added on top, as is the measurements boost (≤ 4.0).
//
// Each factor arrives as a window of readings (latest last); the scored
// scalar is the latest residual reading, so the protected factor's scalar is
// exactly the latest raw momentum reading.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ScanError, ScanResult};
use crate::regime::detector::Regime;
use crate::regime::weights::WeightsConfig;
use crate::scoring::measurements::{MeasurementSnapshot, MeasurementsBoost};
use crate::scoring::orthogonal::{residualize, FactorVector};

// =============================================================================
// Input / output types
// =============================================================================

/// Per-symbol scoring input: windowed factor readings plus the social scalar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorSet {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    /// Protected factor; always first in the orthogonalization order.
    pub momentum_core: Vec<f64>,
    pub technical: Vec<f64>,
    pub volume: Vec<f64>,
    pub quality: Vec<f64>,
    /// Social/brand scalar. Clamped, additive, never residualized.
    pub social: f64,
}

/// Weighted contribution of each allocated factor to the composite.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WeightedBreakdown {
    pub momentum_core: f64,
    pub technical: f64,
    pub volume: f64,
    pub quality: f64,
}

/// Fully attributed score for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeScore {
    pub symbol: String,
    pub regime: Regime,
    /// Latest protected momentum reading, identical to the input.
    pub momentum_core: f64,
    /// Weighted blend over the RAW latest readings (before residualization).
    pub pre_orthogonal: f64,
    /// Weighted blend over the residualized latest readings.
    pub post_orthogonal: f64,
    pub weighted_breakdown: WeightedBreakdown,
    /// Social after the hard clamp.
    pub social_clamped: f64,
    pub boost: MeasurementsBoost,
    pub final_score: f64,
    /// 1-based rank within the scored batch; 0 until ranked.
    pub rank: usize,
}

// =============================================================================
// Scorer
// =============================================================================

pub struct CompositeScorer {
    weights: WeightsConfig,
}

impl CompositeScorer {
    /// Construction validates every weight profile; invalid configurations
    /// never produce a scorer.
    pub fn new(weights: WeightsConfig) -> ScanResult<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    /// Score a single symbol under the given regime.
    pub fn score(
        &self,
        factors: &FactorSet,
        measurements: &MeasurementSnapshot,
        regime: Regime,
    ) -> ScanResult<CompositeScore> {
        if !factors.social.is_finite() {
            return Err(ScanError::InvalidInput(format!(
                "{}: non-finite social factor",
                factors.symbol
            )));
        }

        let profile = self.weights.for_regime(regime)?;

        let tuple = vec![
            FactorVector::protected("momentum_core", factors.momentum_core.clone()),
            FactorVector::new("technical", factors.technical.clone()),
            FactorVector::new("volume", factors.volume.clone()),
            FactorVector::new("quality", factors.quality.clone()),
        ];
        let residuals = residualize(&tuple)
            .map_err(|e| ScanError::InvalidInput(format!("{}: {e}", factors.symbol)))?;

        let latest = |v: &FactorVector| *v.values.last().expect("residualize rejects empty");
        let raw_latest =
            |v: &[f64]| *v.last().expect("residualize rejected empty vectors already");

        let momentum_core = latest(&residuals[0]);
        let breakdown = WeightedBreakdown {
            momentum_core: profile.momentum_core * momentum_core,
            technical: profile.technical * latest(&residuals[1]),
            volume: profile.volume * latest(&residuals[2]),
            quality: profile.quality * latest(&residuals[3]),
        };
        let post_orthogonal =
            breakdown.momentum_core + breakdown.technical + breakdown.volume + breakdown.quality;

        let pre_orthogonal = profile.momentum_core * raw_latest(&factors.momentum_core)
            + profile.technical * raw_latest(&factors.technical)
            + profile.volume * raw_latest(&factors.volume)
            + profile.quality * raw_latest(&factors.quality);

        let social_clamped = factors.social.clamp(-profile.social_cap, profile.social_cap);
        let boost = MeasurementsBoost::from_snapshot(measurements);
        let final_score = post_orthogonal + social_clamped + boost.total;

        debug!(
            symbol = %factors.symbol,
            regime = %regime,
            final_score,
            post_orthogonal,
            social_clamped,
            boost = boost.total,
            "symbol scored"
        );

        Ok(CompositeScore {
            symbol: factors.symbol.clone(),
            regime,
            momentum_core,
            pre_orthogonal,
            post_orthogonal,
            weighted_breakdown: breakdown,
            social_clamped,
            boost,
            final_score,
            rank: 0,
        })
    }

    /// Score a batch. Per-symbol failures land in the error map and never
    /// abort peers; successes come back ranked.
    pub fn score_batch(
        &self,
        sets: &[FactorSet],
        measurements: &HashMap<String, MeasurementSnapshot>,
        regime: Regime,
    ) -> (Vec<CompositeScore>, HashMap<String, ScanError>) {
        let mut scores = Vec::with_capacity(sets.len());
        let mut errors = HashMap::new();

        for set in sets {
            let snap = measurements.get(&set.symbol).copied().unwrap_or_default();
            match self.score(set, &snap, regime) {
                Ok(score) => scores.push(score),
                Err(e) => {
                    errors.insert(set.symbol.clone(), e);
                }
            }
        }

        rank_scores(&mut scores);
        (scores, errors)
    }
}

/// Sort by final score descending with lexicographic symbol tie-break, then
/// assign 1-based ranks.
pub fn rank_scores(scores: &mut [CompositeScore]) {
    scores.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    for (i, s) in scores.iter_mut().enumerate() {
        s.rank = i + 1;
    }
}
