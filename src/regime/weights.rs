// =============================================================================
// Regime weight profiles — allocation across the scored factors
// =============================================================================
//
// Each regime selects one profile. The first four weights (momentum core,
// technical, volume, quality) are the 100 % allocation and must sum to 1.0;
// the social term sits OUTSIDE the allocation as a capped additive bonus.
// MomentumCore is the protected factor and keeps a floor of 0.40 in every
// profile so the scanner stays a momentum scanner in all regimes.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{ScanError, ScanResult};
use crate::regime::detector::Regime;

/// Allowed deviation of the four-factor weight sum from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;
/// Minimum allocation the protected momentum factor may receive.
pub const MIN_MOMENTUM_WEIGHT: f64 = 0.40;
/// Hard cap on the additive social term, in score points.
pub const SOCIAL_HARD_CAP: f64 = 10.0;

/// Weight profile for one regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeWeights {
    pub momentum_core: f64,
    pub technical: f64,
    pub volume: f64,
    pub quality: f64,
    /// Cap applied to the additive social term. Must not exceed
    /// [`SOCIAL_HARD_CAP`].
    pub social_cap: f64,
}

impl RegimeWeights {
    /// Validate the profile invariants. Called for every profile at startup;
    /// violations are fatal.
    pub fn validate(&self, label: &str) -> ScanResult<()> {
        for (name, w) in [
            ("momentum_core", self.momentum_core),
            ("technical", self.technical),
            ("volume", self.volume),
            ("quality", self.quality),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(ScanError::ConfigurationError(format!(
                    "{label}: weight {name} = {w} is not a non-negative finite number"
                )));
            }
        }

        let sum = self.momentum_core + self.technical + self.volume + self.quality;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ScanError::ConfigurationError(format!(
                "{label}: core weights sum to {sum:.6}, expected 1.0 ± {WEIGHT_SUM_TOLERANCE}"
            )));
        }
        if self.momentum_core < MIN_MOMENTUM_WEIGHT {
            return Err(ScanError::ConfigurationError(format!(
                "{label}: momentum_core weight {} is below the {MIN_MOMENTUM_WEIGHT} floor",
                self.momentum_core
            )));
        }
        if !self.social_cap.is_finite() || self.social_cap < 0.0 || self.social_cap > SOCIAL_HARD_CAP
        {
            return Err(ScanError::ConfigurationError(format!(
                "{label}: social_cap {} outside [0, {SOCIAL_HARD_CAP}]",
                self.social_cap
            )));
        }
        Ok(())
    }
}

/// The full set of per-regime profiles, loaded from `config/weights.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsConfig {
    pub profiles: HashMap<String, RegimeWeights>,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "trending_bull".to_string(),
            RegimeWeights {
                momentum_core: 0.50,
                technical: 0.20,
                volume: 0.20,
                quality: 0.10,
                social_cap: 10.0,
            },
        );
        profiles.insert(
            "choppy".to_string(),
            RegimeWeights {
                momentum_core: 0.40,
                technical: 0.25,
                volume: 0.20,
                quality: 0.15,
                social_cap: 10.0,
            },
        );
        profiles.insert(
            "high_vol".to_string(),
            RegimeWeights {
                momentum_core: 0.45,
                technical: 0.15,
                volume: 0.20,
                quality: 0.20,
                social_cap: 10.0,
            },
        );
        Self { profiles }
    }
}

impl WeightsConfig {
    /// Validate every profile and require the three canonical regimes to be
    /// present.
    pub fn validate(&self) -> ScanResult<()> {
        for canonical in ["trending_bull", "choppy", "high_vol"] {
            if !self.profiles.contains_key(canonical) {
                return Err(ScanError::ConfigurationError(format!(
                    "weights config is missing the '{canonical}' profile"
                )));
            }
        }
        for (label, profile) in &self.profiles {
            // Profile keys must parse as regimes (aliases allowed).
            Regime::parse(label).map_err(|_| {
                ScanError::ConfigurationError(format!("unknown regime profile '{label}'"))
            })?;
            profile.validate(label)?;
        }
        Ok(())
    }

    /// Profile lookup for a detected regime.
    pub fn for_regime(&self, regime: Regime) -> ScanResult<RegimeWeights> {
        self.profiles
            .get(&regime.to_string())
            .copied()
            .ok_or_else(|| {
                ScanError::InvalidInput(format!("no weight profile for regime '{regime}'"))
            })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profiles_validate() {
        let cfg = WeightsConfig::default();
        cfg.validate().unwrap();
    }

    #[test]
    fn default_profiles_satisfy_invariants() {
        let cfg = WeightsConfig::default();
        for (label, p) in &cfg.profiles {
            let sum = p.momentum_core + p.technical + p.volume + p.quality;
            assert!(
                (sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE,
                "{label}: sum {sum}"
            );
            assert!(p.momentum_core >= MIN_MOMENTUM_WEIGHT, "{label}");
            assert!(p.social_cap <= SOCIAL_HARD_CAP, "{label}");
        }
    }

    #[test]
    fn bad_sum_rejected() {
        let w = RegimeWeights {
            momentum_core: 0.50,
            technical: 0.30,
            volume: 0.20,
            quality: 0.10,
            social_cap: 10.0,
        };
        let err = w.validate("test").unwrap_err();
        assert_eq!(err.kind(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn momentum_floor_enforced() {
        let w = RegimeWeights {
            momentum_core: 0.30,
            technical: 0.30,
            volume: 0.20,
            quality: 0.20,
            social_cap: 10.0,
        };
        assert!(w.validate("test").is_err());
    }

    #[test]
    fn social_cap_bounded() {
        let w = RegimeWeights {
            momentum_core: 0.40,
            technical: 0.25,
            volume: 0.20,
            quality: 0.15,
            social_cap: 12.0,
        };
        assert!(w.validate("test").is_err());
    }

    #[test]
    fn negative_weight_rejected() {
        let w = RegimeWeights {
            momentum_core: 0.60,
            technical: -0.05,
            volume: 0.25,
            quality: 0.20,
            social_cap: 10.0,
        };
        assert!(w.validate("test").is_err());
    }

    #[test]
    fn missing_profile_is_config_error() {
        let mut cfg = WeightsConfig::default();
        cfg.profiles.remove("choppy");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn lookup_by_regime() {
        let cfg = WeightsConfig::default();
        let w = cfg.for_regime(Regime::TrendingBull).unwrap();
        assert!((w.momentum_core - 0.50).abs() < 1e-12);
        assert!(cfg.for_regime(Regime::HighVol).is_ok());
    }

    #[test]
    fn yaml_roundtrip() {
        let cfg = WeightsConfig::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: WeightsConfig = serde_yaml::from_str(&yaml).unwrap();
        parsed.validate().unwrap();
        assert_eq!(
            parsed.for_regime(Regime::Choppy).unwrap(),
            cfg.for_regime(Regime::Choppy).unwrap()
        );
    }
}
