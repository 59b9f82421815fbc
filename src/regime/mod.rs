pub mod detector;
pub mod weights;

pub use detector::{
    majority_vote, Regime, RegimeDetection, RegimeDetector, RegimeInputs, RegimeThresholds,
    SignalVote,
};
pub use weights::{RegimeWeights, WeightsConfig, MIN_MOMENTUM_WEIGHT, SOCIAL_HARD_CAP};
