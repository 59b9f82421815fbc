pub mod composite;
pub mod measurements;
pub mod orthogonal;

pub use composite::{CompositeScore, CompositeScorer, FactorSet, WeightedBreakdown};
pub use measurements::{MeasurementSnapshot, MeasurementsBoost};
pub use orthogonal::{residualize, FactorVector};
