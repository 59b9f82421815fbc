// =============================================================================
// Measurements boost — funding / open-interest / ETF derivative signals
// =============================================================================
//
// Derivative-market dislocations earn a small additive bonus on top of the
// composite score. Each signal maps to integer-ish tiers; the combined boost
// is capped at 4.0 so derivatives can nudge a ranking but never dominate the
// weighted factor core.
//
//   funding z-score   |z| >= 2.5 -> +2.0   |z| >= 2.0 -> +1.0
//   OI residual       |r| >= 2e6 -> +1.5   |r| >= 1e6 -> +0.5
//   ETF tint          |t| >= 0.015 -> +1.0 |t| >= 0.010 -> +0.5
// =============================================================================

use serde::{Deserialize, Serialize};

/// Combined boost ceiling, in score points.
pub const MEASUREMENTS_BOOST_CAP: f64 = 4.0;

/// Raw derivative-market readings for one symbol.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MeasurementSnapshot {
    /// Funding-rate divergence z-score versus the trailing window.
    pub funding_z: f64,
    /// Open-interest residual in USD after removing the price-driven
    /// component.
    pub oi_residual: f64,
    /// Net ETF flow tint as a fraction of ADV.
    pub etf_tint: f64,
}

/// Per-signal boost attribution plus the capped total.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MeasurementsBoost {
    pub funding: f64,
    pub oi: f64,
    pub etf: f64,
    pub total: f64,
}

impl MeasurementsBoost {
    /// Tier the raw readings into a capped additive boost.
    pub fn from_snapshot(snap: &MeasurementSnapshot) -> Self {
        let funding: f64 = match snap.funding_z.abs() {
            z if z >= 2.5 => 2.0,
            z if z >= 2.0 => 1.0,
            _ => 0.0,
        };
        let oi: f64 = match snap.oi_residual.abs() {
            r if r >= 2_000_000.0 => 1.5,
            r if r >= 1_000_000.0 => 0.5,
            _ => 0.0,
        };
        let etf: f64 = match snap.etf_tint.abs() {
            t if t >= 0.015 => 1.0,
            t if t >= 0.010 => 0.5,
            _ => 0.0,
        };
        let total = (funding + oi + etf).min(MEASUREMENTS_BOOST_CAP);
        Self {
            funding,
            oi,
            etf,
            total,
        }
    }
}
