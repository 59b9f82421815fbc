pub mod atr;
pub mod momentum;
pub mod rsi;

pub use atr::calculate_atr;
pub use momentum::{momentum_core, pct_above_ma, realized_vol, rate_of_change};
pub use rsi::current_rsi;

use serde::{Deserialize, Serialize};

/// A single OHLCV bar used for factor assembly. Bars arrive oldest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time, Unix milliseconds.
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Extract the close series from a bar slice, preserving order.
pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}
