// =============================================================================
// Momentum & regime-input statistics
// =============================================================================
//
// The momentum core blends rate-of-change over four hourly look-backs:
//
//   window  1h   4h   12h   24h
//   weight  0.20 0.35 0.30  0.15
//
// The blend favors the 4h/12h mid-band so a single hot hour cannot dominate
// the protected factor. Regime inputs (realized vol, share of closes above
// the 20-period MA) are computed here as well since they share the same
// close-series plumbing.
// =============================================================================

/// (look-back in bars, blend weight) pairs for the momentum core.
const MOMENTUM_WINDOWS: [(usize, f64); 4] = [(1, 0.20), (4, 0.35), (12, 0.30), (24, 0.15)];

/// Percentage rate of change over `period` bars:
/// `((close - close_n) / close_n) * 100`.
///
/// Returns one value per close starting at index `period`; a zero base close
/// contributes 0.0 rather than poisoning the series.
pub fn rate_of_change(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(closes.len() - period);
    for i in period..closes.len() {
        let base = closes[i - period];
        if base == 0.0 {
            result.push(0.0);
        } else {
            result.push((closes[i] - base) / base * 100.0);
        }
    }
    result
}

/// Weighted multi-window momentum core over hourly closes (oldest first).
///
/// Returns `None` when the series is too short for the longest window.
pub fn momentum_core(hourly_closes: &[f64]) -> Option<f64> {
    let longest = MOMENTUM_WINDOWS.iter().map(|(w, _)| *w).max().unwrap_or(0);
    if hourly_closes.len() <= longest {
        return None;
    }

    let mut blended = 0.0;
    for (window, weight) in MOMENTUM_WINDOWS {
        let roc = rate_of_change(hourly_closes, window);
        blended += weight * roc.last().copied()?;
    }

    blended.is_finite().then_some(blended)
}

/// Annualization-free realized volatility: standard deviation of simple
/// returns over the slice. Feeds the regime detector's `realized_vol_7d`
/// input when computed on 7 days of hourly closes.
pub fn realized_vol(closes: &[f64]) -> Option<f64> {
    if closes.len() < 2 {
        return None;
    }

    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.is_empty() {
        return None;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let vol = var.sqrt();

    vol.is_finite().then_some(vol)
}

/// Share of the trailing `window` closes sitting above the `ma_period`
/// simple moving average, in [0, 1]. Feeds the regime detector's
/// `pct_above_20ma` input.
pub fn pct_above_ma(closes: &[f64], ma_period: usize, window: usize) -> Option<f64> {
    if ma_period == 0 || window == 0 || closes.len() < ma_period + window {
        return None;
    }

    let mut above = 0usize;
    let start = closes.len() - window;
    for i in start..closes.len() {
        let ma: f64 = closes[i + 1 - ma_period..=i].iter().sum::<f64>() / ma_period as f64;
        if closes[i] > ma {
            above += 1;
        }
    }

    Some(above as f64 / window as f64)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roc_linear_series() {
        let closes: Vec<f64> = (1..=20).map(f64::from).collect();
        let roc = rate_of_change(&closes, 14);
        assert!((roc[0] - 1400.0).abs() < 1e-10);
    }

    #[test]
    fn roc_insufficient_data() {
        assert!(rate_of_change(&[1.0, 2.0, 3.0], 14).is_empty());
        assert!(rate_of_change(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn roc_zero_base_contributes_zero() {
        let closes = vec![0.0, 5.0, 10.0];
        let roc = rate_of_change(&closes, 2);
        assert!((roc[0] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn momentum_core_needs_25_closes() {
        let closes: Vec<f64> = (1..=24).map(f64::from).collect();
        assert!(momentum_core(&closes).is_none());

        let closes: Vec<f64> = (1..=25).map(f64::from).collect();
        assert!(momentum_core(&closes).is_some());
    }

    #[test]
    fn momentum_core_sign_follows_trend() {
        let rising: Vec<f64> = (1..=48).map(f64::from).collect();
        assert!(momentum_core(&rising).unwrap() > 0.0);

        let falling: Vec<f64> = (1..=48).rev().map(f64::from).collect();
        assert!(momentum_core(&falling).unwrap() < 0.0);

        let flat = vec![100.0; 48];
        assert!(momentum_core(&flat).unwrap().abs() < 1e-12);
    }

    #[test]
    fn realized_vol_flat_is_zero() {
        let vol = realized_vol(&vec![100.0; 50]).unwrap();
        assert!(vol.abs() < 1e-12);
    }

    #[test]
    fn realized_vol_grows_with_swing_size() {
        let calm: Vec<f64> = (0..50).map(|i| 100.0 + (i % 2) as f64 * 0.1).collect();
        let wild: Vec<f64> = (0..50).map(|i| 100.0 + (i % 2) as f64 * 10.0).collect();
        assert!(realized_vol(&wild).unwrap() > realized_vol(&calm).unwrap());
    }

    #[test]
    fn realized_vol_insufficient() {
        assert!(realized_vol(&[100.0]).is_none());
        assert!(realized_vol(&[]).is_none());
    }

    #[test]
    fn pct_above_ma_uptrend_is_high() {
        let closes: Vec<f64> = (1..=60).map(f64::from).collect();
        let pct = pct_above_ma(&closes, 20, 30).unwrap();
        assert!((pct - 1.0).abs() < 1e-12);
    }

    #[test]
    fn pct_above_ma_downtrend_is_low() {
        let closes: Vec<f64> = (1..=60).rev().map(f64::from).collect();
        let pct = pct_above_ma(&closes, 20, 30).unwrap();
        assert!(pct.abs() < 1e-12);
    }

    #[test]
    fn pct_above_ma_bounds_checked() {
        let closes: Vec<f64> = (1..=30).map(f64::from).collect();
        assert!(pct_above_ma(&closes, 20, 30).is_none());
        assert!(pct_above_ma(&closes, 0, 5).is_none());
        assert!(pct_above_ma(&closes, 20, 0).is_none());
    }
}
