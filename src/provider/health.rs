// =============================================================================
// Provider health — success rates and latency percentiles per venue
// =============================================================================
//
// Every facade request records (venue, latency, outcome) here. The tracker
// derives the ProviderHealth snapshot consumed by the scheduler's
// provider-health job, the QA report, and the late-fill gate (p99).
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::provider::circuit::CircuitState;
use crate::provider::rate_limit::BudgetSnapshot;

/// Latency samples retained per venue.
const LATENCY_WINDOW: usize = 256;

/// Success rate below which a venue is considered degraded.
const DEGRADED_SUCCESS_RATE: f64 = 0.80;

// =============================================================================
// Health snapshot
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub venue: String,
    /// Successes / total over the observation window, in [0, 1].
    pub success_rate: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub budget_remaining: u64,
    /// Highest bucket usage fraction, [0, 1+].
    pub usage: f64,
    pub degraded: bool,
    /// Required whenever `degraded` is true.
    pub degraded_reason: Option<String>,
    pub circuit_state: CircuitState,
}

impl ProviderHealth {
    pub fn healthy(&self) -> bool {
        !self.degraded && self.circuit_state == CircuitState::Closed
    }
}

// =============================================================================
// Tracker
// =============================================================================

#[derive(Debug, Default)]
struct VenueStats {
    successes: u64,
    failures: u64,
    latencies_ms: VecDeque<f64>,
}

impl VenueStats {
    fn record(&mut self, latency_ms: f64, ok: bool) {
        if ok {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency_ms);
    }

    fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            1.0
        } else {
            self.successes as f64 / total as f64
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.latencies_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

/// Process-wide observation store, one stats block per venue.
#[derive(Default)]
pub struct ProviderHealthTracker {
    stats: Mutex<HashMap<String, VenueStats>>,
}

impl ProviderHealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, venue: &str, latency_ms: f64, ok: bool) {
        self.stats
            .lock()
            .entry(venue.to_string())
            .or_default()
            .record(latency_ms, ok);
    }

    /// p99 latency for the late-fill gate; 0 when unobserved.
    pub fn p99(&self, venue: &str) -> f64 {
        self.stats
            .lock()
            .get(venue)
            .map(|s| s.percentile(0.99))
            .unwrap_or(0.0)
    }

    /// Derive the health snapshot for one venue from recorded observations,
    /// the current budget, and the circuit state.
    pub fn health(
        &self,
        venue: &str,
        budget: &BudgetSnapshot,
        circuit_state: CircuitState,
    ) -> ProviderHealth {
        let stats = self.stats.lock();
        let s = stats.get(venue);

        let success_rate = s.map(|s| s.success_rate()).unwrap_or(1.0);
        let p50 = s.map(|s| s.percentile(0.50)).unwrap_or(0.0);
        let p95 = s.map(|s| s.percentile(0.95)).unwrap_or(0.0);
        let p99 = s.map(|s| s.percentile(0.99)).unwrap_or(0.0);

        let usage = budget.usage();
        let (degraded, degraded_reason) = if circuit_state != CircuitState::Closed {
            (true, Some(format!("circuit_{}", circuit_state.to_string().to_lowercase())))
        } else if usage >= 1.0 {
            (true, Some("budget_exceeded".to_string()))
        } else if success_rate < DEGRADED_SUCCESS_RATE {
            (true, Some(format!("success_rate_{success_rate:.2}")))
        } else {
            (false, None)
        };

        ProviderHealth {
            venue: venue.to_string(),
            success_rate,
            latency_p50_ms: p50,
            latency_p95_ms: p95,
            latency_p99_ms: p99,
            budget_remaining: budget.monthly_remaining,
            usage,
            degraded,
            degraded_reason,
            circuit_state,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn budget(rpm_remaining: u32, monthly_remaining: u64) -> BudgetSnapshot {
        BudgetSnapshot {
            rpm_remaining,
            rpm_capacity: 60,
            monthly_remaining,
            monthly_capacity: 1_000,
        }
    }

    #[test]
    fn unobserved_venue_is_healthy() {
        let tracker = ProviderHealthTracker::new();
        let h = tracker.health("kraken", &budget(60, 1_000), CircuitState::Closed);
        assert!(h.healthy());
        assert!((h.success_rate - 1.0).abs() < 1e-12);
        assert!(h.degraded_reason.is_none());
    }

    #[test]
    fn percentiles_from_recorded_latencies() {
        let tracker = ProviderHealthTracker::new();
        for i in 1..=100 {
            tracker.record("kraken", i as f64, true);
        }
        let h = tracker.health("kraken", &budget(60, 1_000), CircuitState::Closed);
        assert!((h.latency_p50_ms - 50.0).abs() <= 1.0);
        assert!((h.latency_p95_ms - 95.0).abs() <= 1.0);
        assert!((h.latency_p99_ms - 99.0).abs() <= 1.0);
        assert!(h.latency_p50_ms <= h.latency_p95_ms);
        assert!(h.latency_p95_ms <= h.latency_p99_ms);
    }

    #[test]
    fn low_success_rate_degrades_with_reason() {
        let tracker = ProviderHealthTracker::new();
        for _ in 0..7 {
            tracker.record("kraken", 100.0, true);
        }
        for _ in 0..3 {
            tracker.record("kraken", 100.0, false);
        }
        let h = tracker.health("kraken", &budget(60, 1_000), CircuitState::Closed);
        assert!(h.degraded);
        assert!(h.degraded_reason.is_some());
        assert!((h.success_rate - 0.7).abs() < 1e-12);
    }

    #[test]
    fn open_circuit_degrades() {
        let tracker = ProviderHealthTracker::new();
        let h = tracker.health("kraken", &budget(60, 1_000), CircuitState::Open);
        assert!(h.degraded);
        assert_eq!(h.degraded_reason.as_deref(), Some("circuit_open"));
        assert!(!h.healthy());
    }

    #[test]
    fn exhausted_budget_degrades() {
        let tracker = ProviderHealthTracker::new();
        let h = tracker.health("kraken", &budget(0, 0), CircuitState::Closed);
        assert!(h.degraded);
        assert_eq!(h.degraded_reason.as_deref(), Some("budget_exceeded"));
    }

    #[test]
    fn degraded_always_carries_reason() {
        let tracker = ProviderHealthTracker::new();
        for circuit in [CircuitState::Open, CircuitState::HalfOpen] {
            let h = tracker.health("kraken", &budget(60, 1_000), circuit);
            assert!(h.degraded);
            assert!(h.degraded_reason.is_some(), "{circuit:?} missing reason");
        }
    }

    #[test]
    fn latency_window_is_bounded() {
        let tracker = ProviderHealthTracker::new();
        for i in 0..LATENCY_WINDOW + 500 {
            tracker.record("kraken", i as f64, true);
        }
        // Early cheap samples have been evicted, so p50 reflects the tail.
        let h = tracker.health("kraken", &budget(60, 1_000), CircuitState::Closed);
        assert!(h.latency_p50_ms >= 500.0);
    }

    #[test]
    fn p99_helper_matches_health() {
        let tracker = ProviderHealthTracker::new();
        for i in 1..=100 {
            tracker.record("kraken", i as f64, true);
        }
        let p99 = tracker.p99("kraken");
        let h = tracker.health("kraken", &budget(60, 1_000), CircuitState::Closed);
        assert!((p99 - h.latency_p99_ms).abs() < 1e-12);
        assert_eq!(tracker.p99("ghost"), 0.0);
    }
}
