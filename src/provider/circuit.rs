// =============================================================================
// Circuit breaker — per-venue three-state machine
// =============================================================================
//
//   CLOSED    -> OPEN       after `failure_threshold` consecutive failures
//   OPEN      -> HALF_OPEN  after the cool-down elapses
//   HALF_OPEN -> CLOSED     on probe success
//   HALF_OPEN -> OPEN       on probe failure
//
// HALF_OPEN admits exactly one probe: the first caller through
// `allow_request` wins the probe slot, everyone else is refused until the
// probe resolves. State transitions are serialized by a single mutex per
// breaker, so observers never see a torn state.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    /// Consecutive failures (or 5xx streak) that trip the breaker.
    pub failure_threshold: u32,
    /// Time in OPEN before a probe is allowed.
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-venue breaker. Cheap to share behind an `Arc`.
pub struct CircuitBreaker {
    venue: String,
    cfg: CircuitConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(venue: impl Into<String>, cfg: CircuitConfig) -> Self {
        Self {
            venue: venue.into(),
            cfg,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a request may proceed at `now`. In OPEN past the cool-down
    /// the breaker moves to HALF_OPEN and grants the single probe slot.
    pub fn allow_request(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|t| now.duration_since(t) >= self.cfg.cooldown)
                    .unwrap_or(true);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(venue = %self.venue, "circuit HALF_OPEN, probe granted");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful request. Closes a half-open breaker and clears
    /// the failure streak.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(venue = %self.venue, from = %inner.state, "circuit CLOSED");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    /// Record a failed request (transport error or 5xx). Trips the breaker
    /// at the threshold; a failed half-open probe re-opens immediately.
    pub fn on_failure(&self, now: Instant) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                warn!(venue = %self.venue, "probe failed, circuit re-OPEN");
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.cfg.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        venue = %self.venue,
                        failures = inner.consecutive_failures,
                        "failure streak tripped circuit OPEN"
                    );
                }
            }
            CircuitState::Open => {
                inner.consecutive_failures += 1;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "kraken",
            CircuitConfig {
                failure_threshold: 3,
                cooldown: Duration::from_secs(30),
            },
        )
    }

    #[test]
    fn starts_closed_and_allows() {
        let cb = breaker();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request(Instant::now()));
    }

    #[test]
    fn failure_streak_trips_open() {
        let cb = breaker();
        let now = Instant::now();
        cb.on_failure(now);
        cb.on_failure(now);
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.on_failure(now);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request(now));
    }

    #[test]
    fn success_resets_streak() {
        let cb = breaker();
        let now = Instant::now();
        cb.on_failure(now);
        cb.on_failure(now);
        cb.on_success();
        cb.on_failure(now);
        cb.on_failure(now);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn cooldown_grants_exactly_one_probe() {
        let cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.on_failure(t0);
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Before cool-down: refused.
        assert!(!cb.allow_request(t0 + Duration::from_secs(10)));

        // After cool-down: a single probe allowed.
        let t1 = t0 + Duration::from_secs(31);
        assert!(cb.allow_request(t1));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Concurrent second caller is refused while the probe is in flight.
        assert!(!cb.allow_request(t1));
    }

    #[test]
    fn probe_success_closes() {
        let cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.on_failure(t0);
        }
        let t1 = t0 + Duration::from_secs(31);
        assert!(cb.allow_request(t1));

        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request(t1));
    }

    #[test]
    fn probe_failure_reopens() {
        let cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.on_failure(t0);
        }
        let t1 = t0 + Duration::from_secs(31);
        assert!(cb.allow_request(t1));

        cb.on_failure(t1);
        assert_eq!(cb.state(), CircuitState::Open);

        // Cool-down restarts from the re-open.
        assert!(!cb.allow_request(t1 + Duration::from_secs(10)));
        assert!(cb.allow_request(t1 + Duration::from_secs(31)));
    }

    #[test]
    fn state_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"HALF_OPEN\""
        );
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
    }
}
