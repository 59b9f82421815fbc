// =============================================================================
// Rate Limiter & Provider Budget Guard — per-venue token buckets
// =============================================================================
//
// Each venue carries two buckets (requests-per-minute and monthly quota), an
// exponential-backoff counter, a Retry-After floor, and a concurrency
// semaphore. Venues are fully isolated: consuming from one never touches
// another's state.
//
// `check_budget` is atomic over both buckets: it either decrements both or
// refuses without mutating either. Refusals surface as
// PROVIDER_DEGRADED/budget_exceeded so callers route to the fallback venue.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::{BackoffConfig, LimitsConfig, VenueLimits};
use crate::errors::{DegradedReason, ScanError, ScanResult};

/// Length of the RPM bucket window.
const RPM_WINDOW: Duration = Duration::from_secs(60);

// =============================================================================
// Per-venue state
// =============================================================================

#[derive(Debug)]
struct Buckets {
    rpm_capacity: u32,
    rpm_remaining: u32,
    window_started: Instant,
    monthly_capacity: u64,
    monthly_remaining: u64,
    /// Attempt counter for exponential backoff; reset on success.
    backoff_attempt: u32,
    /// Floor from a Retry-After header, applied to the next backoff.
    retry_after_floor: Option<Duration>,
}

struct VenueState {
    buckets: Mutex<Buckets>,
    semaphore: Arc<Semaphore>,
}

/// Remaining budget after a consumption attempt.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BudgetSnapshot {
    pub rpm_remaining: u32,
    pub rpm_capacity: u32,
    pub monthly_remaining: u64,
    pub monthly_capacity: u64,
}

impl BudgetSnapshot {
    /// Highest usage fraction across both buckets, in [0, 1+].
    pub fn usage(&self) -> f64 {
        let rpm_used = 1.0 - self.rpm_remaining as f64 / self.rpm_capacity.max(1) as f64;
        let monthly_used =
            1.0 - self.monthly_remaining as f64 / self.monthly_capacity.max(1) as f64;
        rpm_used.max(monthly_used)
    }
}

// =============================================================================
// RateLimiter
// =============================================================================

pub struct RateLimiter {
    venues: RwLock<HashMap<String, Arc<VenueState>>>,
    backoff: BackoffConfig,
}

impl RateLimiter {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            venues: RwLock::new(HashMap::new()),
            backoff,
        }
    }

    /// Build a limiter with every venue from the limits config registered.
    pub fn from_limits(limits: &LimitsConfig) -> Self {
        let limiter = Self::new(limits.backoff);
        for (venue, vl) in &limits.venues {
            limiter.register(venue, vl);
        }
        limiter
    }

    pub fn register(&self, venue: &str, limits: &VenueLimits) {
        let state = Arc::new(VenueState {
            buckets: Mutex::new(Buckets {
                rpm_capacity: limits.rpm,
                rpm_remaining: limits.rpm,
                window_started: Instant::now(),
                monthly_capacity: limits.monthly,
                monthly_remaining: limits.monthly,
                backoff_attempt: 0,
                retry_after_floor: None,
            }),
            semaphore: Arc::new(Semaphore::new(limits.max_concurrency)),
        });
        self.venues.write().insert(venue.to_string(), state);
        debug!(venue, rpm = limits.rpm, monthly = limits.monthly, "venue registered");
    }

    fn venue(&self, venue: &str) -> ScanResult<Arc<VenueState>> {
        self.venues
            .read()
            .get(venue)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(format!("venue '{venue}' not registered")))
    }

    // -------------------------------------------------------------------------
    // Budget
    // -------------------------------------------------------------------------

    /// Atomically consume `cost` from both buckets, or refuse without
    /// mutation when either would go negative.
    pub fn check_budget(&self, venue: &str, cost: u32) -> ScanResult<BudgetSnapshot> {
        let state = self.venue(venue)?;
        let mut buckets = state.buckets.lock();

        // Refill the RPM window when it has elapsed.
        if buckets.window_started.elapsed() >= RPM_WINDOW {
            buckets.rpm_remaining = buckets.rpm_capacity;
            buckets.window_started = Instant::now();
        }

        if buckets.rpm_remaining < cost || buckets.monthly_remaining < cost as u64 {
            let snap = snapshot(&buckets);
            warn!(
                venue,
                cost,
                rpm_remaining = snap.rpm_remaining,
                monthly_remaining = snap.monthly_remaining,
                "budget refused"
            );
            return Err(ScanError::degraded(
                DegradedReason::BudgetExceeded,
                format!(
                    "venue '{venue}': cost {cost} exceeds remaining budget (rpm {}, monthly {})",
                    snap.rpm_remaining, snap.monthly_remaining
                ),
            ));
        }

        buckets.rpm_remaining -= cost;
        buckets.monthly_remaining -= cost as u64;
        Ok(snapshot(&buckets))
    }

    /// Current budget without consuming.
    pub fn budget(&self, venue: &str) -> ScanResult<BudgetSnapshot> {
        let state = self.venue(venue)?;
        let mut buckets = state.buckets.lock();
        if buckets.window_started.elapsed() >= RPM_WINDOW {
            buckets.rpm_remaining = buckets.rpm_capacity;
            buckets.window_started = Instant::now();
        }
        Ok(snapshot(&buckets))
    }

    // -------------------------------------------------------------------------
    // Backoff
    // -------------------------------------------------------------------------

    /// Exponential backoff for the given attempt: base × 2^attempt capped,
    /// plus uniform jitter, floored by any recorded Retry-After.
    pub fn backoff(&self, venue: &str, attempt: u32) -> ScanResult<Duration> {
        let state = self.venue(venue)?;
        let mut buckets = state.buckets.lock();
        buckets.backoff_attempt = attempt;

        let exp = self
            .backoff
            .base_ms
            .saturating_mul(1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX))
            .min(self.backoff.max_ms);

        let jitter = if self.backoff.jitter_max_ms > self.backoff.jitter_min_ms {
            rand::thread_rng().gen_range(self.backoff.jitter_min_ms..=self.backoff.jitter_max_ms)
        } else {
            self.backoff.jitter_min_ms
        };

        let mut delay = Duration::from_millis(exp + jitter);
        if let Some(floor) = buckets.retry_after_floor.take() {
            delay = delay.max(floor);
        }
        Ok(delay)
    }

    /// Record a 429 Retry-After (seconds) as a floor on the next backoff.
    pub fn record_retry_after(&self, venue: &str, seconds: u64) -> ScanResult<()> {
        let state = self.venue(venue)?;
        state.buckets.lock().retry_after_floor = Some(Duration::from_secs(seconds));
        Ok(())
    }

    /// Reset the backoff sequence after any success.
    pub fn reset_backoff(&self, venue: &str) -> ScanResult<()> {
        let state = self.venue(venue)?;
        let mut buckets = state.buckets.lock();
        buckets.backoff_attempt = 0;
        buckets.retry_after_floor = None;
        Ok(())
    }

    pub fn backoff_attempt(&self, venue: &str) -> ScanResult<u32> {
        Ok(self.venue(venue)?.buckets.lock().backoff_attempt)
    }

    // -------------------------------------------------------------------------
    // Concurrency
    // -------------------------------------------------------------------------

    /// Acquire a concurrency slot, failing fast with a recoverable error
    /// when the deadline would be exceeded. Dropping the permit (including
    /// on cancellation) releases the slot.
    pub async fn acquire(
        &self,
        venue: &str,
        deadline: Duration,
    ) -> ScanResult<OwnedSemaphorePermit> {
        let state = self.venue(venue)?;
        let semaphore = state.semaphore.clone();

        match tokio::time::timeout(deadline, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(ScanError::degraded(
                DegradedReason::RateLimited,
                format!("venue '{venue}': semaphore closed"),
            )),
            Err(_) => Err(ScanError::Timeout(format!(
                "venue '{venue}': no concurrency slot within {deadline:?}"
            ))),
        }
    }
}

fn snapshot(b: &Buckets) -> BudgetSnapshot {
    BudgetSnapshot {
        rpm_remaining: b.rpm_remaining,
        rpm_capacity: b.rpm_capacity,
        monthly_remaining: b.monthly_remaining,
        monthly_capacity: b.monthly_capacity,
    }
}

// =============================================================================
// Rate-limit header parsing
// =============================================================================

/// Parse `X-Ratelimit-Remaining` and `X-Ratelimit-Reset` (Unix seconds) from
/// a response. Either header missing or unparseable is an error: callers
/// must not guess at provider state.
pub fn parse_headers(
    headers: &reqwest::header::HeaderMap,
) -> ScanResult<(u64, chrono::DateTime<chrono::Utc>)> {
    let remaining = headers
        .get("X-Ratelimit-Remaining")
        .ok_or_else(|| ScanError::InvalidInput("missing X-Ratelimit-Remaining header".into()))?
        .to_str()
        .map_err(|_| ScanError::InvalidInput("unreadable X-Ratelimit-Remaining header".into()))?
        .trim()
        .parse::<u64>()
        .map_err(|e| ScanError::InvalidInput(format!("bad X-Ratelimit-Remaining: {e}")))?;

    let reset_secs = headers
        .get("X-Ratelimit-Reset")
        .ok_or_else(|| ScanError::InvalidInput("missing X-Ratelimit-Reset header".into()))?
        .to_str()
        .map_err(|_| ScanError::InvalidInput("unreadable X-Ratelimit-Reset header".into()))?
        .trim()
        .parse::<i64>()
        .map_err(|e| ScanError::InvalidInput(format!("bad X-Ratelimit-Reset: {e}")))?;

    let reset = chrono::DateTime::from_timestamp(reset_secs, 0)
        .ok_or_else(|| ScanError::InvalidInput(format!("bad reset timestamp {reset_secs}")))?;

    Ok((remaining, reset))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(venue: &str, rpm: u32, monthly: u64, concurrency: usize) -> RateLimiter {
        let limiter = RateLimiter::new(BackoffConfig::default());
        limiter.register(
            venue,
            &VenueLimits {
                rpm,
                monthly,
                max_concurrency: concurrency,
                fallback: None,
            },
        );
        limiter
    }

    #[test]
    fn rpm_exhaustion_fails_third_request() {
        let limiter = limiter_with("kraken", 2, 1_000, 4);

        assert!(limiter.check_budget("kraken", 1).is_ok());
        assert!(limiter.check_budget("kraken", 1).is_ok());

        let err = limiter.check_budget("kraken", 1).unwrap_err();
        assert_eq!(err.kind(), "PROVIDER_DEGRADED");
        assert_eq!(err.subcode(), Some(DegradedReason::BudgetExceeded));
    }

    #[test]
    fn refusal_does_not_mutate_buckets() {
        let limiter = limiter_with("kraken", 5, 1_000, 4);
        limiter.check_budget("kraken", 3).unwrap();

        // Cost larger than remaining RPM: refuse, nothing consumed.
        assert!(limiter.check_budget("kraken", 4).is_err());
        let snap = limiter.budget("kraken").unwrap();
        assert_eq!(snap.rpm_remaining, 2);
        assert_eq!(snap.monthly_remaining, 997);
    }

    #[test]
    fn monthly_bucket_enforced_independently() {
        let limiter = limiter_with("kraken", 100, 3, 4);
        limiter.check_budget("kraken", 2).unwrap();
        let err = limiter.check_budget("kraken", 2).unwrap_err();
        assert_eq!(err.subcode(), Some(DegradedReason::BudgetExceeded));
    }

    #[test]
    fn venues_are_isolated() {
        let limiter = RateLimiter::new(BackoffConfig::default());
        limiter.register("a", &VenueLimits { rpm: 2, monthly: 10, max_concurrency: 1, fallback: None });
        limiter.register("b", &VenueLimits { rpm: 2, monthly: 10, max_concurrency: 1, fallback: None });

        limiter.check_budget("a", 2).unwrap();
        assert!(limiter.check_budget("a", 1).is_err());

        // Venue b is untouched.
        let snap = limiter.budget("b").unwrap();
        assert_eq!(snap.rpm_remaining, 2);
        assert_eq!(snap.monthly_remaining, 10);
    }

    #[test]
    fn consumed_never_exceeds_budget() {
        let limiter = limiter_with("kraken", 10, 10, 4);
        let mut granted = 0u32;
        for _ in 0..50 {
            if limiter.check_budget("kraken", 1).is_ok() {
                granted += 1;
            }
        }
        assert!(granted <= 10);
    }

    #[test]
    fn unknown_venue_is_not_found() {
        let limiter = RateLimiter::new(BackoffConfig::default());
        let err = limiter.check_budget("ghost", 1).unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let limiter = limiter_with("kraken", 10, 100, 4);
        let cfg = BackoffConfig::default();

        let d0 = limiter.backoff("kraken", 0).unwrap();
        assert!(d0 >= Duration::from_millis(cfg.base_ms + cfg.jitter_min_ms));
        assert!(d0 <= Duration::from_millis(cfg.base_ms + cfg.jitter_max_ms));

        let d3 = limiter.backoff("kraken", 3).unwrap();
        assert!(d3 >= Duration::from_millis(cfg.base_ms * 8 + cfg.jitter_min_ms));

        // Very large attempt caps at max + jitter.
        let d20 = limiter.backoff("kraken", 20).unwrap();
        assert!(d20 <= Duration::from_millis(cfg.max_ms + cfg.jitter_max_ms));
    }

    #[test]
    fn retry_after_floors_next_backoff() {
        let limiter = limiter_with("kraken", 10, 100, 4);
        limiter.record_retry_after("kraken", 10).unwrap();

        let d = limiter.backoff("kraken", 0).unwrap();
        assert!(d >= Duration::from_secs(10));

        // The floor is consumed by one backoff.
        let d = limiter.backoff("kraken", 0).unwrap();
        assert!(d < Duration::from_secs(10));
    }

    #[test]
    fn success_resets_backoff_state() {
        let limiter = limiter_with("kraken", 10, 100, 4);
        limiter.backoff("kraken", 5).unwrap();
        assert_eq!(limiter.backoff_attempt("kraken").unwrap(), 5);

        limiter.reset_backoff("kraken").unwrap();
        assert_eq!(limiter.backoff_attempt("kraken").unwrap(), 0);
    }

    #[tokio::test]
    async fn semaphore_caps_concurrency() {
        let limiter = limiter_with("kraken", 100, 1_000, 1);

        let permit = limiter
            .acquire("kraken", Duration::from_millis(50))
            .await
            .unwrap();

        // Second acquire times out while the permit is held.
        let err = limiter
            .acquire("kraken", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TIMEOUT");

        drop(permit);

        // Slot released: acquire succeeds again.
        assert!(limiter
            .acquire("kraken", Duration::from_millis(50))
            .await
            .is_ok());
    }

    #[test]
    fn parse_headers_happy_path() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-Ratelimit-Remaining", "42".parse().unwrap());
        headers.insert("X-Ratelimit-Reset", "1750000000".parse().unwrap());

        let (remaining, reset) = parse_headers(&headers).unwrap();
        assert_eq!(remaining, 42);
        assert_eq!(reset.timestamp(), 1_750_000_000);
    }

    #[test]
    fn parse_headers_missing_is_error() {
        let headers = reqwest::header::HeaderMap::new();
        assert!(parse_headers(&headers).is_err());

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-Ratelimit-Remaining", "42".parse().unwrap());
        assert!(parse_headers(&headers).is_err());
    }

    #[test]
    fn parse_headers_garbage_is_error() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-Ratelimit-Remaining", "soon".parse().unwrap());
        headers.insert("X-Ratelimit-Reset", "1750000000".parse().unwrap());
        assert!(parse_headers(&headers).is_err());
    }

    #[test]
    fn usage_fraction_tracks_heaviest_bucket() {
        let limiter = limiter_with("kraken", 10, 1_000, 4);
        for _ in 0..9 {
            limiter.check_budget("kraken", 1).unwrap();
        }
        let snap = limiter.budget("kraken").unwrap();
        assert!(snap.usage() >= 0.9);
        assert!(snap.usage() < 1.0);
    }
}
