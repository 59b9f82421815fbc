// =============================================================================
// Data Facade — provider routing, fallback, and cache fill
// =============================================================================
//
// The facade is the single door to market data. A fetch walks:
//
//   route (circuit / budget aware) -> circuit admission -> concurrency slot
//   -> budget consumption -> provider call -> health + circuit feedback
//   -> quality validation -> cache fill
//
// When a venue's circuit is OPEN or its budget is fully used, requests are
// routed to the configured fallback aggregator and every produced envelope
// is tagged `aggregator_fallback_<name>`; native results carry
// `exchange_native_<name>`. At 80 % budget usage the venue's cache TTLs
// double (once, until it recovers below the threshold).
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::LimitsConfig;
use crate::errors::{DegradedReason, ScanError, ScanResult};
use crate::facade::cache::{CacheTier, TierTtls, TieredCache};
use crate::facade::quality::{QualityConfig, QualityReport, QualityValidator};
use crate::provider::circuit::{CircuitBreaker, CircuitConfig, CircuitState};
use crate::provider::health::ProviderHealthTracker;
use crate::provider::rate_limit::RateLimiter;
use crate::types::{Envelope, SourceTier};

/// Budget usage at which TTLs double.
const TTL_PRESSURE_THRESHOLD: f64 = 0.80;

/// Result of one facade fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub envelope: Envelope,
    /// Venue that actually served the request.
    pub served_by: String,
    pub series_source: String,
    pub quality: QualityReport,
}

pub struct DataFacade {
    cache: Arc<TieredCache>,
    limiter: Arc<RateLimiter>,
    circuits: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    health: Arc<ProviderHealthTracker>,
    quality: QualityValidator,
    fallbacks: HashMap<String, String>,
    /// Venues whose TTLs are currently doubled.
    ttl_pressured: Mutex<HashMap<String, bool>>,
    step_timeout: Duration,
}

impl DataFacade {
    pub fn new(limits: &LimitsConfig, step_timeout: Duration) -> Self {
        let limiter = Arc::new(RateLimiter::from_limits(limits));
        let mut circuits = HashMap::new();
        let mut fallbacks = HashMap::new();
        for (venue, vl) in &limits.venues {
            circuits.insert(
                venue.clone(),
                Arc::new(CircuitBreaker::new(venue.clone(), CircuitConfig::default())),
            );
            if let Some(fb) = &vl.fallback {
                fallbacks.insert(venue.clone(), fb.clone());
            }
        }
        let whitelist: Vec<String> = limits.venues.keys().cloned().collect();

        Self {
            cache: Arc::new(TieredCache::new(TierTtls::default())),
            limiter,
            circuits: RwLock::new(circuits),
            health: Arc::new(ProviderHealthTracker::new()),
            quality: QualityValidator::new(QualityConfig::default(), whitelist),
            fallbacks,
            ttl_pressured: Mutex::new(HashMap::new()),
            step_timeout,
        }
    }

    pub fn cache(&self) -> Arc<TieredCache> {
        self.cache.clone()
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    pub fn health_tracker(&self) -> Arc<ProviderHealthTracker> {
        self.health.clone()
    }

    pub fn circuit(&self, venue: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuits.read().get(venue).cloned()
    }

    // -------------------------------------------------------------------------
    // Routing
    // -------------------------------------------------------------------------

    /// Decide which venue serves a request for `venue` and how the result
    /// will be labeled.
    pub fn route(&self, venue: &str) -> (String, String) {
        let circuit_open = self
            .circuit(venue)
            .map(|c| c.state() == CircuitState::Open)
            .unwrap_or(false);
        let budget_spent = self
            .limiter
            .budget(venue)
            .map(|b| b.usage() >= 1.0)
            .unwrap_or(false);

        if circuit_open || budget_spent {
            if let Some(fb) = self.fallbacks.get(venue) {
                debug!(venue, fallback = %fb, circuit_open, budget_spent, "routing to fallback");
                return (fb.clone(), format!("aggregator_fallback_{fb}"));
            }
        }
        (venue.to_string(), format!("exchange_native_{venue}"))
    }

    // -------------------------------------------------------------------------
    // Fetch
    // -------------------------------------------------------------------------

    /// Run one guarded fetch. `fetch` receives the effective venue (native
    /// or fallback) and produces the raw envelope; the facade wraps it with
    /// admission control, health/circuit feedback, validation, and cache
    /// fill under the key `<venue>:<symbol>:<tier>`.
    pub async fn fetch_envelope<F, Fut>(
        &self,
        venue: &str,
        symbol: &str,
        tier: SourceTier,
        fetch: F,
    ) -> ScanResult<FetchOutcome>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = ScanResult<Envelope>>,
    {
        let (effective, series_source) = self.route(venue);

        let circuit = self
            .circuit(&effective)
            .ok_or_else(|| ScanError::NotFound(format!("venue '{effective}' unknown")))?;
        if !circuit.allow_request(Instant::now()) {
            return Err(ScanError::degraded(
                DegradedReason::CircuitOpen,
                format!("venue '{effective}' circuit is open"),
            ));
        }

        // Concurrency slot; dropping the permit releases it, including on
        // cancellation.
        let _permit = self.limiter.acquire(&effective, self.step_timeout).await?;

        let budget = self.limiter.check_budget(&effective, 1)?;
        self.maybe_adjust_ttls(&effective, budget.usage());

        let started = Instant::now();
        let result = fetch(effective.clone()).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut envelope = match result {
            Ok(env) => {
                self.health.record(&effective, latency_ms, true);
                crate::telemetry::record_provider_request(&effective, true, latency_ms / 1000.0);
                circuit.on_success();
                let _ = self.limiter.reset_backoff(&effective);
                env
            }
            Err(e) => {
                self.health.record(&effective, latency_ms, false);
                crate::telemetry::record_provider_request(&effective, false, latency_ms / 1000.0);
                crate::telemetry::record_error(e.kind());
                if matches!(
                    &e,
                    ScanError::ProviderDegraded {
                        reason: DegradedReason::Http5xx,
                        ..
                    } | ScanError::Timeout(_)
                ) {
                    circuit.on_failure(Instant::now());
                }
                warn!(venue = %effective, symbol, error = %e, "provider fetch failed");
                return Err(e);
            }
        };

        envelope.series_source = series_source.clone();

        let quality = self.quality.validate(&envelope, Utc::now())?;
        if quality.accepted {
            let key = TieredCache::make_key(&[venue, symbol, &tier.to_string()]);
            let cache_tier = match tier {
                SourceTier::Hot => CacheTier::Hot,
                SourceTier::Warm => CacheTier::Warm,
                SourceTier::Cold => CacheTier::Cold,
            };
            let value = serde_json::to_value(&envelope)
                .map_err(|e| ScanError::InvalidInput(format!("unserializable envelope: {e}")))?;
            self.cache.set(&key, value, cache_tier);
        }

        Ok(FetchOutcome {
            envelope,
            served_by: effective,
            series_source,
            quality,
        })
    }

    /// Cached envelope lookup; the tier reports where the hit was found.
    pub fn cached_envelope(
        &self,
        venue: &str,
        symbol: &str,
        tier: SourceTier,
    ) -> Option<(Envelope, CacheTier)> {
        let key = TieredCache::make_key(&[venue, symbol, &tier.to_string()]);
        let (value, cache_tier) = self.cache.get(&key)?;
        let envelope: Envelope = serde_json::from_value(value).ok()?;
        Some((envelope, cache_tier))
    }

    /// Double the venue's TTLs once when usage crosses the 80 % line and
    /// reset when it recovers.
    fn maybe_adjust_ttls(&self, venue: &str, usage: f64) {
        let mut pressured = self.ttl_pressured.lock();
        let flag = pressured.entry(venue.to_string()).or_insert(false);
        if usage >= TTL_PRESSURE_THRESHOLD && !*flag {
            *flag = true;
            self.cache.double_ttls(venue);
            warn!(venue, usage = format!("{usage:.2}"), "budget pressure, TTLs doubled");
        } else if usage < TTL_PRESSURE_THRESHOLD && *flag {
            *flag = false;
            self.cache.reset_ttls(venue);
        }
    }
}
