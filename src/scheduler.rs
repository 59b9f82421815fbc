// =============================================================================
// Scheduler — periodic scan / premove / regime / provider-health jobs
// =============================================================================
//
// Jobs declare a name, an interval, a type, and a per-job timeout. The
// dispatcher fires due jobs with a deadline-bounded future and appends every
// outcome to a bounded in-memory run log. Provider-health results feed two
// adaptations: venue fallback assignment and cache TTL doubling under
// budget pressure.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::facade::cache::TieredCache;
use crate::provider::circuit::CircuitState;
use crate::provider::health::ProviderHealth;
use crate::regime::detector::{majority_vote, Regime, RegimeThresholds, SignalVote};

/// Run-log capacity.
const RUN_LOG_CAP: usize = 200;

// =============================================================================
// Job declarations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "scan.hot")]
    ScanHot,
    #[serde(rename = "premove.hourly")]
    PremoveHourly,
    #[serde(rename = "regime-refresh")]
    RegimeRefresh,
    #[serde(rename = "provider-health")]
    ProviderHealth,
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub every: Duration,
    pub job_type: JobType,
    pub timeout: Duration,
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum JobOutcome {
    Success,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub run_id: Uuid,
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: JobOutcome,
}

struct JobEntry {
    spec: JobSpec,
    next_due: Instant,
}

// =============================================================================
// Scheduler
// =============================================================================

pub struct Scheduler {
    jobs: RwLock<Vec<JobEntry>>,
    run_log: Mutex<VecDeque<JobRun>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(Vec::new()),
            run_log: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a job; it first fires one full interval from now.
    pub fn register(&self, spec: JobSpec) {
        info!(job = %spec.name, every_secs = spec.every.as_secs(), "job registered");
        let next_due = Instant::now() + spec.every;
        self.jobs.write().push(JobEntry { spec, next_due });
    }

    /// Specs due at `now`, advancing their next-due marks.
    pub fn due_jobs(&self, now: Instant) -> Vec<JobSpec> {
        let mut due = Vec::new();
        for entry in self.jobs.write().iter_mut() {
            if now >= entry.next_due {
                due.push(entry.spec.clone());
                entry.next_due = now + entry.spec.every;
            }
        }
        due
    }

    /// Run one job body under its declared timeout and log the outcome.
    pub async fn run_job<F, Fut>(&self, spec: &JobSpec, body: F) -> JobOutcome
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let started_at = Utc::now();
        let started = Instant::now();

        let outcome = match tokio::time::timeout(spec.timeout, body(spec.config.clone())).await {
            Ok(Ok(())) => JobOutcome::Success,
            Ok(Err(e)) => {
                warn!(job = %spec.name, error = %e, "job failed");
                JobOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!(job = %spec.name, timeout = ?spec.timeout, "job timed out");
                JobOutcome::TimedOut
            }
        };

        let run = JobRun {
            run_id: Uuid::new_v4(),
            job: spec.name.clone(),
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            outcome: outcome.clone(),
        };

        let mut log = self.run_log.lock();
        if log.len() == RUN_LOG_CAP {
            log.pop_front();
        }
        log.push_back(run);

        outcome
    }

    /// Most recent runs, newest first.
    pub fn recent_runs(&self, limit: usize) -> Vec<JobRun> {
        self.run_log
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Provider-health adaptation
// =============================================================================

/// Assign fallbacks to every unhealthy (or circuit-open) provider. Returns
/// the venue → fallback assignments that were applied.
pub fn apply_provider_fallbacks(
    results: &[ProviderHealth],
    default_fallbacks: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut applied = HashMap::new();
    for health in results {
        let needs_fallback = !health.healthy() || health.circuit_state == CircuitState::Open;
        if needs_fallback {
            if let Some(fb) = default_fallbacks.get(&health.venue) {
                info!(venue = %health.venue, fallback = %fb, "provider fallback applied");
                applied.insert(health.venue.clone(), fb.clone());
            } else {
                warn!(venue = %health.venue, "provider degraded with no fallback configured");
            }
        }
    }
    applied
}

/// Double cache TTLs for every provider at or above 80 % budget usage.
/// Returns the venues adjusted.
pub fn adjust_cache_ttls(results: &[ProviderHealth], cache: &TieredCache) -> Vec<String> {
    let mut adjusted = Vec::new();
    for health in results {
        if health.usage >= 0.80 {
            cache.double_ttls(&health.venue);
            adjusted.push(health.venue.clone());
        }
    }
    adjusted
}

// =============================================================================
// Regime-refresh vote
// =============================================================================

/// Signal values supplied by a regime-refresh job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeData {
    pub realized_vol_7d: f64,
    pub pct_above_20ma: f64,
    pub breadth_thrust: f64,
}

/// The same three-signal rule the regime detector uses, run over
/// job-supplied data. Ties fall back to `previous`.
pub fn regime_majority_vote(
    thresholds: &RegimeThresholds,
    data: &RegimeData,
    previous: Regime,
) -> (Regime, Vec<SignalVote>) {
    let (winner, votes) = majority_vote(
        thresholds,
        data.realized_vol_7d,
        data.pct_above_20ma,
        data.breadth_thrust,
    );
    (winner.unwrap_or(previous), votes)
}
