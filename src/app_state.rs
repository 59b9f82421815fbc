// =============================================================================
// Central Application State — CryptoRun scanner
// =============================================================================
//
// The single source of truth for the running scanner. All subsystems hold
// Arc references; AppState ties them together and serves unified snapshots
// to the HTTP surface.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for mutable shared collections.
//   - Arc wrappers for subsystems that manage their own interior mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::ScannerConfig;
use crate::errors::ScanResult;
use crate::events::CatalystEvent;
use crate::facade::DataFacade;
use crate::pipeline::{ScanOutcome, ScanPipeline};
use crate::pit::PitStore;
use crate::regime::{RegimeDetector, RegimeThresholds};
use crate::scheduler::Scheduler;

/// Recent errors retained for the dashboard.
const MAX_RECENT_ERRORS: usize = 50;

/// A recorded error event.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Shared state for every async task, always behind `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version, bumped on every meaningful state
    /// mutation.
    pub state_version: AtomicU64,

    pub config: RwLock<ScannerConfig>,

    pub detector: Arc<RegimeDetector>,
    pub facade: Arc<DataFacade>,
    pub pit: Arc<PitStore>,
    pub scheduler: Arc<Scheduler>,
    pub pipeline: Arc<ScanPipeline>,

    pub last_scan: RwLock<Option<ScanOutcome>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    /// Known upcoming catalysts; heat feeds candidate insights.
    pub catalyst_events: RwLock<Vec<CatalystEvent>>,

    /// Prometheus render handle for `GET /metrics`.
    pub metrics: Option<PrometheusHandle>,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: ScannerConfig,
        pit: Arc<PitStore>,
        metrics: Option<PrometheusHandle>,
    ) -> ScanResult<Self> {
        let detector = Arc::new(RegimeDetector::new(RegimeThresholds::default()));
        let facade = Arc::new(DataFacade::new(
            &config.limits,
            Duration::from_secs(config.runtime.step_timeout_secs),
        ));
        let pipeline = Arc::new(ScanPipeline::new(
            config.clone(),
            detector.clone(),
            pit.clone(),
        )?);

        Ok(Self {
            state_version: AtomicU64::new(0),
            config: RwLock::new(config),
            detector,
            facade,
            pit,
            scheduler: Arc::new(Scheduler::new()),
            pipeline,
            last_scan: RwLock::new(None),
            recent_errors: RwLock::new(Vec::new()),
            catalyst_events: RwLock::new(Vec::new()),
            metrics,
            start_time: std::time::Instant::now(),
        })
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Store a completed scan and bump the version.
    pub fn record_scan(&self, outcome: ScanOutcome) {
        *self.last_scan.write() = Some(outcome);
        self.increment_version();
    }

    /// Append an error record, trimming the oldest past the cap.
    pub fn push_error(&self, kind: &str, message: impl Into<String>) {
        let mut errors = self.recent_errors.write();
        if errors.len() == MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        errors.push(ErrorRecord {
            kind: kind.to_string(),
            message: message.into(),
            at: Utc::now().to_rfc3339(),
        });
        self.increment_version();
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let pit = Arc::new(PitStore::open(dir.path()).unwrap());
        AppState::new(ScannerConfig::default(), pit, None).unwrap()
    }

    #[test]
    fn version_increments_on_mutation() {
        let s = state();
        assert_eq!(s.current_version(), 0);
        s.increment_version();
        s.increment_version();
        assert_eq!(s.current_version(), 2);
    }

    #[test]
    fn error_ring_is_bounded() {
        let s = state();
        for i in 0..MAX_RECENT_ERRORS + 10 {
            s.push_error("TIMEOUT", format!("error {i}"));
        }
        let errors = s.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        // Oldest trimmed: the first retained is error 10.
        assert!(errors[0].message.contains("10"));
    }

    #[test]
    fn invalid_config_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let pit = Arc::new(PitStore::open(dir.path()).unwrap());
        let mut config = ScannerConfig::default();
        if let Some(w) = config.weights.profiles.get_mut("choppy") {
            w.momentum_core = 0.05;
        }
        assert!(AppState::new(config, pit, None).is_err());
    }
}
