// =============================================================================
// Scan pipeline — regime -> factors -> score -> gates -> snapshot -> rank
// =============================================================================
//
// One scan turns a set of per-symbol market snapshots into a ranked
// candidate list:
//
//   1. the cached (≤4 h) regime selects the weight profile
//   2. per symbol, bounded workers assemble factor windows from bars,
//      score them, and run the gate/guard battery
//   3. out-of-order hot envelopes are dropped by the sequence guard
//   4. the outcome is persisted to the PIT store and ranked deterministically
//
// Per-symbol failures land in the error map and never abort peers.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ScannerConfig;
use crate::errors::{ScanError, ScanResult};
use crate::gates::{
    evaluate_dip_guards, evaluate_premove, evaluate_safety_guards, is_trade_allowed, summarize,
    DipInputs, EntryGateEngine, EntryGateReport, GateInputs, GuardResult, GuardSummary,
    PremoveDecision, PremoveInputs, SafetyGuardInputs,
};
use crate::indicators::{self, Bar};
use crate::pit::PitStore;
use crate::regime::{RegimeDetection, RegimeDetector, RegimeInputs};
use crate::scoring::{
    composite::rank_scores, CompositeScore, CompositeScorer, FactorSet, MeasurementSnapshot,
};
use crate::telemetry;
use crate::types::SourceTier;

/// Factor window length (readings per factor vector).
const FACTOR_WINDOW: usize = 24;

// =============================================================================
// Inputs
// =============================================================================

/// Everything the pipeline needs for one symbol, assembled by the facade
/// layer ahead of the scan.
#[derive(Debug, Clone)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub venue: String,
    pub source_tier: SourceTier,
    pub sequence: Option<u64>,
    /// Hourly bars, oldest first. At least 49 required (24h ROC + window).
    pub hourly_bars: Vec<Bar>,
    pub social: f64,
    pub measurements: MeasurementSnapshot,
    pub spread_bps: Option<f64>,
    pub depth_usd: Option<f64>,
    pub vadr: Option<f64>,
    pub signal_ts: DateTime<Utc>,
    pub p99_latency_ms: f64,
    pub data_quality_score: f64,
    pub catalyst_heat: f64,
    /// Present when the symbol is a dip candidate.
    pub dip: Option<DipObservation>,
    /// Structural pre-move observations, when available.
    pub premove: Option<PremoveInputs>,
}

#[derive(Debug, Clone)]
pub struct DipObservation {
    pub return_24h: f64,
    pub rebound_pct: f64,
    pub bars_since_detection: u32,
    pub dip_price: f64,
}

// =============================================================================
// Outputs
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightBlock {
    pub funding: f64,
    pub oi: f64,
    pub etf: f64,
    pub catalyst_heat: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResult {
    pub symbol: String,
    pub score: CompositeScore,
    pub gates: EntryGateReport,
    pub guard_results: Vec<GuardResult>,
    pub guard_summary: GuardSummary,
    pub trade_allowed: bool,
    /// 2-of-3 pre-move combination outcome, when observations were present.
    pub premove: Option<PremoveDecision>,
    pub insights: InsightBlock,
    pub series_source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub regime: RegimeDetection,
    /// Ranked candidates, final score descending.
    pub candidates: Vec<CandidateResult>,
    /// Per-symbol failures; peers are unaffected.
    pub errors: HashMap<String, String>,
    pub sequence_drops: u64,
}

// =============================================================================
// Sequence guard
// =============================================================================

/// Per-(venue, symbol) sequence watermarks for hot-tier data. Out-of-order
/// envelopes are dropped with a metric rather than applied.
#[derive(Default)]
pub struct SequenceGuard {
    watermarks: Mutex<HashMap<(String, String), u64>>,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or drop an observation. Only hot-tier data is sequenced;
    /// warm/cold always admit. Monotone non-decreasing sequences admit.
    pub fn admit(
        &self,
        venue: &str,
        symbol: &str,
        tier: SourceTier,
        sequence: Option<u64>,
    ) -> bool {
        if tier != SourceTier::Hot {
            return true;
        }
        let Some(seq) = sequence else {
            return false;
        };
        let mut marks = self.watermarks.lock();
        let key = (venue.to_string(), symbol.to_string());
        match marks.get(&key) {
            Some(&mark) if seq < mark => {
                telemetry::record_sequence_drop(venue);
                warn!(venue, symbol, seq, mark, "out-of-order hot envelope dropped");
                false
            }
            _ => {
                marks.insert(key, seq);
                true
            }
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct ScanPipeline {
    config: ScannerConfig,
    scorer: CompositeScorer,
    gate_engine: EntryGateEngine,
    detector: Arc<RegimeDetector>,
    pit: Arc<PitStore>,
    sequence_guard: SequenceGuard,
}

impl ScanPipeline {
    pub fn new(
        config: ScannerConfig,
        detector: Arc<RegimeDetector>,
        pit: Arc<PitStore>,
    ) -> ScanResult<Self> {
        let scorer = CompositeScorer::new(config.weights.clone())?;
        let gate_engine = EntryGateEngine::new(config.guards.clone());
        Ok(Self {
            config,
            scorer,
            gate_engine,
            detector,
            pit,
            sequence_guard: SequenceGuard::new(),
        })
    }

    /// Run one scan over the prepared snapshots.
    pub async fn run_scan(
        &self,
        regime_inputs: RegimeInputs,
        snapshots: Vec<SymbolSnapshot>,
    ) -> ScanResult<ScanOutcome> {
        let started_at = Utc::now();
        let started = std::time::Instant::now();

        let regime = self.detector.detect(regime_inputs)?;
        debug!(regime = %regime.regime, confidence = regime.confidence, "scan regime selected");

        let mut sequence_drops = 0u64;
        let admitted: Vec<SymbolSnapshot> = snapshots
            .into_iter()
            .filter(|snap| {
                let ok = self.sequence_guard.admit(
                    &snap.venue,
                    &snap.symbol,
                    snap.source_tier,
                    snap.sequence,
                );
                if !ok {
                    sequence_drops += 1;
                }
                ok
            })
            .collect();

        let pairs = admitted.len() as u64;
        let max_concurrency = self.config.runtime.max_concurrency.max(1);
        let step_timeout = Duration::from_secs(self.config.runtime.step_timeout_secs);

        let regime_ref = &regime;
        let results: Vec<(String, Result<CandidateResult, ScanError>)> =
            stream::iter(admitted.into_iter().map(|snap| {
                let symbol = snap.symbol.clone();
                async move {
                    let result = match tokio::time::timeout(
                        step_timeout,
                        self.evaluate_symbol(snap, regime_ref),
                    )
                    .await
                    {
                        Ok(r) => r,
                        Err(_) => Err(ScanError::Timeout(format!(
                            "symbol step exceeded {step_timeout:?}"
                        ))),
                    };
                    (symbol, result)
                }
            }))
            .buffer_unordered(max_concurrency)
            .collect()
            .await;

        let mut candidates = Vec::new();
        let mut errors = HashMap::new();
        for (symbol, result) in results {
            match result {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    telemetry::record_error(e.kind());
                    errors.insert(symbol, e.to_string());
                }
            }
        }

        // Deterministic final ordering regardless of worker completion order.
        let mut scores: Vec<CompositeScore> =
            candidates.iter().map(|c| c.score.clone()).collect();
        rank_scores(&mut scores);
        let rank_of: HashMap<String, usize> =
            scores.iter().map(|s| (s.symbol.clone(), s.rank)).collect();
        for candidate in &mut candidates {
            candidate.score.rank = rank_of[&candidate.symbol];
        }
        candidates.sort_by_key(|c| c.score.rank);

        let outcome = ScanOutcome {
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            regime,
            candidates,
            errors,
            sequence_drops,
        };

        self.persist(&outcome).await;

        telemetry::record_scan(started.elapsed().as_secs_f64(), pairs);
        info!(
            candidates = outcome.candidates.len(),
            errors = outcome.errors.len(),
            sequence_drops,
            duration_ms = outcome.duration_ms,
            "scan complete"
        );
        Ok(outcome)
    }

    /// Score + gate one symbol.
    async fn evaluate_symbol(
        &self,
        snap: SymbolSnapshot,
        regime: &RegimeDetection,
    ) -> ScanResult<CandidateResult> {
        let factors = assemble_factors(&snap)?;
        let score = self.scorer.score(&factors, &snap.measurements, regime.regime)?;

        let gate_inputs = build_gate_inputs(&snap)?;
        let mut gates = self.gate_engine.evaluate(&gate_inputs);

        // Dip vetoes fold into the gate trail when enabled and applicable.
        if self.config.runtime.flags.dip_guards {
            if let Some(dip) = &snap.dip {
                let decision = evaluate_dip_guards(
                    &self.config.guards.dip,
                    &DipInputs {
                        return_24h: dip.return_24h,
                        rebound_pct: dip.rebound_pct,
                        bar_highs: snap.hourly_bars.iter().map(|b| b.high).collect(),
                        bars_since_detection: dip.bars_since_detection,
                        dip_price: dip.dip_price,
                        current_price: snap
                            .hourly_bars
                            .last()
                            .map(|b| b.close)
                            .unwrap_or(dip.dip_price),
                    },
                );
                gates.results.extend(decision.results);
                if decision.blocked {
                    gates.overall_passed = false;
                    if gates.overall_reason.is_none() {
                        gates.overall_reason = decision.veto_reason;
                    }
                }
            }
        }

        let guard_results = evaluate_safety_guards(
            regime.regime,
            &SafetyGuardInputs {
                drawdown_pct: snap.dip.as_ref().map(|d| d.return_24h).unwrap_or(0.0),
                volatility_spike_ratio: volatility_spike_ratio(&snap.hourly_bars),
                data_quality_score: snap.data_quality_score,
            },
        );
        let guard_summary = summarize(&guard_results);
        let trade_allowed = gates.overall_passed && is_trade_allowed(&guard_results);

        let premove = snap
            .premove
            .as_ref()
            .map(|inputs| evaluate_premove(&self.config.guards.premove, inputs));

        Ok(CandidateResult {
            symbol: snap.symbol.clone(),
            insights: InsightBlock {
                funding: snap.measurements.funding_z,
                oi: snap.measurements.oi_residual,
                etf: snap.measurements.etf_tint,
                catalyst_heat: snap.catalyst_heat,
            },
            series_source: format!("exchange_native_{}", snap.venue),
            score,
            gates,
            guard_results,
            guard_summary,
            trade_allowed,
            premove,
        })
    }

    /// Persist the outcome under the PIT timeout; persistence failure is
    /// recoverable (logged + counted, the scan result still surfaces).
    async fn persist(&self, outcome: &ScanOutcome) {
        let pit = self.pit.clone();
        let payload = outcome.clone();
        let timeout = Duration::from_secs(self.config.runtime.pit_timeout_secs);

        let write = tokio::task::spawn_blocking(move || pit.store("scans", &payload));
        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(Ok(id))) => debug!(snapshot_id = %id, "scan snapshot persisted"),
            Ok(Ok(Err(e))) => {
                telemetry::record_error(e.kind());
                warn!(error = %e, "scan snapshot store failed");
            }
            Ok(Err(e)) => warn!(error = %e, "scan snapshot task panicked"),
            Err(_) => {
                telemetry::record_error("TIMEOUT");
                warn!(?timeout, "scan snapshot store timed out");
            }
        }
    }
}

// =============================================================================
// Factor assembly
// =============================================================================

/// Build the windowed factor set from hourly bars:
///   momentum  — multi-window blended ROC readings (protected core)
///   technical — RSI(14) centered and scaled to ~[-5, 5]
///   volume    — volume relative to its trailing mean
///   quality   — inverse short-window volatility
pub fn assemble_factors(snap: &SymbolSnapshot) -> ScanResult<FactorSet> {
    let closes = indicators::closes(&snap.hourly_bars);
    if closes.len() < FACTOR_WINDOW + 25 {
        return Err(ScanError::InvalidInput(format!(
            "{}: {} hourly bars, need {}",
            snap.symbol,
            closes.len(),
            FACTOR_WINDOW + 25
        )));
    }

    let momentum: Vec<f64> = (0..FACTOR_WINDOW)
        .map(|i| {
            let end = closes.len() - FACTOR_WINDOW + i + 1;
            indicators::momentum_core(&closes[..end]).unwrap_or(0.0)
        })
        .collect();

    let rsi_series = indicators::rsi::calculate_rsi(&closes, 14);
    let technical: Vec<f64> = tail(&rsi_series, FACTOR_WINDOW)
        .iter()
        .map(|r| (r - 50.0) / 10.0)
        .collect();

    let volumes: Vec<f64> = snap.hourly_bars.iter().map(|b| b.volume).collect();
    let vol_mean = volumes.iter().sum::<f64>() / volumes.len() as f64;
    let volume: Vec<f64> = tail(&volumes, FACTOR_WINDOW)
        .iter()
        .map(|v| if vol_mean > 0.0 { v / vol_mean - 1.0 } else { 0.0 })
        .collect();

    let quality: Vec<f64> = (0..FACTOR_WINDOW)
        .map(|i| {
            let end = closes.len() - FACTOR_WINDOW + i + 1;
            let window = &closes[end.saturating_sub(12)..end];
            let vol = indicators::realized_vol(window).unwrap_or(0.0);
            1.0 / (1.0 + vol * 100.0)
        })
        .collect();

    if technical.len() != FACTOR_WINDOW {
        return Err(ScanError::InvalidInput(format!(
            "{}: RSI window underfilled",
            snap.symbol
        )));
    }

    Ok(FactorSet {
        symbol: snap.symbol.clone(),
        ts: snap.signal_ts,
        momentum_core: momentum,
        technical,
        volume,
        quality,
        social: snap.social,
    })
}

fn build_gate_inputs(snap: &SymbolSnapshot) -> ScanResult<GateInputs> {
    let bars = &snap.hourly_bars;
    let closes = indicators::closes(bars);
    let atr_1h = indicators::calculate_atr(bars, 14).ok_or_else(|| {
        ScanError::InvalidInput(format!("{}: insufficient bars for ATR", snap.symbol))
    })?;

    let last_close = *closes.last().expect("bars verified non-empty");
    let prev_close = closes[closes.len() - 2];
    let momentum_24h = indicators::rate_of_change(&closes, 24)
        .last()
        .copied()
        .unwrap_or(0.0);
    let roc_series = indicators::rate_of_change(&closes, 4);
    let acceleration = match roc_series.len() {
        n if n >= 2 => roc_series[n - 1] - roc_series[n - 2],
        _ => 0.0,
    };
    let rsi_4h = four_hour_rsi(&closes).unwrap_or(50.0);

    Ok(GateInputs {
        bars_age: bars_age(bars, snap.signal_ts),
        price_change: last_close - prev_close,
        atr_1h,
        momentum_24h,
        rsi_4h,
        acceleration,
        signal_ts: snap.signal_ts,
        execution_ts: Utc::now(),
        p99_latency_ms: snap.p99_latency_ms,
        price_move_since_signal: last_close - prev_close,
        spread_bps: snap.spread_bps,
        depth_usd: snap.depth_usd,
        vadr: snap.vadr,
    })
}

/// RSI over 4-hour closes derived from the hourly series.
fn four_hour_rsi(hourly_closes: &[f64]) -> Option<f64> {
    let four_hour: Vec<f64> = hourly_closes
        .iter()
        .rev()
        .step_by(4)
        .copied()
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    indicators::current_rsi(&four_hour, 14)
}

fn bars_age(bars: &[Bar], signal_ts: DateTime<Utc>) -> u32 {
    let Some(last) = bars.last() else { return u32::MAX };
    let last_ts = last.open_time / 1000;
    let age_secs = (signal_ts.timestamp() - last_ts).max(0);
    (age_secs / 3600) as u32
}

/// Latest 6h volatility as a multiple of the trailing 48h volatility.
fn volatility_spike_ratio(bars: &[Bar]) -> f64 {
    let closes = indicators::closes(bars);
    if closes.len() < 48 {
        return 1.0;
    }
    let recent = indicators::realized_vol(&closes[closes.len() - 6..]).unwrap_or(0.0);
    let baseline = indicators::realized_vol(&closes[closes.len() - 48..]).unwrap_or(0.0);
    if baseline <= 0.0 {
        1.0
    } else {
        recent / baseline
    }
}

fn tail(values: &[f64], n: usize) -> Vec<f64> {
    values[values.len().saturating_sub(n)..].to_vec()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::RegimeThresholds;

    fn bars(n: usize, drift: f64) -> Vec<Bar> {
        // Bars end at "now" so gate timestamps line up with execution time.
        let start_ms = Utc::now().timestamp_millis() - n as i64 * 3_600_000;
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * drift + (i % 5) as f64 * 0.2;
                Bar::new(
                    start_ms + i as i64 * 3_600_000,
                    base,
                    base + 1.0,
                    base - 1.0,
                    base + 0.3,
                    1_000.0 + (i % 7) as f64 * 25.0,
                )
            })
            .collect()
    }

    fn snapshot(symbol: &str, n_bars: usize) -> SymbolSnapshot {
        let hourly_bars = bars(n_bars, 0.1);
        let signal_ts = Utc::now();
        SymbolSnapshot {
            symbol: symbol.to_string(),
            venue: "kraken".to_string(),
            source_tier: SourceTier::Warm,
            sequence: None,
            hourly_bars,
            social: 2.0,
            measurements: MeasurementSnapshot::default(),
            spread_bps: Some(15.0),
            depth_usd: Some(300_000.0),
            vadr: Some(2.2),
            signal_ts,
            p99_latency_ms: 120.0,
            data_quality_score: 95.0,
            catalyst_heat: 0.4,
            dip: None,
            premove: None,
        }
    }

    fn pipeline(dir: &std::path::Path) -> ScanPipeline {
        let pit = Arc::new(PitStore::open(dir).unwrap());
        let detector = Arc::new(RegimeDetector::new(RegimeThresholds::default()));
        ScanPipeline::new(ScannerConfig::default(), detector, pit).unwrap()
    }

    fn regime_inputs() -> RegimeInputs {
        RegimeInputs {
            realized_vol_7d: 0.30,
            pct_above_20ma: 0.50,
            breadth_thrust: 0.50,
            now: Utc::now(),
        }
    }

    #[test]
    fn factor_assembly_produces_full_windows() {
        let snap = snapshot("BTC-USD", 72);
        let factors = assemble_factors(&snap).unwrap();
        assert_eq!(factors.momentum_core.len(), FACTOR_WINDOW);
        assert_eq!(factors.technical.len(), FACTOR_WINDOW);
        assert_eq!(factors.volume.len(), FACTOR_WINDOW);
        assert_eq!(factors.quality.len(), FACTOR_WINDOW);
        // Uptrending bars produce positive momentum readings.
        assert!(*factors.momentum_core.last().unwrap() > 0.0);
    }

    #[test]
    fn factor_assembly_rejects_short_history() {
        let snap = snapshot("BTC-USD", 30);
        let err = assemble_factors(&snap).unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn scan_ranks_candidates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        let outcome = p
            .run_scan(
                regime_inputs(),
                vec![snapshot("BTC-USD", 72), snapshot("ETH-USD", 72)],
            )
            .await
            .unwrap();

        assert_eq!(outcome.candidates.len(), 2);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.candidates[0].score.rank, 1);
        assert_eq!(outcome.candidates[1].score.rank, 2);
        assert!(
            outcome.candidates[0].score.final_score
                >= outcome.candidates[1].score.final_score
        );

        // The scan snapshot landed in the PIT store.
        let stored = p.pit.list("scans", 10);
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn per_symbol_failure_does_not_abort_peers() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        let outcome = p
            .run_scan(
                regime_inputs(),
                vec![snapshot("BTC-USD", 72), snapshot("BAD-USD", 10)],
            )
            .await
            .unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].symbol, "BTC-USD");
        assert!(outcome.errors.contains_key("BAD-USD"));
    }

    #[tokio::test]
    async fn out_of_order_hot_snapshots_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        let mut first = snapshot("BTC-USD", 72);
        first.source_tier = SourceTier::Hot;
        first.sequence = Some(10);

        let outcome = p.run_scan(regime_inputs(), vec![first]).await.unwrap();
        assert_eq!(outcome.sequence_drops, 0);
        assert_eq!(outcome.candidates.len(), 1);

        // Regressing sequence for the same (venue, symbol) is dropped.
        let mut stale = snapshot("BTC-USD", 72);
        stale.source_tier = SourceTier::Hot;
        stale.sequence = Some(5);

        let outcome = p.run_scan(regime_inputs(), vec![stale]).await.unwrap();
        assert_eq!(outcome.sequence_drops, 1);
        assert!(outcome.candidates.is_empty());
    }

    #[tokio::test]
    async fn dip_veto_blocks_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        let mut snap = snapshot("BTC-USD", 72);
        snap.dip = Some(DipObservation {
            return_24h: -20.0,
            rebound_pct: 0.5,
            bars_since_detection: 1,
            dip_price: snap.hourly_bars.last().unwrap().close,
        });

        let outcome = p.run_scan(regime_inputs(), vec![snap]).await.unwrap();
        let candidate = &outcome.candidates[0];
        assert!(!candidate.gates.overall_passed);
        assert!(candidate
            .gates
            .results
            .iter()
            .any(|r| r.name == "news_shock" && !r.passed));
        assert!(!candidate.trade_allowed);
    }

    #[tokio::test]
    async fn premove_observations_are_evaluated() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        let mut snap = snapshot("BTC-USD", 72);
        snap.premove = Some(PremoveInputs {
            funding_divergence: true,
            supply_squeeze: true,
            whale_accumulation: false,
            volume_confirm: None,
        });

        let outcome = p.run_scan(regime_inputs(), vec![snap]).await.unwrap();
        let decision = outcome.candidates[0].premove.as_ref().unwrap();
        assert_eq!(decision.gates_passed, 2);
        assert!(decision.qualified);
    }

    #[test]
    fn sequence_guard_semantics() {
        let guard = SequenceGuard::new();
        // Warm data admits without sequence.
        assert!(guard.admit("kraken", "BTC-USD", SourceTier::Warm, None));
        // Hot without a sequence is refused.
        assert!(!guard.admit("kraken", "BTC-USD", SourceTier::Hot, None));
        // Monotone non-decreasing admits, including equal.
        assert!(guard.admit("kraken", "BTC-USD", SourceTier::Hot, Some(5)));
        assert!(guard.admit("kraken", "BTC-USD", SourceTier::Hot, Some(5)));
        assert!(guard.admit("kraken", "BTC-USD", SourceTier::Hot, Some(9)));
        assert!(!guard.admit("kraken", "BTC-USD", SourceTier::Hot, Some(8)));
        // Other venue/symbol pairs are independent.
        assert!(guard.admit("binance", "BTC-USD", SourceTier::Hot, Some(1)));
        assert!(guard.admit("kraken", "ETH-USD", SourceTier::Hot, Some(1)));
    }
}
