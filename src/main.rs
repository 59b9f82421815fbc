// =============================================================================
// CryptoRun — Main Entry Point
// =============================================================================
//
// Momentum/dip scanner: periodic scans rank the configured universe under
// the current market regime, with full point-in-time explainability served
// over the read-only HTTP surface.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod artifacts;
mod config;
mod errors;
mod events;
mod facade;
mod gates;
mod indicators;
mod pipeline;
mod pit;
mod provider;
mod regime;
mod scheduler;
mod scoring;
mod telemetry;
mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::artifacts::{write_qa_report, QaPhase, QaReport};
use crate::config::ScannerConfig;
use crate::events::aggregate_heat;
use crate::facade::RestClient;
use crate::gates::PremoveInputs;
use crate::pipeline::SymbolSnapshot;
use crate::pit::PitStore;
use crate::regime::RegimeInputs;
use crate::scheduler::{adjust_cache_ttls, apply_provider_fallbacks, JobSpec, JobType};
use crate::scoring::MeasurementSnapshot;
use crate::types::SourceTier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║          CryptoRun Scanner — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_dir =
        std::env::var("CRYPTORUN_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let mut config = ScannerConfig::load(&config_dir).map_err(|e| {
        error!(error = %e, "configuration is invalid, refusing to start");
        anyhow::anyhow!("{e}")
    })?;

    // Override symbols from env if available.
    if let Ok(syms) = std::env::var("CRYPTORUN_SYMBOLS") {
        let symbols: Vec<String> = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !symbols.is_empty() {
            config.runtime.symbols = symbols;
        }
    }
    info!(symbols = ?config.runtime.symbols, "configured universe");

    // ── 2. Telemetry ─────────────────────────────────────────────────────
    let metrics_handle = match telemetry::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder unavailable, /metrics disabled");
            None
        }
    };

    // ── 3. PIT store & shared state ──────────────────────────────────────
    let data_dir = std::env::var("CRYPTORUN_DATA_DIR").unwrap_or_else(|_| "out/pit".to_string());
    let pit = Arc::new(PitStore::open(&data_dir).map_err(|e| anyhow::anyhow!("{e}"))?);

    let state = Arc::new(
        AppState::new(config.clone(), pit, metrics_handle)
            .map_err(|e| anyhow::anyhow!("{e}"))?,
    );

    // ── 4. Provider REST client ──────────────────────────────────────────
    let mut base_urls = HashMap::new();
    for venue in config.limits.venues.keys() {
        let env_key = format!("CRYPTORUN_BASE_URL_{}", venue.to_uppercase());
        let url = std::env::var(&env_key)
            .unwrap_or_else(|_| format!("https://api.{venue}.example.com"));
        base_urls.insert(venue.clone(), url);
    }
    let client = Arc::new(RestClient::new(base_urls));

    // ── 5. Job registry ──────────────────────────────────────────────────
    let scan_timeout = Duration::from_secs(config.runtime.scan_timeout_secs);
    state.scheduler.register(JobSpec {
        name: "scan.hot".to_string(),
        every: Duration::from_secs(15 * 60),
        job_type: JobType::ScanHot,
        timeout: scan_timeout,
        config: serde_json::json!({}),
    });
    state.scheduler.register(JobSpec {
        name: "premove.hourly".to_string(),
        every: Duration::from_secs(60 * 60),
        job_type: JobType::PremoveHourly,
        timeout: scan_timeout,
        config: serde_json::json!({}),
    });
    state.scheduler.register(JobSpec {
        name: "regime-refresh".to_string(),
        every: Duration::from_secs(4 * 60 * 60),
        job_type: JobType::RegimeRefresh,
        timeout: Duration::from_secs(60),
        config: serde_json::json!({}),
    });
    state.scheduler.register(JobSpec {
        name: "provider-health".to_string(),
        every: Duration::from_secs(5 * 60),
        job_type: JobType::ProviderHealth,
        timeout: Duration::from_secs(60),
        config: serde_json::json!({}),
    });

    // ── 6. Dispatcher loop ───────────────────────────────────────────────
    let dispatch_state = state.clone();
    let dispatch_client = client.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            for spec in dispatch_state.scheduler.due_jobs(std::time::Instant::now()) {
                let job_state = dispatch_state.clone();
                let job_client = dispatch_client.clone();
                let scheduler = dispatch_state.scheduler.clone();
                tokio::spawn(async move {
                    let outcome = match spec.job_type {
                        JobType::ScanHot | JobType::PremoveHourly => {
                            scheduler
                                .run_job(&spec, |_| run_scan_job(job_state.clone(), job_client))
                                .await
                        }
                        JobType::RegimeRefresh => {
                            scheduler
                                .run_job(&spec, |_| run_regime_job(job_state.clone(), job_client))
                                .await
                        }
                        JobType::ProviderHealth => {
                            scheduler
                                .run_job(&spec, |_| run_health_job(job_state.clone()))
                                .await
                        }
                    };
                    info!(job = %spec.name, ?outcome, "job dispatched");
                });
            }
        }
    });

    // ── 7. HTTP surface ──────────────────────────────────────────────────
    let api_addr =
        std::env::var("CRYPTORUN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    let api_state = state.clone();
    tokio::spawn(async move {
        let app = api::router(api_state);
        let listener = tokio::net::TcpListener::bind(&api_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %api_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    let runtime = state.config.read().runtime.clone();
    if let Err(e) = runtime.save(format!("{config_dir}/runtime_config.json")) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("CryptoRun shut down complete.");
    Ok(())
}

// =============================================================================
// Job bodies
// =============================================================================

/// Assemble per-symbol snapshots through the facade and run one scan.
async fn run_scan_job(state: Arc<AppState>, client: Arc<RestClient>) -> anyhow::Result<()> {
    let (symbols, venue) = {
        let config = state.config.read();
        let venue = config
            .runtime
            .venues
            .first()
            .cloned()
            .unwrap_or_else(|| "kraken".to_string());
        (config.runtime.symbols.clone(), venue)
    };

    let mut snapshots: Vec<SymbolSnapshot> = Vec::with_capacity(symbols.len());
    let mut benchmark_closes: Vec<f64> = Vec::new();
    let catalyst_heat = aggregate_heat(&state.catalyst_events.read(), Utc::now());

    for symbol in &symbols {
        let fetch_client = client.clone();
        let sym = symbol.clone();
        let envelope = state
            .facade
            .fetch_envelope(&venue, symbol, SourceTier::Warm, move |effective| {
                let c = fetch_client.clone();
                async move { c.fetch_ticker(&effective, &sym, SourceTier::Warm).await }
            })
            .await;

        let outcome = match envelope {
            Ok(o) => o,
            Err(e) => {
                state.push_error(e.kind(), format!("{symbol}: {e}"));
                continue;
            }
        };

        let bars = match client.fetch_bars(&outcome.served_by, symbol, 96).await {
            Ok(b) => b,
            Err(e) => {
                state.push_error(e.kind(), format!("{symbol} bars: {e}"));
                continue;
            }
        };

        if benchmark_closes.is_empty() {
            benchmark_closes = indicators::closes(&bars);
        }

        let health = state.facade.health_tracker();
        snapshots.push(SymbolSnapshot {
            symbol: symbol.clone(),
            venue: venue.clone(),
            source_tier: outcome.envelope.source_tier,
            sequence: outcome.envelope.sequence,
            hourly_bars: bars,
            social: 0.0,
            measurements: MeasurementSnapshot::default(),
            spread_bps: outcome.envelope.order_book.as_ref().map(|b| b.spread_bps),
            depth_usd: outcome
                .envelope
                .order_book
                .as_ref()
                .map(|b| b.depth_usd_2pc),
            vadr: outcome.envelope.order_book.as_ref().map(|b| b.vadr),
            signal_ts: outcome.envelope.timestamp,
            p99_latency_ms: health.p99(&outcome.served_by),
            data_quality_score: outcome.quality.quality_score,
            catalyst_heat: catalyst_heat.get(symbol).copied().unwrap_or(0.0),
            dip: None,
            premove: premove_observations(&outcome.envelope),
        });
    }

    if snapshots.is_empty() {
        anyhow::bail!("no symbol produced usable data");
    }

    let regime_inputs = RegimeInputs {
        realized_vol_7d: indicators::realized_vol(&benchmark_closes)
            .unwrap_or(0.30)
            .clamp(0.0, 2.5),
        pct_above_20ma: indicators::pct_above_ma(&benchmark_closes, 20, 24).unwrap_or(0.5),
        breadth_thrust: 0.5,
        now: Utc::now(),
    };

    let outcome = state
        .pipeline
        .run_scan(regime_inputs, snapshots)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    state.record_scan(outcome);
    Ok(())
}

/// Derive pre-move gate observations from whatever the envelope carries.
/// Without a derivatives feed only the depth-drain leg of the supply gate
/// can fire; the combination stays honest at 0-2 of 3.
fn premove_observations(
    envelope: &crate::types::Envelope,
) -> Option<PremoveInputs> {
    let book = envelope.order_book.as_ref()?;
    let funding_z = envelope.prices.get("funding_z").copied().unwrap_or(0.0);
    let reserve_ratio = envelope.prices.get("reserve_ratio").copied().unwrap_or(1.0);
    let whale_inflow = envelope.volumes.get("whale_net_usd").copied().unwrap_or(0.0);
    Some(PremoveInputs::from_signals(
        funding_z,
        reserve_ratio,
        book.depth_usd_2pc,
        whale_inflow,
        None,
    ))
}

/// Recompute regime inputs from the benchmark symbol and let the detector's
/// cadence decide whether a re-evaluation actually happens.
async fn run_regime_job(state: Arc<AppState>, client: Arc<RestClient>) -> anyhow::Result<()> {
    let (symbol, venue) = {
        let config = state.config.read();
        (
            config
                .runtime
                .symbols
                .first()
                .cloned()
                .unwrap_or_else(|| "BTC-USD".to_string()),
            config
                .runtime
                .venues
                .first()
                .cloned()
                .unwrap_or_else(|| "kraken".to_string()),
        )
    };

    let bars = client
        .fetch_bars(&venue, &symbol, 7 * 24)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let closes = indicators::closes(&bars);

    let detection = state
        .detector
        .detect(RegimeInputs {
            realized_vol_7d: indicators::realized_vol(&closes).unwrap_or(0.30).clamp(0.0, 2.5),
            pct_above_20ma: indicators::pct_above_ma(&closes, 20, 24).unwrap_or(0.5),
            breadth_thrust: 0.5,
            now: Utc::now(),
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    info!(regime = %detection.regime, confidence = detection.confidence, "regime refreshed");
    state.increment_version();
    Ok(())
}

/// Derive per-venue health, apply fallbacks and TTL adaptation, and write
/// the QA report.
async fn run_health_job(state: Arc<AppState>) -> anyhow::Result<()> {
    let config = state.config.read().clone();
    let tracker = state.facade.health_tracker();
    let limiter = state.facade.limiter();

    let mut results = Vec::new();
    for venue in config.limits.venues.keys() {
        let budget = match limiter.budget(venue) {
            Ok(b) => b,
            Err(_) => continue,
        };
        let circuit_state = state
            .facade
            .circuit(venue)
            .map(|c| c.state())
            .unwrap_or(crate::provider::CircuitState::Closed);
        results.push(tracker.health(venue, &budget, circuit_state));
    }

    let defaults: HashMap<String, String> = config
        .limits
        .venues
        .iter()
        .filter_map(|(v, l)| l.fallback.clone().map(|fb| (v.clone(), fb)))
        .collect();
    let applied = apply_provider_fallbacks(&results, &defaults);
    let adjusted = adjust_cache_ttls(&results, &state.facade.cache());

    let report = QaReport {
        generated_at: Utc::now(),
        phases: vec![
            QaPhase {
                name: "provider_probes".to_string(),
                passed: results.iter().all(|h| h.healthy()),
                detail: format!("{} venues probed", results.len()),
            },
            QaPhase {
                name: "fallback_assignment".to_string(),
                passed: true,
                detail: format!("{} fallbacks applied", applied.len()),
            },
            QaPhase {
                name: "ttl_adaptation".to_string(),
                passed: true,
                detail: format!("{} venues TTL-doubled", adjusted.len()),
            },
        ],
        provider_health: results
            .into_iter()
            .map(|h| (h.venue.clone(), h))
            .collect(),
    };

    let out_dir = std::env::var("CRYPTORUN_OUT_DIR").unwrap_or_else(|_| "out".to_string());
    write_qa_report(out_dir, &report)?;
    state.increment_version();
    Ok(())
}
