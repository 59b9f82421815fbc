// =============================================================================
// REST API — read-only JSON surface (Axum 0.7)
// =============================================================================
//
// Routes:
//   GET /candidates?n=<1..200>  ranked candidate list with gate status
//   GET /explain/:symbol        full attribution for one symbol
//   GET /regime                 current regime + weights (Cache-Control 30s)
//   GET /metrics                Prometheus text
//   GET /health                 liveness
//
// Failures return `{error, message, timestamp}`; non-GET methods receive
// 405 with an `Allow: GET` header from the method router.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{Duration, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::errors::ErrorBody;
use crate::pipeline::CandidateResult;
use crate::types::SYMBOL_PATTERN;

/// Score at or above which the score gate reports pass.
const SCORE_GATE_MIN: f64 = 2.0;

/// Build the full REST router with CORS and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/candidates", get(candidates))
        .route("/explain/:symbol", get(explain))
        .route("/regime", get(regime))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// /health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "state_version": state.current_version(),
        "uptime_secs": state.uptime_secs(),
        "server_time": Utc::now().to_rfc3339(),
    }))
}

// =============================================================================
// /candidates
// =============================================================================

#[derive(Debug, Deserialize)]
struct CandidatesQuery {
    n: Option<String>,
}

async fn candidates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CandidatesQuery>,
) -> impl IntoResponse {
    let requested = match query.n.as_deref() {
        None => 20,
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) if (1..=200).contains(&n) => n,
            _ => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(
                        serde_json::to_value(ErrorBody::new(
                            "INVALID_INPUT",
                            format!("n must be an integer in 1..=200, got '{raw}'"),
                        ))
                        .unwrap_or_default(),
                    ),
                )
                    .into_response();
            }
        },
    };

    let scan = state.last_scan.read().clone();
    let Some(scan) = scan else {
        let err = crate::errors::ScanError::NotFound("no scan has completed yet".into());
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::to_value(ErrorBody::from_error(&err)).unwrap_or_default()),
        )
            .into_response();
    };

    let total_count = scan.candidates.len();
    let top: Vec<&CandidateResult> = scan.candidates.iter().take(requested).collect();

    let candidates_json: Vec<serde_json::Value> = top.iter().map(|c| candidate_json(c)).collect();

    let passed_all = scan
        .candidates
        .iter()
        .filter(|c| c.gates.overall_passed)
        .count();
    let avg_score = if total_count > 0 {
        scan.candidates
            .iter()
            .map(|c| c.score.final_score)
            .sum::<f64>()
            / total_count as f64
    } else {
        0.0
    };

    // Pass rate per gate name over the whole scan.
    let mut gate_totals: std::collections::BTreeMap<String, (usize, usize)> = Default::default();
    for c in &scan.candidates {
        for r in &c.gates.results {
            let entry = gate_totals.entry(r.name.clone()).or_insert((0, 0));
            entry.1 += 1;
            if r.passed {
                entry.0 += 1;
            }
        }
    }
    let gate_pass_rates: serde_json::Map<String, serde_json::Value> = gate_totals
        .into_iter()
        .map(|(name, (passed, total))| {
            (name, json!(passed as f64 / total.max(1) as f64))
        })
        .collect();

    Json(json!({
        "timestamp": scan.started_at.to_rfc3339(),
        "regime": scan.regime.regime.to_string(),
        "total_count": total_count,
        "requested": requested,
        "candidates": candidates_json,
        "summary": {
            "passed_all_gates": passed_all,
            "avg_score": avg_score,
            "gate_pass_rates": gate_pass_rates,
        },
    }))
    .into_response()
}

fn candidate_json(c: &CandidateResult) -> serde_json::Value {
    let micro = c
        .gates
        .results
        .iter()
        .find(|r| r.name == "microstructure")
        .map(|r| {
            json!({
                "spread_bps": r.metrics.get("spread_bps"),
                "depth_usd": r.metrics.get("depth_usd"),
                "vadr": r.metrics.get("vadr"),
            })
        })
        .unwrap_or(serde_json::Value::Null);

    let vadr_gate = c
        .gates
        .results
        .iter()
        .find(|r| r.name == "microstructure")
        .map(|r| r.passed)
        .unwrap_or(false);

    json!({
        "symbol": c.symbol,
        "score": c.score.final_score,
        "rank": c.score.rank,
        "gate_status": {
            "overall_passed": c.gates.overall_passed,
            "score_gate": c.score.final_score >= SCORE_GATE_MIN,
            "vadr_gate": vadr_gate,
        },
        "microstructure": micro,
        "attribution": {
            "momentum_score": c.score.momentum_core,
            "weight_profile": c.score.regime.to_string(),
        },
    })
}

// =============================================================================
// /explain/:symbol
// =============================================================================

async fn explain(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let pattern = Regex::new(SYMBOL_PATTERN).expect("symbol pattern is valid");
    if !pattern.is_match(&symbol) {
        return (
            StatusCode::BAD_REQUEST,
            Json(
                serde_json::to_value(ErrorBody::new(
                    "INVALID_INPUT",
                    format!("symbol '{symbol}' does not match {SYMBOL_PATTERN}"),
                ))
                .unwrap_or_default(),
            ),
        )
            .into_response();
    }

    let scan = state.last_scan.read().clone();
    let candidate = scan
        .as_ref()
        .and_then(|s| s.candidates.iter().find(|c| c.symbol == symbol).cloned());

    match (scan, candidate) {
        (Some(scan), Some(c)) => Json(json!({
            "symbol": c.symbol,
            "timestamp": scan.started_at.to_rfc3339(),
            "regime": scan.regime.regime.to_string(),
            "score": c.score,
            "gates": c.gates,
            "guards": {
                "results": c.guard_results,
                "summary": c.guard_summary,
            },
            "insights": c.insights,
            "attribution": {
                "pre_orthogonal": c.score.pre_orthogonal,
                "post_orthogonal": c.score.post_orthogonal,
                "weighted_breakdown": c.score.weighted_breakdown,
                "social_clamped": c.score.social_clamped,
                "measurements_boost": c.score.boost,
                "series_source": c.series_source,
            },
        }))
        .into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            Json(
                serde_json::to_value(ErrorBody::new(
                    "NOT_FOUND",
                    format!("symbol '{symbol}' not present in the latest scan"),
                ))
                .unwrap_or_default(),
            ),
        )
            .into_response(),
    }
}

// =============================================================================
// /regime
// =============================================================================

async fn regime(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(detection) = state.detector.current() else {
        return (
            StatusCode::NOT_FOUND,
            Json(
                serde_json::to_value(ErrorBody::new(
                    "NOT_FOUND",
                    "no regime detection has run yet",
                ))
                .unwrap_or_default(),
            ),
        )
            .into_response();
    };

    let weights = state
        .config
        .read()
        .weights
        .for_regime(detection.regime)
        .ok();

    let signal = |name: &str| -> f64 {
        detection
            .indicators
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value)
            .unwrap_or(0.0)
    };

    let now = Utc::now();
    let switched_today = detection.last_changed_at.date_naive() == now.date_naive();
    let duration_hours =
        (now - detection.last_changed_at).num_minutes() as f64 / 60.0;
    let next_evaluation = detection.detected_at + Duration::hours(4);

    let body = json!({
        "current_regime": detection.regime.to_string(),
        "regime_numeric": detection.regime.numeric(),
        "health": {
            "volatility_7d": signal("realized_vol_7d"),
            "above_ma_pct": signal("pct_above_20ma"),
            "breadth_thrust": signal("breadth_thrust"),
            "stability_score": detection.confidence,
        },
        "weights": weights.map(|w| json!({
            "momentum": w.momentum_core,
            "technical": w.technical,
            "volume": w.volume,
            "quality": w.quality,
            "catalyst": w.social_cap / 100.0,
        })),
        "switches_today": if switched_today && !detection.stable { 1 } else { 0 },
        "avg_duration_hours": duration_hours,
        "next_evaluation": next_evaluation.to_rfc3339(),
        "history": [{
            "regime": detection.regime.to_string(),
            "detected_at": detection.detected_at.to_rfc3339(),
            "confidence": detection.confidence,
            "stable": detection.stable,
        }],
    });

    (
        [(header::CACHE_CONTROL, "max-age=30")],
        Json(body),
    )
        .into_response()
}

// =============================================================================
// /metrics
// =============================================================================

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(
                serde_json::to_value(ErrorBody::new(
                    "NOT_FOUND",
                    "metrics recorder not installed",
                ))
                .unwrap_or_default(),
            ),
        )
            .into_response(),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerConfig;
    use crate::pipeline::{ScanPipeline, SymbolSnapshot};
    use crate::pit::PitStore;
    use crate::regime::RegimeInputs;
    use crate::scoring::MeasurementSnapshot;
    use crate::types::SourceTier;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn state_with_scan() -> Arc<AppState> {
        let dir = tempfile::tempdir().unwrap();
        let pit = Arc::new(PitStore::open(dir.path()).unwrap());
        let state = Arc::new(
            AppState::new(ScannerConfig::default(), pit.clone(), None).unwrap(),
        );

        // Run a small real scan so the surface has data. Bars end at "now"
        // so gate timestamps line up with execution time.
        let start_ms = Utc::now().timestamp_millis() - 72 * 3_600_000;
        let bars: Vec<crate::indicators::Bar> = (0..72)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                crate::indicators::Bar::new(
                    start_ms + i as i64 * 3_600_000,
                    base,
                    base + 1.0,
                    base - 1.0,
                    base + 0.3,
                    1_000.0,
                )
            })
            .collect();
        let signal_ts = Utc::now();
        let snapshots: Vec<SymbolSnapshot> = ["BTC-USD", "ETH-USD", "SOL-USD"]
            .iter()
            .map(|sym| SymbolSnapshot {
                symbol: sym.to_string(),
                venue: "kraken".to_string(),
                source_tier: SourceTier::Warm,
                sequence: None,
                hourly_bars: bars.clone(),
                social: 1.0,
                measurements: MeasurementSnapshot::default(),
                spread_bps: Some(10.0),
                depth_usd: Some(500_000.0),
                vadr: Some(2.5),
                signal_ts,
                p99_latency_ms: 100.0,
                data_quality_score: 95.0,
                catalyst_heat: 0.0,
                dip: None,
                premove: None,
            })
            .collect();

        let pipeline = ScanPipeline::new(
            ScannerConfig::default(),
            state.detector.clone(),
            pit,
        )
        .unwrap();
        let outcome = pipeline
            .run_scan(
                RegimeInputs {
                    realized_vol_7d: 0.30,
                    pct_above_20ma: 0.50,
                    breadth_thrust: 0.50,
                    now: Utc::now(),
                },
                snapshots,
            )
            .await
            .unwrap();
        state.record_scan(outcome);
        // Seed the shared detector too.
        state
            .detector
            .detect(RegimeInputs {
                realized_vol_7d: 0.30,
                pct_above_20ma: 0.50,
                breadth_thrust: 0.50,
                now: Utc::now(),
            })
            .unwrap();
        state
    }

    async fn get_json(
        app: Router,
        uri: &str,
    ) -> (StatusCode, serde_json::Value, axum::http::HeaderMap) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value, headers)
    }

    #[tokio::test]
    async fn candidates_returns_ranked_list() {
        let state = state_with_scan().await;
        let (status, body, _) = get_json(router(state), "/candidates?n=2").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requested"], 2);
        assert_eq!(body["total_count"], 3);
        let candidates = body["candidates"].as_array().unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0]["rank"], 1);
        assert!(candidates[0]["gate_status"]["overall_passed"].as_bool().unwrap());
        assert!(candidates[0]["gate_status"]["vadr_gate"].as_bool().unwrap());
        assert!(body["summary"]["gate_pass_rates"]["freshness"].as_f64().is_some());
    }

    #[tokio::test]
    async fn candidates_json_is_stable_under_reserialization() {
        let state = state_with_scan().await;
        let (_, body, _) = get_json(router(state), "/candidates?n=5").await;

        let reserialized = serde_json::to_string(&body).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&reserialized).unwrap();
        assert_eq!(body, reparsed);
    }

    #[tokio::test]
    async fn candidates_invalid_n_is_400_with_error_body() {
        let state = state_with_scan().await;

        for uri in ["/candidates?n=0", "/candidates?n=201", "/candidates?n=abc"] {
            let (status, body, _) = get_json(router(state.clone()), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"], "INVALID_INPUT");
            assert!(body["message"].as_str().is_some());
            assert!(body["timestamp"].as_str().is_some());
        }
    }

    #[tokio::test]
    async fn candidates_non_get_is_405_with_allow_header() {
        let state = state_with_scan().await;
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/candidates")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let allow = response
            .headers()
            .get(header::ALLOW)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(allow.contains("GET"), "Allow header was '{allow}'");
    }

    #[tokio::test]
    async fn explain_returns_full_attribution() {
        let state = state_with_scan().await;
        let (status, body, _) = get_json(router(state), "/explain/BTC-USD").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "BTC-USD");
        assert!(body["score"]["final_score"].as_f64().is_some());
        assert!(body["gates"]["results"].as_array().unwrap().len() >= 3);
        assert!(body["attribution"]["weighted_breakdown"]["momentum_core"].as_f64().is_some());
        assert!(body["guards"]["summary"]["overall_score"].as_f64().is_some());
    }

    #[tokio::test]
    async fn explain_rejects_malformed_symbols() {
        let state = state_with_scan().await;
        for bad in ["btc-usd", "BTCUSD", "TOOLONG-USDT"] {
            let (status, body, _) = get_json(router(state.clone()), &format!("/explain/{bad}")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{bad}");
            assert_eq!(body["error"], "INVALID_INPUT");
        }
    }

    #[tokio::test]
    async fn explain_unknown_symbol_is_404() {
        let state = state_with_scan().await;
        let (status, body, _) = get_json(router(state), "/explain/ZZZ-USD").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn regime_has_cache_control_and_numeric_code() {
        let state = state_with_scan().await;
        let (status, body, headers) = get_json(router(state), "/regime").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "max-age=30");
        let regime = body["current_regime"].as_str().unwrap();
        assert!(["trending_bull", "choppy", "high_vol"].contains(&regime));
        let numeric = body["regime_numeric"].as_u64().unwrap();
        assert!(numeric <= 2);
        assert!(body["weights"]["momentum"].as_f64().unwrap() >= 0.40);
        assert!(body["health"]["stability_score"].as_f64().is_some());
        assert!(body["next_evaluation"].as_str().is_some());
        assert!(body["history"].as_array().unwrap().len() >= 1);
    }

    #[tokio::test]
    async fn empty_state_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let pit = Arc::new(PitStore::open(dir.path()).unwrap());
        let state =
            Arc::new(AppState::new(ScannerConfig::default(), pit, None).unwrap());

        let (status, body, _) = get_json(router(state.clone()), "/candidates").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");

        let (status, _, _) = get_json(router(state), "/regime").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_endpoint_reports_version() {
        let state = state_with_scan().await;
        let (status, body, _) = get_json(router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["state_version"].as_u64().unwrap() >= 1);
    }
}
