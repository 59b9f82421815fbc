// =============================================================================
// Telemetry — Prometheus metric families
// =============================================================================
//
// Counter families end in `_total`, duration histograms in `_seconds`. The
// recorder is installed once at startup; the rendered text surface is
// served from `GET /metrics`.
// =============================================================================

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const PROVIDER_REQUESTS_TOTAL: &str = "cryptorun_provider_requests_total";
pub const PROVIDER_LATENCY_SECONDS: &str = "cryptorun_provider_latency_seconds";
pub const SCAN_DURATION_SECONDS: &str = "cryptorun_scan_duration_seconds";
pub const PAIRS_PROCESSED_TOTAL: &str = "cryptorun_pairs_processed_total";
pub const ERRORS_TOTAL: &str = "cryptorun_errors_total";

/// Install the Prometheus recorder and describe every family. Returns the
/// render handle for the HTTP surface.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;

    describe_counter!(
        PROVIDER_REQUESTS_TOTAL,
        Unit::Count,
        "Provider requests by venue and outcome"
    );
    describe_histogram!(
        PROVIDER_LATENCY_SECONDS,
        Unit::Seconds,
        "Provider request latency"
    );
    describe_histogram!(SCAN_DURATION_SECONDS, Unit::Seconds, "Full scan duration");
    describe_counter!(
        PAIRS_PROCESSED_TOTAL,
        Unit::Count,
        "Symbols processed across scans"
    );
    describe_counter!(ERRORS_TOTAL, Unit::Count, "Errors by kind");

    Ok(handle)
}

pub fn record_provider_request(venue: &str, ok: bool, latency_secs: f64) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(PROVIDER_REQUESTS_TOTAL, 1, "venue" => venue.to_string(), "outcome" => outcome);
    histogram!(PROVIDER_LATENCY_SECONDS, latency_secs, "venue" => venue.to_string());
}

pub fn record_scan(duration_secs: f64, pairs: u64) {
    histogram!(SCAN_DURATION_SECONDS, duration_secs);
    counter!(PAIRS_PROCESSED_TOTAL, pairs);
}

pub fn record_error(kind: &'static str) {
    counter!(ERRORS_TOTAL, 1, "kind" => kind);
}

/// Out-of-order hot envelopes dropped by the sequence guard.
pub fn record_sequence_drop(venue: &str) {
    counter!(ERRORS_TOTAL, 1, "kind" => "sequence_out_of_order", "venue" => venue.to_string());
}
