// =============================================================================
// Configuration — YAML threshold files + hot-reloadable runtime settings
// =============================================================================
//
// Four YAML files are loaded once at startup (weights, guards, feature
// flags, provider limits); validation failures there are fatal. The runtime
// config (symbols, scan cadence, bind address) is JSON and hot-reloadable
// with an atomic tmp + rename save so a crash mid-write never corrupts it.
//
// Every field carries a serde default so adding fields never breaks loading
// an older file.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{ScanError, ScanResult};
use crate::regime::weights::WeightsConfig;

// =============================================================================
// Default-value helpers (required by serde `default = "..."`)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTC-USD".to_string(),
        "ETH-USD".to_string(),
        "SOL-USD".to_string(),
        "XRP-USD".to_string(),
        "ADA-USD".to_string(),
    ]
}

fn default_venues() -> Vec<String> {
    vec![
        "kraken".to_string(),
        "binance".to_string(),
        "okx".to_string(),
        "coinbase".to_string(),
    ]
}

fn default_max_concurrency() -> usize {
    10
}

fn default_scan_timeout_secs() -> u64 {
    30
}

fn default_step_timeout_secs() -> u64 {
    5
}

fn default_pit_timeout_secs() -> u64 {
    10
}

fn default_max_bars_age() -> u32 {
    2
}

fn default_atr_factor() -> f64 {
    1.2
}

fn default_momentum_24h_threshold() -> f64 {
    12.0
}

fn default_rsi_4h_threshold() -> f64 {
    70.0
}

fn default_accel_override() -> f64 {
    2.0
}

fn default_max_delay_secs() -> i64 {
    30
}

fn default_p99_latency_ms() -> f64 {
    400.0
}

fn default_max_spread_bps() -> f64 {
    50.0
}

fn default_min_depth_usd() -> f64 {
    100_000.0
}

fn default_min_vadr() -> f64 {
    1.75
}

fn default_min_gates_passed() -> usize {
    2
}

fn default_return_24h_min() -> f64 {
    -15.0
}

fn default_accel_rebound() -> f64 {
    3.0
}

fn default_rebound_bars() -> u32 {
    4
}

fn default_max_lower_highs() -> u32 {
    2
}

fn default_lower_high_window() -> u32 {
    12
}

fn default_bars_to_live() -> u32 {
    8
}

fn default_max_drift_pct() -> f64 {
    5.0
}

fn default_rpm() -> u32 {
    60
}

fn default_monthly() -> u64 {
    100_000
}

fn default_venue_concurrency() -> usize {
    4
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_jitter_min_ms() -> u64 {
    50
}

fn default_jitter_max_ms() -> u64 {
    200
}

fn default_clock_skew_secs() -> i64 {
    3
}

// =============================================================================
// Guards / gates thresholds (config/guards.yaml)
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FreshnessConfig {
    #[serde(default = "default_max_bars_age")]
    pub max_bars_age: u32,
    #[serde(default = "default_atr_factor")]
    pub atr_factor: f64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_bars_age: default_max_bars_age(),
            atr_factor: default_atr_factor(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FatigueConfig {
    #[serde(default = "default_momentum_24h_threshold")]
    pub momentum_24h_threshold: f64,
    #[serde(default = "default_rsi_4h_threshold")]
    pub rsi_4h_threshold: f64,
    #[serde(default = "default_accel_override")]
    pub accel_override: f64,
}

impl Default for FatigueConfig {
    fn default() -> Self {
        Self {
            momentum_24h_threshold: default_momentum_24h_threshold(),
            rsi_4h_threshold: default_rsi_4h_threshold(),
            accel_override: default_accel_override(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LateFillConfig {
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: i64,
    #[serde(default = "default_p99_latency_ms")]
    pub p99_latency_ms: f64,
    #[serde(default = "default_atr_factor")]
    pub atr_factor: f64,
}

impl Default for LateFillConfig {
    fn default() -> Self {
        Self {
            max_delay_secs: default_max_delay_secs(),
            p99_latency_ms: default_p99_latency_ms(),
            atr_factor: default_atr_factor(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MicrostructureConfig {
    #[serde(default = "default_max_spread_bps")]
    pub max_spread_bps: f64,
    #[serde(default = "default_min_depth_usd")]
    pub min_depth_usd: f64,
    #[serde(default = "default_min_vadr")]
    pub min_vadr: f64,
}

impl Default for MicrostructureConfig {
    fn default() -> Self {
        Self {
            max_spread_bps: default_max_spread_bps(),
            min_depth_usd: default_min_depth_usd(),
            min_vadr: default_min_vadr(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PremoveConfig {
    #[serde(default = "default_min_gates_passed")]
    pub min_gates_passed: usize,
    #[serde(default)]
    pub require_volume_confirm: bool,
}

impl Default for PremoveConfig {
    fn default() -> Self {
        Self {
            min_gates_passed: default_min_gates_passed(),
            require_volume_confirm: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DipConfig {
    /// 24h return at or below this (percent) marks a news shock.
    #[serde(default = "default_return_24h_min")]
    pub return_24h_min: f64,
    /// Required rebound acceleration (percent) after a news shock.
    #[serde(default = "default_accel_rebound")]
    pub accel_rebound: f64,
    /// Bars in which the rebound must appear.
    #[serde(default = "default_rebound_bars")]
    pub rebound_bars: u32,
    /// Lower-high count at or above this blocks (stair-step pattern).
    #[serde(default = "default_max_lower_highs")]
    pub max_lower_highs: u32,
    #[serde(default = "default_lower_high_window")]
    pub lower_high_window: u32,
    /// Bars after dip detection before the signal expires.
    #[serde(default = "default_bars_to_live")]
    pub bars_to_live: u32,
    /// Price drift from the dip price (percent) that invalidates execution.
    #[serde(default = "default_max_drift_pct")]
    pub max_drift_pct: f64,
}

impl Default for DipConfig {
    fn default() -> Self {
        Self {
            return_24h_min: default_return_24h_min(),
            accel_rebound: default_accel_rebound(),
            rebound_bars: default_rebound_bars(),
            max_lower_highs: default_max_lower_highs(),
            lower_high_window: default_lower_high_window(),
            bars_to_live: default_bars_to_live(),
            max_drift_pct: default_max_drift_pct(),
        }
    }
}

/// All gate and guard thresholds, loaded from `config/guards.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardsConfig {
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub fatigue: FatigueConfig,
    #[serde(default)]
    pub late_fill: LateFillConfig,
    #[serde(default)]
    pub microstructure: MicrostructureConfig,
    #[serde(default)]
    pub premove: PremoveConfig,
    #[serde(default)]
    pub dip: DipConfig,
}

impl GuardsConfig {
    pub fn validate(&self) -> ScanResult<()> {
        if self.freshness.atr_factor <= 0.0 || !self.freshness.atr_factor.is_finite() {
            return Err(ScanError::ConfigurationError(
                "freshness.atr_factor must be positive".into(),
            ));
        }
        if self.late_fill.max_delay_secs <= 0 {
            return Err(ScanError::ConfigurationError(
                "late_fill.max_delay_secs must be positive".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.fatigue.rsi_4h_threshold) {
            return Err(ScanError::ConfigurationError(format!(
                "fatigue.rsi_4h_threshold {} outside [0, 100]",
                self.fatigue.rsi_4h_threshold
            )));
        }
        if self.premove.min_gates_passed > 3 {
            return Err(ScanError::ConfigurationError(format!(
                "premove.min_gates_passed {} exceeds the 3 available gates",
                self.premove.min_gates_passed
            )));
        }
        if self.microstructure.max_spread_bps <= 0.0 || self.microstructure.min_vadr <= 0.0 {
            return Err(ScanError::ConfigurationError(
                "microstructure thresholds must be positive".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Provider limits (config/limits.yaml)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueLimits {
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    #[serde(default = "default_monthly")]
    pub monthly: u64,
    #[serde(default = "default_venue_concurrency")]
    pub max_concurrency: usize,
    /// Aggregator venue requests are routed to when this one degrades.
    #[serde(default)]
    pub fallback: Option<String>,
}

impl Default for VenueLimits {
    fn default() -> Self {
        Self {
            rpm: default_rpm(),
            monthly: default_monthly(),
            max_concurrency: default_venue_concurrency(),
            fallback: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            max_ms: default_backoff_max_ms(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
        }
    }
}

/// Per-venue budgets and the shared backoff profile, from
/// `config/limits.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub venues: HashMap<String, VenueLimits>,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let mut venues = HashMap::new();
        venues.insert(
            "kraken".to_string(),
            VenueLimits {
                fallback: Some("coingecko".to_string()),
                ..VenueLimits::default()
            },
        );
        venues.insert(
            "binance".to_string(),
            VenueLimits {
                rpm: 120,
                fallback: Some("coingecko".to_string()),
                ..VenueLimits::default()
            },
        );
        venues.insert(
            "okx".to_string(),
            VenueLimits {
                fallback: Some("coinpaprika".to_string()),
                ..VenueLimits::default()
            },
        );
        venues.insert("coingecko".to_string(), VenueLimits::default());
        venues.insert("coinpaprika".to_string(), VenueLimits::default());
        Self {
            venues,
            backoff: BackoffConfig::default(),
            clock_skew_secs: default_clock_skew_secs(),
        }
    }
}

impl LimitsConfig {
    pub fn validate(&self) -> ScanResult<()> {
        if self.venues.is_empty() {
            return Err(ScanError::ConfigurationError(
                "limits config declares no venues".into(),
            ));
        }
        for (venue, limits) in &self.venues {
            if limits.rpm == 0 || limits.monthly == 0 {
                return Err(ScanError::ConfigurationError(format!(
                    "venue '{venue}' has a zero budget"
                )));
            }
            if limits.max_concurrency == 0 {
                return Err(ScanError::ConfigurationError(format!(
                    "venue '{venue}' has zero concurrency"
                )));
            }
            if let Some(fb) = &limits.fallback {
                if !self.venues.contains_key(fb) {
                    return Err(ScanError::ConfigurationError(format!(
                        "venue '{venue}' falls back to undeclared venue '{fb}'"
                    )));
                }
            }
        }
        if self.backoff.jitter_min_ms > self.backoff.jitter_max_ms {
            return Err(ScanError::ConfigurationError(
                "backoff jitter_min_ms exceeds jitter_max_ms".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Feature flags (config/feature_flags.yaml, hot-reloadable)
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Premove alerts require the volume gate to confirm.
    #[serde(default)]
    pub premove_volume_confirm: bool,
    /// Dip-specific vetoes run alongside entry gates.
    #[serde(default = "default_true")]
    pub dip_guards: bool,
    /// Catalyst heat contributes to candidate insights.
    #[serde(default = "default_true")]
    pub catalyst_heat: bool,
    /// Social term is clamped to the profile cap (disable only in research).
    #[serde(default = "default_true")]
    pub social_cap_enforced: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            premove_volume_confirm: false,
            dip_guards: true,
            catalyst_heat: true,
            social_cap_enforced: true,
        }
    }
}

// =============================================================================
// Runtime config (runtime_config.json, hot-reloadable)
// =============================================================================

/// Mutable engine settings. Persisted as JSON with atomic save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_venues")]
    pub venues: Vec<String>,

    /// Per-scan symbol worker cap.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,

    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    #[serde(default = "default_pit_timeout_secs")]
    pub pit_timeout_secs: u64,

    #[serde(default)]
    pub flags: FeatureFlags,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            venues: default_venues(),
            max_concurrency: default_max_concurrency(),
            scan_timeout_secs: default_scan_timeout_secs(),
            step_timeout_secs: default_step_timeout_secs(),
            pit_timeout_secs: default_pit_timeout_secs(),
            flags: FeatureFlags::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file; errors let the caller fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        info!(path = %path.display(), symbols = ?config.symbols, "runtime config loaded");
        Ok(config)
    }

    /// Atomic save: write to a tmp sibling, then rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Aggregate
// =============================================================================

/// Everything the engine needs at startup, after validation.
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    pub runtime: RuntimeConfig,
    pub weights: WeightsConfig,
    pub guards: GuardsConfig,
    pub limits: LimitsConfig,
}

impl ScannerConfig {
    /// Load all config files from `dir`, falling back to defaults for any
    /// missing file (with a warning). Validation failures are fatal.
    pub fn load(dir: impl AsRef<Path>) -> ScanResult<Self> {
        let dir = dir.as_ref();

        let weights: WeightsConfig = load_yaml_or_default(&dir.join("weights.yaml"));
        let guards: GuardsConfig = load_yaml_or_default(&dir.join("guards.yaml"));
        let limits: LimitsConfig = load_yaml_or_default(&dir.join("limits.yaml"));
        let flags: FeatureFlags = load_yaml_or_default(&dir.join("feature_flags.yaml"));

        let mut runtime = RuntimeConfig::load(dir.join("runtime_config.json")).unwrap_or_else(|e| {
            warn!(error = %e, "falling back to default runtime config");
            RuntimeConfig::default()
        });
        runtime.flags = flags;

        let config = Self {
            runtime,
            weights,
            guards,
            limits,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ScanResult<()> {
        self.weights.validate()?;
        self.guards.validate()?;
        self.limits.validate()?;
        if self.runtime.max_concurrency == 0 {
            return Err(ScanError::ConfigurationError(
                "runtime.max_concurrency must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn load_yaml_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str(&content) {
            Ok(parsed) => {
                info!(path = %path.display(), "config file loaded");
                parsed
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file unparseable, using defaults");
                T::default()
            }
        },
        Err(_) => {
            warn!(path = %path.display(), "config file missing, using defaults");
            T::default()
        }
    }
}
