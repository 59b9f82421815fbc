// =============================================================================
// REST provider client — venue-agnostic ticker fetches
// =============================================================================
//
// One shared reqwest client with a 10 s timeout serves every venue. The
// response body is a small JSON object; providers disagree on whether
// numbers arrive as strings, so parsing accepts both. 429 and 5xx statuses
// map onto the provider-degraded taxonomy so the facade can back off or
// fall back without inspecting transport details.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::{debug, instrument};

use crate::errors::{DegradedReason, ScanError, ScanResult};
use crate::indicators::Bar;
use crate::provider::rate_limit;
use crate::types::{parse_ingress_timestamp, Envelope, SourceTier};

pub struct RestClient {
    client: reqwest::Client,
    base_urls: HashMap<String, String>,
}

impl RestClient {
    pub fn new(base_urls: HashMap<String, String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self { client, base_urls }
    }

    /// GET `<base>/ticker?symbol=<symbol>` and parse the body into an
    /// envelope at the given source tier.
    #[instrument(skip(self), name = "facade::fetch_ticker")]
    pub async fn fetch_ticker(
        &self,
        venue: &str,
        symbol: &str,
        tier: SourceTier,
    ) -> ScanResult<Envelope> {
        let base = self.base_urls.get(venue).ok_or_else(|| {
            ScanError::NotFound(format!("no base URL configured for venue '{venue}'"))
        })?;
        let url = format!("{base}/ticker?symbol={symbol}");

        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ScanError::Timeout(format!("GET {url}: {e}"))
            } else {
                ScanError::degraded(DegradedReason::Http5xx, format!("GET {url}: {e}"))
            }
        })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            let mut message = format!("{venue} returned 429");
            if let Some(secs) = retry_after {
                message.push_str(&format!(", retry after {secs}s"));
            }
            // Surface the limiter headers too when the venue sends them.
            if let Ok((remaining, reset)) = rate_limit::parse_headers(resp.headers()) {
                message.push_str(&format!(" (remaining {remaining}, reset {reset})"));
            }
            return Err(ScanError::degraded(DegradedReason::RateLimited, message));
        }
        if status.is_server_error() {
            return Err(ScanError::degraded(
                DegradedReason::Http5xx,
                format!("{venue} returned {status}"),
            ));
        }
        if !status.is_success() {
            return Err(ScanError::InvalidInput(format!(
                "{venue} returned {status} for {symbol}"
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ScanError::InvalidInput(format!("unparseable ticker body: {e}")))?;

        let envelope = parse_ticker_body(venue, symbol, tier, &body)?;
        debug!(venue, symbol, tier = %tier, "ticker fetched");
        Ok(envelope)
    }
}

impl RestClient {
    /// GET `<base>/klines?symbol=<symbol>&interval=1h&limit=<limit>` and
    /// parse the array-of-arrays body into bars.
    #[instrument(skip(self), name = "facade::fetch_bars")]
    pub async fn fetch_bars(
        &self,
        venue: &str,
        symbol: &str,
        limit: u32,
    ) -> ScanResult<Vec<Bar>> {
        let base = self.base_urls.get(venue).ok_or_else(|| {
            ScanError::NotFound(format!("no base URL configured for venue '{venue}'"))
        })?;
        let url = format!("{base}/klines?symbol={symbol}&interval=1h&limit={limit}");

        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ScanError::Timeout(format!("GET {url}: {e}"))
            } else {
                ScanError::degraded(DegradedReason::Http5xx, format!("GET {url}: {e}"))
            }
        })?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(ScanError::degraded(
                DegradedReason::Http5xx,
                format!("{venue} returned {status}"),
            ));
        }
        if !status.is_success() {
            return Err(ScanError::InvalidInput(format!(
                "{venue} returned {status} for {symbol} klines"
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ScanError::InvalidInput(format!("unparseable klines body: {e}")))?;

        let bars = parse_klines_body(&body)?;
        debug!(venue, symbol, count = bars.len(), "bars fetched");
        Ok(bars)
    }
}

/// Parse an array-of-arrays klines body: each entry is
/// `[open_time_ms, open, high, low, close, volume]` with numbers accepted
/// as strings or numerics. Short entries are skipped.
pub fn parse_klines_body(body: &serde_json::Value) -> ScanResult<Vec<Bar>> {
    let raw = body
        .as_array()
        .ok_or_else(|| ScanError::InvalidInput("klines body is not an array".into()))?;

    let mut bars = Vec::with_capacity(raw.len());
    for entry in raw {
        let arr = match entry.as_array() {
            Some(a) if a.len() >= 6 => a,
            _ => continue,
        };
        let open_time = arr[0].as_i64().unwrap_or(0);
        let numeric = |v: &serde_json::Value| -> ScanResult<f64> {
            if let Some(n) = v.as_f64() {
                Ok(n)
            } else if let Some(s) = v.as_str() {
                s.parse::<f64>()
                    .map_err(|e| ScanError::InvalidInput(format!("bad kline field '{s}': {e}")))
            } else {
                Err(ScanError::InvalidInput(format!("bad kline field: {v}")))
            }
        };
        bars.push(Bar::new(
            open_time,
            numeric(&arr[1])?,
            numeric(&arr[2])?,
            numeric(&arr[3])?,
            numeric(&arr[4])?,
            numeric(&arr[5])?,
        ));
    }
    Ok(bars)
}

/// Parse a provider ticker body into an envelope. Expected shape:
/// `{"price": .., "volume": .., "timestamp": "RFC3339", "sequence": n?}`
/// with numbers accepted as strings or numerics.
pub fn parse_ticker_body(
    venue: &str,
    symbol: &str,
    tier: SourceTier,
    body: &serde_json::Value,
) -> ScanResult<Envelope> {
    let price = field_f64(body, "price")?;
    let volume = field_f64(body, "volume")?;

    let timestamp = match body.get("timestamp").and_then(|v| v.as_str()) {
        Some(raw) => parse_ingress_timestamp(raw)?,
        None => Utc::now(),
    };

    let mut prices = BTreeMap::new();
    prices.insert("last".to_string(), price);
    let mut volumes = BTreeMap::new();
    volumes.insert("vol_24h".to_string(), volume);

    let mut envelope = Envelope::new(symbol, venue, tier, timestamp, prices, volumes);
    envelope.sequence = body.get("sequence").and_then(|v| v.as_u64());
    Ok(envelope)
}

/// Pull a field that may be a JSON number or a numeric string.
fn field_f64(body: &serde_json::Value, field: &str) -> ScanResult<f64> {
    let value = body
        .get(field)
        .ok_or_else(|| ScanError::InvalidInput(format!("ticker body missing '{field}'")))?;
    if let Some(n) = value.as_f64() {
        return Ok(n);
    }
    if let Some(s) = value.as_str() {
        return s
            .parse::<f64>()
            .map_err(|e| ScanError::InvalidInput(format!("bad '{field}' value '{s}': {e}")));
    }
    Err(ScanError::InvalidInput(format!(
        "'{field}' is neither number nor string: {value}"
    )))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_numeric_fields() {
        let body = json!({
            "price": 43250.5,
            "volume": 1200000.0,
            "timestamp": "2025-06-01T12:00:00Z",
            "sequence": 77,
        });
        let env = parse_ticker_body("kraken", "BTC-USD", SourceTier::Hot, &body).unwrap();
        assert_eq!(env.last_price(), Some(43250.5));
        assert_eq!(env.sequence, Some(77));
        assert_eq!(env.series_source, "exchange_native_kraken");
        assert_eq!(env.timestamp.timestamp(), 1_748_779_200);
    }

    #[test]
    fn parses_string_numbers() {
        let body = json!({ "price": "101.25", "volume": "9000" });
        let env = parse_ticker_body("binance", "ETH-USD", SourceTier::Warm, &body).unwrap();
        assert_eq!(env.last_price(), Some(101.25));
        assert_eq!(env.volumes.get("vol_24h"), Some(&9000.0));
        assert_eq!(env.sequence, None);
    }

    #[test]
    fn missing_price_is_invalid() {
        let body = json!({ "volume": 1.0 });
        let err = parse_ticker_body("kraken", "BTC-USD", SourceTier::Warm, &body).unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }

    #[test]
    fn unix_integer_timestamp_rejected() {
        let body = json!({ "price": 1.0, "volume": 1.0, "timestamp": "1717243200" });
        assert!(parse_ticker_body("kraken", "BTC-USD", SourceTier::Warm, &body).is_err());
    }

    #[test]
    fn garbage_price_string_rejected() {
        let body = json!({ "price": "soon", "volume": 1.0 });
        assert!(parse_ticker_body("kraken", "BTC-USD", SourceTier::Warm, &body).is_err());
    }

    #[test]
    fn parses_klines_array() {
        let body = json!([
            [1750000000000i64, "100.0", "101.5", "99.5", 100.5, "1200"],
            [1750003600000i64, 100.5, 102.0, 100.0, 101.0, 900.0],
        ]);
        let bars = parse_klines_body(&body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open_time, 1_750_000_000_000);
        assert!((bars[0].close - 100.5).abs() < 1e-12);
        assert!((bars[1].volume - 900.0).abs() < 1e-12);
    }

    #[test]
    fn klines_skips_short_entries() {
        let body = json!([[1i64, 1.0], [2i64, 1.0, 2.0, 0.5, 1.5, 10.0]]);
        let bars = parse_klines_body(&body).unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn klines_non_array_rejected() {
        assert!(parse_klines_body(&json!({"not": "array"})).is_err());
    }

    #[test]
    fn unknown_venue_has_no_base_url() {
        let client = RestClient::new(HashMap::new());
        let err = futures_util::FutureExt::now_or_never(client.fetch_ticker(
            "ghost",
            "BTC-USD",
            SourceTier::Warm,
        ))
        .expect("resolves without IO")
        .unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }
}
