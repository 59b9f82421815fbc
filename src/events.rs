// =============================================================================
// Catalyst events — time-tiered heat aggregation
// =============================================================================
//
// Upcoming catalysts (unlocks, listings, upgrades, macro prints) contribute
// "heat" to a symbol's insight block. Closer events matter more:
//
//   imminent   < 24 h     x1.0
//   near-term  < 7 d      x0.8
//   medium     < 30 d     x0.6
//   distant    otherwise  x0.4
//
// Past events are excluded from aggregation entirely.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTier {
    Imminent,
    NearTerm,
    Medium,
    Distant,
}

impl EventTier {
    /// Classify by time remaining until the event.
    pub fn from_lead_time(event_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let lead = event_time - now;
        if lead < Duration::hours(24) {
            Self::Imminent
        } else if lead < Duration::days(7) {
            Self::NearTerm
        } else if lead < Duration::days(30) {
            Self::Medium
        } else {
            Self::Distant
        }
    }

    pub fn decay_multiplier(self) -> f64 {
        match self {
            Self::Imminent => 1.0,
            Self::NearTerm => 0.8,
            Self::Medium => 0.6,
            Self::Distant => 0.4,
        }
    }
}

/// A single catalyst record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalystEvent {
    pub id: String,
    pub symbol: String,
    pub event_time: DateTime<Utc>,
    pub tier: EventTier,
    /// -1 bearish, 0 neutral, +1 bullish.
    pub polarity: i8,
    /// Source confidence in [0, 1].
    pub confidence: f64,
    pub source: String,
}

impl CatalystEvent {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        event_time: DateTime<Utc>,
        polarity: i8,
        confidence: f64,
        source: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            tier: EventTier::from_lead_time(event_time, now),
            event_time,
            polarity: polarity.clamp(-1, 1),
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
        }
    }

    /// Heat contribution; zero for past events.
    pub fn heat(&self, now: DateTime<Utc>) -> f64 {
        if self.event_time < now {
            return 0.0;
        }
        self.polarity as f64 * self.confidence * self.tier.decay_multiplier()
    }
}

/// Aggregate per-symbol catalyst heat, excluding past events.
pub fn aggregate_heat(
    events: &[CatalystEvent],
    now: DateTime<Utc>,
) -> HashMap<String, f64> {
    let mut heat: HashMap<String, f64> = HashMap::new();
    for event in events {
        if event.event_time < now {
            continue;
        }
        *heat.entry(event.symbol.clone()).or_default() += event.heat(now);
    }
    heat
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn at(hours_from_now: i64) -> DateTime<Utc> {
        Utc::now() + Duration::hours(hours_from_now)
    }

    #[test]
    fn tier_classification_by_lead_time() {
        let now = Utc::now();
        assert_eq!(EventTier::from_lead_time(at(3), now), EventTier::Imminent);
        assert_eq!(EventTier::from_lead_time(at(48), now), EventTier::NearTerm);
        assert_eq!(EventTier::from_lead_time(at(24 * 10), now), EventTier::Medium);
        assert_eq!(EventTier::from_lead_time(at(24 * 60), now), EventTier::Distant);
    }

    #[test]
    fn past_events_contribute_no_heat() {
        let now = Utc::now();
        let past = CatalystEvent::new("e1", "BTC-USD", at(-2), 1, 0.9, "calendar", now);
        assert_eq!(past.heat(now), 0.0);

        let heat = aggregate_heat(&[past], now);
        assert!(heat.is_empty());
    }

    #[test]
    fn heat_scales_with_tier_and_confidence() {
        let now = Utc::now();
        let imminent = CatalystEvent::new("e1", "BTC-USD", at(2), 1, 1.0, "cal", now);
        let distant = CatalystEvent::new("e2", "BTC-USD", at(24 * 90), 1, 1.0, "cal", now);
        assert!((imminent.heat(now) - 1.0).abs() < 1e-12);
        assert!((distant.heat(now) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn bearish_events_subtract() {
        let now = Utc::now();
        let events = vec![
            CatalystEvent::new("e1", "ETH-USD", at(2), 1, 1.0, "cal", now),
            CatalystEvent::new("e2", "ETH-USD", at(3), -1, 0.5, "cal", now),
        ];
        let heat = aggregate_heat(&events, now);
        assert!((heat["ETH-USD"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn aggregation_is_per_symbol() {
        let now = Utc::now();
        let events = vec![
            CatalystEvent::new("e1", "BTC-USD", at(2), 1, 1.0, "cal", now),
            CatalystEvent::new("e2", "ETH-USD", at(2), 1, 0.6, "cal", now),
        ];
        let heat = aggregate_heat(&events, now);
        assert_eq!(heat.len(), 2);
        assert!((heat["BTC-USD"] - 1.0).abs() < 1e-12);
        assert!((heat["ETH-USD"] - 0.6).abs() < 1e-12);
    }

    #[test]
    fn polarity_and_confidence_are_clamped() {
        let now = Utc::now();
        let e = CatalystEvent::new("e1", "BTC-USD", at(2), 5, 7.0, "cal", now);
        assert_eq!(e.polarity, 1);
        assert!((e.confidence - 1.0).abs() < 1e-12);
    }
}
