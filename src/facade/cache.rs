// =============================================================================
// Tiered TTL cache — hot / warm / cold with promotion on access
// =============================================================================
//
// Each key owns a small per-tier occupancy record guarded by its family's
// critical section, so promotion is an atomic slot replace: a concurrent
// reader observes either the pre-promotion tier or hot, never a torn entry.
//
//   - A warm or cold hit copies the value into the hot slot (promotion);
//     the hit itself reports the tier where the value was found.
//   - Inserting into hot also populates the warm slot as a safety replica,
//     so a hot expiry degrades to a warm hit instead of a miss.
//   - TTLs double per family when the producing provider runs hot on its
//     budget (the facade flips the multiplier).
//
// Keys are colon-joined; the first segment is the key family. Time-bucketed
// keys floor now/bucket so callers inside one bucket agree on the key.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Hot,
    Warm,
    Cold,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hot => write!(f, "hot"),
            Self::Warm => write!(f, "warm"),
            Self::Cold => write!(f, "cold"),
        }
    }
}

/// Per-tier time-to-live set.
#[derive(Debug, Clone, Copy)]
pub struct TierTtls {
    pub hot: Duration,
    pub warm: Duration,
    pub cold: Duration,
}

impl Default for TierTtls {
    fn default() -> Self {
        Self {
            hot: Duration::from_secs(30),
            warm: Duration::from_secs(300),
            cold: Duration::from_secs(3600),
        }
    }
}

impl TierTtls {
    fn for_tier(&self, tier: CacheTier) -> Duration {
        match tier {
            CacheTier::Hot => self.hot,
            CacheTier::Warm => self.warm,
            CacheTier::Cold => self.cold,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    set_at: Instant,
    ttl: Duration,
    promotion_count: u32,
}

impl Slot {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.set_at) >= self.ttl
    }
}

#[derive(Debug, Default)]
struct Occupancy {
    hot: Option<Slot>,
    warm: Option<Slot>,
    cold: Option<Slot>,
}

struct Family {
    ttls: TierTtls,
    ttl_multiplier: u32,
    entries: HashMap<String, Occupancy>,
}

// =============================================================================
// TieredCache
// =============================================================================

/// Process-wide cache. Families (first key segment) are independently
/// locked, so symbol traffic in one family never contends with another.
pub struct TieredCache {
    families: RwLock<HashMap<String, Mutex<Family>>>,
    default_ttls: TierTtls,
}

impl TieredCache {
    pub fn new(default_ttls: TierTtls) -> Self {
        Self {
            families: RwLock::new(HashMap::new()),
            default_ttls,
        }
    }

    /// Colon-joined key from components.
    pub fn make_key(parts: &[&str]) -> String {
        parts.join(":")
    }

    /// Key with a `floor(now_epoch / bucket)` suffix so callers within the
    /// same bucket compute the same key.
    pub fn bucketed_key(parts: &[&str], bucket: Duration, now_epoch_secs: u64) -> String {
        let bucket_index = now_epoch_secs / bucket.as_secs().max(1);
        format!("{}:{bucket_index}", parts.join(":"))
    }

    fn family_of(key: &str) -> &str {
        key.split(':').next().unwrap_or(key)
    }

    fn with_family<R>(&self, key: &str, f: impl FnOnce(&mut Family) -> R) -> R {
        let family_name = Self::family_of(key).to_string();
        {
            let families = self.families.read();
            if let Some(fam) = families.get(&family_name) {
                return f(&mut fam.lock());
            }
        }
        let mut families = self.families.write();
        let fam = families.entry(family_name).or_insert_with(|| {
            Mutex::new(Family {
                ttls: self.default_ttls,
                ttl_multiplier: 1,
                entries: HashMap::new(),
            })
        });
        let mut guard = fam.lock();
        f(&mut guard)
    }

    // -------------------------------------------------------------------------
    // Get / Set
    // -------------------------------------------------------------------------

    /// Look the key up hot → warm → cold. Returns the value and the tier it
    /// was FOUND at; a warm/cold hit is promoted into the hot slot before
    /// returning, so the next get reports hot.
    pub fn get(&self, key: &str) -> Option<(Value, CacheTier)> {
        let now = Instant::now();
        self.with_family(key, |fam| {
            let hot_ttl = fam.ttls.hot * fam.ttl_multiplier;
            let occ = fam.entries.get_mut(key)?;

            if let Some(slot) = &occ.hot {
                if !slot.expired(now) {
                    return Some((slot.value.clone(), CacheTier::Hot));
                }
                occ.hot = None;
            }

            for (tier, slot_ref) in [
                (CacheTier::Warm, &mut occ.warm),
                (CacheTier::Cold, &mut occ.cold),
            ] {
                let promoted = match slot_ref {
                    Some(slot) if !slot.expired(now) => Some(Slot {
                        value: slot.value.clone(),
                        set_at: now,
                        ttl: hot_ttl,
                        promotion_count: slot.promotion_count + 1,
                    }),
                    Some(_) => {
                        *slot_ref = None;
                        None
                    }
                    None => None,
                };
                if let Some(promoted) = promoted {
                    let value = promoted.value.clone();
                    occ.hot = Some(promoted);
                    debug!(key, from = %tier, "cache entry promoted to hot");
                    return Some((value, tier));
                }
            }

            None
        })
    }

    /// Place the value at the given tier. A hot insert also writes a warm
    /// safety replica.
    pub fn set(&self, key: &str, value: Value, tier: CacheTier) {
        let now = Instant::now();
        self.with_family(key, |fam| {
            let ttl = fam.ttls.for_tier(tier) * fam.ttl_multiplier;
            let occ = fam.entries.entry(key.to_string()).or_default();
            let slot = Slot {
                value: value.clone(),
                set_at: now,
                ttl,
                promotion_count: 0,
            };
            match tier {
                CacheTier::Hot => {
                    occ.hot = Some(slot);
                    occ.warm = Some(Slot {
                        value,
                        set_at: now,
                        ttl: fam.ttls.warm * fam.ttl_multiplier,
                        promotion_count: 0,
                    });
                }
                CacheTier::Warm => occ.warm = Some(slot),
                CacheTier::Cold => occ.cold = Some(slot),
            }
        });
    }

    /// Promotion count of the hot slot, for observability tests.
    pub fn promotion_count(&self, key: &str) -> u32 {
        self.with_family(key, |fam| {
            fam.entries
                .get(key)
                .and_then(|occ| occ.hot.as_ref())
                .map(|s| s.promotion_count)
                .unwrap_or(0)
        })
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Drop every expired slot; returns how many were reclaimed.
    pub fn flush_expired(&self) -> usize {
        let now = Instant::now();
        let families = self.families.read();
        let mut reclaimed = 0;
        for fam in families.values() {
            let mut fam = fam.lock();
            for occ in fam.entries.values_mut() {
                for slot in [&mut occ.hot, &mut occ.warm, &mut occ.cold] {
                    if slot.as_ref().is_some_and(|s| s.expired(now)) {
                        *slot = None;
                        reclaimed += 1;
                    }
                }
            }
            fam.entries
                .retain(|_, occ| occ.hot.is_some() || occ.warm.is_some() || occ.cold.is_some());
        }
        reclaimed
    }

    /// Double all TTLs for a family (provider budget pressure). Existing
    /// entries keep their TTL; new inserts and promotions use the doubled
    /// values. Idempotent per call site: each call doubles once more.
    pub fn double_ttls(&self, family: &str) {
        let mut families = self.families.write();
        let fam = families.entry(family.to_string()).or_insert_with(|| {
            Mutex::new(Family {
                ttls: self.default_ttls,
                ttl_multiplier: 1,
                entries: HashMap::new(),
            })
        });
        let mut fam = fam.lock();
        fam.ttl_multiplier = fam.ttl_multiplier.saturating_mul(2);
        debug!(family, multiplier = fam.ttl_multiplier, "family TTLs doubled");
    }

    /// Reset the family multiplier once the provider recovers.
    pub fn reset_ttls(&self, family: &str) {
        if let Some(fam) = self.families.read().get(family) {
            fam.lock().ttl_multiplier = 1;
        }
    }

    pub fn ttl_multiplier(&self, family: &str) -> u32 {
        self.families
            .read()
            .get(family)
            .map(|f| f.lock().ttl_multiplier)
            .unwrap_or(1)
    }
}

impl Default for TieredCache {
    fn default() -> Self {
        Self::new(TierTtls::default())
    }
}
