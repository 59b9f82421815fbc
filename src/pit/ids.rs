// =============================================================================
// Snapshot ids — time-ordered 26-char identifiers (ULID layout)
// =============================================================================
//
// 48-bit millisecond timestamp + 80-bit entropy, Crockford base32. Ids sort
// lexicographically by creation time, which keeps `List` ordering and
// on-disk layout aligned. Within one process the generator is monotonic:
// two ids minted in the same millisecond differ by an entropy increment, so
// concurrent stores always receive unique, ordered ids.
// =============================================================================

use chrono::Utc;
use parking_lot::Mutex;
use rand::RngCore;

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

#[derive(Debug, Default)]
struct LastIssued {
    ms: u64,
    entropy: u128,
}

/// Monotonic id generator. One instance per store.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: Mutex<LastIssued>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next id.
    pub fn next(&self) -> String {
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;

        let mut last = self.last.lock();
        let (ms, entropy) = if now_ms > last.ms {
            let mut bytes = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut bytes[6..]);
            let entropy = u128::from_be_bytes(bytes) & ((1u128 << 80) - 1);
            (now_ms, entropy)
        } else {
            // Same (or rewound) millisecond: bump the previous entropy.
            (last.ms, last.entropy.wrapping_add(1) & ((1u128 << 80) - 1))
        };
        last.ms = ms;
        last.entropy = entropy;

        encode(ms, entropy)
    }
}

/// Crockford-base32 encode 48 bits of timestamp (10 chars) followed by
/// 80 bits of entropy (16 chars).
fn encode(ms: u64, entropy: u128) -> String {
    let mut out = String::with_capacity(26);

    for i in (0..10).rev() {
        let shift = i * 5;
        let idx = ((ms >> shift) & 0x1f) as usize;
        out.push(CROCKFORD[idx] as char);
    }
    for i in (0..16).rev() {
        let shift = i * 5;
        let idx = ((entropy >> shift) & 0x1f) as usize;
        out.push(CROCKFORD[idx] as char);
    }

    out
}
