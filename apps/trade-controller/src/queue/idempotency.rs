//! Idempotency key derivation.
//!
//! A key is the first 32 hex characters of a SHA-256 over the logical
//! operation identity. The same value is echoed to the broker as the client
//! order ID, making the broker a secondary dedup authority.

use sha2::{Digest, Sha256};

/// Key length in hex characters.
pub const KEY_LEN: usize = 32;

/// Width of the default dedup window, in seconds.
pub const DEFAULT_BUCKET_SECS: i64 = 60;

/// Derive the idempotency key for an order intent.
///
/// `time_bucket` widens or narrows the dedup window; two intents that agree
/// on every component including the bucket collapse to one work item.
#[must_use]
pub fn order_key(
    strategy_id: &str,
    symbol: &str,
    side: &str,
    signal_hash: &str,
    time_bucket: i64,
) -> String {
    fingerprint(&[
        strategy_id,
        symbol,
        side,
        signal_hash,
        &time_bucket.to_string(),
    ])
}

/// The time bucket containing `unix_secs` at the default window width.
#[must_use]
pub const fn default_bucket(unix_secs: i64) -> i64 {
    unix_secs.div_euclid(DEFAULT_BUCKET_SECS)
}

/// Hash arbitrary components into a 32-hex-char fingerprint.
#[must_use]
pub fn fingerprint(components: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for component in components {
        hasher.update(component.as_bytes());
        // Separator prevents ("ab","c") from colliding with ("a","bc").
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(KEY_LEN);
    for byte in digest.iter().take(KEY_LEN / 2) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
