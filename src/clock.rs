//! Wall clock in milliseconds, used for expiry comparisons.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Not monotonic, but expiry comparisons
/// only ever look forward from a timestamp captured once per read.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as i64
}
