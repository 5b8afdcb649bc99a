use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Used for dedup/debounce windows and
/// restart-accounting timestamps where wall-clock monotonicity isn't
/// required but a stable integer is convenient to store and compare.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
