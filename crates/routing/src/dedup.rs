use std::collections::HashMap;

use clara_protocol::{DEDUPE_MAX_ENTRIES, DEDUPE_WINDOW_MS};
use sha2::{Digest, Sha256};

/// Fingerprint of `(user_id, channel_id, content)`, truncated to 16 hex
/// chars, matching the original `_compute_fingerprint`.
pub fn fingerprint(user_id: &str, channel_id: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(channel_id.as_bytes());
    hasher.update(b"|");
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut s = String::with_capacity(chars);
    for b in bytes {
        if s.len() >= chars {
            break;
        }
        s.push_str(&format!("{b:02x}"));
    }
    s.truncate(chars);
    s
}

/// Bounded, TTL-expiring dedup cache keyed by fingerprint. Entries older
/// than the window are evicted in bulk once the hard cap is reached,
/// rather than a strict per-insert LRU eviction, matching the
/// specification's "evicted in bulk" wording.
pub struct DedupeCache {
    entries: HashMap<String, u64>,
    window_ms: u64,
    max_entries: usize,
}

impl Default for DedupeCache {
    fn default() -> Self {
        Self::new(DEDUPE_WINDOW_MS, DEDUPE_MAX_ENTRIES)
    }
}

impl DedupeCache {
    pub fn new(window_ms: u64, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            window_ms,
            max_entries,
        }
    }

    /// Returns `true` if `key` was not seen within the window (and is now
    /// recorded as seen), `false` if it is a duplicate.
    pub fn check_and_insert(&mut self, key: &str, now_ms: u64) -> bool {
        if let Some(&seen_at) = self.entries.get(key)
            && now_ms.saturating_sub(seen_at) < self.window_ms
        {
            return false;
        }

        if self.entries.len() >= self.max_entries {
            self.evict_expired(now_ms);
            if self.entries.len() >= self.max_entries {
                // Still full after sweeping expired entries: drop the
                // oldest single entry to make room rather than reject the
                // otherwise-valid submission.
                if let Some(oldest_key) = self
                    .entries
                    .iter()
                    .min_by_key(|(_, &t)| t)
                    .map(|(k, _)| k.clone())
                {
                    self.entries.remove(&oldest_key);
                }
            }
        }

        self.entries.insert(key.to_string(), now_ms);
        true
    }

    fn evict_expired(&mut self, now_ms: u64) {
        let window_ms = self.window_ms;
        self.entries
            .retain(|_, &mut seen_at| now_ms.saturating_sub(seen_at) < window_ms);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_16_hex_chars() {
        let a = fingerprint("u1", "c1", "hello");
        let b = fingerprint("u1", "c1", "hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn different_content_yields_different_fingerprint() {
        assert_ne!(
            fingerprint("u1", "c1", "hello"),
            fingerprint("u1", "c1", "world")
        );
    }

    #[test]
    fn second_submission_within_window_is_duplicate() {
        let mut cache = DedupeCache::new(30_000, 1_000);
        assert!(cache.check_and_insert("fp1", 1_000));
        assert!(!cache.check_and_insert("fp1", 1_500));
    }

    #[test]
    fn submission_after_window_is_not_duplicate() {
        let mut cache = DedupeCache::new(30_000, 1_000);
        assert!(cache.check_and_insert("fp1", 1_000));
        assert!(cache.check_and_insert("fp1", 32_000));
    }

    #[test]
    fn hard_cap_evicts_rather_than_grows_unbounded() {
        let mut cache = DedupeCache::new(30_000, 4);
        for i in 0..10 {
            cache.check_and_insert(&format!("fp{i}"), 1_000 + i as u64);
        }
        assert!(cache.len() <= 4);
    }
}
