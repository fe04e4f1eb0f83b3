//! Suppression and failure bookkeeping.
//!
//! Two independent records, both keyed on the exact [`CacheKey`]:
//!
//! - **Suppressed keys**: content the backend will never cache (below its
//!   minimum size). Checked before any creation attempt; cleared only by
//!   [`FailureTracker::reset`].
//! - **Recent failures**: the last transient failure per key, bounded by a
//!   moka LRU so long-running processes keep only recent activity. Purely
//!   diagnostic; nothing consults it to make decisions.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use moka::sync::Cache;

use crate::types::CacheKey;

/// Default cap on remembered transient failures.
pub const DEFAULT_MAX_FAILURES: u64 = 100;

/// Thread-safe suppression set plus bounded failure log.
pub struct FailureTracker {
    suppressed: RwLock<HashMap<CacheKey, String>>,
    failures: Cache<CacheKey, String>,
}

impl FailureTracker {
    /// Create a tracker remembering up to `max_failures` transient failures.
    pub fn new(max_failures: u64) -> Self {
        Self {
            suppressed: RwLock::new(HashMap::new()),
            failures: Cache::new(max_failures),
        }
    }

    /// Mark `key` as permanently uncacheable.
    ///
    /// Returns `true` if the key was not already suppressed.
    pub fn suppress(&self, key: &CacheKey, reason: impl Into<String>) -> bool {
        self.failures.invalidate(key);
        self.suppressed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), reason.into())
            .is_none()
    }

    /// Whether `key` is suppressed. Other models for the same content are
    /// unaffected.
    pub fn is_suppressed(&self, key: &CacheKey) -> bool {
        self.suppressed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Record the latest transient failure for `key`, overwriting any
    /// previous one.
    pub fn record_failure(&self, key: &CacheKey, reason: impl Into<String>) {
        self.failures.insert(key.clone(), reason.into());
    }

    /// Forget the transient failure for `key` after a success.
    pub fn clear_failure(&self, key: &CacheKey) {
        self.failures.invalidate(key);
    }

    /// Suppression reason if suppressed, else the last transient failure,
    /// else an empty string.
    pub fn failure_reason(&self, key: &CacheKey) -> String {
        if let Some(reason) = self
            .suppressed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return reason.clone();
        }
        self.failures.get(key).unwrap_or_default()
    }

    /// Suppressed keys in `content_id/model` form, sorted.
    pub fn suppressed_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .suppressed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .map(CacheKey::to_string)
            .collect();
        keys.sort();
        keys
    }

    /// Remembered transient failures keyed by `content_id/model`.
    pub fn recent_failures(&self) -> BTreeMap<String, String> {
        self.failures
            .iter()
            .map(|(key, reason)| (key.to_string(), reason))
            .collect()
    }

    /// Empty both records.
    pub fn reset(&self) {
        self.suppressed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.failures.invalidate_all();
        self.failures.run_pending_tasks();
    }
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILURES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppression_is_scoped_to_exact_key() {
        let tracker = FailureTracker::default();
        tracker.suppress(&CacheKey::new("v1", "A"), "too few tokens");

        assert!(tracker.is_suppressed(&CacheKey::new("v1", "A")));
        assert!(!tracker.is_suppressed(&CacheKey::new("v1", "B")));
        assert!(!tracker.is_suppressed(&CacheKey::new("v2", "A")));
    }

    #[test]
    fn suppress_reports_first_insertion_only() {
        let tracker = FailureTracker::default();
        let key = CacheKey::new("v1", "A");
        assert!(tracker.suppress(&key, "small"));
        assert!(!tracker.suppress(&key, "small"));
    }

    #[test]
    fn suppression_reason_takes_precedence() {
        let tracker = FailureTracker::default();
        let key = CacheKey::new("v1", "A");
        tracker.record_failure(&key, "quota exceeded");
        assert_eq!(tracker.failure_reason(&key), "quota exceeded");

        tracker.suppress(&key, "below minimum");
        assert_eq!(tracker.failure_reason(&key), "below minimum");
    }

    #[test]
    fn failure_is_overwritten_and_cleared() {
        let tracker = FailureTracker::default();
        let key = CacheKey::new("v1", "A");
        tracker.record_failure(&key, "first");
        tracker.record_failure(&key, "second");
        assert_eq!(tracker.failure_reason(&key), "second");

        tracker.clear_failure(&key);
        assert_eq!(tracker.failure_reason(&key), "");
    }

    #[test]
    fn unknown_key_has_empty_reason() {
        let tracker = FailureTracker::default();
        assert_eq!(tracker.failure_reason(&CacheKey::new("x", "y")), "");
    }

    #[test]
    fn reset_empties_everything() {
        let tracker = FailureTracker::default();
        tracker.suppress(&CacheKey::new("v1", "A"), "small");
        tracker.record_failure(&CacheKey::new("v2", "A"), "network");

        tracker.reset();

        assert!(tracker.suppressed_keys().is_empty());
        assert!(tracker.recent_failures().is_empty());
        assert!(!tracker.is_suppressed(&CacheKey::new("v1", "A")));
    }

    #[test]
    fn recent_failures_lists_by_display_key() {
        let tracker = FailureTracker::default();
        tracker.record_failure(&CacheKey::new("v2", "A"), "network");
        let failures = tracker.recent_failures();
        assert_eq!(failures.get("v2/A").map(String::as_str), Some("network"));
    }
}
