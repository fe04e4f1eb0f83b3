//! Telemetry metric name constants.
//!
//! Consumers install their own `metrics` recorder (e.g. prometheus, statsd);
//! without a recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `mimir_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `status`: "ok" or "error"

/// Registry lookups that found a live handle.
pub const CACHE_HITS_TOTAL: &str = "mimir_cache_hits_total";

/// Registry lookups that found nothing usable (absent or stale).
pub const CACHE_MISSES_TOTAL: &str = "mimir_cache_misses_total";

/// Remote cache creation attempts.
///
/// Labels: `status` ("ok" | "error" | "suppressed").
pub const CACHE_CREATIONS_TOTAL: &str = "mimir_cache_creations_total";

/// Keys newly marked as permanently uncacheable.
pub const CACHE_SUPPRESSIONS_TOTAL: &str = "mimir_cache_suppressions_total";

/// `start_prewarm` calls that joined an already running task.
pub const PREWARM_JOINS_TOTAL: &str = "mimir_prewarm_joins_total";

/// TTL refresh attempts.
///
/// Labels: `status` ("ok" | "error").
pub const TTL_REFRESHES_TOTAL: &str = "mimir_ttl_refreshes_total";

/// Turns that fell back from cached to inline content.
pub const SESSION_FALLBACKS_TOTAL: &str = "mimir_session_fallbacks_total";
