//! Metric names recorded by the cache and their descriptions.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};

pub const RESULTS_HIT: &str = "nodecache_results_hit_total";
/// Labelled with `reason`.
pub const RESULTS_MISS: &str = "nodecache_results_miss_total";
pub const RESULTS_STORE: &str = "nodecache_results_store_total";
pub const PURGE_KEYS: &str = "nodecache_purge_keys_total";
/// Labelled with `subscriber`.
pub const PURGE_FAILURES: &str = "nodecache_purge_failures_total";
pub const NODE_LINKS: &str = "nodecache_node_links_total";
/// Labelled with `event`.
pub const INVALIDATION_MS: &str = "nodecache_invalidation_ms";

const COUNTERS: [(&str, &str); 6] = [
    (RESULTS_HIT, "Total number of requests served from the result cache."),
    (RESULTS_MISS, "Total number of result cache misses, labelled by reason."),
    (RESULTS_STORE, "Total number of responses written to the result cache."),
    (PURGE_KEYS, "Total number of cached results deleted by node purges."),
    (
        PURGE_FAILURES,
        "Total number of failed purge deliveries, labelled by subscriber.",
    ),
    (NODE_LINKS, "Total number of node to cache key links recorded."),
];

static DESCRIBED: Once = Once::new();

/// Register descriptions with the installed recorder. Later calls are no-ops.
pub fn describe() {
    DESCRIBED.call_once(|| {
        for (name, description) in COUNTERS {
            describe_counter!(name, Unit::Count, description);
        }
        describe_histogram!(
            INVALIDATION_MS,
            Unit::Milliseconds,
            "Mutation event handling latency in milliseconds."
        );
    });
}
