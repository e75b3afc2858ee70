//! Cache configuration.
//!
//! Controls the result cache and the invalidation rules via `nodecache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! global_ttl_seconds = 600
//! tracked_post_types = ["post", "page"]
//! tracked_taxonomies = ["category", "post_tag"]
//! ```

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
pub const DEFAULT_GLOBAL_TTL_SECONDS: u64 = 600;
const DEFAULT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_PRIVATE_META_PREFIX: &str = "_";

/// Cache configuration from `nodecache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve from and write to the result cache.
    pub enabled: bool,
    /// Lifetime of a cached response.
    pub global_ttl_seconds: u64,
    /// Maximum responses held by the in-memory store.
    pub max_entries: usize,
    /// Content types whose mutations invalidate cached results.
    pub tracked_post_types: Vec<String>,
    /// Tracked content types that are not publicly visible; status
    /// transitions on these are ignored.
    pub non_public_post_types: Vec<String>,
    /// Taxonomies whose term edits invalidate cached results.
    pub tracked_taxonomies: Vec<String>,
    /// Meta keys starting with this prefix are private. Empty disables the check.
    pub private_meta_prefix: String,
    /// Meta keys always tracked, regardless of prefix.
    pub tracked_meta_keys: Vec<String>,
    /// Meta keys never tracked.
    pub ignored_meta_keys: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global_ttl_seconds: DEFAULT_GLOBAL_TTL_SECONDS,
            max_entries: DEFAULT_MAX_ENTRIES,
            tracked_post_types: vec!["post".to_string(), "page".to_string()],
            non_public_post_types: Vec::new(),
            tracked_taxonomies: vec!["category".to_string(), "post_tag".to_string()],
            private_meta_prefix: DEFAULT_PRIVATE_META_PREFIX.to_string(),
            tracked_meta_keys: Vec::new(),
            ignored_meta_keys: Vec::new(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            global_ttl_seconds: settings.global_ttl.as_secs(),
            max_entries: settings.max_entries.get(),
            tracked_post_types: settings.tracked_post_types.clone(),
            non_public_post_types: settings.non_public_post_types.clone(),
            tracked_taxonomies: settings.tracked_taxonomies.clone(),
            private_meta_prefix: settings.private_meta_prefix.clone(),
            tracked_meta_keys: settings.tracked_meta_keys.clone(),
            ignored_meta_keys: settings.ignored_meta_keys.clone(),
        }
    }
}

impl CacheConfig {
    /// Returns the response lifetime, falling back to the default if zero.
    pub fn ttl(&self) -> Duration {
        match self.global_ttl_seconds {
            0 => Duration::from_secs(DEFAULT_GLOBAL_TTL_SECONDS),
            seconds => Duration::from_secs(seconds),
        }
    }

    /// Returns the store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Type names compare case-insensitively.
    pub fn tracks_post_type(&self, post_type: &str) -> bool {
        contains_name(&self.tracked_post_types, post_type)
    }

    /// Tracked and publicly visible.
    pub fn is_public_post_type(&self, post_type: &str) -> bool {
        self.tracks_post_type(post_type) && !contains_name(&self.non_public_post_types, post_type)
    }

    pub fn tracks_taxonomy(&self, taxonomy: &str) -> bool {
        contains_name(&self.tracked_taxonomies, taxonomy)
    }
}

fn contains_name(names: &[String], name: &str) -> bool {
    names.iter().any(|candidate| candidate.eq_ignore_ascii_case(name))
}
