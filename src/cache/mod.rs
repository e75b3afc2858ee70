//! GraphQL result cache with node-level invalidation.
//!
//! - **Keys**: canonical query text (or persisted id), variables and
//!   operation name hashed into a [`CacheKey`]
//! - **Nodes**: every cached response is linked to the entities and list
//!   buckets it touched ([`NodeCollection`])
//! - **Invalidation**: content mutations resolve to nodes, and only the keys
//!   linked to those nodes are purged ([`InvalidationListener`])
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! global_ttl_seconds = 600
//! tracked_post_types = ["post", "page"]
//! tracked_taxonomies = ["category", "post_tag"]
//! private_meta_prefix = "_"
//! ```

mod broadcast;
mod config;
pub mod deps;
mod engine;
mod error;
mod events;
pub mod instruments;
mod invalidation;
mod keys;
mod lock;
mod nodes;
mod results;
mod store;

pub use broadcast::{EmitReport, FnSubscriber, PurgeBroadcaster, PurgeSubscriber};
pub use config::{CacheConfig, DEFAULT_GLOBAL_TTL_SECONDS};
pub use engine::{CacheEngine, CacheEngineBuilder};
pub use error::{KeyUnavailable, PurgeError, StoreError};
pub use events::{EventKind, MutationEvent, PostRef, PostStatus, TermRef};
pub use invalidation::{
    Handler, InvalidationListener, InvalidationReport, InvalidationRules, MetaOwner,
    MetaTrackingPolicy, PurgeOutcome, TransitionAction, classify_transition,
};
pub use keys::{
    CacheKey, DocumentLookup, KEY_PREFIX, KeyBuilder, canonical_query, canonical_variables,
    document_id,
};
pub use nodes::{EntityKind, GlobalId, KeySet, NodeCollection, NodeId};
pub use results::{
    CacheLookup, CachedResponse, MissReason, QueryRequest, ResultsCache, Served, StoreOutcome,
};
pub use store::{MemoryStore, TtlStore};
