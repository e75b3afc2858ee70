//! Wiring of the cache components into one engine.

use std::sync::Arc;

use tracing::info;

use super::broadcast::PurgeBroadcaster;
use super::config::CacheConfig;
use super::events::{EventKind, MutationEvent};
use super::invalidation::{Handler, InvalidationListener, InvalidationReport, MetaTrackingPolicy};
use super::keys::{DocumentLookup, KeyBuilder};
use super::nodes::NodeCollection;
use super::results::ResultsCache;
use super::store::{MemoryStore, TtlStore};

/// Key builder, store, dependency index, broadcaster, results cache and
/// invalidation listener sharing one configuration.
pub struct CacheEngine {
    config: CacheConfig,
    collection: Arc<NodeCollection>,
    broadcaster: Arc<PurgeBroadcaster>,
    results: Arc<ResultsCache>,
    listener: InvalidationListener,
}

impl CacheEngine {
    /// Engine over an in-memory store with the default meta policy.
    pub fn new(config: &CacheConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: &CacheConfig) -> CacheEngineBuilder {
        CacheEngineBuilder {
            config: config.clone(),
            documents: None,
            store: None,
            meta: None,
            handlers: Vec::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn results(&self) -> &Arc<ResultsCache> {
        &self.results
    }

    pub fn listener(&self) -> &InvalidationListener {
        &self.listener
    }

    pub fn broadcaster(&self) -> &Arc<PurgeBroadcaster> {
        &self.broadcaster
    }

    pub fn collection(&self) -> &Arc<NodeCollection> {
        &self.collection
    }

    /// Feed one mutation event through the listener.
    pub fn dispatch(&self, event: &MutationEvent) -> InvalidationReport {
        self.listener.handle(event)
    }
}

pub struct CacheEngineBuilder {
    config: CacheConfig,
    documents: Option<Arc<dyn DocumentLookup>>,
    store: Option<Arc<dyn TtlStore>>,
    meta: Option<MetaTrackingPolicy>,
    handlers: Vec<(EventKind, Handler)>,
}

impl CacheEngineBuilder {
    /// Persisted query documents.
    pub fn documents(mut self, documents: Arc<dyn DocumentLookup>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn store(mut self, store: Arc<dyn TtlStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn meta_policy(mut self, meta: MetaTrackingPolicy) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Extra handler run after the built-in one for `kind`.
    pub fn handler(mut self, kind: EventKind, handler: Handler) -> Self {
        self.handlers.push((kind, handler));
        self
    }

    pub fn build(self) -> CacheEngine {
        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new(&config)));
        let keys = self
            .documents
            .map(KeyBuilder::with_documents)
            .unwrap_or_default();
        let meta = self
            .meta
            .unwrap_or_else(|| MetaTrackingPolicy::from_config(&config));

        let collection = Arc::new(NodeCollection::new());
        let broadcaster = Arc::new(PurgeBroadcaster::new());
        let results = Arc::new(ResultsCache::new(
            &config,
            keys,
            store,
            Arc::clone(&collection),
        ));
        broadcaster.subscribe(results.clone());

        let mut listener = InvalidationListener::new(
            &config,
            meta,
            Arc::clone(&collection),
            Arc::clone(&broadcaster),
        );
        for (kind, handler) in self.handlers {
            listener.register(kind, handler);
        }

        info!(
            enabled = config.enabled,
            ttl_seconds = config.ttl().as_secs(),
            max_entries = config.max_entries,
            "Cache engine initialized"
        );

        CacheEngine {
            config,
            collection,
            broadcaster,
            results,
            listener,
        }
    }
}
