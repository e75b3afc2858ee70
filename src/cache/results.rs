//! Whole-response cache for anonymous GraphQL requests.
//!
//! Lookups and writes are best effort: any failure degrades to a miss or a
//! skipped write and the request executes fresh.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::broadcast::PurgeSubscriber;
use super::config::CacheConfig;
use super::deps;
use super::error::{KeyUnavailable, PurgeError, StoreError};
use super::instruments::{PURGE_KEYS, RESULTS_HIT, RESULTS_MISS, RESULTS_STORE};
use super::keys::{CacheKey, KEY_PREFIX, KeyBuilder};
use super::nodes::{KeySet, NodeCollection, NodeId};
use super::store::TtlStore;

/// A GraphQL request as seen by the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query_id: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub operation_name: Option<String>,
    /// Identified callers bypass the cache in both directions.
    #[serde(default)]
    pub authenticated: bool,
}

impl QueryRequest {
    pub fn query(document: impl Into<String>) -> Self {
        Self {
            query: Some(document.into()),
            ..Default::default()
        }
    }

    pub fn persisted(query_id: impl Into<String>) -> Self {
        Self {
            query_id: Some(query_id.into()),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_operation(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }
}

/// Stored form of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub key: CacheKey,
    pub payload: Value,
    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    Disabled,
    Authenticated,
    KeyUnavailable,
    Absent,
    StoreError,
    DecodeError,
}

impl MissReason {
    pub fn as_str(self) -> &'static str {
        match self {
            MissReason::Disabled => "disabled",
            MissReason::Authenticated => "authenticated",
            MissReason::KeyUnavailable => "key_unavailable",
            MissReason::Absent => "absent",
            MissReason::StoreError => "store_error",
            MissReason::DecodeError => "decode_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CachedResponse),
    Miss(MissReason),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored(CacheKey),
    /// An entry already existed; it was left untouched.
    AlreadyCached(CacheKey),
    Skipped(MissReason),
    Failed(CacheKey),
}

/// Response returned by [`ResultsCache::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct Served {
    pub payload: Value,
    pub from_cache: bool,
}

pub struct ResultsCache {
    config: CacheConfig,
    keys: KeyBuilder,
    store: Arc<dyn TtlStore>,
    collection: Arc<NodeCollection>,
}

impl ResultsCache {
    pub fn new(
        config: &CacheConfig,
        keys: KeyBuilder,
        store: Arc<dyn TtlStore>,
        collection: Arc<NodeCollection>,
    ) -> Self {
        Self {
            config: config.clone(),
            keys,
            store,
            collection,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn key_for(&self, request: &QueryRequest) -> Result<CacheKey, KeyUnavailable> {
        self.keys.build_key(
            request.query_id.as_deref(),
            request.query.as_deref(),
            request.variables.as_ref(),
            request.operation_name.as_deref(),
        )
    }

    /// Gate and key derivation shared by lookup and store.
    fn cacheable_key(&self, request: &QueryRequest) -> Result<CacheKey, MissReason> {
        if !self.config.enabled {
            return Err(MissReason::Disabled);
        }
        if request.authenticated {
            return Err(MissReason::Authenticated);
        }
        self.key_for(request).map_err(|error| {
            if error != KeyUnavailable::MissingQuery {
                warn!(error = %error, "Cache key unavailable");
            }
            MissReason::KeyUnavailable
        })
    }

    fn read(&self, key: &CacheKey) -> Result<Option<CachedResponse>, StoreError> {
        let Some(bytes) = self.store.get(key.as_str())? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(StoreError::Decode)
    }

    #[instrument(skip_all)]
    pub fn lookup(&self, request: &QueryRequest) -> CacheLookup {
        let outcome = match self.cacheable_key(request) {
            Err(reason) => CacheLookup::Miss(reason),
            Ok(key) => match self.read(&key) {
                Ok(Some(cached)) => CacheLookup::Hit(cached),
                Ok(None) => {
                    self.release(&key);
                    CacheLookup::Miss(MissReason::Absent)
                }
                Err(error) => {
                    warn!(key = %key, error = %error, "Cache read failed");
                    match error {
                        StoreError::Decode(_) => CacheLookup::Miss(MissReason::DecodeError),
                        _ => CacheLookup::Miss(MissReason::StoreError),
                    }
                }
            },
        };

        match &outcome {
            CacheLookup::Hit(cached) => {
                counter!(RESULTS_HIT).increment(1);
                debug!(key = %cached.key, "Cache hit");
            }
            CacheLookup::Miss(reason) => {
                counter!(RESULTS_MISS, "reason" => reason.as_str()).increment(1);
                debug!(reason = reason.as_str(), "Cache miss");
            }
        }
        outcome
    }

    /// Cache a freshly executed response and link it to `nodes`.
    ///
    /// An existing entry is never overwritten.
    #[instrument(skip_all)]
    pub fn store<I>(&self, request: &QueryRequest, response: &Value, nodes: I) -> StoreOutcome
    where
        I: IntoIterator<Item = NodeId>,
    {
        let key = match self.cacheable_key(request) {
            Ok(key) => key,
            Err(reason) => return StoreOutcome::Skipped(reason),
        };

        let mut evicted = None;
        let outcome = match self.read(&key) {
            Ok(Some(_)) => StoreOutcome::AlreadyCached(key.clone()),
            Ok(None) | Err(_) => match self.write(&key, response) {
                Ok(displaced) => {
                    counter!(RESULTS_STORE).increment(1);
                    evicted = displaced;
                    StoreOutcome::Stored(key.clone())
                }
                Err(error) => {
                    warn!(key = %key, error = %error, "Cache write failed");
                    return StoreOutcome::Failed(key);
                }
            },
        };

        let mut linked = 0;
        for node in nodes {
            self.collection.add(node, key.clone());
            linked += 1;
        }
        debug!(key = %key, nodes = linked, outcome = ?outcome, "Cache store");

        if let Some(evicted) = evicted {
            self.release(&CacheKey::new(evicted));
        }
        outcome
    }

    /// Returns the key the store evicted to make room, if any.
    fn write(&self, key: &CacheKey, response: &Value) -> Result<Option<String>, StoreError> {
        let ttl = self.config.ttl();
        let expires_at = time::Duration::try_from(ttl)
            .ok()
            .and_then(|lifetime| OffsetDateTime::now_utc().checked_add(lifetime))
            .ok_or_else(|| StoreError::Unavailable(format!("ttl {ttl:?} is out of range")))?;
        let cached = CachedResponse {
            key: key.clone(),
            payload: response.clone(),
            expires_at,
        };
        let bytes = serde_json::to_vec(&cached).map_err(StoreError::Encode)?;
        self.store.set(key.as_str(), Bytes::from(bytes), ttl)
    }

    /// Serve from cache, or run `execute` while collecting the nodes it
    /// records through [`deps::record`] and cache the result.
    pub async fn execute<F, E>(&self, request: &QueryRequest, execute: F) -> Result<Served, E>
    where
        F: Future<Output = Result<Value, E>>,
    {
        if let CacheLookup::Hit(cached) = self.lookup(request) {
            return Ok(Served {
                payload: cached.payload,
                from_cache: true,
            });
        }

        let (result, nodes) = deps::with_collector(execute).await;
        let payload = result?;
        self.store(request, &payload, nodes);
        Ok(Served {
            payload,
            from_cache: false,
        })
    }

    /// Unlink a key whose entry left the store. The links are put back when
    /// the entry is live again, written by a concurrent `store`.
    fn release(&self, key: &CacheKey) {
        let nodes = self.collection.unregister(key);
        if nodes.is_empty() {
            return;
        }
        if matches!(self.store.contains(key.as_str()), Ok(false)) {
            debug!(key = %key, nodes = nodes.len(), "Released node links");
            return;
        }
        for node in nodes {
            self.collection.add(node, key.clone());
        }
    }

    /// Delete `keys` from the store. Missing keys are fine; failing keys
    /// are logged, the rest are still attempted, and the failures come back
    /// in [`PurgeError::Partial`].
    pub fn purge_nodes_cb(&self, node: &NodeId, keys: &KeySet) -> Result<usize, PurgeError> {
        let mut failed = KeySet::new();
        for key in keys {
            match self.store.delete(key.as_str()) {
                Ok(_) => self.release(key),
                Err(error) => {
                    let error = PurgeError::Key {
                        key: key.to_string(),
                        source: error,
                    };
                    warn!(node = %node, error = %error, "Failed to purge cached result");
                    failed.insert(key.clone());
                }
            }
        }

        let deleted = keys.len() - failed.len();
        counter!(PURGE_KEYS).increment(deleted as u64);
        debug!(node = %node, deleted, failed = failed.len(), "Purged cached results");

        if failed.is_empty() {
            Ok(deleted)
        } else {
            Err(PurgeError::Partial {
                attempted: keys.len(),
                failed,
            })
        }
    }

    /// Drop every cached response and every node link.
    pub fn purge_all(&self) -> Result<usize, PurgeError> {
        if !self.config.enabled {
            return Err(PurgeError::Disabled);
        }
        let removed = self.store.delete_prefix(KEY_PREFIX)?;
        self.collection.clear_all();
        debug!(removed, "Purged all cached results");
        Ok(removed)
    }
}

impl PurgeSubscriber for ResultsCache {
    fn name(&self) -> &str {
        "results"
    }

    fn purge_nodes(&self, node: &NodeId, keys: &KeySet) -> Result<(), PurgeError> {
        self.purge_nodes_cb(node, keys).map(|_| ())
    }
}
