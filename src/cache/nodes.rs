//! Node identifiers and the node → cache-key dependency index.
//!
//! Every cached response is linked to the nodes it touched. When content
//! changes, the affected node is looked up here and only its keys are purged.

use std::collections::BTreeSet;
use std::fmt;

use dashmap::DashMap;
use metrics::counter;
use serde::{Deserialize, Serialize};

use super::instruments::NODE_LINKS;
use super::keys::CacheKey;

/// Kind of a single content entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Post,
    Term,
    User,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Post => "post",
            EntityKind::Term => "term",
            EntityKind::User => "user",
        }
    }
}

/// Opaque, type-prefixed entity identifier, e.g. `post:42`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId {
    pub kind: EntityKind,
    pub id: u64,
}

impl GlobalId {
    pub fn new(kind: EntityKind, id: u64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Index entry name: `{kind}:{global_id}` for one entity, `list:{type}` for
/// the bucket of list queries that could include a content type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn entity(global_id: GlobalId) -> Self {
        Self(format!("{}:{}", global_id.kind.as_str(), global_id))
    }

    pub fn post(id: u64) -> Self {
        Self::entity(GlobalId::new(EntityKind::Post, id))
    }

    pub fn term(id: u64) -> Self {
        Self::entity(GlobalId::new(EntityKind::Term, id))
    }

    pub fn user(id: u64) -> Self {
        Self::entity(GlobalId::new(EntityKind::User, id))
    }

    /// List bucket for a content type; the type name is lowercased.
    pub fn list(type_name: &str) -> Self {
        Self(format!("list:{}", type_name.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_list(&self) -> bool {
        self.0.starts_with("list:")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Keys linked to one node. Membership matters, order does not.
pub type KeySet = BTreeSet<CacheKey>;

/// Maps nodes to the cache keys whose results touched them, with the reverse
/// key → nodes index used to drop a key that left the store.
///
/// Additions merge into the node's set under the shard lock, so concurrent
/// requests linking the same node never drop each other's keys. `add` writes
/// the forward link before the reverse one; removals rely on that order.
#[derive(Debug, Default)]
pub struct NodeCollection {
    nodes: DashMap<NodeId, KeySet>,
    keys: DashMap<CacheKey, BTreeSet<NodeId>>,
}

impl NodeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node identifier for an entity. Stable across calls.
    pub fn nodes_key(global_id: GlobalId) -> NodeId {
        NodeId::entity(global_id)
    }

    /// Link `key` to `node`. Returns false if the link already existed.
    pub fn add(&self, node: NodeId, key: CacheKey) -> bool {
        let inserted = self
            .nodes
            .entry(node.clone())
            .or_default()
            .insert(key.clone());
        self.keys.entry(key).or_default().insert(node);
        if inserted {
            counter!(NODE_LINKS).increment(1);
        }
        inserted
    }

    /// Keys linked to `node`, or `None` when nothing is cached for it.
    pub fn retrieve_nodes(&self, node: &NodeId) -> Option<KeySet> {
        self.nodes
            .get(node)
            .filter(|keys| !keys.is_empty())
            .map(|keys| keys.clone())
    }

    /// Nodes `key` is linked to.
    pub fn nodes_for_key(&self, key: &CacheKey) -> BTreeSet<NodeId> {
        self.keys
            .get(key)
            .map(|nodes| nodes.clone())
            .unwrap_or_default()
    }

    /// Drop every link of `node`. Returns true if the node had an entry.
    pub fn clear(&self, node: &NodeId) -> bool {
        self.take_bucket(node).is_some()
    }

    /// Retrieve and clear in one step, so a link added concurrently is
    /// either returned here or kept for the next purge.
    pub fn take(&self, node: &NodeId) -> Option<KeySet> {
        self.take_bucket(node).filter(|keys| !keys.is_empty())
    }

    fn take_bucket(&self, node: &NodeId) -> Option<KeySet> {
        let (_, keys) = self.nodes.remove(node)?;
        for key in &keys {
            self.forget_reverse(key, node);
        }
        Some(keys)
    }

    /// Remove `node` from the reverse entry of `key`, unless a concurrent
    /// `add` has already linked them again.
    fn forget_reverse(&self, key: &CacheKey, node: &NodeId) {
        if let Some(mut nodes) = self.keys.get_mut(key) {
            let relinked = self
                .nodes
                .get(node)
                .is_some_and(|keys| keys.contains(key));
            if !relinked {
                nodes.remove(node);
            }
        }
        self.keys.remove_if(key, |_, nodes| nodes.is_empty());
    }

    /// Drop every link of `key`, returning the nodes it was linked to.
    ///
    /// Called when the key's entry was evicted, expired or deleted.
    pub fn unregister(&self, key: &CacheKey) -> BTreeSet<NodeId> {
        let Some((_, nodes)) = self.keys.remove(key) else {
            return BTreeSet::new();
        };
        for node in &nodes {
            if let Some(mut keys) = self.nodes.get_mut(node) {
                keys.remove(key);
            }
            self.nodes.remove_if(node, |_, keys| keys.is_empty());
        }
        nodes
    }

    pub fn clear_all(&self) {
        self.nodes.clear();
        self.keys.clear();
    }

    /// Number of nodes with at least one entry.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of keys linked to at least one node.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Total number of node → key links.
    pub fn link_count(&self) -> usize {
        self.nodes.iter().map(|entry| entry.value().len()).sum()
    }
}
