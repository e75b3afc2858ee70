//! Mutation event → node purge pipeline.
//!
//! Each handler is a pure filter-then-resolve function from an event to the
//! nodes it invalidates. The listener runs the handlers registered for the
//! event's kind, takes the keys linked to each node out of the
//! [`NodeCollection`] and hands them to the [`PurgeBroadcaster`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use serde::Serialize;
use serde_json::Value;
use tracing::{Span, debug, info, instrument, warn};
use uuid::Uuid;

use super::broadcast::PurgeBroadcaster;
use super::config::CacheConfig;
use super::events::{EventKind, MutationEvent, PostRef, PostStatus};
use super::instruments::INVALIDATION_MS;
use super::nodes::{KeySet, NodeCollection, NodeId};

/// Entity owning a changed meta key.
#[derive(Debug, Clone, Copy)]
pub enum MetaOwner<'a> {
    Post(&'a PostRef),
    User(u64),
}

type MetaOverride = dyn Fn(&str, &Value, MetaOwner<'_>) -> Option<bool> + Send + Sync;

/// Decides whether a meta key change is visible to queries.
///
/// Checked in order: the injected override, the configured tracked and
/// ignored key lists, then the private prefix. Anything left is tracked.
#[derive(Clone)]
pub struct MetaTrackingPolicy {
    private_prefix: String,
    tracked: HashSet<String>,
    ignored: HashSet<String>,
    override_fn: Option<Arc<MetaOverride>>,
}

impl MetaTrackingPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            private_prefix: config.private_meta_prefix.clone(),
            tracked: config.tracked_meta_keys.iter().cloned().collect(),
            ignored: config.ignored_meta_keys.iter().cloned().collect(),
            override_fn: None,
        }
    }

    /// Install a predicate consulted before every other rule. Returning
    /// `None` defers to the configured policy.
    pub fn with_override<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str, &Value, MetaOwner<'_>) -> Option<bool> + Send + Sync + 'static,
    {
        self.override_fn = Some(Arc::new(predicate));
        self
    }

    pub fn should_track(&self, key: &str, value: &Value, owner: MetaOwner<'_>) -> bool {
        if let Some(decision) = self
            .override_fn
            .as_ref()
            .and_then(|predicate| predicate(key, value, owner))
        {
            return decision;
        }
        if self.tracked.contains(key) {
            return true;
        }
        if self.ignored.contains(key) {
            return false;
        }
        self.private_prefix.is_empty() || !key.starts_with(&self.private_prefix)
    }
}

impl Default for MetaTrackingPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl fmt::Debug for MetaTrackingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaTrackingPolicy")
            .field("private_prefix", &self.private_prefix)
            .field("tracked", &self.tracked)
            .field("ignored", &self.ignored)
            .field("override", &self.override_fn.is_some())
            .finish()
    }
}

/// Everything a handler may consult. Fixed at construction.
#[derive(Debug, Clone)]
pub struct InvalidationRules {
    pub config: CacheConfig,
    pub meta: MetaTrackingPolicy,
}

/// Resolves one event to the nodes it invalidates.
pub type Handler = Box<dyn Fn(&InvalidationRules, &MutationEvent) -> Vec<NodeId> + Send + Sync>;

/// How a status transition affects published content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    Create,
    Update,
    Delete,
}

/// Leaving `publish` is a delete, entering it is a create, anything else
/// is an update.
pub fn classify_transition(old: PostStatus, new: PostStatus) -> TransitionAction {
    match (old.is_published(), new.is_published()) {
        (true, false) => TransitionAction::Delete,
        (false, true) => TransitionAction::Create,
        _ => TransitionAction::Update,
    }
}

pub fn resolve_transition(rules: &InvalidationRules, event: &MutationEvent) -> Vec<NodeId> {
    let MutationEvent::PostTransition {
        old_status,
        new_status,
        post,
        autosave,
    } = event
    else {
        return Vec::new();
    };
    let (old, new) = (*old_status, *new_status);

    if *autosave
        || !rules.config.is_public_post_type(&post.post_type)
        || new.is_initial()
        || (old == PostStatus::Draft && new == PostStatus::Draft)
        || !(old.is_published() || new.is_published())
    {
        return Vec::new();
    }

    match classify_transition(old, new) {
        TransitionAction::Create => vec![NodeId::list(&post.post_type)],
        TransitionAction::Update | TransitionAction::Delete => vec![NodeId::post(post.id)],
    }
}

pub fn resolve_post_updated(_: &InvalidationRules, event: &MutationEvent) -> Vec<NodeId> {
    let MutationEvent::PostUpdated {
        post_before,
        post_after,
    } = event
    else {
        return Vec::new();
    };
    if post_before.author_id == post_after.author_id {
        return Vec::new();
    }
    vec![
        NodeId::user(post_after.author_id),
        NodeId::user(post_before.author_id),
        NodeId::post(post_after.id),
    ]
}

pub fn resolve_post_deleted(rules: &InvalidationRules, event: &MutationEvent) -> Vec<NodeId> {
    match event {
        MutationEvent::PostDeleted { post }
            if rules.config.tracks_post_type(&post.post_type) && post.status.is_published() =>
        {
            vec![NodeId::post(post.id)]
        }
        _ => Vec::new(),
    }
}

pub fn resolve_post_meta(rules: &InvalidationRules, event: &MutationEvent) -> Vec<NodeId> {
    let MutationEvent::PostMetaChanged {
        post, key, value, ..
    } = event
    else {
        return Vec::new();
    };
    if !rules.config.tracks_post_type(&post.post_type)
        || !post.status.is_published()
        || !rules.meta.should_track(key, value, MetaOwner::Post(post))
    {
        return Vec::new();
    }
    vec![NodeId::post(post.id)]
}

pub fn resolve_term_edited(rules: &InvalidationRules, event: &MutationEvent) -> Vec<NodeId> {
    match event {
        MutationEvent::TermTaxonomyEdited { term, taxonomy }
            if rules.config.tracks_taxonomy(taxonomy) =>
        {
            term.term_id.map(NodeId::term).into_iter().collect()
        }
        _ => Vec::new(),
    }
}

pub fn resolve_user_meta(rules: &InvalidationRules, event: &MutationEvent) -> Vec<NodeId> {
    match event {
        MutationEvent::UserMetaChanged { user, key, value }
            if rules.meta.should_track(key, value, MetaOwner::User(*user)) =>
        {
            vec![NodeId::user(*user)]
        }
        _ => Vec::new(),
    }
}

pub fn resolve_user_profile(_: &InvalidationRules, event: &MutationEvent) -> Vec<NodeId> {
    match event {
        MutationEvent::UserProfileUpdated { user_id } => vec![NodeId::user(*user_id)],
        _ => Vec::new(),
    }
}

pub fn resolve_user_deleted(_: &InvalidationRules, event: &MutationEvent) -> Vec<NodeId> {
    let MutationEvent::UserDeleted {
        deleted_id,
        reassign_id,
    } = event
    else {
        return Vec::new();
    };
    let mut nodes = vec![NodeId::user(*deleted_id)];
    if let Some(target) = reassign_id.filter(|id| *id != 0) {
        nodes.push(NodeId::user(target));
    }
    nodes
}

/// One node purge triggered by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeOutcome {
    pub node: NodeId,
    pub keys: KeySet,
    pub delivered: usize,
    pub failed: Vec<String>,
    /// Keys that could not be purged; they stay linked to `node` so the next
    /// mutation retries them.
    pub retained: KeySet,
}

/// What the listener did with one event. Ineligible events resolve to no
/// nodes; nodes without linked keys produce no purge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    /// Correlates the report with the log lines of the same dispatch.
    pub id: Uuid,
    pub event: &'static str,
    pub nodes: Vec<NodeId>,
    pub purges: Vec<PurgeOutcome>,
}

impl InvalidationReport {
    pub fn purged_nodes(&self) -> Vec<&NodeId> {
        self.purges.iter().map(|purge| &purge.node).collect()
    }

    pub fn is_noop(&self) -> bool {
        self.purges.is_empty()
    }
}

/// Subscribes to the mutation feed and purges affected nodes.
pub struct InvalidationListener {
    rules: InvalidationRules,
    handlers: Vec<(EventKind, Handler)>,
    collection: Arc<NodeCollection>,
    broadcaster: Arc<PurgeBroadcaster>,
}

impl InvalidationListener {
    /// Listener with the built-in handler for every event kind.
    pub fn new(
        config: &CacheConfig,
        meta: MetaTrackingPolicy,
        collection: Arc<NodeCollection>,
        broadcaster: Arc<PurgeBroadcaster>,
    ) -> Self {
        let mut listener = Self {
            rules: InvalidationRules {
                config: config.clone(),
                meta,
            },
            handlers: Vec::new(),
            collection,
            broadcaster,
        };
        listener.register(EventKind::PostTransition, Box::new(resolve_transition));
        listener.register(EventKind::PostUpdated, Box::new(resolve_post_updated));
        listener.register(EventKind::PostDeleted, Box::new(resolve_post_deleted));
        listener.register(EventKind::PostMetaChanged, Box::new(resolve_post_meta));
        listener.register(EventKind::TermTaxonomyEdited, Box::new(resolve_term_edited));
        listener.register(EventKind::UserMetaChanged, Box::new(resolve_user_meta));
        listener.register(EventKind::UserProfileUpdated, Box::new(resolve_user_profile));
        listener.register(EventKind::UserDeleted, Box::new(resolve_user_deleted));
        listener
    }

    /// Add a handler for `kind`. Handlers run in registration order.
    pub fn register(&mut self, kind: EventKind, handler: Handler) {
        self.handlers.push((kind, handler));
    }

    pub fn rules(&self) -> &InvalidationRules {
        &self.rules
    }

    /// Nodes the event invalidates, deduplicated in handler order.
    pub fn resolve(&self, event: &MutationEvent) -> Vec<NodeId> {
        let kind = event.kind();
        let mut seen = HashSet::new();
        self.handlers
            .iter()
            .filter(|(registered, _)| *registered == kind)
            .flat_map(|(_, handler)| handler(&self.rules, event))
            .filter(|node| seen.insert(node.clone()))
            .collect()
    }

    /// Resolve the event and purge every node that has cached keys.
    ///
    /// Never fails: subscriber errors are reported, not returned.
    #[instrument(skip_all, fields(event = event.kind().as_str(), event_id = tracing::field::Empty))]
    pub fn handle(&self, event: &MutationEvent) -> InvalidationReport {
        let started = Instant::now();
        let id = Uuid::new_v4();
        Span::current().record("event_id", tracing::field::display(id));
        let kind = event.kind();
        let nodes = self.resolve(event);

        let mut purges = Vec::new();
        for node in &nodes {
            let Some(keys) = self.collection.take(node) else {
                debug!(node = %node, "No cached keys for node");
                continue;
            };
            let emitted = self.broadcaster.emit(node, &keys);
            for key in &emitted.retained {
                self.collection.add(node.clone(), key.clone());
            }
            if !emitted.retained.is_empty() {
                warn!(
                    node = %node,
                    retained = emitted.retained.len(),
                    "Keys kept linked after a partial purge"
                );
            }
            purges.push(PurgeOutcome {
                node: node.clone(),
                keys,
                delivered: emitted.delivered,
                failed: emitted.failed,
                retained: emitted.retained,
            });
        }

        histogram!(INVALIDATION_MS, "event" => kind.as_str())
            .record(started.elapsed().as_secs_f64() * 1000.0);

        if purges.is_empty() {
            debug!(resolved = nodes.len(), "Mutation produced no purge");
        } else {
            info!(
                resolved = nodes.len(),
                purged = purges.len(),
                keys = purges.iter().map(|p| p.keys.len()).sum::<usize>(),
                "Mutation purged cached results"
            );
        }

        InvalidationReport {
            id,
            event: kind.as_str(),
            nodes,
            purges,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rules() -> InvalidationRules {
        let config = CacheConfig {
            tracked_post_types: vec!["post".into(), "article".into(), "internal".into()],
            non_public_post_types: vec!["internal".into()],
            ..Default::default()
        };
        InvalidationRules {
            meta: MetaTrackingPolicy::from_config(&config),
            config,
        }
    }

    fn post(id: u64, post_type: &str, status: PostStatus) -> PostRef {
        PostRef {
            id,
            post_type: post_type.to_string(),
            status,
            author_id: 1,
        }
    }

    fn transition(old: PostStatus, new: PostStatus, post_type: &str) -> MutationEvent {
        MutationEvent::PostTransition {
            old_status: old,
            new_status: new,
            post: post(42, post_type, new),
            autosave: false,
        }
    }

    #[test]
    fn classify_ties() {
        use PostStatus::*;
        assert_eq!(classify_transition(Publish, Trash), TransitionAction::Delete);
        assert_eq!(classify_transition(Draft, Publish), TransitionAction::Create);
        assert_eq!(classify_transition(Publish, Publish), TransitionAction::Update);
        assert_eq!(classify_transition(Draft, Pending), TransitionAction::Update);
    }

    #[test]
    fn transition_gates() {
        use PostStatus::*;
        let rules = rules();

        assert!(resolve_transition(&rules, &transition(Draft, Draft, "post")).is_empty());
        assert!(resolve_transition(&rules, &transition(Draft, Pending, "post")).is_empty());
        assert!(resolve_transition(&rules, &transition(Publish, AutoDraft, "post")).is_empty());
        assert!(resolve_transition(&rules, &transition(Publish, Inherit, "post")).is_empty());
        assert!(resolve_transition(&rules, &transition(Draft, Publish, "attachment")).is_empty());
        assert!(resolve_transition(&rules, &transition(Draft, Publish, "internal")).is_empty());

        let autosave = MutationEvent::PostTransition {
            old_status: Publish,
            new_status: Publish,
            post: post(42, "post", Publish),
            autosave: true,
        };
        assert!(resolve_transition(&rules, &autosave).is_empty());
    }

    #[test]
    fn transition_targets() {
        use PostStatus::*;
        let rules = rules();

        assert_eq!(
            resolve_transition(&rules, &transition(Draft, Publish, "Article")),
            vec![NodeId::list("article")]
        );
        assert_eq!(
            resolve_transition(&rules, &transition(Publish, Trash, "post")),
            vec![NodeId::post(42)]
        );
        assert_eq!(
            resolve_transition(&rules, &transition(Publish, Publish, "post")),
            vec![NodeId::post(42)]
        );
    }

    #[test]
    fn author_change_purges_both_authors_and_post() {
        let before = post(7, "post", PostStatus::Publish);
        let after = PostRef {
            author_id: 2,
            ..before.clone()
        };
        let event = MutationEvent::PostUpdated {
            post_before: before.clone(),
            post_after: after,
        };
        assert_eq!(
            resolve_post_updated(&rules(), &event),
            vec![NodeId::user(2), NodeId::user(1), NodeId::post(7)]
        );

        let unchanged = MutationEvent::PostUpdated {
            post_before: before.clone(),
            post_after: before,
        };
        assert!(resolve_post_updated(&rules(), &unchanged).is_empty());
    }

    #[test]
    fn delete_requires_published_tracked_post() {
        let rules = rules();
        let published = MutationEvent::PostDeleted {
            post: post(3, "post", PostStatus::Publish),
        };
        let draft = MutationEvent::PostDeleted {
            post: post(3, "post", PostStatus::Draft),
        };
        let untracked = MutationEvent::PostDeleted {
            post: post(3, "attachment", PostStatus::Publish),
        };

        assert_eq!(resolve_post_deleted(&rules, &published), vec![NodeId::post(3)]);
        assert!(resolve_post_deleted(&rules, &draft).is_empty());
        assert!(resolve_post_deleted(&rules, &untracked).is_empty());
    }

    #[test]
    fn post_meta_filters() {
        let rules = rules();
        let meta = |key: &str, status: PostStatus| MutationEvent::PostMetaChanged {
            post: post(5, "post", status),
            key: key.to_string(),
            value: json!("v"),
            is_delete: false,
        };

        assert_eq!(
            resolve_post_meta(&rules, &meta("price", PostStatus::Publish)),
            vec![NodeId::post(5)]
        );
        assert!(resolve_post_meta(&rules, &meta("_edit_lock", PostStatus::Publish)).is_empty());
        assert!(resolve_post_meta(&rules, &meta("price", PostStatus::Draft)).is_empty());
    }

    #[test]
    fn term_edit_requires_tracked_taxonomy_and_resolved_term() {
        let rules = rules();
        let edit = |taxonomy: &str, term_id: Option<u64>| MutationEvent::TermTaxonomyEdited {
            term: super::super::events::TermRef {
                term_taxonomy_id: 11,
                term_id,
            },
            taxonomy: taxonomy.to_string(),
        };

        assert_eq!(
            resolve_term_edited(&rules, &edit("category", Some(9))),
            vec![NodeId::term(9)]
        );
        assert!(resolve_term_edited(&rules, &edit("nav_menu", Some(9))).is_empty());
        assert!(resolve_term_edited(&rules, &edit("category", None)).is_empty());
    }

    #[test]
    fn user_events() {
        let rules = rules();

        assert_eq!(
            resolve_user_profile(&rules, &MutationEvent::UserProfileUpdated { user_id: 4 }),
            vec![NodeId::user(4)]
        );
        assert_eq!(
            resolve_user_deleted(
                &rules,
                &MutationEvent::UserDeleted {
                    deleted_id: 4,
                    reassign_id: Some(8)
                }
            ),
            vec![NodeId::user(4), NodeId::user(8)]
        );
        assert_eq!(
            resolve_user_deleted(
                &rules,
                &MutationEvent::UserDeleted {
                    deleted_id: 4,
                    reassign_id: Some(0)
                }
            ),
            vec![NodeId::user(4)]
        );

        let private = MutationEvent::UserMetaChanged {
            user: 4,
            key: "_session_tokens".into(),
            value: Value::Null,
        };
        assert!(resolve_user_meta(&rules, &private).is_empty());
    }

    #[test]
    fn meta_policy_precedence() {
        let config = CacheConfig {
            tracked_meta_keys: vec!["_price".into()],
            ignored_meta_keys: vec!["views".into()],
            ..Default::default()
        };
        let policy = MetaTrackingPolicy::from_config(&config);
        let owner = MetaOwner::User(1);

        assert!(policy.should_track("_price", &Value::Null, owner));
        assert!(!policy.should_track("views", &Value::Null, owner));
        assert!(!policy.should_track("_hidden", &Value::Null, owner));
        assert!(policy.should_track("title", &Value::Null, owner));

        let forced = policy.with_override(|key, _, _| (key == "views").then_some(true));
        assert!(forced.should_track("views", &Value::Null, owner));
        assert!(!forced.should_track("_hidden", &Value::Null, owner));
    }

    #[test]
    fn empty_prefix_tracks_everything() {
        let config = CacheConfig {
            private_meta_prefix: String::new(),
            ..Default::default()
        };
        let policy = MetaTrackingPolicy::from_config(&config);
        assert!(policy.should_track("_anything", &Value::Null, MetaOwner::User(1)));
    }

    #[test]
    fn registered_handlers_extend_resolution() {
        let mut listener = InvalidationListener::new(
            &CacheConfig::default(),
            MetaTrackingPolicy::default(),
            Arc::new(NodeCollection::new()),
            Arc::new(PurgeBroadcaster::new()),
        );
        listener.register(
            EventKind::UserProfileUpdated,
            Box::new(|_: &InvalidationRules, _: &MutationEvent| {
                vec![NodeId::list("user"), NodeId::user(4)]
            }),
        );

        let nodes = listener.resolve(&MutationEvent::UserProfileUpdated { user_id: 4 });
        assert_eq!(nodes, vec![NodeId::user(4), NodeId::list("user")]);
    }
}
