//! Content-mutation events consumed by the invalidation listener.
//!
//! The set is closed: any other mutation of the content store is invisible
//! to the cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostStatus {
    Publish,
    Draft,
    Pending,
    Private,
    Future,
    Trash,
    AutoDraft,
    Inherit,
    New,
    #[serde(other)]
    Other,
}

impl PostStatus {
    pub fn is_published(self) -> bool {
        self == PostStatus::Publish
    }

    /// Statuses of content that has never been made visible.
    pub fn is_initial(self) -> bool {
        matches!(
            self,
            PostStatus::AutoDraft | PostStatus::Inherit | PostStatus::New
        )
    }
}

/// Snapshot of a content item as carried by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub id: u64,
    pub post_type: String,
    pub status: PostStatus,
    #[serde(default)]
    pub author_id: u64,
}

/// Term-taxonomy relation touched by a term edit. `term_id` is `None` when
/// the relation no longer resolves to a term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRef {
    pub term_taxonomy_id: u64,
    #[serde(default)]
    pub term_id: Option<u64>,
}

/// Discriminant of [`MutationEvent`], used to register handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PostTransition,
    PostUpdated,
    PostDeleted,
    PostMetaChanged,
    TermTaxonomyEdited,
    UserMetaChanged,
    UserProfileUpdated,
    UserDeleted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PostTransition => "post_transition",
            EventKind::PostUpdated => "post_updated",
            EventKind::PostDeleted => "post_deleted",
            EventKind::PostMetaChanged => "post_meta_changed",
            EventKind::TermTaxonomyEdited => "term_taxonomy_edited",
            EventKind::UserMetaChanged => "user_meta_changed",
            EventKind::UserProfileUpdated => "user_profile_updated",
            EventKind::UserDeleted => "user_deleted",
        }
    }
}

/// A content mutation reported by the host system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationEvent {
    PostTransition {
        old_status: PostStatus,
        new_status: PostStatus,
        post: PostRef,
        #[serde(default)]
        autosave: bool,
    },
    PostUpdated {
        post_before: PostRef,
        post_after: PostRef,
    },
    PostDeleted {
        post: PostRef,
    },
    PostMetaChanged {
        post: PostRef,
        key: String,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        is_delete: bool,
    },
    TermTaxonomyEdited {
        term: TermRef,
        taxonomy: String,
    },
    UserMetaChanged {
        user: u64,
        key: String,
        #[serde(default)]
        value: Value,
    },
    UserProfileUpdated {
        user_id: u64,
    },
    UserDeleted {
        deleted_id: u64,
        #[serde(default)]
        reassign_id: Option<u64>,
    },
}

impl MutationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MutationEvent::PostTransition { .. } => EventKind::PostTransition,
            MutationEvent::PostUpdated { .. } => EventKind::PostUpdated,
            MutationEvent::PostDeleted { .. } => EventKind::PostDeleted,
            MutationEvent::PostMetaChanged { .. } => EventKind::PostMetaChanged,
            MutationEvent::TermTaxonomyEdited { .. } => EventKind::TermTaxonomyEdited,
            MutationEvent::UserMetaChanged { .. } => EventKind::UserMetaChanged,
            MutationEvent::UserProfileUpdated { .. } => EventKind::UserProfileUpdated,
            MutationEvent::UserDeleted { .. } => EventKind::UserDeleted,
        }
    }
}
