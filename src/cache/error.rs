//! Error types for the result cache.
//!
//! None of these escape into the content-mutation path: lookups degrade to a
//! miss, writes and purges are logged and swallowed.

use thiserror::Error;

use super::nodes::KeySet;

/// Why no cache key could be derived for a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyUnavailable {
    #[error("request carries neither a query nor a persisted query id")]
    MissingQuery,
    #[error("query document contains no tokens")]
    EmptyDocument,
    #[error("query syntax error at byte {position}: {reason}")]
    Syntax { position: usize, reason: &'static str },
    #[error("variables could not be serialized: {0}")]
    Variables(String),
}

impl KeyUnavailable {
    pub(crate) fn syntax(position: usize, reason: &'static str) -> Self {
        Self::Syntax { position, reason }
    }
}

/// Failure of the underlying TTL key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode cached response: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode cached response: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Failure while purging cache entries.
#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("failed to delete `{key}`: {source}")]
    Key {
        key: String,
        #[source]
        source: StoreError,
    },
    /// `failed` holds the keys still present in the store.
    #[error("{} of {attempted} keys could not be deleted", failed.len())]
    Partial { attempted: usize, failed: KeySet },
    #[error("caching is disabled")]
    Disabled,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Subscriber(String),
}

impl PurgeError {
    pub fn subscriber(message: impl Into<String>) -> Self {
        Self::Subscriber(message.into())
    }
}
