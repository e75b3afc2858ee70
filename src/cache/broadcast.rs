//! Purge fan-out from the invalidation listener to every cache layer.

use std::sync::{Arc, RwLock};

use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use super::error::PurgeError;
use super::instruments::PURGE_FAILURES;
use super::lock::{read, write};
use super::nodes::{KeySet, NodeId};

const SOURCE: &str = "cache::broadcast";

/// A cache layer that reacts to node purges.
pub trait PurgeSubscriber: Send + Sync {
    /// Label used in logs and metrics.
    fn name(&self) -> &str;

    /// Drop everything cached under `keys`, which were linked to `node`.
    fn purge_nodes(&self, node: &NodeId, keys: &KeySet) -> Result<(), PurgeError>;
}

/// Adapts a closure into a [`PurgeSubscriber`].
pub struct FnSubscriber<F> {
    name: String,
    callback: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(&NodeId, &KeySet) -> Result<(), PurgeError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

impl<F> PurgeSubscriber for FnSubscriber<F>
where
    F: Fn(&NodeId, &KeySet) -> Result<(), PurgeError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn purge_nodes(&self, node: &NodeId, keys: &KeySet) -> Result<(), PurgeError> {
        (self.callback)(node, keys)
    }
}

/// Outcome of one [`PurgeBroadcaster::emit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmitReport {
    pub node: NodeId,
    pub keys: usize,
    pub delivered: usize,
    /// Names of subscribers that reported a failure.
    pub failed: Vec<String>,
    /// Keys a subscriber reported as still cached after a partial purge.
    pub retained: KeySet,
}

impl EmitReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Synchronous, ordered fan-out of `purge_nodes` to registered subscribers.
#[derive(Default)]
pub struct PurgeBroadcaster {
    subscribers: RwLock<Vec<Arc<dyn PurgeSubscriber>>>,
}

impl PurgeBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribers are called in the order they were added.
    pub fn subscribe(&self, subscriber: Arc<dyn PurgeSubscriber>) {
        write(&self.subscribers, SOURCE, "subscribe").push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        read(&self.subscribers, SOURCE, "subscriber_count").len()
    }

    /// Deliver a purge to every subscriber. A failing subscriber is logged
    /// and counted; the remaining subscribers still run.
    pub fn emit(&self, node: &NodeId, keys: &KeySet) -> EmitReport {
        // Snapshot so a subscriber may register others without deadlocking.
        let subscribers = read(&self.subscribers, SOURCE, "emit").clone();
        let mut report = EmitReport {
            node: node.clone(),
            keys: keys.len(),
            delivered: 0,
            failed: Vec::new(),
            retained: KeySet::new(),
        };

        for subscriber in subscribers {
            match subscriber.purge_nodes(node, keys) {
                Ok(()) => {
                    report.delivered += 1;
                    debug!(
                        subscriber = subscriber.name(),
                        node = %node,
                        keys = keys.len(),
                        "Purge delivered"
                    );
                }
                Err(error) => {
                    counter!(PURGE_FAILURES, "subscriber" => subscriber.name().to_string())
                        .increment(1);
                    warn!(
                        subscriber = subscriber.name(),
                        node = %node,
                        error = %error,
                        "Purge subscriber failed"
                    );
                    if let PurgeError::Partial { failed, .. } = &error {
                        report.retained.extend(failed.iter().cloned());
                    }
                    report.failed.push(subscriber.name().to_string());
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::super::keys::CacheKey;
    use super::*;

    fn keys(raw: &[&str]) -> KeySet {
        raw.iter().map(|k| CacheKey::new(*k)).collect()
    }

    #[test]
    fn emits_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let broadcaster = PurgeBroadcaster::new();

        for name in ["first", "second"] {
            let calls = Arc::clone(&calls);
            broadcaster.subscribe(Arc::new(FnSubscriber::new(name, move |node: &NodeId, _: &KeySet| {
                calls.lock().expect("calls").push(format!("{name}:{node}"));
                Ok(())
            })));
        }

        let report = broadcaster.emit(&NodeId::post(1), &keys(&["a", "b"]));

        assert!(report.is_clean());
        assert_eq!(report.delivered, 2);
        assert_eq!(report.keys, 2);
        assert_eq!(
            *calls.lock().expect("calls"),
            vec!["first:post:post:1", "second:post:post:1"]
        );
    }

    #[test]
    fn failure_does_not_stop_later_subscribers() {
        let reached = Arc::new(Mutex::new(false));
        let broadcaster = PurgeBroadcaster::new();

        broadcaster.subscribe(Arc::new(FnSubscriber::new("broken", |_: &NodeId, _: &KeySet| {
            Err(PurgeError::subscriber("backend down"))
        })));
        let flag = Arc::clone(&reached);
        broadcaster.subscribe(Arc::new(FnSubscriber::new("healthy", move |_: &NodeId, _: &KeySet| {
            *flag.lock().expect("flag") = true;
            Ok(())
        })));

        let report = broadcaster.emit(&NodeId::list("post"), &keys(&["a"]));

        assert_eq!(report.failed, vec!["broken".to_string()]);
        assert_eq!(report.delivered, 1);
        assert!(*reached.lock().expect("flag"));
    }

    #[test]
    fn partial_purges_report_retained_keys() {
        let broadcaster = PurgeBroadcaster::new();
        broadcaster.subscribe(Arc::new(FnSubscriber::new("store", |_: &NodeId, keys: &KeySet| {
            Err(PurgeError::Partial {
                attempted: keys.len(),
                failed: keys.iter().filter(|k| k.as_str() == "b").cloned().collect(),
            })
        })));
        broadcaster.subscribe(Arc::new(FnSubscriber::new("edge", |_: &NodeId, _: &KeySet| {
            Err(PurgeError::subscriber("edge down"))
        })));

        let report = broadcaster.emit(&NodeId::post(1), &keys(&["a", "b"]));

        assert_eq!(report.failed, vec!["store".to_string(), "edge".to_string()]);
        assert_eq!(report.retained, keys(&["b"]));
    }

    #[test]
    fn emit_without_subscribers_is_a_no_op() {
        let broadcaster = PurgeBroadcaster::new();
        let report = broadcaster.emit(&NodeId::user(1), &keys(&["a"]));
        assert_eq!(report.delivered, 0);
        assert!(report.is_clean());
    }
}
