//! Per-request node collector.
//!
//! Resolvers call [`record`] for every node their output depends on. The
//! result cache wraps request execution in [`with_collector`] and links the
//! collected nodes to the response key once the request completes.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::future::Future;

use super::nodes::NodeId;

tokio::task_local! {
    static DEPS: RefCell<BTreeSet<NodeId>>;
}

/// Record a node dependency for the current request.
///
/// Outside a collector scope the call is ignored.
pub fn record(node: NodeId) {
    let _ = DEPS.try_with(|deps| {
        deps.borrow_mut().insert(node);
    });
}

/// Record several node dependencies at once.
pub fn record_all<I>(nodes: I)
where
    I: IntoIterator<Item = NodeId>,
{
    let _ = DEPS.try_with(|deps| {
        deps.borrow_mut().extend(nodes);
    });
}

/// Nodes recorded so far in the current scope; empty outside a scope.
pub fn snapshot() -> BTreeSet<NodeId> {
    DEPS.try_with(|deps| deps.borrow().clone())
        .unwrap_or_default()
}

/// Run `f` with a fresh collector and return its output alongside every
/// node recorded while it ran.
pub async fn with_collector<F, R>(f: F) -> (R, BTreeSet<NodeId>)
where
    F: Future<Output = R>,
{
    DEPS.scope(RefCell::new(BTreeSet::new()), async {
        let result = f.await;
        let collected = DEPS
            .try_with(|deps| deps.take())
            .unwrap_or_default();
        (result, collected)
    })
    .await
}
