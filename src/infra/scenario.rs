//! Scenario files for offline replay of cache traffic and mutations.
//!
//! ```json
//! {
//!   "documents": {"abc": "{ posts { id } }"},
//!   "requests": [
//!     {"query_id": "abc", "response": {"data": {}}, "nodes": ["list:post"]}
//!   ],
//!   "events": [
//!     {"type": "post_transition", "old_status": "draft", "new_status": "publish",
//!      "post": {"id": 1, "post_type": "post", "status": "publish"}}
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{
    CacheEngine, CacheKey, InvalidationReport, MutationEvent, NodeId, QueryRequest, StoreOutcome,
};

use super::error::InfraError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Persisted query id → document.
    pub documents: HashMap<String, String>,
    pub requests: Vec<ScenarioRequest>,
    pub events: Vec<MutationEvent>,
}

/// A request, the response its execution produced and the nodes it touched.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioRequest {
    #[serde(flatten)]
    pub request: QueryRequest,
    pub response: Value,
    #[serde(default)]
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub requests: usize,
    pub stored: usize,
    pub events: usize,
    pub purged_keys: usize,
    /// Request keys still served from cache after all events.
    pub cached: Vec<CacheKey>,
}

pub async fn load(path: &Path) -> Result<Scenario, InfraError> {
    let raw = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&raw).map_err(|err| InfraError::scenario(path.display().to_string(), err))
}

/// Store every scenario request, then dispatch every event in order.
pub fn replay(engine: &CacheEngine, scenario: &Scenario) -> (Vec<InvalidationReport>, ReplaySummary) {
    let results = engine.results();

    let mut stored = 0;
    for entry in &scenario.requests {
        let outcome = results.store(&entry.request, &entry.response, entry.nodes.iter().cloned());
        if matches!(outcome, StoreOutcome::Stored(_)) {
            stored += 1;
        }
        debug!(outcome = ?outcome, "Scenario request stored");
    }

    let reports: Vec<InvalidationReport> = scenario
        .events
        .iter()
        .map(|event| engine.dispatch(event))
        .collect();

    let mut cached: Vec<CacheKey> = scenario
        .requests
        .iter()
        .filter(|entry| results.lookup(&entry.request).is_hit())
        .filter_map(|entry| results.key_for(&entry.request).ok())
        .collect();
    cached.sort();
    cached.dedup();

    let summary = ReplaySummary {
        requests: scenario.requests.len(),
        stored,
        events: reports.len(),
        purged_keys: reports
            .iter()
            .flat_map(|report| &report.purges)
            .map(|purge| purge.keys.len())
            .sum(),
        cached,
    };
    info!(
        requests = summary.requests,
        stored = summary.stored,
        events = summary.events,
        purged_keys = summary.purged_keys,
        "Scenario replayed"
    );

    (reports, summary)
}
