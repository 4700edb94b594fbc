//! Boundary contract with the persistent graph store.
//!
//! The consolidation pipeline only talks to storage through [`GraphStore`].
//! Two backends ship with the crate: an in-memory one for tests and
//! embedding, and a SQLite one for the standalone service.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryGraphStore;
pub use sqlite::SqliteGraphStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::graph::{
    CorrelationType, DataPoint, GraphEdge, GraphNode, GraphScope, NodeType, ServiceCorrelation,
};
use crate::period::TimeRange;

/// Query for [`GraphStore::recall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryQuery {
    pub node_id: Option<String>,
    pub node_type: Option<NodeType>,
    pub scope: GraphScope,
    pub include_edges: bool,
    pub depth: u32,
}

impl MemoryQuery {
    pub fn by_id(node_id: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            node_type: None,
            scope: GraphScope::Local,
            include_edges: false,
            depth: 1,
        }
    }

    pub fn by_type(node_type: NodeType) -> Self {
        Self {
            node_id: None,
            node_type: Some(node_type),
            scope: GraphScope::Local,
            include_edges: false,
            depth: 1,
        }
    }

    pub(crate) fn matches(&self, node: &GraphNode) -> bool {
        if node.scope != self.scope {
            return false;
        }
        if let Some(id) = &self.node_id {
            if &node.id != id {
                return false;
            }
        }
        if let Some(t) = &self.node_type {
            if &node.node_type != t {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryOpStatus {
    Ok,
    Failed,
}

/// Result of `memorize` / `forget`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryOpResult {
    pub status: MemoryOpStatus,
    pub error: Option<String>,
}

impl MemoryOpResult {
    pub fn ok() -> Self {
        Self {
            status: MemoryOpStatus::Ok,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: MemoryOpStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == MemoryOpStatus::Ok
    }
}

/// Storage operations consumed by the pipeline.
///
/// Notes:
/// - Implementations must be Send + Sync; the store is shared as `Arc<dyn GraphStore>`.
/// - All ranges are half-open `[start, end)`.
/// - Raw records are only ever tagged (`consolidated`, `summary_id`) or deleted.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn recall(&self, query: &MemoryQuery) -> StoreResult<Vec<GraphNode>>;

    /// Samples from `tsdb_data` nodes whose correlation type is in `correlation_types`.
    async fn recall_timeseries(
        &self,
        scope: GraphScope,
        range: &TimeRange,
        correlation_types: &[CorrelationType],
    ) -> StoreResult<Vec<DataPoint>>;

    /// Upsert a node. The version is persisted as given.
    async fn memorize(&self, node: &GraphNode) -> MemoryOpResult;

    async fn forget(&self, node: &GraphNode) -> MemoryOpResult;

    /// Nodes of `node_type` whose `event_time()` falls in `range`.
    async fn nodes_in_range(
        &self,
        node_type: &NodeType,
        range: &TimeRange,
    ) -> StoreResult<Vec<GraphNode>>;

    /// Tag the listed nodes that are not tagged yet; returns nodes tagged.
    /// Ids that no longer exist are ignored.
    async fn mark_nodes_consolidated(
        &self,
        node_ids: &[String],
        summary_id: &str,
    ) -> StoreResult<usize>;

    /// Returns `false` when an identical `(source, target, relationship)` edge exists.
    async fn add_edge(&self, edge: &GraphEdge) -> StoreResult<bool>;

    async fn edges_for(&self, node_id: &str) -> StoreResult<Vec<GraphEdge>>;

    async fn correlations(
        &self,
        types: &[CorrelationType],
        range: &TimeRange,
    ) -> StoreResult<Vec<ServiceCorrelation>>;

    async fn count_correlations(
        &self,
        types: &[CorrelationType],
        range: &TimeRange,
    ) -> StoreResult<usize>;

    async fn tag_correlations(
        &self,
        types: &[CorrelationType],
        range: &TimeRange,
        summary_id: &str,
    ) -> StoreResult<usize>;

    /// Delete rows in `range` that are already tagged consolidated.
    async fn delete_consolidated_correlations(
        &self,
        types: &[CorrelationType],
        range: &TimeRange,
    ) -> StoreResult<usize>;

    /// Earliest timestamp at or after `since` among untagged raw nodes and
    /// correlations.
    async fn earliest_unconsolidated(&self, since: DateTime<Utc>) -> StoreResult<Option<DateTime<Utc>>>;
}

/// Correlation types folded into summaries and later cleaned up.
pub(crate) const RAW_CORRELATION_TYPES: [CorrelationType; 2] =
    [CorrelationType::ServiceInteraction, CorrelationType::TraceSpan];

pub(crate) fn datapoint_from_node(node: &GraphNode) -> Option<DataPoint> {
    let metric_name = node.attr_str("metric_name")?.to_string();
    let value = node.attr_f64("value")?;
    let correlation_type = node
        .attr_str("correlation_type")
        .and_then(CorrelationType::parse)
        .unwrap_or(CorrelationType::MetricDatapoint);
    let tags = node
        .attributes
        .get("tags")
        .and_then(|v| v.as_object())
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();
    Some(DataPoint {
        node_id: node.id.clone(),
        timestamp: node.event_time(),
        metric_name,
        value,
        correlation_type,
        tags,
    })
}
