//! In-memory [`GraphStore`] backend.
//!
//! Keeps everything behind a single `Mutex`. Besides serving tests, it can
//! inject write failures per node type so partial-failure paths are testable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::{datapoint_from_node, GraphStore, MemoryOpResult, MemoryQuery, RAW_CORRELATION_TYPES};
use crate::error::{StoreError, StoreResult};
use crate::graph::{
    CorrelationType, DataPoint, GraphEdge, GraphNode, GraphScope, NodeType, ServiceCorrelation,
};
use crate::period::TimeRange;

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    correlations: Vec<ServiceCorrelation>,
    failing_types: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    inner: Mutex<Inner>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Append a row to the correlation log.
    pub fn insert_correlation(&self, correlation: &ServiceCorrelation) -> StoreResult<()> {
        self.lock()?.correlations.push(correlation.clone());
        Ok(())
    }

    /// Make every subsequent `memorize` of `node_type` fail.
    pub fn fail_writes_for(&self, node_type: NodeType) -> StoreResult<()> {
        self.lock()?.failing_types.insert(node_type.as_str().to_string());
        Ok(())
    }

    pub fn clear_write_failures(&self) -> StoreResult<()> {
        self.lock()?.failing_types.clear();
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.lock().map(|g| g.nodes.len()).unwrap_or(0)
    }

    pub fn get_node(&self, id: &str) -> Option<GraphNode> {
        self.lock().ok().and_then(|g| g.nodes.get(id).cloned())
    }

    pub fn all_edges(&self) -> Vec<GraphEdge> {
        self.lock().map(|g| g.edges.clone()).unwrap_or_default()
    }

    pub fn all_correlations(&self) -> Vec<ServiceCorrelation> {
        self.lock().map(|g| g.correlations.clone()).unwrap_or_default()
    }
}

fn type_matches(types: &[CorrelationType], c: &ServiceCorrelation) -> bool {
    types.contains(&c.correlation_type)
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn recall(&self, query: &MemoryQuery) -> StoreResult<Vec<GraphNode>> {
        let guard = self.lock()?;
        let mut out: Vec<GraphNode> = guard
            .nodes
            .values()
            .filter(|n| query.matches(n))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn recall_timeseries(
        &self,
        scope: GraphScope,
        range: &TimeRange,
        correlation_types: &[CorrelationType],
    ) -> StoreResult<Vec<DataPoint>> {
        let guard = self.lock()?;
        let mut points = Vec::new();
        for node in guard.nodes.values() {
            if node.node_type != NodeType::TsdbData
                || node.scope != scope
                || !range.contains(node.event_time())
            {
                continue;
            }
            match datapoint_from_node(node) {
                Some(p) if correlation_types.contains(&p.correlation_type) => points.push(p),
                Some(_) => {}
                None => warn!("Skipping malformed tsdb_data node {}", node.id),
            }
        }
        points.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(points)
    }

    async fn memorize(&self, node: &GraphNode) -> MemoryOpResult {
        let mut guard = match self.lock() {
            Ok(g) => g,
            Err(e) => return MemoryOpResult::failed(e.to_string()),
        };
        if guard.failing_types.contains(node.node_type.as_str()) {
            return MemoryOpResult::failed(format!("injected failure for {}", node.node_type));
        }
        guard.nodes.insert(node.id.clone(), node.clone());
        MemoryOpResult::ok()
    }

    async fn forget(&self, node: &GraphNode) -> MemoryOpResult {
        let mut guard = match self.lock() {
            Ok(g) => g,
            Err(e) => return MemoryOpResult::failed(e.to_string()),
        };
        match guard.nodes.remove(&node.id) {
            Some(_) => {
                guard
                    .edges
                    .retain(|e| e.source != node.id && e.target != node.id);
                MemoryOpResult::ok()
            }
            None => MemoryOpResult::failed(format!("node {} not found", node.id)),
        }
    }

    async fn nodes_in_range(
        &self,
        node_type: &NodeType,
        range: &TimeRange,
    ) -> StoreResult<Vec<GraphNode>> {
        let guard = self.lock()?;
        let mut out: Vec<GraphNode> = guard
            .nodes
            .values()
            .filter(|n| &n.node_type == node_type && range.contains(n.event_time()))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.event_time().cmp(&b.event_time()).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn mark_nodes_consolidated(
        &self,
        node_ids: &[String],
        summary_id: &str,
    ) -> StoreResult<usize> {
        let mut guard = self.lock()?;
        let mut tagged = 0;
        for id in node_ids {
            let Some(node) = guard.nodes.get_mut(id) else {
                continue;
            };
            if node.is_consolidated() {
                continue;
            }
            node.attributes
                .insert("consolidated".to_string(), Value::Bool(true));
            node.attributes.insert(
                "summary_id".to_string(),
                Value::String(summary_id.to_string()),
            );
            tagged += 1;
        }
        Ok(tagged)
    }

    async fn add_edge(&self, edge: &GraphEdge) -> StoreResult<bool> {
        let mut guard = self.lock()?;
        let exists = guard.edges.iter().any(|e| {
            e.source == edge.source && e.target == edge.target && e.relationship == edge.relationship
        });
        if exists {
            return Ok(false);
        }
        guard.edges.push(edge.clone());
        Ok(true)
    }

    async fn edges_for(&self, node_id: &str) -> StoreResult<Vec<GraphEdge>> {
        let guard = self.lock()?;
        Ok(guard
            .edges
            .iter()
            .filter(|e| e.source == node_id || e.target == node_id)
            .cloned()
            .collect())
    }

    async fn correlations(
        &self,
        types: &[CorrelationType],
        range: &TimeRange,
    ) -> StoreResult<Vec<ServiceCorrelation>> {
        let guard = self.lock()?;
        let mut out: Vec<ServiceCorrelation> = guard
            .correlations
            .iter()
            .filter(|c| type_matches(types, c) && range.contains(c.timestamp))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(out)
    }

    async fn count_correlations(
        &self,
        types: &[CorrelationType],
        range: &TimeRange,
    ) -> StoreResult<usize> {
        let guard = self.lock()?;
        Ok(guard
            .correlations
            .iter()
            .filter(|c| type_matches(types, c) && range.contains(c.timestamp))
            .count())
    }

    async fn tag_correlations(
        &self,
        types: &[CorrelationType],
        range: &TimeRange,
        summary_id: &str,
    ) -> StoreResult<usize> {
        let mut guard = self.lock()?;
        let mut tagged = 0;
        for c in guard.correlations.iter_mut() {
            if type_matches(types, c) && range.contains(c.timestamp) && !c.consolidated {
                c.consolidated = true;
                c.summary_id = Some(summary_id.to_string());
                tagged += 1;
            }
        }
        Ok(tagged)
    }

    async fn delete_consolidated_correlations(
        &self,
        types: &[CorrelationType],
        range: &TimeRange,
    ) -> StoreResult<usize> {
        let mut guard = self.lock()?;
        let before = guard.correlations.len();
        guard
            .correlations
            .retain(|c| !(type_matches(types, c) && range.contains(c.timestamp) && c.consolidated));
        Ok(before - guard.correlations.len())
    }

    async fn earliest_unconsolidated(&self, since: DateTime<Utc>) -> StoreResult<Option<DateTime<Utc>>> {
        let guard = self.lock()?;
        let raw_types = NodeType::raw_types();
        let from_nodes = guard
            .nodes
            .values()
            .filter(|n| raw_types.contains(&n.node_type) && !n.is_consolidated() && n.event_time() >= since)
            .map(|n| n.event_time())
            .min();
        let from_correlations = guard
            .correlations
            .iter()
            .filter(|c| type_matches(&RAW_CORRELATION_TYPES, c) && !c.consolidated && c.timestamp >= since)
            .map(|c| c.timestamp)
            .min();
        Ok(match (from_nodes, from_correlations) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::raw;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_memorize_recall_forget() {
        let store = InMemoryGraphStore::new();
        let node = raw::datapoint_node("dp-1", "llm.tokens.total", 42.0, t0(), &[], "test");
        assert!(store.memorize(&node).await.is_ok());

        let found = store.recall(&MemoryQuery::by_id("dp-1")).await.unwrap();
        assert_eq!(found.len(), 1);

        assert!(store.forget(&node).await.is_ok());
        assert!(!store.forget(&node).await.is_ok());
        assert!(store.recall(&MemoryQuery::by_id("dp-1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = InMemoryGraphStore::new();
        store.fail_writes_for(NodeType::TsdbData).unwrap();
        let node = raw::datapoint_node("dp-1", "m", 1.0, t0(), &[], "test");
        let res = store.memorize(&node).await;
        assert!(!res.is_ok());
        assert!(res.error.is_some());
    }

    #[tokio::test]
    async fn test_timeseries_range_is_half_open() {
        let store = InMemoryGraphStore::new();
        for (i, h) in [0i64, 3, 6].iter().enumerate() {
            let node = raw::datapoint_node(
                format!("dp-{}", i),
                "m",
                1.0,
                t0() + Duration::hours(*h),
                &[],
                "test",
            );
            store.memorize(&node).await;
        }
        let range = TimeRange::new(t0(), t0() + Duration::hours(6));
        let points = store
            .recall_timeseries(GraphScope::Local, &range, &[CorrelationType::MetricDatapoint])
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
    }

    #[tokio::test]
    async fn test_correlation_tag_and_delete() {
        let store = InMemoryGraphStore::new();
        let range = TimeRange::new(t0(), t0() + Duration::hours(6));
        store
            .insert_correlation(&ServiceCorrelation::new(
                "c1",
                CorrelationType::ServiceInteraction,
                t0() + Duration::hours(1),
            ))
            .unwrap();
        store
            .insert_correlation(&ServiceCorrelation::new(
                "c2",
                CorrelationType::ServiceInteraction,
                t0() + Duration::hours(7),
            ))
            .unwrap();

        let types = [CorrelationType::ServiceInteraction];
        assert_eq!(store.earliest_unconsolidated(t0()).await.unwrap(), Some(t0() + Duration::hours(1)));
        assert_eq!(
            store.earliest_unconsolidated(t0() + Duration::hours(2)).await.unwrap(),
            Some(t0() + Duration::hours(7))
        );
        assert_eq!(store.tag_correlations(&types, &range, "s1").await.unwrap(), 1);
        assert_eq!(store.tag_correlations(&types, &range, "s1").await.unwrap(), 0);
        assert_eq!(store.earliest_unconsolidated(t0()).await.unwrap(), Some(t0() + Duration::hours(7)));

        assert_eq!(store.delete_consolidated_correlations(&types, &range).await.unwrap(), 1);
        assert_eq!(store.all_correlations().len(), 1);
    }

    #[tokio::test]
    async fn test_add_edge_is_idempotent() {
        let store = InMemoryGraphStore::new();
        let edge = GraphEdge::new("a", "b", "TEMPORAL_SEQUENCE", 1.0, t0(), None);
        assert!(store.add_edge(&edge).await.unwrap());
        assert!(!store.add_edge(&edge).await.unwrap());
        assert_eq!(store.edges_for("b").await.unwrap().len(), 1);
    }
}
