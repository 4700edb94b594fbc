//! Relationship edges between summaries.
//!
//! Three families per window:
//! - `TEMPORAL_CORRELATION` between every pair of summaries of the same window,
//!   directed in kind order (metrics, conversations, traces, audit);
//! - semantic cross-type edges where both endpoints exist;
//! - one `TEMPORAL_SEQUENCE` edge from the previous window's same-kind summary.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::ConsolidationResult;
use crate::graph::{GraphEdge, SummaryKind};
use crate::period::Period;
use crate::store::{GraphStore, MemoryQuery};

pub const TEMPORAL_CORRELATION: &str = "TEMPORAL_CORRELATION";
pub const TEMPORAL_SEQUENCE: &str = "TEMPORAL_SEQUENCE";
pub const SUMMARIZES: &str = "SUMMARIZES";

/// `(from, to, relationship, weight)`
pub const CROSS_TYPE_EDGES: [(SummaryKind, SummaryKind, &str, f64); 5] = [
    (SummaryKind::Conversations, SummaryKind::Traces, "DRIVES_PROCESSING", 0.9),
    (SummaryKind::Traces, SummaryKind::Metrics, "GENERATES_METRICS", 0.8),
    (SummaryKind::Metrics, SummaryKind::Conversations, "IMPACTS_QUALITY", 0.7),
    (SummaryKind::Audit, SummaryKind::Traces, "SECURES_EXECUTION", 0.9),
    (SummaryKind::Traces, SummaryKind::Audit, "CREATES_AUDIT_TRAIL", 0.8),
];

pub struct EdgeBuilder {
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
}

impl EdgeBuilder {
    pub fn new(store: Arc<dyn GraphStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Link the summaries present for `period`. Returns the number of new edges.
    pub async fn link_period(
        &self,
        period: &Period,
        summaries: &BTreeMap<SummaryKind, String>,
    ) -> ConsolidationResult<usize> {
        let mut created = 0;
        let label = period.label();

        let ordered: Vec<(&SummaryKind, &String)> = summaries.iter().collect();
        for (i, (_, a)) in ordered.iter().enumerate() {
            for (_, b) in ordered.iter().skip(i + 1) {
                created += self
                    .add(a, b, TEMPORAL_CORRELATION, 1.0, format!("Same period: {}", label))
                    .await?;
            }
        }

        for (from, to, relationship, weight) in CROSS_TYPE_EDGES {
            if let (Some(a), Some(b)) = (summaries.get(&from), summaries.get(&to)) {
                created += self
                    .add(a, b, relationship, weight, format!("{} -> {} in {}", from, to, label))
                    .await?;
            }
        }

        let previous = period.previous();
        for (kind, id) in summaries {
            let prev_id = kind.basic_id(&previous);
            created += self.link_sequence(*kind, &prev_id, id).await?;
        }

        debug!("Created {} edges for {}", created, label);
        Ok(created)
    }

    /// `prev_id -> id` if a `kind` summary with `prev_id` exists.
    pub async fn link_sequence(&self, kind: SummaryKind, prev_id: &str, id: &str) -> ConsolidationResult<usize> {
        let prev = self.store.recall(&MemoryQuery::by_id(prev_id)).await?;
        if !prev.iter().any(|n| n.node_type == kind.node_type()) {
            return Ok(0);
        }
        self.add(prev_id, id, TEMPORAL_SEQUENCE, 1.0, format!("Next {} period", kind))
            .await
    }

    /// `daily_id -> part_id` for a daily rollup and one of its basic parts.
    pub async fn link_summarizes(&self, daily_id: &str, part_id: &str) -> ConsolidationResult<usize> {
        self.add(daily_id, part_id, SUMMARIZES, 1.0, "Daily rollup".to_string())
            .await
    }

    async fn add(
        &self,
        source: &str,
        target: &str,
        relationship: &str,
        weight: f64,
        context: String,
    ) -> ConsolidationResult<usize> {
        let edge = GraphEdge::new(
            source,
            target,
            relationship,
            weight,
            self.clock.now(),
            Some(context),
        );
        match self.store.add_edge(&edge).await {
            Ok(true) => Ok(1),
            Ok(false) => Ok(0),
            Err(e) => {
                warn!(
                    "Failed to create {} edge {} -> {}: {}",
                    relationship, source, target, e
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::graph::{GraphNode, GraphScope, NodeType};
    use crate::store::InMemoryGraphStore;
    use chrono::{TimeZone, Utc};

    fn period() -> Period {
        Period::containing(Utc.with_ymd_and_hms(2025, 7, 14, 12, 0, 0).unwrap())
    }

    fn builder(store: Arc<InMemoryGraphStore>) -> EdgeBuilder {
        EdgeBuilder::new(store, Arc::new(ManualClock::new(period().end)))
    }

    fn ids(kinds: &[SummaryKind], period: &Period) -> BTreeMap<SummaryKind, String> {
        kinds.iter().map(|k| (*k, k.basic_id(period))).collect()
    }

    #[tokio::test]
    async fn test_three_summaries_yield_three_same_period_edges() {
        let store = Arc::new(InMemoryGraphStore::new());
        let edges = builder(store.clone());
        let summaries = ids(
            &[SummaryKind::Metrics, SummaryKind::Conversations, SummaryKind::Traces],
            &period(),
        );

        let created = edges.link_period(&period(), &summaries).await.unwrap();
        let all = store.all_edges();
        let same_period = all
            .iter()
            .filter(|e| e.relationship == TEMPORAL_CORRELATION)
            .count();
        assert_eq!(same_period, 3);
        // conversations->traces, traces->metrics, metrics->conversations
        let cross: Vec<&str> = all
            .iter()
            .filter(|e| e.relationship != TEMPORAL_CORRELATION)
            .map(|e| e.relationship.as_str())
            .collect();
        assert_eq!(cross.len(), 3);
        assert!(cross.contains(&"DRIVES_PROCESSING"));
        assert!(!cross.contains(&"SECURES_EXECUTION"));
        assert_eq!(created, 6);

        assert_eq!(edges.link_period(&period(), &summaries).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sequence_edge_only_when_previous_exists() {
        let store = Arc::new(InMemoryGraphStore::new());
        let edges = builder(store.clone());
        let prev_id = SummaryKind::Metrics.basic_id(&period().previous());
        let prev = GraphNode::new(
            prev_id.clone(),
            NodeType::TsdbSummary,
            GraphScope::Local,
            Default::default(),
            "test",
            period().start,
        );
        assert!(store.memorize(&prev).await.is_ok());

        let summaries = ids(&[SummaryKind::Metrics, SummaryKind::Audit], &period());
        edges.link_period(&period(), &summaries).await.unwrap();
        edges.link_period(&period(), &summaries).await.unwrap();

        let sequence: Vec<_> = store
            .all_edges()
            .into_iter()
            .filter(|e| e.relationship == TEMPORAL_SEQUENCE)
            .collect();
        assert_eq!(sequence.len(), 1);
        assert_eq!(sequence[0].source, prev_id);
        assert_eq!(sequence[0].target, SummaryKind::Metrics.basic_id(&period()));
    }
}
