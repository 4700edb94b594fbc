//! Deletion of raw records that are durably summarized.
//!
//! A basic summary's window is cleaned only when:
//! - the window ended at or before the retention horizon (`now - raw_retention`);
//! - the live count of matching raw records equals the summary's recorded
//!   source count (0 means the window was already cleaned);
//! - each raw record is itself tagged with that summary's id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ConsolidationConfig;
use crate::consolidation::{self, conversations, traces};
use crate::error::ConsolidationResult;
use crate::graph::{decode_node, ConsolidationLevel, NodeType, SummaryKind};
use crate::period::TimeRange;
use crate::store::{GraphStore, MemoryQuery};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub summaries_checked: usize,
    pub raw_nodes_deleted: usize,
    pub delete_failures: usize,
    pub correlations_deleted: usize,
    /// Windows left alone because the live count did not match the summary.
    pub cleanup_skipped: usize,
    /// Mismatches seen for the first time this pass (logged at warn level).
    pub mismatches_reported: usize,
}

pub struct RetentionManager {
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    raw_retention: chrono::Duration,
    /// Summaries whose count mismatch was already warned about.
    reported_mismatches: Mutex<HashSet<String>>,
}

struct Candidate {
    kind: SummaryKind,
    id: String,
    range: TimeRange,
    source_count: usize,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn GraphStore>, clock: Arc<dyn Clock>, config: &ConsolidationConfig) -> Self {
        Self {
            store,
            clock,
            raw_retention: config.raw_retention(),
            reported_mismatches: Mutex::new(HashSet::new()),
        }
    }

    pub fn horizon(&self) -> DateTime<Utc> {
        self.clock.now() - self.raw_retention
    }

    pub async fn run(&self) -> ConsolidationResult<RetentionReport> {
        let horizon = self.horizon();
        let mut report = RetentionReport::default();

        for kind in SummaryKind::ALL {
            for candidate in self.candidates(kind, horizon).await? {
                report.summaries_checked += 1;
                self.clean_window(&candidate, horizon, &mut report).await?;
            }
        }

        if report.raw_nodes_deleted > 0 || report.correlations_deleted > 0 {
            info!(
                "Retention: deleted {} raw nodes and {} correlations ({} failures, {} windows skipped)",
                report.raw_nodes_deleted,
                report.correlations_deleted,
                report.delete_failures,
                report.cleanup_skipped
            );
        }
        Ok(report)
    }

    async fn candidates(&self, kind: SummaryKind, horizon: DateTime<Utc>) -> ConsolidationResult<Vec<Candidate>> {
        let nodes = self
            .store
            .recall(&MemoryQuery::by_type(kind.node_type()))
            .await?;
        let mut out = Vec::new();
        for node in nodes {
            let typed = decode_node(&node);
            let (Some(decoded_kind), Some(header), Some(source_count)) =
                (typed.kind(), typed.header(), typed.source_count())
            else {
                debug!("Summary {} does not decode, not a cleanup candidate", node.id);
                continue;
            };
            if decoded_kind != kind
                || header.consolidation_level != ConsolidationLevel::Basic
                || header.period_end > horizon
            {
                continue;
            }
            out.push(Candidate {
                kind,
                id: header.id.clone(),
                range: TimeRange::new(header.period_start, header.period_end),
                source_count,
            });
        }
        Ok(out)
    }

    async fn clean_window(
        &self,
        candidate: &Candidate,
        horizon: DateTime<Utc>,
        report: &mut RetentionReport,
    ) -> ConsolidationResult<()> {
        let store = self.store.as_ref();
        let live = consolidation::count_sources(store, candidate.kind, &candidate.range).await?;
        if live == 0 {
            return Ok(());
        }
        if live != candidate.source_count {
            if self.first_mismatch(&candidate.id) {
                warn!(
                    "Count mismatch for {}: summary recorded {} records, found {}; not deleting",
                    candidate.id, candidate.source_count, live
                );
                report.mismatches_reported += 1;
            } else {
                debug!(
                    "Count mismatch for {} persists ({} vs {})",
                    candidate.id, candidate.source_count, live
                );
            }
            report.cleanup_skipped += 1;
            return Ok(());
        }

        match candidate.kind {
            SummaryKind::Metrics => {
                self.forget_raw_nodes(&NodeType::TsdbData, candidate, horizon, report)
                    .await?
            }
            SummaryKind::Audit => {
                self.forget_raw_nodes(&NodeType::AuditEntry, candidate, horizon, report)
                    .await?
            }
            SummaryKind::Conversations | SummaryKind::Traces => {
                let types = if candidate.kind == SummaryKind::Conversations {
                    &conversations::SOURCE_TYPES
                } else {
                    &traces::SOURCE_TYPES
                };
                let range = TimeRange::new(candidate.range.start, candidate.range.end.min(horizon));
                let deleted = store.delete_consolidated_correlations(types, &range).await?;
                debug!("Deleted {} correlations covered by {}", deleted, candidate.id);
                report.correlations_deleted += deleted;
            }
        }
        Ok(())
    }

    fn first_mismatch(&self, summary_id: &str) -> bool {
        match self.reported_mismatches.lock() {
            Ok(mut seen) => seen.insert(summary_id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(summary_id.to_string()),
        }
    }

    /// Delete the nodes in the candidate's window that were tagged by that
    /// summary. Untagged or foreign-tagged nodes are kept.
    async fn forget_raw_nodes(
        &self,
        node_type: &NodeType,
        candidate: &Candidate,
        horizon: DateTime<Utc>,
        report: &mut RetentionReport,
    ) -> ConsolidationResult<()> {
        let nodes = self.store.nodes_in_range(node_type, &candidate.range).await?;
        for node in nodes.iter().filter(|n| {
            n.is_consolidated()
                && n.attr_str("summary_id") == Some(candidate.id.as_str())
                && n.event_time() < horizon
        }) {
            let result = self.store.forget(node).await;
            if result.is_ok() {
                report.raw_nodes_deleted += 1;
            } else {
                warn!(
                    "Failed to delete {} {}: {}",
                    node_type,
                    node.id,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                report.delete_failures += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::consolidation::PeriodConsolidator;
    use crate::graph::raw::datapoint_node;
    use crate::graph::{Attributes, GraphNode, GraphScope};
    use crate::period::Period;
    use serde_json::Value;
    use crate::store::InMemoryGraphStore;
    use chrono::{Duration, TimeZone};

    fn period() -> Period {
        Period::containing(Utc.with_ymd_and_hms(2025, 7, 14, 0, 0, 0).unwrap())
    }

    async fn setup(now: DateTime<Utc>) -> (Arc<InMemoryGraphStore>, Arc<ManualClock>, RetentionManager) {
        let store = Arc::new(InMemoryGraphStore::new());
        for i in 0..4 {
            let node = datapoint_node(
                format!("dp-{}", i),
                "cpu.load",
                1.0,
                period().start + Duration::minutes(i * 10),
                &[],
                "test",
            );
            assert!(store.memorize(&node).await.is_ok());
        }
        let clock = Arc::new(ManualClock::new(now));
        let config = ConsolidationConfig::default();
        PeriodConsolidator::new(store.clone(), clock.clone(), &config)
            .consolidate(&period())
            .await;
        let retention = RetentionManager::new(store.clone(), clock.clone(), &config);
        (store, clock, retention)
    }

    #[tokio::test]
    async fn test_young_records_are_never_deleted() {
        let (store, _clock, retention) = setup(period().end + Duration::hours(2)).await;
        assert!(store.get_node("dp-0").unwrap().is_consolidated());

        let report = retention.run().await.unwrap();
        assert_eq!(report.raw_nodes_deleted, 0);
        assert!(store.get_node("dp-0").is_some());
    }

    #[tokio::test]
    async fn test_old_consolidated_records_are_deleted() {
        let (store, clock, retention) = setup(period().end + Duration::hours(1)).await;
        clock.set(period().end + Duration::hours(30));

        let report = retention.run().await.unwrap();
        assert_eq!(report.raw_nodes_deleted, 4);
        assert!(store.get_node("dp-0").is_none());
        assert!(store.get_node("tsdb_summary_20250714_00").is_some());

        let again = retention.run().await.unwrap();
        assert_eq!(again.raw_nodes_deleted, 0);
        assert_eq!(again.cleanup_skipped, 0);
    }

    #[tokio::test]
    async fn test_count_mismatch_blocks_deletion() {
        let (store, clock, retention) = setup(period().end + Duration::hours(1)).await;
        let late = datapoint_node(
            "dp-late",
            "cpu.load",
            1.0,
            period().start + Duration::hours(5),
            &[],
            "test",
        );
        assert!(store.memorize(&late).await.is_ok());
        clock.set(period().end + Duration::hours(30));

        let report = retention.run().await.unwrap();
        assert_eq!(report.cleanup_skipped, 1);
        assert_eq!(report.mismatches_reported, 1);
        assert_eq!(report.raw_nodes_deleted, 0);
        assert!(store.get_node("dp-0").is_some());

        let again = retention.run().await.unwrap();
        assert_eq!(again.cleanup_skipped, 1);
        assert_eq!(again.mismatches_reported, 0);
    }

    #[tokio::test]
    async fn test_only_folded_datapoints_are_deleted() {
        let store = Arc::new(InMemoryGraphStore::new());
        let at = period().start + Duration::minutes(5);
        let valid = datapoint_node("dp-ok", "cpu.load", 1.0, at, &[], "test");
        assert!(store.memorize(&valid).await.is_ok());

        let mut attrs = Attributes::new();
        attrs.insert("metric_name".into(), Value::String("cpu.load".into()));
        attrs.insert("timestamp".into(), Value::String(at.to_rfc3339()));
        let no_value = GraphNode::new("dp-no-value", NodeType::TsdbData, GraphScope::Local, attrs, "test", at);
        assert!(store.memorize(&no_value).await.is_ok());

        let mut other_scope = datapoint_node("dp-identity", "cpu.load", 2.0, at, &[], "test");
        other_scope.scope = GraphScope::Identity;
        assert!(store.memorize(&other_scope).await.is_ok());

        let clock = Arc::new(ManualClock::new(period().end + Duration::hours(1)));
        let config = ConsolidationConfig::default();
        PeriodConsolidator::new(store.clone(), clock.clone(), &config)
            .consolidate(&period())
            .await;
        assert!(store.get_node("dp-ok").unwrap().is_consolidated());
        assert!(!store.get_node("dp-no-value").unwrap().is_consolidated());
        assert!(!store.get_node("dp-identity").unwrap().is_consolidated());

        clock.set(period().end + Duration::hours(30));
        let retention = RetentionManager::new(store.clone(), clock, &config);
        let report = retention.run().await.unwrap();
        assert_eq!(report.raw_nodes_deleted, 1);
        assert_eq!(report.cleanup_skipped, 0);
        assert!(store.get_node("dp-ok").is_none());
        assert!(store.get_node("dp-no-value").is_some());
        assert!(store.get_node("dp-identity").is_some());
    }
}
