//! Basic (6-hour) consolidation of one window into typed summary nodes.
//!
//! The four sub-aggregators are independent: each loads its own raw records,
//! writes exactly one summary, and tags its sources. A failed write only
//! affects that kind; the window is retried whole on the next cycle because
//! the summaries that did land are detected by id and skipped.

pub mod audit;
pub mod conversations;
pub mod metrics;
pub mod traces;

use futures::future::join4;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ConsolidationConfig;
use crate::error::{ConsolidationError, ConsolidationResult};
use crate::graph::{Summary, SummaryKind};
use crate::period::{Day, Period, TimeRange};
use crate::store::{GraphStore, MemoryQuery};

/// What happened to one kind for one window.
#[derive(Debug, Clone, PartialEq)]
pub enum KindOutcome {
    /// A new summary was written and its sources tagged.
    Created { summary_id: String, sources_tagged: usize },
    /// The deterministic id already exists; nothing was done.
    Existing { summary_id: String },
    /// No raw records in the window.
    Empty,
    /// The window's day was already rolled up; its basic summaries were
    /// compressed away and must not be rebuilt.
    Covered { daily_id: String },
    Failed { reason: String },
}

impl KindOutcome {
    pub fn summary_id(&self) -> Option<&str> {
        match self {
            KindOutcome::Created { summary_id, .. } | KindOutcome::Existing { summary_id } => {
                Some(summary_id)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodReport {
    pub period: Period,
    pub outcomes: BTreeMap<SummaryKind, KindOutcome>,
}

impl PeriodReport {
    /// Summaries present for the window after the pass, keyed by kind.
    pub fn summary_ids(&self) -> BTreeMap<SummaryKind, String> {
        self.outcomes
            .iter()
            .filter_map(|(k, o)| o.summary_id().map(|id| (*k, id.to_string())))
            .collect()
    }

    pub fn created(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, KindOutcome::Created { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, KindOutcome::Failed { .. }))
            .count()
    }
}

pub struct PeriodConsolidator {
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    updated_by: String,
}

impl PeriodConsolidator {
    pub fn new(store: Arc<dyn GraphStore>, clock: Arc<dyn Clock>, config: &ConsolidationConfig) -> Self {
        Self {
            store,
            clock,
            updated_by: config.updated_by.clone(),
        }
    }

    /// Consolidate every kind for `period`. Kinds run concurrently; the call
    /// returns once all four have finished.
    pub async fn consolidate(&self, period: &Period) -> PeriodReport {
        let (m, c, t, a) = join4(
            self.run_kind(SummaryKind::Metrics, period),
            self.run_kind(SummaryKind::Conversations, period),
            self.run_kind(SummaryKind::Traces, period),
            self.run_kind(SummaryKind::Audit, period),
        )
        .await;

        let mut outcomes = BTreeMap::new();
        for (kind, result) in [
            (SummaryKind::Metrics, m),
            (SummaryKind::Conversations, c),
            (SummaryKind::Traces, t),
            (SummaryKind::Audit, a),
        ] {
            let outcome = result.unwrap_or_else(|e| {
                warn!("Consolidation of {} for {} failed: {}", kind, period, e);
                KindOutcome::Failed {
                    reason: e.to_string(),
                }
            });
            outcomes.insert(kind, outcome);
        }

        let report = PeriodReport {
            period: *period,
            outcomes,
        };
        info!(
            "Consolidated {} ({}): {} created, {} failed",
            period.label(),
            period,
            report.created(),
            report.failed()
        );
        report
    }

    pub async fn summary_exists(&self, kind: SummaryKind, summary_id: &str) -> ConsolidationResult<bool> {
        let found = self.store.recall(&MemoryQuery::by_id(summary_id)).await?;
        Ok(found.iter().any(|n| n.node_type == kind.node_type()))
    }

    async fn run_kind(&self, kind: SummaryKind, period: &Period) -> ConsolidationResult<KindOutcome> {
        let summary_id = kind.basic_id(period);
        if self.summary_exists(kind, &summary_id).await? {
            debug!("{} already exists, skipping", summary_id);
            return Ok(KindOutcome::Existing { summary_id });
        }
        let daily_id = kind.daily_id(&Day::containing(period.start));
        if self.summary_exists(kind, &daily_id).await? {
            debug!("{} covered by {}, skipping", summary_id, daily_id);
            return Ok(KindOutcome::Covered { daily_id });
        }

        let range = period.range();
        let store = self.store.as_ref();
        let now = self.clock.now();
        match kind {
            SummaryKind::Metrics => {
                let points = metrics::load(store, &range).await?;
                let summary = metrics::summarize(period, &points, now);
                let node_ids: Vec<String> = points.into_iter().map(|p| p.node_id).collect();
                self.persist(summary, &range, &node_ids).await
            }
            SummaryKind::Conversations => {
                let rows = conversations::load(store, &range).await?;
                let summary = conversations::summarize(period, &rows, now);
                self.persist(summary, &range, &[]).await
            }
            SummaryKind::Traces => {
                let rows = traces::load(store, &range).await?;
                let summary = traces::summarize(period, &rows, now);
                self.persist(summary, &range, &[]).await
            }
            SummaryKind::Audit => {
                let nodes = audit::load(store, &range).await?;
                let summary = audit::summarize(period, &nodes, now);
                let node_ids: Vec<String> = nodes.into_iter().map(|n| n.id).collect();
                self.persist(summary, &range, &node_ids).await
            }
        }
    }

    /// Write `summary` and tag its sources. Node-backed kinds tag exactly
    /// `node_ids`; correlation-backed kinds tag by range.
    async fn persist<S: Summary>(
        &self,
        summary: Option<S>,
        range: &TimeRange,
        node_ids: &[String],
    ) -> ConsolidationResult<KindOutcome> {
        let Some(summary) = summary else {
            return Ok(KindOutcome::Empty);
        };
        let summary_id = summary.id().to_string();
        let node = summary.to_node(&self.updated_by)?;
        let result = self.store.memorize(&node).await;
        if !result.is_ok() {
            return Err(ConsolidationError::WriteFailed {
                kind: S::KIND,
                summary_id,
                reason: result.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        let sources_tagged = tag_sources(self.store.as_ref(), S::KIND, range, node_ids, &summary_id).await?;
        debug!(
            "Wrote {} from {} records, tagged {}",
            summary_id,
            summary.source_count(),
            sources_tagged
        );
        Ok(KindOutcome::Created {
            summary_id,
            sources_tagged,
        })
    }
}

/// Tag the raw records a summary of `kind` folded in.
pub(crate) async fn tag_sources(
    store: &dyn GraphStore,
    kind: SummaryKind,
    range: &TimeRange,
    node_ids: &[String],
    summary_id: &str,
) -> ConsolidationResult<usize> {
    let tagged = match kind {
        SummaryKind::Metrics | SummaryKind::Audit => {
            store.mark_nodes_consolidated(node_ids, summary_id).await?
        }
        SummaryKind::Conversations => {
            store
                .tag_correlations(&conversations::SOURCE_TYPES, range, summary_id)
                .await?
        }
        SummaryKind::Traces => {
            store
                .tag_correlations(&traces::SOURCE_TYPES, range, summary_id)
                .await?
        }
    };
    Ok(tagged)
}

/// Live source count for `kind` in `range`, measured the same way the
/// sub-aggregator counted when it wrote the summary.
pub(crate) async fn count_sources(
    store: &dyn GraphStore,
    kind: SummaryKind,
    range: &TimeRange,
) -> ConsolidationResult<usize> {
    match kind {
        SummaryKind::Metrics => metrics::count_sources(store, range).await,
        SummaryKind::Conversations => conversations::count_sources(store, range).await,
        SummaryKind::Traces => traces::count_sources(store, range).await,
        SummaryKind::Audit => audit::count_sources(store, range).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::graph::raw::{audit_entry_node, datapoint_node};
    use crate::graph::{
        Attributes, CorrelationType, GraphNode, GraphScope, NodeType, ServiceCorrelation,
    };
    use crate::store::InMemoryGraphStore;
    use chrono::{Duration, TimeZone, Utc};

    fn period() -> Period {
        Period::containing(Utc.with_ymd_and_hms(2025, 7, 14, 6, 0, 0).unwrap())
    }

    async fn seeded() -> (Arc<InMemoryGraphStore>, PeriodConsolidator) {
        let store = Arc::new(InMemoryGraphStore::new());
        let p = period();
        for i in 0..5 {
            let node = datapoint_node(
                format!("dp-{}", i),
                "cpu.load",
                i as f64,
                p.start + Duration::minutes(i),
                &[],
                "test",
            );
            assert!(store.memorize(&node).await.is_ok());
        }
        let audit = audit_entry_node("ae-1", "login", "alice", "api", p.start + Duration::hours(1), "test");
        assert!(store.memorize(&audit).await.is_ok());
        store
            .insert_correlation(&ServiceCorrelation::new(
                "span-1",
                CorrelationType::TraceSpan,
                p.start + Duration::hours(2),
            ))
            .unwrap();

        let clock = Arc::new(ManualClock::new(p.end + Duration::hours(1)));
        let consolidator =
            PeriodConsolidator::new(store.clone(), clock, &ConsolidationConfig::default());
        (store, consolidator)
    }

    #[tokio::test]
    async fn test_consolidate_writes_one_summary_per_kind_with_data() {
        let (store, consolidator) = seeded().await;
        let report = consolidator.consolidate(&period()).await;

        assert_eq!(report.created(), 3);
        assert_eq!(report.outcomes[&SummaryKind::Conversations], KindOutcome::Empty);
        assert_eq!(
            report.outcomes[&SummaryKind::Metrics],
            KindOutcome::Created {
                summary_id: "tsdb_summary_20250714_06".into(),
                sources_tagged: 5
            }
        );
        assert!(store
            .get_node("dp-0")
            .map(|n| n.is_consolidated())
            .unwrap_or(false));
        assert!(store.all_correlations()[0].consolidated);
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let (store, consolidator) = seeded().await;
        consolidator.consolidate(&period()).await;
        let nodes_after_first = store.node_count();

        let report = consolidator.consolidate(&period()).await;
        assert_eq!(report.created(), 0);
        assert!(matches!(
            report.outcomes[&SummaryKind::Audit],
            KindOutcome::Existing { .. }
        ));
        assert_eq!(store.node_count(), nodes_after_first);
    }

    #[tokio::test]
    async fn test_window_covered_by_daily_is_not_rebuilt() {
        let (store, consolidator) = seeded().await;
        let daily_id = SummaryKind::Metrics.daily_id(&Day::containing(period().start));
        let daily = GraphNode::new(
            daily_id.clone(),
            NodeType::TsdbSummary,
            GraphScope::Local,
            Attributes::new(),
            "test",
            period().end,
        );
        assert!(store.memorize(&daily).await.is_ok());

        let report = consolidator.consolidate(&period()).await;
        assert_eq!(
            report.outcomes[&SummaryKind::Metrics],
            KindOutcome::Covered { daily_id }
        );
        assert!(!report.summary_ids().contains_key(&SummaryKind::Metrics));
        assert!(store.get_node("tsdb_summary_20250714_06").is_none());
        assert!(!store.get_node("dp-0").unwrap().is_consolidated());
        assert_eq!(report.created(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_only_affects_its_kind() {
        let (store, consolidator) = seeded().await;
        store.fail_writes_for(NodeType::TsdbSummary).unwrap();

        let report = consolidator.consolidate(&period()).await;
        assert!(matches!(
            report.outcomes[&SummaryKind::Metrics],
            KindOutcome::Failed { .. }
        ));
        assert_eq!(report.created(), 2);
        assert!(!store.get_node("dp-0").unwrap().is_consolidated());

        store.clear_write_failures().unwrap();
        let retry = consolidator.consolidate(&period()).await;
        assert_eq!(retry.created(), 1);
    }
}
