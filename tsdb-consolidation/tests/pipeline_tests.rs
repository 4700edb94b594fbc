use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

use tsdb_consolidation::graph::raw::{audit_entry_node, datapoint_node};
use tsdb_consolidation::graph::{
    decode_node, CorrelationType, ResponseData, ServiceCorrelation, SummaryKind, TypedNode,
};
use tsdb_consolidation::period::Period;
use tsdb_consolidation::store::MemoryQuery;
use tsdb_consolidation::{
    ConsolidationConfig, GraphStore, ManualClock, Scheduler, SqliteGraphStore,
};

fn period() -> Period {
    Period::containing(Utc.with_ymd_and_hms(2025, 7, 14, 6, 0, 0).unwrap())
}

fn at(minutes: i64) -> DateTime<Utc> {
    period().start + Duration::minutes(minutes)
}

fn interaction(id: &str, minutes: i64, ok: bool) -> ServiceCorrelation {
    let mut c = ServiceCorrelation::new(id, CorrelationType::ServiceInteraction, at(minutes));
    c.service_type = "communication".into();
    c.action_type = "speak".into();
    c.request_data = Some(json!({"channel_id": "general", "author_id": "u1", "content": "hello"}));
    c.response_data = Some(ResponseData {
        success: ok,
        execution_time_ms: 40.0,
        error_type: None,
        error_message: None,
    });
    c
}

fn span(id: &str, minutes: i64) -> ServiceCorrelation {
    let mut c = ServiceCorrelation::new(id, CorrelationType::TraceSpan, at(minutes));
    c.tags.insert("task_id".into(), "task-1".into());
    c.tags.insert("thought_id".into(), format!("th-{}", id));
    c.tags.insert("component_type".into(), "dma".into());
    c
}

async fn seeded_store(dir: &TempDir) -> Arc<SqliteGraphStore> {
    let store = Arc::new(SqliteGraphStore::open(dir.path().join("graph.db")).unwrap());
    for (i, name) in ["llm.tokens.total", "cpu.load", "cpu.load"].iter().enumerate() {
        let node = datapoint_node(format!("dp-{}", i), name, 10.0, at(i as i64 * 5), &[], "test");
        assert!(store.memorize(&node).await.is_ok());
    }
    for (i, event) in ["login", "auth_failed"].iter().enumerate() {
        let node = audit_entry_node(format!("ae-{}", i), event, "alice", "api", at(30 + i as i64), "test");
        assert!(store.memorize(&node).await.is_ok());
    }
    store.insert_correlation(&interaction("c-1", 60, true)).unwrap();
    store.insert_correlation(&interaction("c-2", 61, false)).unwrap();
    store.insert_correlation(&span("s-1", 90)).unwrap();
    store.insert_correlation(&span("s-2", 95)).unwrap();
    store
}

async fn all_edges(store: &SqliteGraphStore, ids: &[String]) -> HashSet<(String, String, String)> {
    let mut out = HashSet::new();
    for id in ids {
        for e in store.edges_for(id).await.unwrap() {
            out.insert((e.source, e.target, e.relationship));
        }
    }
    out
}

#[tokio::test]
async fn test_full_pass_writes_four_summaries_and_links_them() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;
    let now = period().end + Duration::minutes(30);
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(ManualClock::new(now)),
        ConsolidationConfig::default(),
    );

    let report = scheduler.run_once(now).await.unwrap();
    assert_eq!(report.periods_consolidated, 1);
    assert_eq!(report.summaries_created, 4);
    // 6 same-period pairs plus 5 cross-type edges
    assert_eq!(report.edges_created, 11);

    let ids: Vec<String> = SummaryKind::ALL.iter().map(|k| k.basic_id(&period())).collect();
    let edges = all_edges(&store, &ids).await;
    assert_eq!(edges.len(), 11);
    assert!(edges.contains(&(
        ids[1].clone(),
        ids[2].clone(),
        "DRIVES_PROCESSING".to_string()
    )));

    let conv = store.recall(&MemoryQuery::by_id(&ids[1])).await.unwrap();
    match decode_node(&conv[0]) {
        TypedNode::ConversationSummary(s) => {
            assert_eq!(s.total_interactions, 2);
            assert_eq!(s.success_rate, 0.5);
            assert_eq!(s.source_correlation_count, 2);
        }
        other => panic!("unexpected decode: {:?}", other),
    }
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;
    let now = period().end + Duration::minutes(30);
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(ManualClock::new(now)),
        ConsolidationConfig::default(),
    );

    scheduler.run_once(now).await.unwrap();
    let again = scheduler.run_once(now).await.unwrap();
    assert_eq!(again.summaries_created, 0);
    assert_eq!(again.edges_created, 0);

    let metrics = store
        .recall(&MemoryQuery::by_type(SummaryKind::Metrics.node_type()))
        .await
        .unwrap();
    assert_eq!(metrics.len(), 1);
}

#[tokio::test]
async fn test_retention_after_horizon_deletes_raw_records() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;
    let now = period().end + Duration::minutes(30);
    let clock = Arc::new(ManualClock::new(now));
    let scheduler = Scheduler::new(store.clone(), clock.clone(), ConsolidationConfig::default());

    let first = scheduler.run_once(now).await.unwrap();
    assert_eq!(first.raw_nodes_deleted, 0);
    assert_eq!(first.correlations_deleted, 0);

    let later = now + Duration::hours(25);
    clock.set(later);
    let second = scheduler.run_once(later).await.unwrap();
    assert_eq!(second.raw_nodes_deleted, 5);
    assert_eq!(second.correlations_deleted, 4);
    assert_eq!(second.cleanup_skipped, 0);

    assert!(store.recall(&MemoryQuery::by_id("dp-0")).await.unwrap().is_empty());
    assert_eq!(
        store
            .recall(&MemoryQuery::by_id(SummaryKind::Audit.basic_id(&period())))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_late_arrival_blocks_cleanup() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;
    let now = period().end + Duration::minutes(30);
    let clock = Arc::new(ManualClock::new(now));
    let scheduler = Scheduler::new(store.clone(), clock.clone(), ConsolidationConfig::default());
    scheduler.run_once(now).await.unwrap();

    store.insert_correlation(&span("s-late", 100)).unwrap();

    let later = now + Duration::hours(25);
    clock.set(later);
    let report = scheduler.run_once(later).await.unwrap();
    assert_eq!(report.cleanup_skipped, 1);
    let range = period().range();
    assert_eq!(
        store
            .count_correlations(&[CorrelationType::TraceSpan], &range)
            .await
            .unwrap(),
        3
    );
}
