//! `audit_entry` nodes -> `audit_summary`.
//!
//! The digest is sha256 over the window's sorted entry ids, so any later
//! insertion or removal inside the window changes it.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::ConsolidationResult;
use crate::graph::{increment, AuditSummary, GraphNode, NodeType, SummaryHeader, SummaryKind};
use crate::period::{Period, TimeRange};
use crate::store::GraphStore;

pub const HASH_ALGORITHM: &str = "sha256";

pub(crate) async fn load(store: &dyn GraphStore, range: &TimeRange) -> ConsolidationResult<Vec<GraphNode>> {
    Ok(store.nodes_in_range(&NodeType::AuditEntry, range).await?)
}

pub(crate) async fn count_sources(store: &dyn GraphStore, range: &TimeRange) -> ConsolidationResult<usize> {
    Ok(load(store, range).await?.len())
}

pub fn digest_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> String {
    let mut sorted: Vec<&str> = ids.into_iter().collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for id in sorted {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct SecurityFlags {
    failed_auth: bool,
    permission_denied: bool,
    emergency_shutdown: bool,
    config_change: bool,
}

fn classify(event_type: &str) -> SecurityFlags {
    let e = event_type.to_ascii_lowercase();
    SecurityFlags {
        failed_auth: e.contains("auth") && (e.contains("fail") || e.contains("denied")),
        permission_denied: e.contains("permission_denied"),
        emergency_shutdown: e.contains("emergency_shutdown"),
        config_change: e.contains("config") && (e.contains("change") || e.contains("update")),
    }
}

pub fn summarize(
    period: &Period,
    entries: &[GraphNode],
    created_at: DateTime<Utc>,
) -> Option<AuditSummary> {
    if entries.is_empty() {
        return None;
    }

    let mut events_by_type = BTreeMap::new();
    let mut events_by_actor = BTreeMap::new();
    let mut events_by_service = BTreeMap::new();
    let (mut failed_auth, mut denials, mut shutdowns, mut config_changes) = (0, 0, 0, 0);

    for node in entries {
        let event_type = node.attr_str("event_type").unwrap_or("unknown");
        increment(&mut events_by_type, event_type, 1);
        increment(&mut events_by_actor, node.attr_str("actor").unwrap_or("unknown"), 1);
        increment(
            &mut events_by_service,
            node.attr_str("service").unwrap_or("unknown"),
            1,
        );

        let flags = classify(event_type);
        failed_auth += flags.failed_auth as u64;
        denials += flags.permission_denied as u64;
        shutdowns += flags.emergency_shutdown as u64;
        config_changes += flags.config_change as u64;
    }

    Some(AuditSummary {
        header: SummaryHeader::basic(SummaryKind::Audit, period, created_at),
        total_events: entries.len(),
        events_by_type,
        events_by_actor,
        events_by_service,
        failed_auth_attempts: failed_auth,
        permission_denials: denials,
        emergency_shutdowns: shutdowns,
        config_changes,
        audit_hash: digest_ids(entries.iter().map(|n| n.id.as_str())),
        hash_algorithm: HASH_ALGORITHM.to_string(),
        source_node_count: entries.len(),
    })
}
