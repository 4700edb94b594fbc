//! SQLite-backed [`GraphStore`].
//!
//! Three tables: `graph_nodes` (keyed by node id), `graph_edges` (unique on
//! source/target/relationship) and the append-only `service_correlations`
//! log. Timestamps are stored as unix milliseconds so range scans stay
//! index-friendly.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::{datapoint_from_node, GraphStore, MemoryOpResult, MemoryQuery, RAW_CORRELATION_TYPES};
use crate::error::{StoreError, StoreResult};
use crate::graph::{
    Attributes, CorrelationType, DataPoint, EdgeAttributes, GraphEdge, GraphNode, GraphScope,
    NodeType, ServiceCorrelation,
};
use crate::period::TimeRange;

const SCHEMA: &str = "BEGIN;
CREATE TABLE IF NOT EXISTS graph_nodes(
    node_id TEXT PRIMARY KEY,
    scope TEXT NOT NULL,
    node_type TEXT NOT NULL,
    attributes_json TEXT NOT NULL,
    version INTEGER NOT NULL,
    updated_by TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    event_time INTEGER NOT NULL,
    consolidated INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_nodes_type_time ON graph_nodes(node_type, event_time);
CREATE TABLE IF NOT EXISTS graph_edges(
    source_node_id TEXT NOT NULL,
    target_node_id TEXT NOT NULL,
    relationship TEXT NOT NULL,
    scope TEXT NOT NULL,
    weight REAL NOT NULL,
    attributes_json TEXT NOT NULL,
    UNIQUE(source_node_id, target_node_id, relationship)
);
CREATE TABLE IF NOT EXISTS service_correlations(
    correlation_id TEXT PRIMARY KEY,
    correlation_type TEXT NOT NULL,
    service_type TEXT NOT NULL,
    handler_name TEXT NOT NULL,
    action_type TEXT NOT NULL,
    request_data TEXT,
    response_data TEXT,
    trace_context TEXT,
    tags TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    consolidated INTEGER NOT NULL DEFAULT 0,
    summary_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_correlations_type_time ON service_correlations(correlation_type, timestamp);
COMMIT;";

pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SqliteGraphStore(<sqlite>)")
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `?,?,?` with one placeholder per correlation type, starting at `offset`.
fn type_placeholders(count: usize, offset: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", i + offset))
        .collect::<Vec<_>>()
        .join(",")
}

fn type_params(types: &[CorrelationType]) -> Vec<String> {
    types.iter().map(|t| t.as_str().to_string()).collect()
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, u32, String, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode_node_row(
    (id, scope, node_type, attrs, version, updated_by, updated_at): (
        String,
        String,
        String,
        String,
        u32,
        String,
        i64,
    ),
) -> StoreResult<GraphNode> {
    let attributes: Attributes = serde_json::from_str(&attrs)?;
    let scope = GraphScope::parse(&scope)
        .ok_or_else(|| StoreError::Serde(format!("unknown scope '{}' on node {}", scope, id)))?;
    Ok(GraphNode {
        id,
        node_type: NodeType::parse(&node_type),
        scope,
        attributes,
        version,
        updated_by,
        updated_at: from_millis(updated_at),
    })
}

const NODE_COLUMNS: &str =
    "node_id, scope, node_type, attributes_json, version, updated_by, updated_at";

const CORRELATION_COLUMNS: &str = "correlation_id, correlation_type, service_type, handler_name, \
     action_type, request_data, response_data, trace_context, tags, timestamp, consolidated, summary_id";

fn correlation_from_row(row: &Row<'_>) -> rusqlite::Result<CorrelationRow> {
    Ok(CorrelationRow {
        correlation_id: row.get(0)?,
        correlation_type: row.get(1)?,
        service_type: row.get(2)?,
        handler_name: row.get(3)?,
        action_type: row.get(4)?,
        request_data: row.get(5)?,
        response_data: row.get(6)?,
        trace_context: row.get(7)?,
        tags: row.get(8)?,
        timestamp: row.get(9)?,
        consolidated: row.get::<_, i64>(10)? != 0,
        summary_id: row.get(11)?,
    })
}

struct CorrelationRow {
    correlation_id: String,
    correlation_type: String,
    service_type: String,
    handler_name: String,
    action_type: String,
    request_data: Option<String>,
    response_data: Option<String>,
    trace_context: Option<String>,
    tags: String,
    timestamp: i64,
    consolidated: bool,
    summary_id: Option<String>,
}

impl CorrelationRow {
    fn decode(self) -> StoreResult<ServiceCorrelation> {
        let correlation_type = CorrelationType::parse(&self.correlation_type).ok_or_else(|| {
            StoreError::Serde(format!(
                "unknown correlation type '{}' on {}",
                self.correlation_type, self.correlation_id
            ))
        })?;
        Ok(ServiceCorrelation {
            correlation_id: self.correlation_id,
            correlation_type,
            service_type: self.service_type,
            handler_name: self.handler_name,
            action_type: self.action_type,
            request_data: self
                .request_data
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            response_data: self
                .response_data
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            trace_context: self
                .trace_context
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            tags: serde_json::from_str(&self.tags)?,
            timestamp: from_millis(self.timestamp),
            consolidated: self.consolidated,
            summary_id: self.summary_id,
        })
    }
}

impl SqliteGraphStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Append a row to the correlation log (ignored if the id already exists).
    pub fn insert_correlation(&self, c: &ServiceCorrelation) -> StoreResult<()> {
        let request = c.request_data.as_ref().map(serde_json::to_string).transpose()?;
        let response = c.response_data.as_ref().map(serde_json::to_string).transpose()?;
        let trace = c.trace_context.as_ref().map(serde_json::to_string).transpose()?;
        let tags = serde_json::to_string(&c.tags)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO service_correlations(correlation_id, correlation_type, \
             service_type, handler_name, action_type, request_data, response_data, trace_context, \
             tags, timestamp, consolidated, summary_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                c.correlation_id,
                c.correlation_type.as_str(),
                c.service_type,
                c.handler_name,
                c.action_type,
                request,
                response,
                trace,
                tags,
                to_millis(c.timestamp),
                c.consolidated as i64,
                c.summary_id,
            ],
        )?;
        Ok(())
    }

    fn write_node(&self, node: &GraphNode) -> StoreResult<()> {
        let attrs = serde_json::to_string(&node.attributes)?;
        let conn = self.lock()?;
        let created_at: Option<i64> = conn
            .query_row(
                "SELECT created_at FROM graph_nodes WHERE node_id = ?1",
                params![node.id],
                |r| r.get(0),
            )
            .optional()?;
        conn.execute(
            "INSERT OR REPLACE INTO graph_nodes(node_id, scope, node_type, attributes_json, \
             version, updated_by, updated_at, created_at, event_time, consolidated) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                node.id,
                node.scope.as_str(),
                node.node_type.as_str(),
                attrs,
                node.version,
                node.updated_by,
                to_millis(node.updated_at),
                created_at.unwrap_or_else(|| to_millis(node.updated_at)),
                to_millis(node.event_time()),
                node.is_consolidated() as i64,
            ],
        )?;
        Ok(())
    }

    fn select_nodes(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> StoreResult<Vec<GraphNode>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, node_from_row)
            .and_then(|mapped| mapped.collect::<Result<Vec<_>, _>>())?;
        rows.into_iter().map(decode_node_row).collect()
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn recall(&self, query: &MemoryQuery) -> StoreResult<Vec<GraphNode>> {
        let nodes = match (&query.node_id, &query.node_type) {
            (Some(id), _) => self.select_nodes(
                &format!("SELECT {} FROM graph_nodes WHERE node_id = ?1", NODE_COLUMNS),
                params![id],
            )?,
            (None, Some(t)) => self.select_nodes(
                &format!(
                    "SELECT {} FROM graph_nodes WHERE node_type = ?1 ORDER BY node_id",
                    NODE_COLUMNS
                ),
                params![t.as_str()],
            )?,
            (None, None) => self.select_nodes(
                &format!("SELECT {} FROM graph_nodes ORDER BY node_id", NODE_COLUMNS),
                params![],
            )?,
        };
        Ok(nodes.into_iter().filter(|n| query.matches(n)).collect())
    }

    async fn recall_timeseries(
        &self,
        scope: GraphScope,
        range: &TimeRange,
        correlation_types: &[CorrelationType],
    ) -> StoreResult<Vec<DataPoint>> {
        let nodes = self
            .nodes_in_range(&NodeType::TsdbData, range)
            .await?;
        let mut points = Vec::with_capacity(nodes.len());
        for node in nodes.iter().filter(|n| n.scope == scope) {
            match datapoint_from_node(node) {
                Some(p) if correlation_types.contains(&p.correlation_type) => points.push(p),
                Some(_) => {}
                None => warn!("Skipping malformed tsdb_data node {}", node.id),
            }
        }
        Ok(points)
    }

    async fn memorize(&self, node: &GraphNode) -> MemoryOpResult {
        match self.write_node(node) {
            Ok(()) => MemoryOpResult::ok(),
            Err(e) => MemoryOpResult::failed(e.to_string()),
        }
    }

    async fn forget(&self, node: &GraphNode) -> MemoryOpResult {
        let conn = match self.lock() {
            Ok(c) => c,
            Err(e) => return MemoryOpResult::failed(e.to_string()),
        };
        let res = conn
            .execute("DELETE FROM graph_nodes WHERE node_id = ?1", params![node.id])
            .and_then(|deleted| {
                conn.execute(
                    "DELETE FROM graph_edges WHERE source_node_id = ?1 OR target_node_id = ?1",
                    params![node.id],
                )
                .map(|_| deleted)
            });
        match res {
            Ok(0) => MemoryOpResult::failed(format!("node {} not found", node.id)),
            Ok(_) => MemoryOpResult::ok(),
            Err(e) => MemoryOpResult::failed(e.to_string()),
        }
    }

    async fn nodes_in_range(
        &self,
        node_type: &NodeType,
        range: &TimeRange,
    ) -> StoreResult<Vec<GraphNode>> {
        self.select_nodes(
            &format!(
                "SELECT {} FROM graph_nodes WHERE node_type = ?1 AND event_time >= ?2 \
                 AND event_time < ?3 ORDER BY event_time, node_id",
                NODE_COLUMNS
            ),
            params![
                node_type.as_str(),
                to_millis(range.start),
                to_millis(range.end)
            ],
        )
    }

    async fn mark_nodes_consolidated(
        &self,
        node_ids: &[String],
        summary_id: &str,
    ) -> StoreResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut tagged = 0;
        for id in node_ids {
            let current: Option<String> = tx
                .query_row(
                    "SELECT attributes_json FROM graph_nodes WHERE node_id = ?1 AND consolidated = 0",
                    params![id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                continue;
            };
            let mut attrs: Attributes = serde_json::from_str(&current)?;
            attrs.insert("consolidated".to_string(), Value::Bool(true));
            attrs.insert(
                "summary_id".to_string(),
                Value::String(summary_id.to_string()),
            );
            tx.execute(
                "UPDATE graph_nodes SET attributes_json = ?1, consolidated = 1 WHERE node_id = ?2",
                params![serde_json::to_string(&attrs)?, id],
            )?;
            tagged += 1;
        }
        tx.commit()?;
        Ok(tagged)
    }

    async fn add_edge(&self, edge: &GraphEdge) -> StoreResult<bool> {
        let attrs = serde_json::to_string(&edge.attributes)?;
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO graph_edges(source_node_id, target_node_id, relationship, \
             scope, weight, attributes_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                edge.source,
                edge.target,
                edge.relationship,
                edge.scope.as_str(),
                edge.weight,
                attrs
            ],
        )?;
        Ok(inserted > 0)
    }

    async fn edges_for(&self, node_id: &str) -> StoreResult<Vec<GraphEdge>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT source_node_id, target_node_id, relationship, scope, weight, attributes_json \
             FROM graph_edges WHERE source_node_id = ?1 OR target_node_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![node_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .and_then(|mapped| mapped.collect::<Result<Vec<_>, _>>())?;
        rows.into_iter()
            .map(|(source, target, relationship, scope, weight, attrs)| -> StoreResult<GraphEdge> {
                let attributes: EdgeAttributes = serde_json::from_str(&attrs)?;
                Ok(GraphEdge {
                    source,
                    target,
                    relationship,
                    scope: GraphScope::parse(&scope).unwrap_or(GraphScope::Local),
                    weight,
                    attributes,
                })
            })
            .collect()
    }

    async fn correlations(
        &self,
        types: &[CorrelationType],
        range: &TimeRange,
    ) -> StoreResult<Vec<ServiceCorrelation>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM service_correlations WHERE timestamp >= ?1 AND timestamp < ?2 \
             AND correlation_type IN ({}) ORDER BY timestamp, correlation_id",
            CORRELATION_COLUMNS,
            type_placeholders(types.len(), 3)
        );
        let mut args: Vec<rusqlite::types::Value> = vec![
            to_millis(range.start).into(),
            to_millis(range.end).into(),
        ];
        args.extend(type_params(types).into_iter().map(Into::into));

        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), correlation_from_row)
                .and_then(|mapped| mapped.collect::<Result<Vec<_>, _>>())?;
            rows
        };
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.correlation_id.clone();
            match row.decode() {
                Ok(c) => out.push(c),
                Err(e) => warn!("Skipping malformed correlation {}: {}", id, e),
            }
        }
        Ok(out)
    }

    async fn count_correlations(
        &self,
        types: &[CorrelationType],
        range: &TimeRange,
    ) -> StoreResult<usize> {
        if types.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "SELECT COUNT(1) FROM service_correlations WHERE timestamp >= ?1 AND timestamp < ?2 \
             AND correlation_type IN ({})",
            type_placeholders(types.len(), 3)
        );
        let mut args: Vec<rusqlite::types::Value> = vec![
            to_millis(range.start).into(),
            to_millis(range.end).into(),
        ];
        args.extend(type_params(types).into_iter().map(Into::into));
        let conn = self.lock()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(args.iter()), |r| r.get(0))?;
        Ok(count as usize)
    }

    async fn tag_correlations(
        &self,
        types: &[CorrelationType],
        range: &TimeRange,
        summary_id: &str,
    ) -> StoreResult<usize> {
        if types.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE service_correlations SET consolidated = 1, summary_id = ?1 \
             WHERE timestamp >= ?2 AND timestamp < ?3 AND consolidated = 0 \
             AND correlation_type IN ({})",
            type_placeholders(types.len(), 4)
        );
        let mut args: Vec<rusqlite::types::Value> = vec![
            summary_id.to_string().into(),
            to_millis(range.start).into(),
            to_millis(range.end).into(),
        ];
        args.extend(type_params(types).into_iter().map(Into::into));
        let conn = self.lock()?;
        Ok(conn.execute(&sql, params_from_iter(args.iter()))?)
    }

    async fn delete_consolidated_correlations(
        &self,
        types: &[CorrelationType],
        range: &TimeRange,
    ) -> StoreResult<usize> {
        if types.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM service_correlations WHERE timestamp >= ?1 AND timestamp < ?2 \
             AND consolidated = 1 AND correlation_type IN ({})",
            type_placeholders(types.len(), 3)
        );
        let mut args: Vec<rusqlite::types::Value> = vec![
            to_millis(range.start).into(),
            to_millis(range.end).into(),
        ];
        args.extend(type_params(types).into_iter().map(Into::into));
        let conn = self.lock()?;
        Ok(conn.execute(&sql, params_from_iter(args.iter()))?)
    }

    async fn earliest_unconsolidated(&self, since: DateTime<Utc>) -> StoreResult<Option<DateTime<Utc>>> {
        let raw_types = NodeType::raw_types();
        let conn = self.lock()?;
        let from_nodes: Option<i64> = conn.query_row(
            "SELECT MIN(event_time) FROM graph_nodes WHERE consolidated = 0 \
             AND node_type IN (?1, ?2) AND event_time >= ?3",
            params![raw_types[0].as_str(), raw_types[1].as_str(), to_millis(since)],
            |r| r.get(0),
        )?;
        let from_correlations: Option<i64> = conn.query_row(
            "SELECT MIN(timestamp) FROM service_correlations WHERE consolidated = 0 \
             AND correlation_type IN (?1, ?2) AND timestamp >= ?3",
            params![
                RAW_CORRELATION_TYPES[0].as_str(),
                RAW_CORRELATION_TYPES[1].as_str(),
                to_millis(since)
            ],
            |r| r.get(0),
        )?;
        let earliest = match (from_nodes, from_correlations) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Ok(earliest.map(from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::raw;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_node_round_trip_and_range() {
        let tmp = NamedTempFile::new().unwrap();
        let store = SqliteGraphStore::open(tmp.path()).expect("open sqlite store");

        for h in [1i64, 5, 7] {
            let node = raw::datapoint_node(
                format!("dp-{}", h),
                "llm.tokens.total",
                h as f64,
                t0() + Duration::hours(h),
                &[("service", "llm")],
                "test",
            );
            assert!(store.memorize(&node).await.is_ok());
        }

        let range = TimeRange::new(t0(), t0() + Duration::hours(6));
        let nodes = store.nodes_in_range(&NodeType::TsdbData, &range).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "dp-1");

        let points = store
            .recall_timeseries(GraphScope::Local, &range, &[CorrelationType::MetricDatapoint])
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].tags.get("service").map(String::as_str), Some("llm"));

        let ids: Vec<String> = points.iter().map(|p| p.node_id.clone()).collect();
        assert_eq!(ids, vec!["dp-1".to_string(), "dp-5".to_string()]);
        assert_eq!(
            store
                .mark_nodes_consolidated(&ids, "tsdb_summary_20250714_00")
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .mark_nodes_consolidated(&ids, "tsdb_summary_20250714_00")
                .await
                .unwrap(),
            0
        );
        let tagged = store.recall(&MemoryQuery::by_id("dp-1")).await.unwrap();
        assert!(tagged[0].is_consolidated());
        assert_eq!(tagged[0].attr_str("summary_id"), Some("tsdb_summary_20250714_00"));
        assert_eq!(
            store.earliest_unconsolidated(t0()).await.unwrap(),
            Some(t0() + Duration::hours(7))
        );
        assert_eq!(
            store
                .earliest_unconsolidated(t0() + Duration::hours(8))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_sqlite_correlation_lifecycle() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        let mut c = ServiceCorrelation::new(
            "corr-1",
            CorrelationType::ServiceInteraction,
            t0() + Duration::hours(2),
        );
        c.tags.insert("channel_id".into(), "general".into());
        store.insert_correlation(&c).unwrap();
        store
            .insert_correlation(&ServiceCorrelation::new(
                "corr-2",
                CorrelationType::TraceSpan,
                t0() + Duration::hours(3),
            ))
            .unwrap();

        let range = TimeRange::new(t0(), t0() + Duration::hours(6));
        let types = [CorrelationType::ServiceInteraction];
        let rows = store.correlations(&types, &range).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tag("channel_id"), Some("general"));

        assert_eq!(store.count_correlations(&types, &range).await.unwrap(), 1);
        assert_eq!(store.delete_consolidated_correlations(&types, &range).await.unwrap(), 0);
        assert_eq!(store.tag_correlations(&types, &range, "conv").await.unwrap(), 1);
        assert_eq!(store.delete_consolidated_correlations(&types, &range).await.unwrap(), 1);
        assert_eq!(store.count_correlations(&types, &range).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_edges_are_unique() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        let edge = GraphEdge::new("a", "b", "TEMPORAL_CORRELATION", 1.0, t0(), Some("ctx".into()));
        assert!(store.add_edge(&edge).await.unwrap());
        assert!(!store.add_edge(&edge).await.unwrap());
        let edges = store.edges_for("a").await.unwrap();
        assert_eq!(edges, vec![edge]);
    }
}
