//! Graph data model: nodes, edges and the typed summary projections.

pub mod correlation;
pub mod raw;
pub mod registry;
pub mod summary;

pub use correlation::{
    CorrelationType, DataPoint, ResponseData, ServiceCorrelation, TraceContext,
};
pub use registry::{decode_node, TypedNode};
pub use summary::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::period::{Day, Period};

/// Attribute bag carried by every node.
pub type Attributes = Map<String, Value>;

/// Node type discriminator.
///
/// Unknown discriminators survive a round trip as [`NodeType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    TsdbData,
    AuditEntry,
    TsdbSummary,
    ConversationSummary,
    TraceSummary,
    AuditSummary,
    Other(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::TsdbData => "tsdb_data",
            NodeType::AuditEntry => "audit_entry",
            NodeType::TsdbSummary => "tsdb_summary",
            NodeType::ConversationSummary => "conversation_summary",
            NodeType::TraceSummary => "trace_summary",
            NodeType::AuditSummary => "audit_summary",
            NodeType::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "tsdb_data" => NodeType::TsdbData,
            "audit_entry" => NodeType::AuditEntry,
            "tsdb_summary" => NodeType::TsdbSummary,
            "conversation_summary" => NodeType::ConversationSummary,
            "trace_summary" => NodeType::TraceSummary,
            "audit_summary" => NodeType::AuditSummary,
            other => NodeType::Other(other.to_string()),
        }
    }

    /// Raw node types subject to retention cleanup.
    pub fn raw_types() -> [NodeType; 2] {
        [NodeType::TsdbData, NodeType::AuditEntry]
    }
}

impl From<String> for NodeType {
    fn from(s: String) -> Self {
        NodeType::parse(&s)
    }
}

impl From<NodeType> for String {
    fn from(t: NodeType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphScope {
    Local,
    Identity,
    Environment,
    Community,
}

impl GraphScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphScope::Local => "local",
            GraphScope::Identity => "identity",
            GraphScope::Environment => "environment",
            GraphScope::Community => "community",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(GraphScope::Local),
            "identity" => Some(GraphScope::Identity),
            "environment" => Some(GraphScope::Environment),
            "community" => Some(GraphScope::Community),
            _ => None,
        }
    }
}

/// Generic persisted node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub node_type: NodeType,
    pub scope: GraphScope,
    pub attributes: Attributes,
    pub version: u32,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl GraphNode {
    pub fn new(
        id: impl Into<String>,
        node_type: NodeType,
        scope: GraphScope,
        attributes: Attributes,
        updated_by: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            node_type,
            scope,
            attributes,
            version: 1,
            updated_by: updated_by.into(),
            updated_at,
        }
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(|v| v.as_f64())
    }

    pub fn attr_datetime(&self, key: &str) -> Option<DateTime<Utc>> {
        self.attr_str(key)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Timestamp used for time-range selection: `timestamp`, then
    /// `period_start`, then `updated_at`.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.attr_datetime("timestamp")
            .or_else(|| self.attr_datetime("period_start"))
            .unwrap_or(self.updated_at)
    }

    pub fn is_consolidated(&self) -> bool {
        self.attributes
            .get("consolidated")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Serialized attribute size in bytes, used by the compressor.
    pub fn attributes_size(&self) -> usize {
        serde_json::to_vec(&self.attributes)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

/// Attributes carried by every edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeAttributes {
    pub created_at: DateTime<Utc>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relationship: String,
    pub scope: GraphScope,
    pub weight: f64,
    pub attributes: EdgeAttributes,
}

impl GraphEdge {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relationship: impl Into<String>,
        weight: f64,
        created_at: DateTime<Utc>,
        context: Option<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relationship: relationship.into(),
            scope: GraphScope::Local,
            weight: weight.clamp(0.0, 1.0),
            attributes: EdgeAttributes {
                created_at,
                context,
            },
        }
    }
}

/// Granularity of a summary node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationLevel {
    /// One 6-hour window
    Basic,
    /// One UTC day folded from basic summaries
    Extensive,
}

/// The four kinds of summary produced per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SummaryKind {
    Metrics,
    Conversations,
    Traces,
    Audit,
}

impl SummaryKind {
    pub const ALL: [SummaryKind; 4] = [
        SummaryKind::Metrics,
        SummaryKind::Conversations,
        SummaryKind::Traces,
        SummaryKind::Audit,
    ];

    pub fn node_type(&self) -> NodeType {
        match self {
            SummaryKind::Metrics => NodeType::TsdbSummary,
            SummaryKind::Conversations => NodeType::ConversationSummary,
            SummaryKind::Traces => NodeType::TraceSummary,
            SummaryKind::Audit => NodeType::AuditSummary,
        }
    }

    pub fn from_node_type(node_type: &NodeType) -> Option<Self> {
        match node_type {
            NodeType::TsdbSummary => Some(SummaryKind::Metrics),
            NodeType::ConversationSummary => Some(SummaryKind::Conversations),
            NodeType::TraceSummary => Some(SummaryKind::Traces),
            NodeType::AuditSummary => Some(SummaryKind::Audit),
            _ => None,
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            SummaryKind::Metrics => "tsdb_summary",
            SummaryKind::Conversations => "conversation_summary",
            SummaryKind::Traces => "trace_summary",
            SummaryKind::Audit => "audit_summary",
        }
    }

    /// Deterministic id of the basic summary for `period`.
    pub fn basic_id(&self, period: &Period) -> String {
        format!("{}_{}", self.id_prefix(), period.id_suffix())
    }

    /// Deterministic id of the daily rollup for `day`.
    pub fn daily_id(&self, day: &Day) -> String {
        format!("{}_daily_{}", self.id_prefix(), day.id_suffix())
    }
}

impl fmt::Display for SummaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SummaryKind::Metrics => "metrics",
            SummaryKind::Conversations => "conversations",
            SummaryKind::Traces => "traces",
            SummaryKind::Audit => "audit",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_node_type_round_trip_and_unknown() {
        for t in [
            NodeType::TsdbData,
            NodeType::AuditEntry,
            NodeType::TsdbSummary,
            NodeType::ConversationSummary,
            NodeType::TraceSummary,
            NodeType::AuditSummary,
        ] {
            assert_eq!(NodeType::parse(t.as_str()), t);
        }
        assert_eq!(
            NodeType::parse("concept"),
            NodeType::Other("concept".to_string())
        );
        let json = serde_json::to_string(&NodeType::Other("concept".into())).unwrap();
        assert_eq!(json, "\"concept\"");
    }

    #[test]
    fn test_summary_ids_are_deterministic() {
        let start = Utc.with_ymd_and_hms(2025, 7, 14, 12, 0, 0).unwrap();
        let period = Period::containing(start);
        assert_eq!(
            SummaryKind::Metrics.basic_id(&period),
            "tsdb_summary_20250714_12"
        );
        assert_eq!(
            SummaryKind::Audit.daily_id(&Day::containing(start)),
            "audit_summary_daily_20250714"
        );
    }

    #[test]
    fn test_event_time_prefers_timestamp_attribute() {
        let updated = Utc.with_ymd_and_hms(2025, 7, 14, 12, 0, 0).unwrap();
        let mut attrs = Attributes::new();
        attrs.insert(
            "timestamp".into(),
            Value::String("2025-07-14T03:00:00Z".into()),
        );
        let node = GraphNode::new("n1", NodeType::TsdbData, GraphScope::Local, attrs, "test", updated);
        assert_eq!(
            node.event_time(),
            Utc.with_ymd_and_hms(2025, 7, 14, 3, 0, 0).unwrap()
        );
        assert!(!node.is_consolidated());
    }

    #[test]
    fn test_edge_weight_is_clamped() {
        let now = Utc::now();
        let edge = GraphEdge::new("a", "b", "X", 3.0, now, None);
        assert_eq!(edge.weight, 1.0);
    }
}
