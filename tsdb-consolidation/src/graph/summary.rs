//! Typed summary projections of [`GraphNode`].
//!
//! Each summary serializes into the node's attribute map and decodes back
//! from it. The header fields are shared by all four kinds; the rest is
//! kind specific.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{ConsolidationLevel, GraphNode, GraphScope, SummaryKind};
use crate::period::{Day, Period};

/// Fields common to every summary node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryHeader {
    pub id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub period_label: String,
    pub consolidation_level: ConsolidationLevel,
    pub created_at: DateTime<Utc>,
}

impl SummaryHeader {
    pub fn basic(kind: SummaryKind, period: &Period, created_at: DateTime<Utc>) -> Self {
        Self {
            id: kind.basic_id(period),
            period_start: period.start,
            period_end: period.end,
            period_label: period.label(),
            consolidation_level: ConsolidationLevel::Basic,
            created_at,
        }
    }

    pub fn daily(kind: SummaryKind, day: &Day, created_at: DateTime<Utc>) -> Self {
        Self {
            id: kind.daily_id(day),
            period_start: day.start,
            period_end: day.end(),
            period_label: day.label(),
            consolidation_level: ConsolidationLevel::Extensive,
            created_at,
        }
    }
}

/// Behaviour shared by the summary kinds.
pub trait Summary: Serialize + DeserializeOwned + Sized {
    const KIND: SummaryKind;

    fn header(&self) -> &SummaryHeader;

    /// Number of raw records folded into this summary. Immutable once written;
    /// retention compares it against the live row count before deleting.
    fn source_count(&self) -> usize;

    fn id(&self) -> &str {
        &self.header().id
    }

    fn to_node(&self, updated_by: &str) -> Result<GraphNode, serde_json::Error> {
        let attributes = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Ok(GraphNode::new(
            self.header().id.clone(),
            Self::KIND.node_type(),
            GraphScope::Local,
            attributes,
            updated_by,
            self.header().created_at,
        ))
    }

    fn from_node(node: &GraphNode) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(node.attributes.clone()))
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Roll-up of all samples for one metric name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl MetricAggregate {
    pub fn from_value(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
            avg: value,
        }
    }

    pub fn from_values(values: &[f64]) -> Option<Self> {
        let (first, rest) = values.split_first()?;
        let mut agg = Self::from_value(*first);
        for v in rest {
            agg.push(*v);
        }
        Some(agg)
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.avg = self.sum / self.count as f64;
    }

    pub fn merge(&mut self, other: &MetricAggregate) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.avg = if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        };
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTotals {
    pub total_tokens: u64,
    pub total_cost_cents: f64,
    pub total_carbon_grams: f64,
    pub total_energy_kwh: f64,
}

impl ResourceTotals {
    pub fn merge(&mut self, other: &ResourceTotals) {
        self.total_tokens += other.total_tokens;
        self.total_cost_cents += other.total_cost_cents;
        self.total_carbon_grams += other.total_carbon_grams;
        self.total_energy_kwh += other.total_energy_kwh;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    #[serde(flatten)]
    pub header: SummaryHeader,
    pub metrics: BTreeMap<String, MetricAggregate>,
    pub resources: ResourceTotals,
    pub action_counts: BTreeMap<String, u64>,
    pub total_operations: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub source_node_count: usize,
}

impl Summary for MetricSummary {
    const KIND: SummaryKind = SummaryKind::Metrics;

    fn header(&self) -> &SummaryHeader {
        &self.header
    }

    fn source_count(&self) -> usize {
        self.source_node_count
    }
}

/// `(total - errors) / total`, or 1.0 when nothing ran.
pub fn success_rate(total_operations: u64, errors: u64) -> f64 {
    if total_operations == 0 {
        1.0
    } else {
        total_operations.saturating_sub(errors) as f64 / total_operations as f64
    }
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub execution_time_ms: f64,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub message_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub header: SummaryHeader,
    pub conversations_by_channel: BTreeMap<String, Vec<ConversationMessage>>,
    pub total_interactions: u64,
    pub unique_users: usize,
    pub participants: BTreeMap<String, Participant>,
    pub action_counts: BTreeMap<String, u64>,
    pub service_calls: BTreeMap<String, u64>,
    pub avg_response_time_ms: f64,
    pub total_processing_time_ms: f64,
    /// Interactions that carried an outcome; denominator for the averages.
    pub timed_interactions: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub source_correlation_count: usize,
}

impl Summary for ConversationSummary {
    const KIND: SummaryKind = SummaryKind::Conversations;

    fn header(&self) -> &SummaryHeader {
        &self.header
    }

    fn source_count(&self) -> usize {
        self.source_correlation_count
    }
}

// ---------------------------------------------------------------------------
// Traces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtStep {
    pub thought_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTrace {
    pub task_id: String,
    pub status: String,
    pub thoughts: Vec<ThoughtStep>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentStats {
    pub calls: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceError {
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    #[serde(flatten)]
    pub header: SummaryHeader,
    pub total_tasks_processed: usize,
    pub tasks_by_status: BTreeMap<String, u64>,
    pub task_summaries: BTreeMap<String, TaskTrace>,
    pub total_thoughts_processed: usize,
    pub thoughts_by_type: BTreeMap<String, u64>,
    pub component_stats: BTreeMap<String, ComponentStats>,
    pub dma_decisions: BTreeMap<String, u64>,
    pub guardrail_violations: BTreeMap<String, u64>,
    pub avg_task_processing_time_ms: f64,
    pub p50_task_processing_time_ms: f64,
    pub p95_task_processing_time_ms: f64,
    pub p99_task_processing_time_ms: f64,
    pub avg_trace_depth: f64,
    pub max_trace_depth: usize,
    pub errors: Vec<TraceError>,
    pub source_correlation_count: usize,
}

impl Summary for TraceSummary {
    const KIND: SummaryKind = SummaryKind::Traces;

    fn header(&self) -> &SummaryHeader {
        &self.header
    }

    fn source_count(&self) -> usize {
        self.source_correlation_count
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    #[serde(flatten)]
    pub header: SummaryHeader,
    pub total_events: usize,
    pub events_by_type: BTreeMap<String, u64>,
    pub events_by_actor: BTreeMap<String, u64>,
    pub events_by_service: BTreeMap<String, u64>,
    pub failed_auth_attempts: u64,
    pub permission_denials: u64,
    pub emergency_shutdowns: u64,
    pub config_changes: u64,
    /// sha256 over the window's sorted raw event ids
    pub audit_hash: String,
    pub hash_algorithm: String,
    pub source_node_count: usize,
}

impl Summary for AuditSummary {
    const KIND: SummaryKind = SummaryKind::Audit;

    fn header(&self) -> &SummaryHeader {
        &self.header
    }

    fn source_count(&self) -> usize {
        self.source_node_count
    }
}

/// Nearest-rank percentile over an already sorted slice.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.clamp(1, sorted.len()) - 1;
    sorted[idx]
}

pub(crate) fn increment(map: &mut BTreeMap<String, u64>, key: impl Into<String>, by: u64) {
    *map.entry(key.into()).or_insert(0) += by;
}
