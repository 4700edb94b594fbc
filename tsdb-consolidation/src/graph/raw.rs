//! Builders for the raw nodes the pipeline consumes.
//!
//! Producers elsewhere in the runtime write these; the builders keep the
//! attribute layout in one place for the binary's import path and for tests.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{Attributes, CorrelationType, GraphNode, GraphScope, NodeType};

/// A `tsdb_data` node holding one metric sample.
pub fn datapoint_node(
    id: impl Into<String>,
    metric_name: &str,
    value: f64,
    timestamp: DateTime<Utc>,
    tags: &[(&str, &str)],
    updated_by: &str,
) -> GraphNode {
    let mut attrs = Attributes::new();
    attrs.insert("metric_name".into(), Value::String(metric_name.to_string()));
    attrs.insert("value".into(), Value::from(value));
    attrs.insert("timestamp".into(), Value::String(timestamp.to_rfc3339()));
    attrs.insert(
        "correlation_type".into(),
        Value::String(CorrelationType::MetricDatapoint.as_str().to_string()),
    );
    let tag_map: Map<String, Value> = tags
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    attrs.insert("tags".into(), Value::Object(tag_map));
    GraphNode::new(
        id,
        NodeType::TsdbData,
        GraphScope::Local,
        attrs,
        updated_by,
        timestamp,
    )
}

/// An `audit_entry` node.
pub fn audit_entry_node(
    id: impl Into<String>,
    event_type: &str,
    actor: &str,
    service: &str,
    timestamp: DateTime<Utc>,
    updated_by: &str,
) -> GraphNode {
    let mut attrs = Attributes::new();
    attrs.insert("event_type".into(), Value::String(event_type.to_string()));
    attrs.insert("actor".into(), Value::String(actor.to_string()));
    attrs.insert("service".into(), Value::String(service.to_string()));
    attrs.insert("timestamp".into(), Value::String(timestamp.to_rfc3339()));
    GraphNode::new(
        id,
        NodeType::AuditEntry,
        GraphScope::Local,
        attrs,
        updated_by,
        timestamp,
    )
}
