//! Type-tagged decoding of generic nodes into typed summaries.
//!
//! A static table maps each summary discriminator to its decode function.
//! Unknown node types, and summaries whose attributes no longer match the
//! typed shape (for example after profound compression), come back as
//! [`TypedNode::Generic`].

use tracing::debug;

use super::summary::{
    AuditSummary, ConversationSummary, MetricSummary, Summary, SummaryHeader, TraceSummary,
};
use super::{GraphNode, SummaryKind};

#[derive(Debug, Clone, PartialEq)]
pub enum TypedNode {
    MetricSummary(MetricSummary),
    ConversationSummary(ConversationSummary),
    TraceSummary(TraceSummary),
    AuditSummary(AuditSummary),
    Generic(GraphNode),
}

impl TypedNode {
    pub fn kind(&self) -> Option<SummaryKind> {
        match self {
            TypedNode::MetricSummary(_) => Some(SummaryKind::Metrics),
            TypedNode::ConversationSummary(_) => Some(SummaryKind::Conversations),
            TypedNode::TraceSummary(_) => Some(SummaryKind::Traces),
            TypedNode::AuditSummary(_) => Some(SummaryKind::Audit),
            TypedNode::Generic(_) => None,
        }
    }

    pub fn header(&self) -> Option<&SummaryHeader> {
        match self {
            TypedNode::MetricSummary(s) => Some(s.header()),
            TypedNode::ConversationSummary(s) => Some(s.header()),
            TypedNode::TraceSummary(s) => Some(s.header()),
            TypedNode::AuditSummary(s) => Some(s.header()),
            TypedNode::Generic(_) => None,
        }
    }

    pub fn source_count(&self) -> Option<usize> {
        match self {
            TypedNode::MetricSummary(s) => Some(s.source_count()),
            TypedNode::ConversationSummary(s) => Some(s.source_count()),
            TypedNode::TraceSummary(s) => Some(s.source_count()),
            TypedNode::AuditSummary(s) => Some(s.source_count()),
            TypedNode::Generic(_) => None,
        }
    }
}

type DecodeFn = fn(&GraphNode) -> Result<TypedNode, serde_json::Error>;

fn decode_metrics(node: &GraphNode) -> Result<TypedNode, serde_json::Error> {
    MetricSummary::from_node(node).map(TypedNode::MetricSummary)
}

fn decode_conversations(node: &GraphNode) -> Result<TypedNode, serde_json::Error> {
    ConversationSummary::from_node(node).map(TypedNode::ConversationSummary)
}

fn decode_traces(node: &GraphNode) -> Result<TypedNode, serde_json::Error> {
    TraceSummary::from_node(node).map(TypedNode::TraceSummary)
}

fn decode_audit(node: &GraphNode) -> Result<TypedNode, serde_json::Error> {
    AuditSummary::from_node(node).map(TypedNode::AuditSummary)
}

/// Discriminator -> decoder
const REGISTRY: &[(&str, DecodeFn)] = &[
    ("tsdb_summary", decode_metrics),
    ("conversation_summary", decode_conversations),
    ("trace_summary", decode_traces),
    ("audit_summary", decode_audit),
];

pub fn decode_node(node: &GraphNode) -> TypedNode {
    let decoder = REGISTRY
        .iter()
        .find(|(t, _)| *t == node.node_type.as_str())
        .map(|(_, f)| *f);

    match decoder {
        Some(decode) => match decode(node) {
            Ok(typed) => typed,
            Err(e) => {
                debug!(
                    "Node {} ({}) did not decode as a typed summary: {}",
                    node.id, node.node_type, e
                );
                TypedNode::Generic(node.clone())
            }
        },
        None => TypedNode::Generic(node.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Attributes, GraphScope, NodeType};
    use chrono::Utc;
    use serde_json::Value;

    #[test]
    fn test_unknown_type_falls_back_to_generic() {
        let node = GraphNode::new(
            "c1",
            NodeType::Other("concept".into()),
            GraphScope::Identity,
            Attributes::new(),
            "test",
            Utc::now(),
        );
        assert_eq!(decode_node(&node), TypedNode::Generic(node));
    }

    #[test]
    fn test_malformed_summary_falls_back_to_generic() {
        let mut attrs = Attributes::new();
        attrs.insert("period_start".into(), Value::String("not a date".into()));
        let node = GraphNode::new(
            "tsdb_summary_x",
            NodeType::TsdbSummary,
            GraphScope::Local,
            attrs,
            "test",
            Utc::now(),
        );
        assert!(matches!(decode_node(&node), TypedNode::Generic(_)));
    }
}
