//! Raw service-interaction records (correlations) and time-series points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationType {
    ServiceInteraction,
    MetricDatapoint,
    TraceSpan,
    AuditEvent,
    LogEntry,
}

impl CorrelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationType::ServiceInteraction => "service_interaction",
            CorrelationType::MetricDatapoint => "metric_datapoint",
            CorrelationType::TraceSpan => "trace_span",
            CorrelationType::AuditEvent => "audit_event",
            CorrelationType::LogEntry => "log_entry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "service_interaction" => Some(CorrelationType::ServiceInteraction),
            "metric_datapoint" => Some(CorrelationType::MetricDatapoint),
            "trace_span" => Some(CorrelationType::TraceSpan),
            "audit_event" => Some(CorrelationType::AuditEvent),
            "log_entry" => Some(CorrelationType::LogEntry),
            _ => None,
        }
    }
}

/// Outcome of the interaction, when one was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub success: bool,
    #[serde(default)]
    pub execution_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub span_name: String,
}

/// A row of the append-only correlation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCorrelation {
    pub correlation_id: String,
    pub correlation_type: CorrelationType,
    pub service_type: String,
    pub handler_name: String,
    pub action_type: String,
    #[serde(default)]
    pub request_data: Option<serde_json::Value>,
    #[serde(default)]
    pub response_data: Option<ResponseData>,
    #[serde(default)]
    pub trace_context: Option<TraceContext>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub consolidated: bool,
    #[serde(default)]
    pub summary_id: Option<String>,
}

impl ServiceCorrelation {
    pub fn new(
        correlation_id: impl Into<String>,
        correlation_type: CorrelationType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            correlation_type,
            service_type: String::new(),
            handler_name: String::new(),
            action_type: String::new(),
            request_data: None,
            response_data: None,
            trace_context: None,
            tags: HashMap::new(),
            timestamp,
            consolidated: false,
            summary_id: None,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|s| s.as_str())
    }

    /// String field from `request_data`, falling back to the tag of the same name.
    pub fn request_field(&self, key: &str) -> Option<&str> {
        self.request_data
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .or_else(|| self.tag(key))
    }
}

/// One time-series sample returned by `recall_timeseries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Id of the `tsdb_data` node the sample was read from
    #[serde(default)]
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub value: f64,
    pub correlation_type: CorrelationType,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}
