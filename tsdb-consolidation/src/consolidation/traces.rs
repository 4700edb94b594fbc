//! Trace spans -> `trace_summary`.
//!
//! Spans carry their context in tags: `task_id`, `thought_id`,
//! `component_type`, `thought_type`, `task_status`, `dma_type`,
//! `guardrail_type` and `violation`. Latency and outcome come from the
//! span's response data.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};

use crate::error::ConsolidationResult;
use crate::graph::{
    increment, percentile, ComponentStats, CorrelationType, ServiceCorrelation, SummaryHeader,
    SummaryKind, TaskTrace, ThoughtStep, TraceError, TraceSummary,
};
use crate::period::{Period, TimeRange};
use crate::store::GraphStore;

pub(crate) const SOURCE_TYPES: [CorrelationType; 1] = [CorrelationType::TraceSpan];

const HANDLER_COMPONENT: &str = "handler";

pub(crate) async fn load(
    store: &dyn GraphStore,
    range: &TimeRange,
) -> ConsolidationResult<Vec<ServiceCorrelation>> {
    Ok(store.correlations(&SOURCE_TYPES, range).await?)
}

pub(crate) async fn count_sources(store: &dyn GraphStore, range: &TimeRange) -> ConsolidationResult<usize> {
    Ok(store.count_correlations(&SOURCE_TYPES, range).await?)
}

fn component_stats(latencies: &mut [f64], failures: u64) -> ComponentStats {
    latencies.sort_by(|a, b| a.total_cmp(b));
    let calls = latencies.len() as u64;
    let avg = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<f64>() / latencies.len() as f64
    };
    ComponentStats {
        calls,
        failures,
        avg_latency_ms: avg,
        p95_latency_ms: percentile(latencies, 95.0),
        p99_latency_ms: percentile(latencies, 99.0),
    }
}

pub fn summarize(
    period: &Period,
    spans: &[ServiceCorrelation],
    created_at: DateTime<Utc>,
) -> Option<TraceSummary> {
    if spans.is_empty() {
        return None;
    }

    let mut ordered: Vec<&ServiceCorrelation> = spans.iter().collect();
    ordered.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.correlation_id.cmp(&b.correlation_id))
    });

    let mut tasks: BTreeMap<String, TaskTrace> = BTreeMap::new();
    let mut thoughts_by_type = BTreeMap::new();
    let mut typed_thoughts: HashSet<String> = HashSet::new();
    let mut seen_thoughts: HashSet<String> = HashSet::new();
    let mut latencies: BTreeMap<String, (Vec<f64>, u64)> = BTreeMap::new();
    let mut dma_decisions = BTreeMap::new();
    let mut guardrail_violations = BTreeMap::new();
    let mut errors = Vec::new();

    for span in ordered {
        let component = span.tag("component_type").unwrap_or("unknown").to_string();
        let task_id = span.tag("task_id").map(str::to_string);
        let thought_id = span.tag("thought_id").map(str::to_string);

        let entry = latencies.entry(component.clone()).or_default();
        let (latency, failed) = match &span.response_data {
            Some(resp) if resp.execution_time_ms.is_finite() => {
                (resp.execution_time_ms, !resp.success)
            }
            Some(resp) => (0.0, !resp.success),
            None => (0.0, false),
        };
        entry.0.push(latency);
        if failed {
            entry.1 += 1;
            let resp = span.response_data.as_ref();
            errors.push(TraceError {
                timestamp: span.timestamp,
                component: component.clone(),
                error_type: resp
                    .and_then(|r| r.error_type.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
                task_id: task_id.clone(),
                message: resp.and_then(|r| r.error_message.clone()),
            });
        }

        if let Some(thought) = &thought_id {
            seen_thoughts.insert(thought.clone());
            if let Some(kind) = span.tag("thought_type") {
                if typed_thoughts.insert(thought.clone()) {
                    increment(&mut thoughts_by_type, kind, 1);
                }
            }
        }
        if let Some(dma) = span.tag("dma_type") {
            increment(&mut dma_decisions, dma, 1);
        }
        if let Some(guardrail) = span.tag("guardrail_type") {
            if span.tag("violation") == Some("true") {
                increment(&mut guardrail_violations, guardrail, 1);
            }
        }

        let Some(task_id) = task_id else {
            continue;
        };
        let task = tasks.entry(task_id.clone()).or_insert_with(|| TaskTrace {
            task_id,
            status: "unknown".to_string(),
            thoughts: Vec::new(),
            first_seen: span.timestamp,
            last_seen: span.timestamp,
            processing_time_ms: 0.0,
        });
        task.last_seen = span.timestamp;
        if let Some(status) = span.tag("task_status") {
            task.status = status.to_string();
        }
        if let Some(thought) = thought_id {
            let idx = match task.thoughts.iter().position(|t| t.thought_id == thought) {
                Some(idx) => idx,
                None => {
                    task.thoughts.push(ThoughtStep {
                        thought_id: thought,
                        handler_action: None,
                    });
                    task.thoughts.len() - 1
                }
            };
            if component == HANDLER_COMPONENT && !span.action_type.is_empty() {
                task.thoughts[idx].handler_action = Some(span.action_type.clone());
            }
        }
    }

    let mut tasks_by_status = BTreeMap::new();
    let mut processing_times = Vec::with_capacity(tasks.len());
    let mut depths = Vec::with_capacity(tasks.len());
    for task in tasks.values_mut() {
        task.processing_time_ms = (task.last_seen - task.first_seen).num_milliseconds() as f64;
        increment(&mut tasks_by_status, task.status.clone(), 1);
        processing_times.push(task.processing_time_ms);
        depths.push(task.thoughts.len());
    }
    processing_times.sort_by(|a, b| a.total_cmp(b));

    let avg_task_processing_time_ms = if processing_times.is_empty() {
        0.0
    } else {
        processing_times.iter().sum::<f64>() / processing_times.len() as f64
    };
    let avg_trace_depth = if depths.is_empty() {
        0.0
    } else {
        depths.iter().sum::<usize>() as f64 / depths.len() as f64
    };

    let component_stats = latencies
        .into_iter()
        .map(|(name, (mut samples, failures))| (name, component_stats(&mut samples, failures)))
        .collect();

    Some(TraceSummary {
        header: SummaryHeader::basic(SummaryKind::Traces, period, created_at),
        total_tasks_processed: tasks.len(),
        tasks_by_status,
        task_summaries: tasks,
        total_thoughts_processed: seen_thoughts.len(),
        thoughts_by_type,
        component_stats,
        dma_decisions,
        guardrail_violations,
        avg_task_processing_time_ms,
        p50_task_processing_time_ms: percentile(&processing_times, 50.0),
        p95_task_processing_time_ms: percentile(&processing_times, 95.0),
        p99_task_processing_time_ms: percentile(&processing_times, 99.0),
        avg_trace_depth,
        max_trace_depth: depths.iter().copied().max().unwrap_or(0),
        errors,
        source_correlation_count: spans.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResponseData;
    use chrono::{Duration, TimeZone};

    fn period() -> Period {
        Period::containing(Utc.with_ymd_and_hms(2025, 7, 14, 18, 0, 0).unwrap())
    }

    fn span(
        id: &str,
        second: i64,
        task: &str,
        thought: &str,
        component: &str,
        latency: f64,
        ok: bool,
    ) -> ServiceCorrelation {
        let mut c = ServiceCorrelation::new(
            id,
            CorrelationType::TraceSpan,
            period().start + Duration::seconds(second),
        );
        c.tags.insert("task_id".into(), task.into());
        c.tags.insert("thought_id".into(), thought.into());
        c.tags.insert("component_type".into(), component.into());
        c.response_data = Some(ResponseData {
            success: ok,
            execution_time_ms: latency,
            error_type: if ok { None } else { Some("Timeout".into()) },
            error_message: None,
        });
        c
    }

    #[test]
    fn test_task_entries_and_depth() {
        let mut handler = span("s3", 5, "t1", "th2", "handler", 30.0, true);
        handler.action_type = "speak".into();
        handler.tags.insert("task_status".into(), "completed".into());
        let spans = vec![
            span("s1", 0, "t1", "th1", "dma", 10.0, true),
            span("s2", 2, "t1", "th2", "dma", 20.0, true),
            handler,
            span("s4", 1, "t2", "th3", "guardrail", 5.0, false),
        ];

        let summary = summarize(&period(), &spans, period().end).unwrap();
        assert_eq!(summary.total_tasks_processed, 2);
        assert_eq!(summary.total_thoughts_processed, 3);
        let t1 = &summary.task_summaries["t1"];
        assert_eq!(t1.status, "completed");
        assert_eq!(t1.thoughts.len(), 2);
        assert_eq!(t1.thoughts[1].handler_action.as_deref(), Some("speak"));
        assert_eq!(t1.processing_time_ms, 5000.0);
        assert_eq!(summary.max_trace_depth, 2);
        assert_eq!(summary.avg_trace_depth, 1.5);
        assert_eq!(summary.tasks_by_status.get("unknown"), Some(&1));

        assert_eq!(summary.component_stats["dma"].calls, 2);
        assert_eq!(summary.component_stats["guardrail"].failures, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].error_type, "Timeout");
    }

    #[test]
    fn test_component_latency_percentiles() {
        let spans: Vec<ServiceCorrelation> = (1..=100)
            .map(|i| span(&format!("s{}", i), i, "t1", "th1", "llm", i as f64, true))
            .collect();
        let summary = summarize(&period(), &spans, period().end).unwrap();
        let llm = &summary.component_stats["llm"];
        assert_eq!(llm.p95_latency_ms, 95.0);
        assert_eq!(llm.p99_latency_ms, 99.0);
        assert_eq!(llm.avg_latency_ms, 50.5);
    }

    #[test]
    fn test_dma_and_guardrail_tallies() {
        let mut a = span("s1", 0, "t1", "th1", "dma", 1.0, true);
        a.tags.insert("dma_type".into(), "ethical".into());
        let mut b = span("s2", 1, "t1", "th1", "guardrail", 1.0, true);
        b.tags.insert("guardrail_type".into(), "entropy".into());
        b.tags.insert("violation".into(), "true".into());
        let mut c = span("s3", 2, "t1", "th1", "guardrail", 1.0, true);
        c.tags.insert("guardrail_type".into(), "coherence".into());
        c.tags.insert("violation".into(), "false".into());

        let summary = summarize(&period(), &[a, b, c], period().end).unwrap();
        assert_eq!(summary.dma_decisions.get("ethical"), Some(&1));
        assert_eq!(summary.guardrail_violations.get("entropy"), Some(&1));
        assert!(summary.guardrail_violations.get("coherence").is_none());
    }
}
