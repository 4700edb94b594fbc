//! Metric datapoints -> `tsdb_summary`.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::ConsolidationResult;
use crate::graph::{
    increment, success_rate, CorrelationType, DataPoint, GraphScope, MetricAggregate,
    MetricSummary, ResourceTotals, SummaryHeader, SummaryKind,
};
use crate::period::{Period, TimeRange};
use crate::store::GraphStore;

const SOURCE_TYPES: [CorrelationType; 1] = [CorrelationType::MetricDatapoint];

pub(crate) async fn load(store: &dyn GraphStore, range: &TimeRange) -> ConsolidationResult<Vec<DataPoint>> {
    Ok(store
        .recall_timeseries(GraphScope::Local, range, &SOURCE_TYPES)
        .await?)
}

/// Live number of datapoints in `range`, compared against `source_node_count`.
pub(crate) async fn count_sources(store: &dyn GraphStore, range: &TimeRange) -> ConsolidationResult<usize> {
    Ok(load(store, range).await?.len())
}

/// `action.<type>.count` -> `<type>`
fn action_type_of(metric_name: &str) -> Option<&str> {
    metric_name
        .strip_prefix("action.")
        .and_then(|rest| rest.strip_suffix(".count"))
        .filter(|t| !t.is_empty())
}

fn accumulate_resources(totals: &mut ResourceTotals, metric_name: &str, value: f64) {
    let name = metric_name.to_ascii_lowercase();
    if name.contains("tokens") {
        totals.total_tokens += value.max(0.0).round() as u64;
    } else if name.contains("cost") {
        totals.total_cost_cents += value;
    } else if name.contains("carbon") {
        totals.total_carbon_grams += value;
    } else if name.contains("energy") {
        totals.total_energy_kwh += value;
    }
}

/// Fold one window's datapoints into a summary. `None` when there is nothing to fold.
pub fn summarize(
    period: &Period,
    points: &[DataPoint],
    created_at: DateTime<Utc>,
) -> Option<MetricSummary> {
    if points.is_empty() {
        return None;
    }

    let mut metrics: BTreeMap<String, MetricAggregate> = BTreeMap::new();
    let mut resources = ResourceTotals::default();
    let mut action_counts = BTreeMap::new();
    let mut error_count = 0u64;

    for point in points {
        if !point.value.is_finite() {
            warn!(
                "Skipping non-finite value for metric {} at {}",
                point.metric_name, point.timestamp
            );
            continue;
        }
        metrics
            .entry(point.metric_name.clone())
            .and_modify(|agg| agg.push(point.value))
            .or_insert_with(|| MetricAggregate::from_value(point.value));

        accumulate_resources(&mut resources, &point.metric_name, point.value);

        if let Some(action) = action_type_of(&point.metric_name) {
            increment(&mut action_counts, action, point.value.max(0.0).round() as u64);
        } else if point.metric_name.to_ascii_lowercase().contains("error") {
            error_count += point.value.max(0.0).round() as u64;
        }
    }

    if metrics.is_empty() {
        debug!("No usable datapoints in {}", period);
        return None;
    }

    let total_operations: u64 = action_counts.values().sum();
    Some(MetricSummary {
        header: SummaryHeader::basic(SummaryKind::Metrics, period, created_at),
        metrics,
        resources,
        action_counts,
        total_operations,
        error_count,
        success_rate: success_rate(total_operations, error_count),
        source_node_count: points.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn period() -> Period {
        Period::containing(Utc.with_ymd_and_hms(2025, 7, 14, 6, 0, 0).unwrap())
    }

    fn point(name: &str, value: f64, minute: i64) -> DataPoint {
        DataPoint {
            node_id: format!("dp-{}", minute),
            timestamp: period().start + Duration::minutes(minute),
            metric_name: name.to_string(),
            value,
            correlation_type: CorrelationType::MetricDatapoint,
            tags: HashMap::new(),
        }
    }

    #[test]
    fn test_every_metric_name_gets_one_entry() {
        let names = ["cpu.load", "mem.used", "llm.latency", "queue.depth"];
        let points: Vec<DataPoint> = (0..22)
            .map(|i| point(names[i % names.len()], i as f64, i as i64))
            .collect();

        let summary = summarize(&period(), &points, period().end).unwrap();
        assert_eq!(summary.metrics.len(), names.len());
        let total: u64 = summary.metrics.values().map(|a| a.count).sum();
        assert_eq!(total, 22);
        assert_eq!(summary.source_node_count, 22);
    }

    #[test]
    fn test_action_counts_drive_success_rate() {
        let points = vec![
            point("action.speak.count", 6.0, 1),
            point("action.tool.count", 4.0, 2),
            point("handler.error.count", 2.0, 3),
            point("llm.tokens.total", 1200.0, 4),
            point("llm.cost.cents", 3.5, 5),
            point("llm.carbon.grams", 0.4, 6),
            point("llm.energy.kwh", 0.01, 7),
        ];
        let summary = summarize(&period(), &points, period().end).unwrap();
        assert_eq!(summary.total_operations, 10);
        assert_eq!(summary.error_count, 2);
        assert!((summary.success_rate - 0.8).abs() < 1e-9);
        assert_eq!(summary.action_counts.get("speak"), Some(&6));
        assert_eq!(summary.resources.total_tokens, 1200);
        assert!((summary.resources.total_cost_cents - 3.5).abs() < 1e-9);
        assert!((summary.resources.total_energy_kwh - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_no_operations_means_full_success() {
        let summary = summarize(&period(), &[point("cpu.load", 0.5, 0)], period().end).unwrap();
        assert_eq!(summary.total_operations, 0);
        assert_eq!(summary.success_rate, 1.0);
    }

    #[test]
    fn test_non_finite_values_are_skipped() {
        let points = vec![point("cpu.load", f64::NAN, 0), point("cpu.load", 2.0, 1)];
        let summary = summarize(&period(), &points, period().end).unwrap();
        assert_eq!(summary.metrics["cpu.load"].count, 1);
        assert_eq!(summary.source_node_count, 2);
        assert!(summarize(&period(), &[], period().end).is_none());
    }
}
