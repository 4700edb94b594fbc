//! Profound consolidation: in-place compression of old daily summaries.
//!
//! Works on the attribute map rather than the typed structs, since the
//! compressed shape intentionally drops fields. Compressed nodes decode as
//! [`crate::graph::TypedNode::Generic`] afterwards.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{CompressionConfig, ConsolidationConfig};
use crate::error::ConsolidationResult;
use crate::graph::{Attributes, GraphNode, SummaryKind};
use crate::period::Day;
use crate::store::{GraphStore, MemoryQuery};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Attributes removed outright.
const VERBOSE_FIELDS: &[&str] = &["task_summaries", "debug_info", "raw_data", "metadata", "messages"];

/// Segment abbreviations applied to metric keys.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("action", "act"),
    ("average", "avg"),
    ("count", "cnt"),
    ("error", "err"),
    ("latency", "lat"),
    ("memory", "mem"),
    ("request", "req"),
    ("response", "resp"),
    ("service", "svc"),
    ("tokens", "tok"),
    ("total", "tot"),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionReport {
    pub summaries_compressed: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
    pub basic_summaries_deleted: usize,
    pub skipped_under_target: usize,
}

impl CompressionReport {
    pub fn overall_ratio(&self) -> f64 {
        if self.bytes_before == 0 {
            0.0
        } else {
            1.0 - self.bytes_after as f64 / self.bytes_before as f64
        }
    }
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Round every non-integer number in `value`.
fn round_values(value: &mut Value, precision: u32) {
    match value {
        Value::Number(n) if n.is_f64() => {
            if let Some(rounded) = n
                .as_f64()
                .map(|f| round_to(f, precision))
                .and_then(serde_json::Number::from_f64)
            {
                *n = rounded;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| round_values(v, precision)),
        Value::Object(map) => map.values_mut().for_each(|v| round_values(v, precision)),
        _ => {}
    }
}

pub fn abbreviate_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut segment = String::new();
    let flush = |segment: &mut String, out: &mut String| {
        let short = ABBREVIATIONS
            .iter()
            .find(|(long, _)| *long == segment.as_str())
            .map(|(_, s)| *s)
            .unwrap_or(segment.as_str());
        out.push_str(short);
        segment.clear();
    };
    for ch in key.chars() {
        if ch == '.' || ch == '_' {
            flush(&mut segment, &mut out);
            out.push(ch);
        } else {
            segment.push(ch);
        }
    }
    flush(&mut segment, &mut out);
    out
}

fn truncate_name(name: &str, max: usize) -> String {
    name.chars().take(max).collect()
}

fn is_significant(aggregate: &Value, config: &CompressionConfig) -> bool {
    let count = aggregate.get("count").and_then(Value::as_u64).unwrap_or(0);
    let sum = aggregate.get("sum").and_then(Value::as_f64).unwrap_or(0.0);
    count > config.significance_min_count || sum > config.significance_min_sum
}

fn compress_metrics(attrs: &mut Attributes, config: &CompressionConfig) {
    let Some(Value::Object(metrics)) = attrs.remove("metrics") else {
        return;
    };
    let mut kept = Map::new();
    for (name, aggregate) in metrics {
        if !is_significant(&aggregate, config) {
            continue;
        }
        let short = abbreviate_key(&name);
        let key = if kept.contains_key(&short) { name } else { short };
        kept.insert(key, aggregate);
    }
    attrs.insert("metrics".to_string(), Value::Object(kept));
}

fn compress_conversations(attrs: &mut Attributes, config: &CompressionConfig) {
    if let Some(Value::Object(channels)) = attrs.remove("conversations_by_channel") {
        let counts: Map<String, Value> = channels
            .into_iter()
            .map(|(channel, messages)| {
                let n = messages.as_array().map(|m| m.len()).unwrap_or(0);
                (channel, Value::from(n))
            })
            .collect();
        attrs.insert("channel_message_counts".to_string(), Value::Object(counts));
    }
    if let Some(Value::Object(participants)) = attrs.remove("participants") {
        let compact: Map<String, Value> = participants
            .into_iter()
            .map(|(id, p)| {
                let mut entry = Map::new();
                entry.insert(
                    "msg_count".to_string(),
                    p.get("message_count").cloned().unwrap_or(Value::from(0)),
                );
                if let Some(name) = p.get("author_name").and_then(Value::as_str) {
                    entry.insert(
                        "name".to_string(),
                        Value::String(truncate_name(name, config.max_display_name_len)),
                    );
                }
                (id, Value::Object(entry))
            })
            .collect();
        attrs.insert("participants".to_string(), Value::Object(compact));
    }
}

fn compress_errors(attrs: &mut Attributes) {
    let Some(Value::Array(errors)) = attrs.remove("errors") else {
        return;
    };
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for e in &errors {
        let t = e
            .get("error_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        *counts.entry(t.to_string()).or_insert(0) += 1;
    }
    let map: Map<String, Value> = counts.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
    attrs.insert("error_counts".to_string(), Value::Object(map));
}

fn drop_duplicate_timestamps(attrs: &mut Attributes) {
    for (dup, canonical) in [("start_time", "period_start"), ("end_time", "period_end")] {
        if attrs.contains_key(canonical) {
            attrs.remove(dup);
        }
    }
}

/// Compress one summary node. Returns `None` when the node is already
/// compressed.
pub fn compress_node(node: &GraphNode, config: &CompressionConfig, now: DateTime<Utc>, updated_by: &str) -> Option<(GraphNode, usize, usize)> {
    if node.attributes.get("profound_compressed").and_then(Value::as_bool) == Some(true) {
        return None;
    }
    let before = node.attributes_size();
    let mut attrs = node.attributes.clone();

    compress_metrics(&mut attrs, config);
    compress_conversations(&mut attrs, config);
    compress_errors(&mut attrs);
    drop_duplicate_timestamps(&mut attrs);
    for field in VERBOSE_FIELDS {
        attrs.remove(*field);
    }
    let mut wrapped = Value::Object(attrs);
    round_values(&mut wrapped, config.value_precision);
    let Value::Object(mut attrs) = wrapped else {
        return None;
    };

    let after = serde_json::to_vec(&attrs).map(|v| v.len()).unwrap_or(before);
    let ratio = if before == 0 {
        0.0
    } else {
        round_to(1.0 - after as f64 / before as f64, 4)
    };
    attrs.insert("profound_compressed".to_string(), Value::Bool(true));
    attrs.insert("compressed_at".to_string(), Value::String(now.to_rfc3339()));
    attrs.insert("compression_ratio".to_string(), Value::from(ratio));

    let mut compressed = node.clone();
    compressed.attributes = attrs;
    compressed.version = node.version + 1;
    compressed.updated_by = updated_by.to_string();
    compressed.updated_at = now;
    Some((compressed, before, after))
}

pub struct SummaryCompressor {
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    config: CompressionConfig,
    updated_by: String,
}

impl SummaryCompressor {
    pub fn new(store: Arc<dyn GraphStore>, clock: Arc<dyn Clock>, config: &ConsolidationConfig) -> Self {
        Self {
            store,
            clock,
            config: config.compression.clone(),
            updated_by: config.updated_by.clone(),
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> ConsolidationResult<CompressionReport> {
        let mut report = CompressionReport::default();
        let cutoff = now - Duration::days(self.config.compression_age_days);
        let dailies = self.daily_summaries().await?;

        // (year, month) -> candidate nodes
        let mut by_month: BTreeMap<(i32, u32), Vec<&GraphNode>> = BTreeMap::new();
        for node in &dailies {
            let compressed = node.attributes.get("profound_compressed").and_then(Value::as_bool) == Some(true);
            match node.attr_datetime("period_end") {
                Some(end) if end <= cutoff && !compressed => {
                    let start = node.event_time();
                    by_month.entry((start.year(), start.month())).or_default().push(node);
                }
                _ => {}
            }
        }

        for ((year, month), nodes) in by_month {
            let total_bytes: usize = nodes.iter().map(|n| n.attributes_size()).sum();
            let days: HashSet<Day> = nodes.iter().map(|n| Day::containing(n.event_time())).collect();
            let mb_per_day = total_bytes as f64 / BYTES_PER_MB / days.len().max(1) as f64;
            if mb_per_day < self.config.target_mb_per_day {
                debug!(
                    "{}-{:02} averages {:.4} MB/day, under target {:.2}; skipping",
                    year, month, mb_per_day, self.config.target_mb_per_day
                );
                report.skipped_under_target += nodes.len();
                continue;
            }
            for node in nodes {
                self.compress_one(node, &mut report).await;
            }
        }

        report.basic_summaries_deleted = self.delete_superseded_basics(&dailies, now).await?;

        if report.summaries_compressed > 0 || report.basic_summaries_deleted > 0 {
            info!(
                "Compressed {} summaries ({} -> {} bytes), removed {} basic summaries",
                report.summaries_compressed,
                report.bytes_before,
                report.bytes_after,
                report.basic_summaries_deleted
            );
        }
        Ok(report)
    }

    async fn compress_one(&self, node: &GraphNode, report: &mut CompressionReport) {
        let Some((compressed, before, after)) =
            compress_node(node, &self.config, self.clock.now(), &self.updated_by)
        else {
            return;
        };
        let result = self.store.memorize(&compressed).await;
        if result.is_ok() {
            report.summaries_compressed += 1;
            report.bytes_before += before;
            report.bytes_after += after;
        } else {
            warn!(
                "Failed to write compressed {}: {}",
                node.id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    async fn daily_summaries(&self) -> ConsolidationResult<Vec<GraphNode>> {
        let mut out = Vec::new();
        for kind in SummaryKind::ALL {
            let nodes = self
                .store
                .recall(&MemoryQuery::by_type(kind.node_type()))
                .await?;
            out.extend(
                nodes
                    .into_iter()
                    .filter(|n| n.attr_str("consolidation_level") == Some("extensive")),
            );
        }
        Ok(out)
    }

    /// Remove the basic summaries of every day whose rollup ended more than
    /// `basic_cleanup_age_days` ago.
    async fn delete_superseded_basics(&self, dailies: &[GraphNode], now: DateTime<Utc>) -> ConsolidationResult<usize> {
        let cutoff = now - Duration::days(self.config.basic_cleanup_age_days);
        let mut deleted = 0;
        for daily in dailies {
            let Some(kind) = SummaryKind::from_node_type(&daily.node_type) else {
                continue;
            };
            match daily.attr_datetime("period_end") {
                Some(end) if end <= cutoff => {}
                _ => continue,
            }
            let day = Day::containing(daily.event_time());
            for period in day.periods() {
                let id = kind.basic_id(&period);
                for basic in self.store.recall(&MemoryQuery::by_id(&id)).await? {
                    if basic.node_type != kind.node_type() {
                        continue;
                    }
                    let result = self.store.forget(&basic).await;
                    if result.is_ok() {
                        deleted += 1;
                    } else {
                        warn!(
                            "Failed to delete superseded {}: {}",
                            id,
                            result.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
            }
        }
        Ok(deleted)
    }
}
