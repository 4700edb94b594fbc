//! Service interactions -> `conversation_summary`.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::ConsolidationResult;
use crate::graph::{
    increment, success_rate, ConversationMessage, ConversationSummary, CorrelationType,
    Participant, ServiceCorrelation, SummaryHeader, SummaryKind,
};
use crate::period::{Period, TimeRange};
use crate::store::GraphStore;

pub(crate) const SOURCE_TYPES: [CorrelationType; 1] = [CorrelationType::ServiceInteraction];

pub(crate) async fn load(
    store: &dyn GraphStore,
    range: &TimeRange,
) -> ConsolidationResult<Vec<ServiceCorrelation>> {
    Ok(store.correlations(&SOURCE_TYPES, range).await?)
}

pub(crate) async fn count_sources(store: &dyn GraphStore, range: &TimeRange) -> ConsolidationResult<usize> {
    Ok(store.count_correlations(&SOURCE_TYPES, range).await?)
}

fn or_unknown(s: &str) -> String {
    if s.is_empty() {
        "unknown".to_string()
    } else {
        s.to_string()
    }
}

pub fn summarize(
    period: &Period,
    interactions: &[ServiceCorrelation],
    created_at: DateTime<Utc>,
) -> Option<ConversationSummary> {
    if interactions.is_empty() {
        return None;
    }

    let mut ordered: Vec<&ServiceCorrelation> = interactions.iter().collect();
    ordered.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.correlation_id.cmp(&b.correlation_id))
    });

    let mut by_channel: BTreeMap<String, Vec<ConversationMessage>> = BTreeMap::new();
    let mut participants: BTreeMap<String, Participant> = BTreeMap::new();
    let mut action_counts = BTreeMap::new();
    let mut service_calls = BTreeMap::new();
    let mut total_processing_time_ms = 0.0;
    let mut timed_interactions = 0u64;
    let mut error_count = 0u64;
    let mut total_interactions = 0u64;

    for c in ordered {
        let Some(channel) = c.request_field("channel_id") else {
            warn!("Interaction {} has no channel_id, skipping", c.correlation_id);
            continue;
        };

        let (success, execution_time_ms) = match &c.response_data {
            Some(resp) => {
                timed_interactions += 1;
                let elapsed = if resp.execution_time_ms.is_finite() {
                    resp.execution_time_ms
                } else {
                    0.0
                };
                total_processing_time_ms += elapsed;
                (resp.success, elapsed)
            }
            None => (true, 0.0),
        };
        if !success {
            error_count += 1;
        }
        total_interactions += 1;

        increment(&mut action_counts, or_unknown(&c.action_type), 1);
        increment(&mut service_calls, or_unknown(&c.service_type), 1);

        let author_id = c.request_field("author_id").map(str::to_string);
        let author_name = c.request_field("author_name").map(str::to_string);
        if let Some(id) = &author_id {
            let p = participants.entry(id.clone()).or_insert(Participant {
                message_count: 0,
                author_name: None,
            });
            p.message_count += 1;
            if p.author_name.is_none() {
                p.author_name = author_name.clone();
            }
        }

        by_channel
            .entry(channel.to_string())
            .or_default()
            .push(ConversationMessage {
                timestamp: c.timestamp,
                correlation_id: c.correlation_id.clone(),
                action_type: c.action_type.clone(),
                author_id,
                author_name,
                content: c.request_field("content").map(str::to_string),
                execution_time_ms,
                success,
            });
    }

    let avg_response_time_ms = if timed_interactions > 0 {
        total_processing_time_ms / timed_interactions as f64
    } else {
        0.0
    };

    Some(ConversationSummary {
        header: SummaryHeader::basic(SummaryKind::Conversations, period, created_at),
        conversations_by_channel: by_channel,
        total_interactions,
        unique_users: participants.len(),
        participants,
        action_counts,
        service_calls,
        avg_response_time_ms,
        total_processing_time_ms,
        timed_interactions,
        error_count,
        success_rate: success_rate(total_interactions, error_count),
        source_correlation_count: interactions.len(),
    })
}
