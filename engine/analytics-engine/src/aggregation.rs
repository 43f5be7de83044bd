//! # Metrics Aggregation
//!
//! Windowed statistics computed on demand from the event store. Nothing is accumulated between
//! calls, so every result reflects exactly what the store held when it was asked.

use crate::analytics::{AnalyticsSummary, CostSummary, DashboardMetrics, ToolUsage};
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use persistence::{
    CostEntry, CostQuery, ErrorLogQuery, EventStore, Order, Page, TimeRange, UsageEvent,
    UsageEventQuery,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Default look-back of a summary without an explicit start
pub const SUMMARY_DEFAULT_DAYS: i64 = 7;
pub const TOP_TOOLS: usize = 5;
pub const TOP_ERRORS: usize = 3;
pub const RECENT_ERRORS: usize = 5;

/// Metrics aggregator over an event store
#[derive(Clone)]
pub struct MetricsAggregator {
    store: Arc<dyn EventStore>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Summary over `[start, end]`, defaulting to the last 7 days ending at `now`
    pub async fn summary_at(
        &self,
        now: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<AnalyticsSummary> {
        let start = start.unwrap_or(now - Duration::days(SUMMARY_DEFAULT_DAYS));
        let end = end.unwrap_or(now);
        let range = TimeRange::between(start, end);

        let events = self.events_in(range).await?;
        let costs = self.store.query_cost_entries(&oldest_first_costs(range, None)).await?;
        let error_count = self
            .store
            .query_error_logs(&ErrorLogQuery::in_range(range))
            .await?
            .len() as u64;
        let active_sessions = self.store.count_open_sessions().await? as u64;
        let recent_errors = self
            .store
            .query_error_logs(&ErrorLogQuery {
                page: Page::first(RECENT_ERRORS),
                ..Default::default()
            })
            .await?;

        let total_requests = events.len() as u64;
        let successful = events.iter().filter(|e| e.success).count() as u64;

        Ok(AnalyticsSummary {
            total_requests,
            success_rate: round2(percentage(successful, total_requests)),
            average_response_time_ms: round2(average_response_time(&events)),
            total_costs_usd: round2(total_cost(&costs)),
            active_sessions,
            // Error logs are counted independently of events, so the ratio is capped
            error_rate: round2(percentage(error_count, total_requests).min(100.0)),
            top_tools: top_tools(&events, TOP_TOOLS),
            recent_errors,
        })
    }

    /// Dashboard metrics over fixed windows ending at `now`
    pub async fn dashboard_metrics_at(&self, now: DateTime<Utc>) -> Result<DashboardMetrics> {
        let last_hour = TimeRange::since(now - Duration::hours(1));
        let minute_ago = now - Duration::minutes(1);

        let hour_events = self.events_in(last_hour).await?;
        let requests_per_minute =
            hour_events.iter().filter(|e| e.timestamp >= minute_ago).count() as u64;
        let successful = hour_events.iter().filter(|e| e.success).count() as u64;

        let today = TimeRange::since(start_of_day(now));
        let costs_today = self.store.query_cost_entries(&oldest_first_costs(today, None)).await?;

        let hour_errors = self
            .store
            .query_error_logs(&ErrorLogQuery {
                range: last_hour,
                order: Order::OldestFirst,
                ..Default::default()
            })
            .await?;
        let top_errors = rank_by_count(hour_errors.iter().map(|e| e.error_type.as_str()), TOP_ERRORS)
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        Ok(DashboardMetrics {
            timestamp: now,
            requests_per_minute,
            average_response_time: round2(average_response_time(&hour_events)),
            success_rate: round2(percentage(successful, hour_events.len() as u64)),
            active_sessions: self.store.count_open_sessions().await? as u64,
            total_cost_today: round2(total_cost(&costs_today)),
            top_errors,
        })
    }

    /// Cost totals in `[start, end]` (either side open), optionally for one service
    pub async fn cost_summary(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        service_name: Option<&str>,
    ) -> Result<CostSummary> {
        let range = TimeRange::new(start, end);
        let entries = self.store.query_cost_entries(&oldest_first_costs(range, service_name)).await?;

        Ok(CostSummary {
            total_cost_usd: round2(total_cost(&entries)),
            total_tokens: entries.iter().filter_map(|e| e.tokens_used).sum(),
            total_requests: entries.len() as u64,
        })
    }

    async fn events_in(&self, range: TimeRange) -> Result<Vec<UsageEvent>> {
        let query = UsageEventQuery { range, order: Order::OldestFirst, ..Default::default() };
        Ok(self.store.query_usage_events(&query).await?)
    }
}

fn oldest_first_costs(range: TimeRange, service_name: Option<&str>) -> CostQuery {
    CostQuery {
        service_name: service_name.map(str::to_string),
        range,
        order: Order::OldestFirst,
        ..Default::default()
    }
}

/// Round to 2 decimal places
pub fn round2(value: f64) -> f64 {
    // Adding +0.0 turns a negative zero into a positive one
    (value * 100.0).round() / 100.0 + 0.0
}

/// `100 * part / whole`, or 0 when `whole` is 0
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

/// Mean of the response times that are present, regardless of success; 0 if none
pub fn average_response_time(events: &[UsageEvent]) -> f64 {
    let (sum, count) = events
        .iter()
        .filter_map(|e| e.response_time_ms)
        .fold((0u128, 0u64), |(sum, count), ms| (sum + ms as u128, count + 1));

    if count == 0 {
        return 0.0;
    }
    sum as f64 / count as f64
}

pub fn total_cost(entries: &[CostEntry]) -> f64 {
    entries.iter().fold(0.0, |total, e| total + e.cost_usd)
}

/// Tool usage ranked by count; null tool names are skipped
pub fn top_tools(events: &[UsageEvent], limit: usize) -> Vec<ToolUsage> {
    rank_by_count(events.iter().filter_map(|e| e.tool_name.as_deref()), limit)
        .into_iter()
        .map(|(tool_name, usage_count)| ToolUsage { tool_name, usage_count })
        .collect()
}

/// Distinct values by descending count; equal counts keep first-seen order
pub fn rank_by_count<'a>(values: impl Iterator<Item = &'a str>, limit: usize) -> Vec<(String, u64)> {
    let mut counts: HashMap<&str, (u64, usize)> = HashMap::new();
    for (position, value) in values.enumerate() {
        counts.entry(value).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(&str, u64, usize)> =
        counts.into_iter().map(|(value, (count, first))| (value, count, first)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    ranked.into_iter().take(limit).map(|(value, count, _)| (value.to_string(), count)).collect()
}

/// Midnight UTC of the day containing `now`
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_hms_opt(0, 0, 0).map(|midnight| midnight.and_utc()).unwrap_or(now)
}
