//! Query filters understood by the event store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive `[start, end]` timestamp window; either side may be open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Everything at or after `start`
    pub fn since(start: DateTime<Utc>) -> Self {
        Self { start: Some(start), end: None }
    }

    /// Closed window
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start: Some(start), end: Some(end) }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| ts >= start) && self.end.map_or(true, |end| ts <= end)
    }
}

/// Result ordering by timestamp (ties broken by id in the same direction)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Offset/limit paging; `limit: None` returns every match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit: Some(limit) }
    }

    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit: Some(limit) }
    }

    pub fn all() -> Self {
        Self::default()
    }
}

/// Filters for usage events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageEventQuery {
    pub session_id: Option<String>,
    pub event_type: Option<String>,
    pub tool_name: Option<String>,
    pub range: TimeRange,
    pub order: Order,
    pub page: Page,
}

impl UsageEventQuery {
    pub fn in_range(range: TimeRange) -> Self {
        Self { range, ..Default::default() }
    }
}

/// Filters for performance metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricQuery {
    pub metric_name: Option<String>,
    pub session_id: Option<String>,
    pub range: TimeRange,
    pub order: Order,
    pub page: Page,
}

/// Filters for error logs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorLogQuery {
    pub session_id: Option<String>,
    pub error_type: Option<String>,
    pub resolved: Option<bool>,
    pub range: TimeRange,
    pub order: Order,
    pub page: Page,
}

impl ErrorLogQuery {
    pub fn in_range(range: TimeRange) -> Self {
        Self { range, ..Default::default() }
    }
}

/// Filters for cost entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostQuery {
    pub service_name: Option<String>,
    pub session_id: Option<String>,
    pub range: TimeRange,
    pub order: Order,
    pub page: Page,
}

/// Filters for sessions; ordering and range apply to `created_at`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionQuery {
    /// `Some(true)` keeps only sessions without `ended_at`
    pub open: Option<bool>,
    pub range: TimeRange,
    pub order: Order,
    pub page: Page,
}
