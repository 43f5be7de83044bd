//! # Analytics Views
//!
//! Derived, never-persisted results returned by the aggregation and session operations.

use chrono::{DateTime, Utc};
use persistence::{ErrorLog, PerformanceMetric, Session, UsageEvent};
use serde::{Deserialize, Serialize};

/// Near-real-time view over fixed windows ending at `timestamp`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub timestamp: DateTime<Utc>,
    /// Usage events in the last 60 seconds
    pub requests_per_minute: u64,
    /// Mean response time over the last hour (ms)
    pub average_response_time: f64,
    /// Percent of successful events over the last hour
    pub success_rate: f64,
    /// Sessions without `ended_at`
    pub active_sessions: u64,
    /// Cost since midnight UTC
    pub total_cost_today: f64,
    /// Up to 3 error types by frequency over the last hour
    pub top_errors: Vec<String>,
}

/// Usage count for one tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub tool_name: String,
    pub usage_count: u64,
}

/// Statistics over a caller-supplied window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_requests: u64,
    pub success_rate: f64,
    pub average_response_time_ms: f64,
    pub total_costs_usd: f64,
    /// Global open-session count, not windowed
    pub active_sessions: u64,
    pub error_rate: f64,
    pub top_tools: Vec<ToolUsage>,
    /// Latest error logs regardless of the window
    pub recent_errors: Vec<ErrorLog>,
}

/// Cost totals for a window and optional service
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub total_requests: u64,
}

/// A session with its recent activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session: Session,
    /// Newest first
    pub recent_events: Vec<UsageEvent>,
    /// Latest metrics across all sessions; metrics are not filtered by session here
    pub recent_metrics: Vec<PerformanceMetric>,
}
