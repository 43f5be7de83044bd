//! Stored record types
//!
//! Usage events, performance metrics, error logs and cost entries are immutable once written
//! (apart from the error resolution flags). Sessions are the only records updated in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open-schema key/value payload attached to records
pub type Metadata = serde_json::Map<String, serde_json::Value>;

fn default_success() -> bool {
    true
}

/// A single tool invocation or request observed by the MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    /// tool_call, webhook, error, ...
    pub event_type: String,
    pub tool_name: Option<String>,
    pub response_time_ms: Option<u64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Option<Metadata>,
}

/// Payload for recording a usage event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewUsageEvent {
    /// Defaults to the time of insertion
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub response_time_ms: Option<u64>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl NewUsageEvent {
    /// Start a successful event of the given type
    pub fn new(event_type: impl Into<String>) -> Self {
        Self { event_type: event_type.into(), success: true, ..Default::default() }
    }

    pub(crate) fn into_record(self, id: u64, timestamp: DateTime<Utc>) -> UsageEvent {
        UsageEvent {
            id,
            timestamp,
            session_id: self.session_id,
            event_type: self.event_type,
            tool_name: self.tool_name,
            response_time_ms: self.response_time_ms,
            success: self.success,
            error_message: self.error_message,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            metadata: self.metadata,
        }
    }
}

/// A named numeric sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub metric_value: f64,
    /// ms, percent, count, ...
    pub metric_unit: Option<String>,
    pub tags: Option<Metadata>,
    pub session_id: Option<String>,
}

/// Payload for recording a performance metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPerformanceMetric {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub metric_name: String,
    pub metric_value: f64,
    #[serde(default)]
    pub metric_unit: Option<String>,
    #[serde(default)]
    pub tags: Option<Metadata>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl NewPerformanceMetric {
    pub fn new(metric_name: impl Into<String>, metric_value: f64) -> Self {
        Self { metric_name: metric_name.into(), metric_value, ..Default::default() }
    }

    pub(crate) fn into_record(self, id: u64, timestamp: DateTime<Utc>) -> PerformanceMetric {
        PerformanceMetric {
            id,
            timestamp,
            metric_name: self.metric_name,
            metric_value: self.metric_value,
            metric_unit: self.metric_unit,
            tags: self.tags,
            session_id: self.session_id,
        }
    }
}

/// An error or exception reported by the MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLog {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub error_type: String,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub request_path: Option<String>,
    pub request_method: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub context: Option<Metadata>,
    /// Set by an operator once the error has been dealt with
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Payload for recording an error log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewErrorLog {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub error_type: String,
    pub error_message: String,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub request_path: Option<String>,
    #[serde(default)]
    pub request_method: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub context: Option<Metadata>,
}

impl NewErrorLog {
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
            ..Default::default()
        }
    }

    pub(crate) fn into_record(self, id: u64, timestamp: DateTime<Utc>) -> ErrorLog {
        ErrorLog {
            id,
            timestamp,
            session_id: self.session_id,
            error_type: self.error_type,
            error_message: self.error_message,
            stack_trace: self.stack_trace,
            request_path: self.request_path,
            request_method: self.request_method,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            context: self.context,
            resolved: false,
            resolved_at: None,
        }
    }
}

/// Cost of one call to an external service (LLM provider, task runner, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
    /// chat_completion, webhook, ...
    pub operation_type: String,
    pub tokens_used: Option<u64>,
    pub cost_usd: f64,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub metadata: Option<Metadata>,
}

/// Payload for recording a cost entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCostEntry {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub service_name: String,
    pub operation_type: String,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    pub cost_usd: f64,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl NewCostEntry {
    pub fn new(
        service_name: impl Into<String>,
        operation_type: impl Into<String>,
        cost_usd: f64,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            operation_type: operation_type.into(),
            cost_usd,
            ..Default::default()
        }
    }

    pub(crate) fn into_record(self, id: u64, timestamp: DateTime<Utc>) -> CostEntry {
        CostEntry {
            id,
            timestamp,
            service_name: self.service_name,
            operation_type: self.operation_type,
            tokens_used: self.tokens_used,
            cost_usd: self.cost_usd,
            session_id: self.session_id,
            request_id: self.request_id,
            metadata: self.metadata,
        }
    }
}

/// A client session, keyed by an externally generated `session_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: u64,
    /// Unique across the store
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Open while absent
    pub ended_at: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_processing_time_ms: u64,
    pub metadata: Option<Metadata>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Payload for creating a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub session_id: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl NewSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), ..Default::default() }
    }

    pub(crate) fn into_record(self, id: u64, created_at: DateTime<Utc>) -> Session {
        Session {
            id,
            session_id: self.session_id,
            created_at,
            updated_at: None,
            ended_at: None,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            total_requests: 0,
            total_errors: 0,
            total_processing_time_ms: 0,
            metadata: self.metadata,
        }
    }
}

/// Partial session update: only the fields that are present are written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_requests: Option<u64>,
    #[serde(default)]
    pub total_errors: Option<u64>,
    #[serde(default)]
    pub total_processing_time_ms: Option<u64>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl SessionUpdate {
    /// Whether the update carries no fields at all
    pub fn is_empty(&self) -> bool {
        self.ended_at.is_none()
            && self.total_requests.is_none()
            && self.total_errors.is_none()
            && self.total_processing_time_ms.is_none()
            && self.metadata.is_none()
    }

    /// Apply the present fields to `session` and stamp `updated_at`
    pub fn apply_to(&self, session: &mut Session, now: DateTime<Utc>) {
        if let Some(ended_at) = self.ended_at {
            session.ended_at = Some(ended_at);
        }
        if let Some(total) = self.total_requests {
            session.total_requests = total;
        }
        if let Some(total) = self.total_errors {
            session.total_errors = total;
        }
        if let Some(total) = self.total_processing_time_ms {
            session.total_processing_time_ms = total;
        }
        if let Some(metadata) = &self.metadata {
            session.metadata = Some(metadata.clone());
        }
        session.updated_at = Some(now);
    }
}
