//! # Event Ingestion
//!
//! Validation of incoming records before they reach the event store.

use crate::error::{AnalyticsError, Result};
use persistence::{
    Metadata, NewCostEntry, NewErrorLog, NewPerformanceMetric, NewSession, NewUsageEvent,
    SessionUpdate,
};
use serde_json::Value;

/// Deepest nesting accepted inside metadata, tags and context maps
pub const MAX_METADATA_DEPTH: usize = 32;

const ID_MAX: usize = 255;
const NAME_MAX: usize = 100;
const LONG_TEXT_MAX: usize = 500;
const ADDRESS_MAX: usize = 50;
const UNIT_MAX: usize = 50;
const METHOD_MAX: usize = 10;

pub fn validate_usage_event(event: &NewUsageEvent) -> Result<()> {
    required("event_type", &event.event_type, NAME_MAX)?;
    optional("session_id", &event.session_id, ID_MAX)?;
    optional("tool_name", &event.tool_name, NAME_MAX)?;
    optional("user_agent", &event.user_agent, LONG_TEXT_MAX)?;
    optional("ip_address", &event.ip_address, ADDRESS_MAX)?;
    metadata("metadata", &event.metadata)
}

pub fn validate_performance_metric(metric: &NewPerformanceMetric) -> Result<()> {
    required("metric_name", &metric.metric_name, NAME_MAX)?;
    if !metric.metric_value.is_finite() {
        return Err(AnalyticsError::validation("metric_value", "must be a finite number"));
    }
    optional("metric_unit", &metric.metric_unit, UNIT_MAX)?;
    optional("session_id", &metric.session_id, ID_MAX)?;
    metadata("tags", &metric.tags)
}

pub fn validate_error_log(log: &NewErrorLog) -> Result<()> {
    required("error_type", &log.error_type, NAME_MAX)?;
    optional("session_id", &log.session_id, ID_MAX)?;
    optional("request_path", &log.request_path, LONG_TEXT_MAX)?;
    optional("request_method", &log.request_method, METHOD_MAX)?;
    optional("user_agent", &log.user_agent, LONG_TEXT_MAX)?;
    optional("ip_address", &log.ip_address, ADDRESS_MAX)?;
    metadata("context", &log.context)
}

pub fn validate_cost_entry(entry: &NewCostEntry) -> Result<()> {
    required("service_name", &entry.service_name, NAME_MAX)?;
    required("operation_type", &entry.operation_type, NAME_MAX)?;
    if !entry.cost_usd.is_finite() || entry.cost_usd < 0.0 {
        return Err(AnalyticsError::validation("cost_usd", "must be a non-negative number"));
    }
    optional("session_id", &entry.session_id, ID_MAX)?;
    optional("request_id", &entry.request_id, ID_MAX)?;
    metadata("metadata", &entry.metadata)
}

pub fn validate_session(session: &NewSession) -> Result<()> {
    required("session_id", &session.session_id, ID_MAX)?;
    optional("user_agent", &session.user_agent, LONG_TEXT_MAX)?;
    optional("ip_address", &session.ip_address, ADDRESS_MAX)?;
    metadata("metadata", &session.metadata)
}

pub fn validate_session_update(update: &SessionUpdate) -> Result<()> {
    metadata("metadata", &update.metadata)
}

fn required(field: &'static str, value: &str, max: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AnalyticsError::validation(field, "must not be empty"));
    }
    length(field, value, max)
}

fn optional(field: &'static str, value: &Option<String>, max: usize) -> Result<()> {
    match value {
        Some(value) => length(field, value, max),
        None => Ok(()),
    }
}

fn length(field: &'static str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len > max {
        return Err(AnalyticsError::validation(
            field,
            format!("length {len} exceeds maximum of {max}"),
        ));
    }
    Ok(())
}

fn metadata(field: &'static str, value: &Option<Metadata>) -> Result<()> {
    let Some(map) = value else {
        return Ok(());
    };

    // Iterative walk so hostile input cannot exhaust the stack
    let mut pending: Vec<(&Value, usize)> = map.values().map(|v| (v, 1)).collect();
    while let Some((value, depth)) = pending.pop() {
        if depth > MAX_METADATA_DEPTH {
            return Err(AnalyticsError::validation(
                field,
                format!("nesting deeper than {MAX_METADATA_DEPTH} levels"),
            ));
        }
        match value {
            Value::Object(map) => pending.extend(map.values().map(|v| (v, depth + 1))),
            Value::Array(items) => pending.extend(items.iter().map(|v| (v, depth + 1))),
            _ => {}
        }
    }

    Ok(())
}
