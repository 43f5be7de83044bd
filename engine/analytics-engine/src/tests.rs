//! End-to-end tests for the AnalyticsEngine facade

use crate::config::{AnalyticsConfig, StorageBackend};
use crate::log_buffer::LogRingBuffer;
use crate::{init_analytics, AnalyticsEngine};
use chrono::{Duration, Utc};
use persistence::{
    ErrorLogQuery, InMemoryEventStore, NewCostEntry, NewErrorLog, NewPerformanceMetric, NewSession,
    NewUsageEvent, SessionUpdate, UsageEventQuery,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn memory_engine() -> AnalyticsEngine {
    let mut config = AnalyticsConfig::default();
    config.storage.backend = StorageBackend::Memory;
    AnalyticsEngine::with_store(Arc::new(InMemoryEventStore::new()), config)
        .with_log_buffer(Arc::new(LogRingBuffer::new(16)))
}

fn local_config(dir: &TempDir) -> AnalyticsConfig {
    let mut config = AnalyticsConfig::default();
    config.storage.local.data_dir = dir.path().to_path_buf();
    config
}

fn tool_event(tool: &str, success: bool, response_time_ms: Option<u64>) -> NewUsageEvent {
    let mut event = NewUsageEvent::new("tool_call");
    event.tool_name = Some(tool.to_string());
    event.success = success;
    event.response_time_ms = response_time_ms;
    event
}

#[tokio::test]
async fn test_success_rate_and_average_response_time() {
    let engine = memory_engine();

    for ms in [100, 150, 120, 90, 200, 80, 110] {
        engine.record_usage_event(tool_event("search", true, Some(ms))).await.unwrap();
    }
    for _ in 0..3 {
        engine.record_usage_event(tool_event("search", false, None)).await.unwrap();
    }

    let summary = engine.get_summary(None, None).await.unwrap();
    assert_eq!(summary.total_requests, 10);
    assert_eq!(summary.success_rate, 70.0);
    // 850 / 7
    assert_eq!(summary.average_response_time_ms, 121.43);
}

#[tokio::test]
async fn test_average_includes_failed_events_with_response_times() {
    let engine = memory_engine();

    engine.record_usage_event(tool_event("search", true, Some(100))).await.unwrap();
    engine.record_usage_event(tool_event("search", false, Some(300))).await.unwrap();

    let summary = engine.get_summary(None, None).await.unwrap();
    assert_eq!(summary.success_rate, 50.0);
    assert_eq!(summary.average_response_time_ms, 200.0);
}

#[tokio::test]
async fn test_cost_summary_window() {
    let engine = memory_engine();
    let now = Utc::now();

    for (cost, age) in [(10.0, Duration::hours(1)), (5.5, Duration::hours(2)), (3.0, Duration::days(3))] {
        let mut entry = NewCostEntry::new("langdb", "chat_completion", cost);
        entry.timestamp = Some(now - age);
        engine.record_cost(entry).await.unwrap();
    }

    let summary =
        engine.get_cost_summary(Some(now - Duration::days(1)), Some(now), None).await.unwrap();
    assert_eq!(summary.total_cost_usd, 15.5);
    assert_eq!(summary.total_requests, 2);
    assert_eq!(summary.total_tokens, 0);

    let none = engine.get_cost_summary(None, None, Some("modal")).await.unwrap();
    assert_eq!(none.total_cost_usd, 0.0);
    assert_eq!(none.total_requests, 0);
}

#[tokio::test]
async fn test_top_errors_by_frequency() {
    let engine = memory_engine();
    for error_type in ["A", "B", "A", "C"] {
        engine.record_error_log(NewErrorLog::new(error_type, "failure")).await.unwrap();
    }

    let dashboard = engine.get_dashboard_metrics().await.unwrap();
    assert_eq!(dashboard.top_errors.len(), 3);
    assert_eq!(dashboard.top_errors[0], "A");
    let mut rest = dashboard.top_errors[1..].to_vec();
    rest.sort();
    assert_eq!(rest, vec!["B", "C"]);
}

#[tokio::test]
async fn test_rates_stay_in_bounds() {
    let engine = memory_engine();
    let now = Utc::now();

    for i in 0..20 {
        engine.record_usage_event(tool_event("t", i % 3 == 0, Some(i))).await.unwrap();
        engine.record_error_log(NewErrorLog::new("E", "m")).await.unwrap();
        engine.record_error_log(NewErrorLog::new("F", "m")).await.unwrap();
    }

    let summary = engine.summary_at(now + Duration::seconds(1), None, None).await.unwrap();
    assert!((0.0..=100.0).contains(&summary.success_rate));
    assert!((0.0..=100.0).contains(&summary.error_rate));

    let dashboard = engine.dashboard_metrics_at(now + Duration::seconds(1)).await.unwrap();
    assert!((0.0..=100.0).contains(&dashboard.success_rate));
    assert_eq!(dashboard.requests_per_minute, 20);
}

#[tokio::test]
async fn test_skewed_client_clock_does_not_hide_new_records() {
    let engine = memory_engine();

    let mut skewed = tool_event("search", true, Some(10));
    skewed.timestamp = Some(Utc::now() + Duration::days(30));
    engine.record_usage_event(skewed).await.unwrap();

    let event = engine.record_usage_event(tool_event("search", true, Some(20))).await.unwrap();
    let cost = engine.record_cost(NewCostEntry::new("langdb", "chat_completion", 2.0)).await.unwrap();
    assert!(event.timestamp <= Utc::now());
    assert!(cost.timestamp <= Utc::now());

    let summary = engine.get_summary(None, None).await.unwrap();
    assert_eq!(summary.total_requests, 1);
    assert_eq!(summary.average_response_time_ms, 20.0);
    assert_eq!(summary.total_costs_usd, 2.0);
}

#[tokio::test]
async fn test_create_or_get_session_returns_stored_row() {
    let engine = memory_engine();

    let mut first = NewSession::new("client-1");
    first.ip_address = Some("10.0.0.1".to_string());
    let created = engine.create_or_get_session(first).await.unwrap();

    let mut second = NewSession::new("client-1");
    second.ip_address = Some("10.0.0.2".to_string());
    let again = engine.create_or_get_session(second).await.unwrap();

    assert_eq!(created, again);
    assert_eq!(engine.list_sessions(0, None).await.unwrap().len(), 1);

    let summary = engine.get_summary(None, None).await.unwrap();
    assert_eq!(summary.active_sessions, 1);

    engine
        .update_session("client-1", SessionUpdate { ended_at: Some(Utc::now()), ..Default::default() })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.get_dashboard_metrics().await.unwrap().active_sessions, 0);
}

#[tokio::test]
async fn test_record_echoes_fields() {
    let engine = memory_engine();
    let before = Utc::now();

    let mut event = tool_event("web_search", true, Some(42));
    event.session_id = Some("s".to_string());
    event.metadata = json!({"query": "rust", "nested": {"depth": [1, 2]}}).as_object().cloned();
    let stored = engine.record_usage_event(event.clone()).await.unwrap();
    assert!(stored.id > 0);
    assert!(stored.timestamp >= before);
    assert_eq!(stored.tool_name, event.tool_name);
    assert_eq!(stored.metadata, event.metadata);

    let mut metric = NewPerformanceMetric::new("latency_p95", 12.5);
    metric.metric_unit = Some("ms".to_string());
    let stored = engine.record_performance_metric(metric).await.unwrap();
    assert_eq!(stored.metric_unit.as_deref(), Some("ms"));

    let mut log = NewErrorLog::new("ValueError", "bad");
    log.request_method = Some("POST".to_string());
    let stored = engine.record_error_log(log).await.unwrap();
    assert!(!stored.resolved);
    assert!(stored.resolved_at.is_none());
}

#[tokio::test]
async fn test_validation_rejects_before_store() {
    let engine = memory_engine();

    assert!(engine.record_usage_event(NewUsageEvent::new("")).await.unwrap_err().is_validation());
    assert!(engine
        .record_cost(NewCostEntry::new("svc", "op", -1.0))
        .await
        .unwrap_err()
        .is_validation());
    assert_eq!(engine.stats().await.unwrap().total(), 0);

    let now = Utc::now();
    assert!(engine.get_summary(Some(now), Some(now - Duration::hours(1))).await.is_err());
}

#[tokio::test]
async fn test_resolve_error_log_flow() {
    let engine = memory_engine();
    let log = engine.record_error_log(NewErrorLog::new("Timeout", "slow")).await.unwrap();

    let resolved = engine.resolve_error_log(log.id).await.unwrap().unwrap();
    assert!(resolved.resolved);
    assert!(engine.resolve_error_log(log.id + 1).await.unwrap().is_none());

    let unresolved = engine
        .query_error_logs(ErrorLogQuery { resolved: Some(false), ..Default::default() })
        .await
        .unwrap();
    assert!(unresolved.is_empty());
}

#[tokio::test]
async fn test_recent_logs_respect_capacity() {
    let engine = memory_engine();
    let buffer = engine.log_buffer().clone();

    for i in 0..(buffer.capacity() + 5) {
        buffer.push(crate::log_buffer::LogEntry {
            ts: Utc::now(),
            level: "INFO".to_string(),
            name: "tests".to_string(),
            message: format!("line {i}"),
        });
    }

    assert_eq!(buffer.len(), buffer.capacity());
    let recent = engine.get_recent_logs(3, None);
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[2].message, format!("line {}", buffer.capacity() + 4));
    assert_eq!(engine.get_recent_logs(100, None)[0].message, "line 5");
}

#[tokio::test]
async fn test_local_engine_survives_restart() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = init_analytics(local_config(&temp_dir)).await.unwrap();
        engine.create_or_get_session(NewSession::new("persisted")).await.unwrap();
        engine.record_usage_event(tool_event("search", true, Some(10))).await.unwrap();
        engine.record_cost(NewCostEntry::new("langdb", "chat_completion", 1.5)).await.unwrap();
        assert_eq!(engine.compact().await.unwrap(), Some(3));
        engine.record_usage_event(tool_event("search", false, Some(30))).await.unwrap();
        engine.flush().await.unwrap();
    }

    let engine = init_analytics(local_config(&temp_dir)).await.unwrap();
    let summary = engine.get_summary(None, None).await.unwrap();
    assert_eq!(summary.total_requests, 2);
    assert_eq!(summary.success_rate, 50.0);
    assert_eq!(summary.average_response_time_ms, 20.0);
    assert_eq!(summary.total_costs_usd, 1.5);
    assert_eq!(summary.active_sessions, 1);

    // Idempotent create still sees the recovered row
    let session = engine.create_or_get_session(NewSession::new("persisted")).await.unwrap();
    assert_eq!(session.id, 1);
}

#[tokio::test]
async fn test_purge_expired_through_engine() {
    let engine = memory_engine();
    let now = Utc::now();

    let mut old = tool_event("search", true, None);
    old.timestamp = Some(now - Duration::days(100));
    engine.record_usage_event(old).await.unwrap();
    engine.record_usage_event(tool_event("search", true, None)).await.unwrap();

    let stats = engine.purge_expired_at(now).await.unwrap();
    assert_eq!(stats.usage_events, 1);

    let events = engine.query_usage_events(UsageEventQuery::default()).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(engine.compact().await.unwrap(), None);
}

#[tokio::test]
async fn test_dashboard_subscription_through_engine() {
    let mut config = AnalyticsConfig::default();
    config.storage.backend = StorageBackend::Memory;
    let engine = init_analytics(config).await.unwrap();

    engine.record_usage_event(tool_event("search", true, Some(5))).await.unwrap();
    let mut subscription = engine.subscribe_dashboard();
    let metrics = subscription.next().await.unwrap();
    assert_eq!(metrics.requests_per_minute, 1);
    assert_eq!(metrics.average_response_time, 5.0);
}
