//! # AnalyticsEngine
//!
//! Analytics ingestion and dashboard backend for an MCP tool server.
//!
//! The AnalyticsEngine records usage events, performance metrics, error logs, cost entries and
//! sessions into an event store, and computes windowed summaries and live dashboard metrics
//! from them on demand. A bounded in-memory log buffer keeps the most recent log lines for
//! operational visibility.

pub mod aggregation;
pub mod analytics;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod live;
pub mod log_buffer;
pub mod logging;
pub mod query;
pub mod retention;
pub mod sessions;

#[cfg(test)]
mod tests;

// Re-export main types for easy usage
pub use aggregation::MetricsAggregator;
pub use analytics::{AnalyticsSummary, CostSummary, DashboardMetrics, SessionDetail, ToolUsage};
pub use config::{AnalyticsConfig, StorageBackend};
pub use error::{AnalyticsError, Result};
pub use live::{DashboardSubscription, LiveMetricsPublisher};
pub use log_buffer::{LogEntry, LogRingBuffer};
pub use query::QueryEngine;
pub use retention::RetentionSweeper;
pub use sessions::SessionTracker;

use chrono::{DateTime, Utc};
use persistence::{
    CostEntry, CostQuery, ErrorLog, ErrorLogQuery, EventStore, InMemoryEventStore,
    LocalEventStore, MetricQuery, NewCostEntry, NewErrorLog, NewPerformanceMetric, NewSession,
    NewUsageEvent, PerformanceMetric, PurgeStats, Session, SessionUpdate, StoreStats, UsageEvent,
    UsageEventQuery,
};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Initialize the AnalyticsEngine with the given configuration
pub async fn init_analytics(config: AnalyticsConfig) -> Result<AnalyticsEngine> {
    config.validate()?;
    tracing::info!("Initializing AnalyticsEngine with config: {:?}", config);

    let engine = match config.storage.backend {
        StorageBackend::Local => {
            let local = Arc::new(LocalEventStore::open(config.storage.local.clone()).await?);
            let store: Arc<dyn EventStore> = local.clone();
            let mut engine = AnalyticsEngine::with_store(store, config);
            engine.local = Some(local);
            engine
        }
        StorageBackend::Memory => {
            AnalyticsEngine::with_store(Arc::new(InMemoryEventStore::new()), config)
        }
    };

    Ok(engine)
}

/// Main AnalyticsEngine service
#[derive(Clone)]
pub struct AnalyticsEngine {
    store: Arc<dyn EventStore>,
    /// Set when the store is file-backed, for compaction
    local: Option<Arc<LocalEventStore>>,
    sessions: SessionTracker,
    aggregator: MetricsAggregator,
    query_engine: QueryEngine,
    publisher: LiveMetricsPublisher,
    retention: RetentionSweeper,
    log_buffer: Arc<LogRingBuffer>,
    config: AnalyticsConfig,
}

impl AnalyticsEngine {
    /// Build an engine over an existing store. Recent logs come from the process-wide buffer.
    pub fn with_store(store: Arc<dyn EventStore>, config: AnalyticsConfig) -> Self {
        let aggregator = MetricsAggregator::new(store.clone());
        Self {
            sessions: SessionTracker::new(store.clone(), config.query.session_detail_limit),
            query_engine: QueryEngine::new(store.clone(), config.query.clone()),
            publisher: LiveMetricsPublisher::new(aggregator.clone(), &config.live),
            retention: RetentionSweeper::new(store.clone(), config.retention.days),
            log_buffer: log_buffer::install_global(config.log_buffer.capacity),
            aggregator,
            store,
            local: None,
            config,
        }
    }

    /// Use a dedicated log buffer instead of the process-wide one
    pub fn with_log_buffer(mut self, buffer: Arc<LogRingBuffer>) -> Self {
        self.log_buffer = buffer;
        self
    }

    // Ingestion

    pub async fn record_usage_event(&self, event: NewUsageEvent) -> Result<UsageEvent> {
        ingestion::validate_usage_event(&event)?;
        let event = self.store.insert_usage_event(event).await?;
        tracing::debug!("Recorded usage event {} ({})", event.id, event.event_type);
        Ok(event)
    }

    pub async fn record_performance_metric(
        &self,
        metric: NewPerformanceMetric,
    ) -> Result<PerformanceMetric> {
        ingestion::validate_performance_metric(&metric)?;
        let metric = self.store.insert_performance_metric(metric).await?;
        tracing::debug!("Recorded metric {} = {}", metric.metric_name, metric.metric_value);
        Ok(metric)
    }

    pub async fn record_error_log(&self, log: NewErrorLog) -> Result<ErrorLog> {
        ingestion::validate_error_log(&log)?;
        let log = self.store.insert_error_log(log).await?;
        tracing::debug!("Recorded error log {} ({})", log.id, log.error_type);
        Ok(log)
    }

    pub async fn record_cost(&self, entry: NewCostEntry) -> Result<CostEntry> {
        ingestion::validate_cost_entry(&entry)?;
        let entry = self.store.insert_cost_entry(entry).await?;
        tracing::debug!("Recorded cost ${:.4} for {}", entry.cost_usd, entry.service_name);
        Ok(entry)
    }

    /// Mark an error log resolved now; `None` if no such log
    pub async fn resolve_error_log(&self, id: u64) -> Result<Option<ErrorLog>> {
        let log = self.store.resolve_error_log(id, Utc::now()).await?;
        if log.is_some() {
            tracing::info!("Error log {} resolved", id);
        }
        Ok(log)
    }

    // Sessions

    pub async fn create_or_get_session(&self, session: NewSession) -> Result<Session> {
        self.sessions.create_or_get(session).await
    }

    pub async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<Option<Session>> {
        self.sessions.update(session_id, update).await
    }

    /// Sessions, newest created first
    pub async fn list_sessions(&self, skip: usize, limit: Option<usize>) -> Result<Vec<Session>> {
        self.query_engine.sessions(skip, limit).await
    }

    pub async fn get_session_detail(&self, session_id: &str) -> Result<Option<SessionDetail>> {
        self.sessions.detail(session_id).await
    }

    // Queries

    pub async fn query_usage_events(&self, query: UsageEventQuery) -> Result<Vec<UsageEvent>> {
        self.query_engine.usage_events(query).await
    }

    pub async fn query_performance_metrics(
        &self,
        query: MetricQuery,
    ) -> Result<Vec<PerformanceMetric>> {
        self.query_engine.performance_metrics(query).await
    }

    pub async fn query_error_logs(&self, query: ErrorLogQuery) -> Result<Vec<ErrorLog>> {
        self.query_engine.error_logs(query).await
    }

    pub async fn query_cost_entries(&self, query: CostQuery) -> Result<Vec<CostEntry>> {
        self.query_engine.cost_entries(query).await
    }

    // Aggregation

    /// Summary over `[start, end]`; defaults to the last 7 days
    pub async fn get_summary(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<AnalyticsSummary> {
        self.summary_at(Utc::now(), start, end).await
    }

    pub async fn summary_at(
        &self,
        now: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<AnalyticsSummary> {
        check_window(start, end)?;
        self.aggregator.summary_at(now, start, end).await
    }

    pub async fn get_dashboard_metrics(&self) -> Result<DashboardMetrics> {
        self.aggregator.dashboard_metrics_at(Utc::now()).await
    }

    pub async fn dashboard_metrics_at(&self, now: DateTime<Utc>) -> Result<DashboardMetrics> {
        self.aggregator.dashboard_metrics_at(now).await
    }

    pub async fn get_cost_summary(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        service_name: Option<&str>,
    ) -> Result<CostSummary> {
        check_window(start, end)?;
        self.aggregator.cost_summary(start, end, service_name).await
    }

    /// Live dashboard metrics, pushed every `live.interval_secs` until the subscription is dropped
    pub fn subscribe_dashboard(&self) -> DashboardSubscription {
        self.publisher.subscribe()
    }

    // Diagnostics

    /// Up to `limit` most recent log lines, oldest first
    pub fn get_recent_logs(&self, limit: usize, level: Option<&str>) -> Vec<LogEntry> {
        self.log_buffer.get_recent(limit, level)
    }

    pub fn log_buffer(&self) -> &Arc<LogRingBuffer> {
        &self.log_buffer
    }

    // Maintenance

    pub async fn purge_expired(&self) -> Result<PurgeStats> {
        self.retention.sweep_at(Utc::now()).await
    }

    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<PurgeStats> {
        self.retention.sweep_at(now).await
    }

    /// Spawn the periodic retention sweep; `None` when disabled
    pub fn start_retention_task(&self) -> Option<JoinHandle<()>> {
        self.retention.clone().start(&self.config.retention)
    }

    /// Snapshot and truncate the WAL; `None` for stores without one
    pub async fn compact(&self) -> Result<Option<u64>> {
        match &self.local {
            Some(local) => Ok(Some(local.compact().await?)),
            None => Ok(None),
        }
    }

    /// Flush buffered writes of a file-backed store
    pub async fn flush(&self) -> Result<()> {
        if let Some(local) = &self.local {
            local.flush().await?;
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats().await?)
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }
}

fn check_window(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<()> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(AnalyticsError::validation("start_date", "must not be after end_date"));
        }
    }
    Ok(())
}
