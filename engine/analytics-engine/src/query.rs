//! # Query Engine
//!
//! Filtered, paged reads over the event store with per-family limit checks.

use crate::config::QueryConfig;
use crate::error::{AnalyticsError, Result};
use persistence::{
    CostEntry, CostQuery, ErrorLog, ErrorLogQuery, EventStore, MetricQuery, Page,
    PerformanceMetric, Session, SessionQuery, UsageEvent, UsageEventQuery,
};
use std::sync::Arc;

/// Query engine for analytics data
#[derive(Clone)]
pub struct QueryEngine {
    config: QueryConfig,
    store: Arc<dyn EventStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn EventStore>, config: QueryConfig) -> Self {
        Self { config, store }
    }

    /// Usage events, newest first unless the query says otherwise
    pub async fn usage_events(&self, mut query: UsageEventQuery) -> Result<Vec<UsageEvent>> {
        query.page = self.bounded(query.page, self.config.default_limit, self.config.max_limit)?;
        Ok(self.store.query_usage_events(&query).await?)
    }

    pub async fn performance_metrics(&self, mut query: MetricQuery) -> Result<Vec<PerformanceMetric>> {
        query.page = self.bounded(
            query.page,
            self.config.metrics_default_limit,
            self.config.metrics_max_limit,
        )?;
        Ok(self.store.query_performance_metrics(&query).await?)
    }

    pub async fn error_logs(&self, mut query: ErrorLogQuery) -> Result<Vec<ErrorLog>> {
        query.page = self.bounded(query.page, self.config.default_limit, self.config.max_limit)?;
        Ok(self.store.query_error_logs(&query).await?)
    }

    pub async fn cost_entries(&self, mut query: CostQuery) -> Result<Vec<CostEntry>> {
        query.page = self.bounded(query.page, self.config.default_limit, self.config.max_limit)?;
        Ok(self.store.query_cost_entries(&query).await?)
    }

    /// Sessions, newest created first
    pub async fn sessions(&self, skip: usize, limit: Option<usize>) -> Result<Vec<Session>> {
        let page = self.bounded(
            Page { offset: skip, limit },
            self.config.default_limit,
            self.config.max_limit,
        )?;
        Ok(self.store.list_sessions(&SessionQuery { page, ..Default::default() }).await?)
    }

    fn bounded(&self, page: Page, default: usize, max: usize) -> Result<Page> {
        let limit = page.limit.unwrap_or(default);
        if limit == 0 || limit > max {
            return Err(AnalyticsError::validation(
                "limit",
                format!("must be between 1 and {max}, got {limit}"),
            ));
        }
        Ok(Page { offset: page.offset, limit: Some(limit) })
    }
}
