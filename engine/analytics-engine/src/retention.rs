//! # Data Retention
//!
//! Periodic removal of usage events, metrics, error logs and cost entries older than the
//! retention window. Sessions are kept.

use crate::config::RetentionConfig;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use persistence::{EventStore, PurgeStats};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn EventStore>,
    days: u32,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn EventStore>, days: u32) -> Self {
        Self { store, days }
    }

    /// Start of the retention window; a window reaching past the earliest representable time
    /// keeps everything
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Duration::try_days(i64::from(self.days))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Purge everything older than the window ending at `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<PurgeStats> {
        let cutoff = self.cutoff(now);
        let stats = self.store.purge_before(cutoff).await?;

        if stats.total() > 0 {
            tracing::info!(
                "Retention sweep before {}: removed {} events, {} metrics, {} errors, {} costs",
                cutoff,
                stats.usage_events,
                stats.performance_metrics,
                stats.error_logs,
                stats.cost_entries
            );
        } else {
            tracing::debug!("Retention sweep before {}: nothing to remove", cutoff);
        }

        Ok(stats)
    }

    /// Run the sweep on the configured interval; `None` when retention is disabled
    pub fn start(self, config: &RetentionConfig) -> Option<JoinHandle<()>> {
        if !config.enabled {
            tracing::info!("Retention sweep disabled");
            return None;
        }

        let every = std::time::Duration::from_secs(u64::from(config.sweep_interval_hours) * 3600);
        tracing::info!(
            "Starting retention sweep: keep {} days, every {} hours",
            self.days,
            config.sweep_interval_hours
        );

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep_at(Utc::now()).await {
                    tracing::error!("Retention sweep failed: {}", e);
                }
            }
        }))
    }
}
