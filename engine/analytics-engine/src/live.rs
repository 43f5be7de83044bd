//! # Live Dashboard Metrics
//!
//! Each subscriber gets its own task that recomputes the dashboard metrics and pushes them on a
//! fixed cadence. The task stops as soon as the subscriber goes away, either when a push fails
//! or while it is waiting for the next tick.

use crate::aggregation::MetricsAggregator;
use crate::analytics::DashboardMetrics;
use crate::config::LiveConfig;
use crate::error::Result;
use chrono::Utc;
use futures::Stream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Publishes dashboard metrics to subscribers
#[derive(Clone)]
pub struct LiveMetricsPublisher {
    aggregator: MetricsAggregator,
    interval: Duration,
    channel_capacity: usize,
    active: Arc<AtomicUsize>,
}

impl LiveMetricsPublisher {
    pub fn new(aggregator: MetricsAggregator, config: &LiveConfig) -> Self {
        Self::with_interval(
            aggregator,
            Duration::from_secs(config.interval_secs),
            config.channel_capacity,
        )
    }

    pub fn with_interval(
        aggregator: MetricsAggregator,
        interval: Duration,
        channel_capacity: usize,
    ) -> Self {
        Self {
            aggregator,
            interval,
            channel_capacity: channel_capacity.max(1),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start a subscription; the first metrics are pushed immediately
    pub fn subscribe(&self) -> DashboardSubscription {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.channel_capacity);

        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!("Dashboard subscriber {} connected ({} active)", id, active);

        let task = tokio::spawn(publish_loop(
            id,
            self.aggregator.clone(),
            self.interval,
            sender,
            self.active.clone(),
        ));

        DashboardSubscription { id, receiver, task }
    }

    /// Subscriptions whose publishing task is still running
    pub fn active_subscribers(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

async fn publish_loop(
    id: Uuid,
    aggregator: MetricsAggregator,
    interval: Duration,
    sender: mpsc::Sender<DashboardMetrics>,
    active: Arc<AtomicUsize>,
) {
    let mut pushed = 0u64;

    loop {
        match aggregator.dashboard_metrics_at(Utc::now()).await {
            Ok(metrics) => {
                if sender.send(metrics).await.is_err() {
                    break;
                }
                pushed += 1;
            }
            Err(e) => {
                tracing::warn!("Dashboard metrics for subscriber {} failed: {}", id, e);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = sender.closed() => break,
        }
    }

    let remaining = active.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
    tracing::info!(
        "Dashboard subscriber {} disconnected after {} updates ({} active)",
        id,
        pushed,
        remaining
    );
}

/// Receiving end of a dashboard subscription. Dropping it ends the publishing task.
pub struct DashboardSubscription {
    id: Uuid,
    receiver: mpsc::Receiver<DashboardMetrics>,
    task: JoinHandle<()>,
}

impl DashboardSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next push
    pub async fn next(&mut self) -> Option<DashboardMetrics> {
        self.receiver.recv().await
    }

    /// Adapt into a stream of metrics
    pub fn into_stream(self) -> impl Stream<Item = DashboardMetrics> {
        futures::stream::unfold(self, |mut subscription| async move {
            let metrics = subscription.receiver.recv().await?;
            Some((metrics, subscription))
        })
    }

    /// Separate the receiver from the publishing task
    pub fn into_parts(self) -> (mpsc::Receiver<DashboardMetrics>, JoinHandle<()>) {
        (self.receiver, self.task)
    }
}

/// Render one server-sent-events frame
pub fn sse_frame(metrics: &DashboardMetrics) -> Result<String> {
    Ok(format!("data: {}\n\n", serde_json::to_string(metrics)?))
}
