//! # Command Line Interface
//!
//! CLI for recording and querying analytics data in a local data directory.

use crate::config::{AnalyticsConfig, StorageBackend};
use crate::live::sse_frame;
use crate::{init_analytics, AnalyticsEngine};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use persistence::{
    CostQuery, ErrorLogQuery, MetricQuery, NewCostEntry, NewErrorLog, NewPerformanceMetric,
    NewSession, NewUsageEvent, Page, TimeRange, UsageEventQuery,
};
use serde::Serialize;
use std::path::PathBuf;

/// Analytics CLI for MCP server monitoring
#[derive(Parser)]
#[command(name = "analytics-cli")]
#[command(about = "Analytics CLI for MCP server usage, costs and errors")]
pub struct Cli {
    /// Configuration file (TOML); `ANALYTICS_*` environment variables override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to analytics data storage (overrides the configuration)
    #[arg(short, long)]
    pub data_path: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Time window shared by the reporting commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct WindowArgs {
    /// Window start (RFC 3339)
    #[arg(long)]
    pub start: Option<DateTime<Utc>>,
    /// Window end (RFC 3339)
    #[arg(long)]
    pub end: Option<DateTime<Utc>>,
    /// Hours to look back (ignored when --start is given)
    #[arg(long)]
    pub hours: Option<i64>,
}

impl WindowArgs {
    fn resolve(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let start = match (self.start, self.hours) {
            (Some(start), _) => Some(start),
            (None, Some(hours)) => Some(
                Duration::try_hours(hours)
                    .and_then(|back| now.checked_sub_signed(back))
                    .with_context(|| format!("--hours {hours} is out of range"))?,
            ),
            (None, None) => None,
        };
        Ok((start, self.end))
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the analytics summary (defaults to the last 7 days)
    Summary {
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Show current dashboard metrics
    Dashboard,
    /// Show cost totals
    Costs {
        #[command(flatten)]
        window: WindowArgs,
        /// Only this service
        #[arg(long)]
        service: Option<String>,
        /// List the individual entries instead of totals
        #[arg(long)]
        entries: bool,
    },
    /// List sessions, newest first
    Sessions {
        #[arg(long, default_value = "0")]
        skip: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one session with its recent activity
    Session {
        session_id: String,
    },
    /// List usage events
    Events {
        #[command(flatten)]
        window: WindowArgs,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        event_type: Option<String>,
        #[arg(long)]
        tool_name: Option<String>,
        #[arg(long, default_value = "0")]
        skip: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List error logs
    Errors {
        #[command(flatten)]
        window: WindowArgs,
        #[arg(long)]
        error_type: Option<String>,
        #[arg(long)]
        resolved: Option<bool>,
        #[arg(long, default_value = "0")]
        skip: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List performance metrics
    Metrics {
        #[command(flatten)]
        window: WindowArgs,
        #[arg(long)]
        metric_name: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Record one record from a JSON payload
    Record {
        kind: RecordArg,
        /// JSON object with the record's fields
        json: String,
    },
    /// Mark an error log resolved
    Resolve {
        id: u64,
    },
    /// Stream dashboard metrics as server-sent-event frames
    Watch {
        /// Stop after this many frames
        #[arg(long)]
        count: Option<usize>,
    },
    /// Show recent log lines captured by this process
    Logs {
        #[arg(long, default_value = "200")]
        limit: usize,
        #[arg(long)]
        level: Option<String>,
    },
    /// Snapshot the store and truncate its write-ahead log
    Compact,
    /// Remove records older than the retention window
    Purge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordArg {
    Event,
    Metric,
    Error,
    Cost,
    Session,
}

/// CLI handler
pub struct CliHandler {
    engine: AnalyticsEngine,
}

impl CliHandler {
    /// Open the engine described by the CLI flags
    pub async fn new(config: Option<&PathBuf>, data_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = AnalyticsConfig::load(config.map(PathBuf::as_path))
            .context("failed to load configuration")?;
        if let Some(path) = data_path {
            config.storage.local.data_dir = path.clone();
            config.storage.backend = StorageBackend::Local;
        }

        let engine = init_analytics(config).await.context("failed to open analytics store")?;
        Ok(Self { engine })
    }

    pub fn from_engine(engine: AnalyticsEngine) -> Self {
        Self { engine }
    }

    /// Handle CLI commands
    pub async fn handle_command(&self, command: Commands) -> Result<()> {
        let now = Utc::now();
        match command {
            Commands::Summary { window } => {
                let (start, end) = window.resolve(now)?;
                print_json(&self.engine.summary_at(now, start, end).await?)?;
            }
            Commands::Dashboard => {
                print_json(&self.engine.dashboard_metrics_at(now).await?)?;
            }
            Commands::Costs { window, service, entries } => {
                let (start, end) = window.resolve(now)?;
                if entries {
                    let query = CostQuery {
                        service_name: service,
                        range: TimeRange::new(start, end),
                        ..Default::default()
                    };
                    print_json(&self.engine.query_cost_entries(query).await?)?;
                } else {
                    let summary =
                        self.engine.get_cost_summary(start, end, service.as_deref()).await?;
                    print_json(&summary)?;
                }
            }
            Commands::Sessions { skip, limit } => {
                print_json(&self.engine.list_sessions(skip, limit).await?)?;
            }
            Commands::Session { session_id } => {
                match self.engine.get_session_detail(&session_id).await? {
                    Some(detail) => print_json(&detail)?,
                    None => anyhow::bail!("session not found: {session_id}"),
                }
            }
            Commands::Events { window, session_id, event_type, tool_name, skip, limit } => {
                let (start, end) = window.resolve(now)?;
                let query = UsageEventQuery {
                    session_id,
                    event_type,
                    tool_name,
                    range: TimeRange::new(start, end),
                    page: Page { offset: skip, limit },
                    ..Default::default()
                };
                print_json(&self.engine.query_usage_events(query).await?)?;
            }
            Commands::Errors { window, error_type, resolved, skip, limit } => {
                let (start, end) = window.resolve(now)?;
                let query = ErrorLogQuery {
                    error_type,
                    resolved,
                    range: TimeRange::new(start, end),
                    page: Page { offset: skip, limit },
                    ..Default::default()
                };
                print_json(&self.engine.query_error_logs(query).await?)?;
            }
            Commands::Metrics { window, metric_name, limit } => {
                let (start, end) = window.resolve(now)?;
                let query = MetricQuery {
                    metric_name,
                    range: TimeRange::new(start, end),
                    page: Page { offset: 0, limit },
                    ..Default::default()
                };
                print_json(&self.engine.query_performance_metrics(query).await?)?;
            }
            Commands::Record { kind, json } => {
                self.record(kind, &json).await?;
                self.engine.flush().await?;
            }
            Commands::Resolve { id } => match self.engine.resolve_error_log(id).await? {
                Some(log) => {
                    self.engine.flush().await?;
                    print_json(&log)?;
                }
                None => anyhow::bail!("error log not found: {id}"),
            },
            Commands::Watch { count } => {
                self.watch(count).await?;
            }
            Commands::Logs { limit, level } => {
                print_json(&self.engine.get_recent_logs(limit, level.as_deref()))?;
            }
            Commands::Compact => match self.engine.compact().await? {
                Some(sequence) => println!("Compacted at WAL sequence {sequence}"),
                None => println!("Store has no write-ahead log to compact"),
            },
            Commands::Purge => {
                let stats = self.engine.purge_expired().await?;
                self.engine.flush().await?;
                print_json(&stats)?;
            }
        }
        Ok(())
    }

    async fn record(&self, kind: RecordArg, json: &str) -> Result<()> {
        match kind {
            RecordArg::Event => {
                let event: NewUsageEvent = serde_json::from_str(json)?;
                print_json(&self.engine.record_usage_event(event).await?)
            }
            RecordArg::Metric => {
                let metric: NewPerformanceMetric = serde_json::from_str(json)?;
                print_json(&self.engine.record_performance_metric(metric).await?)
            }
            RecordArg::Error => {
                let log: NewErrorLog = serde_json::from_str(json)?;
                print_json(&self.engine.record_error_log(log).await?)
            }
            RecordArg::Cost => {
                let entry: NewCostEntry = serde_json::from_str(json)?;
                print_json(&self.engine.record_cost(entry).await?)
            }
            RecordArg::Session => {
                let session: NewSession = serde_json::from_str(json)?;
                print_json(&self.engine.create_or_get_session(session).await?)
            }
        }
    }

    async fn watch(&self, count: Option<usize>) -> Result<()> {
        let mut subscription = self.engine.subscribe_dashboard();
        let mut printed = 0usize;

        loop {
            tokio::select! {
                metrics = subscription.next() => {
                    let Some(metrics) = metrics else { break };
                    print!("{}", sse_frame(&metrics)?);
                    printed += 1;
                    if count.is_some_and(|count| printed >= count) {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
