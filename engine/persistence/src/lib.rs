//! # Persistence Layer
//!
//! Event store for the MCP analytics engine. Usage events, performance metrics, error logs,
//! cost entries and sessions live in in-memory tables; the durable backend backs them with a
//! Write-Ahead Log (WAL) + Snapshots strategy.
//!
//! ## Architecture
//!
//! - **EventStore**: Abstract trait for different storage backends
//! - **InMemoryEventStore**: Ephemeral backend for tests and throwaway deployments
//! - **LocalEventStore**: Local file-based implementation
//! - **WAL**: Write-ahead log for every mutation
//! - **Snapshots**: Periodic state captures for fast recovery and WAL compaction
//!
//! ## Usage
//!
//! ```rust
//! use persistence::{open_local_store, EventStore, NewUsageEvent};
//! use tempfile::TempDir;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let temp_dir = TempDir::new()?;
//!     let store = open_local_store(temp_dir.path()).await?;
//!
//!     let mut event = NewUsageEvent::new("tool_call");
//!     event.tool_name = Some("sequential_thinking".to_string());
//!     let stored = store.insert_usage_event(event).await?;
//!     assert_eq!(stored.id, 1);
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod local;
pub mod query;
pub mod records;
pub mod snapshot;
pub mod tables;
pub mod wal;

pub use backend::{EventStore, InMemoryEventStore, LocalEventStore, TableBackend};
pub use config::PersistenceConfig;
pub use error::{PersistenceError, Result};
pub use local::{open_local_store, open_local_store_with_config};
pub use query::{
    CostQuery, ErrorLogQuery, MetricQuery, Order, Page, SessionQuery, TimeRange, UsageEventQuery,
};
pub use records::{
    CostEntry, ErrorLog, Metadata, NewCostEntry, NewErrorLog, NewPerformanceMetric, NewSession,
    NewUsageEvent, PerformanceMetric, Session, SessionUpdate, UsageEvent,
};
pub use tables::{PurgeStats, StoreStats};
pub use wal::WalOperation;

/// Re-export common types for convenience
pub use chrono::{DateTime, Utc};
