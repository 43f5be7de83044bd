//! Event store trait and implementations

use crate::config::PersistenceConfig;
use crate::error::{PersistenceError, Result};
use crate::query::{CostQuery, ErrorLogQuery, MetricQuery, SessionQuery, UsageEventQuery};
use crate::records::{
    CostEntry, ErrorLog, NewCostEntry, NewErrorLog, NewPerformanceMetric, NewSession,
    NewUsageEvent, PerformanceMetric, Session, SessionUpdate, UsageEvent,
};
use crate::snapshot::SnapshotManager;
use crate::tables::{PurgeStats, StoreStats, Tables};
use crate::wal::{Wal, WalOperation};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Abstract trait for event store backends
///
/// Each call is one atomic step: either the whole mutation is visible afterwards or none of it.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    /// Append a usage event, assigning id and (if absent) timestamp
    async fn insert_usage_event(&self, event: NewUsageEvent) -> Result<UsageEvent>;

    /// Append a performance metric
    async fn insert_performance_metric(
        &self,
        metric: NewPerformanceMetric,
    ) -> Result<PerformanceMetric>;

    /// Append an error log
    async fn insert_error_log(&self, log: NewErrorLog) -> Result<ErrorLog>;

    /// Append a cost entry
    async fn insert_cost_entry(&self, entry: NewCostEntry) -> Result<CostEntry>;

    /// Create a session; fails with `AlreadyExists` if the session id is taken
    async fn insert_session(&self, session: NewSession) -> Result<Session>;

    /// Look up a session by its external id
    async fn find_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Apply a partial update; `None` if the session does not exist
    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<Option<Session>>;

    /// Mark an error log resolved; `None` if no such log
    async fn resolve_error_log(
        &self,
        id: u64,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<ErrorLog>>;

    async fn query_usage_events(&self, query: &UsageEventQuery) -> Result<Vec<UsageEvent>>;

    async fn query_performance_metrics(&self, query: &MetricQuery)
        -> Result<Vec<PerformanceMetric>>;

    async fn query_error_logs(&self, query: &ErrorLogQuery) -> Result<Vec<ErrorLog>>;

    async fn query_cost_entries(&self, query: &CostQuery) -> Result<Vec<CostEntry>>;

    async fn list_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>>;

    /// Sessions without `ended_at`
    async fn count_open_sessions(&self) -> Result<usize>;

    /// Remove usage events, metrics, error logs and cost entries older than `cutoff`
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeStats>;

    /// Row counts per table
    async fn stats(&self) -> Result<StoreStats>;
}

/// Backends built on the shared in-memory [`Tables`]
///
/// Implementors decide how a mutation is made durable in `commit`; every [`EventStore`]
/// operation is then provided on top.
#[async_trait::async_trait]
pub trait TableBackend: Send + Sync {
    fn tables(&self) -> &RwLock<Tables>;

    /// Make `operation` durable and apply it to `tables` (held under the write guard)
    async fn commit(&self, tables: &mut Tables, operation: WalOperation) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: TableBackend> EventStore for T {
    async fn insert_usage_event(&self, event: NewUsageEvent) -> Result<UsageEvent> {
        let mut tables = self.tables().write().await;
        let event = tables.prepare_usage_event(event, Utc::now());
        self.commit(&mut tables, WalOperation::RecordUsageEvent(event.clone())).await?;
        Ok(event)
    }

    async fn insert_performance_metric(
        &self,
        metric: NewPerformanceMetric,
    ) -> Result<PerformanceMetric> {
        let mut tables = self.tables().write().await;
        let metric = tables.prepare_performance_metric(metric, Utc::now());
        self.commit(&mut tables, WalOperation::RecordPerformanceMetric(metric.clone())).await?;
        Ok(metric)
    }

    async fn insert_error_log(&self, log: NewErrorLog) -> Result<ErrorLog> {
        let mut tables = self.tables().write().await;
        let log = tables.prepare_error_log(log, Utc::now());
        self.commit(&mut tables, WalOperation::RecordErrorLog(log.clone())).await?;
        Ok(log)
    }

    async fn insert_cost_entry(&self, entry: NewCostEntry) -> Result<CostEntry> {
        let mut tables = self.tables().write().await;
        let entry = tables.prepare_cost_entry(entry, Utc::now());
        self.commit(&mut tables, WalOperation::RecordCostEntry(entry.clone())).await?;
        Ok(entry)
    }

    async fn insert_session(&self, session: NewSession) -> Result<Session> {
        let mut tables = self.tables().write().await;
        let session = tables.prepare_session(session, Utc::now())?;
        self.commit(&mut tables, WalOperation::CreateSession(session.clone())).await?;
        Ok(session)
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>> {
        let tables = self.tables().read().await;
        Ok(tables.find_session(session_id).cloned())
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<Option<Session>> {
        let mut tables = self.tables().write().await;
        let Some(session) = tables.prepare_session_update(session_id, &update, Utc::now()) else {
            return Ok(None);
        };
        self.commit(&mut tables, WalOperation::UpdateSession(session.clone())).await?;
        Ok(Some(session))
    }

    async fn resolve_error_log(
        &self,
        id: u64,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<ErrorLog>> {
        let mut tables = self.tables().write().await;
        let Some(log) = tables.find_error_log(id).cloned() else {
            return Ok(None);
        };
        if log.resolved {
            return Ok(Some(log));
        }

        self.commit(&mut tables, WalOperation::ResolveErrorLog { id, resolved_at }).await?;
        Ok(tables.find_error_log(id).cloned())
    }

    async fn query_usage_events(&self, query: &UsageEventQuery) -> Result<Vec<UsageEvent>> {
        Ok(self.tables().read().await.usage_events(query))
    }

    async fn query_performance_metrics(
        &self,
        query: &MetricQuery,
    ) -> Result<Vec<PerformanceMetric>> {
        Ok(self.tables().read().await.performance_metrics(query))
    }

    async fn query_error_logs(&self, query: &ErrorLogQuery) -> Result<Vec<ErrorLog>> {
        Ok(self.tables().read().await.error_logs(query))
    }

    async fn query_cost_entries(&self, query: &CostQuery) -> Result<Vec<CostEntry>> {
        Ok(self.tables().read().await.cost_entries(query))
    }

    async fn list_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>> {
        Ok(self.tables().read().await.sessions(query))
    }

    async fn count_open_sessions(&self) -> Result<usize> {
        Ok(self.tables().read().await.count_open_sessions())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeStats> {
        let mut tables = self.tables().write().await;
        let stats = tables.purge_preview(cutoff);
        if stats.total() > 0 {
            self.commit(&mut tables, WalOperation::Purge { cutoff }).await?;
        }
        Ok(stats)
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(self.tables().read().await.stats())
    }
}

/// In-memory event store (for testing and ephemeral deployments)
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    tables: RwLock<Tables>,
}

impl InMemoryEventStore {
    /// Create a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TableBackend for InMemoryEventStore {
    fn tables(&self) -> &RwLock<Tables> {
        &self.tables
    }

    async fn commit(&self, tables: &mut Tables, operation: WalOperation) -> Result<()> {
        tables.apply(&operation)
    }
}

/// Local file-based event store: WAL for every mutation, snapshots for compaction
pub struct LocalEventStore {
    config: PersistenceConfig,
    tables: RwLock<Tables>,
    wal: Wal,
    snapshot_manager: SnapshotManager,
    entries_since_compaction: AtomicU64,
}

impl LocalEventStore {
    /// Open (or create) the store under `config.data_dir`, recovering previous state
    pub async fn open(config: PersistenceConfig) -> Result<Self> {
        // Validate configuration
        config.validate().map_err(PersistenceError::config)?;

        std::fs::create_dir_all(&config.data_dir).map_err(PersistenceError::Io)?;

        let snapshot_manager =
            SnapshotManager::new(config.snapshot.clone(), config.snapshots_dir())?;

        let (mut tables, snapshot_sequence) = match snapshot_manager.load_latest_snapshot().await? {
            Some(snapshot) => (snapshot.tables, snapshot.sequence),
            None => (Tables::new(), 0),
        };

        let wal = Wal::open(config.wal.clone(), config.wal_dir(), snapshot_sequence)?;

        let entries = wal.read_entries_after(snapshot_sequence).await?;
        let replayed = entries.len() as u64;
        for entry in &entries {
            tables.apply(&entry.operation)?;
        }

        let stats = tables.stats();
        tracing::info!(
            "Local event store opened at {:?}: snapshot sequence {}, {} WAL entries replayed, \
             {} events, {} metrics, {} errors, {} costs, {} sessions",
            config.data_dir,
            snapshot_sequence,
            replayed,
            stats.usage_events,
            stats.performance_metrics,
            stats.error_logs,
            stats.cost_entries,
            stats.sessions
        );

        Ok(Self {
            config,
            tables: RwLock::new(tables),
            wal,
            snapshot_manager,
            entries_since_compaction: AtomicU64::new(replayed),
        })
    }

    /// Snapshot the current state and drop the WAL files it covers; returns the sequence
    pub async fn compact(&self) -> Result<u64> {
        let tables = self.tables.write().await;
        self.compact_locked(&tables).await
    }

    /// Flush buffered WAL writes
    pub async fn flush(&self) -> Result<()> {
        self.wal.flush().await
    }

    /// Get the configuration
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Get the data directory
    pub fn data_dir(&self) -> &PathBuf {
        &self.config.data_dir
    }

    async fn compact_locked(&self, tables: &Tables) -> Result<u64> {
        let sequence = self.wal.last_sequence().await;
        self.snapshot_manager.create_snapshot(tables, sequence).await?;
        let removed = self.wal.remove_files_through(sequence).await?;
        self.entries_since_compaction.store(0, Ordering::Relaxed);

        tracing::info!("Compacted event store at sequence {} ({} WAL files removed)", sequence, removed);

        Ok(sequence)
    }
}

#[async_trait::async_trait]
impl TableBackend for LocalEventStore {
    fn tables(&self) -> &RwLock<Tables> {
        &self.tables
    }

    async fn commit(&self, tables: &mut Tables, operation: WalOperation) -> Result<()> {
        // Log first: the tables only change once the entry is durable
        self.wal.write_entry(operation.clone()).await?;
        tables.apply(&operation)?;

        let threshold = self.config.snapshot.compact_every_entries;
        let pending = self.entries_since_compaction.fetch_add(1, Ordering::Relaxed) + 1;
        if threshold > 0 && pending >= threshold {
            if let Err(e) = self.compact_locked(tables).await {
                // The mutation itself is durable in the WAL; compaction retries next time
                tracing::warn!("Automatic compaction failed: {}", e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Order, Page, TimeRange};
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_insert_echoes_fields_with_id_and_timestamp() {
        let store = InMemoryEventStore::new();
        let before = Utc::now();

        let mut new = NewUsageEvent::new("tool_call");
        new.tool_name = Some("sequential_thinking".to_string());
        new.response_time_ms = Some(120);
        new.session_id = Some("s-1".to_string());
        let event = store.insert_usage_event(new.clone()).await.unwrap();

        assert_eq!(event.id, 1);
        assert!(event.timestamp >= before);
        assert_eq!(event.tool_name, new.tool_name);
        assert_eq!(event.response_time_ms, Some(120));
        assert_eq!(event.session_id, new.session_id);
        assert!(event.success);
    }

    #[tokio::test]
    async fn test_session_uniqueness_enforced() {
        let store = InMemoryEventStore::new();
        store.insert_session(NewSession::new("dup")).await.unwrap();

        let err = store.insert_session(NewSession::new("dup")).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.stats().await.unwrap().sessions, 1);
    }

    #[tokio::test]
    async fn test_concurrent_session_inserts_create_one_row() {
        let store = Arc::new(InMemoryEventStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert_session(NewSession::new("race")).await
            }));
        }

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(e.is_conflict()),
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_update_unknown_session_is_none() {
        let store = InMemoryEventStore::new();
        let update = SessionUpdate { total_requests: Some(3), ..Default::default() };
        assert!(store.update_session("missing", update).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_error_log() {
        let store = InMemoryEventStore::new();
        let log = store.insert_error_log(NewErrorLog::new("ValueError", "bad input")).await.unwrap();
        let at = Utc::now();

        let resolved = store.resolve_error_log(log.id, at).await.unwrap().unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.resolved_at, Some(at));

        // Already resolved: unchanged
        let again = store.resolve_error_log(log.id, at + Duration::hours(1)).await.unwrap().unwrap();
        assert_eq!(again.resolved_at, Some(at));

        assert!(store.resolve_error_log(999, at).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_log_filters() {
        let store = InMemoryEventStore::new();
        store.insert_error_log(NewErrorLog::new("A", "one")).await.unwrap();
        let b = store.insert_error_log(NewErrorLog::new("B", "two")).await.unwrap();
        store.insert_error_log(NewErrorLog::new("A", "three")).await.unwrap();
        store.resolve_error_log(b.id, Utc::now()).await.unwrap();

        let only_a = store
            .query_error_logs(&ErrorLogQuery { error_type: Some("A".to_string()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(only_a.len(), 2);
        assert_eq!(only_a[0].error_message, "three");

        let resolved = store
            .query_error_logs(&ErrorLogQuery { resolved: Some(true), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, b.id);
    }

    #[tokio::test]
    async fn test_sessions_listed_newest_created_first() {
        let store = InMemoryEventStore::new();
        for id in ["a", "b", "c"] {
            store.insert_session(NewSession::new(id)).await.unwrap();
        }

        let sessions = store.list_sessions(&SessionQuery::default()).await.unwrap();
        let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let page = store
            .list_sessions(&SessionQuery { page: Page::new(1, 1), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page[0].session_id, "b");
    }

    #[tokio::test]
    async fn test_cost_entries_filtered_by_service_and_range() {
        let store = InMemoryEventStore::new();
        let now = Utc::now();
        let mut old = NewCostEntry::new("langdb", "chat_completion", 3.0);
        old.timestamp = Some(now - Duration::days(3));
        store.insert_cost_entry(old).await.unwrap();
        store.insert_cost_entry(NewCostEntry::new("langdb", "chat_completion", 1.0)).await.unwrap();
        store.insert_cost_entry(NewCostEntry::new("modal", "webhook", 2.0)).await.unwrap();

        let rows = store
            .query_cost_entries(&CostQuery {
                service_name: Some("langdb".to_string()),
                range: TimeRange::since(now - Duration::days(1)),
                order: Order::OldestFirst,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cost_usd, 1.0);
    }
}
