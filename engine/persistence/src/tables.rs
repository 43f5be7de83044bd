//! In-memory tables shared by every backend
//!
//! Mutations go through [`Tables::apply`] with a [`WalOperation`], so the durable backend can
//! rebuild exactly the same state by replaying its log.

use crate::error::{PersistenceError, Result};
use crate::query::{
    CostQuery, ErrorLogQuery, MetricQuery, Order, Page, SessionQuery, UsageEventQuery,
};
use crate::records::{
    CostEntry, ErrorLog, NewCostEntry, NewErrorLog, NewPerformanceMetric, NewSession,
    NewUsageEvent, PerformanceMetric, Session, SessionUpdate, UsageEvent,
};
use crate::wal::WalOperation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub usage_events: usize,
    pub performance_metrics: usize,
    pub error_logs: usize,
    pub cost_entries: usize,
    pub sessions: usize,
    pub open_sessions: usize,
}

impl StoreStats {
    /// Rows across all tables
    pub fn total(&self) -> usize {
        self.usage_events
            + self.performance_metrics
            + self.error_logs
            + self.cost_entries
            + self.sessions
    }
}

/// Rows removed by a retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeStats {
    pub usage_events: usize,
    pub performance_metrics: usize,
    pub error_logs: usize,
    pub cost_entries: usize,
}

impl PurgeStats {
    pub fn total(&self) -> usize {
        self.usage_events + self.performance_metrics + self.error_logs + self.cost_entries
    }
}

/// Next id to hand out per table
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct IdCounters {
    usage_event: u64,
    performance_metric: u64,
    error_log: u64,
    cost_entry: u64,
    session: u64,
}

impl Default for IdCounters {
    fn default() -> Self {
        Self { usage_event: 1, performance_metric: 1, error_log: 1, cost_entry: 1, session: 1 }
    }
}

/// Complete store state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    usage_events: Vec<UsageEvent>,
    performance_metrics: Vec<PerformanceMetric>,
    error_logs: Vec<ErrorLog>,
    cost_entries: Vec<CostEntry>,
    sessions: Vec<Session>,
    next_ids: IdCounters,
    /// Latest server-assigned timestamp; new stamps never go below it
    last_assigned: Option<DateTime<Utc>>,
    #[serde(skip)]
    session_index: HashMap<String, usize>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild derived indexes after deserializing a snapshot
    pub(crate) fn rebuild_index(&mut self) {
        self.session_index = self
            .sessions
            .iter()
            .enumerate()
            .map(|(pos, session)| (session.session_id.clone(), pos))
            .collect();
    }

    fn stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_assigned {
            Some(last) if last > now => last,
            _ => now,
        }
    }

    /// Caller-supplied timestamps may lie in the future; the floor never moves past the wall clock
    fn observe_stamp(&mut self, ts: DateTime<Utc>) {
        let ts = ts.min(Utc::now());
        if self.last_assigned.map_or(true, |last| ts > last) {
            self.last_assigned = Some(ts);
        }
    }

    // Record construction. These never mutate; the result is committed through `apply`.

    pub(crate) fn prepare_usage_event(&self, new: NewUsageEvent, now: DateTime<Utc>) -> UsageEvent {
        let timestamp = new.timestamp.unwrap_or_else(|| self.stamp(now));
        new.into_record(self.next_ids.usage_event, timestamp)
    }

    pub(crate) fn prepare_performance_metric(
        &self,
        new: NewPerformanceMetric,
        now: DateTime<Utc>,
    ) -> PerformanceMetric {
        let timestamp = new.timestamp.unwrap_or_else(|| self.stamp(now));
        new.into_record(self.next_ids.performance_metric, timestamp)
    }

    pub(crate) fn prepare_error_log(&self, new: NewErrorLog, now: DateTime<Utc>) -> ErrorLog {
        let timestamp = new.timestamp.unwrap_or_else(|| self.stamp(now));
        new.into_record(self.next_ids.error_log, timestamp)
    }

    pub(crate) fn prepare_cost_entry(&self, new: NewCostEntry, now: DateTime<Utc>) -> CostEntry {
        let timestamp = new.timestamp.unwrap_or_else(|| self.stamp(now));
        new.into_record(self.next_ids.cost_entry, timestamp)
    }

    /// Fails with `AlreadyExists` when the session id is taken
    pub(crate) fn prepare_session(&self, new: NewSession, now: DateTime<Utc>) -> Result<Session> {
        if self.session_index.contains_key(&new.session_id) {
            return Err(PersistenceError::already_exists(format!("session {}", new.session_id)));
        }
        Ok(new.into_record(self.next_ids.session, self.stamp(now)))
    }

    pub(crate) fn prepare_session_update(
        &self,
        session_id: &str,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Option<Session> {
        let mut session = self.find_session(session_id)?.clone();
        update.apply_to(&mut session, self.stamp(now));
        Some(session)
    }

    /// Apply one logged operation
    pub(crate) fn apply(&mut self, operation: &WalOperation) -> Result<()> {
        match operation {
            WalOperation::RecordUsageEvent(event) => {
                self.next_ids.usage_event = self.next_ids.usage_event.max(event.id + 1);
                self.observe_stamp(event.timestamp);
                self.usage_events.push(event.clone());
            }
            WalOperation::RecordPerformanceMetric(metric) => {
                self.next_ids.performance_metric =
                    self.next_ids.performance_metric.max(metric.id + 1);
                self.observe_stamp(metric.timestamp);
                self.performance_metrics.push(metric.clone());
            }
            WalOperation::RecordErrorLog(log) => {
                self.next_ids.error_log = self.next_ids.error_log.max(log.id + 1);
                self.observe_stamp(log.timestamp);
                self.error_logs.push(log.clone());
            }
            WalOperation::RecordCostEntry(entry) => {
                self.next_ids.cost_entry = self.next_ids.cost_entry.max(entry.id + 1);
                self.observe_stamp(entry.timestamp);
                self.cost_entries.push(entry.clone());
            }
            WalOperation::CreateSession(session) => {
                if self.session_index.contains_key(&session.session_id) {
                    return Err(PersistenceError::corruption(format!(
                        "duplicate session {} in log",
                        session.session_id
                    )));
                }
                self.next_ids.session = self.next_ids.session.max(session.id + 1);
                self.observe_stamp(session.created_at);
                self.session_index.insert(session.session_id.clone(), self.sessions.len());
                self.sessions.push(session.clone());
            }
            WalOperation::UpdateSession(session) => {
                let pos = *self.session_index.get(&session.session_id).ok_or_else(|| {
                    PersistenceError::corruption(format!(
                        "update for unknown session {}",
                        session.session_id
                    ))
                })?;
                if let Some(updated_at) = session.updated_at {
                    self.observe_stamp(updated_at);
                }
                self.sessions[pos] = session.clone();
            }
            WalOperation::ResolveErrorLog { id, resolved_at } => {
                let log = self.error_logs.iter_mut().find(|log| log.id == *id).ok_or_else(|| {
                    PersistenceError::corruption(format!("resolution for unknown error log {id}"))
                })?;
                log.resolved = true;
                log.resolved_at = Some(*resolved_at);
            }
            WalOperation::Purge { cutoff } => {
                let cutoff = *cutoff;
                self.usage_events.retain(|row| row.timestamp >= cutoff);
                self.performance_metrics.retain(|row| row.timestamp >= cutoff);
                self.error_logs.retain(|row| row.timestamp >= cutoff);
                self.cost_entries.retain(|row| row.timestamp >= cutoff);
            }
        }
        Ok(())
    }

    // Reads

    pub fn find_session(&self, session_id: &str) -> Option<&Session> {
        self.session_index.get(session_id).map(|&pos| &self.sessions[pos])
    }

    pub fn find_error_log(&self, id: u64) -> Option<&ErrorLog> {
        self.error_logs.iter().find(|log| log.id == id)
    }

    pub fn usage_events(&self, query: &UsageEventQuery) -> Vec<UsageEvent> {
        let rows = self.usage_events.iter().filter(|row| {
            query.range.contains(row.timestamp)
                && matches_opt(&query.session_id, &row.session_id)
                && query.event_type.as_ref().map_or(true, |t| *t == row.event_type)
                && matches_opt(&query.tool_name, &row.tool_name)
        });
        select(rows, |row| (row.timestamp, row.id), query.order, query.page)
    }

    pub fn performance_metrics(&self, query: &MetricQuery) -> Vec<PerformanceMetric> {
        let rows = self.performance_metrics.iter().filter(|row| {
            query.range.contains(row.timestamp)
                && query.metric_name.as_ref().map_or(true, |n| *n == row.metric_name)
                && matches_opt(&query.session_id, &row.session_id)
        });
        select(rows, |row| (row.timestamp, row.id), query.order, query.page)
    }

    pub fn error_logs(&self, query: &ErrorLogQuery) -> Vec<ErrorLog> {
        let rows = self.error_logs.iter().filter(|row| {
            query.range.contains(row.timestamp)
                && matches_opt(&query.session_id, &row.session_id)
                && query.error_type.as_ref().map_or(true, |t| *t == row.error_type)
                && query.resolved.map_or(true, |r| r == row.resolved)
        });
        select(rows, |row| (row.timestamp, row.id), query.order, query.page)
    }

    pub fn cost_entries(&self, query: &CostQuery) -> Vec<CostEntry> {
        let rows = self.cost_entries.iter().filter(|row| {
            query.range.contains(row.timestamp)
                && query.service_name.as_ref().map_or(true, |s| *s == row.service_name)
                && matches_opt(&query.session_id, &row.session_id)
        });
        select(rows, |row| (row.timestamp, row.id), query.order, query.page)
    }

    pub fn sessions(&self, query: &SessionQuery) -> Vec<Session> {
        let rows = self.sessions.iter().filter(|row| {
            query.range.contains(row.created_at) && query.open.map_or(true, |o| o == row.is_open())
        });
        select(rows, |row| (row.created_at, row.id), query.order, query.page)
    }

    pub fn count_open_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_open()).count()
    }

    /// What a purge at `cutoff` would remove
    pub fn purge_preview(&self, cutoff: DateTime<Utc>) -> PurgeStats {
        PurgeStats {
            usage_events: self.usage_events.iter().filter(|r| r.timestamp < cutoff).count(),
            performance_metrics: self
                .performance_metrics
                .iter()
                .filter(|r| r.timestamp < cutoff)
                .count(),
            error_logs: self.error_logs.iter().filter(|r| r.timestamp < cutoff).count(),
            cost_entries: self.cost_entries.iter().filter(|r| r.timestamp < cutoff).count(),
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            usage_events: self.usage_events.len(),
            performance_metrics: self.performance_metrics.len(),
            error_logs: self.error_logs.len(),
            cost_entries: self.cost_entries.len(),
            sessions: self.sessions.len(),
            open_sessions: self.count_open_sessions(),
        }
    }
}

fn matches_opt(filter: &Option<String>, value: &Option<String>) -> bool {
    match filter {
        Some(wanted) => value.as_deref() == Some(wanted.as_str()),
        None => true,
    }
}

/// Order, page and clone the matching rows
fn select<'a, T, I, K>(rows: I, key: K, order: Order, page: Page) -> Vec<T>
where
    T: Clone + 'a,
    I: Iterator<Item = &'a T>,
    K: Fn(&T) -> (DateTime<Utc>, u64),
{
    let mut rows: Vec<&T> = rows.collect();
    match order {
        Order::NewestFirst => rows.sort_by(|a, b| key(b).cmp(&key(a))),
        Order::OldestFirst => rows.sort_by_key(|row| key(row)),
    }
    rows.into_iter()
        .skip(page.offset)
        .take(page.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TimeRange;
    use chrono::Duration;

    fn record_event(tables: &mut Tables, new: NewUsageEvent, now: DateTime<Utc>) -> UsageEvent {
        let event = tables.prepare_usage_event(new, now);
        tables.apply(&WalOperation::RecordUsageEvent(event.clone())).unwrap();
        event
    }

    #[test]
    fn test_ids_are_sequential_per_table() {
        let mut tables = Tables::new();
        let now = Utc::now();

        let first = record_event(&mut tables, NewUsageEvent::new("tool_call"), now);
        let second = record_event(&mut tables, NewUsageEvent::new("tool_call"), now);
        let metric = tables.prepare_performance_metric(NewPerformanceMetric::new("rss", 1.0), now);

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(metric.id, 1);
    }

    #[test]
    fn test_server_timestamps_never_go_backwards() {
        let mut tables = Tables::new();
        let now = Utc::now();

        let first = record_event(&mut tables, NewUsageEvent::new("tool_call"), now);
        let second =
            record_event(&mut tables, NewUsageEvent::new("tool_call"), now - Duration::seconds(30));

        assert!(second.timestamp >= first.timestamp);
    }

    #[test]
    fn test_future_caller_timestamp_does_not_move_server_stamps() {
        let mut tables = Tables::new();
        let now = Utc::now();
        let future = now + Duration::days(30);

        let mut skewed = NewUsageEvent::new("tool_call");
        skewed.timestamp = Some(future);
        assert_eq!(record_event(&mut tables, skewed, now).timestamp, future);

        let fresh = record_event(&mut tables, NewUsageEvent::new("tool_call"), now);
        assert!(fresh.timestamp <= Utc::now());
        let cost = tables.prepare_cost_entry(NewCostEntry::new("langdb", "chat", 1.0), now);
        assert!(cost.timestamp <= Utc::now());
        let session = tables.prepare_session(NewSession::new("after-skew"), now).unwrap();
        assert!(session.created_at <= Utc::now());
    }

    #[test]
    fn test_caller_timestamp_is_kept() {
        let mut tables = Tables::new();
        let now = Utc::now();
        let earlier = now - Duration::days(2);

        let mut new = NewUsageEvent::new("webhook");
        new.timestamp = Some(earlier);
        let event = record_event(&mut tables, new, now);

        assert_eq!(event.timestamp, earlier);
    }

    #[test]
    fn test_query_orders_newest_first_and_pages() {
        let mut tables = Tables::new();
        let base = Utc::now() - Duration::hours(1);
        for minute in 0..5 {
            let mut new = NewUsageEvent::new("tool_call");
            new.timestamp = Some(base + Duration::minutes(minute));
            record_event(&mut tables, new, base);
        }

        let rows = tables.usage_events(&UsageEventQuery {
            page: Page::new(1, 2),
            ..Default::default()
        });
        let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 3]);

        let rows = tables.usage_events(&UsageEventQuery {
            order: Order::OldestFirst,
            range: TimeRange::since(base + Duration::minutes(3)),
            ..Default::default()
        });
        let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let mut tables = Tables::new();
        let now = Utc::now();
        let session = tables.prepare_session(NewSession::new("abc"), now).unwrap();
        tables.apply(&WalOperation::CreateSession(session)).unwrap();

        let err = tables.prepare_session(NewSession::new("abc"), now).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_purge_keeps_sessions_and_recent_rows() {
        let mut tables = Tables::new();
        let now = Utc::now();
        let mut old = NewUsageEvent::new("tool_call");
        old.timestamp = Some(now - Duration::days(100));
        record_event(&mut tables, old, now);
        record_event(&mut tables, NewUsageEvent::new("tool_call"), now);
        let session = tables.prepare_session(NewSession::new("s"), now).unwrap();
        tables.apply(&WalOperation::CreateSession(session)).unwrap();

        let cutoff = now - Duration::days(90);
        assert_eq!(tables.purge_preview(cutoff).usage_events, 1);
        tables.apply(&WalOperation::Purge { cutoff }).unwrap();

        let stats = tables.stats();
        assert_eq!(stats.usage_events, 1);
        assert_eq!(stats.sessions, 1);
    }

    #[test]
    fn test_rebuild_index_after_roundtrip() {
        let mut tables = Tables::new();
        let session = tables.prepare_session(NewSession::new("s-9"), Utc::now()).unwrap();
        tables.apply(&WalOperation::CreateSession(session)).unwrap();

        let json = serde_json::to_string(&tables).unwrap();
        let mut restored: Tables = serde_json::from_str(&json).unwrap();
        assert!(restored.find_session("s-9").is_none());
        restored.rebuild_index();
        assert!(restored.find_session("s-9").is_some());
    }
}
