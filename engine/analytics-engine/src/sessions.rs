//! # Session Tracking
//!
//! Idempotent session creation and partial updates keyed by the client's session id.

use crate::analytics::SessionDetail;
use crate::error::{AnalyticsError, Result};
use crate::ingestion;
use persistence::{
    EventStore, MetricQuery, NewSession, Page, PersistenceError, Session, SessionUpdate,
    UsageEventQuery,
};
use std::sync::Arc;

/// Session tracker over an event store
#[derive(Clone)]
pub struct SessionTracker {
    store: Arc<dyn EventStore>,
    detail_limit: usize,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn EventStore>, detail_limit: usize) -> Self {
        Self { store, detail_limit }
    }

    /// Get the session with this id, creating it if absent. An existing session is returned
    /// unchanged; the attributes in `new` only apply to a fresh one.
    pub async fn create_or_get(&self, new: NewSession) -> Result<Session> {
        ingestion::validate_session(&new)?;

        // Check if session exists
        if let Some(session) = self.store.find_session(&new.session_id).await? {
            return Ok(session);
        }

        let session_id = new.session_id.clone();
        match self.store.insert_session(new).await {
            Ok(session) => {
                tracing::debug!("Created session {}", session.session_id);
                Ok(session)
            }
            // Lost a race with a concurrent create: return the winner's row
            Err(e) if e.is_conflict() => match self.store.find_session(&session_id).await? {
                Some(session) => Ok(session),
                None => Err(AnalyticsError::Storage(PersistenceError::invalid_operation(
                    format!("session {session_id} conflicted but could not be read back"),
                ))),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Apply the present fields of `update`; `None` if the session does not exist
    pub async fn update(&self, session_id: &str, update: SessionUpdate) -> Result<Option<Session>> {
        ingestion::validate_session_update(&update)?;
        Ok(self.store.update_session(session_id, update).await?)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.store.find_session(session_id).await?)
    }

    /// The session with its latest events (newest first) and the latest metrics overall
    pub async fn detail(&self, session_id: &str) -> Result<Option<SessionDetail>> {
        let Some(session) = self.store.find_session(session_id).await? else {
            return Ok(None);
        };

        let recent_events = self
            .store
            .query_usage_events(&UsageEventQuery {
                session_id: Some(session_id.to_string()),
                page: Page::first(self.detail_limit),
                ..Default::default()
            })
            .await?;

        let recent_metrics = self
            .store
            .query_performance_metrics(&MetricQuery {
                page: Page::first(self.detail_limit),
                ..Default::default()
            })
            .await?;

        Ok(Some(SessionDetail { session, recent_events, recent_metrics }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::{InMemoryEventStore, NewPerformanceMetric, NewUsageEvent};
    use serde_json::json;

    fn tracker() -> (Arc<InMemoryEventStore>, SessionTracker) {
        let store = Arc::new(InMemoryEventStore::new());
        let tracker = SessionTracker::new(store.clone(), 100);
        (store, tracker)
    }

    #[tokio::test]
    async fn test_create_or_get_is_idempotent() {
        let (store, tracker) = tracker();

        let mut first = NewSession::new("abc");
        first.user_agent = Some("claude-desktop".to_string());
        let created = tracker.create_or_get(first).await.unwrap();

        let mut second = NewSession::new("abc");
        second.user_agent = Some("other-client".to_string());
        second.metadata = json!({"k": 1}).as_object().cloned();
        let again = tracker.create_or_get(second).await.unwrap();

        assert_eq!(created, again);
        assert_eq!(again.user_agent.as_deref(), Some("claude-desktop"));
        assert_eq!(again.total_requests, 0);
        assert_eq!(store.stats().await.unwrap().sessions, 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_return_same_row() {
        let (store, tracker) = tracker();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.create_or_get(NewSession::new("racy")).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.stats().await.unwrap().sessions, 1);
    }

    #[tokio::test]
    async fn test_partial_update() {
        let (_, tracker) = tracker();
        let mut new = NewSession::new("s");
        new.user_agent = Some("ua".to_string());
        tracker.create_or_get(new).await.unwrap();

        let updated = tracker
            .update("s", SessionUpdate { total_requests: Some(5), ..Default::default() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.total_requests, 5);
        assert_eq!(updated.total_errors, 0);
        assert_eq!(updated.user_agent.as_deref(), Some("ua"));
        assert!(updated.updated_at.is_some());
        assert!(updated.is_open());

        assert!(tracker.update("missing", SessionUpdate::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_detail_scopes_events_but_not_metrics() {
        let (store, tracker) = tracker();
        tracker.create_or_get(NewSession::new("mine")).await.unwrap();

        for session in ["mine", "other", "mine"] {
            let mut event = NewUsageEvent::new("tool_call");
            event.session_id = Some(session.to_string());
            store.insert_usage_event(event).await.unwrap();
        }
        let mut metric = NewPerformanceMetric::new("latency", 12.0);
        metric.session_id = Some("other".to_string());
        store.insert_performance_metric(metric).await.unwrap();

        let detail = tracker.detail("mine").await.unwrap().unwrap();
        assert_eq!(detail.recent_events.len(), 2);
        assert!(detail.recent_events[0].id > detail.recent_events[1].id);
        assert_eq!(detail.recent_metrics.len(), 1);

        assert!(tracker.detail("nobody").await.unwrap().is_none());
    }
}
