//! Append-only usage log and the metrics derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::permissions::{self, Capability};
use crate::role::Caller;
use crate::storage::{Store, Tables};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    View,
    Edit,
    Favorite,
    Share,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub user_id: String,
    pub document_id: Uuid,
    pub action: ActivityAction,
    pub timestamp: DateTime<Utc>,
    /// Seconds spent on the document, when the client reported it.
    pub session_duration: Option<u32>,
}

impl ActivityRecord {
    pub fn new(
        user_id: impl Into<String>,
        document_id: Uuid,
        action: ActivityAction,
        session_duration: Option<u32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            document_id,
            action,
            timestamp: Utc::now(),
            session_duration,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DocumentMetrics {
    pub total_views: u64,
    pub unique_viewers: u64,
    pub average_read_time: f64,
    pub favorite_count: u64,
    pub last_viewed: Option<DateTime<Utc>>,
}

impl DocumentMetrics {
    fn compute(log: &[ActivityRecord], document_id: Uuid, favorite_count: u64) -> Self {
        let views: Vec<&ActivityRecord> = log
            .iter()
            .filter(|r| r.document_id == document_id && r.action == ActivityAction::View)
            .collect();
        let viewers: HashSet<&str> = views.iter().map(|r| r.user_id.as_str()).collect();
        let durations: Vec<u32> = views.iter().filter_map(|r| r.session_duration).collect();
        let average_read_time = if durations.is_empty() {
            0.0
        } else {
            durations.iter().map(|d| *d as f64).sum::<f64>() / durations.len() as f64
        };
        Self {
            total_views: views.len() as u64,
            unique_viewers: viewers.len() as u64,
            average_read_time,
            favorite_count,
            last_viewed: views.iter().map(|r| r.timestamp).max(),
        }
    }
}

#[derive(Clone)]
pub struct ActivityRecorder {
    store: Arc<Store>,
}

impl ActivityRecorder {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Append a record. Failures are logged and swallowed.
    pub async fn record(
        &self,
        user_id: &str,
        document_id: Uuid,
        action: ActivityAction,
        session_duration: Option<u32>,
    ) {
        let record = ActivityRecord::new(user_id, document_id, action, session_duration);
        if let Err(err) = self.store.append_activity(record).await {
            warn!(error = %err, document = %document_id, ?action, "failed to record activity");
        }
    }

    pub async fn record_view(
        &self,
        document_id: Uuid,
        caller: &Caller,
        session_duration: Option<u32>,
    ) -> Result<()> {
        self.store
            .read(|t| readable(t, document_id, caller))
            .await?;
        self.record(&caller.user_id, document_id, ActivityAction::View, session_duration)
            .await;
        Ok(())
    }

    pub async fn metrics(&self, document_id: Uuid, caller: &Caller) -> Result<DocumentMetrics> {
        let favorite_count = self
            .store
            .read(|t| {
                readable(t, document_id, caller)?;
                Ok::<_, Error>(
                    t.favorites
                        .iter()
                        .filter(|f| f.document_id == document_id)
                        .count() as u64,
                )
            })
            .await?;
        Ok(self
            .store
            .read_activity(|log| DocumentMetrics::compute(log, document_id, favorite_count))
            .await)
    }

    pub async fn history(&self, document_id: Uuid) -> Vec<ActivityRecord> {
        self.store
            .read_activity(|log| {
                log.iter()
                    .filter(|r| r.document_id == document_id)
                    .cloned()
                    .collect()
            })
            .await
    }
}

fn readable(t: &Tables, document_id: Uuid, caller: &Caller) -> Result<()> {
    if !t.documents.contains_key(&document_id) {
        return Err(Error::not_found("document", document_id));
    }
    permissions::require(t, document_id, caller, Capability::Read)
}
