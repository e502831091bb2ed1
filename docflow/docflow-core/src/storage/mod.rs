//! Persisted tables behind a single async lock.
//!
//! Every mutation runs as a transaction: the closure works on a staged copy of
//! the tables, the staged copy is written to disk, and only then does it
//! replace the live state. A failure anywhere leaves the live tables untouched.
//!
//! Activity records are append-only and live outside the tables, in a
//! JSON-lines log that grows one line per record.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activity::ActivityRecord;
use crate::catalog::{Document, Favorite, Label};
use crate::error::{Result, StorageError};
use crate::permissions::PermissionRow;
use crate::versions::DocumentVersion;
use crate::workflow::WorkflowRequest;

#[cfg(test)]
mod tests;

const TABLE_FILE: &str = "docflow.json";
const ACTIVITY_FILE: &str = "activity.jsonl";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tables {
    pub documents: HashMap<Uuid, Document>,
    pub labels: HashMap<Uuid, Label>,
    /// (document, label) pairs.
    pub document_labels: BTreeSet<(Uuid, Uuid)>,
    pub permissions: HashMap<Uuid, Vec<PermissionRow>>,
    pub versions: HashMap<Uuid, Vec<DocumentVersion>>,
    pub favorites: Vec<Favorite>,
    pub requests: HashMap<Uuid, WorkflowRequest>,
}

impl Tables {
    pub fn labels_of(&self, document_id: Uuid) -> Vec<Label> {
        let mut labels: Vec<Label> = self
            .document_labels
            .range((document_id, Uuid::nil())..=(document_id, Uuid::from_u128(u128::MAX)))
            .filter_map(|(_, label_id)| self.labels.get(label_id).cloned())
            .collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        labels
    }

    /// Full replace of a document's label set.
    pub fn set_labels(&mut self, document_id: Uuid, labels: &[Uuid]) {
        self.clear_labels(document_id);
        for label in labels {
            self.document_labels.insert((document_id, *label));
        }
    }

    pub fn clear_labels(&mut self, document_id: Uuid) {
        self.document_labels.retain(|(doc, _)| *doc != document_id);
    }
}

pub struct Store {
    tables: RwLock<Tables>,
    activity: RwLock<Vec<ActivityRecord>>,
    path: Option<PathBuf>,
    activity_path: Option<PathBuf>,
}

impl Store {
    /// Volatile store, used by tests and ephemeral deployments.
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            activity: RwLock::new(Vec::new()),
            path: None,
            activity_path: None,
        }
    }

    /// Open (or create) the table file inside `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(TABLE_FILE);
        let tables = if tokio::fs::try_exists(&path).await? {
            let bytes = retry_once(|| tokio::fs::read(&path)).await?;
            serde_json::from_slice(&bytes).map_err(StorageError::from)?
        } else {
            Tables::default()
        };
        let activity_path = dir.join(ACTIVITY_FILE);
        let activity = if tokio::fs::try_exists(&activity_path).await? {
            let text = retry_once(|| tokio::fs::read_to_string(&activity_path)).await?;
            if !text.is_empty() && !text.ends_with('\n') {
                retry_once(|| append_line(&activity_path, b"\n")).await?;
            }
            parse_activity(&text)
        } else {
            Vec::new()
        };
        debug!(
            path = %path.display(),
            documents = tables.documents.len(),
            activity = activity.len(),
            "opened store"
        );
        Ok(Self {
            tables: RwLock::new(tables),
            activity: RwLock::new(activity),
            path: Some(path),
            activity_path: Some(activity_path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let guard = self.tables.read().await;
        f(&guard)
    }

    /// Apply `f` atomically. Nothing is visible to readers until the staged
    /// tables have been persisted.
    pub async fn transaction<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut guard = self.tables.write().await;
        let mut staged = guard.clone();
        let out = f(&mut staged)?;
        self.persist(&staged).await?;
        *guard = staged;
        Ok(out)
    }

    pub async fn read_activity<T>(&self, f: impl FnOnce(&[ActivityRecord]) -> T) -> T {
        let guard = self.activity.read().await;
        f(&guard)
    }

    /// Append one record to the activity log without touching the tables.
    pub async fn append_activity(&self, record: ActivityRecord) -> Result<()> {
        let mut log = self.activity.write().await;
        if let Some(path) = &self.activity_path {
            let mut line = serde_json::to_vec(&record).map_err(StorageError::from)?;
            line.push(b'\n');
            retry_once(|| append_line(path, &line)).await?;
        }
        log.push(record);
        Ok(())
    }

    async fn persist(&self, tables: &Tables) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(tables).map_err(StorageError::from)?;
        retry_once(|| write_atomic(path, &bytes)).await?;
        Ok(())
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn append_line(path: &Path, line: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line).await?;
    file.sync_data().await
}

/// A torn last line from an interrupted append is skipped.
fn parse_activity(text: &str) -> Vec<ActivityRecord> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(error = %err, "skipping unreadable activity line");
                None
            }
        })
        .collect()
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
    )
}

/// Run a storage call, retrying exactly once when the first failure is transient.
pub(crate) async fn retry_once<T, F, Fut>(mut op: F) -> std::io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    match op().await {
        Err(err) if is_transient(&err) => {
            warn!(error = %err, "transient storage failure, retrying once");
            op().await
        }
        res => res,
    }
}
