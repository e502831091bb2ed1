use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::Content;
use crate::error::{Error, Result};
use crate::permissions::{self, Capability};
use crate::role::Caller;
use crate::storage::{Store, Tables};

/// Immutable copy of a document as it stood before a mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub document_id: Uuid,
    pub version_number: u64,
    pub title: String,
    pub content: Content,
    pub editor: String,
    pub change_note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Consistency {
    Consistent,
    /// The newest row does not sit directly below the document's version.
    Gap { document_version: u64, newest_row: Option<u64> },
}

pub struct VersionStore {
    store: Arc<Store>,
}

impl VersionStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Write the document's current state as version `document.version`.
    /// Must run inside the transaction that then overwrites the document.
    pub fn snapshot(t: &mut Tables, document_id: Uuid, editor: &str, note: &str) -> Result<u64> {
        let doc = t
            .documents
            .get(&document_id)
            .ok_or_else(|| Error::not_found("document", document_id))?;
        let rows = t.versions.entry(document_id).or_default();
        if rows.last().is_some_and(|row| row.version_number >= doc.version) {
            return Err(Error::Conflict(format!(
                "version {} of document {document_id} already recorded",
                doc.version
            )));
        }
        rows.push(DocumentVersion {
            document_id,
            version_number: doc.version,
            title: doc.title.clone(),
            content: doc.content.clone(),
            editor: editor.to_string(),
            change_note: note.to_string(),
            created_at: Utc::now(),
        });
        Ok(doc.version)
    }

    pub async fn history(&self, document_id: Uuid, caller: &Caller) -> Result<Vec<DocumentVersion>> {
        self.store
            .read(|t| {
                authorize(t, document_id, caller)?;
                let mut rows = t.versions.get(&document_id).cloned().unwrap_or_default();
                rows.reverse();
                Ok(rows)
            })
            .await
    }

    pub async fn version(&self, document_id: Uuid, number: u64, caller: &Caller) -> Result<DocumentVersion> {
        self.store
            .read(|t| {
                authorize(t, document_id, caller)?;
                t.versions
                    .get(&document_id)
                    .and_then(|rows| rows.iter().find(|row| row.version_number == number))
                    .cloned()
                    .ok_or_else(|| Error::not_found("version", format!("{document_id}@{number}")))
            })
            .await
    }

    pub async fn verify(&self, document_id: Uuid) -> Result<Consistency> {
        self.store
            .read(|t| {
                let doc = t
                    .documents
                    .get(&document_id)
                    .ok_or_else(|| Error::not_found("document", document_id))?;
                let newest = t
                    .versions
                    .get(&document_id)
                    .and_then(|rows| rows.last())
                    .map(|row| row.version_number);
                let expected = doc.version.checked_sub(1).filter(|v| *v > 0);
                Ok(if newest == expected {
                    Consistency::Consistent
                } else {
                    Consistency::Gap {
                        document_version: doc.version,
                        newest_row: newest,
                    }
                })
            })
            .await
    }
}

/// History survives a hard delete; only admins may read it then.
fn authorize(t: &Tables, document_id: Uuid, caller: &Caller) -> Result<()> {
    if caller.role.is_admin() {
        return Ok(());
    }
    if !t.documents.contains_key(&document_id) {
        return Err(Error::not_found("document", document_id));
    }
    permissions::require(t, document_id, caller, Capability::Read)
}
