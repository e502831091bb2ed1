//! Document records, labels and favorites.
//!
//! Every mutation goes through a single store transaction that also writes the
//! version snapshot and permission rows. The search index is refreshed after
//! commit; a failed index write is logged and left for the next rebuild.

mod query;

pub use query::{ListFilters, Page, Pager, Sort, SortKey, SortOrder, DEFAULT_LIMIT, MAX_LIMIT};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity::{ActivityAction, ActivityRecorder};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::permissions::{self, Capability};
use crate::role::Caller;
use crate::search::SearchIndex;
use crate::storage::{Store, Tables};
use crate::versions::VersionStore;

pub const DEFAULT_READ_TIME: u32 = 5;
pub const DEFAULT_LABEL_COLOR: &str = "#3B82F6";
pub const DEFAULT_CHANGE_NOTE: &str = "automatic revision";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Business,
    Technical,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Business, Category::Technical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Business => "business",
            Category::Technical => "technical",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| Error::validation("category", format!("unknown category `{s}`")))
    }
}

/// Inline text, or a reference into the external blob store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blob { blob_key: String, name: String },
}

impl Content {
    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.trim().is_empty(),
            Content::Blob { blob_key, .. } => blob_key.trim().is_empty(),
        }
    }

    pub fn searchable_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Blob { name, .. } => name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub content: Content,
    pub category: Category,
    /// Estimated minutes.
    pub read_time: u32,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub created_by: String,
    pub is_active: bool,
    pub version: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewLabel {
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Favorite {
    pub user_id: String,
    pub document_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewDocument {
    pub title: String,
    pub description: Option<String>,
    pub content: Content,
    pub category: Category,
    #[serde(default)]
    pub labels: Vec<Uuid>,
    pub read_time: Option<u32>,
}

/// Fields left as `None` keep their current value.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<Content>,
    pub category: Option<Category>,
    /// Full replacement of the label set.
    pub labels: Option<Vec<Uuid>>,
    pub read_time: Option<u32>,
    pub is_active: Option<bool>,
    pub change_note: Option<String>,
}

/// A document joined with its labels.
#[derive(Clone, Debug, Serialize)]
pub struct DocumentView {
    #[serde(flatten)]
    pub document: Document,
    pub labels: Vec<Label>,
}

impl DocumentView {
    fn load(t: &Tables, doc: &Document) -> Self {
        Self {
            document: doc.clone(),
            labels: t.labels_of(doc.id),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CatalogStats {
    pub total_documents: u64,
    pub inactive_documents: u64,
    pub by_category: BTreeMap<Category, u64>,
    pub by_label: BTreeMap<String, u64>,
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::validation("title", "must not be empty"));
    }
    Ok(())
}

fn validate_content(content: &Content) -> Result<()> {
    if content.is_empty() {
        return Err(Error::validation("content", "must not be empty"));
    }
    Ok(())
}

fn validate_read_time(minutes: u32) -> Result<()> {
    if !(1..=60).contains(&minutes) {
        return Err(Error::validation("read_time", "must be between 1 and 60 minutes"));
    }
    Ok(())
}

fn validate_color(color: &str) -> Result<()> {
    let hex = color.strip_prefix('#').unwrap_or("");
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::validation("color", format!("`{color}` is not a #RRGGBB color")));
    }
    Ok(())
}

fn check_labels(t: &Tables, labels: &[Uuid]) -> Result<()> {
    match labels.iter().find(|id| !t.labels.contains_key(id)) {
        Some(missing) => Err(Error::not_found("label", missing)),
        None => Ok(()),
    }
}

fn check_category(caller: &Caller, category: Category) -> Result<()> {
    if permissions::category_allowed(caller.role, category) {
        Ok(())
    } else {
        Err(Error::denied(format!(
            "role {} may not author {category} documents",
            caller.role
        )))
    }
}

pub struct DocumentCatalog {
    store: Arc<Store>,
    index: Arc<SearchIndex>,
    events: EventBus,
    activity: ActivityRecorder,
}

impl DocumentCatalog {
    pub fn new(
        store: Arc<Store>,
        index: Arc<SearchIndex>,
        events: EventBus,
        activity: ActivityRecorder,
    ) -> Self {
        Self {
            store,
            index,
            events,
            activity,
        }
    }

    /// Active documents readable by the caller, filtered, sorted and paged.
    pub async fn list(
        &self,
        caller: &Caller,
        filters: &ListFilters,
        pager: Pager,
        sort: Sort,
    ) -> Result<Page> {
        let hits = match filters.search.as_deref() {
            Some(q) => self.index.matching(q)?,
            None => None,
        };
        let wanted: HashSet<String> = filters
            .labels
            .iter()
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();

        let matches = self
            .store
            .read(|t| {
                t.documents
                    .values()
                    .filter(|d| d.is_active)
                    .filter(|d| permissions::allows(t, d.id, caller.role, Capability::Read))
                    .filter(|d| filters.category.map_or(true, |c| d.category == c))
                    .filter(|d| hits.as_ref().map_or(true, |h| h.contains(&d.id)))
                    .map(|d| DocumentView::load(t, d))
                    .filter(|v| {
                        wanted.is_empty()
                            || v.labels.iter().any(|l| wanted.contains(&l.name.to_lowercase()))
                    })
                    .collect::<Vec<_>>()
            })
            .await;

        let page = Page::slice(matches, pager, sort);
        debug!(user = %caller.user_id, total = page.total, "listed documents");
        Ok(page)
    }

    pub async fn get(&self, id: Uuid, caller: &Caller) -> Result<DocumentView> {
        let view = self
            .store
            .read(|t| {
                let doc = t
                    .documents
                    .get(&id)
                    .ok_or_else(|| Error::not_found("document", id))?;
                permissions::require(t, id, caller, Capability::Read)?;
                if !doc.is_active {
                    return Err(Error::not_found("document", id));
                }
                Ok(DocumentView::load(t, doc))
            })
            .await?;
        self.activity
            .record(&caller.user_id, id, ActivityAction::View, None)
            .await;
        Ok(view)
    }

    pub async fn create(&self, payload: NewDocument, caller: &Caller) -> Result<DocumentView> {
        if !permissions::may_author(caller.role) {
            return Err(Error::denied(format!(
                "role {} may not create documents",
                caller.role
            )));
        }
        check_category(caller, payload.category)?;
        validate_title(&payload.title)?;
        validate_content(&payload.content)?;
        let read_time = payload.read_time.unwrap_or(DEFAULT_READ_TIME);
        validate_read_time(read_time)?;

        let now = Utc::now();
        let doc = Document {
            id: Uuid::new_v4(),
            title: payload.title.trim().to_string(),
            description: payload.description,
            content: payload.content,
            category: payload.category,
            read_time,
            created_at: now,
            last_modified: now,
            created_by: caller.user_id.clone(),
            is_active: true,
            version: 1,
        };
        let view = self
            .store
            .transaction(|t| {
                check_labels(t, &payload.labels)?;
                t.documents.insert(doc.id, doc.clone());
                t.set_labels(doc.id, &payload.labels);
                permissions::seed(t, doc.id, doc.category);
                Ok(DocumentView::load(t, &doc))
            })
            .await?;

        self.reindex(&view.document);
        info!(document = %doc.id, by = %caller.user_id, category = %doc.category, "created document");
        self.events.send(Event::DocumentCreated { id: doc.id });
        self.activity
            .record(&caller.user_id, doc.id, ActivityAction::Edit, None)
            .await;
        Ok(view)
    }

    /// Snapshot the current state, apply `patch` and bump the version, all in one transaction.
    pub async fn update(&self, id: Uuid, patch: DocumentPatch, caller: &Caller) -> Result<DocumentView> {
        let view = self
            .store
            .transaction(|t| {
                let current = t
                    .documents
                    .get(&id)
                    .ok_or_else(|| Error::not_found("document", id))?;
                permissions::require(t, id, caller, Capability::Write)?;
                if let Some(title) = &patch.title {
                    validate_title(title)?;
                }
                if let Some(content) = &patch.content {
                    validate_content(content)?;
                }
                if let Some(minutes) = patch.read_time {
                    validate_read_time(minutes)?;
                }
                let recategorised = patch.category.filter(|c| *c != current.category);
                if let Some(category) = recategorised {
                    check_category(caller, category)?;
                }
                if let Some(labels) = &patch.labels {
                    check_labels(t, labels)?;
                }

                let note = patch.change_note.as_deref().unwrap_or(DEFAULT_CHANGE_NOTE);
                VersionStore::snapshot(t, id, &caller.user_id, note)?;

                let doc = t
                    .documents
                    .get_mut(&id)
                    .ok_or_else(|| Error::not_found("document", id))?;
                if let Some(title) = patch.title {
                    doc.title = title.trim().to_string();
                }
                if let Some(description) = patch.description {
                    doc.description = Some(description).filter(|d| !d.trim().is_empty());
                }
                if let Some(content) = patch.content {
                    doc.content = content;
                }
                if let Some(category) = patch.category {
                    doc.category = category;
                }
                if let Some(minutes) = patch.read_time {
                    doc.read_time = minutes;
                }
                if let Some(active) = patch.is_active {
                    doc.is_active = active;
                }
                doc.version += 1;
                doc.last_modified = Utc::now();
                let doc = doc.clone();

                if let Some(labels) = &patch.labels {
                    t.set_labels(id, labels);
                }
                // Rows follow the policy of the new category.
                if let Some(category) = recategorised {
                    permissions::seed(t, id, category);
                }
                Ok(DocumentView::load(t, &doc))
            })
            .await?;

        self.reindex(&view.document);
        let version = view.document.version;
        info!(document = %id, version, by = %caller.user_id, "updated document");
        self.events.send(Event::DocumentUpdated { id, version });
        self.activity
            .record(&caller.user_id, id, ActivityAction::Edit, None)
            .await;
        Ok(view)
    }

    /// Hard delete. Versions and activity are kept.
    pub async fn delete(&self, id: Uuid, caller: &Caller) -> Result<()> {
        if !caller.role.is_admin() {
            return Err(Error::denied("only admins may delete documents"));
        }
        self.store
            .transaction(|t| {
                if t.documents.remove(&id).is_none() {
                    return Err(Error::not_found("document", id));
                }
                t.permissions.remove(&id);
                t.clear_labels(id);
                t.favorites.retain(|f| f.document_id != id);
                Ok(())
            })
            .await?;
        if let Err(err) = self.index.remove_document(id) {
            warn!(error = %err, document = %id, "failed to drop document from search index");
        }
        info!(document = %id, by = %caller.user_id, "deleted document");
        self.events.send(Event::DocumentDeleted { id });
        Ok(())
    }

    pub async fn list_labels(&self) -> Vec<Label> {
        self.store
            .read(|t| {
                let mut labels: Vec<Label> = t.labels.values().cloned().collect();
                labels.sort_by(|a, b| a.name.cmp(&b.name));
                labels
            })
            .await
    }

    pub async fn create_label(&self, payload: NewLabel, caller: &Caller) -> Result<Label> {
        if !caller.role.is_admin() {
            return Err(Error::denied("only admins may create labels"));
        }
        let name = payload.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }
        let color = payload
            .color
            .unwrap_or_else(|| DEFAULT_LABEL_COLOR.to_string());
        validate_color(&color)?;

        let label = Label {
            id: Uuid::new_v4(),
            name,
            color,
            description: payload.description,
            created_at: Utc::now(),
        };
        self.store
            .transaction(|t| {
                if t.labels.values().any(|l| l.name.eq_ignore_ascii_case(&label.name)) {
                    return Err(Error::Conflict(format!("label `{}` already exists", label.name)));
                }
                t.labels.insert(label.id, label.clone());
                Ok(())
            })
            .await?;
        Ok(label)
    }

    pub async fn favorite(&self, id: Uuid, caller: &Caller) -> Result<()> {
        let added = self
            .store
            .transaction(|t| {
                let doc = t
                    .documents
                    .get(&id)
                    .ok_or_else(|| Error::not_found("document", id))?;
                permissions::require(t, id, caller, Capability::Read)?;
                if !doc.is_active {
                    return Err(Error::not_found("document", id));
                }
                if t.favorites
                    .iter()
                    .any(|f| f.document_id == id && f.user_id == caller.user_id)
                {
                    return Ok(false);
                }
                t.favorites.push(Favorite {
                    user_id: caller.user_id.clone(),
                    document_id: id,
                    created_at: Utc::now(),
                });
                Ok(true)
            })
            .await?;
        if added {
            self.activity
                .record(&caller.user_id, id, ActivityAction::Favorite, None)
                .await;
        }
        Ok(())
    }

    pub async fn unfavorite(&self, id: Uuid, caller: &Caller) -> Result<()> {
        self.store
            .transaction(|t| {
                t.favorites
                    .retain(|f| !(f.document_id == id && f.user_id == caller.user_id));
                Ok(())
            })
            .await
    }

    /// Readable, active favorites of the caller, newest first.
    pub async fn list_favorites(&self, caller: &Caller) -> Vec<DocumentView> {
        self.store
            .read(|t| {
                let mut mine: Vec<&Favorite> = t
                    .favorites
                    .iter()
                    .filter(|f| f.user_id == caller.user_id)
                    .collect();
                mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                mine.into_iter()
                    .filter_map(|f| t.documents.get(&f.document_id))
                    .filter(|d| d.is_active)
                    .filter(|d| permissions::allows(t, d.id, caller.role, Capability::Read))
                    .map(|d| DocumentView::load(t, d))
                    .collect()
            })
            .await
    }

    /// Hand a document to `recipient` through the notification dispatcher.
    pub async fn share(&self, id: Uuid, caller: &Caller, recipient: &str) -> Result<()> {
        let recipient = recipient.trim();
        if recipient.is_empty() {
            return Err(Error::validation("recipient", "must not be empty"));
        }
        self.store
            .read(|t| {
                let doc = t
                    .documents
                    .get(&id)
                    .ok_or_else(|| Error::not_found("document", id))?;
                permissions::require(t, id, caller, Capability::Share)?;
                if !doc.is_active {
                    return Err(Error::not_found("document", id));
                }
                Ok(())
            })
            .await?;
        self.activity
            .record(&caller.user_id, id, ActivityAction::Share, None)
            .await;
        self.events.send(Event::DocumentShared {
            id,
            recipient: recipient.to_string(),
        });
        Ok(())
    }

    pub async fn stats(&self, caller: &Caller) -> Result<CatalogStats> {
        if !caller.role.is_admin() {
            return Err(Error::denied("only admins may read catalog statistics"));
        }
        Ok(self
            .store
            .read(|t| {
                let mut stats = CatalogStats::default();
                for doc in t.documents.values() {
                    if !doc.is_active {
                        stats.inactive_documents += 1;
                        continue;
                    }
                    stats.total_documents += 1;
                    *stats.by_category.entry(doc.category).or_default() += 1;
                    for label in t.labels_of(doc.id) {
                        *stats.by_label.entry(label.name).or_default() += 1;
                    }
                }
                stats
            })
            .await)
    }

    fn reindex(&self, doc: &Document) {
        if let Err(err) = self.index.index_document(doc) {
            warn!(error = %err, document = %doc.id, "failed to index document");
        }
    }
}
