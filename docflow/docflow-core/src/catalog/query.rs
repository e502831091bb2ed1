use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::{Category, Document, DocumentView};
use crate::error::{Error, Result};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListFilters {
    pub category: Option<Category>,
    pub search: Option<String>,
    /// Label names; a document matches when it carries any of them.
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct Pager {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pager {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Pager {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Result<Self> {
        let pager = Self {
            page: page.unwrap_or(1),
            limit: limit.unwrap_or(DEFAULT_LIMIT),
        };
        if pager.page == 0 {
            return Err(Error::validation("page", "must be at least 1"));
        }
        if pager.limit == 0 || pager.limit > MAX_LIMIT {
            return Err(Error::validation(
                "limit",
                format!("must be between 1 and {MAX_LIMIT}"),
            ));
        }
        Ok(pager)
    }

    fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Title,
    #[serde(alias = "createdAt")]
    CreatedAt,
    #[default]
    #[serde(alias = "lastModified", alias = "updated_at", alias = "updatedAt")]
    LastModified,
    #[serde(alias = "readTime")]
    ReadTime,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sort {
    pub key: SortKey,
    pub order: SortOrder,
}

impl Sort {
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let ord = match self.key {
            SortKey::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::LastModified => a.last_modified.cmp(&b.last_modified),
            SortKey::ReadTime => a.read_time.cmp(&b.read_time),
        }
        .then_with(|| a.id.cmp(&b.id));
        match self.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Page {
    pub documents: Vec<DocumentView>,
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub total_pages: usize,
}

impl Page {
    /// Sort the full matching set, then cut the requested slice.
    pub(crate) fn slice(mut matches: Vec<DocumentView>, pager: Pager, sort: Sort) -> Self {
        matches.sort_by(|a, b| sort.compare(&a.document, &b.document));
        let total = matches.len();
        let documents = matches
            .into_iter()
            .skip(pager.offset())
            .take(pager.limit as usize)
            .collect();
        Self {
            documents,
            page: pager.page,
            limit: pager.limit,
            total,
            total_pages: total.div_ceil(pager.limit as usize),
        }
    }
}
