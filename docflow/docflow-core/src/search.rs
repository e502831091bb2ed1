//! Full-text index over document title, description and content.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    directory::MmapDirectory,
    doc,
    query::QueryParser,
    schema::{Field, Schema, STORED, STRING, TEXT},
    Index, IndexReader, IndexWriter, ReloadPolicy, Term,
};
use uuid::Uuid;

use crate::catalog::Document;
use crate::error::{Error, Result};

const WRITER_HEAP: usize = 15_000_000;

pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id: Field,
    title: Field,
    description: Field,
    content: Field,
}

impl SearchIndex {
    pub fn in_memory() -> Result<Self> {
        let (schema, fields) = Self::schema();
        Self::with_index(Index::create_in_ram(schema), fields)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (schema, fields) = Self::schema();
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path).map_err(tantivy::TantivyError::from)?;
        let index = Index::open_or_create(dir, schema)?;
        Self::with_index(index, fields)
    }

    fn schema() -> (Schema, [Field; 4]) {
        let mut schema_builder = Schema::builder();
        let id = schema_builder.add_text_field("id", STRING | STORED);
        let title = schema_builder.add_text_field("title", TEXT);
        let description = schema_builder.add_text_field("description", TEXT);
        let content = schema_builder.add_text_field("content", TEXT);
        (schema_builder.build(), [id, title, description, content])
    }

    fn with_index(index: Index, fields: [Field; 4]) -> Result<Self> {
        let [id, title, description, content] = fields;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer_with_num_threads(1, WRITER_HEAP)?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id,
            title,
            description,
            content,
        })
    }

    /// Insert or replace the entry for `doc`.
    pub fn index_document(&self, doc: &Document) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.id, &doc.id.to_string()));
        writer.add_document(doc!(
            self.id => doc.id.to_string(),
            self.title => doc.title.as_str(),
            self.description => doc.description.clone().unwrap_or_default(),
            self.content => doc.content.searchable_text(),
        ))?;
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    pub fn remove_document(&self, id: Uuid) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.id, &id.to_string()));
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Drop every entry and index `docs` from scratch.
    pub fn rebuild<'a>(&self, docs: impl IntoIterator<Item = &'a Document>) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_all_documents()?;
        for d in docs {
            writer.add_document(doc!(
                self.id => d.id.to_string(),
                self.title => d.title.as_str(),
                self.description => d.description.clone().unwrap_or_default(),
                self.content => d.content.searchable_text(),
            ))?;
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Ids of every document matching all terms of `query`, or `None` when the
    /// query holds no searchable term.
    pub fn matching(&self, query: &str) -> Result<Option<HashSet<Uuid>>> {
        let terms = normalize(query);
        if terms.is_empty() {
            return Ok(None);
        }
        let searcher = self.reader.searcher();
        let mut parser =
            QueryParser::for_index(&self.index, vec![self.title, self.description, self.content]);
        parser.set_conjunction_by_default();
        let q = parser
            .parse_query(&terms)
            .map_err(|e| Error::validation("search", e.to_string()))?;
        let limit = (searcher.num_docs() as usize).max(1);
        let docs = searcher.search(&q, &TopDocs::with_limit(limit))?;
        Ok(Some(
            docs.into_iter()
                .filter_map(|(_score, addr)| {
                    let retrieved = searcher.doc(addr).ok()?;
                    let field = retrieved.get_first(self.id)?;
                    field.as_text().and_then(|s| Uuid::parse_str(s).ok())
                })
                .collect(),
        ))
    }
}

/// Reduce free text to lowercase alphanumeric words so it never trips the query grammar.
fn normalize(query: &str) -> String {
    query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Category, Content};
    use chrono::Utc;

    fn doc(title: &str, description: Option<&str>, body: &str) -> Document {
        let now = Utc::now();
        Document {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.map(str::to_string),
            content: Content::Text(body.into()),
            category: Category::Business,
            read_time: 5,
            created_at: now,
            last_modified: now,
            created_by: "u1".into(),
            is_active: true,
            version: 1,
        }
    }

    #[test]
    fn normalize_strips_query_syntax() {
        assert_eq!(normalize("  Invoice: Q1 (draft)!"), "invoice q1 draft");
        assert_eq!(normalize("+-&&"), "");
    }

    #[test]
    fn matches_across_fields() {
        let index = SearchIndex::in_memory().unwrap();
        let invoice = doc("Invoice Q1", None, "quarterly totals");
        let guide = doc("Onboarding", Some("how to file an invoice"), "steps");
        let other = doc("Roadmap", None, "future work");
        for d in [&invoice, &guide, &other] {
            index.index_document(d).unwrap();
        }

        let hits = index.matching("invoice").unwrap().unwrap();
        assert!(hits.contains(&invoice.id));
        assert!(hits.contains(&guide.id));
        assert!(!hits.contains(&other.id));

        let hits = index.matching("invoice quarterly").unwrap().unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.contains(&invoice.id));

        assert!(index.matching("   ").unwrap().is_none());
    }

    #[test]
    fn reindex_replaces_and_remove_drops() {
        let index = SearchIndex::in_memory().unwrap();
        let mut d = doc("Draft", None, "alpha");
        index.index_document(&d).unwrap();
        d.content = Content::Text("beta".into());
        index.index_document(&d).unwrap();
        assert!(index.matching("alpha").unwrap().unwrap().is_empty());
        assert!(index.matching("beta").unwrap().unwrap().contains(&d.id));

        index.remove_document(d.id).unwrap();
        assert!(index.matching("beta").unwrap().unwrap().is_empty());
    }
}
