//! In-memory index store.
//!
//! A map-backed [`Indexer`] with naive term/phrase matching, good enough for
//! tests and demo runs. Matching is case-insensitive over title and content;
//! results are ordered by descending PageRank.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{Document, IndexError, Indexer, Query, QueryKind, SearchResults};

/// Thread-safe in-memory [`Indexer`] implementation.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    documents: RwLock<HashMap<Uuid, Document>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(doc: &Document, query: &Query) -> bool {
    let haystack = format!("{} {}", doc.title, doc.content).to_lowercase();
    let expression = query.expression.to_lowercase();
    match query.kind {
        QueryKind::Match => expression
            .split_whitespace()
            .all(|term| haystack.contains(term)),
        QueryKind::Phrase => haystack.contains(expression.trim()),
    }
}

#[async_trait]
impl Indexer for InMemoryIndex {
    async fn index(&self, doc: &mut Document) -> Result<(), IndexError> {
        if doc.link_id.is_nil() {
            return Err(IndexError::MissingLinkId);
        }

        let mut documents = self.documents.write();
        doc.indexed_at = Utc::now();
        if let Some(existing) = documents.get(&doc.link_id) {
            // Re-indexing refreshes the content but never resets the score.
            doc.page_rank = existing.page_rank;
        }
        documents.insert(doc.link_id, doc.clone());
        Ok(())
    }

    async fn find_by_id(&self, link_id: Uuid) -> Result<Document, IndexError> {
        self.documents
            .read()
            .get(&link_id)
            .cloned()
            .ok_or(IndexError::NotFound)
    }

    async fn search(&self, query: Query) -> Result<SearchResults, IndexError> {
        let documents = self.documents.read();
        let mut hits: Vec<Document> = documents
            .values()
            .filter(|doc| matches(doc, &query))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.page_rank.total_cmp(&a.page_rank));

        let total_count = hits.len() as u64;
        let documents = hits.split_off((query.offset as usize).min(hits.len()));
        Ok(SearchResults {
            total_count,
            documents,
        })
    }

    async fn update_score(&self, link_id: Uuid, score: f64) -> Result<(), IndexError> {
        if link_id.is_nil() {
            return Err(IndexError::MissingLinkId);
        }

        let mut documents = self.documents.write();
        documents
            .entry(link_id)
            .or_insert_with(|| Document::new(link_id, ""))
            .page_rank = score;
        Ok(())
    }
}
