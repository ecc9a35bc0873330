//! # Text indexer
//!
//! Document model and indexing contract for pages retrieved by the crawler.
//! The crawler's indexing stage submits one [`Document`] per crawled page;
//! search and score updates are consumed by the wider system. An in-memory
//! index is provided for tests and small runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub mod store;

pub use store::memory::InMemoryIndex;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// A document was submitted without a link id.
    #[error("document does not specify a link id")]
    MissingLinkId,

    /// A document lookup failed.
    #[error("not found")]
    NotFound,
}

/// A web page whose content has been indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Id of the link this document was retrieved from.
    pub link_id: Uuid,
    pub url: String,
    pub title: String,
    pub content: String,
    /// Stamped by the index when the document is stored.
    pub indexed_at: DateTime<Utc>,
    /// Importance score assigned by the ranker; preserved across re-indexing.
    pub page_rank: f64,
}

impl Document {
    pub fn new(link_id: Uuid, url: impl Into<String>) -> Self {
        Self {
            link_id,
            url: url.into(),
            title: String::new(),
            content: String::new(),
            indexed_at: DateTime::<Utc>::UNIX_EPOCH,
            page_rank: 0.0,
        }
    }
}

/// How the index should interpret a search expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Match each term of the expression.
    Match,
    /// Match the expression as an exact phrase.
    Phrase,
}

/// Parameters for searching indexed documents.
#[derive(Debug, Clone)]
pub struct Query {
    pub kind: QueryKind,
    pub expression: String,
    /// Number of leading results to skip, for pagination.
    pub offset: u64,
}

impl Query {
    pub fn matching(expression: impl Into<String>) -> Self {
        Self {
            kind: QueryKind::Match,
            expression: expression.into(),
            offset: 0,
        }
    }

    pub fn phrase(expression: impl Into<String>) -> Self {
        Self {
            kind: QueryKind::Phrase,
            expression: expression.into(),
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

/// A page of search results.
#[derive(Debug, Clone)]
pub struct SearchResults {
    /// Total number of documents matching the query, ignoring the offset.
    pub total_count: u64,
    /// Matching documents from the offset onward, by descending PageRank.
    pub documents: Vec<Document>,
}

/// Indexing and search operations over crawled documents.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Insert or update the document for its link id.
    ///
    /// Stamps `indexed_at` and preserves a previously assigned PageRank
    /// score; both are written back into `doc`.
    async fn index(&self, doc: &mut Document) -> Result<(), IndexError>;

    async fn find_by_id(&self, link_id: Uuid) -> Result<Document, IndexError>;

    async fn search(&self, query: Query) -> Result<SearchResults, IndexError>;

    /// Set the PageRank score for a link, creating a placeholder document if
    /// the link has not been indexed yet.
    async fn update_score(&self, link_id: Uuid, score: f64) -> Result<(), IndexError>;
}
