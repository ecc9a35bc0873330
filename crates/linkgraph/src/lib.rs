//! # Link graph
//!
//! Data model and storage contract for the graph of crawled links: vertices
//! are URLs ([`Link`]) and directed edges record which page points at which
//! ([`Edge`]). The crawler's graph-update stage talks to any [`Graph`]
//! implementation; an in-memory store is provided for tests and small runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub mod store;

pub use store::memory::InMemoryGraph;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A link or edge lookup failed.
    #[error("not found")]
    NotFound,

    /// An edge referenced a source and/or destination link that does not
    /// exist in the graph.
    #[error("unknown source and/or destination for edge")]
    UnknownEdgeLinks,
}

/// A URL tracked by the crawler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: Uuid,
    pub url: String,
    /// Last time the crawler retrieved the page; the epoch for links that
    /// were discovered but never fetched.
    pub retrieved_at: DateTime<Utc>,
}

impl Link {
    /// A not-yet-persisted link; the store assigns the id on upsert.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            url: url.into(),
            retrieved_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// A directed edge between two links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: Uuid,
    /// The origin link.
    pub src: Uuid,
    /// The destination link.
    pub dst: Uuid,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(src: Uuid, dst: Uuid) -> Self {
        Self {
            id: Uuid::nil(),
            src,
            dst,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Mutation and query operations over a link graph.
#[async_trait]
pub trait Graph: Send + Sync {
    /// Insert or update a link, keyed by URL.
    ///
    /// On conflict the newest `retrieved_at` wins; the store writes the
    /// canonical id and timestamp back into `link`.
    async fn upsert_link(&self, link: &mut Link) -> Result<(), GraphError>;

    async fn find_link(&self, id: Uuid) -> Result<Link, GraphError>;

    /// Links whose ids belong to the `[from, to)` partition and that were
    /// last retrieved before `retrieved_before`, in id order.
    async fn links(
        &self,
        from: Uuid,
        to: Uuid,
        retrieved_before: DateTime<Utc>,
    ) -> Result<Vec<Link>, GraphError>;

    /// Insert or refresh an edge, keyed by its `(src, dst)` pair.
    ///
    /// Fails with [`GraphError::UnknownEdgeLinks`] unless both endpoints
    /// exist; the store writes the id and refreshed `updated_at` back into
    /// `edge`.
    async fn upsert_edge(&self, edge: &mut Edge) -> Result<(), GraphError>;

    /// Edges whose source ids belong to the `[from, to)` partition and that
    /// were last updated before `updated_before`, in id order.
    async fn edges(
        &self,
        from: Uuid,
        to: Uuid,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Edge>, GraphError>;

    /// Drop every edge originating at `from` that was last updated before
    /// `updated_before`.
    async fn remove_stale_edges(
        &self,
        from: Uuid,
        updated_before: DateTime<Utc>,
    ) -> Result<(), GraphError>;
}
