//! In-memory graph store.
//!
//! Reproduces the upsert/partition semantics of the SQL-backed store over
//! plain maps: links are keyed by URL, edges by their `(src, dst)` pair, and
//! the partition queries return id-ordered snapshots.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{Edge, Graph, GraphError, Link};

#[derive(Debug, Default)]
struct GraphState {
    links: HashMap<Uuid, Link>,
    link_url_index: HashMap<String, Uuid>,
    edges: HashMap<Uuid, Edge>,
    edge_pair_index: HashMap<(Uuid, Uuid), Uuid>,
}

/// Thread-safe in-memory [`Graph`] implementation.
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    state: RwLock<GraphState>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Graph for InMemoryGraph {
    async fn upsert_link(&self, link: &mut Link) -> Result<(), GraphError> {
        let mut state = self.state.write();

        if let Some(&existing_id) = state.link_url_index.get(&link.url) {
            let existing = state
                .links
                .get_mut(&existing_id)
                .ok_or(GraphError::NotFound)?;
            existing.retrieved_at = existing.retrieved_at.max(link.retrieved_at);
            link.id = existing.id;
            link.retrieved_at = existing.retrieved_at;
            return Ok(());
        }

        // The store owns id assignment, matching the SQL store's generated
        // primary keys.
        link.id = Uuid::new_v4();
        state.link_url_index.insert(link.url.clone(), link.id);
        state.links.insert(link.id, link.clone());
        Ok(())
    }

    async fn find_link(&self, id: Uuid) -> Result<Link, GraphError> {
        self.state
            .read()
            .links
            .get(&id)
            .cloned()
            .ok_or(GraphError::NotFound)
    }

    async fn links(
        &self,
        from: Uuid,
        to: Uuid,
        retrieved_before: DateTime<Utc>,
    ) -> Result<Vec<Link>, GraphError> {
        let state = self.state.read();
        let mut links: Vec<Link> = state
            .links
            .values()
            .filter(|link| link.id >= from && link.id < to && link.retrieved_at < retrieved_before)
            .cloned()
            .collect();
        links.sort_by_key(|link| link.id);
        Ok(links)
    }

    async fn upsert_edge(&self, edge: &mut Edge) -> Result<(), GraphError> {
        let mut state = self.state.write();

        if !state.links.contains_key(&edge.src) || !state.links.contains_key(&edge.dst) {
            return Err(GraphError::UnknownEdgeLinks);
        }

        let now = Utc::now();
        if let Some(&existing_id) = state.edge_pair_index.get(&(edge.src, edge.dst)) {
            let existing = state
                .edges
                .get_mut(&existing_id)
                .ok_or(GraphError::NotFound)?;
            existing.updated_at = now;
            edge.id = existing.id;
            edge.updated_at = now;
            return Ok(());
        }

        edge.id = Uuid::new_v4();
        edge.updated_at = now;
        state.edge_pair_index.insert((edge.src, edge.dst), edge.id);
        state.edges.insert(edge.id, edge.clone());
        Ok(())
    }

    async fn edges(
        &self,
        from: Uuid,
        to: Uuid,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Edge>, GraphError> {
        let state = self.state.read();
        let mut edges: Vec<Edge> = state
            .edges
            .values()
            .filter(|edge| edge.src >= from && edge.src < to && edge.updated_at < updated_before)
            .cloned()
            .collect();
        edges.sort_by_key(|edge| edge.id);
        Ok(edges)
    }

    async fn remove_stale_edges(
        &self,
        from: Uuid,
        updated_before: DateTime<Utc>,
    ) -> Result<(), GraphError> {
        let mut state = self.state.write();
        let stale: Vec<Edge> = state
            .edges
            .values()
            .filter(|edge| edge.src == from && edge.updated_at < updated_before)
            .cloned()
            .collect();
        for edge in stale {
            state.edges.remove(&edge.id);
            state.edge_pair_index.remove(&(edge.src, edge.dst));
        }
        Ok(())
    }
}
