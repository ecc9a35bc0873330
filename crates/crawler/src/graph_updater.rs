//! Graph-update stage: record crawled pages and their outbound edges.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use linkgraph::{Edge, Graph, Link};
use pipeline::{BoxError, Context, Processed, Processor};

use crate::payload::CrawlPayload;

/// Pipeline stage that upserts the crawled link, every discovered link and
/// one edge per followable link, then sweeps edges the crawl no longer saw.
///
/// The stale-edge cutoff is taken before the edge pass, so every edge touched
/// in this pass survives the sweep and everything older goes.
pub struct GraphUpdater {
    graph: Arc<dyn Graph>,
}

impl GraphUpdater {
    pub fn new(graph: Arc<dyn Graph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Processor<CrawlPayload> for GraphUpdater {
    async fn process(
        &self,
        _ctx: &Context,
        payload: CrawlPayload,
    ) -> Result<Processed<CrawlPayload>, BoxError> {
        let mut src = Link {
            id: payload.link_id,
            url: payload.url.clone(),
            retrieved_at: Utc::now(),
        };
        self.graph.upsert_link(&mut src).await?;

        for url in &payload.no_follow_links {
            let mut dst = Link::new(url.clone());
            self.graph.upsert_link(&mut dst).await?;
        }

        let remove_edges_older_than = Utc::now();
        for url in &payload.links {
            let mut dst = Link::new(url.clone());
            self.graph.upsert_link(&mut dst).await?;

            let mut edge = Edge::new(src.id, dst.id);
            self.graph.upsert_edge(&mut edge).await?;
        }

        self.graph
            .remove_stale_edges(src.id, remove_edges_older_than)
            .await?;

        Ok(Processed::Forward(payload))
    }
}
