//! Indexing stage: submit crawled pages to the full-text index.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{BoxError, Context, Processed, Processor};
use textindexer::{Document, Indexer};

use crate::payload::CrawlPayload;

/// Pipeline stage that writes one document per crawled page to the index.
pub struct TextIndexer {
    indexer: Arc<dyn Indexer>,
}

impl TextIndexer {
    pub fn new(indexer: Arc<dyn Indexer>) -> Self {
        Self { indexer }
    }
}

#[async_trait]
impl Processor<CrawlPayload> for TextIndexer {
    async fn process(
        &self,
        _ctx: &Context,
        payload: CrawlPayload,
    ) -> Result<Processed<CrawlPayload>, BoxError> {
        let mut doc = Document::new(payload.link_id, payload.url.clone());
        doc.title = payload.title.clone();
        doc.content = payload.text_content.clone();
        self.indexer.index(&mut doc).await?;

        Ok(Processed::Forward(payload))
    }
}
