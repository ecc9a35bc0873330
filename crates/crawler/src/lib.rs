//! # Crawler
//!
//! Reference composition of the staged pipeline: pages are fetched by a
//! worker pool, mined for links and text by two FIFO stages, and finally
//! broadcast to the graph updater and the text indexer.
//!
//! ```text
//! links ─> FixedWorkerPool(LinkFetcher)
//!            ─> Fifo(LinkExtractor)
//!            ─> Fifo(TextExtractor)
//!            ─> Broadcast(GraphUpdater, TextIndexer) ─> count
//! ```
//!
//! External collaborators (HTTP client, link graph, text index, private
//! network detector) are injected through [`Config`]; each must be safe for
//! concurrent use since stages share them across workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use linkgraph::{Graph, GraphError, Link};
use pipeline::{
    AggregateError, BoxError, Broadcast, Fifo, FixedWorkerPool, Pipeline, Processor, Sink, Source,
};
use textindexer::Indexer;
use tracing::debug;

pub mod fetcher;
pub mod graph_updater;
pub mod link_extractor;
pub mod payload;
pub mod privnet;
pub mod text_extractor;
pub mod text_indexer;

pub use fetcher::{HttpGetter, LinkFetcher, UrlGetter, UrlResponse};
pub use graph_updater::GraphUpdater;
pub use link_extractor::LinkExtractor;
pub use payload::{CrawlPayload, PoolStats, pool_stats};
pub use pipeline::{CancellationToken, Context};
pub use privnet::{PrivateNetworkDetector, ResolvingDetector};
pub use text_extractor::TextExtractor;
pub use text_indexer::TextIndexer;

/// Collaborators and tuning for a [`Crawler`].
pub struct Config {
    pub getter: Arc<dyn UrlGetter>,
    pub detector: Arc<dyn PrivateNetworkDetector>,
    pub graph: Arc<dyn Graph>,
    pub indexer: Arc<dyn Indexer>,
    /// Number of concurrent fetch workers. Must be at least 1.
    pub fetch_workers: usize,
}

/// A crawl pipeline ready to run against batches of links.
pub struct Crawler {
    pipeline: Pipeline<CrawlPayload>,
    fan_out: usize,
}

impl Crawler {
    /// Assemble the crawl pipeline.
    ///
    /// # Panics
    ///
    /// Panics if `config.fetch_workers` is zero.
    pub fn new(config: Config) -> Self {
        let pipeline = Pipeline::new()
            .add_stage(FixedWorkerPool::new(
                LinkFetcher::new(Arc::clone(&config.getter), Arc::clone(&config.detector)),
                config.fetch_workers,
            ))
            .add_stage(Fifo::new(LinkExtractor::new(Arc::clone(&config.detector))))
            .add_stage(Fifo::new(TextExtractor::new()))
            .add_stage(Broadcast::new(vec![
                Box::new(GraphUpdater::new(Arc::clone(&config.graph)))
                    as Box<dyn Processor<CrawlPayload>>,
                Box::new(TextIndexer::new(Arc::clone(&config.indexer))),
            ]));

        Self {
            pipeline,
            // The terminal broadcast delivers every page to both branches.
            fan_out: 2,
        }
    }

    /// Crawl every link the iterator yields and return the number of pages
    /// that made it through the whole pipeline.
    pub async fn crawl<I>(&self, ctx: &Context, links: I) -> Result<usize, AggregateError>
    where
        I: Iterator<Item = Result<Link, GraphError>> + Send + 'static,
    {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = CountSink {
            count: Arc::clone(&counter),
        };

        self.pipeline
            .process(ctx, LinkSource::new(links), sink)
            .await?;

        // The sink saw every payload fan_out times; report pages, not copies.
        let count = counter.load(Ordering::SeqCst) / self.fan_out;
        debug!(name = %ctx.name, count, "crawl pass complete");
        Ok(count)
    }
}

/// Adapts an iterator of graph links to the pipeline source contract.
struct LinkSource<I> {
    links: I,
    staged: Option<Link>,
    error: Option<GraphError>,
}

impl<I> LinkSource<I> {
    fn new(links: I) -> Self {
        Self {
            links,
            staged: None,
            error: None,
        }
    }
}

#[async_trait]
impl<I> Source<CrawlPayload> for LinkSource<I>
where
    I: Iterator<Item = Result<Link, GraphError>> + Send,
{
    async fn next(&mut self) -> bool {
        match self.links.next() {
            Some(Ok(link)) => {
                self.staged = Some(link);
                true
            }
            Some(Err(err)) => {
                self.error = Some(err);
                false
            }
            None => false,
        }
    }

    fn payload(&mut self) -> CrawlPayload {
        let link = self.staged.take().expect("payload() called before next()");
        let mut payload = payload::acquire();
        payload.link_id = link.id;
        payload.url.push_str(&link.url);
        payload.retrieved_at = link.retrieved_at;
        payload
    }

    fn error(&mut self) -> Option<BoxError> {
        self.error.take().map(BoxError::from)
    }
}

/// Sink that counts delivered payloads.
struct CountSink {
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl Sink<CrawlPayload> for CountSink {
    async fn consume(&mut self, _ctx: &Context, _payload: &CrawlPayload) -> Result<(), BoxError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
