//! Pooled payload flowing through the crawl pipeline.
//!
//! Payloads are recycled through a process-wide free list to amortise
//! allocation under steady-state throughput: retiring a payload truncates
//! its buffers in place (capacity retained) and pushes it back, and both the
//! source and `Clone` draw from the list before allocating.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pipeline::Payload;
use uuid::Uuid;

static POOL: PayloadPool = PayloadPool::new();

/// A page making its way through the crawl pipeline.
#[derive(Debug)]
pub struct CrawlPayload {
    /// Id of the graph link this page was crawled from.
    pub link_id: Uuid,
    pub url: String,
    pub retrieved_at: DateTime<Utc>,
    /// Raw response body as fetched.
    pub raw_content: Vec<u8>,
    /// Outbound links carrying `rel=nofollow`.
    pub no_follow_links: Vec<String>,
    /// Outbound links eligible for edge creation.
    pub links: Vec<String>,
    pub title: String,
    pub text_content: String,
}

impl CrawlPayload {
    fn empty() -> Self {
        Self {
            link_id: Uuid::nil(),
            url: String::new(),
            retrieved_at: DateTime::<Utc>::UNIX_EPOCH,
            raw_content: Vec::new(),
            no_follow_links: Vec::new(),
            links: Vec::new(),
            title: String::new(),
            text_content: String::new(),
        }
    }
}

impl Clone for CrawlPayload {
    /// Deep copy through the pool; buffer storage is never shared with the
    /// original, so sibling broadcast branches can mutate freely.
    fn clone(&self) -> Self {
        let mut fresh = acquire();
        fresh.link_id = self.link_id;
        fresh.url.push_str(&self.url);
        fresh.retrieved_at = self.retrieved_at;
        fresh.raw_content.extend_from_slice(&self.raw_content);
        fresh
            .no_follow_links
            .extend(self.no_follow_links.iter().cloned());
        fresh.links.extend(self.links.iter().cloned());
        fresh.title.push_str(&self.title);
        fresh.text_content.push_str(&self.text_content);
        fresh
    }
}

impl Payload for CrawlPayload {
    fn mark_as_processed(mut self) {
        // Truncate, never deallocate: the capacity is the point of pooling.
        // link_id and retrieved_at keep stale values until reassigned.
        self.url.clear();
        self.raw_content.clear();
        self.no_follow_links.clear();
        self.links.clear();
        self.title.clear();
        self.text_content.clear();
        POOL.release(self);
    }
}

struct PayloadPool {
    free: Mutex<Vec<CrawlPayload>>,
    allocations: AtomicU64,
    reuses: AtomicU64,
    releases: AtomicU64,
}

impl PayloadPool {
    const fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            allocations: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    fn acquire(&self) -> CrawlPayload {
        if let Some(payload) = self.free.lock().pop() {
            self.reuses.fetch_add(1, Ordering::Relaxed);
            return payload;
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        CrawlPayload::empty()
    }

    fn release(&self, payload: CrawlPayload) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        self.free.lock().push(payload);
    }
}

/// Take a zeroed payload from the pool, allocating if the free list is empty.
pub(crate) fn acquire() -> CrawlPayload {
    POOL.acquire()
}

/// Counters for payload pool traffic.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Payloads newly allocated because the free list was empty.
    pub allocations: u64,
    /// Payloads handed out from the free list.
    pub reuses: u64,
    /// Payloads returned through [`Payload::mark_as_processed`].
    pub releases: u64,
}

impl PoolStats {
    /// Total payloads handed out, however they were obtained.
    pub fn acquisitions(&self) -> u64 {
        self.allocations + self.reuses
    }
}

/// Snapshot of the process-wide payload pool counters.
pub fn pool_stats() -> PoolStats {
    PoolStats {
        allocations: POOL.allocations.load(Ordering::Relaxed),
        reuses: POOL.reuses.load(Ordering::Relaxed),
        releases: POOL.releases.load(Ordering::Relaxed),
    }
}
