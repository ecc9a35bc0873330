//! Shared fixtures for the in-crate test suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::{BoxError, Context, Payload, Processed, Processor, ProcessorFn, Sink, Source};

/// Initialize tracing for tests with appropriate settings
#[inline]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Lifecycle counters shared by every payload of one test run.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub created: AtomicUsize,
    pub cloned: AtomicUsize,
    pub marked: AtomicUsize,
}

impl Counters {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[derive(Debug)]
pub(crate) struct TestPayload {
    pub value: i64,
    pub tags: Vec<String>,
    counters: Arc<Counters>,
}

impl TestPayload {
    pub fn new(value: i64, counters: &Arc<Counters>) -> Self {
        counters.created.fetch_add(1, Ordering::SeqCst);
        Self {
            value,
            tags: Vec::new(),
            counters: Arc::clone(counters),
        }
    }
}

impl Clone for TestPayload {
    fn clone(&self) -> Self {
        self.counters.cloned.fetch_add(1, Ordering::SeqCst);
        Self {
            value: self.value,
            tags: self.tags.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl Payload for TestPayload {
    fn mark_as_processed(self) {
        self.counters.marked.fetch_add(1, Ordering::SeqCst);
    }
}

/// Source yielding a fixed list of values, optionally ending with an error.
pub(crate) struct ValueSource {
    values: std::vec::IntoIter<i64>,
    staged: Option<i64>,
    counters: Arc<Counters>,
    error: Option<String>,
}

impl ValueSource {
    pub fn new(values: Vec<i64>, counters: &Arc<Counters>) -> Self {
        Self {
            values: values.into_iter(),
            staged: None,
            counters: Arc::clone(counters),
            error: None,
        }
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.error = Some(message.to_string());
        self
    }
}

#[async_trait]
impl Source<TestPayload> for ValueSource {
    async fn next(&mut self) -> bool {
        self.staged = self.values.next();
        self.staged.is_some()
    }

    fn payload(&mut self) -> TestPayload {
        let value = self.staged.take().expect("payload() called before next()");
        TestPayload::new(value, &self.counters)
    }

    fn error(&mut self) -> Option<BoxError> {
        self.error.take().map(BoxError::from)
    }
}

/// Source that never runs out of payloads.
pub(crate) struct InfiniteSource {
    counters: Arc<Counters>,
}

impl InfiniteSource {
    pub fn new(counters: &Arc<Counters>) -> Self {
        Self {
            counters: Arc::clone(counters),
        }
    }
}

#[async_trait]
impl Source<TestPayload> for InfiniteSource {
    async fn next(&mut self) -> bool {
        true
    }

    fn payload(&mut self) -> TestPayload {
        TestPayload::new(0, &self.counters)
    }

    fn error(&mut self) -> Option<BoxError> {
        None
    }
}

/// Handle onto the values a [`CollectingSink`] consumed.
pub(crate) struct Received(pub Arc<Mutex<Vec<i64>>>);

impl Received {
    pub fn values(&self) -> Vec<i64> {
        self.0.lock().unwrap().clone()
    }
}

/// Sink recording the value of every payload it consumes.
pub(crate) struct CollectingSink {
    values: Arc<Mutex<Vec<i64>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn received(&self) -> Received {
        Received(Arc::clone(&self.values))
    }
}

#[async_trait]
impl Sink<TestPayload> for CollectingSink {
    async fn consume(&mut self, _ctx: &Context, payload: &TestPayload) -> Result<(), BoxError> {
        self.values.lock().unwrap().push(payload.value);
        Ok(())
    }
}

pub(crate) fn identity()
-> ProcessorFn<impl Fn(TestPayload) -> Result<Processed<TestPayload>, BoxError> + Send + Sync> {
    ProcessorFn::new(|payload| Ok(Processed::Forward(payload)))
}

pub(crate) fn discard_if(
    pred: impl Fn(i64) -> bool + Send + Sync,
) -> ProcessorFn<impl Fn(TestPayload) -> Result<Processed<TestPayload>, BoxError> + Send + Sync> {
    ProcessorFn::new(move |payload: TestPayload| {
        if pred(payload.value) {
            Ok(Processed::Discard(payload))
        } else {
            Ok(Processed::Forward(payload))
        }
    })
}

pub(crate) fn fail_on(
    value: i64,
    message: &str,
) -> ProcessorFn<impl Fn(TestPayload) -> Result<Processed<TestPayload>, BoxError> + Send + Sync> {
    let message = message.to_string();
    ProcessorFn::new(move |payload: TestPayload| {
        if payload.value == value {
            Err(BoxError::from(message.clone()))
        } else {
            Ok(Processed::Forward(payload))
        }
    })
}

/// Processor that sleeps for a fixed duration before forwarding.
pub(crate) struct SleepProcessor {
    duration: Duration,
}

#[async_trait]
impl Processor<TestPayload> for SleepProcessor {
    async fn process(
        &self,
        _ctx: &Context,
        payload: TestPayload,
    ) -> Result<Processed<TestPayload>, BoxError> {
        tokio::time::sleep(self.duration).await;
        Ok(Processed::Forward(payload))
    }
}

pub(crate) fn sleeper(duration: Duration) -> SleepProcessor {
    SleepProcessor { duration }
}
