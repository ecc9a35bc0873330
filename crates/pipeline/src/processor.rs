//! Pipeline contracts: payloads, processors, sources and sinks.

use async_trait::async_trait;

use crate::{BoxError, Context};

/// A value that can be sent through a pipeline.
///
/// `Clone` is the fan-out operation and must produce a semantically
/// independent value: any mutable state (buffers, sequences) is deep-copied
/// so that sibling branches of a [`Broadcast`](crate::Broadcast) stage can
/// mutate their copies concurrently.
///
/// [`mark_as_processed`](Payload::mark_as_processed) consumes the value and
/// signals that no stage will touch it again; pooled implementations reset
/// their fields and recycle the backing storage.
pub trait Payload: Clone + Send + 'static {
    fn mark_as_processed(self);
}

/// Outcome of a single processor invocation.
#[derive(Debug)]
pub enum Processed<P> {
    /// Forward this payload to the next stage. It may be the input mutated in
    /// place or a different instance altogether.
    Forward(P),
    /// Drop the input payload from the flow. The spent payload is handed back
    /// so the stage runner retires it.
    Discard(P),
}

/// A user-supplied transformation applied to payloads at one pipeline stage.
#[async_trait]
pub trait Processor<P: Payload>: Send + Sync {
    async fn process(&self, ctx: &Context, payload: P) -> Result<Processed<P>, BoxError>;
}

/// Adapter that lets a plain closure act as a [`Processor`].
pub struct ProcessorFn<F> {
    f: F,
}

impl<F> ProcessorFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<P, F> Processor<P> for ProcessorFn<F>
where
    P: Payload,
    F: Fn(P) -> Result<Processed<P>, BoxError> + Send + Sync,
{
    async fn process(&self, _ctx: &Context, payload: P) -> Result<Processed<P>, BoxError> {
        (self.f)(payload)
    }
}

/// Producer feeding payloads into the first pipeline stage.
///
/// Follows the iterator protocol of the original cursor-backed stores:
/// [`next`](Source::next) advances and reports whether a payload is
/// available, [`payload`](Source::payload) hands it over, and
/// [`error`](Source::error) surfaces the terminal error once `next` has
/// returned `false`.
#[async_trait]
pub trait Source<P: Payload>: Send {
    async fn next(&mut self) -> bool;

    fn payload(&mut self) -> P;

    fn error(&mut self) -> Option<BoxError>;
}

/// Terminal consumer for payloads that traversed every stage.
#[async_trait]
pub trait Sink<P: Payload>: Send {
    async fn consume(&mut self, ctx: &Context, payload: &P) -> Result<(), BoxError>;
}
