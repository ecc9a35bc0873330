//! # Pipeline
//!
//! This crate provides a generic, staged data-processing pipeline. A pipeline
//! is an ordered list of stages wired together with rendezvous channels; each
//! stage hosts a runner that decides the concurrency topology for that stage:
//!
//! - [`Fifo`]: a single worker that preserves payload order
//! - [`FixedWorkerPool`]: N workers sharing the stage's channels
//! - [`DynamicWorkerPool`]: up to M concurrent tasks gated by a token pool
//! - [`Broadcast`]: every payload delivered to K independent branches
//!
//! Payloads are produced by a [`Source`], transformed by [`Processor`]s and
//! terminated by a [`Sink`]. Cancellation is cooperative through the
//! [`Context`]'s token; every blocking channel operation is raced against it.
//!
//! ## License
//!
//! MIT License

use std::fmt;

use thiserror::Error;

mod context;
mod pipeline;
mod processor;
mod stage;
#[cfg(test)]
pub(crate) mod test_utils;

pub use context::Context;
pub use pipeline::Pipeline;
pub use processor::{Payload, Processed, Processor, ProcessorFn, Sink, Source};
pub use stage::{Broadcast, DynamicWorkerPool, Fifo, FixedWorkerPool, StageParams, StageRunner};
pub use tokio_util::sync::CancellationToken;

/// Boxed error type carried across the processor/source/sink boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error emitted by a single pipeline worker.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline source: {source}")]
    Source {
        #[source]
        source: BoxError,
    },

    #[error("pipeline stage {stage}: {source}")]
    Stage {
        stage: usize,
        #[source]
        source: BoxError,
    },

    #[error("pipeline sink: {source}")]
    Sink {
        #[source]
        source: BoxError,
    },

    #[error("pipeline worker panicked: {reason}")]
    WorkerPanic { reason: String },
}

/// Composite error returned by [`Pipeline::process`].
///
/// Collects every error emitted by any worker during a run; the caller sees
/// each distinct failure, not just the first one.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<PipelineError>,
}

impl AggregateError {
    pub(crate) fn push(&mut self, err: PipelineError) {
        self.errors.push(err);
    }

    /// Every error collected during the run, in the order they were received.
    pub fn errors(&self) -> &[PipelineError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<PipelineError> {
        self.errors
    }

    pub(crate) fn into_result(self) -> Result<(), AggregateError> {
        if self.errors.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.len() == 1 {
            write!(f, "1 error occurred: ")?;
        } else {
            write!(f, "{} errors occurred: ", self.errors.len())?;
        }
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
