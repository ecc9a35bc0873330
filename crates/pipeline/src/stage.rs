//! Stage runners: the concurrency topologies available at each pipeline stage.
//!
//! All runners share the same contract: exit promptly on cancellation, exit
//! when the input channel is closed and drained, emit at most one error
//! tagged with the stage index, and never close the shared output channel —
//! the pipeline driver owns channel lifetimes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::error;

use crate::pipeline::maybe_emit_error;
use crate::{Context, Payload, PipelineError, Processed, Processor};

/// Capability handle given to a stage runner for the duration of one run.
///
/// Carries the stage's position in the pipeline, its input and output payload
/// channels and the error channel shared by every worker. Cloning yields a
/// handle onto the same channels, which is how worker pools share a stage.
pub struct StageParams<P> {
    stage: usize,
    input: flume::Receiver<P>,
    output: flume::Sender<P>,
    errors: flume::Sender<PipelineError>,
}

impl<P> StageParams<P> {
    pub(crate) fn new(
        stage: usize,
        input: flume::Receiver<P>,
        output: flume::Sender<P>,
        errors: flume::Sender<PipelineError>,
    ) -> Self {
        Self {
            stage,
            input,
            output,
            errors,
        }
    }

    /// Position of this stage in the pipeline, starting at 0.
    pub fn stage_index(&self) -> usize {
        self.stage
    }

    pub fn input(&self) -> &flume::Receiver<P> {
        &self.input
    }

    pub fn output(&self) -> &flume::Sender<P> {
        &self.output
    }

    pub fn error(&self) -> &flume::Sender<PipelineError> {
        &self.errors
    }
}

impl<P> Clone for StageParams<P> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage,
            input: self.input.clone(),
            output: self.output.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// A concurrency topology hosting one pipeline stage.
#[async_trait]
pub trait StageRunner<P: Payload>: Send + Sync {
    /// Drive payloads from `params.input()` to `params.output()` until the
    /// input closes or the context is cancelled.
    async fn run(&self, ctx: Arc<Context>, params: StageParams<P>);
}

/// Single-worker stage that processes payloads one at a time, in order.
///
/// The i-th payload in is the i-th payload out, unless the processor
/// discarded it.
pub struct Fifo<P: Payload> {
    proc: Arc<dyn Processor<P>>,
}

impl<P: Payload> Fifo<P> {
    pub fn new(proc: impl Processor<P> + 'static) -> Self {
        Self {
            proc: Arc::new(proc),
        }
    }

    fn from_shared(proc: Arc<dyn Processor<P>>) -> Self {
        Self { proc }
    }
}

impl<P: Payload> Clone for Fifo<P> {
    fn clone(&self) -> Self {
        Self {
            proc: Arc::clone(&self.proc),
        }
    }
}

#[async_trait]
impl<P: Payload> StageRunner<P> for Fifo<P> {
    async fn run(&self, ctx: Arc<Context>, params: StageParams<P>) {
        loop {
            let payload = tokio::select! {
                _ = ctx.token.cancelled() => return,
                received = params.input().recv_async() => match received {
                    Ok(payload) => payload,
                    // Upstream closed and drained.
                    Err(_) => return,
                },
            };

            match self.proc.process(&ctx, payload).await {
                Ok(Processed::Forward(payload)) => {
                    tokio::select! {
                        _ = ctx.token.cancelled() => return,
                        sent = params.output().send_async(payload) => {
                            if sent.is_err() {
                                // Downstream is gone; nothing left to do.
                                return;
                            }
                        }
                    }
                }
                Ok(Processed::Discard(payload)) => payload.mark_as_processed(),
                Err(err) => {
                    error!(name = %ctx.name, stage = params.stage_index(), error = %err, "processor failed");
                    maybe_emit_error(
                        PipelineError::Stage {
                            stage: params.stage_index(),
                            source: err,
                        },
                        params.error(),
                    );
                    return;
                }
            }
        }
    }
}

/// Stage with a fixed number of workers sharing the same processor and the
/// same input/output channels.
///
/// Output order is determined by processor latency, not input order.
pub struct FixedWorkerPool<P: Payload> {
    workers: Vec<Fifo<P>>,
}

impl<P: Payload> FixedWorkerPool<P> {
    /// # Panics
    ///
    /// Panics if `num_workers` is zero.
    pub fn new(proc: impl Processor<P> + 'static, num_workers: usize) -> Self {
        assert!(num_workers > 0, "FixedWorkerPool requires at least one worker");

        let proc: Arc<dyn Processor<P>> = Arc::new(proc);
        let workers = (0..num_workers)
            .map(|_| Fifo::from_shared(Arc::clone(&proc)))
            .collect();

        Self { workers }
    }
}

#[async_trait]
impl<P: Payload> StageRunner<P> for FixedWorkerPool<P> {
    async fn run(&self, ctx: Arc<Context>, params: StageParams<P>) {
        let mut handles = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let worker = worker.clone();
            let ctx = Arc::clone(&ctx);
            let params = params.clone();
            handles.push(tokio::spawn(async move { worker.run(ctx, params).await }));
        }

        for handle in handles {
            if let Err(join_err) = handle.await
                && !join_err.is_cancelled()
            {
                maybe_emit_error(
                    PipelineError::WorkerPanic {
                        reason: join_err.to_string(),
                    },
                    params.error(),
                );
            }
        }
    }
}

/// Stage that spawns one task per payload, with total concurrency bounded by
/// a token pool of `max_workers` permits.
///
/// Output order is not preserved. On shutdown the runner re-acquires every
/// permit, which is the join barrier guaranteeing no spawned task outlives
/// [`run`](StageRunner::run); the permits are released again afterwards so
/// the runner stays reusable.
pub struct DynamicWorkerPool<P: Payload> {
    proc: Arc<dyn Processor<P>>,
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl<P: Payload> DynamicWorkerPool<P> {
    /// # Panics
    ///
    /// Panics if `max_workers` is zero.
    pub fn new(proc: impl Processor<P> + 'static, max_workers: usize) -> Self {
        assert!(max_workers > 0, "DynamicWorkerPool requires at least one worker");

        Self {
            proc: Arc::new(proc),
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }
}

#[async_trait]
impl<P: Payload> StageRunner<P> for DynamicWorkerPool<P> {
    async fn run(&self, ctx: Arc<Context>, params: StageParams<P>) {
        loop {
            let payload = tokio::select! {
                _ = ctx.token.cancelled() => break,
                received = params.input().recv_async() => match received {
                    Ok(payload) => payload,
                    Err(_) => break,
                },
            };

            let permit = tokio::select! {
                _ = ctx.token.cancelled() => break,
                acquired = Arc::clone(&self.permits).acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let proc = Arc::clone(&self.proc);
            let ctx = Arc::clone(&ctx);
            let params = params.clone();
            tokio::spawn(async move {
                // Holding the permit for the lifetime of the task is what the
                // shutdown barrier below counts on.
                let _permit = permit;

                match proc.process(&ctx, payload).await {
                    Ok(Processed::Forward(payload)) => {
                        tokio::select! {
                            _ = ctx.token.cancelled() => {}
                            _ = params.output().send_async(payload) => {}
                        }
                    }
                    Ok(Processed::Discard(payload)) => payload.mark_as_processed(),
                    Err(err) => {
                        error!(name = %ctx.name, stage = params.stage_index(), error = %err, "processor failed");
                        maybe_emit_error(
                            PipelineError::Stage {
                                stage: params.stage_index(),
                                source: err,
                            },
                            params.error(),
                        );
                    }
                }
            });
        }

        // Join barrier: every in-flight task holds one permit until it exits.
        if let Ok(all) = self.permits.acquire_many(self.max_workers as u32).await {
            drop(all);
        }
    }
}

/// Stage that delivers every input payload to each of its K branches.
///
/// Branch 0 receives the original payload, the remaining branches receive
/// clones, so N inputs produce K*N outputs on the shared output channel.
/// Ordering between branches is unspecified.
pub struct Broadcast<P: Payload> {
    branches: Vec<Fifo<P>>,
}

impl<P: Payload> Broadcast<P> {
    /// # Panics
    ///
    /// Panics if `procs` is empty.
    pub fn new(procs: Vec<Box<dyn Processor<P>>>) -> Self {
        assert!(!procs.is_empty(), "Broadcast requires at least one processor");

        let branches = procs
            .into_iter()
            .map(|proc| Fifo::from_shared(Arc::from(proc)))
            .collect();

        Self { branches }
    }
}

#[async_trait]
impl<P: Payload> StageRunner<P> for Broadcast<P> {
    async fn run(&self, ctx: Arc<Context>, params: StageParams<P>) {
        let mut branch_txs = Vec::with_capacity(self.branches.len());
        let mut handles = Vec::with_capacity(self.branches.len());
        for branch in &self.branches {
            let (tx, rx) = flume::bounded(0);
            let branch_params = StageParams::new(
                params.stage_index(),
                rx,
                params.output().clone(),
                params.error().clone(),
            );
            let branch = branch.clone();
            let ctx = Arc::clone(&ctx);
            handles.push(tokio::spawn(async move { branch.run(ctx, branch_params).await }));
            branch_txs.push(tx);
        }

        'outer: loop {
            let payload = tokio::select! {
                _ = ctx.token.cancelled() => break,
                received = params.input().recv_async() => match received {
                    Ok(payload) => payload,
                    Err(_) => break,
                },
            };

            // Branches may mutate their payload, so every branch except the
            // first gets its own deep copy.
            for tx in branch_txs[1..].iter().rev() {
                let clone = payload.clone();
                tokio::select! {
                    _ = ctx.token.cancelled() => break 'outer,
                    sent = tx.send_async(clone) => {
                        if sent.is_err() {
                            break 'outer;
                        }
                    }
                }
            }
            tokio::select! {
                _ = ctx.token.cancelled() => break,
                sent = branch_txs[0].send_async(payload) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        // Dropping the branch senders closes each private channel, letting
        // the branches drain and exit.
        drop(branch_txs);
        for handle in handles {
            if let Err(join_err) = handle.await
                && !join_err.is_cancelled()
            {
                maybe_emit_error(
                    PipelineError::WorkerPanic {
                        reason: join_err.to_string(),
                    },
                    params.error(),
                );
            }
        }
    }
}
