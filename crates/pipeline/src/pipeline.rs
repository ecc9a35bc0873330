//! Pipeline driver: wires a source, an ordered list of stage runners and a
//! sink with rendezvous channels, spawns one worker per stage plus the
//! source/sink workers, and aggregates every error any of them emits.

use std::sync::Arc;

use tracing::debug;

use crate::stage::{StageParams, StageRunner};
use crate::{AggregateError, Context, Payload, PipelineError, Sink, Source};

/// An ordered sequence of stage runners. Immutable after construction.
///
/// A pipeline holds no per-run state: the same instance can be executed any
/// number of times sequentially, or concurrently against different sources
/// when every runner and processor is reentrant (the runners in this crate
/// are).
pub struct Pipeline<P: Payload> {
    stages: Vec<Arc<dyn StageRunner<P>>>,
}

impl<P: Payload> Pipeline<P> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage to the end of the pipeline.
    pub fn add_stage(mut self, runner: impl StageRunner<P> + 'static) -> Self {
        self.stages.push(Arc::new(runner));
        self
    }

    /// Number of stages in the pipeline.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the pipeline to completion or to first cancellation.
    ///
    /// Payloads yielded by `source` traverse every stage in order and end at
    /// `sink`, which is the unique owner of delivered payloads and retires
    /// them via [`Payload::mark_as_processed`].
    ///
    /// Returns `Ok(())` only if every worker completed without reporting an
    /// error; otherwise the composite carries every error that was emitted.
    /// The first error cancels the run's cancellation scope so remaining
    /// workers wind down promptly, and cancelling the caller's token stops
    /// the run without an error of its own.
    pub async fn process<S, K>(&self, ctx: &Context, source: S, sink: K) -> Result<(), AggregateError>
    where
        S: Source<P> + 'static,
        K: Sink<P> + 'static,
    {
        let ctx = Arc::new(ctx.child());
        // One slot per stage worker plus the source and sink workers, so the
        // first error of every worker lands without blocking.
        let (err_tx, err_rx) = flume::bounded(self.stages.len() + 2);

        let mut handles = Vec::with_capacity(self.stages.len() + 2);

        // Payload channels: stage i reads from channel i and writes to
        // channel i+1; the source feeds channel 0 and the sink drains the
        // last one. Senders move into the worker tasks, so every worker exit
        // drops its output side and the close cascade runs source-forward.
        let (source_tx, mut upstream_rx) = flume::bounded::<P>(0);
        for (index, stage) in self.stages.iter().enumerate() {
            let (tx, rx) = flume::bounded(0);
            let params = StageParams::new(index, upstream_rx, tx, err_tx.clone());
            upstream_rx = rx;

            let stage = Arc::clone(stage);
            let ctx = Arc::clone(&ctx);
            handles.push(tokio::spawn(async move {
                stage.run(ctx, params).await;
            }));
        }

        {
            let ctx = Arc::clone(&ctx);
            let errors = err_tx.clone();
            handles.push(tokio::spawn(async move {
                source_worker(ctx, source, source_tx, errors).await;
            }));
        }
        {
            let ctx = Arc::clone(&ctx);
            let errors = err_tx.clone();
            handles.push(tokio::spawn(async move {
                sink_worker(ctx, sink, upstream_rx, errors).await;
            }));
        }
        drop(err_tx);

        // Every worker holds a sender clone for its whole run, so the error
        // channel only disconnects once all of them have exited; this drain
        // doubles as the join barrier.
        let mut aggregate = AggregateError::default();
        while let Ok(err) = err_rx.recv_async().await {
            debug!(name = %ctx.name, error = %err, "pipeline worker reported an error");
            ctx.token.cancel();
            aggregate.push(err);
        }

        for handle in handles {
            if let Err(join_err) = handle.await
                && !join_err.is_cancelled()
            {
                aggregate.push(PipelineError::WorkerPanic {
                    reason: join_err.to_string(),
                });
            }
        }

        ctx.token.cancel();
        aggregate.into_result()
    }
}

impl<P: Payload> Default for Pipeline<P> {
    fn default() -> Self {
        Self::new()
    }
}

async fn source_worker<P, S>(
    ctx: Arc<Context>,
    mut source: S,
    output: flume::Sender<P>,
    errors: flume::Sender<PipelineError>,
) where
    P: Payload,
    S: Source<P>,
{
    loop {
        let has_next = tokio::select! {
            _ = ctx.token.cancelled() => return,
            has_next = source.next() => has_next,
        };
        if !has_next {
            break;
        }

        let payload = source.payload();
        tokio::select! {
            _ = ctx.token.cancelled() => return,
            sent = output.send_async(payload) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }

    if let Some(err) = source.error() {
        maybe_emit_error(PipelineError::Source { source: err }, &errors);
    }
}

async fn sink_worker<P, K>(
    ctx: Arc<Context>,
    mut sink: K,
    input: flume::Receiver<P>,
    errors: flume::Sender<PipelineError>,
) where
    P: Payload,
    K: Sink<P>,
{
    loop {
        let payload = tokio::select! {
            _ = ctx.token.cancelled() => return,
            received = input.recv_async() => match received {
                Ok(payload) => payload,
                Err(_) => return,
            },
        };

        if let Err(err) = sink.consume(&ctx, &payload).await {
            maybe_emit_error(PipelineError::Sink { source: err }, &errors);
            return;
        }
        payload.mark_as_processed();
    }
}

/// Deposit an error without blocking.
///
/// The error channel's capacity guarantees one slot per worker, so the first
/// error per worker always lands; anything beyond that may be dropped.
pub(crate) fn maybe_emit_error(err: PipelineError, errors: &flume::Sender<PipelineError>) {
    if let Err(flume::TrySendError::Full(err)) = errors.try_send(err) {
        debug!(error = %err, "error channel full, dropping error");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::test_utils::{
        CollectingSink, Counters, InfiniteSource, TestPayload, ValueSource, discard_if, fail_on,
        identity, init_tracing, sleeper,
    };
    use crate::{Broadcast, CancellationToken, Fifo, FixedWorkerPool, Processor};

    #[tokio::test]
    async fn identity_chain_preserves_order_and_retires_payloads() {
        init_tracing();
        let counters = Counters::arc();
        let pipeline = Pipeline::new()
            .add_stage(Fifo::new(identity()))
            .add_stage(Fifo::new(identity()))
            .add_stage(Fifo::new(identity()));

        let sink = CollectingSink::new();
        let received = sink.received();
        pipeline
            .process(
                &Context::default(),
                ValueSource::new(vec![1, 2, 3], &counters),
                sink,
            )
            .await
            .unwrap();

        assert_eq!(received.values(), vec![1, 2, 3]);
        assert_eq!(counters.created.load(Ordering::SeqCst), 3);
        assert_eq!(counters.marked.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn filtered_payloads_are_marked_exactly_once() {
        init_tracing();
        let counters = Counters::arc();
        let pipeline = Pipeline::new().add_stage(Fifo::new(discard_if(|value| value % 2 == 0)));

        let sink = CollectingSink::new();
        let received = sink.received();
        pipeline
            .process(
                &Context::default(),
                ValueSource::new(vec![1, 2, 3, 4, 5], &counters),
                sink,
            )
            .await
            .unwrap();

        assert_eq!(received.values(), vec![1, 3, 5]);
        // 2 marks from the stage filter, 3 from the sink.
        assert_eq!(counters.marked.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn broadcast_multiplies_the_flow_by_its_branch_count() {
        init_tracing();
        let counters = Counters::arc();
        let pipeline = Pipeline::new().add_stage(Broadcast::new(vec![
            Box::new(identity()) as Box<dyn Processor<TestPayload>>,
            Box::new(identity()),
        ]));

        let sink = CollectingSink::new();
        let received = sink.received();
        pipeline
            .process(
                &Context::default(),
                ValueSource::new(vec![10, 20], &counters),
                sink,
            )
            .await
            .unwrap();

        let mut values = received.values();
        values.sort_unstable();
        assert_eq!(values, vec![10, 10, 20, 20]);
    }

    #[tokio::test]
    async fn pool_conservation_holds_on_successful_runs() {
        init_tracing();
        let counters = Counters::arc();
        let pipeline = Pipeline::new()
            .add_stage(Fifo::new(discard_if(|value| value > 2)))
            .add_stage(Broadcast::new(vec![
                Box::new(identity()) as Box<dyn Processor<TestPayload>>,
                Box::new(identity()),
                Box::new(identity()),
            ]));

        pipeline
            .process(
                &Context::default(),
                ValueSource::new(vec![1, 2, 3, 4], &counters),
                CollectingSink::new(),
            )
            .await
            .unwrap();

        let created = counters.created.load(Ordering::SeqCst);
        let cloned = counters.cloned.load(Ordering::SeqCst);
        let marked = counters.marked.load(Ordering::SeqCst);
        assert_eq!(created + cloned, marked);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fixed_pool_runs_at_its_configured_width() {
        init_tracing();
        let counters = Counters::arc();
        let pipeline =
            Pipeline::new().add_stage(FixedWorkerPool::new(sleeper(Duration::from_millis(100)), 4));

        let sink = CollectingSink::new();
        let received = sink.received();
        let started = Instant::now();
        pipeline
            .process(
                &Context::default(),
                ValueSource::new((0..40).collect(), &counters),
                sink,
            )
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(received.values().len(), 40);
        // 40 payloads over 4 workers at 100ms each: 10 full batches.
        assert!(elapsed >= Duration::from_millis(1000), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "elapsed {elapsed:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_stops_an_infinite_source_promptly() {
        init_tracing();
        let counters = Counters::arc();
        let token = CancellationToken::new();
        let ctx = Context::new(token.clone());

        let handle = tokio::spawn(async move {
            let pipeline = Pipeline::new().add_stage(Fifo::new(identity()));
            pipeline
                .process(&ctx, InfiniteSource::new(&counters), CollectingSink::new())
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let cancelled_at = Instant::now();
        token.cancel();

        let result = handle.await.unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_millis(500));
        // Cancellation is not an error; the source never reported one.
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn stage_errors_cancel_the_run_and_surface_in_the_composite() {
        init_tracing();
        let counters = Counters::arc();
        let pipeline = Pipeline::new()
            .add_stage(Fifo::new(fail_on(2, "boom at stage zero")))
            .add_stage(Fifo::new(identity()));

        let err = pipeline
            .process(
                &Context::default(),
                ValueSource::new(vec![1, 2, 3, 4], &counters),
                CollectingSink::new(),
            )
            .await
            .unwrap_err();

        assert!(!err.is_empty());
        assert!(
            err.errors()
                .iter()
                .any(|e| e.to_string() == "pipeline stage 0: boom at stage zero"),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn every_failing_worker_contributes_to_the_composite() {
        init_tracing();
        let counters = Counters::arc();
        // Both branches receive the payload before either error can cancel
        // the run, so exactly two stage errors are guaranteed.
        let pipeline = Pipeline::new().add_stage(Broadcast::new(vec![
            Box::new(fail_on(1, "branch a failed")) as Box<dyn Processor<TestPayload>>,
            Box::new(fail_on(1, "branch b failed")),
        ]));

        let err = pipeline
            .process(
                &Context::default(),
                ValueSource::new(vec![1], &counters),
                CollectingSink::new(),
            )
            .await
            .unwrap_err();

        let rendered: Vec<String> = err.errors().iter().map(|e| e.to_string()).collect();
        assert_eq!(rendered.len(), 2, "got: {rendered:?}");
        assert!(rendered.contains(&"pipeline stage 0: branch a failed".to_string()));
        assert!(rendered.contains(&"pipeline stage 0: branch b failed".to_string()));
    }

    #[tokio::test]
    async fn source_errors_are_wrapped_and_reported() {
        init_tracing();
        let counters = Counters::arc();
        let pipeline = Pipeline::new().add_stage(Fifo::new(identity()));

        let err = pipeline
            .process(
                &Context::default(),
                ValueSource::new(vec![1], &counters).with_error("iterator broke"),
                CollectingSink::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.errors().len(), 1);
        assert_eq!(err.to_string(), "1 error occurred: pipeline source: iterator broke");
    }

    #[tokio::test]
    async fn a_pipeline_can_be_executed_repeatedly() {
        init_tracing();
        let counters = Counters::arc();
        let pipeline = Pipeline::new()
            .add_stage(FixedWorkerPool::new(identity(), 2))
            .add_stage(Fifo::new(identity()));

        for _ in 0..2 {
            let sink = CollectingSink::new();
            let received = sink.received();
            pipeline
                .process(
                    &Context::default(),
                    ValueSource::new(vec![1, 2, 3], &counters),
                    sink,
                )
                .await
                .unwrap();
            assert_eq!(received.values().len(), 3);
        }
    }

    #[tokio::test]
    async fn an_empty_pipeline_moves_payloads_from_source_to_sink() {
        init_tracing();
        let counters = Counters::arc();
        let pipeline: Pipeline<TestPayload> = Pipeline::new();

        let sink = CollectingSink::new();
        let received = sink.received();
        pipeline
            .process(
                &Context::default(),
                ValueSource::new(vec![5, 6], &counters),
                sink,
            )
            .await
            .unwrap();

        assert_eq!(received.values(), vec![5, 6]);
    }

    #[tokio::test]
    async fn no_worker_survives_process() {
        init_tracing();
        let counters = Counters::arc();
        let pipeline = Pipeline::new().add_stage(FixedWorkerPool::new(identity(), 3));

        let sink = CollectingSink::new();
        let received = sink.received();
        pipeline
            .process(
                &Context::default(),
                ValueSource::new(vec![1, 2, 3], &counters),
                sink,
            )
            .await
            .unwrap();

        // The sink handle held by the test is the only one left alive.
        assert_eq!(Arc::strong_count(&received.0), 1);
    }
}
