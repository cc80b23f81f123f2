//! Walks items through a pipeline's stage graph.
//!
//! An item enters at the source stages (or, after a requeue, at the stage
//! that failed it) and is carried depth-first along downstream links until
//! it is filtered, fails terminally, or leaves through a sink.

use futures::future::{join_all, BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use super::{ErrorPolicy, FailureDisposition, FailureRecord, PipelineRuntime, PipelineStage, StageGraph};
use crate::context::ProcessorContext;
use crate::core::StreamItem;
use crate::errors::StreamflowError;
use crate::events::PipelineEvent;
use crate::observability::item_span;
use crate::processors::ProcessorOutput;

/// Tag added to items routed to an error-handler stage.
pub const DEAD_LETTER_TAG: &str = "dead-letter";

/// Drains one batch from the buffer and processes it concurrently.
///
/// Returns the number of items drained.
pub async fn run_tick(runtime: &Arc<PipelineRuntime>) -> usize {
    let batch = runtime.buffer.drain(runtime.config().parallelism);
    if batch.is_empty() {
        return 0;
    }
    let drained = batch.len();
    let graph = runtime.graph();
    join_all(
        batch
            .into_iter()
            .map(|item| process_item(runtime, &graph, item)),
    )
    .await;
    drained
}

/// Processes one item from its entry point to completion.
pub async fn process_item(runtime: &Arc<PipelineRuntime>, graph: &StageGraph, item: StreamItem) {
    let started = Instant::now();

    let resume = if item.metadata.retry_count > 0 {
        item.metadata.stage_id.as_deref().and_then(|id| graph.get(id))
    } else {
        None
    };
    let entries = match resume {
        Some(stage) => vec![stage],
        None => graph.sources(),
    };

    let span = item_span(runtime.id(), &item.id, item.metadata.retry_count);
    join_all(
        entries
            .into_iter()
            .map(|stage| process_stage(runtime, graph, stage, item.clone())),
    )
    .instrument(span)
    .await;

    runtime.counters.record_latency(started.elapsed());
}

/// Runs one stage on one item and recurses into its downstream stages.
pub fn process_stage<'a>(
    runtime: &'a Arc<PipelineRuntime>,
    graph: &'a StageGraph,
    stage: &'a PipelineStage,
    item: StreamItem,
) -> BoxFuture<'a, ()> {
    async move {
        let ctx = runtime.processor_context(stage);
        match invoke(stage, item.clone(), &ctx).await {
            Ok(output) => propagate(runtime, graph, stage, output).await,
            Err(error) => handle_failure(runtime, graph, stage, item, error).await,
        }
    }
    .boxed()
}

/// Calls the processor under the stage's concurrency limit and timeout.
async fn invoke(
    stage: &PipelineStage,
    item: StreamItem,
    ctx: &ProcessorContext,
) -> Result<ProcessorOutput, StreamflowError> {
    let _permit = stage
        .permits
        .acquire()
        .await
        .map_err(|_| StreamflowError::Config(format!("stage '{}' is shut down", stage.id)))?;

    let started = Instant::now();
    let result = tokio::time::timeout(stage.config.timeout(), stage.processor.process(item, ctx)).await;
    stage.counters.record_invocation(started.elapsed());

    match result {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(StreamflowError::ProcessorFailure {
            stage_id: stage.id.clone(),
            source,
        }),
        Err(_) => Err(StreamflowError::ProcessorTimeout {
            stage_id: stage.id.clone(),
            timeout_ms: stage.config.timeout_ms,
        }),
    }
}

async fn propagate(
    runtime: &Arc<PipelineRuntime>,
    graph: &StageGraph,
    stage: &PipelineStage,
    output: ProcessorOutput,
) {
    let outputs: Vec<StreamItem> = output
        .into_items()
        .into_iter()
        .map(|mut out| {
            out.metadata.retry_count = 0;
            out.metadata.stage_id = Some(stage.id.clone());
            out
        })
        .collect();

    if outputs.is_empty() {
        stage.counters.record_filtered();
        runtime.counters.record_filtered();
        return;
    }
    stage.counters.record_outputs(outputs.len());

    if stage.is_sink() {
        for out in outputs {
            runtime.deliver(out);
        }
        return;
    }

    let mut downstream = Vec::with_capacity(outputs.len() * stage.next_stage_ids.len());
    for out in &outputs {
        for next_id in &stage.next_stage_ids {
            match graph.get(next_id) {
                Some(next) => downstream.push(process_stage(runtime, graph, next, out.clone())),
                None => tracing::warn!(
                    pipeline_id = %runtime.id(),
                    stage_id = %stage.id,
                    next_stage_id = %next_id,
                    "Downstream stage missing; output discarded"
                ),
            }
        }
    }
    join_all(downstream).await;
}

async fn handle_failure(
    runtime: &Arc<PipelineRuntime>,
    graph: &StageGraph,
    stage: &PipelineStage,
    mut item: StreamItem,
    error: StreamflowError,
) {
    stage.counters.record_error();
    runtime.counters.record_error();
    tracing::debug!(
        pipeline_id = %runtime.id(),
        stage_id = %stage.id,
        item_id = %item.id,
        retry_count = item.metadata.retry_count,
        error = %error,
        "Processor failed"
    );

    if runtime.config().error_policy == ErrorPolicy::FailFast {
        runtime.fail(&stage.id, &error);
    }

    if item.metadata.retry_count < stage.config.retries {
        item.metadata.retry_count += 1;
        item.metadata.stage_id = Some(stage.id.clone());
        let retry_count = item.metadata.retry_count;
        let item_id = item.id.clone();

        match runtime.buffer.try_push(item) {
            Ok(()) => {
                runtime.counters.record_retry();
                tracing::debug!(
                    pipeline_id = %runtime.id(),
                    stage_id = %stage.id,
                    item_id = %item_id,
                    retry_count,
                    "Item requeued"
                );
                runtime.emit_event(&PipelineEvent::ItemRetried {
                    pipeline_id: runtime.id().to_string(),
                    stage_id: stage.id.clone(),
                    item_id,
                    retry_count,
                });
                return;
            }
            Err(back) => {
                tracing::warn!(
                    pipeline_id = %runtime.id(),
                    stage_id = %stage.id,
                    item_id = %back.id,
                    "Buffer full; retry abandoned"
                );
                item = back;
                item.metadata.retry_count -= 1;
            }
        }
    }

    fail_terminally(runtime, graph, stage, item, &error).await;
}

async fn fail_terminally(
    runtime: &Arc<PipelineRuntime>,
    graph: &StageGraph,
    stage: &PipelineStage,
    mut item: StreamItem,
    error: &StreamflowError,
) {
    let message = error.to_string();
    let handler = stage
        .config
        .error_stage_id
        .as_deref()
        .and_then(|id| graph.get(id));

    let disposition = if handler.is_some() {
        FailureDisposition::DeadLettered
    } else {
        FailureDisposition::Dropped
    };
    runtime.record_failure(FailureRecord::new(
        &item.id,
        &item.metadata.correlation_id,
        &stage.id,
        &message,
        item.metadata.retry_count,
        disposition,
    ));

    let Some(handler) = handler else {
        runtime.counters.record_drop();
        runtime.emit_event(&PipelineEvent::ItemDropped {
            pipeline_id: runtime.id().to_string(),
            stage_id: stage.id.clone(),
            item_id: item.id.clone(),
            error: message,
        });
        return;
    };

    runtime.counters.record_dead_letter();
    runtime.emit_event(&PipelineEvent::ItemDeadLettered {
        pipeline_id: runtime.id().to_string(),
        stage_id: stage.id.clone(),
        item_id: item.id.clone(),
        error_stage_id: handler.id.clone(),
    });

    item.add_tag(DEAD_LETTER_TAG);
    item.metadata.last_error = Some(message);
    item.metadata.stage_id = Some(stage.id.clone());
    item.metadata.retry_count = 0;
    process_stage(runtime, graph, handler, item).await;
}
