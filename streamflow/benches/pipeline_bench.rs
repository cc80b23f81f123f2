//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use serde_json::json;
use streamflow::context::PipelineFn;
use streamflow::pipeline::{ItemBuffer, PipelineConfig, StageConfig, StageDefinition};
use streamflow::core::StreamItem;
use streamflow::testing::TestPipeline;

const ITEMS: i64 = 256;

fn filter_then_sum() -> TestPipeline {
    let pipeline = TestPipeline::with_config(
        PipelineConfig::default()
            .with_buffer_size(ITEMS as usize)
            .with_parallelism(32),
    );
    pipeline.register_function(
        "filter",
        PipelineFn::predicate(|v| v["amount"].as_i64().unwrap_or(0) % 2 == 0),
    );
    pipeline
        .add_stage(StageDefinition::new("even", "filter"))
        .expect("filter stage");
    pipeline
        .add_stage(
            StageDefinition::new("total", "aggregate").with_config(StageConfig::new().with_params(
                json!({"operation": "sum", "field": "amount", "alias": "total"}),
            )),
        )
        .expect("aggregate stage");
    pipeline
}

fn pipeline_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");

    c.bench_function("filter_then_sum_256", |b| {
        b.iter_batched(
            || {
                let pipeline = filter_then_sum();
                for amount in 0..ITEMS {
                    pipeline.push(json!({"amount": amount})).expect("push");
                }
                pipeline
            },
            |pipeline| rt.block_on(async { black_box(pipeline.run_until_idle(usize::MAX).await) }),
            BatchSize::SmallInput,
        );
    });

    c.bench_function("buffer_push_drain", |b| {
        let buffer = ItemBuffer::new(1024);
        b.iter(|| {
            for n in 0..64 {
                let _ = buffer.try_push(StreamItem::new("bench", "push", json!(n)));
            }
            black_box(buffer.drain(64));
        });
    });
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
