//! # Streamflow
//!
//! An in-process stream-processing dataflow engine.
//!
//! Streamflow runs named pipelines of stages over a stream of JSON items,
//! with support for:
//!
//! - **Stage graphs**: stages chain automatically or fan out through explicit downstream links
//! - **Built-in processors**: map, filter, aggregate, window, deduplicate, enrich and more
//! - **Bounded buffering**: per-pipeline backpressure (drop, buffer, block, sample)
//! - **Failure handling**: bounded retries, dead-letter routing and fail-fast pipelines
//! - **Observability**: per-stage metrics and lifecycle events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use streamflow::prelude::*;
//! use serde_json::json;
//!
//! let engine = StreamEngine::new();
//! let pipeline = engine.create_pipeline("orders", None)?;
//!
//! engine.register_function(
//!     &pipeline.id,
//!     "filter",
//!     PipelineFn::predicate(|v| v["amount"].as_i64().unwrap_or(0) > 1000),
//! )?;
//! engine.add_stage(&pipeline.id, StageDefinition::new("large", "filter"))?;
//! engine.add_stage(
//!     &pipeline.id,
//!     StageDefinition::new("total", "aggregate").with_config(
//!         StageConfig::new().with_params(json!({"operation": "sum", "field": "amount", "alias": "total"})),
//!     ),
//! )?;
//!
//! engine.start(&pipeline.id)?;
//! engine.push(&pipeline.id, json!({"amount": 2000})).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod context;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod observability;
pub mod pipeline;
pub mod processors;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::{EnrichmentLookup, PipelineFn, ProcessorContext, StateStore};
    pub use crate::core::{PipelineStatus, StageType, StreamItem};
    pub use crate::engine::{EngineConfig, StreamEngine};
    pub use crate::errors::{ProcessorError, Result, StreamflowError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::metrics::{EngineStats, PipelineMetrics, StageMetrics};
    pub use crate::pipeline::{
        BackpressureStrategy, ErrorPolicy, PipelineConfig, PipelineInfo, StageConfig,
        StageDefinition, StageInfo,
    };
    pub use crate::processors::{FnProcessor, Processor, ProcessorOutput};
    pub use crate::utils::{iso_timestamp, Timestamp};
}
