//! Pipelines: stage graphs, buffers and the tick loop that drives them.
//!
//! This module provides:
//! - Pipeline and stage configuration
//! - The stage graph with auto-chaining and cycle checks
//! - The bounded input buffer with backpressure
//! - The scheduler and executor that move items through stages

mod buffer;
mod config;
mod executor;
mod failure;
mod graph;
mod runtime;
mod scheduler;
mod stage;

pub use buffer::ItemBuffer;
pub use config::{BackpressureStrategy, ErrorPolicy, PipelineConfig, StageConfig};
pub use executor::{process_item, run_tick, DEAD_LETTER_TAG};
pub use failure::{FailureDisposition, FailureLog, FailureRecord};
pub use graph::StageGraph;
pub use runtime::{PipelineInfo, PipelineRuntime};
pub use scheduler::{SchedulerHandle, StopSignal};
pub use stage::{PipelineStage, ProcessorRef, StageDefinition, StageInfo};
