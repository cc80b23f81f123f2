//! Pipeline-scoped state and the processor invocation context.
//!
//! This module provides:
//! - The per-pipeline state arena shared by all stages
//! - User functions stored in that arena
//! - The context handed to each processor invocation

mod functions;
mod processor;
mod state;

pub use functions::{
    ClassifierFn, EnrichmentLookup, FlatMapFn, MapFn, PipelineFn, PredicateFn,
};
#[cfg(test)]
pub use functions::MockEnrichmentLookup;
pub use processor::{ItemEmitter, ProcessorContext};
pub use state::StateStore;
