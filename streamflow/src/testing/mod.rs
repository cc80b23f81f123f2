//! Testing utilities for streamflow pipelines.
//!
//! This module provides:
//! - Mock processors
//! - Context builders for calling processors directly
//! - A pipeline harness driven tick by tick

mod fixtures;
mod mocks;

pub use fixtures::{TestContext, TestPipeline};
pub use mocks::{
    FailingProcessor, MockProcessor, RecordedItem, RecordingProcessor, SlowProcessor,
};
