//! Core domain model types for streamflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - The stream item and its metadata
//! - Pipeline status and stage type enums

mod item;
mod status;

pub use item::{ItemMetadata, StreamItem};
pub use status::{PipelineStatus, StageType};
