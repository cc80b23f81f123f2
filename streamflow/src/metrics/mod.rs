//! Stage and pipeline counters.
//!
//! Counters are atomics updated inline by the executor; there is no separate
//! collection task. Reads produce serializable snapshots.

mod collector;
mod snapshot;

pub use collector::{PipelineCounters, StageCounters};
pub use snapshot::{EngineStats, PipelineMetrics, StageMetrics};

/// Outputs per second over `elapsed_secs`, zero before any time has passed.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn throughput(outputs: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        0.0
    } else {
        outputs as f64 / elapsed_secs
    }
}
