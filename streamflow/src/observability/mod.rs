//! Logging setup.

mod logging;

pub use logging::{init_tracing, item_span, LogFormat, TracingConfig};
