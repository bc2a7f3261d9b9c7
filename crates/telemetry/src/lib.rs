//! Logging and metrics shared by the pipeline binaries.

pub mod logging;
pub mod metrics;

pub use logging::{init_structured_logging, init_with_service, LogConfig, LogFormat, LoggingGuard};
