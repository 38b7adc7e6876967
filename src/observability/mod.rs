//! Observability for dispatcher and processor instances
//!
//! Structured logging through an explicitly constructed [`Logger`] handle and
//! per-instance processing counters exposed on the health route.

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogCategory, LogFormat, Logger};
pub use metrics::{MetricsSnapshot, ProcessorMetrics};

pub use logging::{filing_span, routing_span};
