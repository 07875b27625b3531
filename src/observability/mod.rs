//! Logging and flow metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{FlowMetrics, MetricsSnapshot};
