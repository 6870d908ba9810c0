//! Telemetry primitives shared across the Marlin workspace.
//!
//! Layout: `init.rs` (tracing subscriber bootstrap), `metrics.rs` (Prometheus
//! registry for playback sessions), `error.rs`.

pub mod error;
pub mod init;
pub mod metrics;

pub use error::{Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
