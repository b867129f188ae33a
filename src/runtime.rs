//! Runtime glue that wires configuration, the handler seam, telemetry, and
//! runner orchestration.

pub mod config;
pub mod handler;
pub mod runner;
pub mod telemetry;

pub use config::{ProcessorConfig, ProcessorConfigBuilder};
pub use handler::{HandlerFuture, TaskHandler};
pub use runner::Runner;
pub use telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
