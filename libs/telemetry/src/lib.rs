//! Telemetry setup shared by every bridge binary.
//!
//! [`init_telemetry`] installs the tracing subscriber once per process;
//! the `record_*` helpers keep metric names and labels in one place.

mod config;
mod metrics;
mod tracing_init;

pub use config::{LogFormat, TelemetryConfig, TelemetryProtocol};
pub use metrics::{
    Direction, FetchOutcome, record_bridged, record_echo_suppressed, record_entity_fetch,
    record_reconnect,
};
pub use tracing_init::init_telemetry;
