//! # Logging Module
//!
//! Structured application and request logging with document-store persistence.
//!
//! ## Features
//!
//! - **Log Records**: Application entries and captured HTTP exchanges
//! - **Per-record Routing**: `logs` vs `request_logs`, decided by the record itself
//! - **Non-blocking Persistence**: Writes are spawned on the active runtime

pub mod record;
pub mod sink;

pub use record::{DEFAULT_COLLECTION, LogRecord, REQUEST_COLLECTION_PREFIX, RequestLogRecord};
pub use sink::{LogSink, LogSinkError, RuntimeProbe, TokioProbe};

use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
};

/// Install the process-wide subscriber: env filter, console output and,
/// when given, the document-store sink.
///
/// `RUST_LOG` wins over `default_filter` when it is set.
pub fn init_tracing(default_filter: &str, sink: Option<LogSink>) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(sink)
        .try_init()
}
