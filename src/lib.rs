pub mod atomic;
pub mod backup;
pub mod cache;
pub mod codec;
pub mod datasets;
pub mod engine;
pub mod errors;
pub mod file_lock;
pub mod headers;
pub mod migration;
pub mod models;
pub mod operations;
pub mod parsers;
pub mod sink;
pub mod watcher;
pub mod write_queue;

pub use crate::engine::DataEngine;
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{
    Contact, ContactInput, DataSnapshot, DatasetKind, EngineSettings, Group, ImportOutcome,
    ImportProgress, MigrationReport, OnCallInput, OnCallRecord, Server, ServerInput, StructuredError,
};
pub use crate::sink::{ChannelSink, EngineEvent, EventSink, NoopSink, TracingSink};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// JSON logs to `<data_root>/logs/relay-data.log`, rolled daily. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_tracing(data_root: &Path) -> AppResult<()> {
    let log_dir = data_root.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| AppError::Io(error.to_string()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "relay-data.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
