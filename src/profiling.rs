//! # Profiling Guide
//!
//! The cache emits `tracing` events and spans at every lifecycle point:
//! registration, creation, destruction, load/save and each scheduler pass
//! (`gpu_residency_pass`). Nothing is printed unless a subscriber is
//! installed.
//!
//! Enable the `profiling` feature to get a ready-made subscriber:
//!
//! ```toml
//! [dependencies]
//! residency_cache = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! ```ignore
//! use residency_cache::profiling::{init_tracing, TracingOutput};
//!
//! let _guard = init_tracing(TracingOutput::Stdout)?;
//! scheduler.run_cache(&cache);
//! ```
//!
//! Use `RUST_LOG=residency_cache=trace` to see every upload.

use crate::error::{CacheError, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Where trace output goes
#[derive(Clone, Debug)]
pub enum TracingOutput {
    /// Human-readable lines on stdout
    Stdout,
    /// JSON lines in a daily rolling file
    JsonFile { directory: PathBuf, file_prefix: String },
}

/// Install a global subscriber filtered by `RUST_LOG` (default `info`).
///
/// Keep the returned guard alive; dropping it flushes and stops the
/// background writer.
pub fn init_tracing(output: TracingOutput) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = match &output {
        TracingOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        TracingOutput::JsonFile {
            directory,
            file_prefix,
        } => tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, file_prefix)),
    };

    let result = match output {
        TracingOutput::Stdout => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .try_init(),
        TracingOutput::JsonFile { .. } => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init(),
    };

    result.map_err(|e| CacheError::ConfigError(format!("tracing subscriber: {e}")))?;
    Ok(guard)
}
