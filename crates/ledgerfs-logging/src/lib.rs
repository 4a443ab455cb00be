//! Structured logging for ledgerfs
//!
//! Installs one global `tracing` subscriber: an `EnvFilter`, the
//! [`RootContextLayer`] that tags spans with the drive root they run for,
//! and console and file outputs chosen by [`LogConfig`].
//!
//! ```ignore
//! use ledgerfs_logging::{LedgerSubscriberBuilder, LogConfig};
//!
//! let _guard = LedgerSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```
//!
//! Keep the returned guard alive: dropping it flushes and closes the log
//! file.

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleFormat, FileRotation, FileSink, JsonFields, LogConfig};
pub use context::{RootContextData, RootContextGuard};
pub use layers::RootContextLayer;

use std::fs::{self, File};

use thiserror::Error;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Log file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log appender error: {0}")]
    Appender(String),

    #[error("Subscriber already installed: {0}")]
    Init(String),
}

/// Builds and installs the global subscriber
#[derive(Debug, Default)]
pub struct LedgerSubscriberBuilder {
    config: LogConfig,
}

impl LedgerSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Level used when `RUST_LOG` is unset
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn with_console(mut self, console: ConsoleFormat) -> Self {
        self.config.console = console;
        self
    }

    pub fn with_file_output(mut self, sink: FileSink) -> Self {
        self.config.file = Some(sink);
        self
    }

    /// Install the subscriber, reporting failures on stderr
    pub fn init(self) -> Option<WorkerGuard> {
        self.try_init().unwrap_or_else(|e| {
            eprintln!("ledgerfs: logging disabled: {}", e);
            None
        })
    }

    /// Install the subscriber
    ///
    /// Returns the guard of the file writer when a file sink is configured.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LogError> {
        let LogConfig {
            level,
            console,
            file,
            json,
        } = self.config;
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

        let (file_layer, guard) = match &file {
            Some(sink) => {
                let (writer, guard) = open_sink(sink)?;
                (Some(json_layer(json, writer)), Some(guard))
            }
            None => (None, None),
        };
        let pretty = match console {
            ConsoleFormat::Pretty { ansi } => Some(
                fmt::layer()
                    .with_ansi(ansi)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            ),
            _ => None,
        };
        let jsonl = (console == ConsoleFormat::Jsonl).then(|| json_layer(json, std::io::stderr));

        Registry::default()
            .with(filter)
            .with(RootContextLayer::new())
            .with(pretty)
            .with(jsonl)
            .with(file_layer)
            .try_init()
            .map_err(|e| LogError::Init(e.to_string()))?;
        Ok(guard)
    }
}

fn json_layer<S, W>(fields: JsonFields, writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(fields.span_list)
        .flatten_event(fields.flatten)
        .with_file(fields.source_location)
        .with_line_number(fields.source_location)
        .with_writer(writer)
}

fn open_sink(sink: &FileSink) -> Result<(NonBlocking, WorkerGuard), LogError> {
    fs::create_dir_all(&sink.directory)?;
    let rotation = match sink.rotation {
        FileRotation::Daily => Rotation::DAILY,
        FileRotation::Hourly => Rotation::HOURLY,
        FileRotation::Single => {
            let file = File::create(sink.directory.join(format!("{}.log", sink.prefix)))?;
            return Ok(tracing_appender::non_blocking(file));
        }
    };
    let appender = RollingBuilder::new()
        .rotation(rotation)
        .filename_prefix(&sink.prefix)
        .filename_suffix("log")
        .build(&sink.directory)
        .map_err(|e| LogError::Appender(e.to_string()))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Install the `testing` preset once; later calls do nothing
pub fn init_testing() {
    let _ = LedgerSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_overrides() {
        let builder = LedgerSubscriberBuilder::new()
            .with_config(LogConfig::development())
            .with_level("trace")
            .with_console(ConsoleFormat::Off);
        assert_eq!(builder.config.level, "trace");
        assert!(!builder.config.console.is_enabled());
    }

    #[test]
    fn test_single_file_sink() {
        let temp = TempDir::new().unwrap();
        let sink = FileSink::new(temp.path().join("logs"))
            .with_prefix("unit")
            .with_rotation(FileRotation::Single);
        let (_writer, _guard) = open_sink(&sink).unwrap();
        assert!(temp.path().join("logs").join("unit.log").exists());
    }

    #[test]
    fn test_init_testing_is_repeatable() {
        init_testing();
        init_testing();
    }
}
