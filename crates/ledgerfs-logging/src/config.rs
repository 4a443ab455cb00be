//! Logging configuration
//!
//! Console output always goes to stderr, so tools built on ledgerfs keep
//! stdout for their own output.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How events are written to the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConsoleFormat {
    /// No console output
    Off,
    /// Human-readable lines
    Pretty { ansi: bool },
    /// One JSON object per line
    #[default]
    Jsonl,
}

impl ConsoleFormat {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ConsoleFormat::Off)
    }
}

/// When the log file starts over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FileRotation {
    #[default]
    Daily,
    Hourly,
    /// One file, truncated at startup
    Single,
}

/// JSONL log files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSink {
    pub directory: PathBuf,
    pub prefix: String,
    pub rotation: FileRotation,
}

impl FileSink {
    /// Daily files named `ledgerfs.<date>.log` in `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: "ledgerfs".to_string(),
            rotation: FileRotation::Daily,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_rotation(mut self, rotation: FileRotation) -> Self {
        self.rotation = rotation;
        self
    }
}

/// What JSON records carry besides the event itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonFields {
    /// Put event fields at the top level instead of under `fields`
    pub flatten: bool,
    /// Include the list of enclosing spans (root, mount, seq)
    pub span_list: bool,
    /// Include source file and line
    pub source_location: bool,
}

impl Default for JsonFields {
    fn default() -> Self {
        Self {
            flatten: true,
            span_list: true,
            source_location: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level filter used when `RUST_LOG` is not set
    pub level: String,
    pub console: ConsoleFormat,
    pub file: Option<FileSink>,
    pub json: JsonFields,
}

impl Default for LogConfig {
    /// JSONL on the console at `info`
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: ConsoleFormat::Jsonl,
            file: None,
            json: JsonFields::default(),
        }
    }
}

impl LogConfig {
    /// Pretty colored console output at `debug`
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            console: ConsoleFormat::Pretty { ansi: true },
            ..Self::default()
        }
    }

    /// Daily JSONL files in `log_dir`, nothing on the console
    pub fn production(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            console: ConsoleFormat::Off,
            file: Some(FileSink::new(log_dir)),
            json: JsonFields {
                source_location: true,
                ..JsonFields::default()
            },
            ..Self::default()
        }
    }

    /// Warnings only, plain text
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            console: ConsoleFormat::Pretty { ansi: false },
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_console(mut self, console: ConsoleFormat) -> Self {
        self.console = console;
        self
    }

    pub fn with_file(mut self, sink: FileSink) -> Self {
        self.file = Some(sink);
        self
    }
}
