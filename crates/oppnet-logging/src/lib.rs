//! Structured logging for oppnet simulation runs
//!
//! Routers and the network log through `tracing` with structured fields; this
//! crate decides where those events go.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for post-run analysis (default)
//! - **Pretty Console**: Human-readable output for interactive runs
//! - **Run Context**: Scenario name and run id attached to every span
//! - **File Output**: Per-run or rotating log files via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use oppnet_logging::{OppnetSubscriberBuilder, LogConfig};
//!
//! // JSONL to console
//! let _guard = OppnetSubscriberBuilder::new().try_init()?;
//!
//! // Pretty output while developing
//! let _guard = OppnetSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .try_init()?;
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{RunContextData, RunContextGuard};
pub use layers::{RunContextExtension, RunContextLayer};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Registry, filter::ParseError, layer::SubscriberExt, util::SubscriberInitExt,
    util::TryInitError,
};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log level filter: {0}")]
    Filter(#[from] ParseError),

    #[error("Cannot open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot create rolling log file: {0}")]
    Appender(#[from] InitError),

    #[error("Subscriber already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Builder for configuring and initializing the oppnet logging subscriber
///
/// By default, console output uses JSONL format. Use `LogConfig::development()`
/// for human-readable pretty output.
#[derive(Debug, Default)]
pub struct OppnetSubscriberBuilder {
    config: LogConfig,
}

impl OppnetSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Human-readable console output instead of JSONL
    pub fn with_pretty_console(mut self, pretty: bool) -> Self {
        self.config.console.pretty = pretty;
        self.config.console.ansi = pretty;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// Returns the file writer's guard when file output is enabled; keep it
    /// alive until the program exits or buffered lines are lost.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.config.default_level)?,
        };

        let console = &self.config.console;
        let pretty_console = (console.enabled && console.pretty).then(|| {
            tracing_subscriber::fmt::layer()
                .with_ansi(console.ansi)
                .with_target(true)
        });
        let jsonl_console = (console.enabled && !console.pretty)
            .then(|| layers::jsonl_layer(std::io::stdout, &self.config.jsonl));

        let (file_layer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = file_writer(file_config)?;
                (
                    Some(layers::jsonl_layer(writer, &self.config.jsonl)),
                    Some(guard),
                )
            }
            None => (None, None),
        };

        Registry::default()
            .with(env_filter)
            .with(RunContextLayer::new())
            .with(pretty_console)
            .with(jsonl_console)
            .with(file_layer)
            .try_init()?;
        Ok(guard)
    }
}

/// Non-blocking writer for `config`; `Never` truncates a single file
pub fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            let file = File::create(config.directory.join(format!("{}.log", config.prefix)))?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };
    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("log")
        .build(&config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging for testing (minimal output, ignores a second install)
pub fn init_testing() {
    let _ = OppnetSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
