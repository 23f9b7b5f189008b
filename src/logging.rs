//! Tracing initialisation
//!
//! Console and file output share one line format:
//! `LEVEL target: file:line (@ timestamp) message`. The console layer can be
//! silenced with `quiet`; the file layer is only added when a path is given.
//! `RUST_LOG`, when set, takes precedence over the configured level.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ToolsConfig;
use crate::error::{AppResult, ToolsError};

/// Logging options
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: Level,
    /// Append log lines to this file as well
    pub file: Option<PathBuf>,
    /// No console output
    pub quiet: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file: None,
            quiet: false,
        }
    }
}

impl LogSettings {
    pub fn from_config(config: &ToolsConfig) -> AppResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            file: config.application.log_file.clone(),
            quiet: config.application.quiet,
        })
    }

    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        self.level = match verbose {
            0 => self.level,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        self
    }
}

/// Parse log level string to tracing Level
pub fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(ToolsError::Configuration(format!(
            "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed or the log file cannot be
/// opened.
pub fn init(settings: LogSettings) -> AppResult<()> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str().to_lowercase()))
    };

    let console = (!settings.quiet).then(|| {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(filter())
    });

    let file = match &settings.file {
        Some(path) => {
            let handle = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(Mutex::new(handle))
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| ToolsError::Configuration(format!("Failed to initialize tracing: {}", e)))
}

/// Initialise from the loaded configuration, raising verbosity per `-v`.
pub fn init_from_config(config: &ToolsConfig, verbose: u8) -> AppResult<()> {
    init(LogSettings::from_config(config)?.with_verbosity(verbose))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("Warning").unwrap(), Level::WARN);
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_verbosity_raises_level() {
        let settings = LogSettings::default().with_verbosity(0);
        assert_eq!(settings.level, Level::INFO);
        assert_eq!(settings.with_verbosity(2).level, Level::TRACE);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = ToolsConfig::default();
        config.application.log_level = "debug".into();
        config.application.quiet = true;
        let settings = LogSettings::from_config(&config).unwrap();
        assert_eq!(settings.level, Level::DEBUG);
        assert!(settings.quiet);
        assert!(settings.file.is_none());
    }
}
