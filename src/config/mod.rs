//! Configuration System
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `MEASTOOLS_`
//! 2. TOML configuration file (default: `measurement_tools.toml`)
//! 3. Built-in defaults
//!
//! # Example
//!
//! ```no_run
//! use measurement_tools::config::ToolsConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ToolsConfig::load()?;
//!     println!("Log level: {}", config.application.log_level);
//!     println!("Samples per point: {}", config.sweep.nsamples);
//!     Ok(())
//! }
//! ```

pub mod tools_config;

pub use tools_config::{
    ApplicationConfig, CacheConfig, LaserConfig, ScopeConfig, SweepConfig, ToolsConfig,
    DEFAULT_CONFIG_FILE, ENV_PREFIX,
};
