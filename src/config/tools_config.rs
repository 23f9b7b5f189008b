//! Configuration loading using Figment
//!
//! Configuration is layered, lowest precedence first:
//! 1. Built-in defaults (`ToolsConfig::default()`)
//! 2. `measurement_tools.toml` in the working directory (optional)
//! 3. Environment variables prefixed with `MEASTOOLS_`, `__` separating levels
//!
//! ```text
//! MEASTOOLS_APPLICATION__LOG_LEVEL=debug
//! MEASTOOLS_SWEEP__NSAMPLES=50
//! MEASTOOLS_RESOURCES__LASERDRIVER="ASRL/dev/ttyUSB0::INSTR"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ToolsError};
use crate::logging;

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "measurement_tools.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "MEASTOOLS_";

/// Top-level configuration shared by every tool
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Logging and naming
    pub application: ApplicationConfig,
    /// Role -> resource cache
    pub cache: CacheConfig,
    /// Arroyo laser driver session
    pub laser: LaserConfig,
    /// Tektronix oscilloscope socket
    pub scope: ScopeConfig,
    /// P-I-V sweep defaults
    pub sweep: SweepConfig,
    /// Fixed role -> resource assignments that bypass the interactive picker
    pub resources: BTreeMap<String, String>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn or warning, error)
    pub log_level: String,
    /// Optional log file; lines are appended
    pub log_file: Option<PathBuf>,
    /// Suppress console logging
    pub quiet: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
            quiet: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// JSON file remembering which resource belongs to which role
    pub path: PathBuf,
    /// Use a cached assignment without asking
    pub skip_confirm: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".measurement_tools"),
            skip_confirm: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LaserConfig {
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// Event register polling period of the watchdog
    pub watchdog_interval_ms: u64,
    /// How long to wait for the output-on bit to follow an enable/disable
    pub output_timeout_ms: u64,
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            baud_rate: 38_400,
            timeout_ms: 500,
            watchdog_interval_ms: 1000,
            output_timeout_ms: 5000,
        }
    }
}

impl LaserConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn output_timeout(&self) -> Duration {
        Duration::from_millis(self.output_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScopeConfig {
    pub host: String,
    /// Raw socket server port configured on the scope
    pub port: u16,
    pub timeout_ms: u64,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            host: "169.254.8.194".to_string(),
            port: 4000,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweepConfig {
    /// Delay after every bias change
    pub settle_ms: u64,
    /// Readings averaged per bias point
    pub nsamples: usize,
    /// Power meter correction wavelength
    pub wavelength_nm: f64,
    /// Forward voltage limit applied before sweeping
    pub vf_max: f64,
    /// Function generator channel driving the laser modulation input
    pub pulse_channel: u8,
    pub pulse_frequency_hz: f64,
    /// Fraction of the period the laser is on, 0-1
    pub duty_cycle: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            settle_ms: 500,
            nsamples: 20,
            wavelength_nm: 650.0,
            vf_max: 3.2,
            pulse_channel: 2,
            pulse_frequency_hz: 2e3,
            duty_cycle: 0.5,
        }
    }
}

impl SweepConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl ToolsConfig {
    /// Load from `measurement_tools.toml` and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file; a missing file falls back to defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a tool misbehave at runtime.
    pub fn validate(&self) -> AppResult<()> {
        if logging::parse_log_level(&self.application.log_level).is_err() {
            return Err(ToolsError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: trace, debug, info, warn, warning, error",
                self.application.log_level
            )));
        }

        if self.laser.timeout_ms == 0 || self.laser.watchdog_interval_ms == 0 {
            return Err(ToolsError::Configuration(
                "laser.timeout_ms and laser.watchdog_interval_ms must be > 0".to_string(),
            ));
        }

        if self.scope.timeout_ms == 0 {
            return Err(ToolsError::Configuration(
                "scope.timeout_ms must be > 0".to_string(),
            ));
        }

        if self.sweep.nsamples == 0 {
            return Err(ToolsError::Configuration(
                "sweep.nsamples must be > 0".to_string(),
            ));
        }

        if !(self.sweep.duty_cycle > 0.0 && self.sweep.duty_cycle <= 1.0) {
            return Err(ToolsError::Configuration(format!(
                "Invalid sweep.duty_cycle {}. Must be in (0, 1]",
                self.sweep.duty_cycle
            )));
        }

        if !(1..=2).contains(&self.sweep.pulse_channel) {
            return Err(ToolsError::Configuration(format!(
                "Invalid sweep.pulse_channel {}. The 33500B has channels 1 and 2",
                self.sweep.pulse_channel
            )));
        }

        for (role, resource) in &self.resources {
            if resource.trim().is_empty() {
                return Err(ToolsError::Configuration(format!(
                    "Resource for role '{}' cannot be empty",
                    role
                )));
            }
        }

        Ok(())
    }

    /// Configured resource for `role`, if any.
    ///
    /// Roles match case-insensitively since environment keys arrive lowercased.
    pub fn resource_for(&self, role: &str) -> Option<&str> {
        self.resources
            .get(role)
            .or_else(|| {
                self.resources
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(role))
                    .map(|(_, resource)| resource)
            })
            .map(String::as_str)
    }
}
