//! Core library for the measurement tools.
//!
//! Instrument wrappers (Arroyo laser driver, Thorlabs PM100 power meter,
//! Agilent 33500 function generator, Agilent E5062A network analyzer,
//! Tektronix oscilloscope), the transports and resource manager they open
//! sessions through, operator prompts and the resource cache, and the data
//! files the command-line tools in `src/bin` produce.

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod instrument;
pub mod interact;
pub mod logging;
pub mod measurement;
pub mod scpi;
