//! Instrument drivers
//!
//! Each driver owns one transport obtained from the
//! [`ResourceManager`](crate::hardware::ResourceManager) and exposes the
//! handful of SCPI commands the measurement tools need.
//!
//! | Driver | Role cached as | Transport |
//! |--------|----------------|-----------|
//! | [`LaserDriver`] (Arroyo 4300 series) | `LaserDriver` | serial, 38400 baud |
//! | [`PowerMeter`] (Thorlabs PM100) | `OpticalPowerMeter` | USBTMC via VISA |
//! | [`FunctionGenerator`] (Agilent 33500B) | `Agilent33500` | USBTMC/LAN via VISA |
//! | [`NetworkAnalyzer`] (Agilent E5062A) | `AgilentE5602A` | USBTMC/LAN via VISA |
//! | [`Oscilloscope`] (Tektronix) | not cached | raw TCP socket |

pub mod agilent33500;
pub mod agilent_e5062a;
pub mod arroyo;
pub mod tektronix;
pub mod thorlabs_pm100;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::adapters::ScpiTransport;

pub use agilent33500::{FunctionGenerator, Waveform};
pub use agilent_e5062a::{construct_network, Network, NetworkAnalyzer};
pub use arroyo::{LaserDriver, LaserFault, LaserOptions};
pub use tektronix::{Oscilloscope, TriggerMode};
pub use thorlabs_pm100::PowerMeter;

/// Transport shared between a driver and its background tasks
pub type SharedTransport = Arc<Mutex<Box<dyn ScpiTransport>>>;

pub(crate) fn share(transport: Box<dyn ScpiTransport>) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}
