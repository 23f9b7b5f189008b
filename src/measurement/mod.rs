//! Measurement procedures built from several instruments

pub mod sweep;

pub use sweep::{
    configure_power_meter, configure_pulse_channel, prepare_laser, pulse_amplitude, run_piv,
    sweep_currents, PivInstruments, PivResult, PivSettings, PulseSettings,
};
