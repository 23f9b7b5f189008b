//! Laser P-I-V sweep
//!
//! Steps the laser through a list of bias currents and records the forward
//! voltage from the laser driver and the optical power from the power meter.
//! In pulsed mode the driver's modulation input is fed a square wave from the
//! function generator instead of setting the DC current; the driver is then
//! expected to be in its low range, where the transfer is 50 mA/V.
//!
//! The watchdog's error flag is checked after every point. Once it is set the
//! remaining points are recorded as NaN and the sweep stops.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config::SweepConfig;
use crate::data::Table;
use crate::error::{AppResult, ToolsError};
use crate::instrument::agilent33500::{AmplitudeUnit, BurstMode, TriggerSource, Waveform};
use crate::instrument::{FunctionGenerator, LaserDriver, PowerMeter};
use crate::interact::Prompt;

/// Modulation input transfer in the driver's low range, mA per V
pub const MODULATION_MA_PER_V: f64 = 50.0;

/// Smallest pulse amplitude the generator produces, V
pub const MIN_PULSE_AMPLITUDE: f64 = 0.01;

/// Currents from `start` to `io_max` inclusive in steps of `step`, mA
pub fn sweep_currents(start: u32, io_max: u32, step: u32) -> AppResult<Vec<u32>> {
    if step == 0 {
        return Err(ToolsError::OutOfRange("sweep step must be > 0 mA".to_string()));
    }
    Ok((start..=io_max).step_by(step as usize).collect())
}

/// Square wave high level for `milliamps`, or `None` when it is too small
/// to generate and the output should be off instead.
pub fn pulse_amplitude(milliamps: f64) -> Option<f64> {
    let volts = milliamps / MODULATION_MA_PER_V;
    (volts >= MIN_PULSE_AMPLITUDE).then_some(volts)
}

/// Square-wave modulation setup
#[derive(Debug, Clone, PartialEq)]
pub struct PulseSettings {
    pub channel: u8,
    pub frequency_hz: f64,
    /// 0-1
    pub duty_cycle: f64,
}

impl PulseSettings {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            channel: config.pulse_channel,
            frequency_hz: config.pulse_frequency_hz,
            duty_cycle: config.duty_cycle,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivSettings {
    /// Readings averaged per point
    pub nsamples: usize,
    /// Wait after every bias change
    pub settle: Duration,
    /// Power meter correction wavelength, nm
    pub wavelength_nm: f64,
    /// Drive through the function generator instead of DC
    pub pulse: Option<PulseSettings>,
    /// Ask before the first point
    pub confirm_start: bool,
    pub show_progress: bool,
}

impl PivSettings {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            nsamples: config.nsamples,
            settle: config.settle(),
            wavelength_nm: config.wavelength_nm,
            pulse: None,
            confirm_start: true,
            show_progress: true,
        }
    }
}

/// Measured P-I-V curve
#[derive(Debug, Clone, PartialEq)]
pub struct PivResult {
    /// mA
    pub currents: Vec<f64>,
    /// V, NaN after an abort
    pub voltages: Vec<f64>,
    /// mW, peak power when pulsed
    pub powers_mw: Vec<f64>,
    /// The watchdog stopped the sweep early
    pub aborted: bool,
}

impl PivResult {
    /// Columns `<id>_mA`, `<id>_V`, `<id>_mW`
    pub fn to_table(&self, laser_id: &str) -> Table {
        let mut table = Table::new();
        table.set_numeric_column(format!("{}_mA", laser_id), &self.currents);
        table.set_numeric_column(format!("{}_V", laser_id), &self.voltages);
        table.set_numeric_column(format!("{}_mW", laser_id), &self.powers_mw);
        table
    }
}

/// Instruments a sweep drives
pub struct PivInstruments<'a> {
    pub laser: &'a LaserDriver,
    pub meter: &'a mut PowerMeter,
    /// Required when pulsing
    pub fngen: Option<&'a mut FunctionGenerator>,
}

/// Turn the output on at zero current and make sure nothing tripped.
pub async fn prepare_laser(laser: &LaserDriver, settle: Duration) -> AppResult<()> {
    laser.set_output_current(0.0).await?;
    laser.enable_output().await?;
    // Give the driver time to lock out on an interlock or open circuit.
    tokio::time::sleep(settle).await;
    if laser.has_error() {
        let faults: Vec<String> = laser.faults().iter().map(|f| f.to_string()).collect();
        return Err(ToolsError::LaserFault(faults.join(", ")));
    }
    Ok(())
}

/// Scalar power, auto range, low-bandwidth filter, wavelength
pub async fn configure_power_meter(meter: &mut PowerMeter, wavelength_nm: f64) -> AppResult<()> {
    meter.configure_power().await?;
    meter.set_auto_range(true).await?;
    meter.set_low_pass_filter(true).await?;
    meter.set_wavelength(wavelength_nm).await
}

/// Square wave, internally triggered, output left off
pub async fn configure_pulse_channel(
    fngen: &mut FunctionGenerator,
    pulse: &PulseSettings,
) -> AppResult<()> {
    let mut ch = fngen.channel(pulse.channel)?;
    ch.set_output(false).await?;
    ch.set_shape(Waveform::Square).await?;
    ch.set_frequency(pulse.frequency_hz).await?;
    ch.set_square_duty_cycle(pulse.duty_cycle * 100.0).await?;
    ch.set_amplitude_unit(AmplitudeUnit::Vpp).await?;
    ch.set_burst_mode(BurstMode::Triggered).await?;
    ch.set_trigger_source(TriggerSource::Immediate).await
}

async fn bias_pulsed(fngen: &mut FunctionGenerator, channel: u8, milliamps: f64) -> AppResult<()> {
    let mut ch = fngen.channel(channel)?;
    match pulse_amplitude(milliamps) {
        None => ch.set_output(false).await,
        Some(v_top) => {
            ch.set_amplitude(v_top).await?;
            ch.set_offset(v_top / 2.0).await?;
            ch.set_output(true).await
        }
    }
}

async fn mean_voltage(laser: &LaserDriver, samples: usize) -> AppResult<f64> {
    let samples = samples.max(1);
    let mut total = 0.0;
    for _ in 0..samples {
        total += laser.get_voltage().await?;
    }
    Ok(total / samples as f64)
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}] {msg}")
    {
        bar.set_style(style);
    }
    bar
}

/// Run the complete sweep: prepare the instruments, confirm, then measure
/// every current in `currents` (mA).
///
/// The laser is left enabled at the last bias state; closing it is up to
/// the caller. The pulse channel is switched off when the sweep ends.
pub async fn run_piv(
    instruments: PivInstruments<'_>,
    currents: &[u32],
    settings: &PivSettings,
    prompt: &mut dyn Prompt,
) -> AppResult<PivResult> {
    let PivInstruments {
        laser,
        meter,
        mut fngen,
    } = instruments;

    prepare_laser(laser, settings.settle).await?;
    configure_power_meter(meter, settings.wavelength_nm).await?;

    let pulse = match (&settings.pulse, fngen.as_deref_mut()) {
        (Some(pulse), Some(fngen)) => {
            configure_pulse_channel(fngen, pulse).await?;
            Some(pulse.clone())
        }
        (Some(_), None) => {
            return Err(ToolsError::Configuration(
                "pulsed sweep requires a function generator".to_string(),
            ))
        }
        (None, _) => None,
    };

    prompt.message(&format!("Sweep currents (mA): {:?}", currents))?;
    if settings.confirm_start
        && !prompt
            .confirm("Instruments Configured. Start?", Some(true))
            .await?
    {
        return Err(ToolsError::Cancelled);
    }

    let power_scale = 1000.0 / pulse.as_ref().map_or(1.0, |p| p.duty_cycle);
    let mut result = PivResult {
        currents: currents.iter().map(|&c| f64::from(c)).collect(),
        voltages: Vec::with_capacity(currents.len()),
        powers_mw: Vec::with_capacity(currents.len()),
        aborted: false,
    };

    let bar = progress_bar(currents.len(), settings.show_progress);
    let outcome = sweep_points(
        laser,
        meter,
        fngen.as_deref_mut(),
        pulse.as_ref(),
        currents,
        settings,
        power_scale,
        &mut result,
        &bar,
    )
    .await;
    bar.finish_and_clear();

    // Leave the modulation off whatever happened.
    if let (Some(pulse), Some(fngen)) = (pulse.as_ref(), fngen.as_deref_mut()) {
        fngen.channel(pulse.channel)?.set_output(false).await?;
    }
    outcome?;

    // Pad for an abort
    result.voltages.resize(currents.len(), f64::NAN);
    result.powers_mw.resize(currents.len(), f64::NAN);
    Ok(result)
}

#[allow(clippy::too_many_arguments)]
async fn sweep_points(
    laser: &LaserDriver,
    meter: &mut PowerMeter,
    mut fngen: Option<&mut FunctionGenerator>,
    pulse: Option<&PulseSettings>,
    currents: &[u32],
    settings: &PivSettings,
    power_scale: f64,
    result: &mut PivResult,
    bar: &ProgressBar,
) -> AppResult<()> {
    for &current in currents {
        let milliamps = f64::from(current);
        match (pulse, fngen.as_deref_mut()) {
            (Some(pulse), Some(fngen)) => bias_pulsed(fngen, pulse.channel, milliamps).await?,
            _ => laser.set_output_current(milliamps).await?,
        }
        tokio::time::sleep(settings.settle).await;

        let voltage = mean_voltage(laser, settings.nsamples).await?;
        let power = meter.read_average(settings.nsamples).await?;
        if laser.has_error() {
            warn!("Exiting early due to error at {} mA.", current);
            result.aborted = true;
            return Ok(());
        }
        result.voltages.push(voltage);
        result.powers_mw.push(power * power_scale);
        bar.inc(1);

        match (pulse, fngen.as_deref_mut()) {
            (Some(pulse), Some(fngen)) => fngen.channel(pulse.channel)?.set_output(false).await?,
            _ => laser.set_output_current(0.0).await?,
        }
        tokio::time::sleep(settings.settle).await;
    }
    info!("Sweep finished, {} points", currents.len());
    Ok(())
}
