//! laser-piv: P-I-V sweep with the Arroyo laser driver and Thorlabs PM100D
//!
//! Measures the optical power and forward voltage of a laser at a range of
//! bias currents and appends the results to a spreadsheet as
//! `<laserid>_mA`, `<laserid>_V` and `<laserid>_mW` columns.
//!
//! ```bash
//! laser-piv vcsel3 20 piv.csv --step 1
//! laser-piv vcsel3 20 piv.csv --step 1 --pulsed
//! ```

use std::future::Future;
use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use measurement_tools::config::ToolsConfig;
use measurement_tools::data::{add_to_spreadsheet, Table};
use measurement_tools::hardware::ResourceManager;
use measurement_tools::instrument::{FunctionGenerator, LaserDriver, LaserOptions, PowerMeter};
use measurement_tools::interact::{Prompt, Prompter};
use measurement_tools::logging;
use measurement_tools::measurement::{
    run_piv, sweep_currents, PivInstruments, PivSettings, PulseSettings,
};

/// Measure the optical power and voltage of a laser at different current
/// biases using the Arroyo laser driver and Thorlabs PM100D. Stores the
/// results in a spreadsheet.
#[derive(Parser, Debug)]
#[command(name = "laser-piv", version)]
#[command(after_help = "Contact: alecfv@berkeley.edu")]
struct Args {
    /// Human readable name of the laser
    laserid: String,

    /// Maximum current to sweep, mA. WARNING! Sets the driver's Io limit to this value!
    #[arg(value_name = "IO_MAX")]
    io_max: u32,

    /// Spreadsheet (.csv) to put results in. Results are appended as
    /// columns named <laserid>_mA, <laserid>_V, <laserid>_mW
    filename: PathBuf,

    /// Step size of the sweep, integer mA
    #[arg(long, default_value_t = 1)]
    step: u32,

    /// Start current of the sweep, integer mA
    #[arg(long, default_value_t = 0)]
    start: u32,

    /// Maximum forward voltage of the laser. WARNING! Sets the driver's Vf limit to this value!
    #[arg(long = "Vf_max", visible_alias = "vf-max")]
    vf_max: Option<f64>,

    /// Samples to average at each bias point
    #[arg(short = 'n', long)]
    nsamples: Option<usize>,

    /// Power meter correction wavelength, nm
    #[arg(short = 'w', long)]
    wavelength: Option<f64>,

    /// Pulse the laser through the Agilent 33500B modulation channel
    #[arg(short = 'p', long)]
    pulsed: bool,

    /// Start the sweep without asking
    #[arg(short = 'y', long)]
    yes: bool,

    /// Configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ToolsConfig::load_from(path)?,
        None => ToolsConfig::load()?,
    };
    logging::init_from_config(&config, args.verbose)?;

    let currents = sweep_currents(args.start, args.io_max, args.step)?;
    if currents.is_empty() {
        bail!("--start {} is above Io_max {}", args.start, args.io_max);
    }

    let mut settings = PivSettings::from_config(&config.sweep);
    if let Some(nsamples) = args.nsamples {
        settings.nsamples = nsamples;
    }
    if let Some(wavelength) = args.wavelength {
        settings.wavelength_nm = wavelength;
    }
    if args.pulsed {
        settings.pulse = Some(PulseSettings::from_config(&config.sweep));
    }
    settings.confirm_start = !args.yes;

    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());
    let rm = ResourceManager::system();
    let mut prompt = Prompter::stdio();

    let options = LaserOptions {
        io_max: Some(f64::from(args.io_max)),
        vf_max: Some(args.vf_max.unwrap_or(config.sweep.vf_max)),
        ..LaserOptions::from_config(&config)
    };
    let mut laser = tokio::select! {
        biased;
        signal = &mut ctrl_c => return Err(interrupted(signal)),
        laser = LaserDriver::connect(&rm, &mut prompt, options) => {
            laser.context("Failed to connect to the laser driver")?
        }
    };

    let sweep = Sweep {
        currents: &currents,
        settings: &settings,
    };
    let outcome = measure(&args, &config, &rm, &mut prompt, &laser, sweep, &mut ctrl_c).await;

    if let Err(e) = laser.close().await {
        error!("Failed to close the laser driver: {}", e);
    }
    let table = outcome?;

    prompt.message("saving...")?;
    add_to_spreadsheet(&args.filename, &table)?;
    prompt.message("done.")?;
    Ok(())
}

/// Bias points and measurement settings
struct Sweep<'a> {
    currents: &'a [u32],
    settings: &'a PivSettings,
}

fn interrupted(signal: io::Result<()>) -> anyhow::Error {
    match signal {
        Ok(()) => {
            warn!("Interrupted, shutting down instruments");
            anyhow!("Sweep interrupted")
        }
        Err(e) => anyhow::Error::new(e).context("Failed to listen for Ctrl-C"),
    }
}

/// Connect the remaining instruments and sweep, closing them whatever happens.
async fn measure<F>(
    args: &Args,
    config: &ToolsConfig,
    rm: &ResourceManager,
    prompt: &mut dyn Prompt,
    laser: &LaserDriver,
    sweep: Sweep<'_>,
    ctrl_c: &mut F,
) -> Result<Table>
where
    F: Future<Output = io::Result<()>> + Unpin,
{
    let meter_options = PowerMeter::resolve_options(config);
    let mut meter = tokio::select! {
        biased;
        signal = &mut *ctrl_c => return Err(interrupted(signal)),
        meter = PowerMeter::connect(rm, prompt, None, &meter_options) => {
            meter.context("Failed to connect to the power meter")?
        }
    };

    let mut fngen = if args.pulsed {
        let options = FunctionGenerator::resolve_options(config);
        let connected = tokio::select! {
            biased;
            signal = &mut *ctrl_c => Err(interrupted(signal)),
            fngen = FunctionGenerator::connect(rm, prompt, None, &options) => {
                fngen.context("Failed to connect to the function generator")
            }
        };
        match connected {
            Ok(fngen) => Some(fngen),
            Err(e) => {
                if let Err(close_err) = meter.close().await {
                    warn!("Failed to close the power meter: {}", close_err);
                }
                return Err(e);
            }
        }
    } else {
        None
    };

    let outcome = tokio::select! {
        biased;
        signal = &mut *ctrl_c => Err(interrupted(signal)),
        result = run_piv(
            PivInstruments {
                laser,
                meter: &mut meter,
                fngen: fngen.as_mut(),
            },
            sweep.currents,
            sweep.settings,
            prompt,
        ) => result.map_err(anyhow::Error::from),
    };

    if let Some(fngen) = fngen.as_mut() {
        if let Err(e) = fngen.close().await {
            error!("Failed to close the function generator: {}", e);
        }
    }
    if let Err(e) = meter.close().await {
        error!("Failed to close the power meter: {}", e);
    }

    let result = outcome?;
    if result.aborted {
        warn!("Sweep stopped early, remaining points are empty");
    }
    info!("{} points measured on {}", result.currents.len(), args.laserid);
    Ok(result.to_table(&args.laserid))
}
