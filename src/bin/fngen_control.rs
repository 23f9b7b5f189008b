//! fngen-control: command-line and interactive control of the Agilent 33500B
//!
//! Settings are applied in the order shape, frequency, offset, unit,
//! amplitude, output. Outputs are left as set when the tool exits.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn};

use measurement_tools::config::ToolsConfig;
use measurement_tools::hardware::ResourceManager;
use measurement_tools::instrument::agilent33500::AmplitudeUnit;
use measurement_tools::instrument::{FunctionGenerator, Waveform};
use measurement_tools::interact::handlers::FunctionGeneratorHandler;
use measurement_tools::interact::{Console, Prompt, Prompter};
use measurement_tools::logging;

/// Start a (potentially interactive) environment to control the Agilent
/// 33500B function generator. Optional flags allow control from the command
/// line.
#[derive(Parser, Debug)]
#[command(name = "fngen-control", version)]
#[command(after_help = "Contact: alecfv@berkeley.edu")]
struct Args {
    /// Channel the settings apply to. One channel at a time.
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    channel: u8,

    /// Waveform shape
    #[arg(short, long, value_parser = ["SIN", "SQU", "TRI", "RAMP", "PULS", "PRBS", "NOIS", "ARB", "DC"], ignore_case = true)]
    shape: Option<String>,

    /// Frequency, 1 uHz to 120 MHz
    #[arg(short, long)]
    frequency: Option<f64>,

    /// Voltage offset, V
    #[arg(short, long, allow_negative_numbers = true)]
    offset: Option<f64>,

    /// Amplitude, 10 mV to 10 V depending on output impedance, in the
    /// channel's present unit unless --units is given
    #[arg(short, long)]
    amplitude: Option<f64>,

    /// Amplitude unit
    #[arg(long, value_parser = ["VPP", "VRMS", "DBM"], ignore_case = true)]
    units: Option<String>,

    /// Turn the channel output on, after every other setting
    #[arg(short, long, conflicts_with = "disable")]
    enable: bool,

    /// Turn the channel output off
    #[arg(short, long)]
    disable: bool,

    /// Enter interactive mode
    #[arg(short, long)]
    interactive: bool,

    /// Resource string of the generator, skipping the picker
    #[arg(long)]
    resource: Option<String>,

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

    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());
    let rm = ResourceManager::system();
    let mut prompt = Prompter::stdio();
    let options = FunctionGenerator::resolve_options(&config);
    let mut fngen = tokio::select! {
        biased;
        signal = &mut ctrl_c => return interrupted(signal),
        fngen = FunctionGenerator::connect(&rm, &mut prompt, args.resource.clone(), &options) => {
            fngen.context("Failed to connect to the function generator")?
        }
    };

    let outcome = tokio::select! {
        biased;
        signal = &mut ctrl_c => interrupted(signal),
        result = run(&args, &mut fngen, &mut prompt) => result,
    };

    if let Err(e) = fngen.disconnect().await {
        error!("Failed to release the function generator: {}", e);
    }
    outcome
}

fn interrupted(signal: std::io::Result<()>) -> Result<()> {
    signal.context("Failed to listen for Ctrl-C")?;
    warn!("Interrupted");
    Ok(())
}

async fn run(args: &Args, fngen: &mut FunctionGenerator, prompt: &mut dyn Prompt) -> Result<()> {
    {
        let mut ch = fngen.channel(args.channel)?;
        if let Some(shape) = &args.shape {
            ch.set_shape(shape.parse::<Waveform>()?).await?;
        }
        if let Some(frequency) = args.frequency {
            ch.set_frequency(frequency).await?;
        }
        if let Some(offset) = args.offset {
            ch.set_offset(offset).await?;
        }
        if let Some(units) = &args.units {
            ch.set_amplitude_unit(units.parse::<AmplitudeUnit>()?).await?;
        }
        if let Some(amplitude) = args.amplitude {
            ch.set_amplitude(amplitude).await?;
        }
        if args.enable {
            ch.set_output(true).await?;
        }
        if args.disable {
            ch.set_output(false).await?;
        }
    }
    if args.interactive {
        let mut handler = FunctionGeneratorHandler::new(fngen, args.channel)?;
        Console::new().run(prompt, &mut handler).await?;
    }
    Ok(())
}
