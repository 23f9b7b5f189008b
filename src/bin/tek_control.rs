//! tek-control: capture and configure a Tektronix oscilloscope over its socket server
//!
//! Actions run in the order capture, reset, trigger mode, horizontal scale,
//! horizontal position, interactive.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn};

use measurement_tools::config::ToolsConfig;
use measurement_tools::data::WaveformTable;
use measurement_tools::hardware::ResourceManager;
use measurement_tools::instrument::{Oscilloscope, TriggerMode};
use measurement_tools::interact::handlers::ScopeHandler;
use measurement_tools::interact::{Console, Prompt, Prompter};
use measurement_tools::logging;

/// Start a (potentially interactive) environment to control a Tektronix
/// scope. Optional flags allow control from the command line.
#[derive(Parser, Debug)]
#[command(name = "tek-control", version)]
#[command(after_help = "Contact: alecfv@berkeley.edu")]
struct Args {
    /// Channel(s) to operate on, 1-4
    #[arg(
        short,
        long,
        num_args = 1..,
        default_values_t = [1u8, 2, 3, 4],
        value_parser = clap::value_parser!(u8).range(1..=4)
    )]
    channel: Vec<u8>,

    /// Start interactive mode
    #[arg(short, long)]
    interactive: bool,

    /// Reset the oscilloscope settings to a known state
    #[arg(short, long)]
    reset: bool,

    /// Trigger mode
    #[arg(short, long, value_parser = ["auto", "normal"])]
    mode: Option<String>,

    /// Horizontal scroll position, 0-100
    #[arg(long)]
    hpos: Option<f64>,

    /// Horizontal scale, s/div
    #[arg(long)]
    hscale: Option<f64>,

    /// Output capture (.csv): a time_s column followed by one CH<n>_V column
    /// per channel
    #[arg(short, long)]
    filename: Option<PathBuf>,

    /// Scope address, overriding the configuration
    #[arg(long)]
    host: Option<String>,

    /// Socket server port, overriding the configuration
    #[arg(long)]
    port: Option<u16>,

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
    let mut config = match &args.config {
        Some(path) => ToolsConfig::load_from(path)?,
        None => ToolsConfig::load()?,
    };
    logging::init_from_config(&config, args.verbose)?;
    if let Some(host) = &args.host {
        config.scope.host = host.clone();
    }
    if let Some(port) = args.port {
        config.scope.port = port;
    }

    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());
    let rm = ResourceManager::system();
    let mut prompt = Prompter::stdio();
    let mut scope = tokio::select! {
        biased;
        signal = &mut ctrl_c => return interrupted(signal),
        scope = Oscilloscope::connect(&rm, &mut prompt, &config.scope) => {
            scope.context("Failed to connect to the oscilloscope")?
        }
    };

    let outcome = tokio::select! {
        biased;
        signal = &mut ctrl_c => interrupted(signal),
        result = run(&args, &mut scope, &mut prompt) => result,
    };

    if let Err(e) = scope.close().await {
        error!("Failed to close the oscilloscope: {}", e);
    }
    outcome
}

fn interrupted(signal: std::io::Result<()>) -> Result<()> {
    signal.context("Failed to listen for Ctrl-C")?;
    warn!("Interrupted");
    Ok(())
}

async fn run(args: &Args, scope: &mut Oscilloscope, prompt: &mut dyn Prompt) -> Result<()> {
    if let Some(filename) = &args.filename {
        let captured = scope.retrieve_all_waveforms().await?;
        let table = WaveformTable::from_waveforms(&args.channel, &captured)?;
        table.write_csv(filename)?;
        prompt.message(&format!(
            "Saved {} samples x {} channels to {}",
            table.len(),
            table.channels.len(),
            filename.display()
        ))?;
    }
    if args.reset {
        scope.reset().await?;
    }
    if let Some(mode) = &args.mode {
        scope.set_trigger_mode(mode.parse::<TriggerMode>()?).await?;
    }
    if let Some(hscale) = args.hscale {
        scope.set_horizontal_scale(hscale).await?;
    }
    if let Some(hpos) = args.hpos {
        scope.set_horizontal_position(hpos).await?;
    }
    if args.interactive {
        let mut handler = ScopeHandler::new(scope);
        Console::new().run(prompt, &mut handler).await?;
    }
    Ok(())
}
