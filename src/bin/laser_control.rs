//! laser-control: command-line and interactive control of the Arroyo laser driver
//!
//! The driver output is disabled when the tool exits, so `--enable` is only
//! useful together with `--interactive`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn};

use measurement_tools::config::ToolsConfig;
use measurement_tools::hardware::ResourceManager;
use measurement_tools::instrument::{LaserDriver, LaserOptions};
use measurement_tools::interact::handlers::LaserHandler;
use measurement_tools::interact::{Console, Prompt, Prompter};
use measurement_tools::logging;

/// Start a (potentially interactive) environment to control the laser.
/// Optional flags allow control from the command line.
#[derive(Parser, Debug)]
#[command(name = "laser-control", version)]
#[command(after_help = "Contact: alecfv@berkeley.edu")]
struct Args {
    /// Enable laser output (executed last). The driver turns off as soon as
    /// this tool exits, so use --interactive to keep the laser on.
    #[arg(short, long)]
    enable: bool,

    /// Start in interactive mode
    #[arg(short, long)]
    interactive: bool,

    /// Set the driver's current limit, mA
    #[arg(short = 'm', long = "io_max", visible_alias = "io-max")]
    io_max: Option<u32>,

    /// Set the output current, mA (does not raise the limit)
    #[arg(short, long)]
    current: Option<u32>,

    /// Resource string of the driver, skipping the picker
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
    let options = LaserOptions {
        resource: args.resource.clone(),
        ..LaserOptions::from_config(&config)
    };
    let mut laser = tokio::select! {
        biased;
        signal = &mut ctrl_c => return interrupted(signal),
        laser = LaserDriver::connect(&rm, &mut prompt, options) => {
            laser.context("Failed to connect to the laser driver")?
        }
    };

    let outcome = tokio::select! {
        biased;
        signal = &mut ctrl_c => interrupted(signal),
        result = run(&args, &laser, &mut prompt) => result,
    };

    if let Err(e) = laser.close().await {
        error!("Failed to close the laser driver: {}", e);
    }
    outcome
}

fn interrupted(signal: std::io::Result<()>) -> Result<()> {
    signal.context("Failed to listen for Ctrl-C")?;
    warn!("Interrupted");
    Ok(())
}

async fn run(args: &Args, laser: &LaserDriver, prompt: &mut dyn Prompt) -> Result<()> {
    if let Some(io_max) = args.io_max {
        prompt.message(&format!("Setting current limit to {} mA", io_max))?;
        laser
            .set_current_limit(f64::from(io_max), Some(&mut *prompt))
            .await?;
    }
    if let Some(current) = args.current {
        prompt.message(&format!("Setting current to {} mA", current))?;
        laser.set_output_current(f64::from(current)).await?;
    }
    if args.enable {
        prompt.message("Enabling output...")?;
        laser.enable_output().await?;
        prompt.message("Done.")?;
    }
    if args.interactive {
        let mut handler = LaserHandler::new(laser);
        Console::new().run(prompt, &mut handler).await?;
    }
    Ok(())
}
