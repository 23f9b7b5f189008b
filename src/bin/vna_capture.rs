//! vna-capture: measure a two-port network on the Agilent E5062A and save it
//! as a Touchstone `.s2p` file

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use measurement_tools::config::ToolsConfig;
use measurement_tools::hardware::ResourceManager;
use measurement_tools::instrument::{construct_network, NetworkAnalyzer};
use measurement_tools::interact::Prompter;
use measurement_tools::logging;

/// Measure S11, S12, S21 and S22 on one VNA channel and write them to a
/// Touchstone file.
#[derive(Parser, Debug)]
#[command(name = "vna-capture", version)]
#[command(after_help = "Contact: alecfv@berkeley.edu")]
struct Args {
    /// Output file (.s2p)
    output: PathBuf,

    /// Measurement channel, 1-4
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=4))]
    channel: u8,

    /// Sweep start frequency, Hz
    #[arg(long)]
    start: Option<f64>,

    /// Sweep stop frequency, Hz
    #[arg(long)]
    stop: Option<f64>,

    /// Sweep points, 2-1601
    #[arg(short, long)]
    points: Option<usize>,

    /// Resource string of the analyzer, skipping the picker
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

    let is_s2p = args
        .output
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("s2p"));
    if !is_s2p {
        bail!("{} must have the .s2p extension", args.output.display());
    }

    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());
    let rm = ResourceManager::system();
    let mut prompt = Prompter::stdio();
    let options = NetworkAnalyzer::resolve_options(&config);
    let mut vna = tokio::select! {
        biased;
        signal = &mut ctrl_c => return interrupted(signal),
        vna = NetworkAnalyzer::connect(&rm, &mut prompt, args.resource.clone(), &options) => {
            vna.context("Failed to connect to the network analyzer")?
        }
    };

    let outcome = tokio::select! {
        biased;
        signal = &mut ctrl_c => interrupted(signal),
        result = capture(&args, &mut vna) => result,
    };

    if let Err(e) = vna.close().await {
        error!("Failed to close the network analyzer: {}", e);
    }
    outcome
}

fn interrupted(signal: std::io::Result<()>) -> Result<()> {
    signal.context("Failed to listen for Ctrl-C")?;
    warn!("Interrupted");
    Ok(())
}

async fn capture(args: &Args, vna: &mut NetworkAnalyzer) -> Result<()> {
    let mut channel = vna.channel(args.channel)?;
    if let Some(start) = args.start {
        channel.set_start_frequency(start).await?;
    }
    if let Some(stop) = args.stop {
        channel.set_stop_frequency(stop).await?;
    }
    if let Some(points) = args.points {
        channel.set_scan_points(points).await?;
    }

    let network = construct_network(&mut channel).await?;
    network.write_touchstone(&args.output)?;
    info!(
        "Captured {} points on channel {}",
        network.frequencies.len(),
        args.channel
    );
    Ok(())
}
