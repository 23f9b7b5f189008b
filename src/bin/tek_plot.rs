//! tek-plot: prepare a tek-control capture for plotting
//!
//! Applies an optional moving-average filter, decimates long records to about
//! 1e5 samples and writes a plot-ready CSV with the time axis in engineering
//! units (`time_us`, `time_ms`, ...).

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;

use measurement_tools::config::ToolsConfig;
use measurement_tools::data::{Decimation, WaveformTable};
use measurement_tools::logging;

/// Filter and decimate a capture saved by tek-control, producing a CSV
/// ready to plot.
#[derive(Parser, Debug)]
#[command(name = "tek-plot", version)]
#[command(after_help = "Contact: alecfv@berkeley.edu")]
struct Args {
    /// Capture file written by tek-control
    infile: PathBuf,

    /// Plot title, defaults to <infile>
    #[arg(short, long)]
    title: Option<String>,

    /// Channel labels, in column order
    #[arg(short, long, num_args = 0..)]
    labels: Vec<String>,

    /// Moving-average filter of N samples (odd) applied before decimation
    #[arg(short = 'm', long, value_name = "N")]
    medfilt: Option<usize>,

    /// Never decimate (slow to plot)
    #[arg(short = 'n', long = "no_decimation", visible_alias = "no-decimation")]
    no_decimation: bool,

    /// Output file, defaults to <infile stem>_plot.csv
    #[arg(short, long)]
    outfile: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn default_outfile(infile: &Path) -> PathBuf {
    let stem = infile
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());
    infile.with_file_name(format!("{}_plot.csv", stem))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = ToolsConfig::load()?;
    logging::init_from_config(&config, args.verbose)?;

    let capture = WaveformTable::read_csv(&args.infile)?;
    let (mut table, decimation) = capture.prepare_for_plot(args.medfilt, !args.no_decimation)?;
    if let Some(Decimation { samples, factor }) = decimation {
        println!(
            "Original data has {} points. Decimating by {}x.",
            samples, factor
        );
    }

    if !args.labels.is_empty() {
        if args.labels.len() != table.channels.len() {
            bail!(
                "{} labels given for {} channels",
                args.labels.len(),
                table.channels.len()
            );
        }
        for ((label, _), new_label) in table.channels.iter_mut().zip(&args.labels) {
            *label = new_label.clone();
        }
    }

    let outfile = args
        .outfile
        .clone()
        .unwrap_or_else(|| default_outfile(&args.infile));
    table.write_scaled_csv(&outfile)?;

    let (_, prefix) = table.scaled_time();
    let title = args
        .title
        .clone()
        .unwrap_or_else(|| args.infile.display().to_string());
    info!("{}: Time [{}s] vs Voltage [V]", title, prefix);
    println!("created {}", outfile.display());
    Ok(())
}
