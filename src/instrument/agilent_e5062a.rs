//! Agilent E5062A vector network analyzer
//!
//! Channel/trace model of the ENA series: a channel owns the sweep, and up to
//! four traces per channel each display one S-parameter. Formatted trace data
//! (`CALC1:DATA:FDAT?`) arrives as interleaved pairs, which in polar format
//! are the real and imaginary parts of the measured S-parameter.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use num_complex::Complex32;
use tracing::{debug, info};

use crate::adapters::{ScpiTransport, SessionSettings};
use crate::config::ToolsConfig;
use crate::error::{AppResult, ToolsError};
use crate::hardware::ResourceManager;
use crate::interact::{resolve_resource, Prompt, ResolveOptions};
use crate::scpi;

/// Role the resource is cached under
pub const ROLE: &str = "AgilentE5602A";

/// Measurement channels of the E5062A
pub const CHANNELS: std::ops::RangeInclusive<u8> = 1..=4;

/// Traces per channel
pub const MAX_TRACES: u8 = 4;

/// S-parameters in trace order; row-major 2x2 matrix order
pub const S_PARAMETERS: [&str; 4] = ["S11", "S12", "S21", "S22"];

/// Trace display formats accepted by `CALC:FORM`
pub const TRACE_FORMATS: [&str; 17] = [
    "MLOG", "PHAS", "GDEL", "SLIN", "SLOG", "SCOM", "SMIT", "SADM", "PLIN", "PLOG", "POL", "MLIN",
    "SWR", "REAL", "IMAG", "UPH", "PPH",
];

pub struct NetworkAnalyzer {
    transport: Box<dyn ScpiTransport>,
    idn: String,
}

impl NetworkAnalyzer {
    pub async fn connect(
        rm: &ResourceManager,
        prompt: &mut dyn Prompt,
        resource: Option<String>,
        resolve: &ResolveOptions,
    ) -> AppResult<Self> {
        prompt.message("Connecting to Agilent E5602A VNA:")?;
        let resource = match resource {
            Some(resource) => resource,
            None => resolve_resource(rm, prompt, resolve).await?,
        };
        let settings = SessionSettings::default().with_timeout(std::time::Duration::from_secs(10));
        let transport = rm.open(&resource, &settings).await?;
        let vna = Self::from_transport(transport).await?;
        prompt.message(&format!("Successfully connected to {}", vna.idn))?;
        Ok(vna)
    }

    pub fn resolve_options(config: &ToolsConfig) -> ResolveOptions {
        ResolveOptions::from_config(config, ROLE)
    }

    pub async fn from_transport(mut transport: Box<dyn ScpiTransport>) -> AppResult<Self> {
        let idn = scpi::identify(&mut *transport).await?;
        info!("Network analyzer: {}", idn);
        Ok(Self { transport, idn })
    }

    pub fn idn(&self) -> &str {
        &self.idn
    }

    pub fn channel(&mut self, number: u8) -> AppResult<VnaChannel<'_>> {
        if !CHANNELS.contains(&number) {
            return Err(ToolsError::OutOfRange(format!(
                "VNA channel {} outside 1..=4",
                number
            )));
        }
        Ok(VnaChannel { vna: self, number })
    }

    pub async fn close(&mut self) -> AppResult<()> {
        self.transport.close().await
    }
}

/// One measurement channel
pub struct VnaChannel<'a> {
    vna: &'a mut NetworkAnalyzer,
    number: u8,
}

impl VnaChannel<'_> {
    pub fn number(&self) -> u8 {
        self.number
    }

    async fn write(&mut self, command: String) -> AppResult<()> {
        debug!("vna <- {}", command);
        self.vna.transport.write(&command).await
    }

    async fn query_value(&mut self, command: String) -> AppResult<f64> {
        scpi::query_value(&mut *self.vna.transport, &command).await
    }

    pub async fn start_frequency(&mut self) -> AppResult<f64> {
        self.query_value(format!("SENS{}:FREQ:STAR?", self.number))
            .await
    }

    pub async fn set_start_frequency(&mut self, hz: f64) -> AppResult<()> {
        self.write(format!("SENS{}:FREQ:STAR {}", self.number, hz))
            .await
    }

    pub async fn stop_frequency(&mut self) -> AppResult<f64> {
        self.query_value(format!("SENS{}:FREQ:STOP?", self.number))
            .await
    }

    pub async fn set_stop_frequency(&mut self, hz: f64) -> AppResult<()> {
        self.write(format!("SENS{}:FREQ:STOP {}", self.number, hz))
            .await
    }

    pub async fn scan_points(&mut self) -> AppResult<usize> {
        let points = self
            .query_value(format!("SENS{}:SWE:POIN?", self.number))
            .await?;
        Ok(points as usize)
    }

    pub async fn set_scan_points(&mut self, points: usize) -> AppResult<()> {
        if !(2..=1601).contains(&points) {
            return Err(ToolsError::OutOfRange(format!(
                "{} sweep points outside 2..=1601",
                points
            )));
        }
        self.write(format!("SENS{}:SWE:POIN {}", self.number, points))
            .await
    }

    /// IF bandwidth in Hz
    pub async fn set_if_bandwidth(&mut self, hz: f64) -> AppResult<()> {
        self.write(format!("SENS{}:BAND {}", self.number, hz)).await
    }

    /// Linear sweep frequencies from start, stop and point count
    pub async fn frequencies(&mut self) -> AppResult<Vec<f64>> {
        let start = self.start_frequency().await?;
        let stop = self.stop_frequency().await?;
        let points = self.scan_points().await?;
        Ok(linspace(start, stop, points))
    }

    pub async fn set_visible_traces(&mut self, count: u8) -> AppResult<()> {
        if !(1..=MAX_TRACES).contains(&count) {
            return Err(ToolsError::OutOfRange(format!(
                "{} traces outside 1..={}",
                count, MAX_TRACES
            )));
        }
        self.write(format!("CALC{}:PAR:COUN {}", self.number, count))
            .await
    }

    /// Measured parameter of `trace` (S11, S12, S21 or S22)
    pub async fn set_trace_parameter(&mut self, trace: u8, parameter: &str) -> AppResult<()> {
        check_trace(trace)?;
        let parameter = parameter.to_ascii_uppercase();
        if !S_PARAMETERS.contains(&parameter.as_str()) {
            return Err(ToolsError::OutOfRange(format!(
                "unknown S-parameter '{}'",
                parameter
            )));
        }
        self.write(format!(
            "CALC{}:PAR{}:DEF {}",
            self.number, trace, parameter
        ))
        .await
    }

    /// Make `trace` the active one; data and format commands apply to it
    pub async fn activate_trace(&mut self, trace: u8) -> AppResult<()> {
        check_trace(trace)?;
        self.write(format!("CALC{}:PAR{}:SEL", self.number, trace))
            .await
    }

    /// Display format of the active trace
    pub async fn set_trace_format(&mut self, format: &str) -> AppResult<()> {
        let format = format.to_ascii_uppercase();
        if !TRACE_FORMATS.contains(&format.as_str()) {
            return Err(ToolsError::OutOfRange(format!(
                "unknown trace format '{}'",
                format
            )));
        }
        self.write(format!("CALC{}:FORM {}", self.number, format))
            .await
    }

    /// Formatted data of the active trace as (real, imaginary) vectors
    pub async fn data(&mut self) -> AppResult<(Vec<f64>, Vec<f64>)> {
        let command = format!("CALC{}:DATA:FDAT?", self.number);
        let values = scpi::query_values(&mut *self.vna.transport, &command).await?;
        if values.len() % 2 != 0 {
            return Err(ToolsError::invalid_response(
                command,
                format!("{} values, expected pairs", values.len()),
            ));
        }
        Ok(values
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .unzip())
    }
}

fn check_trace(trace: u8) -> AppResult<()> {
    if (1..=MAX_TRACES).contains(&trace) {
        Ok(())
    } else {
        Err(ToolsError::OutOfRange(format!(
            "trace {} outside 1..={}",
            trace, MAX_TRACES
        )))
    }
}

fn linspace(start: f64, stop: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Two-port S-parameter measurement
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    /// Hz
    pub frequencies: Vec<f64>,
    /// `s[k][i][j]` is S(i+1)(j+1) at `frequencies[k]`
    pub s: Vec<[[Complex32; 2]; 2]>,
    /// Reference impedance, ohms
    pub z0: f64,
}

impl Network {
    /// Write a Touchstone v1 `.s2p` file (real/imaginary, Hz)
    pub fn write_touchstone(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.write_touchstone_to(&mut writer)?;
        writer.flush()?;
        info!("Wrote {} points to {}", self.frequencies.len(), path.as_ref().display());
        Ok(())
    }

    pub fn write_touchstone_to<W: Write>(&self, mut writer: W) -> AppResult<()> {
        writeln!(writer, "! Agilent E5062A, {} points", self.frequencies.len())?;
        writeln!(writer, "# Hz S RI R {}", self.z0)?;
        for (f, s) in self.frequencies.iter().zip(&self.s) {
            // Two-port data lines are ordered S11 S21 S12 S22.
            let [[s11, s12], [s21, s22]] = *s;
            writeln!(
                writer,
                "{} {:e} {:e} {:e} {:e} {:e} {:e} {:e} {:e}",
                f, s11.re, s11.im, s21.re, s21.im, s12.re, s12.im, s22.re, s22.im
            )?;
        }
        Ok(())
    }
}

/// Measure all four S-parameters on `channel` with the present sweep settings.
///
/// Uses traces 1-4 in polar format; the trace setup is left in place.
pub async fn construct_network(channel: &mut VnaChannel<'_>) -> AppResult<Network> {
    let frequencies = channel.frequencies().await?;
    let mut columns: Vec<Vec<Complex32>> = Vec::with_capacity(S_PARAMETERS.len());

    channel.set_visible_traces(MAX_TRACES).await?;
    for (trace, parameter) in (1..=MAX_TRACES).zip(S_PARAMETERS) {
        channel.set_trace_parameter(trace, parameter).await?;
        channel.activate_trace(trace).await?;
        channel.set_trace_format("POL").await?;
        let (re, im) = channel.data().await?;
        if re.len() != frequencies.len() {
            return Err(ToolsError::InvalidResponse {
                command: format!("CALC{}:DATA:FDAT?", channel.number()),
                response: format!(
                    "{} points for {} ({} expected)",
                    re.len(),
                    parameter,
                    frequencies.len()
                ),
            });
        }
        columns.push(
            re.iter()
                .zip(&im)
                .map(|(&re, &im)| Complex32::new(re as f32, im as f32))
                .collect(),
        );
    }

    let s = (0..frequencies.len())
        .map(|k| {
            [
                [columns[0][k], columns[1][k]],
                [columns[2][k], columns[3][k]],
            ]
        })
        .collect();

    Ok(Network {
        frequencies,
        s,
        z0: 50.0,
    })
}
