//! Oscilloscope capture files
//!
//! A capture is a time column plus one voltage column per channel, all the
//! same length. Captures are stored as CSV with a `time_s` column followed by
//! `CH<n>_V` columns. Post-processing for display: a moving-average filter, a
//! decimation factor that keeps plots near 1e5 points, and an engineering
//! prefix for the time axis.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::warn;

use crate::error::{AppResult, ToolsError};
use crate::instrument::tektronix::ChannelWaveform;

/// Samples a processed capture is decimated towards
pub const TARGET_SAMPLES: f64 = 1e5;

const SI_PREFIXES: [(i32, &str); 17] = [
    (-24, "y"),
    (-21, "z"),
    (-18, "a"),
    (-15, "f"),
    (-12, "p"),
    (-9, "n"),
    (-6, "u"),
    (-3, "m"),
    (0, ""),
    (3, "k"),
    (6, "M"),
    (9, "G"),
    (12, "T"),
    (15, "P"),
    (18, "E"),
    (21, "Z"),
    (24, "Y"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct WaveformTable {
    /// s
    pub time: Vec<f64>,
    /// (label, volts) per channel
    pub channels: Vec<(String, Vec<f64>)>,
}

impl WaveformTable {
    /// Build a table from captured channels in the order requested.
    ///
    /// Requested channels without data are skipped with a warning. The time
    /// axis is taken from the first channel found.
    pub fn from_waveforms(
        requested: &[u8],
        captured: &BTreeMap<u8, ChannelWaveform>,
    ) -> AppResult<Self> {
        let mut time: Option<Vec<f64>> = None;
        let mut channels = Vec::new();
        for channel in requested {
            match captured.get(channel) {
                Some(waveform) => {
                    if time.is_none() {
                        time = Some(waveform.time.clone());
                    }
                    channels.push((format!("CH{}", channel), waveform.voltage.clone()));
                }
                None => warn!("No channel {} data.", channel),
            }
        }
        let time = time.ok_or_else(|| {
            ToolsError::OutOfRange(format!("none of channels {:?} returned data", requested))
        })?;
        let table = Self { time, channels };
        table.check_lengths()?;
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    fn check_lengths(&self) -> AppResult<()> {
        for (label, volts) in &self.channels {
            if volts.len() != self.time.len() {
                return Err(ToolsError::OutOfRange(format!(
                    "{} has {} samples, time axis has {}",
                    label,
                    volts.len(),
                    self.time.len()
                )));
            }
        }
        Ok(())
    }

    /// Moving average over an odd `window`. The time axis loses
    /// `(window - 1) / 2` samples at each end so it stays centred.
    pub fn moving_average(&self, window: usize) -> AppResult<Self> {
        if window % 2 == 0 {
            return Err(ToolsError::OutOfRange(format!(
                "filter window {} must be odd",
                window
            )));
        }
        if window > self.len() {
            return Err(ToolsError::OutOfRange(format!(
                "filter window {} longer than the {} samples",
                window,
                self.len()
            )));
        }
        let cut = (window - 1) / 2;
        let time = self.time[cut..self.len() - cut].to_vec();
        let channels = self
            .channels
            .iter()
            .map(|(label, volts)| {
                let filtered = volts
                    .windows(window)
                    .map(|w| w.iter().sum::<f64>() / window as f64)
                    .collect();
                (label.clone(), filtered)
            })
            .collect();
        Ok(Self { time, channels })
    }

    /// Keep every `factor`-th sample
    pub fn decimate(&self, factor: usize) -> Self {
        let factor = factor.max(1);
        let pick = |v: &[f64]| v.iter().step_by(factor).copied().collect::<Vec<_>>();
        Self {
            time: pick(&self.time[..]),
            channels: self
                .channels
                .iter()
                .map(|(label, volts)| (label.clone(), pick(&volts[..])))
                .collect(),
        }
    }

    /// Filter and thin a capture for plotting.
    ///
    /// The moving average runs first. Records are decimated towards
    /// [`TARGET_SAMPLES`] only when allowed and the factor is above 2.
    pub fn prepare_for_plot(
        &self,
        window: Option<usize>,
        allow_decimation: bool,
    ) -> AppResult<(Self, Option<Decimation>)> {
        let table = match window {
            Some(window) => self.moving_average(window)?,
            None => self.clone(),
        };
        let factor = decimation_factor(table.len());
        if factor > 2 && allow_decimation {
            let decimation = Decimation {
                samples: table.len(),
                factor,
            };
            return Ok((table.decimate(factor), Some(decimation)));
        }
        Ok((table, None))
    }

    /// Time axis scaled to the prefix of its last sample
    pub fn scaled_time(&self) -> (Vec<f64>, &'static str) {
        let (magnitude, prefix) = time_prefix(self.time.last().copied().unwrap_or(0.0));
        let scale = 10f64.powi(-magnitude);
        (self.time.iter().map(|t| t * scale).collect(), prefix)
    }
}

/// Decimation applied by [`WaveformTable::prepare_for_plot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimation {
    /// Samples before decimation
    pub samples: usize,
    pub factor: usize,
}

/// `ceil(samples / 1e5)`
pub fn decimation_factor(samples: usize) -> usize {
    (samples as f64 / TARGET_SAMPLES).ceil() as usize
}

/// Engineering magnitude and SI prefix for a time value.
///
/// Zero, negative and non-finite values use no prefix.
pub fn time_prefix(t: f64) -> (i32, &'static str) {
    if !(t.is_finite() && t > 0.0) {
        return (0, "");
    }
    let magnitude = ((t.log10() / 3.0).floor() * 3.0) as i32;
    let magnitude = magnitude.clamp(-24, 24);
    SI_PREFIXES
        .iter()
        .find(|(m, _)| *m == magnitude)
        .map(|&(m, p)| (m, p))
        .unwrap_or((0, ""))
}

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use tracing::info;

    impl WaveformTable {
        pub fn write_csv(&self, path: impl AsRef<Path>) -> AppResult<()> {
            self.write_csv_with_time_header(path, "time_s", &self.time)
        }

        /// Write with the time axis in prefixed units (`time_us`, `time_ms`, ...)
        pub fn write_scaled_csv(&self, path: impl AsRef<Path>) -> AppResult<()> {
            let (time, prefix) = self.scaled_time();
            self.write_csv_with_time_header(path, &format!("time_{}s", prefix), &time)
        }

        fn write_csv_with_time_header(
            &self,
            path: impl AsRef<Path>,
            time_header: &str,
            time: &[f64],
        ) -> AppResult<()> {
            let path = path.as_ref();
            let mut writer = csv::Writer::from_path(path)?;
            let mut header = vec![time_header.to_string()];
            header.extend(self.channels.iter().map(|(label, _)| format!("{}_V", label)));
            writer.write_record(&header)?;
            for (i, t) in time.iter().enumerate() {
                let mut row = vec![t.to_string()];
                row.extend(self.channels.iter().map(|(_, v)| v[i].to_string()));
                writer.write_record(&row)?;
            }
            writer.flush()?;
            info!("Saved {} samples x {} channels to {}", self.len(), self.channels.len(), path.display());
            Ok(())
        }

        /// Read a capture written by [`write_csv`](Self::write_csv)
        pub fn read_csv(path: impl AsRef<Path>) -> AppResult<Self> {
            let mut reader = csv::Reader::from_path(path.as_ref())?;
            let headers = reader.headers()?.clone();
            if headers.is_empty() {
                return Err(ToolsError::UnsupportedFormat(format!(
                    "{} has no columns",
                    path.as_ref().display()
                )));
            }
            let labels: Vec<String> = headers
                .iter()
                .skip(1)
                .map(|h| h.strip_suffix("_V").unwrap_or(h).to_string())
                .collect();

            let mut time = Vec::new();
            let mut volts: Vec<Vec<f64>> = vec![Vec::new(); labels.len()];
            for record in reader.records() {
                let record = record?;
                let mut fields = record.iter().map(|f| {
                    f.trim()
                        .parse::<f64>()
                        .map_err(|_| ToolsError::UnsupportedFormat(format!("non-numeric cell '{}'", f)))
                });
                time.push(fields.next().transpose()?.unwrap_or(f64::NAN));
                for column in volts.iter_mut() {
                    column.push(fields.next().transpose()?.unwrap_or(f64::NAN));
                }
            }

            let table = Self {
                time,
                channels: labels.into_iter().zip(volts).collect(),
            };
            table.check_lengths()?;
            Ok(table)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(time: &[f64], ch1: &[f64]) -> WaveformTable {
        WaveformTable {
            time: time.to_vec(),
            channels: vec![("CH1".to_string(), ch1.to_vec())],
        }
    }

    #[test]
    fn test_moving_average_trims_both_ends() {
        let t = table(&[0.0, 1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 4.0, 8.0]);
        let f = t.moving_average(3).unwrap();
        assert_eq!(f.time, vec![1.0, 2.0, 3.0]);
        assert_eq!(f.channels[0].1, vec![2.0, 3.0, 5.0]);
        assert_eq!(t.moving_average(1).unwrap(), t);
        assert!(t.moving_average(4).is_err());
        assert!(t.moving_average(7).is_err());
    }

    #[test]
    fn test_decimation_factor() {
        assert_eq!(decimation_factor(0), 0);
        assert_eq!(decimation_factor(100_000), 1);
        assert_eq!(decimation_factor(100_001), 2);
        assert_eq!(decimation_factor(1_000_000), 10);
        let t = table(&[0.0, 1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(t.decimate(2).time, vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_prepare_for_plot_decimates_only_long_records() {
        let ramp = |n: usize| {
            let time: Vec<f64> = (0..n).map(|i| i as f64 * 1e-9).collect();
            table(&time, &vec![0.25; n])
        };

        // Factor 2 is left alone
        let (t, decimation) = ramp(150_000).prepare_for_plot(None, true).unwrap();
        assert_eq!(t.len(), 150_000);
        assert_eq!(decimation, None);

        let (t, decimation) = ramp(300_001).prepare_for_plot(None, true).unwrap();
        assert_eq!(
            decimation,
            Some(Decimation {
                samples: 300_001,
                factor: 4
            })
        );
        assert_eq!(t.len(), 75_001);
        assert_eq!(t.channels[0].1.len(), 75_001);

        let (t, decimation) = ramp(300_001).prepare_for_plot(None, false).unwrap();
        assert_eq!(t.len(), 300_001);
        assert_eq!(decimation, None);
    }

    #[test]
    fn test_prepare_for_plot_filters_before_decimating() {
        let t = table(&[0.0, 1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 4.0, 8.0]);
        let (f, decimation) = t.prepare_for_plot(Some(3), true).unwrap();
        assert_eq!(decimation, None);
        assert_eq!(f.channels[0].1, vec![2.0, 3.0, 5.0]);
        assert!(t.prepare_for_plot(Some(2), true).is_err());
    }

    #[test]
    fn test_time_prefix() {
        assert_eq!(time_prefix(2.5e-3), (-3, "m"));
        assert_eq!(time_prefix(999e-9), (-9, "n"));
        assert_eq!(time_prefix(2e-6), (-6, "u"));
        assert_eq!(time_prefix(4.0), (0, ""));
        assert_eq!(time_prefix(0.0), (0, ""));
        let (scaled, prefix) = table(&[0.0, 1e-3, 2e-3], &[0.0; 3]).scaled_time();
        assert_eq!(prefix, "m");
        assert!((scaled[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_from_waveforms_skips_missing() {
        let mut captured = BTreeMap::new();
        captured.insert(
            2,
            ChannelWaveform {
                channel: 2,
                time: vec![0.0, 1.0],
                voltage: vec![0.5, 0.6],
            },
        );
        let t = WaveformTable::from_waveforms(&[1, 2], &captured).unwrap();
        assert_eq!(t.channels.len(), 1);
        assert_eq!(t.channels[0].0, "CH2");
        assert!(WaveformTable::from_waveforms(&[3], &captured).is_err());
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.csv");
        let t = WaveformTable {
            time: vec![0.0, 1e-6],
            channels: vec![
                ("CH1".to_string(), vec![0.5, -0.5]),
                ("CH3".to_string(), vec![1.0, 2.0]),
            ],
        };
        t.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("time_s,CH1_V,CH3_V\n"));
        assert_eq!(WaveformTable::read_csv(&path).unwrap(), t);
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_scaled_csv_uses_prefixed_time_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture_plot.csv");
        let t = WaveformTable {
            time: vec![0.0, 1e-6, 2e-6],
            channels: vec![("probe A".to_string(), vec![0.1, 0.2, 0.3])],
        };
        t.write_scaled_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("time_us,probe A_V"));
        let last: Vec<f64> = lines
            .last()
            .unwrap()
            .split(',')
            .map(|v| v.parse().unwrap())
            .collect();
        assert!((last[0] - 2.0).abs() < 1e-9);
        assert_eq!(last[1], 0.3);

        // Read back, the time column keeps its scaled values
        let back = WaveformTable::read_csv(&path).unwrap();
        assert_eq!(back.channels[0].0, "probe A");
        assert!((back.time[1] - 1.0).abs() < 1e-9);
    }
}
