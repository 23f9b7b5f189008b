//! Tektronix oscilloscope over the raw socket server
//!
//! The scope's socket server (Utility > I/O > Socket Server) speaks plain
//! SCPI over TCP, one `\n` terminated line per command. Response headers are
//! switched off on connect so queries return bare values.
//!
//! Waveforms are transferred as ASCII curves and scaled with the
//! `WFMOUTPRE` preamble:
//!
//! ```text
//! t[i] = XZERO + XINCR * (i - PT_OFF)
//! v[i] = (raw[i] - YOFF) * YMULT + YZERO
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::adapters::{ScpiTransport, SessionSettings};
use crate::config::ScopeConfig;
use crate::error::{AppResult, ToolsError};
use crate::hardware::ResourceManager;
use crate::interact::Prompt;
use crate::scpi;

/// Analog input channels
pub const CHANNELS: std::ops::RangeInclusive<u8> = 1..=4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Auto,
    Normal,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerMode::Auto => "AUTO",
            TriggerMode::Normal => "NORMal",
        })
    }
}

impl FromStr for TriggerMode {
    type Err = ToolsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(TriggerMode::Auto),
            "normal" | "norm" => Ok(TriggerMode::Normal),
            other => Err(ToolsError::OutOfRange(format!(
                "trigger mode '{}' is not auto or normal",
                other
            ))),
        }
    }
}

/// Scaling fields of `WFMOUTPRE`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformPreamble {
    pub x_increment: f64,
    pub x_zero: f64,
    pub pt_off: f64,
    pub y_mult: f64,
    pub y_off: f64,
    pub y_zero: f64,
}

impl WaveformPreamble {
    pub fn time_axis(&self, samples: usize) -> Vec<f64> {
        (0..samples)
            .map(|i| self.x_zero + self.x_increment * (i as f64 - self.pt_off))
            .collect()
    }

    pub fn scale(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .map(|r| (r - self.y_off) * self.y_mult + self.y_zero)
            .collect()
    }
}

/// One captured channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelWaveform {
    pub channel: u8,
    /// s
    pub time: Vec<f64>,
    /// V
    pub voltage: Vec<f64>,
}

pub struct Oscilloscope {
    transport: Box<dyn ScpiTransport>,
    idn: String,
}

impl Oscilloscope {
    /// Socket resource string for `host:port`
    pub fn resource_name(host: &str, port: u16) -> String {
        format!("TCPSOCKET::{}::{}::SOCKET", host, port)
    }

    /// Connect to the scope's socket server.
    ///
    /// The scope must already have its link-local address.
    pub async fn connect(
        rm: &ResourceManager,
        prompt: &mut dyn Prompt,
        config: &ScopeConfig,
    ) -> AppResult<Self> {
        prompt.message("Connecting to Tektronix Oscilloscope:")?;
        let resource = Self::resource_name(&config.host, config.port);
        let settings =
            SessionSettings::default().with_timeout(Duration::from_millis(config.timeout_ms));
        let transport = rm.open(&resource, &settings).await?;
        let scope = Self::from_transport(transport).await?;
        prompt.message(&format!("Successfully connected to {}", scope.idn))?;
        Ok(scope)
    }

    pub async fn from_transport(mut transport: Box<dyn ScpiTransport>) -> AppResult<Self> {
        transport.write(":HEADer OFF").await?;
        let idn = scpi::identify(&mut *transport).await?;
        info!("Oscilloscope: {}", idn);
        Ok(Self { transport, idn })
    }

    pub fn idn(&self) -> &str {
        &self.idn
    }

    pub async fn send_raw_command(&mut self, command: &str) -> AppResult<()> {
        debug!("scope <- {}", command);
        self.transport.write(command).await
    }

    pub async fn query(&mut self, command: &str) -> AppResult<String> {
        self.transport.query(command).await
    }

    /// Restore factory settings
    pub async fn reset(&mut self) -> AppResult<()> {
        self.send_raw_command("*RST").await
    }

    pub async fn set_trigger_mode(&mut self, mode: TriggerMode) -> AppResult<()> {
        self.send_raw_command(&format!(":TRIGger:A:MODE {}", mode))
            .await
    }

    /// Seconds per division
    pub async fn set_horizontal_scale(&mut self, seconds_per_div: f64) -> AppResult<()> {
        if !(seconds_per_div.is_finite() && seconds_per_div > 0.0) {
            return Err(ToolsError::OutOfRange(format!(
                "horizontal scale {} s/div must be positive",
                seconds_per_div
            )));
        }
        self.send_raw_command(&format!(":HORIZONTAL:SCALE {}", seconds_per_div))
            .await
    }

    /// Trigger position as a percentage of the record, 0-100
    pub async fn set_horizontal_position(&mut self, percent: f64) -> AppResult<()> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(ToolsError::OutOfRange(format!(
                "horizontal position {} outside 0-100",
                percent
            )));
        }
        self.send_raw_command(&format!(":HORIZONTAL:POSITION {}", percent))
            .await
    }

    /// Whether `channel` is switched on in the display
    pub async fn is_displayed(&mut self, channel: u8) -> AppResult<bool> {
        check_channel(channel)?;
        scpi::query_bool(&mut *self.transport, &format!(":SELect:CH{}?", channel)).await
    }

    async fn preamble(&mut self) -> AppResult<WaveformPreamble> {
        let t = &mut *self.transport;
        Ok(WaveformPreamble {
            x_increment: scpi::query_value(t, "WFMOUTPRE:XINCR?").await?,
            x_zero: scpi::query_value(t, "WFMOUTPRE:XZERO?").await?,
            pt_off: scpi::query_value(t, "WFMOUTPRE:PT_OFF?").await?,
            y_mult: scpi::query_value(t, "WFMOUTPRE:YMULT?").await?,
            y_off: scpi::query_value(t, "WFMOUTPRE:YOFF?").await?,
            y_zero: scpi::query_value(t, "WFMOUTPRE:YZERO?").await?,
        })
    }

    /// Transfer one channel's record. `Ok(None)` when it is not displayed.
    pub async fn retrieve_waveform(&mut self, channel: u8) -> AppResult<Option<ChannelWaveform>> {
        if !self.is_displayed(channel).await? {
            return Ok(None);
        }
        let record_length =
            scpi::query_value(&mut *self.transport, ":HORizontal:RECOrdlength?").await? as usize;

        for command in [
            format!(":DATa:SOUrce CH{}", channel),
            ":DATa:ENCdg ASCii".to_string(),
            ":DATa:WIDth 1".to_string(),
            ":DATa:STARt 1".to_string(),
            format!(":DATa:STOP {}", record_length),
        ] {
            self.send_raw_command(&command).await?;
        }

        let preamble = self.preamble().await?;
        let raw = scpi::query_values(&mut *self.transport, "CURVe?").await?;
        if raw.len() != record_length {
            warn!(
                "CH{} returned {} samples, record length is {}",
                channel,
                raw.len(),
                record_length
            );
        }
        debug!("CH{}: {} samples", channel, raw.len());

        Ok(Some(ChannelWaveform {
            channel,
            time: preamble.time_axis(raw.len()),
            voltage: preamble.scale(&raw),
        }))
    }

    /// Every displayed channel, keyed by channel number
    pub async fn retrieve_all_waveforms(&mut self) -> AppResult<BTreeMap<u8, ChannelWaveform>> {
        let mut waveforms = BTreeMap::new();
        for channel in CHANNELS {
            if let Some(waveform) = self.retrieve_waveform(channel).await? {
                waveforms.insert(channel, waveform);
            }
        }
        Ok(waveforms)
    }

    pub async fn close(&mut self) -> AppResult<()> {
        self.transport.close().await
    }
}

fn check_channel(channel: u8) -> AppResult<()> {
    if CHANNELS.contains(&channel) {
        Ok(())
    } else {
        Err(ToolsError::OutOfRange(format!(
            "scope channel {} outside 1-4",
            channel
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;

    fn mock_scope() -> MockTransport {
        MockTransport::new("TCPSOCKET::169.254.8.194::4000::SOCKET")
            .respond("*IDN?", "TEKTRONIX,MDO3024,C012345,CF:91.1CT FV:v1.30")
            .respond(":SELect:CH1?", "1")
            .respond(":SELect:CH2?", "0")
            .respond(":SELect:CH3?", "1")
            .respond(":SELect:CH4?", "0")
            .respond(":HORizontal:RECOrdlength?", "4")
            .respond("WFMOUTPRE:XINCR?", "1.0E-6")
            .respond("WFMOUTPRE:XZERO?", "-2.0E-6")
            .respond("WFMOUTPRE:PT_OFF?", "0")
            .respond("WFMOUTPRE:YMULT?", "0.04")
            .respond("WFMOUTPRE:YOFF?", "0")
            .respond("WFMOUTPRE:YZERO?", "0")
            .respond("CURVe?", "-25,0,25,50")
    }

    #[test]
    fn test_preamble_scaling() {
        let pre = WaveformPreamble {
            x_increment: 0.5,
            x_zero: 1.0,
            pt_off: 2.0,
            y_mult: 2.0,
            y_off: 10.0,
            y_zero: 1.0,
        };
        assert_eq!(pre.time_axis(3), vec![0.0, 0.5, 1.0]);
        assert_eq!(pre.scale(&[10.0, 12.0]), vec![1.0, 5.0]);
    }

    #[test]
    fn test_trigger_mode() {
        assert_eq!("Normal".parse::<TriggerMode>().unwrap(), TriggerMode::Normal);
        assert_eq!(TriggerMode::Normal.to_string(), "NORMal");
        assert!("single".parse::<TriggerMode>().is_err());
    }

    #[tokio::test]
    async fn test_connect_turns_headers_off() {
        let mock = mock_scope();
        let scope = Oscilloscope::from_transport(Box::new(mock.clone())).await.unwrap();
        assert!(scope.idn().starts_with("TEKTRONIX,MDO3024"));
        assert_eq!(mock.call_log(), vec![":HEADer OFF", "*IDN?"]);
    }

    #[tokio::test]
    async fn test_settings_commands() {
        let mock = mock_scope();
        let mut scope = Oscilloscope::from_transport(Box::new(mock.clone())).await.unwrap();
        mock.clear_log();
        scope.reset().await.unwrap();
        scope.set_trigger_mode(TriggerMode::Normal).await.unwrap();
        scope.set_horizontal_scale(1e-3).await.unwrap();
        scope.set_horizontal_position(50.0).await.unwrap();
        assert!(scope.set_horizontal_position(120.0).await.is_err());
        assert_eq!(
            mock.call_log(),
            vec![
                "*RST",
                ":TRIGger:A:MODE NORMal",
                ":HORIZONTAL:SCALE 0.001",
                ":HORIZONTAL:POSITION 50"
            ]
        );
    }

    #[tokio::test]
    async fn test_retrieve_all_skips_hidden_channels() {
        let mock = mock_scope();
        let mut scope = Oscilloscope::from_transport(Box::new(mock.clone())).await.unwrap();
        let waveforms = scope.retrieve_all_waveforms().await.unwrap();

        assert_eq!(waveforms.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        let ch1 = &waveforms[&1];
        assert_eq!(ch1.voltage, vec![-1.0, 0.0, 1.0, 2.0]);
        assert_eq!(ch1.time.len(), 4);
        assert!((ch1.time[0] + 2.0e-6).abs() < 1e-15);
        assert!((ch1.time[3] - 1.0e-6).abs() < 1e-15);
        assert_eq!(mock.calls_starting_with(":DATa:SOUrce"), vec![":DATa:SOUrce CH1", ":DATa:SOUrce CH3"]);
        assert!(scope.retrieve_waveform(5).await.is_err());
    }
}
