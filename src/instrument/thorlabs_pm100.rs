//! Thorlabs PM100 series optical power meter
//!
//! USBTMC instrument with a standard SCPI tree. Only the scalar power path
//! used by the sweeps is wrapped: configure for power, auto range, the
//! photodiode's low pass filter, the correction wavelength and `READ?`.

use tracing::info;

use crate::adapters::{ScpiTransport, SessionSettings};
use crate::config::ToolsConfig;
use crate::error::{AppResult, ToolsError};
use crate::hardware::ResourceManager;
use crate::interact::{resolve_resource, Prompt, ResolveOptions};
use crate::scpi;

/// Role the resource is cached under
pub const ROLE: &str = "OpticalPowerMeter";

pub struct PowerMeter {
    transport: Box<dyn ScpiTransport>,
    sensor_idn: String,
}

impl PowerMeter {
    /// Resolve and open the meter. `resource` skips resolution.
    pub async fn connect(
        rm: &ResourceManager,
        prompt: &mut dyn Prompt,
        resource: Option<String>,
        resolve: &ResolveOptions,
    ) -> AppResult<Self> {
        prompt.message("Connecting to Thorlabs PM100D:")?;
        let resource = match resource {
            Some(resource) => resource,
            None => resolve_resource(rm, prompt, resolve).await?,
        };
        let transport = rm.open(&resource, &SessionSettings::default()).await?;
        let meter = Self::from_transport(transport).await?;
        prompt.message(&format!("Successfully connected to {}", meter.sensor_idn))?;
        Ok(meter)
    }

    /// Resolution options for this role from the tool configuration
    pub fn resolve_options(config: &ToolsConfig) -> ResolveOptions {
        ResolveOptions::from_config(config, ROLE)
    }

    /// Wrap an open transport, reading the sensor identification.
    pub async fn from_transport(mut transport: Box<dyn ScpiTransport>) -> AppResult<Self> {
        let sensor_idn = transport.query("SYST:SENS:IDN?").await?;
        info!("Power meter sensor: {}", sensor_idn);
        Ok(Self {
            transport,
            sensor_idn,
        })
    }

    /// Identification of the attached sensor head
    pub fn sensor_idn(&self) -> &str {
        &self.sensor_idn
    }

    pub async fn identify(&mut self) -> AppResult<String> {
        scpi::identify(&mut *self.transport).await
    }

    /// Configure for scalar power measurements
    pub async fn configure_power(&mut self) -> AppResult<()> {
        self.transport.write("CONF:POW").await
    }

    pub async fn set_auto_range(&mut self, enabled: bool) -> AppResult<()> {
        self.transport
            .write(&format!("SENS:POW:DC:RANG:AUTO {}", u8::from(enabled)))
            .await
    }

    pub async fn auto_range(&mut self) -> AppResult<bool> {
        scpi::query_bool(&mut *self.transport, "SENS:POW:DC:RANG:AUTO?").await
    }

    /// Photodiode input low pass filter
    pub async fn set_low_pass_filter(&mut self, enabled: bool) -> AppResult<()> {
        self.transport
            .write(&format!("INP:PDI:FILT:LPAS:STAT {}", u8::from(enabled)))
            .await
    }

    /// Correction wavelength in nm
    pub async fn set_wavelength(&mut self, nm: f64) -> AppResult<()> {
        if !(nm.is_finite() && nm > 0.0) {
            return Err(ToolsError::OutOfRange(format!(
                "wavelength {} nm must be positive",
                nm
            )));
        }
        self.transport
            .write(&format!("SENS:CORR:WAV {}", nm))
            .await
    }

    pub async fn wavelength(&mut self) -> AppResult<f64> {
        scpi::query_value(&mut *self.transport, "SENS:CORR:WAV?").await
    }

    /// One power reading in W
    pub async fn read(&mut self) -> AppResult<f64> {
        scpi::query_value(&mut *self.transport, "READ?").await
    }

    /// Mean of `samples` readings in W
    pub async fn read_average(&mut self, samples: usize) -> AppResult<f64> {
        let samples = samples.max(1);
        let mut total = 0.0;
        for _ in 0..samples {
            total += self.read().await?;
        }
        Ok(total / samples as f64)
    }

    pub async fn close(&mut self) -> AppResult<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;

    fn mock_meter() -> MockTransport {
        MockTransport::new("USB0::0x1313::0x8078::P0012345::INSTR")
            .respond("SYST:SENS:IDN?", "S121C,12345,10-Jan-2020,1,18,289")
            .respond("SENS:CORR:WAV?", "650")
            .respond_sequence("READ?", &["1.0E-3", "3.0E-3"])
    }

    #[tokio::test]
    async fn test_setup_commands() {
        let mock = mock_meter();
        let mut pm = PowerMeter::from_transport(Box::new(mock.clone())).await.unwrap();
        assert!(pm.sensor_idn().starts_with("S121C"));

        pm.configure_power().await.unwrap();
        pm.set_auto_range(true).await.unwrap();
        pm.set_low_pass_filter(true).await.unwrap();
        pm.set_wavelength(650.0).await.unwrap();
        assert_eq!(pm.wavelength().await.unwrap(), 650.0);
        assert_eq!(
            mock.call_log()[1..5],
            [
                "CONF:POW",
                "SENS:POW:DC:RANG:AUTO 1",
                "INP:PDI:FILT:LPAS:STAT 1",
                "SENS:CORR:WAV 650"
            ]
        );
    }

    #[tokio::test]
    async fn test_average_reading() {
        let mut pm = PowerMeter::from_transport(Box::new(mock_meter())).await.unwrap();
        // 1 mW then 3 mW repeating
        let avg = pm.read_average(3).await.unwrap();
        assert!((avg - 7.0e-3 / 3.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_rejects_bad_wavelength() {
        let mut pm = PowerMeter::from_transport(Box::new(mock_meter())).await.unwrap();
        assert!(pm.set_wavelength(-5.0).await.is_err());
    }
}
