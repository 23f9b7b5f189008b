//! Serial adapter for RS-232 / USB-serial instruments
//!
//! Wraps the serialport crate and performs the blocking port I/O on Tokio's
//! blocking pool so the watchdog and the caller can share a runtime.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{clean_response, ScpiTransport, SessionSettings};
use crate::error::{AppResult, ToolsError};

#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

/// Internal read poll period; the session timeout bounds the whole read.
#[cfg(feature = "instrument_serial")]
const PORT_POLL: Duration = Duration::from_millis(100);

/// Serial adapter for RS-232 communication
pub struct SerialAdapter {
    /// Resource string as given by the caller (e.g. "ASRL/dev/ttyUSB0::INSTR")
    resource: String,

    /// OS port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    settings: SessionSettings,

    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Open `port_name` with the framing in `settings`.
    #[cfg(feature = "instrument_serial")]
    pub async fn open(
        resource: impl Into<String>,
        port_name: impl Into<String>,
        settings: SessionSettings,
    ) -> AppResult<Self> {
        let resource = resource.into();
        let port_name = port_name.into();

        let builder = serialport::new(&port_name, settings.baud_rate)
            .data_bits(match settings.data_bits {
                5 => serialport::DataBits::Five,
                6 => serialport::DataBits::Six,
                7 => serialport::DataBits::Seven,
                _ => serialport::DataBits::Eight,
            })
            .stop_bits(match settings.stop_bits {
                super::StopBits::One => serialport::StopBits::One,
                super::StopBits::Two => serialport::StopBits::Two,
            })
            .parity(match settings.parity {
                super::Parity::None => serialport::Parity::None,
                super::Parity::Odd => serialport::Parity::Odd,
                super::Parity::Even => serialport::Parity::Even,
            })
            .timeout(PORT_POLL);

        let port = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| ToolsError::transport(&resource, format!("open task panicked: {}", e)))?
            .map_err(|e| {
                ToolsError::transport(
                    &resource,
                    format!(
                        "Failed to open serial port '{}' at {} baud: {}",
                        port_name, settings.baud_rate, e
                    ),
                )
            })?;

        debug!(
            "Serial port '{}' opened at {} baud",
            port_name, settings.baud_rate
        );

        Ok(Self {
            resource,
            port_name,
            settings,
            port: Some(Arc::new(Mutex::new(port))),
        })
    }

    #[cfg(not(feature = "instrument_serial"))]
    pub async fn open(
        resource: impl Into<String>,
        port_name: impl Into<String>,
        settings: SessionSettings,
    ) -> AppResult<Self> {
        let _ = (resource.into(), port_name.into(), settings);
        Err(ToolsError::FeatureNotEnabled("instrument_serial".to_string()))
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    #[cfg(feature = "instrument_serial")]
    fn port(&self) -> AppResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port
            .clone()
            .ok_or_else(|| ToolsError::NotConnected(self.resource.clone()))
    }
}

/// List serial ports present on this machine.
#[cfg(feature = "instrument_serial")]
pub fn available_ports() -> AppResult<Vec<String>> {
    let ports = serialport::available_ports()
        .map_err(|e| ToolsError::transport("serial", format!("port enumeration failed: {}", e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(not(feature = "instrument_serial"))]
pub fn available_ports() -> AppResult<Vec<String>> {
    Ok(Vec::new())
}

#[async_trait]
impl ScpiTransport for SerialAdapter {
    async fn write(&mut self, command: &str) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let resource = self.resource.clone();
            let command_str = format!("{}{}", command, self.settings.write_terminator);
            let command_for_log = command.to_string();

            tokio::task::spawn_blocking(move || -> AppResult<()> {
                use std::io::Write;

                let mut port_guard = port.blocking_lock();
                port_guard
                    .write_all(command_str.as_bytes())
                    .and_then(|_| port_guard.flush())
                    .map_err(|e| ToolsError::transport(&resource, e))?;

                debug!("Sent serial command: {}", command_for_log.trim());
                Ok(())
            })
            .await
            .map_err(|e| ToolsError::transport(&self.resource, format!("I/O task panicked: {}", e)))?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = command;
            Err(ToolsError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    async fn read_line(&mut self) -> AppResult<String> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let resource = self.resource.clone();
            let delimiter = self.settings.read_terminator;
            let timeout = self.settings.timeout;

            tokio::task::spawn_blocking(move || -> AppResult<String> {
                use std::io::Read;

                let mut port_guard = port.blocking_lock();
                let mut response = Vec::new();
                let mut buffer = [0u8; 1];
                let start = std::time::Instant::now();

                loop {
                    if start.elapsed() > timeout {
                        return Err(ToolsError::Timeout {
                            context: format!("serial read on '{}'", resource),
                            elapsed: start.elapsed(),
                        });
                    }

                    match port_guard.read(&mut buffer) {
                        Ok(0) => {
                            return Err(ToolsError::transport(&resource, "Unexpected EOF"));
                        }
                        Ok(_) => {
                            response.push(buffer[0]);
                            if buffer[0] as char == delimiter {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) => return Err(ToolsError::transport(&resource, e)),
                    }
                }

                let response = clean_response(&String::from_utf8_lossy(&response));
                debug!("Received serial response: {}", response);
                Ok(response)
            })
            .await
            .map_err(|e| ToolsError::transport(&self.resource, format!("I/O task panicked: {}", e)))?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(ToolsError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!("Serial port '{}' closed", self.port_name);
            }
        }
        Ok(())
    }

    fn resource_name(&self) -> &str {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let result = SerialAdapter::open(
            "ASRL/dev/does-not-exist::INSTR",
            "/dev/does-not-exist",
            SessionSettings::default(),
        )
        .await;
        assert!(result.is_err());
    }
}
