//! VISA Hardware Adapter for GPIB/USB/Ethernet instruments
//!
//! Supports instruments reached through a system VISA library, with resource
//! strings like:
//! - "GPIB0::1::INSTR" (GPIB interface)
//! - "USB0::0x1313::0x8078::P0012345::INSTR" (USBTMC, e.g. the PM100D)
//! - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)
//!
//! visa-rs is synchronous, so every call runs on Tokio's blocking pool.

use async_trait::async_trait;
use tracing::debug;

use super::{ScpiTransport, SessionSettings};
use crate::error::{AppResult, ToolsError};

#[cfg(feature = "instrument_visa")]
use super::clean_response;
#[cfg(feature = "instrument_visa")]
use std::ffi::CString;
#[cfg(feature = "instrument_visa")]
use std::sync::Arc;
#[cfg(feature = "instrument_visa")]
use tokio::sync::Mutex;

#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// VISA adapter for instrument communication
pub struct VisaAdapter {
    /// VISA resource string (e.g., "GPIB0::1::INSTR")
    resource: String,

    settings: SessionSettings,

    #[cfg(feature = "instrument_visa")]
    instrument: Option<Arc<Mutex<Instrument>>>,
}

#[cfg(feature = "instrument_visa")]
fn visa_string(resource: &str) -> AppResult<VisaString> {
    CString::new(resource)
        .map(VisaString::from)
        .map_err(|e| ToolsError::transport(resource, format!("invalid resource string: {}", e)))
}

impl VisaAdapter {
    /// Open a VISA session on `resource`.
    #[cfg(feature = "instrument_visa")]
    pub async fn open(resource: impl Into<String>, settings: SessionSettings) -> AppResult<Self> {
        let resource = resource.into();
        let resource_for_open = resource.clone();
        let timeout = settings.timeout;

        let instrument = tokio::task::spawn_blocking(move || -> AppResult<Instrument> {
            let rm = DefaultRM::new().map_err(|e| {
                ToolsError::transport(
                    &resource_for_open,
                    format!("Failed to create VISA resource manager: {}", e),
                )
            })?;
            let id = visa_string(&resource_for_open)?;
            rm.open(&id, AccessMode::NO_LOCK, timeout).map_err(|e| {
                ToolsError::transport(
                    &resource_for_open,
                    format!("Failed to open VISA resource: {}", e),
                )
            })
        })
        .await
        .map_err(|e| ToolsError::transport(&resource, format!("VISA open task panicked: {}", e)))??;

        debug!(
            "VISA resource '{}' opened with {}ms timeout",
            resource,
            settings.timeout.as_millis()
        );

        Ok(Self {
            resource,
            settings,
            instrument: Some(Arc::new(Mutex::new(instrument))),
        })
    }

    #[cfg(not(feature = "instrument_visa"))]
    pub async fn open(resource: impl Into<String>, settings: SessionSettings) -> AppResult<Self> {
        let _ = (resource.into(), settings);
        Err(ToolsError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    pub fn info(&self) -> String {
        format!(
            "VisaAdapter({} @ {}ms timeout)",
            self.resource,
            self.settings.timeout.as_millis()
        )
    }

    #[cfg(feature = "instrument_visa")]
    fn instrument(&self) -> AppResult<Arc<Mutex<Instrument>>> {
        self.instrument
            .clone()
            .ok_or_else(|| ToolsError::NotConnected(self.resource.clone()))
    }
}

/// List every `?*INSTR` resource the VISA library can see.
#[cfg(feature = "instrument_visa")]
pub async fn list_resources() -> AppResult<Vec<String>> {
    tokio::task::spawn_blocking(|| -> AppResult<Vec<String>> {
        let rm = DefaultRM::new()
            .map_err(|e| ToolsError::transport("visa", format!("resource manager: {}", e)))?;
        let expr = visa_string("?*INSTR")?;
        let mut found = Vec::new();
        // The VISA library reports "resource not found" instead of an empty list.
        let Ok(mut list) = rm.find_res_list(&expr) else {
            return Ok(found);
        };
        while let Some(id) = list
            .find_next()
            .map_err(|e| ToolsError::transport("visa", format!("resource listing: {}", e)))?
        {
            found.push(id.to_string());
        }
        Ok(found)
    })
    .await
    .map_err(|e| ToolsError::transport("visa", format!("VISA list task panicked: {}", e)))?
}

#[cfg(not(feature = "instrument_visa"))]
pub async fn list_resources() -> AppResult<Vec<String>> {
    Ok(Vec::new())
}

#[async_trait]
impl ScpiTransport for VisaAdapter {
    async fn write(&mut self, command: &str) -> AppResult<()> {
        #[cfg(feature = "instrument_visa")]
        {
            let instrument = self.instrument()?;
            let resource = self.resource.clone();
            let command_str = format!("{}{}", command, self.settings.write_terminator);
            let command_for_log = command.to_string();

            tokio::task::spawn_blocking(move || -> AppResult<()> {
                use std::io::Write;

                let mut instr_guard = instrument.blocking_lock();
                instr_guard
                    .write_all(command_str.as_bytes())
                    .map_err(|e| ToolsError::transport(&resource, format!("VISA write failed: {}", e)))?;
                debug!("VISA command sent: {}", command_for_log.trim());
                Ok(())
            })
            .await
            .map_err(|e| ToolsError::transport(&self.resource, format!("VISA I/O task panicked: {}", e)))?
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            let _ = command;
            Err(ToolsError::FeatureNotEnabled("instrument_visa".to_string()))
        }
    }

    async fn read_line(&mut self) -> AppResult<String> {
        #[cfg(feature = "instrument_visa")]
        {
            let instrument = self.instrument()?;
            let resource = self.resource.clone();

            tokio::task::spawn_blocking(move || -> AppResult<String> {
                use std::io::{BufRead, BufReader};

                let instr_guard = instrument.blocking_lock();
                let mut response = String::new();
                let mut reader = BufReader::new(&*instr_guard);
                reader
                    .read_line(&mut response)
                    .map_err(|e| ToolsError::transport(&resource, format!("VISA read failed: {}", e)))?;
                let response = clean_response(&response);
                debug!("VISA response: {}", response);
                Ok(response)
            })
            .await
            .map_err(|e| ToolsError::transport(&self.resource, format!("VISA I/O task panicked: {}", e)))?
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            Err(ToolsError::FeatureNotEnabled("instrument_visa".to_string()))
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_visa")]
        {
            if self.instrument.take().is_some() {
                debug!("VISA resource '{}' closed", self.resource);
            }
        }
        Ok(())
    }

    fn resource_name(&self) -> &str {
        &self.resource
    }
}
