//! Resource discovery and opening
//!
//! A [`Backend`] knows which resources exist and how to open them.
//! [`SystemBackend`] talks to real ports and the VISA library;
//! [`MockBackend`] serves scripted [`MockTransport`]s for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::address::{serial_resource_name, ResourceAddress};
use crate::adapters::{
    serial_adapter, visa_adapter, MockTransport, ScpiTransport, SerialAdapter, SessionSettings,
    TcpAdapter, VisaAdapter,
};
use crate::error::{AppResult, ToolsError};

#[async_trait]
pub trait Backend: Send + Sync {
    /// Every resource currently attached, opened or not
    async fn list_resources(&self) -> AppResult<Vec<String>>;

    /// Open `resource` with `settings`
    async fn open(
        &self,
        resource: &str,
        settings: &SessionSettings,
    ) -> AppResult<Box<dyn ScpiTransport>>;
}

/// Serial ports, raw sockets and (with `instrument_visa`) the VISA library
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

#[async_trait]
impl Backend for SystemBackend {
    async fn list_resources(&self) -> AppResult<Vec<String>> {
        let mut resources = visa_adapter::list_resources().await?;
        resources.extend(
            serial_adapter::available_ports()?
                .iter()
                .map(|port| serial_resource_name(port)),
        );
        resources.sort();
        resources.dedup();
        debug!("Discovered {} resources", resources.len());
        Ok(resources)
    }

    async fn open(
        &self,
        resource: &str,
        settings: &SessionSettings,
    ) -> AppResult<Box<dyn ScpiTransport>> {
        match ResourceAddress::parse(resource)? {
            ResourceAddress::Serial { port, .. } => Ok(Box::new(
                SerialAdapter::open(resource, port, settings.clone()).await?,
            )),
            ResourceAddress::Socket { host, port } => Ok(Box::new(
                TcpAdapter::connect(resource, &host, port, settings.clone()).await?,
            )),
            ResourceAddress::Visa { resource } => Ok(Box::new(
                VisaAdapter::open(resource, settings.clone()).await?,
            )),
        }
    }
}

/// In-memory instruments keyed by resource string
#[derive(Default)]
pub struct MockBackend {
    instruments: Mutex<BTreeMap<String, MockTransport>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instrument(self, transport: MockTransport) -> Self {
        self.plug(transport);
        self
    }

    /// Attach an instrument
    pub fn plug(&self, transport: MockTransport) {
        self.lock()
            .insert(transport.resource_name().to_string(), transport);
    }

    /// Detach an instrument, returning it so it can be plugged back in
    pub fn unplug(&self, resource: &str) -> Option<MockTransport> {
        self.lock().remove(resource)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, MockTransport>> {
        self.instruments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn list_resources(&self) -> AppResult<Vec<String>> {
        Ok(self.lock().keys().cloned().collect())
    }

    async fn open(
        &self,
        resource: &str,
        _settings: &SessionSettings,
    ) -> AppResult<Box<dyn ScpiTransport>> {
        self.lock()
            .get(resource)
            .cloned()
            .map(|t| Box::new(t) as Box<dyn ScpiTransport>)
            .ok_or_else(|| ToolsError::transport(resource, "resource not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend_plug_and_unplug() {
        let backend = MockBackend::new()
            .with_instrument(MockTransport::new("ASRL/dev/ttyUSB0::INSTR"))
            .with_instrument(MockTransport::new("USB0::0x1313::0x8078::P1::INSTR"));
        assert_eq!(backend.list_resources().await.unwrap().len(), 2);

        let unplugged = backend.unplug("ASRL/dev/ttyUSB0::INSTR").unwrap();
        assert_eq!(
            backend.list_resources().await.unwrap(),
            vec!["USB0::0x1313::0x8078::P1::INSTR"]
        );
        assert!(backend
            .open("ASRL/dev/ttyUSB0::INSTR", &SessionSettings::default())
            .await
            .is_err());

        backend.plug(unplugged);
        assert!(backend
            .open("ASRL/dev/ttyUSB0::INSTR", &SessionSettings::default())
            .await
            .is_ok());
    }
}
