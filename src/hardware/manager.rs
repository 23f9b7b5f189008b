//! Resource manager
//!
//! Owns the backend and remembers which resources this process currently has
//! open, so the interactive picker can hide them when a second instrument is
//! being resolved.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use super::backend::{Backend, SystemBackend};
use crate::adapters::{ScpiTransport, SessionSettings};
use crate::error::AppResult;

type OpenSet = Arc<Mutex<BTreeSet<String>>>;

fn lock(set: &OpenSet) -> MutexGuard<'_, BTreeSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct ResourceManager {
    backend: Arc<dyn Backend>,
    opened: OpenSet,
}

impl ResourceManager {
    /// Manager over real serial ports, sockets and VISA
    pub fn system() -> Self {
        Self::with_backend(Arc::new(SystemBackend))
    }

    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            opened: Arc::default(),
        }
    }

    /// All attached resources, sorted
    pub async fn list_resources(&self) -> AppResult<Vec<String>> {
        let mut resources = self.backend.list_resources().await?;
        resources.sort();
        resources.dedup();
        Ok(resources)
    }

    /// Resources opened through this manager and not yet closed
    pub fn list_opened(&self) -> Vec<String> {
        lock(&self.opened).iter().cloned().collect()
    }

    /// Open `resource`. The session leaves the opened set when closed or dropped.
    pub async fn open(
        &self,
        resource: &str,
        settings: &SessionSettings,
    ) -> AppResult<Box<dyn ScpiTransport>> {
        let inner = self.backend.open(resource, settings).await?;
        lock(&self.opened).insert(resource.to_string());
        info!("Opened {}", resource);
        Ok(Box::new(TrackedSession {
            inner,
            resource: resource.to_string(),
            opened: self.opened.clone(),
            released: false,
        }))
    }
}

struct TrackedSession {
    inner: Box<dyn ScpiTransport>,
    resource: String,
    opened: OpenSet,
    released: bool,
}

impl TrackedSession {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            lock(&self.opened).remove(&self.resource);
            debug!("Released {}", self.resource);
        }
    }
}

#[async_trait]
impl ScpiTransport for TrackedSession {
    async fn write(&mut self, command: &str) -> AppResult<()> {
        self.inner.write(command).await
    }

    async fn read_line(&mut self) -> AppResult<String> {
        self.inner.read_line().await
    }

    async fn query(&mut self, command: &str) -> AppResult<String> {
        self.inner.query(command).await
    }

    async fn close(&mut self) -> AppResult<()> {
        let result = self.inner.close().await;
        self.release();
        result
    }

    fn resource_name(&self) -> &str {
        &self.resource
    }
}

impl Drop for TrackedSession {
    fn drop(&mut self) {
        self.release();
    }
}
