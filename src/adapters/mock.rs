//! Mock transport for testing
//!
//! Simulates an instrument without hardware. It provides:
//! - Fixed and sequenced responses keyed by command
//! - A handler hook for stateful simulations
//! - Controllable failure injection
//! - Call logging for test verification
//!
//! Clones share state, so a test can keep one handle while the instrument
//! wrapper owns the other.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::ScpiTransport;
use crate::error::{AppResult, ToolsError};

type Handler = Box<dyn FnMut(&str) -> Option<String> + Send>;

#[derive(Default)]
struct MockState {
    connected: bool,
    fixed: HashMap<String, String>,
    sequences: HashMap<String, VecDeque<String>>,
    handler: Option<Handler>,
    pending: VecDeque<String>,
    call_log: Vec<String>,
    fail_next: bool,
}

/// Mock SCPI transport
///
/// # Example
///
/// ```
/// use measurement_tools::adapters::{MockTransport, ScpiTransport};
///
/// # tokio_test_block(async {
/// let mut mock = MockTransport::new("ASRL/dev/ttyUSB0::INSTR").respond("*IDN?", "Arroyo 4302");
/// assert_eq!(mock.query("*IDN?").await.unwrap(), "Arroyo 4302");
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct MockTransport {
    resource: String,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a connected mock with no scripted responses
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            state: Arc::new(Mutex::new(MockState {
                connected: true,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the log from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Always answer `command` with `response`
    pub fn respond(self, command: &str, response: &str) -> Self {
        self.state()
            .fixed
            .insert(command.to_string(), response.to_string());
        self
    }

    /// Answer `command` with each response in turn; the last one repeats
    pub fn respond_sequence(self, command: &str, responses: &[&str]) -> Self {
        self.state().sequences.insert(
            command.to_string(),
            responses.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    /// Consult `handler` for every command not covered by fixed responses.
    /// Returning `Some` queues a response line.
    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        self.state().handler = Some(Box::new(handler));
        self
    }

    /// Make the next write fail
    pub fn inject_next_failure(&self) {
        self.state().fail_next = true;
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Every command written so far, in order
    pub fn call_log(&self) -> Vec<String> {
        self.state().call_log.clone()
    }

    /// Commands written so far that start with `prefix`
    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.state().call_log.clear();
    }
}

#[async_trait]
impl ScpiTransport for MockTransport {
    async fn write(&mut self, command: &str) -> AppResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.call_log.push(command.to_string());

        if std::mem::take(&mut state.fail_next) {
            return Err(ToolsError::transport(&self.resource, "Injected failure"));
        }
        if !state.connected {
            return Err(ToolsError::NotConnected(self.resource.clone()));
        }

        let response = match state.sequences.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => match state.fixed.get(command) {
                Some(response) => Some(response.clone()),
                None => state.handler.as_mut().and_then(|handler| handler(command)),
            },
        };
        if let Some(response) = response {
            state.pending.push_back(response);
        }
        Ok(())
    }

    async fn read_line(&mut self) -> AppResult<String> {
        let mut state = self.state();
        if !state.connected {
            return Err(ToolsError::NotConnected(self.resource.clone()));
        }
        state.pending.pop_front().ok_or_else(|| ToolsError::Timeout {
            context: format!("no response queued on '{}'", self.resource),
            elapsed: Duration::ZERO,
        })
    }

    async fn close(&mut self) -> AppResult<()> {
        let mut state = self.state();
        state.connected = false;
        state.pending.clear();
        Ok(())
    }

    fn resource_name(&self) -> &str {
        &self.resource
    }
}
