//! Hardware adapter implementations
//!
//! Every instrument in this crate talks line-oriented SCPI (or an SCPI-like
//! dialect) over one of these transports. Adapters implement
//! [`ScpiTransport`]; the instrument wrappers never see which one they got.

pub mod mock;
pub mod serial_adapter;
pub mod tcp_adapter;
pub mod visa_adapter;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppResult;

pub use mock::MockTransport;
pub use serial_adapter::SerialAdapter;
pub use tcp_adapter::TcpAdapter;
pub use visa_adapter::VisaAdapter;

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Session parameters applied when a resource is opened
///
/// Serial framing fields are ignored by the VISA and TCP adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub timeout: Duration,
    pub write_terminator: String,
    pub read_terminator: char,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: Parity::None,
            timeout: Duration::from_secs(2),
            write_terminator: "\n".to_string(),
            read_terminator: '\n',
        }
    }
}

impl SessionSettings {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_write_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.write_terminator = terminator.into();
        self
    }
}

/// Line-oriented command transport
///
/// Responses are returned without their terminator and surrounding
/// whitespace. Implementations are not internally synchronised; callers that
/// share a transport wrap it in a `tokio::sync::Mutex`.
#[async_trait]
pub trait ScpiTransport: Send {
    /// Send one command; the write terminator is appended.
    async fn write(&mut self, command: &str) -> AppResult<()>;

    /// Read one response line.
    async fn read_line(&mut self) -> AppResult<String>;

    /// Send a command and read its single-line response.
    async fn query(&mut self, command: &str) -> AppResult<String> {
        self.write(command).await?;
        self.read_line().await
    }

    /// Release the underlying resource. Further I/O fails with `NotConnected`.
    async fn close(&mut self) -> AppResult<()>;

    /// Resource string this transport was opened with
    fn resource_name(&self) -> &str;
}

/// Strip the read terminator and whitespace from a raw response.
pub(crate) fn clean_response(raw: &str) -> String {
    raw.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_8n1() {
        let settings = SessionSettings::default();
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.write_terminator, "\n");
    }

    #[test]
    fn test_settings_builder() {
        let settings = SessionSettings::default()
            .with_baud_rate(38_400)
            .with_timeout(Duration::from_millis(500))
            .with_write_terminator("\r\n");
        assert_eq!(settings.baud_rate, 38_400);
        assert_eq!(settings.timeout, Duration::from_millis(500));
        assert_eq!(settings.write_terminator, "\r\n");
    }

    #[test]
    fn test_clean_response() {
        assert_eq!(clean_response(" 1.25E-3\r\n"), "1.25E-3");
    }
}
