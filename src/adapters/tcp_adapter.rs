//! Raw TCP socket adapter
//!
//! Used for instruments that expose an SCPI socket server instead of VISA,
//! such as Tektronix scopes ("TCPSOCKET::<host>::<port>::SOCKET").

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use super::{clean_response, ScpiTransport, SessionSettings};
use crate::error::{AppResult, ToolsError};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct TcpAdapter {
    resource: String,
    settings: SessionSettings,
    connection: Option<Connection>,
}

impl TcpAdapter {
    /// Connect to `host:port`, bounded by the session timeout.
    pub async fn connect(
        resource: impl Into<String>,
        host: &str,
        port: u16,
        settings: SessionSettings,
    ) -> AppResult<Self> {
        let resource = resource.into();
        let stream = tokio::time::timeout(settings.timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ToolsError::Timeout {
                context: format!("connecting to {}:{}", host, port),
                elapsed: settings.timeout,
            })?
            .map_err(|e| ToolsError::transport(&resource, e))?;
        stream.set_nodelay(true)?;

        let (read_half, writer) = stream.into_split();
        debug!("TCP socket '{}' connected to {}:{}", resource, host, port);

        Ok(Self {
            resource,
            settings,
            connection: Some(Connection {
                reader: BufReader::new(read_half),
                writer,
            }),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    fn connection(&mut self) -> AppResult<&mut Connection> {
        let resource = &self.resource;
        self.connection
            .as_mut()
            .ok_or_else(|| ToolsError::NotConnected(resource.clone()))
    }
}

#[async_trait]
impl ScpiTransport for TcpAdapter {
    async fn write(&mut self, command: &str) -> AppResult<()> {
        let payload = format!("{}{}", command, self.settings.write_terminator);
        let resource = self.resource.clone();
        let connection = self.connection()?;
        connection
            .writer
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| ToolsError::transport(&resource, e))?;
        connection
            .writer
            .flush()
            .await
            .map_err(|e| ToolsError::transport(&resource, e))?;
        debug!("TCP command sent: {}", command);
        Ok(())
    }

    async fn read_line(&mut self) -> AppResult<String> {
        let timeout = self.settings.timeout;
        let delimiter = self.settings.read_terminator as u8;
        let resource = self.resource.clone();
        let connection = self.connection()?;

        let mut raw = Vec::new();
        let read = tokio::time::timeout(timeout, connection.reader.read_until(delimiter, &mut raw))
            .await
            .map_err(|_| ToolsError::Timeout {
                context: format!("socket read on '{}'", resource),
                elapsed: timeout,
            })?
            .map_err(|e| ToolsError::transport(&resource, e))?;
        if read == 0 {
            return Err(ToolsError::transport(&resource, "connection closed by instrument"));
        }

        let response = clean_response(&String::from_utf8_lossy(&raw));
        debug!("TCP response: {} bytes", response.len());
        Ok(response)
    }

    async fn close(&mut self) -> AppResult<()> {
        if let Some(mut connection) = self.connection.take() {
            connection.writer.shutdown().await.ok();
            debug!("TCP socket '{}' closed", self.resource);
        }
        Ok(())
    }

    fn resource_name(&self) -> &str {
        &self.resource
    }
}
