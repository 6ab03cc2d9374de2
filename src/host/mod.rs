//! Host channel protocol adapter
//!
//! The emulated camera talks to its host-side device over a byte channel: each
//! command is an ASCII line, each reply a signed integer status. The channel moves
//! Closed -> Open -> Closed and is reopened lazily by the camera after failures.

pub mod command;
pub mod socket;

pub use command::{format_g, CaptureTarget, HostCommand, StreamSpec};
pub use socket::{HostAddress, SocketConnector};

use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("host channel is not open")]
    NotOpen,

    #[error("cannot reach host service `{service}`: {reason}")]
    Connect { service: String, reason: String },

    #[error("host channel I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("host rejected `{command}` with status {status}")]
    Rejected { command: String, status: i32 },

    #[error("malformed host message: {0}")]
    Protocol(String),
}

/// An open byte link to the host device.
pub trait HostTransport: Send {
    /// Send one command and wait for its status.
    fn exchange(&mut self, command: &[u8]) -> io::Result<i32>;
}

/// Opens transports to a named host service (`name=<camera>`).
pub trait HostConnector: Send + Sync {
    fn connect(&self, service: &str) -> Result<Box<dyn HostTransport>, ChannelError>;
}

pub struct HostChannel {
    connector: Arc<dyn HostConnector>,
    service: String,
    transport: Option<Box<dyn HostTransport>>,
}

impl HostChannel {
    pub fn new(connector: Arc<dyn HostConnector>, camera_name: &str) -> Self {
        Self {
            connector,
            service: format!("name={}", camera_name),
            transport: None,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Open the channel if it is closed. Returns true when a new connection was made.
    pub fn open(&mut self) -> Result<bool, ChannelError> {
        if self.transport.is_some() {
            return Ok(false);
        }

        let transport = self.connector.connect(&self.service)?;
        log::debug!("host channel open ({})", self.service);
        self.transport = Some(transport);
        Ok(true)
    }

    /// Run one command. Non-negative statuses are success.
    pub fn query(&mut self, command: &HostCommand) -> Result<u32, ChannelError> {
        let transport = self.transport.as_mut().ok_or(ChannelError::NotOpen)?;
        let text = command.to_string();
        log::trace!("host <- {}", text);

        match transport.exchange(text.as_bytes()) {
            Ok(status) if status >= 0 => Ok(status as u32),
            Ok(status) => {
                if command.is_structural() {
                    log::warn!("host rejected `{}` ({}), closing channel", text, status);
                    self.transport = None;
                } else {
                    log::debug!("host rejected `{}` ({})", text, status);
                }
                Err(ChannelError::Rejected {
                    command: text,
                    status,
                })
            }
            Err(e) => {
                log::warn!("host channel I/O error on `{}`: {}", command.name(), e);
                self.transport = None;
                Err(ChannelError::Io(e))
            }
        }
    }

    /// Drop the connection. Closing a closed channel is a no-op.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            log::debug!("host channel closed ({})", self.service);
        }
    }
}

impl std::fmt::Debug for HostChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostChannel")
            .field("service", &self.service)
            .field("open", &self.is_open())
            .finish()
    }
}
