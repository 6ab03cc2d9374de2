//! Socket transports for the host channel
//!
//! Framing on the wire: a command is its ASCII bytes followed by one NUL; the reply
//! is a signed decimal status, also NUL terminated (a trailing newline is accepted).

use super::{ChannelError, HostConnector, HostTransport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where the host device listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HostAddress {
    /// `unix:/path/to/socket`
    Unix(PathBuf),
    /// `tcp:host:port`
    Tcp(String),
}

impl FromStr for HostAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err("unix address needs a socket path".to_string());
            }
            Ok(Self::Unix(PathBuf::from(path)))
        } else if let Some(addr) = s.strip_prefix("tcp:") {
            if !addr.contains(':') {
                return Err(format!("tcp address needs host:port, got {:?}", addr));
            }
            Ok(Self::Tcp(addr.to_string()))
        } else {
            Err(format!("unsupported host address {:?} (use unix:PATH or tcp:HOST:PORT)", s))
        }
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

impl TryFrom<String> for HostAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HostAddress> for String {
    fn from(value: HostAddress) -> Self {
        value.to_string()
    }
}

/// Read one NUL terminated message. `None` on a clean end of stream.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(0, &mut buf)? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&0) {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_message<W: Write>(writer: &mut W, message: &[u8]) -> io::Result<()> {
    writer.write_all(message)?;
    writer.write_all(&[0])?;
    writer.flush()
}

fn parse_status(reply: &str) -> io::Result<i32> {
    reply.trim().parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("host status is not an integer: {:?}", reply),
        )
    })
}

/// Request/response transport over any byte stream
pub struct StreamTransport<S: Read + Write> {
    stream: BufReader<S>,
}

impl<S: Read + Write> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }
}

impl<S: Read + Write + Send> HostTransport for StreamTransport<S> {
    fn exchange(&mut self, command: &[u8]) -> io::Result<i32> {
        write_message(self.stream.get_mut(), command)?;
        match read_message(&mut self.stream)? {
            Some(reply) => parse_status(&reply),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "host closed the channel",
            )),
        }
    }
}

/// Connects to the host device over a Unix or TCP socket
#[derive(Debug, Clone)]
pub struct SocketConnector {
    address: HostAddress,
    io_timeout: Duration,
}

impl SocketConnector {
    pub fn new(address: HostAddress, io_timeout: Duration) -> Self {
        Self {
            address,
            io_timeout,
        }
    }

    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    fn open_stream(&self) -> io::Result<Box<dyn HostTransport>> {
        match &self.address {
            HostAddress::Tcp(addr) => {
                let stream = TcpStream::connect(addr)?;
                stream.set_read_timeout(Some(self.io_timeout))?;
                stream.set_write_timeout(Some(self.io_timeout))?;
                stream.set_nodelay(true)?;
                Ok(Box::new(StreamTransport::new(stream)))
            }
            #[cfg(unix)]
            HostAddress::Unix(path) => {
                let stream = std::os::unix::net::UnixStream::connect(path)?;
                stream.set_read_timeout(Some(self.io_timeout))?;
                stream.set_write_timeout(Some(self.io_timeout))?;
                Ok(Box::new(StreamTransport::new(stream)))
            }
            #[cfg(not(unix))]
            HostAddress::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            )),
        }
    }
}

impl HostConnector for SocketConnector {
    fn connect(&self, service: &str) -> Result<Box<dyn HostTransport>, ChannelError> {
        let connect_error = |reason: String| ChannelError::Connect {
            service: service.to_string(),
            reason,
        };

        let mut transport = self
            .open_stream()
            .map_err(|e| connect_error(format!("{}: {}", self.address, e)))?;

        let status = transport
            .exchange(service.as_bytes())
            .map_err(|e| connect_error(e.to_string()))?;
        if status < 0 {
            return Err(connect_error(format!("service selector refused ({})", status)));
        }

        log::info!("connected to host camera service at {}", self.address);
        Ok(transport)
    }
}

/// Answer commands on one connection until the peer hangs up.
///
/// `handler` sees every message, including the initial service selector, and
/// returns the status to send back.
pub fn serve_connection<S, F>(stream: S, mut handler: F) -> io::Result<()>
where
    S: Read + Write,
    F: FnMut(&str) -> i32,
{
    let mut stream = BufReader::new(stream);
    while let Some(message) = read_message(&mut stream)? {
        let status = handler(&message);
        write_message(stream.get_mut(), status.to_string().as_bytes())?;
    }
    Ok(())
}
