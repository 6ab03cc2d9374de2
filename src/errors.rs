use std::fmt;

use crate::host::ChannelError;

#[derive(Debug)]
pub enum CameraError {
    InitializationError(String),
    ConfigurationError(String),
    ChannelError(String),
    CaptureError(String),
    BufferError(String),
    UnsupportedStream(String),
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CameraError::InitializationError(msg) => {
                write!(f, "Camera initialization error: {}", msg)
            }
            CameraError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            CameraError::ChannelError(msg) => write!(f, "Host channel error: {}", msg),
            CameraError::CaptureError(msg) => write!(f, "Capture error: {}", msg),
            CameraError::BufferError(msg) => write!(f, "Buffer error: {}", msg),
            CameraError::UnsupportedStream(msg) => write!(f, "Unsupported stream: {}", msg),
        }
    }
}

impl std::error::Error for CameraError {}

impl From<ChannelError> for CameraError {
    fn from(error: ChannelError) -> Self {
        CameraError::ChannelError(error.to_string())
    }
}
