//! guestcam: emulated camera pipeline for virtualized guests
//!
//! This crate turns platform capture requests into ASCII commands for a host-side
//! virtual camera and turns the host's answers back into per-buffer outcomes and
//! result metadata.
//!
//! # Features
//! - Per-buffer (`frame`) and batched (`capture`) host protocols
//! - Deferred completion of synthesized RAW16 and JPEG buffers
//! - Autofocus simulation and full capture result metadata
//! - Unix socket and TCP host transports
//! - Heap-backed surface provider for running without a gralloc
//!
//! # Usage
//! ```rust,no_run
//! use guestcam::{GuestCamConfig, MemoryBufferProvider, SocketConnector, VirtualCamera};
//! use std::sync::Arc;
//!
//! let config = GuestCamConfig::load_or_default();
//! let address = config.host_address().expect("valid host address");
//! let connector = Arc::new(SocketConnector::new(address, config.io_timeout()));
//! let provider = Arc::new(MemoryBufferProvider::new());
//! let mut camera = VirtualCamera::from_config(&config, connector, provider);
//! camera.close();
//! ```
pub mod buffer;
pub mod camera;
pub mod config;
pub mod errors;
pub mod host;
pub mod metadata;
pub mod stream;
pub mod transform;
pub mod types;

// Testing utilities - scripted host and synthetic frames for offline testing
pub mod testing;

// Re-exports for convenience
pub use buffer::{
    fence_pair, AcquireFence, BufferProvider, CachedStreamBuffer, CaptureOutcome,
    FenceSignaler, MappedView, MemoryBufferProvider, SurfaceId,
};
pub use camera::{
    CameraParameters, CaptureResult, DeferredCompletion, HalStream, ProtocolStrategy,
    StreamConfig, VirtualCamera, FRAME_DURATION_UNAVAILABLE,
};
pub use config::GuestCamConfig;
pub use errors::CameraError;
pub use host::{ChannelError, HostAddress, HostChannel, HostCommand, HostConnector, SocketConnector};
pub use metadata::{AfMode, AfState, AfStateMachine, AfTrigger, CameraMetadata, MetadataTag};
pub use stream::{Stream, StreamRegistry};
pub use transform::{ImageTransforms, PixelTransforms};
pub use types::{BufferUsage, Dataspace, PixelFormat, RequestTemplate, Size};

/// Initialize logging for the camera pipeline
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "guestcam=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        protocols: vec![ProtocolStrategy::PerBuffer, ProtocolStrategy::Batched],
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub protocols: Vec<ProtocolStrategy>,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "guestcam");
        assert!(!info.version.is_empty());
        assert_eq!(info.protocols.len(), 2);
    }

    #[test]
    fn test_init_logging_is_repeatable() {
        init_logging();
        init_logging();
    }
}
