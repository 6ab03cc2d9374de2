//! The emulated camera device
//!
//! [`VirtualCamera`] ties the pieces together: it negotiates and registers
//! streams, keeps the host channel alive, runs the metadata builder and dispatches
//! each capture request through the configured host protocol.

pub mod batched;
pub mod characteristics;
pub mod deferred;
pub mod per_buffer;

pub use characteristics::{
    default_request, negotiate_stream, CameraParameters, HalStream, StaticCharacteristics,
    StreamConfig,
};
pub use deferred::{DeferredCompletion, DeferredKind};

use crate::buffer::{BufferProvider, CachedStreamBuffer, CaptureOutcome};
use crate::errors::CameraError;
use crate::host::{HostChannel, HostCommand, HostConnector, StreamSpec};
use crate::metadata::{AfStateMachine, CameraMetadata, ResultMetadataBuilder, SensorSettings};
use crate::stream::{Stream, StreamRegistry};
use crate::transform::{ImageTransforms, PixelTransforms};
use crate::types::{PixelFormat, RequestTemplate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Frame duration reported when the host channel is down
pub const FRAME_DURATION_UNAVAILABLE: i64 = -1;

/// How captures are requested from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolStrategy {
    /// `connect`/`start` once, then one `frame` query per buffer
    #[default]
    PerBuffer,
    /// `configure` per stream set, then one `capture` query per request
    Batched,
}

/// Everything a capture request produced
#[derive(Debug)]
pub struct CaptureResult {
    pub frame_duration_ns: i64,
    pub exposure_duration_ns: i64,
    pub metadata: CameraMetadata,
    pub outcomes: Vec<CaptureOutcome>,
    pub deferred: Vec<DeferredCompletion>,
}

impl CaptureResult {
    /// Number of buffers accounted for, immediate and deferred
    pub fn buffer_count(&self) -> usize {
        self.outcomes.len() + self.deferred.len()
    }

    /// Resolve all deferred completions and return every outcome.
    pub fn complete(self, ok: bool) -> Vec<CaptureOutcome> {
        let mut outcomes = self.outcomes;
        outcomes.extend(self.deferred.into_iter().map(|d| d.resolve(ok)));
        outcomes
    }
}

/// State shared by the protocol strategies for one request
pub(crate) struct CaptureContext<'a> {
    pub channel: &'a mut HostChannel,
    pub provider: &'a Arc<dyn BufferProvider>,
    pub transforms: &'a Arc<dyn PixelTransforms>,
    pub settings: SensorSettings,
    pub snapshot: &'a CameraMetadata,
}

pub struct VirtualCamera {
    params: CameraParameters,
    strategy: ProtocolStrategy,
    deferred_fence_timeout: Duration,
    channel: HostChannel,
    streams: StreamRegistry,
    host_streams: Vec<StreamSpec>,
    metadata: ResultMetadataBuilder,
    provider: Arc<dyn BufferProvider>,
    transforms: Arc<dyn PixelTransforms>,
}

impl VirtualCamera {
    pub fn new(
        params: CameraParameters,
        strategy: ProtocolStrategy,
        connector: Arc<dyn HostConnector>,
        provider: Arc<dyn BufferProvider>,
    ) -> Self {
        let channel = HostChannel::new(connector, &params.name);
        log::info!("camera '{}' using {:?} host protocol", params.name, strategy);

        Self {
            params,
            strategy,
            deferred_fence_timeout: Duration::from_millis(100),
            channel,
            streams: StreamRegistry::new(),
            host_streams: Vec::new(),
            metadata: ResultMetadataBuilder::default(),
            provider,
            transforms: Arc::new(ImageTransforms),
        }
    }

    /// Build a camera from configuration.
    pub fn from_config(
        config: &crate::config::GuestCamConfig,
        connector: Arc<dyn HostConnector>,
        provider: Arc<dyn BufferProvider>,
    ) -> Self {
        Self::new(config.camera_parameters(), config.pipeline.strategy, connector, provider)
            .with_autofocus(config.autofocus())
            .with_deferred_fence_timeout(config.deferred_fence_timeout())
    }

    pub fn with_autofocus(mut self, af: AfStateMachine) -> Self {
        self.metadata = ResultMetadataBuilder::new(af);
        self
    }

    pub fn with_transforms(mut self, transforms: Arc<dyn PixelTransforms>) -> Self {
        self.transforms = transforms;
        self
    }

    /// Acquire fence timeout for batched deferred buffers
    pub fn with_deferred_fence_timeout(mut self, timeout: Duration) -> Self {
        self.deferred_fence_timeout = timeout;
        self
    }

    pub fn parameters(&self) -> &CameraParameters {
        &self.params
    }

    pub fn strategy(&self) -> ProtocolStrategy {
        self.strategy
    }

    pub fn characteristics(&self) -> StaticCharacteristics {
        self.params.characteristics()
    }

    pub fn default_request(&self, template: RequestTemplate) -> CameraMetadata {
        default_request(template)
    }

    pub fn is_channel_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    pub fn sensor_settings(&self) -> SensorSettings {
        self.metadata.settings()
    }

    /// Negotiate and install a new stream set.
    ///
    /// The previous set stays in place if the host refuses the configuration.
    pub fn configure(
        &mut self,
        session_params: &CameraMetadata,
        streams: &[StreamConfig],
    ) -> Result<Vec<HalStream>, CameraError> {
        let mut seen = HashSet::new();
        if let Some(dup) = streams.iter().find(|s| !seen.insert(s.id)) {
            return Err(CameraError::ConfigurationError(format!(
                "stream id {} configured twice",
                dup.id
            )));
        }

        let hal_streams = streams
            .iter()
            .map(negotiate_stream)
            .collect::<Result<Vec<_>, _>>()?;

        let new_streams: Vec<Stream> = streams
            .iter()
            .zip(&hal_streams)
            .map(|(s, hal)| Stream::new(s.id, s.size, hal.override_format, s.buffer_size))
            .collect();

        if let Some(s) = new_streams
            .iter()
            .find(|s| s.pixel_format == PixelFormat::Blob && s.blob_buffer_size == 0)
        {
            return Err(CameraError::ConfigurationError(format!(
                "BLOB stream {} has no buffer size",
                s.id
            )));
        }

        let host_streams: Vec<StreamSpec> = new_streams
            .iter()
            .map(|s| StreamSpec {
                id: s.id,
                size: s.size,
                format: s.pixel_format.host_format().code(),
            })
            .collect();

        match self.strategy {
            ProtocolStrategy::PerBuffer => self.ensure_channel()?,
            ProtocolStrategy::Batched => {
                self.channel.open()?;
                self.channel.query(&HostCommand::Configure(host_streams.clone()))?;
            }
        }

        log::info!(
            "camera '{}' configured with {} stream(s)",
            self.params.name,
            new_streams.len()
        );
        self.host_streams = host_streams;
        self.streams.configure(new_streams);
        self.metadata.apply(session_params.clone());

        Ok(hal_streams)
    }

    /// Fill `buffers` for one request.
    ///
    /// Every buffer comes back exactly once, either in `outcomes` or as a
    /// deferred completion.
    pub fn process_capture_request(
        &mut self,
        metadata_update: Option<CameraMetadata>,
        buffers: Vec<CachedStreamBuffer>,
    ) -> CaptureResult {
        let metadata = match metadata_update {
            Some(update) => self.metadata.apply(update),
            None => self.metadata.refresh(),
        };
        let settings = self.metadata.settings();

        let mut result = CaptureResult {
            frame_duration_ns: settings.frame_duration_ns,
            exposure_duration_ns: settings.exposure_duration_ns,
            metadata,
            outcomes: Vec::with_capacity(buffers.len()),
            deferred: Vec::new(),
        };

        if let Err(e) = self.ensure_channel() {
            log::error!("camera '{}': host channel unavailable: {}", self.params.name, e);
            result
                .outcomes
                .extend(buffers.into_iter().map(|buffer| buffer.finish(false)));
            result.frame_duration_ns = FRAME_DURATION_UNAVAILABLE;
            return result;
        }

        let mut ctx = CaptureContext {
            channel: &mut self.channel,
            provider: &self.provider,
            transforms: &self.transforms,
            settings,
            snapshot: self.metadata.snapshot(),
        };

        match self.strategy {
            ProtocolStrategy::PerBuffer => {
                for mut buffer in buffers {
                    match self.streams.resolve(&mut buffer) {
                        Some(stream) => {
                            per_buffer::capture_frame(&mut ctx, &stream, buffer, &mut result)
                        }
                        None => {
                            log::error!(
                                "could not find stream {} for buffer {}",
                                buffer.stream_id(),
                                buffer.buffer_id()
                            );
                            result.outcomes.push(buffer.finish(false));
                        }
                    }
                }
            }
            ProtocolStrategy::Batched => batched::capture_frames(
                &mut ctx,
                &self.streams,
                buffers,
                self.deferred_fence_timeout,
                &mut result,
            ),
        }

        if !self.channel.is_open() {
            result.frame_duration_ns = FRAME_DURATION_UNAVAILABLE;
        }
        result
    }

    /// Stop the host session and forget the stream set. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.channel.is_open() && self.strategy == ProtocolStrategy::PerBuffer {
            match self.channel.query(&HostCommand::Stop) {
                Ok(_) => {
                    if let Err(e) = self.channel.query(&HostCommand::Disconnect) {
                        log::warn!("disconnect failed: {}", e);
                    }
                }
                Err(e) => log::warn!("stop failed: {}", e),
            }
        }

        self.channel.close();
        self.streams.clear();
        self.host_streams.clear();
    }

    /// Open the channel if needed and replay the session setup on a new connection.
    fn ensure_channel(&mut self) -> Result<(), CameraError> {
        if !self.channel.open()? {
            return Ok(());
        }

        match self.strategy {
            ProtocolStrategy::PerBuffer => {
                self.channel.query(&HostCommand::Connect)?;
                self.channel.query(&HostCommand::Start)?;
            }
            ProtocolStrategy::Batched => {
                if !self.host_streams.is_empty() {
                    self.channel
                        .query(&HostCommand::Configure(self.host_streams.clone()))?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for VirtualCamera {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for VirtualCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualCamera")
            .field("name", &self.params.name)
            .field("strategy", &self.strategy)
            .field("channel", &self.channel)
            .field("streams", &self.streams.streams().len())
            .finish()
    }
}
