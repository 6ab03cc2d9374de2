//! Configuration management for guestcam
//!
//! Provides configuration loading, saving and layering for the emulated camera:
//! device identity, the host channel address, autofocus tuning and the capture
//! protocol used towards the host.

use crate::camera::{CameraParameters, ProtocolStrategy};
use crate::errors::CameraError;
use crate::host::HostAddress;
use crate::metadata::AfStateMachine;
use crate::types::Size;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for layered configuration (`GUESTCAM_HOST__ADDRESS`)
pub const ENV_PREFIX: &str = "GUESTCAM";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestCamConfig {
    pub camera: CameraConfig,
    pub host: HostConfig,
    pub autofocus: AutofocusConfig,
    pub pipeline: PipelineConfig,
}

/// Emulated device identity and static capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Name of the host-side camera (sent as `name=<name>` when connecting)
    pub name: String,
    /// Sensor size [width, height]
    pub sensor_size: [u16; 2],
    /// Output resolutions offered to clients
    pub supported_resolutions: Vec<[u16; 2]>,
    /// JPEG thumbnail sizes; [0, 0] means "no thumbnail"
    pub thumbnail_resolutions: Vec<[u16; 2]>,
    pub back_facing: bool,
}

/// Host channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// `unix:/path` or `tcp:host:port`
    pub address: String,
    /// Bound on a single command round trip in milliseconds
    pub io_timeout_ms: u64,
}

/// Lens simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutofocusConfig {
    /// Frames a full scan may take
    pub focus_steps: u32,
    /// Closest/farthest lens positions in diopters
    pub min_distance: f32,
    pub max_distance: f32,
}

/// Capture pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub strategy: ProtocolStrategy,
    /// Acquire fence timeout used when resolving batched deferred buffers
    pub deferred_fence_timeout_ms: u64,
}

impl Default for GuestCamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                name: "virtualscene".to_string(),
                sensor_size: [1920, 1080],
                supported_resolutions: vec![[640, 480], [1280, 720], [1920, 1080]],
                thumbnail_resolutions: vec![[0, 0], [160, 120], [320, 180]],
                back_facing: true,
            },
            host: HostConfig {
                address: "unix:/run/guestcam/host.sock".to_string(),
                io_timeout_ms: 2000,
            },
            autofocus: AutofocusConfig {
                focus_steps: 200,
                min_distance: 1.0,
                max_distance: 2.0,
            },
            pipeline: PipelineConfig {
                strategy: ProtocolStrategy::PerBuffer,
                deferred_fence_timeout_ms: 100,
            },
        }
    }
}

impl GuestCamConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            CameraError::ConfigurationError(format!("Failed to read config file: {}", e))
        })?;

        let config: GuestCamConfig = toml::from_str(&contents).map_err(|e| {
            CameraError::ConfigurationError(format!("Failed to parse config file: {}", e))
        })?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::ConfigurationError(format!(
                    "Failed to create config directory: {}",
                    e
                ))
            })?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            CameraError::ConfigurationError(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            CameraError::ConfigurationError(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Defaults, overlaid by an optional TOML file, overlaid by `GUESTCAM_*`
    /// environment variables (`__` separates sections, e.g. `GUESTCAM_HOST__ADDRESS`).
    pub fn load_layered<P: AsRef<Path>>(path: Option<P>) -> Result<Self, CameraError> {
        let layer_error = |e: config::ConfigError| {
            CameraError::ConfigurationError(format!("Failed to layer config: {}", e))
        };

        let defaults = config::Config::try_from(&Self::default()).map_err(layer_error)?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.as_ref().to_path_buf())
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let config: GuestCamConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(layer_error)?
            .try_deserialize()
            .map_err(layer_error)?;

        config
            .validate()
            .map_err(CameraError::ConfigurationError)?;
        Ok(config)
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("guestcam.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.camera.name.is_empty() || self.camera.name.contains(char::is_whitespace) {
            return Err("Camera name must be a non-empty word".to_string());
        }
        if self.camera.sensor_size[0] == 0 || self.camera.sensor_size[1] == 0 {
            return Err("Invalid sensor size".to_string());
        }
        if self.camera.supported_resolutions.is_empty() {
            return Err("At least one supported resolution is required".to_string());
        }
        let [sensor_w, sensor_h] = self.camera.sensor_size;
        if let Some(r) = self
            .camera
            .supported_resolutions
            .iter()
            .find(|r| r[0] == 0 || r[1] == 0 || r[0] > sensor_w || r[1] > sensor_h)
        {
            return Err(format!("Resolution {}x{} does not fit the sensor", r[0], r[1]));
        }

        self.host_address()?;
        if self.host.io_timeout_ms == 0 {
            return Err("Host I/O timeout must be positive".to_string());
        }

        if self.autofocus.focus_steps == 0 {
            return Err("Focus steps must be at least 1".to_string());
        }
        let af = &self.autofocus;
        if !(af.min_distance >= 0.0 && af.min_distance < af.max_distance) {
            return Err("Focus distances must satisfy 0 <= min < max".to_string());
        }

        if self.pipeline.deferred_fence_timeout_ms == 0 {
            return Err("Deferred fence timeout must be positive".to_string());
        }

        Ok(())
    }

    pub fn host_address(&self) -> Result<HostAddress, String> {
        self.host.address.parse()
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.host.io_timeout_ms)
    }

    pub fn deferred_fence_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.deferred_fence_timeout_ms)
    }

    pub fn camera_parameters(&self) -> CameraParameters {
        CameraParameters {
            name: self.camera.name.clone(),
            sensor_size: Size::from(self.camera.sensor_size),
            supported_resolutions: self
                .camera
                .supported_resolutions
                .iter()
                .copied()
                .map(Size::from)
                .collect(),
            thumbnail_resolutions: self
                .camera
                .thumbnail_resolutions
                .iter()
                .copied()
                .map(Size::from)
                .collect(),
            back_facing: self.camera.back_facing,
        }
    }

    pub fn autofocus(&self) -> AfStateMachine {
        AfStateMachine::new(
            self.autofocus.focus_steps,
            self.autofocus.min_distance,
            self.autofocus.max_distance,
        )
    }
}
