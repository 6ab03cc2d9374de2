//! Static camera characteristics, stream negotiation and request templates

use crate::errors::CameraError;
use crate::metadata::builder::{
    DEFAULT_APERTURE, DEFAULT_SENSOR_EXPOSURE_TIME_NS, DEFAULT_SENSOR_SENSITIVITY, MAX_FPS,
    MAX_SENSOR_EXPOSURE_TIME_NS, MAX_SENSOR_SENSITIVITY, MED_FPS, MIN_FPS,
    MIN_FRAME_DURATION_NS, MIN_SENSOR_EXPOSURE_TIME_NS, MIN_SENSOR_SENSITIVITY,
};
use crate::metadata::{ae_mode, AfMode, AfTrigger, CameraMetadata, MetadataTag};
use crate::transform::DEFAULT_JPEG_QUALITY;
use crate::types::{BufferUsage, Dataspace, PixelFormat, RequestTemplate, Size};
use serde::{Deserialize, Serialize};

/// Identity and capabilities of one emulated camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraParameters {
    pub name: String,
    pub sensor_size: Size,
    pub supported_resolutions: Vec<Size>,
    pub thumbnail_resolutions: Vec<Size>,
    pub back_facing: bool,
}

/// Maximum simultaneous output streams per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxOutputStreams {
    pub raw: i32,
    pub processed: i32,
    pub jpeg: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    BackwardCompatible,
    ReadSensorSettings,
    Raw,
}

/// Values that never change for the lifetime of a camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticCharacteristics {
    pub target_fps_ranges: Vec<(i32, i32)>,
    pub available_apertures: Vec<f32>,
    pub max_output_streams: MaxOutputStreams,
    pub capabilities: Vec<Capability>,
    pub supported_formats: Vec<PixelFormat>,
    pub supported_resolutions: Vec<Size>,
    pub thumbnail_resolutions: Vec<Size>,
    pub min_frame_duration_ns: i64,
    pub max_frame_duration_ns: i64,
    pub sensor_size: Size,
    pub color_filter_arrangement: String,
    pub sensitivity_range: (i32, i32),
    pub exposure_time_range_ns: (i64, i64),
    pub back_facing: bool,
}

// ordered so that preview ranges come first
const TARGET_FPS_RANGES: [(i32, i32); 4] = [
    (MIN_FPS, MED_FPS),
    (MED_FPS, MED_FPS),
    (MIN_FPS, MAX_FPS),
    (MAX_FPS, MAX_FPS),
];

const AVAILABLE_APERTURES: [f32; 8] = [1.4, 2.0, 2.8, 4.0, 5.6, 8.0, 11.0, 16.0];

const SUPPORTED_FORMATS: [PixelFormat; 5] = [
    PixelFormat::ImplementationDefined,
    PixelFormat::Ycbcr420_888,
    PixelFormat::Rgba8888,
    PixelFormat::Raw16,
    PixelFormat::Blob,
];

impl CameraParameters {
    pub fn characteristics(&self) -> StaticCharacteristics {
        StaticCharacteristics {
            target_fps_ranges: TARGET_FPS_RANGES.to_vec(),
            available_apertures: AVAILABLE_APERTURES.to_vec(),
            max_output_streams: MaxOutputStreams {
                raw: 1,
                processed: 2,
                jpeg: 1,
            },
            capabilities: vec![
                Capability::BackwardCompatible,
                Capability::ReadSensorSettings,
                Capability::Raw,
            ],
            supported_formats: SUPPORTED_FORMATS.to_vec(),
            supported_resolutions: self.supported_resolutions.clone(),
            thumbnail_resolutions: self.thumbnail_resolutions.clone(),
            min_frame_duration_ns: MIN_FRAME_DURATION_NS,
            max_frame_duration_ns: MAX_SENSOR_EXPOSURE_TIME_NS,
            sensor_size: self.sensor_size,
            color_filter_arrangement: "RGGB".to_string(),
            sensitivity_range: (MIN_SENSOR_SENSITIVITY, MAX_SENSOR_SENSITIVITY),
            exposure_time_range_ns: (MIN_SENSOR_EXPOSURE_TIME_NS, MAX_SENSOR_EXPOSURE_TIME_NS),
            back_facing: self.back_facing,
        }
    }

    pub fn supports_resolution(&self, size: Size) -> bool {
        self.supported_resolutions.contains(&size)
    }
}

/// A stream as requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub id: i32,
    pub size: Size,
    pub format: PixelFormat,
    pub usage: BufferUsage,
    pub dataspace: Dataspace,
    /// Byte size of BLOB buffers, 0 otherwise
    pub buffer_size: u32,
}

impl StreamConfig {
    pub fn new(id: i32, size: Size, format: PixelFormat) -> Self {
        let dataspace = if format == PixelFormat::Blob {
            Dataspace::Jfif
        } else {
            Dataspace::Unknown
        };

        Self {
            id,
            size,
            format,
            usage: BufferUsage::NONE,
            dataspace,
            buffer_size: 0,
        }
    }

    pub fn with_usage(mut self, usage: BufferUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_dataspace(mut self, dataspace: Dataspace) -> Self {
        self.dataspace = dataspace;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: u32) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

/// What the camera will actually produce for a requested stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalStream {
    pub id: i32,
    pub override_format: PixelFormat,
    pub producer_usage: BufferUsage,
    pub override_dataspace: Dataspace,
    pub max_buffers: u32,
}

/// Pick the concrete format, usage, dataspace and buffer count for a stream.
pub fn negotiate_stream(config: &StreamConfig) -> Result<HalStream, CameraError> {
    let usage = config.usage | BufferUsage::CAMERA_OUTPUT | BufferUsage::CPU_WRITE_OFTEN;
    let encoder = config.usage.contains(BufferUsage::VIDEO_ENCODER);
    let by_usage = if encoder { 8 } else { 4 };

    let (override_format, override_dataspace, max_buffers) = match config.format {
        PixelFormat::ImplementationDefined if encoder => {
            (PixelFormat::Ycbcr420_888, Dataspace::Jfif, 8)
        }
        PixelFormat::ImplementationDefined => (PixelFormat::Rgba8888, Dataspace::Unknown, 4),
        PixelFormat::Ycbcr420_888 => (PixelFormat::Ycbcr420_888, Dataspace::Jfif, by_usage),
        PixelFormat::Raw16 => (PixelFormat::Raw16, Dataspace::SrgbLinear, 4),
        PixelFormat::Rgba8888 => (PixelFormat::Rgba8888, Dataspace::Unknown, by_usage),
        PixelFormat::Blob => {
            if config.dataspace != Dataspace::Jfif {
                return Err(CameraError::UnsupportedStream(format!(
                    "stream {}: BLOB requires the JFIF dataspace, got {:?}",
                    config.id, config.dataspace
                )));
            }
            (PixelFormat::Blob, Dataspace::Jfif, 4)
        }
    };

    Ok(HalStream {
        id: config.id,
        override_format,
        producer_usage: usage,
        override_dataspace,
        max_buffers,
    })
}

fn default_fps_range(template: RequestTemplate) -> [i32; 2] {
    match template {
        RequestTemplate::Preview
        | RequestTemplate::VideoRecord
        | RequestTemplate::VideoSnapshot => [MAX_FPS, MAX_FPS],
        _ => [MIN_FPS, MAX_FPS],
    }
}

/// Settings a client starts from for a given use case
pub fn default_request(template: RequestTemplate) -> CameraMetadata {
    let (intent, af_mode) = match template {
        RequestTemplate::Preview => (1u8, AfMode::ContinuousPicture),
        RequestTemplate::StillCapture => (2, AfMode::ContinuousPicture),
        RequestTemplate::VideoRecord => (3, AfMode::ContinuousVideo),
        RequestTemplate::VideoSnapshot => (4, AfMode::ContinuousVideo),
        RequestTemplate::ZeroShutterLag => (5, AfMode::ContinuousPicture),
        RequestTemplate::Manual => (6, AfMode::Off),
    };
    let ae = if template == RequestTemplate::Manual {
        ae_mode::OFF
    } else {
        ae_mode::ON
    };

    CameraMetadata::new()
        .with(MetadataTag::ControlCaptureIntent, intent)
        .with(MetadataTag::ControlAeMode, ae)
        .with(MetadataTag::ControlAeTargetFpsRange, &default_fps_range(template)[..])
        .with(MetadataTag::ControlAfMode, af_mode.as_u8())
        .with(MetadataTag::ControlAfTrigger, AfTrigger::Idle.as_u8())
        .with(MetadataTag::LensAperture, DEFAULT_APERTURE)
        .with(MetadataTag::SensorExposureTime, DEFAULT_SENSOR_EXPOSURE_TIME_NS)
        .with(MetadataTag::SensorFrameDuration, MIN_FRAME_DURATION_NS)
        .with(MetadataTag::SensorSensitivity, DEFAULT_SENSOR_SENSITIVITY)
        .with(MetadataTag::JpegQuality, DEFAULT_JPEG_QUALITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implementation_defined_follows_usage() {
        let preview = StreamConfig::new(0, Size::new(640, 480), PixelFormat::ImplementationDefined);
        let hal = negotiate_stream(&preview).unwrap();
        assert_eq!(hal.override_format, PixelFormat::Rgba8888);
        assert_eq!(hal.max_buffers, 4);
        assert!(hal.producer_usage.contains(BufferUsage::CAMERA_OUTPUT));

        let video = preview.with_usage(BufferUsage::VIDEO_ENCODER);
        let hal = negotiate_stream(&video).unwrap();
        assert_eq!(hal.override_format, PixelFormat::Ycbcr420_888);
        assert_eq!(hal.override_dataspace, Dataspace::Jfif);
        assert_eq!(hal.max_buffers, 8);
    }

    #[test]
    fn test_blob_needs_jfif() {
        let jpeg = StreamConfig::new(1, Size::new(640, 480), PixelFormat::Blob);
        assert!(negotiate_stream(&jpeg).is_ok());

        let bad = jpeg.with_dataspace(Dataspace::Unknown);
        assert!(matches!(
            negotiate_stream(&bad),
            Err(CameraError::UnsupportedStream(_))
        ));
    }

    #[test]
    fn test_raw16_is_linear() {
        let raw = StreamConfig::new(2, Size::new(640, 480), PixelFormat::Raw16);
        let hal = negotiate_stream(&raw).unwrap();
        assert_eq!(hal.override_dataspace, Dataspace::SrgbLinear);
    }

    #[test]
    fn test_default_request_templates() {
        let preview = default_request(RequestTemplate::Preview);
        assert_eq!(
            preview.get(MetadataTag::ControlAeTargetFpsRange).and_then(|v| v.as_i32s()),
            Some(&[30, 30][..])
        );

        let still = default_request(RequestTemplate::StillCapture);
        assert_eq!(
            still.get(MetadataTag::ControlAeTargetFpsRange).and_then(|v| v.as_i32s()),
            Some(&[2, 30][..])
        );
        assert_eq!(still.byte(MetadataTag::JpegQuality), Some(DEFAULT_JPEG_QUALITY));

        let manual = default_request(RequestTemplate::Manual);
        assert_eq!(manual.byte(MetadataTag::ControlAeMode), Some(ae_mode::OFF));
    }

    #[test]
    fn test_characteristics_report_parameters() {
        let params = CameraParameters {
            name: "cam".to_string(),
            sensor_size: Size::new(1280, 720),
            supported_resolutions: vec![Size::new(640, 480)],
            thumbnail_resolutions: vec![Size::new(0, 0)],
            back_facing: false,
        };
        let chars = params.characteristics();
        assert_eq!(chars.sensor_size, Size::new(1280, 720));
        assert_eq!(chars.target_fps_ranges[0], (2, 15));
        assert_eq!(chars.max_output_streams.processed, 2);
        assert!(params.supports_resolution(Size::new(640, 480)));
        assert!(!params.supports_resolution(Size::new(1280, 720)));

        let json = serde_json::to_value(&chars).unwrap();
        assert_eq!(json["color_filter_arrangement"], "RGGB");
    }
}
