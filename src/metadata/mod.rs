//! Camera metadata model, autofocus state machine and result metadata builder.
//!
//! Metadata travels as an ordered tag/value map. Requests carry partial maps of
//! overrides; results carry the full snapshot produced by [`ResultMetadataBuilder`].
pub mod af;
pub mod builder;

pub use af::{AfMode, AfState, AfStateMachine, AfTrigger};
pub use builder::{exposure_compensation, ResultMetadataBuilder, SensorSettings};

use crate::types::Rational;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata entries the pipeline reads or produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetadataTag {
    ColorCorrectionGains,
    ColorCorrectionTransform,
    ControlAeMode,
    ControlAeState,
    ControlAeTargetFpsRange,
    ControlAfMode,
    ControlAfState,
    ControlAfTrigger,
    ControlAwbState,
    ControlCaptureIntent,
    FlashState,
    JpegOrientation,
    JpegQuality,
    LensAperture,
    LensFocusDistance,
    LensState,
    RequestPipelineDepth,
    SensorExposureTime,
    SensorFrameDuration,
    SensorNeutralColorPoint,
    SensorNoiseProfile,
    SensorRollingShutterSkew,
    SensorSensitivity,
    SensorTimestamp,
    StatisticsLensShadingMap,
    StatisticsLensShadingMapMode,
    StatisticsSceneFlicker,
}

/// Typed payload of a metadata entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    Byte(u8),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Int32s(Vec<i32>),
    Floats(Vec<f32>),
    Doubles(Vec<f64>),
    Rationals(Vec<Rational>),
}

impl MetadataValue {
    pub fn as_byte(&self) -> Option<u8> {
        match self {
            Self::Byte(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32s(&self) -> Option<&[i32]> {
        match self {
            Self::Int32s(v) => Some(v),
            _ => None,
        }
    }
}

impl From<u8> for MetadataValue {
    fn from(v: u8) -> Self {
        Self::Byte(v)
    }
}

impl From<i32> for MetadataValue {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f32> for MetadataValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<&[f32]> for MetadataValue {
    fn from(v: &[f32]) -> Self {
        Self::Floats(v.to_vec())
    }
}

impl From<&[f64]> for MetadataValue {
    fn from(v: &[f64]) -> Self {
        Self::Doubles(v.to_vec())
    }
}

impl From<&[i32]> for MetadataValue {
    fn from(v: &[i32]) -> Self {
        Self::Int32s(v.to_vec())
    }
}

impl From<&[Rational]> for MetadataValue {
    fn from(v: &[Rational]) -> Self {
        Self::Rationals(v.to_vec())
    }
}

/// Ordered collection of metadata entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraMetadata {
    entries: BTreeMap<MetadataTag, MetadataValue>,
}

impl CameraMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: MetadataTag, value: impl Into<MetadataValue>) -> Self {
        self.set(tag, value);
        self
    }

    pub fn set(&mut self, tag: MetadataTag, value: impl Into<MetadataValue>) {
        self.entries.insert(tag, value.into());
    }

    pub fn get(&self, tag: MetadataTag) -> Option<&MetadataValue> {
        self.entries.get(&tag)
    }

    pub fn get_mut(&mut self, tag: MetadataTag) -> Option<&mut MetadataValue> {
        self.entries.get_mut(&tag)
    }

    pub fn remove(&mut self, tag: MetadataTag) -> Option<MetadataValue> {
        self.entries.remove(&tag)
    }

    pub fn contains(&self, tag: MetadataTag) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetadataTag, &MetadataValue)> {
        self.entries.iter()
    }

    pub fn byte(&self, tag: MetadataTag) -> Option<u8> {
        self.get(tag).and_then(MetadataValue::as_byte)
    }

    pub fn int32(&self, tag: MetadataTag) -> Option<i32> {
        self.get(tag).and_then(MetadataValue::as_i32)
    }

    pub fn int64(&self, tag: MetadataTag) -> Option<i64> {
        self.get(tag).and_then(MetadataValue::as_i64)
    }

    pub fn float(&self, tag: MetadataTag) -> Option<f32> {
        self.get(tag).and_then(MetadataValue::as_f32)
    }
}

/// Auto-exposure modes (`CONTROL_AE_MODE`)
pub mod ae_mode {
    pub const OFF: u8 = 0;
    pub const ON: u8 = 1;
}

/// Lens state values (`LENS_STATE`)
pub mod lens_state {
    pub const STATIONARY: u8 = 0;
    pub const MOVING: u8 = 1;
}

/// Lens shading map mode values (`STATISTICS_LENS_SHADING_MAP_MODE`)
pub mod lens_shading_map_mode {
    pub const OFF: u8 = 0;
    pub const ON: u8 = 1;
}
