//! Capture result metadata builder
//!
//! Turns request overrides into the result snapshot returned with every capture and
//! keeps the sensor settings the dispatcher needs (frame duration for fence timeouts,
//! exposure compensation for host queries).

use super::af::{AfMode, AfState, AfStateMachine, AfTrigger};
use super::{ae_mode, lens_shading_map_mode, lens_state, CameraMetadata, MetadataTag};
use crate::types::Rational;

pub const ONE_SECOND_NS: i64 = 1_000_000_000;

pub const MIN_FPS: i32 = 2;
pub const MED_FPS: i32 = 15;
pub const MAX_FPS: i32 = 30;

pub const MIN_FRAME_DURATION_NS: i64 = ONE_SECOND_NS / MAX_FPS as i64;
pub const MAX_FRAME_DURATION_NS: i64 = ONE_SECOND_NS / MIN_FPS as i64;
pub const DEFAULT_FRAME_DURATION_NS: i64 = ONE_SECOND_NS / MED_FPS as i64;

pub const MIN_SENSOR_EXPOSURE_TIME_NS: i64 = ONE_SECOND_NS / 20_000;
pub const MAX_SENSOR_EXPOSURE_TIME_NS: i64 = ONE_SECOND_NS / 2;
pub const DEFAULT_SENSOR_EXPOSURE_TIME_NS: i64 = ONE_SECOND_NS / 100;

pub const MIN_SENSOR_SENSITIVITY: i32 = 25;
pub const MAX_SENSOR_SENSITIVITY: i32 = 1600;
pub const DEFAULT_SENSOR_SENSITIVITY: i32 = 200;

pub const MIN_APERTURE: f32 = 1.4;
pub const MAX_APERTURE: f32 = 16.0;
pub const DEFAULT_APERTURE: f32 = 4.0;

const PIPELINE_DEPTH: u8 = 4;
const AE_STATE_CONVERGED: u8 = 2;
const AWB_STATE_CONVERGED: u8 = 2;
const FLASH_STATE_UNAVAILABLE: u8 = 0;
const SCENE_FLICKER_NONE: u8 = 0;

const COLOR_CORRECTION_GAINS: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

const RATIONAL_ZERO: Rational = Rational::new(0, 128);
const RATIONAL_ONE: Rational = Rational::new(128, 128);

const COLOR_CORRECTION_TRANSFORM: [Rational; 9] = [
    RATIONAL_ONE, RATIONAL_ZERO, RATIONAL_ZERO,
    RATIONAL_ZERO, RATIONAL_ONE, RATIONAL_ZERO,
    RATIONAL_ZERO, RATIONAL_ZERO, RATIONAL_ONE,
];

const NEUTRAL_COLOR_POINT: [Rational; 3] = [
    Rational::new(1023, 1),
    Rational::new(1023, 1),
    Rational::new(1023, 1),
];

const SENSOR_NOISE_PROFILE: [f64; 8] = [1.0, 0.000001, 1.0, 0.000001, 1.0, 0.000001, 1.0, 0.000001];

// 4 channels x (4 x 3) grid
const LENS_SHADING_MAP: [f32; 48] = [
    1.3, 1.2, 1.15, 1.2, 1.2, 1.2, 1.15, 1.2,
    1.1, 1.2, 1.2, 1.2, 1.3, 1.2, 1.3, 1.3,
    1.2, 1.2, 1.25, 1.1, 1.1, 1.1, 1.1, 1.0,
    1.0, 1.0, 1.0, 1.0, 1.2, 1.3, 1.25, 1.2,
    1.3, 1.2, 1.2, 1.3, 1.2, 1.15, 1.1, 1.2,
    1.2, 1.1, 1.0, 1.2, 1.3, 1.15, 1.2, 1.3,
];

/// Sensor settings in effect for the current request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSettings {
    pub frame_duration_ns: i64,
    pub exposure_duration_ns: i64,
    pub sensitivity: i32,
    pub aperture: f32,
    pub exposure_comp: f32,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            frame_duration_ns: DEFAULT_FRAME_DURATION_NS,
            exposure_duration_ns: DEFAULT_SENSOR_EXPOSURE_TIME_NS,
            sensitivity: DEFAULT_SENSOR_SENSITIVITY,
            aperture: DEFAULT_APERTURE,
            exposure_comp: 1.0,
        }
    }
}

/// Brightness multiplier the host applies relative to the default exposure triangle.
pub fn exposure_compensation(exposure_ns: i64, sensitivity: i32, aperture: f32) -> f32 {
    let default_aperture = f64::from(DEFAULT_APERTURE);
    let aperture = f64::from(aperture);

    ((exposure_ns as f64 * f64::from(sensitivity) * default_aperture * default_aperture)
        / (DEFAULT_SENSOR_EXPOSURE_TIME_NS as f64
            * f64::from(DEFAULT_SENSOR_SENSITIVITY)
            * aperture
            * aperture)) as f32
}

/// Frame duration requested by `metadata`, clamped to `[min, max]`.
///
/// With auto-exposure off the explicit sensor frame duration wins; otherwise the
/// midpoint of the AE target fps range decides.
pub fn requested_frame_duration(
    metadata: &CameraMetadata,
    default: i64,
    min: i64,
    max: i64,
) -> i64 {
    let ae = metadata
        .byte(MetadataTag::ControlAeMode)
        .unwrap_or(ae_mode::ON);

    if ae == ae_mode::OFF {
        match metadata.int64(MetadataTag::SensorFrameDuration) {
            Some(duration) => duration.clamp(min, max),
            None => default,
        }
    } else {
        match metadata
            .get(MetadataTag::ControlAeTargetFpsRange)
            .and_then(|v| v.as_i32s())
        {
            Some([lo, hi, ..]) => {
                let fps = (i64::from(*lo) + i64::from(*hi)) / 2;
                if fps > 0 {
                    (ONE_SECOND_NS / fps).clamp(min, max)
                } else {
                    default
                }
            }
            _ => default,
        }
    }
}

fn lens_state_for(af: AfState) -> u8 {
    if af.is_scanning() {
        lens_state::MOVING
    } else {
        lens_state::STATIONARY
    }
}

pub struct ResultMetadataBuilder {
    af: AfStateMachine,
    settings: SensorSettings,
    snapshot: CameraMetadata,
}

impl ResultMetadataBuilder {
    pub fn new(af: AfStateMachine) -> Self {
        Self {
            af,
            settings: SensorSettings::default(),
            snapshot: CameraMetadata::new(),
        }
    }

    pub fn settings(&self) -> SensorSettings {
        self.settings
    }

    pub fn snapshot(&self) -> &CameraMetadata {
        &self.snapshot
    }

    pub fn autofocus(&self) -> &AfStateMachine {
        &self.af
    }

    /// Build a fresh result snapshot from request overrides.
    pub fn apply(&mut self, overrides: CameraMetadata) -> CameraMetadata {
        let frame_duration_ns = requested_frame_duration(
            &overrides,
            DEFAULT_FRAME_DURATION_NS,
            MIN_FRAME_DURATION_NS,
            MAX_FRAME_DURATION_NS,
        );

        let exposure_duration_ns = overrides
            .int64(MetadataTag::SensorExposureTime)
            .unwrap_or_else(|| frame_duration_ns.min(DEFAULT_SENSOR_EXPOSURE_TIME_NS));
        let sensitivity = overrides
            .int32(MetadataTag::SensorSensitivity)
            .unwrap_or(DEFAULT_SENSOR_SENSITIVITY);
        let aperture = overrides
            .float(MetadataTag::LensAperture)
            .unwrap_or(DEFAULT_APERTURE);

        let af_mode = overrides
            .byte(MetadataTag::ControlAfMode)
            .map(AfMode::from_u8)
            .unwrap_or(AfMode::Off);
        let af_trigger = overrides
            .byte(MetadataTag::ControlAfTrigger)
            .map(AfTrigger::from_u8)
            .unwrap_or(AfTrigger::Idle);

        let (af_state, focus_distance) = self.af.evaluate(af_mode, af_trigger);

        self.settings = SensorSettings {
            frame_duration_ns,
            exposure_duration_ns,
            sensitivity,
            aperture,
            exposure_comp: exposure_compensation(exposure_duration_ns, sensitivity, aperture),
        };

        let shading_map_on = overrides.byte(MetadataTag::StatisticsLensShadingMapMode)
            == Some(lens_shading_map_mode::ON);

        let mut m = overrides;
        m.set(MetadataTag::ColorCorrectionGains, &COLOR_CORRECTION_GAINS[..]);
        m.set(MetadataTag::ColorCorrectionTransform, &COLOR_CORRECTION_TRANSFORM[..]);
        m.set(MetadataTag::ControlAeState, AE_STATE_CONVERGED);
        m.set(MetadataTag::ControlAfState, af_state.as_u8());
        m.set(MetadataTag::ControlAwbState, AWB_STATE_CONVERGED);
        m.set(MetadataTag::FlashState, FLASH_STATE_UNAVAILABLE);
        m.set(MetadataTag::LensAperture, aperture);
        m.set(MetadataTag::LensFocusDistance, focus_distance);
        m.set(MetadataTag::LensState, lens_state_for(af_state));
        m.set(MetadataTag::RequestPipelineDepth, PIPELINE_DEPTH);
        m.set(MetadataTag::SensorFrameDuration, frame_duration_ns);
        m.set(MetadataTag::SensorExposureTime, exposure_duration_ns);
        m.set(MetadataTag::SensorSensitivity, sensitivity);
        m.set(MetadataTag::SensorTimestamp, 0i64);
        m.set(MetadataTag::SensorNeutralColorPoint, &NEUTRAL_COLOR_POINT[..]);
        m.set(MetadataTag::SensorNoiseProfile, &SENSOR_NOISE_PROFILE[..]);
        m.set(MetadataTag::SensorRollingShutterSkew, MIN_SENSOR_EXPOSURE_TIME_NS);
        m.set(MetadataTag::StatisticsSceneFlicker, SCENE_FLICKER_NONE);
        if shading_map_on {
            m.set(MetadataTag::StatisticsLensShadingMap, &LENS_SHADING_MAP[..]);
        }

        // A trigger fires once; it must not leak into later results.
        if m.contains(MetadataTag::ControlAfTrigger) {
            m.set(MetadataTag::ControlAfTrigger, AfTrigger::Idle.as_u8());
        }

        self.snapshot = m;
        self.snapshot.clone()
    }

    /// Advance autofocus by one frame and patch the AF fields of the stored snapshot.
    pub fn refresh(&mut self) -> CameraMetadata {
        let (af_state, focus_distance) = self.af.reevaluate();

        match self.snapshot.get_mut(MetadataTag::ControlAfState) {
            Some(value) => *value = af_state.as_u8().into(),
            None => log::warn!("refresh: CONTROL_AF_STATE missing from result metadata"),
        }

        match self.snapshot.get_mut(MetadataTag::LensFocusDistance) {
            Some(value) => *value = focus_distance.into(),
            None => log::warn!("refresh: LENS_FOCUS_DISTANCE missing from result metadata"),
        }

        if let Some(value) = self.snapshot.get_mut(MetadataTag::LensState) {
            *value = lens_state_for(af_state).into();
        }

        self.snapshot.clone()
    }
}

impl Default for ResultMetadataBuilder {
    fn default() -> Self {
        Self::new(AfStateMachine::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataValue;

    #[test]
    fn test_default_exposure_compensation_is_one() {
        let comp = exposure_compensation(
            DEFAULT_SENSOR_EXPOSURE_TIME_NS,
            DEFAULT_SENSOR_SENSITIVITY,
            DEFAULT_APERTURE,
        );
        assert!((comp - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_exposure_compensation_scales() {
        // double exposure, double iso, half the f-number -> 16x
        let comp = exposure_compensation(
            DEFAULT_SENSOR_EXPOSURE_TIME_NS * 2,
            DEFAULT_SENSOR_SENSITIVITY * 2,
            DEFAULT_APERTURE / 2.0,
        );
        assert!((comp - 16.0).abs() < 1e-4);
    }

    #[test]
    fn test_apply_defaults() {
        let mut builder = ResultMetadataBuilder::default();
        let md = builder.apply(CameraMetadata::new());

        let settings = builder.settings();
        assert_eq!(settings.frame_duration_ns, DEFAULT_FRAME_DURATION_NS);
        assert_eq!(settings.exposure_duration_ns, DEFAULT_SENSOR_EXPOSURE_TIME_NS);
        assert_eq!(settings.sensitivity, DEFAULT_SENSOR_SENSITIVITY);
        assert_eq!(settings.aperture, DEFAULT_APERTURE);
        assert_eq!(md.byte(MetadataTag::ControlAfState), Some(AfState::Inactive.as_u8()));
        assert_eq!(md.byte(MetadataTag::RequestPipelineDepth), Some(4));
        assert!(!md.contains(MetadataTag::StatisticsLensShadingMap));
    }

    #[test]
    fn test_fps_range_drives_frame_duration() {
        let mut builder = ResultMetadataBuilder::default();
        builder.apply(
            CameraMetadata::new().with(MetadataTag::ControlAeTargetFpsRange, &[30i32, 30][..]),
        );
        assert_eq!(builder.settings().frame_duration_ns, MIN_FRAME_DURATION_NS);
        assert_eq!(builder.settings().exposure_duration_ns, DEFAULT_SENSOR_EXPOSURE_TIME_NS);
    }

    #[test]
    fn test_extreme_fps_range_is_clamped() {
        let mut builder = ResultMetadataBuilder::default();
        builder.apply(CameraMetadata::new().with(
            MetadataTag::ControlAeTargetFpsRange,
            &[i32::MAX, i32::MAX][..],
        ));
        assert_eq!(builder.settings().frame_duration_ns, MIN_FRAME_DURATION_NS);

        let md = CameraMetadata::new()
            .with(MetadataTag::ControlAeTargetFpsRange, &[i32::MIN, i32::MIN][..]);
        let duration = requested_frame_duration(
            &md,
            DEFAULT_FRAME_DURATION_NS,
            MIN_FRAME_DURATION_NS,
            MAX_FRAME_DURATION_NS,
        );
        assert_eq!(duration, DEFAULT_FRAME_DURATION_NS);
    }

    #[test]
    fn test_manual_frame_duration_is_clamped() {
        let md = CameraMetadata::new()
            .with(MetadataTag::ControlAeMode, ae_mode::OFF)
            .with(MetadataTag::SensorFrameDuration, 10i64);
        let duration = requested_frame_duration(
            &md,
            DEFAULT_FRAME_DURATION_NS,
            MIN_FRAME_DURATION_NS,
            MAX_FRAME_DURATION_NS,
        );
        assert_eq!(duration, MIN_FRAME_DURATION_NS);
    }

    #[test]
    fn test_short_frame_caps_default_exposure() {
        let mut builder = ResultMetadataBuilder::default();
        builder.apply(
            CameraMetadata::new()
                .with(MetadataTag::ControlAeMode, ae_mode::OFF)
                .with(MetadataTag::SensorFrameDuration, MIN_FRAME_DURATION_NS),
        );
        // 1/30 s frame is longer than the 1/100 s default exposure
        assert_eq!(builder.settings().exposure_duration_ns, DEFAULT_SENSOR_EXPOSURE_TIME_NS);
    }

    #[test]
    fn test_apply_resets_af_trigger() {
        let mut builder = ResultMetadataBuilder::default();
        let md = builder.apply(
            CameraMetadata::new()
                .with(MetadataTag::ControlAfMode, AfMode::Auto.as_u8())
                .with(MetadataTag::ControlAfTrigger, AfTrigger::Start.as_u8()),
        );
        assert_eq!(md.byte(MetadataTag::ControlAfTrigger), Some(AfTrigger::Idle.as_u8()));
        assert_eq!(md.byte(MetadataTag::ControlAfState), Some(AfState::ActiveScan.as_u8()));
        assert_eq!(md.byte(MetadataTag::LensState), Some(lens_state::MOVING));
        assert_eq!(
            builder.snapshot().byte(MetadataTag::ControlAfTrigger),
            Some(AfTrigger::Idle.as_u8())
        );
    }

    #[test]
    fn test_refresh_patches_af_fields_only() {
        let mut builder = ResultMetadataBuilder::new(AfStateMachine::new(2, 1.0, 2.0));
        let first = builder.apply(
            CameraMetadata::new()
                .with(MetadataTag::ControlAfMode, AfMode::Auto.as_u8())
                .with(MetadataTag::ControlAfTrigger, AfTrigger::Start.as_u8())
                .with(MetadataTag::SensorSensitivity, 800i32),
        );

        let refreshed = builder.refresh();
        assert_eq!(
            refreshed.byte(MetadataTag::ControlAfState),
            Some(AfState::FocusedLocked.as_u8())
        );
        assert_eq!(refreshed.float(MetadataTag::LensFocusDistance), Some(1.5));
        assert_eq!(
            refreshed.get(MetadataTag::SensorSensitivity),
            first.get(MetadataTag::SensorSensitivity)
        );
    }

    #[test]
    fn test_refresh_without_snapshot_is_soft() {
        let mut builder = ResultMetadataBuilder::default();
        let md = builder.refresh();
        assert!(md.is_empty());
    }

    #[test]
    fn test_lens_shading_map_on_request() {
        let mut builder = ResultMetadataBuilder::default();
        let md = builder.apply(CameraMetadata::new().with(
            MetadataTag::StatisticsLensShadingMapMode,
            lens_shading_map_mode::ON,
        ));
        match md.get(MetadataTag::StatisticsLensShadingMap) {
            Some(MetadataValue::Floats(map)) => assert_eq!(map.len(), 48),
            other => panic!("unexpected lens shading map: {:?}", other),
        }
    }
}
