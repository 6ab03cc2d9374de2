//! Property-based tests for the capture pipeline
//!
//! These tests verify buffer accounting, autofocus behaviour and host command
//! grammar using proptest for input generation and shrinking.
//!
//! Run with: cargo test --test pipeline_props

use guestcam::buffer::{AcquireFence, BufferProvider, CachedStreamBuffer, MemoryBufferProvider};
use guestcam::camera::{default_request, ProtocolStrategy, StreamConfig, VirtualCamera};
use guestcam::config::GuestCamConfig;
use guestcam::host::{format_g, HostCommand};
use guestcam::metadata::{AfMode, AfState, AfStateMachine, AfTrigger};
use guestcam::testing::ScriptedHost;
use guestcam::types::{BufferUsage, PixelFormat, RequestTemplate, Size};
use proptest::prelude::*;
use std::sync::Arc;

const SIZE: Size = Size::new(16, 8);
const BLOB_CAPACITY: usize = 16 * 1024;

const FORMATS: [PixelFormat; 4] = [
    PixelFormat::Rgba8888,
    PixelFormat::Ycbcr420_888,
    PixelFormat::Raw16,
    PixelFormat::Blob,
];

fn camera(strategy: ProtocolStrategy) -> (VirtualCamera, ScriptedHost, Arc<MemoryBufferProvider>) {
    let provider = Arc::new(MemoryBufferProvider::new());
    let host = ScriptedHost::new().with_provider(provider.clone());
    let mut camera = VirtualCamera::new(
        GuestCamConfig::default().camera_parameters(),
        strategy,
        Arc::new(host.clone()),
        provider.clone(),
    );

    let streams: Vec<StreamConfig> = FORMATS
        .iter()
        .enumerate()
        .map(|(id, format)| {
            StreamConfig::new(id as i32, SIZE, *format).with_buffer_size(BLOB_CAPACITY as u32)
        })
        .collect();
    camera
        .configure(&default_request(RequestTemplate::StillCapture), &streams)
        .unwrap();
    (camera, host, provider)
}

/// Buffers for the given stream ids; ids past the configured set are unknown streams.
fn buffers(provider: &MemoryBufferProvider, stream_ids: &[usize]) -> Vec<CachedStreamBuffer> {
    stream_ids
        .iter()
        .enumerate()
        .map(|(i, &stream)| {
            let format = FORMATS.get(stream).copied().unwrap_or(PixelFormat::Rgba8888);
            let surface = if format == PixelFormat::Blob {
                provider.allocate_blob(BLOB_CAPACITY)
            } else {
                provider.allocate(SIZE, format, BufferUsage::CPU_WRITE_OFTEN)
            }
            .unwrap();
            CachedStreamBuffer::new(i as u64, stream as i32, surface, AcquireFence::signaled())
        })
        .collect()
}

fn protocol() -> impl Strategy<Value = ProtocolStrategy> {
    prop_oneof![Just(ProtocolStrategy::PerBuffer), Just(ProtocolStrategy::Batched)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// INVARIANT: every buffer comes back exactly once, immediately or deferred
    #[test]
    fn every_buffer_is_accounted_for(
        strategy in protocol(),
        stream_ids in prop::collection::vec(0usize..6, 0..8),
        host_fails in any::<bool>(),
    ) {
        let (mut camera, host, provider) = camera(strategy);
        if host_fails {
            host.reject("frame");
            host.reject("capture");
        }
        let input = buffers(&provider, &stream_ids);
        let count = input.len();

        let result = camera.process_capture_request(None, input);
        prop_assert_eq!(result.buffer_count(), count);

        let mut ids: Vec<u64> = result.complete(true).iter().map(|o| o.buffer_id()).collect();
        ids.sort_unstable();
        prop_assert_eq!(ids, (0..count as u64).collect::<Vec<_>>());
    }

    /// INVARIANT: intermediate surfaces never outlive their completion
    #[test]
    fn intermediates_are_freed(
        strategy in protocol(),
        stream_ids in prop::collection::vec(0usize..4, 1..8),
        resolve_ok in any::<bool>(),
    ) {
        let (mut camera, _host, provider) = camera(strategy);
        let input = buffers(&provider, &stream_ids);
        let allocated = provider.allocation_count();

        let result = camera.process_capture_request(None, input);
        let deferred = result.deferred.len();
        let _ = result.complete(resolve_ok);

        prop_assert_eq!(provider.allocation_count() - allocated, deferred);
        prop_assert_eq!(provider.free_count(), deferred);
        prop_assert_eq!(provider.live_surfaces(), stream_ids.len());
    }

    /// INVARIANT: a failed batched capture fails every participating buffer
    #[test]
    fn failed_batch_fails_everything(
        stream_ids in prop::collection::vec(0usize..4, 1..8),
    ) {
        let (mut camera, host, provider) = camera(ProtocolStrategy::Batched);
        host.reject("capture");

        let result = camera.process_capture_request(None, buffers(&provider, &stream_ids));
        prop_assert!(result.deferred.is_empty());
        prop_assert!(result.outcomes.iter().all(|o| !o.success()));
    }

    /// INVARIANT: a continuous scan settles and stays settled
    #[test]
    fn continuous_focus_converges(
        steps in 1u32..300,
        min in 0.0f32..5.0,
        span in 0.1f32..5.0,
    ) {
        let mut af = AfStateMachine::new(steps, min, min + span);
        let mut state = af.evaluate(AfMode::ContinuousPicture, AfTrigger::Idle).0;
        for _ in 0..=steps + 1 {
            state = af.reevaluate().0;
        }
        prop_assert_eq!(state, AfState::PassiveFocused);

        let (again, distance) = af.reevaluate();
        prop_assert_eq!(again, AfState::PassiveFocused);
        prop_assert!(distance >= min && distance <= min + span);
    }

    /// INVARIANT: the host parses every command the guest formats
    #[test]
    fn frame_commands_parse_back(
        width in 1u16..4096,
        height in 1u16..4096,
        offset in any::<u32>(),
        exposure in -64.0f32..64.0,
    ) {
        let command = HostCommand::Frame {
            size: Size::new(width, height),
            fourcc: PixelFormat::Ycbcr420_888.v4l2_fourcc().unwrap(),
            offset: u64::from(offset) << 12,
            exposure_comp: exposure,
        };
        let text = command.to_string();
        let parsed: HostCommand = text.parse().unwrap();
        prop_assert_eq!(parsed.to_string(), text);
    }

    /// INVARIANT: %g output never carries trailing zeros in the mantissa
    #[test]
    fn format_g_is_trimmed(value in -1.0e9f64..1.0e9) {
        let text = format_g(value);
        let mantissa = text.split('e').next().unwrap();
        if mantissa.contains('.') {
            prop_assert!(!mantissa.ends_with('0') && !mantissa.ends_with('.'));
        }
        prop_assert!(text.parse::<f64>().is_ok());
    }
}
