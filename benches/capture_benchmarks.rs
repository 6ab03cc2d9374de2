//! Performance benchmarks for the guestcam capture pipeline
//!
//! Run with: cargo bench
//!
//! The host side is the in-process scripted device, so these numbers cover the
//! guest pipeline (dispatch, locking, synthesis) and not socket latency.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use guestcam::buffer::{AcquireFence, BufferProvider, CachedStreamBuffer, MemoryBufferProvider};
use guestcam::camera::{default_request, ProtocolStrategy, StreamConfig, VirtualCamera};
use guestcam::config::GuestCamConfig;
use guestcam::host::format_g;
use guestcam::testing::ScriptedHost;
use guestcam::types::{BufferUsage, PixelFormat, RequestTemplate, Size};
use std::sync::Arc;
use std::time::Duration;

struct Rig {
    camera: VirtualCamera,
    buffers: Vec<CachedStreamBuffer>,
}

fn rig(strategy: ProtocolStrategy, streams: &[StreamConfig]) -> Rig {
    let provider = Arc::new(MemoryBufferProvider::new());
    let host = ScriptedHost::new().with_provider(provider.clone());
    let params = GuestCamConfig::default().camera_parameters();
    let mut camera = VirtualCamera::new(params, strategy, Arc::new(host), provider.clone());

    let hal = camera
        .configure(&default_request(RequestTemplate::StillCapture), streams)
        .expect("configure");

    let buffers = streams
        .iter()
        .zip(&hal)
        .map(|(s, h)| {
            let surface = if s.format == PixelFormat::Blob {
                provider.allocate_blob(s.buffer_size as usize)
            } else {
                provider.allocate(s.size, h.override_format, BufferUsage::CPU_WRITE_OFTEN)
            }
            .expect("allocate");
            CachedStreamBuffer::new(surface.0, s.id, surface, AcquireFence::signaled())
        })
        .collect();

    Rig { camera, buffers }
}

fn run_request(rig: &mut Rig) {
    let buffers = std::mem::take(&mut rig.buffers);
    let result = rig.camera.process_capture_request(None, buffers);
    rig.buffers = result
        .complete(true)
        .into_iter()
        .map(|outcome| outcome.into_buffer())
        .collect();
}

fn bench_passthrough_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("Passthrough Dispatch");

    let resolutions = [(320u16, 240u16, "240p"), (640, 480, "480p"), (1280, 720, "720p")];
    for (width, height, name) in resolutions {
        let size = Size::new(width, height);
        group.throughput(Throughput::Bytes((size.area() * 4) as u64));

        for strategy in [ProtocolStrategy::PerBuffer, ProtocolStrategy::Batched] {
            let mut rig = rig(strategy, &[StreamConfig::new(0, size, PixelFormat::Rgba8888)]);
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", strategy), name),
                &size,
                |b, _| b.iter(|| run_request(black_box(&mut rig))),
            );
        }
    }

    group.finish();
}

fn bench_synthesized_streams(c: &mut Criterion) {
    let mut group = c.benchmark_group("Synthesized Streams");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    let size = Size::new(640, 480);
    let raw = StreamConfig::new(1, size, PixelFormat::Raw16);
    let blob = StreamConfig::new(2, size, PixelFormat::Blob).with_buffer_size(512 * 1024);

    let mut raw_rig = rig(ProtocolStrategy::Batched, &[raw]);
    group.bench_function("raw16_480p", |b| b.iter(|| run_request(black_box(&mut raw_rig))));

    let mut jpeg_rig = rig(ProtocolStrategy::Batched, &[blob]);
    group.bench_function("jpeg_480p", |b| b.iter(|| run_request(black_box(&mut jpeg_rig))));

    group.finish();
}

fn bench_command_formatting(c: &mut Criterion) {
    c.bench_function("format_g", |b| {
        b.iter(|| {
            for v in [0.0, 1.0, 0.25, 1234567.0, 0.000012345] {
                black_box(format_g(black_box(v)));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_passthrough_dispatch,
    bench_synthesized_streams,
    bench_command_formatting
);
criterion_main!(benches);
