//! Per-buffer capture protocol
//!
//! Every buffer costs one `frame` query. Passthrough formats are filled in place;
//! RAW16 and BLOB are captured into an intermediate surface and completed later.

use super::deferred::{DeferredCompletion, DeferredKind};
use super::{CaptureContext, CaptureResult};
use crate::buffer::{CachedStreamBuffer, SurfaceId};
use crate::host::HostCommand;
use crate::stream::Stream;
use crate::types::{BufferUsage, PixelFormat, Size};
use std::time::Duration;

const NS_PER_MS: i64 = 1_000_000;

pub(crate) fn capture_frame(
    ctx: &mut CaptureContext<'_>,
    stream: &Stream,
    mut buffer: CachedStreamBuffer,
    result: &mut CaptureResult,
) {
    match stream.pixel_format {
        PixelFormat::Ycbcr420_888 | PixelFormat::Rgba8888 => {
            let ok = capture_in_place(ctx, stream, &mut buffer);
            result.outcomes.push(buffer.finish(ok));
        }
        PixelFormat::Raw16 => capture_deferred(ctx, stream, buffer, DeferredKind::Raw, result),
        PixelFormat::Blob => {
            let kind = DeferredKind::Compressed {
                capacity: stream.blob_buffer_size as usize,
            };
            capture_deferred(ctx, stream, buffer, kind, result);
        }
        other => {
            log::error!("stream {}: unexpected format {}", stream.id, other);
            result.outcomes.push(buffer.finish(false));
        }
    }
}

fn capture_in_place(
    ctx: &mut CaptureContext<'_>,
    stream: &Stream,
    buffer: &mut CachedStreamBuffer,
) -> bool {
    let timeout =
        Duration::from_millis((ctx.settings.frame_duration_ns / (2 * NS_PER_MS)).max(0) as u64);
    if !buffer.wait_acquire_fence(timeout) {
        return false;
    }

    let view = if stream.pixel_format == PixelFormat::Ycbcr420_888 {
        ctx.provider.lock_planar(buffer.surface(), BufferUsage::CPU_WRITE_OFTEN)
    } else {
        ctx.provider.lock(buffer.surface(), BufferUsage::CPU_WRITE_OFTEN)
    };
    let view = match view {
        Ok(view) => view,
        Err(e) => {
            log::error!("stream {}: {}", stream.id, e);
            return false;
        }
    };

    let ok = query_frame(ctx, stream.size, stream.pixel_format, buffer.surface());
    ctx.provider.unlock(view);
    ok
}

fn capture_deferred(
    ctx: &mut CaptureContext<'_>,
    stream: &Stream,
    buffer: CachedStreamBuffer,
    kind: DeferredKind,
    result: &mut CaptureResult,
) {
    let host_format = stream.pixel_format.host_format();
    let intermediate = match ctx.provider.allocate(
        stream.size,
        host_format,
        BufferUsage::CAMERA_OUTPUT | BufferUsage::CPU_READ_OFTEN,
    ) {
        Ok(surface) => surface,
        Err(e) => {
            log::error!("stream {}: no intermediate surface: {}", stream.id, e);
            result.outcomes.push(buffer.finish(false));
            return;
        }
    };

    if !query_frame(ctx, stream.size, host_format, intermediate) {
        ctx.provider.free(intermediate);
        result.outcomes.push(buffer.finish(false));
        return;
    }

    let fence_timeout =
        Duration::from_millis((ctx.settings.frame_duration_ns / NS_PER_MS).max(0) as u64);
    result.deferred.push(DeferredCompletion::new(
        kind,
        buffer,
        intermediate,
        stream.size,
        ctx.snapshot.clone(),
        fence_timeout,
        ctx.provider.clone(),
        ctx.transforms.clone(),
    ));
}

fn query_frame(
    ctx: &mut CaptureContext<'_>,
    size: Size,
    format: PixelFormat,
    surface: SurfaceId,
) -> bool {
    let Some(fourcc) = format.v4l2_fourcc() else {
        log::error!("{} cannot be captured directly", format);
        return false;
    };
    let Some(offset) = ctx.provider.host_reference(surface) else {
        log::error!("{} has no host reference", surface);
        return false;
    };

    let command = HostCommand::Frame {
        size,
        fourcc,
        offset,
        exposure_comp: ctx.settings.exposure_comp,
    };

    match ctx.channel.query(&command) {
        Ok(_) => true,
        Err(e) => {
            log::warn!("frame query for {} failed: {}", surface, e);
            false
        }
    }
}
