//! Batched capture protocol
//!
//! All buffers of a request go out in a single `capture` command. Passthrough
//! buffers are reported as soon as the host answers; synthesized ones come back
//! as deferred completions on success and are all resolved as failed otherwise.

use super::deferred::{DeferredCompletion, DeferredKind};
use super::{CaptureContext, CaptureResult};
use crate::buffer::CachedStreamBuffer;
use crate::host::{CaptureTarget, HostCommand};
use crate::stream::StreamRegistry;
use crate::types::{BufferUsage, PixelFormat};
use std::time::Duration;

pub(crate) fn capture_frames(
    ctx: &mut CaptureContext<'_>,
    streams: &StreamRegistry,
    buffers: Vec<CachedStreamBuffer>,
    fence_timeout: Duration,
    result: &mut CaptureResult,
) {
    let mut targets = Vec::with_capacity(buffers.len());
    let mut immediate = Vec::new();
    let mut pending = Vec::new();

    for mut buffer in buffers {
        let Some(stream) = streams.resolve(&mut buffer) else {
            log::error!(
                "could not find stream {} for buffer {}",
                buffer.stream_id(),
                buffer.buffer_id()
            );
            result.outcomes.push(buffer.finish(false));
            continue;
        };

        let kind = match stream.pixel_format {
            PixelFormat::Ycbcr420_888 | PixelFormat::Rgba8888 => {
                match ctx.provider.host_reference(buffer.surface()) {
                    Some(host_ref) => {
                        targets.push(CaptureTarget {
                            stream_id: stream.id,
                            host_ref,
                        });
                        immediate.push(buffer);
                    }
                    None => {
                        log::error!("{} has no host reference", buffer.surface());
                        result.outcomes.push(buffer.finish(false));
                    }
                }
                continue;
            }
            PixelFormat::Raw16 => DeferredKind::Raw,
            PixelFormat::Blob => DeferredKind::Compressed {
                capacity: stream.blob_buffer_size as usize,
            },
            other => {
                log::error!("stream {}: unexpected format {}", stream.id, other);
                result.outcomes.push(buffer.finish(false));
                continue;
            }
        };

        let intermediate = match ctx.provider.allocate(
            stream.size,
            stream.pixel_format.host_format(),
            BufferUsage::CAMERA_OUTPUT | BufferUsage::CPU_READ_OFTEN,
        ) {
            Ok(surface) => surface,
            Err(e) => {
                log::error!("stream {}: no intermediate surface: {}", stream.id, e);
                result.outcomes.push(buffer.finish(false));
                continue;
            }
        };

        let Some(host_ref) = ctx.provider.host_reference(intermediate) else {
            log::error!("{} has no host reference", intermediate);
            ctx.provider.free(intermediate);
            result.outcomes.push(buffer.finish(false));
            continue;
        };

        targets.push(CaptureTarget {
            stream_id: stream.id,
            host_ref,
        });
        pending.push(DeferredCompletion::new(
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

    if targets.is_empty() {
        return;
    }

    let ok = match ctx.channel.query(&HostCommand::Capture(targets)) {
        Ok(_) => true,
        Err(e) => {
            log::warn!("batched capture failed: {}", e);
            false
        }
    };

    result
        .outcomes
        .extend(immediate.into_iter().map(|buffer| buffer.finish(ok)));

    if ok {
        result.deferred.extend(pending);
    } else {
        result
            .outcomes
            .extend(pending.into_iter().map(|completion| completion.resolve(false)));
    }
}
