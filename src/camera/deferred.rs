//! Deferred buffer completions
//!
//! RAW16 and BLOB buffers are synthesized from an intermediate surface the host
//! fills. Their result is only known once the caller learns whether the host
//! round trip succeeded, so they are handed back as [`DeferredCompletion`]s and
//! resolved exactly once later, possibly on another thread.

use crate::buffer::{BufferProvider, CachedStreamBuffer, CaptureOutcome, SurfaceId};
use crate::metadata::CameraMetadata;
use crate::transform::PixelTransforms;
use crate::types::{BufferUsage, Size};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredKind {
    /// RAW16 from an RGBA intermediate
    Raw,
    /// JPEG from a YCbCr intermediate into a blob of `capacity` bytes
    Compressed { capacity: usize },
}

/// Owns an intermediate surface and frees it exactly once.
struct Intermediate {
    surface: Option<SurfaceId>,
    provider: Arc<dyn BufferProvider>,
}

impl Intermediate {
    fn id(&self) -> Option<SurfaceId> {
        self.surface
    }

    fn release(mut self) {
        if let Some(surface) = self.surface.take() {
            self.provider.free(surface);
        }
    }
}

impl Drop for Intermediate {
    fn drop(&mut self) {
        if let Some(surface) = self.surface.take() {
            log::warn!("deferred completion dropped unresolved, freeing {}", surface);
            self.provider.free(surface);
        }
    }
}

/// A buffer whose outcome is decided by a later `resolve`
pub struct DeferredCompletion {
    kind: DeferredKind,
    buffer: CachedStreamBuffer,
    intermediate: Intermediate,
    size: Size,
    metadata: CameraMetadata,
    fence_timeout: Duration,
    transforms: Arc<dyn PixelTransforms>,
}

impl DeferredCompletion {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kind: DeferredKind,
        buffer: CachedStreamBuffer,
        intermediate: SurfaceId,
        size: Size,
        metadata: CameraMetadata,
        fence_timeout: Duration,
        provider: Arc<dyn BufferProvider>,
        transforms: Arc<dyn PixelTransforms>,
    ) -> Self {
        Self {
            kind,
            buffer,
            intermediate: Intermediate {
                surface: Some(intermediate),
                provider,
            },
            size,
            metadata,
            fence_timeout,
            transforms,
        }
    }

    pub fn kind(&self) -> DeferredKind {
        self.kind
    }

    pub fn buffer_id(&self) -> u64 {
        self.buffer.buffer_id()
    }

    pub fn stream_id(&self) -> i32 {
        self.buffer.stream_id()
    }

    pub fn fence_timeout(&self) -> Duration {
        self.fence_timeout
    }

    /// Metadata captured when the request was issued (JPEG quality, orientation)
    pub fn metadata(&self) -> &CameraMetadata {
        &self.metadata
    }

    /// Finish the buffer. `ok` tells whether the host filled the intermediate.
    ///
    /// The intermediate surface is freed on every path.
    pub fn resolve(self, ok: bool) -> CaptureOutcome {
        let Self {
            kind,
            mut buffer,
            intermediate,
            size,
            metadata,
            fence_timeout,
            transforms,
        } = self;

        let success = ok
            && buffer.wait_acquire_fence(fence_timeout)
            && synthesize(
                kind,
                &buffer,
                &intermediate,
                size,
                &metadata,
                transforms.as_ref(),
            );

        if ok && !success {
            log::warn!(
                "deferred {:?} buffer {} of stream {} failed",
                kind,
                buffer.buffer_id(),
                buffer.stream_id()
            );
        }

        intermediate.release();
        buffer.finish(success)
    }
}

fn synthesize(
    kind: DeferredKind,
    buffer: &CachedStreamBuffer,
    intermediate: &Intermediate,
    size: Size,
    metadata: &CameraMetadata,
    transforms: &dyn PixelTransforms,
) -> bool {
    let Some(source_id) = intermediate.id() else {
        return false;
    };
    let provider = intermediate.provider.as_ref();

    let source = match kind {
        DeferredKind::Raw => provider.lock(source_id, BufferUsage::CPU_READ_OFTEN),
        DeferredKind::Compressed { .. } => {
            provider.lock_planar(source_id, BufferUsage::CPU_READ_OFTEN)
        }
    };
    let source = match source {
        Ok(view) => view,
        Err(e) => {
            log::error!("cannot map intermediate {}: {}", source_id, e);
            return false;
        }
    };

    let mut destination = match provider.lock(buffer.surface(), BufferUsage::CPU_WRITE_OFTEN) {
        Ok(view) => view,
        Err(e) => {
            log::error!("cannot map output {}: {}", buffer.surface(), e);
            provider.unlock(source);
            return false;
        }
    };

    let success = match kind {
        DeferredKind::Raw => transforms.convert_to_raw16(size, &source, &mut destination),
        DeferredKind::Compressed { capacity } => {
            transforms.compress(size, &source, metadata, &mut destination, capacity)
        }
    };

    provider.unlock(destination);
    provider.unlock(source);
    success
}

impl std::fmt::Debug for DeferredCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCompletion")
            .field("kind", &self.kind)
            .field("buffer_id", &self.buffer.buffer_id())
            .field("stream_id", &self.buffer.stream_id())
            .field("intermediate", &self.intermediate.id())
            .field("size", &self.size)
            .field("fence_timeout", &self.fence_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{fence_pair, AcquireFence, MemoryBufferProvider};
    use crate::transform::{blob_jpeg_size, ImageTransforms};
    use crate::types::PixelFormat;

    fn raw_completion(
        provider: &Arc<MemoryBufferProvider>,
        fence: AcquireFence,
    ) -> (DeferredCompletion, SurfaceId) {
        let size = Size::new(4, 4);
        let output = provider
            .allocate(size, PixelFormat::Raw16, BufferUsage::NONE)
            .unwrap();
        let intermediate = provider
            .allocate(size, PixelFormat::Rgba8888, BufferUsage::NONE)
            .unwrap();
        provider.write_surface(intermediate, &[200; 64]);

        let completion = DeferredCompletion::new(
            DeferredKind::Raw,
            CachedStreamBuffer::new(1, 2, output, fence),
            intermediate,
            size,
            CameraMetadata::new(),
            Duration::from_millis(10),
            provider.clone(),
            Arc::new(ImageTransforms),
        );
        (completion, output)
    }

    #[test]
    fn test_resolve_ok_converts_and_frees() {
        let provider = Arc::new(MemoryBufferProvider::new());
        let (completion, output) = raw_completion(&provider, AcquireFence::signaled());

        let outcome = completion.resolve(true);
        assert!(outcome.success());
        assert_eq!(provider.free_count(), 1);

        let raw = provider.read_surface(output).unwrap();
        assert_eq!(u16::from_le_bytes([raw[0], raw[1]]), (200 << 2) | (200 >> 6));
    }

    #[test]
    fn test_resolve_false_skips_work_but_frees() {
        let provider = Arc::new(MemoryBufferProvider::new());
        let (completion, output) = raw_completion(&provider, AcquireFence::signaled());

        assert!(!completion.resolve(false).success());
        assert_eq!(provider.free_count(), 1);
        assert!(provider.read_surface(output).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_fence_timeout_at_resolve_fails_and_frees() {
        let provider = Arc::new(MemoryBufferProvider::new());
        let (_signaler, fence) = fence_pair();
        let (completion, _) = raw_completion(&provider, fence);

        let outcome = completion.resolve(true);
        assert!(!outcome.success());
        assert!(outcome.release_fence().is_some());
        assert_eq!(provider.free_count(), 1);
    }

    #[test]
    fn test_mapping_failure_still_frees() {
        let provider = Arc::new(MemoryBufferProvider::new());
        let (completion, _) = raw_completion(&provider, AcquireFence::signaled());
        provider.set_fail_locks(true);

        assert!(!completion.resolve(true).success());
        assert_eq!(provider.free_count(), 1);
    }

    #[test]
    fn test_drop_without_resolve_frees() {
        let provider = Arc::new(MemoryBufferProvider::new());
        let (completion, _) = raw_completion(&provider, AcquireFence::signaled());
        drop(completion);
        assert_eq!(provider.free_count(), 1);
    }

    #[test]
    fn test_compressed_completion_writes_blob() {
        let provider = Arc::new(MemoryBufferProvider::new());
        let size = Size::new(16, 16);
        let capacity = 8192;
        let blob = provider.allocate_blob(capacity).unwrap();
        let intermediate = provider
            .allocate(size, PixelFormat::Ycbcr420_888, BufferUsage::NONE)
            .unwrap();

        let completion = DeferredCompletion::new(
            DeferredKind::Compressed { capacity },
            CachedStreamBuffer::new(9, 1, blob, AcquireFence::signaled()),
            intermediate,
            size,
            CameraMetadata::new(),
            Duration::from_millis(10),
            provider.clone(),
            Arc::new(ImageTransforms),
        );

        let handle = std::thread::spawn(move || completion.resolve(true));
        let outcome = handle.join().unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.buffer_id(), 9);

        let data = provider.read_surface(blob).unwrap();
        assert!(blob_jpeg_size(&data, capacity).unwrap() > 0);
        assert_eq!(provider.live_surfaces(), 1);
    }
}
