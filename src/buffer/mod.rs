//! Buffer model: caller-owned stream buffers, the surface provider contract and
//! capture outcomes.

pub mod fence;
pub mod memory;

pub use fence::{fence_pair, AcquireFence, FenceSignaler};
pub use memory::MemoryBufferProvider;

use crate::errors::CameraError;
use crate::stream::Stream;
use crate::types::{BufferUsage, PixelFormat, Size};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Opaque handle of a graphics surface owned by a [`BufferProvider`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Plane layout of a mapped YCbCr 4:2:0 surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YcbcrLayout {
    pub y_offset: usize,
    pub y_stride: usize,
    pub cb_offset: usize,
    pub cr_offset: usize,
    pub c_stride: usize,
    /// Distance between two chroma samples of the same plane
    pub chroma_step: usize,
}

impl YcbcrLayout {
    /// Fully planar I420 layout: Y, then Cb, then Cr.
    pub fn i420(size: Size) -> Self {
        let y_stride = usize::from(size.width);
        let c_stride = usize::from(size.width.div_ceil(2));
        let chroma_len = c_stride * usize::from(size.height.div_ceil(2));
        let cb_offset = size.area();

        Self {
            y_offset: 0,
            y_stride,
            cb_offset,
            cr_offset: cb_offset + chroma_len,
            c_stride,
            chroma_step: 1,
        }
    }
}

/// CPU mapping of a locked surface.
///
/// Reading is free; taking mutable access marks the view dirty and only dirty
/// views are written back on unlock, so data the host placed in the surface while
/// it was locked is not clobbered by a stale copy.
#[derive(Debug)]
pub struct MappedView {
    surface: SurfaceId,
    size: Size,
    format: PixelFormat,
    data: Vec<u8>,
    planes: Option<YcbcrLayout>,
    dirty: bool,
}

impl MappedView {
    pub fn new(
        surface: SurfaceId,
        size: Size,
        format: PixelFormat,
        data: Vec<u8>,
        planes: Option<YcbcrLayout>,
    ) -> Self {
        Self {
            surface,
            size,
            format,
            data,
            planes,
            dirty: false,
        }
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data
    }

    pub fn planes(&self) -> Option<&YcbcrLayout> {
        self.planes.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Graphics buffer allocation and mapping.
///
/// The pipeline only ever talks to surfaces through this trait; a platform build
/// puts its gralloc behind it.
pub trait BufferProvider: Send + Sync {
    fn allocate(
        &self,
        size: Size,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> Result<SurfaceId, CameraError>;

    fn lock(&self, surface: SurfaceId, usage: BufferUsage) -> Result<MappedView, CameraError>;

    /// Lock a YCbCr surface and describe its planes.
    fn lock_planar(&self, surface: SurfaceId, usage: BufferUsage)
        -> Result<MappedView, CameraError>;

    fn unlock(&self, view: MappedView);

    fn free(&self, surface: SurfaceId);

    /// Address the host uses to reach the surface memory.
    fn host_reference(&self, surface: SurfaceId) -> Option<u64>;
}

/// A buffer handed in by the caller for one capture request
#[derive(Debug)]
pub struct CachedStreamBuffer {
    buffer_id: u64,
    stream_id: i32,
    surface: SurfaceId,
    acquire_fence: AcquireFence,
    stream: Option<Arc<Stream>>,
}

impl CachedStreamBuffer {
    pub fn new(
        buffer_id: u64,
        stream_id: i32,
        surface: SurfaceId,
        acquire_fence: AcquireFence,
    ) -> Self {
        Self {
            buffer_id,
            stream_id,
            surface,
            acquire_fence,
            stream: None,
        }
    }

    pub fn buffer_id(&self) -> u64 {
        self.buffer_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn cached_stream(&self) -> Option<&Arc<Stream>> {
        self.stream.as_ref()
    }

    pub fn set_cached_stream(&mut self, stream: Arc<Stream>) {
        self.stream = Some(stream);
    }

    pub fn wait_acquire_fence(&mut self, timeout: Duration) -> bool {
        self.acquire_fence.wait(timeout)
    }

    /// Install a fresh acquire fence before submitting the buffer again.
    pub fn rearm(&mut self, fence: AcquireFence) {
        self.acquire_fence = fence;
    }

    /// Report the final result for this buffer.
    pub fn finish(self, success: bool) -> CaptureOutcome {
        CaptureOutcome {
            buffer: self,
            success,
        }
    }
}

/// Final result of one buffer. Produced exactly once per [`CachedStreamBuffer`].
#[derive(Debug)]
pub struct CaptureOutcome {
    buffer: CachedStreamBuffer,
    success: bool,
}

impl CaptureOutcome {
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn buffer_id(&self) -> u64 {
        self.buffer.buffer_id
    }

    pub fn stream_id(&self) -> i32 {
        self.buffer.stream_id
    }

    pub fn surface(&self) -> SurfaceId {
        self.buffer.surface
    }

    /// The acquire fence, when the pipeline returned the buffer without waiting it
    pub fn release_fence(&self) -> Option<&AcquireFence> {
        if self.buffer.acquire_fence.is_signaled() {
            None
        } else {
            Some(&self.buffer.acquire_fence)
        }
    }

    /// Hand the buffer back for reuse in a later request.
    pub fn into_buffer(self) -> CachedStreamBuffer {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i420_layout() {
        let layout = YcbcrLayout::i420(Size::new(4, 2));
        assert_eq!(layout.cb_offset, 8);
        assert_eq!(layout.cr_offset, 10);
        assert_eq!(layout.c_stride, 2);
    }

    #[test]
    fn test_mapped_view_tracks_writes() {
        let mut view = MappedView::new(
            SurfaceId(1),
            Size::new(1, 1),
            PixelFormat::Rgba8888,
            vec![0; 4],
            None,
        );
        assert!(!view.is_dirty());
        let _ = view.data();
        assert!(!view.is_dirty());
        view.data_mut()[0] = 0xff;
        assert!(view.is_dirty());
    }

    #[test]
    fn test_unwaited_fence_becomes_release_fence() {
        let (_signaler, fence) = fence_pair();
        let outcome = CachedStreamBuffer::new(5, 2, SurfaceId(9), fence).finish(false);
        assert!(!outcome.success());
        assert_eq!(outcome.buffer_id(), 5);
        assert!(outcome.release_fence().is_some());

        let waited =
            CachedStreamBuffer::new(6, 2, SurfaceId(9), AcquireFence::signaled()).finish(true);
        assert!(waited.release_fence().is_none());
        assert_eq!(waited.into_buffer().surface(), SurfaceId(9));
    }
}
