//! Heap-backed surface provider
//!
//! Stands in for the platform gralloc: surfaces live in a table keyed by id, locks
//! hand out copies, and dirty views are committed back on unlock. Counters and
//! fault switches make resource accounting observable from tests.

use super::{BufferProvider, MappedView, SurfaceId, YcbcrLayout};
use crate::errors::CameraError;
use crate::types::{BufferUsage, PixelFormat, Size};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

// host references are page aligned offsets into guest memory
const HOST_PAGE_SHIFT: u32 = 12;

#[derive(Debug)]
struct Surface {
    size: Size,
    format: PixelFormat,
    usage: BufferUsage,
    data: Vec<u8>,
    locked: bool,
}

#[derive(Debug)]
pub struct MemoryBufferProvider {
    surfaces: Mutex<HashMap<SurfaceId, Surface>>,
    next_id: AtomicU64,
    allocations: AtomicUsize,
    frees: AtomicUsize,
    fail_allocations: AtomicBool,
    fail_locks: AtomicBool,
}

impl Default for MemoryBufferProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBufferProvider {
    pub fn new() -> Self {
        Self {
            surfaces: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            allocations: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            fail_allocations: AtomicBool::new(false),
            fail_locks: AtomicBool::new(false),
        }
    }

    /// Allocate a BLOB surface of `len` bytes, as the client does for JPEG streams.
    pub fn allocate_blob(&self, len: usize) -> Result<SurfaceId, CameraError> {
        self.insert(Size::new(0, 0), PixelFormat::Blob, BufferUsage::NONE, len)
    }

    /// Overwrite the start of a surface. Returns false if the surface is unknown.
    pub fn write_surface(&self, surface: SurfaceId, bytes: &[u8]) -> bool {
        let Ok(mut surfaces) = self.surfaces.lock() else {
            return false;
        };
        match surfaces.get_mut(&surface) {
            Some(s) => {
                let n = bytes.len().min(s.data.len());
                s.data[..n].copy_from_slice(&bytes[..n]);
                true
            }
            None => false,
        }
    }

    pub fn read_surface(&self, surface: SurfaceId) -> Option<Vec<u8>> {
        let surfaces = self.surfaces.lock().ok()?;
        surfaces.get(&surface).map(|s| s.data.clone())
    }

    /// Size and format a surface was allocated with
    pub fn describe(&self, surface: SurfaceId) -> Option<(Size, PixelFormat)> {
        let surfaces = self.surfaces.lock().ok()?;
        surfaces.get(&surface).map(|s| (s.size, s.format))
    }

    /// Reverse of [`BufferProvider::host_reference`]
    pub fn surface_for_reference(&self, reference: u64) -> Option<SurfaceId> {
        let id = SurfaceId(reference >> HOST_PAGE_SHIFT);
        let surfaces = self.surfaces.lock().ok()?;
        surfaces.contains_key(&id).then_some(id)
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn free_count(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_locks(&self, fail: bool) {
        self.fail_locks.store(fail, Ordering::SeqCst);
    }

    fn insert(
        &self,
        size: Size,
        format: PixelFormat,
        usage: BufferUsage,
        len: usize,
    ) -> Result<SurfaceId, CameraError> {
        if self.fail_allocations.load(Ordering::SeqCst) {
            return Err(CameraError::BufferError(format!(
                "Allocation of {} {} surface refused",
                size, format
            )));
        }

        let id = SurfaceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut surfaces = self
            .surfaces
            .lock()
            .map_err(|_| CameraError::BufferError("Failed to lock surface table".to_string()))?;
        surfaces.insert(
            id,
            Surface {
                size,
                format,
                usage,
                data: vec![0; len],
                locked: false,
            },
        );
        self.allocations.fetch_add(1, Ordering::SeqCst);

        Ok(id)
    }

    fn map(&self, surface: SurfaceId, planar: bool) -> Result<MappedView, CameraError> {
        if self.fail_locks.load(Ordering::SeqCst) {
            return Err(CameraError::BufferError(format!("Failed to lock {}", surface)));
        }

        let mut surfaces = self
            .surfaces
            .lock()
            .map_err(|_| CameraError::BufferError("Failed to lock surface table".to_string()))?;
        let s = surfaces
            .get_mut(&surface)
            .ok_or_else(|| CameraError::BufferError(format!("Unknown {}", surface)))?;

        if s.locked {
            return Err(CameraError::BufferError(format!("{} is already locked", surface)));
        }

        let planes = if planar {
            if s.format != PixelFormat::Ycbcr420_888 {
                return Err(CameraError::BufferError(format!(
                    "{} is {}, not planar YCbCr",
                    surface, s.format
                )));
            }
            Some(YcbcrLayout::i420(s.size))
        } else {
            None
        };

        s.locked = true;
        Ok(MappedView::new(surface, s.size, s.format, s.data.clone(), planes))
    }
}

impl BufferProvider for MemoryBufferProvider {
    fn allocate(
        &self,
        size: Size,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> Result<SurfaceId, CameraError> {
        let len = format.buffer_len(size).ok_or_else(|| {
            CameraError::BufferError(format!("Cannot size a {} surface from dimensions", format))
        })?;
        self.insert(size, format, usage, len)
    }

    fn lock(&self, surface: SurfaceId, _usage: BufferUsage) -> Result<MappedView, CameraError> {
        self.map(surface, false)
    }

    fn lock_planar(
        &self,
        surface: SurfaceId,
        _usage: BufferUsage,
    ) -> Result<MappedView, CameraError> {
        self.map(surface, true)
    }

    fn unlock(&self, view: MappedView) {
        let Ok(mut surfaces) = self.surfaces.lock() else {
            log::error!("surface table poisoned, dropping view of {}", view.surface());
            return;
        };

        match surfaces.get_mut(&view.surface()) {
            Some(s) => {
                s.locked = false;
                if view.is_dirty() {
                    s.data = view.into_data();
                }
            }
            None => log::warn!("unlock of freed {}", view.surface()),
        }
    }

    fn free(&self, surface: SurfaceId) {
        let removed = match self.surfaces.lock() {
            Ok(mut surfaces) => surfaces.remove(&surface),
            Err(_) => None,
        };

        match removed {
            Some(s) => {
                if s.locked {
                    log::warn!("{} ({:?}) freed while locked", surface, s.usage);
                }
                self.frees.fetch_add(1, Ordering::SeqCst);
            }
            None => log::warn!("free of unknown {}", surface),
        }
    }

    fn host_reference(&self, surface: SurfaceId) -> Option<u64> {
        let surfaces = self.surfaces.lock().ok()?;
        surfaces
            .contains_key(&surface)
            .then_some(surface.0 << HOST_PAGE_SHIFT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_free_are_counted() {
        let provider = MemoryBufferProvider::new();
        let id = provider
            .allocate(Size::new(4, 4), PixelFormat::Rgba8888, BufferUsage::CPU_WRITE_OFTEN)
            .unwrap();
        assert_eq!(provider.read_surface(id).map(|d| d.len()), Some(64));
        assert_eq!(provider.allocation_count(), 1);

        provider.free(id);
        provider.free(id);
        assert_eq!(provider.free_count(), 1);
        assert_eq!(provider.live_surfaces(), 0);
    }

    #[test]
    fn test_clean_unlock_keeps_host_writes() {
        let provider = MemoryBufferProvider::new();
        let id = provider
            .allocate(Size::new(1, 1), PixelFormat::Rgba8888, BufferUsage::NONE)
            .unwrap();

        let view = provider.lock(id, BufferUsage::CPU_READ_OFTEN).unwrap();
        // host fills the memory while the guest holds the mapping
        assert!(provider.write_surface(id, &[1, 2, 3, 4]));
        provider.unlock(view);
        assert_eq!(provider.read_surface(id), Some(vec![1, 2, 3, 4]));

        let mut view = provider.lock(id, BufferUsage::CPU_WRITE_OFTEN).unwrap();
        view.data_mut().copy_from_slice(&[9, 9, 9, 9]);
        provider.unlock(view);
        assert_eq!(provider.read_surface(id), Some(vec![9, 9, 9, 9]));
    }

    #[test]
    fn test_double_lock_is_refused() {
        let provider = MemoryBufferProvider::new();
        let id = provider.allocate_blob(16).unwrap();
        let view = provider.lock(id, BufferUsage::NONE).unwrap();
        assert!(provider.lock(id, BufferUsage::NONE).is_err());
        provider.unlock(view);
        assert!(provider.lock(id, BufferUsage::NONE).is_ok());
    }

    #[test]
    fn test_planar_lock_requires_ycbcr() {
        let provider = MemoryBufferProvider::new();
        let rgba = provider
            .allocate(Size::new(2, 2), PixelFormat::Rgba8888, BufferUsage::NONE)
            .unwrap();
        assert!(provider.lock_planar(rgba, BufferUsage::NONE).is_err());

        let yuv = provider
            .allocate(Size::new(2, 2), PixelFormat::Ycbcr420_888, BufferUsage::NONE)
            .unwrap();
        let view = provider.lock_planar(yuv, BufferUsage::NONE).unwrap();
        assert_eq!(view.planes().map(|p| p.cr_offset), Some(5));
    }

    #[test]
    fn test_host_reference_roundtrip() {
        let provider = MemoryBufferProvider::new();
        let id = provider.allocate_blob(8).unwrap();
        let reference = provider.host_reference(id).unwrap();
        assert_eq!(reference % 4096, 0);
        assert_eq!(provider.surface_for_reference(reference), Some(id));
        assert_eq!(provider.surface_for_reference(reference + (1 << 20)), None);
    }

    #[test]
    fn test_fault_injection() {
        let provider = MemoryBufferProvider::new();
        provider.set_fail_allocations(true);
        assert!(provider
            .allocate(Size::new(2, 2), PixelFormat::Rgba8888, BufferUsage::NONE)
            .is_err());
        provider.set_fail_allocations(false);

        let id = provider.allocate_blob(4).unwrap();
        provider.set_fail_locks(true);
        assert!(provider.lock(id, BufferUsage::NONE).is_err());
    }
}
