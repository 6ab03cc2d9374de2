//! Pixel transforms for synthesized stream formats
//!
//! RAW16 is produced from an RGBA capture by sampling an RGGB Bayer mosaic, BLOB
//! (JPEG) by converting a planar YCbCr 4:2:0 capture to RGB and compressing it.

use crate::buffer::{MappedView, YcbcrLayout};
use crate::metadata::{CameraMetadata, MetadataTag};
use crate::types::Size;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};

/// `CameraBlobId::JPEG`
pub const JPEG_BLOB_ID: i32 = 0x00FF;
/// Bytes taken by the blob trailer at the end of a JPEG buffer
pub const BLOB_TRAILER_LEN: usize = 8;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

pub trait PixelTransforms: Send + Sync {
    /// Write a little-endian RAW16 Bayer image of `size` into `dst`.
    fn convert_to_raw16(&self, size: Size, rgba: &MappedView, dst: &mut MappedView) -> bool;

    /// Compress a planar YCbCr image into `dst`, which holds `capacity` bytes of
    /// JPEG plus the blob trailer.
    fn compress(
        &self,
        size: Size,
        ycbcr: &MappedView,
        metadata: &CameraMetadata,
        dst: &mut MappedView,
        capacity: usize,
    ) -> bool;
}

/// Reference transforms built on the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageTransforms;

fn expand_to_10bit(c: u8) -> u16 {
    let c = u16::from(c);
    (c << 2) | (c >> 6)
}

/// Full range BT.601 (JFIF) YCbCr to RGB
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = i32::from(y);
    let d = i32::from(cb) - 128;
    let e = i32::from(cr) - 128;

    let r = y + ((359 * e + 128) >> 8);
    let g = y - ((88 * d + 183 * e + 128) >> 8);
    let b = y + ((454 * d + 128) >> 8);

    [r.clamp(0, 255) as u8, g.clamp(0, 255) as u8, b.clamp(0, 255) as u8]
}

fn planar_to_rgb(size: Size, data: &[u8], layout: &YcbcrLayout) -> Option<RgbImage> {
    let width = usize::from(size.width);
    let height = usize::from(size.height);
    let mut rgb = Vec::with_capacity(width * height * 3);

    for row in 0..height {
        for col in 0..width {
            let chroma = (row / 2) * layout.c_stride + (col / 2) * layout.chroma_step;
            let y = *data.get(layout.y_offset + row * layout.y_stride + col)?;
            let cb = *data.get(layout.cb_offset + chroma)?;
            let cr = *data.get(layout.cr_offset + chroma)?;
            rgb.extend_from_slice(&ycbcr_to_rgb(y, cb, cr));
        }
    }

    RgbImage::from_vec(u32::from(size.width), u32::from(size.height), rgb)
}

fn orient(image: DynamicImage, degrees: i32) -> DynamicImage {
    match degrees.rem_euclid(360) {
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        _ => image,
    }
}

impl PixelTransforms for ImageTransforms {
    fn convert_to_raw16(&self, size: Size, rgba: &MappedView, dst: &mut MappedView) -> bool {
        let width = usize::from(size.width);
        let area = size.area();
        let src = rgba.data();
        let out = dst.data_mut();

        if src.len() < area * 4 || out.len() < area * 2 {
            log::error!(
                "RAW16 conversion of {} needs {} source and {} destination bytes, got {} and {}",
                size,
                area * 4,
                area * 2,
                src.len(),
                out.len()
            );
            return false;
        }

        for (i, px) in src.chunks_exact(4).take(area).enumerate() {
            let (row, col) = (i / width, i % width);
            // RGGB
            let channel = match (row % 2, col % 2) {
                (0, 0) => px[0],
                (1, 1) => px[2],
                _ => px[1],
            };
            out[i * 2..i * 2 + 2].copy_from_slice(&expand_to_10bit(channel).to_le_bytes());
        }

        true
    }

    fn compress(
        &self,
        size: Size,
        ycbcr: &MappedView,
        metadata: &CameraMetadata,
        dst: &mut MappedView,
        capacity: usize,
    ) -> bool {
        let Some(layout) = ycbcr.planes() else {
            log::error!("JPEG source {} is not mapped as planar YCbCr", ycbcr.surface());
            return false;
        };
        let Some(rgb) = planar_to_rgb(size, ycbcr.data(), layout) else {
            log::error!("JPEG source {} is too small for {}", ycbcr.surface(), size);
            return false;
        };

        let quality = metadata
            .byte(MetadataTag::JpegQuality)
            .unwrap_or(DEFAULT_JPEG_QUALITY)
            .clamp(1, 100);
        let orientation = metadata.int32(MetadataTag::JpegOrientation).unwrap_or(0);
        let image = orient(DynamicImage::ImageRgb8(rgb), orientation);

        let mut encoded = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut encoded, quality);
        if let Err(e) = image.write_with_encoder(encoder) {
            log::error!("JPEG encoding failed: {}", e);
            return false;
        }

        let capacity = capacity.min(dst.data().len());
        if capacity < BLOB_TRAILER_LEN || encoded.len() > capacity - BLOB_TRAILER_LEN {
            log::error!(
                "JPEG of {} bytes does not fit a {} byte blob buffer",
                encoded.len(),
                capacity
            );
            return false;
        }

        let out = dst.data_mut();
        out[..encoded.len()].copy_from_slice(&encoded);

        let trailer = capacity - BLOB_TRAILER_LEN;
        out[trailer..trailer + 4].copy_from_slice(&JPEG_BLOB_ID.to_le_bytes());
        out[trailer + 4..capacity].copy_from_slice(&(encoded.len() as i32).to_le_bytes());

        log::debug!("compressed {} to {} bytes at quality {}", size, encoded.len(), quality);
        true
    }
}

/// Read back the JPEG length recorded in a blob trailer.
pub fn blob_jpeg_size(blob: &[u8], capacity: usize) -> Option<usize> {
    let capacity = capacity.min(blob.len());
    let trailer = blob.get(capacity.checked_sub(BLOB_TRAILER_LEN)?..capacity)?;

    let id = i32::from_le_bytes(trailer[..4].try_into().ok()?);
    let size = i32::from_le_bytes(trailer[4..].try_into().ok()?);
    (id == JPEG_BLOB_ID && size >= 0).then_some(size as usize)
}
