//! Synthetic image data
//!
//! Stands in for what a host-side virtual scene renders, so captures can be
//! checked offline without a host.

use crate::types::{PixelFormat, Size};

/// RGBA gradient that shifts with `frame_number` (R by column, G by row, B by both)
pub fn synthetic_rgba_frame(frame_number: u64, size: Size) -> Vec<u8> {
    let width = usize::from(size.width);
    let height = usize::from(size.height);
    let mut data = vec![0u8; width * height * 4];

    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) * 4;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
            data[idx + 3] = 0xff;
        }
    }

    data
}

/// Planar I420 frame: a luma ramp over neutral chroma
pub fn synthetic_i420_frame(frame_number: u64, size: Size) -> Vec<u8> {
    let width = usize::from(size.width);
    let height = usize::from(size.height);
    let len = PixelFormat::Ycbcr420_888.buffer_len(size).unwrap_or(0);
    let mut data = vec![128u8; len];

    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            data[y * width + x] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }

    data
}

/// Frame content for a surface of `format`, if the host can render that format
pub fn synthetic_frame(frame_number: u64, size: Size, format: PixelFormat) -> Option<Vec<u8>> {
    match format {
        PixelFormat::Rgba8888 => Some(synthetic_rgba_frame(frame_number, size)),
        PixelFormat::Ycbcr420_888 => Some(synthetic_i420_frame(frame_number, size)),
        _ => None,
    }
}
