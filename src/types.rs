//! Core value types shared by the capture pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Image dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u16,
    pub height: u16,
}

impl Size {
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered by this size
    pub fn area(&self) -> usize {
        usize::from(self.width) * usize::from(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<[u16; 2]> for Size {
    fn from(value: [u16; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

/// Graphics pixel formats understood by the pipeline.
///
/// Discriminants match the platform graphics HAL codes, which are also what the
/// batched host protocol expects in `configure` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum PixelFormat {
    Rgba8888 = 0x1,
    Raw16 = 0x20,
    Blob = 0x21,
    ImplementationDefined = 0x22,
    Ycbcr420_888 = 0x23,
}

/// V4L2 fourcc for planar YUV 4:2:0 (`YU12`)
pub const V4L2_PIX_FMT_YUV420: u32 = u32::from_le_bytes(*b"YU12");
/// V4L2 fourcc for 32-bit RGB (`RGB4`)
pub const V4L2_PIX_FMT_RGB32: u32 = u32::from_le_bytes(*b"RGB4");

impl PixelFormat {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x1 => Some(Self::Rgba8888),
            0x20 => Some(Self::Raw16),
            0x21 => Some(Self::Blob),
            0x22 => Some(Self::ImplementationDefined),
            0x23 => Some(Self::Ycbcr420_888),
            _ => None,
        }
    }

    /// Formats the host writes directly into the caller's buffer.
    pub fn is_passthrough(self) -> bool {
        matches!(self, Self::Rgba8888 | Self::Ycbcr420_888)
    }

    /// Format of the surface the host fills for this stream.
    ///
    /// Synthesized formats are captured into an intermediate surface first.
    pub fn host_format(self) -> Self {
        match self {
            Self::Blob => Self::Ycbcr420_888,
            Self::Raw16 => Self::Rgba8888,
            other => other,
        }
    }

    /// V4L2 fourcc used in per-buffer `frame` queries
    pub fn v4l2_fourcc(self) -> Option<u32> {
        match self {
            Self::Ycbcr420_888 => Some(V4L2_PIX_FMT_YUV420),
            Self::Rgba8888 => Some(V4L2_PIX_FMT_RGB32),
            _ => None,
        }
    }

    /// Bytes needed to hold one image of `size` in this format.
    ///
    /// Blob buffers are sized by their stream's blob capacity instead, so this
    /// returns `None` for them.
    pub fn buffer_len(self, size: Size) -> Option<usize> {
        let area = size.area();
        match self {
            Self::Rgba8888 => Some(area * 4),
            Self::Raw16 => Some(area * 2),
            Self::Ycbcr420_888 => {
                let chroma =
                    usize::from(size.width.div_ceil(2)) * usize::from(size.height.div_ceil(2));
                Some(area + 2 * chroma)
            }
            Self::Blob | Self::ImplementationDefined => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgba8888 => "RGBA_8888",
            Self::Raw16 => "RAW16",
            Self::Blob => "BLOB",
            Self::ImplementationDefined => "IMPLEMENTATION_DEFINED",
            Self::Ycbcr420_888 => "YCBCR_420_888",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RGBA" | "RGBA_8888" => Ok(Self::Rgba8888),
            "RAW16" => Ok(Self::Raw16),
            "BLOB" | "JPEG" => Ok(Self::Blob),
            "YUV" | "YCBCR_420_888" => Ok(Self::Ycbcr420_888),
            "IMPLEMENTATION_DEFINED" | "PRIVATE" => Ok(Self::ImplementationDefined),
            other => Err(format!("unknown pixel format: {other}")),
        }
    }
}

/// Color space tag attached to a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dataspace {
    #[default]
    Unknown,
    Jfif,
    SrgbLinear,
}

/// Gralloc-style buffer usage bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BufferUsage(pub u64);

impl BufferUsage {
    pub const NONE: Self = Self(0);
    pub const CPU_READ_OFTEN: Self = Self(0x3);
    pub const CPU_WRITE_OFTEN: Self = Self(0x3 << 4);
    pub const VIDEO_ENCODER: Self = Self(1 << 16);
    pub const CAMERA_OUTPUT: Self = Self(1 << 17);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Signed rational as carried in camera metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub numerator: i32,
    pub denominator: i32,
}

impl Rational {
    pub const fn new(numerator: i32, denominator: i32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }
}

/// Templates a client can ask default request settings for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestTemplate {
    Preview,
    StillCapture,
    VideoRecord,
    VideoSnapshot,
    ZeroShutterLag,
    Manual,
}
