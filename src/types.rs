//! Common types used throughout deskpipe

use crate::error::{Error, Result};

use ffmpeg_next::format::Pixel;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::str::FromStr;

/// Maximum number of planes a frame can carry (FFmpeg's `AV_NUM_DATA_POINTERS`)
pub const MAX_PLANES: usize = 8;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    // Common resolutions
    pub const HD_720P: Self = Self::new(1280, 720);
    pub const FHD_1080P: Self = Self::new(1920, 1080);
    pub const QHD_1440P: Self = Self::new(2560, 1440);
    pub const UHD_4K: Self = Self::new(3840, 2160);

    /// Calculate total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Both dimensions are even (required by 4:2:0 encoders)
    pub fn is_even(&self) -> bool {
        self.width % 2 == 0 && self.height % 2 == 0
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::FHD_1080P
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| Error::Config(format!("resolution '{}' is not WIDTHxHEIGHT", s)))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("bad width in '{}'", s)))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("bad height in '{}'", s)))?;
        Ok(Self::new(width, height))
    }
}

/// Pixel format of a raw frame
///
/// The discriminants are the stable raw tags used on the flat C surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0 (Y, U, V)
    Yuv420p = 0,
    /// Semi-planar YUV 4:2:0 (Y + interleaved UV)
    #[default]
    Nv12 = 1,
    /// Semi-planar 4:2:0 with 16-bit samples (10 significant bits)
    P010 = 2,
    /// Planar YUV 4:4:4
    Yuv444p = 3,
    /// Packed 32-bit BGRA (desktop capture)
    Bgra = 4,
    /// Packed 32-bit RGBA
    Rgba = 5,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 6] = [
        PixelFormat::Yuv420p,
        PixelFormat::Nv12,
        PixelFormat::P010,
        PixelFormat::Yuv444p,
        PixelFormat::Bgra,
        PixelFormat::Rgba,
    ];

    /// Number of planes a frame of this format carries
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Yuv420p | PixelFormat::Yuv444p => 3,
            PixelFormat::Nv12 | PixelFormat::P010 => 2,
            PixelFormat::Bgra | PixelFormat::Rgba => 1,
        }
    }

    /// Packed RGB formats as produced by screen capture
    pub fn is_packed_rgb(&self) -> bool {
        matches!(self, PixelFormat::Bgra | PixelFormat::Rgba)
    }

    /// Raw tag for the flat interface
    pub fn raw(&self) -> i32 {
        *self as i32
    }

    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::P010 => "p010",
            PixelFormat::Yuv444p => "yuv444p",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgba => "rgba",
        }
    }

    /// Convert to the FFmpeg pixel format
    pub fn to_ffmpeg(&self) -> Pixel {
        match self {
            PixelFormat::Yuv420p => Pixel::YUV420P,
            PixelFormat::Nv12 => Pixel::NV12,
            PixelFormat::P010 => Pixel::P010LE,
            PixelFormat::Yuv444p => Pixel::YUV444P,
            PixelFormat::Bgra => Pixel::BGRA,
            PixelFormat::Rgba => Pixel::RGBA,
        }
    }

    /// Map an FFmpeg pixel format back, if it is one we deliver
    pub fn from_ffmpeg(pixel: Pixel) -> Option<Self> {
        match pixel {
            Pixel::YUV420P | Pixel::YUVJ420P => Some(PixelFormat::Yuv420p),
            Pixel::NV12 => Some(PixelFormat::Nv12),
            Pixel::P010LE => Some(PixelFormat::P010),
            Pixel::YUV444P | Pixel::YUVJ444P => Some(PixelFormat::Yuv444p),
            Pixel::BGRA => Some(PixelFormat::Bgra),
            Pixel::RGBA => Some(PixelFormat::Rgba),
            _ => None,
        }
    }
}

impl TryFrom<i32> for PixelFormat {
    type Error = Error;

    fn try_from(raw: i32) -> Result<Self> {
        PixelFormat::ALL
            .into_iter()
            .find(|f| f.raw() == raw)
            .ok_or_else(|| Error::InvalidFormat(format!("unknown pixel format tag {}", raw)))
    }
}

impl FromStr for PixelFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        PixelFormat::ALL
            .into_iter()
            .find(|f| f.name() == lower)
            .ok_or_else(|| Error::InvalidFormat(format!("unknown pixel format '{}'", s)))
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-capacity array of per-plane values
///
/// Holds at most [`MAX_PLANES`] entries; derefs to the filled prefix.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PlaneArray<T: Copy + Default> {
    items: [T; MAX_PLANES],
    len: usize,
}

impl<T: Copy + Default> PlaneArray<T> {
    pub fn new() -> Self {
        Self {
            items: [T::default(); MAX_PLANES],
            len: 0,
        }
    }

    /// Append a value; hands it back when the array is full
    pub fn try_push(&mut self, value: T) -> std::result::Result<(), T> {
        if self.len == MAX_PLANES {
            return Err(value);
        }
        self.items[self.len] = value;
        self.len += 1;
        Ok(())
    }

    /// Build from a slice of at most [`MAX_PLANES`] values
    pub fn from_slice(values: &[T]) -> Option<Self> {
        if values.len() > MAX_PLANES {
            return None;
        }
        let mut array = Self::new();
        array.items[..values.len()].copy_from_slice(values);
        array.len = values.len();
        Some(array)
    }

    /// Full backing storage, unused slots set to `T::default()`
    pub fn padded(&self) -> &[T; MAX_PLANES] {
        &self.items
    }
}

impl<T: Copy + Default> Default for PlaneArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default> Deref for PlaneArray<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items[..self.len]
    }
}

impl<T: Copy + Default + std::fmt::Debug> std::fmt::Debug for PlaneArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Compressed packet as delivered to a [`PacketSink`](crate::encode::PacketSink)
///
/// Borrowed from the encoder; valid only for the duration of the delivery.
#[derive(Debug, Clone, Copy)]
pub struct EncodedPacket<'a> {
    pub data: &'a [u8],
    /// Presentation timestamp in milliseconds
    pub pts_ms: i64,
    pub keyframe: bool,
}

impl EncodedPacket<'_> {
    pub fn to_owned(&self) -> Packet {
        Packet {
            data: self.data.to_vec(),
            pts_ms: self.pts_ms,
            keyframe: self.keyframe,
        }
    }
}

/// Owned compressed packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts_ms: i64,
    pub keyframe: bool,
}

impl Packet {
    /// Size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Decoded frame as delivered to a [`FrameSink`](crate::decode::FrameSink)
///
/// Plane slices point into decoder-owned memory and are only valid
/// during the delivery call.
#[derive(Debug, Clone, Copy)]
pub struct DecodedFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: PlaneArray<&'a [u8]>,
    pub strides: PlaneArray<usize>,
    pub keyframe: bool,
}

/// Statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Screen updates captured
    pub frames_captured: u64,
    /// Frames submitted to the encoder
    pub frames_encoded: u64,
    /// Capture calls that timed out
    pub capture_timeouts: u64,
    /// Packets produced by the encoder
    pub packets: u64,
    /// Total compressed bytes
    pub bytes_written: u64,
    /// Average encode latency in ms
    pub avg_encode_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_tags() {
        for format in PixelFormat::ALL {
            assert_eq!(PixelFormat::try_from(format.raw()).unwrap(), format);
            assert_eq!(format.name().parse::<PixelFormat>().unwrap(), format);
        }
        assert!(matches!(
            PixelFormat::try_from(42),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_plane_array_bounds() {
        let mut planes = PlaneArray::<usize>::new();
        for i in 0..MAX_PLANES {
            assert!(planes.try_push(i).is_ok());
        }
        assert_eq!(planes.try_push(99), Err(99));
        assert_eq!(planes.len(), MAX_PLANES);
        assert!(PlaneArray::from_slice(&[0usize; MAX_PLANES + 1]).is_none());

        let short = PlaneArray::from_slice(&[4usize, 2]).unwrap();
        assert_eq!(&*short, &[4, 2]);
        assert_eq!(short.padded()[2], 0);
    }

    #[test]
    fn test_resolution_parse() {
        let res: Resolution = "1280x720".parse().unwrap();
        assert_eq!(res, Resolution::HD_720P);
        assert!("1280".parse::<Resolution>().is_err());
        assert!(!Resolution::new(1279, 720).is_even());
    }
}
