//! Frame buffer layout
//!
//! Computes the per-plane stride, offset and total length of a raw frame
//! buffer for a pixel format, geometry and row alignment. Capturer, encoder
//! and decoder all agree on buffers through this single computation.

use crate::error::{Error, Result};
use crate::types::{PixelFormat, PlaneArray};

use std::ops::Range;

/// Per-plane byte layout of one raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBufferLayout {
    format: PixelFormat,
    width: u32,
    height: u32,
    align: usize,
    row_bytes: PlaneArray<usize>,
    strides: PlaneArray<usize>,
    offsets: PlaneArray<usize>,
    plane_heights: PlaneArray<usize>,
    length: usize,
}

/// (row bytes, rows) of every plane for a format at a given size
fn plane_dimensions(format: PixelFormat, width: usize, height: usize) -> PlaneArray<(usize, usize)> {
    let chroma_w = width.div_ceil(2);
    let chroma_h = height.div_ceil(2);
    let planes: &[(usize, usize)] = match format {
        PixelFormat::Yuv420p => &[(width, height), (chroma_w, chroma_h), (chroma_w, chroma_h)],
        PixelFormat::Nv12 => &[(width, height), (chroma_w * 2, chroma_h)],
        PixelFormat::P010 => &[(width * 2, height), (chroma_w * 4, chroma_h)],
        PixelFormat::Yuv444p => &[(width, height), (width, height), (width, height)],
        PixelFormat::Bgra | PixelFormat::Rgba => &[(width * 4, height)],
    };
    // Every format above has fewer than MAX_PLANES planes.
    PlaneArray::from_slice(planes).unwrap_or_default()
}

impl FrameBufferLayout {
    /// Compute the layout for `format` at `width`x`height`, with every
    /// plane stride rounded up to `align` bytes (0 means unaligned).
    pub fn compute(format: PixelFormat, width: u32, height: u32, align: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidGeometry(format!(
                "frame size {}x{} must be positive",
                width, height
            )));
        }
        let align = align.max(1);
        if !align.is_power_of_two() {
            return Err(Error::InvalidGeometry(format!(
                "row alignment {} is not a power of two",
                align
            )));
        }

        let mut row_bytes = PlaneArray::new();
        let mut strides = PlaneArray::new();
        let mut offsets = PlaneArray::new();
        let mut plane_heights = PlaneArray::new();
        let mut length = 0usize;

        for &(bytes, rows) in plane_dimensions(format, width as usize, height as usize).iter() {
            let stride = bytes.next_multiple_of(align);
            let _ = row_bytes.try_push(bytes);
            let _ = strides.try_push(stride);
            let _ = offsets.try_push(length);
            let _ = plane_heights.try_push(rows);
            length += stride * rows;
        }

        Ok(Self {
            format,
            width,
            height,
            align,
            row_bytes,
            strides,
            offsets,
            plane_heights,
            length,
        })
    }

    /// Same as [`compute`](Self::compute) for raw, possibly invalid, C inputs
    pub fn compute_raw(format: i32, width: i32, height: i32, align: i32) -> Result<Self> {
        let format = PixelFormat::try_from(format)?;
        if width <= 0 || height <= 0 || align < 0 {
            return Err(Error::InvalidGeometry(format!(
                "frame size {}x{} align {} out of range",
                width, height, align
            )));
        }
        Self::compute(format, width as u32, height as u32, align as usize)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn plane_count(&self) -> usize {
        self.strides.len()
    }

    pub fn strides(&self) -> &PlaneArray<usize> {
        &self.strides
    }

    pub fn offsets(&self) -> &PlaneArray<usize> {
        &self.offsets
    }

    pub fn plane_heights(&self) -> &PlaneArray<usize> {
        &self.plane_heights
    }

    /// Meaningful bytes per row of plane `i`, excluding padding
    pub fn row_bytes(&self, plane: usize) -> usize {
        self.row_bytes.get(plane).copied().unwrap_or(0)
    }

    /// Total buffer length in bytes
    pub fn length(&self) -> usize {
        self.length
    }

    /// Byte range of plane `i` inside the buffer
    pub fn plane_range(&self, plane: usize) -> Option<Range<usize>> {
        let offset = *self.offsets.get(plane)?;
        Some(offset..offset + self.strides[plane] * self.plane_heights[plane])
    }

    /// Whether this layout was computed for exactly these inputs
    pub fn matches(&self, format: PixelFormat, width: u32, height: u32, align: usize) -> bool {
        self.format == format && self.width == width && self.height == height && self.align == align.max(1)
    }

    /// View a buffer laid out per this layout as plane slices
    pub fn split<'a>(&self, buffer: &'a [u8]) -> Result<PlaneArray<&'a [u8]>> {
        if buffer.len() < self.length {
            return Err(Error::InvalidGeometry(format!(
                "buffer of {} bytes is shorter than the {} byte {} {}x{} layout",
                buffer.len(),
                self.length,
                self.format,
                self.width,
                self.height
            )));
        }
        let mut planes = PlaneArray::new();
        for plane in 0..self.plane_count() {
            if let Some(range) = self.plane_range(plane) {
                let _ = planes.try_push(&buffer[range]);
            }
        }
        Ok(planes)
    }
}
