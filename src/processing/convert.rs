//! Colorspace conversion using FFmpeg swscale

use crate::error::{Error, Result};
use crate::types::{PixelFormat, Resolution};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::scaling::{Context as SwsContext, Flags as SwsFlags};

/// Cached swscale context turning packed BGRA/RGBA screen pixels into
/// encoder input frames
pub struct PackedConverter {
    scaler: SwsContext,
    src_format: PixelFormat,
    src: Resolution,
    dst_format: PixelFormat,
    dst: Resolution,
}

impl PackedConverter {
    pub fn new(
        src_format: PixelFormat,
        src: Resolution,
        dst_format: PixelFormat,
        dst: Resolution,
    ) -> Result<Self> {
        if !src_format.is_packed_rgb() {
            return Err(Error::InvalidFormat(format!(
                "{} is not a packed RGB source format",
                src_format
            )));
        }
        crate::init_ffmpeg()?;

        let scaler = SwsContext::get(
            src_format.to_ffmpeg(),
            src.width,
            src.height,
            dst_format.to_ffmpeg(),
            dst.width,
            dst.height,
            SwsFlags::BILINEAR,
        )
        .map_err(|e| Error::FFmpeg(format!("failed to create scaler: {}", e)))?;

        tracing::debug!(
            "Converter {} {} -> {} {}",
            src_format,
            src,
            dst_format,
            dst
        );

        Ok(Self {
            scaler,
            src_format,
            src,
            dst_format,
            dst,
        })
    }

    /// Whether this converter accepts the given source
    pub fn matches(&self, src_format: PixelFormat, src: Resolution) -> bool {
        self.src_format == src_format && self.src == src
    }

    /// Convert one packed image whose rows are `stride` bytes apart
    pub fn convert(&mut self, pixels: &[u8], stride: usize) -> Result<ffmpeg::frame::Video> {
        let row = self.src.width as usize * 4;
        let rows = self.src.height as usize;
        if stride < row || pixels.len() < stride * (rows - 1) + row {
            return Err(Error::InvalidGeometry(format!(
                "{} byte image with stride {} is too small for {} {}",
                pixels.len(),
                stride,
                self.src_format,
                self.src
            )));
        }

        let mut input =
            ffmpeg::frame::Video::new(self.src_format.to_ffmpeg(), self.src.width, self.src.height);
        let frame_stride = input.stride(0);
        let plane = input.data_mut(0);
        for y in 0..rows {
            plane[y * frame_stride..y * frame_stride + row]
                .copy_from_slice(&pixels[y * stride..y * stride + row]);
        }

        let mut output =
            ffmpeg::frame::Video::new(self.dst_format.to_ffmpeg(), self.dst.width, self.dst.height);
        self.scaler
            .run(&input, &mut output)
            .map_err(|e| Error::FFmpeg(format!("conversion failed: {}", e)))?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_to_nv12_gray() {
        let src = Resolution::new(64, 32);
        let mut converter =
            PackedConverter::new(PixelFormat::Bgra, src, PixelFormat::Nv12, src).unwrap();
        let gray = vec![0x80u8; 64 * 32 * 4];
        let frame = converter.convert(&gray, 64 * 4).unwrap();

        assert_eq!(frame.width(), 64);
        assert_eq!(frame.planes(), 2);
        let luma = frame.data(0)[0] as i32;
        let chroma = frame.data(1)[0] as i32;
        // Mid gray maps to roughly Y=126 and neutral chroma.
        assert!((luma - 126).abs() <= 4, "luma {}", luma);
        assert!((chroma - 128).abs() <= 2, "chroma {}", chroma);
    }

    #[test]
    fn test_rejects_planar_source_and_short_input() {
        let res = Resolution::new(16, 16);
        assert!(PackedConverter::new(PixelFormat::Nv12, res, PixelFormat::Yuv420p, res).is_err());

        let mut converter =
            PackedConverter::new(PixelFormat::Rgba, res, PixelFormat::Yuv420p, res).unwrap();
        assert!(matches!(
            converter.convert(&[0u8; 16], 64),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(converter.matches(PixelFormat::Rgba, res));
        assert!(!converter.matches(PixelFormat::Bgra, res));
    }
}
