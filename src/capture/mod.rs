//! Screen capture module
//!
//! A [`Capturer`] owns a GPU device on one adapter and turns screen updates
//! from a [`ScreenSource`] into GPU textures:
//! - [`ChannelSource`] for frames pushed by an external producer
//! - `PipeWireSource` for xdg-desktop-portal screencasts (Linux)

#[cfg(target_os = "linux")]
pub mod portal;
mod stream;

#[cfg(target_os = "linux")]
pub use portal::PipeWireSource;
pub use stream::{ChannelSource, FrameSender};

use crate::error::{Error, Result};
use crate::gpu::{self, AdapterId, GpuDevice};
use crate::types::{PixelFormat, Resolution};

use std::time::Duration;

/// One screen update in system memory
#[derive(Debug, Clone)]
pub struct SourceFrame {
    /// Packed pixels, rows `stride` bytes apart
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    /// Bgra or Rgba
    pub format: PixelFormat,
    pub pts_ms: i64,
}

impl SourceFrame {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Check that the pixel buffer covers the declared geometry
    pub fn validate(&self) -> Result<()> {
        if !self.format.is_packed_rgb() {
            return Err(Error::InvalidFormat(format!(
                "screen updates must be packed RGB, got {}",
                self.format
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidGeometry(format!(
                "empty screen update {}",
                self.resolution()
            )));
        }
        let row = self.width as usize * 4;
        let needed = self
            .stride
            .checked_mul(self.height as usize - 1)
            .and_then(|n| n.checked_add(row));
        let fits = u32::try_from(self.stride).is_ok()
            && needed.is_some_and(|needed| self.data.len() >= needed);
        if self.stride < row || !fits {
            return Err(Error::InvalidGeometry(format!(
                "{} byte update with stride {} does not cover {}",
                self.data.len(),
                self.stride,
                self.resolution()
            )));
        }
        Ok(())
    }
}

/// Producer of screen updates
pub trait ScreenSource: Send {
    /// Wait up to `timeout` for the next update
    fn next_update(&mut self, timeout: Duration) -> Result<Option<SourceFrame>>;

    /// Geometry of the most recent update, if known
    fn geometry(&self) -> Option<Resolution>;
}

/// Texture produced by [`Capturer::capture`]
///
/// Valid until the next capture call on the same capturer.
#[derive(Clone, Copy)]
pub struct CapturedFrame<'a> {
    pub texture: &'a wgpu::Texture,
    pub device: &'a GpuDevice,
    pub pts_ms: i64,
}

impl CapturedFrame<'_> {
    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }
}

/// Screen capture session bound to one GPU adapter
pub struct Capturer {
    device: GpuDevice,
    source: Box<dyn ScreenSource>,
    texture: Option<wgpu::Texture>,
    resolution: Resolution,
    frames: u64,
}

impl Capturer {
    /// Open a device on `adapter` and capture from `source`
    pub fn new(adapter: AdapterId, source: Box<dyn ScreenSource>) -> Result<Self> {
        let device = GpuDevice::open(adapter)?;
        let resolution = source.geometry().unwrap_or(Resolution::new(0, 0));

        tracing::info!(
            "Capturer created on {} ({})",
            device.desc().name,
            resolution
        );

        Ok(Self {
            device,
            source,
            texture: None,
            resolution,
            frames: 0,
        })
    }

    /// Device shared with encoders and renderers
    pub fn device(&self) -> &GpuDevice {
        &self.device
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames
    }

    /// Texture returned by the last successful capture
    pub fn texture(&self) -> Option<&wgpu::Texture> {
        self.texture.as_ref()
    }

    /// Wait up to `timeout` for the next screen update
    ///
    /// Returns `None` on timeout, in which case the previous texture is
    /// released.
    pub fn capture(&mut self, timeout: Duration) -> Result<Option<CapturedFrame<'_>>> {
        let Some(frame) = self.source.next_update(timeout)? else {
            self.texture = None;
            return Ok(None);
        };
        frame.validate()?;

        let format = gpu::texture_format(frame.format)?;
        let size = wgpu::Extent3d {
            width: frame.width,
            height: frame.height,
            depth_or_array_layers: 1,
        };

        let reusable = self
            .texture
            .as_ref()
            .is_some_and(|t| t.size() == size && t.format() == format);
        if !reusable {
            if frame.resolution() != self.resolution {
                tracing::info!("Capture geometry {} -> {}", self.resolution, frame.resolution());
            }
            self.texture = Some(self.device.device().create_texture(&wgpu::TextureDescriptor {
                label: Some("capture"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            }));
        }
        self.resolution = frame.resolution();
        let bytes_per_row = u32::try_from(frame.stride).map_err(|_| {
            Error::InvalidGeometry(format!("stride {} exceeds u32", frame.stride))
        })?;

        let Some(texture) = self.texture.as_ref() else {
            return Err(Error::Gpu("capture texture missing".into()));
        };
        self.device.queue().write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(frame.height),
            },
            size,
        );
        self.frames += 1;
        tracing::trace!("Captured frame {} at {}ms", self.frames, frame.pts_ms);

        Ok(Some(CapturedFrame {
            texture,
            device: &self.device,
            pts_ms: frame.pts_ms,
        }))
    }
}

impl Drop for Capturer {
    fn drop(&mut self) {
        self.texture = None;
        tracing::info!("Capturer dropped after {} frames", self.frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_capturer() -> Option<(FrameSender, Capturer)> {
        let adapter = gpu::enumerate_adapters().first().map(|d| d.id)?;
        let (tx, source) = ChannelSource::new();
        match Capturer::new(adapter, Box::new(source)) {
            Ok(capturer) => Some((tx, capturer)),
            Err(_) => None,
        }
    }

    #[test]
    fn test_source_frame_validation() {
        let mut frame = SourceFrame {
            data: vec![0; 64 * 2],
            width: 16,
            height: 2,
            stride: 64,
            format: PixelFormat::Bgra,
            pts_ms: 0,
        };
        assert!(frame.validate().is_ok());

        frame.stride = 32;
        assert!(matches!(frame.validate(), Err(Error::InvalidGeometry(_))));

        frame.stride = 64;
        frame.format = PixelFormat::Nv12;
        assert!(matches!(frame.validate(), Err(Error::InvalidFormat(_))));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_source_frame_stride_overflow() {
        // A single row never reads past the first stride, so only the
        // upload's u32 row pitch catches this one.
        let mut frame = SourceFrame {
            data: vec![0; 64],
            width: 16,
            height: 1,
            stride: 1 << 32,
            format: PixelFormat::Bgra,
            pts_ms: 0,
        };
        assert!(matches!(frame.validate(), Err(Error::InvalidGeometry(_))));

        frame.height = 3;
        frame.stride = usize::MAX / 2;
        assert!(matches!(frame.validate(), Err(Error::InvalidGeometry(_))));
    }

    #[test]
    fn test_unknown_adapter() {
        let (_tx, source) = ChannelSource::new();
        let err = Capturer::new(AdapterId(u64::MAX), Box::new(source)).err();
        assert!(matches!(err, Some(Error::UnsupportedAdapter(_))));
    }

    #[test]
    fn test_capture_and_timeout() {
        let Some((tx, mut capturer)) = open_capturer() else {
            println!("No GPU adapter available, skipping test");
            return;
        };

        let pixels: Vec<u8> = (0..32 * 8 * 4).map(|i| (i % 251) as u8).collect();
        tx.submit(&pixels, 32, 8, 128, PixelFormat::Bgra, 40).unwrap();

        let frame = capturer
            .capture(Duration::from_millis(100))
            .unwrap()
            .unwrap();
        assert_eq!(frame.pts_ms, 40);
        assert_eq!((frame.width(), frame.height()), (32, 8));
        let readback = frame.device.read_texture(frame.texture).unwrap();
        assert_eq!(readback, pixels);
        assert_eq!((capturer.width(), capturer.height()), (32, 8));

        assert!(capturer
            .capture(Duration::from_millis(5))
            .unwrap()
            .is_none());
        assert!(capturer.texture().is_none());
    }

    #[test]
    fn test_geometry_change() {
        let Some((tx, mut capturer)) = open_capturer() else {
            println!("No GPU adapter available, skipping test");
            return;
        };

        tx.submit(&[0u8; 16 * 4 * 4], 16, 4, 64, PixelFormat::Rgba, 0)
            .unwrap();
        capturer.capture(Duration::from_millis(100)).unwrap();
        tx.submit(&[0u8; 8 * 2 * 4], 8, 2, 32, PixelFormat::Rgba, 1)
            .unwrap();
        let frame = capturer
            .capture(Duration::from_millis(100))
            .unwrap()
            .unwrap();
        assert_eq!(frame.width(), 8);
        assert_eq!(capturer.width(), 8);
        assert_eq!(capturer.height(), 2);
    }
}
