//! Configuration types for deskpipe

use crate::encode::{Backend, Codec};
use crate::decode::DeviceType;
use crate::error::{Error, Result};
use crate::types::{PixelFormat, Resolution};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Keyframes only on request
pub const DEFAULT_GOP: u32 = i32::MAX as u32;

/// Bitrate in kbps considered "balanced" for 1080p desktop content
const BASE_BITRATE_1080P_KBPS: u64 = 2000;

/// Rate control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateControl {
    /// Constant bitrate (tight VBV, one frame of buffer)
    #[default]
    Cbr,
    /// Variable bitrate capped at the target
    Vbr,
    /// Constant quantizer (`EncoderConfig::qp`)
    Cq,
}

/// Encoder quality level (speed vs quality tradeoff)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Slowest preset, most bits
    Best,
    #[default]
    Balanced,
    /// Fastest preset, fewest bits
    Low,
}

impl Quality {
    /// Bitrate relative to the resolution's base bitrate, in percent
    pub fn bitrate_ratio(&self) -> u32 {
        match self {
            Quality::Best => 150,
            Quality::Balanced => 100,
            Quality::Low => 50,
        }
    }

    /// Target bitrate for this quality at `resolution`
    pub fn bitrate_kbps(&self, resolution: Resolution) -> u32 {
        let base = base_bitrate_kbps(resolution) as u64;
        (base * self.bitrate_ratio() as u64 / 100) as u32
    }
}

/// Base bitrate scaled by pixel count from the 1080p reference
pub fn base_bitrate_kbps(resolution: Resolution) -> u32 {
    let reference = Resolution::FHD_1080P.pixels();
    let scaled = BASE_BITRATE_1080P_KBPS * resolution.pixels() / reference;
    scaled.clamp(100, 100_000) as u32
}

/// Encoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Video codec
    pub codec: Codec,
    /// Encoder back-end
    pub backend: Backend,
    /// Frame width (must be even)
    pub width: u32,
    /// Frame height (must be even)
    pub height: u32,
    /// Raw input pixel format
    pub pixel_format: PixelFormat,
    /// Row alignment of the raw input buffer in bytes
    pub align: usize,
    /// Frames per second
    pub framerate: u32,
    /// GOP size (keyframe interval in frames)
    pub gop: u32,
    /// Rate control mode
    pub rate_control: RateControl,
    /// Encoder quality level
    pub quality: Quality,
    /// Target bitrate in kbps
    pub bitrate_kbps: u32,
    /// Quantizer for constant-quality mode (0-51)
    pub qp: u8,
    /// Codec worker threads (0 = codec default)
    pub threads: u32,
    /// GPU index for hardware back-ends that expose one
    pub gpu_index: Option<u32>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: Codec::H264,
            backend: Backend::Software,
            width: 1920,
            height: 1080,
            pixel_format: PixelFormat::Nv12,
            align: 32,
            framerate: 30,
            gop: DEFAULT_GOP,
            rate_control: RateControl::Cbr,
            quality: Quality::Balanced,
            bitrate_kbps: 2000,
            qp: 26,
            threads: 0,
            gpu_index: None,
        }
    }
}

impl EncoderConfig {
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    pub fn with_align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    pub fn with_framerate(mut self, fps: u32) -> Self {
        self.framerate = fps;
        self
    }

    pub fn with_gop(mut self, gop: u32) -> Self {
        self.gop = gop;
        self
    }

    pub fn with_rate_control(mut self, rc: RateControl) -> Self {
        self.rate_control = rc;
        self
    }

    pub fn with_bitrate_kbps(mut self, bitrate: u32) -> Self {
        self.bitrate_kbps = bitrate;
        self
    }

    pub fn with_qp(mut self, qp: u8) -> Self {
        self.qp = qp;
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_gpu_index(mut self, index: u32) -> Self {
        self.gpu_index = Some(index);
        self
    }

    /// Set the quality level and derive the bitrate from it
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self.bitrate_kbps = quality.bitrate_kbps(self.resolution());
        self
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Geometry and numeric checks that do not depend on FFmpeg
    pub fn validate(&self) -> Result<()> {
        let resolution = self.resolution();
        if resolution.pixels() == 0 || !resolution.is_even() {
            return Err(Error::InvalidGeometry(format!(
                "encoder size {} must be non-zero and even",
                resolution
            )));
        }
        if self.framerate == 0 {
            return Err(Error::InvalidConfig("framerate must be positive".into()));
        }
        if self.gop == 0 {
            return Err(Error::InvalidConfig("gop must be positive".into()));
        }
        match self.rate_control {
            RateControl::Cbr | RateControl::Vbr if self.bitrate_kbps == 0 => Err(
                Error::InvalidConfig("bitrate must be positive in cbr/vbr mode".into()),
            ),
            RateControl::Cq if self.qp > 51 => Err(Error::InvalidConfig(format!(
                "qp {} out of range 0-51",
                self.qp
            ))),
            _ => Ok(()),
        }
    }

    /// Apply a preset configuration
    pub fn from_preset(preset: Preset) -> Self {
        preset.into()
    }
}

/// Decoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Video codec
    pub codec: Codec,
    /// Hardware device used for decoding
    pub device: DeviceType,
    /// Decoder worker threads (0 = codec default)
    pub threads: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            codec: Codec::H264,
            device: DeviceType::None,
            threads: 0,
        }
    }
}

impl DecoderConfig {
    pub fn new(codec: Codec, device: DeviceType) -> Self {
        Self {
            codec,
            device,
            ..Default::default()
        }
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }
}

/// Muxer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Output file; the container is chosen from its extension
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub codec: Codec,
    /// Frames per second, used to predict missing durations
    pub framerate: u32,
}

impl MuxConfig {
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32, codec: Codec, framerate: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            codec,
            framerate,
        }
    }

    /// Muxer settings matching an encoder configuration
    pub fn for_encoder(path: impl Into<PathBuf>, encoder: &EncoderConfig) -> Self {
        Self::new(path, encoder.width, encoder.height, encoder.codec, encoder.framerate)
    }
}

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Adapter to bind; None picks the first enumerated adapter
    pub adapter: Option<u64>,
    /// Wait per capture call in milliseconds
    pub timeout_ms: u64,
    /// Show cursor in capture
    pub show_cursor: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            timeout_ms: 100,
            show_cursor: true,
        }
    }
}

/// Recording configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Output file
    pub output: PathBuf,
    /// Recording length in seconds
    pub duration_secs: u64,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("recording.mp4"),
            duration_secs: 10,
        }
    }
}

/// Top-level configuration file for the `deskpipe` binary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// tracing filter directive, e.g. "deskpipe=debug"
    pub log_filter: Option<String>,
    pub encoder: EncoderConfig,
    pub capture: CaptureConfig,
    pub record: RecordConfig,
}

impl AppConfig {
    /// Load a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&text)?)
    }
}

/// High-level presets for common use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preset {
    /// Remote desktop at 1080p30, tight CBR
    LowLatency1080p,
    /// Remote desktop at 1440p60
    Balanced1440p,
    /// Local recording: VBR, periodic keyframes
    Recording,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::LowLatency1080p, Preset::Balanced1440p, Preset::Recording];

    pub fn description(&self) -> &'static str {
        match self {
            Preset::LowLatency1080p => "1080p30 CBR, keyframes on request",
            Preset::Balanced1440p => "1440p60 CBR, keyframes on request",
            Preset::Recording => "1080p30 VBR, keyframe every 2 seconds",
        }
    }
}

impl From<Preset> for EncoderConfig {
    fn from(preset: Preset) -> Self {
        match preset {
            Preset::LowLatency1080p => EncoderConfig::default().with_quality(Quality::Balanced),
            Preset::Balanced1440p => EncoderConfig {
                width: 2560,
                height: 1440,
                framerate: 60,
                ..Default::default()
            }
            .with_quality(Quality::Balanced),
            Preset::Recording => EncoderConfig {
                rate_control: RateControl::Vbr,
                gop: 60,
                ..Default::default()
            }
            .with_quality(Quality::Best),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_validation() {
        assert!(EncoderConfig::default().validate().is_ok());
        assert!(matches!(
            EncoderConfig::default().with_resolution(1921, 1080).validate(),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            EncoderConfig::default().with_resolution(0, 0).validate(),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            EncoderConfig::default().with_bitrate_kbps(0).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(EncoderConfig::default()
            .with_rate_control(RateControl::Cq)
            .with_bitrate_kbps(0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_quality_bitrate() {
        assert_eq!(base_bitrate_kbps(Resolution::FHD_1080P), 2000);
        assert_eq!(Quality::Best.bitrate_kbps(Resolution::FHD_1080P), 3000);
        assert_eq!(Quality::Low.bitrate_kbps(Resolution::FHD_1080P), 1000);
        assert!(base_bitrate_kbps(Resolution::UHD_4K) > 2000);
    }

    #[test]
    fn test_app_config_from_toml() {
        let text = r#"
            log_filter = "deskpipe=debug"

            [encoder]
            codec = "hevc"
            backend = "nvenc"
            width = 2560
            height = 1440
            rate_control = "vbr"

            [record]
            output = "session.mkv"
        "#;
        let config: AppConfig = toml::from_str(text).unwrap();
        assert_eq!(config.log_filter.as_deref(), Some("deskpipe=debug"));
        assert_eq!(config.encoder.codec, Codec::Hevc);
        assert_eq!(config.encoder.backend, Backend::Nvenc);
        assert_eq!(config.encoder.rate_control, RateControl::Vbr);
        assert_eq!(config.encoder.framerate, 30);
        assert_eq!(config.record.output, PathBuf::from("session.mkv"));
        assert_eq!(config.capture.timeout_ms, 100);
    }

    #[test]
    fn test_presets() {
        for preset in Preset::ALL {
            let config = EncoderConfig::from_preset(preset);
            assert!(config.validate().is_ok(), "{:?}", preset);
        }
        assert_eq!(EncoderConfig::from(Preset::Recording).gop, 60);
    }
}
