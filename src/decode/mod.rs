//! Video decoding module
//!
//! Decodes H.264, HEVC and AV1 with FFmpeg, optionally through a hardware
//! device (CUDA, VAAPI, D3D11VA, VideoToolbox, QSV). Frames are always
//! delivered from system memory.

mod hw;

use crate::bitstream;
use crate::config::DecoderConfig;
use crate::encode::Codec;
use crate::error::{Error, Result};
use crate::types::{DecodedFrame, PixelFormat, PlaneArray};

use hw::HwDeviceContext;

use ffmpeg_next as ffmpeg;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Hardware device used for decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Software decoding
    #[default]
    None,
    Cuda,
    Vaapi,
    D3d11va,
    VideoToolbox,
    Qsv,
}

impl DeviceType {
    pub const ALL: [DeviceType; 6] = [
        DeviceType::None,
        DeviceType::Cuda,
        DeviceType::Vaapi,
        DeviceType::D3d11va,
        DeviceType::VideoToolbox,
        DeviceType::Qsv,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DeviceType::None => "none",
            DeviceType::Cuda => "cuda",
            DeviceType::Vaapi => "vaapi",
            DeviceType::D3d11va => "d3d11va",
            DeviceType::VideoToolbox => "videotoolbox",
            DeviceType::Qsv => "qsv",
        }
    }

    /// Whether this device type exists on the current platform
    pub fn is_supported_on_platform(&self) -> bool {
        match self {
            DeviceType::None => true,
            DeviceType::Cuda | DeviceType::Qsv => {
                cfg!(any(target_os = "linux", target_os = "windows"))
            }
            DeviceType::Vaapi => cfg!(target_os = "linux"),
            DeviceType::D3d11va => cfg!(target_os = "windows"),
            DeviceType::VideoToolbox => cfg!(target_os = "macos"),
        }
    }

    /// Raw `AVHWDeviceType` value used on the flat C surface
    pub fn raw(&self) -> i32 {
        match self {
            DeviceType::None => 0,
            DeviceType::Cuda => 2,
            DeviceType::Vaapi => 3,
            DeviceType::Qsv => 5,
            DeviceType::VideoToolbox => 6,
            DeviceType::D3d11va => 7,
        }
    }

    fn to_ffmpeg(self) -> Option<ffmpeg::ffi::AVHWDeviceType> {
        use ffmpeg::ffi::AVHWDeviceType::*;
        match self {
            DeviceType::None => None,
            DeviceType::Cuda => Some(AV_HWDEVICE_TYPE_CUDA),
            DeviceType::Vaapi => Some(AV_HWDEVICE_TYPE_VAAPI),
            DeviceType::D3d11va => Some(AV_HWDEVICE_TYPE_D3D11VA),
            DeviceType::VideoToolbox => Some(AV_HWDEVICE_TYPE_VIDEOTOOLBOX),
            DeviceType::Qsv => Some(AV_HWDEVICE_TYPE_QSV),
        }
    }
}

impl TryFrom<i32> for DeviceType {
    type Error = Error;

    fn try_from(raw: i32) -> Result<Self> {
        DeviceType::ALL
            .into_iter()
            .find(|d| d.raw() == raw)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown device type {}", raw)))
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceType::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidConfig(format!("unknown device type '{}'", s)))
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// FFmpeg decoders tried for a codec, in order
fn decoder_names(codec: Codec, device: DeviceType) -> &'static [&'static str] {
    match (codec, device) {
        (Codec::H264, _) => &["h264"],
        (Codec::Hevc, _) => &["hevc"],
        // The native AV1 decoder only works through a hwaccel.
        (Codec::Av1, DeviceType::None) => &["libdav1d", "libaom-av1"],
        (Codec::Av1, _) => &["av1"],
    }
}

fn find_decoder(codec: Codec, device: DeviceType) -> Option<ffmpeg::Codec> {
    decoder_names(codec, device)
        .iter()
        .find_map(|name| ffmpeg::decoder::find_by_name(name))
}

/// Receiver of decoded frames
///
/// Frames are delivered in decode order during the `decode` call; plane
/// slices are only valid for the duration of the delivery.
pub trait FrameSink {
    fn deliver(&mut self, frame: DecodedFrame<'_>);
}

impl<F> FrameSink for F
where
    F: FnMut(DecodedFrame<'_>),
{
    fn deliver(&mut self, frame: DecodedFrame<'_>) {
        self(frame)
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    /// Compressed units submitted
    pub units: u64,
    /// Units dropped while waiting for a keyframe
    pub skipped: u64,
    /// Frames delivered to the sink
    pub frames: u64,
    /// Units the codec rejected
    pub errors: u64,
}

/// Decoder session
pub struct Decoder<S: FrameSink> {
    config: DecoderConfig,
    decoder: ffmpeg::decoder::Video,
    decoder_name: &'static str,
    // Keeps the device alive for the codec context's reference.
    _device: Option<HwDeviceContext>,
    frame: ffmpeg::frame::Video,
    sw_frame: ffmpeg::frame::Video,
    sink: S,
    stats: DecoderStats,
    awaiting_keyframe: bool,
}

impl<S: FrameSink> Decoder<S> {
    /// Open a decoder session delivering frames to `sink`
    pub fn new(config: DecoderConfig, sink: S) -> Result<Self> {
        if !config.device.is_supported_on_platform() {
            return Err(Error::InvalidConfig(format!(
                "{} decoding is not available on this platform",
                config.device
            )));
        }
        crate::init_ffmpeg()?;

        let codec = find_decoder(config.codec, config.device).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "no {} decoder in this FFmpeg build",
                config.codec.display_name()
            ))
        })?;

        let device = match config.device {
            DeviceType::None => None,
            other => Some(HwDeviceContext::create(other)?),
        };

        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec);
        context.set_flags(ffmpeg::codec::Flags::LOW_DELAY);
        let threads = if device.is_some() {
            1
        } else {
            config.threads as usize
        };
        context.set_threading(ffmpeg::threading::Config {
            kind: ffmpeg::threading::Type::Slice,
            count: threads,
            ..Default::default()
        });
        unsafe {
            // Report corrupt units instead of concealing them
            (*context.as_mut_ptr()).err_recognition |= ffmpeg::ffi::AV_EF_EXPLODE as i32;
        }
        if let Some(device) = &device {
            let reference = device.new_ref()?;
            unsafe {
                (*context.as_mut_ptr()).hw_device_ctx = reference;
            }
        }

        let decoder = context
            .decoder()
            .open_as(codec)
            .and_then(|opened| opened.video())
            .map_err(|e| {
                let message = format!("failed to open {}: {}", codec.name(), e);
                if device.is_some() {
                    Error::OutOfResources(message)
                } else {
                    Error::InvalidConfig(message)
                }
            })?;

        let decoder_name = decoder_names(config.codec, config.device)
            .iter()
            .copied()
            .find(|name| *name == codec.name())
            .unwrap_or("unknown");

        tracing::info!(
            "Decoder opened: {} ({}) on {}",
            decoder_name,
            config.codec.display_name(),
            config.device
        );

        Ok(Self {
            config,
            decoder,
            decoder_name,
            _device: device,
            frame: ffmpeg::frame::Video::empty(),
            sw_frame: ffmpeg::frame::Video::empty(),
            sink,
            stats: DecoderStats::default(),
            awaiting_keyframe: true,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// FFmpeg decoder in use (e.g. "h264")
    pub fn decoder_name(&self) -> &'static str {
        self.decoder_name
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Whether input is being dropped until the next keyframe
    pub fn awaiting_keyframe(&self) -> bool {
        self.awaiting_keyframe
    }

    /// Decode one compressed unit
    ///
    /// Returns the number of frames delivered to the sink. Units ahead of
    /// the first keyframe are dropped and report zero frames.
    pub fn decode(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(Error::MalformedInput("empty compressed unit".into()));
        }
        self.stats.units += 1;

        if self.awaiting_keyframe {
            if !bitstream::contains_keyframe(self.config.codec, data) {
                self.stats.skipped += 1;
                tracing::debug!("Dropping {} byte unit while waiting for a keyframe", data.len());
                return Ok(0);
            }
            self.awaiting_keyframe = false;
        }

        let packet = ffmpeg::Packet::copy(data);
        if let Err(e) = self.decoder.send_packet(&packet) {
            return Err(self.reject(format!("decoder rejected unit: {}", e)));
        }
        self.drain()
    }

    /// Deliver frames still held by the decoder and reset it
    ///
    /// The session stays usable; the next unit must carry a keyframe.
    pub fn flush(&mut self) -> Result<usize> {
        let delivered = match self.decoder.send_eof() {
            Ok(()) => self.drain()?,
            Err(e) => {
                tracing::warn!("Failed to signal end of stream: {}", e);
                0
            }
        };
        self.decoder.flush();
        self.awaiting_keyframe = true;
        tracing::debug!("{} flushed, {} frames delivered", self.decoder_name, delivered);
        Ok(delivered)
    }

    fn reject(&mut self, message: String) -> Error {
        self.stats.errors += 1;
        self.awaiting_keyframe = true;
        tracing::warn!("{}", message);
        Error::MalformedInput(message)
    }

    fn drain(&mut self) -> Result<usize> {
        let mut delivered = 0;
        loop {
            match self.decoder.receive_frame(&mut self.frame) {
                Ok(()) => {
                    if self.deliver_current()? {
                        delivered += 1;
                    }
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(self.reject(format!("failed to decode frame: {}", e))),
            }
        }
        self.stats.frames += delivered as u64;
        Ok(delivered)
    }

    /// Hand the frame in `self.frame` to the sink, downloading it first if
    /// it lives in device memory
    fn deliver_current(&mut self) -> Result<bool> {
        let keyframe = self.frame.is_key();
        let on_device = unsafe { !(*self.frame.as_ptr()).hw_frames_ctx.is_null() };

        let frame = if on_device {
            let ret = unsafe {
                ffmpeg::ffi::av_hwframe_transfer_data(
                    self.sw_frame.as_mut_ptr(),
                    self.frame.as_ptr(),
                    0,
                )
            };
            if ret < 0 {
                self.stats.errors += 1;
                return Err(transfer_error(self.config.device, ret));
            }
            &self.sw_frame
        } else {
            &self.frame
        };

        let Some(format) = PixelFormat::from_ffmpeg(frame.format()) else {
            self.stats.errors += 1;
            return Err(Error::InvalidFormat(format!(
                "unsupported decoded pixel format {:?}",
                frame.format()
            )));
        };

        let mut planes = PlaneArray::new();
        let mut strides = PlaneArray::new();
        for plane in 0..format.plane_count().min(frame.planes()) {
            if planes.try_push(frame.data(plane)).is_err()
                || strides.try_push(frame.stride(plane)).is_err()
            {
                return Err(Error::InvalidFormat(format!(
                    "{} has more planes than supported",
                    format
                )));
            }
        }

        self.sink.deliver(DecodedFrame {
            width: frame.width(),
            height: frame.height(),
            format,
            planes,
            strides,
            keyframe,
        });
        Ok(true)
    }
}

/// Failure to download a decoded surface into system memory
fn transfer_error(device: DeviceType, ret: i32) -> Error {
    let message = format!(
        "failed to transfer frame from {}: {}",
        device,
        ffmpeg::Error::from(ret)
    );
    tracing::error!("{}", message);
    Error::OutOfResources(message)
}

impl<S: FrameSink> Drop for Decoder<S> {
    fn drop(&mut self) {
        tracing::debug!(
            "Dropping {} after {} units, {} frames",
            self.decoder_name,
            self.stats.units,
            self.stats.frames
        );
    }
}

/// A decoder and device pair usable on this system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderInfo {
    pub codec: Codec,
    pub device: DeviceType,
}

/// List decoder/device pairs that can be opened here
///
/// Hardware devices are checked by creating a device context.
pub fn available_decoders() -> Vec<DecoderInfo> {
    if crate::init_ffmpeg().is_err() {
        return Vec::new();
    }

    let devices: Vec<DeviceType> = DeviceType::ALL
        .into_iter()
        .filter(|device| device.is_supported_on_platform())
        .filter(|device| match device {
            DeviceType::None => true,
            other => HwDeviceContext::create(*other).is_ok(),
        })
        .collect();

    let mut infos = Vec::new();
    for codec in Codec::ALL {
        for &device in &devices {
            if find_decoder(codec, device).is_some() {
                infos.push(DecoderInfo { codec, device });
            }
        }
    }
    infos
}
