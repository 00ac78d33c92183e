//! Video encoding module
//!
//! One [`Encoder`] session type drives every back-end through FFmpeg. The
//! back-ends (NVENC, Quick Sync, AMF, VideoToolbox, CPU) differ only in
//! their [`BackendProfile`]: encoder names, accepted pixel formats and the
//! option dictionary handed to the codec.
//!
//! Back-pressure: there is no internal queue. [`Encoder::encode`] submits
//! one frame and drains every packet the codec has ready before returning.
//! All profiles disable B-frames and lookahead, so realtime back-ends emit
//! one packet per frame. Callers that fall behind drop frames upstream.

pub mod amf;
pub mod nvenc;
pub mod qsv;
pub mod software;
pub mod videotoolbox;

use crate::config::{EncoderConfig, RateControl};
use crate::error::{Error, Result};
use crate::gpu::GpuDevice;
use crate::layout::FrameBufferLayout;
use crate::processing::PackedConverter;
use crate::types::{EncodedPacket, Packet, PixelFormat, Resolution};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::Dictionary;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Instant;

/// Supported video codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// H.264/AVC - Widest compatibility
    #[default]
    H264,
    /// H.265/HEVC - Better compression
    Hevc,
    /// AV1 - Best compression
    Av1,
}

impl Codec {
    pub const ALL: [Codec; 3] = [Codec::H264, Codec::Hevc, Codec::Av1];

    /// Short lowercase name ("h264", "hevc", "av1")
    pub fn name(&self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::Hevc => "hevc",
            Codec::Av1 => "av1",
        }
    }

    /// Get human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            Codec::H264 => "H.264 (AVC)",
            Codec::Hevc => "H.265 (HEVC)",
            Codec::Av1 => "AV1",
        }
    }

    pub fn ffmpeg_id(&self) -> ffmpeg::codec::Id {
        match self {
            Codec::H264 => ffmpeg::codec::Id::H264,
            Codec::Hevc => ffmpeg::codec::Id::HEVC,
            Codec::Av1 => ffmpeg::codec::Id::AV1,
        }
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Codec::H264),
            "hevc" | "h265" => Ok(Codec::Hevc),
            "av1" => Ok(Codec::Av1),
            other => Err(Error::InvalidConfig(format!("unknown codec '{}'", other))),
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Encoder back-end selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// NVIDIA NVENC
    Nvenc,
    /// Intel Quick Sync Video
    Qsv,
    /// AMD Advanced Media Framework
    Amf,
    /// Apple VideoToolbox
    VideoToolbox,
    /// CPU encoding (x264/x265/SVT-AV1)
    #[default]
    Software,
}

impl Backend {
    pub const ALL: [Backend; 5] = [
        Backend::Nvenc,
        Backend::Qsv,
        Backend::Amf,
        Backend::VideoToolbox,
        Backend::Software,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Nvenc => "nvenc",
            Backend::Qsv => "qsv",
            Backend::Amf => "amf",
            Backend::VideoToolbox => "videotoolbox",
            Backend::Software => "software",
        }
    }

    pub(crate) fn profile(&self) -> &'static dyn BackendProfile {
        match self {
            Backend::Nvenc => &nvenc::Nvenc,
            Backend::Qsv => &qsv::Qsv,
            Backend::Amf => &amf::Amf,
            Backend::VideoToolbox => &videotoolbox::VideoToolbox,
            Backend::Software => &software::Software,
        }
    }

    /// FFmpeg encoder name for `codec` on this back-end, if the pair is supported
    pub fn encoder_name(&self, codec: Codec) -> Option<&'static str> {
        self.profile().encoder_name(codec)
    }

    /// Raw pixel formats this back-end accepts
    pub fn pixel_formats(&self) -> &'static [PixelFormat] {
        self.profile().pixel_formats()
    }

    pub fn priority(&self) -> Priority {
        self.profile().priority()
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nvenc" | "nvidia" => Ok(Backend::Nvenc),
            "qsv" | "intel" => Ok(Backend::Qsv),
            "amf" | "amd" => Ok(Backend::Amf),
            "videotoolbox" | "vt" => Ok(Backend::VideoToolbox),
            "software" | "cpu" | "sw" => Ok(Backend::Software),
            other => Err(Error::InvalidConfig(format!("unknown encoder back-end '{}'", other))),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Preference order when several back-ends can encode the same codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Best = 0,
    Good = 1,
    Normal = 2,
    Soft = 3,
    Bad = 4,
}

/// Per back-end encoder knowledge
pub(crate) trait BackendProfile: Sync {
    fn encoder_name(&self, codec: Codec) -> Option<&'static str>;

    fn pixel_formats(&self) -> &'static [PixelFormat];

    fn priority(&self) -> Priority;

    fn is_hardware(&self) -> bool {
        true
    }

    fn supports_rate_control(&self, _rc: RateControl) -> bool {
        true
    }

    /// Back-end specific codec options (preset, latency, rate control)
    fn configure(&self, config: &EncoderConfig, opts: &mut Dictionary);
}

/// Resolve the FFmpeg encoder for a configuration, checking the supported table
pub fn supported_encoder_name(config: &EncoderConfig) -> Result<&'static str> {
    let profile = config.backend.profile();
    let name = profile.encoder_name(config.codec).ok_or_else(|| {
        Error::InvalidConfig(format!(
            "{} cannot encode {}",
            config.backend,
            config.codec.name()
        ))
    })?;
    if !profile.pixel_formats().contains(&config.pixel_format) {
        return Err(Error::InvalidConfig(format!(
            "{} does not accept {} input",
            name, config.pixel_format
        )));
    }
    if !profile.supports_rate_control(config.rate_control) {
        return Err(Error::InvalidConfig(format!(
            "{} does not support {:?} rate control",
            name, config.rate_control
        )));
    }
    Ok(name)
}

/// Check if a codec/back-end pair is compiled into the linked FFmpeg
pub fn is_available(codec: Codec, backend: Backend) -> bool {
    if crate::init_ffmpeg().is_err() {
        return false;
    }
    backend
        .encoder_name(codec)
        .is_some_and(|name| ffmpeg::encoder::find_by_name(name).is_some())
}

/// Receiver of encoded packets
///
/// Packets are delivered in submission order, during the `encode` call
/// that produced them. The borrowed bytes must be copied to be retained.
pub trait PacketSink {
    fn deliver(&mut self, packet: EncodedPacket<'_>);
}

impl<F> PacketSink for F
where
    F: FnMut(EncodedPacket<'_>),
{
    fn deliver(&mut self, packet: EncodedPacket<'_>) {
        self(packet)
    }
}

impl PacketSink for crossbeam_channel::Sender<Packet> {
    fn deliver(&mut self, packet: EncodedPacket<'_>) {
        if self.send(packet.to_owned()).is_err() {
            tracing::warn!("Packet receiver dropped, discarding packet at {}ms", packet.pts_ms);
        }
    }
}

impl PacketSink for Vec<Packet> {
    fn deliver(&mut self, packet: EncodedPacket<'_>) {
        self.push(packet.to_owned());
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    /// Frames submitted
    pub frames_submitted: u64,
    /// Packets delivered to the sink
    pub packets: u64,
    /// Keyframes delivered
    pub keyframes: u64,
    /// Total bytes output
    pub bytes_output: u64,
    /// Average time per encode call (ms)
    pub avg_encode_time_ms: f64,
    /// Current bitrate target (kbps)
    pub bitrate_kbps: u32,
}

/// Encoder session
///
/// Owns one opened FFmpeg encoder and the sink its packets go to.
pub struct Encoder<S: PacketSink> {
    config: EncoderConfig,
    encoder_name: &'static str,
    encoder: ffmpeg::encoder::Video,
    layout: FrameBufferLayout,
    converter: Option<PackedConverter>,
    sink: S,
    stats: EncoderStats,
    keyframe_pending: bool,
    emitted_keyframe: bool,
    flushed: bool,
}

impl<S: PacketSink> Encoder<S> {
    /// Open an encoder session delivering packets to `sink`
    pub fn new(config: EncoderConfig, sink: S) -> Result<Self> {
        config.validate()?;
        let encoder_name = supported_encoder_name(&config)?;
        crate::init_ffmpeg()?;

        let codec = ffmpeg::encoder::find_by_name(encoder_name).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "{} is not available in this FFmpeg build",
                encoder_name
            ))
        })?;

        let layout = FrameBufferLayout::compute(
            config.pixel_format,
            config.width,
            config.height,
            config.align,
        )?;

        let context = ffmpeg::codec::context::Context::new_with_codec(codec);
        let mut encoder = context
            .encoder()
            .video()
            .map_err(|e| Error::FFmpeg(e.to_string()))?;

        encoder.set_width(config.width);
        encoder.set_height(config.height);
        encoder.set_format(config.pixel_format.to_ffmpeg());
        encoder.set_time_base(ffmpeg::Rational::new(1, 1000));
        encoder.set_frame_rate(Some(ffmpeg::Rational::new(config.framerate as i32, 1)));
        encoder.set_gop(config.gop);
        encoder.set_max_b_frames(0);
        encoder.set_flags(ffmpeg::codec::Flags::LOW_DELAY);
        encoder.set_colorspace(ffmpeg::color::Space::SMPTE170M);
        encoder.set_color_range(ffmpeg::color::Range::MPEG);
        unsafe {
            apply_bitrate(encoder.as_mut_ptr(), &config, config.bitrate_kbps);
        }

        let profile = config.backend.profile();
        let mut opts = Dictionary::new();
        if config.threads > 0 {
            opts.set("threads", &config.threads.to_string());
        }
        profile.configure(&config, &mut opts);

        let encoder = encoder.open_with(opts).map_err(|e| {
            let message = format!("failed to open {}: {}", encoder_name, e);
            if profile.is_hardware() {
                Error::OutOfResources(message)
            } else {
                Error::InvalidConfig(message)
            }
        })?;

        tracing::info!(
            "Encoder opened: {} {}x{} {} @ {}fps, {:?} {}kbps",
            encoder_name,
            config.width,
            config.height,
            config.pixel_format,
            config.framerate,
            config.rate_control,
            config.bitrate_kbps
        );

        let stats = EncoderStats {
            bitrate_kbps: config.bitrate_kbps,
            ..Default::default()
        };

        Ok(Self {
            config,
            encoder_name,
            encoder,
            layout,
            converter: None,
            sink,
            stats,
            keyframe_pending: true,
            emitted_keyframe: false,
            flushed: false,
        })
    }

    /// Layout raw input buffers must follow
    pub fn layout(&self) -> &FrameBufferLayout {
        &self.layout
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// FFmpeg encoder in use (e.g. "h264_nvenc")
    pub fn encoder_name(&self) -> &'static str {
        self.encoder_name
    }

    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Encode one raw frame laid out per [`layout`](Self::layout)
    ///
    /// Returns the number of packets delivered to the sink.
    pub fn encode(&mut self, input: &[u8], pts_ms: i64) -> Result<usize> {
        self.ensure_open()?;
        let planes = self.layout.split(input)?;

        let mut frame = ffmpeg::frame::Video::new(
            self.config.pixel_format.to_ffmpeg(),
            self.config.width,
            self.config.height,
        );
        for (i, src) in planes.iter().enumerate() {
            let src_stride = self.layout.strides()[i];
            let row = self.layout.row_bytes(i);
            let dst_stride = frame.stride(i);
            let dst = frame.data_mut(i);
            for y in 0..self.layout.plane_heights()[i] {
                dst[y * dst_stride..y * dst_stride + row]
                    .copy_from_slice(&src[y * src_stride..y * src_stride + row]);
            }
        }

        self.submit(frame, pts_ms)
    }

    /// Encode a captured GPU texture
    ///
    /// The texture is read back and colour-converted to the configured
    /// pixel format (and scaled if its size differs from the session's).
    pub fn encode_texture(
        &mut self,
        device: &GpuDevice,
        texture: &wgpu::Texture,
        pts_ms: i64,
    ) -> Result<usize> {
        self.ensure_open()?;
        let format = crate::gpu::packed_format(texture.format())?;
        let source = Resolution::new(texture.width(), texture.height());
        let pixels = device.read_texture(texture)?;

        let reusable = self
            .converter
            .as_ref()
            .is_some_and(|c| c.matches(format, source));
        if !reusable {
            self.converter = Some(PackedConverter::new(
                format,
                source,
                self.config.pixel_format,
                self.config.resolution(),
            )?);
        }
        let frame = match self.converter.as_mut() {
            Some(converter) => converter.convert(&pixels, source.width as usize * 4)?,
            None => return Err(Error::ContractViolation("converter missing".into())),
        };

        self.submit(frame, pts_ms)
    }

    /// Force the next submitted frame to be an IDR frame
    pub fn request_keyframe(&mut self) {
        self.keyframe_pending = true;
    }

    /// Change the target bitrate without reopening the codec
    ///
    /// Does not force a keyframe. In constant-quality mode only the stored
    /// target changes.
    pub fn set_bitrate(&mut self, kbps: u32) -> Result<()> {
        if kbps == 0 {
            return Err(Error::InvalidConfig("bitrate must be positive".into()));
        }
        self.config.bitrate_kbps = kbps;
        self.stats.bitrate_kbps = kbps;

        if self.config.rate_control == RateControl::Cq {
            tracing::debug!("Constant quality mode, bitrate target recorded only");
            return Ok(());
        }

        unsafe {
            apply_bitrate(self.encoder.as_mut_ptr(), &self.config, kbps);
        }
        tracing::info!("{} bitrate changed to {}kbps", self.encoder_name, kbps);
        Ok(())
    }

    /// Drain packets still buffered in the codec; the session accepts no
    /// more frames afterwards
    pub fn flush(&mut self) -> Result<usize> {
        if self.flushed {
            return Ok(0);
        }
        self.encoder
            .send_eof()
            .map_err(|e| Error::TransientIo(format!("failed to send EOF: {}", e)))?;
        self.flushed = true;
        let delivered = self.drain()?;

        tracing::info!(
            "{} flushed: {} frames, {} packets, {} bytes, avg {:.2}ms/frame",
            self.encoder_name,
            self.stats.frames_submitted,
            self.stats.packets,
            self.stats.bytes_output,
            self.stats.avg_encode_time_ms
        );
        Ok(delivered)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.flushed {
            return Err(Error::ContractViolation(
                "encoder already flushed".into(),
            ));
        }
        Ok(())
    }

    fn submit(&mut self, mut frame: ffmpeg::frame::Video, pts_ms: i64) -> Result<usize> {
        let started = Instant::now();

        frame.set_pts(Some(pts_ms));
        if self.keyframe_pending {
            frame.set_kind(ffmpeg::picture::Type::I);
            tracing::debug!("Forcing keyframe at {}ms", pts_ms);
        }

        self.encoder
            .send_frame(&frame)
            .map_err(|e| Error::TransientIo(format!("failed to send frame: {}", e)))?;
        self.keyframe_pending = false;
        self.stats.frames_submitted += 1;

        let delivered = self.drain()?;

        let encode_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.avg_encode_time_ms = if self.stats.frames_submitted == 1 {
            encode_ms
        } else {
            self.stats.avg_encode_time_ms * 0.95 + encode_ms * 0.05
        };
        Ok(delivered)
    }

    fn drain(&mut self) -> Result<usize> {
        let mut delivered = 0;
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let keyframe = packet.is_key();
                    if !self.emitted_keyframe {
                        if !keyframe {
                            tracing::warn!("Discarding packet ahead of the first keyframe");
                            continue;
                        }
                        self.emitted_keyframe = true;
                    }
                    let Some(data) = packet.data() else {
                        continue;
                    };

                    self.stats.packets += 1;
                    self.stats.bytes_output += data.len() as u64;
                    if keyframe {
                        self.stats.keyframes += 1;
                    }
                    self.sink.deliver(EncodedPacket {
                        data,
                        pts_ms: packet.pts().unwrap_or_default(),
                        keyframe,
                    });
                    delivered += 1;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    return Err(Error::TransientIo(format!(
                        "failed to receive packet: {}",
                        e
                    )))
                }
            }
        }
        Ok(delivered)
    }
}

impl<S: PacketSink> Drop for Encoder<S> {
    fn drop(&mut self) {
        tracing::debug!(
            "Dropping {} after {} frames",
            self.encoder_name,
            self.stats.frames_submitted
        );
    }
}

/// Write the rate-control fields of an encoder context
///
/// CBR pins min/max rate to the target with a one-frame VBV buffer so the
/// encoder reacts on the next frame; VBR allows 1.5x peaks over one second.
///
/// # Safety
/// `ctx` must point to a live `AVCodecContext`.
unsafe fn apply_bitrate(ctx: *mut ffmpeg::ffi::AVCodecContext, config: &EncoderConfig, kbps: u32) {
    let bit_rate = kbps as i64 * 1000;
    match config.rate_control {
        RateControl::Cbr => {
            (*ctx).bit_rate = bit_rate;
            (*ctx).rc_max_rate = bit_rate;
            (*ctx).rc_min_rate = bit_rate;
            (*ctx).rc_buffer_size = (bit_rate / config.framerate.max(1) as i64)
                .min(i32::MAX as i64) as i32;
        }
        RateControl::Vbr => {
            (*ctx).bit_rate = bit_rate;
            (*ctx).rc_max_rate = bit_rate * 3 / 2;
            (*ctx).rc_min_rate = 0;
            (*ctx).rc_buffer_size = bit_rate.min(i32::MAX as i64) as i32;
        }
        RateControl::Cq => {}
    }
}

/// An encoder that FFmpeg can provide on this system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecInfo {
    /// FFmpeg encoder name
    pub name: &'static str,
    pub codec: Codec,
    pub backend: Backend,
    pub priority: Priority,
}

/// Best available encoder per codec
#[derive(Debug, Clone, Default)]
pub struct CodecInfos {
    pub h264: Option<CodecInfo>,
    pub hevc: Option<CodecInfo>,
    pub av1: Option<CodecInfo>,
}

impl CodecInfos {
    pub fn get(&self, codec: Codec) -> Option<&CodecInfo> {
        match codec {
            Codec::H264 => self.h264.as_ref(),
            Codec::Hevc => self.hevc.as_ref(),
            Codec::Av1 => self.av1.as_ref(),
        }
    }
}

impl CodecInfo {
    /// Pick the highest-priority entry for every codec
    pub fn prioritized(infos: Vec<CodecInfo>) -> CodecInfos {
        let mut best = CodecInfos::default();
        for info in infos {
            let slot = match info.codec {
                Codec::H264 => &mut best.h264,
                Codec::Hevc => &mut best.hevc,
                Codec::Av1 => &mut best.av1,
            };
            if slot.map_or(true, |current| info.priority < current.priority) {
                *slot = Some(info);
            }
        }
        best
    }
}

/// List encoders compiled into FFmpeg
///
/// With `verify`, each candidate must also open a small session and produce
/// a keyframe, which weeds out hardware encoders without a usable device.
pub fn available_encoders(verify: bool) -> Vec<CodecInfo> {
    let mut infos = Vec::new();
    for backend in Backend::ALL {
        for codec in Codec::ALL {
            let Some(name) = backend.encoder_name(codec) else {
                continue;
            };
            if !is_available(codec, backend) {
                continue;
            }
            if verify && !open_test_session(codec, backend) {
                tracing::debug!("{} compiled in but failed to encode a test frame", name);
                continue;
            }
            infos.push(CodecInfo {
                name,
                codec,
                backend,
                priority: backend.priority(),
            });
        }
    }
    infos
}

fn open_test_session(codec: Codec, backend: Backend) -> bool {
    let Some(&format) = backend.pixel_formats().first() else {
        return false;
    };
    let config = EncoderConfig::default()
        .with_codec(codec)
        .with_backend(backend)
        .with_resolution(640, 480)
        .with_pixel_format(format)
        .with_bitrate_kbps(500);

    let mut got_keyframe = false;
    let result = Encoder::new(config, |packet: EncodedPacket<'_>| {
        got_keyframe |= packet.keyframe;
    })
    .and_then(|mut encoder| {
        let frame = vec![0x80u8; encoder.layout().length()];
        encoder.encode(&frame, 0)?;
        encoder.flush()
    });
    result.is_ok() && got_keyframe
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::synthetic_frame;

    fn software_h264(width: u32, height: u32) -> Option<EncoderConfig> {
        if !is_available(Codec::H264, Backend::Software) {
            println!("libx264 not available, skipping test");
            return None;
        }
        Some(
            EncoderConfig::default()
                .with_resolution(width, height)
                .with_framerate(30)
                .with_bitrate_kbps(1000),
        )
    }

    #[test]
    fn test_supported_table() {
        let config = EncoderConfig::default().with_backend(Backend::Qsv);
        assert_eq!(supported_encoder_name(&config).unwrap(), "h264_qsv");

        let yuv = config.clone().with_pixel_format(PixelFormat::Yuv420p);
        assert!(matches!(
            supported_encoder_name(&yuv),
            Err(Error::InvalidConfig(_))
        ));

        let vt_av1 = EncoderConfig::default()
            .with_backend(Backend::VideoToolbox)
            .with_codec(Codec::Av1);
        assert!(supported_encoder_name(&vt_av1).is_err());

        let vt_cq = EncoderConfig::default()
            .with_backend(Backend::VideoToolbox)
            .with_rate_control(RateControl::Cq);
        assert!(supported_encoder_name(&vt_cq).is_err());

        let bgra = EncoderConfig::default().with_pixel_format(PixelFormat::Bgra);
        assert!(supported_encoder_name(&bgra).is_err());
    }

    #[test]
    fn test_names_parse() {
        assert_eq!("H265".parse::<Codec>().unwrap(), Codec::Hevc);
        assert_eq!("cpu".parse::<Backend>().unwrap(), Backend::Software);
        assert!("mpeg2".parse::<Codec>().is_err());
    }

    #[test]
    fn test_prioritized_prefers_hardware() {
        let infos = vec![
            CodecInfo {
                name: "libx264",
                codec: Codec::H264,
                backend: Backend::Software,
                priority: Priority::Soft,
            },
            CodecInfo {
                name: "h264_nvenc",
                codec: Codec::H264,
                backend: Backend::Nvenc,
                priority: Priority::Best,
            },
            CodecInfo {
                name: "hevc_amf",
                codec: Codec::Hevc,
                backend: Backend::Amf,
                priority: Priority::Good,
            },
        ];
        let best = CodecInfo::prioritized(infos);
        assert_eq!(best.get(Codec::H264).map(|i| i.name), Some("h264_nvenc"));
        assert_eq!(best.get(Codec::Hevc).map(|i| i.name), Some("hevc_amf"));
        assert!(best.av1.is_none());
    }

    #[test]
    fn test_invalid_geometry_rejected_before_ffmpeg() {
        let config = EncoderConfig::default().with_resolution(641, 480);
        let result = Encoder::new(config, Vec::<Packet>::new());
        assert!(matches!(result, Err(Error::InvalidGeometry(_))));
    }

    #[test]
    fn test_first_packet_is_keyframe() {
        let Some(config) = software_h264(320, 240) else {
            return;
        };
        let mut encoder = Encoder::new(config, Vec::<Packet>::new()).unwrap();
        for i in 0..10 {
            let frame = synthetic_frame(encoder.layout(), i, false);
            encoder.encode(&frame, i as i64 * 33).unwrap();
        }
        encoder.flush().unwrap();

        let packets = encoder.sink();
        assert_eq!(packets.len(), 10);
        assert!(packets[0].keyframe);
        assert_eq!(packets[0].pts_ms, 0);
        let late = synthetic_frame(encoder.layout(), 10, false);
        assert!(matches!(
            encoder.encode(&late, 330),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let Some(config) = software_h264(320, 240) else {
            return;
        };
        let mut encoder = Encoder::new(config, Vec::<Packet>::new()).unwrap();
        let short = vec![0u8; encoder.layout().length() - 1];
        assert!(matches!(
            encoder.encode(&short, 0),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_request_keyframe() {
        let Some(config) = software_h264(320, 240) else {
            return;
        };
        let mut encoder = Encoder::new(config, Vec::<Packet>::new()).unwrap();
        for i in 0..6 {
            if i == 4 {
                encoder.request_keyframe();
            }
            let frame = synthetic_frame(encoder.layout(), i, false);
            encoder.encode(&frame, i as i64 * 33).unwrap();
        }
        let keys: Vec<bool> = encoder.sink().iter().map(|p| p.keyframe).collect();
        assert_eq!(keys.len(), 6);
        assert!(keys[0]);
        assert!(keys[4]);
    }

    #[test]
    fn test_set_bitrate_changes_packet_sizes_without_keyframe() {
        let Some(config) = software_h264(320, 240) else {
            return;
        };
        let config = config.with_bitrate_kbps(4000);
        let mut encoder = Encoder::new(config, Vec::<Packet>::new()).unwrap();

        let mut index = 0u64;
        let mut run = |encoder: &mut Encoder<Vec<Packet>>, frames: u64| {
            for _ in 0..frames {
                let frame = synthetic_frame(encoder.layout(), index, true);
                encoder.encode(&frame, index as i64 * 33).unwrap();
                index += 1;
            }
        };

        run(&mut encoder, 20);
        let high_len = encoder.sink().len();
        encoder.set_bitrate(100).unwrap();
        assert_eq!(encoder.stats().bitrate_kbps, 100);
        run(&mut encoder, 20);

        let packets = encoder.sink();
        let avg = |slice: &[Packet]| slice.iter().map(Packet::size).sum::<usize>() / slice.len().max(1);
        let before = avg(&packets[high_len - 10..high_len]);
        let after = avg(&packets[packets.len() - 10..]);
        assert!(after < before, "before {} after {}", before, after);
        assert!(packets[high_len..].iter().all(|p| !p.keyframe));
    }

    #[test]
    fn test_available_encoders_verified() {
        if !is_available(Codec::H264, Backend::Software) {
            println!("libx264 not available, skipping test");
            return;
        }
        let infos = available_encoders(true);
        assert!(infos.iter().any(|i| i.name == "libx264"));
        let best = CodecInfo::prioritized(infos);
        assert!(best.h264.is_some());
    }
}
