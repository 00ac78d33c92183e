//! deskpipe: hardware media pipeline for remote desktop
//!
//! Sessions for every stage of a remote desktop video path, each an owned
//! object released on drop:
//!
//! - **Capture**: screen updates into GPU textures (portal + PipeWire on Linux)
//! - **Encode**: H.264 / HEVC / AV1 via NVENC, QSV, AMF, VideoToolbox or software
//! - **Decode**: keyframe-gated decoding with optional hardware devices
//! - **Mux**: single-stream MP4 / Matroska / MPEG-TS recording
//! - **Render**: texture presentation on a surface or offscreen target
//!
//! A flat C interface over the same sessions lives in [`ffi`].
//!
//! # Example
//!
//! ```rust,no_run
//! use deskpipe::{Codec, Encoder, EncoderConfig, Packet};
//!
//! fn main() -> deskpipe::Result<()> {
//!     let config = EncoderConfig::default()
//!         .with_codec(Codec::H264)
//!         .with_resolution(1920, 1080);
//!     let mut encoder = Encoder::new(config, Vec::<Packet>::new())?;
//!
//!     let frame = vec![0u8; encoder.layout().length()];
//!     encoder.encode(&frame, 0)?;
//!     for packet in encoder.sink_mut().drain(..) {
//!         println!("{} bytes, key={}", packet.size(), packet.keyframe);
//!     }
//!     Ok(())
//! }
//! ```

pub mod bitstream;
pub mod capture;
pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod ffi;
pub mod gpu;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod processing;
pub mod render;
pub mod types;

// Re-exports for convenience
pub use capture::{CapturedFrame, Capturer, ChannelSource, FrameSender, ScreenSource, SourceFrame};
pub use config::{DecoderConfig, EncoderConfig, MuxConfig, Preset, Quality, RateControl};
pub use decode::{Decoder, DeviceType, FrameSink};
pub use encode::{Backend, Codec, Encoder, PacketSink};
pub use error::{Error, ErrorKind, Result};
pub use gpu::{AdapterId, GpuDevice};
pub use layout::FrameBufferLayout;
pub use output::{Container, Muxer};
pub use pipeline::RecordPipeline;
pub use render::{Render, RenderTarget};
pub use types::{DecodedFrame, EncodedPacket, Packet, PixelFormat, PlaneArray, Resolution};

use ffmpeg_next as ffmpeg;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize FFmpeg once; later calls are cheap
pub(crate) fn init_ffmpeg() -> Result<()> {
    ffmpeg::init().map_err(|e| Error::FFmpeg(format!("FFmpeg init failed: {}", e)))?;
    ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
    Ok(())
}
