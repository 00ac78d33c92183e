//! Synchronous media pipelines
//!
//! - [`RecordPipeline`]: capture → encode → mux
//! - [`run_bench`]: synthetic frames → encode → decode (→ mux)

use crate::capture::Capturer;
use crate::config::{DecoderConfig, EncoderConfig, MuxConfig};
use crate::decode::Decoder;
use crate::encode::Encoder;
use crate::error::{Error, Result};
use crate::layout::FrameBufferLayout;
use crate::output::Muxer;
use crate::types::{DecodedFrame, Packet, Stats};

use crossbeam_channel::Receiver;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Generate a test frame laid out per `layout`
///
/// The luma plane (or every channel of a packed format) carries a diagonal
/// gradient that moves with `index`; chroma stays neutral. With `noisy`,
/// pseudo-random detail is mixed in so frames compress like real content.
pub fn synthetic_frame(layout: &FrameBufferLayout, index: u64, noisy: bool) -> Vec<u8> {
    let mut buffer = vec![128u8; layout.length()];
    let Some(range) = layout.plane_range(0) else {
        return buffer;
    };
    let stride = layout.strides()[0];
    let row_bytes = layout.row_bytes(0);
    let mut seed = index.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;

    for (y, row) in buffer[range].chunks_mut(stride).enumerate() {
        for (x, value) in row[..row_bytes.min(row.len())].iter_mut().enumerate() {
            let mut v = (x as u64 + y as u64 + index * 4) as u8;
            if noisy {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                v = v.wrapping_add((seed & 0x3f) as u8);
            }
            *value = v;
        }
    }
    buffer
}

/// Capture → encode → mux loop driven by the caller
pub struct RecordPipeline {
    capturer: Capturer,
    encoder: Encoder<crossbeam_channel::Sender<Packet>>,
    packets: Receiver<Packet>,
    muxer: Muxer,
    stats: Stats,
}

impl RecordPipeline {
    /// Record `capturer` into `output` with the given encoder settings
    pub fn new(capturer: Capturer, config: EncoderConfig, output: impl Into<PathBuf>) -> Result<Self> {
        let muxer = Muxer::new(MuxConfig::for_encoder(output, &config))?;
        let (sender, packets) = crossbeam_channel::unbounded();
        let encoder = Encoder::new(config, sender)?;

        tracing::info!(
            "Recording {}x{} capture with {} into {}",
            capturer.width(),
            capturer.height(),
            encoder.encoder_name(),
            muxer.path().display()
        );

        Ok(Self {
            capturer,
            encoder,
            packets,
            muxer,
            stats: Stats::default(),
        })
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn encoder_mut(&mut self) -> &mut Encoder<crossbeam_channel::Sender<Packet>> {
        &mut self.encoder
    }

    /// Capture, encode and mux at most one frame
    ///
    /// Returns whether a frame was captured within `timeout`.
    pub fn step(&mut self, timeout: Duration) -> Result<bool> {
        let Some(frame) = self.capturer.capture(timeout)? else {
            self.stats.capture_timeouts += 1;
            return Ok(false);
        };
        self.stats.frames_captured += 1;

        self.encoder
            .encode_texture(frame.device, frame.texture, frame.pts_ms)?;
        self.stats.frames_encoded += 1;
        self.stats.avg_encode_latency_ms = self.encoder.stats().avg_encode_time_ms;

        self.mux_pending()?;
        Ok(true)
    }

    /// Step until `duration` has elapsed
    pub fn run_for(&mut self, duration: Duration, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        while started.elapsed() < duration {
            self.step(timeout)?;
        }
        Ok(())
    }

    /// Flush the encoder and finalize the file
    pub fn finish(mut self) -> Result<Stats> {
        self.encoder.flush()?;
        self.mux_pending()?;
        self.muxer.write_tail()?;

        tracing::info!(
            "Recording finished: {} captured, {} timeouts, {} packets, {} bytes",
            self.stats.frames_captured,
            self.stats.capture_timeouts,
            self.stats.packets,
            self.stats.bytes_written
        );
        Ok(self.stats)
    }

    fn mux_pending(&mut self) -> Result<()> {
        for packet in self.packets.try_iter() {
            self.muxer
                .write_video_frame(&packet.data, packet.pts_ms, packet.keyframe)?;
            self.stats.packets += 1;
            self.stats.bytes_written += packet.size() as u64;
        }
        Ok(())
    }
}

/// Result of [`run_bench`]
#[derive(Debug, Clone, Default)]
pub struct BenchReport {
    pub encoder_name: String,
    pub frames: u64,
    pub packets: u64,
    pub keyframes: u64,
    pub bytes: u64,
    pub decoded: u64,
    pub max_packet: usize,
    pub avg_encode_ms: f64,
    pub elapsed: Duration,
}

impl BenchReport {
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }

    pub fn avg_packet(&self) -> usize {
        if self.packets == 0 {
            0
        } else {
            (self.bytes / self.packets) as usize
        }
    }
}

/// Push `frames` synthetic frames through encoder and decoder, optionally
/// muxing the packets into `mux`
pub fn run_bench(config: EncoderConfig, frames: u64, mux: Option<PathBuf>) -> Result<BenchReport> {
    let interval_ms = 1000 / config.framerate.max(1) as i64;
    let mut muxer = mux
        .map(|path| Muxer::new(MuxConfig::for_encoder(path, &config)))
        .transpose()?;

    let mut decoded = 0u64;
    let mut decoder = Decoder::new(
        DecoderConfig::new(config.codec, Default::default()),
        |_: DecodedFrame<'_>| decoded += 1,
    )?;
    let mut encoder = Encoder::new(config, Vec::<Packet>::new())?;

    let mut report = BenchReport {
        encoder_name: encoder.encoder_name().to_string(),
        ..Default::default()
    };
    let started = Instant::now();

    let mut handle = |packets: Vec<Packet>, report: &mut BenchReport| -> Result<()> {
        for packet in packets {
            report.packets += 1;
            report.bytes += packet.size() as u64;
            report.max_packet = report.max_packet.max(packet.size());
            if packet.keyframe {
                report.keyframes += 1;
            }
            if let Some(muxer) = muxer.as_mut() {
                muxer.write_video_frame(&packet.data, packet.pts_ms, packet.keyframe)?;
            }
            match decoder.decode(&packet.data) {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => tracing::warn!("Decode failed: {}", e),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    };

    for index in 0..frames {
        let frame = synthetic_frame(encoder.layout(), index, true);
        encoder.encode(&frame, index as i64 * interval_ms)?;
        report.frames += 1;
        handle(std::mem::take(encoder.sink_mut()), &mut report)?;
    }
    encoder.flush()?;
    handle(std::mem::take(encoder.sink_mut()), &mut report)?;
    drop(handle);

    decoder.flush()?;
    if let Some(muxer) = muxer.as_mut() {
        muxer.write_tail()?;
    }
    drop(decoder);

    report.decoded = decoded;
    report.avg_encode_ms = encoder.stats().avg_encode_time_ms;
    report.elapsed = started.elapsed();

    if report.frames > 0 && report.keyframes == 0 {
        return Err(Error::ContractViolation("encoder produced no keyframe".into()));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{is_available, Backend, Codec};
    use crate::types::PixelFormat;

    #[test]
    fn test_synthetic_frame_matches_layout() {
        let layout = FrameBufferLayout::compute(PixelFormat::Yuv420p, 64, 32, 32).unwrap();
        let frame = synthetic_frame(&layout, 3, false);
        assert_eq!(frame.len(), layout.length());
        assert_eq!(frame[0], 12);
        assert_eq!(frame[1], 13);
        assert_eq!(frame[layout.strides()[0]], 13);

        let chroma = layout.plane_range(1).unwrap();
        assert!(frame[chroma].iter().all(|&b| b == 128));
    }

    #[test]
    fn test_synthetic_frames_differ() {
        let layout = FrameBufferLayout::compute(PixelFormat::Nv12, 32, 16, 1).unwrap();
        assert_ne!(synthetic_frame(&layout, 0, false), synthetic_frame(&layout, 1, false));
        assert_ne!(synthetic_frame(&layout, 0, true), synthetic_frame(&layout, 0, false));
        assert_eq!(synthetic_frame(&layout, 5, true), synthetic_frame(&layout, 5, true));
    }

    #[test]
    fn test_bench_round_trip() {
        if !is_available(Codec::H264, Backend::Software) {
            println!("libx264 not available, skipping test");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let config = EncoderConfig::default()
            .with_resolution(320, 240)
            .with_bitrate_kbps(800);

        let report = run_bench(config, 10, Some(dir.path().join("bench.mp4"))).unwrap();
        assert_eq!(report.frames, 10);
        assert_eq!(report.packets, 10);
        assert_eq!(report.decoded, 10);
        assert!(report.keyframes >= 1);
        assert!(report.max_packet >= report.avg_packet());
    }
}
