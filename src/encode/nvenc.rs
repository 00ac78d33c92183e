//! NVIDIA NVENC profile
//!
//! Ultra-low-latency tuning with no lookahead and no frame delay, so each
//! submitted frame comes back as one packet in the same call.

use crate::config::{EncoderConfig, Quality, RateControl};
use crate::types::PixelFormat;

use super::{BackendProfile, Codec, Priority};

use ffmpeg_next::Dictionary;

pub(crate) struct Nvenc;

impl Nvenc {
    fn preset(quality: Quality) -> &'static str {
        match quality {
            Quality::Best => "p4",
            Quality::Balanced => "p2",
            Quality::Low => "p1",
        }
    }
}

impl BackendProfile for Nvenc {
    fn encoder_name(&self, codec: Codec) -> Option<&'static str> {
        Some(match codec {
            Codec::H264 => "h264_nvenc",
            Codec::Hevc => "hevc_nvenc",
            Codec::Av1 => "av1_nvenc",
        })
    }

    fn pixel_formats(&self) -> &'static [PixelFormat] {
        &[PixelFormat::Nv12, PixelFormat::Yuv420p, PixelFormat::P010]
    }

    fn priority(&self) -> Priority {
        Priority::Best
    }

    fn configure(&self, config: &EncoderConfig, opts: &mut Dictionary) {
        opts.set("preset", Self::preset(config.quality));
        opts.set("tune", "ull");
        opts.set("delay", "0");
        opts.set("zerolatency", "1");
        opts.set("rc-lookahead", "0");
        opts.set("forced-idr", "1");

        match config.rate_control {
            RateControl::Cbr => opts.set("rc", "cbr"),
            RateControl::Vbr => opts.set("rc", "vbr"),
            RateControl::Cq => {
                opts.set("rc", "constqp");
                opts.set("qp", &config.qp.to_string());
            }
        }

        if let Some(gpu) = config.gpu_index {
            opts.set("gpu", &gpu.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{is_available, Backend, Encoder};
    use crate::types::Packet;

    fn option<'a>(opts: &'a Dictionary, key: &str) -> Option<&'a str> {
        opts.get(key)
    }

    #[test]
    fn test_options_for_cq() {
        let config = EncoderConfig::default()
            .with_backend(Backend::Nvenc)
            .with_rate_control(RateControl::Cq)
            .with_qp(30)
            .with_gpu_index(1);
        let mut opts = Dictionary::new();
        Nvenc.configure(&config, &mut opts);
        assert_eq!(option(&opts, "rc"), Some("constqp"));
        assert_eq!(option(&opts, "qp"), Some("30"));
        assert_eq!(option(&opts, "gpu"), Some("1"));
        assert_eq!(option(&opts, "delay"), Some("0"));
    }

    #[test]
    fn test_nvenc_session() {
        if !is_available(Codec::H264, Backend::Nvenc) {
            println!("NVENC not available, skipping test");
            return;
        }
        let config = EncoderConfig::default()
            .with_backend(Backend::Nvenc)
            .with_resolution(1280, 720);
        match Encoder::new(config, Vec::<Packet>::new()) {
            Ok(encoder) => assert_eq!(encoder.encoder_name(), "h264_nvenc"),
            Err(e) => println!("NVENC session failed to open ({}), skipping", e),
        }
    }
}
