//! Intel Quick Sync Video profile
//!
//! QSV only takes NV12/P010 surfaces; planar YUV420P input is rejected at
//! configuration time instead of being converted.

use crate::config::{EncoderConfig, Quality, RateControl};
use crate::types::PixelFormat;

use super::{BackendProfile, Codec, Priority};

use ffmpeg_next::Dictionary;

pub(crate) struct Qsv;

impl BackendProfile for Qsv {
    fn encoder_name(&self, codec: Codec) -> Option<&'static str> {
        Some(match codec {
            Codec::H264 => "h264_qsv",
            Codec::Hevc => "hevc_qsv",
            Codec::Av1 => "av1_qsv",
        })
    }

    fn pixel_formats(&self) -> &'static [PixelFormat] {
        &[PixelFormat::Nv12, PixelFormat::P010]
    }

    fn priority(&self) -> Priority {
        Priority::Good
    }

    fn configure(&self, config: &EncoderConfig, opts: &mut Dictionary) {
        let preset = match config.quality {
            Quality::Best => "veryslow",
            Quality::Balanced => "medium",
            Quality::Low => "veryfast",
        };
        opts.set("preset", preset);
        opts.set("async_depth", "1");
        opts.set("look_ahead", "0");
        opts.set("low_power", "1");

        // Rate control mode follows from bit_rate vs rc_max_rate: equal
        // selects CBR, a higher max selects VBR.
        if config.rate_control == RateControl::Cq {
            opts.set("global_quality", &config.qp.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{supported_encoder_name, Backend};

    #[test]
    fn test_qsv_rejects_planar_input() {
        let config = EncoderConfig::default()
            .with_backend(Backend::Qsv)
            .with_pixel_format(PixelFormat::Yuv420p);
        assert!(supported_encoder_name(&config).is_err());
        let config = config.with_pixel_format(PixelFormat::Nv12);
        assert_eq!(supported_encoder_name(&config).unwrap(), "h264_qsv");
    }

    #[test]
    fn test_qsv_cq_uses_global_quality() {
        let config = EncoderConfig::default()
            .with_backend(Backend::Qsv)
            .with_rate_control(RateControl::Cq)
            .with_qp(24);
        let mut opts = Dictionary::new();
        Qsv.configure(&config, &mut opts);
        assert_eq!(opts.get("global_quality"), Some("24"));
        assert_eq!(opts.get("async_depth"), Some("1"));
    }
}
