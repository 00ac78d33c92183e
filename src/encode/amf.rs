//! AMD AMF profile

use crate::config::{EncoderConfig, Quality, RateControl};
use crate::types::PixelFormat;

use super::{BackendProfile, Codec, Priority};

use ffmpeg_next::Dictionary;

pub(crate) struct Amf;

impl BackendProfile for Amf {
    fn encoder_name(&self, codec: Codec) -> Option<&'static str> {
        Some(match codec {
            Codec::H264 => "h264_amf",
            Codec::Hevc => "hevc_amf",
            Codec::Av1 => "av1_amf",
        })
    }

    fn pixel_formats(&self) -> &'static [PixelFormat] {
        &[PixelFormat::Nv12, PixelFormat::Yuv420p]
    }

    fn priority(&self) -> Priority {
        Priority::Good
    }

    fn configure(&self, config: &EncoderConfig, opts: &mut Dictionary) {
        opts.set("usage", "ultralowlatency");
        opts.set(
            "quality",
            match config.quality {
                Quality::Best => "quality",
                Quality::Balanced => "balanced",
                Quality::Low => "speed",
            },
        );
        opts.set("query_timeout", "1000");

        match config.rate_control {
            RateControl::Cbr => opts.set("rc", "cbr"),
            RateControl::Vbr => opts.set("rc", "vbr_latency"),
            RateControl::Cq => {
                opts.set("rc", "cqp");
                opts.set("qp_i", &config.qp.to_string());
                opts.set("qp_p", &config.qp.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amf_rate_control_names() {
        let mut opts = Dictionary::new();
        let vbr = EncoderConfig::default().with_rate_control(RateControl::Vbr);
        Amf.configure(&vbr, &mut opts);
        assert_eq!(opts.get("rc"), Some("vbr_latency"));
        assert_eq!(opts.get("quality"), Some("balanced"));
    }
}
