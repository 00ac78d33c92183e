//! Apple VideoToolbox profile

use crate::config::{EncoderConfig, RateControl};
use crate::types::PixelFormat;

use super::{BackendProfile, Codec, Priority};

use ffmpeg_next::Dictionary;

pub(crate) struct VideoToolbox;

impl BackendProfile for VideoToolbox {
    fn encoder_name(&self, codec: Codec) -> Option<&'static str> {
        match codec {
            Codec::H264 => Some("h264_videotoolbox"),
            Codec::Hevc => Some("hevc_videotoolbox"),
            Codec::Av1 => None,
        }
    }

    fn pixel_formats(&self) -> &'static [PixelFormat] {
        &[PixelFormat::Nv12, PixelFormat::Yuv420p]
    }

    fn priority(&self) -> Priority {
        Priority::Best
    }

    fn supports_rate_control(&self, rc: RateControl) -> bool {
        rc != RateControl::Cq
    }

    fn configure(&self, config: &EncoderConfig, opts: &mut Dictionary) {
        opts.set("realtime", "1");
        opts.set("prio_speed", "1");
        if config.rate_control == RateControl::Cbr {
            opts.set("constant_bit_rate", "1");
        }
    }
}
