//! Software (CPU) encoder profile
//!
//! - libx264 for H.264
//! - libx265 for H.265/HEVC
//! - libsvtav1 for AV1

use crate::config::{EncoderConfig, Quality, RateControl};
use crate::types::PixelFormat;

use super::{BackendProfile, Codec, Priority};

use ffmpeg_next::Dictionary;

pub(crate) struct Software;

impl Software {
    /// x264/x265 preset for a quality level
    fn x26x_preset(quality: Quality) -> &'static str {
        match quality {
            Quality::Best => "faster",
            Quality::Balanced => "veryfast",
            Quality::Low => "ultrafast",
        }
    }

    /// SVT-AV1 preset (0-13, 0=slowest/best, 13=fastest)
    fn svtav1_preset(quality: Quality) -> &'static str {
        match quality {
            Quality::Best => "8",
            Quality::Balanced => "10",
            Quality::Low => "12",
        }
    }
}

impl BackendProfile for Software {
    fn encoder_name(&self, codec: Codec) -> Option<&'static str> {
        Some(match codec {
            Codec::H264 => "libx264",
            Codec::Hevc => "libx265",
            Codec::Av1 => "libsvtav1",
        })
    }

    fn pixel_formats(&self) -> &'static [PixelFormat] {
        &[PixelFormat::Nv12, PixelFormat::Yuv420p]
    }

    fn priority(&self) -> Priority {
        Priority::Soft
    }

    fn is_hardware(&self) -> bool {
        false
    }

    fn configure(&self, config: &EncoderConfig, opts: &mut Dictionary) {
        match config.codec {
            Codec::H264 => {
                opts.set("preset", Self::x26x_preset(config.quality));
                opts.set("tune", "zerolatency");
                opts.set("forced-idr", "1");
                if config.rate_control == RateControl::Cq {
                    opts.set("qp", &config.qp.to_string());
                }
            }
            Codec::Hevc => {
                opts.set("preset", Self::x26x_preset(config.quality));
                opts.set("tune", "zerolatency");
                opts.set("forced-idr", "1");
                let mut params = String::from("log-level=warning:repeat-headers=1");
                if config.rate_control == RateControl::Cq {
                    params.push_str(&format!(":qp={}", config.qp));
                }
                opts.set("x265-params", &params);
            }
            Codec::Av1 => {
                opts.set("preset", Self::svtav1_preset(config.quality));
                let params = match config.rate_control {
                    RateControl::Cq => format!("pred-struct=1:rc=0:qp={}", config.qp),
                    _ => String::from("pred-struct=1:rc=1"),
                };
                opts.set("svtav1-params", &params);
            }
        }
    }
}
