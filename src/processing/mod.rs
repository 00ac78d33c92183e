//! Video processing module
//!
//! Colorspace conversion and scaling of captured screen pixels into
//! encoder input frames.

mod convert;

pub use convert::PackedConverter;
