//! Flat C interface
//!
//! Every session is an opaque heap handle created by a `deskpipe_new_*`
//! function and released by the matching free/destroy function. Failures
//! are reported as null handles or negative status codes (see
//! [`ErrorKind::status`](crate::error::ErrorKind::status)); panics are
//! caught at the boundary.
//!
//! Device and texture handles returned by a capturer or render session are
//! borrowed: they stay valid until the owning session's next capture call
//! or its destruction, and must never be freed by the caller.

#![allow(clippy::missing_safety_doc)]

use crate::capture::{Capturer, ChannelSource, FrameSender};
use crate::config::{DecoderConfig, EncoderConfig, MuxConfig, Quality, RateControl};
use crate::decode::{Decoder, DeviceType, FrameSink};
use crate::encode::{Backend, Codec, Encoder, PacketSink};
use crate::error::{Error, ErrorKind, Result};
use crate::gpu::{AdapterId, GpuDevice};
use crate::layout::FrameBufferLayout;
use crate::output::Muxer;
use crate::render::{Render, RenderTarget};
use crate::types::{DecodedFrame, EncodedPacket, PixelFormat, PlaneArray, MAX_PLANES};

use std::ffi::{c_char, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::time::Duration;

/// Encoded packet delivery: (context, data, length, pts_ms, keyframe)
pub type EncodeCallback =
    unsafe extern "C" fn(context: *const c_void, data: *const u8, len: i32, pts_ms: i64, key: i32);

/// Decoded frame delivery: (context, width, height, pixfmt, strides[8], data[8], keyframe)
pub type DecodeCallback = unsafe extern "C" fn(
    context: *const c_void,
    width: i32,
    height: i32,
    pixfmt: i32,
    strides: *const i32,
    data: *const *const u8,
    key: i32,
);

const PANIC_STATUS: i32 = ErrorKind::ContractViolation.status();

fn status_of(result: Result<usize>) -> i32 {
    match result {
        Ok(n) => n.min(i32::MAX as usize) as i32,
        Err(e) => {
            tracing::debug!("ffi call failed: {}", e);
            e.status()
        }
    }
}

/// Run `f`, turning panics into `fallback`
fn guard<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!("panic caught at the C boundary");
            fallback
        }
    }
}

fn into_handle<T>(result: Result<T>) -> *mut T {
    match result {
        Ok(value) => Box::into_raw(Box::new(value)),
        Err(e) => {
            tracing::warn!("session creation failed: {}", e);
            ptr::null_mut()
        }
    }
}

unsafe fn free_handle<T>(handle: *mut T) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

unsafe fn handle_mut<'a, T>(handle: *mut T) -> Result<&'a mut T> {
    handle
        .as_mut()
        .ok_or_else(|| Error::ContractViolation("null handle".into()))
}

unsafe fn c_str<'a>(s: *const c_char) -> Result<&'a str> {
    if s.is_null() {
        return Err(Error::InvalidConfig("null string".into()));
    }
    CStr::from_ptr(s)
        .to_str()
        .map_err(|_| Error::InvalidConfig("string is not UTF-8".into()))
}

unsafe fn bytes<'a>(data: *const u8, len: i32) -> Result<&'a [u8]> {
    if data.is_null() || len <= 0 {
        return Err(Error::MalformedInput("empty input buffer".into()));
    }
    Ok(std::slice::from_raw_parts(data, len as usize))
}

fn dimension(value: i32) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| Error::InvalidGeometry(format!("dimension {} must be positive", value)))
}

fn non_negative(value: i32, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidConfig(format!("{} {} is negative", what, value)))
}

fn rate_control(raw: i32) -> Result<RateControl> {
    match raw {
        0 => Ok(RateControl::Cbr),
        1 => Ok(RateControl::Vbr),
        2 => Ok(RateControl::Cq),
        other => Err(Error::InvalidConfig(format!("unknown rate control {}", other))),
    }
}

fn quality(raw: i32) -> Result<Quality> {
    match raw {
        0 => Ok(Quality::Best),
        1 => Ok(Quality::Balanced),
        2 => Ok(Quality::Low),
        other => Err(Error::InvalidConfig(format!("unknown quality {}", other))),
    }
}

/// Copy strides, offsets and length of `layout` into caller arrays of 8.
///
/// Nothing is written unless every value fits in an `i32`.
unsafe fn write_layout(
    layout: &FrameBufferLayout,
    out_stride: *mut i32,
    out_offset: *mut i32,
    out_length: *mut i32,
) -> Result<()> {
    let to_i32 = |v: usize| {
        i32::try_from(v).map_err(|_| Error::InvalidGeometry(format!("{} exceeds i32", v)))
    };
    let padded_strides = layout.strides().padded();
    let padded_offsets = layout.offsets().padded();
    let mut strides = [0i32; MAX_PLANES];
    let mut offsets = [0i32; MAX_PLANES];
    for i in 0..MAX_PLANES {
        strides[i] = to_i32(padded_strides[i])?;
        offsets[i] = to_i32(padded_offsets[i])?;
    }
    let length = to_i32(layout.length())?;

    if !out_stride.is_null() {
        ptr::copy_nonoverlapping(strides.as_ptr(), out_stride, MAX_PLANES);
    }
    if !out_offset.is_null() {
        ptr::copy_nonoverlapping(offsets.as_ptr(), out_offset, MAX_PLANES);
    }
    if !out_length.is_null() {
        *out_length = length;
    }
    Ok(())
}

// ============================================================================
// Encoder
// ============================================================================

/// Packet sink forwarding to a C callback with a per-call context
pub struct CallbackPacketSink {
    callback: EncodeCallback,
    context: *const c_void,
}

impl PacketSink for CallbackPacketSink {
    fn deliver(&mut self, packet: EncodedPacket<'_>) {
        unsafe {
            (self.callback)(
                self.context,
                packet.data.as_ptr(),
                packet.data.len().min(i32::MAX as usize) as i32,
                packet.pts_ms,
                packet.keyframe as i32,
            )
        }
    }
}

pub type FfiEncoder = Encoder<CallbackPacketSink>;

#[no_mangle]
pub unsafe extern "C" fn deskpipe_new_encoder(
    codec_name: *const c_char,
    backend_name: *const c_char,
    width: i32,
    height: i32,
    pixfmt: i32,
    align: i32,
    fps: i32,
    gop: i32,
    rc: i32,
    quality_level: i32,
    kbs: i32,
    qp: i32,
    threads: i32,
    gpu_index: i32,
    out_stride: *mut i32,
    out_offset: *mut i32,
    out_length: *mut i32,
    callback: Option<EncodeCallback>,
) -> *mut FfiEncoder {
    guard(ptr::null_mut(), || {
        let result = (|| {
            let callback =
                callback.ok_or_else(|| Error::InvalidConfig("missing encode callback".into()))?;
            let config = EncoderConfig {
                codec: c_str(codec_name)?.parse::<Codec>()?,
                backend: c_str(backend_name)?.parse::<Backend>()?,
                width: dimension(width)?,
                height: dimension(height)?,
                pixel_format: PixelFormat::try_from(pixfmt)?,
                align: non_negative(align, "align")? as usize,
                framerate: non_negative(fps, "fps")?,
                gop: if gop <= 0 { crate::config::DEFAULT_GOP } else { gop as u32 },
                rate_control: rate_control(rc)?,
                quality: quality(quality_level)?,
                bitrate_kbps: non_negative(kbs, "bitrate")?,
                qp: u8::try_from(qp)
                    .map_err(|_| Error::InvalidConfig(format!("qp {} out of range", qp)))?,
                threads: non_negative(threads, "threads")?,
                gpu_index: u32::try_from(gpu_index).ok(),
            };
            let encoder = Encoder::new(
                config,
                CallbackPacketSink {
                    callback,
                    context: ptr::null(),
                },
            )?;
            write_layout(encoder.layout(), out_stride, out_offset, out_length)?;
            Ok(encoder)
        })();
        into_handle(result)
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_encode(
    handle: *mut FfiEncoder,
    data: *const u8,
    len: i32,
    context: *const c_void,
    pts_ms: i64,
) -> i32 {
    guard(PANIC_STATUS, || {
        status_of((|| {
            let encoder = handle_mut(handle)?;
            let input = bytes(data, len)?;
            encoder.sink_mut().context = context;
            encoder.encode(input, pts_ms)
        })())
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_encode_texture(
    handle: *mut FfiEncoder,
    device: *const GpuDevice,
    texture: *const wgpu::Texture,
    context: *const c_void,
    pts_ms: i64,
) -> i32 {
    guard(PANIC_STATUS, || {
        status_of((|| {
            let encoder = handle_mut(handle)?;
            let (Some(device), Some(texture)) = (device.as_ref(), texture.as_ref()) else {
                return Err(Error::ContractViolation("null device or texture".into()));
            };
            encoder.sink_mut().context = context;
            encoder.encode_texture(device, texture, pts_ms)
        })())
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_set_bitrate(handle: *mut FfiEncoder, kbs: i32) -> i32 {
    guard(PANIC_STATUS, || {
        status_of((|| {
            let encoder = handle_mut(handle)?;
            encoder.set_bitrate(non_negative(kbs, "bitrate")?)?;
            Ok(0)
        })())
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_free_encoder(handle: *mut FfiEncoder) {
    guard((), || free_handle(handle))
}

// ============================================================================
// Decoder
// ============================================================================

/// Frame sink forwarding to a C callback with a per-call context
pub struct CallbackFrameSink {
    callback: DecodeCallback,
    context: *const c_void,
}

impl FrameSink for CallbackFrameSink {
    fn deliver(&mut self, frame: DecodedFrame<'_>) {
        let mut strides = [0i32; MAX_PLANES];
        let mut data = [ptr::null::<u8>(); MAX_PLANES];
        for (i, (plane, stride)) in frame.planes.iter().zip(frame.strides.iter()).enumerate() {
            strides[i] = (*stride).min(i32::MAX as usize) as i32;
            data[i] = plane.as_ptr();
        }
        unsafe {
            (self.callback)(
                self.context,
                frame.width as i32,
                frame.height as i32,
                frame.format.raw(),
                strides.as_ptr(),
                data.as_ptr(),
                frame.keyframe as i32,
            )
        }
    }
}

pub type FfiDecoder = Decoder<CallbackFrameSink>;

#[no_mangle]
pub unsafe extern "C" fn deskpipe_new_decoder(
    codec_name: *const c_char,
    device_type: i32,
    threads: i32,
    callback: Option<DecodeCallback>,
) -> *mut FfiDecoder {
    guard(ptr::null_mut(), || {
        let result = (|| {
            let callback =
                callback.ok_or_else(|| Error::InvalidConfig("missing decode callback".into()))?;
            let config = DecoderConfig::new(
                c_str(codec_name)?.parse::<Codec>()?,
                DeviceType::try_from(device_type)?,
            )
            .with_threads(non_negative(threads, "threads")?);
            Decoder::new(
                config,
                CallbackFrameSink {
                    callback,
                    context: ptr::null(),
                },
            )
        })();
        into_handle(result)
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_decode(
    handle: *mut FfiDecoder,
    data: *const u8,
    len: i32,
    context: *const c_void,
) -> i32 {
    guard(PANIC_STATUS, || {
        status_of((|| {
            let decoder = handle_mut(handle)?;
            let input = bytes(data, len)?;
            decoder.sink_mut().context = context;
            decoder.decode(input)
        })())
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_free_decoder(handle: *mut FfiDecoder) {
    guard((), || free_handle(handle))
}

// ============================================================================
// Layout
// ============================================================================

#[no_mangle]
pub unsafe extern "C" fn deskpipe_compute_layout(
    pixfmt: i32,
    width: i32,
    height: i32,
    align: i32,
    out_stride: *mut i32,
    out_offset: *mut i32,
    out_length: *mut i32,
) -> i32 {
    guard(PANIC_STATUS, || {
        status_of((|| {
            let layout = FrameBufferLayout::compute_raw(pixfmt, width, height, align)?;
            write_layout(&layout, out_stride, out_offset, out_length)?;
            Ok(0)
        })())
    })
}

// ============================================================================
// Muxer
// ============================================================================

#[no_mangle]
pub unsafe extern "C" fn deskpipe_new_muxer(
    path: *const c_char,
    width: i32,
    height: i32,
    is_h265: i32,
    framerate: i32,
) -> *mut Muxer {
    guard(ptr::null_mut(), || {
        let result = (|| {
            let codec = if is_h265 != 0 { Codec::Hevc } else { Codec::H264 };
            Muxer::new(MuxConfig::new(
                c_str(path)?,
                dimension(width)?,
                dimension(height)?,
                codec,
                non_negative(framerate, "framerate")?,
            ))
        })();
        into_handle(result)
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_write_video_frame(
    handle: *mut Muxer,
    data: *const u8,
    len: i32,
    pts_ms: i64,
    is_key: i32,
) -> i32 {
    guard(PANIC_STATUS, || {
        status_of((|| {
            let muxer = handle_mut(handle)?;
            muxer.write_video_frame(bytes(data, len)?, pts_ms, is_key != 0)?;
            Ok(0)
        })())
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_write_tail(handle: *mut Muxer) -> i32 {
    guard(PANIC_STATUS, || {
        status_of((|| {
            handle_mut(handle)?.write_tail()?;
            Ok(0)
        })())
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_free_muxer(handle: *mut Muxer) {
    guard((), || free_handle(handle))
}

// ============================================================================
// Capturer
// ============================================================================

/// Capturer fed through [`deskpipe_capturer_submit`]
pub struct FfiCapturer {
    capturer: Capturer,
    sender: FrameSender,
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_new_capturer(adapter_id: u64) -> *mut FfiCapturer {
    guard(ptr::null_mut(), || {
        let (sender, source) = ChannelSource::new();
        into_handle(
            Capturer::new(AdapterId(adapter_id), Box::new(source))
                .map(|capturer| FfiCapturer { capturer, sender }),
        )
    })
}

/// Queue a packed BGRA/RGBA screen update for the next capture call
#[no_mangle]
pub unsafe extern "C" fn deskpipe_capturer_submit(
    handle: *mut FfiCapturer,
    data: *const u8,
    len: i32,
    width: i32,
    height: i32,
    stride: i32,
    pixfmt: i32,
    pts_ms: i64,
) -> i32 {
    guard(PANIC_STATUS, || {
        status_of((|| {
            let capturer = handle_mut(handle)?;
            capturer.sender.submit(
                bytes(data, len)?,
                dimension(width)?,
                dimension(height)?,
                dimension(stride)? as usize,
                PixelFormat::try_from(pixfmt)?,
                pts_ms,
            )?;
            Ok(0)
        })())
    })
}

/// Borrowed device handle, valid until the capturer is destroyed
#[no_mangle]
pub unsafe extern "C" fn deskpipe_capturer_device(handle: *mut FfiCapturer) -> *const GpuDevice {
    guard(ptr::null(), || match handle.as_ref() {
        Some(capturer) => capturer.capturer.device() as *const GpuDevice,
        None => ptr::null(),
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_capturer_width(handle: *mut FfiCapturer) -> i32 {
    guard(PANIC_STATUS, || match handle.as_ref() {
        Some(capturer) => capturer.capturer.width() as i32,
        None => ErrorKind::ContractViolation.status(),
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_capturer_height(handle: *mut FfiCapturer) -> i32 {
    guard(PANIC_STATUS, || match handle.as_ref() {
        Some(capturer) => capturer.capturer.height() as i32,
        None => ErrorKind::ContractViolation.status(),
    })
}

/// Wait for the next screen update
///
/// Returns a borrowed texture valid until the next call, or null on
/// timeout or error.
#[no_mangle]
pub unsafe extern "C" fn deskpipe_capture(
    handle: *mut FfiCapturer,
    timeout_ms: i32,
) -> *const wgpu::Texture {
    guard(ptr::null(), || {
        let Some(capturer) = handle.as_mut() else {
            return ptr::null();
        };
        let timeout = Duration::from_millis(timeout_ms.max(0) as u64);
        match capturer.capturer.capture(timeout) {
            Ok(Some(frame)) => frame.texture as *const wgpu::Texture,
            Ok(None) => ptr::null(),
            Err(e) => {
                tracing::warn!("capture failed: {}", e);
                ptr::null()
            }
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_destroy_capturer(handle: *mut FfiCapturer) {
    guard((), || free_handle(handle))
}

// ============================================================================
// Render
// ============================================================================

/// Render session behind a C handle
///
/// A borrowed device must outlive the session; the C caller is
/// responsible for that ordering.
pub type FfiRender = Render<'static>;

#[no_mangle]
pub unsafe extern "C" fn deskpipe_new_render(adapter_id: u64, wants_shared: i32) -> *mut FfiRender {
    guard(ptr::null_mut(), || {
        into_handle(Render::new(AdapterId(adapter_id), wants_shared != 0))
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_new_render_with_device(
    device: *const GpuDevice,
    wants_shared: i32,
) -> *mut FfiRender {
    guard(ptr::null_mut(), || match device.as_ref() {
        Some(device) => into_handle(Ok(Render::with_device(
            device,
            wants_shared != 0,
            RenderTarget::Offscreen,
        ))),
        None => ptr::null_mut(),
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_render_texture(
    handle: *mut FfiRender,
    texture: *const wgpu::Texture,
) -> i32 {
    guard(PANIC_STATUS, || {
        status_of((|| {
            let render = handle_mut(handle)?;
            let texture = texture
                .as_ref()
                .ok_or_else(|| Error::ContractViolation("null texture".into()))?;
            render.render_texture(texture)?;
            Ok(0)
        })())
    })
}

/// Present a decoded frame given as per-plane strides and pointers
///
/// Takes the same arguments a [`DecodeCallback`] receives, so frames can be
/// forwarded from the decoder unchanged.
#[no_mangle]
pub unsafe extern "C" fn deskpipe_render_frame(
    handle: *mut FfiRender,
    width: i32,
    height: i32,
    pixfmt: i32,
    strides: *const i32,
    data: *const *const u8,
) -> i32 {
    guard(PANIC_STATUS, || {
        status_of((|| {
            let render = handle_mut(handle)?;
            if strides.is_null() || data.is_null() {
                return Err(Error::ContractViolation("null plane arrays".into()));
            }
            let layout = FrameBufferLayout::compute_raw(pixfmt, width, height, 1)?;

            let mut planes = PlaneArray::new();
            let mut plane_strides = PlaneArray::new();
            for plane in 0..layout.plane_count() {
                let stride = usize::try_from(*strides.add(plane)).map_err(|_| {
                    Error::InvalidGeometry(format!("plane {} stride is negative", plane))
                })?;
                let pointer = *data.add(plane);
                if pointer.is_null() {
                    return Err(Error::MalformedInput(format!("plane {} is null", plane)));
                }
                let len = stride
                    .checked_mul(layout.plane_heights()[plane] - 1)
                    .and_then(|n| n.checked_add(layout.row_bytes(plane)))
                    .ok_or_else(|| Error::InvalidGeometry(format!("plane {} is too large", plane)))?;
                let _ = planes.try_push(std::slice::from_raw_parts(pointer, len));
                let _ = plane_strides.try_push(stride);
            }

            render.render_frame(&DecodedFrame {
                width: layout.width(),
                height: layout.height(),
                format: layout.format(),
                planes,
                strides: plane_strides,
                keyframe: false,
            })?;
            Ok(0)
        })())
    })
}

/// Borrowed device handle, valid until the render session is destroyed
#[no_mangle]
pub unsafe extern "C" fn deskpipe_render_device(handle: *mut FfiRender) -> *const GpuDevice {
    guard(ptr::null(), || match handle.as_ref() {
        Some(render) => render.device() as *const GpuDevice,
        None => ptr::null(),
    })
}

#[no_mangle]
pub unsafe extern "C" fn deskpipe_destroy_render(handle: *mut FfiRender) {
    guard((), || free_handle(handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_compute_layout_fills_arrays() {
        let mut strides = [-1i32; MAX_PLANES];
        let mut offsets = [-1i32; MAX_PLANES];
        let mut length = 0i32;
        let status = unsafe {
            deskpipe_compute_layout(
                PixelFormat::Yuv420p.raw(),
                1920,
                1080,
                32,
                strides.as_mut_ptr(),
                offsets.as_mut_ptr(),
                &mut length,
            )
        };
        assert_eq!(status, 0);
        assert_eq!(&strides[..4], &[1920, 960, 960, 0]);
        assert_eq!(&offsets[..3], &[0, 2_073_600, 2_592_000]);
        assert_eq!(length, 3_110_400);
    }

    #[test]
    fn test_compute_layout_errors() {
        let status = unsafe {
            deskpipe_compute_layout(
                PixelFormat::Nv12.raw(),
                0,
                1080,
                32,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        assert_eq!(status, ErrorKind::InvalidGeometry.status());

        let status = unsafe {
            deskpipe_compute_layout(99, 64, 64, 32, ptr::null_mut(), ptr::null_mut(), ptr::null_mut())
        };
        assert_eq!(status, ErrorKind::InvalidConfig.status());
    }

    #[test]
    fn test_compute_layout_overflow_leaves_outputs_untouched() {
        // Luma stride fits in i32 but the chroma offsets do not
        let mut strides = [-1i32; MAX_PLANES];
        let mut offsets = [-1i32; MAX_PLANES];
        let mut length = -1i32;
        let status = unsafe {
            deskpipe_compute_layout(
                PixelFormat::Yuv420p.raw(),
                50_000,
                50_000,
                32,
                strides.as_mut_ptr(),
                offsets.as_mut_ptr(),
                &mut length,
            )
        };
        assert!(status < 0);
        assert_eq!(strides, [-1; MAX_PLANES]);
        assert_eq!(offsets, [-1; MAX_PLANES]);
        assert_eq!(length, -1);
    }

    #[test]
    fn test_null_handles_are_rejected() {
        unsafe {
            assert_eq!(
                deskpipe_encode(ptr::null_mut(), ptr::null(), 0, ptr::null(), 0),
                ErrorKind::ContractViolation.status()
            );
            assert_eq!(
                deskpipe_write_tail(ptr::null_mut()),
                ErrorKind::ContractViolation.status()
            );
            assert!(deskpipe_capture(ptr::null_mut(), 0).is_null());
            assert!(deskpipe_capturer_device(ptr::null_mut()).is_null());
            deskpipe_free_encoder(ptr::null_mut());
            deskpipe_free_decoder(ptr::null_mut());
            deskpipe_free_muxer(ptr::null_mut());
            deskpipe_destroy_capturer(ptr::null_mut());
            deskpipe_destroy_render(ptr::null_mut());
            assert_eq!(
                deskpipe_render_frame(ptr::null_mut(), 16, 16, 0, ptr::null(), ptr::null()),
                ErrorKind::ContractViolation.status()
            );
        }
    }

    #[test]
    fn test_render_frame_from_plane_pointers() {
        let Some(adapter) = crate::gpu::enumerate_adapters().first().map(|d| d.id) else {
            println!("No GPU adapter available, skipping test");
            return;
        };

        // 16x8 I420, mid grey
        let luma = vec![126u8; 16 * 8];
        let chroma = vec![128u8; 8 * 4];
        let strides = [16i32, 8, 8, 0, 0, 0, 0, 0];
        let data = [
            luma.as_ptr(),
            chroma.as_ptr(),
            chroma.as_ptr(),
            ptr::null(),
            ptr::null(),
            ptr::null(),
            ptr::null(),
            ptr::null(),
        ];

        unsafe {
            let render = deskpipe_new_render(adapter.0, 1);
            if render.is_null() {
                println!("No GPU device available, skipping test");
                return;
            }
            let status = deskpipe_render_frame(
                render,
                16,
                8,
                PixelFormat::Yuv420p.raw(),
                strides.as_ptr(),
                data.as_ptr(),
            );
            assert_eq!(status, 0);
            assert_eq!((*render).frames_rendered(), 1);

            let negative = [-16i32, 8, 8, 0, 0, 0, 0, 0];
            assert_eq!(
                deskpipe_render_frame(
                    render,
                    16,
                    8,
                    PixelFormat::Yuv420p.raw(),
                    negative.as_ptr(),
                    data.as_ptr()
                ),
                ErrorKind::InvalidGeometry.status()
            );
            deskpipe_destroy_render(render);
        }
    }

    #[test]
    fn test_unsupported_encoder_returns_null() {
        let codec = CString::new("av1").unwrap();
        let backend = CString::new("videotoolbox").unwrap();
        unsafe extern "C" fn ignore(_: *const c_void, _: *const u8, _: i32, _: i64, _: i32) {}

        let handle = unsafe {
            deskpipe_new_encoder(
                codec.as_ptr(),
                backend.as_ptr(),
                1920,
                1080,
                PixelFormat::Nv12.raw(),
                32,
                30,
                0,
                0,
                1,
                2000,
                26,
                0,
                0,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                Some(ignore),
            )
        };
        assert!(handle.is_null());
    }

    #[test]
    fn test_muxer_rejects_non_key_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = CString::new(dir.path().join("out.ts").to_str().unwrap()).unwrap();
        unsafe {
            let muxer = deskpipe_new_muxer(path.as_ptr(), 64, 64, 0, 30);
            assert!(!muxer.is_null());
            let frame = [0u8, 0, 0, 1, 0x41, 0x9a];
            assert_eq!(
                deskpipe_write_video_frame(muxer, frame.as_ptr(), frame.len() as i32, 0, 0),
                ErrorKind::ContractViolation.status()
            );
            deskpipe_free_muxer(muxer);
        }
    }

    #[test]
    fn test_encode_decode_through_callbacks() {
        if !crate::encode::is_available(Codec::H264, Backend::Software) {
            println!("libx264 not available, skipping test");
            return;
        }

        unsafe extern "C" fn on_packet(ctx: *const c_void, data: *const u8, len: i32, _: i64, key: i32) {
            let packets = &mut *(ctx as *mut Vec<(Vec<u8>, bool)>);
            packets.push((std::slice::from_raw_parts(data, len as usize).to_vec(), key != 0));
        }
        unsafe extern "C" fn on_frame(
            ctx: *const c_void,
            width: i32,
            height: i32,
            pixfmt: i32,
            strides: *const i32,
            _: *const *const u8,
            _: i32,
        ) {
            let frames = &mut *(ctx as *mut Vec<(i32, i32, i32, i32)>);
            frames.push((width, height, pixfmt, *strides));
        }

        let codec = CString::new("h264").unwrap();
        let backend = CString::new("software").unwrap();
        let mut strides = [0i32; MAX_PLANES];
        let mut offsets = [0i32; MAX_PLANES];
        let mut length = 0i32;
        let mut packets: Vec<(Vec<u8>, bool)> = Vec::new();
        let mut frames: Vec<(i32, i32, i32, i32)> = Vec::new();

        unsafe {
            let encoder = deskpipe_new_encoder(
                codec.as_ptr(),
                backend.as_ptr(),
                320,
                240,
                PixelFormat::Yuv420p.raw(),
                32,
                30,
                0,
                0,
                1,
                800,
                26,
                0,
                0,
                strides.as_mut_ptr(),
                offsets.as_mut_ptr(),
                &mut length,
                Some(on_packet),
            );
            assert!(!encoder.is_null());
            assert_eq!(length, 320 * 240 * 3 / 2);

            let frame = vec![0x80u8; length as usize];
            let ctx = &mut packets as *mut _ as *const c_void;
            assert!(deskpipe_encode(encoder, frame.as_ptr(), length, ctx, 0) >= 0);
            assert_eq!(deskpipe_set_bitrate(encoder, 400), 0);
            assert!(deskpipe_encode(encoder, frame.as_ptr(), length, ctx, 33) >= 0);
            deskpipe_free_encoder(encoder);
            assert!(packets[0].1);

            let decoder = deskpipe_new_decoder(codec.as_ptr(), 0, 1, Some(on_frame));
            assert!(!decoder.is_null());
            let ctx = &mut frames as *mut _ as *const c_void;
            for (data, _) in &packets {
                assert!(deskpipe_decode(decoder, data.as_ptr(), data.len() as i32, ctx) >= 0);
            }
            deskpipe_free_decoder(decoder);
        }

        assert_eq!(frames.len(), packets.len());
        assert_eq!(frames[0], (320, 240, PixelFormat::Yuv420p.raw(), 320));
    }
}
