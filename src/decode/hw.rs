//! FFmpeg hardware device contexts

use crate::error::{Error, Result};

use super::DeviceType;

use ffmpeg_next::ffi;
use std::ptr;

/// Owned reference to an `AVHWDeviceContext`
pub(crate) struct HwDeviceContext {
    buffer: *mut ffi::AVBufferRef,
    device: DeviceType,
}

// The buffer is reference counted by FFmpeg and only touched through &mut self.
unsafe impl Send for HwDeviceContext {}

impl HwDeviceContext {
    pub fn create(device: DeviceType) -> Result<Self> {
        let kind = device.to_ffmpeg().ok_or_else(|| {
            Error::InvalidConfig("software decoding has no device context".into())
        })?;

        let mut buffer = ptr::null_mut();
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(&mut buffer, kind, ptr::null(), ptr::null_mut(), 0)
        };
        if ret < 0 || buffer.is_null() {
            return Err(Error::OutOfResources(format!(
                "failed to create {} device context: {}",
                device,
                ffmpeg_next::Error::from(ret)
            )));
        }

        tracing::debug!("Created {} device context", device);
        Ok(Self { buffer, device })
    }

    /// New reference for an `AVCodecContext::hw_device_ctx`
    pub fn new_ref(&self) -> Result<*mut ffi::AVBufferRef> {
        let reference = unsafe { ffi::av_buffer_ref(self.buffer) };
        if reference.is_null() {
            return Err(Error::OutOfResources(
                "failed to reference device context".into(),
            ));
        }
        Ok(reference)
    }
}

impl Drop for HwDeviceContext {
    fn drop(&mut self) {
        unsafe { ffi::av_buffer_unref(&mut self.buffer) };
        tracing::debug!("Released {} device context", self.device);
    }
}
