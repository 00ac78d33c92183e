//! Channel-fed screen source

use crate::error::{Error, Result};
use crate::types::{PixelFormat, Resolution};

use super::{ScreenSource, SourceFrame};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// Pending updates kept before the oldest is overwritten
const PENDING_UPDATES: usize = 2;

/// Screen source fed by an external producer through a [`FrameSender`]
///
/// Only the newest pending update is ever delivered; older ones are
/// skipped so a slow consumer drops frames instead of falling behind.
pub struct ChannelSource {
    receiver: Receiver<SourceFrame>,
    geometry: Option<Resolution>,
}

impl ChannelSource {
    pub fn new() -> (FrameSender, Self) {
        Self::with_geometry(None)
    }

    /// Create a source with a geometry hint known before the first update
    pub fn with_geometry(geometry: Option<Resolution>) -> (FrameSender, Self) {
        let (sender, receiver) = crossbeam_channel::bounded(PENDING_UPDATES);
        (
            FrameSender {
                sender,
                overflow: receiver.clone(),
            },
            Self { receiver, geometry },
        )
    }
}

impl ScreenSource for ChannelSource {
    fn next_update(&mut self, timeout: Duration) -> Result<Option<SourceFrame>> {
        let first = match self.receiver.recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => return Err(Error::CaptureEnded),
        };

        let mut skipped = 0;
        let newest = self.receiver.try_iter().fold(first, |_, frame| {
            skipped += 1;
            frame
        });
        if skipped > 0 {
            tracing::debug!("Skipped {} stale screen updates", skipped);
        }

        self.geometry = Some(newest.resolution());
        Ok(Some(newest))
    }

    fn geometry(&self) -> Option<Resolution> {
        self.geometry
    }
}

/// Producer side of a [`ChannelSource`]
#[derive(Clone)]
pub struct FrameSender {
    sender: Sender<SourceFrame>,
    overflow: Receiver<SourceFrame>,
}

impl FrameSender {
    /// Queue a screen update, evicting the oldest pending one if full
    pub fn send(&self, mut frame: SourceFrame) -> Result<()> {
        loop {
            match self.sender.try_send(frame) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(returned)) => {
                    let _ = self.overflow.try_recv();
                    frame = returned;
                }
                Err(TrySendError::Disconnected(_)) => return Err(Error::CaptureEnded),
            }
        }
    }

    /// Copy a packed image into a new update and queue it
    pub fn submit(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        pts_ms: i64,
    ) -> Result<()> {
        let frame = SourceFrame {
            data: pixels.to_vec(),
            width,
            height,
            stride,
            format,
            pts_ms,
        };
        frame.validate()?;
        self.send(frame)
    }
}
