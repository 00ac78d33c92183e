//! xdg-desktop-portal screen capture
//!
//! The portal grants a PipeWire node for the chosen monitor or window;
//! [`PipeWireSource`] consumes that node on its own thread and feeds the
//! frames into a [`ChannelSource`].

use crate::error::{Error, Result};
use crate::types::{PixelFormat, Resolution};

use super::{ChannelSource, FrameSender, ScreenSource, SourceFrame};

use pipewire as pw;
use pw::spa::param::video::VideoFormat;
use pw::spa::pod::Pod;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stream granted by the screencast portal
#[derive(Debug, Clone, Copy)]
pub struct ScreencastStream {
    pub node_id: u32,
    pub size: Option<Resolution>,
}

/// Run a screencast session
///
/// Shows the portal picker, then calls `f` with the granted stream on a
/// blocking thread. The portal session stays open until `f` returns.
pub async fn request_screencast<F, T>(show_cursor: bool, f: F) -> Result<T>
where
    F: FnOnce(ScreencastStream) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    use ashpd::desktop::screencast::{CursorMode, Screencast, SourceType};
    use ashpd::desktop::PersistMode;

    tracing::info!("Requesting screen capture permission via portal");

    let proxy = Screencast::new()
        .await
        .map_err(|e| Error::Portal(format!("Failed to connect to screencast portal: {}", e)))?;

    let session = proxy
        .create_session()
        .await
        .map_err(|e| Error::Portal(format!("Failed to create session: {}", e)))?;

    let cursor = if show_cursor {
        CursorMode::Embedded
    } else {
        CursorMode::Hidden
    };
    proxy
        .select_sources(
            &session,
            cursor,
            SourceType::Monitor | SourceType::Window,
            false,
            None,
            PersistMode::DoNot,
        )
        .await
        .map_err(|e| Error::Portal(format!("Failed to select sources: {}", e)))?;

    let response = proxy
        .start(&session, None)
        .await
        .map_err(|e| Error::Portal(format!("User cancelled or portal error: {}", e)))?;

    let streams = response
        .response()
        .map_err(|e| Error::Portal(format!("Failed to get screencast response: {}", e)))?;

    let stream = streams
        .streams()
        .first()
        .ok_or_else(|| Error::Portal("portal returned no streams".into()))?;
    let granted = ScreencastStream {
        node_id: stream.pipe_wire_node_id(),
        size: stream
            .size()
            .map(|(w, h)| Resolution::new(w.max(0) as u32, h.max(0) as u32)),
    };
    tracing::info!(
        "Got PipeWire node {} ({:?})",
        granted.node_id,
        granted.size
    );

    let result = tokio::task::spawn_blocking(move || f(granted))
        .await
        .map_err(|e| Error::Portal(format!("screencast task failed: {}", e)))?;

    if let Err(e) = session.close().await {
        tracing::warn!("Failed to close screencast session: {}", e);
    }
    result
}

/// Screen source reading a PipeWire screencast node
pub struct PipeWireSource {
    frames: ChannelSource,
    active: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PipeWireSource {
    /// Connect to `stream` and start receiving frames
    pub fn new(stream: ScreencastStream) -> Result<Self> {
        let (sender, frames) = ChannelSource::with_geometry(stream.size);
        let active = Arc::new(AtomicBool::new(true));
        let thread_active = active.clone();

        let thread = std::thread::Builder::new()
            .name("deskpipe-pipewire".into())
            .spawn(move || {
                if let Err(e) = run_pipewire_capture(stream, sender, thread_active) {
                    tracing::error!("PipeWire capture error: {}", e);
                }
            })?;

        Ok(Self {
            frames,
            active,
            thread: Some(thread),
        })
    }
}

impl ScreenSource for PipeWireSource {
    fn next_update(&mut self, timeout: Duration) -> Result<Option<SourceFrame>> {
        self.frames.next_update(timeout)
    }

    fn geometry(&self) -> Option<Resolution> {
        self.frames.geometry()
    }
}

impl Drop for PipeWireSource {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        tracing::info!("PipeWire capture stopped");
    }
}

/// User data for stream callbacks
struct CaptureState {
    sender: FrameSender,
    format: pw::spa::param::video::VideoInfoRaw,
    started: Instant,
}

fn packed_format(format: VideoFormat) -> Option<PixelFormat> {
    match format {
        VideoFormat::BGRx | VideoFormat::BGRA => Some(PixelFormat::Bgra),
        VideoFormat::RGBx | VideoFormat::RGBA => Some(PixelFormat::Rgba),
        _ => None,
    }
}

fn run_pipewire_capture(
    stream_info: ScreencastStream,
    sender: FrameSender,
    active: Arc<AtomicBool>,
) -> Result<()> {
    let node_id = stream_info.node_id;
    tracing::info!("Starting PipeWire capture for node {}", node_id);

    pw::init();

    let mainloop = pw::main_loop::MainLoop::new(None)
        .map_err(|e| Error::PipeWire(format!("Failed to create main loop: {:?}", e)))?;

    let context = pw::context::Context::new(&mainloop)
        .map_err(|e| Error::PipeWire(format!("Failed to create context: {:?}", e)))?;

    let core = context
        .connect(None)
        .map_err(|e| Error::PipeWire(format!("Failed to connect to PipeWire: {:?}", e)))?;

    let stream = pw::stream::Stream::new(
        &core,
        "deskpipe-capture",
        pw::properties::properties! {
            *pw::keys::MEDIA_TYPE => "Video",
            *pw::keys::MEDIA_CATEGORY => "Capture",
            *pw::keys::MEDIA_ROLE => "Screen",
        },
    )
    .map_err(|e| Error::PipeWire(format!("Failed to create stream: {:?}", e)))?;

    let state = CaptureState {
        sender,
        format: Default::default(),
        started: Instant::now(),
    };

    let running = active.clone();
    let _listener = stream
        .add_local_listener_with_user_data(state)
        .state_changed(move |_, _, old, new| {
            tracing::debug!("Stream state changed: {:?} -> {:?}", old, new);
            if matches!(new, pw::stream::StreamState::Error(_)) {
                running.store(false, Ordering::SeqCst);
            }
        })
        .param_changed(|_, state, id, param| {
            let Some(param) = param else { return };
            if id != pw::spa::param::ParamType::Format.as_raw() {
                return;
            }

            let Ok((media_type, media_subtype)) = pw::spa::param::format_utils::parse_format(param)
            else {
                return;
            };
            if media_type != pw::spa::param::format::MediaType::Video
                || media_subtype != pw::spa::param::format::MediaSubtype::Raw
            {
                return;
            }

            if let Err(e) = state.format.parse(param) {
                tracing::warn!("Failed to parse video format: {:?}", e);
                return;
            }

            tracing::info!(
                "Video format negotiated: {:?} {}x{}",
                state.format.format(),
                state.format.size().width,
                state.format.size().height,
            );
        })
        .process(|stream, state| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };
            let Some(format) = packed_format(state.format.format()) else {
                tracing::warn!("Unsupported video format: {:?}", state.format.format());
                return;
            };

            let datas = buffer.datas_mut();
            let Some(data) = datas.first_mut() else {
                return;
            };
            let chunk = data.chunk();
            let size = chunk.size() as usize;
            let offset = chunk.offset() as usize;
            let width = state.format.size().width;
            let height = state.format.size().height;
            let stride = match chunk.stride() {
                s if s > 0 => s as usize,
                _ => width as usize * 4,
            };
            if size == 0 || width == 0 || height == 0 {
                return;
            }

            let Some(slice) = data.data() else {
                return;
            };
            let Some(pixels) = slice.get(offset..offset + size) else {
                tracing::warn!("PipeWire chunk exceeds mapped buffer");
                return;
            };

            let frame = SourceFrame {
                data: pixels.to_vec(),
                width,
                height,
                stride,
                format,
                pts_ms: state.started.elapsed().as_millis() as i64,
            };
            if let Err(e) = frame.validate() {
                tracing::warn!("Dropping PipeWire frame: {}", e);
                return;
            }
            let _ = state.sender.send(frame);
        })
        .register()
        .map_err(|e| Error::PipeWire(format!("Failed to register stream listener: {:?}", e)))?;

    let resolution = stream_info.size.unwrap_or(Resolution::FHD_1080P);

    let obj = pw::spa::pod::object!(
        pw::spa::utils::SpaTypes::ObjectParamFormat,
        pw::spa::param::ParamType::EnumFormat,
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::MediaType,
            Id,
            pw::spa::param::format::MediaType::Video
        ),
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::MediaSubtype,
            Id,
            pw::spa::param::format::MediaSubtype::Raw
        ),
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::VideoFormat,
            Choice,
            Enum,
            Id,
            VideoFormat::BGRx,
            VideoFormat::BGRx,
            VideoFormat::BGRA,
            VideoFormat::RGBx,
            VideoFormat::RGBA
        ),
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::VideoSize,
            Choice,
            Range,
            Rectangle,
            pw::spa::utils::Rectangle {
                width: resolution.width,
                height: resolution.height,
            },
            pw::spa::utils::Rectangle {
                width: 1,
                height: 1,
            },
            pw::spa::utils::Rectangle {
                width: 16384,
                height: 16384,
            }
        ),
    );

    let values: Vec<u8> = pw::spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &pw::spa::pod::Value::Object(obj),
    )
    .map_err(|e| Error::PipeWire(format!("Failed to serialize format params: {:?}", e)))?
    .0
    .into_inner();

    let mut params = [Pod::from_bytes(&values)
        .ok_or_else(|| Error::PipeWire("Failed to create pod from bytes".into()))?];

    stream
        .connect(
            pw::spa::utils::Direction::Input,
            Some(node_id),
            pw::stream::StreamFlags::AUTOCONNECT | pw::stream::StreamFlags::MAP_BUFFERS,
            &mut params,
        )
        .map_err(|e| {
            Error::PipeWire(format!(
                "Failed to connect stream to node {}: {:?}",
                node_id, e
            ))
        })?;

    tracing::info!("PipeWire stream connected to node {}", node_id);

    while active.load(Ordering::SeqCst) {
        mainloop.loop_().iterate(Duration::from_millis(16));
    }

    tracing::info!("PipeWire capture loop ended");
    Ok(())
}
