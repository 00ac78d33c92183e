//! Single-stream video muxer

use crate::config::MuxConfig;
use crate::encode::Codec;
use crate::error::{Error, Result};

use super::Container;

use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

/// Largest accepted width or height
pub const MAX_DIMENSION: u32 = 16384;

const MS_TIME_BASE: ffmpeg::Rational = ffmpeg::Rational(1, 1000);

/// Writes encoded video packets into a container file
pub struct Muxer {
    output: ffmpeg::format::context::Output,
    config: MuxConfig,
    container: Container,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    timeline: Timeline,
    tail_written: bool,
    frames: u64,
    bytes_written: u64,
}

impl Muxer {
    /// Create (or truncate) the output file and write the container header
    pub fn new(config: MuxConfig) -> Result<Self> {
        let (width, height) = (config.width, config.height);
        if width == 0
            || height == 0
            || width % 2 != 0
            || height % 2 != 0
            || width > MAX_DIMENSION
            || height > MAX_DIMENSION
        {
            return Err(Error::InvalidGeometry(format!(
                "cannot mux {}x{} video",
                width, height
            )));
        }
        if config.framerate == 0 {
            return Err(Error::InvalidConfig("frame rate must be positive".into()));
        }
        let path = ffmpeg_path(&config.path)?;
        let container = Container::from_path(&config.path)?;
        crate::init_ffmpeg()?;

        let mut output = ffmpeg::format::output_as(path, container.format_name())
            .map_err(|e| {
                Error::TransientIo(format!("failed to open {}: {}", config.path.display(), e))
            })?;

        let stream_index = {
            let mut stream = output
                .add_stream(config.codec.ffmpeg_id())
                .map_err(|e| Error::FFmpeg(format!("failed to add video stream: {}", e)))?;
            stream.set_time_base(MS_TIME_BASE);
            stream.set_rate(ffmpeg::Rational::new(config.framerate as i32, 1));
            unsafe {
                let par = (*stream.as_mut_ptr()).codecpar;
                (*par).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
                (*par).codec_id = config.codec.ffmpeg_id().into();
                (*par).width = width as i32;
                (*par).height = height as i32;
            }
            stream.index()
        };

        output
            .write_header()
            .map_err(|e| Error::TransientIo(format!("failed to write header: {}", e)))?;

        let time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(MS_TIME_BASE);

        tracing::info!(
            "Muxer created: {} ({}, {} {}x{} @ {}fps)",
            config.path.display(),
            container,
            config.codec.display_name(),
            width,
            height,
            config.framerate
        );

        Ok(Self {
            output,
            container,
            stream_index,
            time_base,
            timeline: Timeline::new(config.framerate),
            config,
            tail_written: false,
            frames: 0,
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn container(&self) -> Container {
        self.container
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one encoded frame
    ///
    /// The first frame must be a keyframe. Timestamps are rebased to the
    /// first frame and forced to increase.
    pub fn write_video_frame(&mut self, data: &[u8], pts_ms: i64, keyframe: bool) -> Result<()> {
        if self.tail_written {
            return Err(Error::ContractViolation("muxer trailer already written".into()));
        }
        if !self.timeline.is_started() && !keyframe {
            return Err(Error::ContractViolation(
                "first muxed frame must be a keyframe".into(),
            ));
        }
        let (pts, duration) = self.timeline.advance(pts_ms);

        let mut packet = ffmpeg::Packet::copy(data);
        packet.set_pts(Some(pts));
        packet.set_dts(Some(pts));
        packet.set_duration(duration);
        packet.set_stream(self.stream_index);
        if keyframe {
            packet.set_flags(ffmpeg::codec::packet::Flags::KEY);
        }
        packet.rescale_ts(MS_TIME_BASE, self.time_base);

        packet
            .write(&mut self.output)
            .map_err(|e| Error::TransientIo(format!("failed to write frame: {}", e)))?;

        self.frames += 1;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Write the container trailer; later calls do nothing
    pub fn write_tail(&mut self) -> Result<()> {
        if self.tail_written {
            return Ok(());
        }
        self.output
            .write_trailer()
            .map_err(|e| Error::TransientIo(format!("failed to write trailer: {}", e)))?;
        self.tail_written = true;

        tracing::info!(
            "Muxer finished {}: {} frames, {:.2} MB",
            self.config.path.display(),
            self.frames,
            self.bytes_written as f64 / 1_000_000.0
        );
        Ok(())
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        if !self.tail_written {
            tracing::warn!(
                "Muxer for {} dropped without trailer, file is truncated",
                self.config.path.display()
            );
        }
    }
}

/// Millisecond timeline of the muxed stream
///
/// Timestamps are rebased to the first frame; a timestamp that does not
/// increase is replaced by the previous one plus a frame interval, and
/// durations fall back to a frame interval when they cannot be measured.
#[derive(Debug, Clone)]
struct Timeline {
    interval_ms: i64,
    start_ms: i64,
    last_pts: i64,
    started: bool,
}

impl Timeline {
    fn new(framerate: u32) -> Self {
        Self {
            interval_ms: (1000 / framerate.max(1) as i64).max(1),
            start_ms: 0,
            last_pts: 0,
            started: false,
        }
    }

    fn is_started(&self) -> bool {
        self.started
    }

    /// Rebased pts and duration for the next frame
    fn advance(&mut self, pts_ms: i64) -> (i64, i64) {
        if !self.started {
            self.start_ms = pts_ms;
        }
        let mut pts = pts_ms - self.start_ms;
        if self.started && pts <= self.last_pts {
            tracing::debug!("Non-increasing pts {}ms after {}ms", pts, self.last_pts);
            pts = self.last_pts + self.interval_ms;
        }
        self.started = true;

        let duration = match pts - self.last_pts {
            d if d > 0 => d,
            _ => self.interval_ms,
        };
        self.last_pts = pts;
        (pts, duration)
    }
}

/// Per-sample summary of a muxed file
#[derive(Debug, Clone, Default)]
pub struct MuxSummary {
    pub path: PathBuf,
    pub codec: Option<Codec>,
    pub width: u32,
    pub height: u32,
    /// Keyframe flag of every video sample in file order
    pub keyframes: Vec<bool>,
    /// Presentation time of every video sample, in milliseconds
    pub pts_ms: Vec<i64>,
}

impl MuxSummary {
    pub fn samples(&self) -> usize {
        self.keyframes.len()
    }
}

/// FFmpeg opens files by C string; refuse paths that cannot become one
fn ffmpeg_path(path: &Path) -> Result<&str> {
    match path.to_str() {
        Some(s) if !s.contains('\0') => Ok(s),
        _ => Err(Error::InvalidConfig(format!(
            "path {} is not valid UTF-8 without NUL bytes",
            path.display()
        ))),
    }
}

/// Read back the video samples of a container file
pub fn inspect(path: impl AsRef<Path>) -> Result<MuxSummary> {
    let path = path.as_ref();
    let url = ffmpeg_path(path)?;
    crate::init_ffmpeg()?;

    let mut input = ffmpeg::format::input(url)
        .map_err(|e| Error::TransientIo(format!("failed to open {}: {}", path.display(), e)))?;

    let (index, time_base, codec, width, height) = {
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| Error::MalformedInput(format!("{} has no video stream", path.display())))?;
        let params = stream.parameters();
        let codec = Codec::ALL
            .into_iter()
            .find(|c| c.ffmpeg_id() == params.id());
        let (width, height) = unsafe {
            let par = params.as_ptr();
            ((*par).width.max(0) as u32, (*par).height.max(0) as u32)
        };
        (stream.index(), stream.time_base(), codec, width, height)
    };

    let mut summary = MuxSummary {
        path: path.to_path_buf(),
        codec,
        width,
        height,
        ..Default::default()
    };

    let mut packet = ffmpeg::Packet::empty();
    loop {
        match packet.read(&mut input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                return Err(Error::MalformedInput(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        }
        if packet.stream() != index {
            continue;
        }
        packet.rescale_ts(time_base, MS_TIME_BASE);
        summary.keyframes.push(packet.is_key());
        summary.pts_ms.push(packet.pts().unwrap_or_default());
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: PathBuf, width: u32, height: u32, framerate: u32) -> MuxConfig {
        MuxConfig::new(path, width, height, Codec::H264, framerate)
    }

    #[test]
    fn test_rejects_bad_geometry_and_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.mp4");

        for (w, h) in [(0, 480), (641, 480), (640, 0), (MAX_DIMENSION + 2, 480)] {
            assert!(matches!(
                Muxer::new(config(path.clone(), w, h, 30)),
                Err(Error::InvalidGeometry(_))
            ));
        }
        assert!(matches!(
            Muxer::new(config(path.clone(), 640, 480, 0)),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Muxer::new(config(dir.path().join("clip.avi"), 640, 480, 30)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.mp4");
        assert!(matches!(
            Muxer::new(config(path, 640, 480, 30)),
            Err(Error::TransientIo(_))
        ));
    }

    #[test]
    fn test_unrepresentable_paths() {
        let dir = tempfile::tempdir().unwrap();
        let nul = dir.path().join("bad\0name.mp4");
        assert!(matches!(
            Muxer::new(config(nul.clone(), 640, 480, 30)),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(inspect(&nul), Err(Error::InvalidConfig(_))));

        #[cfg(unix)]
        {
            use std::ffi::OsStr;
            use std::os::unix::ffi::OsStrExt;

            let latin1 = dir.path().join(OsStr::from_bytes(b"caf\xe9.mp4"));
            assert!(matches!(
                Muxer::new(config(latin1.clone(), 640, 480, 30)),
                Err(Error::InvalidConfig(_))
            ));
            assert!(matches!(inspect(&latin1), Err(Error::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_first_frame_must_be_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = Muxer::new(config(dir.path().join("out.ts"), 64, 64, 30)).unwrap();

        let err = muxer.write_video_frame(&[0, 0, 0, 1, 0x41, 0], 0, false).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
        assert_eq!(muxer.frames(), 0);
    }

    #[test]
    fn test_tail_is_idempotent_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = Muxer::new(config(dir.path().join("out.ts"), 64, 64, 30)).unwrap();

        muxer.write_video_frame(&[0, 0, 0, 1, 0x65, 0x88], 1000, true).unwrap();
        muxer.write_tail().unwrap();
        muxer.write_tail().unwrap();
        assert!(matches!(
            muxer.write_video_frame(&[0, 0, 0, 1, 0x41, 0], 1033, false),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_timeline_rebases_and_repairs() {
        let mut timeline = Timeline::new(25);
        assert!(!timeline.is_started());

        // Repeated and backwards timestamps advance by one frame interval.
        let steps: Vec<(i64, i64)> = [5000, 5000, 4000, 5200, 5240]
            .into_iter()
            .map(|pts| timeline.advance(pts))
            .collect();
        assert_eq!(steps, vec![(0, 40), (40, 40), (80, 40), (200, 120), (240, 40)]);
        assert!(timeline.is_started());
    }

    #[test]
    fn test_timeline_interval_for_high_rates() {
        let mut timeline = Timeline::new(2000);
        assert_eq!(timeline.advance(7), (0, 1));
        assert_eq!(timeline.advance(7), (1, 1));
    }
}
