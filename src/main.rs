//! deskpipe CLI
//!
//! Command-line interface for inspecting and exercising the pipeline.

use clap::{Parser, Subcommand, ValueEnum};
use deskpipe::{
    config::AppConfig,
    decode::available_decoders,
    encode::{available_encoders, CodecInfo},
    gpu::enumerate_adapters,
    pipeline::run_bench,
    Backend, Codec, EncoderConfig, FrameBufferLayout, PixelFormat, Preset, Resolution,
};
use std::path::PathBuf;

/// Encoder preset for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum PresetArg {
    /// 1080p30 CBR for remote desktop
    LowLatency,
    /// 1440p60 CBR for remote desktop
    Balanced,
    /// 1080p30 VBR with periodic keyframes
    Recording,
}

impl From<PresetArg> for Preset {
    fn from(p: PresetArg) -> Self {
        match p {
            PresetArg::LowLatency => Preset::LowLatency1080p,
            PresetArg::Balanced => Preset::Balanced1440p,
            PresetArg::Recording => Preset::Recording,
        }
    }
}

#[derive(Parser)]
#[command(name = "deskpipe")]
#[command(about = "Hardware media pipeline - Capture, Encode, Decode, Mux, Render")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short = 'C', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show GPU adapters and codec availability
    Info {
        /// Open a test session for every encoder instead of trusting the build
        #[arg(long)]
        verify: bool,
    },

    /// Print the frame buffer layout for a format and size
    Layout {
        /// Pixel format (nv12, i420, i444, bgra, rgba, p010)
        #[arg(short, long, default_value = "nv12")]
        format: PixelFormat,

        /// Resolution (e.g., 1920x1080)
        #[arg(short, long, default_value = "1920x1080")]
        resolution: Resolution,

        /// Stride alignment in bytes
        #[arg(short, long, default_value = "32")]
        align: usize,
    },

    /// Encode synthetic frames, decode them back and report throughput
    Bench {
        /// Video codec (h264, hevc, av1)
        #[arg(short, long, default_value = "h264")]
        codec: Codec,

        /// Encoder backend (nvenc, qsv, amf, videotoolbox, software)
        #[arg(short, long, default_value = "software")]
        backend: Backend,

        /// Resolution (e.g., 1920x1080)
        #[arg(short, long, default_value = "1920x1080")]
        resolution: Resolution,

        /// Number of frames to encode
        #[arg(short, long, default_value = "300")]
        frames: u64,

        /// Bitrate in kbps (0 derives it from quality and resolution)
        #[arg(long, default_value = "0")]
        bitrate: u32,

        /// Also mux the packets into this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Start from a preset
        #[arg(short, long, value_enum)]
        preset: Option<PresetArg>,
    },

    /// Record the screen through the desktop portal
    #[cfg(target_os = "linux")]
    Record {
        /// Output file (.mp4, .mkv, .ts)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Recording length in seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Video codec (h264, hevc, av1)
        #[arg(short, long)]
        codec: Option<Codec>,

        /// Encoder backend (nvenc, qsv, amf, videotoolbox, software)
        #[arg(short, long)]
        backend: Option<Backend>,
    },

    /// List available presets
    Presets,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    // Initialize logging
    let directive = config.log_filter.as_deref().unwrap_or("deskpipe=info");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();

    match cli.command {
        Commands::Info { verify } => cmd_info(verify),
        Commands::Layout {
            format,
            resolution,
            align,
        } => cmd_layout(format, resolution, align),
        Commands::Bench {
            codec,
            backend,
            resolution,
            frames,
            bitrate,
            output,
            preset,
        } => {
            let mut encoder = match preset {
                Some(p) => EncoderConfig::from_preset(p.into()),
                None => config.encoder.clone(),
            };
            encoder = encoder
                .with_codec(codec)
                .with_backend(backend)
                .with_resolution(resolution.width, resolution.height);
            if bitrate > 0 {
                encoder = encoder.with_bitrate_kbps(bitrate);
            }
            cmd_bench(encoder, frames, output)
        }
        #[cfg(target_os = "linux")]
        Commands::Record {
            output,
            duration,
            codec,
            backend,
        } => {
            let mut config = config;
            if let Some(output) = output {
                config.record.output = output;
            }
            if let Some(duration) = duration {
                config.record.duration_secs = duration;
            }
            if let Some(codec) = codec {
                config.encoder.codec = codec;
            }
            if let Some(backend) = backend {
                config.encoder.backend = backend;
            }
            cmd_record(config).await
        }
        Commands::Presets => cmd_presets(),
    }
}

fn cmd_info(verify: bool) -> anyhow::Result<()> {
    println!("deskpipe {}", deskpipe::VERSION);
    println!("==============\n");

    println!("=== GPU Adapters ===");
    let adapters = enumerate_adapters();
    if adapters.is_empty() {
        println!("  (none)");
    }
    for adapter in &adapters {
        println!(
            "  {}  {} [{:?}, {:?}]",
            adapter.id, adapter.name, adapter.backend, adapter.device_type
        );
    }

    println!("\n=== Encoders ===");
    let encoders = available_encoders(verify);
    for info in &encoders {
        println!(
            "  {:<18} {} ({})",
            info.name,
            info.codec.display_name(),
            info.backend
        );
    }
    let best = CodecInfo::prioritized(encoders);
    println!("Preferred:");
    for codec in Codec::ALL {
        println!(
            "  {:<6} {}",
            codec.name(),
            best.get(codec).map_or("none", |info| info.name)
        );
    }

    println!("\n=== Decoders ===");
    for info in available_decoders() {
        println!("  {:<6} on {}", info.codec.name(), info.device);
    }

    Ok(())
}

fn cmd_layout(format: PixelFormat, resolution: Resolution, align: usize) -> anyhow::Result<()> {
    let layout = FrameBufferLayout::compute(format, resolution.width, resolution.height, align)?;

    println!("{} {} (align {})", format, resolution, align);
    for plane in 0..layout.plane_count() {
        println!(
            "  plane {}: stride {:>6}  offset {:>9}  rows {:>5}",
            plane,
            layout.strides()[plane],
            layout.offsets()[plane],
            layout.plane_heights()[plane]
        );
    }
    println!("  total: {} bytes", layout.length());
    Ok(())
}

fn cmd_bench(config: EncoderConfig, frames: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("deskpipe Encoder Benchmark");
    println!("==========================\n");
    println!("Codec: {}", config.codec);
    println!("Backend: {}", config.backend);
    println!("Resolution: {}", config.resolution());
    println!("Frames: {}", frames);
    println!("\nRunning benchmark...\n");

    let report = run_bench(config, frames, output.clone())?;

    println!("Results:");
    println!("  Encoder: {}", report.encoder_name);
    println!("  Total time: {:.2}s", report.elapsed.as_secs_f64());
    println!("  Round-trip FPS: {:.1}", report.fps());
    println!("  Avg encode: {:.2} ms/frame", report.avg_encode_ms);
    println!(
        "  Packets: {} ({} keyframes), avg {} bytes, max {} bytes",
        report.packets,
        report.keyframes,
        report.avg_packet(),
        report.max_packet
    );
    println!("  Decoded frames: {}", report.decoded);
    println!(
        "  Realtime capable (60fps): {}",
        if report.fps() >= 60.0 { "Yes" } else { "No" }
    );

    if let Some(path) = output {
        let summary = deskpipe::output::inspect(&path)?;
        println!(
            "\nMuxed {} samples into {} ({}x{})",
            summary.samples(),
            path.display(),
            summary.width,
            summary.height
        );
    }

    Ok(())
}

#[cfg(target_os = "linux")]
async fn cmd_record(config: AppConfig) -> anyhow::Result<()> {
    use deskpipe::capture::{portal::request_screencast, PipeWireSource};
    use deskpipe::{AdapterId, Capturer, RecordPipeline};
    use std::time::Duration;

    let AppConfig {
        encoder,
        capture,
        record,
        ..
    } = config;

    println!("Recording {}s to {}", record.duration_secs, record.output.display());

    let stats = request_screencast(capture.show_cursor, move |stream| {
        let adapter = match capture.adapter {
            Some(id) => AdapterId(id),
            None => enumerate_adapters()
                .first()
                .map(|a| a.id)
                .ok_or_else(|| deskpipe::Error::InvalidConfig("no GPU adapter found".into()))?,
        };

        let mut encoder = encoder;
        if let Some(size) = stream.size {
            // Encoders need even dimensions; the converter scales the odd pixel away.
            encoder = encoder.with_resolution(size.width & !1, size.height & !1);
        }

        let source = PipeWireSource::new(stream)?;
        let capturer = Capturer::new(adapter, Box::new(source))?;
        let mut pipeline = RecordPipeline::new(capturer, encoder, record.output)?;
        pipeline.run_for(
            Duration::from_secs(record.duration_secs),
            Duration::from_millis(capture.timeout_ms),
        )?;
        pipeline.finish()
    })
    .await?;

    println!("\nStatistics:");
    println!("  Frames captured: {}", stats.frames_captured);
    println!("  Frames encoded: {}", stats.frames_encoded);
    println!("  Capture timeouts: {}", stats.capture_timeouts);
    println!("  Packets: {}", stats.packets);
    println!("  Bytes written: {}", stats.bytes_written);
    println!("  Avg encode latency: {:.2} ms", stats.avg_encode_latency_ms);

    Ok(())
}

fn cmd_presets() -> anyhow::Result<()> {
    println!("Available Presets");
    println!("=================\n");

    for preset in Preset::ALL {
        let config = EncoderConfig::from_preset(preset);
        println!("{:?}", preset);
        println!("  {}", preset.description());
        println!(
            "  {} {}fps, {:?}, {} kbps\n",
            config.resolution(),
            config.framerate,
            config.rate_control,
            config.bitrate_kbps
        );
    }

    Ok(())
}
