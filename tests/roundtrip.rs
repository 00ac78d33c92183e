//! End-to-end encode → decode → mux tests against the public API

use deskpipe::encode::is_available;
use deskpipe::output::inspect;
use deskpipe::pipeline::synthetic_frame;
use deskpipe::{
    Backend, Codec, DecodedFrame, Decoder, DecoderConfig, DeviceType, Encoder, EncoderConfig,
    GpuDevice, MuxConfig, Muxer, Packet, PixelFormat, Render, RenderTarget,
};

const FRAMES: u64 = 12;

fn software_h264() -> Option<EncoderConfig> {
    if !is_available(Codec::H264, Backend::Software) {
        println!("libx264 not available, skipping test");
        return None;
    }
    Some(
        EncoderConfig::default()
            .with_codec(Codec::H264)
            .with_backend(Backend::Software)
            .with_resolution(320, 240)
            .with_framerate(30)
            .with_bitrate_kbps(600),
    )
}

fn encode_all(config: EncoderConfig, frames: u64) -> Vec<Packet> {
    let mut encoder = Encoder::new(config, Vec::<Packet>::new()).unwrap();
    for index in 0..frames {
        let frame = synthetic_frame(encoder.layout(), index, true);
        encoder.encode(&frame, index as i64 * 33).unwrap();
    }
    encoder.flush().unwrap();
    std::mem::take(encoder.sink_mut())
}

#[test]
fn test_encode_decode_round_trip() {
    let Some(config) = software_h264() else {
        return;
    };
    let packets = encode_all(config, FRAMES);
    assert_eq!(packets.len() as u64, FRAMES);
    assert!(packets[0].keyframe);
    assert!(packets.windows(2).all(|w| w[0].pts_ms < w[1].pts_ms));

    let mut frames = Vec::new();
    let mut decoder = Decoder::new(
        DecoderConfig::new(Codec::H264, DeviceType::None),
        |frame: DecodedFrame<'_>| {
            frames.push((
                frame.width,
                frame.height,
                frame.format,
                frame.planes.len(),
                frame.keyframe,
            ))
        },
    )
    .unwrap();
    for packet in &packets {
        decoder.decode(&packet.data).unwrap();
    }
    decoder.flush().unwrap();
    drop(decoder);

    assert_eq!(frames.len() as u64, FRAMES);
    assert!(frames
        .iter()
        .all(|&(w, h, format, planes, _)| (w, h, planes) == (320, 240, 3)
            && format == PixelFormat::Yuv420p));
    // Keyframe flags survive the trip in both directions
    assert!(frames[0].4);
    let decoded_keys = frames.iter().filter(|f| f.4).count();
    let encoded_keys = packets.iter().filter(|p| p.keyframe).count();
    assert_eq!(decoded_keys, encoded_keys);
}

#[test]
fn test_decoder_waits_for_keyframe() {
    let Some(config) = software_h264() else {
        return;
    };
    let packets = encode_all(config, 4);

    let mut delivered = 0usize;
    let mut decoder = Decoder::new(
        DecoderConfig::new(Codec::H264, DeviceType::None),
        |_: DecodedFrame<'_>| delivered += 1,
    )
    .unwrap();

    // Joining mid-stream: delta frames are dropped without output.
    for packet in packets.iter().skip(1) {
        assert_eq!(decoder.decode(&packet.data).unwrap(), 0);
    }
    assert!(decoder.awaiting_keyframe());
    decoder.decode(&packets[0].data).unwrap();
    assert!(!decoder.awaiting_keyframe());
    decoder.flush().unwrap();
    drop(decoder);

    assert!(delivered >= 1);
}

#[test]
fn test_decoder_recovers_after_corrupt_keyframe() {
    let Some(config) = software_h264() else {
        return;
    };
    let packets = encode_all(config, 4);

    let mut delivered = Vec::new();
    let mut decoder = Decoder::new(
        DecoderConfig::new(Codec::H264, DeviceType::None),
        |frame: DecodedFrame<'_>| delivered.push(frame.keyframe),
    )
    .unwrap();

    // An IDR slice header with nothing decodable behind it
    let mut corrupt = vec![0, 0, 0, 1, 0x65];
    corrupt.extend(std::iter::repeat(0xff).take(128));
    let err = decoder.decode(&corrupt).unwrap_err();
    assert_eq!(err.kind(), deskpipe::ErrorKind::MalformedInput);
    assert!(decoder.awaiting_keyframe());

    // The gate holds until a real keyframe shows up
    for packet in packets.iter().skip(1) {
        assert_eq!(decoder.decode(&packet.data).unwrap(), 0);
        assert!(decoder.awaiting_keyframe());
    }
    decoder.decode(&packets[0].data).unwrap();
    assert!(!decoder.awaiting_keyframe());
    for packet in packets.iter().skip(1) {
        decoder.decode(&packet.data).unwrap();
    }
    decoder.flush().unwrap();
    assert_eq!(decoder.stats().errors, 1);
    drop(decoder);

    assert_eq!(delivered.len(), packets.len());
    assert!(delivered[0]);
}

#[test]
fn test_decoded_frames_render() {
    let Some(config) = software_h264() else {
        return;
    };
    let Ok(gpu) = GpuDevice::open_default() else {
        println!("No GPU adapter available, skipping test");
        return;
    };
    let packets = encode_all(config, 3);

    let mut render = Render::with_device(&gpu, true, RenderTarget::Offscreen);
    let mut failures = Vec::new();
    let mut decoder = Decoder::new(
        DecoderConfig::new(Codec::H264, DeviceType::None),
        |frame: DecodedFrame<'_>| {
            if let Err(e) = render.render_frame(&frame) {
                failures.push(e.to_string());
            }
        },
    )
    .unwrap();
    for packet in &packets {
        decoder.decode(&packet.data).unwrap();
    }
    decoder.flush().unwrap();
    drop(decoder);

    assert!(failures.is_empty(), "{:?}", failures);
    assert_eq!(render.frames_rendered(), 3);
    assert_eq!(render.size(), Some((320, 240)));

    let pixels = gpu.read_texture(render.shared_texture().unwrap()).unwrap();
    assert_eq!(pixels.len(), 320 * 240 * 4);
    // Neutral chroma renders grey; the luma gradient must still show
    assert!(pixels
        .chunks(4)
        .all(|px| px[3] == 255 && px[0].abs_diff(px[1]) <= 8 && px[1].abs_diff(px[2]) <= 8));
    let red = pixels.chunks(4).map(|px| px[0]);
    let spread = red.clone().max().unwrap() - red.min().unwrap();
    assert!(spread > 50);
}

#[test]
fn test_mux_and_inspect() {
    let Some(config) = software_h264() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.mp4");
    let packets = encode_all(config.clone(), FRAMES);

    let mut muxer = Muxer::new(MuxConfig::for_encoder(&path, &config)).unwrap();
    for packet in &packets {
        muxer
            .write_video_frame(&packet.data, packet.pts_ms, packet.keyframe)
            .unwrap();
    }
    muxer.write_tail().unwrap();
    assert_eq!(muxer.frames(), FRAMES);
    drop(muxer);

    let summary = inspect(&path).unwrap();
    assert_eq!(summary.samples() as u64, FRAMES);
    assert_eq!(summary.codec, Some(Codec::H264));
    assert_eq!((summary.width, summary.height), (320, 240));
    assert!(summary.keyframes[0]);
    assert_eq!(
        summary.keyframes.iter().filter(|k| **k).count(),
        packets.iter().filter(|p| p.keyframe).count()
    );
    let mut sorted = summary.pts_ms.clone();
    sorted.sort_unstable();
    assert_eq!(sorted[0], 0);
}
