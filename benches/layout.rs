use criterion::{black_box, criterion_group, criterion_main, Criterion};
use deskpipe::bitstream;
use deskpipe::{Codec, FrameBufferLayout, PixelFormat};

fn bench_layout(c: &mut Criterion) {
    c.bench_function("layout_nv12_1080p", |b| {
        b.iter(|| FrameBufferLayout::compute(PixelFormat::Nv12, black_box(1920), black_box(1080), 32))
    });
    c.bench_function("layout_i444_4k", |b| {
        b.iter(|| FrameBufferLayout::compute(PixelFormat::Yuv444p, black_box(3840), black_box(2160), 64))
    });
}

fn bench_keyframe_scan(c: &mut Criterion) {
    // Non-IDR slices with a trailing IDR start code deep in the buffer
    let mut data = Vec::with_capacity(256 * 1024);
    for _ in 0..64 {
        data.extend_from_slice(&[0, 0, 0, 1, 0x41]);
        data.extend(std::iter::repeat(0x9a).take(4000));
    }
    data.extend_from_slice(&[0, 0, 1, 0x65, 0x88]);

    c.bench_function("contains_keyframe_h264_256k", |b| {
        b.iter(|| bitstream::contains_keyframe(Codec::H264, black_box(&data)))
    });
    c.bench_function("nal_units_h264_256k", |b| {
        b.iter(|| bitstream::nal_units(black_box(&data)).count())
    });
}

criterion_group!(benches, bench_layout, bench_keyframe_scan);
criterion_main!(benches);
