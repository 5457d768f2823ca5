use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{GrayImage, Luma, Rgb, RgbImage};
use showroom::{
    compositor::Compositor,
    mask::MaskBuilder,
    types::{CandidateMaskSet, ClickPoint, GeneratedPatch, WorkingMask},
    utils::CoordinateMapper,
};

const PROCESS_MAX_DIM: u32 = 2048;

fn room(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8])
    })
}

fn disc(width: u32, height: u32, radius: u32) -> GrayImage {
    let (cx, cy) = (width / 2, height / 2);
    GrayImage::from_fn(width, height, |x, y| {
        let dx = u64::from(x.abs_diff(cx));
        let dy = u64::from(y.abs_diff(cy));
        let inside = dx * dx + dy * dy <= u64::from(radius) * u64::from(radius);
        Luma([if inside { 255 } else { 0 }])
    })
}

fn bench_mask_dilation(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask_dilation");
    let builder = MaskBuilder::default();
    for &(width, height) in &[(1024u32, 512u32), (2048, 1024)] {
        let candidates = CandidateMaskSet::new([
            disc(width, height, width / 10),
            disc(width, height, width / 14),
            disc(width, height, width / 20),
        ])
        .expect("candidate masks share dimensions");
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{width}x{height}")),
            &candidates,
            |b, candidates| b.iter(|| black_box(builder.build(candidates))),
        );
    }
    group.finish();
}

fn bench_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("composite");
    group.sample_size(10);
    let compositor = Compositor::default();
    for &(width, height) in &[(2048u32, 1024u32), (4000, 2000)] {
        let original = room(width, height);
        let frame = CoordinateMapper::to_processing(&original, ClickPoint::new(width / 2, height / 2), PROCESS_MAX_DIM)
            .expect("click inside image");
        let (fw, fh) = frame.dimensions();
        let mask = WorkingMask::from_image(disc(fw, fh, fw / 12));
        let patch = GeneratedPatch {
            image: RgbImage::from_pixel(fw, fh, Rgb([140, 120, 100])),
            attempts: 1,
        };
        group.bench_function(BenchmarkId::from_parameter(format!("{width}x{height}")), |b| {
            b.iter(|| {
                black_box(
                    compositor
                        .composite(&original, &frame, &patch, &mask)
                        .expect("composite succeeds"),
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_mask_dilation, bench_composite);
criterion_main!(benches);
