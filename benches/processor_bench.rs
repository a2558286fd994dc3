//! Benchmarks for per-frame filter processing on the GPU.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use camera_filters::filters::{create_filter, FilterKind};
use camera_filters::gpu::{GpuContext, RawFrame, TextureProvider};
use camera_filters::processor::FrameProcessor;

fn setup(kind: FilterKind) -> Option<FrameProcessor> {
    let ctx = match GpuContext::new_blocking() {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            eprintln!("Skipping GPU benchmarks: {}", e);
            return None;
        }
    };
    let textures = Arc::new(TextureProvider::new(ctx.clone(), "resources").ok()?);
    let filter = create_filter(&ctx, kind).ok()?;
    Some(FrameProcessor::new(ctx, textures, filter))
}

fn bench_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("Filter Processing");
    let frame = RawFrame::solid_bgra(1280, 720, [40, 80, 160, 255]);

    for kind in FilterKind::all() {
        let Some(processor) = setup(*kind) else {
            return;
        };
        group.bench_with_input(BenchmarkId::new("process_720p", kind.name()), &frame, |b, frame| {
            let mut t = 0.0f32;
            b.iter(|| {
                t += 1.0 / 30.0;
                black_box(processor.process(frame, t));
            });
        });
    }

    group.finish();
}

fn bench_ycbcr_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("Resolution Scaling");

    let resolutions = [(640, 360, "360p"), (1280, 720, "720p"), (1920, 1080, "1080p")];

    for (width, height, name) in resolutions {
        let Some(processor) = setup(FilterKind::Invert) else {
            return;
        };
        let luma = vec![128u8; (width * height) as usize];
        let chroma = vec![128u8; (width * height / 2) as usize];
        let frame = RawFrame::ycbcr420(width, height, luma, chroma);

        group.bench_with_input(BenchmarkId::new("ycbcr_invert", name), &frame, |b, frame| {
            b.iter(|| black_box(processor.process(frame, 0.0)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_filters, bench_ycbcr_conversion);
criterion_main!(benches);
