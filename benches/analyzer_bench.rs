//! Benchmarks for audio spectrum analysis.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use camera_filters::audio::synth::{noise_samples, sine_samples};
use camera_filters::audio::{blackman_window, AudioAnalyzer, SPECTRUM_LEN};

const SAMPLE_RATE: u32 = 44100;

fn bench_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("Spectrum Analysis");

    // Typical capture buffer sizes.
    for frames in [512, 1024, 4096] {
        let samples = sine_samples(1000.0, SAMPLE_RATE, 1, frames, 0.8);

        group.throughput(Throughput::Elements(frames as u64));
        group.bench_with_input(BenchmarkId::new("analyze", frames), &samples, |b, samples| {
            let mut analyzer = AudioAnalyzer::new();
            b.iter(|| {
                black_box(analyzer.analyze(samples).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_noise(c: &mut Criterion) {
    let samples = noise_samples(1024, 1, 1.0, 42);
    let mut analyzer = AudioAnalyzer::new();
    c.bench_function("analyze_noise_1024", |b| {
        b.iter(|| black_box(analyzer.analyze(&samples).unwrap()));
    });
}

fn bench_window(c: &mut Criterion) {
    c.bench_function("blackman_window_128", |b| {
        b.iter(|| black_box(blackman_window(SPECTRUM_LEN)));
    });
}

criterion_group!(benches, bench_analyze, bench_noise, bench_window);
criterion_main!(benches);
