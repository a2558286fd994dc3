//! Integration tests for audio analysis feeding audio-reactive filters.

use std::sync::Arc;

use camera_filters::audio::synth::{noise_samples, sine_buffers};
use camera_filters::audio::{AudioAnalyzer, AudioFormat, AudioSampleBuffer, SPECTRUM_LEN};
use camera_filters::filters::{create_filter, Filter, FilterKind, FilterRegistry, SpectrumFilter};
use camera_filters::gpu::GpuContext;

const FORMAT: AudioFormat = AudioFormat {
    sample_rate: 44_100,
    channels: 1,
};

async fn gpu() -> Option<Arc<GpuContext>> {
    GpuContext::new().await.ok().map(Arc::new)
}

#[test]
fn test_noise_spreads_energy() {
    let mut analyzer = AudioAnalyzer::new();
    let samples = noise_samples(1024, 1, 0.5, 7);
    let spectrum = analyzer.analyze(&samples).unwrap();

    let nonzero = spectrum.iter().filter(|&&v| v > 0.0).count();
    assert!(nonzero > SPECTRUM_LEN / 2);
}

#[test]
fn test_consecutive_buffers_are_independent() {
    let mut analyzer = AudioAnalyzer::new();
    let buffers = sine_buffers(2000.0, FORMAT, 1024, 2, 0.0);
    let loud = analyzer.analyze_buffer(&buffers[0]).unwrap();
    let silence = analyzer
        .analyze_buffer(&AudioSampleBuffer::new(FORMAT, vec![0; 1024], 1.0))
        .unwrap();

    assert!(loud.iter().any(|&v| v > 0.0));
    assert!(silence.iter().all(|&v| v == 0.0));
}

#[tokio::test]
async fn test_feed_updates_audio_reactive_filter() {
    let ctx = match gpu().await {
        Some(ctx) => ctx,
        None => return,
    };
    let spectrum_filter = create_filter(&ctx, FilterKind::Spectrum).unwrap();
    let mut analyzer = AudioAnalyzer::new();

    let buffer = &sine_buffers(1500.0, FORMAT, 1024, 1, 0.0)[0];
    let pushed = analyzer.feed(buffer, spectrum_filter.as_ref()).unwrap();

    let params = spectrum_filter.stage().params();
    let stored = params.audio().unwrap().spectrum();
    assert_eq!(stored, &pushed);
    assert!(stored.iter().any(|&v| v > 0.0));
}

#[tokio::test]
async fn test_feed_skips_filters_without_audio() {
    let ctx = match gpu().await {
        Some(ctx) => ctx,
        None => return,
    };
    let registry = FilterRegistry::new(&ctx).unwrap();
    let mut analyzer = AudioAnalyzer::new();
    let buffer = &sine_buffers(1500.0, FORMAT, 1024, 1, 0.0)[0];

    for filter in registry.all().iter().filter(|f| !f.wants_audio()) {
        assert!(analyzer.feed(buffer, filter.as_ref()).is_none());
        assert!(filter.stage().params().audio().is_none());
    }
}

#[tokio::test]
async fn test_feed_skips_short_buffers() {
    let ctx = match gpu().await {
        Some(ctx) => ctx,
        None => return,
    };
    let filter = SpectrumFilter::new(&ctx).unwrap();
    let mut analyzer = AudioAnalyzer::new();
    let short = AudioSampleBuffer::new(FORMAT, vec![i16::MAX; 100], 0.0);

    assert!(analyzer.feed(&short, &filter).is_none());
    let params = filter.stage().params();
    assert!(params.audio().unwrap().spectrum().iter().all(|&v| v == 0.0));
}
