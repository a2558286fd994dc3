//! Synthetic PCM for tests, benches and demos.

use std::f32::consts::PI;

use super::buffer::{AudioFormat, AudioSampleBuffer};

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Interleaved sine samples, the same tone on every channel.
///
/// # Arguments
/// * `frequency` - Frequency in Hz
/// * `sample_rate` - Sample rate in Hz
/// * `channels` - Number of interleaved channels
/// * `frames` - Samples per channel
/// * `amplitude` - Amplitude (0.0 to 1.0)
pub fn sine_samples(
    frequency: f32,
    sample_rate: u32,
    channels: u16,
    frames: usize,
    amplitude: f32,
) -> Vec<i16> {
    (0..frames)
        .flat_map(|i| {
            let t = i as f32 / sample_rate as f32;
            let value = to_i16(amplitude * (2.0 * PI * frequency * t).sin());
            std::iter::repeat(value).take(channels as usize)
        })
        .collect()
}

/// White noise from a linear congruential generator, reproducible per seed.
pub fn noise_samples(frames: usize, channels: u16, amplitude: f32, seed: u64) -> Vec<i16> {
    let mut state = seed;
    let a: u64 = 6364136223846793005;
    let c: u64 = 1442695040888963407;

    (0..frames * channels as usize)
        .map(|_| {
            state = state.wrapping_mul(a).wrapping_add(c);
            let normalized = (state as f32 / u64::MAX as f32) * 2.0 - 1.0;
            to_i16(amplitude * normalized)
        })
        .collect()
}

/// A continuous sine split into capture-sized buffers with running timestamps.
pub fn sine_buffers(
    frequency: f32,
    format: AudioFormat,
    frames_per_buffer: usize,
    count: usize,
    start_time: f64,
) -> Vec<AudioSampleBuffer> {
    let all = sine_samples(
        frequency,
        format.sample_rate,
        format.channels,
        frames_per_buffer * count,
        0.8,
    );
    all.chunks(frames_per_buffer * format.channels as usize)
        .enumerate()
        .map(|(i, chunk)| {
            let offset = (i * frames_per_buffer) as f64 / format.sample_rate as f64;
            AudioSampleBuffer::new(format, chunk.to_vec(), start_time + offset)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_interleaves_channels() {
        let samples = sine_samples(440.0, 44_100, 2, 64, 1.0);
        assert_eq!(samples.len(), 128);
        for frame in samples.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_noise_is_reproducible() {
        assert_eq!(noise_samples(32, 1, 0.5, 7), noise_samples(32, 1, 0.5, 7));
        assert_ne!(noise_samples(32, 1, 0.5, 7), noise_samples(32, 1, 0.5, 8));
    }

    #[test]
    fn test_buffers_have_running_timestamps() {
        let format = AudioFormat {
            sample_rate: 1000,
            channels: 1,
        };
        let buffers = sine_buffers(10.0, format, 100, 3, 2.0);
        assert_eq!(buffers.len(), 3);
        assert!((buffers[2].presentation_time - 2.2).abs() < 1e-9);
        assert_eq!(buffers[1].frames(), 100);
    }
}
