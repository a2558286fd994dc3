//! File-backed audio source.
//!
//! [`PcmFileSource`] decodes WAV, MP3, FLAC or AAC with Symphonia one packet at
//! a time and hands out interleaved 16-bit [`AudioSampleBuffer`]s of a fixed
//! size with running timestamps, the same shape a microphone capture delivers.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use thiserror::Error;

use super::buffer::{AudioFormat, AudioSampleBuffer};

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to open audio file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode audio: {0}")]
    Decode(#[from] SymphoniaError),

    #[error("No audio track found in file")]
    NoAudioTrack,

    #[error("Audio track has no sample rate")]
    UnknownSampleRate,
}

/// Streams a decoded audio file as capture-sized buffers.
///
/// Buffers hold `frames_per_buffer` frames except the last, which holds what
/// is left. Timestamps count decoded frames from `start_time`.
pub struct PcmFileSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: AudioFormat,
    frames_per_buffer: usize,
    start_time: f64,
    emitted_frames: u64,
    /// Decoded interleaved samples not yet handed out.
    carry: Vec<i16>,
    /// Conversion buffer and its capacity in frames.
    scratch: Option<(SampleBuffer<i16>, u64)>,
    exhausted: bool,
}

impl PcmFileSource {
    pub fn open(path: &Path, frames_per_buffer: usize, start_time: f64) -> Result<Self, AudioError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(AudioError::NoAudioTrack)?;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or(AudioError::UnknownSampleRate)?;
        let channels = track.codec_params.channels.map_or(2, |c| c.count()) as u16;
        let decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
        let track_id = track.id;

        log::debug!(
            "Opened {} at {} Hz, {} channel(s)",
            path.display(),
            sample_rate,
            channels
        );
        Ok(Self {
            reader,
            decoder,
            track_id,
            format: AudioFormat {
                sample_rate,
                channels,
            },
            frames_per_buffer: frames_per_buffer.max(1),
            start_time,
            emitted_frames: 0,
            carry: Vec::new(),
            scratch: None,
            exhausted: false,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Media time of the next buffer.
    pub fn position(&self) -> f64 {
        self.start_time + self.emitted_frames as f64 / self.format.sample_rate.max(1) as f64
    }

    /// Decode one packet of our track into `carry`. Returns `false` at end of stream.
    fn decode_packet(&mut self) -> Result<bool, AudioError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let needed = decoded.capacity() as u64;
            if self.scratch.as_ref().map_or(true, |(_, capacity)| *capacity < needed) {
                self.scratch = Some((SampleBuffer::new(needed, *decoded.spec()), needed));
            }
            if let Some((buf, _)) = &mut self.scratch {
                buf.copy_interleaved_ref(decoded);
                self.carry.extend_from_slice(buf.samples());
            }
            return Ok(true);
        }
    }
}

impl Iterator for PcmFileSource {
    type Item = Result<AudioSampleBuffer, AudioError>;

    fn next(&mut self) -> Option<Self::Item> {
        let channels = self.format.channels.max(1) as usize;
        let wanted = self.frames_per_buffer * channels;
        while !self.exhausted && self.carry.len() < wanted {
            match self.decode_packet() {
                Ok(true) => {}
                Ok(false) => self.exhausted = true,
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        let take = wanted.min(self.carry.len() / channels * channels);
        if take == 0 {
            return None;
        }
        let presentation_time = PcmFileSource::position(self);
        let samples: Vec<i16> = self.carry.drain(..take).collect();
        self.emitted_frames += (take / channels) as u64;
        Some(Ok(AudioSampleBuffer::new(self.format, samples, presentation_time)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_wav(path: &Path, samples: &[i16], sample_rate: u32, channels: u16) -> std::io::Result<()> {
        let mut file = std::io::BufWriter::new(File::create(path)?);
        let data_size = samples.len() as u32 * 2;
        let block_align = channels * 2;

        file.write_all(b"RIFF")?;
        file.write_all(&(36 + data_size).to_le_bytes())?;
        file.write_all(b"WAVE")?;
        file.write_all(b"fmt ")?;
        file.write_all(&16u32.to_le_bytes())?;
        file.write_all(&1u16.to_le_bytes())?; // PCM
        file.write_all(&channels.to_le_bytes())?;
        file.write_all(&sample_rate.to_le_bytes())?;
        file.write_all(&(sample_rate * block_align as u32).to_le_bytes())?;
        file.write_all(&block_align.to_le_bytes())?;
        file.write_all(&16u16.to_le_bytes())?;
        file.write_all(b"data")?;
        file.write_all(&data_size.to_le_bytes())?;
        for sample in samples {
            file.write_all(&sample.to_le_bytes())?;
        }
        Ok(())
    }

    #[test]
    fn test_wav_streams_same_samples() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        let samples = crate::audio::synth::sine_samples(440.0, 8000, 1, 800, 0.5);
        write_wav(&path, &samples, 8000, 1).unwrap();

        let source = PcmFileSource::open(&path, 256, 0.0).unwrap();
        assert_eq!(
            source.format(),
            AudioFormat {
                sample_rate: 8000,
                channels: 1
            }
        );
        let decoded: Vec<i16> = source.flat_map(|b| b.unwrap().samples).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_buffers_have_fixed_size_and_running_time() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, &vec![0; 250 * 2], 100, 2).unwrap();

        let mut source = PcmFileSource::open(&path, 100, 1.0).unwrap();
        let buffers: Vec<_> = source.by_ref().map(Result::unwrap).collect();
        assert_eq!(buffers.len(), 3);
        assert_eq!(buffers[0].frames(), 100);
        assert_eq!(buffers[2].frames(), 50);
        assert!((buffers[1].presentation_time - 2.0).abs() < 1e-9);
        assert!((buffers[2].presentation_time - 3.0).abs() < 1e-9);
        assert!((source.position() - 3.5).abs() < 1e-9);
        assert!(source.next().is_none());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = PcmFileSource::open(Path::new("/nonexistent/audio.wav"), 1024, 0.0);
        assert!(matches!(result, Err(AudioError::Io(_))));
    }
}
