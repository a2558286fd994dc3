//! Example: drive the live pipeline with synthetic camera frames and audio.
//!
//! Renders a moving gradient through the spectrum filter while a sine tone
//! (or the given audio file) plays, records three seconds to a `.mov`, then
//! waits for the file.
//!
//! Run with:
//!     cargo run --example live_synthetic --features tokio [output_dir] [audio_file]

use std::sync::atomic::{AtomicU64, Ordering};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use camera_filters::audio::synth::sine_buffers;
use camera_filters::audio::{AudioFormat, AudioSampleBuffer, PcmFileSource};
use camera_filters::gpu::{GpuContext, Image, RawFrame};
use camera_filters::pipeline::{FrameSink, LivePipeline, PipelineConfig};
use camera_filters::recorder::RecorderEvent;

struct CountingSink {
    frames: AtomicU64,
}

impl FrameSink for CountingSink {
    fn present(&self, _image: &Arc<Image>) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

fn gradient(width: u32, height: u32, shift: u32) -> RawFrame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = ((x + shift) * 255 / width) as u8;
            let g = (y * 255 / height) as u8;
            data.extend_from_slice(&[255 - r, g, r, 255]);
        }
    }
    RawFrame::bgra(width, height, data)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = PipelineConfig::default();
    config.initial_filter = "spectrum".to_string();
    if let Some(dir) = std::env::args().nth(1) {
        config.recorder.output_dir = dir.into();
    }
    let fps = config.frame_rate.fps();

    let ctx = Arc::new(GpuContext::new().await.context("no GPU available")?);
    let sink = Arc::new(CountingSink {
        frames: AtomicU64::new(0),
    });
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let pipeline = LivePipeline::new(ctx, config)?
        .with_sink(sink.clone())
        .with_recorder_delegate(Arc::new(events_tx));

    let frames_per_buffer = 1024;
    let seconds = 3.0;
    let audio: Box<dyn Iterator<Item = anyhow::Result<AudioSampleBuffer>>> =
        match std::env::args().nth(2) {
            Some(file) => {
                let source = PcmFileSource::open(Path::new(&file), frames_per_buffer, 0.0)
                    .with_context(|| format!("cannot read {}", file))?;
                println!("Audio from {} ({:?})", file, source.format());
                Box::new(source.map(|buffer| buffer.map_err(anyhow::Error::from)))
            }
            None => {
                let format = AudioFormat {
                    sample_rate: 44_100,
                    channels: 1,
                };
                let count =
                    (seconds * format.sample_rate as f64 / frames_per_buffer as f64).ceil() as usize;
                Box::new(
                    sine_buffers(440.0, format, frames_per_buffer, count, 0.0)
                        .into_iter()
                        .map(Ok),
                )
            }
        };
    let mut audio = audio.peekable();

    let path = pipeline.start_recording()?;
    println!("Recording to {}", path.display());

    let total = (seconds * fps as f64) as u32;
    for i in 0..total {
        let pts = i as f64 / fps as f64;
        while let Some(buffer) =
            audio.next_if(|b| b.as_ref().map_or(true, |b| b.presentation_time <= pts))
        {
            pipeline.on_audio_buffer(buffer?);
        }
        pipeline.on_video_frame(&gradient(320, 240, i * 4), pts);
        if i == total / 2 {
            pipeline.update_user_control([0.5, 0.25]);
        }
    }

    pipeline.stop_recording();
    loop {
        match events_rx.recv_timeout(Duration::from_secs(30))? {
            RecorderEvent::BeganWriting => println!("Writer started"),
            RecorderEvent::FinishedWriting(result) => {
                let written = result?;
                println!("Wrote {}", written.display());
                break;
            }
        }
    }

    println!(
        "Presented {} frames, dropped {}",
        sink.frames.load(Ordering::Relaxed),
        pipeline.processor().dropped_frames()
    );
    Ok(())
}
