//! Movie encoder using FFmpeg: one H.264 video stream plus an optional AAC audio stream.

use rsmpeg::{
    avcodec::{AVCodec, AVCodecContext},
    avformat::AVFormatContextOutput,
    avutil::{AVChannelLayout, AVFrame, AVRational},
    error::RsmpegError,
    ffi,
};
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::path::Path;

use crate::audio::AudioFormat;

/// Video time base: pts are milliseconds since the session start.
pub const VIDEO_TIME_BASE: AVRational = AVRational { num: 1, den: 1000 };

/// Frame count used when the audio encoder accepts any frame size.
const DEFAULT_AUDIO_FRAME_SIZE: usize = 1024;

/// H.264 encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    /// Video bitrate in bits per second.
    pub bitrate: u64,
    /// CRF quality (0-51, lower is better). None uses bitrate only.
    pub crf: Option<u32>,
    /// libx264 preset name.
    pub preset: String,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            bitrate: 8_000_000,
            crf: Some(20),
            preset: "veryfast".to_string(),
        }
    }
}

/// AAC encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub bitrate: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self { bitrate: 128_000 }
    }
}

/// Errors that can occur during video encoding.
#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] RsmpegError),
    #[error("Codec not found: {0}")]
    CodecNotFound(String),
    #[error("Failed to open output file: {0}")]
    FileOpen(String),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

struct VideoTrack {
    codec_ctx: AVCodecContext,
    stream_index: i32,
    stream_time_base: AVRational,
    width: u32,
    height: u32,
    last_pts: Option<i64>,
    frames: u64,
}

struct AudioTrack {
    codec_ctx: AVCodecContext,
    stream_index: i32,
    stream_time_base: AVRational,
    channels: usize,
    frame_size: usize,
    pending: Vec<Vec<f32>>,
    /// Sample offset of `pending[0][0]`.
    next_pts: Option<i64>,
}

impl AudioTrack {
    /// Sample offset the next queued sample will be given.
    fn cursor(&self) -> Option<i64> {
        self.next_pts.map(|pts| pts + self.pending[0].len() as i64)
    }
}

/// How an incoming audio buffer lines up with the samples already queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioAlignment {
    /// Contiguous with the queue.
    InPlace,
    /// Starts this many samples after the queue ends; the gap is filled with silence.
    Pad(usize),
    /// Overlaps the queue by this many samples; they are dropped from the buffer.
    Trim(usize),
}

fn align_audio(expected: i64, pts: i64) -> AudioAlignment {
    match pts - expected {
        0 => AudioAlignment::InPlace,
        gap if gap > 0 => AudioAlignment::Pad(gap as usize),
        overlap => AudioAlignment::Trim(overlap.unsigned_abs() as usize),
    }
}

/// Writes encoded frames into a container chosen by the file extension.
///
/// Tracks are added first, then [`write_header`](Self::write_header), then
/// frames in any interleaving, then [`finish`](Self::finish).
pub struct MovieEncoder {
    format_ctx: AVFormatContextOutput,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    header_written: bool,
}

impl MovieEncoder {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, VideoError> {
        let path_str = path.as_ref().to_string_lossy();
        let path_cstring = CString::new(path_str.as_bytes())
            .map_err(|_| VideoError::FileOpen(path_str.to_string()))?;
        let format_ctx = AVFormatContextOutput::create(&path_cstring)?;
        Ok(Self {
            format_ctx,
            video: None,
            audio: None,
            header_written: false,
        })
    }

    fn wants_global_header(&self) -> bool {
        self.format_ctx.oformat().flags & ffi::AVFMT_GLOBALHEADER as i32 != 0
    }

    /// Add the H.264 stream. Odd dimensions are cropped to even.
    pub fn add_video(
        &mut self,
        width: u32,
        height: u32,
        fps: u32,
        settings: &VideoSettings,
    ) -> Result<(), VideoError> {
        if self.header_written || self.video.is_some() {
            return Err(VideoError::InvalidConfig("video stream already configured".into()));
        }
        let (width, height) = (width & !1, height & !1);
        if width == 0 || height == 0 {
            return Err(VideoError::InvalidConfig(format!(
                "frame too small to encode: {}x{}",
                width, height
            )));
        }

        let codec = AVCodec::find_encoder_by_name(c"libx264")
            .ok_or_else(|| VideoError::CodecNotFound("libx264".to_string()))?;
        let mut codec_ctx = AVCodecContext::new(&codec);
        codec_ctx.set_width(width as i32);
        codec_ctx.set_height(height as i32);
        codec_ctx.set_pix_fmt(ffi::AV_PIX_FMT_YUV420P);
        codec_ctx.set_time_base(VIDEO_TIME_BASE);
        codec_ctx.set_framerate(AVRational {
            num: fps.max(1) as i32,
            den: 1,
        });
        codec_ctx.set_bit_rate(settings.bitrate as i64);
        if self.wants_global_header() {
            codec_ctx.set_flags(codec_ctx.flags | ffi::AV_CODEC_FLAG_GLOBAL_HEADER as i32);
        }
        if let Some(crf) = settings.crf {
            set_option(&mut codec_ctx, "crf", &crf.to_string())?;
        }
        set_option(&mut codec_ctx, "preset", &settings.preset)?;

        codec_ctx.open(None)?;

        let stream_index = {
            let mut stream = self.format_ctx.new_stream();
            stream.set_codecpar(codec_ctx.extract_codecpar());
            stream.set_time_base(codec_ctx.time_base);
            stream.index
        };

        self.video = Some(VideoTrack {
            codec_ctx,
            stream_index,
            stream_time_base: VIDEO_TIME_BASE,
            width,
            height,
            last_pts: None,
            frames: 0,
        });
        Ok(())
    }

    /// Add the AAC stream at the capture sample rate and channel count.
    pub fn add_audio(&mut self, format: AudioFormat, settings: &AudioSettings) -> Result<(), VideoError> {
        if self.header_written || self.audio.is_some() {
            return Err(VideoError::InvalidConfig("audio stream already configured".into()));
        }
        if format.channels == 0 || format.sample_rate == 0 {
            return Err(VideoError::InvalidConfig(format!("unusable audio format {:?}", format)));
        }

        let codec = AVCodec::find_encoder(ffi::AV_CODEC_ID_AAC)
            .ok_or_else(|| VideoError::CodecNotFound("aac".to_string()))?;
        let mut codec_ctx = AVCodecContext::new(&codec);
        codec_ctx.set_ch_layout(AVChannelLayout::from_nb_channels(format.channels as i32).into_inner());
        codec_ctx.set_sample_rate(format.sample_rate as i32);
        codec_ctx.set_sample_fmt(ffi::AV_SAMPLE_FMT_FLTP);
        codec_ctx.set_bit_rate(settings.bitrate as i64);
        let time_base = AVRational {
            num: 1,
            den: format.sample_rate as i32,
        };
        codec_ctx.set_time_base(time_base);
        if self.wants_global_header() {
            codec_ctx.set_flags(codec_ctx.flags | ffi::AV_CODEC_FLAG_GLOBAL_HEADER as i32);
        }

        codec_ctx.open(None)?;

        let frame_size = match codec_ctx.frame_size {
            n if n > 0 => n as usize,
            _ => DEFAULT_AUDIO_FRAME_SIZE,
        };

        let stream_index = {
            let mut stream = self.format_ctx.new_stream();
            stream.set_codecpar(codec_ctx.extract_codecpar());
            stream.set_time_base(time_base);
            stream.index
        };

        self.audio = Some(AudioTrack {
            codec_ctx,
            stream_index,
            stream_time_base: time_base,
            channels: format.channels as usize,
            frame_size,
            pending: vec![Vec::new(); format.channels as usize],
            next_pts: None,
        });
        Ok(())
    }

    /// Write the container header. Streams are fixed afterwards.
    pub fn write_header(&mut self) -> Result<(), VideoError> {
        if self.video.is_none() {
            return Err(VideoError::InvalidConfig("no video stream".into()));
        }
        self.format_ctx.write_header(&mut None)?;

        // The muxer may pick its own stream time bases.
        if let Some(track) = self.video.as_mut() {
            track.stream_time_base = stream_time_base(&self.format_ctx, track.stream_index)?;
        }
        if let Some(track) = self.audio.as_mut() {
            track.stream_time_base = stream_time_base(&self.format_ctx, track.stream_index)?;
        }
        self.header_written = true;
        Ok(())
    }

    /// Size frames are encoded at, after even cropping.
    pub fn video_size(&self) -> Option<(u32, u32)> {
        self.video.as_ref().map(|t| (t.width, t.height))
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Number of video frames handed to the encoder so far.
    /// Sample offset the next queued audio sample will be given.
    pub fn audio_cursor(&self) -> Option<i64> {
        self.audio.as_ref().and_then(AudioTrack::cursor)
    }

    pub fn video_frames(&self) -> u64 {
        self.video.as_ref().map_or(0, |t| t.frames)
    }

    /// Encode one RGBA frame at `pts_ms`.
    ///
    /// `rgba` is `src_width` pixels wide and at least the encoded size. Returns
    /// `false` when the frame is skipped because its pts is not after the previous one.
    pub fn write_video(&mut self, rgba: &[u8], src_width: u32, pts_ms: i64) -> Result<bool, VideoError> {
        if !self.header_written {
            return Err(VideoError::InvalidConfig("header not written".into()));
        }
        let track = self
            .video
            .as_mut()
            .ok_or_else(|| VideoError::InvalidConfig("no video stream".into()))?;

        if track.last_pts.is_some_and(|last| pts_ms <= last) {
            return Ok(false);
        }
        let needed = (src_width as usize) * (track.height as usize) * 4;
        if src_width < track.width || rgba.len() < needed {
            return Err(VideoError::InvalidConfig(format!(
                "frame of {} bytes, stride {} does not cover {}x{}",
                rgba.len(),
                src_width,
                track.width,
                track.height
            )));
        }

        let mut frame = AVFrame::new();
        frame.set_format(ffi::AV_PIX_FMT_YUV420P);
        frame.set_width(track.width as i32);
        frame.set_height(track.height as i32);
        frame.alloc_buffer()?;
        rgba_to_yuv420p(&mut frame, rgba, src_width as usize, track.width as usize, track.height as usize);
        frame.set_pts(pts_ms);

        track.codec_ctx.send_frame(Some(&frame))?;
        drain(
            &mut self.format_ctx,
            &mut track.codec_ctx,
            track.stream_index,
            track.stream_time_base,
        )?;
        track.last_pts = Some(pts_ms);
        track.frames += 1;
        Ok(true)
    }

    /// Queue interleaved samples starting at sample offset `pts`.
    ///
    /// Buffers are placed at their own `pts`: a gap after the queued samples
    /// is filled with silence and samples overlapping the queue are dropped.
    /// Full encoder frames are sent as soon as they are available.
    pub fn write_audio(&mut self, interleaved: &[i16], pts: i64) -> Result<(), VideoError> {
        if !self.header_written {
            return Err(VideoError::InvalidConfig("header not written".into()));
        }
        let track = self
            .audio
            .as_mut()
            .ok_or_else(|| VideoError::InvalidConfig("no audio stream".into()))?;

        let expected = match track.cursor() {
            Some(cursor) => cursor,
            None => {
                track.next_pts = Some(pts.max(0));
                pts.max(0)
            }
        };
        let skip = match align_audio(expected, pts) {
            AudioAlignment::InPlace => 0,
            AudioAlignment::Pad(gap) => {
                log::debug!("Audio gap of {} samples filled with silence", gap);
                for pending in track.pending.iter_mut() {
                    pending.resize(pending.len() + gap, 0.0);
                }
                0
            }
            AudioAlignment::Trim(overlap) => {
                log::debug!("Audio overlap of {} samples dropped", overlap);
                overlap
            }
        };

        for frame in interleaved.chunks_exact(track.channels).skip(skip) {
            for (channel, &sample) in frame.iter().enumerate() {
                track.pending[channel].push(sample as f32 / i16::MAX as f32);
            }
        }

        while track.pending[0].len() >= track.frame_size {
            let chunk: Vec<Vec<f32>> = track
                .pending
                .iter_mut()
                .map(|p| p.drain(..track.frame_size).collect())
                .collect();
            send_audio_frame(&mut self.format_ctx, track, &chunk)?;
        }
        Ok(())
    }

    /// Flush both encoders and write the trailer.
    pub fn finish(mut self) -> Result<u64, VideoError> {
        if !self.header_written {
            return Ok(0);
        }

        if let Some(track) = self.audio.as_mut() {
            if !track.pending[0].is_empty() {
                // The last frame is zero-padded to the encoder frame size.
                let chunk: Vec<Vec<f32>> = track
                    .pending
                    .iter_mut()
                    .map(|p| {
                        let mut samples = std::mem::take(p);
                        samples.resize(track.frame_size, 0.0);
                        samples
                    })
                    .collect();
                send_audio_frame(&mut self.format_ctx, track, &chunk)?;
            }
            track.codec_ctx.send_frame(None)?;
            drain(
                &mut self.format_ctx,
                &mut track.codec_ctx,
                track.stream_index,
                track.stream_time_base,
            )?;
        }

        let frames = self.video_frames();
        if let Some(track) = self.video.as_mut() {
            track.codec_ctx.send_frame(None)?;
            drain(
                &mut self.format_ctx,
                &mut track.codec_ctx,
                track.stream_index,
                track.stream_time_base,
            )?;
        }

        self.format_ctx.write_trailer()?;
        Ok(frames)
    }
}

fn set_option(codec_ctx: &mut AVCodecContext, key: &str, value: &str) -> Result<(), VideoError> {
    let key_c = CString::new(key).map_err(|_| VideoError::InvalidConfig(key.to_string()))?;
    let value_c = CString::new(value).map_err(|_| VideoError::InvalidConfig(value.to_string()))?;
    let ret = unsafe {
        ffi::av_opt_set(
            codec_ctx.as_mut_ptr() as *mut _,
            key_c.as_ptr(),
            value_c.as_ptr(),
            ffi::AV_OPT_SEARCH_CHILDREN as i32,
        )
    };
    if ret < 0 {
        log::warn!("Encoder ignored option {}={}", key, value);
    }
    Ok(())
}

fn stream_time_base(format_ctx: &AVFormatContextOutput, index: i32) -> Result<AVRational, VideoError> {
    format_ctx
        .streams()
        .get(index as usize)
        .map(|s| s.time_base)
        .ok_or_else(|| VideoError::Encoding(format!("stream {} missing after header", index)))
}

fn send_audio_frame(
    format_ctx: &mut AVFormatContextOutput,
    track: &mut AudioTrack,
    planes: &[Vec<f32>],
) -> Result<(), VideoError> {
    let nb_samples = planes[0].len();
    let mut frame = AVFrame::new();
    frame.set_format(ffi::AV_SAMPLE_FMT_FLTP);
    frame.set_nb_samples(nb_samples as i32);
    frame.set_ch_layout(track.codec_ctx.ch_layout().clone().into_inner());
    frame.set_sample_rate(track.codec_ctx.sample_rate);
    frame.alloc_buffer()?;

    for (channel, samples) in planes.iter().enumerate() {
        let plane = frame.data[channel] as *mut f32;
        unsafe {
            std::slice::from_raw_parts_mut(plane, nb_samples).copy_from_slice(samples);
        }
    }

    let pts = track.next_pts.unwrap_or(0);
    frame.set_pts(pts);
    track.next_pts = Some(pts + nb_samples as i64);

    track.codec_ctx.send_frame(Some(&frame))?;
    drain(
        format_ctx,
        &mut track.codec_ctx,
        track.stream_index,
        track.stream_time_base,
    )
}

/// Move every ready packet from the encoder into the muxer.
fn drain(
    format_ctx: &mut AVFormatContextOutput,
    codec_ctx: &mut AVCodecContext,
    stream_index: i32,
    stream_time_base: AVRational,
) -> Result<(), VideoError> {
    loop {
        let mut packet = match codec_ctx.receive_packet() {
            Ok(p) => p,
            Err(RsmpegError::EncoderDrainError) | Err(RsmpegError::EncoderFlushedError) => break,
            Err(e) => return Err(e.into()),
        };
        packet.set_stream_index(stream_index);
        packet.rescale_ts(codec_ctx.time_base, stream_time_base);
        format_ctx.interleaved_write_frame(&mut packet)?;
    }
    Ok(())
}

/// BT.601 full-swing conversion; chroma is the mean of each 2x2 block.
fn rgba_to_yuv420p(frame: &mut AVFrame, rgba: &[u8], src_width: usize, width: usize, height: usize) {
    let y_plane = frame.data[0];
    let u_plane = frame.data[1];
    let v_plane = frame.data[2];
    let y_stride = frame.linesize[0] as usize;
    let u_stride = frame.linesize[1] as usize;
    let v_stride = frame.linesize[2] as usize;

    let pixel = |x: usize, y: usize| {
        let idx = (y * src_width + x) * 4;
        (rgba[idx] as f32, rgba[idx + 1] as f32, rgba[idx + 2] as f32)
    };

    for y in 0..height {
        for x in 0..width {
            let (r, g, b) = pixel(x, y);
            let y_val = (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8;
            unsafe {
                *y_plane.add(y * y_stride + x) = y_val;
            }
        }
    }

    for cy in 0..height / 2 {
        for cx in 0..width / 2 {
            let (mut r, mut g, mut b) = (0.0, 0.0, 0.0);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (pr, pg, pb) = pixel(cx * 2 + dx, cy * 2 + dy);
                r += pr;
                g += pg;
                b += pb;
            }
            let (r, g, b) = (r / 4.0, g / 4.0, b / 4.0);
            let u_val = (128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b).round().clamp(0.0, 255.0) as u8;
            let v_val = (128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b).round().clamp(0.0, 255.0) as u8;
            unsafe {
                *u_plane.add(cy * u_stride + cx) = u_val;
                *v_plane.add(cy * v_stride + cx) = v_val;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_default() {
        let video = VideoSettings::default();
        assert_eq!(video.crf, Some(20));
        assert_eq!(video.preset, "veryfast");
        assert_eq!(AudioSettings::default().bitrate, 128_000);
    }

    #[test]
    fn test_align_audio() {
        assert_eq!(align_audio(1024, 1024), AudioAlignment::InPlace);
        assert_eq!(align_audio(1024, 2048), AudioAlignment::Pad(1024));
        assert_eq!(align_audio(2048, 2000), AudioAlignment::Trim(48));
    }

    #[test]
    fn test_frames_require_header() {
        let temp_dir = TempDir::new().unwrap();
        let mut encoder = match MovieEncoder::create(temp_dir.path().join("early.mov")) {
            Ok(e) => e,
            Err(_) => return,
        };
        assert!(matches!(
            encoder.write_video(&[0; 16], 2, 0),
            Err(VideoError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_encode_video_and_audio() {
        let temp_dir = TempDir::new().unwrap();
        let output_path = temp_dir.path().join("test.mov");

        let mut encoder = MovieEncoder::create(&output_path).unwrap();
        if encoder.add_video(321, 181, 30, &VideoSettings::default()).is_err() {
            // libx264 not compiled into this FFmpeg.
            return;
        }
        assert_eq!(encoder.video_size(), Some((320, 180)));
        let format = AudioFormat {
            sample_rate: 44_100,
            channels: 2,
        };
        encoder.add_audio(format, &AudioSettings::default()).unwrap();
        encoder.write_header().unwrap();

        let frame = vec![90u8; 321 * 181 * 4];
        for i in 0..30 {
            assert!(encoder.write_video(&frame, 321, i * 33).unwrap());
        }
        // Repeated timestamps are skipped.
        assert!(!encoder.write_video(&frame, 321, 29 * 33).unwrap());

        let samples = vec![1000i16; 44_100 * 2];
        encoder.write_audio(&samples, 0).unwrap();

        assert_eq!(encoder.finish().unwrap(), 30);
        assert!(std::fs::metadata(&output_path).unwrap().len() > 0);
    }
}
