// libav muxer - H.264/AAC encoders writing a fast-start MP4 into a temporary file

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use ffmpeg::format::sample::Type as SampleLayout;
use ffmpeg::format::{Pixel, Sample};
use ffmpeg::software::scaling;
use ffmpeg::{codec, encoder, format, frame, Dictionary, Packet, Rational};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::convert::{self, SendCell};
use super::demux::LibavPicture;
use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::ports::*;

const HARDWARE_H264_ENCODERS: [&str; 4] = ["h264_nvenc", "h264_qsv", "h264_amf", "h264_videotoolbox"];

fn encode_err(what: &str) -> impl Fn(ffmpeg::Error) -> DomainError + '_ {
    move |e| DomainError::EncodeFailed(format!("{}: {}", what, e))
}

fn mux_err(what: &str) -> impl Fn(ffmpeg::Error) -> DomainError + '_ {
    move |e| DomainError::MuxFailed(format!("{}: {}", what, e))
}

fn video_candidates(acceleration: HardwareAcceleration) -> Vec<codec::Codec> {
    let mut candidates = Vec::new();
    if acceleration == HardwareAcceleration::PreferHardware {
        candidates.extend(HARDWARE_H264_ENCODERS.iter().filter_map(|name| encoder::find_by_name(name)));
    }
    candidates.extend(encoder::find(codec::Id::H264));
    candidates
}

fn audio_encoder(codec: AudioCodec) -> Option<(codec::Codec, Sample)> {
    match codec {
        AudioCodec::Aac => encoder::find(codec::Id::AAC).map(|c| (c, Sample::F32(SampleLayout::Planar))),
        AudioCodec::Mp3 => encoder::find_by_name("libmp3lame")
            .or_else(|| encoder::find(codec::Id::MP3))
            .map(|c| (c, Sample::F32(SampleLayout::Planar))),
        AudioCodec::Opus => encoder::find_by_name("libopus")
            .or_else(|| encoder::find(codec::Id::OPUS))
            .map(|c| (c, Sample::F32(SampleLayout::Packed))),
    }
}

fn video_options(profile: &EncodingProfile) -> Dictionary<'static> {
    let mut options = Dictionary::new();
    match profile.level {
        CodecLevel::Baseline40 => {
            options.set("profile", "baseline");
            options.set("level", "4.0");
        }
        CodecLevel::High51 => {
            options.set("profile", "high");
            options.set("level", "5.1");
        }
    }
    if profile.latency_mode == LatencyMode::Realtime {
        options.set("tune", "zerolatency");
    }
    options
}

fn open_video_encoder(
    codec: codec::Codec,
    profile: &EncodingProfile,
    global_header: bool,
    threads: usize,
) -> Result<encoder::Video, ffmpeg::Error> {
    let mut context = codec::context::Context::new_with_codec(codec);
    context.set_threading(codec::threading::Config::count(threads));
    let mut video = context.encoder().video()?;

    let fps = profile.frame_rate.max(1) as i32;
    video.set_width(profile.width);
    video.set_height(profile.height);
    video.set_format(Pixel::YUV420P);
    video.set_time_base(Rational(1, fps));
    video.set_frame_rate(Some(Rational(fps, 1)));
    video.set_bit_rate(profile.bitrate as usize);
    if profile.bitrate_mode == BitrateMode::Constant {
        video.set_max_bit_rate(profile.bitrate as usize);
    }
    video.set_gop((profile.keyframe_interval_secs * fps as f64).round().max(1.0) as u32);
    if global_header {
        video.set_flags(codec::Flags::GLOBAL_HEADER);
    }

    video.open_as_with(codec, video_options(profile))
}

fn open_audio_encoder(
    codec: codec::Codec,
    format: Sample,
    settings: &AudioEncoderSettings,
    global_header: bool,
) -> Result<encoder::Audio, ffmpeg::Error> {
    let mut audio = codec::context::Context::new_with_codec(codec).encoder().audio()?;
    audio.set_rate(settings.sample_rate as i32);
    audio.set_ch_layout(convert::channel_layout(settings.channels));
    audio.set_format(format);
    audio.set_bit_rate(settings.bitrate as usize);
    audio.set_time_base(Rational(1, settings.sample_rate as i32));
    if global_header {
        audio.set_flags(codec::Flags::GLOBAL_HEADER);
    }

    audio.open_as(codec)
}

/// Muxer backed by libavformat and libavcodec encoders
pub struct LibavMuxer {
    threads: usize,
}

impl LibavMuxer {
    pub fn new() -> Result<Self, DomainError> {
        ffmpeg::init().map_err(|e| DomainError::InternalError(format!("FFmpeg initialization failed: {}", e)))?;

        Ok(Self {
            threads: num_cpus::get().clamp(1, 16),
        })
    }
}

#[async_trait]
impl MuxPort for LibavMuxer {
    async fn create_output(&self) -> Result<Box<dyn OutputContainer>, DomainError> {
        let file = tempfile::Builder::new()
            .prefix("trimx-")
            .suffix(".mp4")
            .tempfile()
            .map_err(|e| DomainError::MuxFailed(format!("Cannot create temporary output file: {}", e)))?;
        let output = format::output_as(&file.path(), "mp4").map_err(mux_err("Cannot create MP4 muxer"))?;
        let global_header = output.format().flags().contains(format::Flags::GLOBAL_HEADER);

        Ok(Box::new(LibavContainer {
            shared: Arc::new(Mutex::new(SharedOutput {
                output: SendCell(output),
                started: false,
            })),
            file: Some(file),
            global_header,
            threads: self.threads,
            finished: false,
        }))
    }

    async fn first_encodable_audio_codec(
        &self,
        candidates: &[AudioCodec],
        channels: usize,
        sample_rate: u32,
        bitrate: u64,
    ) -> Result<Option<AudioCodec>, DomainError> {
        for candidate in candidates {
            let Some((codec, format)) = audio_encoder(*candidate) else {
                debug!(codec = %candidate, "No encoder registered");
                continue;
            };
            let settings = AudioEncoderSettings {
                codec: *candidate,
                bitrate,
                channels,
                sample_rate,
            };
            match open_audio_encoder(codec, format, &settings, false) {
                Ok(_) => return Ok(Some(*candidate)),
                Err(e) => debug!(codec = %candidate, error = %e, "Audio encoder rejected configuration"),
            }
        }
        Ok(None)
    }

    async fn supports_video_profile(&self, profile: &EncodingProfile) -> Result<bool, DomainError> {
        Ok(video_candidates(profile.hardware_acceleration)
            .into_iter()
            .any(|codec| open_video_encoder(codec, profile, false, 1).is_ok()))
    }
}

struct SharedOutput {
    output: SendCell<format::context::Output>,
    started: bool,
}

type Shared = Arc<Mutex<SharedOutput>>;

fn lock(shared: &Shared) -> Result<MutexGuard<'_, SharedOutput>, DomainError> {
    shared
        .lock()
        .map_err(|_| DomainError::InternalError("Output container lock poisoned".to_string()))
}

/// Drain every pending packet of `encoder` into the output
fn drain(
    encoder: &mut encoder::Encoder,
    shared: &Shared,
    stream_index: usize,
    encoder_time_base: Rational,
) -> Result<(), DomainError> {
    let mut guard = lock(shared)?;
    let stream_time_base = guard
        .output
        .0
        .stream(stream_index)
        .map(|s| s.time_base())
        .ok_or_else(|| DomainError::MuxFailed(format!("Output stream {} missing", stream_index)))?;

    loop {
        let mut packet = Packet::empty();
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                packet.set_stream(stream_index);
                packet.rescale_ts(encoder_time_base, stream_time_base);
                packet
                    .write_interleaved(&mut guard.output.0)
                    .map_err(mux_err("Writing packet failed"))?;
            }
            Err(e) if convert::is_drained(&e) => return Ok(()),
            Err(e) => return Err(DomainError::EncodeFailed(format!("Receiving encoded packet failed: {}", e))),
        }
    }
}

struct LibavContainer {
    shared: Shared,
    file: Option<NamedTempFile>,
    global_header: bool,
    threads: usize,
    finished: bool,
}

impl LibavContainer {
    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.finished {
            return Err(DomainError::MuxFailed("Output container already finished".to_string()));
        }
        if lock(&self.shared)?.started {
            return Err(DomainError::MuxFailed("Cannot add tracks after the container started".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OutputContainer for LibavContainer {
    fn add_video_track(
        &mut self,
        profile: &EncodingProfile,
        options: VideoTrackOptions,
    ) -> Result<Box<dyn VideoTrackWriter>, DomainError> {
        self.ensure_open()?;

        let mut last_error = None;
        let mut opened = None;
        for codec in video_candidates(profile.hardware_acceleration) {
            match open_video_encoder(codec, profile, self.global_header, self.threads) {
                Ok(encoder) => {
                    opened = Some((codec, encoder));
                    break;
                }
                Err(e) => {
                    debug!(encoder = codec.name(), error = %e, "Video encoder unavailable");
                    last_error = Some(e);
                }
            }
        }
        let (codec, encoder) = opened.ok_or_else(|| {
            DomainError::UnsupportedCodec(match last_error {
                Some(e) => format!("No H.264 encoder accepted {}: {}", profile.codec_string(), e),
                None => "No H.264 encoder available".to_string(),
            })
        })?;
        info!(encoder = codec.name(), codec = profile.codec_string(), "Video encoder opened");

        let index = {
            let mut guard = lock(&self.shared)?;
            let mut stream = guard.output.0.add_stream(codec).map_err(mux_err("Cannot add video stream"))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(Rational(1, profile.frame_rate.max(1) as i32));
            if options.rotation != Rotation::None {
                convert::set_display_rotation(&mut stream.parameters(), f64::from(options.rotation.degrees()))?;
            }
            stream.index()
        };

        Ok(Box::new(LibavVideoWriter {
            shared: Arc::clone(&self.shared),
            encoder: SendCell(encoder),
            scaler: None,
            stream_index: index,
            time_base: Rational(1, profile.frame_rate.max(1) as i32),
            frame_rate: profile.frame_rate.max(1) as f64,
            width: profile.width,
            height: profile.height,
            closed: false,
        }))
    }

    fn add_audio_track(&mut self, settings: AudioEncoderSettings) -> Result<Box<dyn AudioTrackWriter>, DomainError> {
        self.ensure_open()?;

        let (codec, format) = audio_encoder(settings.codec)
            .ok_or_else(|| DomainError::UnsupportedCodec(format!("No {} encoder available", settings.codec)))?;
        let encoder = open_audio_encoder(codec, format, &settings, self.global_header)
            .map_err(encode_err("Cannot open audio encoder"))?;
        let frame_size = match encoder.frame_size() {
            0 => 1024,
            n => n as usize,
        };

        let index = {
            let mut guard = lock(&self.shared)?;
            let mut stream = guard.output.0.add_stream(codec).map_err(mux_err("Cannot add audio stream"))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(Rational(1, settings.sample_rate as i32));
            stream.index()
        };

        Ok(Box::new(LibavAudioWriter {
            shared: Arc::clone(&self.shared),
            encoder: SendCell(encoder),
            stream_index: index,
            time_base: Rational(1, settings.sample_rate as i32),
            format,
            frame_size,
            next_pts: 0,
            closed: false,
        }))
    }

    async fn start(&mut self) -> Result<(), DomainError> {
        let mut guard = lock(&self.shared)?;
        if guard.started || self.finished {
            return Err(DomainError::MuxFailed("Output container already started".to_string()));
        }
        let mut options = Dictionary::new();
        options.set("movflags", "faststart");
        guard
            .output
            .0
            .write_header_with(options)
            .map_err(mux_err("Writing container header failed"))?;
        guard.started = true;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<Vec<u8>, DomainError> {
        {
            let mut guard = lock(&self.shared)?;
            if !guard.started || self.finished {
                return Err(DomainError::MuxFailed("Output container is not writable".to_string()));
            }
            guard.output.0.write_trailer().map_err(mux_err("Writing container trailer failed"))?;
        }
        self.finished = true;

        let file = self
            .file
            .take()
            .ok_or_else(|| DomainError::MuxFailed("Temporary output file missing".to_string()))?;
        std::fs::read(file.path())
            .map_err(|e| DomainError::MuxFailed(format!("Cannot read finished output: {}", e)))
    }

    fn cancel(&mut self) -> Result<(), DomainError> {
        self.finished = true;
        if let Some(file) = self.file.take() {
            file.close()
                .map_err(|e| DomainError::MuxFailed(format!("Cannot remove temporary output: {}", e)))?;
        }
        Ok(())
    }
}

struct LibavVideoWriter {
    shared: Shared,
    encoder: SendCell<encoder::Video>,
    scaler: Option<SendCell<scaling::Context>>,
    stream_index: usize,
    time_base: Rational,
    frame_rate: f64,
    width: u32,
    height: u32,
    closed: bool,
}

impl LibavVideoWriter {
    fn scale(&mut self, source: &frame::Video) -> Result<frame::Video, DomainError> {
        if self.scaler.is_none() {
            let context = scaling::Context::get(
                source.format(),
                source.width(),
                source.height(),
                Pixel::YUV420P,
                self.width,
                self.height,
                scaling::Flags::BILINEAR,
            )
            .map_err(encode_err("Cannot create frame scaler"))?;
            self.scaler = Some(SendCell(context));
        }

        let mut scaled = frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.0.run(source, &mut scaled).map_err(encode_err("Frame scaling failed"))?;
        }
        Ok(scaled)
    }
}

#[async_trait]
impl VideoTrackWriter for LibavVideoWriter {
    async fn add_frame(&mut self, frame: &VideoFrame) -> Result<(), DomainError> {
        if self.closed {
            return Err(DomainError::EncodeFailed("Video track already closed".to_string()));
        }
        let picture = frame
            .resource::<LibavPicture>()
            .ok_or_else(|| DomainError::EncodeFailed("Frame has no decoded picture".to_string()))?;

        let mut scaled = self.scale(picture.frame())?;
        scaled.set_pts(Some((frame.timestamp() * self.frame_rate).round() as i64));
        self.encoder.0.send_frame(&scaled).map_err(encode_err("Video encode failed"))?;
        drain(&mut self.encoder.0, &self.shared, self.stream_index, self.time_base)
    }

    async fn close(&mut self) -> Result<(), DomainError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.encoder.0.send_eof().map_err(encode_err("Video encoder flush failed"))?;
        drain(&mut self.encoder.0, &self.shared, self.stream_index, self.time_base)
    }

    fn abort(&mut self) -> Result<(), DomainError> {
        self.closed = true;
        Ok(())
    }
}

struct LibavAudioWriter {
    shared: Shared,
    encoder: SendCell<encoder::Audio>,
    stream_index: usize,
    time_base: Rational,
    format: Sample,
    frame_size: usize,
    next_pts: i64,
    closed: bool,
}

#[async_trait]
impl AudioTrackWriter for LibavAudioWriter {
    async fn add_audio(&mut self, buffer: &AudioSampleBuffer) -> Result<(), DomainError> {
        if self.closed {
            return Err(DomainError::EncodeFailed("Audio track already closed".to_string()));
        }

        let total = buffer.sample_count();
        let mut offset = 0;
        while offset < total {
            let len = self.frame_size.min(total - offset);
            let mut chunk = convert::to_encoder_frame(buffer, offset, len, self.format)?;
            chunk.set_pts(Some(self.next_pts));
            self.encoder.0.send_frame(&chunk).map_err(encode_err("Audio encode failed"))?;
            drain(&mut self.encoder.0, &self.shared, self.stream_index, self.time_base)?;

            offset += len;
            self.next_pts += len as i64;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DomainError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.encoder.0.send_eof().map_err(encode_err("Audio encoder flush failed"))?;
        drain(&mut self.encoder.0, &self.shared, self.stream_index, self.time_base)
    }

    fn abort(&mut self) -> Result<(), DomainError> {
        if !self.closed {
            warn!("Audio encoder dropped without flushing");
        }
        self.closed = true;
        Ok(())
    }
}
