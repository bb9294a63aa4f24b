// libav demuxer - Opens source bytes and decodes windows of video and audio

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use ffmpeg::codec::threading;
use ffmpeg::{codec, decoder, format, frame, media, Packet, Rational};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use super::convert::{self, SendCell};
use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::ports::*;

/// Frames touching a window bound by less than this are treated as outside it
const BOUNDARY_EPSILON: f64 = 1e-6;

/// Decoded picture handed to the encoder through [`VideoFrame::with_resource`]
pub(crate) struct LibavPicture(pub(crate) SendCell<frame::Video>);

impl LibavPicture {
    pub(crate) fn frame(&self) -> &frame::Video {
        &self.0 .0
    }
}

fn open_input(path: &Path) -> Result<format::context::Input, DomainError> {
    format::input(&path).map_err(|e| DomainError::InvalidFormat(format!("Cannot read source container: {}", e)))
}

fn decoder_context(stream: &format::stream::Stream, threads: usize) -> Result<codec::Context, DomainError> {
    let mut context = codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| DomainError::DecodeFailed(format!("Failed to create decoder context: {}", e)))?;
    context.set_threading(threading::Config::count(threads));
    Ok(context)
}

fn codec_name(stream: &format::stream::Stream) -> String {
    format!("{:?}", stream.parameters().id()).to_lowercase()
}

fn seek_to(input: &mut format::context::Input, window: &TrimWindow) -> Result<(), DomainError> {
    let target = (window.start * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
    if target > 0 {
        input
            .seek(target, ..=target)
            .map_err(|e| DomainError::DecodeFailed(format!("Seek to {}s failed: {}", window.start, e)))?;
    }
    Ok(())
}

/// Demuxer backed by libavformat. Source bytes are spilled to a temporary
/// file so libavformat can seek freely.
pub struct LibavDemuxer {
    threads: usize,
}

impl LibavDemuxer {
    pub fn new() -> Result<Self, DomainError> {
        ffmpeg::init().map_err(|e| DomainError::InternalError(format!("FFmpeg initialization failed: {}", e)))?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);

        Ok(Self {
            threads: num_cpus::get().clamp(1, 16),
        })
    }
}

#[async_trait]
impl DemuxPort for LibavDemuxer {
    async fn open(&self, bytes: SourceBytes) -> Result<Box<dyn MediaSource>, DomainError> {
        let mut file = NamedTempFile::new()
            .map_err(|e| DomainError::InternalError(format!("Cannot create temporary source file: {}", e)))?;
        file.write_all(&bytes)
            .and_then(|_| file.flush())
            .map_err(|e| DomainError::InternalError(format!("Cannot spill source bytes: {}", e)))?;

        let input = open_input(file.path())?;
        debug!(
            format = input.format().name(),
            streams = input.streams().count(),
            "Opened source container"
        );

        Ok(Box::new(LibavSource {
            path: file.path().to_path_buf(),
            file: Some(file),
            input: Some(SendCell(input)),
            threads: self.threads,
        }))
    }
}

struct LibavSource {
    path: PathBuf,
    file: Option<NamedTempFile>,
    input: Option<SendCell<format::context::Input>>,
    threads: usize,
}

impl LibavSource {
    fn input(&self) -> Result<&format::context::Input, DomainError> {
        self.input
            .as_ref()
            .map(|cell| &cell.0)
            .ok_or_else(|| DomainError::ResourceUnavailable("Source already disposed".to_string()))
    }

    fn stream_of(&self, track: TrackId, kind: media::Type) -> Result<(Rational, Rational), DomainError> {
        let input = self.input()?;
        let stream = input
            .stream(track.0)
            .filter(|s| s.parameters().medium() == kind)
            .ok_or_else(|| DomainError::ResourceUnavailable(format!("No {:?} track {}", kind, track.0)))?;
        Ok((stream.time_base(), stream.avg_frame_rate()))
    }

    fn reopen(&self) -> Result<format::context::Input, DomainError> {
        self.input()?;
        open_input(&self.path)
    }
}

/// Rotation from the display matrix, or the legacy `rotate` tag of older muxers
fn stream_rotation(stream: &format::stream::Stream) -> f64 {
    convert::display_rotation(&stream.parameters())
        .or_else(|| {
            stream
                .metadata()
                .get("rotate")
                .and_then(|value| value.trim().parse::<f64>().ok())
        })
        .unwrap_or(0.0)
}

#[async_trait]
impl MediaSource for LibavSource {
    async fn video_tracks(&mut self) -> Result<Vec<VideoTrackInfo>, DomainError> {
        let input = self.input()?;
        let mut tracks = Vec::new();

        for stream in input.streams().filter(|s| s.parameters().medium() == media::Type::Video) {
            let video = decoder_context(&stream, 1)?
                .decoder()
                .video()
                .map_err(|e| DomainError::DecodeFailed(format!("Failed to create video decoder: {}", e)))?;

            let coded = (video.width(), video.height());
            let aspect = video.aspect_ratio();
            let display_width = if aspect.numerator() > 0 && aspect.denominator() > 0 {
                (coded.0 as f64 * f64::from(aspect)).round() as u32
            } else {
                coded.0
            };

            tracks.push(VideoTrackInfo {
                id: TrackId(stream.index()),
                codec: codec_name(&stream),
                display_width: Some(display_width).filter(|w| *w > 0),
                display_height: Some(coded.1).filter(|h| *h > 0),
                coded_width: Some(coded.0).filter(|w| *w > 0),
                coded_height: Some(coded.1).filter(|h| *h > 0),
                rotation: stream_rotation(&stream),
            });
        }
        Ok(tracks)
    }

    async fn audio_tracks(&mut self) -> Result<Vec<AudioTrackInfo>, DomainError> {
        let input = self.input()?;
        let mut tracks = Vec::new();

        for stream in input.streams().filter(|s| s.parameters().medium() == media::Type::Audio) {
            let audio = decoder_context(&stream, 1)?
                .decoder()
                .audio()
                .map_err(|e| DomainError::DecodeFailed(format!("Failed to create audio decoder: {}", e)))?;

            tracks.push(AudioTrackInfo {
                id: TrackId(stream.index()),
                codec: codec_name(&stream),
                sample_rate: audio.rate(),
                channels: audio.ch_layout().channels() as usize,
            });
        }
        Ok(tracks)
    }

    async fn packet_stats(&mut self, track: TrackId) -> Result<PacketStats, DomainError> {
        let (time_base, _) = self.stream_of(track, media::Type::Video)?;
        let mut input = self.reopen()?;

        let mut packet_count = 0u64;
        let mut total_bytes = 0u64;
        let mut first_pts: Option<i64> = None;
        let mut last_end: Option<i64> = None;

        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut input) {
                Ok(()) => {
                    if packet.stream() != track.0 {
                        continue;
                    }
                    packet_count += 1;
                    total_bytes += packet.size() as u64;
                    if let Some(pts) = packet.pts() {
                        first_pts = Some(first_pts.map_or(pts, |first| first.min(pts)));
                        let end = pts + packet.duration().max(0);
                        last_end = Some(last_end.map_or(end, |last| last.max(end)));
                    }
                }
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(DomainError::DecodeFailed(format!("Packet scan failed: {}", e))),
            }
        }

        let span = match (first_pts, last_end) {
            (Some(first), Some(last)) if last > first => convert::seconds(last - first, time_base),
            _ => 0.0,
        };
        if span <= 0.0 {
            return Ok(PacketStats {
                packet_count,
                average_bitrate: 0.0,
                average_packet_rate: 0.0,
            });
        }

        Ok(PacketStats {
            packet_count,
            average_bitrate: total_bytes as f64 * 8.0 / span,
            average_packet_rate: packet_count as f64 / span,
        })
    }

    async fn duration(&mut self) -> Result<f64, DomainError> {
        let input = self.input()?;
        let container = input.duration();
        if container > 0 {
            return Ok(container as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE));
        }

        let longest = input
            .streams()
            .filter(|s| s.duration() > 0)
            .map(|s| convert::seconds(s.duration(), s.time_base()))
            .fold(0.0, f64::max);
        Ok(longest)
    }

    async fn video_frames(
        &mut self,
        track: TrackId,
        window: TrimWindow,
    ) -> Result<Box<dyn VideoFrameStream>, DomainError> {
        let (time_base, frame_rate) = self.stream_of(track, media::Type::Video)?;
        let mut input = self.reopen()?;
        let decoder = {
            let stream = input
                .stream(track.0)
                .ok_or_else(|| DomainError::ResourceUnavailable(format!("No video track {}", track.0)))?;
            decoder_context(&stream, self.threads)?
                .decoder()
                .video()
                .map_err(|e| DomainError::DecodeFailed(format!("Failed to create video decoder: {}", e)))?
        };
        seek_to(&mut input, &window)?;

        let nominal = if frame_rate.numerator() > 0 && frame_rate.denominator() > 0 {
            1.0 / f64::from(frame_rate)
        } else {
            1.0 / 30.0
        };

        Ok(Box::new(LibavVideoStream {
            input: SendCell(input),
            decoder: SendCell(decoder),
            track: track.0,
            time_base,
            nominal,
            window,
            eof_sent: false,
            finished: false,
        }))
    }

    async fn audio_chunks(
        &mut self,
        track: TrackId,
        window: TrimWindow,
    ) -> Result<Box<dyn AudioChunkStream>, DomainError> {
        let (time_base, _) = self.stream_of(track, media::Type::Audio)?;
        let mut input = self.reopen()?;
        let decoder = {
            let stream = input
                .stream(track.0)
                .ok_or_else(|| DomainError::ResourceUnavailable(format!("No audio track {}", track.0)))?;
            decoder_context(&stream, 1)?
                .decoder()
                .audio()
                .map_err(|e| DomainError::DecodeFailed(format!("Failed to create audio decoder: {}", e)))?
        };
        seek_to(&mut input, &window)?;

        Ok(Box::new(LibavAudioStream {
            input: SendCell(input),
            decoder: SendCell(decoder),
            track: track.0,
            time_base,
            window,
            eof_sent: false,
            finished: false,
        }))
    }

    fn dispose(&mut self) {
        self.input.take();
        if let Some(file) = self.file.take() {
            if let Err(e) = file.close() {
                debug!(error = %e, "Temporary source file was not removed");
            }
        }
    }
}

/// Feed the next packet of `track` to `decoder`, or signal end of stream.
/// Returns false once end of stream has already been signalled.
fn feed(
    input: &mut format::context::Input,
    decoder: &mut decoder::Opened,
    track: usize,
    eof_sent: &mut bool,
) -> Result<bool, DomainError> {
    if *eof_sent {
        return Ok(false);
    }

    loop {
        let mut packet = Packet::empty();
        match packet.read(input) {
            Ok(()) if packet.stream() == track => {
                decoder
                    .send_packet(&packet)
                    .map_err(|e| DomainError::DecodeFailed(format!("send_packet failed: {}", e)))?;
                return Ok(true);
            }
            Ok(()) => continue,
            Err(ffmpeg::Error::Eof) => {
                decoder
                    .send_eof()
                    .map_err(|e| DomainError::DecodeFailed(format!("send_eof failed: {}", e)))?;
                *eof_sent = true;
                return Ok(true);
            }
            Err(e) => return Err(DomainError::DecodeFailed(format!("Packet read failed: {}", e))),
        }
    }
}

struct LibavVideoStream {
    input: SendCell<format::context::Input>,
    decoder: SendCell<decoder::Video>,
    track: usize,
    time_base: Rational,
    nominal: f64,
    window: TrimWindow,
    eof_sent: bool,
    finished: bool,
}

impl LibavVideoStream {
    fn accept(&mut self, decoded: frame::Video) -> Option<VideoFrame> {
        let Some(pts) = decoded.timestamp().or_else(|| decoded.pts()) else {
            trace!("Skipping video frame without timestamp");
            return None;
        };
        let timestamp = convert::seconds(pts, self.time_base);
        let packet_duration = convert::seconds(decoded.packet().duration, self.time_base);
        let duration = if packet_duration > 0.0 { packet_duration } else { self.nominal };

        if timestamp >= self.window.end - BOUNDARY_EPSILON {
            self.finished = true;
            return None;
        }
        if timestamp + duration <= self.window.start + BOUNDARY_EPSILON {
            return None;
        }

        Some(VideoFrame::new(timestamp, duration).with_resource(LibavPicture(SendCell(decoded))))
    }
}

#[async_trait]
impl VideoFrameStream for LibavVideoStream {
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, DomainError> {
        while !self.finished {
            let mut decoded = frame::Video::empty();
            match self.decoder.0.receive_frame(&mut decoded) {
                Ok(()) => {
                    if let Some(frame) = self.accept(decoded) {
                        return Ok(Some(frame));
                    }
                }
                Err(ffmpeg::Error::Eof) => self.finished = true,
                Err(e) if convert::is_again(&e) => {
                    if !feed(&mut self.input.0, &mut self.decoder.0, self.track, &mut self.eof_sent)? {
                        self.finished = true;
                    }
                }
                Err(e) => return Err(DomainError::DecodeFailed(format!("Video decode failed: {}", e))),
            }
        }
        Ok(None)
    }
}

struct LibavAudioStream {
    input: SendCell<format::context::Input>,
    decoder: SendCell<decoder::Audio>,
    track: usize,
    time_base: Rational,
    window: TrimWindow,
    eof_sent: bool,
    finished: bool,
}

impl LibavAudioStream {
    fn accept(&mut self, decoded: &frame::Audio) -> Result<Option<AudioSampleBuffer>, DomainError> {
        let Some(pts) = decoded.timestamp().or_else(|| decoded.pts()) else {
            return Ok(None);
        };
        let timestamp = convert::seconds(pts, self.time_base);
        let duration = decoded.samples() as f64 / decoded.rate().max(1) as f64;

        if timestamp >= self.window.end - BOUNDARY_EPSILON {
            self.finished = true;
            return Ok(None);
        }
        if timestamp + duration <= self.window.start + BOUNDARY_EPSILON {
            return Ok(None);
        }
        convert::to_sample_buffer(decoded).map(Some)
    }
}

#[async_trait]
impl AudioChunkStream for LibavAudioStream {
    async fn next_chunk(&mut self) -> Result<Option<AudioSampleBuffer>, DomainError> {
        while !self.finished {
            let mut decoded = frame::Audio::empty();
            match self.decoder.0.receive_frame(&mut decoded) {
                Ok(()) => {
                    if let Some(chunk) = self.accept(&decoded)? {
                        return Ok(Some(chunk));
                    }
                }
                Err(ffmpeg::Error::Eof) => self.finished = true,
                Err(e) if convert::is_again(&e) => {
                    if !feed(&mut self.input.0, &mut self.decoder.0, self.track, &mut self.eof_sent)? {
                        self.finished = true;
                    }
                }
                Err(e) => return Err(DomainError::DecodeFailed(format!("Audio decode failed: {}", e))),
            }
        }
        Ok(None)
    }
}
