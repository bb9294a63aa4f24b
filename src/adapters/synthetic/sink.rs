// Synthetic muxer - Records everything written into a JSON output

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ledger::ResourceLedger;
use super::source::{SyntheticAudioTrack, SyntheticMedia, SyntheticVideoTrack};
use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;

/// Decoded form of the bytes a synthetic container finalizes to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticOutput {
    pub format: String,
    /// Index placed before media data
    pub fast_start: bool,
    pub video: Option<VideoTrackRecord>,
    pub audio: Option<AudioTrackRecord>,
    /// Every write in submission order
    pub writes: Vec<WriteEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoTrackRecord {
    pub profile: EncodingProfile,
    pub options: VideoTrackOptions,
    pub frames: Vec<FrameRecord>,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub timestamp: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrackRecord {
    pub settings: AudioEncoderSettings,
    pub sample_count: usize,
    pub first_sample: Option<f32>,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "track", rename_all = "lowercase")]
pub enum WriteEvent {
    Audio { samples: usize },
    Video { timestamp: f64 },
}

impl SyntheticOutput {
    fn empty() -> Self {
        Self {
            format: "mp4".to_string(),
            fast_start: true,
            video: None,
            audio: None,
            writes: Vec::new(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DomainError> {
        serde_json::from_slice(bytes)
            .map_err(|e| DomainError::InvalidFormat(format!("Not a synthetic output: {}", e)))
    }

    pub fn track_count(&self) -> usize {
        usize::from(self.video.is_some()) + usize::from(self.audio.is_some())
    }

    pub fn frames(&self) -> &[FrameRecord] {
        self.video.as_ref().map_or(&[], |v| v.frames.as_slice())
    }

    /// End of the last video frame
    pub fn video_duration(&self) -> f64 {
        self.frames()
            .last()
            .map_or(0.0, |f| f.timestamp + f.duration)
    }

    pub fn audio_duration(&self) -> f64 {
        self.audio.as_ref().map_or(0.0, |a| {
            a.sample_count as f64 / a.settings.sample_rate.max(1) as f64
        })
    }

    /// Read the output back as a source, as a real demuxer would
    pub fn into_media(&self) -> SyntheticMedia {
        let mut media = SyntheticMedia::new();
        if let Some(video) = &self.video {
            let timestamps = video.frames.iter().map(|f| f.timestamp).collect();
            let track = SyntheticVideoTrack::new(
                video.profile.width,
                video.profile.height,
                video.options.frame_rate as f64,
                self.video_duration(),
            )
            .with_rotation(video.options.rotation.degrees() as f64)
            .with_bitrate(video.profile.bitrate as f64)
            .with_timestamps(timestamps);
            media = media.with_video(track);
        }
        if let Some(audio) = &self.audio {
            media = media.with_audio(SyntheticAudioTrack::new(
                audio.settings.sample_rate,
                audio.settings.channels,
                self.audio_duration(),
            ));
        }
        media
    }
}

/// Failures the synthetic muxer injects on request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MuxFaults {
    /// Codecs the muxer can encode; `None` accepts every candidate
    pub encodable_audio: Option<Vec<AudioCodec>>,
    pub audio_negotiation: bool,
    pub unsupported_video: bool,
    pub create_output: bool,
    pub video_encoder: bool,
    pub audio_track: bool,
    pub start: bool,
    /// Zero-based index of the frame submission that fails
    pub fail_on_frame: Option<usize>,
    pub audio_write: bool,
    pub finalize: bool,
    pub cancel: bool,
}

#[derive(Debug)]
struct SinkState {
    output: SyntheticOutput,
    started: bool,
    finished: bool,
}

fn lock(state: &Mutex<SinkState>) -> Result<MutexGuard<'_, SinkState>, DomainError> {
    state
        .lock()
        .map_err(|_| DomainError::InternalError("synthetic sink state poisoned".to_string()))
}

/// Muxer producing [`SyntheticOutput`] JSON
pub struct SyntheticMuxer {
    ledger: Arc<ResourceLedger>,
    faults: MuxFaults,
}

impl SyntheticMuxer {
    pub fn new() -> Self {
        Self::with_ledger(Arc::new(ResourceLedger::new()))
    }

    pub fn with_ledger(ledger: Arc<ResourceLedger>) -> Self {
        Self {
            ledger,
            faults: MuxFaults::default(),
        }
    }

    pub fn with_faults(mut self, faults: MuxFaults) -> Self {
        self.faults = faults;
        self
    }

    pub fn ledger(&self) -> Arc<ResourceLedger> {
        Arc::clone(&self.ledger)
    }
}

impl Default for SyntheticMuxer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MuxPort for SyntheticMuxer {
    async fn create_output(&self) -> Result<Box<dyn OutputContainer>, DomainError> {
        if self.faults.create_output {
            return Err(DomainError::ResourceUnavailable(
                "output target unavailable".to_string(),
            ));
        }
        self.ledger.container_created();
        Ok(Box::new(SyntheticContainer {
            state: Arc::new(Mutex::new(SinkState {
                output: SyntheticOutput::empty(),
                started: false,
                finished: false,
            })),
            ledger: Arc::clone(&self.ledger),
            faults: self.faults.clone(),
        }))
    }

    async fn first_encodable_audio_codec(
        &self,
        candidates: &[AudioCodec],
        channels: usize,
        sample_rate: u32,
        bitrate: u64,
    ) -> Result<Option<AudioCodec>, DomainError> {
        if self.faults.audio_negotiation {
            return Err(DomainError::UnsupportedCodec(
                "audio encoder query failed".to_string(),
            ));
        }
        if channels == 0 || sample_rate == 0 || bitrate == 0 {
            return Ok(None);
        }
        Ok(candidates.iter().copied().find(|codec| {
            self.faults
                .encodable_audio
                .as_ref()
                .map_or(true, |allowed| allowed.contains(codec))
        }))
    }

    async fn supports_video_profile(&self, profile: &EncodingProfile) -> Result<bool, DomainError> {
        Ok(!self.faults.unsupported_video && profile.width % 2 == 0 && profile.height % 2 == 0)
    }
}

struct SyntheticContainer {
    state: Arc<Mutex<SinkState>>,
    ledger: Arc<ResourceLedger>,
    faults: MuxFaults,
}

#[async_trait]
impl OutputContainer for SyntheticContainer {
    fn add_video_track(
        &mut self,
        profile: &EncodingProfile,
        options: VideoTrackOptions,
    ) -> Result<Box<dyn VideoTrackWriter>, DomainError> {
        if self.faults.video_encoder {
            return Err(DomainError::EncodeFailed(
                "video encoder configuration rejected".to_string(),
            ));
        }
        if profile.width % 2 != 0 || profile.height % 2 != 0 {
            return Err(DomainError::EncodeFailed(format!(
                "odd frame size {}x{}",
                profile.width, profile.height
            )));
        }
        let mut state = lock(&self.state)?;
        if state.started {
            return Err(DomainError::MuxFailed("container already started".to_string()));
        }
        if state.output.video.is_some() {
            return Err(DomainError::MuxFailed("video track already added".to_string()));
        }
        state.output.video = Some(VideoTrackRecord {
            profile: profile.clone(),
            options,
            frames: Vec::new(),
            closed: false,
        });
        drop(state);

        self.ledger.video_writer_opened();
        Ok(Box::new(SyntheticVideoWriter {
            state: Arc::clone(&self.state),
            ledger: Arc::clone(&self.ledger),
            fail_on_frame: self.faults.fail_on_frame,
            submitted: 0,
            closed: false,
        }))
    }

    fn add_audio_track(
        &mut self,
        settings: AudioEncoderSettings,
    ) -> Result<Box<dyn AudioTrackWriter>, DomainError> {
        if self.faults.audio_track {
            return Err(DomainError::EncodeFailed(
                "audio encoder configuration rejected".to_string(),
            ));
        }
        if settings.channels == 0 || settings.sample_rate == 0 {
            return Err(DomainError::EncodeFailed(
                "audio encoder needs channels and a sample rate".to_string(),
            ));
        }
        let mut state = lock(&self.state)?;
        if state.started {
            return Err(DomainError::MuxFailed("container already started".to_string()));
        }
        if state.output.audio.is_some() {
            return Err(DomainError::MuxFailed("audio track already added".to_string()));
        }
        state.output.audio = Some(AudioTrackRecord {
            settings,
            sample_count: 0,
            first_sample: None,
            closed: false,
        });
        drop(state);

        self.ledger.audio_writer_opened();
        Ok(Box::new(SyntheticAudioWriter {
            state: Arc::clone(&self.state),
            ledger: Arc::clone(&self.ledger),
            fail_write: self.faults.audio_write,
            closed: false,
        }))
    }

    async fn start(&mut self) -> Result<(), DomainError> {
        if self.faults.start {
            return Err(DomainError::MuxFailed("container refused to start".to_string()));
        }
        let mut state = lock(&self.state)?;
        if state.started {
            return Err(DomainError::MuxFailed("container already started".to_string()));
        }
        if state.output.video.is_none() {
            return Err(DomainError::MuxFailed("container has no video track".to_string()));
        }
        state.started = true;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<Vec<u8>, DomainError> {
        let mut state = lock(&self.state)?;
        if !state.started || state.finished {
            return Err(DomainError::MuxFailed("container is not writable".to_string()));
        }
        let video_open = state.output.video.as_ref().is_some_and(|v| !v.closed);
        let audio_open = state.output.audio.as_ref().is_some_and(|a| !a.closed);
        if video_open || audio_open {
            return Err(DomainError::MuxFailed("a track is still open".to_string()));
        }
        if self.faults.finalize {
            return Err(DomainError::MuxFailed("failed to write container index".to_string()));
        }
        let bytes = serde_json::to_vec(&state.output)
            .map_err(|e| DomainError::InternalError(format!("Failed to serialize output: {}", e)))?;
        state.finished = true;
        drop(state);

        self.ledger.container_finalized();
        Ok(bytes)
    }

    fn cancel(&mut self) -> Result<(), DomainError> {
        if self.faults.cancel {
            return Err(DomainError::MuxFailed("cancel failed".to_string()));
        }
        let mut state = lock(&self.state)?;
        state.finished = true;
        drop(state);

        self.ledger.container_cancelled();
        Ok(())
    }
}

impl Drop for SyntheticContainer {
    fn drop(&mut self) {
        self.ledger.container_released();
    }
}

struct SyntheticVideoWriter {
    state: Arc<Mutex<SinkState>>,
    ledger: Arc<ResourceLedger>,
    fail_on_frame: Option<usize>,
    submitted: usize,
    closed: bool,
}

#[async_trait]
impl VideoTrackWriter for SyntheticVideoWriter {
    async fn add_frame(&mut self, frame: &VideoFrame) -> Result<(), DomainError> {
        if self.closed {
            return Err(DomainError::EncodeFailed("video track is closed".to_string()));
        }
        let mut state = lock(&self.state)?;
        if !state.started {
            return Err(DomainError::MuxFailed("container not started".to_string()));
        }
        if self.fail_on_frame == Some(self.submitted) {
            return Err(DomainError::EncodeFailed(format!(
                "encoder rejected frame {}",
                self.submitted
            )));
        }
        let record = FrameRecord {
            timestamp: frame.timestamp(),
            duration: frame.duration(),
        };
        if let Some(video) = state.output.video.as_mut() {
            video.frames.push(record);
        }
        state.output.writes.push(WriteEvent::Video {
            timestamp: record.timestamp,
        });
        self.submitted += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DomainError> {
        let mut state = lock(&self.state)?;
        if let Some(video) = state.output.video.as_mut() {
            video.closed = true;
        }
        self.closed = true;
        Ok(())
    }

    fn abort(&mut self) -> Result<(), DomainError> {
        self.closed = true;
        self.ledger.video_writer_aborted();
        Ok(())
    }
}

impl Drop for SyntheticVideoWriter {
    fn drop(&mut self) {
        self.ledger.video_writer_released();
    }
}

struct SyntheticAudioWriter {
    state: Arc<Mutex<SinkState>>,
    ledger: Arc<ResourceLedger>,
    fail_write: bool,
    closed: bool,
}

#[async_trait]
impl AudioTrackWriter for SyntheticAudioWriter {
    async fn add_audio(&mut self, buffer: &AudioSampleBuffer) -> Result<(), DomainError> {
        if self.closed {
            return Err(DomainError::EncodeFailed("audio track is closed".to_string()));
        }
        let mut state = lock(&self.state)?;
        if !state.started {
            return Err(DomainError::MuxFailed("container not started".to_string()));
        }
        if self.fail_write {
            return Err(DomainError::EncodeFailed("audio encoder failed".to_string()));
        }
        if let Some(audio) = state.output.audio.as_mut() {
            audio.sample_count += buffer.sample_count();
            if audio.first_sample.is_none() {
                audio.first_sample = buffer.plane(0).and_then(|p| p.first().copied());
            }
        }
        state.output.writes.push(WriteEvent::Audio {
            samples: buffer.sample_count(),
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DomainError> {
        let mut state = lock(&self.state)?;
        if let Some(audio) = state.output.audio.as_mut() {
            audio.closed = true;
        }
        self.closed = true;
        Ok(())
    }

    fn abort(&mut self) -> Result<(), DomainError> {
        self.closed = true;
        self.ledger.audio_writer_aborted();
        Ok(())
    }
}

impl Drop for SyntheticAudioWriter {
    fn drop(&mut self) {
        self.ledger.audio_writer_released();
    }
}
