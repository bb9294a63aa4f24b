// Synthetic demuxer - Deterministic source described by JSON bytes

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ledger::ResourceLedger;
use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;

/// Boundaries closer than this count as touching, not overlapping
const OVERLAP_EPSILON: f64 = 1e-9;

fn overlaps(window: &TrimWindow, timestamp: f64, duration: f64) -> bool {
    window.intersects(timestamp + OVERLAP_EPSILON, duration - 2.0 * OVERLAP_EPSILON)
}

/// A complete source container: tracks plus injected failures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyntheticMedia {
    /// Container duration; derived from the tracks when absent
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub video: Vec<SyntheticVideoTrack>,
    #[serde(default)]
    pub audio: Vec<SyntheticAudioTrack>,
    #[serde(default)]
    pub faults: SourceFaults,
}

impl SyntheticMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(mut self, track: SyntheticVideoTrack) -> Self {
        self.video.push(track);
        self
    }

    pub fn with_audio(mut self, track: SyntheticAudioTrack) -> Self {
        self.audio.push(track);
        self
    }

    pub fn with_faults(mut self, faults: SourceFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Serialize into the bytes a [`SyntheticDemuxer`] opens
    pub fn to_bytes(&self) -> Result<SourceBytes, DomainError> {
        let json = serde_json::to_vec(self).map_err(|e| {
            DomainError::InternalError(format!("Failed to serialize synthetic media: {}", e))
        })?;
        Ok(Arc::from(json))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DomainError> {
        serde_json::from_slice(bytes)
            .map_err(|e| DomainError::InvalidFormat(format!("Not a synthetic media file: {}", e)))
    }

    /// End of the longest track
    pub fn track_duration(&self) -> f64 {
        let video = self.video.iter().map(|t| t.end_time());
        let audio = self.audio.iter().map(|t| t.start_time + t.duration);
        video.chain(audio).fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticVideoTrack {
    #[serde(default = "default_video_codec")]
    pub codec: String,
    #[serde(default)]
    pub display_width: Option<u32>,
    #[serde(default)]
    pub display_height: Option<u32>,
    #[serde(default)]
    pub coded_width: Option<u32>,
    #[serde(default)]
    pub coded_height: Option<u32>,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    #[serde(default)]
    pub start_time: f64,
    pub duration: f64,
    /// Explicit presentation timestamps; replaces the regular `frame_rate` grid
    #[serde(default)]
    pub timestamps: Option<Vec<f64>>,
    #[serde(default)]
    pub bitrate: Option<f64>,
}

fn default_video_codec() -> String {
    "avc".to_string()
}

fn default_frame_rate() -> f64 {
    30.0
}

impl SyntheticVideoTrack {
    /// Constant-rate track whose display and coded sizes agree
    pub fn new(width: u32, height: u32, frame_rate: f64, duration: f64) -> Self {
        Self {
            codec: default_video_codec(),
            display_width: Some(width),
            display_height: Some(height),
            coded_width: Some(width),
            coded_height: Some(height),
            rotation: 0.0,
            frame_rate,
            start_time: 0.0,
            duration,
            timestamps: None,
            bitrate: None,
        }
    }

    pub fn with_rotation(mut self, degrees: f64) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn with_bitrate(mut self, bitrate: f64) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn with_timestamps(mut self, timestamps: Vec<f64>) -> Self {
        self.timestamps = Some(timestamps);
        self
    }

    fn nominal_interval(&self) -> f64 {
        if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            1.0 / self.frame_rate
        } else {
            1.0 / default_frame_rate()
        }
    }

    /// `(timestamp, duration)` of every frame in presentation order
    pub fn frame_times(&self) -> Vec<(f64, f64)> {
        let interval = self.nominal_interval();
        match &self.timestamps {
            Some(timestamps) => timestamps
                .iter()
                .enumerate()
                .map(|(i, &ts)| {
                    let duration = timestamps
                        .get(i + 1)
                        .map(|next| next - ts)
                        .filter(|d| *d > 0.0)
                        .unwrap_or(interval);
                    (ts, duration)
                })
                .collect(),
            None => {
                let count = (self.duration / interval).round().max(0.0) as usize;
                (0..count)
                    .map(|i| (self.start_time + i as f64 * interval, interval))
                    .collect()
            }
        }
    }

    fn end_time(&self) -> f64 {
        match &self.timestamps {
            Some(_) => self
                .frame_times()
                .last()
                .map_or(self.start_time, |(ts, dur)| ts + dur),
            None => self.start_time + self.duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticAudioTrack {
    #[serde(default = "default_audio_codec")]
    pub codec: String,
    pub sample_rate: u32,
    pub channels: usize,
    pub duration: f64,
    #[serde(default = "default_chunk_samples")]
    pub chunk_samples: usize,
    #[serde(default)]
    pub start_time: f64,
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_chunk_samples() -> usize {
    1024
}

impl SyntheticAudioTrack {
    pub fn new(sample_rate: u32, channels: usize, duration: f64) -> Self {
        Self {
            codec: default_audio_codec(),
            sample_rate,
            channels,
            duration,
            chunk_samples: default_chunk_samples(),
            start_time: 0.0,
        }
    }

    /// Deterministic value of sample `index` on `channel`
    pub fn sample_value(index: usize, channel: usize) -> f32 {
        let value = (index % 48_000) as f32 / 48_000.0;
        if channel % 2 == 0 {
            value
        } else {
            -value
        }
    }

    fn total_samples(&self) -> usize {
        (self.duration * self.sample_rate as f64).round().max(0.0) as usize
    }

    /// `(first sample index, length)` of every chunk overlapping `window`
    fn chunks_in(&self, window: &TrimWindow) -> VecDeque<(usize, usize)> {
        let total = self.total_samples();
        let size = self.chunk_samples.max(1);
        let rate = self.sample_rate.max(1) as f64;
        (0..total)
            .step_by(size)
            .map(|first| (first, size.min(total - first)))
            .filter(|&(first, len)| {
                overlaps(
                    window,
                    self.start_time + first as f64 / rate,
                    len as f64 / rate,
                )
            })
            .collect()
    }
}

/// Failures the synthetic source injects on request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceFaults {
    pub open: bool,
    pub video_tracks: bool,
    pub audio_tracks: bool,
    pub packet_stats: bool,
    pub duration: bool,
    /// Audio decoding fails once this many chunks have been produced
    pub audio_decode_after_chunks: Option<usize>,
    /// Chunks after this many switch to a doubled sample rate
    pub heterogeneous_audio_after_chunks: Option<usize>,
    /// Video decoding fails once this many frames have been produced
    pub video_decode_after_frames: Option<usize>,
}

/// Demuxer over [`SyntheticMedia`] JSON bytes
pub struct SyntheticDemuxer {
    ledger: Arc<ResourceLedger>,
}

impl SyntheticDemuxer {
    pub fn new() -> Self {
        Self::with_ledger(Arc::new(ResourceLedger::new()))
    }

    pub fn with_ledger(ledger: Arc<ResourceLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> Arc<ResourceLedger> {
        Arc::clone(&self.ledger)
    }
}

impl Default for SyntheticDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DemuxPort for SyntheticDemuxer {
    async fn open(&self, bytes: SourceBytes) -> Result<Box<dyn MediaSource>, DomainError> {
        let media = SyntheticMedia::from_bytes(&bytes)?;
        if media.faults.open {
            return Err(DomainError::ResourceUnavailable(
                "synthetic source refused to open".to_string(),
            ));
        }
        self.ledger.source_opened();
        Ok(Box::new(SyntheticSource {
            media,
            ledger: Arc::clone(&self.ledger),
        }))
    }
}

struct SyntheticSource {
    media: SyntheticMedia,
    ledger: Arc<ResourceLedger>,
}

impl SyntheticSource {
    fn video_track(&self, track: TrackId) -> Result<&SyntheticVideoTrack, DomainError> {
        self.media
            .video
            .get(track.0)
            .ok_or_else(|| DomainError::BadArgs(format!("No video track {}", track.0)))
    }

    fn audio_track(&self, track: TrackId) -> Result<&SyntheticAudioTrack, DomainError> {
        track
            .0
            .checked_sub(self.media.video.len())
            .and_then(|index| self.media.audio.get(index))
            .ok_or_else(|| DomainError::BadArgs(format!("No audio track {}", track.0)))
    }
}

#[async_trait]
impl MediaSource for SyntheticSource {
    async fn video_tracks(&mut self) -> Result<Vec<VideoTrackInfo>, DomainError> {
        if self.media.faults.video_tracks {
            return Err(DomainError::InvalidFormat(
                "video track table is corrupt".to_string(),
            ));
        }
        Ok(self
            .media
            .video
            .iter()
            .enumerate()
            .map(|(index, track)| VideoTrackInfo {
                id: TrackId(index),
                codec: track.codec.clone(),
                display_width: track.display_width,
                display_height: track.display_height,
                coded_width: track.coded_width,
                coded_height: track.coded_height,
                rotation: track.rotation,
            })
            .collect())
    }

    async fn audio_tracks(&mut self) -> Result<Vec<AudioTrackInfo>, DomainError> {
        if self.media.faults.audio_tracks {
            return Err(DomainError::InvalidFormat(
                "audio track table is corrupt".to_string(),
            ));
        }
        let offset = self.media.video.len();
        Ok(self
            .media
            .audio
            .iter()
            .enumerate()
            .map(|(index, track)| AudioTrackInfo {
                id: TrackId(offset + index),
                codec: track.codec.clone(),
                sample_rate: track.sample_rate,
                channels: track.channels,
            })
            .collect())
    }

    async fn packet_stats(&mut self, track: TrackId) -> Result<PacketStats, DomainError> {
        if self.media.faults.packet_stats {
            return Err(DomainError::DecodeFailed(
                "packet statistics unavailable".to_string(),
            ));
        }
        let track = self.video_track(track)?;
        Ok(PacketStats {
            packet_count: track.frame_times().len() as u64,
            average_bitrate: track.bitrate.unwrap_or(0.0),
            average_packet_rate: track.frame_rate,
        })
    }

    async fn duration(&mut self) -> Result<f64, DomainError> {
        if self.media.faults.duration {
            return Err(DomainError::DecodeFailed("duration unavailable".to_string()));
        }
        Ok(self
            .media
            .duration
            .unwrap_or_else(|| self.media.track_duration()))
    }

    async fn video_frames(
        &mut self,
        track: TrackId,
        window: TrimWindow,
    ) -> Result<Box<dyn VideoFrameStream>, DomainError> {
        let frames = self
            .video_track(track)?
            .frame_times()
            .into_iter()
            .filter(|&(ts, dur)| overlaps(&window, ts, dur))
            .collect();
        Ok(Box::new(SyntheticVideoStream {
            frames,
            ledger: Arc::clone(&self.ledger),
            fail_after: self.media.faults.video_decode_after_frames,
            produced: 0,
        }))
    }

    async fn audio_chunks(
        &mut self,
        track: TrackId,
        window: TrimWindow,
    ) -> Result<Box<dyn AudioChunkStream>, DomainError> {
        let spec = self.audio_track(track)?;
        Ok(Box::new(SyntheticAudioStream {
            chunks: spec.chunks_in(&window),
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            fail_after: self.media.faults.audio_decode_after_chunks,
            switch_after: self.media.faults.heterogeneous_audio_after_chunks,
            produced: 0,
        }))
    }

    fn dispose(&mut self) {
        self.ledger.source_disposed();
    }
}

/// Decode-side resource attached to every synthetic frame
#[derive(Debug)]
pub struct SyntheticFrameHandle {
    pub source_timestamp: f64,
    ledger: Arc<ResourceLedger>,
}

impl Drop for SyntheticFrameHandle {
    fn drop(&mut self) {
        self.ledger.frame_released();
    }
}

struct SyntheticVideoStream {
    frames: VecDeque<(f64, f64)>,
    ledger: Arc<ResourceLedger>,
    fail_after: Option<usize>,
    produced: usize,
}

#[async_trait]
impl VideoFrameStream for SyntheticVideoStream {
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, DomainError> {
        if self.fail_after == Some(self.produced) && !self.frames.is_empty() {
            return Err(DomainError::DecodeFailed(format!(
                "video decoder failed after {} frames",
                self.produced
            )));
        }
        let Some((timestamp, duration)) = self.frames.pop_front() else {
            return Ok(None);
        };
        self.produced += 1;
        self.ledger.frame_decoded();
        Ok(Some(VideoFrame::new(timestamp, duration).with_resource(
            SyntheticFrameHandle {
                source_timestamp: timestamp,
                ledger: Arc::clone(&self.ledger),
            },
        )))
    }
}

struct SyntheticAudioStream {
    chunks: VecDeque<(usize, usize)>,
    sample_rate: u32,
    channels: usize,
    fail_after: Option<usize>,
    switch_after: Option<usize>,
    produced: usize,
}

#[async_trait]
impl AudioChunkStream for SyntheticAudioStream {
    async fn next_chunk(&mut self) -> Result<Option<AudioSampleBuffer>, DomainError> {
        if self.fail_after == Some(self.produced) && !self.chunks.is_empty() {
            return Err(DomainError::DecodeFailed(format!(
                "audio decoder failed after {} chunks",
                self.produced
            )));
        }
        let Some((first, len)) = self.chunks.pop_front() else {
            return Ok(None);
        };
        let sample_rate = match self.switch_after {
            Some(after) if self.produced >= after => self.sample_rate * 2,
            _ => self.sample_rate,
        };
        self.produced += 1;

        let planes = (0..self.channels)
            .map(|channel| {
                (first..first + len)
                    .map(|index| SyntheticAudioTrack::sample_value(index, channel))
                    .collect()
            })
            .collect();
        AudioSampleBuffer::new(sample_rate, planes).map(Some)
    }
}
