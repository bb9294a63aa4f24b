// Domain models - Core types and data structures

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Time specification with precision - represents time in seconds with fractional precision
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct TimeSpec {
    pub seconds: f64,
}

impl TimeSpec {
    /// Create a new TimeSpec from seconds
    pub fn from_seconds(seconds: f64) -> Self {
        Self { seconds }
    }

    pub fn as_seconds(&self) -> f64 {
        self.seconds
    }

    /// Parse `123.45`, `MM:SS.ms` or `HH:MM:SS.ms`
    pub fn parse(time_str: &str) -> Result<Self, DomainError> {
        let trimmed = time_str.trim();

        if let Ok(seconds) = trimmed.parse::<f64>() {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(DomainError::BadArgs(format!(
                    "Time must be a non-negative number: {}",
                    trimmed
                )));
            }
            return Ok(Self::from_seconds(seconds));
        }

        let parts: Vec<&str> = trimmed.split(':').collect();
        let (hours, minutes, seconds_part) = match parts.as_slice() {
            [m, s] => (0, Self::parse_component(m, "minutes")?, *s),
            [h, m, s] => {
                let minutes = Self::parse_component(m, "minutes")?;
                if minutes >= 60 {
                    return Err(DomainError::BadArgs("Minutes must be less than 60".to_string()));
                }
                (Self::parse_component(h, "hours")?, minutes, *s)
            }
            _ => {
                return Err(DomainError::BadArgs(
                    "Invalid time format. Supported formats: seconds (e.g., 123.45), MM:SS.ms (e.g., 2:30.5), HH:MM:SS.ms (e.g., 1:02:30.5)".to_string(),
                ))
            }
        };

        let seconds = seconds_part
            .parse::<f64>()
            .map_err(|_| DomainError::BadArgs("Invalid seconds format".to_string()))?;
        if !(0.0..60.0).contains(&seconds) {
            return Err(DomainError::BadArgs("Seconds must be less than 60".to_string()));
        }

        Ok(Self::from_seconds(
            hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds,
        ))
    }

    fn parse_component(value: &str, name: &str) -> Result<u32, DomainError> {
        value
            .parse::<u32>()
            .map_err(|_| DomainError::BadArgs(format!("Invalid {} format", name)))
    }

    /// Format as HH:MM:SS.ms
    pub fn format_hms(&self) -> String {
        let hours = (self.seconds / 3600.0) as u32;
        let minutes = ((self.seconds % 3600.0) / 60.0) as u32;
        let seconds = (self.seconds % 60.0) as u32;
        let milliseconds = ((self.seconds % 1.0) * 1000.0) as u32;

        if hours > 0 {
            format!("{}:{:02}:{:02}.{:03}", hours, minutes, seconds, milliseconds)
        } else {
            format!("{}:{:02}.{:03}", minutes, seconds, milliseconds)
        }
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_hms())
    }
}

/// Half-open `[start, end)` window in source seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimWindow {
    pub start: f64,
    pub end: f64,
}

impl TrimWindow {
    /// Create a window; both bounds must be finite, start >= 0 and start < end
    pub fn new(start: f64, end: f64) -> Result<Self, DomainError> {
        if !start.is_finite() || !end.is_finite() {
            return Err(DomainError::InvalidTimeRange(format!(
                "bounds must be finite (start {}, end {})",
                start, end
            )));
        }
        if start < 0.0 {
            return Err(DomainError::InvalidTimeRange(format!(
                "start cannot be negative ({})",
                start
            )));
        }
        if start >= end {
            return Err(DomainError::InvalidTimeRange(format!(
                "start ({}) must be less than end ({})",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// True when a sample spanning `[timestamp, timestamp + duration)` overlaps the window
    pub fn intersects(&self, timestamp: f64, duration: f64) -> bool {
        timestamp < self.end && timestamp + duration.max(0.0) > self.start
    }
}

/// Index of a track within a source container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub usize);

/// Video track geometry as reported by the demuxer
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrackInfo {
    pub id: TrackId,
    pub codec: String,
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
    pub coded_width: Option<u32>,
    pub coded_height: Option<u32>,
    /// Raw rotation in degrees, not yet normalized
    pub rotation: f64,
}

/// Audio track parameters as reported by the demuxer
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrackInfo {
    pub id: TrackId,
    pub codec: String,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Packet statistics for one track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketStats {
    pub packet_count: u64,
    /// Bits per second
    pub average_bitrate: f64,
    pub average_packet_rate: f64,
}

/// Clockwise rotation applied at presentation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Cw90),
            180 => Ok(Rotation::Cw180),
            270 => Ok(Rotation::Cw270),
            other => Err(format!("unsupported rotation: {}", other)),
        }
    }
}

/// Result of probing a source
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    /// Always even and >= 2
    pub width: u32,
    /// Always even and >= 2
    pub height: u32,
    pub rotation: Rotation,
    /// Bits per second; 0 means unknown
    pub bitrate: f64,
    /// Seconds; 0 means unknown
    pub duration: f64,
}

/// Output video codec family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Avc,
}

/// AVC profile/level pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecLevel {
    /// Constrained baseline, level 4.0
    Baseline40,
    /// High, level 5.1
    High51,
}

impl CodecLevel {
    /// Full codec string advertised in the container
    pub fn codec_string(&self) -> &'static str {
        match self {
            CodecLevel::Baseline40 => "avc1.420028",
            CodecLevel::High51 => "avc1.640033",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitrateMode {
    Constant,
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyMode {
    Quality,
    Realtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareAcceleration {
    PreferHardware,
    PreferSoftware,
}

/// Video encoder configuration chosen once per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingProfile {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Bits per second, always >= 1
    pub bitrate: u64,
    pub keyframe_interval_secs: f64,
    pub bitrate_mode: BitrateMode,
    pub latency_mode: LatencyMode,
    pub level: CodecLevel,
    pub hardware_acceleration: HardwareAcceleration,
    pub frame_rate: u32,
}

impl EncodingProfile {
    pub fn codec_string(&self) -> &'static str {
        self.level.codec_string()
    }

    /// Spacing of the output frame grid in seconds
    pub fn frame_interval(&self) -> f64 {
        1.0 / self.frame_rate.max(1) as f64
    }
}

/// Options attached to the output video track at registration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoTrackOptions {
    pub rotation: Rotation,
    pub frame_rate: u32,
}

/// Output audio codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Mp3,
    Opus,
}

impl AudioCodec {
    pub fn name(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Opus => "opus",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_lowercase().as_str() {
            "aac" => Ok(AudioCodec::Aac),
            "mp3" => Ok(AudioCodec::Mp3),
            "opus" => Ok(AudioCodec::Opus),
            other => Err(DomainError::UnsupportedCodec(format!(
                "Unknown audio codec: {}. Valid codecs: aac, mp3, opus",
                other
            ))),
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters used both to query codec support and to build the audio encoder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioEncoderSettings {
    pub codec: AudioCodec,
    pub bitrate: u64,
    pub channels: usize,
    pub sample_rate: u32,
}

/// Decoded planar f32 audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSampleBuffer {
    sample_rate: u32,
    planes: Vec<Vec<f32>>,
}

impl AudioSampleBuffer {
    /// Build a buffer from per-channel planes; all planes must have equal length
    pub fn new(sample_rate: u32, planes: Vec<Vec<f32>>) -> Result<Self, DomainError> {
        if sample_rate == 0 {
            return Err(DomainError::BadArgs("Sample rate cannot be zero".to_string()));
        }
        if planes.is_empty() {
            return Err(DomainError::BadArgs("Audio buffer needs at least one channel".to_string()));
        }
        let len = planes[0].len();
        if planes.iter().any(|plane| plane.len() != len) {
            return Err(DomainError::BadArgs("Audio planes differ in length".to_string()));
        }
        Ok(Self { sample_rate, planes })
    }

    pub fn silent(sample_rate: u32, channels: usize, samples: usize) -> Result<Self, DomainError> {
        Self::new(sample_rate, vec![vec![0.0; samples]; channels])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.planes.len()
    }

    /// Samples per channel
    pub fn sample_count(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    pub fn plane(&self, channel: usize) -> Option<&[f32]> {
        self.planes.get(channel).map(Vec::as_slice)
    }

    pub fn planes(&self) -> &[Vec<f32>] {
        &self.planes
    }

    pub fn duration_secs(&self) -> f64 {
        self.sample_count() as f64 / self.sample_rate as f64
    }

    /// Join chunks in order. `None` when there are no chunks.
    pub fn concat(chunks: &[AudioSampleBuffer]) -> Result<Option<Self>, DomainError> {
        let Some(first) = chunks.first() else {
            return Ok(None);
        };
        let sample_rate = first.sample_rate;
        let channels = first.channel_count();
        let total: usize = chunks.iter().map(AudioSampleBuffer::sample_count).sum();

        let mut planes: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(total)).collect();
        for chunk in chunks {
            if chunk.sample_rate != sample_rate || chunk.channel_count() != channels {
                return Err(DomainError::MismatchedAudioChunks {
                    expected_rate: sample_rate,
                    expected_channels: channels,
                    rate: chunk.sample_rate,
                    channels: chunk.channel_count(),
                });
            }
            for (dst, src) in planes.iter_mut().zip(&chunk.planes) {
                dst.extend_from_slice(src);
            }
        }

        Ok(Some(Self { sample_rate, planes }))
    }

    /// Keep the first `samples` samples of every channel; never grows the buffer
    pub fn truncate(&mut self, samples: usize) {
        for plane in &mut self.planes {
            plane.truncate(samples);
        }
    }
}

/// One decoded video frame. The decode-side resource is released when the
/// frame is closed or dropped.
pub struct VideoFrame {
    timestamp: f64,
    duration: f64,
    resource: Option<Box<dyn Any + Send + Sync>>,
}

impl VideoFrame {
    pub fn new(timestamp: f64, duration: f64) -> Self {
        Self {
            timestamp,
            duration,
            resource: None,
        }
    }

    /// Attach the collaborator's decoded picture. Writers borrow the frame
    /// across an await, so the resource has to be `Sync` as well.
    pub fn with_resource<T: Any + Send + Sync>(mut self, resource: T) -> Self {
        self.resource = Some(Box::new(resource));
        self
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn set_timestamp(&mut self, timestamp: f64) {
        self.timestamp = timestamp;
    }

    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration;
    }

    pub fn resource<T: Any>(&self) -> Option<&T> {
        self.resource.as_ref().and_then(|r| r.downcast_ref::<T>())
    }

    pub fn resource_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.resource.as_mut().and_then(|r| r.downcast_mut::<T>())
    }

    /// Release the decode-side resource
    pub fn close(mut self) {
        self.resource.take();
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("timestamp", &self.timestamp)
            .field("duration", &self.duration)
            .field("has_resource", &self.resource.is_some())
            .finish()
    }
}
