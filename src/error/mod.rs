//! Error handling module for the trim pipeline

use thiserror::Error;

use crate::domain::errors::DomainError;

/// Pipeline stage an encode/mux failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxStage {
    /// Creating the output container
    CreateContainer,
    /// Constructing the video encoder / registering the video track
    VideoEncoder,
    /// Starting the container
    Start,
    /// Submitting a video frame
    VideoFrame,
    /// Writing the audio buffer
    AudioWrite,
    /// Closing a track encoder
    CloseTrack,
    /// Finalizing the container
    Finalize,
}

impl std::fmt::Display for MuxStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MuxStage::CreateContainer => "create container",
            MuxStage::VideoEncoder => "video encoder",
            MuxStage::Start => "start",
            MuxStage::VideoFrame => "video frame",
            MuxStage::AudioWrite => "audio write",
            MuxStage::CloseTrack => "close track",
            MuxStage::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Main error type for trim operations
#[derive(Error, Debug)]
pub enum TrimError {
    /// Time range validation error
    #[error("Invalid time range [{start}, {end}): {reason}")]
    InvalidTimeRange { start: f64, end: f64, reason: String },

    /// Source has no video track
    #[error("No video tracks found in source video.")]
    NoVideoTrack,

    /// Source bytes could not be opened
    #[error("Failed to open source: {message}")]
    SourceOpen { message: String },

    /// Video frames could not be decoded
    #[error("Video decode failed: {message}")]
    Decode { message: String },

    /// The window holds no decodable video frames
    #[error("No video frames found between {start}s and {end}s")]
    EmptyWindow { start: f64, end: f64 },

    /// Encoder construction, frame submission or finalize failure
    #[error("Encoding failed during {stage}: {message}")]
    EncodeMux { stage: MuxStage, message: String },

    /// The media backend could not be initialized
    #[error("Media backend unavailable: {message}")]
    Backend { message: String },

    /// Invalid pipeline configuration
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TrimError {
    /// Wrap a port failure that happened at `stage` of the mux orchestration
    pub fn mux(stage: MuxStage, err: DomainError) -> Self {
        TrimError::EncodeMux {
            stage,
            message: err.to_string(),
        }
    }

    /// True for errors that mean the input itself is unusable
    pub fn is_fatal_input(&self) -> bool {
        matches!(self, TrimError::NoVideoTrack | TrimError::SourceOpen { .. })
    }
}

/// Audio failure absorbed by the pipeline; output continues video-only
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DegradedAudioError {
    /// Enumerating the audio tracks failed
    #[error("audio track probe failed: {0}")]
    Probe(DomainError),

    /// A chunk could not be decoded
    #[error("audio decode failed: {0}")]
    Decode(DomainError),

    /// Decoded chunks disagree on sample rate or channel count
    #[error(
        "audio chunks are heterogeneous: expected {expected_rate} Hz x {expected_channels}, \
         got {rate} Hz x {channels}"
    )]
    Heterogeneous {
        expected_rate: u32,
        expected_channels: usize,
        rate: u32,
        channels: usize,
    },

    /// Asking the muxer for an encodable codec failed
    #[error("audio codec negotiation failed: {0}")]
    Negotiation(DomainError),

    /// Registering the audio track on the container failed
    #[error("audio track registration failed: {0}")]
    Register(DomainError),
}

/// Failure while releasing resources of an already-failing pipeline
#[derive(Debug, Clone)]
pub struct CleanupWarning {
    pub resource: &'static str,
    pub message: String,
}

impl CleanupWarning {
    pub fn new(resource: &'static str, err: impl std::fmt::Display) -> Self {
        Self {
            resource,
            message: err.to_string(),
        }
    }

    /// Log and discard; cleanup failures never mask the original error
    pub fn log(&self) {
        tracing::warn!(resource = self.resource, "Failed to release resource: {}", self.message);
    }
}

/// Result type alias for trim operations
pub type TrimResult<T> = std::result::Result<T, TrimError>;
