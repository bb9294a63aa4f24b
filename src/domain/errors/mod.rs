// Domain errors - Error types returned across port boundaries

use std::fmt;

/// Domain-specific error types
#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid arguments provided
    BadArgs(String),
    /// Source bytes could not be read as a container
    InvalidFormat(String),
    /// Codec not supported by the collaborator
    UnsupportedCodec(String),
    /// Invalid time range
    InvalidTimeRange(String),
    /// Requested track or resource does not exist
    ResourceUnavailable(String),
    /// Decoding a sample or frame failed
    DecodeFailed(String),
    /// Encoder construction or submission failed
    EncodeFailed(String),
    /// Container start/finalize/cancel failed
    MuxFailed(String),
    /// Audio chunks disagree on sample rate or channel count
    MismatchedAudioChunks {
        expected_rate: u32,
        expected_channels: usize,
        rate: u32,
        channels: usize,
    },
    /// Internal error
    InternalError(String),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::BadArgs(msg) => write!(f, "Bad arguments: {}", msg),
            DomainError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            DomainError::UnsupportedCodec(msg) => write!(f, "Unsupported codec: {}", msg),
            DomainError::InvalidTimeRange(msg) => write!(f, "Invalid time range: {}", msg),
            DomainError::ResourceUnavailable(msg) => write!(f, "Resource unavailable: {}", msg),
            DomainError::DecodeFailed(msg) => write!(f, "Decode failed: {}", msg),
            DomainError::EncodeFailed(msg) => write!(f, "Encode failed: {}", msg),
            DomainError::MuxFailed(msg) => write!(f, "Mux failed: {}", msg),
            DomainError::MismatchedAudioChunks {
                expected_rate,
                expected_channels,
                rate,
                channels,
            } => write!(
                f,
                "Mismatched audio chunks: expected {} Hz x {}, got {} Hz x {}",
                expected_rate, expected_channels, rate, channels
            ),
            DomainError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}
