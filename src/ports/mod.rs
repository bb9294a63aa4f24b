// Ports - Interface definitions for the container/codec collaborators

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::*;
use crate::domain::model::*;

/// Immutable view over the input container bytes
pub type SourceBytes = Arc<[u8]>;

/// Port for opening source containers
#[async_trait]
pub trait DemuxPort: Send + Sync {
    /// Open `bytes` read-only
    async fn open(&self, bytes: SourceBytes) -> Result<Box<dyn MediaSource>, DomainError>;
}

/// An opened source container.
///
/// `dispose` must be called exactly once; callers hold the handle in a
/// guard that disposes on every exit path.
#[async_trait]
pub trait MediaSource: Send {
    /// Video tracks in container order
    async fn video_tracks(&mut self) -> Result<Vec<VideoTrackInfo>, DomainError>;

    /// Audio tracks in container order
    async fn audio_tracks(&mut self) -> Result<Vec<AudioTrackInfo>, DomainError>;

    /// Packet statistics for a track
    async fn packet_stats(&mut self, track: TrackId) -> Result<PacketStats, DomainError>;

    /// Total container duration in seconds
    async fn duration(&mut self) -> Result<f64, DomainError>;

    /// Lazily decode video frames of `track` within `window`, in presentation order
    async fn video_frames(
        &mut self,
        track: TrackId,
        window: TrimWindow,
    ) -> Result<Box<dyn VideoFrameStream>, DomainError>;

    /// Lazily decode audio chunks of `track` overlapping `window`, in decode order
    async fn audio_chunks(
        &mut self,
        track: TrackId,
        window: TrimWindow,
    ) -> Result<Box<dyn AudioChunkStream>, DomainError>;

    /// Release the read handle
    fn dispose(&mut self);
}

/// Pull-based sequence of decoded video frames
#[async_trait]
pub trait VideoFrameStream: Send {
    /// Next frame, or `None` once the window is exhausted
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, DomainError>;
}

/// Pull-based sequence of decoded audio chunks
#[async_trait]
pub trait AudioChunkStream: Send {
    /// Next chunk, or `None` once the window is exhausted
    async fn next_chunk(&mut self) -> Result<Option<AudioSampleBuffer>, DomainError>;
}

/// Port for encoders and the output container
#[async_trait]
pub trait MuxPort: Send + Sync {
    /// Create an empty MP4 output container
    async fn create_output(&self) -> Result<Box<dyn OutputContainer>, DomainError>;

    /// First codec of `candidates` that can encode with the given parameters
    async fn first_encodable_audio_codec(
        &self,
        candidates: &[AudioCodec],
        channels: usize,
        sample_rate: u32,
        bitrate: u64,
    ) -> Result<Option<AudioCodec>, DomainError>;

    /// Whether a video encoder can be built for `profile`
    async fn supports_video_profile(&self, profile: &EncodingProfile) -> Result<bool, DomainError>;
}

/// Output container accumulating one video track and at most one audio track.
///
/// `cancel` and the writers' `abort` are synchronous so that scoped guards can
/// release them from `Drop`.
#[async_trait]
pub trait OutputContainer: Send {
    /// Construct the video encoder from `profile` and register its track
    fn add_video_track(
        &mut self,
        profile: &EncodingProfile,
        options: VideoTrackOptions,
    ) -> Result<Box<dyn VideoTrackWriter>, DomainError>;

    /// Construct the audio encoder and register its track
    fn add_audio_track(
        &mut self,
        settings: AudioEncoderSettings,
    ) -> Result<Box<dyn AudioTrackWriter>, DomainError>;

    /// Begin writing; no tracks may be added afterwards
    async fn start(&mut self) -> Result<(), DomainError>;

    /// Finish the container and hand back its bytes
    async fn finalize(&mut self) -> Result<Vec<u8>, DomainError>;

    /// Discard a started container without producing output
    fn cancel(&mut self) -> Result<(), DomainError>;
}

/// Encoder feeding the output video track
#[async_trait]
pub trait VideoTrackWriter: Send {
    /// Encode one frame; the frame keeps ownership of its decode-side resource
    async fn add_frame(&mut self, frame: &VideoFrame) -> Result<(), DomainError>;

    /// Flush the encoder and close the track
    async fn close(&mut self) -> Result<(), DomainError>;

    /// Drop the encoder without flushing
    fn abort(&mut self) -> Result<(), DomainError>;
}

/// Encoder feeding the output audio track
#[async_trait]
pub trait AudioTrackWriter: Send {
    async fn add_audio(&mut self, buffer: &AudioSampleBuffer) -> Result<(), DomainError>;

    async fn close(&mut self) -> Result<(), DomainError>;

    fn abort(&mut self) -> Result<(), DomainError>;
}
