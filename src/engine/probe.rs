//! Metadata probing of the source's primary video track

use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::domain::model::{VideoMetadata, VideoTrackInfo};
use crate::domain::rules::{known_or_zero, normalize_rotation, resolve_dimension};
use crate::engine::source::SourceGuard;
use crate::error::{TrimError, TrimResult};
use crate::ports::{DemuxPort, MediaSource, SourceBytes};

/// Probed metadata together with the track it describes
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    /// First video track; the only one the pipeline reads
    pub track: VideoTrackInfo,
    pub metadata: VideoMetadata,
}

/// Extracts geometry, rotation, bitrate and duration from a source
pub struct MetadataProber<'a> {
    config: &'a PipelineConfig,
}

impl<'a> MetadataProber<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Probe an already-open source. Bitrate and duration failures are absorbed as 0.
    pub async fn probe(&self, source: &mut dyn MediaSource) -> TrimResult<ProbeReport> {
        let tracks = source
            .video_tracks()
            .await
            .map_err(|e| TrimError::SourceOpen {
                message: e.to_string(),
            })?;
        let track = tracks.into_iter().next().ok_or(TrimError::NoVideoTrack)?;

        let width = resolve_dimension(
            track.display_width,
            track.coded_width,
            self.config.fallback_width,
        );
        let height = resolve_dimension(
            track.display_height,
            track.coded_height,
            self.config.fallback_height,
        );

        let bitrate = match source.packet_stats(track.id).await {
            Ok(stats) => known_or_zero(stats.average_bitrate),
            Err(e) => {
                warn!("Failed to compute packet stats for bitrate: {}", e);
                0.0
            }
        };

        let duration = match source.duration().await {
            Ok(duration) => known_or_zero(duration),
            Err(e) => {
                warn!("Failed to compute duration: {}", e);
                0.0
            }
        };

        let metadata = VideoMetadata {
            width,
            height,
            rotation: normalize_rotation(track.rotation),
            bitrate,
            duration,
        };
        debug!(
            width = metadata.width,
            height = metadata.height,
            rotation = metadata.rotation.degrees(),
            bitrate = metadata.bitrate,
            duration = metadata.duration,
            "Probed video metadata"
        );

        Ok(ProbeReport { track, metadata })
    }

    /// Open `bytes`, probe, and dispose the handle before returning
    pub async fn probe_bytes(
        &self,
        demuxer: &dyn DemuxPort,
        bytes: SourceBytes,
    ) -> TrimResult<ProbeReport> {
        let mut source = SourceGuard::open(demuxer, bytes).await?;
        self.probe(&mut *source).await
    }
}
