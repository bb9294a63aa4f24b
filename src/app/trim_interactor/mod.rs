// Trim interactor - Orchestrates the trim-and-re-encode use case

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::domain::rules::ProfileBuilder;
use crate::engine::audio::{AudioTrimAssembler, PreparedAudio};
use crate::engine::mux::{MuxOrchestrator, MuxSession};
use crate::engine::probe::{MetadataProber, ProbeReport};
use crate::engine::progress::{ProgressCallback, ProgressPhase, ProgressReporter};
use crate::engine::source::SourceGuard;
use crate::error::{TrimError, TrimResult};
use crate::ports::*;

/// Interactor for the trim use case
pub struct TrimInteractor {
    demuxer: Arc<dyn DemuxPort>,
    muxer: Arc<dyn MuxPort>,
    config: PipelineConfig,
}

impl TrimInteractor {
    /// Create new trim interactor with injected ports and default policy
    pub fn new(demuxer: Arc<dyn DemuxPort>, muxer: Arc<dyn MuxPort>) -> Self {
        Self {
            demuxer,
            muxer,
            config: PipelineConfig::default(),
        }
    }

    /// Create with an explicit configuration; rejects invalid policy values
    pub fn with_config(
        demuxer: Arc<dyn DemuxPort>,
        muxer: Arc<dyn MuxPort>,
        config: PipelineConfig,
    ) -> TrimResult<Self> {
        config.validate()?;
        Ok(Self {
            demuxer,
            muxer,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Trim `[start, end)` out of `bytes` and re-encode it.
    ///
    /// Exactly one terminal event (complete or error) reaches `progress`.
    pub async fn trim(
        &self,
        bytes: SourceBytes,
        start: f64,
        end: f64,
        progress: &dyn ProgressCallback,
    ) -> TrimResult<TrimmedMedia> {
        let mut reporter = ProgressReporter::new(progress);

        match self.run(bytes, start, end, &mut reporter).await {
            Ok(media) => {
                reporter.complete(format!("Trimmed video: {}", format_megabytes(media.data.len())));
                Ok(media)
            }
            Err(e) => {
                error!("Trim failed: {}", e);
                reporter.error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        bytes: SourceBytes,
        start: f64,
        end: f64,
        reporter: &mut ProgressReporter<'_>,
    ) -> TrimResult<TrimmedMedia> {
        let window = TrimWindow::new(start, end).map_err(|e| TrimError::InvalidTimeRange {
            start,
            end,
            reason: match e {
                DomainError::InvalidTimeRange(reason) => reason,
                other => other.to_string(),
            },
        })?;

        reporter.phase(ProgressPhase::Probing, 0.0, "Probing video metadata...");
        let mut source = SourceGuard::open(self.demuxer.as_ref(), bytes).await?;
        let report = MetadataProber::new(&self.config).probe(&mut *source).await?;

        reporter.processing(5.0, "Analyzing source video...");
        let profile = ProfileBuilder::new(&self.config).build(
            report.metadata.width,
            report.metadata.height,
            report.metadata.bitrate,
        );
        info!(
            width = profile.width,
            height = profile.height,
            bitrate = profile.bitrate,
            codec = profile.codec_string(),
            rotation = report.metadata.rotation.degrees(),
            fps = profile.frame_rate,
            start = window.start,
            end = window.end,
            "Trim encoder configuration"
        );

        reporter.phase(ProgressPhase::AudioPreparation, 0.0, "Creating output container...");
        let mut session = MuxSession::create(self.muxer.as_ref()).await?;

        reporter.processing(10.0, "Setting up encoder...");
        session.register_video(
            &profile,
            VideoTrackOptions {
                rotation: report.metadata.rotation,
                frame_rate: profile.frame_rate,
            },
        )?;

        let audio = self
            .prepare_audio(&mut *source, &mut session, &window, reporter)
            .await;

        let outcome = MuxOrchestrator::new(&self.config)
            .run(
                session,
                audio.as_ref(),
                &mut *source,
                report.track.id,
                &window,
                reporter,
            )
            .await?;
        source.dispose();

        let summary = TrimSummary {
            window,
            frames_written: outcome.video.frames_written,
            frames_dropped: outcome.video.frames_dropped,
            output_duration: outcome.video.output_duration(),
            has_audio: audio.is_some(),
            audio_codec: audio.as_ref().map(|a| a.codec),
            audio_samples: outcome.audio_samples,
            profile,
            output_bytes: outcome.data.len(),
        };
        info!(
            frames_written = summary.frames_written,
            frames_dropped = summary.frames_dropped,
            has_audio = summary.has_audio,
            output_bytes = summary.output_bytes,
            "Trim completed"
        );

        Ok(TrimmedMedia {
            data: outcome.data,
            summary,
        })
    }

    /// Decode, cut and register audio. Every failure here is logged and
    /// yields a video-only run.
    async fn prepare_audio(
        &self,
        source: &mut dyn MediaSource,
        session: &mut MuxSession,
        window: &TrimWindow,
        reporter: &mut ProgressReporter<'_>,
    ) -> Option<PreparedAudio> {
        let assembler = AudioTrimAssembler::new(&self.config);
        let prepared = match assembler
            .prepare(source, self.muxer.as_ref(), window, reporter)
            .await
        {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return None,
            Err(e) => {
                warn!("Audio processing failed, continuing without audio: {}", e);
                return None;
            }
        };

        if let Err(e) = session.register_audio(prepared.encoder_settings()) {
            warn!("Audio processing failed, continuing without audio: {}", e);
            return None;
        }
        reporter.processing(14.0, format!("Audio track ready ({})", prepared.codec));
        Some(prepared)
    }

    /// Probe `bytes` without trimming
    pub async fn probe(&self, bytes: SourceBytes) -> TrimResult<ProbeReport> {
        MetadataProber::new(&self.config)
            .probe_bytes(self.demuxer.as_ref(), bytes)
            .await
    }

    /// Whether the muxer can encode the baseline profile at the fallback geometry
    pub async fn check_encoder_support(&self) -> bool {
        let profile = ProfileBuilder::new(&self.config).build(
            self.config.fallback_width,
            self.config.fallback_height,
            0.0,
        );
        match self.muxer.supports_video_profile(&profile).await {
            Ok(supported) => supported,
            Err(e) => {
                warn!("Encoder support check failed: {}", e);
                false
            }
        }
    }
}

/// Encoded output and what went into it
#[derive(Debug, Clone, PartialEq)]
pub struct TrimmedMedia {
    pub data: Vec<u8>,
    pub summary: TrimSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrimSummary {
    pub window: TrimWindow,
    pub frames_written: u64,
    pub frames_dropped: u64,
    /// End of the last written frame, seconds
    pub output_duration: f64,
    pub has_audio: bool,
    pub audio_codec: Option<AudioCodec>,
    pub audio_samples: usize,
    pub profile: EncodingProfile,
    pub output_bytes: usize,
}

/// `1.23MB` style size used in the completion message
pub fn format_megabytes(bytes: usize) -> String {
    format!("{:.2}MB", bytes as f64 / (1024.0 * 1024.0))
}
