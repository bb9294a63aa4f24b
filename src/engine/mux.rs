//! Mux orchestration: container lifecycle, write ordering and scoped cleanup

use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::engine::audio::PreparedAudio;
use crate::engine::progress::{ProgressPhase, ProgressReporter};
use crate::engine::resample::{ResampleStats, VideoFrameResampler};
use crate::error::{CleanupWarning, DegradedAudioError, MuxStage, TrimError, TrimResult};
use crate::ports::{AudioTrackWriter, MediaSource, MuxPort, OutputContainer, VideoTrackWriter};

/// An output container and the track writers registered on it.
///
/// Dropping a session that was not finalized releases everything it holds in
/// reverse acquisition order: audio writer, video writer, then the container
/// (cancelled only if it was started).
pub struct MuxSession {
    container: Option<Box<dyn OutputContainer>>,
    started: bool,
    video: Option<Box<dyn VideoTrackWriter>>,
    audio: Option<Box<dyn AudioTrackWriter>>,
}

impl MuxSession {
    pub async fn create(mux: &dyn MuxPort) -> TrimResult<Self> {
        let container = mux
            .create_output()
            .await
            .map_err(|e| TrimError::mux(MuxStage::CreateContainer, e))?;
        Ok(Self {
            container: Some(container),
            started: false,
            video: None,
            audio: None,
        })
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    fn container(&mut self, stage: MuxStage) -> TrimResult<&mut Box<dyn OutputContainer>> {
        self.container.as_mut().ok_or_else(|| TrimError::EncodeMux {
            stage,
            message: "output container already finalized".to_string(),
        })
    }

    /// Construct the video encoder and register the single video track
    pub fn register_video(
        &mut self,
        profile: &EncodingProfile,
        options: VideoTrackOptions,
    ) -> TrimResult<()> {
        if self.video.is_some() {
            return Err(TrimError::EncodeMux {
                stage: MuxStage::VideoEncoder,
                message: "video track already registered".to_string(),
            });
        }
        let writer = self
            .container(MuxStage::VideoEncoder)?
            .add_video_track(profile, options)
            .map_err(|e| TrimError::mux(MuxStage::VideoEncoder, e))?;
        self.video = Some(writer);
        Ok(())
    }

    /// Register the audio track. A failure here leaves the session video-only.
    pub fn register_audio(
        &mut self,
        settings: AudioEncoderSettings,
    ) -> Result<(), DegradedAudioError> {
        let Some(container) = self.container.as_mut() else {
            return Err(DegradedAudioError::Register(DomainError::MuxFailed(
                "output container already finalized".to_string(),
            )));
        };
        let writer = container
            .add_audio_track(settings)
            .map_err(DegradedAudioError::Register)?;
        self.audio = Some(writer);
        Ok(())
    }

    pub async fn start(&mut self) -> TrimResult<()> {
        if self.video.is_none() {
            return Err(TrimError::EncodeMux {
                stage: MuxStage::Start,
                message: "no video track registered".to_string(),
            });
        }
        self.container(MuxStage::Start)?
            .start()
            .await
            .map_err(|e| TrimError::mux(MuxStage::Start, e))?;
        self.started = true;
        Ok(())
    }

    /// Write the whole audio buffer in one call, then close the audio track
    pub async fn write_audio(&mut self, buffer: &AudioSampleBuffer) -> TrimResult<()> {
        let Some(writer) = self.audio.as_mut() else {
            return Ok(());
        };
        writer
            .add_audio(buffer)
            .await
            .map_err(|e| TrimError::mux(MuxStage::AudioWrite, e))?;
        writer
            .close()
            .await
            .map_err(|e| TrimError::mux(MuxStage::CloseTrack, e))?;
        self.audio = None;
        Ok(())
    }

    pub fn video_writer(&mut self) -> TrimResult<&mut dyn VideoTrackWriter> {
        match self.video.as_mut() {
            Some(writer) => Ok(writer.as_mut()),
            None => Err(TrimError::EncodeMux {
                stage: MuxStage::VideoFrame,
                message: "no open video track".to_string(),
            }),
        }
    }

    pub async fn close_video(&mut self) -> TrimResult<()> {
        if let Some(writer) = self.video.as_mut() {
            writer
                .close()
                .await
                .map_err(|e| TrimError::mux(MuxStage::CloseTrack, e))?;
        }
        self.video = None;
        Ok(())
    }

    /// Finish the container. On failure the session still owns it and the
    /// drop path cancels it.
    pub async fn finalize(mut self) -> TrimResult<Vec<u8>> {
        if !self.started {
            return Err(TrimError::EncodeMux {
                stage: MuxStage::Finalize,
                message: "container was never started".to_string(),
            });
        }
        let data = self
            .container(MuxStage::Finalize)?
            .finalize()
            .await
            .map_err(|e| TrimError::mux(MuxStage::Finalize, e))?;
        if data.is_empty() {
            return Err(TrimError::EncodeMux {
                stage: MuxStage::Finalize,
                message: "Failed to generate output buffer".to_string(),
            });
        }
        self.container = None;
        self.started = false;
        Ok(data)
    }

    fn release(&mut self) {
        if let Some(mut writer) = self.audio.take() {
            if let Err(e) = writer.abort() {
                CleanupWarning::new("audio track writer", e).log();
            }
        }
        if let Some(mut writer) = self.video.take() {
            if let Err(e) = writer.abort() {
                CleanupWarning::new("video track writer", e).log();
            }
        }
        if let Some(mut container) = self.container.take() {
            if self.started {
                if let Err(e) = container.cancel() {
                    CleanupWarning::new("output container", e).log();
                }
                debug!("Cancelled unfinished output container");
            }
        }
        self.started = false;
    }
}

impl Drop for MuxSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Bytes and counters of a finished mux
#[derive(Debug, Clone, PartialEq)]
pub struct MuxOutcome {
    pub data: Vec<u8>,
    pub video: ResampleStats,
    pub audio_samples: usize,
}

/// Drives a registered session: start, audio, video, finalize
pub struct MuxOrchestrator<'a> {
    config: &'a PipelineConfig,
}

impl<'a> MuxOrchestrator<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// All audio is written and its track closed before the first video frame
    /// is submitted.
    pub async fn run(
        &self,
        mut session: MuxSession,
        audio: Option<&PreparedAudio>,
        source: &mut dyn MediaSource,
        track: TrackId,
        window: &TrimWindow,
        reporter: &mut ProgressReporter<'_>,
    ) -> TrimResult<MuxOutcome> {
        session.start().await?;

        let mut audio_samples = 0;
        if let Some(audio) = audio.filter(|_| session.has_audio()) {
            reporter.processing(14.0, "Encoding audio track...");
            session.write_audio(&audio.buffer).await?;
            audio_samples = audio.buffer.sample_count();
            debug!(samples = audio_samples, "Audio track written");
        } else if audio.is_some() {
            warn!("Audio prepared but no audio track registered, skipping audio");
        }

        reporter.phase(ProgressPhase::VideoFrames, 0.0, "Processing video frames...");
        let mut frames = source
            .video_frames(track, *window)
            .await
            .map_err(|e| TrimError::Decode {
                message: e.to_string(),
            })?;
        let resampler = VideoFrameResampler::new(self.config);
        let stats = resampler
            .resample_and_encode(frames.as_mut(), session.video_writer()?, window, reporter)
            .await?;
        drop(frames);

        if stats.frames_written == 0 {
            return Err(TrimError::EmptyWindow {
                start: window.start,
                end: window.end,
            });
        }

        reporter.processing(92.0, "Finalizing output...");
        session.close_video().await?;
        let data = session.finalize().await?;
        info!(
            bytes = data.len(),
            frames_written = stats.frames_written,
            frames_dropped = stats.frames_dropped,
            "Output container finalized"
        );

        Ok(MuxOutcome {
            data,
            video: stats,
            audio_samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::synthetic::{ResourceLedger, SyntheticMuxer};
    use crate::domain::rules::ProfileBuilder;

    fn options() -> VideoTrackOptions {
        VideoTrackOptions {
            rotation: Rotation::None,
            frame_rate: 60,
        }
    }

    async fn session_with_tracks(muxer: &SyntheticMuxer, config: &PipelineConfig) -> MuxSession {
        let profile = ProfileBuilder::new(config).build(1280, 720, 0.0);
        let mut session = MuxSession::create(muxer).await.unwrap();
        session.register_video(&profile, options()).unwrap();
        session
            .register_audio(AudioEncoderSettings {
                codec: AudioCodec::Aac,
                bitrate: 128_000,
                channels: 2,
                sample_rate: 48_000,
            })
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_drop_before_start_aborts_without_cancel() {
        let ledger = Arc::new(ResourceLedger::new());
        let muxer = SyntheticMuxer::with_ledger(Arc::clone(&ledger));
        let config = PipelineConfig::default();

        let session = session_with_tracks(&muxer, &config).await;
        assert!(session.has_video() && session.has_audio());
        drop(session);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.video_writers_aborted, 1);
        assert_eq!(snapshot.audio_writers_aborted, 1);
        assert_eq!(snapshot.containers_cancelled, 0);
        assert!(snapshot.is_balanced());
    }

    #[tokio::test]
    async fn test_drop_after_start_cancels_container() {
        let ledger = Arc::new(ResourceLedger::new());
        let muxer = SyntheticMuxer::with_ledger(Arc::clone(&ledger));
        let config = PipelineConfig::default();

        let mut session = session_with_tracks(&muxer, &config).await;
        session.start().await.unwrap();
        assert!(session.is_started());
        drop(session);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.containers_cancelled, 1);
        assert_eq!(snapshot.containers_finalized, 0);
        assert!(snapshot.is_balanced());
    }

    #[tokio::test]
    async fn test_start_requires_video_track() {
        let muxer = SyntheticMuxer::new();
        let mut session = MuxSession::create(&muxer).await.unwrap();
        let err = session.start().await.unwrap_err();
        assert!(matches!(err, TrimError::EncodeMux { stage: MuxStage::Start, .. }));
    }

    #[tokio::test]
    async fn test_second_video_track_is_rejected() {
        let muxer = SyntheticMuxer::new();
        let config = PipelineConfig::default();
        let profile = ProfileBuilder::new(&config).build(640, 360, 0.0);

        let mut session = MuxSession::create(&muxer).await.unwrap();
        session.register_video(&profile, options()).unwrap();
        let err = session.register_video(&profile, options()).unwrap_err();
        assert!(matches!(err, TrimError::EncodeMux { stage: MuxStage::VideoEncoder, .. }));
    }
}
