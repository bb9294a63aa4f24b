//! Audio trim assembler: decode the window, join chunks, cut to length, pick a codec

use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::domain::rules::target_sample_count;
use crate::engine::progress::ProgressReporter;
use crate::error::DegradedAudioError;
use crate::ports::{MediaSource, MuxPort};

/// Trimmed audio ready to be written, with the codec that will encode it
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedAudio {
    pub buffer: AudioSampleBuffer,
    pub codec: AudioCodec,
    pub bitrate: u64,
    /// Samples per channel before truncation
    pub decoded_samples: usize,
}

impl PreparedAudio {
    pub fn encoder_settings(&self) -> AudioEncoderSettings {
        AudioEncoderSettings {
            codec: self.codec,
            bitrate: self.bitrate,
            channels: self.buffer.channel_count(),
            sample_rate: self.buffer.sample_rate(),
        }
    }
}

pub struct AudioTrimAssembler<'a> {
    config: &'a PipelineConfig,
}

impl<'a> AudioTrimAssembler<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// `Ok(None)` when there is nothing to encode (no track, no chunks, no codec)
    pub async fn prepare(
        &self,
        source: &mut dyn MediaSource,
        mux: &dyn MuxPort,
        window: &TrimWindow,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<Option<PreparedAudio>, DegradedAudioError> {
        let tracks = source
            .audio_tracks()
            .await
            .map_err(DegradedAudioError::Probe)?;
        let Some(track) = tracks.into_iter().next() else {
            debug!("Source has no audio track");
            return Ok(None);
        };

        reporter.processing(12.0, "Detecting supported audio codec...");

        let Some(mut buffer) = self.decode_window(source, track.id, window).await? else {
            debug!("No audio chunks decoded in window");
            return Ok(None);
        };

        let decoded_samples = buffer.sample_count();
        let target = target_sample_count(window, buffer.sample_rate());
        if decoded_samples > target {
            buffer.truncate(target);
        }
        debug!(
            decoded_samples,
            target,
            kept = buffer.sample_count(),
            "Assembled audio buffer"
        );
        if buffer.sample_count() == 0 {
            debug!("Audio window shorter than one sample");
            return Ok(None);
        }

        let codec = mux
            .first_encodable_audio_codec(
                &self.config.audio_codec_preference,
                buffer.channel_count(),
                buffer.sample_rate(),
                self.config.audio_bitrate,
            )
            .await
            .map_err(DegradedAudioError::Negotiation)?;

        let Some(codec) = codec else {
            warn!("No supported audio codec found, output will be video-only");
            return Ok(None);
        };

        info!(
            codec = %codec,
            channels = buffer.channel_count(),
            sample_rate = buffer.sample_rate(),
            samples = buffer.sample_count(),
            "Audio track ready"
        );

        Ok(Some(PreparedAudio {
            buffer,
            codec,
            bitrate: self.config.audio_bitrate,
            decoded_samples,
        }))
    }

    /// Decode every chunk overlapping `window` and join them in decode order
    async fn decode_window(
        &self,
        source: &mut dyn MediaSource,
        track: TrackId,
        window: &TrimWindow,
    ) -> Result<Option<AudioSampleBuffer>, DegradedAudioError> {
        let mut chunks = source
            .audio_chunks(track, *window)
            .await
            .map_err(DegradedAudioError::Decode)?;

        let mut decoded = Vec::new();
        while let Some(chunk) = chunks
            .next_chunk()
            .await
            .map_err(DegradedAudioError::Decode)?
        {
            decoded.push(chunk);
        }

        AudioSampleBuffer::concat(&decoded).map_err(|e| match e {
            DomainError::MismatchedAudioChunks {
                expected_rate,
                expected_channels,
                rate,
                channels,
            } => DegradedAudioError::Heterogeneous {
                expected_rate,
                expected_channels,
                rate,
                channels,
            },
            other => DegradedAudioError::Decode(other),
        })
    }
}
