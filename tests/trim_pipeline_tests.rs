//! End-to-end trim runs over the synthetic demuxer/muxer pair

use std::sync::{Arc, Mutex};

use trimx_retime::adapters::synthetic::*;
use trimx_retime::app::{TrimInteractor, TrimmedMedia};
use trimx_retime::config::PipelineConfig;
use trimx_retime::domain::model::{AudioCodec, CodecLevel, Rotation};
use trimx_retime::engine::{TrimProgress, TrimStatus};
use trimx_retime::error::{MuxStage, TrimError, TrimResult};
use trimx_retime::ports::{DemuxPort, MuxPort};

const FRAME: f64 = 1.0 / 60.0;

// Test utilities

struct Harness {
    ledger: Arc<ResourceLedger>,
    interactor: TrimInteractor,
    events: Arc<Mutex<Vec<TrimProgress>>>,
}

impl Harness {
    fn new(faults: MuxFaults) -> Self {
        Self::with_config(faults, PipelineConfig::default())
    }

    fn with_config(faults: MuxFaults, config: PipelineConfig) -> Self {
        let ledger = Arc::new(ResourceLedger::new());
        let demuxer = Arc::new(SyntheticDemuxer::with_ledger(Arc::clone(&ledger)));
        let muxer = Arc::new(SyntheticMuxer::with_ledger(Arc::clone(&ledger)).with_faults(faults));
        let interactor = TrimInteractor::with_config(
            demuxer as Arc<dyn DemuxPort>,
            muxer as Arc<dyn MuxPort>,
            config,
        )
        .unwrap();
        Self {
            ledger,
            interactor,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn trim(&self, media: &SyntheticMedia, start: f64, end: f64) -> TrimResult<TrimmedMedia> {
        let events = Arc::clone(&self.events);
        let progress = move |p: &TrimProgress| events.lock().unwrap().push(p.clone());
        self.interactor
            .trim(media.to_bytes().unwrap(), start, end, &progress)
            .await
    }

    fn events(&self) -> Vec<TrimProgress> {
        self.events.lock().unwrap().clone()
    }

    fn ledger(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }
}

/// 10 s, 30 fps, 1280x720 video with 48 kHz stereo audio
fn standard_media() -> SyntheticMedia {
    SyntheticMedia::new()
        .with_video(SyntheticVideoTrack::new(1280, 720, 30.0, 10.0))
        .with_audio(SyntheticAudioTrack::new(48_000, 2, 10.0))
}

fn video_only(width: u32, height: u32, fps: f64, duration: f64) -> SyntheticMedia {
    SyntheticMedia::new().with_video(SyntheticVideoTrack::new(width, height, fps, duration))
}

fn decode(media: &TrimmedMedia) -> SyntheticOutput {
    SyntheticOutput::from_bytes(&media.data).unwrap()
}

fn assert_grid_sequence(output: &SyntheticOutput) {
    let frames = output.frames();
    assert!(!frames.is_empty());
    assert!(frames[0].timestamp.abs() < 1e-12);
    for pair in frames.windows(2) {
        assert!(pair[1].timestamp > pair[0].timestamp, "timestamps must increase");
        let slots = (pair[1].timestamp - pair[0].timestamp) / FRAME;
        assert!((slots - slots.round()).abs() < 1e-6, "timestamps must sit on the grid");
    }
    for frame in frames {
        assert!((frame.duration - FRAME).abs() < 1e-12);
    }
}

// Standard trim

#[tokio::test]
async fn test_standard_trim_produces_audio_and_video() {
    let harness = Harness::new(MuxFaults::default());
    let result = harness.trim(&standard_media(), 2.0, 5.0).await.unwrap();
    let output = decode(&result);

    assert_eq!(output.track_count(), 2);
    assert_eq!(output.frames().len(), 90);
    assert_grid_sequence(&output);
    assert!((output.video_duration() - 3.0).abs() <= FRAME + 1e-9);

    let audio = output.audio.as_ref().unwrap();
    assert_eq!(audio.sample_count, 144_000);
    assert_eq!(audio.settings.codec, AudioCodec::Aac);
    assert_eq!(audio.settings.channels, 2);
    assert_eq!(audio.settings.sample_rate, 48_000);
    assert_eq!(audio.settings.bitrate, 128_000);
    // Head-aligned on the first decoded chunk, which starts at sample 93 * 1024
    assert_eq!(audio.first_sample, Some(SyntheticAudioTrack::sample_value(93 * 1024, 0)));

    let video = output.video.as_ref().unwrap();
    assert_eq!(video.profile.width, 1280);
    assert_eq!(video.profile.height, 720);
    assert_eq!(video.profile.level, CodecLevel::Baseline40);
    assert_eq!(video.profile.bitrate, 8_000_000);
    assert_eq!(video.options.frame_rate, 60);
    assert_eq!(video.options.rotation, Rotation::None);

    assert_eq!(result.summary.frames_written, 90);
    assert_eq!(result.summary.frames_dropped, 0);
    assert!(result.summary.has_audio);
    assert_eq!(result.summary.audio_codec, Some(AudioCodec::Aac));
    assert_eq!(result.summary.audio_samples, 144_000);
    assert_eq!(result.summary.output_bytes, result.data.len());

    let ledger = harness.ledger();
    assert!(ledger.is_balanced(), "{:?}", ledger);
    assert_eq!(ledger.containers_finalized, 1);
    assert_eq!(ledger.containers_cancelled, 0);
    assert_eq!(ledger.video_writers_aborted, 0);
}

#[tokio::test]
async fn test_audio_written_before_first_video_frame() {
    let harness = Harness::new(MuxFaults::default());
    let result = harness.trim(&standard_media(), 2.0, 5.0).await.unwrap();
    let output = decode(&result);

    assert!(matches!(output.writes.first(), Some(WriteEvent::Audio { .. })));
    let first_video = output
        .writes
        .iter()
        .position(|w| matches!(w, WriteEvent::Video { .. }))
        .unwrap();
    assert!(output.writes[first_video..]
        .iter()
        .all(|w| matches!(w, WriteEvent::Video { .. })));
}

#[tokio::test]
async fn test_progress_is_monotonic_with_single_completion() {
    let harness = Harness::new(MuxFaults::default());
    let result = harness.trim(&standard_media(), 2.0, 5.0).await.unwrap();
    let events = harness.events();

    assert_eq!(events[0].message, "Probing video metadata...");
    assert_eq!(events[0].percent, 0.0);
    for pair in events.windows(2) {
        assert!(pair[1].percent >= pair[0].percent);
    }
    assert!(events.iter().any(|e| e.message == "Audio track ready (aac)"));
    assert!(events.iter().any(|e| e.message == "Finalizing output..."));

    let terminal: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.status, TrimStatus::Complete | TrimStatus::Error))
        .collect();
    assert_eq!(terminal.len(), 1);
    let last = events.last().unwrap();
    assert_eq!(last.status, TrimStatus::Complete);
    assert_eq!(last.percent, 100.0);
    assert_eq!(
        last.message,
        format!("Trimmed video: {}", trimx_retime::app::trim_interactor::format_megabytes(result.data.len()))
    );
}

// Geometry and profile

#[tokio::test]
async fn test_odd_width_is_made_even() {
    let harness = Harness::new(MuxFaults::default());
    let result = harness.trim(&video_only(721, 480, 30.0, 4.0), 0.0, 1.0).await.unwrap();
    let output = decode(&result);
    assert_eq!(output.video.as_ref().unwrap().profile.width, 720);
    assert_eq!(output.video.as_ref().unwrap().profile.height, 480);
}

#[tokio::test]
async fn test_missing_display_size_falls_back_to_coded_size() {
    let mut track = SyntheticVideoTrack::new(640, 360, 30.0, 2.0);
    track.display_width = None;
    track.display_height = None;
    let media = SyntheticMedia::new().with_video(track);

    let harness = Harness::new(MuxFaults::default());
    let result = harness.trim(&media, 0.0, 1.0).await.unwrap();
    assert_eq!(result.summary.profile.width, 640);
    assert_eq!(result.summary.profile.height, 360);
}

#[tokio::test]
async fn test_large_high_bitrate_source_uses_high_level() {
    let media = SyntheticMedia::new()
        .with_video(SyntheticVideoTrack::new(3840, 2160, 30.0, 2.0).with_bitrate(12_000_000.0));
    let harness = Harness::new(MuxFaults::default());
    let result = harness.trim(&media, 0.0, 1.0).await.unwrap();

    assert_eq!(result.summary.profile.level, CodecLevel::High51);
    assert_eq!(result.summary.profile.bitrate, 12_000_000);
}

#[tokio::test]
async fn test_rotation_carried_to_output_track() {
    let media = SyntheticMedia::new()
        .with_video(SyntheticVideoTrack::new(1080, 1920, 30.0, 2.0).with_rotation(90.0));
    let harness = Harness::new(MuxFaults::default());
    let output = decode(&harness.trim(&media, 0.0, 1.0).await.unwrap());
    assert_eq!(output.video.unwrap().options.rotation, Rotation::Cw90);
}

#[tokio::test]
async fn test_probe_failures_fall_back_to_defaults() {
    let media = video_only(1280, 720, 30.0, 3.0).with_faults(SourceFaults {
        packet_stats: true,
        duration: true,
        ..SourceFaults::default()
    });
    let harness = Harness::new(MuxFaults::default());
    let result = harness.trim(&media, 0.0, 2.0).await.unwrap();
    assert_eq!(result.summary.profile.bitrate, 8_000_000);
    assert_eq!(result.summary.frames_written, 60);
}

// Frame grid

#[tokio::test]
async fn test_high_rate_source_drops_duplicate_slots() {
    let harness = Harness::new(MuxFaults::default());
    let result = harness.trim(&video_only(640, 480, 240.0, 2.0), 0.0, 1.0).await.unwrap();
    let output = decode(&result);

    assert_grid_sequence(&output);
    assert!(output.frames().len() as f64 <= (1.0f64 * 60.0).ceil() + 1.0);
    assert_eq!(result.summary.frames_written, 61);
    assert_eq!(result.summary.frames_dropped, 240 - 61);
    assert!(harness.ledger().is_balanced());
}

#[tokio::test]
async fn test_jittered_timestamps_stay_strictly_increasing() {
    let timestamps: Vec<f64> = (0..60)
        .map(|i| i as f64 / 30.0 + if i % 2 == 0 { 0.004 } else { -0.003 })
        .map(|ts: f64| ts.max(0.0))
        .collect();
    let media = SyntheticMedia::new()
        .with_video(SyntheticVideoTrack::new(640, 480, 30.0, 2.0).with_timestamps(timestamps));
    let harness = Harness::new(MuxFaults::default());
    let output = decode(&harness.trim(&media, 0.0, 2.0).await.unwrap());
    assert_grid_sequence(&output);
}

#[tokio::test]
async fn test_retrimming_output_is_stable() {
    let harness = Harness::new(MuxFaults::default());
    let first = decode(&harness.trim(&standard_media(), 2.0, 5.0).await.unwrap());

    let again = harness
        .trim(&first.into_media(), 0.0, first.video_duration())
        .await
        .unwrap();
    let second = decode(&again);

    let diff = first.frames().len() as i64 - second.frames().len() as i64;
    assert!(diff.abs() <= 1);
    assert!((first.video_duration() - second.video_duration()).abs() <= FRAME + 1e-9);
    assert!(harness.ledger().is_balanced());
}

// Audio degradation

#[tokio::test]
async fn test_audio_decode_failure_yields_video_only() {
    let media = standard_media().with_faults(SourceFaults {
        audio_decode_after_chunks: Some(3),
        ..SourceFaults::default()
    });
    let harness = Harness::new(MuxFaults::default());
    let result = harness.trim(&media, 2.0, 5.0).await.unwrap();
    let output = decode(&result);

    assert_eq!(output.track_count(), 1);
    assert!(output.audio.is_none());
    assert_eq!(output.frames().len(), 90);
    assert!(!result.summary.has_audio);
    assert!(harness.ledger().is_balanced());
}

#[tokio::test]
async fn test_heterogeneous_audio_yields_video_only() {
    let media = standard_media().with_faults(SourceFaults {
        heterogeneous_audio_after_chunks: Some(2),
        ..SourceFaults::default()
    });
    let harness = Harness::new(MuxFaults::default());
    let output = decode(&harness.trim(&media, 2.0, 5.0).await.unwrap());
    assert!(output.audio.is_none());
}

#[tokio::test]
async fn test_audio_track_probe_failure_yields_video_only() {
    let media = standard_media().with_faults(SourceFaults {
        audio_tracks: true,
        ..SourceFaults::default()
    });
    let harness = Harness::new(MuxFaults::default());
    let output = decode(&harness.trim(&media, 2.0, 5.0).await.unwrap());
    assert_eq!(output.track_count(), 1);
}

#[tokio::test]
async fn test_no_encodable_codec_yields_video_only() {
    let harness = Harness::new(MuxFaults {
        encodable_audio: Some(Vec::new()),
        ..MuxFaults::default()
    });
    let output = decode(&harness.trim(&standard_media(), 2.0, 5.0).await.unwrap());
    assert!(output.audio.is_none());
}

#[tokio::test]
async fn test_codec_preference_falls_through_to_mp3() {
    let harness = Harness::new(MuxFaults {
        encodable_audio: Some(vec![AudioCodec::Mp3]),
        ..MuxFaults::default()
    });
    let result = harness.trim(&standard_media(), 2.0, 5.0).await.unwrap();
    assert_eq!(result.summary.audio_codec, Some(AudioCodec::Mp3));
    assert!(harness
        .events()
        .iter()
        .any(|e| e.message == "Audio track ready (mp3)"));
}

#[tokio::test]
async fn test_audio_registration_failure_yields_video_only() {
    let harness = Harness::new(MuxFaults {
        audio_track: true,
        ..MuxFaults::default()
    });
    let result = harness.trim(&standard_media(), 2.0, 5.0).await.unwrap();
    assert!(!result.summary.has_audio);
    assert_eq!(decode(&result).track_count(), 1);
    assert!(harness.ledger().is_balanced());
}

#[tokio::test]
async fn test_video_only_source_has_single_track() {
    let harness = Harness::new(MuxFaults::default());
    let result = harness.trim(&video_only(1280, 720, 30.0, 10.0), 2.0, 5.0).await.unwrap();
    let output = decode(&result);
    assert_eq!(output.track_count(), 1);
    assert_eq!(harness.ledger().audio_writers_opened, 0);
}

// Fatal errors and cleanup

#[tokio::test]
async fn test_invalid_range_rejected_before_opening() {
    let harness = Harness::new(MuxFaults::default());
    let err = harness.trim(&standard_media(), 5.0, 2.0).await.unwrap_err();
    assert!(matches!(err, TrimError::InvalidTimeRange { .. }));
    assert_eq!(harness.ledger().sources_opened, 0);

    let err = harness.trim(&standard_media(), -1.0, 2.0).await.unwrap_err();
    assert!(matches!(err, TrimError::InvalidTimeRange { .. }));
    assert!(err.to_string().contains("start cannot be negative"));

    let err = harness.trim(&standard_media(), f64::NAN, 2.0).await.unwrap_err();
    assert!(err.to_string().contains("bounds must be finite"));
    assert!(!err.to_string().contains("must be less than end"));
}

#[tokio::test]
async fn test_no_video_track_is_fatal_and_releases_source() {
    let media = SyntheticMedia::new().with_audio(SyntheticAudioTrack::new(48_000, 2, 5.0));
    let harness = Harness::new(MuxFaults::default());
    let err = harness.trim(&media, 0.0, 1.0).await.unwrap_err();

    assert!(matches!(err, TrimError::NoVideoTrack));
    assert!(err.is_fatal_input());
    let ledger = harness.ledger();
    assert_eq!(ledger.sources_opened, 1);
    assert!(ledger.is_balanced());
    assert_eq!(ledger.containers_created, 0);

    let last = harness.events().pop().unwrap();
    assert_eq!(last.status, TrimStatus::Error);
    assert_eq!(last.message, "Error: No video tracks found in source video.");
}

#[tokio::test]
async fn test_unreadable_source_is_fatal() {
    let media = standard_media().with_faults(SourceFaults {
        open: true,
        ..SourceFaults::default()
    });
    let harness = Harness::new(MuxFaults::default());
    let err = harness.trim(&media, 0.0, 1.0).await.unwrap_err();
    assert!(matches!(err, TrimError::SourceOpen { .. }));
    assert_eq!(harness.ledger().sources_opened, 0);
}

#[tokio::test]
async fn test_frame_submit_failure_cancels_container() {
    let harness = Harness::new(MuxFaults {
        fail_on_frame: Some(10),
        ..MuxFaults::default()
    });
    let err = harness.trim(&standard_media(), 2.0, 5.0).await.unwrap_err();
    assert!(matches!(
        err,
        TrimError::EncodeMux {
            stage: MuxStage::VideoFrame,
            ..
        }
    ));

    let ledger = harness.ledger();
    assert!(ledger.is_balanced(), "{:?}", ledger);
    assert_eq!(ledger.containers_cancelled, 1);
    assert_eq!(ledger.containers_finalized, 0);
    assert_eq!(ledger.video_writers_aborted, 1);
    assert_eq!(ledger.frames_decoded, 11);

    let events = harness.events();
    let last = events.last().unwrap();
    assert_eq!(last.status, TrimStatus::Error);
    assert!(last.message.starts_with("Error: "));
    let previous = &events[events.len() - 2];
    assert_eq!(last.percent, previous.percent);
}

#[tokio::test]
async fn test_cleanup_failure_does_not_mask_error() {
    let harness = Harness::new(MuxFaults {
        fail_on_frame: Some(0),
        cancel: true,
        ..MuxFaults::default()
    });
    let err = harness.trim(&standard_media(), 2.0, 5.0).await.unwrap_err();
    assert!(matches!(
        err,
        TrimError::EncodeMux {
            stage: MuxStage::VideoFrame,
            ..
        }
    ));
    let ledger = harness.ledger();
    assert_eq!(ledger.containers_cancelled, 0);
    assert_eq!(ledger.containers_created, ledger.containers_released);
}

#[tokio::test]
async fn test_finalize_failure_surfaces_no_output() {
    let harness = Harness::new(MuxFaults {
        finalize: true,
        ..MuxFaults::default()
    });
    let err = harness.trim(&standard_media(), 2.0, 5.0).await.unwrap_err();
    assert!(matches!(
        err,
        TrimError::EncodeMux {
            stage: MuxStage::Finalize,
            ..
        }
    ));
    let ledger = harness.ledger();
    assert_eq!(ledger.containers_cancelled, 1);
    assert!(ledger.is_balanced());
}

#[tokio::test]
async fn test_encoder_setup_failure_releases_container() {
    let harness = Harness::new(MuxFaults {
        video_encoder: true,
        ..MuxFaults::default()
    });
    let err = harness.trim(&standard_media(), 2.0, 5.0).await.unwrap_err();
    assert!(matches!(
        err,
        TrimError::EncodeMux {
            stage: MuxStage::VideoEncoder,
            ..
        }
    ));
    let ledger = harness.ledger();
    assert!(ledger.is_balanced());
    // Never started, so never cancelled
    assert_eq!(ledger.containers_cancelled, 0);
}

#[tokio::test]
async fn test_audio_write_failure_is_fatal() {
    let harness = Harness::new(MuxFaults {
        audio_write: true,
        ..MuxFaults::default()
    });
    let err = harness.trim(&standard_media(), 2.0, 5.0).await.unwrap_err();
    assert!(matches!(
        err,
        TrimError::EncodeMux {
            stage: MuxStage::AudioWrite,
            ..
        }
    ));
    let ledger = harness.ledger();
    assert_eq!(ledger.audio_writers_aborted, 1);
    assert_eq!(ledger.video_writers_aborted, 1);
    assert!(ledger.is_balanced());
}

#[tokio::test]
async fn test_video_decode_failure_is_fatal() {
    let media = standard_media().with_faults(SourceFaults {
        video_decode_after_frames: Some(5),
        ..SourceFaults::default()
    });
    let harness = Harness::new(MuxFaults::default());
    let err = harness.trim(&media, 2.0, 5.0).await.unwrap_err();
    assert!(matches!(err, TrimError::Decode { .. }));
    assert!(harness.ledger().is_balanced());
}

#[tokio::test]
async fn test_window_past_end_of_source() {
    let harness = Harness::new(MuxFaults::default());
    let err = harness
        .trim(&video_only(640, 480, 30.0, 10.0), 20.0, 25.0)
        .await
        .unwrap_err();
    assert!(matches!(err, TrimError::EmptyWindow { .. }));
    let ledger = harness.ledger();
    assert!(ledger.is_balanced());
    assert_eq!(ledger.containers_cancelled, 1);
}

// Auxiliary operations

#[tokio::test]
async fn test_probe_reports_metadata() {
    let media = SyntheticMedia::new()
        .with_video(SyntheticVideoTrack::new(1920, 1080, 30.0, 10.0).with_bitrate(5_000_000.0));
    let harness = Harness::new(MuxFaults::default());
    let report = harness.interactor.probe(media.to_bytes().unwrap()).await.unwrap();

    assert_eq!(report.metadata.width, 1920);
    assert_eq!(report.metadata.height, 1080);
    assert_eq!(report.metadata.bitrate, 5_000_000.0);
    assert!((report.metadata.duration - 10.0).abs() < 1e-9);
    assert!(harness.ledger().is_balanced());
}

#[tokio::test]
async fn test_encoder_support_check() {
    let supported = Harness::new(MuxFaults::default());
    assert!(supported.interactor.check_encoder_support().await);

    let unsupported = Harness::new(MuxFaults {
        unsupported_video: true,
        ..MuxFaults::default()
    });
    assert!(!unsupported.interactor.check_encoder_support().await);
}

#[tokio::test]
async fn test_custom_output_rate() {
    let config = PipelineConfig {
        output_fps: 30,
        ..PipelineConfig::default()
    };
    let harness = Harness::with_config(MuxFaults::default(), config);
    let result = harness.trim(&video_only(640, 480, 30.0, 4.0), 0.0, 2.0).await.unwrap();
    let output = decode(&result);
    assert_eq!(output.frames().len(), 60);
    assert_eq!(output.video.unwrap().options.frame_rate, 30);
}
