//! Core trim engine: probe, audio assembly, frame resampling, muxing, progress

pub mod audio;
pub mod mux;
pub mod probe;
pub mod progress;
pub mod resample;
pub mod source;

pub use audio::{AudioTrimAssembler, PreparedAudio};
pub use mux::{MuxOrchestrator, MuxOutcome, MuxSession};
pub use probe::{MetadataProber, ProbeReport};
pub use progress::{
    NoProgress, ProgressCallback, ProgressPhase, ProgressReporter, TrimProgress, TrimStatus,
};
pub use resample::{ResampleStats, VideoFrameResampler};
pub use source::SourceGuard;
