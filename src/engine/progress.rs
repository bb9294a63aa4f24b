//! Progress reporting for the trim pipeline

use serde::{Deserialize, Serialize};

/// Status carried by every progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimStatus {
    Idle,
    Processing,
    Complete,
    Error,
}

/// One progress event delivered to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrimProgress {
    pub status: TrimStatus,
    pub message: String,
    /// 0.0 - 100.0, never decreasing within one run
    pub percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Pipeline phases and the percent band each one owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Probing,
    AudioPreparation,
    VideoFrames,
    Finalizing,
}

impl ProgressPhase {
    pub fn range(&self) -> (f64, f64) {
        match self {
            ProgressPhase::Probing => (0.0, 8.0),
            ProgressPhase::AudioPreparation => (8.0, 15.0),
            ProgressPhase::VideoFrames => (15.0, 85.0),
            ProgressPhase::Finalizing => (85.0, 100.0),
        }
    }

    /// Percent at `fraction` (clamped to 0..=1) of the way through this phase
    pub fn percent_at(&self, fraction: f64) -> f64 {
        let (lo, hi) = self.range();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        lo + (hi - lo) * fraction
    }
}

/// Receiver of progress events
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, progress: &TrimProgress);
}

impl<F> ProgressCallback for F
where
    F: Fn(&TrimProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &TrimProgress) {
        self(progress)
    }
}

/// Discards every event
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_progress(&self, _progress: &TrimProgress) {}
}

/// Per-run reporter enforcing monotonic percentages and a single terminal event
pub struct ProgressReporter<'a> {
    callback: &'a dyn ProgressCallback,
    last_percent: f64,
    finished: bool,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callback: &'a dyn ProgressCallback) -> Self {
        Self {
            callback,
            last_percent: 0.0,
            finished: false,
        }
    }

    pub fn last_percent(&self) -> f64 {
        self.last_percent
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Processing event at `fraction` of `phase`
    pub fn phase(&mut self, phase: ProgressPhase, fraction: f64, message: impl Into<String>) {
        self.processing(phase.percent_at(fraction), message);
    }

    /// Processing event at an absolute percent; lower values are raised to the last one
    pub fn processing(&mut self, percent: f64, message: impl Into<String>) {
        self.emit(TrimStatus::Processing, percent, message.into(), None);
    }

    /// Frame-loop event: `written / estimated_total` of the video band
    pub fn frames(&mut self, written: u64, estimated_total: u64) {
        let fraction = written as f64 / estimated_total.max(1) as f64;
        self.phase(
            ProgressPhase::VideoFrames,
            fraction,
            format!("Processing frames... ({} frames)", written),
        );
    }

    pub fn complete(&mut self, message: impl Into<String>) {
        self.emit(TrimStatus::Complete, 100.0, message.into(), None);
        self.finished = true;
    }

    pub fn error(&mut self, error: &str) {
        let percent = self.last_percent;
        self.emit(
            TrimStatus::Error,
            percent,
            format!("Error: {}", error),
            Some(error.to_string()),
        );
        self.finished = true;
    }

    fn emit(&mut self, status: TrimStatus, percent: f64, message: String, error: Option<String>) {
        if self.finished {
            return;
        }
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            self.last_percent
        };
        self.last_percent = self.last_percent.max(percent);

        let progress = TrimProgress {
            status,
            message,
            percent: self.last_percent,
            error,
        };
        self.callback.on_progress(&progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<TrimProgress>>,
    }

    impl ProgressCallback for Recorder {
        fn on_progress(&self, progress: &TrimProgress) {
            self.events.lock().unwrap().push(progress.clone());
        }
    }

    #[test]
    fn test_phase_bands() {
        assert_eq!(ProgressPhase::Probing.percent_at(0.0), 0.0);
        assert_eq!(ProgressPhase::Probing.percent_at(1.0), 8.0);
        assert_eq!(ProgressPhase::VideoFrames.percent_at(0.5), 50.0);
        assert_eq!(ProgressPhase::VideoFrames.percent_at(3.0), 85.0);
        assert_eq!(ProgressPhase::Finalizing.percent_at(f64::NAN), 85.0);
    }

    #[test]
    fn test_percent_never_decreases() {
        let recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(&recorder);

        reporter.processing(10.0, "a");
        reporter.processing(5.0, "b");
        reporter.frames(50, 100);
        reporter.frames(1000, 100);
        reporter.complete("done");

        let events = recorder.events.lock().unwrap();
        let percents: Vec<f64> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![10.0, 10.0, 50.0, 85.0, 100.0]);
        assert_eq!(events[2].message, "Processing frames... (50 frames)");
        assert_eq!(events.last().unwrap().status, TrimStatus::Complete);
    }

    #[test]
    fn test_single_terminal_event() {
        let recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(&recorder);

        reporter.phase(ProgressPhase::AudioPreparation, 0.5, "audio");
        reporter.error("encoder exploded");
        reporter.complete("late");
        reporter.processing(99.0, "late");

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        let last = &events[1];
        assert_eq!(last.status, TrimStatus::Error);
        assert_eq!(last.message, "Error: encoder exploded");
        assert_eq!(last.error.as_deref(), Some("encoder exploded"));
        assert_eq!(last.percent, 11.5);
        assert!(reporter.is_finished());
    }

    #[test]
    fn test_closure_callback() {
        let seen = Mutex::new(0usize);
        let callback = |_: &TrimProgress| {
            *seen.lock().unwrap() += 1;
        };
        let mut reporter = ProgressReporter::new(&callback);
        reporter.processing(1.0, "one");
        reporter.processing(2.0, "two");
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn test_event_serializes_without_empty_error() {
        let event = TrimProgress {
            status: TrimStatus::Processing,
            message: "Probing video metadata...".to_string(),
            percent: 0.0,
            error: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"status":"processing","message":"Probing video metadata...","percent":0.0}"#
        );
    }
}
