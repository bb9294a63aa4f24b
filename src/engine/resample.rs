//! Video frame resampler: retime decoded frames onto the output grid and encode them

use tracing::{debug, trace};

use crate::config::PipelineConfig;
use crate::domain::model::TrimWindow;
use crate::domain::rules::{FrameGrid, GridDecision};
use crate::engine::progress::ProgressReporter;
use crate::error::{MuxStage, TrimError, TrimResult};
use crate::ports::{VideoFrameStream, VideoTrackWriter};

/// Counters from one resampling pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResampleStats {
    pub frames_written: u64,
    pub frames_dropped: u64,
    /// Timestamp of the last written frame
    pub last_timestamp: Option<f64>,
    pub frame_interval: f64,
}

impl ResampleStats {
    /// End of the last written frame
    pub fn output_duration(&self) -> f64 {
        self.last_timestamp
            .map_or(0.0, |last| last + self.frame_interval)
    }
}

pub struct VideoFrameResampler<'a> {
    config: &'a PipelineConfig,
}

impl<'a> VideoFrameResampler<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Frames the window should produce at the output rate, at least 1
    pub fn estimated_frames(&self, window: &TrimWindow) -> u64 {
        let estimate = (window.duration() * self.config.output_fps as f64).round();
        if estimate.is_finite() && estimate >= 1.0 {
            estimate as u64
        } else {
            1
        }
    }

    /// Stream frames one at a time; each frame is released right after it is
    /// submitted or discarded.
    pub async fn resample_and_encode(
        &self,
        frames: &mut dyn VideoFrameStream,
        writer: &mut dyn VideoTrackWriter,
        window: &TrimWindow,
        reporter: &mut ProgressReporter<'_>,
    ) -> TrimResult<ResampleStats> {
        let mut grid = FrameGrid::new(self.config.output_fps);
        let estimated = self.estimated_frames(window);
        let report_every = self.config.progress_frame_interval.max(1);
        let mut last_timestamp = None;

        while let Some(mut frame) = frames
            .next_frame()
            .await
            .map_err(|e| TrimError::Decode {
                message: e.to_string(),
            })?
        {
            match grid.place(frame.timestamp()) {
                GridDecision::Drop { slot } => {
                    trace!(source_timestamp = frame.timestamp(), slot, "Dropping duplicate-grid frame");
                    frame.close();
                }
                GridDecision::Write {
                    timestamp,
                    duration,
                } => {
                    frame.set_timestamp(timestamp);
                    frame.set_duration(duration);
                    let submitted = writer.add_frame(&frame).await;
                    frame.close();
                    submitted.map_err(|e| TrimError::mux(MuxStage::VideoFrame, e))?;

                    last_timestamp = Some(timestamp);
                    if grid.written() % report_every == 0 {
                        reporter.frames(grid.written(), estimated);
                    }
                }
            }
        }

        let stats = ResampleStats {
            frames_written: grid.written(),
            frames_dropped: grid.dropped(),
            last_timestamp,
            frame_interval: grid.interval(),
        };
        debug!(
            frames_written = stats.frames_written,
            frames_dropped = stats.frames_dropped,
            output_duration = stats.output_duration(),
            "Video resampling finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimated_frames_rounds_window() {
        let config = PipelineConfig::default();
        let resampler = VideoFrameResampler::new(&config);

        assert_eq!(resampler.estimated_frames(&TrimWindow::new(2.0, 5.0).unwrap()), 180);
        assert_eq!(resampler.estimated_frames(&TrimWindow::new(0.0, 0.0125).unwrap()), 1);
        assert_eq!(resampler.estimated_frames(&TrimWindow::new(0.0, 0.001).unwrap()), 1);
    }

    #[test]
    fn test_output_duration_covers_last_frame() {
        let stats = ResampleStats {
            frames_written: 3,
            frames_dropped: 0,
            last_timestamp: Some(2.0 / 60.0),
            frame_interval: 1.0 / 60.0,
        };
        assert!((stats.output_duration() - 0.05).abs() < 1e-12);
        assert_eq!(ResampleStats::default().output_duration(), 0.0);
    }
}
