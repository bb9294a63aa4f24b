// Domain rules - Business logic and policies

use crate::config::PipelineConfig;
use crate::domain::model::*;

/// Force a probed dimension onto an even value >= 2.
///
/// Zero falls back to `fallback`. Odd values are decremented, not rounded.
pub fn ensure_even_dimension(value: u32, fallback: u32) -> u32 {
    let value = if value == 0 { fallback } else { value };
    let even = value - (value % 2);
    even.max(2)
}

/// Accept exactly 0/90/180/270 degrees; anything else is treated as upright
pub fn normalize_rotation(degrees: f64) -> Rotation {
    if degrees == 0.0 {
        Rotation::None
    } else if degrees == 90.0 {
        Rotation::Cw90
    } else if degrees == 180.0 {
        Rotation::Cw180
    } else if degrees == 270.0 {
        Rotation::Cw270
    } else {
        Rotation::None
    }
}

/// Pick the display dimension when present and positive, else the coded one
pub fn resolve_dimension(display: Option<u32>, coded: Option<u32>, fallback: u32) -> u32 {
    let candidate = display
        .filter(|d| *d > 0)
        .or(coded)
        .unwrap_or(fallback);
    ensure_even_dimension(candidate, fallback)
}

/// Treat non-finite or negative measurements as unknown (0)
pub fn known_or_zero(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Builds the video encoding profile from probed geometry
pub struct ProfileBuilder<'a> {
    config: &'a PipelineConfig,
}

impl<'a> ProfileBuilder<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Codec level for a frame of `width * height` pixels
    pub fn select_level(&self, width: u32, height: u32) -> CodecLevel {
        let pixels = width as u64 * height as u64;
        if pixels > self.config.baseline_pixel_limit {
            CodecLevel::High51
        } else {
            CodecLevel::Baseline40
        }
    }

    /// `max(default floor, source bitrate)`, floored to an integer >= 1
    pub fn resolve_bitrate(&self, source_bitrate: f64) -> u64 {
        let candidate = (self.config.default_bitrate as f64).max(known_or_zero(source_bitrate));
        (candidate.floor() as u64).max(1)
    }

    pub fn build(&self, width: u32, height: u32, source_bitrate: f64) -> EncodingProfile {
        EncodingProfile {
            codec: VideoCodec::Avc,
            width,
            height,
            bitrate: self.resolve_bitrate(source_bitrate),
            keyframe_interval_secs: self.config.keyframe_interval_secs,
            bitrate_mode: BitrateMode::Variable,
            latency_mode: LatencyMode::Quality,
            level: self.select_level(width, height),
            hardware_acceleration: if self.config.prefer_hardware_acceleration {
                HardwareAcceleration::PreferHardware
            } else {
                HardwareAcceleration::PreferSoftware
            },
            frame_rate: self.config.output_fps,
        }
    }
}

/// Number of samples the trimmed audio must hold: `floor(duration * rate)`
pub fn target_sample_count(window: &TrimWindow, sample_rate: u32) -> usize {
    let samples = (window.duration() * sample_rate as f64).floor();
    if samples.is_finite() && samples > 0.0 {
        samples as usize
    } else {
        0
    }
}

/// What to do with one decoded frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GridDecision {
    /// Encode with this timestamp and duration
    Write { timestamp: f64, duration: f64 },
    /// Slot already written (or behind it); discard
    Drop { slot: i64 },
}

/// Snaps source timestamps onto a fixed-rate output grid starting at zero.
///
/// The first timestamp seen becomes the origin. A frame is written only when
/// its slot is strictly after the last written slot, so a frame that rounds
/// onto an already written slot is dropped instead of being emitted with a
/// repeated timestamp. Sources faster than the grid therefore lose frames
/// (a 120 fps source keeps about every other frame), and written timestamps never collide.
#[derive(Debug, Clone)]
pub struct FrameGrid {
    interval: f64,
    origin: Option<f64>,
    last_slot: i64,
    written: u64,
    dropped: u64,
}

impl FrameGrid {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            interval: 1.0 / frame_rate.max(1) as f64,
            origin: None,
            last_slot: -1,
            written: 0,
            dropped: 0,
        }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn origin(&self) -> Option<f64> {
        self.origin
    }

    /// Timestamp of the last written slot; `-interval` before any write
    pub fn highest_written_timestamp(&self) -> f64 {
        self.last_slot as f64 * self.interval
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn place(&mut self, source_timestamp: f64) -> GridDecision {
        let source_timestamp = if source_timestamp.is_finite() {
            source_timestamp
        } else {
            0.0
        };
        let origin = *self.origin.get_or_insert(source_timestamp);
        let normalized = source_timestamp - origin;
        let slot = (normalized / self.interval).round() as i64;

        if slot <= self.last_slot {
            self.dropped += 1;
            return GridDecision::Drop { slot };
        }

        self.last_slot = slot;
        self.written += 1;
        GridDecision::Write {
            timestamp: slot as f64 * self.interval,
            duration: self.interval,
        }
    }
}
