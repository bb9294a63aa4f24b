//! Shared counters of synthetic handles opened and released

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Every synthetic resource bumps one counter when acquired and one when released
#[derive(Debug, Default)]
pub struct ResourceLedger {
    sources_opened: AtomicUsize,
    sources_disposed: AtomicUsize,
    frames_decoded: AtomicUsize,
    frames_released: AtomicUsize,
    containers_created: AtomicUsize,
    containers_released: AtomicUsize,
    containers_finalized: AtomicUsize,
    containers_cancelled: AtomicUsize,
    video_writers_opened: AtomicUsize,
    video_writers_released: AtomicUsize,
    video_writers_aborted: AtomicUsize,
    audio_writers_opened: AtomicUsize,
    audio_writers_released: AtomicUsize,
    audio_writers_aborted: AtomicUsize,
}

/// Point-in-time copy of a [`ResourceLedger`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub sources_opened: usize,
    pub sources_disposed: usize,
    pub frames_decoded: usize,
    pub frames_released: usize,
    pub containers_created: usize,
    pub containers_released: usize,
    pub containers_finalized: usize,
    pub containers_cancelled: usize,
    pub video_writers_opened: usize,
    pub video_writers_released: usize,
    pub video_writers_aborted: usize,
    pub audio_writers_opened: usize,
    pub audio_writers_released: usize,
    pub audio_writers_aborted: usize,
}

impl LedgerSnapshot {
    /// Every acquired handle has been released exactly once
    pub fn is_balanced(&self) -> bool {
        self.sources_opened == self.sources_disposed
            && self.frames_decoded == self.frames_released
            && self.containers_created == self.containers_released
            && self.video_writers_opened == self.video_writers_released
            && self.audio_writers_opened == self.audio_writers_released
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

fn read(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            sources_opened: read(&self.sources_opened),
            sources_disposed: read(&self.sources_disposed),
            frames_decoded: read(&self.frames_decoded),
            frames_released: read(&self.frames_released),
            containers_created: read(&self.containers_created),
            containers_released: read(&self.containers_released),
            containers_finalized: read(&self.containers_finalized),
            containers_cancelled: read(&self.containers_cancelled),
            video_writers_opened: read(&self.video_writers_opened),
            video_writers_released: read(&self.video_writers_released),
            video_writers_aborted: read(&self.video_writers_aborted),
            audio_writers_opened: read(&self.audio_writers_opened),
            audio_writers_released: read(&self.audio_writers_released),
            audio_writers_aborted: read(&self.audio_writers_aborted),
        }
    }

    pub(crate) fn source_opened(&self) {
        bump(&self.sources_opened);
    }

    pub(crate) fn source_disposed(&self) {
        bump(&self.sources_disposed);
    }

    pub(crate) fn frame_decoded(&self) {
        bump(&self.frames_decoded);
    }

    pub(crate) fn frame_released(&self) {
        bump(&self.frames_released);
    }

    pub(crate) fn container_created(&self) {
        bump(&self.containers_created);
    }

    pub(crate) fn container_released(&self) {
        bump(&self.containers_released);
    }

    pub(crate) fn container_finalized(&self) {
        bump(&self.containers_finalized);
    }

    pub(crate) fn container_cancelled(&self) {
        bump(&self.containers_cancelled);
    }

    pub(crate) fn video_writer_opened(&self) {
        bump(&self.video_writers_opened);
    }

    pub(crate) fn video_writer_released(&self) {
        bump(&self.video_writers_released);
    }

    pub(crate) fn video_writer_aborted(&self) {
        bump(&self.video_writers_aborted);
    }

    pub(crate) fn audio_writer_opened(&self) {
        bump(&self.audio_writers_opened);
    }

    pub(crate) fn audio_writer_released(&self) {
        bump(&self.audio_writers_released);
    }

    pub(crate) fn audio_writer_aborted(&self) {
        bump(&self.audio_writers_aborted);
    }
}
