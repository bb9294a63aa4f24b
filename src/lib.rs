//! Trim-and-re-encode pipeline
//!
//! Cuts a `[start, end)` window out of a video container, snaps the decoded
//! frames onto a fixed frame-rate grid, re-encodes them to H.264 and muxes
//! them with the window's audio into a new MP4. Container and codec work
//! sits behind the traits in [`ports`]; [`adapters`] provides an in-memory
//! implementation and, with the `libav` feature, an FFmpeg-backed one.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ports;
pub mod utils;

// Re-export commonly used types
pub use app::{TrimInteractor, TrimSummary, TrimmedMedia};
pub use domain::errors::DomainError;
pub use error::{TrimError, TrimResult};
