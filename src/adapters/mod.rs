// Adapters - External system implementations

pub mod synthetic;

#[cfg(feature = "libav")]
pub mod libav;

// Re-export adapters
pub use synthetic::{ResourceLedger, SyntheticDemuxer, SyntheticMedia, SyntheticMuxer, SyntheticOutput};

#[cfg(feature = "libav")]
pub use libav::{LibavDemuxer, LibavMuxer};
