// Synthetic adapters - Deterministic in-memory demuxer and muxer
//
// Source bytes are JSON `SyntheticMedia`; finalized output bytes are JSON
// `SyntheticOutput`. Both sides report into a shared `ResourceLedger`.

pub mod ledger;
pub mod sink;
pub mod source;

pub use ledger::{LedgerSnapshot, ResourceLedger};
pub use sink::{
    AudioTrackRecord, FrameRecord, MuxFaults, SyntheticMuxer, SyntheticOutput, VideoTrackRecord,
    WriteEvent,
};
pub use source::{
    SourceFaults, SyntheticAudioTrack, SyntheticDemuxer, SyntheticFrameHandle, SyntheticMedia,
    SyntheticVideoTrack,
};
