use std::sync::Arc;

use crate::adapters::{SyntheticDemuxer, SyntheticMuxer};
use crate::app::trim_interactor::TrimInteractor;
use crate::config::PipelineConfig;
use crate::error::TrimResult;
use crate::ports::{DemuxPort, MuxPort};

pub trait AppContainer: Send + Sync {
    fn trim_interactor(&self) -> Arc<TrimInteractor>;
}

pub struct DefaultAppContainer {
    trim_interactor: Arc<TrimInteractor>,
}

impl DefaultAppContainer {
    /// Wire the interactor over explicit ports
    pub fn with_ports(
        demuxer: Arc<dyn DemuxPort>,
        muxer: Arc<dyn MuxPort>,
        config: PipelineConfig,
    ) -> TrimResult<Self> {
        let trim_interactor = Arc::new(TrimInteractor::with_config(demuxer, muxer, config)?);
        Ok(Self { trim_interactor })
    }

    /// In-memory adapters reading and writing JSON media descriptions
    pub fn synthetic(config: PipelineConfig) -> TrimResult<Self> {
        let demuxer = Arc::new(SyntheticDemuxer::new());
        let muxer = Arc::new(SyntheticMuxer::new());
        Self::with_ports(
            demuxer as Arc<dyn DemuxPort>,
            muxer as Arc<dyn MuxPort>,
            config,
        )
    }

    /// FFmpeg-backed adapters
    #[cfg(feature = "libav")]
    pub fn libav(config: PipelineConfig) -> TrimResult<Self> {
        use crate::adapters::{LibavDemuxer, LibavMuxer};
        use crate::error::TrimError;

        let backend = |e: crate::domain::errors::DomainError| TrimError::Backend { message: e.to_string() };
        let demuxer = Arc::new(LibavDemuxer::new().map_err(backend)?);
        let muxer = Arc::new(LibavMuxer::new().map_err(backend)?);
        Self::with_ports(
            demuxer as Arc<dyn DemuxPort>,
            muxer as Arc<dyn MuxPort>,
            config,
        )
    }
}

impl AppContainer for DefaultAppContainer {
    fn trim_interactor(&self) -> Arc<TrimInteractor> {
        Arc::clone(&self.trim_interactor)
    }
}
