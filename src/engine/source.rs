//! Scoped ownership of an opened source container

use std::ops::{Deref, DerefMut};

use tracing::debug;

use crate::error::{TrimError, TrimResult};
use crate::ports::{DemuxPort, MediaSource, SourceBytes};

/// Disposes the wrapped source exactly once, on whichever path drops it
pub struct SourceGuard {
    source: Box<dyn MediaSource>,
    disposed: bool,
}

impl SourceGuard {
    pub async fn open(demuxer: &dyn DemuxPort, bytes: SourceBytes) -> TrimResult<Self> {
        let source = demuxer
            .open(bytes)
            .await
            .map_err(|e| TrimError::SourceOpen {
                message: e.to_string(),
            })?;
        Ok(Self::new(source))
    }

    pub fn new(source: Box<dyn MediaSource>) -> Self {
        Self {
            source,
            disposed: false,
        }
    }

    /// Dispose now instead of at drop
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.source.dispose();
            debug!("Source handle disposed");
        }
    }
}

impl Deref for SourceGuard {
    type Target = dyn MediaSource;

    fn deref(&self) -> &Self::Target {
        self.source.as_ref()
    }
}

impl DerefMut for SourceGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.source.as_mut()
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.release();
    }
}
