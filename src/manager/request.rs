use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use super::LoadCallback;
use crate::buffer::ImageBuffer;
use crate::exec::RequestToken;
use crate::key::CacheKey;
use crate::resize::Transform;

/// Which transform a request applies on a full miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadMode {
    /// Decode at native size; cached under the unsized key.
    AsIs,
    /// Power-of-two downsample covering the requested box.
    Approximate,
    /// Scale and crop the centre to exactly the requested box.
    CenterCrop,
    /// Scale to fit entirely inside the requested box.
    FitCenter,
}

impl LoadMode {
    pub fn is_sized(self) -> bool {
        self != LoadMode::AsIs
    }
}

/// Where a request is in its lifecycle.
///
/// ```text
/// Requested ──► MemoryHit
///     │
///     └──► DiskCheck ──► DiskHit ──┬──► Complete
///                   └──► DiskMiss ─┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Requested,
    MemoryHit,
    DiskCheck,
    DiskHit,
    DiskMiss,
    Complete,
    Failed,
}

/// State carried by one request from job to job.
pub(crate) struct LoadRequest {
    pub key: CacheKey,
    pub token: RequestToken,
    pub source: PathBuf,
    pub mode: LoadMode,
    pub width: u32,
    pub height: u32,
    pub recycled: Option<ImageBuffer>,
    pub callback: Arc<dyn LoadCallback>,
    stage: Stage,
}

impl LoadRequest {
    pub fn new(
        source: PathBuf,
        mode: LoadMode,
        width: u32,
        height: u32,
        token: RequestToken,
        callback: Arc<dyn LoadCallback>,
    ) -> Self {
        let (width, height) = if mode.is_sized() {
            (width, height)
        } else {
            (0, 0)
        };
        let key = CacheKey::for_path(&source, width, height);

        Self {
            key,
            token,
            source,
            mode,
            width,
            height,
            recycled: None,
            callback,
            stage: Stage::Requested,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn advance(&mut self, stage: Stage) {
        trace!(key = %self.key, from = ?self.stage, to = ?stage, "Request stage");
        self.stage = stage;
    }

    /// Whether results may be written into a recycled buffer.
    pub fn wants_recycled(&self) -> bool {
        self.mode.is_sized() && self.width > 0 && self.height > 0
    }

    /// Transform decoding bytes found in the disk cache.
    pub fn decode(&self, bytes: Bytes) -> Transform {
        Transform::Decode {
            bytes,
            mutable: self.wants_recycled(),
        }
    }

    /// Transform producing the result from the source.
    pub fn transform(&self) -> Transform {
        let path = self.source.clone();
        let (width, height) = (self.width, self.height);
        match self.mode {
            LoadMode::AsIs => Transform::AsIs { path },
            LoadMode::Approximate => Transform::Approximate {
                path,
                width,
                height,
            },
            LoadMode::CenterCrop => Transform::CenterCrop {
                path,
                width,
                height,
            },
            LoadMode::FitCenter => Transform::FitInSpace {
                path,
                width,
                height,
            },
        }
    }
}

impl fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRequest")
            .field("key", &self.key)
            .field("source", &self.source)
            .field("mode", &self.mode)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("recycled", &self.recycled.as_ref().map(ImageBuffer::id))
            .field("stage", &self.stage)
            .finish()
    }
}
