//! Decode and resize pipeline.
//!
//! A [`Transform`] describes one unit of CPU work as a plain value. Nothing
//! happens until a [`Resizer`] runs it, which the manager does from a
//! background job on the blocking thread pool.
//!
//! # Recycled Buffers
//!
//! Every run may be handed a recycled buffer. When the produced image has
//! exactly the recycled buffer's dimensions, the pixels are written into it
//! and that same buffer is returned. Otherwise the recycled buffer comes back
//! untouched in [`TransformOutput::unused`] so the caller can return it to
//! the pool.

mod resizer;

use std::path::PathBuf;

use bytes::Bytes;

use crate::buffer::ImageBuffer;
use crate::error::LoadError;

pub use resizer::{approximate_size, fit_size, ImageResizer};

/// A deferred decode or resize operation.
#[derive(Debug, Clone)]
pub enum Transform {
    /// Decode the source at its native size.
    AsIs { path: PathBuf },

    /// Decode bytes that were already fetched, e.g. from the disk cache.
    Decode { bytes: Bytes, mutable: bool },

    /// Downsample by a power of two to the smallest size still covering
    /// `width` x `height`, preserving aspect ratio.
    Approximate {
        path: PathBuf,
        width: u32,
        height: u32,
    },

    /// Scale so the image covers the box, then crop the centre to exactly
    /// `width` x `height`.
    CenterCrop {
        path: PathBuf,
        width: u32,
        height: u32,
    },

    /// Scale preserving aspect ratio so the whole image fits in the box.
    FitInSpace {
        path: PathBuf,
        width: u32,
        height: u32,
    },
}

impl Transform {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Transform::AsIs { .. } => "as_is",
            Transform::Decode { .. } => "decode",
            Transform::Approximate { .. } => "approximate",
            Transform::CenterCrop { .. } => "center_crop",
            Transform::FitInSpace { .. } => "fit_in_space",
        }
    }

    /// Whether the produced buffer is mutable and therefore recyclable.
    ///
    /// Sized transforms produce mutable buffers; unconstrained loads produce
    /// immutable ones. A degenerate box with a zero side counts as
    /// unconstrained.
    pub fn produces_mutable(&self) -> bool {
        match self {
            Transform::AsIs { .. } => false,
            Transform::Decode { mutable, .. } => *mutable,
            Transform::Approximate { width, height, .. }
            | Transform::CenterCrop { width, height, .. }
            | Transform::FitInSpace { width, height, .. } => *width > 0 && *height > 0,
        }
    }
}

/// Result of running a [`Transform`].
#[derive(Debug)]
pub struct TransformOutput {
    /// The produced buffer or the reason the transform failed
    pub result: Result<ImageBuffer, LoadError>,

    /// The recycled buffer supplied to the run, if it was not consumed
    pub unused: Option<ImageBuffer>,
}

impl TransformOutput {
    pub fn success(buffer: ImageBuffer, unused: Option<ImageBuffer>) -> Self {
        Self {
            result: Ok(buffer),
            unused,
        }
    }

    pub fn failure(error: LoadError, unused: Option<ImageBuffer>) -> Self {
        Self {
            result: Err(error),
            unused,
        }
    }
}

/// Executes transforms.
///
/// Implementations run synchronously and may block; callers move them onto
/// a blocking thread.
pub trait Resizer: Send + Sync + 'static {
    /// Run `transform`, writing into `recycled` when the output dimensions
    /// match it.
    fn run(&self, transform: Transform, recycled: Option<ImageBuffer>) -> TransformOutput;
}
