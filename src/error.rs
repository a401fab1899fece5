use image::error::ImageFormatHint;
use thiserror::Error;

use crate::buffer::BufferId;

/// I/O errors raised by the disk cache.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Reading a cache entry failed
    #[error("Read error for {path}: {message}")]
    Read { path: String, message: String },

    /// Writing a cache entry failed
    #[error("Write error for {path}: {message}")]
    Write { path: String, message: String },

    /// Encoding a buffer for storage failed
    #[error("Encode error: {message}")]
    Encode { message: String },

    /// Source or cache directory does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IoError {
    pub(crate) fn read(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        IoError::Read {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn write(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        IoError::Write {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors delivered to a single request's failure callback.
///
/// These never abort other in-flight requests.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Source bytes are not a valid image
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Source could not be read
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Source is an image format this build cannot decode
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// The blocking task running the transform panicked or was aborted
    #[error("Worker error: {message}")]
    Worker { message: String },
}

impl From<image::ImageError> for LoadError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => match e.kind() {
                std::io::ErrorKind::NotFound => LoadError::Io(IoError::NotFound(e.to_string())),
                // Truncated or garbled streams surface as I/O errors from some decoders
                std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData => {
                    LoadError::Decode {
                        message: e.to_string(),
                    }
                }
                _ => LoadError::Io(IoError::Read {
                    path: String::from("<source>"),
                    message: e.to_string(),
                }),
            },
            // Bytes that match no known format are not an image at all
            image::ImageError::Unsupported(e) if matches!(e.format_hint(), ImageFormatHint::Unknown) => {
                LoadError::Decode {
                    message: e.to_string(),
                }
            }
            image::ImageError::Unsupported(e) => LoadError::UnsupportedFormat {
                reason: e.to_string(),
            },
            other => LoadError::Decode {
                message: other.to_string(),
            },
        }
    }
}

/// Reference-count bookkeeping errors.
///
/// These indicate an acquire/release imbalance in the caller, not a runtime
/// condition to recover from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// `release` was called on a mutable buffer with no outstanding reference
    #[error("Reference imbalance: buffer {buffer} released without a matching acquire")]
    ReferenceImbalance { buffer: BufferId },
}
