//! Cache key derivation.
//!
//! Every request is identified by a key built from the logical path of the
//! source image and the requested target size:
//!
//! ```text
//! hex(sha256(path)) + "_" + width + "_" + height
//! ```
//!
//! Unconstrained requests use the `_0_0` suffix. The same key addresses the
//! memory cache entry and the disk cache file, so it must be stable across
//! runs and safe to use as a file name.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Key identifying one (path, width, height) combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Derive the key for an unconstrained request.
    pub fn derive(path: &str) -> Self {
        Self::derive_sized(path, 0, 0)
    }

    /// Derive the key for a request with target dimensions.
    pub fn derive_sized(path: &str, width: u32, height: u32) -> Self {
        Self::from_source_bytes(path.as_bytes(), width, height)
    }

    /// Derive the key for a filesystem path.
    ///
    /// Hashes the platform encoding of the path rather than a lossy UTF-8
    /// rendering, so distinct non-UTF-8 paths never share a key. For UTF-8
    /// paths the result equals [`derive_sized`](Self::derive_sized).
    pub fn for_path(path: &Path, width: u32, height: u32) -> Self {
        Self::from_source_bytes(path.as_os_str().as_encoded_bytes(), width, height)
    }

    fn from_source_bytes(source: &[u8], width: u32, height: u32) -> Self {
        let mut key = hash_path(source);
        key.push_str(&size_suffix(width, height));
        Self(key.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reconstruct a key from a previously derived string (e.g. a disk file stem).
    ///
    /// Returns `None` if the string does not have the shape of a derived key.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, '_');
        let hash = parts.next()?;
        let width = parts.next()?;
        let height = parts.next()?;

        let valid_hash = hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid_hash || width.parse::<u32>().is_err() || height.parse::<u32>().is_err() {
            return None;
        }

        Some(Self(s.into()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Suffix appended to the path hash for a given size.
#[inline]
pub fn size_suffix(width: u32, height: u32) -> String {
    format!("_{}_{}", width, height)
}

fn hash_path(path: &[u8]) -> String {
    let digest = Sha256::digest(path);
    hex::encode(digest)
}
