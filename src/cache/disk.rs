//! Disk-backed cache of encoded buffers.
//!
//! Entries are stored as PNG files named `<key>.img` in a single directory.
//! An in-memory LRU index tracks file sizes and access order so capacity can
//! be enforced without scanning the directory on every write. The index is
//! rebuilt from file modification times when the cache is opened.
//!
//! Writes go to a temporary file first and are renamed into place, so a
//! crash mid-write never leaves a truncated entry under a valid name. Every
//! write gets its own temporary name, so concurrent writes of one key never
//! share a file and the last rename wins.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use image::ImageEncoder;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::buffer::ImageBuffer;
use crate::error::IoError;
use crate::key::CacheKey;

/// Default disk cache capacity: 256MB
pub const DEFAULT_DISK_CACHE_CAPACITY: u64 = 256 * 1024 * 1024;

const ENTRY_EXTENSION: &str = "img";
const TEMP_EXTENSION: &str = "tmp";

// =============================================================================
// DiskStore Trait
// =============================================================================

/// Persistent key to bytes store consulted by the manager.
///
/// A miss is `Ok(None)`; `Err` is reserved for I/O failures, which the
/// manager treats as a miss on read and logs on write.
#[async_trait]
pub trait DiskStore: Send + Sync + 'static {
    /// Fetch the encoded bytes stored under `key`.
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, IoError>;

    /// Encode `buffer` and store it under `key`.
    async fn put(&self, key: &CacheKey, buffer: &ImageBuffer) -> Result<(), IoError>;
}

// =============================================================================
// Disk Cache
// =============================================================================

struct Index {
    entries: LruCache<CacheKey, u64>,
    current_size: u64,
}

/// Directory-backed LRU cache with a byte capacity.
pub struct DiskCache {
    dir: PathBuf,
    max_size: u64,
    index: Mutex<Index>,
    next_temp: AtomicU64,
}

impl DiskCache {
    /// Open (or create) a cache in `dir` holding at most `max_size` bytes.
    ///
    /// Existing entries are indexed oldest first by modification time and
    /// the cache is trimmed to capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or listed.
    pub async fn open(dir: impl Into<PathBuf>, max_size: u64) -> Result<Self, IoError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| IoError::write(dir.display(), e))?;

        let mut found: Vec<(CacheKey, SystemTime, u64)> = Vec::new();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| IoError::read(dir.display(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| IoError::read(dir.display(), e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == TEMP_EXTENSION) {
                let _ = fs::remove_file(&path).await;
                continue;
            }
            let Some(key) = entry_key(&path) else {
                continue;
            };
            if let Ok(meta) = entry.metadata().await {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                found.push((key, modified, meta.len()));
            }
        }

        found.sort_by_key(|(_, modified, _)| *modified);

        let mut index = Index {
            entries: LruCache::unbounded(),
            current_size: 0,
        };
        for (key, _, size) in found {
            index.current_size += size;
            index.entries.put(key, size);
        }

        debug!(
            dir = %dir.display(),
            entries = index.entries.len(),
            size = index.current_size,
            "Opened disk cache"
        );

        let cache = Self {
            dir,
            max_size,
            index: Mutex::new(index),
            next_temp: AtomicU64::new(0),
        };
        cache.trim().await;

        Ok(cache)
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key, ENTRY_EXTENSION))
    }

    /// A temporary path no other write in this process is using.
    fn temp_path(&self, key: &CacheKey) -> PathBuf {
        let seq = self.next_temp.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}.{}-{}.{}",
            key,
            std::process::id(),
            seq,
            TEMP_EXTENSION
        ))
    }

    /// Remove an entry.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        if !self.forget(key) {
            return false;
        }

        let path = self.entry_path(key);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to remove disk cache entry");
            }
        }
        true
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        let keys: Vec<CacheKey> = {
            let mut index = self.index.lock();
            let keys = index.entries.iter().map(|(k, _)| k.clone()).collect();
            index.entries.clear();
            index.current_size = 0;
            keys
        };

        for key in keys {
            let _ = fs::remove_file(self.entry_path(&key)).await;
        }
        debug!(dir = %self.dir.display(), "Cleared disk cache");
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.lock().entries.contains(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current total size of cached files in bytes.
    pub fn size(&self) -> u64 {
        self.index.lock().current_size
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.max_size
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete least-recently-used files until within capacity.
    async fn trim(&self) {
        loop {
            let victim = {
                let mut index = self.index.lock();
                if index.current_size <= self.max_size {
                    break;
                }
                match index.entries.pop_lru() {
                    Some((key, size)) => {
                        index.current_size -= size;
                        (key, size)
                    }
                    None => break,
                }
            };

            let (key, size) = victim;
            match fs::remove_file(self.entry_path(&key)).await {
                Ok(()) => debug!(key = %key, size, "Evicted from disk cache"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to evict disk cache entry"),
            }
        }
    }

    fn forget(&self, key: &CacheKey) -> bool {
        let mut index = self.index.lock();
        match index.entries.pop(key) {
            Some(size) => {
                index.current_size -= size;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl DiskStore for DiskCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, IoError> {
        let path = self.entry_path(key);
        match fs::read(&path).await {
            Ok(data) => {
                let size = data.len() as u64;
                let mut index = self.index.lock();
                match index.entries.get_mut(key) {
                    Some(recorded) => {
                        let old = std::mem::replace(recorded, size);
                        index.current_size = index.current_size - old + size;
                    }
                    None => {
                        index.entries.put(key.clone(), size);
                        index.current_size += size;
                    }
                }
                trace!(key = %key, size, "Disk cache hit");
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.forget(key);
                trace!(key = %key, "Disk cache miss");
                Ok(None)
            }
            Err(e) => Err(IoError::read(path.display(), e)),
        }
    }

    async fn put(&self, key: &CacheKey, buffer: &ImageBuffer) -> Result<(), IoError> {
        let owned = buffer.clone();
        let encoded = tokio::task::spawn_blocking(move || encode_png(&owned))
            .await
            .map_err(|e| IoError::Encode {
                message: e.to_string(),
            })??;

        let size = encoded.len() as u64;
        if size > self.max_size {
            debug!(key = %key, size, "Entry larger than disk cache, not writing");
            return Ok(());
        }

        let path = self.entry_path(key);
        let temp = self.temp_path(key);
        fs::write(&temp, &encoded)
            .await
            .map_err(|e| IoError::write(temp.display(), e))?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(IoError::write(path.display(), e));
        }

        {
            let mut index = self.index.lock();
            if let Some(old) = index.entries.put(key.clone(), size) {
                index.current_size -= old;
            }
            index.current_size += size;
        }
        debug!(key = %key, size, "Stored buffer in disk cache");

        self.trim().await;
        Ok(())
    }
}

/// Encode an RGBA8 buffer as PNG.
pub fn encode_png(buffer: &ImageBuffer) -> Result<Vec<u8>, IoError> {
    let mut out = Cursor::new(Vec::new());
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(
            buffer.pixels(),
            buffer.width(),
            buffer.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| IoError::Encode {
            message: e.to_string(),
        })?;
    Ok(out.into_inner())
}

fn entry_key(path: &Path) -> Option<CacheKey> {
    if path.extension()? != ENTRY_EXTENSION {
        return None;
    }
    CacheKey::parse(path.file_stem()?.to_str()?)
}

// =============================================================================
// Tests
// =============================================================================
