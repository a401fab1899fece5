//! End-to-end tests against the directory-backed disk cache and the real
//! resizer.
//!
//! Tests verify:
//! - Transformed results are written back and survive a new manager
//! - A disk hit decodes to the same pixels as the original transform
//! - Native loads are immutable
//! - Missing and corrupt sources fail with the right error

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use photo_manager::{
    CacheKey, DiskCache, DiskStore, ImageResizer, IoError, LoadError, LocalQueue, ManagerConfig,
    PhotoManager,
};

use super::test_utils::{write_test_image, RecordingCallback, BLUE, RED};

type RealManager = PhotoManager<DiskCache, ImageResizer>;

async fn open_manager(cache_dir: &Path) -> (RealManager, Arc<LocalQueue>) {
    let queue = Arc::new(LocalQueue::new());
    let config = ManagerConfig::with_cache_dir(cache_dir);
    let manager = PhotoManager::open(config, queue.clone()).await.unwrap();
    (manager, queue)
}

fn sized_key(path: &Path, width: u32, height: u32) -> CacheKey {
    CacheKey::derive_sized(&path.to_string_lossy(), width, height)
}

// =============================================================================
// Write-back and Reload
// =============================================================================

#[tokio::test]
async fn test_transform_written_back_and_reloaded() {
    let sources = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let photo = write_test_image(sources.path(), "wide.png", 64, 32);
    let key = sized_key(&photo, 32, 32);

    let (first, queue) = open_manager(cache.path()).await;
    let callback = RecordingCallback::new();
    first.center_crop(&photo, 32, 32, callback.clone());
    queue.run_pending().await;

    let original = callback.completed()[0].clone();
    assert_eq!(original.dimensions(), (32, 32));
    assert!(original.is_mutable());
    assert!(first.disk().contains(&key));
    assert_eq!(first.stats().write_backs, 1);
    drop(first);

    // A fresh manager has an empty memory cache but the same directory
    let (second, queue) = open_manager(cache.path()).await;
    assert!(second.disk().contains(&key));
    assert!(!second.is_cached(&photo, 32, 32));

    let callback = RecordingCallback::new();
    second.center_crop(&photo, 32, 32, callback.clone());
    queue.run_pending().await;

    let reloaded = callback.completed()[0].clone();
    assert_eq!(reloaded.dimensions(), (32, 32));
    assert!(reloaded.is_mutable());
    assert_eq!(reloaded.pixels(), original.pixels());

    let stats = second.stats();
    assert_eq!(stats.disk_hits, 1);
    assert_eq!(stats.transforms, 0);
    assert_eq!(stats.write_backs, 0);
    assert!(second.is_cached(&photo, 32, 32));
}

#[tokio::test]
async fn test_crop_keeps_centre_pixels() {
    let sources = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let photo = write_test_image(sources.path(), "wide.png", 64, 32);

    let (manager, queue) = open_manager(cache.path()).await;
    let callback = RecordingCallback::new();
    manager.center_crop(&photo, 32, 32, callback.clone());
    queue.run_pending().await;

    // The crop straddles the red/blue boundary at the centre
    let buffer = &callback.completed()[0];
    let pixel = |x: u32, y: u32| {
        let offset = ((y * buffer.width() + x) * 4) as usize;
        buffer.pixels()[offset..offset + 4].to_vec()
    };
    assert_eq!(pixel(0, 16), RED.0.to_vec());
    assert_eq!(pixel(31, 16), BLUE.0.to_vec());
}

#[tokio::test]
async fn test_fit_and_approximate_sizes() {
    let sources = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let photo = write_test_image(sources.path(), "wide.png", 64, 32);

    let (manager, queue) = open_manager(cache.path()).await;
    let fit = RecordingCallback::new();
    let approx = RecordingCallback::new();
    manager.fit_center(&photo, 32, 32, fit.clone());
    manager.load_sized(&photo, 16, 16, approx.clone());
    queue.run_pending().await;

    assert_eq!(fit.completed()[0].dimensions(), (32, 16));
    // Halving stops while the result still covers the box
    assert_eq!(approx.completed()[0].dimensions(), (32, 16));
}

// =============================================================================
// Native Loads
// =============================================================================

#[tokio::test]
async fn test_native_load_is_immutable() {
    let sources = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let photo = write_test_image(sources.path(), "native.png", 40, 30);

    let (manager, queue) = open_manager(cache.path()).await;
    let callback = RecordingCallback::new();
    manager.load(&photo, callback.clone());
    queue.run_pending().await;

    let buffer = &callback.completed()[0];
    assert_eq!(buffer.dimensions(), (40, 30));
    assert!(!buffer.is_mutable());
    assert!(manager.is_cached(&photo, 0, 0));
    assert!(manager
        .disk()
        .contains(&CacheKey::derive(&photo.to_string_lossy())));
    assert_eq!(manager.stats().tracked_buffers, 0);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_missing_source_is_not_found() {
    let sources = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let missing = sources.path().join("missing.png");

    let (manager, queue) = open_manager(cache.path()).await;
    let callback = RecordingCallback::new();
    manager.center_crop(&missing, 32, 32, callback.clone());
    queue.run_pending().await;

    let failures = callback.failed();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], LoadError::Io(IoError::NotFound(_))));
    assert!(manager.disk().is_empty());
}

#[tokio::test]
async fn test_corrupt_source_is_decode_error() {
    let sources = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let corrupt = sources.path().join("corrupt.png");
    std::fs::write(&corrupt, b"definitely not a png").unwrap();

    let (manager, queue) = open_manager(cache.path()).await;
    let callback = RecordingCallback::new();
    manager.center_crop(&corrupt, 32, 32, callback.clone());
    queue.run_pending().await;

    let failures = callback.failed();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], LoadError::Decode { .. }));
    assert!(!manager.is_cached(&corrupt, 32, 32));
    assert!(manager.disk().is_empty());
}

#[tokio::test]
async fn test_garbage_disk_entry_fails_request() {
    let sources = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let photo = write_test_image(sources.path(), "photo.png", 64, 64);
    let key = sized_key(&photo, 32, 32);

    // Seed a valid entry, then corrupt the file behind the index
    let (manager, queue) = open_manager(cache.path()).await;
    let callback = RecordingCallback::new();
    manager.center_crop(&photo, 32, 32, callback.clone());
    queue.run_pending().await;
    drop(manager);

    let entry = std::fs::read_dir(cache.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.to_string_lossy().contains(key.as_str()))
        .unwrap();
    std::fs::write(&entry, b"garbage").unwrap();

    let (manager, queue) = open_manager(cache.path()).await;
    assert!(manager.disk().get(&key).await.unwrap().is_some());

    let callback = RecordingCallback::new();
    manager.center_crop(&photo, 32, 32, callback.clone());
    queue.run_pending().await;

    assert_eq!(callback.failed_count(), 1);
    assert!(matches!(callback.failed()[0], LoadError::Decode { .. }));
}
