//! Request coordination integration tests.
//!
//! Tests verify:
//! - Full miss transforms, caches and writes back
//! - Memory hits are delivered synchronously without scheduling work
//! - Evicted buffers are recycled for later requests of the same size
//! - Cancellation drops queued work without a callback
//! - Failures reach the callback and leave caches untouched

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use photo_manager::{callback_fn, CacheKey, ImageBuffer, LoadError};

use super::test_utils::{
    create_manager, create_manager_with, seed_recycled, MockDisk, RecordingCallback, BUFFER_100,
};

const PHOTO: &str = "/photos/beach.jpg";

// =============================================================================
// Miss → Transform → Cache (Scenario A)
// =============================================================================

#[tokio::test]
async fn test_full_miss_transforms_caches_and_writes_back() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let callback = RecordingCallback::new();

    manager.center_crop(PHOTO, 100, 100, callback.clone());

    // Only the disk lookup is queued so far
    assert_eq!(queue.len(), 1);
    assert_eq!(callback.total(), 0);

    queue.run_pending().await;

    let delivered = callback.completed();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].dimensions(), (100, 100));
    assert!(manager.is_cached(PHOTO, 100, 100));

    let key = CacheKey::derive_sized(PHOTO, 100, 100);
    assert_eq!(manager.disk().get_count(), 1);
    assert_eq!(manager.disk().puts(), vec![key.clone()]);
    assert!(manager.disk().contains(&key));
    assert_eq!(manager.resizer().runs(), vec!["center_crop"]);

    let stats = manager.stats();
    assert_eq!(stats.transforms, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.write_backs, 1);
    assert_eq!(stats.tracked_buffers, 1);
}

#[tokio::test]
async fn test_unsized_load_uses_disk_cache() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let callback = RecordingCallback::new();

    manager.load(PHOTO, callback.clone());
    queue.run_pending().await;

    let buffer = &callback.completed()[0];
    assert!(!buffer.is_mutable());
    assert!(manager.is_cached(PHOTO, 0, 0));
    assert_eq!(manager.disk().puts(), vec![CacheKey::derive(PHOTO)]);

    // Immutable buffers are never counted
    assert_eq!(manager.stats().tracked_buffers, 0);
}

// =============================================================================
// Memory Hit (Scenario B)
// =============================================================================

#[tokio::test]
async fn test_memory_hit_is_synchronous() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let callback = RecordingCallback::new();

    manager.center_crop(PHOTO, 100, 100, callback.clone());
    queue.run_pending().await;
    let first = callback.completed()[0].clone();

    manager.center_crop(PHOTO, 100, 100, callback.clone());

    // Delivered before the call returned, nothing scheduled
    assert_eq!(callback.completed_count(), 2);
    assert!(queue.is_empty());
    assert!(callback.completed()[1].same_buffer(&first));
    assert_eq!(manager.disk().get_count(), 1);
    assert_eq!(manager.resizer().run_count(), 1);
    assert_eq!(manager.stats().memory_hits, 1);
}

#[tokio::test]
async fn test_different_sizes_are_different_entries() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let callback = RecordingCallback::new();

    manager.center_crop(PHOTO, 100, 100, callback.clone());
    manager.center_crop(PHOTO, 50, 50, callback.clone());
    queue.run_pending().await;

    assert!(manager.is_cached(PHOTO, 100, 100));
    assert!(manager.is_cached(PHOTO, 50, 50));
    assert_eq!(manager.resizer().run_count(), 2);
}

// =============================================================================
// Disk Hit
// =============================================================================

#[tokio::test]
async fn test_disk_hit_decodes_without_write_back() {
    let key = CacheKey::derive_sized(PHOTO, 100, 100);
    let disk = MockDisk::new().with_entry(key.clone(), &ImageBuffer::new(100, 100));
    let (manager, queue) = create_manager_with(disk, BUFFER_100 * 4);
    let callback = RecordingCallback::new();

    manager.center_crop(PHOTO, 100, 100, callback.clone());
    queue.run_pending().await;

    assert_eq!(callback.completed()[0].dimensions(), (100, 100));
    assert_eq!(manager.resizer().runs(), vec!["decode"]);
    assert!(manager.disk().puts().is_empty());
    assert!(manager.is_cached(PHOTO, 100, 100));
    assert_eq!(manager.stats().disk_hits, 1);
}

#[tokio::test]
async fn test_disk_hit_decodes_into_recycled_buffer() {
    let key = CacheKey::derive_sized(PHOTO, 100, 100);
    let disk = MockDisk::new().with_entry(key, &ImageBuffer::new(100, 100));
    let (manager, queue) = create_manager_with(disk, BUFFER_100 * 4);
    let seed = seed_recycled(&manager, 100, 100);
    let callback = RecordingCallback::new();

    manager.center_crop(PHOTO, 100, 100, callback.clone());
    queue.run_pending().await;

    assert_eq!(callback.completed()[0].id(), seed);
    assert_eq!(manager.stats().recycled_reused, 1);
}

#[tokio::test]
async fn test_disk_read_error_is_a_miss() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    manager.disk().set_fail_reads(true);
    let callback = RecordingCallback::new();

    manager.fit_center(PHOTO, 100, 100, callback.clone());
    queue.run_pending().await;

    assert_eq!(callback.completed_count(), 1);
    assert_eq!(callback.failed_count(), 0);
    assert_eq!(manager.resizer().runs(), vec!["fit_in_space"]);
}

#[tokio::test]
async fn test_write_back_failure_is_counted_not_delivered() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    manager.disk().set_fail_writes(true);
    let callback = RecordingCallback::new();

    manager.load_sized(PHOTO, 100, 100, callback.clone());
    queue.run_pending().await;

    assert_eq!(callback.completed_count(), 1);
    assert_eq!(callback.failed_count(), 0);
    let stats = manager.stats();
    assert_eq!(stats.write_backs, 0);
    assert_eq!(stats.write_back_failures, 1);
}

// =============================================================================
// Eviction and Recycling (Scenario C)
// =============================================================================

#[tokio::test]
async fn test_evicted_buffer_is_recycled() {
    // Room for exactly one 100x100 buffer
    let (manager, queue) = create_manager(BUFFER_100);
    let callback = RecordingCallback::new();

    manager.center_crop("/photos/a.jpg", 100, 100, callback.clone());
    queue.run_pending().await;
    let first_id = callback.completed()[0].id();

    manager.center_crop("/photos/b.jpg", 100, 100, callback.clone());
    queue.run_pending().await;

    assert!(!manager.is_cached("/photos/a.jpg", 100, 100));
    assert!(manager.is_cached("/photos/b.jpg", 100, 100));
    assert_eq!(manager.stats().pooled_buffers, 1);

    // The callback still holds a handle, so the buffer must not be reissued
    assert!(manager.take_recycled(100, 100).is_none());

    callback.forget_buffers();
    let recycled = manager.take_recycled(100, 100).unwrap();
    assert_eq!(recycled.id(), first_id);
    assert!(manager.take_recycled(100, 100).is_none());
}

#[tokio::test]
async fn test_recycled_buffer_reused_by_next_request() {
    let (manager, queue) = create_manager(BUFFER_100);
    let callback = RecordingCallback::new();

    manager.center_crop("/photos/a.jpg", 100, 100, callback.clone());
    queue.run_pending().await;
    let first_id = callback.completed()[0].id();
    callback.forget_buffers();

    // Evicts a.jpg into the pool
    manager.center_crop("/photos/b.jpg", 100, 100, callback.clone());
    queue.run_pending().await;
    callback.forget_buffers();

    // c.jpg takes a.jpg's buffer at request time
    manager.center_crop("/photos/c.jpg", 100, 100, callback.clone());
    queue.run_pending().await;

    assert_eq!(callback.completed()[0].id(), first_id);
    assert_eq!(manager.stats().recycled_reused, 1);
}

#[tokio::test]
async fn test_caller_acquire_keeps_buffer_out_of_pool() {
    let (manager, queue) = create_manager(BUFFER_100);
    let callback = RecordingCallback::new();

    manager.center_crop("/photos/a.jpg", 100, 100, callback.clone());
    queue.run_pending().await;
    let kept = callback.completed()[0].clone();
    manager.acquire(&kept);

    manager.center_crop("/photos/b.jpg", 100, 100, callback.clone());
    queue.run_pending().await;

    // Evicted from memory but still referenced by the caller
    assert!(!manager.is_cached("/photos/a.jpg", 100, 100));
    assert_eq!(manager.stats().pooled_buffers, 0);

    manager.release(kept).unwrap();
    assert_eq!(manager.stats().pooled_buffers, 1);
}

#[tokio::test]
async fn test_unused_recycled_buffer_returns_to_pool() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let seed = seed_recycled(&manager, 100, 100);
    let callback = RecordingCallback::new();

    // Fit yields 100x50, so the 100x100 buffer is not consumed
    manager.fit_center(PHOTO, 100, 100, callback.clone());
    assert_eq!(manager.stats().pooled_buffers, 0);
    queue.run_pending().await;

    assert_eq!(callback.completed()[0].dimensions(), (100, 50));
    assert_eq!(manager.take_recycled(100, 100).map(|b| b.id()), Some(seed));
}

#[tokio::test]
async fn test_evict_and_clear_release_references() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let callback = RecordingCallback::new();

    manager.center_crop("/photos/a.jpg", 100, 100, callback.clone());
    manager.center_crop("/photos/b.jpg", 100, 100, callback.clone());
    manager.center_crop("/photos/c.jpg", 50, 50, callback.clone());
    queue.run_pending().await;
    callback.forget_buffers();
    assert_eq!(manager.stats().tracked_buffers, 3);

    assert!(manager.evict("/photos/a.jpg", 100, 100));
    assert!(!manager.evict("/photos/a.jpg", 100, 100));
    assert_eq!(manager.stats().pooled_buffers, 1);

    manager.clear_memory();
    let stats = manager.stats();
    assert_eq!(stats.memory_entries, 0);
    assert_eq!(stats.tracked_buffers, 0);
    assert_eq!(stats.pooled_buffers, 3);
}

// =============================================================================
// Cancellation (Scenario D)
// =============================================================================

#[tokio::test]
async fn test_cancel_before_start() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let callback = RecordingCallback::new();

    let token = manager.center_crop(PHOTO, 100, 100, callback.clone());
    manager.cancel(token);

    assert_eq!(queue.run_pending().await, 0);
    assert_eq!(callback.total(), 0);
    assert_eq!(manager.disk().get_count(), 0);
    assert_eq!(manager.resizer().run_count(), 0);
    assert!(!manager.is_cached(PHOTO, 100, 100));
}

#[tokio::test]
async fn test_cancel_between_stages() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let callback = RecordingCallback::new();

    let token = manager.center_crop(PHOTO, 100, 100, callback.clone());

    // Disk lookup runs and queues the transform
    assert!(queue.run_next().await);
    assert_eq!(queue.pending_for(token), 1);

    manager.cancel(token);
    queue.run_pending().await;

    assert_eq!(manager.disk().get_count(), 1);
    assert_eq!(manager.resizer().run_count(), 0);
    assert_eq!(callback.total(), 0);
}

#[tokio::test]
async fn test_cancel_only_affects_its_callback() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let cancelled = RecordingCallback::new();
    let kept = RecordingCallback::new();

    // Same callback object, same token
    let a = manager.center_crop("/photos/a.jpg", 100, 100, cancelled.clone());
    let b = manager.center_crop("/photos/b.jpg", 100, 100, cancelled.clone());
    assert_eq!(a, b);

    manager.center_crop("/photos/c.jpg", 100, 100, kept.clone());
    manager.cancel(a);
    queue.run_pending().await;

    assert_eq!(cancelled.total(), 0);
    assert_eq!(kept.completed_count(), 1);
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let callback = RecordingCallback::new();

    let token = manager.center_crop(PHOTO, 100, 100, callback.clone());
    queue.run_pending().await;

    manager.cancel(token);
    manager.cancel(token);

    assert_eq!(callback.completed_count(), 1);
    assert!(manager.is_cached(PHOTO, 100, 100));
}

#[tokio::test]
async fn test_stale_token_does_not_cancel_new_requests() {
    let (manager, queue) = create_manager(BUFFER_100 * 64);

    // Dropping each callback frees its allocation, which the next callback
    // is likely to reuse
    let mut old_token = None;
    for round in 0..20 {
        let callback = RecordingCallback::new();
        let token = manager.center_crop(format!("/photos/{round}.jpg"), 100, 100, callback.clone());
        assert_ne!(Some(token), old_token);

        if let Some(stale) = old_token {
            manager.cancel(stale);
        }
        queue.run_pending().await;
        assert_eq!(callback.completed_count(), 1, "round {round}");

        old_token = Some(token);
    }
}

// =============================================================================
// Failures (Scenario E)
// =============================================================================

#[tokio::test]
async fn test_corrupt_source_fails_without_cache_mutation() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let seed = seed_recycled(&manager, 100, 100);
    let callback = RecordingCallback::new();

    manager.center_crop("/photos/corrupt.jpg", 100, 100, callback.clone());
    queue.run_pending().await;

    let failures = callback.failed();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], LoadError::Decode { .. }));
    assert_eq!(callback.completed_count(), 0);

    assert!(!manager.is_cached("/photos/corrupt.jpg", 100, 100));
    assert!(manager.disk().puts().is_empty());
    assert_eq!(manager.stats().failed, 1);

    // The recycled buffer taken for the request is back in the pool
    assert_eq!(manager.take_recycled(100, 100).map(|b| b.id()), Some(seed));
}

#[tokio::test]
async fn test_failure_does_not_affect_other_requests() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let callback = RecordingCallback::new();

    manager.center_crop("/photos/corrupt.jpg", 100, 100, callback.clone());
    manager.center_crop(PHOTO, 100, 100, callback.clone());
    queue.run_pending().await;

    assert_eq!(callback.failed_count(), 1);
    assert_eq!(callback.completed_count(), 1);
}

// =============================================================================
// Concurrency Semantics
// =============================================================================

#[tokio::test]
async fn test_duplicate_requests_are_not_coalesced() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let first = RecordingCallback::new();
    let second = RecordingCallback::new();

    manager.center_crop(PHOTO, 100, 100, first.clone());
    manager.center_crop(PHOTO, 100, 100, second.clone());
    queue.run_pending().await;

    assert_eq!(manager.resizer().run_count(), 2);
    assert_eq!(first.completed_count(), 1);
    assert_eq!(second.completed_count(), 1);

    // The second result displaced the first in the cache
    let stats = manager.stats();
    assert_eq!(stats.memory_entries, 1);
    assert_eq!(stats.tracked_buffers, 1);
    assert_eq!(stats.pooled_buffers, 1);
}

#[tokio::test]
async fn test_callback_may_reenter_manager() {
    let (manager, queue) = create_manager(BUFFER_100 * 4);
    let inner_hits = Arc::new(AtomicUsize::new(0));

    let reentrant = manager.clone();
    let hits = inner_hits.clone();
    let callback = callback_fn(
        move |_| {
            let hits = hits.clone();
            reentrant.center_crop(
                PHOTO,
                100,
                100,
                callback_fn(
                    move |_| {
                        hits.fetch_add(1, Ordering::SeqCst);
                    },
                    |_| {},
                ),
            );
        },
        |_| {},
    );

    manager.center_crop(PHOTO, 100, 100, callback);
    queue.run_pending().await;

    // The result is cached before the callback runs, so the nested request hits memory
    assert_eq!(inner_hits.load(Ordering::SeqCst), 1);
    assert_eq!(manager.stats().memory_hits, 1);
}
