use std::fmt;
use std::sync::Arc;

use crate::buffer::ImageBuffer;
use crate::error::LoadError;

/// Receives the outcome of a load request.
///
/// Exactly one method is called per request that is not cancelled. A memory
/// cache hit is delivered on the requesting thread before the request call
/// returns; everything else is delivered from a background job. The manager
/// never holds its internal lock while calling back, so implementations may
/// issue further requests.
///
/// The `Arc` holding the callback also identifies the request for
/// [`PhotoManager::cancel`](crate::PhotoManager::cancel): reuse one callback
/// object for a group of requests to cancel them together. Once the object is
/// dropped its token is retired, and a new callback always gets a new token.
pub trait LoadCallback: Send + Sync + 'static {
    fn on_load_completed(&self, buffer: ImageBuffer);

    fn on_load_failed(&self, error: LoadError);
}

struct FnCallback<F, G> {
    ok: F,
    err: G,
}

impl<F, G> LoadCallback for FnCallback<F, G>
where
    F: Fn(ImageBuffer) + Send + Sync + 'static,
    G: Fn(LoadError) + Send + Sync + 'static,
{
    fn on_load_completed(&self, buffer: ImageBuffer) {
        (self.ok)(buffer)
    }

    fn on_load_failed(&self, error: LoadError) {
        (self.err)(error)
    }
}

impl<F, G> fmt::Debug for FnCallback<F, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnCallback")
    }
}

/// Build a callback from a pair of closures.
///
/// ```
/// use photo_manager::callback_fn;
///
/// let callback = callback_fn(
///     |buffer| println!("loaded {}x{}", buffer.width(), buffer.height()),
///     |error| eprintln!("failed: {}", error),
/// );
/// # let _ = callback;
/// ```
pub fn callback_fn<F, G>(ok: F, err: G) -> Arc<dyn LoadCallback>
where
    F: Fn(ImageBuffer) + Send + Sync + 'static,
    G: Fn(LoadError) + Send + Sync + 'static,
{
    Arc::new(FnCallback { ok, err })
}
