//! Image buffers and the recycling pool.
//!
//! An [`ImageBuffer`] is a handle to a fixed-size RGBA8 pixel buffer. Handles
//! are cheap to clone and every clone refers to the same allocation, so
//! identity (the [`BufferId`]) is what the reference counter tracks, never
//! pixel equality.
//!
//! ```text
//!   ImageBuffer ──clone──► ImageBuffer      same BufferId, same pixels
//!   ImageBuffer::new(..)                    fresh BufferId
//! ```
//!
//! Pixels can only be written through [`ImageBuffer::pixels_mut`], which
//! requires the handle to be the sole owner of the allocation. The
//! [`BufferPool`] relies on this to make sure a recycled buffer is never
//! overwritten while a consumer can still see it.

mod pool;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use pool::{BufferPool, Release, DEFAULT_MAX_RECYCLED_PER_SIZE};

/// Bytes per pixel (RGBA8).
pub const BYTES_PER_PIXEL: usize = 4;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a buffer allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw identifier value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Inner {
    id: BufferId,
    width: u32,
    height: u32,
    mutable: bool,
    pixels: Vec<u8>,
}

/// Shared handle to an RGBA8 pixel buffer.
#[derive(Clone)]
pub struct ImageBuffer {
    inner: Arc<Inner>,
}

impl ImageBuffer {
    /// Allocate a zeroed, mutable buffer.
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * BYTES_PER_PIXEL;
        Self::from_parts(width, height, vec![0; len], true)
    }

    /// Wrap decoded RGBA8 pixels in a mutable buffer.
    ///
    /// Returns `None` if `pixels` does not hold exactly `width * height` pixels.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        Self::checked(width, height, pixels, true)
    }

    /// Wrap decoded RGBA8 pixels in an immutable buffer.
    ///
    /// Immutable buffers are never reference counted or recycled.
    pub fn immutable(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        Self::checked(width, height, pixels, false)
    }

    fn checked(width: u32, height: u32, pixels: Vec<u8>, mutable: bool) -> Option<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        (pixels.len() == expected).then(|| Self::from_parts(width, height, pixels, mutable))
    }

    fn from_parts(width: u32, height: u32, pixels: Vec<u8>, mutable: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: BufferId::next(),
                width,
                height,
                mutable,
                pixels,
            }),
        }
    }

    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.inner.width, self.inner.height)
    }

    pub fn is_mutable(&self) -> bool {
        self.inner.mutable
    }

    /// Size of the pixel allocation in bytes.
    pub fn byte_size(&self) -> usize {
        self.inner.pixels.len()
    }

    /// Read-only view of the RGBA8 pixels.
    pub fn pixels(&self) -> &[u8] {
        &self.inner.pixels
    }

    /// Writable view of the pixels.
    ///
    /// Returns `None` for immutable buffers and whenever another handle to
    /// the same allocation is alive.
    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        if !self.inner.mutable {
            return None;
        }
        Arc::get_mut(&mut self.inner).map(|inner| inner.pixels.as_mut_slice())
    }

    /// Whether this handle is the only one referring to the allocation.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Whether two handles refer to the same allocation.
    pub fn same_buffer(&self, other: &ImageBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("id", &self.inner.id)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("mutable", &self.inner.mutable)
            .finish_non_exhaustive()
    }
}
