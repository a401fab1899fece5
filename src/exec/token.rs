//! Request tokens and their assignment to callback objects.
//!
//! A token is a process-wide monotonic id, so a token that has gone stale can
//! never match work scheduled later. The registry maps a live callback object
//! to its token: every request made with the same callback while it is alive
//! shares one token, and a callback created after the old one is gone always
//! gets a fresh id even if the allocator hands it the same address.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::trace;

/// Registry size below which dead entries are never swept.
const MIN_SWEEP_THRESHOLD: usize = 64;

/// Identity grouping the jobs of one caller for bulk cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(u64);

impl RequestToken {
    /// Allocate a token that has never been handed out before.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Assigns tokens to shared owner objects.
///
/// Entries hold a [`Weak`] to the owner. That keeps the owner's allocation
/// reserved while the entry exists, so an address in the table always
/// belongs to the object that registered it. Entries whose owner has been
/// dropped are swept once the table doubles in size.
pub struct TokenRegistry<T: ?Sized> {
    tokens: HashMap<usize, (Weak<T>, RequestToken)>,
    sweep_at: usize,
}

impl<T: ?Sized> TokenRegistry<T> {
    pub fn new() -> Self {
        Self {
            tokens: HashMap::new(),
            sweep_at: MIN_SWEEP_THRESHOLD,
        }
    }

    /// Token for `owner`, allocating one on first sight.
    pub fn token_for(&mut self, owner: &Arc<T>) -> RequestToken {
        let addr = Arc::as_ptr(owner) as *const () as usize;
        if let Some((registered, token)) = self.tokens.get(&addr) {
            if registered.strong_count() > 0 {
                return *token;
            }
        }

        if self.tokens.len() >= self.sweep_at {
            self.sweep();
        }

        let token = RequestToken::next();
        self.tokens.insert(addr, (Arc::downgrade(owner), token));
        token
    }

    /// Number of registered owners, live or not yet swept.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn sweep(&mut self) {
        let before = self.tokens.len();
        self.tokens.retain(|_, (owner, _)| owner.strong_count() > 0);
        self.sweep_at = (self.tokens.len() * 2).max(MIN_SWEEP_THRESHOLD);
        trace!(before, after = self.tokens.len(), "Swept request token registry");
    }
}

impl<T: ?Sized> Default for TokenRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
