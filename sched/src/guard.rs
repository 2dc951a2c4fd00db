//! Single-Use Resource Guard
//!
//! Protects a per-slot ledger against concurrent allocator ownership. At
//! most one token exists per guard at any time; acquiring from a busy
//! guard yields an empty token, and a caller holding an empty token must
//! skip the slot rather than block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-writer exclusion flag
#[derive(Debug, Default)]
pub struct ResourceGuard {
    flag: Arc<AtomicBool>,
}

impl ResourceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a token is outstanding
    pub fn busy(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Try to take ownership. Returns an empty token if the guard is busy.
    pub fn acquire(&self) -> Token {
        let acquired = self
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        Token {
            flag: acquired.then(|| self.flag.clone()),
        }
    }
}

/// Movable proof of guard ownership. Dropping an owning token, or calling
/// [`Token::release`], frees the guard. Releasing an empty token is a
/// no-op; a token observing a free guard at release is a scheduler bug.
#[derive(Debug, Default)]
pub struct Token {
    flag: Option<Arc<AtomicBool>>,
}

impl Token {
    /// True if acquisition failed and this token owns nothing
    pub fn empty(&self) -> bool {
        self.flag.is_none()
    }

    /// Return ownership to the guard
    pub fn release(&mut self) {
        if let Some(flag) = self.flag.take() {
            let was_busy = flag.swap(false, Ordering::AcqRel);
            assert!(was_busy, "resource token: inconsistent guard state");
        }
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        self.release();
    }
}
