//! Readiness flag shared by the renewal loop and the health endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

/// One-way "first credential written" flag.
///
/// The renewal loop is the only writer and the health endpoint reads it.
/// Once set it stays set for the life of the process; a later renewal
/// failure terminates the process instead of clearing it.
///
/// Cloning shares the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct ReadinessFlag {
    ready: Arc<AtomicBool>,
}

impl ReadinessFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark ready. Returns `true` only on the call that flipped the flag.
    pub fn mark_ready(&self) -> bool {
        // Release pairs with the Acquire in is_ready(): the credential write
        // that precedes this call is visible to any reader that sees `true`.
        let flipped = !self.ready.swap(true, Ordering::Release);
        if flipped {
            info!("First credential persisted, reporting started");
        }
        flipped
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
