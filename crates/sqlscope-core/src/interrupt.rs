//! Cooperative interruption with masking.
//!
//! An [`InterruptHandle`] is shared by every scope derived from one root
//! scope. Requesting an interrupt is sticky: once set, every unmasked
//! [`checkpoint`](InterruptHandle::checkpoint) reports it. While a
//! [`MaskGuard`] is alive the request is deferred, which is how release
//! phases (commit, rollback, disconnect) run to completion before a
//! cancelled caller observes the interruption.

use crate::exit::Defect;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
struct InterruptState {
    requested: AtomicBool,
    reason: Mutex<Option<String>>,
    mask_depth: AtomicUsize,
}

/// Shared interruption signal for one call chain.
#[derive(Clone, Default)]
pub struct InterruptHandle {
    state: Arc<InterruptState>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request interruption. The first reason wins; later requests are ignored.
    pub fn interrupt(&self, reason: impl Into<String>) {
        let mut slot = self
            .state
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(reason.into());
        }
        self.state.requested.store(true, Ordering::Release);
        tracing::debug!(masked = self.is_masked(), "interrupt requested");
    }

    /// Whether interruption has been requested, masked or not.
    pub fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::Acquire)
    }

    /// Whether interruption is currently deferred.
    pub fn is_masked(&self) -> bool {
        self.state.mask_depth.load(Ordering::Acquire) > 0
    }

    /// The reason given to [`interrupt`](Self::interrupt), if any.
    pub fn reason(&self) -> Option<String> {
        self.state
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Defer interruption until the returned guard is dropped.
    ///
    /// Masks nest; the request is honored once the outermost guard is gone.
    #[must_use = "interruption is only masked while the guard is alive"]
    pub fn mask(&self) -> MaskGuard {
        self.state.mask_depth.fetch_add(1, Ordering::AcqRel);
        MaskGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Report a pending, unmasked interruption as a defect.
    pub fn checkpoint(&self) -> Option<Defect> {
        if !self.is_requested() || self.is_masked() {
            return None;
        }
        let reason = self
            .reason()
            .unwrap_or_else(|| "interrupted".to_string());
        Some(Defect::interrupted(reason))
    }
}

impl fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("requested", &self.is_requested())
            .field("mask_depth", &self.state.mask_depth.load(Ordering::Acquire))
            .finish()
    }
}

/// Keeps interruption masked while alive.
pub struct MaskGuard {
    state: Arc<InterruptState>,
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        self.state.mask_depth.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for MaskGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskGuard").finish_non_exhaustive()
    }
}
