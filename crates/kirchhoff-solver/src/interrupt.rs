//! Cooperative cancellation.
//!
//! Drivers poll an [`Interrupt`] once per Newton pass, time step and
//! frequency point, and unwind with [`Error::Paused`](crate::Error::Paused)
//! when it fires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Source of pause requests.
pub trait Interrupt {
    fn pause_requested(&self) -> bool;
}

/// Never interrupts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInterrupt;

impl Interrupt for NoInterrupt {
    fn pause_requested(&self) -> bool {
        false
    }
}

/// Shareable flag another thread (or a signal handler) can raise.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Clear a previous request so a paused analysis can be rerun.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Interrupt for CancelFlag {
    fn pause_requested(&self) -> bool {
        self.is_cancelled()
    }
}

impl<F: Fn() -> bool> Interrupt for F {
    fn pause_requested(&self) -> bool {
        self()
    }
}
