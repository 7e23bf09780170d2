//! Progress reporting and scan cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives `progress(value, max)` updates from scans and saves
pub trait Progress {
    fn progress(&mut self, value: usize, max: usize);
}

/// Discards every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn progress(&mut self, _value: usize, _max: usize) {}
}

impl<F: FnMut(usize, usize)> Progress for F {
    fn progress(&mut self, value: usize, max: usize) {
        self(value, max)
    }
}

/// Shared flag used to cancel a running scan
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
