//! Notifier: reactive → native "state changed" protocol.
//!
//! Every mutating slot write ends in [`Notifier::notify`]. The wake notifier:
//!
//! 1. stamps the wall-clock microsecond timestamp into the header
//! 2. increments the header notify counter (wrapping)
//! 3. atomically stores `1` into the wake flag
//! 4. calls the native `wake()` so a parked native thread resumes now
//!
//! The flag makes the change observable even when the native side was not
//! parked yet (or the wake races with it parking); the direct call is what
//! actually crosses the runtime boundary.
//!
//! Writes inside a [`batch`] coalesce into a single notify when the outermost
//! batch ends.

use std::cell::Cell;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::trace;

use crate::shared_buffer::SharedBuffer;

use super::native::NativeEngine;

// =============================================================================
// NOTIFIER
// =============================================================================

/// Signals the native side that shared state changed.
pub trait Notifier {
    fn notify(&self);

    /// Enter a coalescing scope. Nested scopes are allowed.
    fn begin_batch(&self) {}

    /// Leave a coalescing scope, firing one notify if anything changed.
    fn end_batch(&self) {}
}

/// Run `f` with notifications coalesced into at most one.
pub fn batch<R>(notifier: &dyn Notifier, f: impl FnOnce() -> R) -> R {
    struct Guard<'a>(&'a dyn Notifier);
    impl Drop for Guard<'_> {
        fn drop(&mut self) {
            self.0.end_batch();
        }
    }

    notifier.begin_batch();
    let _guard = Guard(notifier);
    f()
}

/// Notifier for environments with no native side attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self) {}
}

/// The real protocol: header stamps, wake flag, direct native wake.
pub struct WakeNotifier {
    buffer: Arc<SharedBuffer>,
    native: Arc<dyn NativeEngine>,
    depth: Cell<u32>,
    pending: Cell<bool>,
}

impl WakeNotifier {
    pub fn new(buffer: Arc<SharedBuffer>, native: Arc<dyn NativeEngine>) -> Self {
        Self {
            buffer,
            native,
            depth: Cell::new(0),
            pending: Cell::new(false),
        }
    }

    fn fire(&self) {
        // Never let the stamp go backwards if the wall clock does.
        let now = now_micros().max(self.buffer.last_notify_us());
        self.buffer.set_last_notify_us(now);
        let count = self.buffer.increment_notify_count();
        self.buffer.set_wake_flag();
        self.native.wake();
        trace!(count, now, "notified native side");
    }

    /// Number of notifications recorded in the header.
    pub fn notify_count(&self) -> u32 {
        self.buffer.notify_count()
    }

    pub fn last_notify_us(&self) -> u64 {
        self.buffer.last_notify_us()
    }
}

impl Notifier for WakeNotifier {
    fn notify(&self) {
        if self.depth.get() > 0 {
            self.pending.set(true);
            return;
        }
        self.fire();
    }

    fn begin_batch(&self) {
        self.depth.set(self.depth.get() + 1);
    }

    fn end_batch(&self) {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth == 0 && self.pending.replace(false) {
            self.fire();
        }
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
