//! Native engine call surface.
//!
//! The native side owns layout, rendering and terminal input. This crate only
//! consumes its small call surface:
//!
//! ```text
//! init(ptr, len) -> status   hand over the shared buffer (non-zero = fatal)
//! wake()                     fire-and-forget "state changed" signal
//! wait_for_events()          block until input is decoded or close() is called
//! drain_events()             decoded events, in decode order
//! cleanup() / close()        teardown; close() unblocks an in-flight wait
//! ```
//!
//! [`ExternNative`] binds the C ABI exports of a native engine and
//! [`DylibNative`] resolves them from a shared library on disk, which is how
//! [`DylibLoader`] turns the wait channel's library path into an engine.
//! [`LoopbackNative`] is an in-process stand-in used for headless runs and
//! tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use libloading::Library;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::shared_buffer::SharedBuffer;
use crate::state::events::InputEvent;

use super::event_ring::EventRing;

// =============================================================================
// NATIVE ENGINE
// =============================================================================

/// The native engine as seen from the reactive side.
///
/// `wait_for_events` is called from the wait thread while every other method
/// is called from the main context, hence `Send + Sync`.
pub trait NativeEngine: Send + Sync {
    /// Hand over the shared buffer. Non-zero status is fatal to startup.
    fn init(&self, ptr: *mut u8, len: usize) -> u32;

    /// Unblock the native side if it is parked waiting for state changes.
    fn wake(&self);

    /// Block until decoded input is available or `close` is called.
    fn wait_for_events(&self);

    /// Take every decoded event, oldest first.
    ///
    /// The default reads the event ring inside the shared buffer.
    fn drain_events(&self, buffer: &SharedBuffer) -> Vec<InputEvent> {
        EventRing::new(buffer).drain()
    }

    fn cleanup(&self);

    /// Force any in-flight `wait_for_events` to return.
    fn close(&self);
}

// =============================================================================
// EXTERN (C ABI) ENGINE
// =============================================================================

type InitFn = unsafe extern "C" fn(*mut u8, u32) -> u32;
type VoidFn = unsafe extern "C" fn();

/// A native engine reached through its exported C functions.
///
/// Decoded events travel through the shared event ring.
#[derive(Clone, Copy)]
pub struct ExternNative {
    init: InitFn,
    wake: VoidFn,
    wait_for_events: VoidFn,
    cleanup: VoidFn,
    close: VoidFn,
}

impl ExternNative {
    /// # Safety
    /// Each pointer must be a valid export of the same native engine, callable
    /// from any thread for as long as this value is alive.
    pub unsafe fn new(
        init: InitFn,
        wake: VoidFn,
        wait_for_events: VoidFn,
        cleanup: VoidFn,
        close: VoidFn,
    ) -> Self {
        Self { init, wake, wait_for_events, cleanup, close }
    }
}

impl NativeEngine for ExternNative {
    fn init(&self, ptr: *mut u8, len: usize) -> u32 {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        unsafe { (self.init)(ptr, len) }
    }

    fn wake(&self) {
        unsafe { (self.wake)() }
    }

    fn wait_for_events(&self) {
        unsafe { (self.wait_for_events)() }
    }

    fn cleanup(&self) {
        unsafe { (self.cleanup)() }
    }

    fn close(&self) {
        unsafe { (self.close)() }
    }
}

// =============================================================================
// LOOPBACK ENGINE
// =============================================================================

/// In-process native stand-in.
///
/// Events pushed with [`LoopbackNative::push_event`] are queued and wake any
/// thread blocked in `wait_for_events` through a futex word, so an idle wait
/// costs no CPU.
pub struct LoopbackNative {
    queue: Mutex<VecDeque<InputEvent>>,
    /// Futex word: non-zero when events were pushed since the last wait.
    pending: AtomicU32,
    closed: AtomicBool,
    init_status: u32,
    init_len: AtomicUsize,
    wakes: AtomicU32,
    cleanups: AtomicU32,
}

impl LoopbackNative {
    pub fn new() -> Self {
        Self::with_init_status(0)
    }

    /// A loopback whose `init` reports `status` (non-zero simulates failure).
    pub fn with_init_status(status: u32) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            pending: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            init_status: status,
            init_len: AtomicUsize::new(0),
            wakes: AtomicU32::new(0),
            cleanups: AtomicU32::new(0),
        }
    }

    /// Queue a decoded event and unblock the waiter.
    pub fn push_event(&self, event: impl Into<InputEvent>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event.into());
        self.signal_events();
    }

    /// Unblock the waiter without queueing anything, for engines that
    /// deliver events through the shared event ring instead.
    pub fn signal_events(&self) {
        self.pending.store(1, Ordering::SeqCst);
        atomic_wait::wake_all(&self.pending);
    }

    /// Number of `wake()` calls received.
    pub fn wake_count(&self) -> u32 {
        self.wakes.load(Ordering::SeqCst)
    }

    /// Number of `cleanup()` calls received.
    pub fn cleanup_count(&self) -> u32 {
        self.cleanups.load(Ordering::SeqCst)
    }

    /// Buffer length passed to the last `init`, 0 if never initialized.
    pub fn init_len(&self) -> usize {
        self.init_len.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for LoopbackNative {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeEngine for LoopbackNative {
    fn init(&self, _ptr: *mut u8, len: usize) -> u32 {
        if self.init_status == 0 {
            self.init_len.store(len, Ordering::SeqCst);
            self.closed.store(false, Ordering::SeqCst);
            // Drop the wake left behind by a previous close()
            let queued = !self.queue.lock().unwrap_or_else(PoisonError::into_inner).is_empty();
            self.pending.store(u32::from(queued), Ordering::SeqCst);
        }
        self.init_status
    }

    fn wake(&self) {
        self.wakes.fetch_add(1, Ordering::SeqCst);
    }

    fn wait_for_events(&self) {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            if self.pending.swap(0, Ordering::SeqCst) != 0 {
                return;
            }
            atomic_wait::wait(&self.pending, 0);
        }
    }

    fn drain_events(&self, _buffer: &SharedBuffer) -> Vec<InputEvent> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending.store(1, Ordering::SeqCst);
        atomic_wait::wake_all(&self.pending);
    }
}

// =============================================================================
// LOADERS
// =============================================================================

/// Resolves the library path carried by the wait channel's `start` message
/// into a native engine.
pub trait NativeLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn NativeEngine>>;
}

/// Loader that always hands out the same, already-linked engine.
#[derive(Clone)]
pub struct StaticLoader(Arc<dyn NativeEngine>);

impl StaticLoader {
    pub fn new(native: Arc<dyn NativeEngine>) -> Self {
        Self(native)
    }
}

impl NativeLoader for StaticLoader {
    fn load(&self, _path: &Path) -> Result<Arc<dyn NativeEngine>> {
        Ok(self.0.clone())
    }
}

/// Loader that opens the shared library at the given path.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl NativeLoader for DylibLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn NativeEngine>> {
        Ok(Arc::new(DylibNative::open(path)?))
    }
}

// =============================================================================
// SHARED LIBRARY ENGINE
// =============================================================================

/// A native engine bound from a shared library exporting:
///
/// ```text
/// spark_init(ptr, len) -> u32
/// spark_wake()
/// spark_wait_for_events()
/// spark_cleanup()
/// spark_close()
/// ```
pub struct DylibNative {
    exports: ExternNative,
    // Declared last so the exports are gone before the library unloads
    _library: Library,
}

impl DylibNative {
    /// Open `path` and resolve every engine export.
    pub fn open(path: &Path) -> Result<Self> {
        let load_error = |err: libloading::Error| BridgeError::NativeLoad {
            path: path.to_path_buf(),
            reason: err.to_string(),
        };

        // SAFETY: loading runs the library's initializers; the engine library
        // is trusted the same way a linked dependency would be.
        let library = unsafe { Library::new(path) }.map_err(load_error)?;

        // SAFETY: the symbol types match the engine's C ABI exports, and the
        // library outlives the copied function pointers (see field order).
        let exports = unsafe {
            ExternNative::new(
                symbol::<InitFn>(&library, b"spark_init\0").map_err(load_error)?,
                symbol::<VoidFn>(&library, b"spark_wake\0").map_err(load_error)?,
                symbol::<VoidFn>(&library, b"spark_wait_for_events\0").map_err(load_error)?,
                symbol::<VoidFn>(&library, b"spark_cleanup\0").map_err(load_error)?,
                symbol::<VoidFn>(&library, b"spark_close\0").map_err(load_error)?,
            )
        };

        debug!(path = %path.display(), "native library loaded");
        Ok(Self { exports, _library: library })
    }
}

/// # Safety
/// `T` must be the exact function pointer type of the export.
unsafe fn symbol<T: Copy>(
    library: &Library,
    name: &[u8],
) -> std::result::Result<T, libloading::Error> {
    unsafe { library.get::<T>(name) }.map(|export| *export)
}

impl NativeEngine for DylibNative {
    fn init(&self, ptr: *mut u8, len: usize) -> u32 {
        self.exports.init(ptr, len)
    }

    fn wake(&self) {
        self.exports.wake()
    }

    fn wait_for_events(&self) {
        self.exports.wait_for_events()
    }

    fn cleanup(&self) {
        self.exports.cleanup()
    }

    fn close(&self) {
        self.exports.close()
    }
}
