//! SparkTUI Shared Buffer - binary contract between the reactive side and
//! the native engine.
//!
//! Both runtimes interpret the same bytes. Offsets, stride and byte order are
//! the wire format: any change here is a breaking change for the native side.
//!
//! Memory Layout:
//!   - Header (64 bytes): capacity, counts, config, wake flag, instrumentation
//!   - Nodes (64 bytes × capacity): one fixed-stride record per node index
//!   - Event Ring (5,132 bytes): native → reactive decoded input events
//!
//! All multi-byte values are little-endian. Hierarchy pointers use `-1` for
//! "none" because `0` is a valid node index.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::error::{BridgeError, Result};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Header size in bytes
pub const HEADER_SIZE: usize = 64;

/// Bytes per node record
pub const NODE_STRIDE: usize = 64;

/// Layout version written at `H_VERSION`
pub const LAYOUT_VERSION: u32 = 1;

/// Sentinel for "no node" in hierarchy pointers and event targets
pub const NONE: i32 = -1;

/// Largest node capacity a buffer accepts. Keeps every index representable
/// as an `i32` hierarchy pointer and the table at 64 MiB or less.
pub const MAX_CAPACITY: usize = 1 << 20;

/// Event ring header size
pub const EVENT_RING_HEADER_SIZE: usize = 12;

/// Bytes per event slot
pub const EVENT_SLOT_SIZE: usize = 20;

/// Maximum events in ring buffer
pub const MAX_EVENTS: usize = 256;

/// Total event ring size
pub const EVENT_RING_SIZE: usize = EVENT_RING_HEADER_SIZE + MAX_EVENTS * EVENT_SLOT_SIZE;

// =============================================================================
// HEADER OFFSETS (64 bytes total)
// =============================================================================

pub const H_CAPACITY: usize = 0;
pub const H_NODE_COUNT: usize = 4;
pub const H_CONFIG_FLAGS: usize = 8;
pub const H_RENDER_MODE: usize = 12;
// 13-15: reserved

// --- Wake & instrumentation (aligned for atomics) ---
pub const H_WAKE_FLAG: usize = 16;
pub const H_NOTIFY_COUNT: usize = 20;
pub const H_LAST_NOTIFY_US: usize = 24;
pub const H_VERSION: usize = 32;
// 36-63: reserved

// =============================================================================
// NODE FIELD OFFSETS (64 bytes per node)
// =============================================================================

// --- Identity & flags ---
pub const U_COMPONENT_TYPE: usize = 0;
pub const U_FOCUSABLE: usize = 1;
pub const U_FOCUSED: usize = 2;
pub const U_VISIBLE: usize = 3;

// --- Hierarchy (i32, -1 = none) ---
pub const I_PARENT_INDEX: usize = 4;
pub const I_FIRST_CHILD: usize = 8;
pub const I_LAST_CHILD: usize = 12;
pub const I_PREV_SIBLING: usize = 16;
pub const I_NEXT_SIBLING: usize = 20;

// --- Colors (packed ARGB) ---
pub const C_FG_COLOR: usize = 24;
pub const C_BG_COLOR: usize = 28;
pub const C_BORDER_COLOR: usize = 32;

// --- Layout ---
pub const F_WIDTH: usize = 36;
pub const F_HEIGHT: usize = 40;
pub const F_FLEX_GROW: usize = 44;

// --- Interaction ---
pub const I_TAB_INDEX: usize = 48;
pub const I_CURSOR_POSITION: usize = 52;
pub const I_SELECTION_START: usize = 56;
pub const I_SELECTION_END: usize = 60;

/// Hierarchy pointer fields, reset to `NONE` whenever a record is initialized.
pub const HIERARCHY_FIELDS: [usize; 5] = [
    I_PARENT_INDEX,
    I_FIRST_CHILD,
    I_LAST_CHILD,
    I_PREV_SIBLING,
    I_NEXT_SIBLING,
];

// =============================================================================
// EVENT RING OFFSETS (relative to ring start)
// =============================================================================

pub const R_WRITE_IDX: usize = 0;
pub const R_READ_IDX: usize = 4;
pub const R_SLOT_COUNT: usize = 8;

// =============================================================================
// CONFIG FLAGS
// =============================================================================

bitflags! {
    /// Configuration flags (reactive side writes, native reads)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigFlags: u32 {
        const EXIT_ON_CTRL_C = 1 << 0;
        const TAB_NAVIGATION = 1 << 1;
        const ARROW_SCROLL = 1 << 2;
        const PAGE_SCROLL = 1 << 3;
        const HOME_END_SCROLL = 1 << 4;
        const WHEEL_SCROLL = 1 << 5;
        const FOCUS_ON_CLICK = 1 << 6;
        const MOUSE_ENABLED = 1 << 7;
        const KITTY_KEYBOARD = 1 << 8;
    }
}

impl Default for ConfigFlags {
    fn default() -> Self {
        // Default: bits 0-7 enabled (0x00FF)
        Self::EXIT_ON_CTRL_C
            | Self::TAB_NAVIGATION
            | Self::ARROW_SCROLL
            | Self::PAGE_SCROLL
            | Self::HOME_END_SCROLL
            | Self::WHEEL_SCROLL
            | Self::FOCUS_ON_CLICK
            | Self::MOUSE_ENABLED
    }
}

// =============================================================================
// ENUMS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RenderMode {
    #[default]
    Diff = 0,
    Inline = 1,
    Append = 2,
}

impl From<u8> for RenderMode {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Inline,
            2 => Self::Append,
            _ => Self::Diff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ComponentType {
    #[default]
    None = 0,
    Box = 1,
    Text = 2,
    Input = 3,
}

impl From<u8> for ComponentType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Box,
            2 => Self::Text,
            3 => Self::Input,
            _ => Self::None,
        }
    }
}

/// Convert a raw hierarchy pointer into an index.
#[inline]
pub fn index_from_raw(raw: i32) -> Option<usize> {
    usize::try_from(raw).ok()
}

/// Convert an optional index into a raw hierarchy pointer.
#[inline]
pub fn raw_from_index(index: Option<usize>) -> i32 {
    index.and_then(|i| i32::try_from(i).ok()).unwrap_or(NONE)
}

// =============================================================================
// SLOT VALUES
// =============================================================================

/// A numeric type that can live in a node record.
///
/// Values are always stored little-endian, whatever the host byte order.
pub trait SlotValue: Copy + PartialEq + fmt::Debug + 'static {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// # Safety
    /// `src` must be valid for reads of `SIZE` bytes.
    unsafe fn read_le(src: *const u8) -> Self;

    /// # Safety
    /// `dst` must be valid for writes of `SIZE` bytes.
    unsafe fn write_le(self, dst: *mut u8);
}

macro_rules! impl_slot_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl SlotValue for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                #[inline]
                unsafe fn read_le(src: *const u8) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$t>()];
                    unsafe { ptr::copy_nonoverlapping(src, bytes.as_mut_ptr(), Self::SIZE) };
                    <$t>::from_le_bytes(bytes)
                }

                #[inline]
                unsafe fn write_le(self, dst: *mut u8) {
                    let bytes = self.to_le_bytes();
                    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst, Self::SIZE) };
                }
            }
        )*
    };
}

impl_slot_value!(u8, i8, u16, i16, u32, i32, u64, f32);

// =============================================================================
// SHARED BUFFER
// =============================================================================

/// Zero-copy view over the shared region.
///
/// Either owns its storage (allocated by [`SharedBuffer::new`]) or wraps a
/// region handed over by the embedder via [`SharedBuffer::from_raw`].
pub struct SharedBuffer {
    ptr: *mut u8,
    len: usize,
    capacity: usize,
    event_ring_offset: usize,
    owned: Option<*mut [u64]>,
}

// SAFETY: The region is shared with the native engine. Field-level writes from
// each side target disjoint field sets; the wake flag and ring indices are the
// only shared-write words and are accessed atomically.
unsafe impl Send for SharedBuffer {}
unsafe impl Sync for SharedBuffer {}

impl SharedBuffer {
    /// Bytes needed for a buffer holding `capacity` nodes.
    pub const fn required_len(capacity: usize) -> usize {
        HEADER_SIZE + capacity * NODE_STRIDE + EVENT_RING_SIZE
    }

    /// Allocate a zeroed, 8-byte aligned buffer for `capacity` nodes and
    /// write the header defaults. Capacity is clamped to [`MAX_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_CAPACITY);
        let len = Self::required_len(capacity);
        let storage = vec![0u64; len.div_ceil(8)].into_boxed_slice();
        let raw = Box::into_raw(storage);
        let buf = Self {
            ptr: raw.cast::<u8>(),
            len,
            capacity,
            event_ring_offset: HEADER_SIZE + capacity * NODE_STRIDE,
            owned: Some(raw),
        };

        buf.write::<u32>(H_VERSION, LAYOUT_VERSION);
        buf.write::<u32>(H_CAPACITY, capacity as u32);
        buf.set_config_flags(ConfigFlags::default());
        buf.write::<u32>(buf.event_ring_offset + R_SLOT_COUNT, MAX_EVENTS as u32);
        buf
    }

    /// Wrap an existing region whose header already carries its capacity.
    ///
    /// # Safety
    /// - `ptr` must be 8-byte aligned and valid for reads and writes of `len` bytes
    /// - The region must outlive the returned view
    pub unsafe fn from_raw(ptr: *mut u8, len: usize) -> Result<Self> {
        debug_assert!(ptr as usize % 8 == 0, "shared buffer must be 8-byte aligned");
        if len < HEADER_SIZE {
            return Err(BridgeError::BufferTooSmall { needed: HEADER_SIZE, actual: len });
        }

        let capacity = unsafe { u32::read_le(ptr.add(H_CAPACITY)) } as usize;
        let needed = Self::required_len(capacity);
        if len < needed {
            return Err(BridgeError::BufferTooSmall { needed, actual: len });
        }

        Ok(Self {
            ptr,
            len,
            capacity,
            event_ring_offset: HEADER_SIZE + capacity * NODE_STRIDE,
            owned: None,
        })
    }

    /// Get mutable raw pointer (handed to the native side at init)
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Get buffer length
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of node records in the table
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Byte offset of the event ring
    #[inline]
    pub fn event_ring_offset(&self) -> usize {
        self.event_ring_offset
    }

    // =========================================================================
    // LOW-LEVEL ACCESS
    // =========================================================================

    /// Read a little-endian value at an absolute byte offset.
    #[inline]
    pub fn read<T: SlotValue>(&self, offset: usize) -> T {
        assert!(offset + T::SIZE <= self.len, "read at {offset} past end ({})", self.len);
        unsafe { T::read_le(self.ptr.add(offset)) }
    }

    /// Write a little-endian value at an absolute byte offset.
    #[inline]
    pub fn write<T: SlotValue>(&self, offset: usize, value: T) {
        assert!(offset + T::SIZE <= self.len, "write at {offset} past end ({})", self.len);
        unsafe { value.write_le(self.ptr.add(offset)) }
    }

    /// Absolute offset of `field` in the record for `index`.
    #[inline]
    pub fn node_offset(&self, index: usize, field: usize) -> usize {
        assert!(
            index < self.capacity,
            "node index {index} out of bounds (capacity {})",
            self.capacity
        );
        debug_assert!(field < NODE_STRIDE);
        HEADER_SIZE + index * NODE_STRIDE + field
    }

    #[inline]
    pub fn read_node<T: SlotValue>(&self, index: usize, field: usize) -> T {
        self.read(self.node_offset(index, field))
    }

    #[inline]
    pub fn write_node<T: SlotValue>(&self, index: usize, field: usize, value: T) {
        self.write(self.node_offset(index, field), value)
    }

    /// View a 4-byte aligned word as an atomic.
    #[inline]
    pub(crate) fn atomic_u32(&self, offset: usize) -> &AtomicU32 {
        assert!(offset % 4 == 0 && offset + 4 <= self.len);
        // SAFETY: in bounds, aligned (storage base is 8-byte aligned), and the
        // word is only ever touched through atomics by either runtime.
        unsafe { &*self.ptr.add(offset).cast::<AtomicU32>() }
    }

    // =========================================================================
    // HEADER ACCESSORS
    // =========================================================================

    /// Get layout version
    #[inline]
    pub fn version(&self) -> u32 {
        self.read(H_VERSION)
    }

    /// Get node capacity as recorded in the header
    #[inline]
    pub fn header_capacity(&self) -> u32 {
        self.read(H_CAPACITY)
    }

    /// Get live node count (high-water mark of issued indices)
    #[inline]
    pub fn node_count(&self) -> u32 {
        self.read(H_NODE_COUNT)
    }

    #[inline]
    pub fn set_node_count(&self, count: u32) {
        self.write(H_NODE_COUNT, count)
    }

    /// Get config flags
    #[inline]
    pub fn config_flags(&self) -> ConfigFlags {
        ConfigFlags::from_bits_truncate(self.read(H_CONFIG_FLAGS))
    }

    #[inline]
    pub fn set_config_flags(&self, flags: ConfigFlags) {
        self.write(H_CONFIG_FLAGS, flags.bits())
    }

    /// Get render mode
    #[inline]
    pub fn render_mode(&self) -> RenderMode {
        RenderMode::from(self.read::<u8>(H_RENDER_MODE))
    }

    #[inline]
    pub fn set_render_mode(&self, mode: RenderMode) {
        self.write(H_RENDER_MODE, mode as u8)
    }

    // =========================================================================
    // INSTRUMENTATION
    // =========================================================================

    /// Number of notifications issued since the buffer was created
    #[inline]
    pub fn notify_count(&self) -> u32 {
        self.read(H_NOTIFY_COUNT)
    }

    /// Increment the notify counter, wrapping on overflow. Returns the new value.
    #[inline]
    pub fn increment_notify_count(&self) -> u32 {
        let count = self.notify_count().wrapping_add(1);
        self.write(H_NOTIFY_COUNT, count);
        count
    }

    /// Wall-clock microseconds of the last notification
    #[inline]
    pub fn last_notify_us(&self) -> u64 {
        self.read(H_LAST_NOTIFY_US)
    }

    #[inline]
    pub fn set_last_notify_us(&self, us: u64) {
        self.write(H_LAST_NOTIFY_US, us)
    }

    /// Zero the instrumentation fields and the wake flag.
    pub fn reset_instrumentation(&self) {
        self.write::<u32>(H_NOTIFY_COUNT, 0);
        self.write::<u64>(H_LAST_NOTIFY_US, 0);
        self.atomic_u32(H_WAKE_FLAG).store(0, Ordering::SeqCst);
    }

    // =========================================================================
    // WAKE MECHANISM
    // =========================================================================

    /// Set wake flag ("at least one change since the native side last looked")
    #[inline]
    pub fn set_wake_flag(&self) {
        self.atomic_u32(H_WAKE_FLAG).store(1u32.to_le(), Ordering::SeqCst);
    }

    /// Consume wake flag (read and clear atomically)
    #[inline]
    pub fn consume_wake(&self) -> bool {
        u32::from_le(self.atomic_u32(H_WAKE_FLAG).swap(0, Ordering::AcqRel)) != 0
    }

    /// Peek at the wake flag without clearing it
    #[inline]
    pub fn wake_pending(&self) -> bool {
        u32::from_le(self.atomic_u32(H_WAKE_FLAG).load(Ordering::Acquire)) != 0
    }

    // =========================================================================
    // NODE RECORDS
    // =========================================================================

    #[inline]
    pub fn component_type(&self, index: usize) -> ComponentType {
        ComponentType::from(self.read_node::<u8>(index, U_COMPONENT_TYPE))
    }

    /// Reset a record to its schema defaults: zeroed, visible, and every
    /// hierarchy pointer set to `NONE`.
    pub fn clear_node(&self, index: usize) {
        let base = self.node_offset(index, 0);
        unsafe { ptr::write_bytes(self.ptr.add(base), 0, NODE_STRIDE) };
        self.write_node::<u8>(index, U_VISIBLE, 1);
        for field in HIERARCHY_FIELDS {
            self.write_node::<i32>(index, field, NONE);
        }
    }

    /// Copy a snapshot into the start of the region.
    ///
    /// An empty slice is ignored rather than clearing existing contents.
    /// Returns the number of bytes copied.
    pub fn copy_from(&self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        let n = bytes.len().min(self.len);
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr, n) };
        n
    }

    /// Copy the whole region out.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        unsafe { ptr::copy_nonoverlapping(self.ptr, out.as_mut_ptr(), self.len) };
        out
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        if let Some(raw) = self.owned.take() {
            // SAFETY: produced by Box::into_raw in `new` and never freed elsewhere.
            drop(unsafe { Box::from_raw(raw) });
        }
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("owned", &self.owned.is_some())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
