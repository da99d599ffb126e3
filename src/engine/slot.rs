//! Slot accessors - one typed field across every node record.
//!
//! A `SlotAccessor<T>` addresses `HEADER_SIZE + index * NODE_STRIDE + offset`
//! in the shared buffer. Reads are plain loads; every write ends in a notify
//! so the native side sees the change.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::pipeline::notify::{batch, Notifier};
use crate::shared_buffer::{SharedBuffer, SlotValue};

/// Typed view of one node field.
pub struct SlotAccessor<T: SlotValue> {
    buffer: Arc<SharedBuffer>,
    offset: usize,
    default: T,
    notifier: Rc<dyn Notifier>,
}

impl<T: SlotValue> Clone for SlotAccessor<T> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            offset: self.offset,
            default: self.default,
            notifier: self.notifier.clone(),
        }
    }
}

impl<T: SlotValue> SlotAccessor<T> {
    pub fn new(
        buffer: Arc<SharedBuffer>,
        offset: usize,
        default: T,
        notifier: Rc<dyn Notifier>,
    ) -> Self {
        Self { buffer, offset, default, notifier }
    }

    /// Field offset within a node record
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Declared default restored by [`SlotAccessor::clear`]
    #[inline]
    pub fn default_value(&self) -> T {
        self.default
    }

    /// Read the field for `index`. Never notifies.
    #[inline]
    pub fn get(&self, index: usize) -> T {
        self.buffer.read_node(index, self.offset)
    }

    /// Write the field for `index`, then notify.
    pub fn set(&self, index: usize, value: T) {
        self.write_silent(index, value);
        self.notifier.notify();
    }

    /// Write several `(index, value)` pairs, then notify once.
    ///
    /// An empty batch writes nothing and does not notify.
    pub fn set_batch(&self, values: impl IntoIterator<Item = (usize, T)>) {
        batch(self.notifier.as_ref(), || {
            let mut wrote = false;
            for (index, value) in values {
                self.write_silent(index, value);
                wrote = true;
            }
            if wrote {
                self.notifier.notify();
            }
        });
    }

    /// Reset the field for `index` to its declared default, then notify.
    pub fn clear(&self, index: usize) {
        self.set(index, self.default);
    }

    /// Write without notifying. Callers own the notify.
    #[inline]
    pub(crate) fn write_silent(&self, index: usize, value: T) {
        self.buffer.write_node(index, self.offset, value);
    }
}

impl<T: SlotValue> fmt::Debug for SlotAccessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotAccessor")
            .field("offset", &self.offset)
            .field("default", &self.default)
            .finish()
    }
}
