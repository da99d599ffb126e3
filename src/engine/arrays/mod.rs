//! Node Arrays - one slot accessor per node field.
//!
//! All node state lives in the shared buffer's node table. Each field is a
//! column across every index, reached through a [`SlotAccessor`]:
//!
//! ```text
//! Index 0: Box  (parent=-1, width=80, visible=1, fg=0xFFFFFFFF, ...)
//! Index 1: Text (parent=0,  width=0,  visible=1, fg=0xFF0000FF, ...)
//! Index 2: Box  (parent=0,  width=40, visible=1, fg=0xFFFFFFFF, ...)
//! ```
//!
//! # Field Groups
//!
//! - **core**: component type, visibility, hierarchy pointers
//! - **visual**: packed ARGB colors
//! - **layout**: width, height, flex grow
//! - **interaction**: focus, tab order, cursor, selection

use std::rc::Rc;
use std::sync::Arc;

use crate::pipeline::notify::Notifier;
use crate::shared_buffer::*;

use super::slot::SlotAccessor;

/// Every node field of the shared buffer, as typed accessors.
#[derive(Clone)]
pub struct NodeArrays {
    buffer: Arc<SharedBuffer>,
    notifier: Rc<dyn Notifier>,

    // --- core ---
    pub component_type: SlotAccessor<u8>,
    pub visible: SlotAccessor<u8>,
    pub parent: SlotAccessor<i32>,
    pub first_child: SlotAccessor<i32>,
    pub last_child: SlotAccessor<i32>,
    pub prev_sibling: SlotAccessor<i32>,
    pub next_sibling: SlotAccessor<i32>,

    // --- visual ---
    pub fg_color: SlotAccessor<u32>,
    pub bg_color: SlotAccessor<u32>,
    pub border_color: SlotAccessor<u32>,

    // --- layout ---
    pub width: SlotAccessor<f32>,
    pub height: SlotAccessor<f32>,
    pub flex_grow: SlotAccessor<f32>,

    // --- interaction ---
    pub focusable: SlotAccessor<u8>,
    pub focused: SlotAccessor<u8>,
    pub tab_index: SlotAccessor<i32>,
    pub cursor_position: SlotAccessor<i32>,
    pub selection_start: SlotAccessor<i32>,
    pub selection_end: SlotAccessor<i32>,
}

impl NodeArrays {
    pub fn new(buffer: Arc<SharedBuffer>, notifier: Rc<dyn Notifier>) -> Self {
        let u8_slot = |offset, default| {
            SlotAccessor::<u8>::new(buffer.clone(), offset, default, notifier.clone())
        };
        let i32_slot = |offset, default| {
            SlotAccessor::<i32>::new(buffer.clone(), offset, default, notifier.clone())
        };
        let u32_slot =
            |offset| SlotAccessor::<u32>::new(buffer.clone(), offset, 0, notifier.clone());
        let f32_slot =
            |offset| SlotAccessor::<f32>::new(buffer.clone(), offset, 0.0, notifier.clone());

        Self {
            component_type: u8_slot(U_COMPONENT_TYPE, ComponentType::None as u8),
            visible: u8_slot(U_VISIBLE, 1),
            parent: i32_slot(I_PARENT_INDEX, NONE),
            first_child: i32_slot(I_FIRST_CHILD, NONE),
            last_child: i32_slot(I_LAST_CHILD, NONE),
            prev_sibling: i32_slot(I_PREV_SIBLING, NONE),
            next_sibling: i32_slot(I_NEXT_SIBLING, NONE),

            fg_color: u32_slot(C_FG_COLOR),
            bg_color: u32_slot(C_BG_COLOR),
            border_color: u32_slot(C_BORDER_COLOR),

            width: f32_slot(F_WIDTH),
            height: f32_slot(F_HEIGHT),
            flex_grow: f32_slot(F_FLEX_GROW),

            focusable: u8_slot(U_FOCUSABLE, 0),
            focused: u8_slot(U_FOCUSED, 0),
            tab_index: i32_slot(I_TAB_INDEX, 0),
            cursor_position: i32_slot(I_CURSOR_POSITION, 0),
            selection_start: i32_slot(I_SELECTION_START, 0),
            selection_end: i32_slot(I_SELECTION_END, 0),

            buffer,
            notifier,
        }
    }

    #[inline]
    pub fn buffer(&self) -> &Arc<SharedBuffer> {
        &self.buffer
    }

    #[inline]
    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Owned handle to the notifier, for batches that outlive a borrow of `self`.
    #[inline]
    pub(crate) fn notifier_handle(&self) -> Rc<dyn Notifier> {
        self.notifier.clone()
    }

    /// Number of node records the table can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    // =========================================================================
    // Typed helpers
    // =========================================================================

    pub fn component(&self, index: usize) -> ComponentType {
        ComponentType::from(self.component_type.get(index))
    }

    pub fn set_component(&self, index: usize, ty: ComponentType) {
        self.component_type.set(index, ty as u8);
    }

    pub fn is_visible(&self, index: usize) -> bool {
        self.visible.get(index) != 0
    }

    pub fn is_focusable(&self, index: usize) -> bool {
        self.focusable.get(index) != 0
    }

    pub fn set_focusable(&self, index: usize, focusable: bool) {
        self.focusable.set(index, focusable as u8);
    }

    pub fn parent_of(&self, index: usize) -> Option<usize> {
        index_from_raw(self.parent.get(index))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Point every hierarchy field at `NONE` without notifying.
    ///
    /// Runs on allocation, before any link, so a zeroed record is never read
    /// as "points to index 0".
    pub(crate) fn reset_hierarchy(&self, index: usize) {
        for slot in [
            &self.parent,
            &self.first_child,
            &self.last_child,
            &self.prev_sibling,
            &self.next_sibling,
        ] {
            slot.write_silent(index, NONE);
        }
    }

    /// Restore the whole record at `index` to its defaults, then notify.
    pub fn clear_all_at_index(&self, index: usize) {
        self.buffer.clear_node(index);
        self.notifier.notify();
    }
}
