//! Focus System - Keyboard navigation and focus state
//!
//! Manages focus state and navigation:
//! - `focused` signal (currently focused node)
//! - Focus cycling (Tab/Shift+Tab) ordered by tab index, then index
//! - Focus history for restoration
//!
//! Every change returns the [`FocusEvent`]s it produced (blur first, then
//! focus) so the caller can dispatch them. The node `focused` flag is written
//! through the slot accessors, so the native side sees it.

use std::cell::RefCell;
use std::rc::Rc;

use spark_signals::{signal, Signal};
use tracing::trace;

use crate::engine::IndexRegistry;
use crate::pipeline::notify::batch;

use super::events::FocusEvent;

const MAX_HISTORY: usize = 10;

#[derive(Debug, Clone)]
struct FocusHistoryEntry {
    index: usize,
    id: Option<String>,
}

/// Focused node and focus history.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct FocusManager {
    focused: Signal<Option<usize>>,
    history: Rc<RefCell<Vec<FocusHistoryEntry>>>,
}

impl Default for FocusManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FocusManager {
    pub fn new() -> Self {
        Self {
            focused: signal(None),
            history: Rc::new(RefCell::new(Vec::new())),
        }
    }

    // =========================================================================
    // FOCUSED INDEX
    // =========================================================================

    /// Currently focused node
    pub fn focused(&self) -> Option<usize> {
        self.focused.get()
    }

    pub fn focused_signal(&self) -> Signal<Option<usize>> {
        self.focused.clone()
    }

    pub fn has_focus(&self) -> bool {
        self.focused().is_some()
    }

    pub fn is_focused(&self, index: usize) -> bool {
        self.focused() == Some(index)
    }

    /// Live, focusable and visible.
    pub fn can_focus(registry: &IndexRegistry, index: usize) -> bool {
        let arrays = registry.arrays();
        registry.is_allocated(index) && arrays.is_focusable(index) && arrays.is_visible(index)
    }

    fn set_focus(&mut self, registry: &IndexRegistry, next: Option<usize>) -> Vec<FocusEvent> {
        let previous = self.focused();
        if previous == next {
            return Vec::new();
        }

        let arrays = registry.arrays();
        let mut events = Vec::with_capacity(2);
        batch(arrays.notifier(), || {
            if let Some(old) = previous {
                if registry.is_allocated(old) {
                    arrays.focused.set(old, 0);
                }
                events.push(FocusEvent { index: old, gained: false });
            }
            if let Some(new) = next {
                arrays.focused.set(new, 1);
                events.push(FocusEvent { index: new, gained: true });
            }
        });

        self.focused.set(next);
        trace!(?previous, ?next, "focus changed");
        events
    }

    // =========================================================================
    // FOCUS HISTORY
    // =========================================================================

    fn save_to_history(&mut self, registry: &IndexRegistry) {
        let Some(index) = self.focused() else { return };
        let id = registry.id_of(index).map(str::to_string);
        let mut history = self.history.borrow_mut();
        history.push(FocusHistoryEntry { index, id });
        if history.len() > MAX_HISTORY {
            history.remove(0);
        }
    }

    /// Refocus the most recent history entry that is still the same node
    /// and still focusable. Empty if nothing was restored.
    pub fn restore_from_history(&mut self, registry: &IndexRegistry) -> Vec<FocusEvent> {
        loop {
            let Some(entry) = self.history.borrow_mut().pop() else { break };
            // Index may have been recycled for a different node
            if registry.id_of(entry.index) != entry.id.as_deref() {
                continue;
            }
            if Self::can_focus(registry, entry.index) {
                return self.set_focus(registry, Some(entry.index));
            }
        }
        Vec::new()
    }

    pub fn history_len(&self) -> usize {
        self.history.borrow().len()
    }

    // =========================================================================
    // FOCUSABLE QUERIES
    // =========================================================================

    /// All focusable node indices in tab order.
    pub fn focusable_indices(registry: &IndexRegistry) -> Vec<usize> {
        let arrays = registry.arrays();
        let mut result: Vec<usize> = registry
            .allocated_indices()
            .into_iter()
            .filter(|&i| arrays.is_focusable(i) && arrays.is_visible(i))
            .collect();

        // Same tab index keeps index order
        result.sort_by_key(|&i| (arrays.tab_index.get(i), i));
        result
    }

    // =========================================================================
    // FOCUS NAVIGATION
    // =========================================================================

    fn find_next_focusable(&self, registry: &IndexRegistry, forward: bool) -> Option<usize> {
        let focusables = Self::focusable_indices(registry);
        if focusables.is_empty() {
            return None;
        }

        let len = focusables.len();
        let current = self
            .focused()
            .and_then(|f| focusables.iter().position(|&i| i == f));

        let pos = match (current, forward) {
            (None, true) => 0,
            (None, false) => len - 1,
            (Some(pos), true) => (pos + 1) % len,
            (Some(pos), false) => (pos + len - 1) % len,
        };
        Some(focusables[pos])
    }

    fn move_focus(&mut self, registry: &IndexRegistry, target: Option<usize>) -> Vec<FocusEvent> {
        match target {
            Some(next) if Some(next) != self.focused() => {
                self.save_to_history(registry);
                self.set_focus(registry, Some(next))
            }
            _ => Vec::new(),
        }
    }

    /// Move focus to the next focusable node, wrapping.
    pub fn focus_next(&mut self, registry: &IndexRegistry) -> Vec<FocusEvent> {
        let next = self.find_next_focusable(registry, true);
        self.move_focus(registry, next)
    }

    /// Move focus to the previous focusable node, wrapping.
    pub fn focus_previous(&mut self, registry: &IndexRegistry) -> Vec<FocusEvent> {
        let prev = self.find_next_focusable(registry, false);
        self.move_focus(registry, prev)
    }

    /// Focus a specific node. Empty if it cannot take focus or already has it.
    pub fn focus(&mut self, registry: &IndexRegistry, index: usize) -> Vec<FocusEvent> {
        if !Self::can_focus(registry, index) {
            return Vec::new();
        }
        self.move_focus(registry, Some(index))
    }

    pub fn focus_first(&mut self, registry: &IndexRegistry) -> Vec<FocusEvent> {
        let first = Self::focusable_indices(registry).first().copied();
        self.move_focus(registry, first)
    }

    pub fn focus_last(&mut self, registry: &IndexRegistry) -> Vec<FocusEvent> {
        let last = Self::focusable_indices(registry).last().copied();
        self.move_focus(registry, last)
    }

    /// Clear focus (no node focused).
    pub fn blur(&mut self, registry: &IndexRegistry) -> Vec<FocusEvent> {
        if !self.has_focus() {
            return Vec::new();
        }
        self.save_to_history(registry);
        self.set_focus(registry, None)
    }

    /// Forget a released index. Drops focus silently if it held it.
    pub fn forget(&self, index: usize) {
        if self.is_focused(index) {
            self.focused.set(None);
        }
        self.history.borrow_mut().retain(|entry| entry.index != index);
    }

    /// Reset all focus state.
    pub fn reset(&self) {
        self.focused.set(None);
        self.history.borrow_mut().clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================
