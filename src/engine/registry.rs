//! Index Registry - Index allocation over the shared node table.
//!
//! Manages the lifecycle of node indices:
//! - ID ↔ Index bidirectional mapping
//! - Free index pool for O(1) reuse (LIFO)
//! - Parent/child hierarchy as an O(1) doubly-linked sibling list stored in
//!   the node records themselves
//! - Parent context stack for nested node creation
//! - Live count signal so reactive consumers track add/remove
//!
//! The registry is owned by the main context. No other context allocates or
//! releases indices.

use std::collections::{HashMap, HashSet};
use std::fmt;

use spark_signals::{signal, Signal};
use tracing::{debug, trace};

use crate::error::{BridgeError, Result};
use crate::pipeline::notify::batch;
use crate::shared_buffer::{index_from_raw, NONE};
use crate::state::dispatch::Hierarchy;

use super::arrays::NodeArrays;

// =============================================================================
// Registry State
// =============================================================================

/// Allocates, links and frees node indices.
pub struct IndexRegistry {
    arrays: NodeArrays,

    /// Map node ID to index.
    id_to_index: HashMap<String, usize>,

    /// Map index to node ID.
    index_to_id: HashMap<usize, String>,

    /// Currently allocated indices.
    allocated: HashSet<usize>,

    /// Pool of freed indices for reuse.
    free: Vec<usize>,

    /// Next index to issue if the pool is empty.
    next_index: usize,

    /// Counter for generated IDs.
    id_counter: usize,

    /// Stack of parent indices for nested node creation.
    parent_stack: Vec<usize>,

    /// Destroy callbacks registered per index.
    destroy_callbacks: HashMap<usize, Vec<Box<dyn FnOnce()>>>,

    /// Hooks run for every released index, for per-index state owned elsewhere.
    release_hooks: Vec<Box<dyn Fn(usize)>>,

    live_count: Signal<usize>,
}

impl IndexRegistry {
    pub fn new(arrays: NodeArrays) -> Self {
        Self {
            arrays,
            id_to_index: HashMap::new(),
            index_to_id: HashMap::new(),
            allocated: HashSet::new(),
            free: Vec::new(),
            next_index: 0,
            id_counter: 0,
            parent_stack: Vec::new(),
            destroy_callbacks: HashMap::new(),
            release_hooks: Vec::new(),
            live_count: signal(0),
        }
    }

    /// Node field accessors backing this registry.
    #[inline]
    pub fn arrays(&self) -> &NodeArrays {
        &self.arrays
    }

    // =========================================================================
    // Parent Context Stack
    // =========================================================================

    /// Current parent index (`None` at root).
    pub fn current_parent(&self) -> Option<usize> {
        self.parent_stack.last().copied()
    }

    pub fn push_parent_context(&mut self, index: usize) {
        self.parent_stack.push(index);
    }

    pub fn pop_parent_context(&mut self) -> Option<usize> {
        self.parent_stack.pop()
    }

    // =========================================================================
    // Index Allocation
    // =========================================================================

    /// Allocate an index for a new node.
    ///
    /// Idempotent by `id`: an id that is already mapped returns its existing
    /// index. Without an id, a unique `c{n}` id is generated.
    pub fn allocate(&mut self, id: Option<&str>) -> Result<usize> {
        let node_id = match id {
            Some(id) => {
                if let Some(&index) = self.id_to_index.get(id) {
                    return Ok(index);
                }
                id.to_string()
            }
            None => self.generate_id(),
        };

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let capacity = self.arrays.capacity();
                if self.next_index >= capacity {
                    return Err(BridgeError::CapacityExhausted { capacity });
                }
                let index = self.next_index;
                self.next_index += 1;
                index
            }
        };

        // Sentinels before anything can link to this record
        self.arrays.reset_hierarchy(index);

        trace!(index, id = %node_id, "allocated index");
        self.id_to_index.insert(node_id.clone(), index);
        self.index_to_id.insert(index, node_id);
        self.allocated.insert(index);

        self.arrays.buffer().set_node_count(self.next_index as u32);
        self.live_count.set(self.allocated.len());
        self.arrays.notifier().notify();

        Ok(index)
    }

    /// Allocate and link beneath the current parent context, if any.
    pub fn allocate_in_context(&mut self, id: Option<&str>) -> Result<usize> {
        let index = self.allocate(id)?;
        if let Some(parent) = self.current_parent() {
            self.link_child(index, parent)?;
        }
        Ok(index)
    }

    fn generate_id(&mut self) -> String {
        loop {
            let id = format!("c{}", self.id_counter);
            self.id_counter += 1;
            if !self.id_to_index.contains_key(&id) {
                return id;
            }
        }
    }

    fn ensure_allocated(&self, index: usize) -> Result<()> {
        if self.allocated.contains(&index) {
            Ok(())
        } else {
            Err(BridgeError::UnknownIndex(index))
        }
    }

    // =========================================================================
    // Hierarchy
    // =========================================================================

    /// Append `child` to `parent`'s sibling list in O(1).
    ///
    /// A child that already has a parent is unlinked first. Linking a node
    /// beneath itself or one of its descendants is rejected.
    pub fn link_child(&mut self, child: usize, parent: usize) -> Result<()> {
        self.ensure_allocated(child)?;
        self.ensure_allocated(parent)?;
        if child == parent || self.ancestors(parent).any(|a| a == child) {
            return Err(BridgeError::HierarchyCycle { child, parent });
        }

        let arrays = &self.arrays;
        batch(arrays.notifier(), || {
            detach(arrays, child);

            let last = arrays.last_child.get(parent);
            arrays.parent.set(child, parent as i32);
            arrays.prev_sibling.set(child, last);
            arrays.next_sibling.set(child, NONE);
            match index_from_raw(last) {
                Some(last) => arrays.next_sibling.set(last, child as i32),
                None => arrays.first_child.set(parent, child as i32),
            }
            arrays.last_child.set(parent, child as i32);
        });
        Ok(())
    }

    /// Remove `index` from its parent's sibling list in O(1).
    ///
    /// A node without a parent is left as is.
    pub fn unlink_child(&mut self, index: usize) {
        if !self.allocated.contains(&index) {
            return;
        }
        let arrays = &self.arrays;
        batch(arrays.notifier(), || detach(arrays, index));
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Release an index and its whole subtree back to the pool.
    ///
    /// Descendants are released before their parents. Returns every released
    /// index in release order. Releasing an unknown index is a no-op.
    pub fn release(&mut self, index: usize) -> Vec<usize> {
        if !self.allocated.contains(&index) {
            return Vec::new();
        }

        let order = self.subtree_post_order(index);
        let notifier = self.arrays.notifier_handle();
        batch(notifier.as_ref(), || {
            for &i in &order {
                self.release_one(i);
            }

            // When every node is gone, start over so indices stay dense
            if self.allocated.is_empty() {
                self.free.clear();
                self.next_index = 0;
                self.arrays.buffer().set_node_count(0);
                debug!("registry empty, index space compacted");
            }
        });
        debug!(index, released = order.len(), "released subtree");
        self.live_count.set(self.allocated.len());

        order
    }

    fn release_one(&mut self, index: usize) {
        detach(&self.arrays, index);
        self.run_destroy_callbacks(index);
        for hook in &self.release_hooks {
            hook(index);
        }

        self.arrays.clear_all_at_index(index);
        if let Some(id) = self.index_to_id.remove(&index) {
            self.id_to_index.remove(&id);
        }
        self.allocated.remove(&index);
        self.free.push(index);
    }

    /// Indices of the subtree rooted at `index`, children before parents.
    fn subtree_post_order(&self, index: usize) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![(index, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            stack.push((current, true));
            let children: Vec<usize> = self.children(current).collect();
            stack.extend(children.into_iter().rev().map(|child| (child, false)));
        }
        order
    }

    // =========================================================================
    // Destroy Callbacks
    // =========================================================================

    /// Register a callback to run when the node at `index` is released.
    pub fn on_destroy(&mut self, index: usize, callback: impl FnOnce() + 'static) {
        self.destroy_callbacks
            .entry(index)
            .or_default()
            .push(Box::new(callback));
    }

    /// Register a hook that runs for every index this registry releases,
    /// after that index's destroy callbacks. Hooks stay registered for the
    /// registry's lifetime and also run for each node dropped by `reset`.
    pub fn on_release(&mut self, hook: impl Fn(usize) + 'static) {
        self.release_hooks.push(Box::new(hook));
    }

    fn run_destroy_callbacks(&mut self, index: usize) {
        if let Some(callbacks) = self.destroy_callbacks.remove(&index) {
            for callback in callbacks {
                callback();
            }
        }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get index for a node ID.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.id_to_index.get(id).copied()
    }

    /// Get ID for an index.
    pub fn id_of(&self, index: usize) -> Option<&str> {
        self.index_to_id.get(&index).map(String::as_str)
    }

    /// Check if an index is currently allocated.
    pub fn is_allocated(&self, index: usize) -> bool {
        self.allocated.contains(&index)
    }

    /// Highest index issued so far (the next fresh index).
    pub fn capacity(&self) -> usize {
        self.next_index
    }

    /// Number of currently allocated nodes.
    pub fn live_count(&self) -> usize {
        self.allocated.len()
    }

    /// Live count as a signal.
    pub fn live_count_signal(&self) -> Signal<usize> {
        self.live_count.clone()
    }

    /// All allocated indices, ascending.
    pub fn allocated_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.allocated.iter().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.pointer(self.arrays.parent.get(index))
    }

    pub fn first_child(&self, index: usize) -> Option<usize> {
        self.pointer(self.arrays.first_child.get(index))
    }

    pub fn last_child(&self, index: usize) -> Option<usize> {
        self.pointer(self.arrays.last_child.get(index))
    }

    pub fn next_sibling(&self, index: usize) -> Option<usize> {
        self.pointer(self.arrays.next_sibling.get(index))
    }

    pub fn prev_sibling(&self, index: usize) -> Option<usize> {
        self.pointer(self.arrays.prev_sibling.get(index))
    }

    /// Children of `index` in sibling order.
    pub fn children(&self, index: usize) -> Children<'_> {
        Children {
            registry: self,
            next: self.first_child(index),
            remaining: self.arrays.capacity(),
        }
    }

    pub fn child_count(&self, index: usize) -> usize {
        self.children(index).count()
    }

    /// Parent chain of `index`, nearest first.
    pub fn ancestors(&self, index: usize) -> Ancestors<'_> {
        Ancestors {
            registry: self,
            next: self.parent(index),
            remaining: self.arrays.capacity(),
        }
    }

    /// Raw hierarchy pointer to an index, rejecting anything off the table.
    fn pointer(&self, raw: i32) -> Option<usize> {
        index_from_raw(raw).filter(|&i| i < self.arrays.capacity())
    }

    // =========================================================================
    // Reset
    // =========================================================================

    /// Drop every node and all registry state. Destroy callbacks are discarded
    /// without running.
    pub fn reset(&mut self) {
        let notifier = self.arrays.notifier_handle();
        batch(notifier.as_ref(), || {
            for &index in &self.allocated {
                self.arrays.clear_all_at_index(index);
                for hook in &self.release_hooks {
                    hook(index);
                }
            }
            self.arrays.buffer().set_node_count(0);
        });
        self.id_to_index.clear();
        self.index_to_id.clear();
        self.allocated.clear();
        self.free.clear();
        self.next_index = 0;
        self.id_counter = 0;
        self.parent_stack.clear();
        self.destroy_callbacks.clear();
        self.live_count.set(0);
    }
}

impl Hierarchy for IndexRegistry {
    fn parent_of(&self, index: usize) -> Option<usize> {
        self.parent(index).filter(|&p| self.is_allocated(p))
    }

    fn is_live(&self, index: usize) -> bool {
        self.is_allocated(index)
    }
}

impl fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexRegistry")
            .field("live", &self.allocated.len())
            .field("free", &self.free.len())
            .field("next_index", &self.next_index)
            .finish()
    }
}

/// Unlink `index` from its parent's sibling list, patching endpoints.
fn detach(arrays: &NodeArrays, index: usize) {
    let Some(parent) = arrays.parent_of(index) else { return };
    let prev = arrays.prev_sibling.get(index);
    let next = arrays.next_sibling.get(index);

    match index_from_raw(prev) {
        Some(prev) => arrays.next_sibling.set(prev, next),
        None => arrays.first_child.set(parent, next),
    }
    match index_from_raw(next) {
        Some(next) => arrays.prev_sibling.set(next, prev),
        None => arrays.last_child.set(parent, prev),
    }

    arrays.parent.set(index, NONE);
    arrays.prev_sibling.set(index, NONE);
    arrays.next_sibling.set(index, NONE);
}

// =============================================================================
// Iterators
// =============================================================================

/// Walks a sibling list. Bounded by the table capacity.
pub struct Children<'a> {
    registry: &'a IndexRegistry,
    next: Option<usize>,
    remaining: usize,
}

impl Iterator for Children<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.next = self.registry.next_sibling(current);
        Some(current)
    }
}

/// Walks the parent chain. Bounded by the table capacity.
pub struct Ancestors<'a> {
    registry: &'a IndexRegistry,
    next: Option<usize>,
    remaining: usize,
}

impl Iterator for Ancestors<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.next = self.registry.parent(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::Arc;

    use crate::pipeline::notify::{NoopNotifier, Notifier};
    use crate::shared_buffer::{ComponentType, SharedBuffer};

    fn registry(capacity: usize) -> IndexRegistry {
        let buffer = Arc::new(SharedBuffer::new(capacity));
        IndexRegistry::new(NodeArrays::new(buffer, Rc::new(NoopNotifier)))
    }

    #[test]
    fn test_allocate_index() {
        let mut reg = registry(8);

        let idx1 = reg.allocate(None).unwrap();
        let idx2 = reg.allocate(None).unwrap();
        let idx3 = reg.allocate(Some("my_box")).unwrap();

        assert_eq!((idx1, idx2, idx3), (0, 1, 2));
        assert!(reg.is_allocated(2));
        assert!(!reg.is_allocated(3));
        assert_eq!(reg.live_count(), 3);
        assert_eq!(reg.capacity(), 3);
        assert_eq!(reg.arrays().buffer().node_count(), 3);
    }

    #[test]
    fn test_allocate_idempotent_by_id() {
        let mut reg = registry(4);
        let a = reg.allocate(Some("header")).unwrap();
        let b = reg.allocate(Some("header")).unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.live_count(), 1);
    }

    #[test]
    fn test_generated_ids_skip_taken_names() {
        let mut reg = registry(4);
        reg.allocate(Some("c0")).unwrap();
        let generated = reg.allocate(None).unwrap();
        assert_eq!(reg.id_of(generated), Some("c1"));
    }

    #[test]
    fn test_free_pool_lifo_reuse() {
        let mut reg = registry(8);
        for _ in 0..3 {
            reg.allocate(None).unwrap();
        }

        assert_eq!(reg.release(1), vec![1]);
        assert!(!reg.is_allocated(1));
        assert_eq!(reg.allocate(None).unwrap(), 1);
    }

    #[test]
    fn test_capacity_exhausted() {
        let mut reg = registry(2);
        reg.allocate(None).unwrap();
        reg.allocate(None).unwrap();
        let err = reg.allocate(None).unwrap_err();
        assert!(matches!(err, BridgeError::CapacityExhausted { capacity: 2 }));
    }

    #[test]
    fn test_fresh_index_reports_none() {
        let mut reg = registry(4);
        let root = reg.allocate(None).unwrap();
        let fresh = reg.allocate(None).unwrap();
        assert_eq!(root, 0);

        assert_eq!(reg.parent(fresh), None);
        assert_eq!(reg.first_child(fresh), None);
        assert_eq!(reg.last_child(fresh), None);
        assert_eq!(reg.next_sibling(fresh), None);
        assert_eq!(reg.prev_sibling(fresh), None);
        assert_eq!(reg.children(root).count(), 0);
    }

    #[test]
    fn test_recycled_index_is_reset() {
        let mut reg = registry(4);
        let parent = reg.allocate(None).unwrap();
        let child = reg.allocate(None).unwrap();
        reg.link_child(child, parent).unwrap();
        reg.arrays().set_component(child, ComponentType::Text);

        reg.release(child);
        let again = reg.allocate(None).unwrap();

        assert_eq!(again, child);
        assert_eq!(reg.parent(again), None);
        assert_eq!(reg.arrays().component(again), ComponentType::None);
        assert_eq!(reg.children(parent).count(), 0);
    }

    #[test]
    fn test_sibling_list_unlink_middle() {
        let mut reg = registry(8);
        let parent = reg.allocate(None).unwrap();
        let kids: Vec<usize> = (0..3).map(|_| reg.allocate(None).unwrap()).collect();
        for &k in &kids {
            reg.link_child(k, parent).unwrap();
        }
        assert_eq!(reg.children(parent).collect::<Vec<_>>(), kids);

        reg.unlink_child(kids[1]);

        assert_eq!(reg.children(parent).collect::<Vec<_>>(), vec![kids[0], kids[2]]);
        assert_eq!(reg.next_sibling(kids[0]), Some(kids[2]));
        assert_eq!(reg.prev_sibling(kids[2]), Some(kids[0]));
        assert_eq!(reg.parent(kids[1]), None);
    }

    #[test]
    fn test_unlink_endpoints() {
        let mut reg = registry(8);
        let parent = reg.allocate(None).unwrap();
        let a = reg.allocate(None).unwrap();
        let b = reg.allocate(None).unwrap();
        reg.link_child(a, parent).unwrap();
        reg.link_child(b, parent).unwrap();

        reg.unlink_child(a);
        assert_eq!(reg.first_child(parent), Some(b));
        assert_eq!(reg.prev_sibling(b), None);

        reg.unlink_child(b);
        assert_eq!(reg.first_child(parent), None);
        assert_eq!(reg.last_child(parent), None);
        assert_eq!(reg.child_count(parent), 0);
    }

    #[test]
    fn test_relink_moves_child() {
        let mut reg = registry(8);
        let p1 = reg.allocate(None).unwrap();
        let p2 = reg.allocate(None).unwrap();
        let c = reg.allocate(None).unwrap();

        reg.link_child(c, p1).unwrap();
        reg.link_child(c, p2).unwrap();

        assert_eq!(reg.child_count(p1), 0);
        assert_eq!(reg.children(p2).collect::<Vec<_>>(), vec![c]);
        assert_eq!(reg.parent(c), Some(p2));
    }

    #[test]
    fn test_link_rejects_cycles_and_unknown() {
        let mut reg = registry(8);
        let a = reg.allocate(None).unwrap();
        let b = reg.allocate(None).unwrap();
        reg.link_child(b, a).unwrap();

        assert!(matches!(reg.link_child(a, b), Err(BridgeError::HierarchyCycle { .. })));
        assert!(matches!(reg.link_child(a, a), Err(BridgeError::HierarchyCycle { .. })));
        assert!(matches!(reg.link_child(7, a), Err(BridgeError::UnknownIndex(7))));
    }

    #[test]
    fn test_recursive_release() {
        let mut reg = registry(8);
        let root = reg.allocate(None).unwrap();
        let parent = reg.allocate(None).unwrap();
        let c1 = reg.allocate(None).unwrap();
        let c2 = reg.allocate(None).unwrap();
        reg.link_child(parent, root).unwrap();
        reg.link_child(c1, parent).unwrap();
        reg.link_child(c2, parent).unwrap();

        let released = reg.release(parent);

        assert_eq!(released, vec![c1, c2, parent]);
        for i in [parent, c1, c2] {
            assert!(!reg.is_allocated(i));
        }
        assert_eq!(reg.child_count(root), 0);
        assert!(reg.release(parent).is_empty());
        assert_eq!(reg.live_count(), 1);
    }

    #[test]
    fn test_compaction_when_empty() {
        let mut reg = registry(8);
        let a = reg.allocate(None).unwrap();
        let b = reg.allocate(None).unwrap();
        reg.link_child(b, a).unwrap();

        reg.release(a);

        assert_eq!(reg.live_count(), 0);
        assert_eq!(reg.capacity(), 0);
        assert_eq!(reg.arrays().buffer().node_count(), 0);
        assert_eq!(reg.allocate(None).unwrap(), 0);
    }

    #[test]
    fn test_id_mapping() {
        let mut reg = registry(4);
        let idx = reg.allocate(Some("test_component")).unwrap();
        assert_eq!(reg.index_of("test_component"), Some(idx));
        assert_eq!(reg.id_of(idx), Some("test_component"));

        reg.release(idx);
        assert_eq!(reg.index_of("test_component"), None);
        assert_eq!(reg.id_of(idx), None);
    }

    #[test]
    fn test_parent_context() {
        let mut reg = registry(8);
        assert_eq!(reg.current_parent(), None);

        let root = reg.allocate(None).unwrap();
        reg.push_parent_context(root);
        let child = reg.allocate_in_context(None).unwrap();
        reg.push_parent_context(child);
        let grandchild = reg.allocate_in_context(None).unwrap();
        assert_eq!(reg.current_parent(), Some(child));

        assert_eq!(reg.pop_parent_context(), Some(child));
        assert_eq!(reg.pop_parent_context(), Some(root));
        assert_eq!(reg.current_parent(), None);

        assert_eq!(reg.ancestors(grandchild).collect::<Vec<_>>(), vec![child, root]);
    }

    #[test]
    fn test_destroy_callback() {
        let mut reg = registry(4);
        let called = Rc::new(Cell::new(0));

        let parent = reg.allocate(None).unwrap();
        let child = reg.allocate(None).unwrap();
        reg.link_child(child, parent).unwrap();
        for idx in [parent, child] {
            let called = called.clone();
            reg.on_destroy(idx, move || called.set(called.get() + 1));
        }

        assert_eq!(called.get(), 0);
        reg.release(parent);
        assert_eq!(called.get(), 2);
    }

    #[test]
    fn test_live_count_signal() {
        let mut reg = registry(4);
        let live = reg.live_count_signal();

        let a = reg.allocate(None).unwrap();
        reg.allocate(None).unwrap();
        assert_eq!(live.get(), 2);

        reg.release(a);
        assert_eq!(live.get(), 1);
    }

    /// Counts fires and records the header node count each fire observes.
    #[derive(Default)]
    struct CountingNotifier {
        count: Cell<u32>,
        depth: Cell<u32>,
        pending: Cell<bool>,
        buffer: RefCell<Option<Arc<SharedBuffer>>>,
        seen_node_counts: RefCell<Vec<u32>>,
    }

    impl CountingNotifier {
        fn fire(&self) {
            self.count.set(self.count.get() + 1);
            if let Some(buffer) = self.buffer.borrow().as_ref() {
                self.seen_node_counts.borrow_mut().push(buffer.node_count());
            }
        }
    }

    impl Notifier for CountingNotifier {
        fn notify(&self) {
            if self.depth.get() > 0 {
                self.pending.set(true);
            } else {
                self.fire();
            }
        }

        fn begin_batch(&self) {
            self.depth.set(self.depth.get() + 1);
        }

        fn end_batch(&self) {
            self.depth.set(self.depth.get() - 1);
            if self.depth.get() == 0 && self.pending.replace(false) {
                self.fire();
            }
        }
    }

    #[test]
    fn test_structural_changes_notify_once() {
        let notifier = Rc::new(CountingNotifier::default());
        let buffer = Arc::new(SharedBuffer::new(8));
        let mut reg = IndexRegistry::new(NodeArrays::new(buffer, notifier.clone()));

        let parent = reg.allocate(None).unwrap();
        let child = reg.allocate(None).unwrap();
        notifier.count.set(0);

        reg.link_child(child, parent).unwrap();
        assert_eq!(notifier.count.get(), 1);

        reg.release(parent);
        assert_eq!(notifier.count.get(), 2);
    }

    #[test]
    fn test_compaction_is_visible_at_notify() {
        let notifier = Rc::new(CountingNotifier::default());
        let buffer = Arc::new(SharedBuffer::new(8));
        *notifier.buffer.borrow_mut() = Some(buffer.clone());
        let mut reg = IndexRegistry::new(NodeArrays::new(buffer.clone(), notifier.clone()));

        let a = reg.allocate(None).unwrap();
        let b = reg.allocate(None).unwrap();
        reg.link_child(b, a).unwrap();
        notifier.seen_node_counts.borrow_mut().clear();

        reg.release(a);

        // The single wake already sees the emptied table
        assert_eq!(*notifier.seen_node_counts.borrow(), vec![0]);
        assert_eq!(buffer.node_count(), 0);
    }

    #[test]
    fn test_release_hooks_run_for_subtree() {
        let mut reg = registry(8);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        reg.on_release(move |index| s.borrow_mut().push(index));

        let root = reg.allocate(None).unwrap();
        let child = reg.allocate(None).unwrap();
        let other = reg.allocate(None).unwrap();
        reg.link_child(child, root).unwrap();

        reg.release(root);
        assert_eq!(*seen.borrow(), vec![child, root]);

        // Hooks persist, and reset counts as a release
        reg.reset();
        assert_eq!(*seen.borrow(), vec![child, root, other]);
    }

    #[test]
    fn test_reset() {
        let mut reg = registry(4);
        let a = reg.allocate(Some("a")).unwrap();
        reg.push_parent_context(a);
        reg.on_destroy(a, || panic!("reset must not run destroy callbacks"));

        reg.reset();

        assert_eq!(reg.live_count(), 0);
        assert_eq!(reg.index_of("a"), None);
        assert_eq!(reg.current_parent(), None);
        assert_eq!(reg.allocate(None).unwrap(), 0);
        assert_eq!(reg.id_of(0), Some("c0"));
    }
}
