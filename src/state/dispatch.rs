//! Event Dispatcher - routes decoded input to handlers.
//!
//! Routing only. Handlers perform effects; the dispatcher never touches
//! node state.
//!
//! # Dispatch order
//!
//! 1. Global handlers for the event category, in registration order
//! 2. Handlers registered on the target index
//! 3. For bubbling categories (key, scroll), handlers on each parent up to
//!    the root
//!
//! A handler returning `true` consumes the event and nothing after it runs.
//!
//! # Example
//!
//! ```ignore
//! let dispatcher = Dispatcher::new();
//!
//! // Every key, never consumes
//! dispatcher.on_key(|event| println!("key {}", event.keycode));
//!
//! // Enter on node 3 (or bubbling up from its children)
//! dispatcher.on_key_at(3, |event| event.keycode == 13);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use spark_signals::{signal, Signal};
use tracing::{error, trace};

use super::events::{EventCategory, FocusEvent, InputEvent, KeyEvent, MouseEvent, ScrollEvent};

/// Upper bound on parent hops while bubbling.
const MAX_BUBBLE_DEPTH: usize = 1 << 16;

// =============================================================================
// TYPES
// =============================================================================

/// Parent lookup used for target validation and bubbling.
pub trait Hierarchy {
    /// Live parent of `index`, if any.
    fn parent_of(&self, index: usize) -> Option<usize>;

    /// Whether `index` is currently allocated.
    fn is_live(&self, index: usize) -> bool;
}

/// Handler return value. Only an explicit `true` consumes the event.
pub trait Propagation: 'static {
    fn consumed(self) -> bool;
}

impl Propagation for bool {
    fn consumed(self) -> bool {
        self
    }
}

impl Propagation for () {
    fn consumed(self) -> bool {
        false
    }
}

impl Propagation for Option<bool> {
    fn consumed(self) -> bool {
        self == Some(true)
    }
}

/// Stored handler. Return true to consume the event.
type Handler<E> = Rc<dyn Fn(&E) -> bool>;

/// Maps pointer coordinates to the node under them.
pub type HitTester = Box<dyn Fn(u16, u16) -> Option<usize>>;

/// Identifies a registered handler for [`Dispatcher::off`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId {
    category: EventCategory,
    scope: Option<usize>,
    id: usize,
}

impl HandlerId {
    pub fn category(&self) -> EventCategory {
        self.category
    }

    /// Owning index, `None` for global handlers.
    pub fn scope(&self) -> Option<usize> {
        self.scope
    }
}

// =============================================================================
// HANDLER REGISTRY
// =============================================================================

struct HandlerTable<E> {
    global: Vec<(usize, Handler<E>)>,
    scoped: HashMap<usize, Vec<(usize, Handler<E>)>>,
}

impl<E> HandlerTable<E> {
    fn new() -> Self {
        Self {
            global: Vec::new(),
            scoped: HashMap::new(),
        }
    }

    fn insert(&mut self, scope: Option<usize>, id: usize, handler: Handler<E>) {
        match scope {
            None => self.global.push((id, handler)),
            Some(index) => self.scoped.entry(index).or_default().push((id, handler)),
        }
    }

    fn remove(&mut self, scope: Option<usize>, id: usize) -> bool {
        match scope {
            None => {
                let before = self.global.len();
                self.global.retain(|(handler_id, _)| *handler_id != id);
                self.global.len() != before
            }
            Some(index) => {
                let Some(handlers) = self.scoped.get_mut(&index) else {
                    return false;
                };
                let before = handlers.len();
                handlers.retain(|(handler_id, _)| *handler_id != id);
                let removed = handlers.len() != before;
                if handlers.is_empty() {
                    self.scoped.remove(&index);
                }
                removed
            }
        }
    }

    /// Clone out the handlers for one stage so they run without a borrow held.
    fn snapshot(&self, scope: Option<usize>) -> Vec<Handler<E>> {
        let list = match scope {
            None => Some(&self.global),
            Some(index) => self.scoped.get(&index),
        };
        list.map(|l| l.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    fn scoped_len(&self, index: usize) -> usize {
        self.scoped.get(&index).map_or(0, Vec::len)
    }

    fn clear(&mut self) {
        self.global.clear();
        self.scoped.clear();
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// Handler registry and router for every event category.
pub struct Dispatcher {
    keys: RefCell<HandlerTable<KeyEvent>>,
    mouse: RefCell<HandlerTable<MouseEvent>>,
    scroll: RefCell<HandlerTable<ScrollEvent>>,
    focus: RefCell<HandlerTable<FocusEvent>>,
    next_id: Cell<usize>,
    hit_tester: RefCell<Option<HitTester>>,
    last_event: Signal<Option<InputEvent>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            keys: RefCell::new(HandlerTable::new()),
            mouse: RefCell::new(HandlerTable::new()),
            scroll: RefCell::new(HandlerTable::new()),
            focus: RefCell::new(HandlerTable::new()),
            next_id: Cell::new(0),
            hit_tester: RefCell::new(None),
            last_event: signal(None),
        }
    }

    fn next_id(&self) -> usize {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn register<E, R, F>(
        &self,
        table: &RefCell<HandlerTable<E>>,
        category: EventCategory,
        scope: Option<usize>,
        handler: F,
    ) -> HandlerId
    where
        E: 'static,
        R: Propagation,
        F: Fn(&E) -> R + 'static,
    {
        let id = self.next_id();
        table
            .borrow_mut()
            .insert(scope, id, Rc::new(move |event: &E| handler(event).consumed()));
        HandlerId { category, scope, id }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Global key handler.
    pub fn on_key<R: Propagation>(&self, handler: impl Fn(&KeyEvent) -> R + 'static) -> HandlerId {
        self.register(&self.keys, EventCategory::Key, None, handler)
    }

    /// Key handler for one node; also sees keys bubbling up from descendants.
    pub fn on_key_at<R: Propagation>(
        &self,
        index: usize,
        handler: impl Fn(&KeyEvent) -> R + 'static,
    ) -> HandlerId {
        self.register(&self.keys, EventCategory::Key, Some(index), handler)
    }

    /// Global handler for a single keycode.
    pub fn on_key_code<R: Propagation>(
        &self,
        keycode: u32,
        handler: impl Fn(&KeyEvent) -> R + 'static,
    ) -> HandlerId {
        self.on_key(move |event: &KeyEvent| event.keycode == keycode && handler(event).consumed())
    }

    pub fn on_mouse<R: Propagation>(
        &self,
        handler: impl Fn(&MouseEvent) -> R + 'static,
    ) -> HandlerId {
        self.register(&self.mouse, EventCategory::Mouse, None, handler)
    }

    pub fn on_mouse_at<R: Propagation>(
        &self,
        index: usize,
        handler: impl Fn(&MouseEvent) -> R + 'static,
    ) -> HandlerId {
        self.register(&self.mouse, EventCategory::Mouse, Some(index), handler)
    }

    pub fn on_scroll<R: Propagation>(
        &self,
        handler: impl Fn(&ScrollEvent) -> R + 'static,
    ) -> HandlerId {
        self.register(&self.scroll, EventCategory::Scroll, None, handler)
    }

    pub fn on_scroll_at<R: Propagation>(
        &self,
        index: usize,
        handler: impl Fn(&ScrollEvent) -> R + 'static,
    ) -> HandlerId {
        self.register(&self.scroll, EventCategory::Scroll, Some(index), handler)
    }

    pub fn on_focus<R: Propagation>(
        &self,
        handler: impl Fn(&FocusEvent) -> R + 'static,
    ) -> HandlerId {
        self.register(&self.focus, EventCategory::Focus, None, handler)
    }

    pub fn on_focus_at<R: Propagation>(
        &self,
        index: usize,
        handler: impl Fn(&FocusEvent) -> R + 'static,
    ) -> HandlerId {
        self.register(&self.focus, EventCategory::Focus, Some(index), handler)
    }

    /// Unregister a handler. Returns false if it was already gone.
    pub fn off(&self, handler: HandlerId) -> bool {
        let HandlerId { category, scope, id } = handler;
        match category {
            EventCategory::Key => self.keys.borrow_mut().remove(scope, id),
            EventCategory::Mouse => self.mouse.borrow_mut().remove(scope, id),
            EventCategory::Scroll => self.scroll.borrow_mut().remove(scope, id),
            EventCategory::Focus => self.focus.borrow_mut().remove(scope, id),
        }
    }

    /// Drop every handler registered on `index`.
    pub fn cleanup_index(&self, index: usize) {
        self.keys.borrow_mut().scoped.remove(&index);
        self.mouse.borrow_mut().scoped.remove(&index);
        self.scroll.borrow_mut().scoped.remove(&index);
        self.focus.borrow_mut().scoped.remove(&index);
    }

    /// Number of handlers registered on `index` across all categories.
    pub fn handler_count_at(&self, index: usize) -> usize {
        self.keys.borrow().scoped_len(index)
            + self.mouse.borrow().scoped_len(index)
            + self.scroll.borrow().scoped_len(index)
            + self.focus.borrow().scoped_len(index)
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.keys.borrow_mut().clear();
        self.mouse.borrow_mut().clear();
        self.scroll.borrow_mut().clear();
        self.focus.borrow_mut().clear();
    }

    /// Resolver for pointer events that arrive without a target.
    pub fn set_hit_tester(&self, hit_tester: impl Fn(u16, u16) -> Option<usize> + 'static) {
        *self.hit_tester.borrow_mut() = Some(Box::new(hit_tester));
    }

    /// Last dispatched event.
    pub fn last_event(&self) -> Option<InputEvent> {
        self.last_event.get()
    }

    pub fn last_event_signal(&self) -> Signal<Option<InputEvent>> {
        self.last_event.clone()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Route one event. Returns true if a handler consumed it.
    ///
    /// Keys and scrolls without a target go to `focused`; mouse events
    /// without a target are hit-tested.
    pub fn dispatch(
        &self,
        event: &InputEvent,
        tree: &dyn Hierarchy,
        focused: Option<usize>,
    ) -> bool {
        self.last_event.set(Some(*event));
        let category = event.category();

        let consumed = match event {
            InputEvent::Key(e) => route(&self.keys, e, e.target.or(focused), category, tree),
            InputEvent::Scroll(e) => route(&self.scroll, e, e.target.or(focused), category, tree),
            InputEvent::Mouse(e) => {
                let target = e.target.or_else(|| self.hit_test(e.x, e.y));
                route(&self.mouse, e, target, category, tree)
            }
            InputEvent::Focus(e) => route(&self.focus, e, Some(e.index), category, tree),
        };

        trace!(?category, node = ?event.target(), consumed, "dispatched event");
        consumed
    }

    fn hit_test(&self, x: u16, y: u16) -> Option<usize> {
        self.hit_tester.borrow().as_ref().and_then(|hit| hit(x, y))
    }
}

fn route<E>(
    table: &RefCell<HandlerTable<E>>,
    event: &E,
    target: Option<usize>,
    category: EventCategory,
    tree: &dyn Hierarchy,
) -> bool {
    let run = |scope: Option<usize>| {
        let handlers = table.borrow().snapshot(scope);
        handlers.iter().any(|handler| invoke(handler, event, category))
    };

    // 1. Global handlers
    if run(None) {
        return true;
    }

    // 2. Target handlers (released indices never fire)
    let Some(target) = target.filter(|&t| tree.is_live(t)) else {
        return false;
    };
    if run(Some(target)) {
        return true;
    }

    // 3. Bubble to parents
    if !category.bubbles() {
        return false;
    }
    let mut current = tree.parent_of(target);
    let mut hops = 0;
    while let Some(index) = current {
        if hops == MAX_BUBBLE_DEPTH {
            error!(index = target, "parent chain too deep, stopped bubbling");
            break;
        }
        if run(Some(index)) {
            return true;
        }
        current = tree.parent_of(index);
        hops += 1;
    }
    false
}

/// Run one handler, isolating panics. A panicking handler does not consume.
fn invoke<E>(handler: &Handler<E>, event: &E, category: EventCategory) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(consumed) => consumed,
        Err(_) => {
            error!(?category, "event handler panicked");
            false
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::state::events::{MouseEventKind, KeyState};

    /// Minimal hierarchy: child -> parent map plus a live set.
    #[derive(Default)]
    struct Tree {
        parents: HashMap<usize, usize>,
        live: HashSet<usize>,
    }

    impl Tree {
        fn with_nodes(nodes: &[usize]) -> Self {
            Self {
                parents: HashMap::new(),
                live: nodes.iter().copied().collect(),
            }
        }

        fn link(mut self, child: usize, parent: usize) -> Self {
            self.parents.insert(child, parent);
            self
        }
    }

    impl Hierarchy for Tree {
        fn parent_of(&self, index: usize) -> Option<usize> {
            self.parents.get(&index).copied().filter(|p| self.live.contains(p))
        }

        fn is_live(&self, index: usize) -> bool {
            self.live.contains(&index)
        }
    }

    fn log() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) + Clone) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let push = {
            let log = log.clone();
            move |name| log.borrow_mut().push(name)
        };
        (log, push)
    }

    #[test]
    fn test_global_then_target_then_stop() {
        let dispatcher = Dispatcher::new();
        let tree = Tree::with_nodes(&[0, 1]).link(1, 0);
        let (log, push) = log();

        let p = push.clone();
        dispatcher.on_key(move |_| p("global"));
        let p = push.clone();
        dispatcher.on_key_at(1, move |_| {
            p("target");
            true
        });
        let p = push.clone();
        dispatcher.on_key_at(0, move |_| p("parent"));

        let consumed = dispatcher.dispatch(&KeyEvent::press(13).at(1).into(), &tree, None);

        assert!(consumed);
        assert_eq!(*log.borrow(), vec!["global", "target"]);
    }

    #[test]
    fn test_key_bubbles_to_root() {
        let dispatcher = Dispatcher::new();
        let tree = Tree::with_nodes(&[0, 1, 2]).link(1, 0).link(2, 1);
        let (log, push) = log();

        let p = push.clone();
        dispatcher.on_key_at(2, move |_| p("leaf"));
        let p = push.clone();
        dispatcher.on_key_at(1, move |_| p("middle"));
        let p = push.clone();
        dispatcher.on_key_at(0, move |_| p("root"));

        let consumed = dispatcher.dispatch(&KeyEvent::press(9).into(), &tree, Some(2));

        assert!(!consumed);
        assert_eq!(*log.borrow(), vec!["leaf", "middle", "root"]);
    }

    #[test]
    fn test_global_consumption_blocks_target() {
        let dispatcher = Dispatcher::new();
        let tree = Tree::with_nodes(&[0]);
        let hits = Rc::new(Cell::new(0));

        dispatcher.on_key(|_| true);
        let h = hits.clone();
        dispatcher.on_key_at(0, move |_| h.set(h.get() + 1));

        assert!(dispatcher.dispatch(&KeyEvent::press(1).at(0).into(), &tree, None));
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_global_order_is_registration_order() {
        let dispatcher = Dispatcher::new();
        let tree = Tree::default();
        let (log, push) = log();

        for name in ["first", "second", "third"] {
            let p = push.clone();
            dispatcher.on_key(move |_| p(name));
        }
        dispatcher.dispatch(&KeyEvent::press(1).into(), &tree, None);

        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_mouse_does_not_bubble_and_uses_hit_test() {
        let dispatcher = Dispatcher::new();
        let tree = Tree::with_nodes(&[0, 1]).link(1, 0);
        let (log, push) = log();

        let p = push.clone();
        dispatcher.on_mouse_at(1, move |e: &MouseEvent| {
            assert_eq!((e.x, e.y), (4, 2));
            p("child");
        });
        let p = push.clone();
        dispatcher.on_mouse_at(0, move |_| p("parent"));
        dispatcher.set_hit_tester(|x, y| (x == 4 && y == 2).then_some(1));

        dispatcher.dispatch(&MouseEvent::new(MouseEventKind::Click, 4, 2, 0).into(), &tree, None);
        dispatcher.dispatch(&MouseEvent::new(MouseEventKind::Click, 9, 9, 0).into(), &tree, None);

        assert_eq!(*log.borrow(), vec!["child"]);
    }

    #[test]
    fn test_scroll_bubbles_to_scrollable_parent() {
        let dispatcher = Dispatcher::new();
        let tree = Tree::with_nodes(&[0, 1]).link(1, 0);
        let scrolled = Rc::new(Cell::new(0));

        let s = scrolled.clone();
        dispatcher.on_scroll_at(0, move |e: &ScrollEvent| {
            s.set(e.delta_y);
            true
        });

        let event = ScrollEvent { target: Some(1), delta_x: 0, delta_y: -3 };
        assert!(dispatcher.dispatch(&event.into(), &tree, None));
        assert_eq!(scrolled.get(), -3);
    }

    #[test]
    fn test_focus_events_reach_their_index() {
        let dispatcher = Dispatcher::new();
        let tree = Tree::with_nodes(&[0, 5]).link(5, 0);
        let gained = Rc::new(Cell::new(None));

        let g = gained.clone();
        dispatcher.on_focus_at(5, move |e: &FocusEvent| g.set(Some(e.gained)));
        dispatcher.on_focus_at(0, |_| -> bool { panic!("focus must not bubble") });

        dispatcher.dispatch(&FocusEvent { index: 5, gained: true }.into(), &tree, None);
        assert_eq!(gained.get(), Some(true));
    }

    #[test]
    fn test_released_index_handlers_never_fire() {
        let dispatcher = Dispatcher::new();
        let mut tree = Tree::with_nodes(&[0]);
        let hits = Rc::new(Cell::new(0));

        let h = hits.clone();
        dispatcher.on_key_at(0, move |_| h.set(h.get() + 1));
        tree.live.clear();

        dispatcher.dispatch(&KeyEvent::press(1).at(0).into(), &tree, None);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_off_and_cleanup_index() {
        let dispatcher = Dispatcher::new();
        let tree = Tree::with_nodes(&[3]);
        let hits = Rc::new(Cell::new(0));

        let h = hits.clone();
        let global = dispatcher.on_key(move |_| h.set(h.get() + 1));
        let h = hits.clone();
        dispatcher.on_key_at(3, move |_| h.set(h.get() + 10));
        let h = hits.clone();
        dispatcher.on_mouse_at(3, move |_| h.set(h.get() + 100));
        assert_eq!(dispatcher.handler_count_at(3), 2);

        assert!(dispatcher.off(global));
        assert!(!dispatcher.off(global));
        dispatcher.cleanup_index(3);
        assert_eq!(dispatcher.handler_count_at(3), 0);

        dispatcher.dispatch(&KeyEvent::press(1).at(3).into(), &tree, None);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_duplicate_registration_runs_twice() {
        let dispatcher = Dispatcher::new();
        let hits = Rc::new(Cell::new(0));
        let handler = {
            let hits = hits.clone();
            move |_: &KeyEvent| hits.set(hits.get() + 1)
        };

        dispatcher.on_key(handler.clone());
        dispatcher.on_key(handler);
        dispatcher.dispatch(&KeyEvent::press(1).into(), &Tree::default(), None);

        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let dispatcher = Dispatcher::new();
        let reached = Rc::new(Cell::new(false));

        dispatcher.on_key(|_| -> bool { panic!("boom") });
        let r = reached.clone();
        dispatcher.on_key(move |_| {
            r.set(true);
            true
        });

        assert!(dispatcher.dispatch(&KeyEvent::press(1).into(), &Tree::default(), None));
        assert!(reached.get());
    }

    #[test]
    fn test_on_key_code_and_propagation_values() {
        let dispatcher = Dispatcher::new();
        let tree = Tree::default();

        dispatcher.on_key_code(27, |_| Some(true));
        dispatcher.on_key(|_| None::<bool>);

        assert!(dispatcher.dispatch(&KeyEvent::press(27).into(), &tree, None));
        assert!(!dispatcher.dispatch(&KeyEvent::press(28).into(), &tree, None));
    }

    #[test]
    fn test_handler_can_register_during_dispatch() {
        let dispatcher = Rc::new(Dispatcher::new());
        let tree = Tree::default();

        let d = dispatcher.clone();
        dispatcher.on_key(move |_| {
            d.on_key(|_| ());
        });

        dispatcher.dispatch(&KeyEvent::press(1).into(), &tree, None);
        dispatcher.dispatch(&KeyEvent::press(1).into(), &tree, None);
    }

    #[test]
    fn test_last_event_signal() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.last_event(), None);

        let event: InputEvent = KeyEvent::press(65).with_state(KeyState::Repeat).into();
        dispatcher.dispatch(&event, &Tree::default(), None);

        assert_eq!(dispatcher.last_event(), Some(event));
        assert_eq!(dispatcher.last_event_signal().get(), Some(event));
    }
}
