//! Mount API - Bridge lifecycle and the main-context event loop.
//!
//! The [`Bridge`] owns everything the main context touches: the shared
//! buffer, the node registry, the dispatcher and focus state. Mounting hands
//! the buffer to the native side and starts the wait thread; pumping drains
//! decoded input and dispatches it.
//!
//! # Example
//!
//! ```ignore
//! // Engine library from SPARK_TUI_NATIVE_LIB or the platform default name
//! let mut bridge = Bridge::with_native_library(BridgeConfig::from_env())?;
//!
//! // Or an in-process engine
//! let native = Arc::new(LoopbackNative::new());
//! let loader = Arc::new(StaticLoader::new(native.clone()));
//! let mut bridge = Bridge::new(BridgeConfig::default(), native, loader);
//!
//! bridge.mount()?;
//!
//! // Option 1: block until input arrives
//! while bridge.is_running() {
//!     bridge.pump()?;
//! }
//!
//! // Option 2: poll from your own loop
//! bridge.try_pump()?;
//!
//! bridge.unmount();
//! ```

use std::rc::Rc;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::BridgeConfig;
use crate::engine::{IndexRegistry, NodeArrays};
use crate::error::{BridgeError, Result};
use crate::shared_buffer::{ConfigFlags, SharedBuffer};
use crate::state::dispatch::Dispatcher;
use crate::state::events::{FocusEvent, InputEvent, KeyEvent, Modifiers};
use crate::state::focus::FocusManager;

use super::native::{DylibLoader, DylibNative, NativeEngine, NativeLoader};
use super::notify::WakeNotifier;
use super::wait::{WaitChannel, WorkerMessage};

/// Tab keycode
pub const KEY_TAB: u32 = 9;

/// Ctrl+C as delivered by terminals without key disambiguation
const KEY_ETX: u32 = 3;

// =============================================================================
// Bridge
// =============================================================================

/// The reactive side of the hybrid engine.
pub struct Bridge {
    config: BridgeConfig,
    buffer: Arc<SharedBuffer>,
    native: Arc<dyn NativeEngine>,
    loader: Arc<dyn NativeLoader>,
    notifier: Rc<WakeNotifier>,
    registry: IndexRegistry,
    dispatcher: Rc<Dispatcher>,
    focus: FocusManager,
    channel: Option<WaitChannel>,
    messages: Option<Receiver<WorkerMessage>>,
    mounted: bool,
    running: bool,
}

impl Bridge {
    /// Allocate the shared buffer and the reactive-side state. Nothing is
    /// handed to the native side until [`Bridge::mount`].
    pub fn new(
        config: BridgeConfig,
        native: Arc<dyn NativeEngine>,
        loader: Arc<dyn NativeLoader>,
    ) -> Self {
        let buffer = Arc::new(SharedBuffer::new(config.capacity));
        let notifier = Rc::new(WakeNotifier::new(buffer.clone(), native.clone()));
        let arrays = NodeArrays::new(buffer.clone(), notifier.clone());

        let mut registry = IndexRegistry::new(arrays);
        let dispatcher = Rc::new(Dispatcher::new());
        let focus = FocusManager::new();
        {
            // Any release path, including `registry_mut().release`, tears
            // down the index's handlers and focus.
            let dispatcher = dispatcher.clone();
            let focus = focus.clone();
            registry.on_release(move |index| {
                dispatcher.cleanup_index(index);
                focus.forget(index);
            });
        }

        Self {
            config,
            buffer,
            native,
            loader,
            notifier,
            registry,
            dispatcher,
            focus,
            channel: None,
            messages: None,
            mounted: false,
            running: false,
        }
    }

    /// Bind the engine at `config.native_library_path` for both the main
    /// context and the wait thread.
    pub fn with_native_library(config: BridgeConfig) -> Result<Self> {
        let native = DylibNative::open(&config.native_library_path)?;
        Ok(Self::new(config, Arc::new(native), Arc::new(DylibLoader)))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Hand the buffer to the native side and start the wait thread.
    ///
    /// Fails if already mounted or if native `init` reports a non-zero status.
    pub fn mount(&mut self) -> Result<()> {
        if self.mounted {
            return Err(BridgeError::AlreadyMounted);
        }

        self.buffer.set_config_flags(self.config.config_flags);
        self.buffer.set_render_mode(self.config.render_mode);

        let status = self.native.init(self.buffer.as_mut_ptr(), self.buffer.len());
        if status != 0 {
            error!(code = status, "native init failed");
            return Err(BridgeError::NativeInit(status));
        }

        let started = WaitChannel::spawn(self.loader.clone()).and_then(|(channel, messages)| {
            channel.start(self.config.native_library_path.clone())?;
            Ok((channel, messages))
        });
        let (channel, messages) = match started {
            Ok(started) => started,
            Err(err) => {
                self.native.cleanup();
                return Err(err);
            }
        };

        self.channel = Some(channel);
        self.messages = Some(messages);
        self.mounted = true;
        self.running = true;
        info!(
            capacity = self.buffer.capacity(),
            bytes = self.buffer.len(),
            "bridge mounted"
        );
        Ok(())
    }

    /// Stop the wait thread and tear down the native side.
    ///
    /// Idempotent: unmounting an unmounted bridge does nothing.
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        self.running = false;

        if let Some(mut channel) = self.channel.take() {
            channel.request_stop();
            // Forces the in-flight wait to return
            self.native.close();
            channel.join();
        }
        self.messages = None;
        self.native.cleanup();
        self.buffer.reset_instrumentation();
        info!("bridge unmounted");
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// False once unmounted or after Ctrl+C with `EXIT_ON_CTRL_C`.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Ask the event loop to finish. Does not unmount.
    pub fn stop(&mut self) {
        self.running = false;
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Block until the wait thread reports input, then dispatch it.
    ///
    /// Returns the number of events dispatched.
    pub fn pump(&mut self) -> Result<usize> {
        let message = self
            .messages
            .as_ref()
            .ok_or(BridgeError::NotMounted)?
            .recv()
            .map_err(|_| BridgeError::ChannelClosed)?;
        self.handle_message(message)
    }

    /// Dispatch whatever the wait thread has reported so far without blocking.
    pub fn try_pump(&mut self) -> Result<usize> {
        let mut dispatched = 0;
        loop {
            let next = self
                .messages
                .as_ref()
                .ok_or(BridgeError::NotMounted)?
                .try_recv();
            match next {
                Ok(message) => dispatched += self.handle_message(message)?,
                Err(TryRecvError::Empty) => return Ok(dispatched),
                Err(TryRecvError::Disconnected) => return Err(BridgeError::ChannelClosed),
            }
        }
    }

    fn handle_message(&mut self, message: WorkerMessage) -> Result<usize> {
        match message {
            WorkerMessage::Events => Ok(self.process_events()),
            WorkerMessage::Failed(reason) => Err(BridgeError::NativeLoad {
                path: self.config.native_library_path.clone(),
                reason,
            }),
        }
    }

    /// Drain decoded events from the native side and dispatch them in
    /// decode order. Returns the number of events.
    pub fn process_events(&mut self) -> usize {
        let events = self.native.drain_events(&self.buffer);
        let count = events.len();
        for event in events {
            self.dispatch_event(event);
        }
        if count > 0 {
            debug!(count, "processed native events");
        }
        count
    }

    /// Route one event through the dispatcher, then apply the built-in
    /// keys (Tab focus cycling, Ctrl+C) if nothing consumed it.
    pub fn dispatch_event(&mut self, event: InputEvent) -> bool {
        let consumed = self
            .dispatcher
            .dispatch(&event, &self.registry, self.focus.focused());
        if !consumed {
            if let InputEvent::Key(key) = event {
                self.handle_builtin_key(&key);
            }
        }
        consumed
    }

    fn handle_builtin_key(&mut self, key: &KeyEvent) {
        if !key.is_press() {
            return;
        }
        let flags = self.config.config_flags;

        let ctrl_c = key.keycode == KEY_ETX
            || (key.modifiers.contains(Modifiers::CTRL) && matches!(key.keycode, 0x63 | 0x43));
        if ctrl_c && flags.contains(ConfigFlags::EXIT_ON_CTRL_C) {
            info!("ctrl+c, stopping");
            self.running = false;
            return;
        }

        if key.keycode == KEY_TAB && flags.contains(ConfigFlags::TAB_NAVIGATION) {
            if key.modifiers.contains(Modifiers::SHIFT) {
                self.focus_previous();
            } else {
                self.focus_next();
            }
        }
    }

    fn dispatch_focus_events(&mut self, events: Vec<FocusEvent>) -> bool {
        let changed = !events.is_empty();
        for event in events {
            self.dispatcher
                .dispatch(&event.into(), &self.registry, self.focus.focused());
        }
        changed
    }

    // =========================================================================
    // Focus
    // =========================================================================

    /// Focus `index`. True if it holds focus afterwards.
    pub fn focus(&mut self, index: usize) -> bool {
        let events = self.focus.focus(&self.registry, index);
        self.dispatch_focus_events(events);
        self.focus.is_focused(index)
    }

    /// True if focus moved.
    pub fn focus_next(&mut self) -> bool {
        let events = self.focus.focus_next(&self.registry);
        self.dispatch_focus_events(events)
    }

    pub fn focus_previous(&mut self) -> bool {
        let events = self.focus.focus_previous(&self.registry);
        self.dispatch_focus_events(events)
    }

    pub fn blur(&mut self) -> bool {
        let events = self.focus.blur(&self.registry);
        self.dispatch_focus_events(events)
    }

    pub fn restore_focus(&mut self) -> bool {
        let events = self.focus.restore_from_history(&self.registry);
        self.dispatch_focus_events(events)
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Release `index` and its subtree, tearing down their handlers and focus.
    pub fn release(&mut self, index: usize) -> Vec<usize> {
        self.registry.release(index)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn buffer(&self) -> &Arc<SharedBuffer> {
        &self.buffer
    }

    pub fn arrays(&self) -> &NodeArrays {
        self.registry.arrays()
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut IndexRegistry {
        &mut self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn focus_state(&self) -> &FocusManager {
        &self.focus
    }

    pub fn native(&self) -> &Arc<dyn NativeEngine> {
        &self.native
    }

    /// Notifications issued since mount.
    pub fn notify_count(&self) -> u32 {
        self.notifier.notify_count()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.unmount();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::pipeline::native::{LoopbackNative, StaticLoader};
    use crate::shared_buffer::RenderMode;

    fn bridge_with(native: Arc<LoopbackNative>, config: BridgeConfig) -> Bridge {
        let loader = Arc::new(StaticLoader::new(native.clone()));
        Bridge::new(config, native, loader)
    }

    fn bridge() -> (Arc<LoopbackNative>, Bridge) {
        let native = Arc::new(LoopbackNative::new());
        let bridge = bridge_with(native.clone(), BridgeConfig::default().with_capacity(16));
        (native, bridge)
    }

    #[test]
    fn test_mount_writes_header_and_inits_native() {
        let native = Arc::new(LoopbackNative::new());
        let config = BridgeConfig::default()
            .with_capacity(8)
            .with_render_mode(RenderMode::Append)
            .with_config_flags(ConfigFlags::MOUSE_ENABLED);
        let mut bridge = bridge_with(native.clone(), config);

        bridge.mount().unwrap();

        assert!(bridge.is_mounted());
        assert_eq!(native.init_len(), bridge.buffer().len());
        assert_eq!(bridge.buffer().render_mode(), RenderMode::Append);
        assert_eq!(bridge.buffer().config_flags(), ConfigFlags::MOUSE_ENABLED);
    }

    #[test]
    fn test_missing_native_library_is_a_load_error() {
        let config = BridgeConfig::default()
            .with_capacity(4)
            .with_native_library_path("/nonexistent/libspark_tui_engine.so");

        match Bridge::with_native_library(config) {
            Err(BridgeError::NativeLoad { path, .. }) => {
                assert_eq!(path, std::path::Path::new("/nonexistent/libspark_tui_engine.so"));
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("bound a library that does not exist"),
        }
    }

    #[test]
    fn test_double_mount_rejected() {
        let (_native, mut bridge) = bridge();
        bridge.mount().unwrap();
        assert!(matches!(bridge.mount(), Err(BridgeError::AlreadyMounted)));
    }

    #[test]
    fn test_init_failure_is_fatal() {
        let native = Arc::new(LoopbackNative::with_init_status(7));
        let mut bridge = bridge_with(native, BridgeConfig::default().with_capacity(4));

        assert!(matches!(bridge.mount(), Err(BridgeError::NativeInit(7))));
        assert!(!bridge.is_mounted());
        assert!(matches!(bridge.try_pump(), Err(BridgeError::NotMounted)));
    }

    #[test]
    fn test_unmount_idempotent() {
        let (native, mut bridge) = bridge();
        bridge.unmount();
        assert_eq!(native.cleanup_count(), 0);

        bridge.mount().unwrap();
        bridge.unmount();
        bridge.unmount();

        assert_eq!(native.cleanup_count(), 1);
        assert!(native.is_closed());
        assert!(!bridge.is_running());
    }

    #[test]
    fn test_writes_wake_native() {
        let (native, mut bridge) = bridge();
        bridge.mount().unwrap();

        let index = bridge.registry_mut().allocate(None).unwrap();
        let before = bridge.notify_count();
        bridge.arrays().width.set(index, 10.0);
        bridge.arrays().height.set(index, 3.0);

        assert_eq!(bridge.notify_count(), before + 2);
        assert!(native.wake_count() >= 2);
        assert!(bridge.buffer().consume_wake());
    }

    #[test]
    fn test_process_events_dispatches_in_order() {
        let (native, mut bridge) = bridge();
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let s = seen.clone();
        bridge.dispatcher().on_key(move |e: &KeyEvent| s.borrow_mut().push(e.keycode));

        for code in [1, 2, 3] {
            native.push_event(KeyEvent::press(code));
        }

        assert_eq!(bridge.process_events(), 3);
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_tab_cycles_focus_and_dispatches_focus_events() {
        let (_native, mut bridge) = bridge();
        let a = bridge.registry_mut().allocate(None).unwrap();
        let b = bridge.registry_mut().allocate(None).unwrap();
        bridge.arrays().set_focusable(a, true);
        bridge.arrays().set_focusable(b, true);

        let gained = Rc::new(Cell::new(0));
        let g = gained.clone();
        bridge.dispatcher().on_focus(move |e: &FocusEvent| {
            if e.gained {
                g.set(g.get() + 1);
            }
        });

        bridge.dispatch_event(KeyEvent::press(KEY_TAB).into());
        assert_eq!(bridge.focus_state().focused(), Some(a));
        bridge.dispatch_event(KeyEvent::press(KEY_TAB).into());
        assert_eq!(bridge.focus_state().focused(), Some(b));
        bridge.dispatch_event(KeyEvent::press(KEY_TAB).with_modifiers(Modifiers::SHIFT).into());
        assert_eq!(bridge.focus_state().focused(), Some(a));

        assert_eq!(gained.get(), 3);
    }

    #[test]
    fn test_consumed_tab_does_not_move_focus() {
        let (_native, mut bridge) = bridge();
        let a = bridge.registry_mut().allocate(None).unwrap();
        bridge.arrays().set_focusable(a, true);
        bridge.dispatcher().on_key_code(KEY_TAB, |_| true);

        assert!(bridge.dispatch_event(KeyEvent::press(KEY_TAB).into()));
        assert_eq!(bridge.focus_state().focused(), None);
    }

    #[test]
    fn test_ctrl_c_stops_running() {
        let (_native, mut bridge) = bridge();
        bridge.mount().unwrap();
        assert!(bridge.is_running());

        bridge.dispatch_event(KeyEvent::press(0x63).with_modifiers(Modifiers::CTRL).into());
        assert!(!bridge.is_running());
        assert!(bridge.is_mounted());
    }

    #[test]
    fn test_focused_key_routing() {
        let (_native, mut bridge) = bridge();
        let parent = bridge.registry_mut().allocate(None).unwrap();
        let input = bridge.registry_mut().allocate(None).unwrap();
        bridge.registry_mut().link_child(input, parent).unwrap();
        bridge.arrays().set_focusable(input, true);
        assert!(bridge.focus(input));

        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        bridge.dispatcher().on_key_at(parent, move |_| {
            h.set(h.get() + 1);
            true
        });

        assert!(bridge.dispatch_event(KeyEvent::press(0x61).into()));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_release_tears_down_handlers_and_focus() {
        let (_native, mut bridge) = bridge();
        let root = bridge.registry_mut().allocate(None).unwrap();
        let child = bridge.registry_mut().allocate(None).unwrap();
        bridge.registry_mut().link_child(child, root).unwrap();
        bridge.arrays().set_focusable(child, true);
        bridge.focus(child);
        bridge.dispatcher().on_key_at(child, |_| true);

        let released = bridge.release(root);

        assert_eq!(released, vec![child, root]);
        assert_eq!(bridge.dispatcher().handler_count_at(child), 0);
        assert_eq!(bridge.focus_state().focused(), None);
        assert!(bridge.release(root).is_empty());
    }

    #[test]
    fn test_registry_release_does_not_leak_handlers_to_reused_index() {
        let (_native, mut bridge) = bridge();
        bridge.registry_mut().allocate(None).unwrap();
        let old = bridge.registry_mut().allocate(None).unwrap();
        bridge.arrays().set_focusable(old, true);
        bridge.focus(old);

        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        bridge.dispatcher().on_key_at(old, move |_| {
            h.set(h.get() + 1);
            true
        });

        bridge.registry_mut().release(old);
        let reused = bridge.registry_mut().allocate(None).unwrap();
        assert_eq!(reused, old);

        assert!(!bridge.dispatch_event(KeyEvent::press(13).at(reused).into()));
        assert_eq!(hits.get(), 0);
        assert_eq!(bridge.dispatcher().handler_count_at(reused), 0);
        assert_eq!(bridge.focus_state().focused(), None);
        assert_eq!(bridge.focus_state().history_len(), 0);
    }
}
