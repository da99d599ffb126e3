//! # spark-tui-bridge
//!
//! The reactive half of the SparkTUI hybrid engine.
//!
//! Built on [spark-signals](https://github.com/RLabs-Inc/spark-signals) for
//! reactive state.
//!
//! ## Architecture
//!
//! Nodes are indices into a fixed-stride node table inside one shared memory
//! region. The reactive side writes node fields through typed slot accessors;
//! the native engine reads the same bytes without copying, lays out and
//! renders. Every write ends in a notify that wakes the native side. Input
//! flows back through a blocking wait thread and is dispatched on the main
//! context:
//!
//! ```text
//! SlotAccessor::set → notify → native wake → layout/render
//! native input → wait thread → Events → drain → Dispatcher → handlers
//! ```
//!
//! ## Modules
//!
//! - [`shared_buffer`] - Binary layout: header, node records, event ring
//! - [`engine`] - Slot accessors, node arrays, index registry
//! - [`pipeline`] - Notifier, native call surface, wait thread, bridge lifecycle
//! - [`state`] - Input events, dispatcher, focus
//! - [`config`] - Bridge configuration
//! - [`error`] - Error types

pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod shared_buffer;
pub mod state;

// Re-export commonly used items
pub use config::BridgeConfig;
pub use engine::{IndexRegistry, NodeArrays, SlotAccessor};
pub use error::{BridgeError, Result};
pub use pipeline::{
    Bridge, DylibLoader, DylibNative, LoopbackNative, NativeEngine, NativeLoader, NoopNotifier,
    Notifier, StaticLoader, WaitChannel, WakeNotifier,
};
pub use shared_buffer::{ComponentType, ConfigFlags, RenderMode, SharedBuffer};
pub use state::{
    Dispatcher, FocusEvent, FocusManager, HandlerId, Hierarchy, InputEvent, KeyEvent, KeyState,
    Modifiers, MouseEvent, MouseEventKind, ScrollEvent,
};
