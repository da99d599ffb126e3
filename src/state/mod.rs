//! State Module - Runtime interaction state
//!
//! - **Events** - Decoded key/mouse/scroll/focus payloads
//! - **Dispatch** - Handler registry and global → target → bubble routing
//! - **Focus** - Focused node, tab cycling, history

pub mod dispatch;
pub mod events;
pub mod focus;

pub use dispatch::{Dispatcher, HandlerId, Hierarchy, HitTester, Propagation};
pub use events::*;
pub use focus::FocusManager;
