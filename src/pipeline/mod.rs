//! Bridge Pipeline
//!
//! Everything that crosses the runtime boundary.
//!
//! # Data Flow
//!
//! ```text
//! slot write → notify (stamp + wake flag + native wake) → native renders
//! native decodes input → wait thread wakes → Events message → drain → dispatch
//! ```
//!
//! - **notify** - reactive → native change protocol, batching
//! - **native** - the native engine call surface, loopback engine, loaders
//! - **event_ring** - decoded input slots inside the shared buffer
//! - **wait** - the blocking wait thread and its message protocol
//! - **mount** - bridge lifecycle and the main-context event loop

pub mod event_ring;
pub mod mount;
pub mod native;
pub mod notify;
pub mod wait;

// Re-exports
pub use event_ring::{EventRing, EventType};
pub use mount::{Bridge, KEY_TAB};
pub use native::{
    DylibLoader, DylibNative, ExternNative, LoopbackNative, NativeEngine, NativeLoader,
    StaticLoader,
};
pub use notify::{batch, NoopNotifier, Notifier, WakeNotifier};
pub use wait::{WaitChannel, WorkerCommand, WorkerMessage};
