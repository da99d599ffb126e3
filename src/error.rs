//! Error types for the bridge.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Unified result type for the bridge crate.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced by the bridge.
///
/// Lifecycle operations that a caller cannot always sequence correctly
/// (releasing a freed index, unmounting twice) are no-ops and never
/// produce one of these.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("native init failed with status code {0}")]
    NativeInit(u32),
    #[error("bridge is already mounted")]
    AlreadyMounted,
    #[error("bridge is not mounted")]
    NotMounted,
    #[error("node table is full ({capacity} nodes)")]
    CapacityExhausted { capacity: usize },
    #[error("index {0} is not allocated")]
    UnknownIndex(usize),
    #[error("linking {child} under {parent} would create a cycle")]
    HierarchyCycle { child: usize, parent: usize },
    #[error("shared buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },
    #[error("failed to load native library `{}`: {reason}", path.display())]
    NativeLoad { path: PathBuf, reason: String },
    #[error("failed to spawn wait thread: {0}")]
    WorkerSpawn(#[source] io::Error),
    #[error("wait channel closed")]
    ChannelClosed,
}
