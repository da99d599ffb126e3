//! Wait channel: a dedicated thread blocked on the native event wait.
//!
//! The thread calls the native `wait_for_events()` (parked, 0% CPU while
//! idle) and posts a bare [`WorkerMessage::Events`] to the main context each
//! time it returns. The main context then drains and dispatches the decoded
//! events itself; this thread never touches shared state.
//!
//! Protocol:
//!
//! ```text
//! main → worker   Start { native_library_path }   resolve engine, begin loop
//! main → worker   Stop                           cooperative shutdown
//! worker → main   Events                         "ask the native side"
//! worker → main   Failed(reason)                 engine could not be loaded
//! ```
//!
//! Stopping is cooperative: the stop flag is checked only between blocking
//! calls, so the native side must also be closed to force an in-flight wait
//! to return.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};

use super::native::NativeLoader;

// =============================================================================
// MESSAGES
// =============================================================================

/// Main → worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    Start { native_library_path: PathBuf },
    Stop,
}

/// Worker → main.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// Native input is ready to drain. Carries no payload.
    Events,
    /// The engine could not be loaded; the worker has exited.
    Failed(String),
}

// =============================================================================
// WAIT CHANNEL
// =============================================================================

/// Handle to the wait thread.
pub struct WaitChannel {
    commands: Sender<WorkerCommand>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WaitChannel {
    /// Spawn the wait thread. It idles until [`WaitChannel::start`].
    ///
    /// Returns the channel handle and the receiver for worker messages.
    pub fn spawn(loader: Arc<dyn NativeLoader>) -> Result<(Self, Receiver<WorkerMessage>)> {
        let (command_tx, command_rx) = mpsc::channel();
        let (message_tx, message_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("spark-wait".to_string())
                .spawn(move || Self::run(command_rx, message_tx, stop, loader))
                .map_err(BridgeError::WorkerSpawn)?
        };

        let channel = Self {
            commands: command_tx,
            stop,
            handle: Some(handle),
        };
        Ok((channel, message_rx))
    }

    fn run(
        commands: Receiver<WorkerCommand>,
        messages: Sender<WorkerMessage>,
        stop: Arc<AtomicBool>,
        loader: Arc<dyn NativeLoader>,
    ) {
        let path = loop {
            match commands.recv() {
                Ok(WorkerCommand::Start { native_library_path }) => break native_library_path,
                Ok(WorkerCommand::Stop) | Err(_) => return,
            }
        };

        let native = match loader.load(&path) {
            Ok(native) => native,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to load native engine");
                let _ = messages.send(WorkerMessage::Failed(err.to_string()));
                return;
            }
        };

        info!(path = %path.display(), "wait loop started");
        while !stop.load(Ordering::SeqCst) {
            native.wait_for_events();
            if stop.load(Ordering::SeqCst) {
                break;
            }
            if messages.send(WorkerMessage::Events).is_err() {
                break; // Receiver gone, main context shutting down
            }
        }
        debug!("wait loop stopped");
    }

    /// Begin the blocking loop against the engine at `native_library_path`.
    pub fn start(&self, native_library_path: PathBuf) -> Result<()> {
        self.commands
            .send(WorkerCommand::Start { native_library_path })
            .map_err(|_| BridgeError::ChannelClosed)
    }

    /// Request cooperative shutdown. Takes effect after the in-flight wait
    /// returns.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Unblocks a worker still waiting for Start
        let _ = self.commands.send(WorkerCommand::Stop);
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Wait for the thread to exit. Blocks until the in-flight native wait
    /// returns, so close the native side first.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("wait thread panicked");
            }
        }
    }
}

impl Drop for WaitChannel {
    fn drop(&mut self) {
        self.request_stop();
        self.join();
    }
}
