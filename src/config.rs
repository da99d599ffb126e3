//! Bridge configuration.
//!
//! Header config (render mode, flags) is written into the shared buffer at
//! mount; the native side reads it from there.

use std::env;
use std::path::PathBuf;

use tracing::warn;

use crate::shared_buffer::{ConfigFlags, RenderMode, MAX_CAPACITY};

/// Default node table capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Overrides [`BridgeConfig::capacity`].
pub const ENV_CAPACITY: &str = "SPARK_TUI_CAPACITY";

/// Overrides [`BridgeConfig::native_library_path`].
pub const ENV_NATIVE_LIB: &str = "SPARK_TUI_NATIVE_LIB";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Node records in the shared buffer.
    pub capacity: usize,
    pub render_mode: RenderMode,
    pub config_flags: ConfigFlags,
    /// Sent to the wait thread in its start message.
    pub native_library_path: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            render_mode: RenderMode::default(),
            config_flags: ConfigFlags::default(),
            native_library_path: default_library_path(),
        }
    }
}

impl BridgeConfig {
    /// Defaults, overridden by `SPARK_TUI_CAPACITY` and `SPARK_TUI_NATIVE_LIB`.
    pub fn from_env() -> Self {
        Self::default().apply_env(|key| env::var(key).ok())
    }

    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_CAPACITY) {
            match raw.trim().parse::<usize>() {
                Ok(capacity) if (1..=MAX_CAPACITY).contains(&capacity) => self.capacity = capacity,
                Ok(capacity) if capacity > MAX_CAPACITY => warn!(
                    value = capacity,
                    max = MAX_CAPACITY,
                    "ignoring {ENV_CAPACITY} above the maximum capacity"
                ),
                _ => warn!(value = %raw, "ignoring invalid {ENV_CAPACITY}"),
            }
        }
        if let Some(path) = lookup(ENV_NATIVE_LIB).filter(|p| !p.is_empty()) {
            self.native_library_path = PathBuf::from(path);
        }
        self
    }

    /// Clamped to [`MAX_CAPACITY`].
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.min(MAX_CAPACITY);
        self
    }

    pub fn with_render_mode(mut self, render_mode: RenderMode) -> Self {
        self.render_mode = render_mode;
        self
    }

    pub fn with_config_flags(mut self, config_flags: ConfigFlags) -> Self {
        self.config_flags = config_flags;
        self
    }

    pub fn with_native_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.native_library_path = path.into();
        self
    }
}

/// `libspark_tui_engine.so` / `.dylib` / `spark_tui_engine.dll`
fn default_library_path() -> PathBuf {
    PathBuf::from(format!(
        "{}spark_tui_engine{}",
        env::consts::DLL_PREFIX,
        env::consts::DLL_SUFFIX
    ))
}
