use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FramewalkError, Result};

/// Runtime policy knobs. Timeout and cap values are policy external to
/// the engine itself; they are injected here rather than hard-wired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Upper bound on executor iterations per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// How long a `Waiting` run may sit without a response before it
    /// fails with a timeout. `None` waits indefinitely.
    #[serde(default = "default_input_timeout_secs")]
    pub input_timeout_secs: Option<u64>,

    /// Broadcast capacity of the notification bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_iterations() -> usize {
    32
}

fn default_input_timeout_secs() -> Option<u64> {
    Some(600)
}

fn default_event_capacity() -> usize {
    256
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            input_timeout_secs: default_input_timeout_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl RuntimeConfig {
    /// Load config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| FramewalkError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn input_timeout(&self) -> Option<Duration> {
        self.input_timeout_secs.map(Duration::from_secs)
    }
}
