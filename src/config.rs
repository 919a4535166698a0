//! Buffer server configuration.

use crate::error::{BufferError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Buffer server configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Directory under which storage identifiers are resolved.
    pub data_dir: PathBuf,

    /// Sync to disk every N appends.
    /// - 0 or 1: sync every append (an acknowledged append is durable)
    /// - N > 1: up to N - 1 acknowledged appends may be lost on power failure
    pub sync_interval: u64,

    /// How long a caller waits for a worker response (None = forever).
    pub request_timeout_ms: Option<u64>,

    /// Max queued requests per session worker.
    pub inbox_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./buffers"),
            sync_interval: 1,
            request_timeout_ms: Some(5_000),
            inbox_capacity: 1024,
        }
    }
}

impl BufferConfig {
    /// Config rooted at `data_dir` with default settings.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BufferError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            BufferError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.inbox_capacity == 0 {
            return Err(BufferError::Config("inbox_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn effective_sync_interval(&self) -> u64 {
        self.sync_interval.max(1)
    }

    /// Resolve a storage identifier to its backing file.
    ///
    /// Identifiers are single path components; anything that could escape
    /// `data_dir` is refused.
    pub fn storage_path(&self, identifier: &str) -> Result<PathBuf> {
        let mut components = Path::new(identifier).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == identifier => {
                Ok(self.data_dir.join(name))
            }
            _ => Err(BufferError::storage(
                identifier,
                "storage identifier must be a plain file name",
            )),
        }
    }
}
