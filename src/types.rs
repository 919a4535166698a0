//! Core types for the buffer server.

use crate::error::{BufferError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque token addressing a live session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionHandle(pub u64);

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({})", self.0)
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// One timestamped multi-channel sample vector.
///
/// `data` holds one value per channel in the session's declared order.
/// `timestamp` is caller-supplied; records are kept in append order
/// regardless of its value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: Vec<f64>,
    pub timestamp: f64,
}

impl Record {
    pub fn new(data: Vec<f64>, timestamp: f64) -> Self {
        Self { data, timestamp }
    }

    /// Number of samples in this record.
    pub fn width(&self) -> usize {
        self.data.len()
    }
}

/// Ordered, unique channel labels for a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout {
    names: Vec<String>,
}

impl ChannelLayout {
    /// Validate and build a layout.
    ///
    /// Fails with `InvalidChannelSet` when the list is empty, contains an
    /// empty label, or repeats a label.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        if names.is_empty() {
            return Err(BufferError::InvalidChannelSet(
                "at least one channel is required".into(),
            ));
        }

        let mut seen = HashSet::with_capacity(names.len());
        let mut owned = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if name.is_empty() {
                return Err(BufferError::InvalidChannelSet(
                    "channel names must be non-empty".into(),
                ));
            }
            if !seen.insert(name) {
                return Err(BufferError::InvalidChannelSet(format!(
                    "duplicate channel name {name:?}"
                )));
            }
            owned.push(name.to_string());
        }

        Ok(Self { names: owned })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn channel_count(&self) -> usize {
        self.names.len()
    }

    /// Check that a record matches this layout.
    pub fn check(&self, record: &Record) -> Result<()> {
        if record.width() != self.channel_count() {
            return Err(BufferError::ShapeMismatch {
                expected: self.channel_count(),
                got: record.width(),
            });
        }
        Ok(())
    }
}

/// Snapshot of a live session, as seen by its worker.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionInfo {
    pub handle: SessionHandle,
    pub channel_names: Vec<String>,
    pub storage_path: PathBuf,
    pub count: usize,
}
