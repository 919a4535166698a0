//! Durable, append-only store for one session's records.

use crate::config::BufferConfig;
use crate::error::{BufferError, Result};
use crate::records::{RecoveryReport, SampleLog};
use crate::types::{ChannelLayout, Record};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::Path;

/// The store backing one recording session.
///
/// Holds an exclusive lock on its file for as long as it is open, so a
/// storage identifier can back at most one live store at a time, even
/// across processes.
///
/// All methods take `&mut self`: a store has exactly one owner, the
/// session's worker, and every operation is executed in that owner's
/// order.
pub struct SessionStore {
    log: SampleLog,
}

impl SessionStore {
    /// Create a fresh store for `identifier` under the configured data dir.
    ///
    /// Anything previously stored under the same identifier is discarded.
    pub fn create(config: &BufferConfig, identifier: &str, layout: ChannelLayout) -> Result<Self> {
        let path = config.storage_path(identifier)?;
        fs::create_dir_all(&config.data_dir).map_err(|e| BufferError::storage(identifier, e))?;
        Self::create_at(&path, layout, config.effective_sync_interval())
    }

    /// Create a fresh store at an explicit path.
    ///
    /// A file that opens but cannot be initialised is `StorageUnavailable`.
    pub fn create_at(
        path: impl AsRef<Path>,
        layout: ChannelLayout,
        sync_interval: u64,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = Self::open_locked(path, true)?;
        let log = SampleLog::create(file, path, layout, sync_interval)
            .map_err(|e| BufferError::storage(path.display().to_string(), e))?;
        Ok(Self { log })
    }

    /// Reopen a store left behind by a crashed or stopped session.
    ///
    /// The layout is read back from the store itself; a torn tail is
    /// discarded.
    pub fn recover(path: impl AsRef<Path>, sync_interval: u64) -> Result<(Self, RecoveryReport)> {
        let path = path.as_ref();
        let file = Self::open_locked(path, false)?;
        let (log, report) = SampleLog::recover(file, path, sync_interval)?;
        Ok((Self { log }, report))
    }

    /// Append a record. On return it is visible to reads, and durable when
    /// the sync interval is 1.
    pub fn append(&mut self, record: &Record) -> Result<u64> {
        self.log.layout().check(record)?;
        self.log.append(record)
    }

    /// Number of stored records.
    pub fn count(&self) -> usize {
        self.log.len() as usize
    }

    /// Read records at positions `[start, end)` in append order.
    ///
    /// `start` defaults to 0 and `end` to the current count. An `end`
    /// past the count is clamped; a `start` past the count, or an `end`
    /// before `start`, is a `RangeError`.
    pub fn read(&mut self, start: Option<usize>, end: Option<usize>) -> Result<Vec<Record>> {
        let count = self.count();
        let first = start.unwrap_or(0);
        let range_error = || BufferError::RangeError {
            start: first,
            end,
            count,
        };

        if first > count {
            return Err(range_error());
        }
        let last = match end {
            Some(end) if end < first => return Err(range_error()),
            Some(end) => end.min(count),
            None => count,
        };

        self.log.read_range(first as u64, last as u64)
    }

    pub fn layout(&self) -> &ChannelLayout {
        self.log.layout()
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    /// Flush everything to disk and release the lock.
    pub fn close(mut self) -> Result<()> {
        self.log.sync()?;
        let file = self.log.into_file();
        FileExt::unlock(&file)?;
        Ok(())
    }

    fn open_locked(path: &Path, create: bool) -> Result<File> {
        let identifier = path.display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)
            .map_err(|e| BufferError::storage(&identifier, e))?;

        file.try_lock_exclusive()
            .map_err(|_| BufferError::storage(&identifier, "locked by another session"))?;

        Ok(file)
    }
}
