//! Append-only sample log.
//!
//! A header describing the channel layout is followed by fixed-size
//! frames, so position `i` lives at `header_len + i * frame_len` and no
//! separate index is kept.

use super::frame::{decode_frame, encode_frame, frame_len};
use crate::error::{BufferError, Result};
use crate::types::{ChannelLayout, Record, Timestamp};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Magic bytes for the log header.
const LOG_MAGIC: &[u8; 4] = b"ABF\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Fixed part of the header: magic + version + body length.
const HEADER_PREFIX_SIZE: usize = 4 + 1 + 4;

/// Upper bound on a header body, to reject garbage lengths early.
const MAX_HEADER_BODY: u32 = 16 * 1024 * 1024;

/// Frames validated per read during recovery.
const RECOVERY_BATCH: u64 = 1024;

/// Session metadata stored at the head of the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreHeader {
    pub channel_names: Vec<String>,
    pub created: Timestamp,
}

/// What recovery found in an existing log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Intact records kept.
    pub records: u64,
    /// Bytes cut from a torn or corrupt tail.
    pub discarded_bytes: u64,
}

/// Append-only log of fixed-size sample frames.
///
/// The log owns its file handle; callers are expected to hold any
/// cross-process lock on it for the log's lifetime.
pub struct SampleLog {
    /// Path to the log file.
    path: PathBuf,

    /// Log file handle.
    file: File,

    layout: ChannelLayout,

    /// Byte offset of the first frame.
    header_len: u64,

    /// Bytes per frame.
    frame_len: u64,

    /// Records currently in the log.
    count: u64,

    /// Number of writes since last sync.
    writes_since_sync: u64,

    /// Sync every N writes (1 = sync every write).
    sync_interval: u64,
}

impl SampleLog {
    /// Start a fresh log in `file`, discarding any previous contents.
    pub fn create(
        mut file: File,
        path: impl AsRef<Path>,
        layout: ChannelLayout,
        sync_interval: u64,
    ) -> Result<Self> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;

        let header = StoreHeader {
            channel_names: layout.names().to_vec(),
            created: Timestamp::now(),
        };
        let header_len = Self::write_header(&mut file, &header)?;
        file.sync_all()?;

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            file,
            frame_len: frame_len(layout.channel_count()) as u64,
            layout,
            header_len,
            count: 0,
            writes_since_sync: 0,
            sync_interval: sync_interval.max(1),
        })
    }

    /// Reopen an existing log, keeping every intact frame.
    ///
    /// A partial or corrupt tail is truncated away so appends resume on a
    /// frame boundary.
    pub fn recover(
        mut file: File,
        path: impl AsRef<Path>,
        sync_interval: u64,
    ) -> Result<(Self, RecoveryReport)> {
        let path = path.as_ref().to_path_buf();
        file.seek(SeekFrom::Start(0))?;

        let (header, header_len) = Self::read_header(&mut file)?;
        let layout = ChannelLayout::new(&header.channel_names)
            .map_err(|e| BufferError::InvalidFormat(format!("bad stored layout: {e}")))?;
        let frame_len = frame_len(layout.channel_count()) as u64;

        let file_size = file.metadata()?.len();
        let whole_frames = file_size.saturating_sub(header_len) / frame_len;
        let records = Self::scan_valid_prefix(&mut file, &layout, header_len, whole_frames)?;

        let valid_len = header_len + records * frame_len;
        let discarded_bytes = file_size - valid_len;
        if discarded_bytes > 0 {
            warn!(
                path = %path.display(),
                records,
                discarded_bytes,
                "truncating torn tail of sample log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let log = Self {
            path,
            file,
            layout,
            header_len,
            frame_len,
            count: records,
            writes_since_sync: 0,
            sync_interval: sync_interval.max(1),
        };

        Ok((
            log,
            RecoveryReport {
                records,
                discarded_bytes,
            },
        ))
    }

    /// Append a record, returning its position.
    ///
    /// The record must already match the layout.
    pub fn append(&mut self, record: &Record) -> Result<u64> {
        let mut buf = Vec::with_capacity(self.frame_len as usize);
        encode_frame(record, &mut buf);

        let position = self.count;
        let offset = self.offset_of(position);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&buf)?;

        // Sync periodically based on sync_interval
        self.writes_since_sync += 1;
        if self.writes_since_sync >= self.sync_interval {
            self.file.sync_data()?;
            self.writes_since_sync = 0;
        }

        self.count += 1;
        Ok(position)
    }

    /// Read records at positions `[start, end)`.
    ///
    /// Bounds must already be within `0..=len()`.
    pub fn read_range(&mut self, start: u64, end: u64) -> Result<Vec<Record>> {
        debug_assert!(start <= end && end <= self.count);
        if start == end {
            return Ok(Vec::new());
        }

        let mut bytes = vec![0u8; ((end - start) * self.frame_len) as usize];
        self.file.seek(SeekFrom::Start(self.offset_of(start)))?;
        self.file.read_exact(&mut bytes)?;

        let channels = self.layout.channel_count();
        bytes
            .chunks_exact(self.frame_len as usize)
            .map(|frame| decode_frame(frame, channels))
            .collect()
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hand back the file, e.g. to release a lock held on it.
    pub fn into_file(self) -> File {
        self.file
    }

    fn offset_of(&self, position: u64) -> u64 {
        self.header_len + position * self.frame_len
    }

    fn write_header(file: &mut File, header: &StoreHeader) -> Result<u64> {
        let body = rmp_serde::to_vec(header)?;

        let mut buf = Vec::with_capacity(HEADER_PREFIX_SIZE + body.len() + 4);
        buf.extend_from_slice(LOG_MAGIC);
        buf.push(LOG_VERSION);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());

        file.write_all(&buf)?;
        Ok(buf.len() as u64)
    }

    fn read_header(file: &mut File) -> Result<(StoreHeader, u64)> {
        let mut prefix = [0u8; HEADER_PREFIX_SIZE];
        file.read_exact(&mut prefix).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                BufferError::InvalidFormat("log is shorter than its header".into())
            }
            _ => BufferError::Io(e),
        })?;

        if &prefix[..4] != LOG_MAGIC {
            return Err(BufferError::InvalidFormat("Invalid log magic".into()));
        }
        if prefix[4] != LOG_VERSION {
            return Err(BufferError::InvalidFormat(format!(
                "Unsupported log version: {}",
                prefix[4]
            )));
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&prefix[5..9]);
        let body_len = u32::from_le_bytes(len_bytes);
        if body_len > MAX_HEADER_BODY {
            return Err(BufferError::Corruption("log header too large".into()));
        }

        let mut body = vec![0u8; body_len as usize];
        file.read_exact(&mut body)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&body);
        if stored_checksum != computed_checksum {
            return Err(BufferError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let header: StoreHeader = rmp_serde::from_slice(&body)?;
        let header_len = (HEADER_PREFIX_SIZE + body.len() + 4) as u64;
        Ok((header, header_len))
    }

    /// Count the leading frames that decode cleanly.
    fn scan_valid_prefix(
        file: &mut File,
        layout: &ChannelLayout,
        header_len: u64,
        whole_frames: u64,
    ) -> Result<u64> {
        let channels = layout.channel_count();
        let frame_len = frame_len(channels);
        file.seek(SeekFrom::Start(header_len))?;

        let mut valid = 0u64;
        let mut buf = Vec::new();
        while valid < whole_frames {
            let batch = RECOVERY_BATCH.min(whole_frames - valid);
            buf.resize(batch as usize * frame_len, 0);
            file.read_exact(&mut buf)?;

            for frame in buf.chunks_exact(frame_len) {
                if decode_frame(frame, channels).is_err() {
                    return Ok(valid);
                }
                valid += 1;
            }
        }

        Ok(valid)
    }
}
