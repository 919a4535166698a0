//! Fixed-size on-disk frame for one record.
//!
//! Layout (little-endian):
//! magic(4) | timestamp f64(8) | samples f64 × channels | crc32(4)
//!
//! The checksum covers the timestamp and samples.

use crate::error::{BufferError, Result};
use crate::types::Record;

/// Magic bytes opening every frame.
const FRAME_MAGIC: &[u8; 4] = b"SMP\0";

/// Size of a frame for a given channel count.
pub fn frame_len(channels: usize) -> usize {
    4 + 8 + channels * 8 + 4
}

/// Encode a record, appending the frame to `buf`.
pub fn encode_frame(record: &Record, buf: &mut Vec<u8>) {
    buf.reserve(frame_len(record.data.len()));
    buf.extend_from_slice(FRAME_MAGIC);

    let body_start = buf.len();
    buf.extend_from_slice(&record.timestamp.to_le_bytes());
    for sample in &record.data {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    let checksum = crc32fast::hash(&buf[body_start..]);
    buf.extend_from_slice(&checksum.to_le_bytes());
}

/// Decode one frame. `bytes` must be exactly `frame_len(channels)` long.
pub fn decode_frame(bytes: &[u8], channels: usize) -> Result<Record> {
    if bytes.len() != frame_len(channels) {
        return Err(BufferError::Corruption(format!(
            "frame is {} bytes, expected {}",
            bytes.len(),
            frame_len(channels)
        )));
    }

    if &bytes[..4] != FRAME_MAGIC {
        return Err(BufferError::InvalidFormat("Invalid frame magic".into()));
    }

    let (body, checksum_bytes) = bytes[4..].split_at(bytes.len() - 8);
    let stored_checksum = u32::from_le_bytes(read_array(checksum_bytes));
    let computed_checksum = crc32fast::hash(body);
    if stored_checksum != computed_checksum {
        return Err(BufferError::ChecksumMismatch {
            expected: stored_checksum,
            got: computed_checksum,
        });
    }

    let timestamp = f64::from_le_bytes(read_array(&body[..8]));
    let data = body[8..]
        .chunks_exact(8)
        .map(|chunk| f64::from_le_bytes(read_array(chunk)))
        .collect();

    Ok(Record { data, timestamp })
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
