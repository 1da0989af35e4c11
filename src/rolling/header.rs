//! Segment header codec
//!
//! Metadata is stored in two alternating header chunks per segment. Version
//! `v` goes to slot `v % 2`, so the previous version stays readable until the
//! new one is complete.
//!
//! ## Frame Format
//! ```text
//! ┌─────────────┬─────────┬─────────┬──────────────────────┐
//! │ Version (8) │ CRC (4) │ Len (4) │ bincode(SegmentMeta) │
//! └─────────────┴─────────┴─────────┴──────────────────────┘
//! ```
//! All integers little-endian; CRC32 covers the payload only.

use crate::error::{Result, StorageError};

use super::metadata::SegmentMetadata;

/// Version (8) + CRC (4) + Len (4)
pub const FRAME_HEADER_SIZE: usize = 16;

/// Number of alternating header slots per segment
pub const HEADER_SLOTS: u64 = 2;

/// Backend chunk name of a header slot
pub fn slot_name(segment: &str, slot: u64) -> String {
    format!("{}$header.{}", segment, slot)
}

/// Slot a given header version is written to
pub fn slot_for_version(version: u64) -> u64 {
    version % HEADER_SLOTS
}

/// Encode metadata into a header frame
pub fn encode(meta: &SegmentMetadata) -> Result<Vec<u8>> {
    let payload = bincode::serialize(meta)?;
    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        StorageError::Serialization(format!(
            "header for segment {} too large: {} bytes",
            meta.name,
            payload.len()
        ))
    })?;
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&meta.version.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload_len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a header frame, validating length, checksum and version
pub fn decode(frame: &[u8]) -> Result<SegmentMetadata> {
    if frame.len() < FRAME_HEADER_SIZE {
        return Err(StorageError::Corruption(format!(
            "header frame too short: {} bytes",
            frame.len()
        )));
    }

    let version = u64::from_le_bytes(read_array(&frame[0..8]));
    let crc = u32::from_le_bytes(read_array(&frame[8..12]));
    let len = u32::from_le_bytes(read_array(&frame[12..16])) as usize;

    let payload = &frame[FRAME_HEADER_SIZE..];
    if payload.len() != len {
        return Err(StorageError::Corruption(format!(
            "header payload length mismatch: expected {}, got {}",
            len,
            payload.len()
        )));
    }

    let actual_crc = crc32fast::hash(payload);
    if actual_crc != crc {
        return Err(StorageError::Corruption(format!(
            "header CRC mismatch: expected {:08x}, got {:08x}",
            crc, actual_crc
        )));
    }

    let meta: SegmentMetadata = bincode::deserialize(payload)?;
    if meta.version != version {
        return Err(StorageError::Corruption(format!(
            "header version mismatch: frame {}, record {}",
            version, meta.version
        )));
    }
    Ok(meta)
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
