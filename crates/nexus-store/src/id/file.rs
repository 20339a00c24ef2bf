//! Id file format
//!
//! ```text
//! [sticky: u8][high_id: u64][count: u64][free ids: u64 * count][crc32: u32]
//! ```
//!
//! Integers are little-endian; the crc covers every byte before it. The sticky
//! byte is 1 while a generator has the file open and 0 after a clean close.

use crate::Result;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::Path;

const STICKY_OFFSET: usize = 0;
const HIGH_ID_OFFSET: usize = 1;
const COUNT_OFFSET: usize = 9;
const IDS_OFFSET: usize = 17;
const CRC_SIZE: usize = 4;

/// Persisted generator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IdFileState {
    pub(crate) sticky: bool,
    pub(crate) high_id: u64,
    pub(crate) free_ids: Vec<u64>,
}

/// Outcome of reading an id file
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum IdFileStatus {
    /// Cleanly closed state
    Clean(IdFileState),
    /// Left open by a generator that never closed
    Sticky,
    /// Truncated or failing the checksum
    Corrupt(String),
    /// No id file
    Missing,
}

pub(crate) fn encode(state: &IdFileState) -> Vec<u8> {
    let mut buf = Vec::with_capacity(IDS_OFFSET + state.free_ids.len() * 8 + CRC_SIZE);
    buf.push(u8::from(state.sticky));
    buf.extend_from_slice(&state.high_id.to_le_bytes());
    buf.extend_from_slice(&(state.free_ids.len() as u64).to_le_bytes());
    for id in &state.free_ids {
        buf.extend_from_slice(&id.to_le_bytes());
    }
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

pub(crate) fn decode(bytes: &[u8]) -> IdFileStatus {
    if bytes.len() < IDS_OFFSET + CRC_SIZE {
        return IdFileStatus::Corrupt(format!("{} bytes is too short", bytes.len()));
    }

    let (body, crc_bytes) = bytes.split_at(bytes.len() - CRC_SIZE);
    let mut crc = [0u8; CRC_SIZE];
    crc.copy_from_slice(crc_bytes);
    if crc32fast::hash(body) != u32::from_le_bytes(crc) {
        return IdFileStatus::Corrupt("checksum mismatch".to_string());
    }

    let count = read_u64(body, COUNT_OFFSET);
    let expected = count
        .checked_mul(8)
        .and_then(|n| n.checked_add(IDS_OFFSET as u64));
    if expected != Some(body.len() as u64) {
        return IdFileStatus::Corrupt(format!("free id count {} does not match file size", count));
    }

    if body[STICKY_OFFSET] != 0 {
        return IdFileStatus::Sticky;
    }

    let high_id = read_u64(body, HIGH_ID_OFFSET);
    let free_ids = (0..count as usize)
        .map(|i| read_u64(body, IDS_OFFSET + i * 8))
        .collect();

    IdFileStatus::Clean(IdFileState {
        sticky: false,
        high_id,
        free_ids,
    })
}

pub(crate) fn read(path: &Path) -> Result<IdFileStatus> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(decode(&bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(IdFileStatus::Missing),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn write(path: &Path, state: &IdFileState) -> Result<()> {
    let bytes = encode(state);
    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state(sticky: bool) -> IdFileState {
        IdFileState {
            sticky,
            high_id: 42,
            free_ids: vec![3, 7, 11],
        }
    }

    #[test]
    fn test_clean_state_survives_write_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.id");

        write(&path, &state(false)).unwrap();
        assert_eq!(read(&path).unwrap(), IdFileStatus::Clean(state(false)));
    }

    #[test]
    fn test_sticky_file() {
        assert_eq!(decode(&encode(&state(true))), IdFileStatus::Sticky);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            read(&dir.path().join("absent.id")).unwrap(),
            IdFileStatus::Missing
        );
    }

    #[test]
    fn test_flipped_byte_fails_checksum() {
        let mut bytes = encode(&state(false));
        bytes[HIGH_ID_OFFSET] ^= 0xFF;
        assert!(matches!(decode(&bytes), IdFileStatus::Corrupt(_)));
    }

    #[test]
    fn test_truncated_file() {
        let bytes = encode(&state(false));
        assert!(matches!(decode(&bytes[..10]), IdFileStatus::Corrupt(_)));
    }
}
