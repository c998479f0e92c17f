//! Manifest
//!
//! The manifest records which segment generations are committed. Writing it
//! is the commit point of every flush and compaction: segment files that
//! exist on disk but are not listed were never committed.
//!
//! ## File Format
//! ```text
//! ┌───────────┬───────────┬──────────────────────────────┐
//! │ CRC32 (4) │ Len (4)   │ bincode(Manifest)            │
//! └───────────┴───────────┴──────────────────────────────┘
//! ```

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::StrataError;

use super::segment::SegmentMeta;
use super::sync_dir;

pub const MANIFEST_FILENAME: &str = "MANIFEST";
const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// Header: CRC32 (4) + payload length (4)
const HEADER_SIZE: usize = 8;

const FORMAT_VERSION: u32 = 1;

/// Committed engine layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    /// Lowest generation that may still be handed out
    pub next_generation: u64,
    /// Live segments, oldest first
    pub segments: Vec<SegmentMeta>,
}

impl Manifest {
    pub fn new(next_generation: u64, segments: Vec<SegmentMeta>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            next_generation,
            segments,
        }
    }

    /// Read the manifest of `dir`, if one was ever written
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(dir.join(MANIFEST_FILENAME)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::decode(&bytes).map(Some)
    }

    /// Atomically replace the manifest of `dir`
    ///
    /// The rename is the commit point: an error means the previous manifest
    /// is still in place. A failed directory sync after the rename is logged,
    /// not returned, since the new manifest is already visible.
    pub fn store(&self, dir: &Path, sync: bool) -> Result<()> {
        self.store_with(dir, sync, sync_dir)
    }

    fn store_with(
        &self,
        dir: &Path,
        sync: bool,
        sync_parent: impl FnOnce(&Path) -> Result<()>,
    ) -> Result<()> {
        let bytes = self.encode()?;
        let tmp = dir.join(MANIFEST_TMP_FILENAME);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&bytes)?;
        if sync {
            file.sync_all()?;
        }
        drop(file);

        if let Err(e) = fs::rename(&tmp, dir.join(MANIFEST_FILENAME)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        if sync {
            if let Err(e) = sync_parent(dir) {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %e,
                    "manifest committed but directory sync failed"
                );
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| StrataError::Manifest(format!("manifest too large: {} bytes", payload.len())))?;

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StrataError::Manifest(format!(
                "truncated header ({} bytes)",
                bytes.len()
            )));
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[0..4]);
        let crc = u32::from_le_bytes(word);
        word.copy_from_slice(&bytes[4..8]);
        let len = u32::from_le_bytes(word) as usize;

        let payload = &bytes[HEADER_SIZE..];
        if payload.len() != len {
            return Err(StrataError::Manifest(format!(
                "payload is {} bytes, header says {}",
                payload.len(),
                len
            )));
        }
        if crc32fast::hash(payload) != crc {
            return Err(StrataError::Manifest("checksum mismatch".to_string()));
        }

        let manifest: Manifest = bincode::deserialize(payload)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(StrataError::Manifest(format!(
                "unsupported format version {}",
                manifest.format_version
            )));
        }
        Ok(manifest)
    }
}
