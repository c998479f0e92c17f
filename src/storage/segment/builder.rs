//! Segment Builder
//!
//! Writes sorted entries to a new segment. Both files are written under a
//! `.tmp` name and renamed into place only once they are complete.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::Result;
use crate::storage::sync_dir;
use crate::types::Entry;
use crate::StrataError;

use super::{data_path, index_path, tmp_path, SegmentMeta, TOMBSTONE_FLAG};

struct Streams {
    data: BufWriter<File>,
    index: BufWriter<File>,
}

/// Builder for creating a new segment from entries in ascending key order
pub struct SegmentBuilder {
    dir: PathBuf,
    generation: u64,
    data_tmp: PathBuf,
    index_tmp: PathBuf,
    /// `None` once `finish()` has taken them
    streams: Option<Streams>,
    /// Current end of the data stream
    offset: u64,
    entry_count: u64,
    last_key: Option<Bytes>,
    data_hasher: crc32fast::Hasher,
    sync: bool,
    committed: bool,
}

impl SegmentBuilder {
    /// Create the temporary files for `generation` inside `dir`
    pub fn new(dir: &Path, generation: u64, sync: bool) -> Result<Self> {
        let data_tmp = tmp_path(&data_path(dir, generation));
        let index_tmp = tmp_path(&index_path(dir, generation));

        let data = Self::create(&data_tmp)?;
        let index = match Self::create(&index_tmp) {
            Ok(index) => index,
            Err(e) => {
                let _ = fs::remove_file(&data_tmp);
                return Err(e);
            }
        };

        let mut builder = Self {
            dir: dir.to_path_buf(),
            generation,
            data_tmp,
            index_tmp,
            streams: Some(Streams {
                data: BufWriter::new(data),
                index: BufWriter::new(index),
            }),
            offset: 0,
            entry_count: 0,
            last_key: None,
            data_hasher: crc32fast::Hasher::new(),
            sync,
            committed: false,
        };

        // off[0]: first key starts at the beginning of the data stream
        builder.streams()?.index.write_all(&0u64.to_le_bytes())?;
        Ok(builder)
    }

    fn create(path: &Path) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?)
    }

    fn streams(&mut self) -> Result<&mut Streams> {
        self.streams
            .as_mut()
            .ok_or_else(|| StrataError::Storage("segment builder already finished".to_string()))
    }

    /// Append an entry; keys must be strictly ascending
    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        let key = entry.key();
        if let Some(last) = &self.last_key {
            if key <= last {
                return Err(StrataError::Storage(format!(
                    "segment {}: key {:?} not after {:?}",
                    self.generation, key, last
                )));
            }
        }

        let value: &[u8] = entry.value().map(|v| &v[..]).unwrap_or(&[]);
        let key_end = self.offset + key.len() as u64;
        let value_end = key_end + value.len() as u64;
        let boundary = if entry.is_tombstone() {
            key_end | TOMBSTONE_FLAG
        } else {
            key_end
        };

        let streams = self.streams()?;
        streams.data.write_all(key)?;
        streams.data.write_all(value)?;
        streams.index.write_all(&boundary.to_le_bytes())?;
        streams.index.write_all(&value_end.to_le_bytes())?;

        self.data_hasher.update(key);
        self.data_hasher.update(value);
        self.offset = value_end;
        self.entry_count += 1;
        self.last_key = Some(key.clone());

        Ok(())
    }

    /// Append every entry of an ascending iterator
    pub fn add_all(&mut self, entries: impl IntoIterator<Item = Entry>) -> Result<()> {
        for entry in entries {
            self.add(&entry)?;
        }
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Flush, sync and rename both files into place
    ///
    /// Returns `None` without creating anything when no entry was added.
    pub fn finish(mut self) -> Result<Option<SegmentMeta>> {
        let Streams { data, index } = self
            .streams
            .take()
            .ok_or_else(|| StrataError::Storage("segment builder already finished".to_string()))?;

        if self.entry_count == 0 {
            // Drop removes the temporary files
            return Ok(None);
        }

        let data = data.into_inner().map_err(|e| e.into_error())?;
        let index = index.into_inner().map_err(|e| e.into_error())?;
        if self.sync {
            data.sync_all()?;
            index.sync_all()?;
        }
        let data_len = data.metadata()?.len();
        let index_len = index.metadata()?.len();
        drop(data);
        drop(index);

        let data_final = data_path(&self.dir, self.generation);
        let index_final = index_path(&self.dir, self.generation);
        fs::rename(&self.data_tmp, &data_final)?;
        if let Err(e) = fs::rename(&self.index_tmp, &index_final) {
            let _ = fs::remove_file(&data_final);
            return Err(e.into());
        }
        self.committed = true;

        if self.sync {
            sync_dir(&self.dir)?;
        }

        tracing::debug!(
            generation = self.generation,
            entries = self.entry_count,
            data_len,
            "segment written"
        );

        Ok(Some(SegmentMeta {
            generation: self.generation,
            entry_count: self.entry_count,
            data_len,
            index_len,
            data_crc: Some(self.data_hasher.clone().finalize()),
        }))
    }
}

impl Drop for SegmentBuilder {
    fn drop(&mut self) {
        if !self.committed {
            // Close handles before unlinking
            self.streams.take();
            let _ = fs::remove_file(&self.data_tmp);
            let _ = fs::remove_file(&self.index_tmp);
        }
    }
}
