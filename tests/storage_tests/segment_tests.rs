//! Segment Tests
//!
//! Tests verify:
//! - Building segments from sorted entries
//! - Point lookups and range cursors over mapped files
//! - Tombstones and empty values on disk
//! - Corruption detection at open
//! - Temporary file cleanup and obsolete file removal

use std::fs;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use stratakv::storage::{data_path, index_path, Segment, SegmentBuilder, SegmentMeta};
use stratakv::{Entry, KeyRange, StrataError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn put(key: &str, value: &str) -> Entry {
    Entry::put(key.as_bytes().to_vec(), value.as_bytes().to_vec())
}

fn del(key: &str) -> Entry {
    Entry::tombstone(key.as_bytes().to_vec())
}

fn build(dir: &Path, generation: u64, entries: Vec<Entry>) -> SegmentMeta {
    let mut builder = SegmentBuilder::new(dir, generation, false).unwrap();
    builder.add_all(entries).unwrap();
    builder.finish().unwrap().expect("segment should not be empty")
}

fn build_and_open(dir: &Path, generation: u64, entries: Vec<Entry>) -> Arc<Segment> {
    let meta = build(dir, generation, entries);
    Arc::new(Segment::open(dir, generation, Some(&meta), true).unwrap())
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn keys(iter: impl Iterator<Item = Entry>) -> Vec<String> {
    iter.map(|e| String::from_utf8(e.key().to_vec()).unwrap())
        .collect()
}

// =============================================================================
// Build Tests
// =============================================================================

#[test]
fn test_build_creates_both_files() {
    let temp_dir = TempDir::new().unwrap();
    let meta = build(temp_dir.path(), 1, vec![put("a", "1"), put("b", "22")]);

    assert_eq!(meta.generation, 1);
    assert_eq!(meta.entry_count, 2);
    assert_eq!(meta.data_len, 5);
    assert_eq!(meta.index_len, 8 * 5);
    assert!(meta.data_crc.is_some());
    assert_eq!(
        file_names(temp_dir.path()),
        vec!["segment_000001.data", "segment_000001.index"]
    );
}

#[test]
fn test_data_layout_is_keys_then_values() {
    let temp_dir = TempDir::new().unwrap();
    build(temp_dir.path(), 3, vec![put("ab", "xyz"), del("c"), put("d", "")]);

    let data = fs::read(data_path(temp_dir.path(), 3)).unwrap();
    assert_eq!(data, b"abxyzcd");

    let index = fs::read(index_path(temp_dir.path(), 3)).unwrap();
    let offsets: Vec<u64> = index
        .chunks(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    let flag = 1u64 << 63;
    assert_eq!(offsets, vec![0, 2, 5, 6 | flag, 6, 7, 7]);
}

#[test]
fn test_empty_builder_creates_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let builder = SegmentBuilder::new(temp_dir.path(), 1, false).unwrap();
    assert!(builder.finish().unwrap().is_none());
    assert!(file_names(temp_dir.path()).is_empty());
}

#[test]
fn test_dropped_builder_removes_temp_files() {
    let temp_dir = TempDir::new().unwrap();
    {
        let mut builder = SegmentBuilder::new(temp_dir.path(), 1, false).unwrap();
        builder.add(&put("a", "1")).unwrap();
        assert_eq!(file_names(temp_dir.path()).len(), 2);
    }
    assert!(file_names(temp_dir.path()).is_empty());
}

#[test]
fn test_out_of_order_keys_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let mut builder = SegmentBuilder::new(temp_dir.path(), 1, false).unwrap();
    builder.add(&put("b", "1")).unwrap();

    assert!(matches!(
        builder.add(&put("a", "1")),
        Err(StrataError::Storage(_))
    ));
    assert!(matches!(
        builder.add(&put("b", "2")),
        Err(StrataError::Storage(_))
    ));
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_find_values_and_tombstones() {
    let temp_dir = TempDir::new().unwrap();
    let segment = build_and_open(
        temp_dir.path(),
        1,
        vec![put("apple", "red"), del("banana"), put("cherry", "")],
    );

    assert_eq!(segment.entry_count(), 3);

    let apple = segment.find(b"apple").unwrap();
    assert_eq!(apple.value(), Some(&Bytes::from_static(b"red")));

    let banana = segment.find(b"banana").unwrap();
    assert!(banana.is_tombstone());

    let cherry = segment.find(b"cherry").unwrap();
    assert!(!cherry.is_tombstone());
    assert_eq!(cherry.value().map(|v| v.len()), Some(0));

    assert!(segment.find(b"app").is_none());
    assert!(segment.find(b"applesauce").is_none());
    assert!(segment.find(b"zzz").is_none());
    assert!(segment.find(b"").is_none());
}

#[test]
fn test_find_in_large_segment() {
    let temp_dir = TempDir::new().unwrap();
    let entries: Vec<Entry> = (0..1000)
        .map(|i| put(&format!("key_{:05}", i * 2), &format!("value_{}", i)))
        .collect();
    let segment = build_and_open(temp_dir.path(), 1, entries);

    for i in 0..1000 {
        let entry = segment.find(format!("key_{:05}", i * 2).as_bytes()).unwrap();
        assert_eq!(entry.value().unwrap().as_ref(), format!("value_{}", i).as_bytes());
        assert!(segment.find(format!("key_{:05}", i * 2 + 1).as_bytes()).is_none());
    }
}

#[test]
fn test_range_bounds() {
    let temp_dir = TempDir::new().unwrap();
    let segment = build_and_open(
        temp_dir.path(),
        1,
        vec![put("a", "1"), put("b", "2"), del("c"), put("d", "4"), put("e", "5")],
    );

    let all = segment.range(&KeyRange::all());
    assert_eq!(all.len(), 5);
    assert_eq!(keys(all), vec!["a", "b", "c", "d", "e"]);

    let middle = segment.range(&KeyRange::new(Some(b"b"), Some(b"d")));
    assert_eq!(keys(middle), vec!["b", "c"]);

    let between = segment.range(&KeyRange::new(Some(b"bb"), Some(b"dd")));
    assert_eq!(keys(between), vec!["c", "d"]);

    let inverted = segment.range(&KeyRange::new(Some(b"d"), Some(b"b")));
    assert_eq!(inverted.count(), 0);

    let past_end = segment.range(&KeyRange::new(Some(b"f"), None));
    assert_eq!(past_end.count(), 0);
}

#[test]
fn test_values_outlive_segment_handle() {
    let temp_dir = TempDir::new().unwrap();
    let segment = build_and_open(temp_dir.path(), 1, vec![put("k", "mapped")]);

    let value = segment.find(b"k").unwrap().value().cloned().unwrap();
    drop(segment);
    assert_eq!(value.as_ref(), b"mapped");
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_truncated_data_is_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    build(temp_dir.path(), 4, vec![put("a", "1"), put("b", "2")]);

    let path = data_path(temp_dir.path(), 4);
    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..data.len() - 1]).unwrap();

    let err = Segment::open(temp_dir.path(), 4, None, false).unwrap_err();
    assert!(matches!(err, StrataError::CorruptSegment { generation: 4, .. }));
}

#[test]
fn test_garbage_index_is_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    build(temp_dir.path(), 2, vec![put("a", "1")]);
    fs::write(index_path(temp_dir.path(), 2), b"not an index").unwrap();

    let err = Segment::open(temp_dir.path(), 2, None, false).unwrap_err();
    assert!(matches!(err, StrataError::CorruptSegment { .. }));
}

#[test]
fn test_empty_index_is_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    build(temp_dir.path(), 2, vec![put("a", "1")]);
    fs::write(index_path(temp_dir.path(), 2), b"").unwrap();

    assert!(Segment::open(temp_dir.path(), 2, None, false).is_err());
}

#[test]
fn test_checksum_mismatch_detected() {
    let temp_dir = TempDir::new().unwrap();
    let meta = build(temp_dir.path(), 1, vec![put("a", "1")]);

    // Same length, different bytes
    fs::write(data_path(temp_dir.path(), 1), b"a2").unwrap();

    assert!(Segment::open(temp_dir.path(), 1, Some(&meta), false).is_ok());
    let err = Segment::open(temp_dir.path(), 1, Some(&meta), true).unwrap_err();
    assert!(matches!(err, StrataError::CorruptSegment { generation: 1, .. }));
}

#[test]
fn test_manifest_mismatch_detected() {
    let temp_dir = TempDir::new().unwrap();
    let mut meta = build(temp_dir.path(), 1, vec![put("a", "1")]);
    meta.entry_count = 2;

    let err = Segment::open(temp_dir.path(), 1, Some(&meta), false).unwrap_err();
    assert!(matches!(err, StrataError::CorruptSegment { .. }));
}

#[test]
fn test_missing_file_is_io_error() {
    let temp_dir = TempDir::new().unwrap();
    build(temp_dir.path(), 1, vec![put("a", "1")]);
    fs::remove_file(index_path(temp_dir.path(), 1)).unwrap();

    let err = Segment::open(temp_dir.path(), 1, None, false).unwrap_err();
    assert!(matches!(err, StrataError::Io(_)));
}

// =============================================================================
// Obsolete Segment Tests
// =============================================================================

#[test]
fn test_obsolete_segment_removed_after_last_reader() {
    let temp_dir = TempDir::new().unwrap();
    let segment = build_and_open(temp_dir.path(), 1, vec![put("a", "1"), put("b", "2")]);

    let mut cursor = segment.range(&KeyRange::all());
    segment.mark_obsolete();
    drop(segment);

    // The cursor still holds the segment
    assert_eq!(file_names(temp_dir.path()).len(), 2);
    assert_eq!(cursor.next().unwrap().key().as_ref(), b"a");
    assert_eq!(cursor.next().unwrap().key().as_ref(), b"b");

    drop(cursor);
    assert!(file_names(temp_dir.path()).is_empty());
}

#[test]
fn test_live_segment_kept_on_drop() {
    let temp_dir = TempDir::new().unwrap();
    let segment = build_and_open(temp_dir.path(), 1, vec![put("a", "1")]);
    let (data, index) = segment.paths();
    let (data, index) = (data.to_path_buf(), index.to_path_buf());
    assert!(!segment.is_obsolete());

    drop(segment);
    assert!(data.exists());
    assert!(index.exists());
}
