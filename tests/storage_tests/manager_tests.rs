//! Storage Manager Tests
//!
//! Tests verify:
//! - Directory creation and validation
//! - Segment discovery with and without a manifest
//! - Generation numbering across reopens
//! - Removal of uncommitted and temporary files
//! - Fatal errors for missing or incomplete segments

use std::fs;
use std::path::Path;
use std::sync::Arc;

use stratakv::config::Config;
use stratakv::storage::{
    data_path, index_path, Manifest, Segment, SegmentBuilder, StorageManager, MANIFEST_FILENAME,
};
use stratakv::{Entry, StrataError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(dir: &Path) -> Config {
    Config::builder().data_dir(dir).sync_writes(false).build()
}

fn entries(prefix: &str, count: usize) -> Vec<Entry> {
    (0..count)
        .map(|i| {
            Entry::put(
                format!("{}_{:04}", prefix, i).into_bytes(),
                format!("value_{}", i).into_bytes(),
            )
        })
        .collect()
}

/// Build and commit one segment per batch, newest ends up first
fn commit_batches(manager: &StorageManager, batches: Vec<Vec<Entry>>) -> Vec<Arc<Segment>> {
    let mut segments: Vec<Arc<Segment>> = Vec::new();
    for batch in batches {
        let segment = manager.build_segment(batch).unwrap().unwrap();
        segments.insert(0, segment);
        manager.commit(&segments).unwrap();
    }
    segments
}

fn generations(segments: &[Arc<Segment>]) -> Vec<u64> {
    segments.iter().map(|s| s.generation()).collect()
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_creates_directory_and_manifest() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("db");

    let (manager, segments) = StorageManager::open(&config(&data_dir)).unwrap();

    assert!(data_dir.is_dir());
    assert!(data_dir.join(MANIFEST_FILENAME).exists());
    assert!(segments.is_empty());
    assert_eq!(manager.next_generation(), 1);
    assert_eq!(manager.data_dir(), data_dir.as_path());
}

#[test]
fn test_open_without_create_fails_on_missing_dir() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path().join("missing"))
        .create_if_missing(false)
        .build();

    let result = StorageManager::open(&config);
    assert!(matches!(result, Err(StrataError::Init(_))));
}

#[test]
fn test_open_rejects_file_as_data_dir() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("plain");
    fs::write(&file, b"x").unwrap();

    let result = StorageManager::open(&config(&file));
    assert!(matches!(result, Err(StrataError::Init(_))));
}

// =============================================================================
// Generation Tests
// =============================================================================

#[test]
fn test_generations_increase() {
    let temp_dir = TempDir::new().unwrap();
    let (manager, _) = StorageManager::open(&config(temp_dir.path())).unwrap();

    assert_eq!(manager.allocate_generation(), 1);
    assert_eq!(manager.allocate_generation(), 2);
    assert_eq!(manager.next_generation(), 3);
}

#[test]
fn test_empty_build_returns_none() {
    let temp_dir = TempDir::new().unwrap();
    let (manager, _) = StorageManager::open(&config(temp_dir.path())).unwrap();

    assert!(manager.build_segment(Vec::new()).unwrap().is_none());
    assert!(!data_path(temp_dir.path(), 1).exists());
}

#[test]
fn test_reopen_returns_segments_newest_first() {
    let temp_dir = TempDir::new().unwrap();
    {
        let (manager, _) = StorageManager::open(&config(temp_dir.path())).unwrap();
        commit_batches(
            &manager,
            vec![entries("a", 10), entries("b", 10), entries("c", 10)],
        );
    }

    let (manager, segments) = StorageManager::open(&config(temp_dir.path())).unwrap();
    assert_eq!(generations(&segments), vec![3, 2, 1]);
    assert_eq!(manager.next_generation(), 4);
    assert!(segments[0].find(b"c_0005").is_some());
}

#[test]
fn test_generation_never_reused_after_unused_allocation() {
    let temp_dir = TempDir::new().unwrap();
    {
        let (manager, _) = StorageManager::open(&config(temp_dir.path())).unwrap();
        commit_batches(&manager, vec![entries("a", 1)]);
        manager.allocate_generation();
        manager.allocate_generation();
        manager.commit(&[]).unwrap();
    }

    let (manager, segments) = StorageManager::open(&config(temp_dir.path())).unwrap();
    assert!(segments.is_empty());
    assert_eq!(manager.next_generation(), 4);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_uncommitted_segment_removed() {
    let temp_dir = TempDir::new().unwrap();
    {
        let (manager, _) = StorageManager::open(&config(temp_dir.path())).unwrap();
        commit_batches(&manager, vec![entries("a", 5)]);
        // Written but never committed, as after a crash mid-flush
        manager.build_segment(entries("b", 5)).unwrap().unwrap();
    }
    assert!(data_path(temp_dir.path(), 2).exists());

    let (manager, segments) = StorageManager::open(&config(temp_dir.path())).unwrap();
    assert_eq!(generations(&segments), vec![1]);
    assert!(!data_path(temp_dir.path(), 2).exists());
    assert!(!index_path(temp_dir.path(), 2).exists());
    assert_eq!(manager.next_generation(), 3);
}

#[test]
fn test_temp_files_removed() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("segment_000009.data.tmp"), b"partial").unwrap();
    fs::write(temp_dir.path().join("MANIFEST.tmp"), b"partial").unwrap();

    StorageManager::open(&config(temp_dir.path())).unwrap();

    assert!(!temp_dir.path().join("segment_000009.data.tmp").exists());
    assert!(!temp_dir.path().join("MANIFEST.tmp").exists());
}

#[test]
fn test_discovery_without_manifest() {
    let temp_dir = TempDir::new().unwrap();
    for (generation, prefix) in [(2u64, "x"), (5, "y")] {
        let mut builder = SegmentBuilder::new(temp_dir.path(), generation, false).unwrap();
        builder.add_all(entries(prefix, 3)).unwrap();
        builder.finish().unwrap();
    }

    let (manager, segments) = StorageManager::open(&config(temp_dir.path())).unwrap();
    assert_eq!(generations(&segments), vec![5, 2]);
    assert_eq!(manager.next_generation(), 6);

    let manifest = Manifest::load(temp_dir.path()).unwrap().unwrap();
    let listed: Vec<u64> = manifest.segments.iter().map(|m| m.generation).collect();
    assert_eq!(listed, vec![2, 5]);
}

#[test]
fn test_lone_data_file_is_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(data_path(temp_dir.path(), 3), b"abc").unwrap();

    let result = StorageManager::open(&config(temp_dir.path()));
    assert!(matches!(
        result,
        Err(StrataError::CorruptSegment { generation: 3, .. })
    ));
}

#[test]
fn test_missing_committed_segment_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    {
        let (manager, _) = StorageManager::open(&config(temp_dir.path())).unwrap();
        commit_batches(&manager, vec![entries("a", 5), entries("b", 5)]);
    }
    fs::remove_file(data_path(temp_dir.path(), 1)).unwrap();

    let result = StorageManager::open(&config(temp_dir.path()));
    assert!(matches!(result, Err(StrataError::Init(_))));
}

#[test]
fn test_corrupt_manifest_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    StorageManager::open(&config(temp_dir.path())).unwrap();
    fs::write(temp_dir.path().join(MANIFEST_FILENAME), b"garbage!garbage!").unwrap();

    let result = StorageManager::open(&config(temp_dir.path()));
    assert!(matches!(result, Err(StrataError::Manifest(_))));
}

#[test]
fn test_verify_checksums_on_open() {
    let temp_dir = TempDir::new().unwrap();
    {
        let (manager, _) = StorageManager::open(&config(temp_dir.path())).unwrap();
        commit_batches(&manager, vec![vec![Entry::put(&b"k"[..], &b"v"[..])]]);
    }
    fs::write(data_path(temp_dir.path(), 1), b"kx").unwrap();

    let verifying = Config::builder()
        .data_dir(temp_dir.path())
        .sync_writes(false)
        .verify_checksums(true)
        .build();
    let result = StorageManager::open(&verifying);
    assert!(matches!(
        result,
        Err(StrataError::CorruptSegment { generation: 1, .. })
    ));
}
