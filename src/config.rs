//! Configuration for StrataKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a StrataKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory owned by the engine. Internal structure:
    ///   {data_dir}/
    ///     ├── MANIFEST               (committed segment list)
    ///     ├── segment_000001.data    (keys and values)
    ///     └── segment_000001.index   (2N+1 offsets into the data file)
    pub data_dir: PathBuf,

    /// Create `data_dir` on open if it does not exist yet
    pub create_if_missing: bool,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// fsync segment files, the manifest and the directory before publishing
    pub sync_writes: bool,

    /// Recompute the data checksum of every segment at open
    pub verify_checksums: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./stratakv_data"),
            create_if_missing: true,
            sync_writes: true,
            verify_checksums: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Whether a missing data directory is created or rejected
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.config.create_if_missing = create;
        self
    }

    /// Whether new segments and manifests are fsynced
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.config.sync_writes = sync;
        self
    }

    /// Whether segment checksums are verified at open
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.config.verify_checksums = verify;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
