//! Configuration management for the photo manager.
//!
//! Two layers:
//!
//! - [`ManagerConfig`]: the construction-time settings the library needs
//!   (cache capacities, cache directory, recycle bound).
//! - [`Config`]: the CLI of the `photo-manager` binary, parsed by clap from
//!   arguments and `PHOTO_*` environment variables.
//!
//! # Environment Variables
//!
//! - `PHOTO_MEMORY_CACHE_SIZE` - Memory cache capacity in bytes (default: 64MB)
//! - `PHOTO_DISK_CACHE_SIZE` - Disk cache capacity in bytes (default: 256MB)
//! - `PHOTO_CACHE_DIR` - Disk cache directory (default: platform cache dir)
//! - `PHOTO_WORKERS` - Concurrent background jobs (default: 4)
//! - `PHOTO_MAX_RECYCLED` - Recycled buffers kept per size (default: 4)

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use directories::ProjectDirs;

use crate::buffer::DEFAULT_MAX_RECYCLED_PER_SIZE;
use crate::cache::{DEFAULT_DISK_CACHE_CAPACITY, DEFAULT_MEMORY_CACHE_CAPACITY};
use crate::exec::DEFAULT_WORKERS;
use crate::manager::LoadMode;

const APP_QUALIFIER: &str = "";
const APP_ORGANIZATION: &str = "";
const APP_NAME: &str = "photo-manager";

/// Platform cache directory for this application.
///
/// Falls back to a directory under the system temp dir when no home
/// directory can be determined.
pub fn default_cache_dir() -> PathBuf {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
        || std::env::temp_dir().join(APP_NAME),
        |dirs| dirs.cache_dir().to_path_buf(),
    )
}

// =============================================================================
// Manager Configuration
// =============================================================================

/// Settings used to construct a [`PhotoManager`](crate::PhotoManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Memory cache capacity in bytes of decoded pixels
    pub memory_cache_size: usize,

    /// Disk cache capacity in bytes of encoded entries
    pub disk_cache_size: u64,

    /// Directory holding disk cache entries
    pub cache_dir: PathBuf,

    /// Recycled buffers retained per (width, height)
    pub max_recycled_per_size: usize,
}

impl ManagerConfig {
    /// Default settings with the disk cache in `dir`.
    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: dir.into(),
            ..Self::default()
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            memory_cache_size: DEFAULT_MEMORY_CACHE_CAPACITY,
            disk_cache_size: DEFAULT_DISK_CACHE_CAPACITY,
            cache_dir: default_cache_dir(),
            max_recycled_per_size: DEFAULT_MAX_RECYCLED_PER_SIZE,
        }
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// How the binary should load each image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Native size
    AsIs,
    /// Power-of-two downsample covering the box
    Approximate,
    /// Scale to fit inside the box
    Fit,
    /// Scale and crop the centre to exactly the box
    Crop,
}

impl From<ModeArg> for LoadMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::AsIs => LoadMode::AsIs,
            ModeArg::Approximate => LoadMode::Approximate,
            ModeArg::Fit => LoadMode::FitCenter,
            ModeArg::Crop => LoadMode::CenterCrop,
        }
    }
}

/// Photo Manager - load images through the memory and disk caches.
///
/// Loads each path, transforming it as requested, and reports cache and
/// buffer pool statistics. Running it twice over the same paths serves the
/// second run from the disk cache.
#[derive(Parser, Debug, Clone)]
#[command(name = "photo-manager")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Image files to load.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    // =========================================================================
    // Transform
    // =========================================================================
    /// Transform applied to every image.
    #[arg(long, value_enum, default_value_t = ModeArg::AsIs)]
    pub mode: ModeArg,

    /// Target width in pixels (sized modes only).
    #[arg(long, default_value_t = 0)]
    pub width: u32,

    /// Target height in pixels (sized modes only).
    #[arg(long, default_value_t = 0)]
    pub height: u32,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Memory cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_MEMORY_CACHE_CAPACITY, env = "PHOTO_MEMORY_CACHE_SIZE")]
    pub memory_cache_size: usize,

    /// Disk cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_DISK_CACHE_CAPACITY, env = "PHOTO_DISK_CACHE_SIZE")]
    pub disk_cache_size: u64,

    /// Disk cache directory.
    ///
    /// Defaults to the platform cache directory.
    #[arg(long, env = "PHOTO_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Recycled buffers kept per image size.
    #[arg(long, default_value_t = DEFAULT_MAX_RECYCLED_PER_SIZE, env = "PHOTO_MAX_RECYCLED")]
    pub max_recycled_per_size: usize,

    // =========================================================================
    // Execution
    // =========================================================================
    /// Number of background jobs run concurrently.
    #[arg(short, long, default_value_t = DEFAULT_WORKERS, env = "PHOTO_WORKERS")]
    pub workers: usize,

    // =========================================================================
    // Output
    // =========================================================================
    /// Print statistics as JSON instead of a summary.
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration.
    ///
    /// Returns an error message if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_cache_size == 0 {
            return Err("memory_cache_size must be greater than 0".to_string());
        }
        if self.disk_cache_size == 0 {
            return Err("disk_cache_size must be greater than 0".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }

        if (self.width == 0) != (self.height == 0) {
            return Err("--width and --height must be given together".to_string());
        }
        if self.mode != ModeArg::AsIs && self.width == 0 {
            return Err(format!(
                "--mode {} requires --width and --height",
                self.mode_name()
            ));
        }

        Ok(())
    }

    /// The library settings carried by this configuration.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            memory_cache_size: self.memory_cache_size,
            disk_cache_size: self.disk_cache_size,
            cache_dir: self.cache_dir.clone().unwrap_or_else(default_cache_dir),
            max_recycled_per_size: self.max_recycled_per_size,
        }
    }

    pub fn load_mode(&self) -> LoadMode {
        self.mode.into()
    }

    fn mode_name(&self) -> String {
        self.mode
            .to_possible_value()
            .map(|v| v.get_name().to_string())
            .unwrap_or_default()
    }
}

// =============================================================================
// Tests
// =============================================================================
