//! Serializable loader configuration.
//!
//! ```yaml
//! memory:
//!   max_size: 16MiB
//! disk:
//!   path: /var/cache/images
//!   max_size: 64MiB
//! network:
//!   threads: 4
//!   connect_timeout: 10s
//!   read_timeout: 15s
//!   default_max_age: 3days
//!   forced_max_age: NotForced
//! ```
//!
//! Every section and field is optional and falls back to the defaults
//! below. Without a `disk` section the loader runs without a disk cache.

use std::path::PathBuf;
use std::time::Duration;

use bytesize::ByteSize;
use pixload_http::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_AGE, DEFAULT_READ_TIMEOUT, MaxAgeOverride};
use serde::{Deserialize, Serialize};

use crate::pool::DEFAULT_NETWORK_THREADS;

/// Default memory cache size.
pub const DEFAULT_MEMORY_SIZE: ByteSize = ByteSize::mib(16);

/// Default disk cache size.
pub const DEFAULT_DISK_SIZE: ByteSize = ByteSize::mib(10);

/// Top-level configuration, applied with
/// [`ImageLoaderBuilder::config`](crate::ImageLoaderBuilder::config).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Memory cache settings.
    pub memory: MemoryConfig,
    /// Disk cache settings. `None` disables the disk cache.
    pub disk: Option<DiskConfig>,
    /// Network stage settings.
    pub network: NetworkConfig,
}

/// Memory cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Total decoded size held in memory (e.g., "16MiB").
    pub max_size: ByteSize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MEMORY_SIZE,
        }
    }
}

/// Disk cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Cache directory, created if missing.
    pub path: PathBuf,
    /// Total size of cached files (e.g., "64MiB").
    #[serde(default = "default_disk_size")]
    pub max_size: ByteSize,
}

fn default_disk_size() -> ByteSize {
    DEFAULT_DISK_SIZE
}

/// Network stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Number of workers for foreground fetches.
    pub threads: usize,
    /// Connect timeout (e.g., "10s").
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Read timeout (e.g., "15s").
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Max-age for responses without freshness headers (e.g., "3days").
    #[serde(with = "humantime_serde")]
    pub default_max_age: Duration,
    /// Override of response freshness.
    pub forced_max_age: MaxAgeOverride,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_NETWORK_THREADS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            default_max_age: DEFAULT_MAX_AGE,
            forced_max_age: MaxAgeOverride::NotForced,
        }
    }
}
