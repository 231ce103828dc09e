/// Scan options — everything the foreground can tune about background scans.
///
/// Options are plain data: the owning [`Document`](crate::document::Document)
/// re-evaluates the statistics gate whenever they change, and the aerial
/// geometry is recomputed from them whenever the bitmap is (re)built.
use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default aerial bitmap budget in bytes (3 bytes per pixel).
pub const DEFAULT_MAX_BITMAP_BYTES: u64 = 16 * 1024 * 1024;

/// Default number of pixels in one aerial bitmap row.
pub const DEFAULT_BITMAP_WIDTH: u32 = 1024;

/// Default cap on one aerial read.
pub const DEFAULT_AERIAL_CHUNK: usize = 64 * 1024;

/// Default size of one statistics read.
pub const DEFAULT_STATS_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Global switch for background statistics.
    pub bg_stats: bool,
    /// Skip statistics for files on removable drives.
    pub exclude_removable: bool,
    /// Skip statistics for files on network shares.
    pub exclude_network: bool,
    /// Skip statistics for files on optical media.
    pub exclude_optical: bool,
    /// Skip statistics when the document is a raw device.
    pub exclude_device: bool,

    /// Upper bound on the aerial bitmap size in bytes.
    pub max_bitmap_bytes: u64,
    /// Pixels per aerial bitmap row.
    pub bitmap_width: u32,
    /// Largest single read made by the aerial worker.
    pub aerial_chunk: usize,
    /// Size of each read made by the statistics worker.
    pub stats_chunk: usize,

    /// How long `stop`/`restart` wait for a worker to acknowledge.
    pub ack_timeout_ms: u64,
    /// Run workers at the lowest thread priority, raising it only while the
    /// controller waits for an acknowledgment.
    pub lower_worker_priority: bool,
    /// Capacity of the document's completion-notice channel.
    pub notice_capacity: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            bg_stats: true,
            exclude_removable: true,
            exclude_network: true,
            exclude_optical: true,
            exclude_device: true,
            max_bitmap_bytes: DEFAULT_MAX_BITMAP_BYTES,
            bitmap_width: DEFAULT_BITMAP_WIDTH,
            aerial_chunk: DEFAULT_AERIAL_CHUNK,
            stats_chunk: DEFAULT_STATS_CHUNK,
            ack_timeout_ms: 5_000,
            lower_worker_priority: true,
            notice_capacity: 16,
        }
    }
}

impl ScanOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ScanError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let options: Self = serde_json::from_str(&text)?;
        options.validate()?;
        Ok(options)
    }

    /// Write options to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject values the scan engines cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.bitmap_width == 0 {
            return Err(ScanError::Config("bitmap_width must be non-zero".into()));
        }
        if self.max_bitmap_bytes < 3 {
            return Err(ScanError::Config(
                "max_bitmap_bytes must hold at least one pixel".into(),
            ));
        }
        if self.aerial_chunk == 0 || self.stats_chunk == 0 {
            return Err(ScanError::Config("chunk sizes must be non-zero".into()));
        }
        if self.notice_capacity == 0 {
            return Err(ScanError::Config("notice_capacity must be non-zero".into()));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ScanError::Config("ack_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}
