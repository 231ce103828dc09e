/// Error type shared by the whole core crate.
///
/// Only recoverable runtime failures live here. Protocol violations between
/// a controller and its worker are programming errors and are caught with
/// `debug_assert!` instead.
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A file (main document or auxiliary data file) could not be opened.
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The OS refused to create a worker thread.
    #[error("failed to spawn scan worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// A worker did not acknowledge a stop/restart within the configured bound.
    #[error("{worker} worker did not acknowledge within {waited:?}")]
    Unresponsive { worker: String, waited: Duration },

    #[error("at most {max} data files may be attached to one document")]
    TooManyDataFiles { max: usize },

    #[error("no data file is attached at index {0}")]
    UnknownDataFile(usize),

    #[error("address {address} is past the end of the document ({length} bytes)")]
    OutOfRange { address: u64, length: u64 },

    #[error("invalid scan options: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
