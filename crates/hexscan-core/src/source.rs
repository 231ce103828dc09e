/// Data source — reading document bytes through a set of file handles.
///
/// Every party that reads a document owns its own [`DocReader`]: the
/// foreground has one, and each background worker opens a **private** one
/// when it is created. Separate handles mean a worker's seek/read never
/// needs to coordinate with the foreground; only the scan metadata is
/// shared under a lock.
use crate::error::{Result, ScanError};
use crate::layout::{Backing, Layout};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Maximum number of auxiliary data files one document may reference.
pub const MAX_DATA_FILES: usize = 10;

/// Who is asking for data. Advisory only; readers may ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPriority {
    Foreground,
    Aerial,
    Stats,
}

/// Anything that can produce document bytes for a scan.
pub trait DataSource: Send {
    /// Read up to `buf.len()` bytes of `layout` starting at `address`.
    ///
    /// Returns the number of bytes placed in `buf`; 0 means there is nothing
    /// more to read at `address` (end of document, or a backing that cannot
    /// be reached).
    fn read(
        &mut self,
        layout: &Layout,
        buf: &mut [u8],
        address: u64,
        priority: ReadPriority,
    ) -> usize;
}

/// The files a document reads from: its own file (if any) and the
/// attached data files, indexed as in [`Backing::DataFile`].
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    pub path: Option<PathBuf>,
    pub data_files: Vec<PathBuf>,
}

impl FileSet {
    pub fn open_reader(&self) -> Result<DocReader> {
        DocReader::open(self.path.as_deref(), &self.data_files)
    }

    pub fn open_reader_degraded(&self) -> DocReader {
        DocReader::open_degraded(self.path.as_deref(), &self.data_files)
    }
}

/// A set of read-only handles: the document file plus any data files.
pub struct DocReader {
    main: Option<File>,
    data_files: Vec<Option<File>>,
}

impl DocReader {
    /// A reader for documents that live entirely in memory.
    pub fn detached() -> Self {
        Self {
            main: None,
            data_files: Vec::new(),
        }
    }

    /// Open all handles, failing if the main file cannot be opened.
    ///
    /// Data files that fail to open are logged and left unreadable.
    pub fn open(path: Option<&Path>, data_files: &[PathBuf]) -> Result<Self> {
        let main = match path {
            Some(p) => Some(open_shared(p).map_err(|source| ScanError::Open {
                path: p.to_path_buf(),
                source,
            })?),
            None => None,
        };
        Ok(Self {
            main,
            data_files: open_data_files(data_files),
        })
    }

    /// Open all handles, tolerating failure of the main file.
    ///
    /// Reads that land in the main file stop short when it is missing.
    pub fn open_degraded(path: Option<&Path>, data_files: &[PathBuf]) -> Self {
        let main = path.and_then(|p| match open_shared(p) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Private handle for {} failed to open: {e}", p.display());
                None
            }
        });
        Self {
            main,
            data_files: open_data_files(data_files),
        }
    }

    pub fn has_main(&self) -> bool {
        self.main.is_some()
    }

    /// Open an additional data file at the next index.
    pub fn attach(&mut self, path: &Path) -> Result<()> {
        if self.data_files.len() >= MAX_DATA_FILES {
            return Err(ScanError::TooManyDataFiles {
                max: MAX_DATA_FILES,
            });
        }
        let file = File::open(path).map_err(|source| ScanError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        self.data_files.push(Some(file));
        Ok(())
    }

    /// Read as much of one extent as fits; returns bytes copied.
    fn read_extent(&mut self, backing: &Backing, skip: u64, buf: &mut [u8]) -> usize {
        match backing {
            Backing::Memory { bytes, start } => {
                let from = start + skip as usize;
                buf.copy_from_slice(&bytes[from..from + buf.len()]);
                buf.len()
            }
            Backing::File { offset } => match self.main.as_mut() {
                Some(file) => read_at(file, offset + skip, buf),
                None => 0,
            },
            Backing::DataFile { index, offset } => {
                match self.data_files.get_mut(*index).and_then(Option::as_mut) {
                    Some(file) => read_at(file, offset + skip, buf),
                    None => 0,
                }
            }
        }
    }
}

impl DataSource for DocReader {
    fn read(
        &mut self,
        layout: &Layout,
        buf: &mut [u8],
        address: u64,
        _priority: ReadPriority,
    ) -> usize {
        let Some((mut index, mut skip)) = layout.locate(address) else {
            return 0;
        };
        let mut filled = 0usize;
        while filled < buf.len() && index < layout.extents().len() {
            let extent = &layout.extents()[index];
            let want = ((extent.len - skip) as usize).min(buf.len() - filled);
            let got = self.read_extent(&extent.backing, skip, &mut buf[filled..filled + want]);
            filled += got;
            if got < want {
                // Short read: the backing is gone or shrank underneath us.
                break;
            }
            index += 1;
            skip = 0;
        }
        filled
    }
}

/// Open a file read-only while letting other handles keep writing to it.
fn open_shared(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        use windows::Win32::Storage::FileSystem::{
            FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE,
        };
        options.share_mode((FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE).0);
    }
    options.open(path)
}

fn open_data_files(paths: &[PathBuf]) -> Vec<Option<File>> {
    paths
        .iter()
        .take(MAX_DATA_FILES)
        .map(|p| match File::open(p) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Data file {} failed to open: {e}", p.display());
                None
            }
        })
        .collect()
}

/// Fill `buf` from `file` at `offset`, stopping early at end of file or error.
fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> usize {
    if file.seek(SeekFrom::Start(offset)).is_err() {
        return 0;
    }
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    filled
}
