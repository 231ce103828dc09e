/// Document — the foreground owner of a file and its background scans.
///
/// A `Document` holds the current [`Layout`], a foreground [`DocReader`],
/// and up to two scan subsystems:
///
/// - **aerial**, reference counted by the number of open aerial views;
/// - **statistics**, created and destroyed by the [`policy`](crate::policy)
///   gate whenever the options or the file classification change.
///
/// Every edit produces a new layout and restarts whichever scans exist,
/// since their results describe the old content.
use crate::aerial::{AerialGeometry, AerialScan, LiveBitmap};
use crate::colour::ColourTable;
use crate::config::ScanOptions;
use crate::error::{Result, ScanError};
use crate::layout::{Backing, Extent, Layout};
use crate::platform::{self, FileClass};
use crate::policy;
use crate::scan::ScanProgress;
use crate::source::{DataSource, DocReader, FileSet, ReadPriority, MAX_DATA_FILES};
use crate::stats::{ByteHistogram, StatsScan};
use crossbeam_channel::{Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Messages a document's workers post to the foreground. Delivery is best
/// effort; the subsystems' `finished` flags are authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocNotice {
    /// An aerial pass covered the whole document.
    AerialFinished,
}

pub struct Document {
    files: FileSet,
    layout: Arc<Layout>,
    reader: DocReader,
    options: ScanOptions,
    class: FileClass,

    aerial_views: usize,
    aerial: Option<AerialScan>,
    stats: Option<StatsScan>,

    notice_tx: Sender<DocNotice>,
    notice_rx: Receiver<DocNotice>,
}

impl Document {
    /// Open `path` read-only and start statistics if the policy allows it.
    pub fn open(path: &Path, options: ScanOptions) -> Result<Self> {
        options.validate()?;
        let length = std::fs::metadata(path)
            .map_err(|source| ScanError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let reader = DocReader::open(Some(path), &[])?;
        let class = platform::classify(path);
        info!(
            "Opened {} ({length} bytes, {} drive{})",
            path.display(),
            class.drive.label(),
            if class.is_device { ", device" } else { "" }
        );

        let files = FileSet {
            path: Some(path.to_path_buf()),
            data_files: Vec::new(),
        };
        Ok(Self::assemble(files, Layout::of_file(length), reader, options, class))
    }

    /// A document with no backing file, holding `bytes`.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, options: ScanOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::assemble(
            FileSet::default(),
            Layout::of_bytes(bytes),
            DocReader::detached(),
            options,
            FileClass::IN_MEMORY,
        ))
    }

    fn assemble(
        files: FileSet,
        layout: Layout,
        reader: DocReader,
        options: ScanOptions,
        class: FileClass,
    ) -> Self {
        let (notice_tx, notice_rx) = crossbeam_channel::bounded(options.notice_capacity);
        let mut doc = Self {
            files,
            layout: Arc::new(layout),
            reader,
            options,
            class,
            aerial_views: 0,
            aerial: None,
            stats: None,
            notice_tx,
            notice_rx,
        };
        doc.sync_stats();
        doc
    }

    // ── Foreground access ──────────────────────────────────────────────────

    pub fn path(&self) -> Option<&Path> {
        self.files.path.as_deref()
    }

    pub fn len(&self) -> u64 {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// Snapshot of the current layout.
    pub fn layout(&self) -> Arc<Layout> {
        Arc::clone(&self.layout)
    }

    /// Read through the foreground handle. Returns bytes copied.
    pub fn read(&mut self, buf: &mut [u8], address: u64) -> usize {
        self.reader
            .read(&self.layout, buf, address, ReadPriority::Foreground)
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn file_class(&self) -> FileClass {
        self.class
    }

    pub fn data_files(&self) -> &[PathBuf] {
        &self.files.data_files
    }

    /// Receiving end of the completion-notice channel.
    pub fn notices(&self) -> Receiver<DocNotice> {
        self.notice_rx.clone()
    }

    // ── Edits ──────────────────────────────────────────────────────────────

    /// Overwrite bytes at `address`, extending the document if needed.
    pub fn replace(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        let layout = self.layout.replace(address, bytes)?;
        self.commit(layout)
    }

    pub fn insert(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        let layout = self.layout.insert_bytes(address, bytes)?;
        self.commit(layout)
    }

    pub fn delete(&mut self, address: u64, len: u64) -> Result<()> {
        let layout = self.layout.delete(address, len)?;
        self.commit(layout)
    }

    /// Make `path` available as a data file; returns its index.
    ///
    /// Workers read through handles opened when they were created, so both
    /// subsystems are rebuilt to pick up the new file.
    pub fn attach_data_file(&mut self, path: &Path) -> Result<usize> {
        if self.files.data_files.len() >= MAX_DATA_FILES {
            return Err(ScanError::TooManyDataFiles {
                max: MAX_DATA_FILES,
            });
        }
        self.reader.attach(path)?;
        self.files.data_files.push(path.to_path_buf());
        let index = self.files.data_files.len() - 1;
        debug!("Attached data file {index}: {}", path.display());

        if let Some(mut aerial) = self.aerial.take() {
            let colours = aerial.colours().clone();
            aerial.terminate();
            self.aerial = Some(self.create_aerial(colours)?);
        }
        if let Some(mut stats) = self.stats.take() {
            stats.terminate();
            self.sync_stats();
        }
        Ok(index)
    }

    /// Insert `len` bytes of data file `index`, starting at `offset` in
    /// that file, at document address `address`.
    pub fn insert_data_file(
        &mut self,
        address: u64,
        index: usize,
        offset: u64,
        len: u64,
    ) -> Result<()> {
        if index >= self.files.data_files.len() {
            return Err(ScanError::UnknownDataFile(index));
        }
        let extent = Extent {
            backing: Backing::DataFile { index, offset },
            len,
        };
        let layout = self.layout.insert(address, extent)?;
        self.commit(layout)
    }

    fn commit(&mut self, layout: Layout) -> Result<()> {
        debug!("Document now {} bytes in {} extents", layout.len(), layout.extents().len());
        self.layout = Arc::new(layout);
        // Both scans are restarted before either handshake error is reported.
        let aerial = match self.aerial.as_mut() {
            Some(aerial) => aerial.change(Arc::clone(&self.layout)),
            None => Ok(()),
        };
        let stats = match self.stats.as_ref() {
            Some(stats) => stats.start(Arc::clone(&self.layout)),
            None => Ok(()),
        };
        aerial.and(stats)
    }

    // ── Aerial view ────────────────────────────────────────────────────────

    /// Register an aerial view. The first view creates the subsystem and
    /// starts scanning with `colours`; later views share it.
    pub fn add_aerial_view(&mut self, colours: ColourTable) -> Result<()> {
        if self.aerial.is_none() {
            self.aerial = Some(self.create_aerial(colours)?);
        }
        self.aerial_views += 1;
        Ok(())
    }

    /// Unregister an aerial view; the last one tears the subsystem down.
    pub fn remove_aerial_view(&mut self) {
        debug_assert!(self.aerial_views > 0, "no aerial view to remove");
        self.aerial_views = self.aerial_views.saturating_sub(1);
        if self.aerial_views == 0 {
            if let Some(mut aerial) = self.aerial.take() {
                aerial.terminate();
            }
        }
    }

    pub fn aerial_views(&self) -> usize {
        self.aerial_views
    }

    /// A colour table is fixed for the life of a worker, so a new scheme
    /// replaces the whole subsystem and rescans.
    pub fn set_aerial_colours(&mut self, colours: ColourTable) -> Result<()> {
        if let Some(mut aerial) = self.aerial.take() {
            aerial.terminate();
            self.aerial = Some(self.create_aerial(colours)?);
        }
        Ok(())
    }

    /// Rescan the aerial view from the start.
    pub fn start_aerial(&mut self) -> Result<()> {
        match self.aerial.as_mut() {
            Some(aerial) => aerial.start(Arc::clone(&self.layout)),
            None => Ok(()),
        }
    }

    pub fn stop_aerial(&self) -> Result<()> {
        match self.aerial.as_ref() {
            Some(aerial) => aerial.stop(),
            None => Ok(()),
        }
    }

    pub fn aerial_scanning(&self) -> bool {
        self.aerial.as_ref().is_some_and(AerialScan::is_scanning)
    }

    pub fn aerial_finished(&self) -> bool {
        self.aerial.as_ref().is_some_and(AerialScan::is_finished)
    }

    pub fn aerial_bitmap(&self) -> Option<LiveBitmap> {
        self.aerial.as_ref().map(AerialScan::bitmap)
    }

    pub fn aerial_geometry(&self) -> Option<AerialGeometry> {
        self.aerial.as_ref().map(AerialScan::geometry)
    }

    pub fn aerial_progress(&self) -> Option<ScanProgress> {
        self.aerial.as_ref().map(AerialScan::progress)
    }

    fn create_aerial(&self, colours: ColourTable) -> Result<AerialScan> {
        AerialScan::create(
            &self.files,
            Arc::clone(&self.layout),
            colours,
            &self.options,
            Some(self.notice_tx.clone()),
        )
    }

    // ── Statistics ─────────────────────────────────────────────────────────

    /// Create or destroy the statistics worker to match the policy gate.
    ///
    /// A worker that cannot open its private handle is simply not created.
    pub fn sync_stats(&mut self) {
        let allowed = policy::can_do_stats(&self.options, self.class);
        match (allowed, self.stats.is_some()) {
            (true, false) => {
                match StatsScan::create(&self.files, Arc::clone(&self.layout), &self.options) {
                    Ok(stats) => self.stats = Some(stats),
                    Err(e) => warn!("Background statistics unavailable: {e}"),
                }
            }
            (false, true) => {
                if let Some(mut stats) = self.stats.take() {
                    stats.terminate();
                }
            }
            _ => {}
        }
    }

    /// Replace the options and re-run the statistics gate.
    ///
    /// Aerial geometry options take effect the next time the aerial
    /// subsystem is created.
    pub fn set_options(&mut self, options: ScanOptions) -> Result<()> {
        options.validate()?;
        self.options = options;
        self.sync_stats();
        Ok(())
    }

    /// Record a new classification for the document's file (for example
    /// after "save as" to another drive) and re-run the statistics gate.
    pub fn set_file_class(&mut self, class: FileClass) {
        self.class = class;
        self.sync_stats();
    }

    pub fn has_stats(&self) -> bool {
        self.stats.is_some()
    }

    /// Restart statistics from the beginning, creating the worker first if
    /// the gate allows one and none exists.
    pub fn start_stats(&mut self) -> Result<()> {
        match self.stats.as_ref() {
            Some(stats) => stats.start(Arc::clone(&self.layout)),
            None => {
                self.sync_stats();
                Ok(())
            }
        }
    }

    pub fn stop_stats(&self) -> Result<()> {
        match self.stats.as_ref() {
            Some(stats) => stats.stop(),
            None => Ok(()),
        }
    }

    pub fn stats_active(&self) -> bool {
        self.stats.as_ref().is_some_and(StatsScan::is_active)
    }

    pub fn stats_finished(&self) -> bool {
        self.stats.as_ref().is_some_and(StatsScan::is_finished)
    }

    /// The finished histogram, or `None` while counting (or without a worker).
    pub fn stats_counts(&self) -> Option<ByteHistogram> {
        self.stats.as_ref().and_then(StatsScan::counts)
    }

    pub fn stats_progress(&self) -> Option<ScanProgress> {
        self.stats.as_ref().map(StatsScan::progress)
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        if let Some(mut aerial) = self.aerial.take() {
            aerial.terminate();
        }
        if let Some(mut stats) = self.stats.take() {
            stats.terminate();
        }
    }
}
