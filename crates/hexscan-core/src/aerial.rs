/// Aerial view — a downsampled colour bitmap of the whole document.
///
/// Every `bpe` (bytes per element) consecutive document bytes become one
/// pixel whose channels are the averages of the byte colours from the
/// [`ColourTable`]. `bpe` is the smallest power of two that keeps the bitmap
/// inside the configured byte budget.
///
/// # Writing the bitmap
///
/// The bitmap is shared as a [`LiveBitmap`] (`Arc<RwLock<AerialBitmap>>`),
/// separate from the worker's coordination block. The worker converts each
/// chunk into a private pixel buffer with no lock held, then copies the
/// whole run into the bitmap under a **single write lock per chunk**. Views
/// take a read lock to draw whatever has been converted so far.
///
/// A chunk whose length is not a multiple of `bpe` leaves its trailing
/// partial group unconverted; nothing is carried over into the next chunk.
use crate::colour::{ColourTable, Rgb};
use crate::config::ScanOptions;
use crate::document::DocNotice;
use crate::error::Result;
use crate::layout::Layout;
use crate::scan::{ScanEngine, ScanParams, ScanProgress, ScanShared, Worker, WorkerHints};
use crate::source::{FileSet, ReadPriority};
use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// Value every bitmap byte is cleared to (light grey).
pub const CLEAR_BYTE: u8 = 0xC0;

/// A shared, concurrently-readable aerial bitmap.
pub type LiveBitmap = Arc<RwLock<AerialBitmap>>;

/// Size of the bitmap and the downsample factor that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AerialGeometry {
    /// Document bytes per pixel; always a power of two.
    pub bpe: u64,
    /// Pixels per row.
    pub width: u32,
    pub rows: u32,
}

impl AerialGeometry {
    /// Pick the smallest power-of-two `bpe` with
    /// `(length * 3) / bpe <= max_bitmap_bytes`, then size the rows to fit,
    /// with one spare row for reshaping.
    pub fn for_length(length: u64, options: &ScanOptions) -> Self {
        let budget = options.max_bitmap_bytes.max(3);
        let bytes = u128::from(length) * 3;
        let mut bpe: u64 = 1;
        while bytes / u128::from(bpe) > u128::from(budget) && bpe < 1 << 63 {
            bpe <<= 1;
        }
        let width = options.bitmap_width.max(1);
        let rows = length / bpe / u64::from(width) + 2;
        debug_assert!((rows - 2) * u64::from(width) * 3 <= budget);
        Self {
            bpe,
            width,
            rows: rows as u32,
        }
    }

    pub fn capacity(&self) -> u64 {
        u64::from(self.width) * u64::from(self.rows)
    }

    /// Pixels needed for a document of `length` bytes.
    pub fn pixels_for(&self, length: u64) -> u64 {
        length / self.bpe
    }
}

/// 24-bit RGB pixels, 3 bytes each, rows packed with no padding.
#[derive(Debug, Clone)]
pub struct AerialBitmap {
    geometry: AerialGeometry,
    bytes: Vec<u8>,
}

impl AerialBitmap {
    pub fn new(geometry: AerialGeometry) -> Self {
        Self {
            geometry,
            bytes: vec![CLEAR_BYTE; geometry.capacity() as usize * 3],
        }
    }

    pub fn geometry(&self) -> AerialGeometry {
        self.geometry
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn pixel(&self, index: u64) -> Option<Rgb> {
        let at = usize::try_from(index).ok()?.checked_mul(3)?;
        let px = self.bytes.get(at..at + 3)?;
        Some(Rgb::new(px[0], px[1], px[2]))
    }

    /// Copy packed RGB triples so the first lands on pixel `first`.
    /// Anything past the end of the bitmap is dropped. Returns pixels stored.
    pub fn store(&mut self, first: u64, rgb: &[u8]) -> usize {
        let Some(start) = usize::try_from(first).ok().and_then(|f| f.checked_mul(3)) else {
            return 0;
        };
        if start >= self.bytes.len() {
            return 0;
        }
        let n = rgb.len().min(self.bytes.len() - start) / 3 * 3;
        self.bytes[start..start + n].copy_from_slice(&rgb[..n]);
        n / 3
    }

    /// Rebuild for new geometry; a no-op when nothing changed.
    pub fn reshape(&mut self, geometry: AerialGeometry) {
        if geometry != self.geometry {
            *self = Self::new(geometry);
        }
    }
}

/// Aerial pass parameters beyond the layout.
#[derive(Debug, Clone, Copy)]
pub struct AerialExtra {
    /// Geometry the pass converts for. Pixels are only stored while the
    /// bitmap still has this geometry.
    pub geometry: AerialGeometry,
}

/// Converts chunks into pixels and writes them straight into the bitmap.
pub struct AerialEngine {
    colours: ColourTable,
    bitmap: LiveBitmap,
    pending: Vec<u8>,
    chunk_cap: usize,
    notices: Option<Sender<DocNotice>>,
}

impl AerialEngine {
    pub fn new(
        colours: ColourTable,
        bitmap: LiveBitmap,
        chunk_cap: usize,
        notices: Option<Sender<DocNotice>>,
    ) -> Self {
        Self {
            colours,
            bitmap,
            pending: Vec::new(),
            chunk_cap: chunk_cap.max(1),
            notices,
        }
    }
}

impl ScanEngine for AerialEngine {
    type Extra = AerialExtra;
    type Output = ();

    const NAME: &'static str = "aerial";
    const PRIORITY: ReadPriority = ReadPriority::Aerial;

    fn chunk_len(&self, params: &ScanParams<AerialExtra>) -> usize {
        let cap = (self.chunk_cap as u64).max(params.extra.geometry.bpe);
        params.length().min(cap) as usize
    }

    fn begin(&mut self, _params: &ScanParams<AerialExtra>) {
        self.pending.clear();
    }

    fn consume(&mut self, address: u64, chunk: &[u8], params: &ScanParams<AerialExtra>) {
        let bpe = params.extra.geometry.bpe;
        self.pending.clear();
        for group in chunk.chunks_exact(bpe as usize) {
            let (mut r, mut g, mut b) = (0u64, 0u64, 0u64);
            for &byte in group {
                let c = self.colours.colour_of(byte);
                r += u64::from(c.r);
                g += u64::from(c.g);
                b += u64::from(c.b);
            }
            self.pending
                .extend_from_slice(&[(r / bpe) as u8, (g / bpe) as u8, (b / bpe) as u8]);
        }
        if self.pending.is_empty() {
            return;
        }
        let mut bitmap = self.bitmap.write();
        // Reshaped since this pass began; the pending restart redraws it.
        if bitmap.geometry() != params.extra.geometry {
            return;
        }
        bitmap.store(address / bpe, &self.pending);
    }

    fn publish(&mut self, _output: &mut ()) {}

    fn abandon(&mut self) {
        self.pending = Vec::new();
    }

    fn finished(&mut self) {
        // Best effort: a full or closed channel just loses the notice.
        if let Some(tx) = &self.notices {
            let _ = tx.try_send(DocNotice::AerialFinished);
        }
    }
}

/// The aerial subsystem of one document: bitmap, colours and worker.
pub struct AerialScan {
    geometry: AerialGeometry,
    bitmap: LiveBitmap,
    colours: ColourTable,
    options: ScanOptions,
    worker: Worker<AerialEngine>,
}

impl AerialScan {
    /// Build the bitmap and start a worker scanning `layout`.
    ///
    /// The worker's private handle is opened in degraded mode: if the file
    /// cannot be opened the worker still exists, and file-backed reads stop
    /// short.
    pub fn create(
        files: &FileSet,
        layout: Arc<Layout>,
        colours: ColourTable,
        options: &ScanOptions,
        notices: Option<Sender<DocNotice>>,
    ) -> Result<Self> {
        let geometry = AerialGeometry::for_length(layout.len(), options);
        let bitmap: LiveBitmap = Arc::new(RwLock::new(AerialBitmap::new(geometry)));
        let engine = AerialEngine::new(
            colours.clone(),
            Arc::clone(&bitmap),
            options.aerial_chunk,
            notices,
        );
        let shared = Arc::new(ScanShared::new(
            ScanParams::new(layout, AerialExtra { geometry }),
            (),
        ));
        let worker = Worker::spawn(
            shared,
            engine,
            files.open_reader_degraded(),
            WorkerHints::from_options(options),
        )?;
        info!(
            "Aerial view: {} bytes per pixel, {}x{} bitmap",
            geometry.bpe, geometry.width, geometry.rows
        );
        Ok(Self {
            geometry,
            bitmap,
            colours,
            options: options.clone(),
            worker,
        })
    }

    /// Rescan after the document changed, reshaping the bitmap first if the
    /// new length needs a different geometry.
    ///
    /// A restart is always left pending, even when the stop handshake times
    /// out; the first handshake error is returned afterwards.
    pub fn change(&mut self, layout: Arc<Layout>) -> Result<()> {
        let geometry = AerialGeometry::for_length(layout.len(), &self.options);
        let mut stopped = Ok(());
        if geometry != self.geometry {
            debug!(
                "Aerial view reshaping: bpe {} -> {}, rows {} -> {}",
                self.geometry.bpe, geometry.bpe, self.geometry.rows, geometry.rows
            );
            stopped = self.worker.stop();
            // A worker that missed the stop discards its in-flight chunk,
            // since the pass geometry no longer matches the bitmap.
            self.bitmap.write().reshape(geometry);
            self.geometry = geometry;
        }
        let restarted = self
            .worker
            .restart(ScanParams::new(layout, AerialExtra { geometry }));
        stopped.and(restarted)
    }

    /// Stop whatever pass is running, then scan `layout` from the start.
    pub fn start(&mut self, layout: Arc<Layout>) -> Result<()> {
        let stopped = self.worker.stop();
        let changed = self.change(layout);
        stopped.and(changed)
    }

    pub fn stop(&self) -> Result<()> {
        self.worker.stop()
    }

    /// Snapshot: true while a pass is in progress.
    pub fn is_scanning(&self) -> bool {
        self.worker.is_active()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn progress(&self) -> ScanProgress {
        self.worker.progress()
    }

    pub fn bitmap(&self) -> LiveBitmap {
        Arc::clone(&self.bitmap)
    }

    pub fn geometry(&self) -> AerialGeometry {
        self.geometry
    }

    pub fn colours(&self) -> &ColourTable {
        &self.colours
    }

    pub fn worker(&self) -> &Worker<AerialEngine> {
        &self.worker
    }

    /// Stop the worker and join it. Safe to call more than once.
    pub fn terminate(&mut self) {
        self.worker.terminate();
    }
}
