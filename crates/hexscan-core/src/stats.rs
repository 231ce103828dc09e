/// Byte statistics — how often each of the 256 byte values occurs.
///
/// The worker counts into a private accumulator and copies it into the
/// shared [`ByteHistogram`] exactly once, under the coordination lock, when
/// the pass reaches the end of the document. The foreground therefore never
/// sees a half-counted table: it sees either the last finished result or
/// nothing (`finished == false`).
///
/// Counters are 32-bit when the document is shorter than `u32::MAX` bytes,
/// since no count can then overflow, and 64-bit otherwise.
use crate::config::ScanOptions;
use crate::error::Result;
use crate::layout::Layout;
use crate::scan::{ScanEngine, ScanParams, ScanProgress, ScanShared, Worker, WorkerHints};
use crate::source::{FileSet, ReadPriority};
use std::sync::Arc;

/// Documents shorter than this are counted with 32-bit counters.
pub const NARROW_LIMIT: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterWidth {
    Narrow,
    Wide,
}

impl CounterWidth {
    pub fn for_length(length: u64) -> Self {
        if length < NARROW_LIMIT {
            Self::Narrow
        } else {
            Self::Wide
        }
    }
}

/// The worker's private accumulator.
#[derive(Debug, Clone)]
pub enum ByteCounts {
    Narrow(Box<[u32; 256]>),
    Wide(Box<[u64; 256]>),
}

impl ByteCounts {
    pub fn new(width: CounterWidth) -> Self {
        match width {
            CounterWidth::Narrow => Self::Narrow(Box::new([0; 256])),
            CounterWidth::Wide => Self::Wide(Box::new([0; 256])),
        }
    }

    pub fn width(&self) -> CounterWidth {
        match self {
            Self::Narrow(_) => CounterWidth::Narrow,
            Self::Wide(_) => CounterWidth::Wide,
        }
    }

    #[inline]
    pub fn add(&mut self, chunk: &[u8]) {
        match self {
            Self::Narrow(counts) => {
                for &byte in chunk {
                    counts[byte as usize] += 1;
                }
            }
            Self::Wide(counts) => {
                for &byte in chunk {
                    counts[byte as usize] += 1;
                }
            }
        }
    }

    pub fn to_histogram(&self) -> ByteHistogram {
        let mut counts = [0u64; 256];
        match self {
            Self::Narrow(narrow) => {
                for (out, &n) in counts.iter_mut().zip(narrow.iter()) {
                    *out = u64::from(n);
                }
            }
            Self::Wide(wide) => counts = **wide,
        }
        ByteHistogram { counts }
    }
}

/// Published frequency table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteHistogram {
    counts: [u64; 256],
}

impl Default for ByteHistogram {
    fn default() -> Self {
        Self { counts: [0; 256] }
    }
}

impl ByteHistogram {
    /// Count `bytes` directly, without a worker.
    pub fn of(bytes: &[u8]) -> Self {
        let mut counts = ByteCounts::new(CounterWidth::for_length(bytes.len() as u64));
        counts.add(bytes);
        counts.to_histogram()
    }

    #[inline]
    pub fn count(&self, value: u8) -> u64 {
        self.counts[value as usize]
    }

    pub fn counts(&self) -> &[u64; 256] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Number of byte values that occur at least once.
    pub fn distinct(&self) -> usize {
        self.counts.iter().filter(|&&n| n > 0).count()
    }

    /// The most frequent byte value (lowest value wins ties), if any.
    pub fn most_common(&self) -> Option<(u8, u64)> {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n > 0)
            .max_by(|(a_value, a), (b_value, b)| a.cmp(b).then(b_value.cmp(a_value)))
            .map(|(value, &n)| (value as u8, n))
    }
}

pub struct StatsEngine {
    chunk: usize,
    counts: Option<ByteCounts>,
}

impl StatsEngine {
    pub fn new(chunk: usize) -> Self {
        Self {
            chunk: chunk.max(1),
            counts: None,
        }
    }

    /// Width chosen for the pass in progress.
    pub fn width(&self) -> Option<CounterWidth> {
        self.counts.as_ref().map(ByteCounts::width)
    }
}

impl ScanEngine for StatsEngine {
    type Extra = ();
    type Output = ByteHistogram;

    const NAME: &'static str = "stats";
    const PRIORITY: ReadPriority = ReadPriority::Stats;

    fn chunk_len(&self, _params: &ScanParams<()>) -> usize {
        self.chunk
    }

    fn begin(&mut self, params: &ScanParams<()>) {
        self.counts = Some(ByteCounts::new(CounterWidth::for_length(params.length())));
    }

    fn consume(&mut self, _address: u64, chunk: &[u8], _params: &ScanParams<()>) {
        debug_assert!(self.counts.is_some(), "stats chunk outside a pass");
        if let Some(counts) = self.counts.as_mut() {
            counts.add(chunk);
        }
    }

    fn publish(&mut self, output: &mut ByteHistogram) {
        if let Some(counts) = self.counts.take() {
            *output = counts.to_histogram();
        }
    }

    fn abandon(&mut self) {
        self.counts = None;
    }
}

/// The statistics subsystem of one document.
pub struct StatsScan {
    worker: Worker<StatsEngine>,
}

impl StatsScan {
    /// Open a private handle and start a worker counting `layout`.
    ///
    /// Unlike the aerial view, statistics need a working handle: if the file
    /// cannot be opened no worker is created and the error is returned.
    pub fn create(files: &FileSet, layout: Arc<Layout>, options: &ScanOptions) -> Result<Self> {
        let reader = files.open_reader()?;
        let shared = Arc::new(ScanShared::new(
            ScanParams::new(layout, ()),
            ByteHistogram::default(),
        ));
        let worker = Worker::spawn(
            shared,
            StatsEngine::new(options.stats_chunk),
            reader,
            WorkerHints::from_options(options),
        )?;
        Ok(Self { worker })
    }

    /// Start a fresh pass over `layout`: stop whatever is running, clear
    /// the finished flag and signal the worker.
    ///
    /// The restart is issued even when the stop handshake times out, so the
    /// old histogram is never left published for the new layout.
    pub fn start(&self, layout: Arc<Layout>) -> Result<()> {
        let stopped = self.worker.stop();
        let restarted = self.worker.restart(ScanParams::new(layout, ()));
        stopped.and(restarted)
    }

    pub fn stop(&self) -> Result<()> {
        self.worker.stop()
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_active()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// The published histogram, once a pass has finished.
    pub fn counts(&self) -> Option<ByteHistogram> {
        self.worker.shared().finished_output(ByteHistogram::clone)
    }

    pub fn progress(&self) -> ScanProgress {
        self.worker.progress()
    }

    pub fn worker(&self) -> &Worker<StatsEngine> {
        &self.worker
    }

    pub fn terminate(&mut self) {
        self.worker.terminate();
    }
}
