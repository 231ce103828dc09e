/// The per-scan algorithm plugged into the generic worker loop.
use crate::scan::shared::ScanParams;
use crate::source::ReadPriority;

/// A streaming scan over a document, one chunk at a time.
///
/// The worker loop owns the engine and calls it **without** holding the
/// coordination lock, except for [`ScanEngine::publish`], which runs inside
/// the critical section that marks the pass finished.
pub trait ScanEngine: Send + 'static {
    /// Engine-specific parameters snapshotted at the start of every pass.
    type Extra: Clone + Send + 'static;
    /// The result the foreground reads once the pass is finished.
    type Output: Send + 'static;

    /// Short name used for the thread name and log lines.
    const NAME: &'static str;
    /// Priority hint passed to the data source.
    const PRIORITY: ReadPriority;

    /// Size of the worker's read buffer for this pass.
    fn chunk_len(&self, params: &ScanParams<Self::Extra>) -> usize;

    /// Reset private state for a pass from address 0.
    fn begin(&mut self, params: &ScanParams<Self::Extra>);

    /// Fold `chunk`, which starts at document address `address`.
    fn consume(&mut self, address: u64, chunk: &[u8], params: &ScanParams<Self::Extra>);

    /// Copy private results into the shared output. Called under the lock.
    fn publish(&mut self, output: &mut Self::Output);

    /// Drop private results of an interrupted pass.
    fn abandon(&mut self);

    /// Called after a pass is published and the lock released.
    fn finished(&mut self) {}
}
