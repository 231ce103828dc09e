/// End-to-end worker protocol tests.
///
/// These drive a real [`Worker`] thread running the statistics engine
/// against an instrumented in-memory [`DataSource`]. The source records
/// every read address, notes whether the coordination lock was held when a
/// read began, flags its own drop, and can hold a read open so that the
/// test decides exactly where in a pass a command lands.
///
/// Holding a read "until a command is pending" makes the ordering
/// deterministic without sleeps: the controller call issues its command,
/// the held read returns, and the worker meets the command at the very next
/// check point.
use crossbeam_channel::{Receiver, Sender};
use hexscan_core::layout::Layout;
use hexscan_core::scan::{ScanCommand, ScanParams, ScanShared, ScanState, Worker, WorkerHints};
use hexscan_core::source::{DataSource, ReadPriority};
use hexscan_core::stats::{ByteHistogram, StatsEngine};
use hexscan_core::ScanError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type StatsShared = ScanShared<(), ByteHistogram>;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// What a held read waits for.
#[derive(Clone, Copy)]
enum Hold {
    /// Return once the controller has issued any command.
    UntilCommand,
    /// Sleep, ignoring commands.
    Sleep(Duration),
}

struct RecordingSource {
    data: Arc<[u8]>,
    shared: Arc<StatsShared>,
    reads: Arc<Mutex<Vec<u64>>>,
    locked_during_read: Arc<AtomicBool>,
    dropped: Arc<AtomicBool>,
    /// Reads after the first `n` are held.
    hold_after: Option<(usize, Hold)>,
    end_tx: Sender<()>,
}

/// The test's view of a [`RecordingSource`] that has been moved into a worker.
struct SourceView {
    reads: Arc<Mutex<Vec<u64>>>,
    locked_during_read: Arc<AtomicBool>,
    dropped: Arc<AtomicBool>,
    end_rx: Receiver<()>,
}

impl SourceView {
    fn reads(&self) -> Vec<u64> {
        self.reads.lock().clone()
    }

    fn wait_for_reads(&self, n: usize) {
        let reads = Arc::clone(&self.reads);
        wait_until(&format!("{n} reads"), || reads.lock().len() >= n);
    }
}

fn recording_source(
    data: &[u8],
    shared: &Arc<StatsShared>,
    hold_after: Option<(usize, Hold)>,
) -> (RecordingSource, SourceView) {
    let reads = Arc::new(Mutex::new(Vec::new()));
    let locked_during_read = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let (end_tx, end_rx) = crossbeam_channel::bounded(1);
    let source = RecordingSource {
        data: Arc::from(data),
        shared: Arc::clone(shared),
        reads: Arc::clone(&reads),
        locked_during_read: Arc::clone(&locked_during_read),
        dropped: Arc::clone(&dropped),
        hold_after,
        end_tx,
    };
    let view = SourceView {
        reads,
        locked_during_read,
        dropped,
        end_rx,
    };
    (source, view)
}

impl DataSource for RecordingSource {
    fn read(
        &mut self,
        layout: &Layout,
        buf: &mut [u8],
        address: u64,
        priority: ReadPriority,
    ) -> usize {
        assert_eq!(priority, ReadPriority::Stats);
        if self.shared.is_locked() {
            self.locked_during_read.store(true, Ordering::SeqCst);
        }
        let count = {
            let mut reads = self.reads.lock();
            reads.push(address);
            reads.len()
        };

        match self.hold_after {
            Some((n, Hold::UntilCommand)) if count > n => {
                let shared = Arc::clone(&self.shared);
                wait_until("a command while a read is held", || {
                    shared.pending_command() != ScanCommand::None
                });
            }
            Some((n, Hold::Sleep(pause))) if count > n => std::thread::sleep(pause),
            _ => {}
        }

        let end = layout.len().min(self.data.len() as u64);
        if address >= end {
            return 0;
        }
        let n = ((end - address) as usize).min(buf.len());
        let from = address as usize;
        buf[..n].copy_from_slice(&self.data[from..from + n]);
        if address + n as u64 >= end {
            let _ = self.end_tx.try_send(());
        }
        n
    }
}

impl Drop for RecordingSource {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

fn hints() -> WorkerHints {
    WorkerHints {
        ack_timeout: Duration::from_secs(10),
        lower_priority: false,
    }
}

fn shared_for(data: &[u8]) -> Arc<StatsShared> {
    Arc::new(ScanShared::new(
        ScanParams::new(Arc::new(Layout::of_bytes(data)), ()),
        ByteHistogram::default(),
    ))
}

/// Spawn a statistics worker reading `data` through a recording source, in chunks of
/// `chunk` bytes.
fn spawn(
    data: &[u8],
    chunk: usize,
    hold_after: Option<(usize, Hold)>,
) -> (Worker<StatsEngine>, SourceView) {
    spawn_with(data, chunk, hold_after, hints())
}

fn spawn_with(
    data: &[u8],
    chunk: usize,
    hold_after: Option<(usize, Hold)>,
    hints: WorkerHints,
) -> (Worker<StatsEngine>, SourceView) {
    let shared = shared_for(data);
    let (source, view) = recording_source(data, &shared, hold_after);
    let worker = Worker::spawn(shared, StatsEngine::new(chunk), source, hints).unwrap();
    (worker, view)
}

/// Poll `cond` until it holds, panicking after 30 seconds.
fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn wait_finished(worker: &Worker<StatsEngine>) {
    wait_until("the pass to finish", || worker.is_finished());
}

fn published(worker: &Worker<StatsEngine>) -> ByteHistogram {
    worker.shared().with_output(ByteHistogram::clone)
}

fn sample(len: usize) -> Vec<u8> {
    // Deterministic and uneven, so every byte value gets a distinct count.
    (0..len).map(|i| ((i * i + 7 * i) % 256) as u8).collect()
}

// ── Finishing a pass ─────────────────────────────────────────────────────────

#[test]
fn histogram_matches_content() {
    let data = sample(10_000);
    let (worker, _view) = spawn(&data, 333, None);
    wait_finished(&worker);

    assert_eq!(published(&worker), ByteHistogram::of(&data));
    assert_eq!(worker.state(), ScanState::Waiting);
    assert_eq!(worker.progress().scanned, 10_000);
    assert_eq!(worker.progress().percent(), 100);
}

#[test]
fn empty_document_finishes_with_zero_counts() {
    let (worker, view) = spawn(&[], 16, None);
    wait_finished(&worker);

    assert_eq!(published(&worker), ByteHistogram::default());
    assert!(view.reads().is_empty(), "nothing to read in an empty document");
}

#[test]
fn three_byte_document() {
    let (worker, _view) = spawn(&[0x00, 0xFF, 0x00], 16, None);
    wait_finished(&worker);

    let counts = published(&worker);
    assert_eq!(counts.count(0x00), 2);
    assert_eq!(counts.count(0xFF), 1);
    assert_eq!(counts.total(), 3);
}

/// The coordination lock is never held while a chunk is being read.
#[test]
fn lock_is_free_during_reads() {
    let data = sample(64 * 1024);
    let (worker, view) = spawn(&data, 64, None);

    // Wait on the source's own channel so the test thread never touches the
    // coordination lock while reads are in flight.
    view.end_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("source never reached the end of the data");
    wait_finished(&worker);

    assert_eq!(view.reads().len(), 1024);
    assert!(!view.locked_during_read.load(Ordering::SeqCst));
}

// ── Commands ─────────────────────────────────────────────────────────────────

/// A restart observed mid-pass sends the next read back to address 0.
#[test]
fn restart_discards_progress() {
    let data = sample(64);
    let (worker, view) = spawn(&data, 4, Some((2, Hold::UntilCommand)));
    view.wait_for_reads(3);
    assert_eq!(view.reads(), vec![0, 4, 8]);

    worker
        .restart(ScanParams::new(Arc::new(Layout::of_bytes(&data[..])), ()))
        .unwrap();
    assert!(!worker.is_finished());

    view.wait_for_reads(4);
    assert_eq!(view.reads()[3], 0, "restarted pass must begin at address 0");
    assert!(!worker.is_finished());
}

/// After `stop` returns the worker is waiting, nothing was published and
/// no further reads happen.
#[test]
fn stop_is_synchronous_and_ends_the_pass() {
    let data = sample(64);
    let (worker, view) = spawn(&data, 4, Some((1, Hold::UntilCommand)));
    view.wait_for_reads(2);

    worker.stop().unwrap();
    assert_eq!(worker.state(), ScanState::Waiting);
    assert!(!worker.is_active());
    assert!(!worker.is_finished());
    assert_eq!(published(&worker), ByteHistogram::default());

    let reads_at_stop = view.reads().len();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(view.reads().len(), reads_at_stop);
    assert_eq!(worker.shared().pending_command(), ScanCommand::None);
}

#[test]
fn stop_when_idle_returns_at_once() {
    let (worker, _view) = spawn(b"abc", 16, None);
    wait_finished(&worker);
    worker.stop().unwrap();
    // Stopping an idle worker leaves a finished result alone.
    assert!(worker.is_finished());
}

/// Each restart of an idle worker runs exactly one more pass.
#[test]
fn restart_after_finish_runs_one_pass() {
    let data = sample(100);
    let (worker, view) = spawn(&data, 10, None);
    wait_finished(&worker);
    assert_eq!(view.reads().len(), 10);

    worker
        .restart(ScanParams::new(Arc::new(Layout::of_bytes(&data[..])), ()))
        .unwrap();
    wait_finished(&worker);
    assert_eq!(view.reads().len(), 20);
    assert_eq!(published(&worker), ByteHistogram::of(&data));
}

/// Restarting with a new layout counts the new content.
#[test]
fn restart_with_new_parameters() {
    let (worker, _view) = spawn(b"aaaa", 2, None);
    wait_finished(&worker);

    worker
        .restart(ScanParams::new(Arc::new(Layout::of_bytes(&b"aa"[..])), ()))
        .unwrap();
    wait_finished(&worker);
    assert_eq!(published(&worker).count(b'a'), 2);
}

/// A worker stuck in a read past the acknowledgment bound is reported,
/// not waited on forever.
#[test]
fn unresponsive_worker_is_reported() {
    let quick = WorkerHints {
        ack_timeout: Duration::from_millis(20),
        lower_priority: false,
    };
    let data = sample(32);
    let (worker, view) = spawn_with(
        &data,
        4,
        Some((1, Hold::Sleep(Duration::from_millis(500)))),
        quick,
    );
    view.wait_for_reads(2);

    match worker.stop() {
        Err(ScanError::Unresponsive { worker: name, .. }) => assert_eq!(name, "stats"),
        other => panic!("expected Unresponsive, got {other:?}"),
    }
}

// ── Termination ──────────────────────────────────────────────────────────────

#[test]
fn terminate_releases_the_source_and_is_idempotent() {
    let (mut worker, view) = spawn(b"some bytes", 4, None);
    wait_finished(&worker);
    assert!(!view.dropped.load(Ordering::SeqCst));

    worker.terminate();
    assert!(!worker.is_alive());
    assert!(view.dropped.load(Ordering::SeqCst));
    assert_eq!(worker.state(), ScanState::Dying);

    worker.terminate();
    assert!(worker.stop().is_ok());
    assert!(worker
        .restart(ScanParams::new(Arc::new(Layout::empty()), ()))
        .is_ok());
}

/// Terminating mid-pass discards the accumulator without publishing.
#[test]
fn terminate_mid_pass_publishes_nothing() {
    let data = sample(64);
    let (mut worker, view) = spawn(&data, 4, Some((1, Hold::UntilCommand)));
    view.wait_for_reads(2);

    worker.terminate();
    assert!(view.dropped.load(Ordering::SeqCst));
    assert!(!worker.is_finished());
    assert_eq!(published(&worker), ByteHistogram::default());
}

#[test]
fn dropping_the_handle_joins_the_worker() {
    let (worker, view) = spawn(&sample(1000), 8, None);
    drop(worker);
    assert!(view.dropped.load(Ordering::SeqCst));
}
