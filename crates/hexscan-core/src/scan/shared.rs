/// The coordination block shared by a controller and its worker.
///
/// Every field that crosses the foreground/worker boundary lives in
/// [`ScanBlock`] behind one `parking_lot::Mutex`. Two condition variables
/// hang off the same mutex:
///
/// - `wake` — the worker sleeps on it while `Waiting` until a command is
///   pending;
/// - `ack` — the controller sleeps on it until the worker has consumed a
///   command (and, for `stop`, settled back into `Waiting`).
///
/// # Critical sections
///
/// Each method below takes the lock once, does a read-modify-write of a few
/// fields (plus, for [`ScanShared::try_finish`], a 256-entry copy) and
/// releases it. No method performs I/O or scanning work under the lock.
use crate::layout::Layout;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the worker is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Spawned by the controller, not yet run.
    Starting,
    /// Blocked until a command arrives.
    Waiting,
    /// Reading and processing chunks.
    Scanning,
    /// About to exit for good.
    Dying,
}

/// What the controller wants the worker to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCommand {
    None,
    /// (Re)start a pass from address 0 with the current parameters.
    Restart,
    /// Abandon the current pass and go back to waiting.
    Stop,
    /// Exit the worker thread.
    Die,
}

/// Parameters the worker snapshots each time it (re)starts a pass.
#[derive(Debug, Clone)]
pub struct ScanParams<X> {
    pub layout: Arc<Layout>,
    /// Engine-specific parameters (e.g. the aerial downsample factor).
    pub extra: X,
}

impl<X> ScanParams<X> {
    pub fn new(layout: Arc<Layout>, extra: X) -> Self {
        Self { layout, extra }
    }

    #[inline]
    pub fn length(&self) -> u64 {
        self.layout.len()
    }
}

/// How far the current (or last) pass got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub scanned: u64,
    pub length: u64,
}

impl ScanProgress {
    /// Percentage complete, 0 to 100. An empty document counts as done.
    pub fn percent(&self) -> u8 {
        if self.length == 0 {
            return 100;
        }
        ((self.scanned.min(self.length) as u128 * 100) / self.length as u128) as u8
    }
}

/// The lock-protected fields.
#[derive(Debug)]
pub struct ScanBlock<X, O> {
    pub command: ScanCommand,
    pub state: ScanState,
    pub finished: bool,
    /// Address reached at the worker's last command-check point.
    pub scanned: u64,
    pub params: ScanParams<X>,
    pub output: O,
}

/// What the worker must do after a command-check point.
#[derive(Debug)]
pub(crate) enum Directive<X> {
    Continue,
    Restart(ScanParams<X>),
    Stop,
    Die,
}

pub struct ScanShared<X, O> {
    block: Mutex<ScanBlock<X, O>>,
    wake: Condvar,
    ack: Condvar,
}

impl<X: Clone, O> ScanShared<X, O> {
    pub fn new(params: ScanParams<X>, output: O) -> Self {
        Self {
            block: Mutex::new(ScanBlock {
                command: ScanCommand::None,
                state: ScanState::Starting,
                finished: false,
                scanned: 0,
                params,
                output,
            }),
            wake: Condvar::new(),
            ack: Condvar::new(),
        }
    }

    // ── Snapshots (foreground) ─────────────────────────────────────────────

    pub fn state(&self) -> ScanState {
        self.block.lock().state
    }

    pub fn pending_command(&self) -> ScanCommand {
        self.block.lock().command
    }

    pub fn is_finished(&self) -> bool {
        self.block.lock().finished
    }

    pub fn progress(&self) -> ScanProgress {
        let block = self.block.lock();
        ScanProgress {
            scanned: block.scanned,
            length: block.params.length(),
        }
    }

    /// Whether anyone currently holds the lock. Intended for instrumentation.
    pub fn is_locked(&self) -> bool {
        self.block.is_locked()
    }

    /// Run `f` on the published output under the lock.
    pub fn with_output<R>(&self, f: impl FnOnce(&O) -> R) -> R {
        f(&self.block.lock().output)
    }

    /// Run `f` on the published output if the last pass finished. The flag
    /// and the output are read under the same lock acquisition.
    pub fn finished_output<R>(&self, f: impl FnOnce(&O) -> R) -> Option<R> {
        let block = self.block.lock();
        block.finished.then(|| f(&block.output))
    }

    // ── Controller side ────────────────────────────────────────────────────

    /// Put the block in its freshly-spawned state, armed with `Restart`.
    pub(crate) fn arm(&self) {
        let mut block = self.block.lock();
        block.state = ScanState::Starting;
        block.command = ScanCommand::Restart;
        block.finished = false;
        block.scanned = 0;
    }

    /// Set `command` (last writer wins) and wake the worker if it is waiting.
    pub(crate) fn issue(&self, command: ScanCommand, params: Option<ScanParams<X>>) {
        let mut block = self.block.lock();
        if let Some(params) = params {
            block.params = params;
        }
        if command == ScanCommand::Restart {
            block.finished = false;
            block.scanned = 0;
        }
        block.command = command;
        self.wake.notify_one();
    }

    /// True when the worker is blocked waiting with nothing pending.
    pub fn is_idle(&self) -> bool {
        let block = self.block.lock();
        Self::idle(&block)
    }

    fn idle(block: &ScanBlock<X, O>) -> bool {
        block.state == ScanState::Waiting && block.command == ScanCommand::None
    }

    /// Block until the worker is idle (or dying). Returns false on timeout.
    pub(crate) fn await_idle(&self, timeout: Duration) -> bool {
        self.await_until(timeout, |block| {
            Self::idle(block) || block.state == ScanState::Dying
        })
    }

    /// Block until the pending command has been consumed. Returns false on timeout.
    pub(crate) fn await_ack(&self, timeout: Duration) -> bool {
        self.await_until(timeout, |block| {
            block.command == ScanCommand::None || block.state == ScanState::Dying
        })
    }

    fn await_until(&self, timeout: Duration, done: impl Fn(&ScanBlock<X, O>) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut block = self.block.lock();
        while !done(&block) {
            if self.ack.wait_until(&mut block, deadline).timed_out() {
                return done(&block);
            }
        }
        true
    }

    // ── Worker side ────────────────────────────────────────────────────────

    /// Enter `Waiting`, sleep until a command is pending, then consume it.
    pub(crate) fn wait_for_command(&self) -> Directive<X> {
        let mut block = self.block.lock();
        block.state = ScanState::Waiting;
        self.ack.notify_all();
        while block.command == ScanCommand::None {
            self.wake.wait(&mut block);
        }
        self.take(&mut block)
    }

    /// Command-check point during a pass: record progress, consume the command.
    pub(crate) fn check_point(&self, scanned: u64) -> Directive<X> {
        let mut block = self.block.lock();
        block.scanned = scanned;
        self.take(&mut block)
    }

    fn take(&self, block: &mut ScanBlock<X, O>) -> Directive<X> {
        let command = std::mem::replace(&mut block.command, ScanCommand::None);
        let directive = match command {
            ScanCommand::None => {
                debug_assert_eq!(
                    block.state,
                    ScanState::Scanning,
                    "no command pending outside a scan"
                );
                return Directive::Continue;
            }
            ScanCommand::Restart => {
                block.state = ScanState::Scanning;
                block.scanned = 0;
                Directive::Restart(block.params.clone())
            }
            ScanCommand::Stop => {
                block.state = ScanState::Waiting;
                Directive::Stop
            }
            ScanCommand::Die => {
                block.state = ScanState::Dying;
                Directive::Die
            }
        };
        self.ack.notify_all();
        directive
    }

    /// End of document reached. Publishes and returns to `Waiting` unless a
    /// command arrived since the last check point, in which case nothing is
    /// published and the caller must check again.
    pub(crate) fn try_finish(&self, length: u64, publish: impl FnOnce(&mut O)) -> bool {
        let mut block = self.block.lock();
        if block.command != ScanCommand::None {
            return false;
        }
        publish(&mut block.output);
        block.finished = true;
        block.scanned = length;
        block.state = ScanState::Waiting;
        self.ack.notify_all();
        true
    }

    /// Give up on the current pass without publishing.
    pub(crate) fn abandon_pass(&self) {
        let mut block = self.block.lock();
        block.state = ScanState::Waiting;
        self.ack.notify_all();
    }
}
