/// Worker thread and its controller handle.
///
/// A [`Worker`] owns one background thread running [`run_worker`], an
/// endless wait → scan loop:
///
/// ```text
///            ┌────────── Stop / EOF / stalled read ──────────┐
///            ▼                                               │
/// Starting ─► Waiting ──(command pending)──► Scanning ──────┘
///                 │                            │  ▲
///                 │                            └──┘ Restart: back to address 0
///                 └──────────── Die ─────────► Dying (thread exits)
/// ```
///
/// The worker checks for commands when it wakes and after every chunk, so
/// cancellation latency is one chunk read. Commands are consumed exactly
/// once; a new command overwrites one that is still pending.
///
/// The controller side (`restart`, `stop`, `terminate`) is synchronous:
/// each call blocks on the coordination block's `ack` condition variable
/// until the worker has acted on the command.
use crate::config::ScanOptions;
use crate::error::{Result, ScanError};
use crate::platform::priority;
use crate::scan::engine::ScanEngine;
use crate::scan::shared::{Directive, ScanParams, ScanProgress, ScanShared, ScanState};
use crate::scan::ScanCommand;
use crate::source::DataSource;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Scheduling knobs for a worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerHints {
    /// Bound on how long `stop`/`restart` wait for an acknowledgment.
    pub ack_timeout: Duration,
    /// Run at the lowest priority, boosted during handshakes.
    pub lower_priority: bool,
}

impl WorkerHints {
    pub fn from_options(options: &ScanOptions) -> Self {
        Self {
            ack_timeout: options.ack_timeout(),
            lower_priority: options.lower_worker_priority,
        }
    }
}

impl Default for WorkerHints {
    fn default() -> Self {
        Self::from_options(&ScanOptions::default())
    }
}

pub type SharedBlock<E> = ScanShared<<E as ScanEngine>::Extra, <E as ScanEngine>::Output>;

/// Controller handle for one background scan worker.
pub struct Worker<E: ScanEngine> {
    shared: Arc<SharedBlock<E>>,
    thread: Option<JoinHandle<()>>,
    hints: WorkerHints,
}

impl<E: ScanEngine> Worker<E> {
    /// Spawn a worker armed with `Restart`, so it begins a pass as soon as
    /// it runs.
    ///
    /// `source` becomes the worker's private data source; it is dropped on
    /// the worker thread when the worker exits.
    pub fn spawn<S>(
        shared: Arc<SharedBlock<E>>,
        engine: E,
        source: S,
        hints: WorkerHints,
    ) -> Result<Self>
    where
        S: DataSource + 'static,
    {
        shared.arm();
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("hexscan-{}", E::NAME))
            .spawn(move || {
                if hints.lower_priority {
                    priority::lower_current_thread();
                }
                run_worker(thread_shared, engine, source);
            })
            .map_err(ScanError::Spawn)?;
        info!("Created {} worker", E::NAME);

        Ok(Self {
            shared,
            thread: Some(thread),
            hints,
        })
    }

    pub fn shared(&self) -> &Arc<SharedBlock<E>> {
        &self.shared
    }

    /// True until [`Worker::terminate`] has run.
    pub fn is_alive(&self) -> bool {
        self.thread.is_some()
    }

    /// Snapshot: true unless the worker is waiting.
    pub fn is_active(&self) -> bool {
        self.shared.state() != ScanState::Waiting
    }

    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    pub fn state(&self) -> ScanState {
        self.shared.state()
    }

    pub fn progress(&self) -> ScanProgress {
        self.shared.progress()
    }

    /// Begin a new pass from address 0 with `params`, discarding any pass in
    /// progress. Returns once the worker has picked up the restart.
    pub fn restart(&self, params: ScanParams<E::Extra>) -> Result<()> {
        let Some(thread) = self.thread.as_ref() else {
            return Ok(());
        };
        self.shared.issue(ScanCommand::Restart, Some(params));
        let acknowledged = self.handshake(thread, |shared, t| shared.await_ack(t));
        self.check(acknowledged, "restart")
    }

    /// Abandon the current pass. Returns once the worker is waiting.
    pub fn stop(&self) -> Result<()> {
        let Some(thread) = self.thread.as_ref() else {
            return Ok(());
        };
        if self.shared.is_idle() {
            return Ok(());
        }
        self.shared.issue(ScanCommand::Stop, None);
        let idle = self.handshake(thread, |shared, t| shared.await_idle(t));
        self.check(idle, "stop")
    }

    /// Tell the worker to exit and join it. Blocks without a bound.
    ///
    /// The worker's private data source and scratch buffers are dropped on
    /// its own thread before the join returns. Calling this again is a no-op.
    pub fn terminate(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let started = Instant::now();
        self.shared.issue(ScanCommand::Die, None);
        if self.hints.lower_priority {
            priority::raise(&thread);
        }
        if thread.join().is_err() {
            warn!("{} worker panicked before exiting", E::NAME);
        }
        info!(
            "Terminated {} worker in {:?}",
            E::NAME,
            started.elapsed()
        );
    }

    fn handshake(
        &self,
        thread: &JoinHandle<()>,
        wait: impl FnOnce(&SharedBlock<E>, Duration) -> bool,
    ) -> bool {
        let _boost = self.hints.lower_priority.then(|| priority::boost(thread));
        wait(&self.shared, self.hints.ack_timeout)
    }

    fn check(&self, acknowledged: bool, what: &str) -> Result<()> {
        if acknowledged {
            return Ok(());
        }
        warn!(
            "{} worker did not acknowledge {what} within {:?}",
            E::NAME,
            self.hints.ack_timeout
        );
        Err(ScanError::Unresponsive {
            worker: E::NAME.to_string(),
            waited: self.hints.ack_timeout,
        })
    }
}

impl<E: ScanEngine> Drop for Worker<E> {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Body of the worker thread.
fn run_worker<E, S>(shared: Arc<SharedBlock<E>>, mut engine: E, mut source: S)
where
    E: ScanEngine,
    S: DataSource,
{
    let mut scratch: Vec<u8> = Vec::new();

    loop {
        let mut directive = shared.wait_for_command();
        let mut pass: Option<ScanParams<E::Extra>> = None;
        let mut address = 0u64;

        loop {
            match directive {
                Directive::Continue => {}
                Directive::Restart(params) => {
                    debug!("{} worker: restart, {} bytes", E::NAME, params.length());
                    engine.begin(&params);
                    scratch.clear();
                    scratch.resize(engine.chunk_len(&params), 0);
                    address = 0;
                    pass = Some(params);
                }
                Directive::Stop => {
                    debug!("{} worker: stop at {address}", E::NAME);
                    engine.abandon();
                    break;
                }
                Directive::Die => {
                    debug!("{} worker: die", E::NAME);
                    engine.abandon();
                    return;
                }
            }

            let Some(params) = pass.as_ref() else {
                debug_assert!(false, "{} worker scanning without parameters", E::NAME);
                shared.abandon_pass();
                break;
            };

            if address >= params.length() {
                if shared.try_finish(address, |output| engine.publish(output)) {
                    info!("{} worker: finished {} bytes", E::NAME, address);
                    engine.finished();
                    break;
                }
                directive = shared.check_point(address);
                continue;
            }

            let got = source.read(&params.layout, &mut scratch, address, E::PRIORITY);
            if got == 0 {
                warn!(
                    "{} worker: no data at {address} of {}, abandoning pass",
                    E::NAME,
                    params.length()
                );
                engine.abandon();
                shared.abandon_pass();
                break;
            }
            engine.consume(address, &scratch[..got], params);
            address += got as u64;

            directive = shared.check_point(address);
        }
    }
}
