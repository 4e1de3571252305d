//! Fixed-rate command repetition.
//!
//! The robot disarms itself when no command arrives within its deadman
//! interval, so while periodic sending is on the last requested command is
//! re-sent every [`COMMAND_PERIOD`]. The period is a protocol constant.
//!
//! A dedicated thread fires on a `crossbeam_channel::tick`. Each fire takes
//! the scheduler lock, checks it still belongs to the current run, and sends
//! the stored frame while holding the lock. [`CommandScheduler::stop`] takes
//! the same lock, so once it returns no fire of the old run can reach the
//! sink.
//!
//! Lock order: scheduler, then whatever the sink locks. Never call into the
//! scheduler while holding a lock the sink takes.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender};
use legctrl_metrics::metric_defs;
use legctrl_protocol::{Command, CommandFrame, COMMAND_PERIOD};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{ClientError, ClientResult};
use crate::session::SendOutcome;

/// Where fired frames go.
pub trait FrameSink: Send + Sync {
    /// Send one frame.
    fn send_frame(&self, frame: &CommandFrame) -> SendOutcome;
}

#[derive(Default)]
struct SchedulerState {
    /// Incremented by every start and stop; a fire from an older run exits.
    generation: u64,
    command: Option<Command>,
    frame: Option<CommandFrame>,
    /// Dropping this wakes and ends the current run's thread.
    cancel: Option<Sender<()>>,
}

/// Re-sends the stored command every [`COMMAND_PERIOD`] until stopped.
pub struct CommandScheduler {
    state: Arc<Mutex<SchedulerState>>,
    sink: Arc<dyn FrameSink>,
    period: Duration,
}

impl CommandScheduler {
    /// Create a stopped scheduler sending into `sink`.
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self::with_period(sink, COMMAND_PERIOD)
    }

    pub(crate) fn with_period(sink: Arc<dyn FrameSink>, period: Duration) -> Self {
        CommandScheduler {
            state: Arc::new(Mutex::new(SchedulerState::default())),
            sink,
            period,
        }
    }

    /// Cancel any previous run, store `command` and begin firing.
    pub fn start(&self, command: Command) -> ClientResult<()> {
        let mut state = self.state.lock();

        state.generation += 1;
        state.cancel = None;
        state.command = Some(command);
        state.frame = Some(command.frame());

        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(0);
        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let period = self.period;

        let spawned = thread::Builder::new()
            .name("legctrl-scheduler".to_string())
            .spawn(move || run(shared, sink, generation, period, cancel_rx));

        match spawned {
            Ok(_) => {
                state.cancel = Some(cancel_tx);
                debug!("Scheduler: started with {} every {:?}", command, period);
                Ok(())
            }
            Err(source) => {
                state.command = None;
                state.frame = None;
                Err(ClientError::ThreadSpawn {
                    name: "legctrl-scheduler",
                    source,
                })
            }
        }
    }

    /// Replace the stored command without touching the cadence.
    ///
    /// Does nothing when the scheduler is stopped.
    pub fn update(&self, command: Command) {
        let mut state = self.state.lock();
        if state.cancel.is_none() {
            trace!("Scheduler: update to {} ignored while stopped", command);
            return;
        }
        state.command = Some(command);
        state.frame = Some(command.frame());
    }

    /// Stop firing and clear the stored command.
    ///
    /// Idempotent. Returns whether a run was active.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        let was_running = state.cancel.take().is_some();

        state.generation += 1;
        state.command = None;
        state.frame = None;

        if was_running {
            debug!("Scheduler: stopped");
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().cancel.is_some()
    }

    /// The command currently being repeated.
    pub fn current(&self) -> Option<Command> {
        self.state.lock().command
    }
}

impl Drop for CommandScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    state: Arc<Mutex<SchedulerState>>,
    sink: Arc<dyn FrameSink>,
    generation: u64,
    period: Duration,
    cancel: Receiver<()>,
) {
    let ticker = crossbeam_channel::tick(period);

    loop {
        select! {
            recv(cancel) -> _ => break,
            recv(ticker) -> _ => {
                let state = state.lock();
                if state.generation != generation {
                    break;
                }
                match &state.frame {
                    Some(frame) => {
                        metrics::counter!(metric_defs::SCHEDULER_TICKS.name).increment(1);
                        sink.send_frame(frame);
                    }
                    None => {
                        metrics::counter!(metric_defs::SCHEDULER_SKIPPED.name).increment(1);
                    }
                }
            }
        }
    }

    trace!("Scheduler: run {} exited", generation);
}
