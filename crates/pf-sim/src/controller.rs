//! Threaded run control: start, pause, single-step and stop.
//!
//! A dedicated thread owns the state machine
//!
//! ```text
//! Stopped ──start──▶ Running ◀──start── Paused
//!    │                  │ ──pause──▶      ▲
//!    └──────step────────┼─────────────────┘
//!                       ▼
//!                     Done   (final time, stop, or a failed step)
//! ```
//!
//! and receives commands over a channel, each with its own reply channel.
//! Commands are handled between steps only, so a pause always completes the
//! in-flight step first. `stop` additionally raises the simulation's
//! cancellation flag, which the scheduler checks at layer boundaries.
//!
//! The simulation lives behind a mutex held for the whole of each step, so
//! [`SimulationController::lvector`] never observes a half-updated vector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pf_core::{ComplexVector, Real, VariantId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, SimError, SimResult};
use crate::external::ExternalInterface;
use crate::options::RealTimeOptions;
use crate::simulation::Simulation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControllerState {
    Stopped,
    Running,
    Paused,
    Done,
}

/// Pacing statistics of a real-time run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RealTimeStats {
    /// Steps that finished after the next step was already due.
    pub deadline_misses: u64,
    pub max_overrun: Duration,
    /// Lag behind the wall clock after the latest step.
    pub current_drift: Duration,
}

#[derive(Debug)]
struct Status {
    state: ControllerState,
    steps_done: u64,
    time: Real,
    stats: RealTimeStats,
    last_error: Option<SimError>,
}

struct Shared {
    sim: Mutex<Simulation>,
    status: Mutex<Status>,
    changed: Condvar,
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sim(&self) -> SimResult<MutexGuard<'_, Simulation>> {
        self.sim
            .lock()
            .map_err(|_| SimError::invalid_state("simulation lock poisoned by a panicked step"))
    }

    fn publish(&self, update: impl FnOnce(&mut Status)) {
        let mut status = self.status();
        update(&mut status);
        self.changed.notify_all();
    }
}

type Reply<T> = Sender<SimResult<T>>;

enum Command {
    Start(Reply<()>),
    Pause(Reply<()>),
    Step(Reply<bool>),
    Stop(Reply<()>),
    AddInterface(Arc<dyn ExternalInterface>, Reply<()>),
    SwitchVariant(VariantId, Reply<()>),
}

/// Handle to a simulation running on its own thread.
///
/// Dropping the handle stops the run and joins the thread.
pub struct SimulationController {
    commands: Sender<Command>,
    shared: Arc<Shared>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimulationController {
    /// Move `sim` onto a new controller thread in the `Stopped` state.
    pub fn spawn(sim: Simulation) -> SimResult<Self> {
        let cancel = sim.cancel_handle();
        let realtime = sim.options().realtime;
        let dt = match realtime {
            Some(_) => Duration::try_from_secs_f64(sim.options().dt).map_err(|_| {
                ConfigError::InvalidOption {
                    what: format!("timestep {} s cannot be paced", sim.options().dt),
                }
            })?,
            None => Duration::ZERO,
        };
        let name = sim.options().name.clone();
        let shared = Arc::new(Shared {
            status: Mutex::new(Status {
                state: ControllerState::Stopped,
                steps_done: sim.steps_done(),
                time: sim.time(),
                stats: RealTimeStats::default(),
                last_error: None,
            }),
            sim: Mutex::new(sim),
            changed: Condvar::new(),
        });

        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            shared: Arc::clone(&shared),
            commands: rx,
            state: ControllerState::Stopped,
            realtime,
            dt,
            pacer: None,
        };
        let thread = thread::Builder::new()
            .name(format!("pf-controller-{name}"))
            .spawn(move || worker.run())
            .map_err(|e| SimError::invalid_state(format!("cannot spawn controller thread: {e}")))?;

        Ok(Self {
            commands: tx,
            shared,
            cancel,
            thread: Some(thread),
        })
    }

    /// Stopped or Paused → Running.
    pub fn start(&self) -> SimResult<()> {
        self.request(Command::Start)
    }

    /// Running → Paused once the in-flight step completes.
    pub fn pause(&self) -> SimResult<()> {
        self.request(Command::Pause)
    }

    /// Run exactly one step from Stopped or Paused. Returns whether more
    /// steps remain.
    pub fn step(&self) -> SimResult<bool> {
        self.request(Command::Step)
    }

    /// Any state → Done. Solver resources are released; results stay readable.
    pub fn stop(&self) -> SimResult<()> {
        let (tx, rx) = mpsc::channel();
        self.commands
            .send(Command::Stop(tx))
            .map_err(|_| SimError::ControllerGone)?;
        // Raised after queueing so the cancelled step finds the command waiting.
        self.cancel.store(true, Ordering::Release);
        rx.recv().map_err(|_| SimError::ControllerGone)?
    }

    pub fn add_external_interface(&self, interface: Arc<dyn ExternalInterface>) -> SimResult<()> {
        self.request(|reply| Command::AddInterface(interface, reply))
    }

    /// Activate a precomputed variant at the next step boundary.
    pub fn switch_variant(&self, id: VariantId) -> SimResult<()> {
        self.request(|reply| Command::SwitchVariant(id, reply))
    }

    /// Block while the run is Running; wakes on completion or a pause.
    ///
    /// Returns the error that ended the run, if any. Waiting on a run that
    /// is Stopped or Paused is `InvalidState`, since nothing would wake it.
    pub fn wait(&self) -> SimResult<()> {
        let status = self.shared.status();
        check_waitable(&status)?;
        let status = self
            .shared
            .changed
            .wait_while(status, |s| s.state == ControllerState::Running)
            .unwrap_or_else(PoisonError::into_inner);
        finished(&status)
    }

    /// Like [`SimulationController::wait`] with a limit. `Ok(false)` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> SimResult<bool> {
        let status = self.shared.status();
        check_waitable(&status)?;
        let (status, result) = self
            .shared
            .changed
            .wait_timeout_while(status, timeout, |s| s.state == ControllerState::Running)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() {
            return Ok(false);
        }
        finished(&status).map(|()| true)
    }

    pub fn state(&self) -> ControllerState {
        self.shared.status().state
    }

    pub fn steps_done(&self) -> u64 {
        self.shared.status().steps_done
    }

    /// Simulation time of the next step to run.
    pub fn time(&self) -> Real {
        self.shared.status().time
    }

    pub fn realtime_stats(&self) -> RealTimeStats {
        self.shared.status().stats
    }

    pub fn last_error(&self) -> Option<SimError> {
        self.shared.status().last_error.clone()
    }

    /// Copy of the last completed solution, taken under the step lock.
    pub fn lvector(&self) -> SimResult<ComplexVector> {
        Ok(self.shared.sim()?.lvector().clone())
    }

    /// Run `f` against the simulation between steps.
    pub fn with_simulation<R>(&self, f: impl FnOnce(&Simulation) -> R) -> SimResult<R> {
        let sim = self.shared.sim()?;
        Ok(f(&sim))
    }

    /// Stop if still running, join the thread and hand back the simulation.
    pub fn join(mut self) -> SimResult<Simulation> {
        let Some(thread) = self.thread.take() else {
            return Err(SimError::ControllerGone);
        };
        if self.state() != ControllerState::Done {
            self.stop()?;
        }
        let shared = Arc::clone(&self.shared);
        drop(self);
        thread.join().map_err(|_| SimError::ControllerGone)?;

        let shared = Arc::try_unwrap(shared)
            .map_err(|_| SimError::invalid_state("simulation still shared after join"))?;
        shared
            .sim
            .into_inner()
            .map_err(|_| SimError::invalid_state("simulation lock poisoned by a panicked step"))
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> SimResult<T> {
        let (tx, rx) = mpsc::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| SimError::ControllerGone)?;
        rx.recv().map_err(|_| SimError::ControllerGone)?
    }
}

impl Drop for SimulationController {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.cancel.store(true, Ordering::Release);
            // The worker exits once its command channel disconnects.
            let (detached, _) = mpsc::channel();
            let commands = std::mem::replace(&mut self.commands, detached);
            let (tx, _rx) = mpsc::channel();
            let _ = commands.send(Command::Stop(tx));
            drop(commands);
            let _ = thread.join();
        }
    }
}

fn check_waitable(status: &Status) -> SimResult<()> {
    match status.state {
        ControllerState::Running | ControllerState::Done => Ok(()),
        other => Err(SimError::invalid_state(format!(
            "nothing to wait for while {other:?}"
        ))),
    }
}

/// Outcome once a waiter wakes: the run's error if it ended in one.
fn finished(status: &Status) -> SimResult<()> {
    match (&status.state, &status.last_error) {
        (ControllerState::Done, Some(e)) => Err(e.clone()),
        _ => Ok(()),
    }
}

/// Wall-clock anchor of the current running stretch.
#[derive(Debug, Clone, Copy)]
struct Pacer {
    origin: Instant,
    origin_step: u64,
    dt: Duration,
}

impl Pacer {
    /// Wall-clock instant at which `step` may start; `None` when it lies
    /// beyond any representable instant.
    fn deadline(&self, step: u64) -> Option<Instant> {
        let ahead = u32::try_from(step.saturating_sub(self.origin_step)).ok()?;
        self.dt
            .checked_mul(ahead)
            .and_then(|offset| self.origin.checked_add(offset))
    }
}

struct Worker {
    shared: Arc<Shared>,
    commands: Receiver<Command>,
    state: ControllerState,
    realtime: Option<RealTimeOptions>,
    dt: Duration,
    pacer: Option<Pacer>,
}

impl Worker {
    fn run(mut self) {
        let _guard = DoneOnExit(Arc::clone(&self.shared));
        loop {
            let command = match self.state {
                ControllerState::Running => match self.next_while_running() {
                    Ok(Some(command)) => command,
                    Ok(None) => {
                        // Failures are recorded by `finish`.
                        let _ = self.advance();
                        continue;
                    }
                    Err(()) => break,
                },
                _ => match self.commands.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };
            self.handle(command);
        }
        if self.state != ControllerState::Done {
            self.finish(None);
        }
    }

    /// A pending command, or `None` once the next step is due.
    /// `Err` when every handle is gone.
    fn next_while_running(&self) -> Result<Option<Command>, ()> {
        let now = Instant::now();
        let due = self.pacer.map(|p| p.deadline(self.shared.status().steps_done));
        match due {
            Some(Some(deadline)) if deadline > now => {
                match self.commands.recv_timeout(deadline - now) {
                    Ok(command) => Ok(Some(command)),
                    Err(RecvTimeoutError::Timeout) => Ok(None),
                    Err(RecvTimeoutError::Disconnected) => Err(()),
                }
            }
            // The next step is never due; only a command can move the run.
            Some(None) => self.commands.recv().map(Some).map_err(|_| ()),
            _ => match self.commands.try_recv() {
                Ok(command) => Ok(Some(command)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(()),
            },
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let result = match self.state {
                    ControllerState::Stopped | ControllerState::Paused => {
                        self.anchor();
                        self.transition(ControllerState::Running);
                        Ok(())
                    }
                    ControllerState::Running => Ok(()),
                    ControllerState::Done => Err(SimError::invalid_state("run is already done")),
                };
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                let result = match self.state {
                    ControllerState::Running => {
                        self.transition(ControllerState::Paused);
                        Ok(())
                    }
                    ControllerState::Paused => Ok(()),
                    other => Err(SimError::invalid_state(format!("cannot pause while {other:?}"))),
                };
                let _ = reply.send(result);
            }
            Command::Step(reply) => {
                let result = match self.state {
                    ControllerState::Stopped | ControllerState::Paused => {
                        let result = self.advance();
                        if self.state != ControllerState::Done {
                            self.transition(ControllerState::Paused);
                        }
                        result
                    }
                    ControllerState::Running => {
                        Err(SimError::invalid_state("cannot single-step while running"))
                    }
                    ControllerState::Done => Ok(false),
                };
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                if self.state != ControllerState::Done {
                    self.finish(None);
                }
                let _ = reply.send(Ok(()));
            }
            Command::AddInterface(interface, reply) => {
                let result = match self.state {
                    ControllerState::Done => Err(SimError::invalid_state("run is already done")),
                    _ => self
                        .shared
                        .sim()
                        .and_then(|mut sim| sim.add_external_interface(interface)),
                };
                let _ = reply.send(result);
            }
            Command::SwitchVariant(id, reply) => {
                let result = match self.state {
                    ControllerState::Done => Err(SimError::invalid_state("run is already done")),
                    _ => self.shared.sim().and_then(|mut sim| sim.request_variant(id)),
                };
                let _ = reply.send(result);
            }
        }
    }

    /// Run one step and fold its outcome into the published status.
    fn advance(&mut self) -> SimResult<bool> {
        let outcome = self.shared.sim().and_then(|mut sim| {
            let more = sim.step()?;
            Ok((more, sim.steps_done(), sim.time()))
        });

        match outcome {
            Ok((more, steps_done, time)) => {
                let drift = self.track_pacing(steps_done);
                self.shared.publish(|s| {
                    s.steps_done = steps_done;
                    s.time = time;
                });
                if let Err(e) = drift {
                    self.finish(Some(e.clone()));
                    return Err(e);
                }
                if !more {
                    self.finish(None);
                }
                Ok(more)
            }
            Err(SimError::Cancelled) => {
                self.finish(None);
                Err(SimError::Cancelled)
            }
            Err(e) => {
                self.finish(Some(e.clone()));
                Err(e)
            }
        }
    }

    /// Compare the wall clock against the deadline of the next step.
    fn track_pacing(&mut self, steps_done: u64) -> SimResult<()> {
        let (Some(pacer), Some(rt)) = (self.pacer, self.realtime) else {
            return Ok(());
        };
        let Some(deadline) = pacer.deadline(steps_done) else {
            return Ok(());
        };
        let overrun = Instant::now().saturating_duration_since(deadline);
        let mut status = self.shared.status();
        status.stats.current_drift = overrun;
        if overrun > Duration::ZERO {
            status.stats.deadline_misses += 1;
            status.stats.max_overrun = status.stats.max_overrun.max(overrun);
            warn!(
                step = steps_done,
                overrun_us = overrun.as_micros() as u64,
                misses = status.stats.deadline_misses,
                "real-time deadline missed"
            );
        }
        match rt.max_drift {
            Some(limit) if overrun > limit => Err(SimError::RealTimeDriftExceeded {
                drift: overrun,
                limit,
            }),
            _ => Ok(()),
        }
    }

    /// Tie the next step to the wall clock. Called whenever running resumes.
    fn anchor(&mut self) {
        let Some(rt) = self.realtime else {
            return;
        };
        let steps_done = self.shared.status().steps_done;
        let origin = match (self.pacer, rt.start_at) {
            (None, Some(at)) => at,
            _ => Instant::now(),
        };
        debug!(step = steps_done, "real-time origin anchored");
        self.pacer = Some(Pacer {
            origin,
            origin_step: steps_done,
            dt: self.dt,
        });
    }

    fn transition(&mut self, to: ControllerState) {
        if self.state == to {
            return;
        }
        debug!(from = ?self.state, to = ?to, "controller state changed");
        self.state = to;
        self.shared.publish(|s| s.state = to);
    }

    fn finish(&mut self, error: Option<SimError>) {
        if let Ok(mut sim) = self.shared.sim() {
            sim.release();
        }
        info!(failed = error.is_some(), "simulation run done");
        self.shared.publish(|s| {
            if s.last_error.is_none() {
                s.last_error = error;
            }
        });
        self.transition(ControllerState::Done);
    }
}

/// Publishes `Done` when the controller thread exits, panics included.
struct DoneOnExit(Arc<Shared>);

impl Drop for DoneOnExit {
    fn drop(&mut self) {
        self.0.publish(|s| s.state = ControllerState::Done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacer_deadlines_advance_by_dt() {
        let origin = Instant::now();
        let pacer = Pacer {
            origin,
            origin_step: 10,
            dt: Duration::from_millis(2),
        };
        assert_eq!(pacer.deadline(10), Some(origin));
        assert_eq!(pacer.deadline(13), Some(origin + Duration::from_millis(6)));
        // Steps before the anchor are due immediately.
        assert_eq!(pacer.deadline(4), Some(origin));
    }

    #[test]
    fn unrepresentable_deadlines_are_none() {
        let pacer = Pacer {
            origin: Instant::now(),
            origin_step: 0,
            dt: Duration::MAX / 2,
        };
        assert_eq!(pacer.deadline(3), None);
        assert_eq!(pacer.deadline(u64::MAX), None);
    }
}
