//! Simulated student detection.
//!
//! There is no recognition here. While monitoring is on, a repeating tick
//! picks a random absent student, marks them present and shows a short-lived
//! "detected" notice. The engine stops itself once nobody is absent.
//!
//! The tick task and the notice-clear task are owned [`JoinHandle`]s kept in
//! [`EngineState`] next to the running flag, and [`EngineState::halt`] cancels
//! both. Every halt also bumps an epoch; a task that wakes holding an old
//! epoch does nothing.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::classroom::{ClassroomState, SharedState};
use crate::config::Config;
use crate::registry::{Registry, Student};
use crate::session::SessionState;

/// Chooses which absent student the next tick detects.
pub trait Picker: Send + std::fmt::Debug {
    /// Return an index in `0..len`. `len` is never zero.
    fn pick(&mut self, len: usize) -> usize;
}

/// Uniform random picker.
#[derive(Debug)]
pub struct RandomPicker {
    rng: StdRng,
}

impl RandomPicker {
    /// Seeded when `seed` is given, otherwise from OS entropy.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
        }
    }
}

impl Picker for RandomPicker {
    fn pick(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}

/// Picker that replays a fixed list of indices, then always picks 0.
///
/// Indices past the end of the absent list wrap around.
#[derive(Debug, Clone, Default)]
pub struct SequencePicker {
    picks: std::collections::VecDeque<usize>,
}

impl SequencePicker {
    /// Replay `picks` in order.
    #[must_use]
    pub fn new(picks: impl IntoIterator<Item = usize>) -> Self {
        Self {
            picks: picks.into_iter().collect(),
        }
    }
}

impl Picker for SequencePicker {
    fn pick(&mut self, len: usize) -> usize {
        self.picks.pop_front().unwrap_or(0) % len
    }
}

/// Tick cadence and notice lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionTiming {
    /// Time between ticks. The first tick comes one interval after start.
    pub tick_interval: Duration,
    /// How long a detection notice stays up.
    pub notice_duration: Duration,
}

impl Default for DetectionTiming {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(4),
            notice_duration: Duration::from_secs(3),
        }
    }
}

impl From<&Config> for DetectionTiming {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            notice_duration: config.notice_duration(),
        }
    }
}

/// Why monitoring stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The user stopped it.
    Requested,
    /// Nobody was left absent.
    AllPresent,
    /// The session was reset.
    Reset,
    /// The classroom was torn down.
    Shutdown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::AllPresent => write!(f, "all_present"),
            Self::Reset => write!(f, "reset"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Something observable changed in the classroom.
#[derive(Debug, Clone)]
pub enum AttendanceEvent {
    /// A student joined the registry.
    StudentRegistered {
        /// The new student.
        student: Arc<Student>,
    },
    /// The session was seeded from the registry.
    SessionStarted {
        /// Number of students seeded as absent.
        students: usize,
    },
    /// The detector started ticking.
    MonitoringStarted,
    /// A student was marked present.
    Detected {
        /// Who was detected.
        student: Arc<Student>,
    },
    /// The detection notice went away.
    DetectionCleared,
    /// The detector stopped ticking.
    MonitoringStopped {
        /// Why it stopped.
        reason: StopReason,
    },
    /// The session was cleared.
    SessionReset,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// This student went from absent to present.
    Detected(Arc<Student>),
    /// Nobody was absent.
    Exhausted,
}

/// Mark one randomly picked absent student present.
pub fn tick(
    registry: &Registry,
    session: &mut SessionState,
    picker: &mut dyn Picker,
) -> TickOutcome {
    let absent = session.absent_students(registry);
    if absent.is_empty() {
        return TickOutcome::Exhausted;
    }

    let index = picker.pick(absent.len()).min(absent.len() - 1);
    let student = Arc::clone(&absent[index]);
    session.mark_present(student.id());
    TickOutcome::Detected(student)
}

/// What [`EngineState::halt`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Halted {
    pub(crate) was_running: bool,
    pub(crate) cleared_notice: bool,
}

/// The engine's share of classroom state.
#[derive(Debug)]
pub(crate) struct EngineState {
    running: bool,
    epoch: u64,
    notice_seq: u64,
    ticker: Option<JoinHandle<()>>,
    notice_clear: Option<JoinHandle<()>>,
    detected: Option<Arc<Student>>,
    picker: Box<dyn Picker>,
}

impl EngineState {
    pub(crate) fn new(picker: Box<dyn Picker>) -> Self {
        Self {
            running: false,
            epoch: 0,
            notice_seq: 0,
            ticker: None,
            notice_clear: None,
            detected: None,
            picker,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn detected(&self) -> Option<&Arc<Student>> {
        self.detected.as_ref()
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.running && self.epoch == epoch
    }

    /// Cancel both timers, drop the notice and invalidate in-flight tasks.
    pub(crate) fn halt(&mut self) -> Halted {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(clear) = self.notice_clear.take() {
            clear.abort();
        }
        self.epoch = self.epoch.wrapping_add(1);

        let halted = Halted {
            was_running: self.running,
            cleared_notice: self.detected.is_some(),
        };
        self.running = false;
        self.detected = None;
        halted
    }
}

/// Abort handles for the running tasks, reachable without the classroom lock.
#[derive(Debug, Default)]
struct TaskAborts {
    ticker: Option<AbortHandle>,
    notice_clear: Option<AbortHandle>,
}

/// Schedules ticks against the shared classroom state.
#[derive(Debug, Clone)]
pub struct DetectionEngine {
    state: SharedState,
    timing: DetectionTiming,
    events: broadcast::Sender<AttendanceEvent>,
    aborts: Arc<Mutex<TaskAborts>>,
}

impl DetectionEngine {
    pub(crate) fn new(
        state: SharedState,
        timing: DetectionTiming,
        events: broadcast::Sender<AttendanceEvent>,
    ) -> Self {
        Self {
            state,
            timing,
            events,
            aborts: Arc::default(),
        }
    }

    fn aborts(&self) -> std::sync::MutexGuard<'_, TaskAborts> {
        self.aborts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Abort both timer tasks without touching the classroom lock.
    ///
    /// Used on teardown, when the lock may be held by the task itself.
    pub(crate) fn abort_tasks(&self) {
        let mut aborts = self.aborts();
        if let Some(ticker) = aborts.ticker.take() {
            ticker.abort();
        }
        if let Some(clear) = aborts.notice_clear.take() {
            clear.abort();
        }
    }

    /// Start ticking. Returns `false` if already running.
    ///
    /// Must run inside a tokio runtime, with the classroom lock held.
    pub(crate) fn start_locked(&self, engine: &mut EngineState) -> bool {
        if engine.running {
            return false;
        }

        engine.running = true;
        let first_tick = Instant::now() + self.timing.tick_interval;
        let ticker = self.spawn_ticker(engine.epoch, first_tick);
        self.aborts().ticker = Some(ticker.abort_handle());
        engine.ticker = Some(ticker);
        info!(
            interval_ms = self.timing.tick_interval.as_millis(),
            "Detection started"
        );
        true
    }

    /// Halt and announce. Returns whether the engine had been running.
    pub(crate) fn stop_locked(&self, engine: &mut EngineState, reason: StopReason) -> bool {
        let halted = engine.halt();
        if halted.cleared_notice {
            self.emit(AttendanceEvent::DetectionCleared);
        }
        if halted.was_running {
            info!(%reason, "Detection stopped");
            self.emit(AttendanceEvent::MonitoringStopped { reason });
        }
        halted.was_running
    }

    fn spawn_ticker(&self, epoch: u64, first_tick: Instant) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = time::interval_at(first_tick, engine.timing.tick_interval);
            loop {
                interval.tick().await;
                let mut state = engine.state.lock().await;
                if !state.engine.is_current(epoch) {
                    debug!(epoch, "Stale detection tick ignored");
                    break;
                }
                if !engine.tick_locked(&mut state, epoch) {
                    break;
                }
            }
        })
    }

    /// Run one tick. Returns `false` once the engine has stopped itself.
    fn tick_locked(&self, state: &mut ClassroomState, epoch: u64) -> bool {
        let outcome = tick(
            &state.registry,
            &mut state.session,
            state.engine.picker.as_mut(),
        );

        match outcome {
            TickOutcome::Detected(student) => {
                info!(id = student.id(), name = student.name(), "Student detected");
                self.show_notice(&mut state.engine, epoch, &student);
                self.emit(AttendanceEvent::Detected { student });
                true
            }
            TickOutcome::Exhausted => {
                // Detach our own handle so the halt below does not abort this task
                drop(state.engine.ticker.take());
                self.stop_locked(&mut state.engine, StopReason::AllPresent);
                false
            }
        }
    }

    fn show_notice(&self, engine: &mut EngineState, epoch: u64, student: &Arc<Student>) {
        if let Some(pending) = engine.notice_clear.take() {
            pending.abort();
        }
        engine.notice_seq = engine.notice_seq.wrapping_add(1);
        engine.detected = Some(Arc::clone(student));
        let clear = self.spawn_notice_clear(epoch, engine.notice_seq);
        self.aborts().notice_clear = Some(clear.abort_handle());
        engine.notice_clear = Some(clear);
    }

    fn spawn_notice_clear(&self, epoch: u64, seq: u64) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            time::sleep(engine.timing.notice_duration).await;
            let mut state = engine.state.lock().await;
            let current = &mut state.engine;
            if !current.is_current(epoch) || current.notice_seq != seq {
                return;
            }
            current.notice_clear = None;
            if current.detected.take().is_some() {
                engine.emit(AttendanceEvent::DetectionCleared);
            }
        })
    }

    fn emit(&self, event: AttendanceEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
