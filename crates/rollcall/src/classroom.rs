//! The classroom: registry, session and detector behind one lock.
//!
//! All attendance state lives in a single [`ClassroomState`] guarded by a
//! tokio mutex. Detection ticks take the same lock, so reading the absent
//! list and marking someone present can never interleave with another
//! operation.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{broadcast, Mutex};
use tracing::info;

use crate::config::Config;
use crate::detection::{
    AttendanceEvent, DetectionEngine, DetectionTiming, EngineState, Picker, RandomPicker,
    StopReason,
};
use crate::error::{Error, Result};
use crate::registry::{Registry, Student};
use crate::report::ReportRequest;
use crate::session::{Partition, SessionState};

const EVENT_CAPACITY: usize = 64;

pub(crate) type SharedState = Arc<Mutex<ClassroomState>>;

#[derive(Debug)]
pub(crate) struct ClassroomState {
    pub(crate) registry: Registry,
    pub(crate) session: SessionState,
    pub(crate) engine: EngineState,
}

/// A consistent copy of the classroom at one instant.
#[derive(Debug, Clone)]
pub struct ClassroomSnapshot {
    /// Registered students.
    pub registry: Registry,
    /// Attendance map.
    pub session: SessionState,
    /// Whether the detector is ticking.
    pub monitoring: bool,
    /// The student currently shown as detected.
    pub detected: Option<Arc<Student>>,
}

impl ClassroomSnapshot {
    /// Whether anyone is registered.
    #[must_use]
    pub fn has_students(&self) -> bool {
        !self.registry.is_empty()
    }

    /// Whether a session is in progress.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.session.is_started()
    }

    /// Registry split by attendance.
    #[must_use]
    pub fn partition(&self) -> Partition {
        self.session.partition(&self.registry)
    }
}

/// Owner of all attendance state.
///
/// Dropping the classroom cancels any running detection.
#[derive(Debug)]
pub struct Classroom {
    state: SharedState,
    engine: DetectionEngine,
    events: broadcast::Sender<AttendanceEvent>,
}

impl Classroom {
    /// Create an empty classroom.
    #[must_use]
    pub fn new(timing: DetectionTiming, picker: Box<dyn Picker>) -> Self {
        let state = Arc::new(Mutex::new(ClassroomState {
            registry: Registry::new(),
            session: SessionState::new(),
            engine: EngineState::new(picker),
        }));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine = DetectionEngine::new(Arc::clone(&state), timing, events.clone());
        Self {
            state,
            engine,
            events,
        }
    }

    /// Create a classroom with timing and seed taken from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            DetectionTiming::from(config),
            Box::new(RandomPicker::new(config.detection.seed)),
        )
    }

    /// Receive every attendance event from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AttendanceEvent> {
        self.events.subscribe()
    }

    /// Add a student to the registry and mark them absent right away,
    /// whether or not a session is running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateStudent`] if the id is taken.
    pub async fn register(&self, student: Student) -> Result<Arc<Student>> {
        let mut state = self.state.lock().await;
        let student = state.registry.register(student)?;
        state.session.register(student.id());
        info!(id = student.id(), name = student.name(), "Student registered");

        self.emit(AttendanceEvent::StudentRegistered {
            student: Arc::clone(&student),
        });
        Ok(student)
    }

    /// Seed the session from the registry. No-op if already started.
    pub async fn start_session(&self) -> bool {
        let mut state = self.state.lock().await;
        self.start_session_locked(&mut state)
    }

    fn start_session_locked(&self, state: &mut ClassroomState) -> bool {
        let started = state.session.start(&state.registry);
        if started {
            info!(students = state.session.len(), "Session started");
            self.emit(AttendanceEvent::SessionStarted {
                students: state.session.len(),
            });
        }
        started
    }

    /// Start the detector, seeding the session first if it is empty.
    ///
    /// Returns `false` if it was already running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoStudents`] if nobody is registered.
    pub async fn start_monitoring(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.registry.is_empty() {
            return Err(Error::NoStudents);
        }
        if !state.session.is_started() {
            self.start_session_locked(&mut state);
        }

        let started = self.engine.start_locked(&mut state.engine);
        if started {
            self.emit(AttendanceEvent::MonitoringStarted);
        }
        Ok(started)
    }

    /// Stop the detector. Returns whether it had been running.
    pub async fn stop_monitoring(&self) -> bool {
        let mut state = self.state.lock().await;
        self.engine
            .stop_locked(&mut state.engine, StopReason::Requested)
    }

    /// Halt the detector and clear the session.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        self.engine.stop_locked(&mut state.engine, StopReason::Reset);
        state.session.clear();
        info!("Session reset");
        self.emit(AttendanceEvent::SessionReset);
    }

    /// Whether the detector is ticking.
    pub async fn is_monitoring(&self) -> bool {
        self.state.lock().await.engine.is_running()
    }

    /// Copy the current state.
    pub async fn snapshot(&self) -> ClassroomSnapshot {
        let state = self.state.lock().await;
        ClassroomSnapshot {
            registry: state.registry.clone(),
            session: state.session.clone(),
            monitoring: state.engine.is_running(),
            detected: state.engine.detected().cloned(),
        }
    }

    /// Build a report request from attendance as it stands now.
    pub async fn report_request(&self, date: NaiveDate) -> ReportRequest {
        let state = self.state.lock().await;
        ReportRequest::new(date, state.session.partition(&state.registry))
    }

    /// Cancel detection for teardown.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        self.engine
            .stop_locked(&mut state.engine, StopReason::Shutdown);
    }

    fn emit(&self, event: AttendanceEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for Classroom {
    fn drop(&mut self) {
        self.engine.abort_tasks();
        if let Ok(mut state) = self.state.try_lock() {
            state.engine.halt();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::sleep;

    use super::*;
    use crate::detection::SequencePicker;
    use crate::registry::test_student;
    use crate::session::AttendanceStatus;

    fn classroom() -> Classroom {
        Classroom::new(DetectionTiming::default(), Box::new(SequencePicker::default()))
    }

    async fn classroom_with(ids: &[&str]) -> Classroom {
        let classroom = classroom();
        for id in ids {
            classroom
                .register(test_student(id, &format!("Student {id}")))
                .await
                .unwrap();
        }
        classroom
    }

    fn drain(rx: &mut broadcast::Receiver<AttendanceEvent>) -> Vec<AttendanceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_register_marks_absent_before_session() {
        let classroom = classroom_with(&["a"]).await;
        let snapshot = classroom.snapshot().await;
        assert_eq!(snapshot.session.status("a"), Some(AttendanceStatus::Absent));
    }

    #[tokio::test]
    async fn test_register_during_session_adds_absent() {
        let classroom = classroom_with(&["a"]).await;
        classroom.start_session().await;

        classroom.register(test_student("b", "Late")).await.unwrap();
        let snapshot = classroom.snapshot().await;
        assert_eq!(snapshot.session.status("b"), Some(AttendanceStatus::Absent));
        assert_eq!(snapshot.session.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let classroom = classroom_with(&["a"]).await;
        let err = classroom.register(test_student("a", "Again")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateStudent { .. }));
        assert_eq!(classroom.snapshot().await.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_start_session_is_idempotent() {
        let classroom = classroom_with(&["a", "b"]).await;
        classroom.reset().await;

        assert!(classroom.start_session().await);
        let first = classroom.snapshot().await.session;
        assert!(!classroom.start_session().await);
        assert_eq!(classroom.snapshot().await.session, first);
    }

    #[tokio::test]
    async fn test_start_monitoring_without_students_fails() {
        let classroom = classroom();
        assert!(matches!(
            classroom.start_monitoring().await,
            Err(Error::NoStudents)
        ));
        assert!(!classroom.is_monitoring().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_monitoring_seeds_empty_session() {
        let classroom = classroom_with(&["a", "b"]).await;
        classroom.reset().await;
        assert!(!classroom.snapshot().await.is_started());

        assert!(classroom.start_monitoring().await.unwrap());
        let snapshot = classroom.snapshot().await;
        assert_eq!(snapshot.session.absent_count(), 2);
        assert!(snapshot.monitoring);

        // Second start is a no-op
        assert!(!classroom.start_monitoring().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_tick_adds_one_present_then_stops() {
        let classroom = classroom_with(&["a", "b", "c"]).await;
        let mut rx = classroom.subscribe();
        classroom.start_monitoring().await.unwrap();

        // Nothing happens before the first interval elapses
        sleep(Duration::from_millis(3_900)).await;
        assert_eq!(classroom.snapshot().await.session.present_count(), 0);

        for expected in 1..=3 {
            sleep(Duration::from_secs(4)).await;
            let snapshot = classroom.snapshot().await;
            assert_eq!(snapshot.session.present_count(), expected);
            assert!(snapshot.monitoring, "stopped early after {expected} ticks");
        }

        // The next tick finds nobody absent
        sleep(Duration::from_secs(4)).await;
        let snapshot = classroom.snapshot().await;
        assert!(!snapshot.monitoring);
        assert!(snapshot.detected.is_none());

        let stops: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, AttendanceEvent::MonitoringStopped { .. }))
            .collect();
        assert_eq!(stops.len(), 1);
        assert!(matches!(
            stops[0],
            AttendanceEvent::MonitoringStopped {
                reason: StopReason::AllPresent
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_clears_after_display_duration() {
        let classroom = classroom_with(&["a", "b"]).await;
        classroom.start_monitoring().await.unwrap();

        sleep(Duration::from_millis(4_100)).await;
        let detected = classroom.snapshot().await.detected;
        assert_eq!(detected.map(|s| s.id().to_string()), Some("a".to_string()));

        // Cleared at 7s, before the next tick at 8s
        sleep(Duration::from_secs(3)).await;
        assert!(classroom.snapshot().await.detected.is_none());
        assert!(classroom.is_monitoring().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_detection_supersedes_notice() {
        let timing = DetectionTiming {
            tick_interval: Duration::from_secs(2),
            notice_duration: Duration::from_secs(3),
        };
        let classroom = Classroom::new(timing, Box::new(SequencePicker::default()));
        for id in ["a", "b", "c"] {
            classroom.register(test_student(id, id)).await.unwrap();
        }
        classroom.start_monitoring().await.unwrap();

        sleep(Duration::from_millis(2_500)).await;
        let detected = classroom.snapshot().await.detected.unwrap();
        assert_eq!(detected.id(), "a");

        // "a" would have cleared at 5s, but "b" replaced it at 4s
        sleep(Duration::from_secs(3)).await;
        let detected = classroom.snapshot().await.detected.unwrap();
        assert_eq!(detected.id(), "b");

        // "c" replaces "b" at 6s
        sleep(Duration::from_secs(2)).await;
        let detected = classroom.snapshot().await.detected.unwrap();
        assert_eq!(detected.id(), "c");

        // The tick at 8s finds nobody absent and takes the notice down with it
        sleep(Duration::from_secs(2)).await;
        let snapshot = classroom.snapshot().await;
        assert!(snapshot.detected.is_none());
        assert!(!snapshot.monitoring);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_no_ghost_ticks() {
        let classroom = classroom_with(&["a", "b", "c"]).await;
        classroom.start_monitoring().await.unwrap();
        sleep(Duration::from_millis(4_100)).await;

        let mut rx = classroom.subscribe();
        assert!(classroom.stop_monitoring().await);
        let after_stop = classroom.snapshot().await;
        assert!(!after_stop.monitoring);
        assert!(after_stop.detected.is_none());
        drain(&mut rx);

        sleep(Duration::from_secs(30)).await;
        let later = classroom.snapshot().await;
        assert_eq!(later.session, after_stop.session);
        assert!(later.detected.is_none());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_halts_and_clears() {
        let classroom = classroom_with(&["a", "b"]).await;
        classroom.start_monitoring().await.unwrap();
        sleep(Duration::from_millis(4_100)).await;

        classroom.reset().await;
        let snapshot = classroom.snapshot().await;
        assert!(!snapshot.is_started());
        assert!(!snapshot.monitoring);
        assert!(snapshot.detected.is_none());

        sleep(Duration::from_secs(20)).await;
        assert!(!classroom.snapshot().await.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_during_monitoring_gets_detected() {
        let classroom = classroom_with(&["a"]).await;
        classroom.start_monitoring().await.unwrap();
        sleep(Duration::from_millis(4_100)).await;

        classroom.register(test_student("b", "Late")).await.unwrap();
        sleep(Duration::from_secs(4)).await;

        let snapshot = classroom.snapshot().await;
        assert_eq!(snapshot.session.status("b"), Some(AttendanceStatus::Present));
        assert!(snapshot.monitoring);
    }

    #[tokio::test]
    async fn test_report_request_partitions_current_state() {
        let classroom = classroom_with(&["a", "b", "c"]).await;
        {
            let mut state = classroom.state.lock().await;
            state.session.mark_present("a");
            state.session.mark_present("b");
        }

        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let request = classroom.report_request(date).await;
        assert_eq!(request.present_count(), 2);
        assert_eq!(request.absent_count(), 1);
        assert_eq!(request.total(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_detection() {
        let classroom = classroom_with(&["a"]).await;
        let mut rx = classroom.subscribe();
        classroom.start_monitoring().await.unwrap();
        classroom.shutdown().await;

        assert!(!classroom.is_monitoring().await);
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            AttendanceEvent::MonitoringStopped {
                reason: StopReason::Shutdown
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_while_locked_still_cancels_ticks() {
        let classroom = classroom_with(&["a", "b"]).await;
        classroom.start_monitoring().await.unwrap();

        let state = Arc::clone(&classroom.state);
        let guard = state.lock().await;
        drop(classroom);
        drop(guard);

        sleep(Duration::from_secs(10)).await;
        let state = state.lock().await;
        assert_eq!(state.session.present_count(), 0);
        assert!(state.engine.detected().is_none());
    }
}
