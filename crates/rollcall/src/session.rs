//! Attendance session state.
//!
//! A session maps student ids to present/absent. An empty map means no
//! session has started.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::registry::{Registry, Student};

/// Attendance of one student in the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// Seen by the detector.
    Present,
    /// Not yet seen.
    Absent,
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// Per-session attendance map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    records: HashMap<String, AttendanceStatus>,
}

/// Registry members split by status, in registry order.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// Students marked present.
    pub present: Vec<Arc<Student>>,
    /// Students marked absent.
    pub absent: Vec<Arc<Student>>,
}

impl Partition {
    /// Students with any status.
    #[must_use]
    pub fn total(&self) -> usize {
        self.present.len() + self.absent.len()
    }
}

impl SessionState {
    /// Create an empty (not started) session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session has any entries.
    #[must_use]
    pub fn is_started(&self) -> bool {
        !self.records.is_empty()
    }

    /// Number of tracked students.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nobody is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Seed one absent entry per registry member if the session is empty.
    ///
    /// Returns `false` and leaves the map untouched if it already had
    /// entries.
    pub fn start(&mut self, registry: &Registry) -> bool {
        if self.is_started() {
            return false;
        }
        self.records = registry
            .iter()
            .map(|s| (s.id().to_string(), AttendanceStatus::Absent))
            .collect();
        true
    }

    /// Add `id` as absent, whether or not a session has started.
    pub fn register(&mut self, id: &str) {
        self.records.insert(id.to_string(), AttendanceStatus::Absent);
    }

    /// Mark a tracked student present. Returns `true` if they were absent.
    pub fn mark_present(&mut self, id: &str) -> bool {
        match self.records.get_mut(id) {
            Some(status) if *status == AttendanceStatus::Absent => {
                *status = AttendanceStatus::Present;
                true
            }
            _ => false,
        }
    }

    /// Status of a student, if tracked.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<AttendanceStatus> {
        self.records.get(id).copied()
    }

    /// Number of present students.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.count(AttendanceStatus::Present)
    }

    /// Number of absent students.
    #[must_use]
    pub fn absent_count(&self) -> usize {
        self.count(AttendanceStatus::Absent)
    }

    fn count(&self, wanted: AttendanceStatus) -> usize {
        self.records.values().filter(|&&s| s == wanted).count()
    }

    /// Registry members currently absent, in registry order.
    #[must_use]
    pub fn absent_students(&self, registry: &Registry) -> Vec<Arc<Student>> {
        self.with_status(registry, AttendanceStatus::Absent)
    }

    /// Split the registry by status. Untracked members appear in neither list.
    #[must_use]
    pub fn partition(&self, registry: &Registry) -> Partition {
        Partition {
            present: self.with_status(registry, AttendanceStatus::Present),
            absent: self.with_status(registry, AttendanceStatus::Absent),
        }
    }

    fn with_status(&self, registry: &Registry, wanted: AttendanceStatus) -> Vec<Arc<Student>> {
        registry
            .iter()
            .filter(|s| self.status(s.id()) == Some(wanted))
            .cloned()
            .collect()
    }

    /// End the session.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
