//! Text rendering for the console.
//!
//! Every function here returns a `String` so the console decides where it
//! goes and tests can compare output directly.

use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::Controls;
use crate::capture::CaptureSession;
use crate::classroom::ClassroomSnapshot;
use crate::detection::{AttendanceEvent, StopReason};
use crate::registry::Student;

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Prompt printed before each input line.
pub const PROMPT: &str = "rollcall> ";

/// Command summary for `help`.
pub const HELP: &str = "\
Commands:
  register <id> <name...>  Register a student and take their photo
  start                    Start or resume monitoring
  stop                     Stop monitoring
  report                   Generate an attendance report
  reset                    Clear the session
  roster                   Show registered students by status
  status                   Show session, controls and camera
  camera retry             Ask for camera access again
  camera status            Show the camera state
  help                     Show this list
  quit                     Leave the console";

/// `**text**` spans. The pattern is a literal, so compiling it cannot fail.
static BOLD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("Invalid bold pattern"));

fn entry(student: &Student) -> String {
    format!("  - {} (ID: {})", student.name(), student.id())
}

fn section(out: &mut String, title: &str, students: &[Arc<Student>]) {
    let _ = writeln!(out, "{title} ({})", students.len());
    if students.is_empty() {
        let _ = writeln!(out, "  None");
    }
    for student in students {
        let _ = writeln!(out, "{}", entry(student));
    }
}

/// The registry, split by attendance once a session exists.
#[must_use]
pub fn roster(snapshot: &ClassroomSnapshot) -> String {
    let mut out = String::new();
    if !snapshot.has_students() {
        out.push_str("No students registered yet. Use `register <id> <name>` to add one.\n");
        return out;
    }

    if snapshot.is_started() {
        let partition = snapshot.partition();
        section(&mut out, "Present", &partition.present);
        section(&mut out, "Absent", &partition.absent);
    } else {
        let _ = writeln!(out, "Registered Students ({})", snapshot.registry.len());
        for student in snapshot.registry.iter() {
            let _ = writeln!(out, "{}", entry(student));
        }
    }
    out
}

/// Which controls are available right now.
#[must_use]
pub fn controls(controls: &Controls) -> String {
    let mark = |enabled: bool| if enabled { "" } else { " (unavailable)" };
    format!(
        "Controls: {}{} | Stop Monitoring{} | Generate Report{} | Reset Session{}",
        controls.start_label,
        mark(controls.can_start),
        mark(controls.can_stop),
        mark(controls.can_report),
        mark(controls.can_reset),
    )
}

/// Session summary with the monitoring indicator.
#[must_use]
pub fn status(snapshot: &ClassroomSnapshot, controls_state: &Controls, generating: bool) -> String {
    let mut out = String::new();
    if snapshot.monitoring {
        out.push_str("[MONITORING] ");
    }
    if snapshot.is_started() {
        let _ = writeln!(
            out,
            "Session: {} present, {} absent, {} total",
            snapshot.session.present_count(),
            snapshot.session.absent_count(),
            snapshot.session.len()
        );
    } else {
        let _ = writeln!(
            out,
            "Session: not started, {} registered",
            snapshot.registry.len()
        );
    }
    if let Some(student) = &snapshot.detected {
        let _ = writeln!(out, "{}", detection_notice(student));
    }
    if generating {
        out.push_str("Generating report...\n");
    }
    let _ = writeln!(out, "{}", controls(controls_state));
    out
}

/// The live preview, as one line.
#[must_use]
pub fn camera_line(camera: &CaptureSession) -> String {
    if camera.is_active() {
        let constraints = camera.constraints();
        return format!(
            "Camera: live ({}, {}x{})",
            camera.device_name(),
            constraints.width,
            constraints.height
        );
    }
    match camera.last_error() {
        Some(err) => format!("Camera: {err} Type `camera retry` to try again."),
        None => "Camera: off".to_string(),
    }
}

/// The transient "detected" notice.
#[must_use]
pub fn detection_notice(student: &Student) -> String {
    format!(">> Detected: {} (ID: {})", student.name(), student.id())
}

/// A line describing `event`, if it is worth showing.
#[must_use]
pub fn event(event: &AttendanceEvent) -> Option<String> {
    match event {
        AttendanceEvent::StudentRegistered { student } => Some(format!(
            "Registered {} (ID: {}).",
            student.name(),
            student.id()
        )),
        AttendanceEvent::SessionStarted { students } => {
            Some(format!("Session started with {students} students absent."))
        }
        AttendanceEvent::MonitoringStarted => Some("[MONITORING] Monitoring started.".to_string()),
        AttendanceEvent::Detected { student } => Some(detection_notice(student)),
        AttendanceEvent::MonitoringStopped { reason } => Some(match reason {
            StopReason::AllPresent => {
                "All students are present. Monitoring stopped.".to_string()
            }
            StopReason::Requested => "Monitoring stopped.".to_string(),
            StopReason::Reset | StopReason::Shutdown => return None,
        }),
        AttendanceEvent::SessionReset => Some("Session reset.".to_string()),
        AttendanceEvent::DetectionCleared => None,
    }
}

/// Report text with `**bold**` turned into terminal bold.
#[must_use]
pub fn report(text: &str) -> String {
    let bolded = BOLD_PATTERN.replace_all(text, format!("{BOLD}${{1}}{RESET}"));
    format!("--- Attendance Report ---\n{bolded}\n-------------------------")
}
