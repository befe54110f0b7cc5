//! Attendance report generation.
//!
//! A [`ReportRequest`] freezes the present/absent split at the moment the
//! report is asked for. [`ReportGenerator`] turns it into a prompt, hands
//! that to a [`TextGenerator`] and returns whatever text comes back. Backend
//! failures never escape: they are logged and replaced by
//! [`REPORT_FAILURE_NOTICE`].

pub mod gemini;

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{error, info};

pub use gemini::{GeminiClient, ReportError, TextGenerator};

use crate::registry::Student;
use crate::session::Partition;

/// Text shown in place of a report when the backend call fails.
pub const REPORT_FAILURE_NOTICE: &str =
    "Error: Could not generate the report. Please check your API key and try again.";

/// Attendance as it stood when a report was requested.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    date: NaiveDate,
    present: Vec<Arc<Student>>,
    absent: Vec<Arc<Student>>,
}

impl ReportRequest {
    /// Freeze `partition` for a report dated `date`.
    #[must_use]
    pub fn new(date: NaiveDate, partition: Partition) -> Self {
        Self {
            date,
            present: partition.present,
            absent: partition.absent,
        }
    }

    /// Report date.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Present students, in registry order.
    #[must_use]
    pub fn present(&self) -> &[Arc<Student>] {
        &self.present
    }

    /// Absent students, in registry order.
    #[must_use]
    pub fn absent(&self) -> &[Arc<Student>] {
        &self.absent
    }

    /// Number of present students.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.present.len()
    }

    /// Number of absent students.
    #[must_use]
    pub fn absent_count(&self) -> usize {
        self.absent.len()
    }

    /// Everyone in the session.
    #[must_use]
    pub fn total(&self) -> usize {
        self.present_count() + self.absent_count()
    }

    /// The prompt sent to the text generator.
    #[must_use]
    pub fn prompt(&self) -> String {
        let mut prompt = String::new();
        // Writing to a String cannot fail
        let _ = write!(
            prompt,
            "Generate a concise and professional attendance report for a college class session.\n\
             Format the output as clean Markdown.\n\
             \n\
             **Date:** {date}\n\
             \n\
             **Attendance Summary:**\n\
             - Total Students: {total}\n\
             - Present: {present}\n\
             - Absent: {absent}\n\
             \n\
             **Detailed Roster:**\n\
             \n\
             **Present Students:**\n\
             {present_roster}\n\
             \n\
             **Absent Students:**\n\
             {absent_roster}\n\
             \n\
             **Concluding Remarks:**\n\
             Provide a brief, positive concluding remark about the session's attendance. \
             If there are many absentees, suggest a follow-up.\n",
            date = self.date.format("%-m/%-d/%Y"),
            total = self.total(),
            present = self.present_count(),
            absent = self.absent_count(),
            present_roster = roster(&self.present),
            absent_roster = roster(&self.absent),
        );
        prompt
    }
}

fn roster(students: &[Arc<Student>]) -> String {
    if students.is_empty() {
        return "- None".to_string();
    }
    students
        .iter()
        .map(|s| format!("- {} (ID: {})", s.name(), s.id()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Outcome of one report request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// Text returned by the backend, unmodified.
    Generated(String),
    /// The backend call failed.
    Failed,
}

impl Report {
    /// Text to display.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Generated(text) => text,
            Self::Failed => REPORT_FAILURE_NOTICE,
        }
    }

    /// Whether this is the failure notice.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Sends attendance prompts to a text generator.
#[derive(Clone)]
pub struct ReportGenerator {
    backend: Arc<dyn TextGenerator>,
}

impl std::fmt::Debug for ReportGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportGenerator")
            .field("model", &self.backend.model())
            .finish()
    }
}

impl ReportGenerator {
    /// Wrap a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn TextGenerator>) -> Self {
        Self { backend }
    }

    /// Generate a report. Never fails; errors become [`Report::Failed`].
    pub async fn generate(&self, request: &ReportRequest) -> Report {
        info!(
            model = self.backend.model(),
            present = request.present_count(),
            absent = request.absent_count(),
            "Generating attendance report"
        );
        match self.backend.generate(&request.prompt()).await {
            Ok(text) => Report::Generated(text),
            Err(err) => {
                error!(error = %err, "Error calling report backend");
                Report::Failed
            }
        }
    }
}
