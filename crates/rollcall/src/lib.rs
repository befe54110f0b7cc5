//! `rollcall` - simulated classroom attendance
//!
//! This library provides the student registry, the attendance session, the
//! simulated detector, camera capture for registration photos, and report
//! generation through an external text-generation service.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod capture;
pub mod classroom;
pub mod cli;
pub mod config;
pub mod console;
pub mod detection;
pub mod error;
pub mod logging;
pub mod registry;
pub mod report;
pub mod session;

pub use capture::{CameraDevice, CameraError, CaptureSession, Photo, SyntheticCamera};
pub use classroom::{Classroom, ClassroomSnapshot};
pub use config::Config;
pub use detection::{AttendanceEvent, DetectionTiming, Picker, RandomPicker, SequencePicker};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use registry::{RegistrationForm, Registry, Student};
pub use report::{Report, ReportGenerator, ReportRequest, TextGenerator};
pub use session::{AttendanceStatus, SessionState};
