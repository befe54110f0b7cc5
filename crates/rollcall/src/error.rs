//! Error types for rollcall.
//!
//! This module defines the crate-wide error type. Report backend failures
//! have their own type in [`crate::report`] because they never escape the
//! report generator.

use thiserror::Error;

use crate::capture::CameraError;

/// Inline message shown when the registration form is incomplete.
pub const INCOMPLETE_REGISTRATION: &str = "All fields and a photo are required.";

/// The main error type for rollcall operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Registry Errors ===
    /// The registration form was missing a field or the photo.
    #[error("{message}")]
    Registration {
        /// Message shown to the user.
        message: String,
    },

    /// A student with the same id is already registered.
    #[error("a student with id '{id}' is already registered")]
    DuplicateStudent {
        /// The conflicting id.
        id: String,
    },

    /// Monitoring was requested before anyone was registered.
    #[error("no students registered")]
    NoStudents,

    // === Capture Errors ===
    /// The camera could not be opened.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// A still was requested while no stream was bound.
    #[error("Camera is not active. Cannot capture photo.")]
    CameraNotActive,

    /// Encoding a captured frame failed.
    #[error("failed to encode photo: {0}")]
    ImageEncode(#[from] image::ImageError),

    // === I/O Errors ===
    /// File system or terminal operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for rollcall operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create the incomplete-registration error.
    #[must_use]
    pub fn incomplete_registration() -> Self {
        Self::Registration {
            message: INCOMPLETE_REGISTRATION.to_string(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
