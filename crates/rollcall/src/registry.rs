//! Student registry.
//!
//! The registry is the authoritative, insertion-ordered list of known
//! students. Students are immutable once created and shared by reference.

use std::sync::Arc;

use serde::Serialize;

use crate::capture::{CaptureSession, Photo};
use crate::error::{Error, Result};

/// A registered student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    id: String,
    name: String,
    #[serde(skip)]
    photo: Photo,
}

impl Student {
    /// Create a student. Field validation is the registration form's job.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, photo: Photo) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            photo,
        }
    }

    /// The student's unique id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The student's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The photo captured at registration.
    #[must_use]
    pub fn photo(&self) -> &Photo {
        &self.photo
    }
}

/// Ordered collection of registered students.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    students: Vec<Arc<Student>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a student.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateStudent`] if the id is already taken; the
    /// registry is left unchanged.
    pub fn register(&mut self, student: Student) -> Result<Arc<Student>> {
        if self.contains(student.id()) {
            return Err(Error::DuplicateStudent {
                id: student.id().to_string(),
            });
        }
        let student = Arc::new(student);
        self.students.push(Arc::clone(&student));
        Ok(student)
    }

    /// Look up a student by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<Student>> {
        self.students.iter().find(|s| s.id() == id)
    }

    /// Whether a student with this id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Students in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Student>> {
        self.students.iter()
    }

    /// Number of registered students.
    #[must_use]
    pub fn len(&self) -> usize {
        self.students.len()
    }

    /// Whether nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

/// The registration flow's form state.
#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    /// Entered name.
    pub name: String,
    /// Entered student id.
    pub id: String,
    photo: Option<Photo>,
    error: Option<String>,
}

impl RegistrationForm {
    /// Create a form with the given fields and no photo.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            ..Self::default()
        }
    }

    /// Take a still from `camera` and keep it as the photo, replacing any
    /// earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CameraNotActive`] if the camera has no stream. The
    /// message is also kept as the form's inline error.
    pub fn capture(&mut self, camera: &mut CaptureSession) -> Result<()> {
        match camera.capture_frame() {
            Ok(photo) => {
                self.photo = Some(photo);
                self.error = None;
                Ok(())
            }
            Err(err) => {
                self.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// The inline error from the last failed action.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Validate the form and build the student.
    ///
    /// # Errors
    ///
    /// Returns a registration error when the name, the id or the photo is
    /// missing.
    pub fn submit(&mut self) -> Result<Student> {
        let name = self.name.trim();
        let id = self.id.trim();
        match &self.photo {
            Some(photo) if !name.is_empty() && !id.is_empty() => {
                self.error = None;
                Ok(Student::new(id, name, photo.clone()))
            }
            _ => {
                let err = Error::incomplete_registration();
                self.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Clear every field, as when the flow is closed.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
pub(crate) fn test_photo() -> Photo {
    Photo::from_jpeg_bytes(&[0xFF, 0xD8, 0xFF, 0xD9])
}

#[cfg(test)]
pub(crate) fn test_student(id: &str, name: &str) -> Student {
    Student::new(id, name, test_photo())
}
