//! Camera capture for rollcall.
//!
//! This module owns the camera stream lifecycle used by the live preview and
//! by registration. A [`CameraDevice`] opens a [`VideoStream`]; a
//! [`CaptureSession`] binds at most one stream at a time, remembers why the
//! last open failed, and encodes still frames as JPEG [`Photo`]s.

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CameraConfig;
use crate::error::{Error, Result};

const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Why the camera could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    /// The user or platform refused camera access.
    #[error("Camera permission denied. Please allow camera access in your settings.")]
    PermissionDenied,

    /// No video input device exists.
    #[error("No camera found. Please ensure a camera is connected and enabled.")]
    NoDevice,

    /// The device exists but could not be opened, usually because another
    /// application holds it.
    #[error("Could not access the camera. It might be in use by another application.")]
    Busy(String),

    /// This platform has no camera access at all.
    #[error("This platform does not support camera access.")]
    Unsupported,
}

impl CameraError {
    /// Short machine-readable name of the failure class.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::NoDevice => "no_device",
            Self::Busy(_) => "busy",
            Self::Unsupported => "unsupported",
        }
    }
}

/// What the caller asks of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConstraints {
    /// Request a video track.
    pub video: bool,
    /// Request an audio track.
    pub audio: bool,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl StreamConstraints {
    /// Video only, at the given resolution.
    #[must_use]
    pub fn video_only(width: u32, height: u32) -> Self {
        Self {
            video: true,
            audio: false,
            width,
            height,
        }
    }
}

impl From<&CameraConfig> for StreamConstraints {
    fn from(config: &CameraConfig) -> Self {
        Self::video_only(config.width, config.height)
    }
}

/// A live stream of frames from a device.
pub trait VideoStream: Send {
    /// Read the frame currently on screen, if the stream is still live.
    fn current_frame(&mut self) -> Option<RgbImage>;

    /// Release every track held by this stream.
    fn stop(&mut self);

    /// Whether the stream still holds its tracks.
    fn is_live(&self) -> bool;
}

/// A camera that can be asked for a stream.
#[async_trait::async_trait]
pub trait CameraDevice: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Request access to the device.
    ///
    /// # Errors
    ///
    /// Returns the classified reason access was refused.
    async fn open(
        &self,
        constraints: &StreamConstraints,
    ) -> std::result::Result<Box<dyn VideoStream>, CameraError>;
}

/// An encoded still image, stored as a JPEG data URI.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo(String);

impl Photo {
    /// Encode a frame as JPEG at the given quality.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoder rejects the frame.
    pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Self> {
        let mut buf = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut buf, quality).encode_image(frame)?;
        Ok(Self::from_jpeg_bytes(buf.get_ref()))
    }

    /// Wrap already-encoded JPEG bytes.
    #[must_use]
    pub fn from_jpeg_bytes(bytes: &[u8]) -> Self {
        Self(format!("{JPEG_DATA_URI_PREFIX}{}", STANDARD.encode(bytes)))
    }

    /// The photo as a data URI.
    #[must_use]
    pub fn as_data_uri(&self) -> &str {
        &self.0
    }

    /// Decode the JPEG payload.
    #[must_use]
    pub fn jpeg_bytes(&self) -> Option<Vec<u8>> {
        let payload = self.0.strip_prefix(JPEG_DATA_URI_PREFIX)?;
        STANDARD.decode(payload).ok()
    }
}

impl std::fmt::Debug for Photo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Photo({} bytes)", self.0.len())
    }
}

/// One stream slot plus the last open failure.
///
/// Dropping a session releases its stream.
pub struct CaptureSession {
    device: Arc<dyn CameraDevice>,
    constraints: StreamConstraints,
    jpeg_quality: u8,
    stream: Option<Box<dyn VideoStream>>,
    last_error: Option<CameraError>,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("device", &self.device.name())
            .field("constraints", &self.constraints)
            .field("active", &self.is_active())
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl CaptureSession {
    /// Create a session for `device`. Nothing is opened yet.
    #[must_use]
    pub fn new(device: Arc<dyn CameraDevice>, config: &CameraConfig) -> Self {
        Self {
            device,
            constraints: StreamConstraints::from(config),
            jpeg_quality: config.jpeg_quality,
            stream: None,
            last_error: None,
        }
    }

    /// A second, unopened session on the same device with the same settings.
    #[must_use]
    pub fn fresh(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
            constraints: self.constraints,
            jpeg_quality: self.jpeg_quality,
            stream: None,
            last_error: None,
        }
    }

    /// Request camera access and bind the resulting stream.
    ///
    /// Any previously bound stream is released first. On failure the
    /// classified error is remembered for [`Self::last_error`].
    ///
    /// # Errors
    ///
    /// Returns the classified camera error.
    pub async fn open_stream(&mut self) -> std::result::Result<(), CameraError> {
        self.close_stream();
        self.last_error = None;

        match self.device.open(&self.constraints).await {
            Ok(stream) => {
                debug!(device = self.device.name(), "Camera stream opened");
                self.stream = Some(stream);
                Ok(())
            }
            Err(err) => {
                warn!(device = self.device.name(), kind = err.kind(), "Camera access failed");
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Try to open the stream again after a failure.
    ///
    /// # Errors
    ///
    /// Returns the classified camera error.
    pub async fn retry(&mut self) -> std::result::Result<(), CameraError> {
        self.open_stream().await
    }

    /// Release the bound stream. Safe to call when nothing is open.
    pub fn close_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!(device = self.device.name(), "Camera stream released");
        }
    }

    /// Whether a live stream is bound.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_live())
    }

    /// Why the last open failed, if it did.
    #[must_use]
    pub fn last_error(&self) -> Option<&CameraError> {
        self.last_error.as_ref()
    }

    /// Name of the underlying device.
    #[must_use]
    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Requested stream constraints.
    #[must_use]
    pub fn constraints(&self) -> StreamConstraints {
        self.constraints
    }

    /// Freeze the current frame and encode it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CameraNotActive`] when no stream is bound, or an
    /// encoding error.
    pub fn capture_frame(&mut self) -> Result<Photo> {
        let frame = self
            .stream
            .as_mut()
            .filter(|s| s.is_live())
            .and_then(|s| s.current_frame())
            .ok_or(Error::CameraNotActive)?;
        Photo::encode_jpeg(&frame, self.jpeg_quality)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close_stream();
    }
}

/// A device that renders a moving test pattern.
///
/// It stands in for real hardware and counts its live streams so callers
/// can check that every stream gets released.
#[derive(Debug, Default)]
pub struct SyntheticCamera {
    failure: Option<CameraError>,
    live_streams: Arc<AtomicUsize>,
    opened: AtomicU64,
}

impl SyntheticCamera {
    /// A working synthetic camera.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A camera whose every open fails with `error`.
    #[must_use]
    pub fn failing(error: CameraError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    /// Number of streams currently holding the device.
    #[must_use]
    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }

    /// Number of successful opens so far.
    #[must_use]
    pub fn open_count(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CameraDevice for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn open(
        &self,
        constraints: &StreamConstraints,
    ) -> std::result::Result<Box<dyn VideoStream>, CameraError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if !constraints.video {
            return Err(CameraError::Busy("no video track requested".to_string()));
        }

        self.live_streams.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticStream {
            width: constraints.width,
            height: constraints.height,
            frame_index: 0,
            live: Some(Arc::clone(&self.live_streams)),
        }))
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    frame_index: u32,
    live: Option<Arc<AtomicUsize>>,
}

impl VideoStream for SyntheticStream {
    // Every channel value is reduced into 0..=255 before the cast
    #[allow(clippy::cast_possible_truncation)]
    fn current_frame(&mut self) -> Option<RgbImage> {
        self.live.as_ref()?;

        let offset = self.frame_index.wrapping_mul(8);
        self.frame_index = self.frame_index.wrapping_add(1);
        let (width, height) = (self.width.max(1), self.height.max(1));

        Some(RgbImage::from_fn(width, height, |x, y| {
            let bar = (x + offset) % width < width / 8;
            if bar {
                Rgb([240, 240, 240])
            } else {
                Rgb([
                    (x * 255 / width) as u8,
                    (y * 255 / height) as u8,
                    ((x + y) % 256) as u8,
                ])
            }
        }))
    }

    fn stop(&mut self) {
        if let Some(live) = self.live.take() {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        self.live.is_some()
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop();
    }
}
