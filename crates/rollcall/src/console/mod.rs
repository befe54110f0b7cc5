//! Interactive terminal console.
//!
//! The console is the presentation layer. It reads command lines, calls into
//! the [`Classroom`], and prints attendance events as they arrive. One
//! `select!` loop handles input, events, and finished reports, so output
//! from the detector never waits on the keyboard.

mod commands;
pub mod render;

use std::io::Write;

use chrono::Local;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

pub use commands::{CameraCommand, ConsoleCommand, ConsoleLine};

use crate::capture::CaptureSession;
use crate::classroom::{Classroom, ClassroomSnapshot};
use crate::detection::AttendanceEvent;
use crate::error::{Error, Result};
use crate::registry::RegistrationForm;
use crate::report::{Report, ReportGenerator};

/// Whether the console should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line.
    Continue,
    /// Leave the loop.
    Quit,
}

/// Which session controls are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    /// "Start Monitoring", or "Resume Monitoring" once a session exists.
    pub start_label: &'static str,
    /// Monitoring can start.
    pub can_start: bool,
    /// Monitoring can stop.
    pub can_stop: bool,
    /// A report can be requested.
    pub can_report: bool,
    /// The session can be reset.
    pub can_reset: bool,
}

impl Controls {
    /// Derive control state from a snapshot.
    #[must_use]
    pub fn new(snapshot: &ClassroomSnapshot, generating: bool) -> Self {
        let started = snapshot.is_started();
        let idle = !snapshot.monitoring;
        Self {
            start_label: if started {
                "Resume Monitoring"
            } else {
                "Start Monitoring"
            },
            can_start: snapshot.has_students() && idle,
            can_stop: snapshot.monitoring,
            can_report: started && idle && !generating,
            can_reset: started && idle,
        }
    }
}

/// The interactive console, writing to `W`.
pub struct Console<W: Write> {
    classroom: Classroom,
    camera: CaptureSession,
    reports: ReportGenerator,
    events: broadcast::Receiver<AttendanceEvent>,
    report_tx: mpsc::UnboundedSender<Report>,
    report_rx: mpsc::UnboundedReceiver<Report>,
    generating: bool,
    last_report: Option<Report>,
    out: W,
}

impl<W: Write> std::fmt::Debug for Console<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("classroom", &self.classroom)
            .field("camera", &self.camera)
            .field("reports", &self.reports)
            .field("generating", &self.generating)
            .field("last_report", &self.last_report)
            .finish_non_exhaustive()
    }
}

impl<W: Write> Console<W> {
    /// Create a console. `camera` drives the preview line and is the
    /// template for registration streams.
    pub fn new(
        classroom: Classroom,
        camera: CaptureSession,
        reports: ReportGenerator,
        out: W,
    ) -> Self {
        let events = classroom.subscribe();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        Self {
            classroom,
            camera,
            reports,
            events,
            report_tx,
            report_rx,
            generating: false,
            last_report: None,
            out,
        }
    }

    /// The classroom this console drives.
    #[must_use]
    pub fn classroom(&self) -> &Classroom {
        &self.classroom
    }

    /// Everything written so far.
    #[must_use]
    pub fn output(&self) -> &W {
        &self.out
    }

    /// The last report shown, until the next reset.
    #[must_use]
    pub fn last_report(&self) -> Option<&Report> {
        self.last_report.as_ref()
    }

    /// Whether a report request is in flight.
    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.generating
    }

    /// Open the preview stream and print its state.
    ///
    /// # Errors
    ///
    /// Returns an error only if writing fails; camera failures are shown.
    pub async fn open_preview(&mut self) -> Result<()> {
        let _ = self.camera.open_stream().await;
        writeln!(self.out, "{}", render::camera_line(&self.camera))?;
        Ok(())
    }

    /// Read commands from `input` until `quit` or end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if reading input or writing output fails.
    pub async fn run<R>(&mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        self.open_preview().await?;
        writeln!(self.out, "Type `help` for a list of commands.")?;
        self.prompt()?;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if self.handle_line(&line).await? == Flow::Quit {
                        break;
                    }
                    self.prompt()?;
                }
                event = self.events.recv() => match event {
                    Ok(event) => self.handle_event(&event)?,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Console fell behind on attendance events");
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(report) = self.report_rx.recv() => self.finish_report(report)?,
            }
        }

        self.classroom.shutdown().await;
        self.camera.close_stream();
        Ok(())
    }

    fn prompt(&mut self) -> Result<()> {
        write!(self.out, "{}", render::PROMPT)?;
        self.out.flush()?;
        Ok(())
    }

    /// Parse and execute one input line.
    ///
    /// # Errors
    ///
    /// Returns an error if writing output fails. Command failures are
    /// printed, not returned.
    pub async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }
        let command = match ConsoleLine::parse_line(line) {
            Ok(command) => command,
            Err(err) => {
                let message = err.to_string();
                let first = message.lines().next().unwrap_or_default();
                writeln!(self.out, "{first}")?;
                writeln!(self.out, "Type `help` for a list of commands.")?;
                return Ok(Flow::Continue);
            }
        };
        debug!(?command, "Console command");

        match command {
            ConsoleCommand::Register { id, name } => {
                self.register(id, ConsoleCommand::joined_name(&name)).await?;
            }
            ConsoleCommand::Start => self.start().await?,
            ConsoleCommand::Stop => self.stop().await?,
            ConsoleCommand::Report => self.request_report().await?,
            ConsoleCommand::Reset => self.reset().await?,
            ConsoleCommand::Roster => {
                let snapshot = self.classroom.snapshot().await;
                write!(self.out, "{}", render::roster(&snapshot))?;
            }
            ConsoleCommand::Status => {
                let snapshot = self.classroom.snapshot().await;
                let controls = Controls::new(&snapshot, self.generating);
                write!(
                    self.out,
                    "{}",
                    render::status(&snapshot, &controls, self.generating)
                )?;
                writeln!(self.out, "{}", render::camera_line(&self.camera))?;
            }
            ConsoleCommand::Camera(CameraCommand::Retry) => {
                let _ = self.camera.retry().await;
                writeln!(self.out, "{}", render::camera_line(&self.camera))?;
            }
            ConsoleCommand::Camera(CameraCommand::Status) => {
                writeln!(self.out, "{}", render::camera_line(&self.camera))?;
            }
            ConsoleCommand::Help => writeln!(self.out, "{}", render::HELP)?,
            ConsoleCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Print one attendance event.
    ///
    /// # Errors
    ///
    /// Returns an error if writing output fails.
    pub fn handle_event(&mut self, event: &AttendanceEvent) -> Result<()> {
        if let Some(line) = render::event(event) {
            writeln!(self.out, "{line}")?;
        }
        Ok(())
    }

    /// Print every event already queued.
    ///
    /// # Errors
    ///
    /// Returns an error if writing output fails.
    pub fn pump_events(&mut self) -> Result<()> {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(&event)?,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Console fell behind on attendance events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
            }
        }
    }

    /// Wait for the in-flight report, if any, and print it.
    ///
    /// # Errors
    ///
    /// Returns an error if writing output fails.
    pub async fn wait_for_report(&mut self) -> Result<()> {
        if !self.generating {
            return Ok(());
        }
        match self.report_rx.recv().await {
            Some(report) => self.finish_report(report),
            None => Err(Error::internal("report channel closed")),
        }
    }

    /// Print a command failure, or pass through output errors.
    fn show_error(&mut self, err: Error) -> Result<()> {
        if let Error::Io(_) = err {
            return Err(err);
        }
        writeln!(self.out, "{err}")?;
        Ok(())
    }

    async fn register(&mut self, id: String, name: String) -> Result<()> {
        let mut camera = self.camera.fresh();
        if let Err(err) = camera.open_stream().await {
            writeln!(self.out, "Registration needs the camera. {err}")?;
            return Ok(());
        }

        let mut form = RegistrationForm::new(id, name);
        let outcome = form.capture(&mut camera).and_then(|()| form.submit());
        camera.close_stream();

        let result = match outcome {
            Ok(student) => self.classroom.register(student).await.map(drop),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            // Capture and submit failures leave their message on the form
            match form.error() {
                Some(message) => writeln!(self.out, "{message}")?,
                None => self.show_error(err)?,
            }
        }
        form.clear();
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        match self.classroom.start_monitoring().await {
            Ok(true) => Ok(()),
            Ok(false) => {
                writeln!(self.out, "Monitoring is already running.")?;
                Ok(())
            }
            Err(Error::NoStudents) => {
                writeln!(
                    self.out,
                    "Register at least one student before starting monitoring."
                )?;
                Ok(())
            }
            Err(err) => self.show_error(err),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.classroom.stop_monitoring().await {
            writeln!(self.out, "Monitoring is not running.")?;
        }
        Ok(())
    }

    async fn request_report(&mut self) -> Result<()> {
        let snapshot = self.classroom.snapshot().await;
        if !Controls::new(&snapshot, self.generating).can_report {
            let reason = if self.generating {
                "A report is already being generated."
            } else if snapshot.monitoring {
                "Stop monitoring before generating a report."
            } else {
                "Start a session before generating a report."
            };
            writeln!(self.out, "{reason}")?;
            return Ok(());
        }

        let request = self
            .classroom
            .report_request(Local::now().date_naive())
            .await;
        self.generating = true;
        self.last_report = None;
        writeln!(self.out, "Generating report...")?;

        let reports = self.reports.clone();
        let tx = self.report_tx.clone();
        tokio::spawn(async move {
            let report = reports.generate(&request).await;
            let _ = tx.send(report);
        });
        Ok(())
    }

    fn finish_report(&mut self, report: Report) -> Result<()> {
        self.generating = false;
        writeln!(self.out, "{}", render::report(report.text()))?;
        self.last_report = Some(report);
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        let snapshot = self.classroom.snapshot().await;
        if !Controls::new(&snapshot, self.generating).can_reset {
            let reason = if snapshot.monitoring {
                "Stop monitoring before resetting the session."
            } else {
                "There is no session to reset."
            };
            writeln!(self.out, "{reason}")?;
            return Ok(());
        }
        self.classroom.reset().await;
        self.last_report = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::capture::{
        CameraDevice, CameraError, StreamConstraints, SyntheticCamera, VideoStream,
    };
    use crate::config::CameraConfig;
    use crate::detection::{DetectionTiming, SequencePicker};
    use crate::report::{ReportError, TextGenerator, REPORT_FAILURE_NOTICE};

    struct CannedBackend(Option<&'static str>);

    #[async_trait]
    impl TextGenerator for CannedBackend {
        fn model(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _prompt: &str) -> std::result::Result<String, ReportError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| ReportError::Backend("offline".to_string()))
        }
    }

    fn console_with(
        device: Arc<SyntheticCamera>,
        reply: Option<&'static str>,
    ) -> Console<Vec<u8>> {
        crate::logging::init_test_logging();
        let classroom = Classroom::new(
            DetectionTiming::default(),
            Box::new(SequencePicker::default()),
        );
        let config = CameraConfig {
            width: 32,
            height: 24,
            jpeg_quality: 80,
        };
        let camera = CaptureSession::new(device, &config);
        let reports = ReportGenerator::new(Arc::new(CannedBackend(reply)));
        Console::new(classroom, camera, reports, Vec::new())
    }

    fn console() -> Console<Vec<u8>> {
        console_with(Arc::new(SyntheticCamera::new()), Some("**Report** ok"))
    }

    fn text(console: &Console<Vec<u8>>) -> String {
        String::from_utf8_lossy(console.output()).into_owned()
    }

    #[tokio::test]
    async fn test_register_prints_event_and_releases_camera() {
        let device = Arc::new(SyntheticCamera::new());
        let mut console = console_with(Arc::clone(&device), None);

        console.handle_line("register 1 Ada Lovelace").await.unwrap();
        console.pump_events().unwrap();

        assert!(text(&console).contains("Registered Ada Lovelace (ID: 1)."));
        assert_eq!(device.open_count(), 1);
        assert_eq!(device.live_streams(), 0);
    }

    #[tokio::test]
    async fn test_register_without_camera() {
        let device = Arc::new(SyntheticCamera::failing(CameraError::NoDevice));
        let mut console = console_with(device, None);

        console.handle_line("register 1 Ada").await.unwrap();
        assert!(text(&console).contains("Registration needs the camera. No camera found."));
        assert!(!console.classroom().snapshot().await.has_students());
    }

    /// Grants access but hands out a stream that has already ended.
    struct EndedCamera;

    struct EndedStream;

    impl VideoStream for EndedStream {
        fn current_frame(&mut self) -> Option<image::RgbImage> {
            None
        }

        fn stop(&mut self) {}

        fn is_live(&self) -> bool {
            false
        }
    }

    #[async_trait]
    impl CameraDevice for EndedCamera {
        fn name(&self) -> &str {
            "ended"
        }

        async fn open(
            &self,
            _constraints: &StreamConstraints,
        ) -> std::result::Result<Box<dyn VideoStream>, CameraError> {
            Ok(Box::new(EndedStream))
        }
    }

    #[tokio::test]
    async fn test_register_shows_inline_form_error() {
        let classroom = Classroom::new(
            DetectionTiming::default(),
            Box::new(SequencePicker::default()),
        );
        let camera = CaptureSession::new(Arc::new(EndedCamera), &CameraConfig::default());
        let reports = ReportGenerator::new(Arc::new(CannedBackend(None)));
        let mut console = Console::new(classroom, camera, reports, Vec::new());

        console.handle_line("register 1 Ada").await.unwrap();

        assert!(text(&console).contains("Camera is not active. Cannot capture photo."));
        assert!(!console.classroom().snapshot().await.has_students());
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_reported() {
        let mut console = console();
        console.handle_line("register 1 Ada").await.unwrap();
        console.handle_line("register 1 Bob").await.unwrap();

        assert!(text(&console).contains("a student with id '1' is already registered"));
        assert_eq!(console.classroom().snapshot().await.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_start_without_students() {
        let mut console = console();
        console.handle_line("start").await.unwrap();
        assert!(text(&console).contains("Register at least one student"));
        assert!(!console.classroom().is_monitoring().await);
    }

    #[tokio::test]
    async fn test_report_gating_and_reset() {
        let mut console = console();
        console.handle_line("report").await.unwrap();
        assert!(text(&console).contains("Start a session before generating a report."));
        console.handle_line("reset").await.unwrap();
        assert!(text(&console).contains("There is no session to reset."));

        console.handle_line("register 1 Ada").await.unwrap();
        console.handle_line("start").await.unwrap();
        console.handle_line("report").await.unwrap();
        assert!(text(&console).contains("Stop monitoring before generating a report."));
        console.handle_line("reset").await.unwrap();
        assert!(text(&console).contains("Stop monitoring before resetting the session."));

        console.handle_line("stop").await.unwrap();
        console.handle_line("report").await.unwrap();
        assert!(console.is_generating());
        console.handle_line("report").await.unwrap();
        assert!(text(&console).contains("A report is already being generated."));

        console.wait_for_report().await.unwrap();
        assert!(!console.is_generating());
        assert_eq!(
            console.last_report(),
            Some(&Report::Generated("**Report** ok".to_string()))
        );
        assert!(text(&console).contains("\x1b[1mReport\x1b[0m ok"));

        console.handle_line("reset").await.unwrap();
        assert!(console.last_report().is_none());
        assert!(!console.classroom().snapshot().await.is_started());
    }

    #[tokio::test]
    async fn test_failed_report_shows_notice() {
        let mut console = console_with(Arc::new(SyntheticCamera::new()), None);
        console.handle_line("register 1 Ada").await.unwrap();
        console.handle_line("start").await.unwrap();
        console.handle_line("stop").await.unwrap();
        console.handle_line("report").await.unwrap();
        console.wait_for_report().await.unwrap();

        assert!(text(&console).contains(REPORT_FAILURE_NOTICE));
        assert!(console.last_report().unwrap().is_failure());
    }

    #[tokio::test]
    async fn test_resume_label_once_anyone_is_tracked() {
        let mut console = console();
        console.handle_line("status").await.unwrap();
        assert!(text(&console).contains("Controls: Start Monitoring (unavailable) |"));

        // Registration tracks the student, which starts the session
        console.handle_line("register 1 Ada").await.unwrap();
        console.handle_line("status").await.unwrap();
        assert!(text(&console).contains("Controls: Resume Monitoring |"));

        console.handle_line("reset").await.unwrap();
        console.handle_line("status").await.unwrap();
        assert!(text(&console).ends_with("Camera: off
"));
        assert!(text(&console).contains("Session: not started, 1 registered"));
    }

    #[tokio::test]
    async fn test_unknown_command_and_quit() {
        let mut console = console();
        assert_eq!(console.handle_line("").await.unwrap(), Flow::Continue);
        assert_eq!(console.handle_line("dance").await.unwrap(), Flow::Continue);
        assert!(text(&console).contains("Type `help` for a list of commands."));
        assert_eq!(console.handle_line("quit").await.unwrap(), Flow::Quit);
    }

    #[tokio::test]
    async fn test_camera_retry_recovers_line() {
        let device = Arc::new(SyntheticCamera::failing(CameraError::PermissionDenied));
        let mut console = console_with(device, None);
        console.open_preview().await.unwrap();
        console.handle_line("camera retry").await.unwrap();

        let out = text(&console);
        assert_eq!(out.matches("Camera permission denied.").count(), 2);
    }

    #[tokio::test]
    async fn test_run_reads_until_quit() {
        let device = Arc::new(SyntheticCamera::new());
        let mut console = console_with(Arc::clone(&device), None);

        let input: &[u8] = b"help\nregister 9 Zoe\nroster\nquit\nstart\n";
        console.run(input).await.unwrap();

        let out = text(&console);
        assert!(out.contains("Camera: live (synthetic, 32x24)"));
        assert!(out.contains("register <id> <name...>"));
        assert!(out.contains("Absent (1)\n  - Zoe (ID: 9)"));
        assert!(!console.classroom().is_monitoring().await);
        assert_eq!(device.live_streams(), 0);
    }
}
