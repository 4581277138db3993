//! Console and audible notification.
//!
//! The [`Notifier`] renders new-arrival announcements to its output stream
//! (stdout in production, a buffer in tests) and plays a best-effort audible
//! cue through an [`AlertBackend`] selected once at startup. Alert failures
//! are logged and swallowed; they never alter the caller's control flow.

use std::io::{self, Write};

use chrono::Local;

use crate::config::AlertMode;

/// Strips every character outside the allowed set.
///
/// Subject lines come from untrusted message headers; only ASCII letters,
/// digits, space, and `. , ! ?` survive. The output is a subsequence of the
/// input, and the function is idempotent.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | ',' | '!' | '?'))
        .collect()
}

/// How the audible cue is produced.
///
/// Selected once at startup from the configured [`AlertMode`]; there is no
/// per-call platform branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertBackend {
    /// Desktop notification with a sound hint.
    Desktop,
    /// ASCII BEL written to the console.
    ConsoleBell,
    /// No audible cue.
    Silent,
}

impl AlertBackend {
    /// Resolves the configured mode against platform capabilities.
    pub fn detect(mode: AlertMode) -> Self {
        match mode {
            AlertMode::Desktop => AlertBackend::Desktop,
            AlertMode::Bell => AlertBackend::ConsoleBell,
            AlertMode::Silent => AlertBackend::Silent,
            AlertMode::Auto => {
                if cfg!(any(
                    target_os = "linux",
                    target_os = "macos",
                    target_os = "windows"
                )) {
                    AlertBackend::Desktop
                } else {
                    AlertBackend::ConsoleBell
                }
            }
        }
    }
}

/// Renders announcements and plays the audible alert.
pub struct Notifier {
    backend: AlertBackend,
    out: Box<dyn Write + Send>,
}

impl Notifier {
    /// Creates a notifier writing to stdout.
    pub fn new(backend: AlertBackend) -> Self {
        Self::with_output(backend, Box::new(io::stdout()))
    }

    /// Creates a notifier with an explicit output stream.
    pub fn with_output(backend: AlertBackend, out: Box<dyn Write + Send>) -> Self {
        Self { backend, out }
    }

    /// Returns the selected alert backend.
    pub fn backend(&self) -> AlertBackend {
        self.backend
    }

    /// Prints a timestamped announcement of new arrivals.
    ///
    /// Writes a header with the count, each subject numbered in arrival
    /// order, and a separator line.
    pub fn announce(&mut self, subjects: &[String]) -> io::Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(
            self.out,
            "\n[{}] {} unread message(s) today",
            timestamp,
            subjects.len()
        )?;
        for (i, subject) in subjects.iter().enumerate() {
            writeln!(self.out, "   {}. {}", i + 1, subject)?;
        }
        writeln!(self.out, "{}", "-".repeat(40))?;
        self.out.flush()
    }

    /// Plays the audible cue, best-effort.
    ///
    /// Failures are reported as console text only; this never returns an
    /// error to the caller.
    pub fn alert(&mut self) {
        match self.backend {
            AlertBackend::Desktop => {
                if let Err(e) = desktop_alert() {
                    tracing::warn!(error = %e, "desktop alert failed, falling back to bell");
                    self.ring_bell();
                }
            }
            AlertBackend::ConsoleBell => self.ring_bell(),
            AlertBackend::Silent => {}
        }
    }

    /// Writes the ASCII bell character.
    fn ring_bell(&mut self) {
        if let Err(e) = self.out.write_all(b"\x07").and_then(|_| self.out.flush()) {
            tracing::warn!(error = %e, "console bell failed");
        }
    }
}

/// Shows a desktop notification with a sound hint.
fn desktop_alert() -> Result<(), notify_rust::error::Error> {
    notify_rust::Notification::new()
        .summary("New mail")
        .body("You have new unread mail today")
        .sound_name("message-new-email")
        .show()?;
    Ok(())
}
