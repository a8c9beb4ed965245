//! Status display.
//!
//! A [`StatusSnapshot`] is a read-only copy of a session's scalar state.
//! Sessions publish a fresh snapshot after every change; the status loop
//! renders the latest one into every viewer's display.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collab::{ViewerChannel, ViewerId};

const SPACING: &str = "      ";

/// A point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub time: Duration,
    pub duration: Duration,
    pub paused: bool,
    pub speed: f64,
    pub viewers: Vec<ViewerId>,
    /// Whether the display has been started (first tick done).
    pub started: bool,
    /// Whether the session has been torn down.
    pub closed: bool,
}

impl StatusSnapshot {
    /// Render the status line, e.g. `"Paused      00:10 / 00:30      x1.0  "`.
    pub fn render(&self) -> String {
        format!(
            "{}{SPACING}{} / {}{SPACING}x{:.1}  ",
            if self.paused { "Paused" } else { "Playing" },
            format_clock(self.time),
            format_clock(self.duration),
            self.speed,
        )
    }

    /// Whether viewers should be shown this snapshot.
    pub fn is_displayed(&self) -> bool {
        self.started && !self.closed
    }
}

/// Format as `MM:SS`. Minutes are not wrapped into hours.
pub fn format_clock(time: Duration) -> String {
    let secs = time.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Write the rendered snapshot to every viewer in it. Unreachable viewers
/// are logged and skipped.
pub fn display_status(channel: &dyn ViewerChannel, snapshot: &StatusSnapshot) {
    let text = snapshot.render();
    for &viewer in &snapshot.viewers {
        if let Err(error) = channel.set_display(viewer, &text) {
            tracing::warn!(%viewer, %error, "failed to refresh status display");
        }
    }
}
