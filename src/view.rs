//! Plain-text rendering of session snapshots.
//!
//! These are the terminal counterparts of the log viewer, matrix viewer
//! and notification banner. They only read snapshots.

use std::fmt::Write as _;
use std::time::Duration;

use crate::matrix::{Matrix, MatrixBundle};
use crate::protocol::{InboundMessage, MessageKind};
use crate::session::{Notification, SessionState, Severity};

/// Log viewer lines for one inbound message.
pub fn log_lines(message: &InboundMessage) -> Vec<String> {
    let text = message.text.as_deref().unwrap_or_default();
    match message.kind {
        MessageKind::Info => return vec![format!("Info message: {text}")],
        MessageKind::Unparseable => return vec![format!("Plain text message: {text}")],
        _ => {}
    }

    let mut lines = vec![format!("Parsed message type: {}", message.kind)];
    match message.kind {
        MessageKind::Progress | MessageKind::Status | MessageKind::Error => {
            lines.push(format!("{}: {text}", message.kind));
        }
        MessageKind::Other => {
            let payload = message
                .payload
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            lines.push(format!("Other message: {payload}"));
        }
        _ => {}
    }
    if let Some(diagnostic) = &message.diagnostic {
        lines.push(format!("Decode error: {diagnostic}"));
    }
    lines
}

/// One matrix as a right-aligned table with two decimals.
pub fn render_matrix(title: &str, matrix: &Matrix) -> String {
    let cells: Vec<Vec<String>> = matrix
        .rows()
        .iter()
        .map(|row| row.iter().map(|v| format!("{v:.2}")).collect())
        .collect();
    let width = cells.iter().flatten().map(String::len).max().unwrap_or(0);

    let mut out = format!("{title}\n");
    for row in &cells {
        let line: Vec<String> = row.iter().map(|c| format!("{c:>width$}")).collect();
        let _ = writeln!(out, "  {}", line.join(" "));
    }
    out
}

/// Matrix viewer: both matrices, bias and time span.
pub fn render_bundle(bundle: &MatrixBundle) -> String {
    let mut out = String::new();
    if let Some(feedback) = &bundle.feedback {
        out.push_str(&render_matrix("Feedback matrix (tempA)", feedback));
    }
    if let Some(control) = &bundle.control {
        out.push_str(&render_matrix("Control matrix (tempB)", control));
    }
    let _ = writeln!(out, "Ib (bias): {:.4}", bundle.bias);
    let _ = writeln!(out, "T: {:.2} to {:.2}", bundle.time_start, bundle.time_end);
    let _ = writeln!(out, "Span: {:.2} seconds", bundle.span());
    out
}

/// Elapsed time in minutes.
pub fn elapsed_minutes(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() / 60.0
}

/// Elapsed-time line.
pub fn render_elapsed(elapsed: Duration) -> String {
    format!("Elapsed Time: {:.4} minute/-s", elapsed_minutes(elapsed))
}

/// Notification banner line.
pub fn render_notification(notification: &Notification) -> String {
    let tag = match notification.severity {
        Severity::Success => "OK",
        Severity::Warning => "WARN",
        Severity::Failure => "ERROR",
    };
    match notification.status {
        Some(status) => format!("[{tag}] {} ({status})", notification.text),
        None => format!("[{tag}] {}", notification.text),
    }
}

/// One-line status summary.
pub fn render_status(state: &SessionState) -> String {
    let channel = match &state.channel {
        None => "none".to_string(),
        Some(s) if s.is_open() => "open".to_string(),
        Some(s) => format!("{s:?}").to_lowercase(),
    };
    format!(
        "session {} | channel {channel} | streaming {} | loading {} | messages {}",
        state.generation,
        state.streaming,
        state.loading,
        state.messages.len()
    )
}

/// Turns successive snapshots into the lines that changed.
///
/// Tracks what was already shown so each message, activity note, banner
/// and bundle is rendered once. A new generation starts from scratch.
#[derive(Debug, Default)]
pub struct SnapshotFollower {
    generation: u64,
    messages: usize,
    activity: usize,
    notification: Option<Notification>,
    matrices: Option<MatrixBundle>,
    elapsed: Option<Duration>,
}

impl SnapshotFollower {
    /// Create a follower that has shown nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines for everything new in `state`.
    pub fn update(&mut self, state: &SessionState) -> Vec<String> {
        if state.generation != self.generation {
            *self = Self {
                generation: state.generation,
                ..Self::default()
            };
        }

        let mut lines = Vec::new();
        for message in state.messages.iter().skip(self.messages) {
            lines.extend(log_lines(message));
        }
        self.messages = state.messages.len();

        lines.extend(state.activity.iter().skip(self.activity).cloned());
        self.activity = state.activity.len();

        if state.notification != self.notification {
            if let Some(notification) = &state.notification {
                lines.push(render_notification(notification));
            }
            self.notification.clone_from(&state.notification);
        }
        if state.matrices != self.matrices {
            if let Some(bundle) = &state.matrices {
                lines.extend(render_bundle(bundle).lines().map(str::to_string));
            }
            self.matrices.clone_from(&state.matrices);
        }
        if state.elapsed != self.elapsed {
            if let Some(elapsed) = state.elapsed {
                lines.push(render_elapsed(elapsed));
            }
            self.elapsed = state.elapsed;
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_log_lines_per_kind() {
        let now = Utc::now();
        assert_eq!(
            log_lines(&decode("WebSocket connection established", now).message),
            vec!["Info message: WebSocket connection established"]
        );
        assert_eq!(
            log_lines(&decode("hello", now).message),
            vec!["Plain text message: hello"]
        );
        assert_eq!(
            log_lines(&decode(r#"{"type":"progress","message":"50%"}"#, now).message),
            vec!["Parsed message type: progress", "progress: 50%"]
        );
        let other = log_lines(&decode(r#"{"type":"ping"}"#, now).message);
        assert_eq!(other[1], r#"Other message: {"type":"ping"}"#);
    }

    #[test]
    fn test_log_lines_include_decode_error() {
        let lines = log_lines(&decode(r#"{"type":"image","data":"nope"}"#, Utc::now()).message);
        assert_eq!(lines[0], "Parsed message type: image");
        assert!(lines[1].starts_with("Decode error:"));
    }

    #[test]
    fn test_render_bundle() {
        let bundle = MatrixBundle::from_value(&json!({
            "tempA": [[1, 2], [3, 4]],
            "Ib": 0.5,
            "start": 10,
            "end": 12
        }))
        .unwrap();
        let out = render_bundle(&bundle);
        assert!(out.contains("1.00 2.00"));
        assert!(out.contains("Ib (bias): 0.5000"));
        assert!(out.contains("T: 10.00 to 12.00"));
        assert!(out.contains("Span: 2.00 seconds"));
        assert!(!out.contains("Control matrix"));
    }

    #[test]
    fn test_elapsed_in_minutes() {
        assert!((elapsed_minutes(Duration::from_secs(90)) - 1.5).abs() < f64::EPSILON);
        assert_eq!(
            render_elapsed(Duration::from_secs(30)),
            "Elapsed Time: 0.5000 minute/-s"
        );
    }

    #[test]
    fn test_notification_banner() {
        let ok = Notification::new("Upload successful!", Some(200));
        assert_eq!(render_notification(&ok), "[OK] Upload successful! (200)");
        let alert = Notification::new("boom", None);
        assert_eq!(render_notification(&alert), "[ERROR] boom");
    }

    #[test]
    fn test_follower_reports_only_new_lines() {
        let now = Utc::now();
        let mut follower = SnapshotFollower::new();
        let mut state = SessionState {
            generation: 1,
            ..SessionState::default()
        };
        state.messages.push(decode("hello", now).message);
        state.notification = Some(Notification::new("Upload successful!", Some(200)));
        assert_eq!(
            follower.update(&state),
            vec!["Plain text message: hello", "[OK] Upload successful! (200)"]
        );
        assert!(follower.update(&state).is_empty());

        state.activity.push("WebSocket closed.".to_string());
        assert_eq!(follower.update(&state), vec!["WebSocket closed."]);
    }

    #[test]
    fn test_follower_resets_on_new_session() {
        let now = Utc::now();
        let mut follower = SnapshotFollower::new();
        let mut first = SessionState {
            generation: 1,
            ..SessionState::default()
        };
        first.messages.push(decode("a", now).message);
        first.messages.push(decode("b", now).message);
        follower.update(&first);

        let mut second = SessionState {
            generation: 2,
            ..SessionState::default()
        };
        second.messages.push(decode("c", now).message);
        assert_eq!(follower.update(&second), vec!["Plain text message: c"]);
    }
}
