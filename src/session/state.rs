//! Session State snapshot and notifications.

use std::time::Duration;

use crate::channel::ConnectionState;
use crate::images::DecodedImage;
use crate::job::JobRequest;
use crate::matrix::MatrixBundle;
use crate::protocol::InboundMessage;

/// Banner colour for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Green.
    Success,
    /// Yellow.
    Warning,
    /// Red.
    Failure,
}

impl Severity {
    /// 200 is a success, 4xx a warning, anything else (including no status)
    /// a failure.
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(200) => Self::Success,
            Some(400..=499) => Self::Warning,
            _ => Self::Failure,
        }
    }
}

/// User-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Banner text.
    pub text: String,
    /// HTTP-like status code, if the notification carries one.
    pub status: Option<u16>,
    /// Derived from `status`.
    pub severity: Severity,
}

impl Notification {
    /// Notification whose severity follows `status`.
    pub fn new(text: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            text: text.into(),
            status,
            severity: Severity::from_status(status),
        }
    }
}

/// Immutable snapshot of one session.
///
/// The controller replaces the published snapshot wholesale after every
/// handled event; readers never observe a partial update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// Generation of the session this snapshot describes.
    pub generation: u64,
    /// Request that started the session.
    pub request: Option<JobRequest>,
    /// State of the session's channel, once one was requested.
    pub channel: Option<ConnectionState>,
    /// Whether a video session is active.
    pub streaming: bool,
    /// Between submission and acceptance.
    pub loading: bool,
    /// One entry per inbound message, in arrival order.
    pub messages: Vec<InboundMessage>,
    /// Lifecycle notes that are not inbound messages.
    pub activity: Vec<String>,
    /// Latest decoded output image.
    pub image: Option<DecodedImage>,
    /// Latest matrix bundle, inline or from the channel.
    pub matrices: Option<MatrixBundle>,
    /// Latest image arrival minus channel open time.
    pub elapsed: Option<Duration>,
    /// Current banner.
    pub notification: Option<Notification>,
    /// `response_status` reported with the job acceptance.
    pub response_status: Option<u16>,
}

impl SessionState {
    /// Fresh state for a new session.
    pub fn begin(generation: u64, request: JobRequest) -> Self {
        Self {
            generation,
            streaming: request.is_video(),
            request: Some(request),
            loading: true,
            ..Self::default()
        }
    }

    /// Returns `true` once the channel is closed or errored.
    pub fn channel_ended(&self) -> bool {
        self.channel.as_ref().is_some_and(ConnectionState::is_terminal)
    }

    /// Returns `true` if the session is over without further results coming.
    ///
    /// That is the case after a failed submission or once the channel ended.
    pub fn is_settled(&self) -> bool {
        !self.loading && (self.channel.is_none() || self.channel_ended())
    }
}
