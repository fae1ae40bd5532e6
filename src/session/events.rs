//! Events and commands for the session event loop.
//!
//! Spawned pipeline tasks report back through one
//! `mpsc::UnboundedSender<SessionEvent>`; channel pumps report through a
//! second sender carrying [`ChannelEvent`]s. Every event names the
//! generation it belongs to, and the controller drops events from
//! superseded generations.

// Rust guideline compliant 2026-02

use crate::capture::FrameSource;
use crate::channel::{Channel, ChannelError, ChannelEvent};
use crate::job::{JobAcceptance, SubmissionError};

/// Completion of one step of a submission pipeline.
#[derive(Debug)]
pub enum SessionEvent {
    /// The job submitter answered.
    Submitted {
        /// Generation of the submission.
        generation: u64,
        /// Acceptance or failure.
        result: Result<JobAcceptance, SubmissionError>,
    },

    /// The channel handshake completed. The channel is not reading yet.
    ChannelOpened {
        /// Generation of the submission.
        generation: u64,
        /// The open channel, to be installed by the controller.
        channel: Channel,
    },

    /// The channel handshake failed.
    ChannelFailed {
        /// Generation of the submission.
        generation: u64,
        /// Why.
        error: ChannelError,
    },
}

impl SessionEvent {
    /// Generation the event belongs to.
    pub fn generation(&self) -> u64 {
        match self {
            Self::Submitted { generation, .. }
            | Self::ChannelOpened { generation, .. }
            | Self::ChannelFailed { generation, .. } => *generation,
        }
    }
}

/// Anything the controller's event loop can wake up for.
#[derive(Debug)]
pub(crate) enum Input {
    Pipeline(SessionEvent),
    Channel(ChannelEvent),
}

/// Requests from presentation collaborators to a running controller.
#[derive(Debug)]
pub enum SessionCommand {
    /// Submit a still image (data URI) with a mode.
    SubmitStill {
        /// Encoded image data URI.
        encoded_image: String,
        /// Processing mode.
        mode: String,
    },
    /// Start a video session, or stop the current one.
    ToggleVideo {
        /// Processing mode.
        mode: String,
        /// Live frame source for the capture loop.
        source: Box<dyn FrameSource>,
    },
    /// Stop the current session.
    Stop,
    /// Clear the notification banner.
    DismissNotification,
    /// Stop, release every handle and exit the event loop.
    Shutdown,
}
