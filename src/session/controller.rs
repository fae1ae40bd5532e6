//! Processing session controller.
//!
//! The [`SessionController`] owns the session state, the channel manager,
//! the image store and the capture loop. It runs on one cooperative event
//! loop: submissions and channel handshakes are spawned as pipeline tasks
//! that report back as [`SessionEvent`]s, and channel pumps report inbound
//! messages as [`ChannelEvent`]s. Handlers are serialized by the loop, so
//! state needs no locking.
//!
//! Each submission starts a new generation. Anything still in flight for
//! an older generation is discarded when it arrives, so a late response
//! from a superseded session never touches current state.
//!
//! ```text
//! submit_still / toggle_video
//!     │  generation += 1, close previous channel, release handles
//!     ▼
//! pipeline task: submit ──► Submitted ──► Channel::open ──► ChannelOpened
//!                                                     └──► ChannelFailed
//! controller: install channel ──► pump ──► ChannelEvent::Message ──► decode
//!             (video) CaptureLoop::spawn(sender)
//! ```

// Rust guideline compliant 2026-02

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::{Input, SessionCommand, SessionEvent};
use super::state::{Notification, SessionState};
use crate::capture::{self, CaptureConfig, CaptureLoop, FrameSource, UnsupportedImageType};
use crate::channel::{Channel, ChannelError, ChannelEvent, ChannelManager, ConnectionState, Connector};
use crate::images::ImageStore;
use crate::job::{JobAcceptance, JobRequest, JobSubmitter, SessionKind, SubmissionError};
use crate::protocol::{self, Outcome};

const STILL_ACCEPTED: &str = "Upload successful!";
const STILL_REJECTED: &str = "Failed to upload image";
const STILL_UNREACHABLE: &str = "Error uploading to server.";
const VIDEO_ACCEPTED: &str = "Video stream started successfully!";
const VIDEO_REJECTED: &str = "Failed to initialize video stream";
const VIDEO_UNREACHABLE: &str = "Error connecting to server.";
const STREAM_STOPPED: &str = "Video stream stopped.";
const CHANNEL_CLOSED: &str = "WebSocket closed.";

/// Result of [`SessionController::toggle_video`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoToggle {
    /// A new video session was submitted with this generation.
    Started(u64),
    /// The running video session was stopped.
    Stopped,
}

/// Drives one processing session at a time.
pub struct SessionController {
    submitter: Arc<dyn JobSubmitter>,
    connector: Arc<dyn Connector>,
    capture_config: CaptureConfig,
    channels: ChannelManager,
    images: ImageStore,
    capture: Option<CaptureLoop>,
    pending_source: Option<Box<dyn FrameSource>>,
    pipeline: Option<JoinHandle<()>>,
    session_token: CancellationToken,
    generation: u64,
    opened_at: Option<DateTime<Utc>>,
    state: SessionState,
    snapshots: watch::Sender<Arc<SessionState>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    channel_tx: mpsc::UnboundedSender<ChannelEvent>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("generation", &self.generation)
            .field("channel", &self.channels)
            .field("capturing", &self.capture.is_some())
            .field("live_images", &self.images.live_count())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Create a controller with no session.
    pub fn new(
        submitter: Arc<dyn JobSubmitter>,
        connector: Arc<dyn Connector>,
        capture_config: CaptureConfig,
    ) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(SessionState::default()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        Self {
            submitter,
            connector,
            capture_config,
            channels: ChannelManager::new(),
            images: ImageStore::new(),
            capture: None,
            pending_source: None,
            pipeline: None,
            session_token: CancellationToken::new(),
            generation: 0,
            opened_at: None,
            state: SessionState::default(),
            snapshots,
            events_tx,
            events_rx,
            channel_tx,
            channel_rx,
        }
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionState>> {
        self.snapshots.subscribe()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<SessionState> {
        Arc::clone(&*self.snapshots.borrow())
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of image handles still resolvable.
    pub fn live_images(&self) -> usize {
        self.images.live_count()
    }

    /// Image store, for resolving handles from the snapshot.
    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    fn publish(&self) {
        self.snapshots.send_replace(Arc::new(self.state.clone()));
    }

    /// Submit a still image. Supersedes any current session.
    ///
    /// Returns the generation of the new session.
    pub async fn submit_still(&mut self, encoded_image: String, mode: &str) -> u64 {
        self.begin(JobRequest::still(encoded_image, mode), None).await
    }

    /// Load a still from disk and submit it.
    ///
    /// A file that is not PNG, JPEG or GIF raises a 400 notification and
    /// leaves the current session untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or has the wrong type.
    pub async fn submit_still_file(&mut self, path: &Path, mode: &str) -> anyhow::Result<u64> {
        match capture::load_still(path) {
            Ok(encoded) => Ok(self.submit_still(encoded, mode).await),
            Err(e) => {
                if e.downcast_ref::<UnsupportedImageType>().is_some() {
                    self.state.notification =
                        Some(Notification::new(capture::INVALID_FILE_TYPE, Some(400)));
                    self.publish();
                }
                Err(e)
            }
        }
    }

    /// Start a video session with `source`, or stop the running one.
    ///
    /// Toggling while a video session is active stops it; `source` is then
    /// released unused.
    pub async fn toggle_video(&mut self, mode: &str, source: Box<dyn FrameSource>) -> VideoToggle {
        if self.state.streaming {
            capture::release_source(source).await;
            self.stop().await;
            return VideoToggle::Stopped;
        }
        let generation = self
            .begin(JobRequest::video_start(mode), Some(source))
            .await;
        VideoToggle::Started(generation)
    }

    async fn begin(&mut self, request: JobRequest, source: Option<Box<dyn FrameSource>>) -> u64 {
        self.teardown().await;
        self.images.release_all();
        self.generation += 1;
        let generation = self.generation;
        log::info!(
            "Starting session {generation}: {:?} (mode {})",
            request.kind(),
            request.mode()
        );

        self.session_token = CancellationToken::new();
        self.pending_source = source;
        self.opened_at = None;
        self.state = SessionState::begin(generation, request.clone());
        self.publish();

        self.pipeline = Some(tokio::spawn(pipeline(
            generation,
            request,
            Arc::clone(&self.submitter),
            Arc::clone(&self.connector),
            self.events_tx.clone(),
        )));
        generation
    }

    /// Cancel in-flight work for the current generation, stop capture and
    /// close the channel.
    async fn teardown(&mut self) {
        self.session_token.cancel();
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.abort();
        }
        if let Some(capture) = self.capture.take() {
            capture.stop().await;
        }
        if let Some(source) = self.pending_source.take() {
            capture::release_source(source).await;
        }
        self.channels.close().await;
    }

    /// Stop the current session.
    ///
    /// The capture loop's next tick is cancelled, the channel closed and
    /// the frame source released. The last image stays visible.
    pub async fn stop(&mut self) {
        self.teardown().await;
        // Bump so queued completions of the stopped session are dropped.
        self.generation += 1;
        self.state.loading = false;
        if let Some(channel) = self.state.channel.as_mut() {
            if !channel.is_terminal() {
                *channel = ConnectionState::Closed;
            }
        }
        if self.state.streaming {
            self.state.streaming = false;
            self.state.activity.push(STREAM_STOPPED.to_string());
        }
        log::debug!("Session stopped (now generation {})", self.generation);
        self.publish();
    }

    /// Clear the notification banner.
    pub fn dismiss_notification(&mut self) {
        if self.state.notification.take().is_some() {
            self.publish();
        }
    }

    /// Stop the session and release every image handle.
    pub async fn shutdown(&mut self) {
        self.stop().await;
        self.images.release_all();
        self.state.image = None;
        self.publish();
        log::info!("Session controller shut down");
    }

    /// Apply one collaborator command. Returns `false` for `Shutdown`.
    pub async fn apply(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::SubmitStill {
                encoded_image,
                mode,
            } => {
                self.submit_still(encoded_image, &mode).await;
            }
            SessionCommand::ToggleVideo { mode, source } => {
                self.toggle_video(&mode, source).await;
            }
            SessionCommand::Stop => self.stop().await,
            SessionCommand::DismissNotification => self.dismiss_notification(),
            SessionCommand::Shutdown => {
                self.shutdown().await;
                return false;
            }
        }
        true
    }

    /// Run the event loop until `Shutdown` arrives or every command sender
    /// is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        log::info!("Session event loop starting");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.apply(command).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                input = self.next_input() => self.handle_input(input).await,
            }
        }
        log::info!("Session event loop exiting");
    }

    /// Wait for and handle the next pipeline or channel event.
    pub async fn process_next(&mut self) {
        let input = self.next_input().await;
        self.handle_input(input).await;
    }

    /// Handle events until `done` holds for the current state.
    pub async fn drive_until(&mut self, done: impl Fn(&SessionState) -> bool) {
        while !done(&self.state) {
            self.process_next().await;
        }
    }

    async fn next_input(&mut self) -> Input {
        // Both senders live in `self`, so neither receiver can close.
        tokio::select! {
            Some(event) = self.events_rx.recv() => Input::Pipeline(event),
            Some(event) = self.channel_rx.recv() => Input::Channel(event),
            else => std::future::pending().await,
        }
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Pipeline(event) => self.handle_session_event(event).await,
            Input::Channel(event) => self.handle_channel_event(event).await,
        }
    }

    /// Apply one pipeline event.
    pub async fn handle_session_event(&mut self, event: SessionEvent) {
        if event.generation() != self.generation {
            log::debug!(
                "Discarding stale pipeline event from generation {} (current {})",
                event.generation(),
                self.generation
            );
            if let SessionEvent::ChannelOpened { mut channel, .. } = event {
                channel.close().await;
            }
            return;
        }

        match event {
            SessionEvent::Submitted { result, .. } => self.on_submitted(result).await,
            SessionEvent::ChannelOpened { channel, .. } => self.on_channel_opened(channel).await,
            SessionEvent::ChannelFailed { error, .. } => self.on_channel_failed(&error).await,
        }
        self.publish();
    }

    fn session_kind(&self) -> Option<SessionKind> {
        self.state.request.as_ref().map(JobRequest::kind)
    }

    async fn on_submitted(&mut self, result: Result<JobAcceptance, SubmissionError>) {
        self.state.loading = false;
        let video = self.session_kind() == Some(SessionKind::VideoStart);
        match result {
            Ok(acceptance) => {
                self.state.response_status = Some(acceptance.status_code);
                if let Some(bundle) = acceptance.inline_result {
                    log::debug!("Applying inline matrix bundle");
                    self.state.matrices = Some(bundle);
                }
                self.state.channel = Some(ConnectionState::Connecting);
                let text = if video { VIDEO_ACCEPTED } else { STILL_ACCEPTED };
                self.state.notification = Some(Notification::new(text, Some(200)));
            }
            Err(e) => {
                log::warn!("Submission failed: {e}");
                let status = e.status_code();
                self.state.response_status = Some(status);
                let text = match (&e, video) {
                    (SubmissionError::ServerRejected(_), false) => STILL_REJECTED,
                    (SubmissionError::ServerRejected(_), true) => VIDEO_REJECTED,
                    (_, false) => STILL_UNREACHABLE,
                    (_, true) => VIDEO_UNREACHABLE,
                };
                self.state.notification = Some(Notification::new(text, Some(status)));
                self.end_streaming().await;
            }
        }
    }

    async fn on_channel_opened(&mut self, channel: Channel) {
        self.opened_at = channel.opened_at();
        self.state.channel = Some(channel.state());
        self.channels.install(channel, self.channel_tx.clone()).await;

        if let Some(source) = self.pending_source.take() {
            match self.channels.sender() {
                Some(sender) => {
                    let mode = self
                        .state
                        .request
                        .as_ref()
                        .map(|r| r.mode().to_string())
                        .unwrap_or_default();
                    self.capture = Some(CaptureLoop::spawn(
                        source,
                        sender,
                        mode,
                        self.capture_config,
                        self.session_token.child_token(),
                    ));
                }
                None => capture::release_source(source).await,
            }
        }
    }

    async fn on_channel_failed(&mut self, error: &ChannelError) {
        log::warn!("Channel failed: {error}");
        self.state.channel = Some(ConnectionState::Errored(error.to_string()));
        self.state.activity.push(format!("WebSocket error: {error}"));
        self.state.notification = Some(Notification::new(VIDEO_UNREACHABLE, Some(500)));
        self.end_streaming().await;
    }

    async fn end_streaming(&mut self) {
        if let Some(source) = self.pending_source.take() {
            capture::release_source(source).await;
        }
        if self.state.streaming {
            self.state.streaming = false;
            self.state.activity.push(STREAM_STOPPED.to_string());
        }
    }

    /// Apply one channel event.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message {
                generation,
                raw,
                arrived_at,
            } => {
                if generation != self.generation {
                    log::debug!("Discarding message from stale generation {generation}");
                    return;
                }
                self.on_message(&raw, arrived_at);
            }
            ChannelEvent::Ended { generation, error } => {
                if generation != self.generation {
                    log::debug!("Discarding channel end from stale generation {generation}");
                    return;
                }
                self.on_channel_ended(error).await;
            }
        }
        self.publish();
    }

    fn on_message(&mut self, raw: &str, arrived_at: DateTime<Utc>) {
        let decoded = protocol::decode(raw, arrived_at);
        log::debug!("Inbound {} message", decoded.message.kind);
        match decoded.outcome {
            Outcome::Logged => {}
            Outcome::Image(payload) => {
                let image = self.images.register(payload.mime_type, payload.bytes);
                if let Some(previous) = self.state.image.replace(image) {
                    self.images.release(&previous.handle);
                }
                self.state.elapsed = Some(elapsed_since(self.opened_at, arrived_at));
            }
            Outcome::Matrices(bundle) => self.state.matrices = Some(bundle),
            Outcome::Alert(text) => {
                self.state.notification = Some(Notification::new(text, None));
            }
        }
        self.state.messages.push(decoded.message);
    }

    async fn on_channel_ended(&mut self, error: Option<ChannelError>) {
        if let Some(capture) = self.capture.take() {
            capture.stop().await;
        }
        self.state.channel = self.channels.state();
        match error {
            Some(e) => {
                self.state.activity.push(format!("WebSocket error: {e}"));
                if self.state.channel.is_none() {
                    self.state.channel = Some(ConnectionState::Errored(e.to_string()));
                }
            }
            None => {
                self.state.activity.push(CHANNEL_CLOSED.to_string());
                if self.state.channel.is_none() {
                    self.state.channel = Some(ConnectionState::Closed);
                }
            }
        }
        self.state.streaming = false;
    }
}

/// Arrival time minus channel open time, never negative.
fn elapsed_since(opened_at: Option<DateTime<Utc>>, arrived_at: DateTime<Utc>) -> Duration {
    opened_at
        .and_then(|opened| (arrived_at - opened).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

/// Submit, then open the channel, reporting each step.
async fn pipeline(
    generation: u64,
    request: JobRequest,
    submitter: Arc<dyn JobSubmitter>,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let result = submitter.submit(&request).await;
    let address = result.as_ref().ok().map(|a| a.channel_address.clone());
    if events.send(SessionEvent::Submitted { generation, result }).is_err() {
        return;
    }
    let Some(address) = address else {
        return;
    };

    let event = match Channel::open(connector.as_ref(), &address, generation).await {
        Ok(channel) => SessionEvent::ChannelOpened {
            generation,
            channel,
        },
        Err(error) => SessionEvent::ChannelFailed { generation, error },
    };
    if events.send(event).is_err() {
        log::debug!("Controller gone; dropping channel for generation {generation}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_is_clamped() {
        let now = Utc::now();
        let later = now + chrono::Duration::milliseconds(1500);
        assert_eq!(elapsed_since(Some(now), later), Duration::from_millis(1500));
        assert_eq!(elapsed_since(Some(later), now), Duration::ZERO);
        assert_eq!(elapsed_since(None, now), Duration::ZERO);
    }
}
