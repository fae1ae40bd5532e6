//! In-memory doubles for the job submitter and channel connector.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cnn_session::capture::{CaptureConfig, FrameSource, TestPatternSource};
use cnn_session::channel::{ChannelError, Connector, FrameHalves, FrameReader, FrameWriter};
use cnn_session::job::{JobAcceptance, JobRequest, JobSubmitter, SubmissionError};
use cnn_session::{SessionController, SessionState};
use image::RgbImage;
use tokio::sync::mpsc;

/// Smallest valid PNG data URI the service would send back.
pub const PNG_URI: &str = "data:image/png;base64,iVBORw0KGgo=";

/// Acceptance pointing at `address`.
pub fn accepted(address: &str) -> Result<JobAcceptance, SubmissionError> {
    Ok(JobAcceptance {
        channel_address: address.to_string(),
        inline_result: None,
        status_code: 200,
    })
}

/// Submitter answering from a script, in order.
#[derive(Debug, Default)]
pub struct ScriptedSubmitter {
    responses: Mutex<VecDeque<Result<JobAcceptance, SubmissionError>>>,
    requests: Mutex<Vec<JobRequest>>,
}

impl ScriptedSubmitter {
    pub fn new(responses: Vec<Result<JobAcceptance, SubmissionError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::default(),
        })
    }

    pub fn requests(&self) -> Vec<JobRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobSubmitter for ScriptedSubmitter {
    async fn submit(&self, request: &JobRequest) -> Result<JobAcceptance, SubmissionError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SubmissionError::NetworkFailure("script exhausted".to_string())))
    }
}

/// Shared record of connector activity.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
    frames: Mutex<Vec<String>>,
    broken: AtomicBool,
}

impl Journal {
    /// `open <address>` / `close <address>` entries in order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Every text sent over any channel.
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    /// Make every following write fail.
    pub fn fail_sends(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct ScriptedWriter {
    address: String,
    journal: Arc<Journal>,
}

#[async_trait]
impl FrameWriter for ScriptedWriter {
    async fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        if self.journal.broken.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed("broken pipe".to_string()));
        }
        self.journal.frames.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.journal
            .entries
            .lock()
            .unwrap()
            .push(format!("close {}", self.address));
        Ok(())
    }
}

#[derive(Debug)]
struct ScriptedReader(mpsc::UnboundedReceiver<Result<String, ChannelError>>);

#[async_trait]
impl FrameReader for ScriptedReader {
    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        self.0.recv().await
    }
}

/// Connector whose peers are driven by the test.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    pub journal: Arc<Journal>,
    peers: Mutex<Vec<Option<mpsc::UnboundedSender<Result<String, ChannelError>>>>>,
    refuse: AtomicBool,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following handshake fail.
    pub fn refuse(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// Deliver `raw` on connection `index`.
    pub fn push(&self, index: usize, raw: &str) {
        self.send(index, Ok(raw.to_string()));
    }

    /// Fail the read side of connection `index`.
    pub fn fail(&self, index: usize, reason: &str) {
        self.send(index, Err(ChannelError::ReadFailed(reason.to_string())));
    }

    /// Close connection `index` from the peer side.
    pub fn hang_up(&self, index: usize) {
        self.peers.lock().unwrap()[index] = None;
    }

    pub fn connections(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    fn send(&self, index: usize, message: Result<String, ChannelError>) {
        if let Some(peer) = &self.peers.lock().unwrap()[index] {
            let _ = peer.send(message);
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, address: &str) -> Result<FrameHalves, ChannelError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::HandshakeFailed("connection refused".to_string()));
        }
        self.journal
            .entries
            .lock()
            .unwrap()
            .push(format!("open {address}"));
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().unwrap().push(Some(tx));
        Ok((
            Box::new(ScriptedWriter {
                address: address.to_string(),
                journal: Arc::clone(&self.journal),
            }),
            Box::new(ScriptedReader(rx)),
        ))
    }
}

/// Frame source that records whether it was released.
#[derive(Debug)]
pub struct TrackedSource {
    inner: TestPatternSource,
    released: Arc<AtomicBool>,
}

impl TrackedSource {
    pub fn new() -> (Box<Self>, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        (
            Box::new(Self {
                inner: TestPatternSource::new(16, 12),
                released: Arc::clone(&released),
            }),
            released,
        )
    }
}

impl FrameSource for TrackedSource {
    fn capture(&mut self) -> anyhow::Result<Option<RgbImage>> {
        self.inner.capture()
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
        self.inner.release();
    }
}

/// Small, fast capture settings.
pub fn fast_capture() -> CaptureConfig {
    CaptureConfig {
        width: 16,
        height: 12,
        quality: 80,
        interval: Duration::from_millis(1),
    }
}

pub fn controller(
    submitter: &Arc<ScriptedSubmitter>,
    connector: &Arc<ScriptedConnector>,
) -> SessionController {
    SessionController::new(
        Arc::clone(submitter) as Arc<dyn JobSubmitter>,
        Arc::clone(connector) as Arc<dyn Connector>,
        fast_capture(),
    )
}

/// Handle events until `done` holds, failing the test after five seconds.
pub async fn drive(controller: &mut SessionController, done: impl Fn(&SessionState) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), controller.drive_until(done))
        .await
        .expect("session did not reach the expected state");
}

/// Returns `true` once the snapshot's channel is open.
pub fn channel_open(state: &SessionState) -> bool {
    state.channel.as_ref().is_some_and(|c| c.is_open())
}
