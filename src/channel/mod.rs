//! Streaming channel for one accepted job.
//!
//! A [`Channel`] is a single-use duplex connection scoped to one job
//! acceptance. Its state machine is
//!
//! ```text
//! Connecting ──handshake ok──► Open ──graceful──► Closed
//!      │                         │
//!      └──handshake failed──►    └──abnormal────► Errored
//! ```
//!
//! `Closed` and `Errored` are terminal. The [`ChannelManager`] keeps at most
//! one channel per session and always closes the previous one before a new
//! one is installed.
//!
//! # Architecture
//!
//! ```text
//! Connector::connect(address)
//!     │
//!     ├── FrameWriter ──► Arc<Mutex<..>> ──► ChannelSender (capture loop)
//!     │
//!     └── FrameReader ──► pump task ──► ChannelEvent::{Message, Ended}
//! ```
//!
//! Inbound messages are forwarded in arrival order, each tagged with the
//! generation of the session that opened the channel.

// Rust guideline compliant 2026-02

pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

pub use websocket::{http_to_ws_scheme, WsConnector};

/// Connection state for a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Handshake completed; frames may be sent.
    Open {
        /// When the handshake completed.
        since: DateTime<Utc>,
    },
    /// Closed gracefully (by either side).
    Closed,
    /// Failed abnormally.
    Errored(String),
}

impl ConnectionState {
    /// Returns `true` for `Closed` and `Errored`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored(_))
    }

    /// Returns `true` while frames may be sent.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Errors that can occur during channel operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Handshake failed.
    HandshakeFailed(String),
    /// Send attempted while the channel is not open.
    NotOpen,
    /// Write failed mid-session.
    SendFailed(String),
    /// Read failed mid-session.
    ReadFailed(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HandshakeFailed(msg) => write!(f, "Handshake failed: {msg}"),
            Self::NotOpen => write!(f, "Channel not open"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::ReadFailed(msg) => write!(f, "Read failed: {msg}"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Outbound half of a transport.
#[async_trait]
pub trait FrameWriter: Send + std::fmt::Debug {
    /// Send one text message.
    async fn send_text(&mut self, text: &str) -> Result<(), ChannelError>;

    /// Close the transport gracefully.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Inbound half of a transport.
#[async_trait]
pub trait FrameReader: Send + std::fmt::Debug {
    /// Next inbound text message; `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String, ChannelError>>;
}

/// Writer/reader pair produced by a successful handshake.
pub type FrameHalves = (Box<dyn FrameWriter>, Box<dyn FrameReader>);

/// Performs the transport handshake for a channel address.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Connect to `address`, suspending until the handshake completes.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::HandshakeFailed` if the handshake fails.
    async fn connect(&self, address: &str) -> Result<FrameHalves, ChannelError>;
}

/// Event produced by a channel's inbound pump.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// One inbound message, in arrival order.
    Message {
        /// Generation of the session that owns the channel.
        generation: u64,
        /// Raw message text.
        raw: String,
        /// Arrival timestamp.
        arrived_at: DateTime<Utc>,
    },
    /// The peer closed the channel or the read side failed.
    Ended {
        /// Generation of the session that owns the channel.
        generation: u64,
        /// `None` for a graceful close.
        error: Option<ChannelError>,
    },
}

type SharedWriter = Arc<Mutex<Box<dyn FrameWriter>>>;

/// Move to `next` unless the state is already terminal.
fn transition(state: &watch::Sender<ConnectionState>, next: ConnectionState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() {
            false
        } else {
            *current = next;
            true
        }
    })
}

/// Send capability handed to the capture loop.
///
/// Holds the writer, never the connection itself. A failed write moves the
/// channel to `Errored`, which the inbound pump reports as the channel's end.
#[derive(Clone)]
pub struct ChannelSender {
    state: Arc<watch::Sender<ConnectionState>>,
    writer: SharedWriter,
}

impl std::fmt::Debug for ChannelSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSender")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ChannelSender {
    /// Returns `true` while the channel is open.
    pub fn is_open(&self) -> bool {
        self.state.borrow().is_open()
    }

    /// Returns `true` once the channel is closed or errored.
    pub fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Send one text message.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::NotOpen` unless the channel is open, or
    /// `ChannelError::SendFailed` if the write fails. A failed write leaves
    /// the channel `Errored`.
    pub async fn send(&self, text: &str) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }
        let mut writer = self.writer.lock().await;
        // Closing may have won the lock race.
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }
        let result = writer.send_text(text).await;
        if let Err(e) = &result {
            let detail = match e {
                ChannelError::SendFailed(detail) => detail.clone(),
                other => other.to_string(),
            };
            if transition(&self.state, ConnectionState::Errored(detail)) {
                log::warn!("Channel write failed: {e}");
            }
        }
        result
    }
}

/// One live streaming connection.
pub struct Channel {
    address: String,
    generation: u64,
    state: Arc<watch::Sender<ConnectionState>>,
    writer: SharedWriter,
    reader: Option<Box<dyn FrameReader>>,
    pump: Option<JoinHandle<()>>,
    writer_closed: bool,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("address", &self.address)
            .field("generation", &self.generation)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Open a channel to `address`, suspending until the handshake completes.
    ///
    /// Inbound messages are not read until the channel is started (see
    /// [`ChannelManager::install`]), so nothing is delivered for a channel
    /// that turns out to be stale.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::HandshakeFailed` if the connector fails.
    pub async fn open(
        connector: &dyn Connector,
        address: &str,
        generation: u64,
    ) -> Result<Self, ChannelError> {
        log::debug!("Opening channel {address} (generation {generation})");
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (writer, reader) = connector.connect(address).await?;
        transition(&state, ConnectionState::Open { since: Utc::now() });
        log::info!("Channel open: {address}");
        Ok(Self {
            address: address.to_string(),
            generation,
            state: Arc::new(state),
            writer: Arc::new(Mutex::new(writer)),
            reader: Some(reader),
            pump: None,
            writer_closed: false,
        })
    }

    /// Channel address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Generation of the session that opened the channel.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// When the handshake completed, if the channel is open.
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        match *self.state.borrow() {
            ConnectionState::Open { since } => Some(since),
            _ => None,
        }
    }

    /// Send capability for this channel.
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            state: Arc::clone(&self.state),
            writer: Arc::clone(&self.writer),
        }
    }

    /// Send one text message.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::NotOpen` unless the channel is open.
    pub async fn send(&self, text: &str) -> Result<(), ChannelError> {
        self.sender().send(text).await
    }

    /// Start forwarding inbound messages to `events`. Has no effect twice.
    pub fn start(&mut self, events: mpsc::UnboundedSender<ChannelEvent>) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        self.pump = Some(tokio::spawn(pump(
            self.generation,
            reader,
            Arc::clone(&self.state),
            events,
        )));
    }

    /// Close the channel. Safe to call from any state, any number of times.
    pub async fn close(&mut self) {
        if transition(&self.state, ConnectionState::Closed) {
            log::info!("Channel closed: {}", self.address);
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.reader = None;
        if !self.writer_closed {
            self.writer_closed = true;
            if let Err(e) = self.writer.lock().await.close().await {
                log::debug!("Channel {} close: {e}", self.address);
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn pump(
    generation: u64,
    mut reader: Box<dyn FrameReader>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let mut watcher = state.subscribe();
    loop {
        let next = tokio::select! {
            next = reader.recv() => next,
            ended = watcher.wait_for(ConnectionState::is_terminal) => {
                // A local close ends quietly; a failed write ends the session.
                let failure = match ended.as_deref() {
                    Ok(ConnectionState::Errored(detail)) => Some(detail.clone()),
                    _ => None,
                };
                if let Some(detail) = failure {
                    let _ = events.send(ChannelEvent::Ended {
                        generation,
                        error: Some(ChannelError::SendFailed(detail)),
                    });
                }
                return;
            }
        };
        match next {
            Some(Ok(raw)) => {
                let event = ChannelEvent::Message {
                    generation,
                    raw,
                    arrived_at: Utc::now(),
                };
                if events.send(event).is_err() {
                    log::debug!("Channel event receiver dropped; stopping pump");
                    return;
                }
            }
            Some(Err(e)) => {
                log::warn!("Channel read failed: {e}");
                transition(&state, ConnectionState::Errored(e.to_string()));
                let _ = events.send(ChannelEvent::Ended {
                    generation,
                    error: Some(e),
                });
                return;
            }
            None => {
                log::info!("Channel closed by peer");
                transition(&state, ConnectionState::Closed);
                let _ = events.send(ChannelEvent::Ended {
                    generation,
                    error: None,
                });
                return;
            }
        }
    }
}

/// Owns the session's single live channel.
#[derive(Debug, Default)]
pub struct ChannelManager {
    current: Option<Channel>,
}

impl ChannelManager {
    /// Create a manager with no channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Close any current channel, then open and start a new one.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::HandshakeFailed` if the handshake fails; the
    /// previous channel is closed regardless.
    pub async fn open(
        &mut self,
        connector: &dyn Connector,
        address: &str,
        generation: u64,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<(), ChannelError> {
        self.close().await;
        let channel = Channel::open(connector, address, generation).await?;
        self.install(channel, events).await;
        Ok(())
    }

    /// Make `channel` the current channel and start its inbound pump.
    ///
    /// Any previous channel is closed first.
    pub async fn install(&mut self, mut channel: Channel, events: mpsc::UnboundedSender<ChannelEvent>) {
        self.close().await;
        channel.start(events);
        self.current = Some(channel);
    }

    /// Close and drop the current channel, if any. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut channel) = self.current.take() {
            channel.close().await;
        }
    }

    /// Send over the current channel.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::NotOpen` if there is no open channel.
    pub async fn send(&self, text: &str) -> Result<(), ChannelError> {
        match &self.current {
            Some(channel) => channel.send(text).await,
            None => Err(ChannelError::NotOpen),
        }
    }

    /// Send capability for the current channel.
    pub fn sender(&self) -> Option<ChannelSender> {
        self.current.as_ref().map(Channel::sender)
    }

    /// State of the current channel.
    pub fn state(&self) -> Option<ConnectionState> {
        self.current.as_ref().map(Channel::state)
    }

    /// Open timestamp of the current channel.
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.current.as_ref().and_then(Channel::opened_at)
    }

    /// Generation of the current channel.
    pub fn generation(&self) -> Option<u64> {
        self.current.as_ref().map(Channel::generation)
    }
}
