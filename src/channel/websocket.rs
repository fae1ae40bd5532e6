//! WebSocket-backed [`Connector`].
//!
//! The handshake is done by `tokio-tungstenite`; the split stream becomes a
//! [`JobSocketWriter`] for outbound frames and a [`JobSocketReader`] for the
//! inbound pump. Control frames never reach the channel: pings are answered
//! by tungstenite and a close frame ends the read side.

// Rust guideline compliant 2026-02

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{ChannelError, Connector, FrameHalves, FrameReader, FrameWriter};

type JobSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects channels over WebSocket.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, address: &str) -> Result<FrameHalves, ChannelError> {
        let request = address
            .into_client_request()
            .map_err(|e| ChannelError::HandshakeFailed(format!("invalid address {address}: {e}")))?;
        let (socket, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ChannelError::HandshakeFailed(e.to_string()))?;
        log::debug!("WebSocket handshake with {address}: {}", response.status());

        let (sink, stream) = socket.split();
        Ok((
            Box::new(JobSocketWriter { sink }),
            Box::new(JobSocketReader { stream }),
        ))
    }
}

/// Outbound half of a job socket.
#[derive(Debug)]
pub struct JobSocketWriter {
    sink: SplitSink<JobSocket, Message>,
}

#[async_trait]
impl FrameWriter for JobSocketWriter {
    async fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        self.sink
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        // The peer may already be gone; a failed close frame still closes the sink.
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            log::debug!("Close frame not delivered: {e}");
        }
        self.sink
            .close()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }
}

/// Inbound half of a job socket.
#[derive(Debug)]
pub struct JobSocketReader {
    stream: SplitStream<JobSocket>,
}

#[async_trait]
impl FrameReader for JobSocketReader {
    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => {
                    return Some(Ok(String::from_utf8_lossy(&data).into_owned()));
                }
                Ok(Message::Close(frame)) => {
                    match frame {
                        Some(frame) => log::debug!("Peer closed: {} {}", u16::from(frame.code), frame.reason),
                        None => log::debug!("Peer closed without a code"),
                    }
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(ChannelError::ReadFailed(e.to_string()))),
            }
        }
    }
}

/// Convert an HTTP(S) base URL to the matching WS(S) scheme.
///
/// Addresses already using `ws://` or `wss://` pass through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}
