//! Job submission.
//!
//! A [`JobRequest`] is POSTed to the processing service, which answers with
//! a [`JobAcceptance`] naming the streaming channel for the job and,
//! sometimes, an inline [`MatrixBundle`]. The submitter never touches
//! session state; the controller applies what it returns.
//!
//! # Wire format
//!
//! ```text
//! POST /tasks   {"image": "data:image/png;base64,...", "mode": "edge_detect_"}
//! POST /offer   {"requestType": "videoStream", "mode": "edge_detect_"}
//!
//! 200 OK        {"websocket_url": "ws://host/ws/<id>", "response_status": 200,
//!                "tempA"?, "tempB"?, "Ib"?, "start"?, "end"?}
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::Config;
use crate::constants::{VIDEO_FRAME_TYPE, VIDEO_STREAM_REQUEST};
use crate::matrix::MatrixBundle;

/// What kind of job a request describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// One still image.
    Still,
    /// Start of a live video session (no image).
    VideoStart,
    /// One frame of a live video session, sent over the channel.
    VideoFrame,
}

/// Job Request.
///
/// Constructors enforce that an encoded image is present for `Still` and
/// `VideoFrame` and absent for `VideoStart`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    encoded_image: Option<String>,
    mode: String,
    kind: SessionKind,
}

impl JobRequest {
    /// Still-image job.
    pub fn still(encoded_image: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            encoded_image: Some(encoded_image.into()),
            mode: mode.into(),
            kind: SessionKind::Still,
        }
    }

    /// Video session start.
    pub fn video_start(mode: impl Into<String>) -> Self {
        Self {
            encoded_image: None,
            mode: mode.into(),
            kind: SessionKind::VideoStart,
        }
    }

    /// One captured video frame.
    pub fn video_frame(encoded_image: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            encoded_image: Some(encoded_image.into()),
            mode: mode.into(),
            kind: SessionKind::VideoFrame,
        }
    }

    /// Encoded image data URI, if any.
    pub fn encoded_image(&self) -> Option<&str> {
        self.encoded_image.as_deref()
    }

    /// Processing mode identifier.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Session kind.
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Returns `true` for video start and video frame requests.
    pub fn is_video(&self) -> bool {
        matches!(self.kind, SessionKind::VideoStart | SessionKind::VideoFrame)
    }

    /// JSON body (HTTP) or envelope (channel) for this request.
    pub fn to_json(&self) -> Value {
        let image = self.encoded_image.as_deref().unwrap_or_default();
        match self.kind {
            SessionKind::Still => json!({
                "image": image,
                "mode": self.mode,
            }),
            SessionKind::VideoStart => json!({
                "requestType": VIDEO_STREAM_REQUEST,
                "mode": self.mode,
            }),
            SessionKind::VideoFrame => json!({
                "type": VIDEO_FRAME_TYPE,
                "mode": self.mode,
                "image": image,
            }),
        }
    }
}

/// Job Acceptance.
#[derive(Debug, Clone, PartialEq)]
pub struct JobAcceptance {
    /// Streaming channel address for this job.
    pub channel_address: String,
    /// Bundle returned inline with the acceptance, if any.
    pub inline_result: Option<MatrixBundle>,
    /// `response_status` reported by the service.
    pub status_code: u16,
}

impl JobAcceptance {
    /// Interpret a job-creation response body.
    ///
    /// `http_status` is used when the body carries no `response_status`.
    /// A path-only `websocket_url` is resolved against `server_url`.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::MalformedResponse` if the body is not an
    /// object or has no string `websocket_url`.
    pub fn from_response(
        body: &Value,
        http_status: u16,
        server_url: &str,
    ) -> Result<Self, SubmissionError> {
        let object = body.as_object().ok_or_else(|| {
            SubmissionError::MalformedResponse("response body is not an object".to_string())
        })?;
        let address = object
            .get("websocket_url")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                SubmissionError::MalformedResponse("missing websocket_url".to_string())
            })?;
        let status_code = object
            .get("response_status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(http_status);

        let inline_result = match MatrixBundle::from_fields(object) {
            Ok(bundle) => bundle,
            Err(e) => {
                log::warn!("Ignoring malformed inline matrix bundle: {e}");
                None
            }
        };

        Ok(Self {
            channel_address: resolve_channel_address(address, server_url),
            inline_result,
            status_code,
        })
    }
}

/// Resolve a channel address that may be a bare path.
pub fn resolve_channel_address(address: &str, server_url: &str) -> String {
    if address.starts_with('/') {
        format!(
            "{}{}",
            crate::channel::http_to_ws_scheme(server_url.trim_end_matches('/')),
            address
        )
    } else {
        address.to_string()
    }
}

/// Errors from job submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// Transport failure (DNS, connect, timeout, body read).
    NetworkFailure(String),
    /// Service answered with a non-success status.
    ServerRejected(u16),
    /// Success status but the body could not be interpreted.
    MalformedResponse(String),
}

impl SubmissionError {
    /// Status code to show alongside the failure notification.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ServerRejected(code) => *code,
            Self::NetworkFailure(_) | Self::MalformedResponse(_) => 500,
        }
    }
}

impl std::fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NetworkFailure(msg) => write!(f, "Network failure: {msg}"),
            Self::ServerRejected(code) => write!(f, "Server rejected job with status {code}"),
            Self::MalformedResponse(msg) => write!(f, "Malformed job response: {msg}"),
        }
    }
}

impl std::error::Error for SubmissionError {}

/// Submits jobs to the processing service.
#[async_trait]
pub trait JobSubmitter: Send + Sync + std::fmt::Debug {
    /// Submit one job and wait for its acceptance.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::NetworkFailure` on transport failure and
    /// `SubmissionError::ServerRejected` on a non-success status.
    async fn submit(&self, request: &JobRequest) -> Result<JobAcceptance, SubmissionError>;
}

/// HTTP job submitter backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpJobSubmitter {
    client: Client,
    config: Config,
}

impl HttpJobSubmitter {
    /// Create a submitter from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.http_timeout()).build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create a submitter with a pre-configured HTTP client.
    pub fn with_client(client: Client, config: &Config) -> Self {
        Self {
            client,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl JobSubmitter for HttpJobSubmitter {
    async fn submit(&self, request: &JobRequest) -> Result<JobAcceptance, SubmissionError> {
        let url = self.config.endpoint(request.kind());
        log::info!("Submitting {:?} job (mode {}) to {url}", request.kind(), request.mode());

        let response = self
            .client
            .post(&url)
            .json(&request.to_json())
            .send()
            .await
            .map_err(|e| SubmissionError::NetworkFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("Job submission rejected: {status}");
            return Err(SubmissionError::ServerRejected(status.as_u16()));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_decode() {
                SubmissionError::MalformedResponse(e.to_string())
            } else {
                SubmissionError::NetworkFailure(e.to_string())
            }
        })?;

        let acceptance = JobAcceptance::from_response(&body, status.as_u16(), &self.config.server_url)?;
        log::info!(
            "Job accepted (status {}), channel {}",
            acceptance.status_code,
            acceptance.channel_address
        );
        Ok(acceptance)
    }
}
