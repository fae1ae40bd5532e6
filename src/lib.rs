//! CNN Session - processing session client.
//!
//! Submits still images or live camera streams to a remote image-processing
//! service and follows the results over a per-job streaming channel.
//!
//! # Architecture
//!
//! The crate is built around one controller that owns all session state:
//!
//! - **SessionController** - Submits jobs, owns the channel and capture loop,
//!   publishes immutable [`SessionState`] snapshots
//! - **Job Submitter** - POSTs job requests, returns the channel address
//! - **Channel** - One WebSocket per accepted job, inbound pump, send capability
//! - **Protocol** - Classifies inbound messages and decodes embedded images
//! - **Capture** - Frame sources and the cancellable video capture loop
//!
//! # Modules
//!
//! - [`session`] - Session state, events and the controller
//! - [`job`] - Job requests and HTTP submission
//! - [`channel`] - Channel state machine and WebSocket connector
//! - [`protocol`] - Inbound message decoding
//! - [`capture`] - Frame sources and the capture loop
//! - [`view`] - Plain-text rendering of snapshots
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod capture;
pub mod channel;
pub mod job;
pub mod protocol;
pub mod session;
pub mod view;

pub mod config;
pub mod constants;
pub mod datauri;
pub mod env;
pub mod images;
pub mod matrix;
pub mod modes;

// Re-export commonly used types
pub use channel::{ChannelManager, ConnectionState, WsConnector};
pub use config::Config;
pub use job::{HttpJobSubmitter, JobRequest, SessionKind};
pub use matrix::MatrixBundle;
pub use protocol::{InboundMessage, MessageKind};
pub use session::{SessionCommand, SessionController, SessionState};
