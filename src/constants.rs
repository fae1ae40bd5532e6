//! Application-wide constants for cnn-session.
//!
//! Groups the protocol markers, endpoint paths and timing values shared by
//! the submitter, channel, decoder and capture loop.
//!
//! # Categories
//!
//! - **Protocol**: reserved markers and envelope type names
//! - **Timeouts**: network timeouts
//! - **Capture**: frame cadence and encoding defaults

use std::time::Duration;

// ============================================================================
// Protocol
// ============================================================================

/// Prefix that marks a plain informational text line on the channel.
///
/// Any inbound text beginning with this marker bypasses envelope parsing.
pub const INFO_MARKER: &str = "WebSocket";

/// Envelope `type` for client→server video frames.
pub const VIDEO_FRAME_TYPE: &str = "videoFrame";

/// `requestType` value that starts a video session.
pub const VIDEO_STREAM_REQUEST: &str = "videoStream";

/// Default job-creation path for still images.
pub const DEFAULT_TASKS_PATH: &str = "/tasks";

/// Default job-creation path for video sessions.
pub const DEFAULT_OFFER_PATH: &str = "/offer";

/// Mode used when none is selected.
pub const DEFAULT_MODE: &str = "edge_detect_";

/// URI scheme of process-local image handles.
pub const IMAGE_HANDLE_SCHEME: &str = "blob:cnn-session/";

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for job submission.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Capture
// ============================================================================

/// One display refresh at roughly 60 Hz.
///
/// The capture loop waits this long between the end of one send and the
/// next sample, so a slow encoder lowers the frame rate instead of queuing.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Off-screen raster width for captured frames.
pub const FRAME_WIDTH: u32 = 320;

/// Off-screen raster height for captured frames.
pub const FRAME_HEIGHT: u32 = 240;

/// JPEG quality factor (0-100) for captured frames.
pub const JPEG_QUALITY: u8 = 80;
