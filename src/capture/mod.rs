//! Frame capture for video sessions.
//!
//! The [`CaptureLoop`] pulls the current frame from a [`FrameSource`] on
//! every tick, rasterises it to the configured size, JPEG-encodes it and
//! sends a `videoFrame` envelope through a [`ChannelSender`].
//!
//! ```text
//! tick ──► FrameSource::capture ──► resize + JPEG ──► data URI
//!                                                      │
//!           ChannelSender::send({type: videoFrame}) ◄──┘
//! ```
//!
//! Sampling and encoding run on the blocking pool and the next tick is only
//! awaited after the send returns, so a slow encoder sheds frames instead of
//! queueing them. Frames sampled while the channel is not open are dropped.

// Rust guideline compliant 2026-02

pub mod command;
pub mod source;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelError, ChannelSender};
use crate::config::Config;
use crate::datauri;
use crate::job::JobRequest;

pub use command::CommandSource;
pub use source::{
    encode_still, load_still, FrameSource, ImageLoopSource, TestPatternSource,
    UnsupportedImageType, INVALID_FILE_TYPE,
};

/// Raster size, quality and cadence for captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Off-screen raster width.
    pub width: u32,
    /// Off-screen raster height.
    pub height: u32,
    /// JPEG quality factor (1-100).
    pub quality: u8,
    /// Delay between ticks.
    pub interval: Duration,
}

impl CaptureConfig {
    /// Capture settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            width: config.frame_width.max(1),
            height: config.frame_height.max(1),
            quality: config.jpeg_quality.clamp(1, 100),
            interval: config.frame_interval(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Resize `frame` to the raster size and encode it as a JPEG data URI.
///
/// # Errors
///
/// Returns an error if JPEG encoding fails.
pub fn encode_frame(frame: &RgbImage, config: &CaptureConfig) -> Result<String> {
    let raster = if frame.dimensions() == (config.width, config.height) {
        frame.clone()
    } else {
        image::imageops::resize(frame, config.width, config.height, FilterType::Triangle)
    };
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, config.quality)
        .encode_image(&raster)
        .context("Failed to encode frame as JPEG")?;
    Ok(datauri::encode("image/jpeg", &jpeg))
}

fn sample(source: &mut dyn FrameSource, config: &CaptureConfig) -> Result<Option<String>> {
    match source.capture()? {
        Some(frame) => encode_frame(&frame, config).map(Some),
        None => Ok(None),
    }
}

/// A running capture loop bound to one video session.
#[derive(Debug)]
pub struct CaptureLoop {
    cancel: CancellationToken,
    frames_sent: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl CaptureLoop {
    /// Start capturing from `source` and sending frames through `sender`.
    ///
    /// The loop runs until [`stop`](Self::stop) is called, `cancel` fires or
    /// the channel reaches a terminal state. The source is released when the
    /// loop exits.
    pub fn spawn(
        source: Box<dyn FrameSource>,
        sender: ChannelSender,
        mode: String,
        config: CaptureConfig,
        cancel: CancellationToken,
    ) -> Self {
        let frames_sent = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(run(
            source,
            sender,
            mode,
            config,
            cancel.clone(),
            Arc::clone(&frames_sent),
        ));
        Self {
            cancel,
            frames_sent,
            task,
        }
    }

    /// Number of frames handed to the channel so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Returns `true` until the loop has exited.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the next tick and wait for the loop to release its source.
    ///
    /// A send already in flight completes; nothing is sent afterwards.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            log::warn!("Capture loop ended abnormally: {e}");
        }
    }
}

/// Release `source` on the blocking pool.
///
/// Releasing may wait for a capture process to exit.
pub async fn release_source(mut source: Box<dyn FrameSource>) {
    if let Err(e) = tokio::task::spawn_blocking(move || source.release()).await {
        log::warn!("Releasing frame source failed: {e}");
    }
}

async fn run(
    source: Box<dyn FrameSource>,
    sender: ChannelSender,
    mode: String,
    config: CaptureConfig,
    cancel: CancellationToken,
    frames_sent: Arc<AtomicU64>,
) {
    log::info!(
        "Capture loop started ({}x{}, quality {}, every {:?})",
        config.width,
        config.height,
        config.quality,
        config.interval
    );
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut held = Some(source);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if sender.is_terminal() {
            log::info!("Channel ended; stopping capture");
            break;
        }
        if !sender.is_open() {
            continue;
        }
        let Some(mut source) = held.take() else {
            break;
        };

        let job = tokio::task::spawn_blocking(move || {
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| sample(source.as_mut(), &config)));
            (source, result)
        });
        let result = match job.await {
            Ok((returned, Ok(result))) => {
                held = Some(returned);
                result
            }
            Ok((returned, Err(_))) => {
                held = Some(returned);
                log::error!("Frame source panicked; stopping capture");
                break;
            }
            Err(e) => {
                log::error!("Frame sampling task failed: {e}");
                break;
            }
        };

        if cancel.is_cancelled() {
            break;
        }

        match result {
            Ok(Some(encoded)) => {
                let envelope = JobRequest::video_frame(encoded, mode.as_str())
                    .to_json()
                    .to_string();
                match sender.send(&envelope).await {
                    Ok(()) => {
                        frames_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(ChannelError::NotOpen) => {}
                    Err(e) => {
                        log::warn!("Stopping capture: {e}");
                        break;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("Frame capture failed: {e:#}"),
        }
    }

    if let Some(source) = held {
        release_source(source).await;
    }
    log::info!(
        "Capture loop stopped after {} frames",
        frames_sent.load(Ordering::Relaxed)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ConnectionState, Connector, FrameHalves, FrameReader, FrameWriter};
    use async_trait::async_trait;
    use image::Rgb;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Default)]
    struct Recorder {
        frames: StdMutex<Vec<String>>,
    }

    #[derive(Debug)]
    struct RecordingWriter(Arc<Recorder>);

    #[async_trait]
    impl FrameWriter for RecordingWriter {
        async fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
            self.0.frames.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct SilentReader;

    #[async_trait]
    impl FrameReader for SilentReader {
        async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
            std::future::pending().await
        }
    }

    #[derive(Debug, Default)]
    struct RecordingConnector(Arc<Recorder>);

    #[async_trait]
    impl Connector for RecordingConnector {
        async fn connect(&self, _address: &str) -> Result<FrameHalves, ChannelError> {
            Ok((
                Box::new(RecordingWriter(Arc::clone(&self.0))),
                Box::new(SilentReader),
            ))
        }
    }

    #[derive(Debug)]
    struct ReleaseTracker {
        inner: TestPatternSource,
        released: Arc<StdMutex<bool>>,
    }

    impl FrameSource for ReleaseTracker {
        fn capture(&mut self) -> Result<Option<RgbImage>> {
            self.inner.capture()
        }

        fn release(&mut self) {
            *self.released.lock().unwrap() = true;
            self.inner.release();
        }
    }

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            width: 32,
            height: 24,
            quality: 80,
            interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_encode_frame_resizes_to_raster() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([200, 10, 10]));
        let uri = encode_frame(&frame, &fast_config()).unwrap();
        let (mime, bytes) = datauri::decode_image(&uri).unwrap();
        assert_eq!(mime, "image/jpeg");
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn test_capture_config_clamps_quality() {
        let config = Config {
            jpeg_quality: 0,
            ..Config::default()
        };
        let capture = CaptureConfig::from_config(&config);
        assert_eq!(capture.quality, 1);
        assert_eq!((capture.width, capture.height), (320, 240));
    }

    #[tokio::test]
    async fn test_loop_sends_video_frames_and_releases_source() {
        let recorder = Arc::new(Recorder::default());
        let connector = RecordingConnector(Arc::clone(&recorder));
        let channel = Channel::open(&connector, "ws://x/1", 1).await.unwrap();
        let released = Arc::new(StdMutex::new(false));
        let source = ReleaseTracker {
            inner: TestPatternSource::new(40, 30),
            released: Arc::clone(&released),
        };

        let capture = CaptureLoop::spawn(
            Box::new(source),
            channel.sender(),
            "edge_detect_".to_string(),
            fast_config(),
            CancellationToken::new(),
        );
        while capture.frames_sent() < 3 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        capture.stop().await;

        assert!(*released.lock().unwrap());
        let frames = recorder.frames.lock().unwrap().clone();
        assert!(frames.len() >= 3);
        let envelope: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(envelope["type"], "videoFrame");
        assert_eq!(envelope["mode"], "edge_detect_");
        assert!(envelope["image"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_loop_exits_when_channel_closes() {
        let recorder = Arc::new(Recorder::default());
        let connector = RecordingConnector(Arc::clone(&recorder));
        let mut channel = Channel::open(&connector, "ws://x/1", 1).await.unwrap();
        let capture = CaptureLoop::spawn(
            Box::new(TestPatternSource::new(8, 8)),
            channel.sender(),
            "inversion_".to_string(),
            fast_config(),
            CancellationToken::new(),
        );
        channel.close().await;
        let sent_at_close = recorder.frames.lock().unwrap().len();

        tokio::time::timeout(Duration::from_secs(5), async {
            while capture.is_running() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        // A send racing the close may have been honoured; nothing after it.
        assert!(recorder.frames.lock().unwrap().len() <= sent_at_close + 1);
    }

    #[tokio::test]
    async fn test_cancel_token_stops_loop() {
        let recorder = Arc::new(Recorder::default());
        let connector = RecordingConnector(Arc::clone(&recorder));
        let channel = Channel::open(&connector, "ws://x/1", 1).await.unwrap();
        let cancel = CancellationToken::new();
        let capture = CaptureLoop::spawn(
            Box::new(TestPatternSource::new(8, 8)),
            channel.sender(),
            "sharpen_".to_string(),
            fast_config(),
            cancel.clone(),
        );
        cancel.cancel();
        capture.stop().await;
        let sent = recorder.frames.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(recorder.frames.lock().unwrap().len(), sent);
    }

    #[derive(Debug)]
    struct PanickingSource {
        released: Arc<StdMutex<bool>>,
    }

    impl FrameSource for PanickingSource {
        fn capture(&mut self) -> Result<Option<RgbImage>> {
            panic!("capture device vanished");
        }

        fn release(&mut self) {
            *self.released.lock().unwrap() = true;
        }
    }

    #[tokio::test]
    async fn test_panicking_source_is_still_released() {
        let recorder = Arc::new(Recorder::default());
        let connector = RecordingConnector(Arc::clone(&recorder));
        let channel = Channel::open(&connector, "ws://x/1", 1).await.unwrap();
        let released = Arc::new(StdMutex::new(false));
        let capture = CaptureLoop::spawn(
            Box::new(PanickingSource {
                released: Arc::clone(&released),
            }),
            channel.sender(),
            "edge_detect_".to_string(),
            fast_config(),
            CancellationToken::new(),
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while capture.is_running() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert!(*released.lock().unwrap());
        assert!(recorder.frames.lock().unwrap().is_empty());
    }

    #[derive(Debug)]
    struct FailingWriter;

    #[async_trait]
    impl FrameWriter for FailingWriter {
        async fn send_text(&mut self, _text: &str) -> Result<(), ChannelError> {
            Err(ChannelError::SendFailed("connection reset".to_string()))
        }

        async fn close(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FailingConnector;

    #[async_trait]
    impl Connector for FailingConnector {
        async fn connect(&self, _address: &str) -> Result<FrameHalves, ChannelError> {
            Ok((Box::new(FailingWriter), Box::new(SilentReader)))
        }
    }

    #[tokio::test]
    async fn test_write_failure_stops_loop() {
        let channel = Channel::open(&FailingConnector, "ws://x/1", 1).await.unwrap();
        let released = Arc::new(StdMutex::new(false));
        let capture = CaptureLoop::spawn(
            Box::new(ReleaseTracker {
                inner: TestPatternSource::new(8, 8),
                released: Arc::clone(&released),
            }),
            channel.sender(),
            "inversion_".to_string(),
            fast_config(),
            CancellationToken::new(),
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while capture.is_running() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(capture.frames_sent(), 0);
        assert!(*released.lock().unwrap());
        assert!(matches!(channel.state(), ConnectionState::Errored(_)));
    }
}
