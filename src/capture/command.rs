//! Camera frames from an external capture command.
//!
//! The command (for example `ffmpeg -f v4l2 -i /dev/video0 -f mjpeg -`) must
//! write an MJPEG stream to stdout. A reader thread splits the stream into
//! JPEG frames and keeps only the newest one, so sampling always returns the
//! current live frame and a slow consumer never builds a backlog.

use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};

use super::source::FrameSource;

/// Frames larger than this without an end marker are discarded.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

/// Splits a byte stream into complete JPEG images.
#[derive(Debug, Default)]
pub struct MjpegSplitter {
    buf: Vec<u8>,
}

impl MjpegSplitter {
    /// Create an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns every frame completed by them, oldest first.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        loop {
            let Some(start) = find_marker(&self.buf, SOI) else {
                // Keep a trailing 0xFF that may begin the next marker.
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let drop_to = self.buf.len() - keep;
                self.buf.drain(..drop_to);
                break;
            };
            self.buf.drain(..start);
            match find_marker(&self.buf[2..], EOI) {
                Some(end) => {
                    let frame_len = end + 2 + EOI.len();
                    frames.push(self.buf.drain(..frame_len).collect());
                }
                None => {
                    if self.buf.len() > MAX_FRAME_BYTES {
                        log::warn!("Discarding {} bytes without JPEG end marker", self.buf.len());
                        self.buf.clear();
                    }
                    break;
                }
            }
        }
        frames
    }
}

/// Frame source backed by an MJPEG-producing child process.
#[derive(Debug)]
pub struct CommandSource {
    command: String,
    child: Option<Child>,
    latest: Arc<Mutex<Option<Vec<u8>>>>,
    reader: Option<JoinHandle<()>>,
}

impl CommandSource {
    /// Spawn `command` through the shell and start reading its stdout.
    ///
    /// # Errors
    ///
    /// Fails if the process cannot be spawned.
    pub fn spawn(command: &str) -> Result<Self> {
        log::info!("Starting capture command: {command}");
        let mut shell = Command::new("sh");
        shell
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        // Own process group, so release reaches everything the shell starts.
        #[cfg(unix)]
        shell.process_group(0);
        let mut child = shell
            .spawn()
            .with_context(|| format!("Failed to spawn capture command: {command}"))?;
        let stdout = child
            .stdout
            .take()
            .context("Capture command has no stdout")?;

        let latest = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&latest);
        let reader = std::thread::Builder::new()
            .name("mjpeg-reader".to_string())
            .spawn(move || read_frames(stdout, &slot))
            .context("Failed to start MJPEG reader thread")?;

        Ok(Self {
            command: command.to_string(),
            child: Some(child),
            latest,
            reader: Some(reader),
        })
    }
}

fn read_frames(mut stdout: impl Read, slot: &Mutex<Option<Vec<u8>>>) {
    let mut splitter = MjpegSplitter::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if let Some(frame) = splitter.push(&chunk[..n]).pop() {
                    if let Ok(mut latest) = slot.lock() {
                        *latest = Some(frame);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("Capture command read failed: {e}");
                break;
            }
        }
    }
    log::debug!("MJPEG reader finished");
}

impl FrameSource for CommandSource {
    fn capture(&mut self) -> Result<Option<RgbImage>> {
        let frame = match self.latest.lock() {
            Ok(mut latest) => latest.take(),
            Err(_) => anyhow::bail!("capture frame slot poisoned"),
        };
        frame
            .map(|jpeg| {
                image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
                    .map(|img| img.to_rgb8())
                    .context("Failed to decode captured JPEG frame")
            })
            .transpose()
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            log::info!("Stopping capture command: {}", self.command);
            kill_process_group(&mut child);
            if let Err(e) = child.wait() {
                log::debug!("Capture command wait failed: {e}");
            }
        }
        // The reader exits at EOF once the last writer is gone; never wait on it.
        self.reader = None;
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        log::warn!("Capture command pid {} out of range", child.id());
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created at spawn.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        log::debug!(
            "Capture command group already exited: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("Capture command already exited: {e}");
    }
}

impl Drop for CommandSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jpeg(body: &[u8]) -> Vec<u8> {
        let mut frame = SOI.to_vec();
        frame.extend_from_slice(body);
        frame.extend_from_slice(&EOI);
        frame
    }

    #[test]
    fn test_splitter_single_frame() {
        let mut splitter = MjpegSplitter::new();
        let frame = fake_jpeg(b"abc");
        assert_eq!(splitter.push(&frame), vec![frame]);
    }

    #[test]
    fn test_splitter_frame_across_chunks() {
        let mut splitter = MjpegSplitter::new();
        let frame = fake_jpeg(b"hello world");
        let (a, b) = frame.split_at(5);
        assert!(splitter.push(a).is_empty());
        assert_eq!(splitter.push(b), vec![frame]);
    }

    #[test]
    fn test_splitter_marker_split_between_chunks() {
        let mut splitter = MjpegSplitter::new();
        assert!(splitter.push(&[0x00, 0x01, 0xFF]).is_empty());
        let mut rest = vec![0xD8];
        rest.extend_from_slice(b"x");
        rest.extend_from_slice(&EOI);
        assert_eq!(splitter.push(&rest), vec![fake_jpeg(b"x")]);
    }

    #[test]
    fn test_splitter_skips_garbage_and_yields_many() {
        let mut splitter = MjpegSplitter::new();
        let mut stream = b"junk".to_vec();
        stream.extend(fake_jpeg(b"1"));
        stream.extend(b"between");
        stream.extend(fake_jpeg(b"2"));
        assert_eq!(splitter.push(&stream), vec![fake_jpeg(b"1"), fake_jpeg(b"2")]);
    }

    #[test]
    fn test_read_frames_keeps_latest() {
        let mut stream = fake_jpeg(b"old");
        stream.extend(fake_jpeg(b"new"));
        let slot = Mutex::new(None);
        read_frames(std::io::Cursor::new(stream), &slot);
        assert_eq!(slot.lock().unwrap().clone(), Some(fake_jpeg(b"new")));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_source_release_stops_child() {
        let mut source = CommandSource::spawn("exec sleep 30").unwrap();
        assert!(source.capture().unwrap().is_none());
        source.release();
        source.release();
        assert!(source.child.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_release_does_not_wait_for_grandchildren() {
        // Not exec'd: the shell forks sleep, which inherits stdout.
        let mut source = CommandSource::spawn("sleep 30; true").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));
        let started = std::time::Instant::now();
        source.release();
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert!(source.reader.is_none());
    }
}
