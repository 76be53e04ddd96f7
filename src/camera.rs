//! Frame source backed by a background grab thread.
//!
//! The grab command writes a single encoded frame to stdout per run; the
//! thread decodes it and replaces the shared latest frame. The monitor loop
//! only ever takes the latest frame, it never waits on the camera.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::config::CameraConfig;
use crate::error::{GuardError, Result};
use crate::types::Frame;

/// Non-blocking access to the most recent frame.
pub trait FrameSource: Send {
    /// Latest decoded frame, `None` until the first one arrives.
    fn latest_frame(&self) -> Option<Frame>;
    /// Stop producing frames and release the device. Idempotent.
    fn stop(&mut self);
}

pub struct CameraManager {
    latest: Arc<Mutex<Option<Frame>>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CameraManager {
    /// Start the grab thread and wait for the first frame.
    /// Fails if nothing arrives within the startup timeout.
    pub fn start(config: &CameraConfig) -> Result<Self> {
        let latest = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));

        let command = config.grab_command.clone();
        let interval = Duration::from_millis(config.grab_interval_ms);
        let thread_latest = latest.clone();
        let thread_running = running.clone();
        let handle = thread::spawn(move || {
            let mut failures = 0u32;
            while thread_running.load(Ordering::SeqCst) {
                match grab_frame(&command) {
                    Ok(frame) => {
                        failures = 0;
                        *thread_latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
                    }
                    Err(e) => {
                        failures += 1;
                        // One warning per burst of failures.
                        if failures == 1 {
                            warn!("frame grab failed: {}", e);
                        }
                    }
                }
                thread::sleep(interval);
            }
            debug!("camera thread exiting");
        });

        let mut camera = Self {
            latest,
            running,
            handle: Some(handle),
        };

        let deadline = Instant::now() + Duration::from_secs(config.startup_timeout_secs);
        while camera.latest_frame().is_none() {
            if Instant::now() >= deadline {
                camera.stop();
                return Err(GuardError::CameraUnavailable(format!(
                    "no frame within {}s",
                    config.startup_timeout_secs
                )));
            }
            thread::sleep(Duration::from_millis(50));
        }
        if let Some(frame) = camera.latest_frame() {
            info!(width = frame.width(), height = frame.height(), "camera started");
        }
        Ok(camera)
    }
}

impl FrameSource for CameraManager {
    fn latest_frame(&self) -> Option<Frame> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!("camera stopped");
        }
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn grab_frame(command: &[String]) -> Result<Frame> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| GuardError::CameraUnavailable("empty grab command".into()))?;
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| GuardError::CameraUnavailable(format!("{}: {}", program, e)))?;
    if !output.status.success() || output.stdout.is_empty() {
        return Err(GuardError::CameraUnavailable(format!(
            "{} exited with {}",
            program, output.status
        )));
    }
    decode_frame(&output.stdout)
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| GuardError::CameraUnavailable(format!("undecodable frame: {}", e)))?;
    Ok(Frame::new(image.to_rgb8()))
}

/// Evidence snapshots, one file per confirmed unknown detection.
pub struct CaptureStore {
    dir: PathBuf,
}

impl CaptureStore {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn save(&self, frame: &Frame) -> Result<PathBuf> {
        let name = format!("intruder_{}.jpg", Local::now().format("%Y%m%d_%H%M%S"));
        let path = self.dir.join(name);
        frame.save(&path)?;
        info!(path = %path.display(), "\u{1f4f8} capture saved");
        Ok(path)
    }
}
