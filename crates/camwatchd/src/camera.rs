//! Camera arbiter.
//!
//! The physical camera is the one resource that cannot be shared, so all
//! captures are serialized through a single slot. A capture is the unit of
//! mutual exclusion: acquire the slot, illuminate, run the external
//! command, restore, release.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::led::LedControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOrigin {
    Manual,
    MotionTriggered,
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub origin: CaptureOrigin,
    pub requested_at: DateTime<Utc>,
}

impl CaptureRequest {
    pub fn manual() -> Self {
        Self { origin: CaptureOrigin::Manual, requested_at: Utc::now() }
    }

    pub fn motion() -> Self {
        Self { origin: CaptureOrigin::MotionTriggered, requested_at: Utc::now() }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub file_path: PathBuf,
    pub origin: CaptureOrigin,
}

/// Command plus the output file it is expected to produce.
#[derive(Debug, Clone)]
pub struct ShotCommand {
    pub cmd: String,
    pub file: PathBuf,
}

pub struct CameraArbiter {
    slot: Mutex<()>,
    led: Option<Arc<LedControl>>,
    manual: ShotCommand,
    motion: Option<ShotCommand>,
    timeout: Duration,
    motion_paused: AtomicBool,
}

/// Held for the whole stop-daemon / capture / restart-daemon composite.
/// Keeps the slot so nothing else can reach the camera, and flags motion
/// requests for dropping. The flag clears on drop.
pub struct PauseGuard<'a> {
    arbiter: &'a CameraArbiter,
    _slot: MutexGuard<'a, ()>,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.arbiter.motion_paused.store(false, Ordering::SeqCst);
    }
}

impl CameraArbiter {
    pub fn new(
        manual: ShotCommand,
        motion: Option<ShotCommand>,
        led: Option<Arc<LedControl>>,
        timeout: Duration,
    ) -> Self {
        Self {
            slot: Mutex::new(()),
            led,
            manual,
            motion,
            timeout,
            motion_paused: AtomicBool::new(false),
        }
    }

    /// Take one still. Blocks until the slot is free; captures never
    /// overlap. Returns `Ok(None)` for a motion-triggered request that
    /// arrived while the camera was paused for a manual capture; those
    /// are dropped, not queued.
    pub async fn capture(&self, request: CaptureRequest) -> Result<Option<CaptureResult>> {
        if request.origin == CaptureOrigin::MotionTriggered
            && self.motion_paused.load(Ordering::SeqCst)
        {
            info!("dropping motion capture: camera paused for manual capture");
            return Ok(None);
        }
        let _slot = self.slot.lock().await;
        self.run_capture(&request).await.map(Some)
    }

    /// Acquire the slot and flag motion requests for dropping, for the
    /// manual-capture-while-daemon-armed composite.
    pub async fn pause_motion(&self) -> PauseGuard<'_> {
        let slot = self.slot.lock().await;
        self.motion_paused.store(true, Ordering::SeqCst);
        PauseGuard { arbiter: self, _slot: slot }
    }

    /// Capture while already holding the slot through a [`PauseGuard`].
    pub async fn capture_paused(
        &self,
        _guard: &PauseGuard<'_>,
        request: CaptureRequest,
    ) -> Result<CaptureResult> {
        self.run_capture(&request).await
    }

    async fn run_capture(&self, request: &CaptureRequest) -> Result<CaptureResult> {
        let shot = match request.origin {
            CaptureOrigin::Manual => &self.manual,
            CaptureOrigin::MotionTriggered => self
                .motion
                .as_ref()
                .ok_or_else(|| Error::CaptureCommand("no motion capture command configured".into()))?,
        };
        if shot.cmd.is_empty() {
            return Err(Error::CaptureCommand("no capture command configured".into()));
        }

        // stale output from an earlier failed run
        let _ = tokio::fs::remove_file(&shot.file).await;

        // illuminate for the duration of the call, restoring prior state
        let lit = match &self.led {
            Some(led) if !led.is_on() => {
                if let Err(e) = led.set(true) {
                    warn!("could not raise capture LED: {}", e);
                }
                Some(Arc::clone(led))
            }
            _ => None,
        };

        let outcome = self.run_command(&shot.cmd).await;

        if let Some(led) = lit {
            if let Err(e) = led.set(false) {
                warn!("could not restore capture LED: {}", e);
            }
        }
        outcome?;

        if !shot.file.exists() {
            return Err(Error::CaptureCommand(format!(
                "capture file not found: {}",
                shot.file.display()
            )));
        }
        info!("capture complete: {}", shot.file.display());
        Ok(CaptureResult { file_path: shot.file.clone(), origin: request.origin })
    }

    async fn run_command(&self, cmd: &str) -> Result<()> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::CaptureCommand(format!("spawn failed: {e}")))?;

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(Error::CaptureCommand(format!("wait failed: {e}"))),
            Err(_) => {
                let _ = child.kill().await;
                return Err(Error::CaptureCommand(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };
        if !status.success() {
            return Err(Error::CaptureCommand(format!("exited with {status}")));
        }
        Ok(())
    }
}
