//! Coordinating controller.
//!
//! Owns the arm/disarm state machine and every contended resource handle.
//! All execution contexts (command router, PIR listener, image watch,
//! buzzer timer) reach the camera and the arm state only through this
//! struct, so the locking discipline lives in one place.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::buzzer::{BuzzerHandle, BuzzerSequence, SequenceMode};
use crate::camera::{CameraArbiter, CaptureRequest, CaptureResult};
use crate::config::Config;
use crate::error::Error;
use crate::led::LedControl;
use crate::logging;
use crate::motion::{MotionSource, MotionSourceKind};
use crate::pipeline::CapturePipeline;
use crate::state::{ArmState, DaemonState};
use crate::transport::Transport;

pub struct Controller {
    config: Config,
    state: Arc<RwLock<DaemonState>>,
    arbiter: Arc<CameraArbiter>,
    buzzer: BuzzerHandle,
    led: Option<Arc<LedControl>>,
    motion: MotionSource,
    pipeline: Arc<CapturePipeline>,
    transport: Arc<dyn Transport>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        state: Arc<RwLock<DaemonState>>,
        arbiter: Arc<CameraArbiter>,
        buzzer: BuzzerHandle,
        led: Option<Arc<LedControl>>,
        motion: MotionSource,
        pipeline: Arc<CapturePipeline>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self { config, state, arbiter, buzzer, led, motion, pipeline, transport }
    }

    pub fn kind(&self) -> MotionSourceKind {
        self.motion.kind()
    }

    /// Greet the owners and apply the configured boot state.
    pub async fn startup(&self) {
        for owner in &self.config.owners {
            if let Err(e) = self.transport.send_text(owner, "Hello there, I'm back!").await {
                warn!("could not greet owner {}: {}", owner, e);
            }
        }
        if self.config.general.arm {
            let reply = self.arm().await;
            info!("boot arm: {}", reply);
        }
    }

    /// Disarmed -> Armed. The write lock is held across the motion-source
    /// start so a racing motion event observes either the old or the new
    /// state, never a half-made transition. Start failure leaves the
    /// state unchanged.
    pub async fn arm(&self) -> String {
        let mut state = self.state.write().await;
        if state.is_armed() {
            return "Motion-based capturing already enabled! Nothing to do.".into();
        }
        if self.motion.kind() == MotionSourceKind::None {
            return "Error: neither PIR nor motion daemon is enabled in the configuration.".into();
        }
        match self.motion.start().await {
            Ok(()) => {
                state.arm = ArmState::Armed;
                drop(state);
                self.play_cue(&self.config.buzzer.seq_arm, SequenceMode::OneShot);
                "Motion-based capturing enabled.".into()
            }
            Err(e) => {
                error!("arm failed: {}", e);
                format!("Error: could not start motion source: {e}")
            }
        }
    }

    /// Armed -> Disarmed. Best-effort: stop failures are logged and
    /// escalated inside the source, the transition itself always goes
    /// through. An in-flight capture is allowed to finish its delivery.
    pub async fn disarm(&self) -> String {
        {
            let mut state = self.state.write().await;
            if !state.is_armed() {
                return "Motion-based capturing not enabled! Nothing to do.".into();
            }
            state.arm = ArmState::Disarmed;
        }
        // kill the continuous motion cue before the disarm cue plays
        self.buzzer.cancel();
        self.motion.stop().await;
        self.play_cue(&self.config.buzzer.seq_disarm, SequenceMode::OneShot);
        "Motion-based capturing disabled.".into()
    }

    /// Manual single shot. While the external daemon is armed this is the
    /// pause composite: stop daemon, capture, restart daemon, all under
    /// the camera slot so no motion event can race into the camera.
    pub async fn manual_capture(&self) -> String {
        self.play_cue(&self.config.buzzer.seq_capture, SequenceMode::OneShot);

        let daemon_paused = self.state.read().await.is_armed()
            && self.motion.kind() == MotionSourceKind::ExternalDaemon;

        let (result, restart_note) = if daemon_paused {
            let guard = self.arbiter.pause_motion().await;
            self.motion.stop().await;
            let result = self.arbiter.capture_paused(&guard, CaptureRequest::manual()).await;
            let restart_note = match self.motion.start().await {
                Ok(()) => None,
                Err(e) => {
                    error!("could not restart motion daemon after capture: {}", e);
                    Some(format!(" Warning: motion daemon did not restart: {e}"))
                }
            };
            drop(guard);
            (result, restart_note)
        } else {
            let result = match self.arbiter.capture(CaptureRequest::manual()).await {
                Ok(Some(result)) => Ok(result),
                Ok(None) => Err(Error::CaptureCommand("capture was dropped".into())),
                Err(e) => Err(e),
            };
            (result, None)
        };

        match result {
            Ok(CaptureResult { file_path, .. }) => {
                self.pipeline.deliver(&file_path, "manual capture").await;
                format!("Capture delivered.{}", restart_note.unwrap_or_default())
            }
            Err(e) => {
                error!("manual capture failed: {}", e);
                format!("Error: capture failed: {e}{}", restart_note.unwrap_or_default())
            }
        }
    }

    /// One motion edge from the PIR listener.
    pub async fn motion_event(&self, at: DateTime<Utc>) {
        let armed = {
            let mut state = self.state.write().await;
            if state.is_armed() || self.config.pir.creepy_mode {
                state.last_motion = Some(at);
            }
            state.is_armed()
        };
        if !armed {
            return;
        }
        info!("PIR: motion detected");
        self.play_cue(&self.config.buzzer.seq_motion, SequenceMode::Continuous);
        match self.arbiter.capture(CaptureRequest::motion()).await {
            Ok(Some(result)) => {
                self.pipeline.deliver(&result.file_path, "motion capture").await;
            }
            Ok(None) => {} // dropped during a manual-capture pause
            Err(e) => warn!("motion capture failed: {}", e),
        }
        // motion handled, stop the continuous cue
        self.buzzer.cancel();
    }

    /// The /kill last resort: unconditional name-based kill.
    pub fn kill_motion(&self) -> String {
        match &self.motion {
            MotionSource::ExternalDaemon(daemon) => {
                let count = daemon.kill_by_name();
                format!("Kill signal sent, {count} process(es) hit.")
            }
            _ => "Error: kill is only supported when the motion daemon is enabled.".into(),
        }
    }

    pub async fn status(&self) -> String {
        let state = self.state.read().await;
        let report = state.motion_report();
        if !state.is_armed() {
            return format!("Motion-based capturing not enabled.{report}");
        }
        match &self.motion {
            MotionSource::ExternalDaemon(daemon) => {
                if !self.config.general.image_dir.exists() {
                    return format!(
                        "Error: motion-based capturing enabled but image dir not available!{report}"
                    );
                }
                if daemon.is_running() {
                    format!("Motion-based capturing enabled and motion daemon running.{report}")
                } else {
                    format!(
                        "Error: motion-based capturing enabled but motion daemon not running!{report}"
                    )
                }
            }
            _ => format!("Motion-based capturing enabled.{report}"),
        }
    }

    pub fn led_toggle(&self) -> String {
        let led = match &self.led {
            Some(led) => led,
            None => return "No capture LED configured.".into(),
        };
        match led.toggle() {
            Ok(_) => self.led_status(),
            Err(e) => format!("Error: could not toggle LED: {e}"),
        }
    }

    pub fn led_status(&self) -> String {
        match &self.led {
            Some(led) => format!("Capture LED is {}.", if led.is_on() { "on" } else { "off" }),
            None => "No capture LED configured.".into(),
        }
    }

    pub fn buzzer_cue(&self) -> String {
        if !self.config.buzzer.enable {
            return "No buzzer configured.".into();
        }
        self.play_cue(&self.config.buzzer.seq_buzzer, SequenceMode::OneShot);
        "Buzzer triggered.".into()
    }

    pub fn log_tail(&self) -> String {
        match logging::tail(&self.config.general.log_dir, 100) {
            Ok(tail) if tail.is_empty() => "Log is empty.".into(),
            Ok(tail) => tail,
            Err(e) => format!("Error: could not read log: {e}"),
        }
    }

    /// Force the indicators off. Called once on shutdown; the motion
    /// daemon is deliberately left alone so an armed setup survives a
    /// daemon restart.
    pub async fn shutdown(&self) {
        self.buzzer.cancel();
        if let Some(led) = &self.led {
            if let Err(e) = led.set(false) {
                warn!("could not switch off LED: {}", e);
            }
        }
    }

    fn play_cue(&self, pattern: &str, mode: SequenceMode) {
        if !self.config.buzzer.enable {
            return;
        }
        let tick = Duration::from_millis(self.config.buzzer.tick_ms);
        if let Some(sequence) = BuzzerSequence::parse(pattern, tick, mode) {
            self.buzzer.play(sequence);
        }
    }
}

/// Drive PIR edges into the controller.
pub fn spawn_motion_loop(
    controller: Arc<Controller>,
    mut rx: mpsc::Receiver<DateTime<Utc>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(at) = rx.recv().await {
            controller.motion_event(at).await;
        }
    })
}
