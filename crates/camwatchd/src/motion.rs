//! Motion event sources.
//!
//! Two interchangeable variants behind one start/stop contract: a PIR
//! sensor polled for rising edges, and an external motion-detection
//! daemon supervised as a black-box process. The state machine neither
//! knows nor cares which one is active.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{MotionConfig, PirConfig};
use crate::error::{Error, Result};
use crate::gpio::Gpio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionSourceKind {
    None,
    Pir,
    ExternalDaemon,
}

impl MotionSourceKind {
    pub fn from_config(pir: &PirConfig, motion: &MotionConfig) -> Self {
        // mutual exclusion is enforced at config load
        if pir.enable {
            Self::Pir
        } else if motion.enable {
            Self::ExternalDaemon
        } else {
            Self::None
        }
    }
}

/// Process collaborator seam. The real implementation signals through the
/// kernel; tests inject a fake to exercise the stop escalation.
pub trait ProcessControl: Send + Sync {
    fn terminate(&self, pid: i32) -> Result<()>;
    fn kill(&self, pid: i32) -> Result<()>;
    fn is_alive(&self, pid: i32) -> bool;
    /// Last-resort kill of every process matching `name`. Returns how
    /// many were signalled.
    fn kill_by_name(&self, name: &str) -> usize;
}

pub struct SystemProcessControl;

impl ProcessControl for SystemProcessControl {
    fn terminate(&self, pid: i32) -> Result<()> {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGTERM)
            .map_err(|e| Error::Io(std::io::Error::from_raw_os_error(e as i32)))
    }

    fn kill(&self, pid: i32) -> Result<()> {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGKILL)
            .map_err(|e| Error::Io(std::io::Error::from_raw_os_error(e as i32)))
    }

    fn is_alive(&self, pid: i32) -> bool {
        Path::new(&format!("/proc/{pid}")).exists()
    }

    fn kill_by_name(&self, name: &str) -> usize {
        let mut system = sysinfo::System::new();
        system.refresh_processes();
        let mut count = 0;
        for process in system.processes().values() {
            if process.name() == name && process.kill() {
                count += 1;
            }
        }
        count
    }
}

/// Stop escalation: graceful signal, bounded wait, forced signal, bounded
/// wait, then the name-based sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopPhase {
    Terminate,
    ForceKill,
    KillByName,
}

/// Supervisor for the external motion daemon.
pub struct DaemonSupervisor {
    config: MotionConfig,
    control: Arc<dyn ProcessControl>,
}

impl DaemonSupervisor {
    pub fn new(config: MotionConfig, control: Arc<dyn ProcessControl>) -> Self {
        Self { config, control }
    }

    pub fn read_pid(&self) -> Option<i32> {
        let raw = std::fs::read_to_string(&self.config.pid_file).ok()?;
        raw.trim().parse().ok()
    }

    pub fn is_running(&self) -> bool {
        self.read_pid().map(|pid| self.control.is_alive(pid)).unwrap_or(false)
    }

    /// Launch the daemon and poll its PID file until a live process shows
    /// up, bounded by `start_timeout_secs`.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            info!("motion daemon already running");
            return Ok(());
        }
        if self.config.cmd.is_empty() {
            return Err(Error::MotionSourceStart("no motion daemon command configured".into()));
        }

        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.config.cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::MotionSourceStart(format!("spawn failed: {e}")))?;
        if !status.success() {
            return Err(Error::MotionSourceStart(format!("launcher exited with {status}")));
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.start_timeout_secs);
        loop {
            if self.is_running() {
                info!("motion daemon up (pid {:?})", self.read_pid());
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::DaemonStartTimeout {
                    pid_file: self.config.pid_file.clone(),
                    timeout_secs: self.config.start_timeout_secs,
                });
            }
            sleep(Duration::from_millis(200)).await;
        }
    }

    /// Best-effort stop. Never fails: every escalation step is logged and
    /// the caller may treat the daemon as gone afterwards.
    pub async fn stop(&self) {
        let pid = match self.read_pid() {
            Some(pid) => pid,
            None => {
                warn!("no PID file, falling back to name-based kill");
                self.kill_by_name();
                return;
            }
        };
        if !self.control.is_alive(pid) {
            info!("PID {} has no live process, removing stale PID file", pid);
            let _ = std::fs::remove_file(&self.config.pid_file);
            return;
        }

        let mut phase = StopPhase::Terminate;
        loop {
            match phase {
                StopPhase::Terminate => {
                    if let Err(e) = self.control.terminate(pid) {
                        warn!("SIGTERM to {} failed: {}", pid, e);
                    }
                    if self.wait_gone(pid).await {
                        info!("motion daemon stopped");
                        return;
                    }
                    warn!("motion daemon ignored SIGTERM within {}s, escalating", self.config.stop_grace_secs);
                    phase = StopPhase::ForceKill;
                }
                StopPhase::ForceKill => {
                    if let Err(e) = self.control.kill(pid) {
                        warn!("SIGKILL to {} failed: {}", pid, e);
                    }
                    if self.wait_gone(pid).await {
                        info!("motion daemon killed");
                        return;
                    }
                    phase = StopPhase::KillByName;
                }
                StopPhase::KillByName => {
                    let count = self.kill_by_name();
                    warn!("last-resort kill of '{}' hit {} process(es)", self.config.kill_name, count);
                    return;
                }
            }
        }
    }

    /// The `/kill` fallback, also the tail of the stop escalation.
    pub fn kill_by_name(&self) -> usize {
        self.control.kill_by_name(&self.config.kill_name)
    }

    async fn wait_gone(&self, pid: i32) -> bool {
        let deadline = Instant::now() + Duration::from_secs(self.config.stop_grace_secs);
        loop {
            if !self.control.is_alive(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }
}

/// PIR sensor listener: polls the input pin and reports rising edges as
/// timestamps. With creepy_mode the task outlives disarm so edges keep
/// getting recorded; the consumer decides whether an edge triggers a
/// capture.
pub struct PirSource {
    config: PirConfig,
    gpio: Arc<dyn Gpio>,
    events: mpsc::Sender<DateTime<Utc>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PirSource {
    pub fn new(config: PirConfig, gpio: Arc<dyn Gpio>, events: mpsc::Sender<DateTime<Utc>>) -> Self {
        Self { config, gpio, events, task: Mutex::new(None) }
    }

    /// Start the listener at boot when creepy_mode wants motion timestamps
    /// recorded while disarmed. No-op without creepy_mode. A failure here
    /// means no edges will be seen until the next successful arm, so the
    /// caller must report it.
    pub fn watch_from_boot(&self) -> Result<()> {
        if !self.config.creepy_mode {
            return Ok(());
        }
        self.ensure_running()
    }

    pub fn start(&self) -> Result<()> {
        self.ensure_running()
    }

    pub fn stop(&self) {
        if self.config.creepy_mode {
            return;
        }
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
            debug!("PIR listener stopped");
        }
    }

    fn ensure_running(&self) -> Result<()> {
        let mut slot = self.task.lock().unwrap();
        if slot.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return Ok(());
        }
        let gpio = Arc::clone(&self.gpio);
        let pin = self.config.gpio;
        let poll = Duration::from_millis(self.config.poll_ms);
        let events = self.events.clone();
        // initial level read doubles as a wiring check
        let mut level = gpio.read(pin).map_err(|e| Error::MotionSourceStart(e.to_string()))?;
        *slot = Some(tokio::spawn(async move {
            info!("PIR listener watching pin {}", pin);
            loop {
                sleep(poll).await;
                let current = match gpio.read(pin) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("PIR read failed: {}", e);
                        continue;
                    }
                };
                if current && !level {
                    debug!("PIR: rising edge");
                    if events.send(Utc::now()).await.is_err() {
                        return;
                    }
                }
                level = current;
            }
        }));
        Ok(())
    }
}

/// Uniform motion-source handle for the state machine.
pub enum MotionSource {
    None,
    Pir(PirSource),
    ExternalDaemon(DaemonSupervisor),
}

impl MotionSource {
    pub fn kind(&self) -> MotionSourceKind {
        match self {
            Self::None => MotionSourceKind::None,
            Self::Pir(_) => MotionSourceKind::Pir,
            Self::ExternalDaemon(_) => MotionSourceKind::ExternalDaemon,
        }
    }

    pub async fn start(&self) -> Result<()> {
        match self {
            Self::None => Err(Error::MotionSourceStart(
                "neither PIR nor motion daemon is enabled".into(),
            )),
            Self::Pir(pir) => pir.start(),
            Self::ExternalDaemon(daemon) => daemon.start().await,
        }
    }

    /// Best-effort; failures are logged inside, never propagated.
    pub async fn stop(&self) {
        match self {
            Self::None => {}
            Self::Pir(pir) => pir.stop(),
            Self::ExternalDaemon(daemon) => daemon.stop().await,
        }
    }
}
