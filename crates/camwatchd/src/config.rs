//! Configuration loading and validation.
//!
//! Settings come from a TOML file whose layout mirrors the daemon's
//! runtime structure: one section per hardware/feature block. Every field
//! has a default so a minimal config only needs the sections it enables.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    /// Operator identities allowed to issue commands.
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub pir: PirConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub buzzer: BuzzerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Start armed instead of waiting for /arm.
    #[serde(default)]
    pub arm: bool,
    /// Delete capture files once delivery attempts have completed. Also
    /// purges the image directory at startup.
    #[serde(default = "default_true")]
    pub delete_images: bool,
    /// Directory the external motion daemon writes images into; watched
    /// by the capture pipeline.
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    /// Directory for the daemon's own rolling log files.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            arm: false,
            delete_images: true,
            image_dir: default_image_dir(),
            log_dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PirConfig {
    #[serde(default)]
    pub enable: bool,
    /// BCM pin number of the PIR input.
    #[serde(default)]
    pub gpio: u8,
    /// Shell command that takes one still when the sensor fires.
    #[serde(default)]
    pub capture_cmd: String,
    /// Output file written by `capture_cmd`. Must live outside
    /// `general.image_dir` so arbiter-delivered shots are not ingested a
    /// second time by the directory watch.
    #[serde(default = "default_pir_capture_file")]
    pub capture_file: PathBuf,
    /// Record motion timestamps even while disarmed.
    #[serde(default)]
    pub creepy_mode: bool,
    /// Input poll interval in milliseconds.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

impl Default for PirConfig {
    fn default() -> Self {
        Self {
            enable: false,
            gpio: 0,
            capture_cmd: String::new(),
            capture_file: default_pir_capture_file(),
            creepy_mode: false,
            poll_ms: default_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    #[serde(default)]
    pub enable: bool,
    /// Shell command launching the external motion daemon.
    #[serde(default)]
    pub cmd: String,
    /// PID file the daemon writes once up.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    /// Process name used for the last-resort kill.
    #[serde(default = "default_kill_name")]
    pub kill_name: String,
    /// How long to poll for a live PID after launch.
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,
    /// Grace period after SIGTERM (and again after SIGKILL) before
    /// escalating.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enable: false,
            cmd: String::new(),
            pid_file: default_pid_file(),
            kill_name: default_kill_name(),
            start_timeout_secs: default_start_timeout(),
            stop_grace_secs: default_stop_grace(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuzzerConfig {
    #[serde(default)]
    pub enable: bool,
    /// BCM pin number of the buzzer output.
    #[serde(default)]
    pub gpio: u8,
    /// Duration of one pattern symbol in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Cue patterns, strings of '1' (on) and '0' (off). Empty = no cue.
    #[serde(default)]
    pub seq_arm: String,
    #[serde(default)]
    pub seq_disarm: String,
    /// Played as a continuous loop while motion is active.
    #[serde(default)]
    pub seq_motion: String,
    #[serde(default)]
    pub seq_capture: String,
    /// Played on the /buzzer command.
    #[serde(default)]
    pub seq_buzzer: String,
}

impl Default for BuzzerConfig {
    fn default() -> Self {
        Self {
            enable: false,
            gpio: 0,
            tick_ms: default_tick_ms(),
            seq_arm: String::new(),
            seq_disarm: String::new(),
            seq_motion: String::new(),
            seq_capture: String::new(),
            seq_buzzer: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Shell command for a manual single shot.
    #[serde(default)]
    pub cmd: String,
    /// Output file written by `cmd`. Kept outside `general.image_dir`.
    #[serde(default = "default_capture_file")]
    pub file: PathBuf,
    #[serde(default = "default_capture_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub led: LedConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            cmd: String::new(),
            file: default_capture_file(),
            timeout_secs: default_capture_timeout(),
            led: LedConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LedConfig {
    /// Illuminate during captures and expose /ledtoggle.
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub gpio: u8,
}

fn default_true() -> bool {
    true
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("/var/lib/camwatch/images")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/camwatch")
}

fn default_pir_capture_file() -> PathBuf {
    PathBuf::from("/tmp/camwatch-motion.jpg")
}

fn default_capture_file() -> PathBuf {
    PathBuf::from("/tmp/camwatch-capture.jpg")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/motion/motion.pid")
}

fn default_kill_name() -> String {
    "motion".to_string()
}

fn default_poll_ms() -> u64 {
    100
}

fn default_tick_ms() -> u64 {
    100
}

fn default_start_timeout() -> u64 {
    10
}

fn default_stop_grace() -> u64 {
    10
}

fn default_capture_timeout() -> u64 {
    30
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup invariants. Anything rejected here would otherwise surface
    /// as a confusing runtime failure.
    pub fn validate(&self) -> Result<()> {
        if self.pir.enable && self.motion.enable {
            return Err(Error::Config(
                "enabling both PIR and motion-daemon capturing is not supported".into(),
            ));
        }
        if self.capture.file.starts_with(&self.general.image_dir) {
            return Err(Error::Config(format!(
                "capture.file {} must not live inside general.image_dir",
                self.capture.file.display()
            )));
        }
        if self.pir.enable && self.pir.capture_file.starts_with(&self.general.image_dir) {
            return Err(Error::Config(format!(
                "pir.capture_file {} must not live inside general.image_dir",
                self.pir.capture_file.display()
            )));
        }
        Ok(())
    }
}
