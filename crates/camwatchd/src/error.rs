//! Error taxonomy for the daemon core.
//!
//! None of these are process-fatal; the daemon is expected to keep running
//! and report failures to the operator.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The configured motion source could not be started. The arm
    /// transition is aborted and the state stays Disarmed.
    #[error("failed to start motion source: {0}")]
    MotionSourceStart(String),

    /// The external motion daemon did not write a live PID within the
    /// configured startup window.
    #[error("motion daemon did not come up within {timeout_secs}s (pid file: {pid_file})")]
    DaemonStartTimeout { pid_file: PathBuf, timeout_secs: u64 },

    /// The external capture command failed: non-zero exit, timeout, or
    /// missing output file.
    #[error("capture command failed: {0}")]
    CaptureCommand(String),

    /// A single owner could not be reached. Logged by the pipeline,
    /// never aborts the delivery batch.
    #[error("delivery to owner {owner} failed: {reason}")]
    Delivery { owner: String, reason: String },

    #[error("gpio error on pin {pin}: {reason}")]
    Gpio { pin: u8, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
