//! Logging setup and the /log tail.
//!
//! Two layers: stdout for interactive runs, a non-blocking daily-rolling
//! file in the configured log directory. The file backs the /log command.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_PREFIX: &str = "camwatchd.log";

/// Largest /log reply, matching the transport message ceiling.
pub const MAX_REPLY_BYTES: usize = 4000;

/// Install the global subscriber. The returned guard flushes the file
/// writer and must live until shutdown.
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)?;
    let appender = tracing_appender::rolling::daily(log_dir, LOG_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(filter)
        .init();
    Ok(guard)
}

/// Last `lines` lines of the newest log file, capped at
/// [`MAX_REPLY_BYTES`] from the end.
pub fn tail(log_dir: &Path, lines: usize) -> io::Result<String> {
    let path = newest_log_file(log_dir)?;
    let content = fs::read_to_string(path)?;
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    let joined = all[start..].join("\n");
    Ok(tail_bytes(&joined, MAX_REPLY_BYTES).to_string())
}

fn newest_log_file(log_dir: &Path) -> io::Result<PathBuf> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(LOG_PREFIX) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, entry.path()));
        }
    }
    newest
        .map(|(_, path)| path)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no log files found"))
}

fn tail_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
