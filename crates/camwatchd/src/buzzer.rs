//! Buzzer sequencer.
//!
//! A dedicated task owns the output pin and plays one sequence at a time.
//! Triggering is fire-and-forget: the caller sends over an unbounded
//! channel and returns immediately, playback runs on the task's own
//! timer. Starting a new sequence cancels whatever is playing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::gpio::Gpio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceMode {
    /// Runs once, then forces the line low.
    OneShot,
    /// Loops until cancelled or replaced.
    Continuous,
}

#[derive(Debug, Clone)]
pub struct BuzzerSequence {
    pub pattern: Vec<bool>,
    pub tick: Duration,
    pub mode: SequenceMode,
}

impl BuzzerSequence {
    /// Parse a pattern string of '1'/'0' symbols. Unknown symbols are
    /// logged and skipped; an empty result means no cue.
    pub fn parse(pattern: &str, tick: Duration, mode: SequenceMode) -> Option<Self> {
        let mut symbols = Vec::with_capacity(pattern.len());
        for c in pattern.chars() {
            match c {
                '1' => symbols.push(true),
                '0' => symbols.push(false),
                _ => warn!("unknown symbol in buzzer pattern: {:?}", c),
            }
        }
        if symbols.is_empty() {
            return None;
        }
        Some(Self { pattern: symbols, tick, mode })
    }
}

enum BuzzerCommand {
    Play(BuzzerSequence),
    Cancel,
}

#[derive(Clone)]
pub struct BuzzerHandle {
    tx: mpsc::UnboundedSender<BuzzerCommand>,
}

impl BuzzerHandle {
    /// Start a sequence, cancelling any in-flight one. Never blocks.
    pub fn play(&self, sequence: BuzzerSequence) {
        let _ = self.tx.send(BuzzerCommand::Play(sequence));
    }

    /// Stop playback and force the line low. Never blocks.
    pub fn cancel(&self) {
        let _ = self.tx.send(BuzzerCommand::Cancel);
    }

    /// Handle that drops every cue, for configs without a buzzer.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// Spawn the sequencer task owning `pin`.
pub fn spawn(gpio: Arc<dyn Gpio>, pin: u8) -> (BuzzerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run(gpio, pin, rx));
    (BuzzerHandle { tx }, handle)
}

async fn run(gpio: Arc<dyn Gpio>, pin: u8, mut rx: mpsc::UnboundedReceiver<BuzzerCommand>) {
    let mut pending: Option<BuzzerSequence> = None;
    'idle: loop {
        let sequence = match pending.take() {
            Some(s) => s,
            None => match rx.recv().await {
                Some(BuzzerCommand::Play(s)) => s,
                Some(BuzzerCommand::Cancel) => continue,
                None => break,
            },
        };
        debug!("playing buzzer sequence ({} symbols)", sequence.pattern.len());
        loop {
            for &high in &sequence.pattern {
                set_line(&gpio, pin, high);
                tokio::select! {
                    command = rx.recv() => {
                        set_line(&gpio, pin, false);
                        match command {
                            Some(BuzzerCommand::Play(s)) => {
                                pending = Some(s);
                                continue 'idle;
                            }
                            Some(BuzzerCommand::Cancel) => continue 'idle,
                            None => break 'idle,
                        }
                    }
                    _ = sleep(sequence.tick) => {}
                }
            }
            if sequence.mode == SequenceMode::OneShot {
                // The line must never stay on after a one-shot cue.
                set_line(&gpio, pin, false);
                continue 'idle;
            }
        }
    }
    set_line(&gpio, pin, false);
}

fn set_line(gpio: &Arc<dyn Gpio>, pin: u8, high: bool) {
    if let Err(e) = gpio.write(pin, high) {
        warn!("buzzer output failed: {}", e);
    }
}
