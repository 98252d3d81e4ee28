//! Command router.
//!
//! Validates the sender against the owner set, maps each recognized
//! command to exactly one controller action, and replies with
//! human-readable text. Unauthorized senders are logged for operator
//! discovery and get nothing back.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::controller::Controller;
use crate::transport::{IncomingMessage, Transport};

pub const HELP_TEXT: &str = "/arm - Enable motion-based capturing.\n\
/disarm - Disable motion-based capturing.\n\
/capture - Take a single shot.\n\
/status - Show current mode.\n\
/kill - Kill motion daemon, if enabled.\n\
/ledtoggle - Toggle capture LED, if configured.\n\
/ledstatus - Show state of capture LED (on/off), if configured.\n\
/buzzer - Trigger buzzer, if configured.\n\
/log - Show recent log messages.\n\
/help - Show this help.";

/// Recognized operator commands. Matching is case-sensitive and takes no
/// arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Arm,
    Disarm,
    Status,
    Capture,
    Kill,
    LedToggle,
    LedStatus,
    Buzzer,
    Log,
    Help,
    Unknown,
}

impl Command {
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "/arm" => Self::Arm,
            "/disarm" => Self::Disarm,
            "/status" => Self::Status,
            "/capture" => Self::Capture,
            "/kill" => Self::Kill,
            "/ledtoggle" => Self::LedToggle,
            "/ledstatus" => Self::LedStatus,
            "/buzzer" => Self::Buzzer,
            "/log" => Self::Log,
            "/help" | "/start" => Self::Help,
            _ => Self::Unknown,
        }
    }
}

pub struct CommandRouter {
    controller: Arc<Controller>,
    transport: Arc<dyn Transport>,
    owners: Vec<String>,
}

impl CommandRouter {
    pub fn new(
        controller: Arc<Controller>,
        transport: Arc<dyn Transport>,
        owners: Vec<String>,
    ) -> Self {
        Self { controller, transport, owners }
    }

    pub fn is_owner(&self, sender: &str) -> bool {
        self.owners.iter().any(|o| o == sender)
    }

    pub async fn handle(&self, message: IncomingMessage) {
        if !self.is_owner(&message.sender) {
            // recorded so the operator can discover the sender id later
            warn!(
                "ignoring message from unknown sender {:?}: {:?}",
                message.sender, message.text
            );
            return;
        }
        info!("command from {:?}: {:?}", message.sender, message.text);
        let reply = self.dispatch(Command::parse(&message.text)).await;
        if let Err(e) = self.transport.send_text(&message.sender, &reply).await {
            warn!("could not reply to {}: {}", message.sender, e);
        }
    }

    async fn dispatch(&self, command: Command) -> String {
        match command {
            Command::Arm => self.controller.arm().await,
            Command::Disarm => self.controller.disarm().await,
            Command::Status => self.controller.status().await,
            Command::Capture => self.controller.manual_capture().await,
            Command::Kill => self.controller.kill_motion(),
            Command::LedToggle => self.controller.led_toggle(),
            Command::LedStatus => self.controller.led_status(),
            Command::Buzzer => self.controller.buzzer_cue(),
            Command::Log => self.controller.log_tail(),
            Command::Help => HELP_TEXT.into(),
            Command::Unknown => {
                warn!("unknown command");
                format!("Unknown command.\n{HELP_TEXT}")
            }
        }
    }
}

/// Drain the inbound message channel for the daemon's lifetime.
pub fn spawn(router: CommandRouter, mut rx: mpsc::Receiver<IncomingMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            router.handle(message).await;
        }
    })
}
