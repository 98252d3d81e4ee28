//! Chat-transport collaborator seam.
//!
//! The transport delivers text and files to operators and feeds inbound
//! commands to the router. The daemon never assumes anything about the
//! wire; a real chat backend implements [`Transport`] and pushes
//! [`IncomingMessage`]s into the command channel.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{Error, Result};

/// A message from some sender. The sender identity is opaque; the router
/// checks it against the configured owner set.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub sender: String,
    pub text: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, owner: &str, text: &str) -> Result<()>;
    async fn send_file(&self, owner: &str, path: &Path, caption: &str) -> Result<()>;
}

/// Local transport for running the daemon without a chat backend: stdin
/// lines become commands from a fixed sender, replies go to stdout.
pub struct StdioTransport {
    sender: String,
}

impl StdioTransport {
    pub fn new(sender: impl Into<String>) -> Self {
        Self { sender: sender.into() }
    }

    /// Bridge stdin into the command channel until EOF.
    pub async fn pump(&self, tx: mpsc::Sender<IncomingMessage>) {
        let mut lines = BufReader::new(io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let text = line.trim().to_string();
            if text.is_empty() {
                continue;
            }
            let msg = IncomingMessage { sender: self.sender.clone(), text };
            if tx.send(msg).await.is_err() {
                break;
            }
        }
        info!("stdin closed, no more local commands");
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_text(&self, owner: &str, text: &str) -> Result<()> {
        println!("[{owner}] {text}");
        Ok(())
    }

    async fn send_file(&self, owner: &str, path: &Path, caption: &str) -> Result<()> {
        println!("[{owner}] <file {} ({caption})>", path.display());
        Ok(())
    }
}

/// Test double that records outbound traffic and can be told to fail
/// deliveries to specific owners.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    failing_owners: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text { owner: String, text: String },
    File { owner: String, path: std::path::PathBuf, caption: String },
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { outbound: tx, failing_owners: Vec::new() }, rx)
    }

    pub fn failing_for(mut self, owners: &[&str]) -> Self {
        self.failing_owners = owners.iter().map(|s| s.to_string()).collect();
        self
    }

    fn check(&self, owner: &str) -> Result<()> {
        if self.failing_owners.iter().any(|o| o == owner) {
            return Err(Error::Delivery {
                owner: owner.to_string(),
                reason: "simulated transport failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_text(&self, owner: &str, text: &str) -> Result<()> {
        self.check(owner)?;
        let _ = self.outbound.send(Outbound::Text {
            owner: owner.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_file(&self, owner: &str, path: &Path, caption: &str) -> Result<()> {
        self.check(owner)?;
        let _ = self.outbound.send(Outbound::File {
            owner: owner.to_string(),
            path: path.to_path_buf(),
            caption: caption.to_string(),
        });
        Ok(())
    }
}
