//! Capture pipeline.
//!
//! Drains completed captures from two origins: direct arbiter results
//! (manual and PIR shots) and files the external motion daemon drops into
//! the shared image directory. Every file is delivered to every owner;
//! per-owner failures are logged and the batch continues. Files are
//! deleted after the delivery attempts when configured.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::Result;
use crate::state::DaemonState;
use crate::transport::Transport;

pub struct CapturePipeline {
    transport: Arc<dyn Transport>,
    owners: Vec<String>,
    delete_images: bool,
}

impl CapturePipeline {
    pub fn new(transport: Arc<dyn Transport>, owners: Vec<String>, delete_images: bool) -> Self {
        Self { transport, owners, delete_images }
    }

    /// Deliver one capture file to every owner, then dispose of it.
    /// Partial delivery failure never aborts the batch.
    pub async fn deliver(&self, path: &Path, caption: &str) {
        for owner in &self.owners {
            if let Err(e) = self.transport.send_file(owner, path, caption).await {
                warn!("could not send {} to owner {}: {}", path.display(), owner, e);
            }
        }
        self.dispose(path).await;
    }

    /// Remove the file when deletion is configured, keep it otherwise.
    pub async fn dispose(&self, path: &Path) {
        if !self.delete_images {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("could not delete {}: {}", path.display(), e);
        }
    }
}

/// Purge (remove and recreate) the shared image directory when deletion
/// is enabled, otherwise just make sure it exists.
pub fn prepare_image_dir(dir: &Path, delete_images: bool) -> Result<()> {
    if delete_images && dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Watch the image directory for finished files. Only close-write and
/// moved-to events count, mirroring how motion daemons finalize images;
/// non-jpg files are ignored. The returned watcher must be kept alive.
pub fn spawn_watcher(dir: &Path, tx: mpsc::UnboundedSender<PathBuf>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!("image watch error: {:?}", e);
                return;
            }
        };
        let finished = matches!(
            event.kind,
            EventKind::Access(AccessKind::Close(AccessMode::Write))
                | EventKind::Modify(ModifyKind::Name(RenameMode::To))
        );
        if !finished {
            return;
        }
        for path in event.paths {
            if path.extension().map(|e| e == "jpg").unwrap_or(false) {
                let _ = tx.send(path);
            } else {
                info!("ignoring non-image file: {}", path.display());
            }
        }
    })
    .map_err(|e| crate::error::Error::Config(format!("cannot create image watcher: {e}")))?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| crate::error::Error::Config(format!("cannot watch {}: {e}", dir.display())))?;
    info!("watching {} for new images", dir.display());
    Ok(watcher)
}

/// Drain watched files in arrival order. Delivery only happens while
/// armed; disposal happens either way so a disarm cannot leave the
/// directory filling up.
pub fn spawn_drain(
    pipeline: Arc<CapturePipeline>,
    state: Arc<RwLock<DaemonState>>,
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(path) = rx.recv().await {
            info!("new image file: {}", path.display());
            let armed = state.read().await.is_armed();
            if armed {
                let caption = path.display().to_string();
                pipeline.deliver(&path, &caption).await;
            } else {
                pipeline.dispose(&path).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, Outbound};
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_to_all_owners_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        std::fs::write(&file, b"jpeg").unwrap();
        let (transport, mut rx) = ChannelTransport::new();
        let pipeline =
            CapturePipeline::new(Arc::new(transport), vec!["1".into(), "2".into()], true);
        pipeline.deliver(&file, "a.jpg").await;
        assert!(matches!(rx.try_recv().unwrap(), Outbound::File { owner, .. } if owner == "1"));
        assert!(matches!(rx.try_recv().unwrap(), Outbound::File { owner, .. } if owner == "2"));
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn partial_failure_continues_and_still_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        std::fs::write(&file, b"jpeg").unwrap();
        let (transport, mut rx) = ChannelTransport::new();
        let transport = transport.failing_for(&["1"]);
        let pipeline =
            CapturePipeline::new(Arc::new(transport), vec!["1".into(), "2".into()], true);
        pipeline.deliver(&file, "a.jpg").await;
        // owner 1 failed, owner 2 still got the file
        assert!(matches!(rx.try_recv().unwrap(), Outbound::File { owner, .. } if owner == "2"));
        assert!(rx.try_recv().is_err());
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn retains_file_when_deletion_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        std::fs::write(&file, b"jpeg").unwrap();
        let (transport, _rx) = ChannelTransport::new();
        let pipeline = CapturePipeline::new(Arc::new(transport), vec!["1".into()], false);
        pipeline.deliver(&file, "a.jpg").await;
        assert!(file.exists());
    }

    #[test]
    fn prepare_purges_when_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("old.jpg"), b"x").unwrap();

        prepare_image_dir(&images, false).unwrap();
        assert!(images.join("old.jpg").exists());

        prepare_image_dir(&images, true).unwrap();
        assert!(images.exists());
        assert!(!images.join("old.jpg").exists());
    }

    #[tokio::test]
    async fn watcher_reports_finished_jpg_files() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = spawn_watcher(dir.path(), tx).unwrap();

        std::fs::write(dir.path().join("note.txt"), b"not an image").unwrap();
        std::fs::write(dir.path().join("shot.jpg"), b"jpeg").unwrap();

        let path = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("watch event within deadline")
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "shot.jpg");
    }
}
