use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Modified,
    Deleted,
}

impl FileChange {
    fn from_kind(kind: &EventKind) -> Self {
        match kind {
            EventKind::Remove(_) => Self::Deleted,
            _ => Self::Modified,
        }
    }
}

struct ActiveWatch {
    path: PathBuf,
    _watcher: PollWatcher,
}

/// Polls a single kubeconfig file for changes.
///
/// The parent directory is polled rather than the file itself so that a file
/// which is missing, deleted, or atomically replaced keeps being tracked.
/// At most one path is watched at a time.
pub struct ConfigFileWatcher {
    poll_interval: Duration,
    active: Option<ActiveWatch>,
}

impl ConfigFileWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval, active: None }
    }

    pub fn watch(&mut self, path: &Path, tx: mpsc::UnboundedSender<FileChange>) -> anyhow::Result<()> {
        self.stop();

        let file_name: OsString =
            path.file_name().ok_or_else(|| anyhow::anyhow!("{} has no file name", path.display()))?.to_os_string();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let target = file_name.clone();
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !event.paths.iter().any(|p| p.file_name() == Some(target.as_os_str())) {
                    return;
                }
                let change = FileChange::from_kind(&event.kind);
                debug!("Kubeconfig file event {:?} -> {change:?}", event.kind);
                if tx.send(change).is_err() {
                    debug!("Kubeconfig change receiver dropped");
                }
            }
            Err(e) => warn!("Kubeconfig watcher error: {e}"),
        };

        let config = Config::default().with_poll_interval(self.poll_interval).with_compare_contents(true);
        let mut watcher = PollWatcher::new(handler, config)?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;

        info!("Watching kubeconfig {} every {:?}", path.display(), self.poll_interval);
        self.active = Some(ActiveWatch { path: path.to_path_buf(), _watcher: watcher });
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("Stopped watching {}", active.path.display());
        }
    }

    pub fn watched_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    pub fn is_watching(&self) -> bool {
        self.active.is_some()
    }
}

impl Default for ConfigFileWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}
