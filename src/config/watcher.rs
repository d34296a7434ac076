//! Configuration file watcher for hot reload.
//!
//! # Design Decisions
//! - Watch the parent directory, not the file: editors and deploy tools
//!   replace the file by rename, which would orphan a watch on the old inode
//! - Only validated configs are forwarded; a bad edit keeps the running config
//! - An empty read is a write in progress, not an empty route table

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::CoreConfig;

/// Forwards every valid revision of one config file.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<CoreConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for validated updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<CoreConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                updates,
            },
            rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(OsString::from);
        let path = self.path.clone();
        let updates = self.updates;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_change(&event.kind) && touches(&event, file_name.as_deref()) => {
                    match reload(&path) {
                        Ok(Some(config)) => {
                            tracing::info!(path = ?path, routes = config.routes.len(), "Config file changed");
                            let _ = updates.send(config);
                        }
                        Ok(None) => tracing::debug!(path = ?path, "Config file empty, waiting for the write to finish"),
                        Err(e) => tracing::error!(path = ?path, error = %e, "Failed to reload config, keeping current configuration"),
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default(),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

fn is_change(kind: &EventKind) -> bool {
    kind.is_modify() || kind.is_create()
}

fn touches(event: &Event, file_name: Option<&OsStr>) -> bool {
    event.paths.iter().any(|p| p.file_name() == file_name)
}

fn reload(path: &Path) -> Result<Option<CoreConfig>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    parse_config(&content).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_only_changes_to_the_watched_file_count() {
        let name = Some(OsStr::new("routes.toml"));
        let modified = event(EventKind::Modify(ModifyKind::Any), "/etc/router/routes.toml");
        let sibling = event(EventKind::Modify(ModifyKind::Any), "/etc/router/other.toml");
        let removed = event(EventKind::Remove(RemoveKind::File), "/etc/router/routes.toml");
        let created = event(EventKind::Create(CreateKind::File), "/etc/router/routes.toml");

        assert!(is_change(&modified.kind) && touches(&modified, name));
        assert!(!touches(&sibling, name));
        assert!(!is_change(&removed.kind));
        assert!(is_change(&created.kind) && touches(&created, name));
    }

    #[test]
    fn test_empty_file_is_skipped() {
        let path = std::env::temp_dir().join(format!("pipeline-router-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "  \n").unwrap();
        assert!(reload(&path).unwrap().is_none());

        std::fs::write(&path, "[[routes]]\nname = \"x\"\npattern = \"x\"\n").unwrap();
        assert!(matches!(reload(&path), Err(ConfigError::Validation(_))));
        std::fs::remove_file(&path).unwrap();
    }
}
