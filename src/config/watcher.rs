//! Settings file change notification
//!
//! Raises a coalesced signal when the settings file is rewritten on disk.
//! Loading and recompiling stay with the gateway, so a signal is cheap and
//! a half-written file never reaches the routing path from here.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error};

/// How long to let the file settle before reporting a change; editors and
/// the host rewrite settings in several filesystem operations.
const WRITE_SETTLE: Duration = Duration::from_millis(100);

/// Watches the settings file and coalesces rewrite bursts into single
/// change signals. The caller decides what a change means (reload,
/// recompile, swap); this type only says *that* the file changed.
pub struct SettingsWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<()>,
}

impl SettingsWatcher {
    /// Start watching the given settings file
    pub fn watch(settings_path: &Path) -> Result<Self> {
        // Capacity 1: a full buffer means a signal is already pending, and
        // try_send keeps the notify callback free of any runtime coupling.
        let (tx, rx) = mpsc::channel(1);

        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        debug!("Settings file changed: {:?}", event.paths);
                        let _ = tx.try_send(());
                    }
                },
                Err(e) => error!("Settings watch error: {}", e),
            })?;

        watcher
            .watch(settings_path, RecursiveMode::NonRecursive)
            .with_context(|| {
                format!("Failed to watch settings file: {}", settings_path.display())
            })?;

        debug!("Settings watcher started for: {}", settings_path.display());
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Resolve once the settings file has changed.
    ///
    /// Waits out the write-settle window and drains any signals that piled
    /// up during it, so one save reports one change. Returns `None` when
    /// the watcher backend is gone.
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await?;
        sleep(WRITE_SETTLE).await;
        while self.rx.try_recv().is_ok() {}
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_change_signal_and_reload() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let settings_path = temp_dir.path().join("test-settings.yaml");
        fs::write(&settings_path, "MP1:\n  CC.1.10.X: CC.1.20.X\n")?;

        let mut watcher = SettingsWatcher::watch(&settings_path)?;

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&settings_path, "MP1:\n  CC.1.10.X: CC.1.30.X\n")?;

        tokio::time::timeout(Duration::from_secs(2), watcher.changed())
            .await
            .expect("no change signal before timeout")
            .expect("watcher closed");

        // The signal is only useful if a reload now sees the new rules
        let reloaded = Settings::load(&settings_path).await?;
        assert_eq!(reloaded.rules[0].1, "CC.1.30.X");

        Ok(())
    }

    #[test]
    fn test_watch_missing_file_fails() {
        assert!(SettingsWatcher::watch(Path::new("/nonexistent/settings.yaml")).is_err());
    }
}
