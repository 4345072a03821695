//! Application path resolution
//!
//! The sender binary ships next to the gateway executable and is resolved
//! relative to it; logs go to the platform data directory.

use anyhow::Result;
use std::path::PathBuf;
use tracing::debug;

/// Sender binary file name, expected next to the executable
pub const SENDER_BINARY: &str = "stagelink-sender";

/// Well-known socket shared with the sender process
pub const DEFAULT_SOCKET: &str = "/tmp/stagelink.sock";

/// Application name used for the data directory
const APP_NAME: &str = "StageLink GW";

/// Resolved paths for the sender binary, socket, and logs
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the sender binary
    pub sender: PathBuf,
    /// Unix socket path shared with the sender
    pub socket: PathBuf,
    /// Directory for log files
    pub logs_dir: PathBuf,
}

impl AppPaths {
    /// Detect paths from the executable's install location
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        let logs_dir = dirs::data_dir()
            .map(|d| d.join(APP_NAME).join("logs"))
            .unwrap_or_else(|| exe_dir.join("logs"));

        Self {
            sender: exe_dir.join(SENDER_BINARY),
            socket: PathBuf::from(DEFAULT_SOCKET),
            logs_dir,
        }
    }

    /// Ensure the logs directory exists
    pub fn ensure_directories(&self) -> Result<()> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir)?;
        }
        Ok(())
    }
}
