//! Sender-process supervision
//!
//! Launches the external sender binary, keeps its combined output flowing
//! into the log, and tears it down on detach. The supervisor always ends in
//! `Stopped`, killing the held child handle when the Stop protocol command
//! is not honored in time.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::relay::{self, RelayClient};

/// Bound on how long a stopping sender may keep running before being killed
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Supervisor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperState {
    Idle,
    Starting,
    Connected,
    Stopping,
    Stopped,
}

/// How to launch and reach the sender process
#[derive(Debug, Clone)]
pub struct HelperConfig {
    /// Sender binary path
    pub binary: PathBuf,

    /// Extra arguments passed to the sender
    pub args: Vec<String>,

    /// Unix socket the sender listens on
    pub socket_path: PathBuf,
}

impl HelperConfig {
    pub fn new(binary: impl Into<PathBuf>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            socket_path: socket_path.into(),
        }
    }
}

/// Supervises the external sender process
pub struct HelperSupervisor {
    config: HelperConfig,
    state: Arc<Mutex<HelperState>>,
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
}

impl HelperSupervisor {
    pub fn new(config: HelperConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HelperState::Idle)),
            child: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn state(&self) -> HelperState {
        *self.state.lock()
    }

    fn set_state(&self, state: HelperState) {
        *self.state.lock() = state;
    }

    /// Launch the sender and connect to its socket.
    ///
    /// Any previously running sender is asked to stop first (best effort);
    /// the new child's stdout and stderr are drained line-by-line into the
    /// log from their own tasks so output never blocks command dispatch.
    pub async fn start(&self) -> Result<RelayClient> {
        self.set_state(HelperState::Starting);
        info!("Starting sender process: {}", self.config.binary.display());

        // At most one live sender before the new one launches
        relay::stop_handshake(&self.config.socket_path).await;

        let mut child = Command::new(&self.config.binary)
            .args(&self.config.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!(
                    "failed to launch sender process {}",
                    self.config.binary.display()
                )
            })?;

        if let Some(stdout) = child.stdout.take() {
            spawn_output_drain(stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_drain(stderr);
        }

        *self.child.lock().await = Some(child);
        self.spawn_exit_watcher();

        match RelayClient::connect(&self.config.socket_path).await {
            Ok(relay) => {
                self.set_state(HelperState::Connected);
                info!(
                    "✅ Sender connected on {}",
                    self.config.socket_path.display()
                );
                Ok(relay)
            },
            Err(err) => {
                warn!("Sender never became reachable, cleaning up");
                self.reap_or_kill().await;
                self.set_state(HelperState::Stopped);
                Err(err).context("failed to connect to sender socket")
            },
        }
    }

    /// Stop the sender, always ending in `Stopped`.
    ///
    /// Sends the Stop command and closes the socket when a relay connection
    /// is available; either way the child is given a short grace period and
    /// then killed through the handle held since launch.
    pub async fn stop(&self, relay: Option<RelayClient>) {
        self.set_state(HelperState::Stopping);

        match relay {
            Some(relay) => {
                relay.send_stop();
                relay.close().await;
            },
            None => debug!("No relay connection, skipping Stop command"),
        }

        self.reap_or_kill().await;
        self.set_state(HelperState::Stopped);
        info!("Sender process stopped");
    }

    /// Wait up to the grace period for the child to exit, then kill it
    async fn reap_or_kill(&self) {
        let deadline = Instant::now() + STOP_GRACE;
        loop {
            let mut guard = self.child.lock().await;
            let Some(child) = guard.as_mut() else {
                return;
            };

            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Sender process exited: {}", status);
                    *guard = None;
                    return;
                },
                Ok(None) if Instant::now() < deadline => {},
                Ok(None) => {
                    warn!("Sender ignored Stop, killing it");
                    if let Err(err) = child.kill().await {
                        warn!("Failed to kill sender process: {}", err);
                    }
                    *guard = None;
                    return;
                },
                Err(err) => {
                    warn!("Failed to poll sender process: {}", err);
                    *guard = None;
                    return;
                },
            }

            drop(guard);
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Log the exit status of a sender that dies while it should be running.
    /// No automatic restart: the gateway stays up and the next attach cycle
    /// brings a fresh sender.
    fn spawn_exit_watcher(&self) {
        let child = self.child.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(500)).await;

                if matches!(
                    *state.lock(),
                    HelperState::Stopping | HelperState::Stopped
                ) {
                    break;
                }

                let mut guard = child.lock().await;
                match guard.as_mut() {
                    None => break,
                    Some(c) => match c.try_wait() {
                        Ok(Some(status)) => {
                            warn!("⚠️  Sender process exited unexpectedly: {}", status);
                            *guard = None;
                            break;
                        },
                        Ok(None) => {},
                        Err(err) => {
                            warn!("Failed to poll sender process: {}", err);
                            break;
                        },
                    },
                }
            }
        });
    }
}

fn spawn_output_drain(stream: impl AsyncRead + Unpin + Send + 'static) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!("sender: {}", line);
        }
    });
}
