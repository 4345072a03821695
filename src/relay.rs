//! Relay client for the sender-process socket
//!
//! Owns the single long-lived Unix socket connection to the sender process.
//! All writes are serialized through one writer task fed by an unbounded
//! queue, so overlapping delayed sends can never interleave bytes on the
//! wire. Each delayed send sleeps in its own task and a send that fires
//! after the connection is closed is discarded, never surfaced.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::midi::OutboundCommand;

/// Wire command that shuts the sender process down
pub const STOP_COMMAND: &str = "Stop";

/// Delay before the first connect attempt after launching the sender
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(250);
const CONNECT_ATTEMPTS: u32 = 20;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("sender socket {path} unreachable after {attempts} attempts: {source}")]
    HelperUnreachable {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
}

enum WriterMsg {
    Command(String),
    Shutdown,
}

/// Client side of the sender-process socket
#[derive(Debug)]
pub struct RelayClient {
    tx: mpsc::UnboundedSender<WriterMsg>,
    writer: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Connect to the sender socket, waiting out the settle delay after
    /// launch and retrying for a bounded number of attempts before giving
    /// up with [`RelayError::HelperUnreachable`].
    pub async fn connect(path: &Path) -> Result<Self, RelayError> {
        sleep(SETTLE_DELAY).await;

        let mut attempt = 0;
        let stream = loop {
            attempt += 1;
            match UnixStream::connect(path).await {
                Ok(stream) => break stream,
                Err(err) if attempt < CONNECT_ATTEMPTS => {
                    trace!(
                        "Sender socket not ready (attempt {}/{}): {}",
                        attempt,
                        CONNECT_ATTEMPTS,
                        err
                    );
                    sleep(CONNECT_RETRY_INTERVAL).await;
                },
                Err(err) => {
                    return Err(RelayError::HelperUnreachable {
                        path: path.to_path_buf(),
                        attempts: attempt,
                        source: err,
                    });
                },
            }
        };

        debug!("Connected to sender socket {}", path.display());
        Ok(Self::from_stream(stream))
    }

    fn from_stream(mut stream: UnixStream) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Single writer task owning the stream; write failures are logged
        // and swallowed so a crashed sender never takes the gateway down.
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    WriterMsg::Command(text) => {
                        trace!("Relay TX: {}", text);
                        if let Err(err) = stream.write_all(text.as_bytes()).await {
                            warn!("Relay write failed: {}", err);
                        }
                    },
                    WriterMsg::Shutdown => break,
                }
            }
        });

        Self {
            tx,
            writer: Some(writer),
        }
    }

    fn enqueue(&self, text: String) {
        if self.tx.send(WriterMsg::Command(text)).is_err() {
            debug!("Relay closed, discarding command");
        }
    }

    /// Queue one command for immediate write
    pub fn send(&self, command: &OutboundCommand) {
        self.enqueue(command.encode());
    }

    /// Queue one command, delaying the write by `delay`.
    ///
    /// The delay runs in its own task; the caller is never suspended. A
    /// delayed command whose connection has been closed in the meantime is
    /// silently discarded.
    pub fn send_after(&self, command: OutboundCommand, delay: Duration) {
        if delay.is_zero() {
            self.send(&command);
            return;
        }

        let tx = self.tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            if tx.send(WriterMsg::Command(command.encode())).is_err() {
                debug!("Relay closed before delayed {} fired, discarding", command);
            }
        });
    }

    /// Queue the protocol Stop command
    pub fn send_stop(&self) {
        self.enqueue(STOP_COMMAND.to_string());
    }

    /// Flush queued commands and drop the connection.
    ///
    /// Delayed sends still pending after this point fail silently.
    pub async fn close(mut self) {
        let _ = self.tx.send(WriterMsg::Shutdown);
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        debug!("Relay connection closed");
    }
}

/// Best-effort "stop any previous sender" handshake.
///
/// Connects to the well-known socket and sends the Stop command; every
/// failure is swallowed since the usual case is that no prior instance is
/// listening.
pub async fn stop_handshake(path: &Path) {
    match UnixStream::connect(path).await {
        Ok(mut stream) => {
            debug!("Previous sender found on {}, stopping it", path.display());
            if let Err(err) = stream.write_all(STOP_COMMAND.as_bytes()).await {
                debug!("Stop handshake write failed: {}", err);
            }
        },
        Err(err) => {
            trace!("No previous sender on {}: {}", path.display(), err);
        },
    }
}
