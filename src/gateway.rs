//! Gateway session: attach/detach lifecycle and event dispatch
//!
//! Ties the pieces together the way the host sees them: `attach` compiles
//! the mapping table, declares host forwards, starts the sender process and
//! connects the relay; `on_midi` feeds one raw inbound message through the
//! router and hands the resulting commands to the relay; `detach` tears the
//! sender down. Per-message failures are logged, never surfaced.

use anyhow::{Context, Result};
use std::fmt;
use tracing::{debug, info, trace, warn};

use crate::config::Settings;
use crate::helper::{HelperConfig, HelperState, HelperSupervisor};
use crate::midi::{format_hex, InboundEvent};
use crate::relay::RelayClient;
use crate::router::Router;
use crate::rules::{self, ForwardRegistrar, RuleKind};

/// Registrar that logs forwarding declarations.
///
/// Standalone mode has no host to register with; the declarations are still
/// emitted so a misforwarded control can be diagnosed from the log.
pub struct LogRegistrar;

impl ForwardRegistrar for LogRegistrar {
    fn register(&mut self, kind: RuleKind, channel: u8, controller: u8) {
        let label = match kind {
            RuleKind::Note => "Note",
            RuleKind::ControlChange => "CC",
        };
        debug!("Forward {} ch:{} key:{}", label, channel, controller);
    }
}

/// What a table compile + swap produced, for surfacing reload diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileSummary {
    /// Rules accepted into the table
    pub accepted: usize,
    /// Concrete value entries after wildcard expansion
    pub entries: usize,
    /// Entries replaced by a later rule keying the same tuple
    pub overwritten: usize,
    /// Rules rejected as unparseable
    pub rejected: usize,
}

impl fmt::Display for CompileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rules, {} entries ({} overwritten, {} rejected)",
            self.accepted, self.entries, self.overwritten, self.rejected
        )
    }
}

/// Session object owning the router, relay, and sender supervisor
pub struct Gateway {
    router: Router,
    supervisor: HelperSupervisor,
    relay: Option<RelayClient>,
}

impl Gateway {
    pub fn new(helper: HelperConfig) -> Self {
        Self {
            router: Router::new(),
            supervisor: HelperSupervisor::new(helper),
            relay: None,
        }
    }

    /// Compile the settings into a fresh table, start the sender process,
    /// and connect the relay.
    pub async fn attach(
        &mut self,
        settings: &Settings,
        registrar: &mut dyn ForwardRegistrar,
    ) -> Result<()> {
        let summary = self.compile_and_swap(settings, registrar);

        let relay = self
            .supervisor
            .start()
            .await
            .context("failed to start sender process")?;
        self.relay = Some(relay);

        info!("✅ Gateway attached ({})", summary);
        Ok(())
    }

    /// Recompile the rules and swap the table atomically.
    ///
    /// Called on settings-file changes; routing keeps running against the
    /// old table until the swap. The returned summary carries the compile
    /// diagnostics (overwrites, rejects) so the caller can surface them.
    pub fn reload_rules(
        &self,
        settings: &Settings,
        registrar: &mut dyn ForwardRegistrar,
    ) -> CompileSummary {
        self.compile_and_swap(settings, registrar)
    }

    fn compile_and_swap(
        &self,
        settings: &Settings,
        registrar: &mut dyn ForwardRegistrar,
    ) -> CompileSummary {
        let report = rules::compile(&settings.rules, registrar);

        for (spec, err) in &report.rejected {
            warn!("Rejected rule {}: {}", spec, err);
        }
        if report.overwritten > 0 {
            warn!(
                "⚠️  {} mapping entries overwritten by later rules",
                report.overwritten
            );
        }

        let summary = CompileSummary {
            accepted: report.accepted,
            entries: report.table.len(),
            overwritten: report.overwritten,
            rejected: report.rejected.len(),
        };
        self.router.swap_table(report.table);
        summary
    }

    /// Route one raw inbound message and dispatch the outbound commands.
    ///
    /// Unparseable or unmapped messages are dropped silently; a detached
    /// relay swallows whatever the router still produces.
    pub fn on_midi(&self, raw: &[u8]) {
        let Some(event) = InboundEvent::from_raw(raw) else {
            trace!("Ignoring non-routable message: {}", format_hex(raw));
            return;
        };

        let commands = self.router.route(&event);
        if commands.is_empty() {
            return;
        }

        let Some(relay) = &self.relay else {
            debug!("Not attached, dropping {} command(s)", commands.len());
            return;
        };

        for scheduled in commands {
            debug!(
                "→ {} (delay {}ms)",
                scheduled.command,
                scheduled.delay.as_millis()
            );
            relay.send_after(scheduled.command, scheduled.delay);
        }
    }

    /// Stop the sender process and close the socket.
    ///
    /// Delayed sends still pending after this point fail silently; they are
    /// neither awaited nor cancelled.
    pub async fn detach(&mut self) {
        let relay = self.relay.take();
        self.supervisor.stop(relay).await;
        info!("Gateway detached");
    }

    pub fn helper_state(&self) -> HelperState {
        self.supervisor.state()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}
