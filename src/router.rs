//! Event router
//!
//! Routes one inbound event through the translation table to zero, one, or
//! two outbound commands. A CC target yields a single immediate command; a
//! note target yields an immediate note-on plus a note-off at velocity 0
//! delayed by the rule's duration.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::midi::{CommandKind, EventKind, InboundEvent, OutboundCommand};
use crate::rules::{RuleKind, TranslationTable};

/// Channel used for table lookups.
///
/// The reference behavior queries channel 1 regardless of the event's own
/// channel, even though rules are indexed by their parsed channel. Kept as a
/// named default rather than reading `event.channel`; see DESIGN.md.
pub const DEFAULT_INPUT_CHANNEL: u8 = 1;

/// An outbound command plus the delay to apply before writing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledCommand {
    pub command: OutboundCommand,
    pub delay: Duration,
}

impl ScheduledCommand {
    fn immediate(command: OutboundCommand) -> Self {
        Self {
            command,
            delay: Duration::ZERO,
        }
    }
}

/// Routes inbound events through an atomically swappable translation table.
///
/// The table is replaced as a whole on recompilation; concurrent readers
/// always observe either the old or the new table, never a partial one.
pub struct Router {
    table: RwLock<Arc<TranslationTable>>,
    input_channel: u8,
}

impl Router {
    pub fn new() -> Self {
        Self::with_input_channel(DEFAULT_INPUT_CHANNEL)
    }

    pub fn with_input_channel(input_channel: u8) -> Self {
        Self {
            table: RwLock::new(Arc::new(TranslationTable::default())),
            input_channel,
        }
    }

    /// Replace the current table
    pub fn swap_table(&self, table: TranslationTable) {
        *self.table.write() = Arc::new(table);
    }

    /// Current table handle
    pub fn table(&self) -> Arc<TranslationTable> {
        self.table.read().clone()
    }

    /// Decide the outbound command(s) for one inbound event.
    ///
    /// Only note-on and CC events feed routing; inbound note-offs never
    /// trigger translation. An event without a table entry yields an empty
    /// sequence, which is a normal outcome for unmapped controls.
    pub fn route(&self, event: &InboundEvent) -> Vec<ScheduledCommand> {
        let kind = match event.kind {
            EventKind::NoteOn => RuleKind::Note,
            EventKind::ControlChange => RuleKind::ControlChange,
            EventKind::NoteOff => return Vec::new(),
        };

        let table = self.table.read().clone();
        let target = match table.resolve(kind, self.input_channel, event.controller, event.value) {
            Some(target) => *target,
            None => {
                trace!("No mapping for {}", event);
                return Vec::new();
            },
        };

        let value = target.value.resolve(event.value);
        match target.kind {
            RuleKind::ControlChange => vec![ScheduledCommand::immediate(OutboundCommand {
                kind: CommandKind::ControlChange,
                channel: target.channel,
                controller: target.controller,
                value,
            })],
            RuleKind::Note => vec![
                ScheduledCommand::immediate(OutboundCommand {
                    kind: CommandKind::NoteOn,
                    channel: target.channel,
                    controller: target.controller,
                    value,
                }),
                // The note-off is measured from the note-on dispatch; both
                // commands are handed to the relay at the same instant.
                ScheduledCommand {
                    command: OutboundCommand {
                        kind: CommandKind::NoteOff,
                        channel: target.channel,
                        controller: target.controller,
                        value: 0,
                    },
                    delay: Duration::from_millis(target.delay_ms),
                },
            ],
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{compile, NullRegistrar};

    fn router_with_rules(rules: &[(&str, &str)]) -> Router {
        let pairs: Vec<(String, String)> = rules
            .iter()
            .map(|(s, d)| (s.to_string(), d.to_string()))
            .collect();
        let report = compile(&pairs, &mut NullRegistrar);
        assert!(report.rejected.is_empty());

        let router = Router::new();
        router.swap_table(report.table);
        router
    }

    #[test]
    fn test_cc_event_yields_one_immediate_command() {
        let router = router_with_rules(&[("CC.1.10.X", "CC.1.20.X")]);

        let event = InboundEvent::from_raw(&[0xB0, 10, 64]).unwrap();
        let commands = router.route(&event);

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].delay, Duration::ZERO);
        assert_eq!(commands[0].command.encode(), "CC 1 20 64");
    }

    #[test]
    fn test_note_event_yields_note_on_and_delayed_note_off() {
        let router = router_with_rules(&[("NOTE.1.60.100", "NOTE.1.61.127.250ms")]);

        let event = InboundEvent::from_raw(&[0x90, 60, 100]).unwrap();
        let commands = router.route(&event);

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].command.encode(), "NoteOn 1 61 127");
        assert_eq!(commands[0].delay, Duration::ZERO);
        assert_eq!(commands[1].command.encode(), "NoteOff 1 61 0");
        assert_eq!(commands[1].delay, Duration::from_millis(250));
    }

    #[test]
    fn test_note_to_cc_target() {
        let router = router_with_rules(&[("NOTE.1.60.127", "CC.2.30.99")]);

        let event = InboundEvent::from_raw(&[0x90, 60, 127]).unwrap();
        let commands = router.route(&event);

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command.encode(), "CC 2 30 99");
    }

    #[test]
    fn test_unmapped_event_yields_nothing() {
        let router = router_with_rules(&[("CC.1.10.X", "CC.1.20.X")]);

        let event = InboundEvent::from_raw(&[0xB0, 99, 64]).unwrap();
        assert!(router.route(&event).is_empty());

        // Bucket exists but the value is unmapped
        let router = router_with_rules(&[("CC.1.10.64", "CC.1.20.1")]);
        let event = InboundEvent::from_raw(&[0xB0, 10, 65]).unwrap();
        assert!(router.route(&event).is_empty());
    }

    #[test]
    fn test_inbound_note_off_is_ignored() {
        let router = router_with_rules(&[("NOTE.1.60.X", "NOTE.1.61.X.100ms")]);

        let event = InboundEvent::from_raw(&[0x80, 60, 0]).unwrap();
        assert!(router.route(&event).is_empty());
    }

    #[test]
    fn test_lookup_uses_default_input_channel() {
        // Rules on channel 2 are indexed but never hit by the default router
        let router = router_with_rules(&[("CC.2.10.X", "CC.1.20.X")]);
        let event = InboundEvent::from_raw(&[0xB1, 10, 64]).unwrap();
        assert!(router.route(&event).is_empty());

        // A router parameterized to channel 2 resolves them
        let pairs = vec![("CC.2.10.X".to_string(), "CC.1.20.X".to_string())];
        let report = compile(&pairs, &mut NullRegistrar);
        let router = Router::with_input_channel(2);
        router.swap_table(report.table);
        assert_eq!(router.route(&event).len(), 1);
    }

    #[test]
    fn test_swap_table_replaces_whole_table() {
        let router = router_with_rules(&[("CC.1.10.X", "CC.1.20.X")]);
        let event = InboundEvent::from_raw(&[0xB0, 10, 64]).unwrap();
        assert_eq!(router.route(&event).len(), 1);

        let report = compile(
            &[("CC.1.11.X".to_string(), "CC.1.21.X".to_string())],
            &mut NullRegistrar,
        );
        router.swap_table(report.table);

        assert!(router.route(&event).is_empty());
        let event = InboundEvent::from_raw(&[0xB0, 11, 64]).unwrap();
        assert_eq!(router.route(&event).len(), 1);
    }
}
