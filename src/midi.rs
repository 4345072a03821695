//! MIDI event model and wire encoding
//!
//! Normalizes raw status/data/data messages from the input pipeline and
//! encodes outbound commands in the text form the sender process understands.

use std::fmt;

/// Kind of an inbound performance event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    ControlChange,
}

/// Inbound event, normalized from a raw 3-byte MIDI message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundEvent {
    pub kind: EventKind,

    /// MIDI channel (1-16)
    pub channel: u8,

    /// Note number or CC number (0-127)
    pub controller: u8,

    /// Velocity or CC value (0-127)
    pub value: u8,
}

impl InboundEvent {
    /// Parse a raw MIDI message.
    ///
    /// Only note and control-change messages are of interest here; anything
    /// else (pitch bend, aftertouch, system messages, truncated data) returns
    /// `None` and is dropped upstream.
    pub fn from_raw(data: &[u8]) -> Option<Self> {
        if data.len() < 3 {
            return None;
        }

        let status = data[0];
        let kind = match status & 0xF0 {
            0x90 => EventKind::NoteOn,
            0x80 => EventKind::NoteOff,
            0xB0 => EventKind::ControlChange,
            _ => return None,
        };

        Some(Self {
            kind,
            channel: (status & 0x0F) + 1,
            controller: data[1] & 0x7F,
            value: data[2] & 0x7F,
        })
    }
}

impl fmt::Display for InboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            EventKind::NoteOn => "NoteOn",
            EventKind::NoteOff => "NoteOff",
            EventKind::ControlChange => "CC",
        };
        write!(
            f,
            "{} ch:{} key:{} v:{}",
            label, self.channel, self.controller, self.value
        )
    }
}

/// Kind of an outbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    NoteOn,
    NoteOff,
    ControlChange,
}

impl CommandKind {
    /// Wire label understood by the sender process
    pub fn label(&self) -> &'static str {
        match self {
            CommandKind::NoteOn => "NoteOn",
            CommandKind::NoteOff => "NoteOff",
            CommandKind::ControlChange => "CC",
        }
    }
}

/// Outbound command to be relayed to the sender process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundCommand {
    pub kind: CommandKind,
    pub channel: u8,
    pub controller: u8,
    pub value: u8,
}

impl OutboundCommand {
    /// Encode as the wire text the sender process parses:
    /// `"<NoteOn|NoteOff|CC> <channel> <key> <value>"`.
    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {}",
            self.kind.label(),
            self.channel,
            self.controller,
            self.value
        )
    }
}

impl fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
