//! Rule compiler and translation table
//!
//! Parses textual `source -> destination` mapping rules and compiles them
//! into the indexed lookup structure the event router queries.
//!
//! Specs are dot-separated: `<KIND>.<channel>.<key>.<value-or-X>` on the
//! source side, with an optional `.<duration>ms` fifth field on the
//! destination side. A wildcard `X` source value expands eagerly into 128
//! concrete entries whose target value passes the inbound value through.

use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Wildcard token matching all 128 source values
pub const WILDCARD: &str = "X";

/// Rule-level message kind (note number space vs. CC number space)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Note,
    ControlChange,
}

impl RuleKind {
    fn parse(field: &str) -> Result<Self, RuleError> {
        match field {
            "NOTE" => Ok(RuleKind::Note),
            "CC" => Ok(RuleKind::ControlChange),
            other => Err(RuleError::UnknownKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// Identifies one inbound matching bucket (together with a value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub kind: RuleKind,

    /// 1-based MIDI channel as written in the rule
    pub channel: u8,

    /// Note number or CC number (0-127)
    pub controller: u8,
}

/// Destination value: a literal, or the inbound value passed through.
///
/// Pass-through is a first-class variant so it can never be confused with a
/// literal 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetValue {
    Literal(u8),
    PassThrough,
}

impl TargetValue {
    /// Concrete outbound value for a given inbound value
    pub fn resolve(&self, inbound: u8) -> u8 {
        match self {
            TargetValue::Literal(v) => *v,
            TargetValue::PassThrough => inbound,
        }
    }
}

/// Compiled destination of one table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleTarget {
    pub kind: RuleKind,
    pub channel: u8,
    pub controller: u8,
    pub value: TargetValue,

    /// Gap between note-on and the synthesized note-off; always 0 for CC
    pub delay_ms: u64,
}

/// Errors rejecting a single rule during compilation
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("malformed spec '{spec}': expected at least 4 dot-separated fields")]
    Malformed { spec: String },

    #[error("unknown kind '{kind}': expected NOTE or CC")]
    UnknownKind { kind: String },

    #[error("invalid channel '{field}': expected 1-16")]
    InvalidChannel { field: String },

    #[error("invalid number '{field}': expected 0-127")]
    InvalidNumber { field: String },

    #[error("invalid duration '{field}': expected '<millis>ms'")]
    InvalidDuration { field: String },
}

fn parse_channel(field: &str) -> Result<u8, RuleError> {
    match field.parse::<u8>() {
        Ok(ch) if (1..=16).contains(&ch) => Ok(ch),
        _ => Err(RuleError::InvalidChannel {
            field: field.to_string(),
        }),
    }
}

fn parse_data_byte(field: &str) -> Result<u8, RuleError> {
    match field.parse::<u8>() {
        Ok(v) if v <= 127 => Ok(v),
        _ => Err(RuleError::InvalidNumber {
            field: field.to_string(),
        }),
    }
}

fn parse_duration_ms(field: &str) -> Result<u64, RuleError> {
    field
        .strip_suffix("ms")
        .and_then(|n| n.parse::<u64>().ok())
        .ok_or_else(|| RuleError::InvalidDuration {
            field: field.to_string(),
        })
}

/// Parsed source side of a rule
struct SourceSpec {
    key: RuleKey,

    /// `None` means the wildcard: all 128 values
    value: Option<u8>,
}

impl SourceSpec {
    fn parse(spec: &str) -> Result<Self, RuleError> {
        let fields: Vec<&str> = spec.split('.').collect();
        if fields.len() < 4 {
            return Err(RuleError::Malformed {
                spec: spec.to_string(),
            });
        }

        let value = if fields[3] == WILDCARD {
            None
        } else {
            Some(parse_data_byte(fields[3])?)
        };

        Ok(Self {
            key: RuleKey {
                kind: RuleKind::parse(fields[0])?,
                channel: parse_channel(fields[1])?,
                controller: parse_data_byte(fields[2])?,
            },
            value,
        })
    }
}

/// Parsed destination side of a rule
struct DestSpec {
    kind: RuleKind,
    channel: u8,
    controller: u8,
    value: TargetValue,
    delay_ms: u64,
}

impl DestSpec {
    fn parse(spec: &str) -> Result<Self, RuleError> {
        let fields: Vec<&str> = spec.split('.').collect();
        if fields.len() < 4 {
            return Err(RuleError::Malformed {
                spec: spec.to_string(),
            });
        }

        let value = if fields[3] == WILDCARD {
            TargetValue::PassThrough
        } else {
            TargetValue::Literal(parse_data_byte(fields[3])?)
        };

        // Missing fifth field means no note-off delay
        let delay_ms = match fields.get(4) {
            Some(field) => parse_duration_ms(field)?,
            None => 0,
        };

        Ok(Self {
            kind: RuleKind::parse(fields[0])?,
            channel: parse_channel(fields[1])?,
            controller: parse_data_byte(fields[2])?,
            value,
            delay_ms,
        })
    }

    fn target(&self, value: TargetValue) -> RuleTarget {
        RuleTarget {
            kind: self.kind,
            channel: self.channel,
            controller: self.controller,
            value,
            delay_ms: self.delay_ms,
        }
    }
}

/// Host boundary: receives one "forward this control to the script"
/// declaration per compiled rule.
pub trait ForwardRegistrar {
    fn register(&mut self, kind: RuleKind, channel: u8, controller: u8);
}

/// Registrar for contexts without a host (tests, dry compiles)
pub struct NullRegistrar;

impl ForwardRegistrar for NullRegistrar {
    fn register(&mut self, _kind: RuleKind, _channel: u8, _controller: u8) {}
}

/// Indexed mapping from inbound (kind, channel, key, value) to a target.
///
/// Replaced as a whole on recompilation; no entry-level mutation.
#[derive(Debug, Default)]
pub struct TranslationTable {
    buckets: HashMap<RuleKey, HashMap<u8, RuleTarget>>,
}

impl TranslationTable {
    /// Look up the target for one inbound combination.
    ///
    /// Returns `None` when the bucket does not exist or has no entry for the
    /// given value; both are normal outcomes for unmapped controls.
    pub fn resolve(
        &self,
        kind: RuleKind,
        channel: u8,
        controller: u8,
        value: u8,
    ) -> Option<&RuleTarget> {
        self.buckets
            .get(&RuleKey {
                kind,
                channel,
                controller,
            })
            .and_then(|bucket| bucket.get(&value))
    }

    /// Total number of concrete value entries
    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Insert one entry, returning true when it replaced an earlier one
    fn insert(&mut self, key: RuleKey, value: u8, target: RuleTarget) -> bool {
        self.buckets
            .entry(key)
            .or_default()
            .insert(value, target)
            .is_some()
    }
}

/// Outcome of compiling a rule list
#[derive(Debug)]
pub struct CompileReport {
    pub table: TranslationTable,

    /// Rules accepted into the table
    pub accepted: usize,

    /// Entries replaced by a later rule keying the same tuple
    pub overwritten: usize,

    /// Rejected rules with the reason, in file order
    pub rejected: Vec<(String, RuleError)>,
}

/// Compile an ordered list of `(source, destination)` rule pairs.
///
/// Rules are processed in file order and later rules silently replace
/// earlier entries for the same (kind, channel, key, value) tuple; the
/// replacement count is surfaced in the report. A rule that fails to parse
/// is rejected and collected without aborting the rest of the compile.
pub fn compile(rules: &[(String, String)], registrar: &mut dyn ForwardRegistrar) -> CompileReport {
    let mut table = TranslationTable::default();
    let mut accepted = 0;
    let mut overwritten = 0;
    let mut rejected = Vec::new();

    for (source, dest) in rules {
        let parsed = SourceSpec::parse(source).and_then(|s| Ok((s, DestSpec::parse(dest)?)));
        let (source_spec, dest_spec) = match parsed {
            Ok(pair) => pair,
            Err(err) => {
                rejected.push((format!("{source} -> {dest}"), err));
                continue;
            },
        };

        let key = source_spec.key;
        match source_spec.value {
            // Wildcard source: one entry per possible inbound value, each
            // passing that value through to the destination.
            None => {
                for value in 0..=127u8 {
                    if table.insert(key, value, dest_spec.target(TargetValue::PassThrough)) {
                        overwritten += 1;
                    }
                }
            },
            Some(value) => {
                if table.insert(key, value, dest_spec.target(dest_spec.value)) {
                    overwritten += 1;
                }
            },
        }

        registrar.register(key.kind, key.channel, key.controller);
        accepted += 1;
        debug!("Compiled rule {} -> {}", source, dest);
    }

    CompileReport {
        table,
        accepted,
        overwritten,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pairs(rules: &[(&str, &str)]) -> Vec<(String, String)> {
        rules
            .iter()
            .map(|(s, d)| (s.to_string(), d.to_string()))
            .collect()
    }

    #[test]
    fn test_literal_rule_single_entry() {
        let report = compile(
            &pairs(&[("NOTE.1.60.100", "NOTE.1.61.127.500ms")]),
            &mut NullRegistrar,
        );

        assert!(report.rejected.is_empty());
        assert_eq!(report.table.len(), 1);

        let target = report
            .table
            .resolve(RuleKind::Note, 1, 60, 100)
            .expect("entry for the literal value");
        assert_eq!(target.kind, RuleKind::Note);
        assert_eq!(target.channel, 1);
        assert_eq!(target.controller, 61);
        assert_eq!(target.value, TargetValue::Literal(127));
        assert_eq!(target.delay_ms, 500);

        // Other values of the same bucket stay unmapped
        assert!(report.table.resolve(RuleKind::Note, 1, 60, 99).is_none());
    }

    #[test]
    fn test_wildcard_expands_to_128_passthrough_entries() {
        let report = compile(&pairs(&[("CC.1.10.X", "CC.1.20.X")]), &mut NullRegistrar);

        assert_eq!(report.table.len(), 128);
        for value in 0..=127u8 {
            let target = report
                .table
                .resolve(RuleKind::ControlChange, 1, 10, value)
                .unwrap();
            assert_eq!(target.value, TargetValue::PassThrough);
            assert_eq!(target.value.resolve(value), value);
            assert_eq!(target.delay_ms, 0);
        }
    }

    #[test]
    fn test_missing_duration_defaults_to_zero() {
        let report = compile(&pairs(&[("NOTE.1.60.100", "NOTE.1.61.127")]), &mut NullRegistrar);
        let target = report.table.resolve(RuleKind::Note, 1, 60, 100).unwrap();
        assert_eq!(target.delay_ms, 0);
    }

    #[test]
    fn test_malformed_rule_rejected_but_compile_continues() {
        let report = compile(
            &pairs(&[
                ("CC.1.10", "CC.1.20.X"),
                ("CC.1.10.X", "CC.1.20"),
                ("CC.1.11.X", "CC.1.21.X"),
            ]),
            &mut NullRegistrar,
        );

        assert_eq!(report.rejected.len(), 2);
        assert!(matches!(report.rejected[0].1, RuleError::Malformed { .. }));
        assert_eq!(report.accepted, 1);
        assert_eq!(report.table.len(), 128);
    }

    #[test]
    fn test_invalid_fields_rejected() {
        let report = compile(
            &pairs(&[
                ("PB.1.10.X", "CC.1.20.X"),
                ("CC.0.10.X", "CC.1.20.X"),
                ("CC.1.200.X", "CC.1.20.X"),
                ("NOTE.1.60.100", "NOTE.1.61.127.500"),
            ]),
            &mut NullRegistrar,
        );

        assert_eq!(report.accepted, 0);
        assert!(matches!(report.rejected[0].1, RuleError::UnknownKind { .. }));
        assert!(matches!(report.rejected[1].1, RuleError::InvalidChannel { .. }));
        assert!(matches!(report.rejected[2].1, RuleError::InvalidNumber { .. }));
        assert!(matches!(
            report.rejected[3].1,
            RuleError::InvalidDuration { .. }
        ));
    }

    #[test]
    fn test_last_rule_wins_and_overwrites_are_counted() {
        let report = compile(
            &pairs(&[("CC.1.10.64", "CC.1.20.1"), ("CC.1.10.64", "CC.1.21.2")]),
            &mut NullRegistrar,
        );

        assert_eq!(report.overwritten, 1);
        let target = report
            .table
            .resolve(RuleKind::ControlChange, 1, 10, 64)
            .unwrap();
        assert_eq!(target.controller, 21);
        assert_eq!(target.value, TargetValue::Literal(2));
    }

    #[test]
    fn test_wildcard_overwriting_literal_counts_once() {
        let report = compile(
            &pairs(&[("CC.1.10.64", "CC.1.20.1"), ("CC.1.10.X", "CC.1.21.X")]),
            &mut NullRegistrar,
        );

        assert_eq!(report.overwritten, 1);
        assert_eq!(report.table.len(), 128);
    }

    #[test]
    fn test_forward_registration_per_rule() {
        struct Recorder(Vec<(RuleKind, u8, u8)>);
        impl ForwardRegistrar for Recorder {
            fn register(&mut self, kind: RuleKind, channel: u8, controller: u8) {
                self.0.push((kind, channel, controller));
            }
        }

        let mut recorder = Recorder(Vec::new());
        compile(
            &pairs(&[
                ("CC.1.10.X", "CC.1.20.X"),
                ("NOTE.2.60.100", "NOTE.1.61.127.500ms"),
                ("bogus", "CC.1.20.X"),
            ]),
            &mut recorder,
        );

        assert_eq!(
            recorder.0,
            vec![
                (RuleKind::ControlChange, 1, 10),
                (RuleKind::Note, 2, 60),
            ]
        );
    }

    #[test]
    fn test_channel_indexed_as_parsed() {
        let report = compile(&pairs(&[("CC.5.10.X", "CC.1.20.X")]), &mut NullRegistrar);
        assert!(report
            .table
            .resolve(RuleKind::ControlChange, 5, 10, 0)
            .is_some());
        assert!(report
            .table
            .resolve(RuleKind::ControlChange, 1, 10, 0)
            .is_none());
    }

    proptest! {
        #[test]
        fn prop_resolve_is_pure_and_passes_through(value in 0u8..=127) {
            let report = compile(&pairs(&[("CC.1.10.X", "CC.1.20.X")]), &mut NullRegistrar);

            let first = report.table.resolve(RuleKind::ControlChange, 1, 10, value).copied();
            let second = report.table.resolve(RuleKind::ControlChange, 1, 10, value).copied();
            prop_assert_eq!(first, second);

            let target = first.unwrap();
            prop_assert_eq!(target.value.resolve(value), value);
        }
    }
}
