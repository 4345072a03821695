//! Settings file loading
//!
//! Settings are a YAML table of named mapping sections; each entry maps a
//! dot-delimited source spec to a dot-delimited destination spec:
//!
//! ```yaml
//! MP1:
//!   CC.1.10.X: CC.1.20.X
//!   NOTE.1.60.100: NOTE.1.61.127.500ms
//! ```
//!
//! Sections and entries are kept in file order so that later rules win on
//! colliding keys.

pub mod watcher;

use anyhow::{bail, Context, Result};
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tokio::fs;

pub use watcher::SettingsWatcher;

/// One `source -> destination` rule pair, in file order
pub type RulePair = (String, String);

/// Parsed settings file: the flat, ordered rule list
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub rules: Vec<RulePair>,
}

impl Settings {
    /// Load and parse the settings file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    /// Parse settings from YAML text
    pub fn parse(contents: &str) -> Result<Self> {
        let doc: Mapping =
            serde_yaml::from_str(contents).context("settings must be a mapping of sections")?;

        let mut rules = Vec::new();
        for (section, body) in doc {
            let name = scalar_str(&section).context("section names must be strings")?;

            let Value::Mapping(entries) = body else {
                bail!("section '{}' must be a mapping of source: destination", name);
            };

            for (source, dest) in entries {
                let source = scalar_str(&source)
                    .with_context(|| format!("bad rule source in section '{}'", name))?;
                let dest = scalar_str(&dest)
                    .with_context(|| format!("bad rule destination for '{}' in '{}'", source, name))?;
                rules.push((source, dest));
            }
        }

        Ok(Self { rules })
    }
}

/// Accept plain scalars, stringifying the numeric forms YAML may produce
fn scalar_str(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => bail!("expected a string, got {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections_in_file_order() {
        let settings = Settings::parse(
            r#"
MP1:
  CC.1.10.X: CC.1.20.X
  NOTE.1.60.100: NOTE.1.61.127.500ms

MP2:
  CC.1.10.X: CC.1.30.X
"#,
        )
        .unwrap();

        assert_eq!(
            settings.rules,
            vec![
                ("CC.1.10.X".to_string(), "CC.1.20.X".to_string()),
                ("NOTE.1.60.100".to_string(), "NOTE.1.61.127.500ms".to_string()),
                ("CC.1.10.X".to_string(), "CC.1.30.X".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_empty_document_fails() {
        assert!(Settings::parse("").is_err());
    }

    #[test]
    fn test_parse_non_mapping_section_fails() {
        assert!(Settings::parse("MP1: just-a-string\n").is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        assert!(Settings::load("/nonexistent/settings.yaml").await.is_err());
    }
}
