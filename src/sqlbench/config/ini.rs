//! Minimal INI reader for run files
//!
//! Run files are simple enough that a full INI dialect is not needed:
//! `[section]` headers, `key = value` pairs (keys may repeat), blank
//! lines, and `#`/`;` comments. Order matters for repeated keys, so each
//! section keeps its entries as an ordered list rather than a map.

use crate::sqlbench::error::{BenchError, BenchResult};

#[derive(Debug, Clone, Default)]
pub struct RawSection {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    sections: Vec<RawSection>,
}

impl RawConfig {
    /// Parse the full text of a run file.
    ///
    /// Keys that appear before any `[section]` header belong to the
    /// global section, the same as keys under an explicit `[global]`.
    pub fn parse(text: &str) -> BenchResult<RawConfig> {
        let mut config = RawConfig::default();
        let mut current = RawSection {
            name: "global".to_string(),
            entries: Vec::new(),
        };

        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let name = header.strip_suffix(']').ok_or_else(|| {
                    BenchError::config(
                        format!("unterminated section header on line {}", lineno + 1),
                        None,
                    )
                })?;
                config.push(current);
                current = RawSection {
                    name: name.trim().to_string(),
                    entries: Vec::new(),
                };
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) => current
                    .entries
                    .push((key.trim().to_string(), value.trim().to_string())),
                None => {
                    return Err(BenchError::config(
                        format!("expected 'key = value' on line {}: {}", lineno + 1, line),
                        Some(current.name.clone()),
                    ))
                }
            }
        }
        config.push(current);
        Ok(config)
    }

    fn push(&mut self, section: RawSection) {
        // Repeated section headers (and the implicit leading global
        // fragment) merge in order.
        if let Some(existing) = self.sections.iter_mut().find(|s| s.name == section.name) {
            existing.entries.extend(section.entries);
        } else {
            self.sections.push(section);
        }
    }

    pub fn section(&self, name: &str) -> Option<&RawSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn sections(&self) -> impl Iterator<Item = &RawSection> {
        self.sections.iter()
    }
}
