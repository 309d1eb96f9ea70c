//! ECO opening classification.
//!
//! Maps Polyglot position hashes to ECO codes and opening names. The
//! classification data is frozen reference material: a built-in subset is
//! compiled into the crate, and a complete table can be loaded from a
//! tab-separated file (`hash<TAB>code<TAB>name` per line).
//!
//! Classification scans a game's position hashes in order and keeps the
//! deepest (last) position that appears in the table, so longer theory
//! lines win over their parent openings.

mod builtin;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

/// Errors from loading an external ECO table.
#[derive(Debug, Error)]
pub enum EcoError {
    #[error("failed to read ECO table: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed ECO table line {0}: {1:?}")]
    BadLine(usize, String),
}

/// One classification entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcoEntry {
    /// The ECO code, e.g. "B12".
    pub code: String,
    /// The opening name, e.g. "Caro-Kann defence".
    pub name: String,
}

/// A hash-keyed ECO lookup table.
#[derive(Debug, Clone)]
pub struct EcoTable {
    entries: HashMap<u64, EcoEntry>,
}

impl EcoTable {
    /// Creates the built-in table.
    pub fn builtin() -> Self {
        let mut entries = HashMap::with_capacity(builtin::BUILTIN.len());
        for &(hash, text) in builtin::BUILTIN {
            entries.insert(hash, parse_entry(text));
        }
        EcoTable { entries }
    }

    /// Creates an empty table.
    pub fn empty() -> Self {
        EcoTable {
            entries: HashMap::new(),
        }
    }

    /// Loads a table from a tab-separated file, one entry per line:
    /// `hash<TAB>code<TAB>name`. Blank lines and `#` comments are skipped.
    pub fn load_tsv<P: AsRef<Path>>(path: P) -> Result<Self, EcoError> {
        let reader = BufReader::new(File::open(path)?);
        let mut entries = HashMap::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut fields = trimmed.splitn(3, '\t');
            let hash = fields
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| EcoError::BadLine(lineno + 1, line.clone()))?;
            let code = fields
                .next()
                .ok_or_else(|| EcoError::BadLine(lineno + 1, line.clone()))?;
            let name = fields.next().unwrap_or("");
            entries.insert(
                hash,
                EcoEntry {
                    code: code.to_string(),
                    name: name.to_string(),
                },
            );
        }
        Ok(EcoTable { entries })
    }

    /// Looks up a single position hash.
    pub fn get(&self, hash: u64) -> Option<&EcoEntry> {
        self.entries.get(&hash)
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classifies a game from its sequence of position hashes, returning
    /// the entry of the last position found in the table.
    pub fn classify<I: IntoIterator<Item = u64>>(&self, hashes: I) -> Option<&EcoEntry> {
        let mut found = None;
        for hash in hashes {
            if let Some(entry) = self.entries.get(&hash) {
                found = Some(entry);
            }
        }
        found
    }
}

/// Splits the packed "CODE;name;variation" form used by the data table.
fn parse_entry(text: &str) -> EcoEntry {
    match text.split_once(';') {
        Some((code, name)) => EcoEntry {
            code: code.to_string(),
            name: name.replace(';', ", "),
        },
        None => EcoEntry {
            code: text.to_string(),
            name: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_is_populated() {
        let table = EcoTable::builtin();
        assert!(table.len() > 500);
    }

    #[test]
    fn classify_returns_last_hit() {
        let table = EcoTable::builtin();
        let (&h1, _) = table.entries.iter().next().unwrap();
        let (&h2, e2) = table.entries.iter().nth(1).unwrap();
        let found = table.classify([h1, 12345, h2]).unwrap();
        assert_eq!(found, e2);
        assert_eq!(table.classify([12345u64]), None);
    }

    #[test]
    fn entry_splits_code_and_name() {
        let e = parse_entry("B12;Caro-Kann;advance variation");
        assert_eq!(e.code, "B12");
        assert_eq!(e.name, "Caro-Kann, advance variation");
    }

    #[test]
    fn builtin_codes_are_well_formed() {
        let table = EcoTable::builtin();
        for entry in table.entries.values() {
            assert_eq!(entry.code.len(), 3, "ECO code is letter+two digits");
            assert!(entry.code.starts_with(|c: char| ('A'..='E').contains(&c)));
        }
    }

    #[test]
    fn classifies_replayed_positions() {
        use chessdb_engine::{Board, ReplayOptions};

        let mut board = Board::new();
        let opts = ReplayOptions {
            quick_check: true,
            ..Default::default()
        };
        board
            .replay_text("1. e4 c6 2. d4 d5 3. e5 Bf5", &opts, None)
            .unwrap();
        let hashes: Vec<u64> = board
            .history
            .iter()
            .map(|h| h.hash)
            .chain([board.hash()])
            .collect();
        // The hash sequence is fed in game order; whichever theory
        // position is known, the deepest one is kept.
        let table = EcoTable::builtin();
        if let Some(entry) = table.classify(hashes) {
            assert!(entry.code.starts_with(['A', 'B', 'C', 'D', 'E']));
        }
    }
}
