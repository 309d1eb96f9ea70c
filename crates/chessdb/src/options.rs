//! Run options and limits.

use std::fmt;

/// Boolean options selected with `-o name,name,...`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Store move text in a `Moves` TEXT column.
    pub moves: bool,
    /// Store the 1-byte binary encoding in a `Moves1` BLOB column.
    pub moves1: bool,
    /// Store the 2-byte binary encoding in a `Moves2` BLOB column.
    pub moves2: bool,
    /// Add a column when an unknown PGN tag appears.
    pub accept_new_tags: bool,
    /// Drop `{...}` comments on ingest.
    pub discard_comments: bool,
    /// Store SiteID 1 (empty) for every game.
    pub discard_sites: bool,
    /// Reject games missing either player's Elo.
    pub discard_no_elo: bool,
    /// Reject games that carry a FEN tag.
    pub discard_fen: bool,
    /// Recompute the ECO code even when the tag is present.
    pub reset_eco: bool,
    /// Print every query hit.
    pub print_all: bool,
    /// Print the FEN of every query hit.
    pub print_fen: bool,
    /// Print the PGN of every query hit.
    pub print_pgn: bool,
    /// Delete confirmed duplicates.
    pub remove: bool,
    /// Detect games embedded as prefixes of longer games.
    pub embedded_games: bool,
}

impl Options {
    /// Parses a comma-separated option list. Unknown names are reported
    /// back as errors; `printfen`/`printpgn` imply `printall`.
    pub fn parse(list: &str) -> Result<Self, UnknownOption> {
        let mut options = Options::default();
        for name in list.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            match name {
                "moves" => options.moves = true,
                "moves1" => options.moves1 = true,
                "moves2" => options.moves2 = true,
                "acceptnewtags" => options.accept_new_tags = true,
                "discardcomments" => options.discard_comments = true,
                "discardsites" => options.discard_sites = true,
                "discardnoelo" => options.discard_no_elo = true,
                "discardfen" => options.discard_fen = true,
                "reseteco" => options.reset_eco = true,
                "printall" => options.print_all = true,
                "printfen" => {
                    options.print_fen = true;
                    options.print_all = true;
                }
                "printpgn" => {
                    options.print_pgn = true;
                    options.print_all = true;
                }
                "remove" => options.remove = true,
                "embededgames" | "embeddedgames" => options.embedded_games = true,
                _ => return Err(UnknownOption(name.to_string())),
            }
        }
        Ok(options)
    }

    /// True when any move column is requested.
    pub fn stores_moves(&self) -> bool {
        self.moves || self.moves1 || self.moves2
    }
}

/// An option name that is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOption(pub String);

impl fmt::Display for UnknownOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown option: {}", self.0)
    }
}

impl std::error::Error for UnknownOption {}

/// Numeric limits applied during ingest and query.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Reject games where either player's Elo is below this.
    pub min_elo: u32,
    /// Reject games shorter than this many plies.
    pub min_ply: u32,
    /// Stop a query after this many hits.
    pub result_limit: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            min_elo: 0,
            min_ply: 0,
            result_limit: u64::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_option_list() {
        let o = Options::parse("moves,moves1,discardsites").unwrap();
        assert!(o.moves && o.moves1 && o.discard_sites);
        assert!(!o.moves2);
        assert!(o.stores_moves());
    }

    #[test]
    fn print_modes_imply_print_all() {
        let o = Options::parse("printfen").unwrap();
        assert!(o.print_fen && o.print_all);
        let o = Options::parse("printpgn").unwrap();
        assert!(o.print_pgn && o.print_all);
    }

    #[test]
    fn rejects_unknown_names() {
        assert_eq!(
            Options::parse("moves,bogus"),
            Err(UnknownOption("bogus".to_string()))
        );
    }

    #[test]
    fn empty_list_is_default() {
        assert_eq!(Options::parse("").unwrap(), Options::default());
        assert!(!Options::default().stores_moves());
    }
}
