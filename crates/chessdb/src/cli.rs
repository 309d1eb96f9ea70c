//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

/// chessdb - build and query SQLite chess game databases from PGN files.
#[derive(Debug, Parser)]
#[command(name = "chessdb")]
#[command(about = "Convert PGN files into a SQLite database and query positions")]
pub struct Args {
    /// Input PGN file; repeat to add more files
    #[arg(long = "pgn", value_name = "FILE")]
    pub pgn: Vec<PathBuf>,

    /// Database path; use :memory: for an ephemeral database
    #[arg(long = "db", value_name = "FILE")]
    pub db: Vec<PathBuf>,

    /// Worker thread count; defaults to all cores
    #[arg(long = "cpu", value_name = "N")]
    pub cpu: Option<usize>,

    /// Discard games where either player's Elo is below N
    #[arg(long = "elo", value_name = "N")]
    pub elo: Option<u32>,

    /// Discard games shorter than N plies
    #[arg(long = "plycount", value_name = "N")]
    pub plycount: Option<u32>,

    /// Stop a query after N hits
    #[arg(long = "resultcount", value_name = "N")]
    pub resultcount: Option<u64>,

    /// Comma-separated options: moves, moves1, moves2, acceptnewtags,
    /// discardcomments, discardsites, discardnoelo, discardfen, reseteco,
    /// printall, printfen, printpgn, remove, embededgames
    #[arg(short = 'o', long = "options", value_name = "LIST")]
    pub options: Vec<String>,

    /// Position query; repeat to add more queries
    #[arg(short = 'q', long = "query", value_name = "QUERY")]
    pub queries: Vec<String>,

    /// Print the game with this ID
    #[arg(short = 'g', long = "game", value_name = "ID")]
    pub game_id: Option<i64>,

    /// Export a database back to PGN (with --db and --pgn)
    #[arg(long)]
    pub export: bool,

    /// Benchmark position searching (with --db)
    #[arg(long)]
    pub bench: bool,

    /// Scan for duplicate games (with --db)
    #[arg(long)]
    pub dup: bool,

    /// Verbose logging
    #[arg(long)]
    pub debug: bool,

    /// Report file for query hits and duplicates; .json selects
    /// JSON-lines output
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

/// What a single invocation should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Create,
    Query,
    GetGame,
    Export,
    Bench,
    Duplicates,
}

impl Args {
    /// Derives the task from the given flags.
    pub fn task(&self) -> Result<Task, String> {
        if self.bench {
            return Ok(Task::Bench);
        }
        if self.export {
            return Ok(Task::Export);
        }
        if self.dup {
            return Ok(Task::Duplicates);
        }
        if self.game_id.is_some() {
            return Ok(Task::GetGame);
        }
        if !self.queries.is_empty() {
            return Ok(Task::Query);
        }
        if !self.pgn.is_empty() && !self.db.is_empty() {
            return Ok(Task::Create);
        }
        Err("nothing to do: pass --pgn with --db to build, or --query/--export/--bench/--dup/--game".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("chessdb").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn create_task() {
        let args = parse(&["--pgn", "x.pgn", "--db", "x.db", "-o", "moves,moves2"]);
        assert_eq!(args.task(), Ok(Task::Create));
        assert_eq!(args.pgn.len(), 1);
    }

    #[test]
    fn query_task() {
        let args = parse(&["--db", "x.db", "-q", "Q = 3", "-q", "kb7"]);
        assert_eq!(args.task(), Ok(Task::Query));
        assert_eq!(args.queries.len(), 2);
    }

    #[test]
    fn mode_switches() {
        assert_eq!(parse(&["--db", "x.db", "--bench"]).task(), Ok(Task::Bench));
        assert_eq!(
            parse(&["--db", "x.db", "--pgn", "o.pgn", "--export"]).task(),
            Ok(Task::Export)
        );
        assert_eq!(
            parse(&["--db", "x.db", "-g", "42"]).task(),
            Ok(Task::GetGame)
        );
        assert_eq!(
            parse(&["--db", "x.db", "--dup"]).task(),
            Ok(Task::Duplicates)
        );
    }

    #[test]
    fn no_task_is_an_error() {
        assert!(parse(&["--db", "x.db"]).task().is_err());
    }
}
