use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use chessdb::cli::{Args, Task};
use chessdb::options::{Limits, Options};
use chessdb::report::Report;
use chessdb::{dup, export, ingest, search};

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let help = matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            let _ = err.print();
            return ExitCode::from(if help { 0 } else { 1 });
        }
    };

    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let task = args.task().map_err(|e| anyhow::anyhow!(e))?;

    let mut options = Options::default();
    for list in &args.options {
        let parsed = Options::parse(list).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        options = merge(options, parsed);
    }

    let limits = Limits {
        min_elo: args.elo.unwrap_or(0),
        min_ply: args.plycount.unwrap_or(0),
        result_limit: args.resultcount.unwrap_or(u64::MAX),
    };
    let threads = args.cpu.unwrap_or(0);

    let report = Arc::new(match &args.report {
        Some(path) => Report::file(path)?,
        None if options.print_fen || options.print_pgn => Report::stdout(),
        None => Report::none(),
    });

    match task {
        Task::Create => {
            let db = args
                .db
                .first()
                .ok_or_else(|| anyhow::anyhow!("--db is required to build a database"))?;
            ingest::convert(&args.pgn, db, options, limits, threads)?;
        }
        Task::Query => {
            search::run_queries(
                &args.queries,
                &args.db,
                &args.pgn,
                options,
                limits,
                threads,
                report,
            )?;
        }
        Task::Bench => {
            anyhow::ensure!(!args.db.is_empty(), "--bench needs --db");
            search::run_bench(&args.db, options, limits, threads)?;
        }
        Task::Export => {
            let db = args
                .db
                .first()
                .ok_or_else(|| anyhow::anyhow!("--export needs --db"))?;
            let out = args
                .pgn
                .first()
                .ok_or_else(|| anyhow::anyhow!("--export needs --pgn as the output path"))?;
            export::export_db(db, out)?;
        }
        Task::GetGame => {
            let db = args
                .db
                .first()
                .ok_or_else(|| anyhow::anyhow!("--game needs --db"))?;
            let id = args.game_id.expect("task derivation checked the flag");
            export::print_game(db, id)?;
        }
        Task::Duplicates => {
            anyhow::ensure!(!args.db.is_empty(), "--dup needs --db");
            let (duplicates, removed) =
                dup::find_duplicates(&args.db, options, limits, threads, report)?;
            tracing::info!(duplicates, removed, "duplicate scan complete");
        }
    }
    Ok(())
}

/// Unions two option sets; later lists only add flags.
fn merge(a: Options, b: Options) -> Options {
    Options {
        moves: a.moves | b.moves,
        moves1: a.moves1 | b.moves1,
        moves2: a.moves2 | b.moves2,
        accept_new_tags: a.accept_new_tags | b.accept_new_tags,
        discard_comments: a.discard_comments | b.discard_comments,
        discard_sites: a.discard_sites | b.discard_sites,
        discard_no_elo: a.discard_no_elo | b.discard_no_elo,
        discard_fen: a.discard_fen | b.discard_fen,
        reset_eco: a.reset_eco | b.reset_eco,
        print_all: a.print_all | b.print_all,
        print_fen: a.print_fen | b.print_fen,
        print_pgn: a.print_pgn | b.print_pgn,
        remove: a.remove | b.remove,
        embedded_games: a.embedded_games | b.embedded_games,
    }
}
