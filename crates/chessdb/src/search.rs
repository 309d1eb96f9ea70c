//! Position-query execution over databases and PGN files.
//!
//! One parsed query tree is shared read-only by all workers; every game is
//! replayed on a worker-local board and the tree is evaluated against the
//! bitboard snapshot of every ply. The first matching ply makes the game a
//! hit and stops its replay.

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chessdb_engine::{Board, ReplayOptions, Snapshot};

use crate::export;
use crate::options::{Limits, Options};
use crate::pgn::{self, RawGame};
use crate::pool::WorkerPool;
use crate::query::{self, Query};
use crate::report::Report;
use crate::storage::{MoveField, Storage};

/// The fixed query set used by `-bench`.
pub const BENCH_QUERIES: [&str; 5] = [
    "Q = 3",
    "r[e4, e5, d4,d5]= 2",
    "P[d4, e5, f4, g4] = 4 and kb7",
    "B[c-f] + b[c-f] == 2",
    "white6 = 5",
];

/// Shared state for one query run.
struct SearchContext {
    query: Query,
    options: Options,
    hits: AtomicU64,
    games: AtomicU64,
    errors: AtomicU64,
    result_limit: u64,
    report: Arc<Report>,
}

impl SearchContext {
    fn limit_reached(&self) -> bool {
        self.hits.load(Ordering::Relaxed) >= self.result_limit
    }
}

/// A game handed to a search worker.
enum SearchGame {
    Pgn(RawGame),
    Db {
        id: i64,
        fen: String,
        moves: MoveData,
    },
}

enum MoveData {
    Text(String),
    Blob(Vec<u8>, MoveField),
}

thread_local! {
    static BOARD: RefCell<Board> = RefCell::new(Board::new());
}

/// Runs every query against the given databases and PGN files. Returns
/// the total hit count across all queries.
pub fn run_queries(
    queries: &[String],
    db_paths: &[PathBuf],
    pgn_paths: &[PathBuf],
    options: Options,
    limits: Limits,
    threads: usize,
    report: Arc<Report>,
) -> anyhow::Result<u64> {
    let mut total_hits = 0u64;
    for raw_query in queries {
        let text = query::strip_line_comments(raw_query);
        if text.is_empty() {
            continue;
        }

        tracing::info!(query = %text, "searching");
        let query = match Query::parse(&text) {
            Ok(query) => query,
            Err(err) => {
                tracing::error!(query = %text, "query error: {err}");
                continue;
            }
        };

        let context = Arc::new(SearchContext {
            query,
            options,
            hits: AtomicU64::new(0),
            games: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            result_limit: limits.result_limit,
            report: Arc::clone(&report),
        });
        if report.is_on() {
            if report.is_json() {
                report.record(serde_json::json!({ "query": text }));
            } else {
                report.print(&format!("; >>>>>> Query: {text}"));
            }
        }

        let pool = WorkerPool::new(threads);
        let start = Instant::now();

        for path in pgn_paths {
            search_pgn_file(&context, &pool, path)?;
        }
        for path in db_paths {
            search_database(&context, &pool, path)?;
        }
        pool.wait_for_tasks();

        let hits = context.hits.load(Ordering::Relaxed);
        tracing::info!(
            query = %text,
            games = context.games.load(Ordering::Relaxed),
            hits,
            errors = context.errors.load(Ordering::Relaxed),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "query done"
        );
        total_hits += hits;
    }
    report.flush();
    Ok(total_hits)
}

/// Runs the benchmark query set against the databases.
pub fn run_bench(
    db_paths: &[PathBuf],
    options: Options,
    limits: Limits,
    threads: usize,
) -> anyhow::Result<u64> {
    tracing::info!("benchmark: position searching");
    let queries: Vec<String> = BENCH_QUERIES.iter().map(|s| s.to_string()).collect();
    run_queries(
        &queries,
        db_paths,
        &[],
        options,
        limits,
        threads,
        Arc::new(Report::none()),
    )
}

fn search_pgn_file(
    context: &Arc<SearchContext>,
    pool: &WorkerPool,
    path: &PathBuf,
) -> anyhow::Result<()> {
    let stats = pgn::read_pgn_file(
        path,
        &mut |game: RawGame| {
            let context = Arc::clone(context);
            pool.submit(move || search_one(&context, SearchGame::Pgn(game)));
        },
        &mut || pool.wait_for_tasks(),
    )?;
    tracing::info!(path = %path.display(), blocks = stats.blocks, "PGN scan done");
    Ok(())
}

fn search_database(
    context: &Arc<SearchContext>,
    pool: &WorkerPool,
    path: &PathBuf,
) -> anyhow::Result<()> {
    let storage = Storage::open(path)?;
    let field = storage.move_field()?;
    let column = field.column_name();

    let conn = storage.conn.lock().expect("connection lock");
    let sql = format!("SELECT ID, FEN, {column} FROM Games");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        if context.limit_reached() {
            break;
        }
        let id: i64 = row.get(0)?;
        let fen: Option<String> = row.get(1)?;
        let moves = match field {
            MoveField::Text => MoveData::Text(row.get::<_, Option<String>>(2)?.unwrap_or_default()),
            _ => MoveData::Blob(
                row.get::<_, Option<Vec<u8>>>(2)?.unwrap_or_default(),
                field,
            ),
        };
        let game = SearchGame::Db {
            id,
            fen: fen.unwrap_or_default(),
            moves,
        };
        let context = Arc::clone(context);
        pool.submit(move || search_one(&context, game));
    }
    drop(rows);
    drop(stmt);
    drop(conn);

    pool.wait_for_tasks();
    Ok(())
}

fn search_one(context: &SearchContext, game: SearchGame) {
    if context.limit_reached() {
        return;
    }
    context.games.fetch_add(1, Ordering::Relaxed);

    BOARD.with(|board| {
        let mut board = board.borrow_mut();

        let (game_id, fen) = match &game {
            SearchGame::Pgn(raw) => (
                context.games.load(Ordering::Relaxed) as i64,
                raw.tags.get("FEN").cloned().unwrap_or_default(),
            ),
            SearchGame::Db { id, fen, .. } => (*id, fen.clone()),
        };

        if board.new_game(&fen).is_err() {
            context.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let opts = ReplayOptions {
            quick_check: true,
            discard_comments: true,
            create_snapshot: true,
            create_san: context.options.print_pgn,
            ..Default::default()
        };

        let query = &context.query;
        let mut cb = |snapshot: &Snapshot, _: &Board| query.matches(snapshot);

        let result = match &game {
            SearchGame::Pgn(raw) => board.replay_text(&raw.move_text, &opts, Some(&mut cb)),
            SearchGame::Db { moves, .. } => match moves {
                MoveData::Text(text) => board.replay_text(text, &opts, Some(&mut cb)),
                MoveData::Blob(blob, field) => board.replay_encoded(
                    blob,
                    *field == MoveField::OneByte,
                    &opts,
                    Some(&mut cb),
                ),
            },
        };

        match result {
            Ok(true) => {
                let hit = context.hits.fetch_add(1, Ordering::Relaxed) + 1;
                report_hit(context, hit, game_id, &board, &game);
            }
            Ok(false) => {}
            Err(_) => {
                context.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
}

fn report_hit(
    context: &SearchContext,
    hit: u64,
    game_id: i64,
    board: &Board,
    game: &SearchGame,
) {
    if context.options.print_all {
        println!("{hit}. gameId: {game_id}");
    }
    if !context.report.is_on() {
        return;
    }

    let pgn = context.options.print_pgn.then(|| match game {
        SearchGame::Pgn(raw) => export::pgn_from_tags(&raw.tags, &raw.move_text),
        SearchGame::Db { .. } => export::pgn_from_board(board, game_id),
    });

    if context.report.is_json() {
        let mut value = serde_json::json!({ "hit": hit, "gameId": game_id });
        if context.options.print_fen {
            value["fen"] = serde_json::Value::String(board.fen());
        }
        if let Some(pgn) = pgn {
            value["pgn"] = serde_json::Value::String(pgn);
        }
        context.report.record(value);
        return;
    }

    if context.options.print_fen {
        context
            .report
            .print(&format!("{hit}. gameId: {game_id}, fen: {}", board.fen()));
    }
    if let Some(pgn) = pgn {
        context.report.print(&pgn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bench_queries_all_parse() {
        for q in BENCH_QUERIES {
            Query::parse(&query::strip_line_comments(q)).unwrap();
        }
    }
}
