//! PGN to database conversion.
//!
//! The caller thread streams blocks through the tokenizer; every game is
//! dispatched to the worker pool, and the pool is drained after each
//! block. Workers reuse a thread-local board, parse the SAN moves with the
//! quick-check path, encode the selected move columns, and insert rows
//! through the shared connection.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use rusqlite::types::Value;

use chessdb_eco::EcoTable;
use chessdb_engine::{Board, ReplayOptions};

use crate::options::{Limits, Options};
use crate::pgn::{self, RawGame};
use crate::pool::WorkerPool;
use crate::storage::{self, Storage};

/// Commit interval, in input blocks.
const BLOCKS_PER_TRANSACTION: u64 = 400;

const LICHESS_URL: &str = "https://lichess.org/";

/// Counters aggregated across workers.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub games: AtomicU64,
    pub errors: AtomicU64,
    pub filtered: AtomicU64,
    pub comments: AtomicU64,
}

/// Summary of one conversion run.
#[derive(Debug, Clone, Copy)]
pub struct IngestSummary {
    pub games: u64,
    pub errors: u64,
    pub filtered: u64,
    pub comments: u64,
    pub boundary_dropped: u64,
}

/// Shared state of one conversion run.
pub struct IngestContext {
    pub storage: Storage,
    pub options: Options,
    pub limits: Limits,
    pub eco: EcoTable,
    pub next_game_id: AtomicI64,
    pub stats: IngestStats,
}

struct WorkerState {
    board: Board,
    /// Cached insert plan, invalidated by the schema generation stamp.
    plan: Option<(u64, Vec<String>, String)>,
}

thread_local! {
    static WORKER: RefCell<WorkerState> = RefCell::new(WorkerState {
        board: Board::new(),
        plan: None,
    });
}

/// Converts PGN files into a fresh database.
pub fn convert(
    pgn_paths: &[PathBuf],
    db_path: &Path,
    options: Options,
    limits: Limits,
    threads: usize,
) -> anyhow::Result<IngestSummary> {
    if !options.stores_moves() {
        tracing::warn!("no move column selected; games will be stored without moves");
    }
    if options.moves1 && options.moves2 {
        tracing::warn!("both binary move columns requested; using Moves2");
    }

    let storage = Storage::create(db_path, &options)?;
    let context = Arc::new(IngestContext {
        storage,
        options,
        limits,
        eco: EcoTable::builtin(),
        next_game_id: AtomicI64::new(0),
        stats: IngestStats::default(),
    });

    let pool = WorkerPool::new(threads);
    tracing::info!(threads = pool.thread_count(), "conversion started");

    let mut boundary_dropped = 0u64;
    for path in pgn_paths {
        tracing::info!(path = %path.display(), "processing PGN file");
        let mut blocks = 0u64;

        {
            let conn = context.storage.conn.lock().expect("connection lock");
            conn.execute_batch("BEGIN")?;
        }

        let emit_context = Arc::clone(&context);
        let pool_ref = &pool;
        let stats = pgn::read_pgn_file(
            path,
            &mut |game: RawGame| {
                let context = Arc::clone(&emit_context);
                pool_ref.submit(move || process_game(&context, game));
            },
            &mut || {
                pool_ref.wait_for_tasks();
                blocks += 1;
                if blocks % BLOCKS_PER_TRANSACTION == 0 {
                    let conn = emit_context.storage.conn.lock().expect("connection lock");
                    let _ = conn.execute_batch("COMMIT; BEGIN");
                }
                if blocks % 16 == 0 {
                    log_progress(&emit_context);
                }
            },
        )?;
        pool.wait_for_tasks();

        {
            let conn = context.storage.conn.lock().expect("connection lock");
            conn.execute_batch("COMMIT")?;
        }

        boundary_dropped += stats.dropped;
        context.stats.errors.fetch_add(stats.dropped, Ordering::Relaxed);
        tracing::info!(
            path = %path.display(),
            blocks = stats.blocks,
            bytes = stats.bytes,
            "file done"
        );
    }

    let summary = IngestSummary {
        games: context.stats.games.load(Ordering::Relaxed),
        errors: context.stats.errors.load(Ordering::Relaxed),
        filtered: context.stats.filtered.load(Ordering::Relaxed),
        comments: context.stats.comments.load(Ordering::Relaxed),
        boundary_dropped,
    };
    context
        .storage
        .finalize_counts(summary.games as i64, summary.comments as i64)?;

    tracing::info!(
        games = summary.games,
        errors = summary.errors,
        filtered = summary.filtered,
        comments = summary.comments,
        "conversion finished"
    );
    Ok(summary)
}

/// Processes one tokenized game on a worker thread.
pub fn process_game(context: &IngestContext, game: RawGame) {
    WORKER.with(|worker| {
        let mut worker = worker.borrow_mut();
        if let Err(reason) = add_game(context, &mut worker, &game) {
            match reason {
                Reject::Filtered => {
                    context.stats.filtered.fetch_add(1, Ordering::Relaxed);
                }
                Reject::Error(message) => {
                    tracing::debug!("dropping game: {message}");
                    context.stats.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });
}

#[derive(Debug)]
enum Reject {
    /// Silent filter: variant, Elo, length, or FEN policy.
    Filtered,
    /// Malformed input or database failure.
    Error(String),
}

fn add_game(
    context: &IngestContext,
    worker: &mut WorkerState,
    game: &RawGame,
) -> Result<(), Reject> {
    if game.tags.len() < 3 {
        return Err(Reject::Error("fewer than three tags".to_string()));
    }

    let options = &context.options;
    let mut values: Vec<(String, Value)> = Vec::with_capacity(game.tags.len() + 4);
    let mut variant = chessdb_engine::Variant::Standard;
    let mut white_name = "";
    let mut black_name = "";
    let mut white_elo = None;
    let mut black_elo = None;
    let mut fen_text = String::new();
    let mut eco_tag = String::new();
    let mut tagged_ply_count = 0u32;

    for (name, value) in &game.tags {
        let value = value.trim();
        match name.as_str() {
            "Variant" => match chessdb_engine::Variant::from_tag(value) {
                Some(v) => variant = v,
                None => return Err(Reject::Filtered),
            },
            "SetUp" => {}
            "Event" => {
                let id = context
                    .storage
                    .events
                    .get_or_insert(&context.storage.conn, value, None)
                    .map_err(|e| Reject::Error(e.to_string()))?;
                values.push(("Event".to_string(), Value::Integer(id)));
            }
            "Site" => {
                if options.discard_sites {
                    values.push(("Site".to_string(), Value::Integer(1)));
                } else if value.starts_with(LICHESS_URL) && value.len() > LICHESS_URL.len() + 5 {
                    // A Lichess "site" is the game URL; keep the Sites
                    // table clean and store it in a Source column.
                    values.push(("Site".to_string(), Value::Integer(1)));
                    context
                        .storage
                        .add_tag_column("Source")
                        .map_err(|e| Reject::Error(e.to_string()))?;
                    values.push(("Source".to_string(), Value::Text(value.to_string())));
                } else {
                    let id = context
                        .storage
                        .sites
                        .get_or_insert(&context.storage.conn, value, None)
                        .map_err(|e| Reject::Error(e.to_string()))?;
                    values.push(("Site".to_string(), Value::Integer(id)));
                }
            }
            "White" => white_name = value,
            "Black" => black_name = value,
            "WhiteElo" => {
                white_elo = value.parse::<u32>().ok().filter(|&e| e > 0);
                if let Some(elo) = white_elo {
                    values.push(("WhiteElo".to_string(), Value::Integer(elo as i64)));
                }
            }
            "BlackElo" => {
                black_elo = value.parse::<u32>().ok().filter(|&e| e > 0);
                if let Some(elo) = black_elo {
                    values.push(("BlackElo".to_string(), Value::Integer(elo as i64)));
                }
            }
            "FEN" => {
                if options.discard_fen {
                    return Err(Reject::Filtered);
                }
                fen_text = value.to_string();
                values.push(("FEN".to_string(), Value::Text(fen_text.clone())));
            }
            "PlyCount" => {
                tagged_ply_count = value.parse().unwrap_or(0);
            }
            "ECO" => {
                eco_tag = value.to_string();
                values.push(("ECO".to_string(), Value::Text(eco_tag.clone())));
            }
            _ => {
                if value.is_empty() || value.starts_with('*') || value.starts_with('?') {
                    continue;
                }
                let known = context.storage.has_column(name);
                if !known {
                    if !options.accept_new_tags {
                        continue;
                    }
                    context
                        .storage
                        .add_tag_column(name)
                        .map_err(|e| Reject::Error(e.to_string()))?;
                }
                let stored = if name.contains("Date") {
                    storage::standardize_date(value)
                } else {
                    value.to_string()
                };
                values.push((name.clone(), Value::Text(stored)));
            }
        }
    }

    if tagged_ply_count > 0 && context.limits.min_ply > tagged_ply_count {
        return Err(Reject::Filtered);
    }
    if options.discard_no_elo && (white_elo.is_none() || black_elo.is_none()) {
        return Err(Reject::Filtered);
    }
    let min_elo = context.limits.min_elo;
    if min_elo > 0
        && (white_elo.unwrap_or(0) < min_elo || black_elo.unwrap_or(0) < min_elo)
    {
        return Err(Reject::Filtered);
    }

    let white_id = context
        .storage
        .players
        .get_or_insert(&context.storage.conn, white_name, white_elo)
        .map_err(|e| Reject::Error(e.to_string()))?;
    let black_id = context
        .storage
        .players
        .get_or_insert(&context.storage.conn, black_name, black_elo)
        .map_err(|e| Reject::Error(e.to_string()))?;
    values.push(("White".to_string(), Value::Integer(white_id)));
    values.push(("Black".to_string(), Value::Integer(black_id)));

    let game_id = context.next_game_id.fetch_add(1, Ordering::Relaxed) + 1;
    values.push(("ID".to_string(), Value::Integer(game_id)));

    if options.moves {
        values.push(("Moves".to_string(), Value::Text(game.move_text.clone())));
    }

    let mut comment_rows: Vec<(i64, String)> = Vec::new();
    if options.moves1 || options.moves2 {
        let board = &mut worker.board;
        board
            .new_game(&fen_text)
            .map_err(|e| Reject::Error(e.to_string()))?;
        board.variant = variant;

        let replay = ReplayOptions {
            quick_check: true,
            discard_comments: options.discard_comments,
            ..Default::default()
        };
        board
            .replay_text(&game.move_text, &replay, None)
            .map_err(|e| Reject::Error(e.to_string()))?;

        let ply_count = board.ply_count() as u32;
        if context.limits.min_ply > ply_count {
            return Err(Reject::Filtered);
        }

        if ply_count > 0 {
            let blob = if options.moves2 {
                chessdb_engine::codec::encode_game_2byte(board)
            } else {
                chessdb_engine::codec::encode_game_1byte(board)
                    .map_err(|e| Reject::Error(e.to_string()))?
            };
            let column = if options.moves2 { "Moves2" } else { "Moves1" };
            values.push((column.to_string(), Value::Blob(blob)));

            for (ply, entry) in board.history.iter().enumerate() {
                if let Some(comment) = &entry.comment {
                    comment_rows.push((ply as i64, comment.clone()));
                }
            }

            if eco_tag.is_empty() || options.reset_eco {
                let hashes = board
                    .history
                    .iter()
                    .map(|h| h.hash)
                    .chain([board.hash()]);
                if let Some(entry) = context.eco.classify(hashes) {
                    values.retain(|(name, _)| name != "ECO");
                    values.push(("ECO".to_string(), Value::Text(entry.code.clone())));
                }
            }
        }

        if !board.first_comment().is_empty() {
            comment_rows.push((-1, board.first_comment().to_string()));
        }
        values.push(("PlyCount".to_string(), Value::Integer(ply_count as i64)));
    } else if tagged_ply_count > 0 {
        values.push(("PlyCount".to_string(), Value::Integer(tagged_ply_count as i64)));
    }

    for (ply, comment) in &comment_rows {
        context
            .storage
            .insert_comment(game_id, *ply, comment)
            .map_err(|e| Reject::Error(e.to_string()))?;
        context.stats.comments.fetch_add(1, Ordering::Relaxed);
    }

    // Rebuild the cached insert plan when the schema grew.
    let generation = context.storage.generation();
    if worker
        .plan
        .as_ref()
        .map_or(true, |(cached, _, _)| *cached != generation)
    {
        worker.plan = Some(context.storage.insert_game_plan());
    }
    let (_, columns, sql) = worker.plan.as_ref().expect("plan just built");

    let mut row: Vec<Value> = Vec::with_capacity(columns.len());
    for column in columns {
        let value = values
            .iter()
            .position(|(name, _)| name == column)
            .map(|i| values.swap_remove(i).1)
            .unwrap_or(Value::Null);
        row.push(value);
    }

    let conn = context.storage.conn.lock().expect("connection lock");
    storage::insert_game(&conn, sql, row).map_err(|e| Reject::Error(e.to_string()))?;
    drop(conn);

    context.stats.games.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

fn log_progress(context: &IngestContext) {
    tracing::info!(
        games = context.stats.games.load(Ordering::Relaxed),
        errors = context.stats.errors.load(Ordering::Relaxed),
        filtered = context.stats.filtered.load(Ordering::Relaxed),
        "progress"
    );
}
