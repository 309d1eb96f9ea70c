//! Duplicate-game detection.
//!
//! Stage 1 buckets games by a signature hash: the XOR of the per-position
//! hash at every fifth ply and of the final position. With embedded mode,
//! every prefix of sufficient length feeds the same bucket map, and games
//! are scanned in ascending PlyCount order so a longer game can find the
//! shorter ones it embeds. Stage 2 re-replays both games and compares the
//! full move lists; only then is a pair reported, and optionally the
//! shorter game deleted.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chessdb_engine::{Board, ReplayOptions};

use crate::options::{Limits, Options};
use crate::pool::WorkerPool;
use crate::report::Report;
use crate::storage::{MoveField, Storage};

/// Counters from one duplicate scan.
#[derive(Debug, Default)]
pub struct DupStats {
    pub games: AtomicU64,
    pub duplicates: AtomicU64,
    pub removed: AtomicU64,
    pub errors: AtomicU64,
}

struct DupContext {
    storage: Storage,
    field: MoveField,
    options: Options,
    limits: Limits,
    /// signature -> game IDs; one lock, held only for map access.
    buckets: Mutex<HashMap<u64, Vec<i64>>>,
    stats: DupStats,
    report: Arc<Report>,
}

struct DupGame {
    id: i64,
    fen: String,
    moves: GameMoves,
}

enum GameMoves {
    Text(String),
    Blob(Vec<u8>),
}

thread_local! {
    static BOARDS: RefCell<(Board, Board)> = RefCell::new((Board::new(), Board::new()));
}

/// Scans databases for duplicate games; returns total confirmed pairs.
pub fn find_duplicates(
    db_paths: &[PathBuf],
    options: Options,
    limits: Limits,
    threads: usize,
    report: Arc<Report>,
) -> anyhow::Result<(u64, u64)> {
    let mut total_duplicates = 0u64;
    let mut total_removed = 0u64;

    for path in db_paths {
        tracing::info!(path = %path.display(), "finding duplicate games");
        let storage = Storage::open(path)?;
        let field = storage.move_field()?;

        if options.remove {
            let conn = storage.conn.lock().expect("connection lock");
            conn.execute_batch("PRAGMA journal_mode=OFF; BEGIN")?;
        }

        let context = Arc::new(DupContext {
            storage,
            field,
            options,
            limits,
            buckets: Mutex::new(HashMap::new()),
            stats: DupStats::default(),
            report: Arc::clone(&report),
        });

        let pool = WorkerPool::new(threads);
        scan_games(&context, &pool)?;
        pool.wait_for_tasks();

        if options.remove {
            let conn = context.storage.conn.lock().expect("connection lock");
            conn.execute_batch("COMMIT")?;
        }

        let duplicates = context.stats.duplicates.load(Ordering::Relaxed);
        let removed = context.stats.removed.load(Ordering::Relaxed);
        tracing::info!(
            games = context.stats.games.load(Ordering::Relaxed),
            duplicates,
            removed,
            errors = context.stats.errors.load(Ordering::Relaxed),
            "duplicate scan done"
        );
        total_duplicates += duplicates;
        total_removed += removed;
    }

    report.flush();
    Ok((total_duplicates, total_removed))
}

fn scan_games(context: &Arc<DupContext>, pool: &WorkerPool) -> anyhow::Result<()> {
    let column = context.field.column_name();
    let mut sql = format!("SELECT ID, FEN, {column} FROM Games");
    if context.options.embedded_games {
        // Ascending length makes prefix detection well-defined: the
        // longer game always arrives after the games it may embed.
        sql.push_str(" ORDER BY PlyCount ASC");
    }

    let conn = context.storage.conn.lock().expect("connection lock");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut pending = Vec::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let fen: Option<String> = row.get(1)?;
        let moves = match context.field {
            MoveField::Text => {
                GameMoves::Text(row.get::<_, Option<String>>(2)?.unwrap_or_default())
            }
            _ => GameMoves::Blob(row.get::<_, Option<Vec<u8>>>(2)?.unwrap_or_default()),
        };
        pending.push(DupGame {
            id,
            fen: fen.unwrap_or_default(),
            moves,
        });
    }
    drop(rows);
    drop(stmt);
    drop(conn);

    for game in pending {
        let context = Arc::clone(context);
        pool.submit(move || check_game(&context, game));
    }
    Ok(())
}

fn replay(
    context: &DupContext,
    board: &mut Board,
    fen: &str,
    moves: &GameMoves,
) -> Result<(), ()> {
    board.new_game(fen).map_err(|_| ())?;
    let opts = ReplayOptions {
        quick_check: true,
        discard_comments: true,
        ..Default::default()
    };
    let result = match moves {
        GameMoves::Text(text) => board.replay_text(text, &opts, None),
        GameMoves::Blob(blob) => {
            board.replay_encoded(blob, context.field == MoveField::OneByte, &opts, None)
        }
    };
    result.map(|_| ()).map_err(|_| ())
}

fn check_game(context: &DupContext, game: DupGame) {
    BOARDS.with(|boards| {
        let (board, board2) = &mut *boards.borrow_mut();

        if replay(context, board, &game.fen, &game.moves).is_err() {
            context.stats.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        context.stats.games.fetch_add(1, Ordering::Relaxed);

        let ply_count = board.ply_count();
        if ply_count < context.limits.min_ply as usize {
            return;
        }

        let embedded = context.options.embedded_games;
        let signature = board.duplicate_signature(ply_count);

        let mut candidates: Vec<i64> = Vec::new();
        {
            let mut buckets = context.buckets.lock().expect("bucket lock");
            match buckets.get_mut(&signature) {
                None => {
                    buckets.insert(signature, vec![game.id]);
                    if !embedded {
                        return;
                    }
                }
                Some(ids) => {
                    candidates = ids.clone();
                    // Register this game so other workers see it too.
                    ids.push(game.id);
                }
            }

            if embedded {
                let from = (context.limits.min_ply as usize).max(1);
                for len in from..ply_count {
                    let prefix = board.duplicate_signature(len);
                    if let Some(ids) = buckets.get(&prefix) {
                        candidates.extend_from_slice(ids);
                    }
                }
                if candidates.is_empty() {
                    return;
                }
            }
        }

        let mut deleting: Vec<i64> = Vec::new();
        for candidate in candidates {
            if candidate == game.id {
                continue;
            }
            let Some((fen2, moves2)) = fetch_game(context, candidate) else {
                // The row may already be deleted by another worker.
                continue;
            };
            if fen2 != game.fen {
                continue;
            }
            if replay(context, board2, &fen2, &moves2).is_err() {
                context.stats.errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let ply2 = board2.ply_count();
            if ply2 < context.limits.min_ply as usize || (!embedded && ply_count != ply2) {
                continue;
            }
            if !board.same_moves(board2, embedded) {
                continue;
            }

            context.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            report_duplicate(context, game.id, candidate, ply_count);

            if context.options.remove {
                // Keep the longer game.
                let victim = if ply2 <= ply_count { candidate } else { game.id };
                if !deleting.contains(&victim) {
                    deleting.push(victim);
                }
            }
        }

        for victim in deleting {
            {
                let mut buckets = context.buckets.lock().expect("bucket lock");
                if let Some(ids) = buckets.get_mut(&signature) {
                    if let Some(at) = ids.iter().position(|&id| id == victim) {
                        ids.remove(at);
                    }
                }
            }
            let conn = context.storage.conn.lock().expect("connection lock");
            let deleted = conn
                .prepare_cached("DELETE FROM Games WHERE ID = ?1")
                .and_then(|mut stmt| stmt.execute([victim]));
            drop(conn);
            match deleted {
                Ok(n) if n > 0 => {
                    context.stats.removed.fetch_add(1, Ordering::Relaxed);
                    if context.report.is_json() {
                        context
                            .report
                            .record(serde_json::json!({ "deleted": victim }));
                    } else if context.report.is_on() {
                        context.report.print(&format!(";>>>>> Deleted ID: {victim}"));
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!("delete failed: {err}");
                    context.stats.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });
}

fn fetch_game(context: &DupContext, id: i64) -> Option<(String, GameMoves)> {
    let column = context.field.column_name();
    let sql = format!("SELECT FEN, {column} FROM Games WHERE ID = ?1");
    let conn = context.storage.conn.lock().expect("connection lock");
    let mut stmt = conn.prepare_cached(&sql).ok()?;
    stmt.query_row([id], |row| {
        let fen: Option<String> = row.get(0)?;
        let moves = match context.field {
            MoveField::Text => GameMoves::Text(row.get::<_, Option<String>>(1)?.unwrap_or_default()),
            _ => GameMoves::Blob(row.get::<_, Option<Vec<u8>>>(1)?.unwrap_or_default()),
        };
        Ok((fen.unwrap_or_default(), moves))
    })
    .ok()
}

fn report_duplicate(context: &DupContext, id: i64, other: i64, ply_count: usize) {
    if context.options.print_all {
        println!("duplicate games detected between IDs {other} and {id}, game length: {ply_count}");
    }
    if context.report.is_json() {
        context.report.record(serde_json::json!({
            "duplicate": other,
            "gameId": id,
            "plyCount": ply_count,
        }));
    } else if context.report.is_on() {
        context
            .report
            .print(&format!(";>>>>> Duplicate: {other} vs {id}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{self, IngestContext, IngestStats};
    use crate::options::Options;
    use crate::pgn::RawGame;
    use std::sync::atomic::AtomicI64;

    fn build_db(games: &[&str], options: &str) -> Storage {
        let options = Options::parse(options).unwrap();
        let context = IngestContext {
            storage: Storage::create(":memory:", &options).unwrap(),
            options,
            limits: Limits::default(),
            eco: chessdb_eco::EcoTable::builtin(),
            next_game_id: AtomicI64::new(0),
            stats: IngestStats::default(),
        };
        for (i, moves) in games.iter().enumerate() {
            let game = RawGame {
                tags: [
                    ("Event".to_string(), format!("E{i}")),
                    ("White".to_string(), "A".to_string()),
                    ("Black".to_string(), "B".to_string()),
                    ("Result".to_string(), "*".to_string()),
                ]
                .into_iter()
                .collect(),
                move_text: moves.to_string(),
            };
            ingest::process_game(&context, game);
        }
        assert_eq!(
            context.stats.games.load(Ordering::Relaxed) as usize,
            games.len()
        );
        context.storage
    }

    fn dup_context(storage: Storage, option_list: &str) -> DupContext {
        let options = Options::parse(option_list).unwrap();
        let field = storage.move_field().unwrap();
        DupContext {
            storage,
            field,
            options,
            limits: Limits::default(),
            buckets: Mutex::new(HashMap::new()),
            stats: DupStats::default(),
            report: Arc::new(Report::none()),
        }
    }

    fn scan_sequentially(context: &DupContext) {
        let column = context.field.column_name();
        let mut sql = format!("SELECT ID, FEN, {column} FROM Games");
        if context.options.embedded_games {
            sql.push_str(" ORDER BY PlyCount ASC");
        }
        let games: Vec<DupGame> = {
            let conn = context.storage.conn.lock().unwrap();
            let mut stmt = conn.prepare(&sql).unwrap();
            let rows = stmt
                .query_map([], |row| {
                    let fen: Option<String> = row.get(1)?;
                    let blob: Option<Vec<u8>> = row.get(2)?;
                    Ok(DupGame {
                        id: row.get(0)?,
                        fen: fen.unwrap_or_default(),
                        moves: GameMoves::Blob(blob.unwrap_or_default()),
                    })
                })
                .unwrap();
            rows.collect::<Result<_, _>>().unwrap()
        };
        for game in games {
            check_game(context, game);
        }
    }

    #[test]
    fn exact_duplicates_are_found() {
        let storage = build_db(
            &[
                "1. e4 e5 2. Nf3 Nc6 *",
                "1. d4 d5 2. c4 e6 *",
                "1. e4 e5 2. Nf3 Nc6 *",
            ],
            "moves2",
        );
        let context = dup_context(storage, "");
        scan_sequentially(&context);
        assert_eq!(context.stats.duplicates.load(Ordering::Relaxed), 1);
        assert_eq!(context.stats.removed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn embedded_prefix_is_found_and_removed() {
        let storage = build_db(
            &[
                "1. e4 e5 2. Nf3 Nc6 *",
                "1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 *",
            ],
            "moves2",
        );
        let context = dup_context(storage, "embededgames,remove");
        scan_sequentially(&context);
        assert_eq!(context.stats.duplicates.load(Ordering::Relaxed), 1);
        assert_eq!(context.stats.removed.load(Ordering::Relaxed), 1);

        // The shorter game is gone; the longer remains.
        let conn = context.storage.conn.lock().unwrap();
        let remaining: Vec<i64> = conn
            .prepare("SELECT ID FROM Games ORDER BY ID")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(remaining, vec![2]);
    }

    #[test]
    fn distinct_games_are_not_duplicates() {
        let storage = build_db(
            &["1. e4 e5 2. Nf3 Nc6 *", "1. e4 e5 2. Nf3 Nf6 *"],
            "moves2",
        );
        let context = dup_context(storage, "");
        scan_sequentially(&context);
        assert_eq!(context.stats.duplicates.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn rerun_counts_match() {
        let storage = build_db(
            &["1. e4 e5 *", "1. e4 e5 *", "1. e4 e5 *"],
            "moves2",
        );
        // Three equal games: each later game confirms against the
        // earlier ones already in its bucket.
        let context = dup_context(storage, "");
        scan_sequentially(&context);
        let first = context.stats.duplicates.load(Ordering::Relaxed);
        assert_eq!(first, 3);

        let context = dup_context(context.storage, "");
        scan_sequentially(&context);
        assert_eq!(context.stats.duplicates.load(Ordering::Relaxed), first);
    }
}
