//! Database-to-PGN export and single-game printing.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chessdb_engine::{Board, ReplayOptions};

use crate::storage::{pgn_date, MoveField, Storage};

/// The seven-tag roster every exported game carries, in order.
const ROSTER: [&str; 7] = ["Event", "Site", "Date", "Round", "White", "Black", "Result"];

/// A game fetched for export.
struct ExportGame {
    id: i64,
    tags: Vec<(String, String)>,
    fen: String,
    result: String,
    moves: ExportMoves,
}

enum ExportMoves {
    Text(String),
    Blob(Vec<u8>, MoveField),
}

/// Renders a PGN tag block plus move text from raw tag pairs (used when
/// printing hits found while scanning PGN files).
pub fn pgn_from_tags(tags: &HashMap<String, String>, move_text: &str) -> String {
    let mut out = String::new();
    for name in ROSTER {
        let value = tags.get(name).map(String::as_str).unwrap_or_default();
        let value = if name == "Date" && !value.is_empty() {
            pgn_date(value)
        } else if name == "Date" {
            "????.??.??".to_string()
        } else {
            value.to_string()
        };
        out.push_str(&format!("[{name} \"{value}\"]\n"));
    }
    let mut rest: Vec<(&String, &String)> = tags
        .iter()
        .filter(|(name, _)| !ROSTER.contains(&name.as_str()))
        .collect();
    rest.sort();
    for (name, value) in rest {
        let value = if name.contains("Date") {
            pgn_date(value)
        } else {
            value.clone()
        };
        out.push_str(&format!("[{name} \"{value}\"]\n"));
        if name == "FEN" {
            out.push_str("[SetUp \"1\"]\n");
        }
    }
    out.push('\n');
    out.push_str(move_text);
    out.push('\n');
    out
}

/// Renders a PGN for a replayed board, using the SAN and comments
/// recorded in its history.
pub fn pgn_from_board(board: &Board, game_id: i64) -> String {
    let mut out = String::new();
    out.push_str(&format!("[Event \"game {game_id}\"]\n"));
    out.push_str(&format!(
        "[Date \"{}\"]\n",
        chrono::Utc::now().format("%Y.%m.%d")
    ));
    if !board.start_fen().is_empty() {
        out.push_str(&format!("[FEN \"{}\"]\n", board.start_fen()));
        out.push_str("[SetUp \"1\"]\n");
    }
    out.push('\n');
    out.push_str(&wrap_text(&move_text_from_history(board, "*", &HashMap::new())));
    out.push('\n');
    out
}

/// Builds the numbered SAN move text from a board's history, merging
/// per-ply comments, and terminating with the result token.
fn move_text_from_history(
    board: &Board,
    result: &str,
    comments: &HashMap<i64, String>,
) -> String {
    let mut text = String::new();
    if let Some(first) = comments.get(&-1) {
        text.push_str(&format!("{{{first}}} "));
    }
    for (ply, entry) in board.history.iter().enumerate() {
        if ply % 2 == 0 {
            text.push_str(&format!("{}. ", ply / 2 + 1));
        }
        text.push_str(&entry.san);
        text.push(' ');
        if let Some(comment) = comments.get(&(ply as i64)) {
            text.push_str(&format!("{{{comment}}} "));
        } else if let Some(comment) = &entry.comment {
            text.push_str(&format!("{{{comment}}} "));
        }
    }
    text.push_str(result);
    text
}

/// Wraps move text at 80 columns on word boundaries.
fn wrap_text(text: &str) -> String {
    let mut out = String::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.len() + 1 + word.len() > 80 {
            out.push_str(&line);
            out.push('\n');
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        out.push_str(&line);
    }
    out
}

/// The Games join used by export and single-game printing; the move
/// column is appended as the 15th selected column.
fn game_query(move_column: &str, filter: &str) -> String {
    format!(
        "SELECT g.ID, g.Date, g.Round, g.Result, g.TimeControl, g.ECO, g.PlyCount, g.FEN, \
         e.Name, s.Name, w.Name, b.Name, g.WhiteElo, g.BlackElo, g.{move_column} \
         FROM Games g \
         LEFT JOIN Events e ON g.EventID = e.ID \
         LEFT JOIN Sites s ON g.SiteID = s.ID \
         LEFT JOIN Players w ON g.WhiteID = w.ID \
         LEFT JOIN Players b ON g.BlackID = b.ID \
         {filter}"
    )
}

fn row_to_game(
    row: &rusqlite::Row<'_>,
    moves_index: usize,
    field: MoveField,
) -> rusqlite::Result<ExportGame> {
    let mut tags: Vec<(String, String)> = Vec::new();
    let id: i64 = row.get(0)?;
    let text = |v: rusqlite::Result<Option<String>>| v.map(|s| s.unwrap_or_default());

    let date = text(row.get(1))?;
    let round = text(row.get(2))?;
    let result = text(row.get(3))?;
    let time_control = text(row.get(4))?;
    let eco = text(row.get(5))?;
    let ply_count: Option<i64> = row.get(6)?;
    let fen = text(row.get(7))?;
    let event = text(row.get(8))?;
    let site = text(row.get(9))?;
    let white = text(row.get(10))?;
    let black = text(row.get(11))?;
    let white_elo: Option<i64> = row.get(12)?;
    let black_elo: Option<i64> = row.get(13)?;

    let result = if result.is_empty() {
        "*".to_string()
    } else {
        result
    };

    tags.push(("Event".to_string(), event));
    tags.push(("Site".to_string(), site));
    tags.push((
        "Date".to_string(),
        if date.is_empty() {
            "????.??.??".to_string()
        } else {
            pgn_date(&date)
        },
    ));
    tags.push((
        "Round".to_string(),
        if round.is_empty() {
            "-".to_string()
        } else {
            round
        },
    ));
    tags.push(("White".to_string(), white));
    tags.push(("Black".to_string(), black));
    tags.push(("Result".to_string(), result.clone()));
    if let Some(elo) = white_elo {
        tags.push(("WhiteElo".to_string(), elo.to_string()));
    }
    if let Some(elo) = black_elo {
        tags.push(("BlackElo".to_string(), elo.to_string()));
    }
    if !time_control.is_empty() {
        tags.push(("TimeControl".to_string(), time_control));
    }
    if !eco.is_empty() {
        tags.push(("ECO".to_string(), eco));
    }
    if let Some(ply) = ply_count {
        tags.push(("PlyCount".to_string(), ply.to_string()));
    }
    if !fen.is_empty() {
        tags.push(("FEN".to_string(), fen.clone()));
        tags.push(("SetUp".to_string(), "1".to_string()));
    }

    let moves = match field {
        MoveField::Text => ExportMoves::Text(
            row.get::<_, Option<String>>(moves_index)?.unwrap_or_default(),
        ),
        _ => ExportMoves::Blob(
            row.get::<_, Option<Vec<u8>>>(moves_index)?.unwrap_or_default(),
            field,
        ),
    };

    Ok(ExportGame {
        id,
        tags,
        fen,
        result,
        moves,
    })
}

fn render_game(
    storage: &Storage,
    board: &mut Board,
    game: &ExportGame,
) -> Result<String, String> {
    let mut out = String::new();
    for (name, value) in &game.tags {
        out.push_str(&format!("[{name} \"{value}\"]\n"));
    }
    out.push('\n');

    let body = match &game.moves {
        ExportMoves::Text(text) if !text.trim().is_empty() => text.trim().to_string(),
        ExportMoves::Text(_) => game.result.clone(),
        ExportMoves::Blob(blob, field) => {
            board.new_game(&game.fen).map_err(|e| e.to_string())?;
            let opts = ReplayOptions {
                create_san: true,
                ..Default::default()
            };
            board
                .replay_encoded(blob, *field == MoveField::OneByte, &opts, None)
                .map_err(|e| e.to_string())?;
            let comments = fetch_comments(storage, game.id).map_err(|e| e.to_string())?;
            move_text_from_history(board, &game.result, &comments)
        }
    };
    out.push_str(&wrap_text(&body));
    out.push('\n');
    Ok(out)
}

fn fetch_comments(storage: &Storage, game_id: i64) -> rusqlite::Result<HashMap<i64, String>> {
    let conn = storage.conn.lock().expect("connection lock");
    let mut stmt =
        conn.prepare_cached("SELECT Ply, Comment FROM Comments WHERE GameID = ?1")?;
    let rows = stmt.query_map([game_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// Exports every game of a database to one PGN file. Returns the game
/// count.
pub fn export_db<P: AsRef<Path>>(db_path: P, pgn_path: P) -> anyhow::Result<u64> {
    let storage = Storage::open(db_path)?;
    let field = storage.move_field()?;

    let writer = Mutex::new(BufWriter::new(File::create(pgn_path)?));
    let mut board = Board::new();
    let mut count = 0u64;

    let games: Vec<ExportGame> = {
        let conn = storage.conn.lock().expect("connection lock");
        let sql = game_query(field.column_name(), "ORDER BY g.ID");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row_to_game(row, 14, field))?;
        rows.collect::<Result<_, _>>()?
    };

    for game in &games {
        match render_game(&storage, &mut board, game) {
            Ok(text) => {
                let mut writer = writer.lock().expect("writer lock");
                writeln!(writer, "{text}")?;
                count += 1;
            }
            Err(err) => {
                tracing::error!(game = game.id, "export failed: {err}");
            }
        }
    }
    writer.lock().expect("writer lock").flush()?;
    tracing::info!(games = count, "export finished");
    Ok(count)
}

/// Prints the PGN of one game by ID.
pub fn print_game<P: AsRef<Path>>(db_path: P, game_id: i64) -> anyhow::Result<()> {
    let storage = Storage::open(db_path)?;
    let field = storage.move_field()?;

    let game = {
        let conn = storage.conn.lock().expect("connection lock");
        let sql = game_query(field.column_name(), "WHERE g.ID = ?1");
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_row([game_id], |row| row_to_game(row, 14, field))?
    };

    let mut board = Board::new();
    let text = render_game(&storage, &mut board, &game)
        .map_err(|e| anyhow::anyhow!("cannot render game {game_id}: {e}"))?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{self, IngestContext, IngestStats};
    use crate::options::{Limits, Options};
    use crate::pgn::RawGame;
    use std::sync::atomic::AtomicI64;

    fn seeded_storage(option_list: &str) -> Storage {
        let options = Options::parse(option_list).unwrap();
        let context = IngestContext {
            storage: Storage::create(":memory:", &options).unwrap(),
            options,
            limits: Limits::default(),
            eco: chessdb_eco::EcoTable::builtin(),
            next_game_id: AtomicI64::new(0),
            stats: IngestStats::default(),
        };
        let game = RawGame {
            tags: [
                ("Event", "Club Evening"),
                ("Site", "Testville"),
                ("Date", "2022.01.09"),
                ("Round", "3"),
                ("White", "Alpha"),
                ("Black", "Beta"),
                ("Result", "1-0"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            move_text: "1. e4 {center} e5 2. Nf3 Nc6 1-0".to_string(),
        };
        ingest::process_game(&context, game);
        assert_eq!(
            context
                .stats
                .games
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
        context.storage
    }

    #[test]
    fn renders_game_from_blob() {
        let storage = seeded_storage("moves2");
        let field = storage.move_field().unwrap();
        let game = {
            let conn = storage.conn.lock().unwrap();
            let sql = game_query(field.column_name(), "WHERE g.ID = 1");
            let mut stmt = conn.prepare(&sql).unwrap();
            stmt.query_row([], |row| row_to_game(row, 14, field)).unwrap()
        };

        let mut board = Board::new();
        let text = render_game(&storage, &mut board, &game).unwrap();
        assert!(text.contains("[Event \"Club Evening\"]"));
        assert!(text.contains("[Date \"2022.01.09\"]"));
        assert!(text.contains("1. e4 {center} e5 2. Nf3 Nc6 1-0"));
    }

    #[test]
    fn pgn_from_tags_has_roster_and_setup() {
        let tags: HashMap<String, String> = [
            ("Event", "X"),
            ("White", "A"),
            ("Black", "B"),
            ("Result", "*"),
            ("Date", "2020-02-02"),
            ("FEN", "8/8/8/8/8/8/8/K6k w - - 0 1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let pgn = pgn_from_tags(&tags, "*");
        assert!(pgn.starts_with("[Event \"X\"]\n"));
        assert!(pgn.contains("[Date \"2020.02.02\"]"));
        assert!(pgn.contains("[SetUp \"1\"]"));
        assert!(pgn.ends_with("*\n"));
    }

    #[test]
    fn wrap_keeps_words_whole() {
        let long: String = (1..40)
            .map(|i| format!("{i}. e4 e5"))
            .collect::<Vec<_>>()
            .join(" ");
        for line in wrap_text(&long).lines() {
            assert!(line.len() <= 80);
            assert!(!line.ends_with(' '));
        }
    }
}
