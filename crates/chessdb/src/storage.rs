//! SQLite storage for the game database.
//!
//! Owns schema creation, the name-to-ID dimension tables with their
//! in-memory dedup maps, dynamic tag columns, and date normalization.
//! The connection is shared behind a mutex; statements are obtained with
//! `prepare_cached` inside short critical sections, which is the safe
//! equivalent of per-worker prepared statements on one serialized handle.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::Value;
use rusqlite::Connection;
use thiserror::Error;

use crate::options::Options;

/// Schema version written to the Info table.
pub const DATA_STRUCTURE_VERSION: &str = "0.6";
/// User-data version written to the Info table.
pub const USER_VERSION: &str = "0.1";

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database has no move column (Moves, Moves1 or Moves2)")]
    NoMoveField,
}

/// Which column stores a game's moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveField {
    /// `Moves` TEXT.
    Text,
    /// `Moves1` BLOB, variable-width encoding.
    OneByte,
    /// `Moves2` BLOB, fixed two-byte encoding.
    TwoByte,
}

impl MoveField {
    pub fn column_name(self) -> &'static str {
        match self {
            MoveField::Text => "Moves",
            MoveField::OneByte => "Moves1",
            MoveField::TwoByte => "Moves2",
        }
    }
}

/// Normalizes a PGN dot-separated date to ISO dashes; `?` placeholders
/// survive ("2021.05.??" becomes "2021-05-??").
pub fn standardize_date(date: &str) -> String {
    date.replace('.', "-")
}

/// Converts a stored ISO date back to the PGN dot form.
pub fn pgn_date(date: &str) -> String {
    date.replace('-', ".")
}

/// A name-to-ID dimension table (Players, Events, or Sites) with its
/// in-memory dedup map. Row 1 is always the empty string.
pub struct NameTable {
    table: &'static str,
    state: Mutex<NameTableState>,
}

struct NameTableState {
    ids: HashMap<String, i64>,
    /// Highest assigned ID; starts at 1 for the built-in empty row.
    counter: i64,
}

impl NameTable {
    fn new(table: &'static str) -> Self {
        NameTable {
            table,
            state: Mutex::new(NameTableState {
                ids: HashMap::new(),
                counter: 1,
            }),
        }
    }

    /// Looks a name up, inserting a new row on first sight. Empty names
    /// and the PGN placeholders `*`/`?` map to the built-in empty row.
    pub fn get_or_insert(
        &self,
        conn: &Mutex<Connection>,
        name: &str,
        elo: Option<u32>,
    ) -> Result<i64, StorageError> {
        let name = name.trim();
        if name.is_empty() || name.starts_with('*') || name.starts_with('?') {
            return Ok(1);
        }

        let key = name.to_lowercase();
        let mut state = self.state.lock().expect("name table lock");
        if let Some(&id) = state.ids.get(&key) {
            return Ok(id);
        }

        let id = state.counter + 1;
        {
            let conn = conn.lock().expect("connection lock");
            match elo {
                Some(elo) => {
                    let sql = format!(
                        "INSERT INTO {} (ID, Name, Elo) VALUES (?1, ?2, ?3)",
                        self.table
                    );
                    conn.prepare_cached(&sql)?.execute((id, name, elo))?;
                }
                None => {
                    let sql = format!("INSERT INTO {} (ID, Name) VALUES (?1, ?2)", self.table);
                    conn.prepare_cached(&sql)?.execute((id, name))?;
                }
            }
        }
        state.counter = id;
        state.ids.insert(key, id);
        Ok(id)
    }

    /// Number of rows including the built-in empty row.
    pub fn count(&self) -> i64 {
        self.state.lock().expect("name table lock").counter
    }
}

/// The Games column list, guarded by the schema mutex.
struct Columns {
    names: Vec<String>,
    generation: u64,
}

/// An open game database.
pub struct Storage {
    pub conn: Mutex<Connection>,
    columns: Mutex<Columns>,
    pub players: NameTable,
    pub events: NameTable,
    pub sites: NameTable,
}

/// The tag columns every database starts with, in schema order.
const BASE_COLUMNS: [&str; 14] = [
    "ID",
    "Event",
    "Site",
    "Date",
    "Round",
    "White",
    "WhiteElo",
    "Black",
    "BlackElo",
    "Result",
    "TimeControl",
    "ECO",
    "PlyCount",
    "FEN",
];

impl Storage {
    /// Creates a fresh database, dropping existing tables. Pass
    /// `:memory:` for an ephemeral database.
    pub fn create<P: AsRef<Path>>(path: P, options: &Options) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if path.to_str() != Some(":memory:") {
            let _ = std::fs::remove_file(path);
        }
        let conn = Connection::open(path)?;

        let mut columns: Vec<String> = BASE_COLUMNS.iter().map(|s| s.to_string()).collect();
        if options.moves {
            columns.push("Moves".to_string());
        }
        if options.moves1 || options.moves2 {
            columns.push(if options.moves2 { "Moves2" } else { "Moves1" }.to_string());
        }

        conn.execute_batch(&format!(
            "
            DROP TABLE IF EXISTS Info;
            CREATE TABLE Info (Name TEXT UNIQUE NOT NULL, Value TEXT);
            INSERT INTO Info (Name, Value) VALUES ('Data Structure Version', '{DATA_STRUCTURE_VERSION}');
            INSERT INTO Info (Name, Value) VALUES ('Version', '{USER_VERSION}');
            INSERT INTO Info (Name, Value) VALUES ('Variant', 'standard');
            INSERT INTO Info (Name, Value) VALUES ('License', 'free');

            DROP TABLE IF EXISTS Events;
            CREATE TABLE Events (ID INTEGER PRIMARY KEY AUTOINCREMENT, Name TEXT UNIQUE);
            INSERT INTO Events (Name) VALUES ('');

            DROP TABLE IF EXISTS Sites;
            CREATE TABLE Sites (ID INTEGER PRIMARY KEY AUTOINCREMENT, Name TEXT UNIQUE);
            INSERT INTO Sites (Name) VALUES ('');

            DROP TABLE IF EXISTS Players;
            CREATE TABLE Players (ID INTEGER PRIMARY KEY, Name TEXT UNIQUE, Elo INTEGER);
            INSERT INTO Players (ID, Name) VALUES (1, '');

            DROP TABLE IF EXISTS Comments;
            CREATE TABLE Comments (ID INTEGER PRIMARY KEY AUTOINCREMENT, GameID INTEGER, Ply INTEGER, Comment TEXT);
            "
        ))?;

        conn.execute_batch(&games_table_sql(&columns))?;
        conn.execute_batch("PRAGMA journal_mode=OFF")?;

        Ok(Storage {
            conn: Mutex::new(conn),
            columns: Mutex::new(Columns {
                names: columns,
                generation: 0,
            }),
            players: NameTable::new("Players"),
            events: NameTable::new("Events"),
            sites: NameTable::new("Sites"),
        })
    }

    /// Opens an existing database read-write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let columns = game_columns(&conn)?;
        Ok(Storage {
            conn: Mutex::new(conn),
            columns: Mutex::new(Columns {
                names: columns,
                generation: 0,
            }),
            players: NameTable::new("Players"),
            events: NameTable::new("Events"),
            sites: NameTable::new("Sites"),
        })
    }

    /// True when the Games table has a column of this name, under the
    /// schema lock.
    pub fn has_column(&self, name: &str) -> bool {
        let columns = self.columns.lock().expect("schema lock");
        columns.names.iter().any(|c| c == name)
    }

    /// Adds a TEXT column for a newly seen tag. Invalidates cached insert
    /// statements by bumping the schema generation.
    pub fn add_tag_column(&self, name: &str) -> Result<(), StorageError> {
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Ok(());
        }
        let mut columns = self.columns.lock().expect("schema lock");
        if columns.names.iter().any(|c| c == name) {
            return Ok(());
        }
        {
            let conn = self.conn.lock().expect("connection lock");
            conn.execute_batch(&format!("ALTER TABLE Games ADD COLUMN {name} TEXT"))?;
        }
        columns.names.push(name.to_string());
        columns.generation += 1;
        Ok(())
    }

    /// Returns the insert SQL and column order for the Games table, with
    /// the generation stamp used to invalidate worker caches.
    pub fn insert_game_plan(&self) -> (u64, Vec<String>, String) {
        let columns = self.columns.lock().expect("schema lock");
        let mut names = Vec::with_capacity(columns.names.len());
        let mut placeholders = Vec::with_capacity(columns.names.len());
        for (i, name) in columns.names.iter().enumerate() {
            names.push(db_column_name(name));
            placeholders.push(format!("?{}", i + 1));
        }
        let sql = format!(
            "INSERT INTO Games ({}) VALUES ({})",
            names.join(", "),
            placeholders.join(", ")
        );
        (columns.generation, columns.names.clone(), sql)
    }

    /// Current schema generation.
    pub fn generation(&self) -> u64 {
        self.columns.lock().expect("schema lock").generation
    }

    /// Inserts a comment row; ply -1 is the pre-move comment.
    pub fn insert_comment(&self, game_id: i64, ply: i64, comment: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("connection lock");
        conn.prepare_cached("INSERT INTO Comments (GameID, Ply, Comment) VALUES (?1, ?2, ?3)")?
            .execute((game_id, ply, comment))?;
        Ok(())
    }

    /// Writes the final counters into the Info table.
    pub fn finalize_counts(
        &self,
        game_count: i64,
        comment_count: i64,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("connection lock");
        let pairs = [
            ("GameCount", game_count),
            ("PlayerCount", self.players.count()),
            ("EventCount", self.events.count()),
            ("SiteCount", self.sites.count()),
            ("CommentCount", comment_count),
        ];
        for (name, value) in pairs {
            conn.execute(
                "INSERT OR REPLACE INTO Info (Name, Value) VALUES (?1, ?2)",
                (name, value.to_string()),
            )?;
        }
        Ok(())
    }

    /// Detects which move column this database carries, preferring the
    /// binary encodings.
    pub fn move_field(&self) -> Result<MoveField, StorageError> {
        let conn = self.conn.lock().expect("connection lock");
        let columns = game_columns(&conn)?;
        let has = |name: &str| columns.iter().any(|c| c == name);
        if has("Moves2") {
            Ok(MoveField::TwoByte)
        } else if has("Moves1") {
            Ok(MoveField::OneByte)
        } else if has("Moves") {
            Ok(MoveField::Text)
        } else {
            Err(StorageError::NoMoveField)
        }
    }
}

/// Maps a tag column to its database column name: the dimension-table
/// references become ID columns.
pub fn db_column_name(tag: &str) -> String {
    match tag {
        "Event" => "EventID".to_string(),
        "Site" => "SiteID".to_string(),
        "White" => "WhiteID".to_string(),
        "Black" => "BlackID".to_string(),
        _ => tag.to_string(),
    }
}

fn games_table_sql(columns: &[String]) -> String {
    let mut body = String::from("CREATE TABLE Games (ID INTEGER PRIMARY KEY AUTOINCREMENT");
    let mut foreign = String::new();
    for name in columns {
        if name == "ID" {
            continue;
        }
        let db_name = db_column_name(name);
        let sql_type = match name.as_str() {
            "Event" => {
                foreign.push_str(", FOREIGN KEY(EventID) REFERENCES Events");
                "INTEGER"
            }
            "Site" => {
                foreign.push_str(", FOREIGN KEY(SiteID) REFERENCES Sites");
                "INTEGER"
            }
            "White" => {
                foreign.push_str(", FOREIGN KEY(WhiteID) REFERENCES Players");
                "INTEGER"
            }
            "Black" => {
                foreign.push_str(", FOREIGN KEY(BlackID) REFERENCES Players");
                "INTEGER"
            }
            "WhiteElo" | "BlackElo" | "PlyCount" => "INTEGER",
            "Moves1" | "Moves2" => "BLOB DEFAULT NULL",
            _ => "TEXT",
        };
        body.push_str(", ");
        body.push_str(&db_name);
        body.push(' ');
        body.push_str(sql_type);
    }
    body.push_str(&foreign);
    body.push_str(");");
    format!("DROP TABLE IF EXISTS Games; {body}")
}

/// Reads the Games column list, translating ID columns back to tag names.
fn game_columns(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare("PRAGMA table_info(Games)")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names
        .into_iter()
        .map(|n| match n.as_str() {
            "EventID" => "Event".to_string(),
            "SiteID" => "Site".to_string(),
            "WhiteID" => "White".to_string(),
            "BlackID" => "Black".to_string(),
            _ => n,
        })
        .collect())
}

/// Executes a Games insert with values aligned to the column plan.
pub fn insert_game(
    conn: &Connection,
    sql: &str,
    values: Vec<Value>,
) -> Result<(), rusqlite::Error> {
    let mut stmt = conn.prepare_cached(sql)?;
    stmt.execute(rusqlite::params_from_iter(values))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> Storage {
        let options = Options::parse("moves,moves2").unwrap();
        Storage::create(":memory:", &options).unwrap()
    }

    #[test]
    fn create_builds_schema() {
        let storage = test_storage();
        let conn = storage.conn.lock().unwrap();
        for table in ["Info", "Events", "Sites", "Players", "Games", "Comments"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
        // Dimension tables start with their empty row.
        let name: String = conn
            .query_row("SELECT Name FROM Events WHERE ID = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "");
    }

    #[test]
    fn name_table_dedups_case_insensitively() {
        let storage = test_storage();
        let id1 = storage
            .players
            .get_or_insert(&storage.conn, "Carlsen, Magnus", Some(2850))
            .unwrap();
        let id2 = storage
            .players
            .get_or_insert(&storage.conn, "carlsen, magnus", None)
            .unwrap();
        assert_eq!(id1, id2);
        assert_eq!(id1, 2, "first real name lands after the empty row");
        assert_eq!(
            storage
                .players
                .get_or_insert(&storage.conn, "?", None)
                .unwrap(),
            1
        );
        assert_eq!(storage.players.count(), 2);
    }

    #[test]
    fn insert_plan_matches_schema() {
        let storage = test_storage();
        let (generation, columns, sql) = storage.insert_game_plan();
        assert_eq!(generation, 0);
        assert!(columns.contains(&"Moves2".to_string()));
        assert!(sql.starts_with("INSERT INTO Games (ID, EventID, SiteID, Date"));

        let values: Vec<Value> = columns
            .iter()
            .enumerate()
            .map(|(i, name)| match name.as_str() {
                "ID" => Value::Integer(1),
                "Event" | "Site" | "White" | "Black" => Value::Integer(1),
                "Moves2" => Value::Blob(vec![0x1c, 0x07]),
                _ => Value::Text(format!("v{i}")),
            })
            .collect();
        let conn = storage.conn.lock().unwrap();
        insert_game(&conn, &sql, values).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM Games", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn dynamic_tag_columns_bump_generation() {
        let storage = test_storage();
        assert!(!storage.has_column("Source"));
        storage.add_tag_column("Source").unwrap();
        assert!(storage.has_column("Source"));
        assert_eq!(storage.generation(), 1);
        // Idempotent.
        storage.add_tag_column("Source").unwrap();
        assert_eq!(storage.generation(), 1);
        let (_, columns, _) = storage.insert_game_plan();
        assert_eq!(columns.last().map(String::as_str), Some("Source"));
    }

    #[test]
    fn move_field_detection() {
        let storage = test_storage();
        assert_eq!(storage.move_field().unwrap(), MoveField::TwoByte);

        let only_moves = Storage::create(":memory:", &Options::parse("moves").unwrap()).unwrap();
        assert_eq!(only_moves.move_field().unwrap(), MoveField::Text);

        let none = Storage::create(":memory:", &Options::default()).unwrap();
        assert!(matches!(
            none.move_field(),
            Err(StorageError::NoMoveField)
        ));
    }

    #[test]
    fn date_normalization() {
        assert_eq!(standardize_date("2021.05.09"), "2021-05-09");
        assert_eq!(standardize_date("1987.??.??"), "1987-??-??");
        assert_eq!(pgn_date("2021-05-09"), "2021.05.09");
    }

    #[test]
    fn finalize_writes_info_counts() {
        let storage = test_storage();
        storage
            .players
            .get_or_insert(&storage.conn, "Someone", None)
            .unwrap();
        storage.finalize_counts(7, 3).unwrap();
        let conn = storage.conn.lock().unwrap();
        let games: String = conn
            .query_row(
                "SELECT Value FROM Info WHERE Name = 'GameCount'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(games, "7");
        let players: String = conn
            .query_row(
                "SELECT Value FROM Info WHERE Name = 'PlayerCount'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(players, "2");
    }
}
