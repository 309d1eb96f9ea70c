//! Mailbox board state.
//!
//! The board is a plain array of 64 squares indexed a8 = 0 (see
//! `chessdb_core::Square`), plus the side to move, castling rights,
//! en-passant square, counters, the incrementally maintained Polyglot key,
//! and the ply-by-ply history of the current game.

use chessdb_core::{Color, FenError, FenFields, Move, Piece, Square};

use crate::zobrist;

/// Queenside castling right bit.
pub const CASTLE_LONG: u8 = 1;
/// Kingside castling right bit.
pub const CASTLE_SHORT: u8 = 2;

/// Supported chess variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    #[default]
    Standard,
    Chess960,
}

impl Variant {
    /// Parses a PGN `Variant` tag value. Unknown variants yield `None`.
    pub fn from_tag(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "" | "standard" | "chess" | "normal" => Some(Variant::Standard),
            "chess960" | "fischerandom" | "fischerrandom" => Some(Variant::Chess960),
            _ => None,
        }
    }
}

/// A piece standing on a square.
///
/// `index` is the per-side piece number (0-15) assigned when the position
/// is set up; the 1-byte move codec uses it to identify the mover, so it
/// travels with the piece and survives promotion unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placed {
    pub piece: Piece,
    pub color: Color,
    pub index: u8,
}

/// A move together with a snapshot of the moving piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullMove {
    pub placed: Placed,
    pub mv: Move,
}

impl FullMove {
    #[inline]
    pub fn from(&self) -> Square {
        self.mv.from
    }

    #[inline]
    pub fn dest(&self) -> Square {
        self.mv.dest
    }

    #[inline]
    pub fn promotion(&self) -> Option<Piece> {
        self.mv.promotion
    }
}

/// An engine-evaluation record parsed from a move comment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineEval {
    pub depth: u32,
    pub sel_depth: u32,
    /// Score in centipawns from the mover's perspective, or moves-to-mate
    /// when `mating` is set.
    pub score: i32,
    pub mating: bool,
    pub time_ms: u64,
    pub nodes: u64,
    pub speed_nps: u64,
    pub tb_hits: u64,
    /// Material balance string from TCEC comments, verbatim.
    pub material: String,
}

/// One ply of game history.
///
/// Everything needed to restore the pre-move state exactly, plus the
/// optional per-ply data the database pipeline records.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub mv: FullMove,
    pub captured: Option<Placed>,
    /// Pre-move en-passant square.
    pub en_passant: Option<Square>,
    /// Pre-move castling rights, indexed by color.
    pub castling: [u8; 2],
    /// Pre-move position hash.
    pub hash: u64,
    /// Pre-move quiet-move counter.
    pub quiet: u32,
    /// Set to the castling side bit when this ply castled.
    pub castled: u8,
    pub san: String,
    pub comment: Option<String>,
    pub fen: Option<String>,
    pub snapshot: Option<crate::bitboard::Snapshot>,
    pub evals: Vec<EngineEval>,
}

/// Full game state for one worker.
#[derive(Debug, Clone)]
pub struct Board {
    squares: [Option<Placed>; 64],
    pub side: Color,
    /// Castling rights indexed by color (`Color::index()`).
    pub castling: [u8; 2],
    pub en_passant: Option<Square>,
    /// Plies since the last pawn move or capture (the FEN halfmove clock).
    pub quiet: u32,
    pub fullmove: u32,
    hash: u64,
    /// The starting FEN, empty when the game starts from the standard
    /// initial position.
    start_fen: String,
    pub variant: Variant,
    pub history: Vec<HistoryEntry>,
    first_comment: String,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// Creates a board with the standard starting position.
    pub fn new() -> Self {
        let mut board = Board {
            squares: [None; 64],
            side: Color::White,
            castling: [0; 2],
            en_passant: None,
            quiet: 0,
            fullmove: 1,
            hash: 0,
            start_fen: String::new(),
            variant: Variant::Standard,
            history: Vec::new(),
            first_comment: String::new(),
        };
        board
            .set_fen(FenFields::STARTPOS)
            .expect("standard starting position is valid");
        board
    }

    /// Creates a board from a FEN string.
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let mut board = Board::new();
        board.set_fen(fen)?;
        Ok(board)
    }

    /// Clears history and sets up a new game; an empty FEN means the
    /// standard starting position.
    pub fn new_game(&mut self, fen: &str) -> Result<(), FenError> {
        let fen = if fen.is_empty() {
            FenFields::STARTPOS
        } else {
            fen
        };
        self.set_fen(fen)
    }

    /// Replaces the position from a FEN string.
    pub fn set_fen(&mut self, fen: &str) -> Result<(), FenError> {
        let fields = FenFields::split(fen)?;

        self.squares = [None; 64];
        self.history.clear();
        self.first_comment.clear();
        self.castling = [0; 2];
        self.en_passant = None;

        let mut pos = 0u8;
        for c in fields.placement.chars() {
            if c == '/' {
                continue;
            }
            if let Some(d) = c.to_digit(10) {
                pos += d as u8;
                continue;
            }
            let (piece, color) = Piece::from_fen_char(c)
                .ok_or_else(|| FenError::InvalidPlacement(fields.placement.to_string()))?;
            if pos >= 64 {
                return Err(FenError::InvalidPlacement(fields.placement.to_string()));
            }
            self.squares[pos as usize] = Some(Placed {
                piece,
                color,
                index: 0,
            });
            pos += 1;
        }

        self.side = match fields.active_color {
            'w' => Color::White,
            _ => Color::Black,
        };

        for c in fields.castling.chars() {
            match c {
                'K' => self.castling[Color::White.index()] |= CASTLE_SHORT,
                'Q' => self.castling[Color::White.index()] |= CASTLE_LONG,
                'k' => self.castling[Color::Black.index()] |= CASTLE_SHORT,
                'q' => self.castling[Color::Black.index()] |= CASTLE_LONG,
                _ => {}
            }
        }

        if fields.en_passant != "-" {
            self.en_passant = Square::from_algebraic(fields.en_passant);
        }
        self.validate_en_passant();

        self.quiet = fields.halfmove_clock;
        self.fullmove = fields.fullmove_number;

        self.start_fen = if fen == FenFields::STARTPOS {
            String::new()
        } else {
            fen.to_string()
        };

        self.assign_piece_indexes();
        self.hash = self.compute_hash();
        Ok(())
    }

    /// The starting FEN of the current game; empty for the standard
    /// initial position.
    pub fn start_fen(&self) -> &str {
        &self.start_fen
    }

    pub fn first_comment(&self) -> &str {
        &self.first_comment
    }

    pub fn set_first_comment(&mut self, comment: String) {
        self.first_comment = comment;
    }

    /// The incrementally maintained Polyglot position key.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub(crate) fn set_hash(&mut self, hash: u64) {
        self.hash = hash;
    }

    /// Returns the piece on a square.
    #[inline]
    pub fn at(&self, sq: Square) -> Option<Placed> {
        self.squares[sq.index() as usize]
    }

    /// Raw indexed access for the generators; `i` must be 0-63.
    #[inline]
    pub(crate) fn at_idx(&self, i: i32) -> Option<Placed> {
        self.squares[i as usize]
    }

    #[inline]
    pub(crate) fn set_idx(&mut self, i: i32, placed: Option<Placed>) {
        self.squares[i as usize] = placed;
    }

    #[inline]
    pub(crate) fn is_empty_idx(&self, i: i32) -> bool {
        self.squares[i as usize].is_none()
    }

    /// Returns true if square `i` holds the given piece of the given side.
    #[inline]
    pub(crate) fn holds(&self, i: i32, piece: Piece, color: Color) -> bool {
        matches!(self.squares[i as usize], Some(p) if p.piece == piece && p.color == color)
    }

    /// Locates the king of the given side.
    pub fn find_king(&self, color: Color) -> Option<Square> {
        for i in 0..64u8 {
            if let Some(p) = self.squares[i as usize] {
                if p.piece == Piece::King && p.color == color {
                    return Square::from_index(i);
                }
            }
        }
        None
    }

    /// Assigns per-side piece indexes 0.. in board-scan order.
    ///
    /// The 1-byte codec identifies the mover by (side, index), so both
    /// encoder and decoder must run this at position setup and never again.
    fn assign_piece_indexes(&mut self) {
        let mut next = [0u8; 2];
        for slot in self.squares.iter_mut() {
            if let Some(p) = slot {
                p.index = next[p.color.index()];
                next[p.color.index()] += 1;
            }
        }
    }

    /// Drops the en-passant square unless it is on a legal en-passant rank.
    fn validate_en_passant(&mut self) {
        if let Some(ep) = self.en_passant {
            let row = ep.row();
            if row != 2 && row != 5 {
                self.en_passant = None;
            }
        }
    }

    /// Recomputes the position key from scratch.
    pub fn compute_hash(&self) -> u64 {
        let mut key = 0u64;
        for i in 0..64u8 {
            if let Some(p) = self.squares[i as usize] {
                let sq = Square::from_index(i).expect("index in range");
                key ^= zobrist::piece_key(p.piece, p.color, sq);
            }
        }
        if self.side == Color::White {
            key ^= zobrist::turn_key();
        }
        if self.castling[Color::White.index()] & CASTLE_SHORT != 0 {
            key ^= zobrist::castle_key(0);
        }
        if self.castling[Color::White.index()] & CASTLE_LONG != 0 {
            key ^= zobrist::castle_key(1);
        }
        if self.castling[Color::Black.index()] & CASTLE_SHORT != 0 {
            key ^= zobrist::castle_key(2);
        }
        if self.castling[Color::Black.index()] & CASTLE_LONG != 0 {
            key ^= zobrist::castle_key(3);
        }
        key ^ self.en_passant_hash(self.en_passant)
    }

    /// Key contribution of an en-passant square.
    ///
    /// Polyglot includes the file only when a pawn of the side to move
    /// actually attacks the square; otherwise the contribution is zero even
    /// though the square is set.
    pub(crate) fn en_passant_hash(&self, en_passant: Option<Square>) -> u64 {
        let Some(ep) = en_passant else {
            return 0;
        };
        let pos = ep.index() as i32;
        let col = ep.column() as i32;
        let attacked = if ep.row() == 2 {
            // Black just pushed; a white pawn below can capture.
            (col > 0 && self.holds(pos + 7, Piece::Pawn, Color::White))
                || (col < 7 && self.holds(pos + 9, Piece::Pawn, Color::White))
        } else {
            (col > 0 && self.holds(pos - 9, Piece::Pawn, Color::Black))
                || (col < 7 && self.holds(pos - 7, Piece::Pawn, Color::Black))
        };
        if attacked {
            zobrist::en_passant_key(col as usize)
        } else {
            0
        }
    }

    /// Verifies the incremental key against a full recomputation.
    pub fn hash_is_consistent(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Renders the current position as FEN.
    pub fn fen(&self) -> String {
        let mut fen = String::new();
        for row in 0..8 {
            let mut empty = 0;
            for col in 0..8 {
                match self.squares[row * 8 + col] {
                    Some(p) => {
                        if empty > 0 {
                            fen.push_str(&empty.to_string());
                            empty = 0;
                        }
                        fen.push(p.piece.to_fen_char(p.color));
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                fen.push_str(&empty.to_string());
            }
            if row < 7 {
                fen.push('/');
            }
        }

        fen.push(' ');
        fen.push(self.side.to_fen_char());

        fen.push(' ');
        fen.push_str(&self.castling_fen());

        fen.push(' ');
        match self.en_passant {
            Some(sq) => fen.push_str(&sq.to_algebraic()),
            None => fen.push('-'),
        }

        fen.push(' ');
        fen.push_str(&self.quiet.to_string());
        fen.push(' ');
        fen.push_str(&self.fullmove.to_string());
        fen
    }

    /// Renders the position as EPD with halfmove/fullmove opcodes.
    pub fn epd(&self) -> String {
        let fen = self.fen();
        let fields: Vec<&str> = fen.split(' ').collect();
        format!(
            "{} {} {} {} hmvc {}; fmvn {};",
            fields[0], fields[1], fields[2], fields[3], self.quiet, self.fullmove
        )
    }

    fn castling_fen(&self) -> String {
        let mut s = String::new();
        if self.castling[Color::White.index()] & CASTLE_SHORT != 0 {
            s.push('K');
        }
        if self.castling[Color::White.index()] & CASTLE_LONG != 0 {
            s.push('Q');
        }
        if self.castling[Color::Black.index()] & CASTLE_SHORT != 0 {
            s.push('k');
        }
        if self.castling[Color::Black.index()] & CASTLE_LONG != 0 {
            s.push('q');
        }
        if s.is_empty() {
            s.push('-');
        }
        s
    }

    /// Builds a full move from raw coordinates using the piece currently
    /// on the source square.
    pub fn full_move(&self, mv: Move) -> Option<FullMove> {
        self.at(mv.from).map(|placed| FullMove { placed, mv })
    }

    /// Number of plies recorded for the current game.
    #[inline]
    pub fn ply_count(&self) -> usize {
        self.history.len()
    }

    /// Position signature for duplicate bucketing: XOR of the pre-move
    /// hash at every fifth ply below `len`, and of the position hash after
    /// ply `len` (the current hash when `len` equals the game length).
    pub fn duplicate_signature(&self, len: usize) -> u64 {
        let n = len.min(self.history.len());
        let mut key = if n == self.history.len() {
            self.hash
        } else {
            self.history[n].hash
        };
        let mut i = 0;
        while i < n {
            key ^= self.history[i].hash;
            i += 5;
        }
        key
    }

    /// Compares move lists; with `embedded`, a prefix match of the shorter
    /// game suffices.
    pub fn same_moves(&self, other: &Board, embedded: bool) -> bool {
        let n0 = self.history.len();
        let n1 = other.history.len();
        if n0 != n1 && !embedded {
            return false;
        }
        let n = n0.min(n1);
        (0..n).all(|i| self.history[i].mv.mv == other.history[i].mv.mv)
    }
}
