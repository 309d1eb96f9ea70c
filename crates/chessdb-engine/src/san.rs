//! SAN parsing and rendering, plus LAN and coordinate notation.

use chessdb_core::{Color, Move, Piece, Square};
use thiserror::Error;

use crate::board::{Board, FullMove, HistoryEntry, Placed, CASTLE_LONG};

/// Error type for SAN parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanError {
    #[error("empty SAN string")]
    Empty,
    #[error("invalid SAN format: {0}")]
    InvalidFormat(String),
    #[error("no legal move matches: {0}")]
    NoMatchingMove(String),
}

/// Notations for rendering recorded moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notation {
    San,
    Lan,
    Coordinate,
}

impl Board {
    /// Parses a SAN token against the current position and returns the
    /// move it denotes.
    ///
    /// Decorators (`+`, `#`, `x`, `!`, `?`, `-`) are ignored. Ambiguous
    /// matches are resolved by rejecting candidates that would leave the
    /// mover's own king in check.
    pub fn san_to_move(&mut self, san: &str) -> Result<Move, SanError> {
        if san.is_empty() {
            return Err(SanError::Empty);
        }
        let bare = san.trim_end_matches(['+', '#', '!', '?']);
        if bare.len() < 2 {
            return Err(SanError::InvalidFormat(san.to_string()));
        }

        if bare == "O-O" || bare == "0-0" || bare == "O-O-O" || bare == "0-0-0" {
            return Ok(self.castling_move(bare.len() <= 3));
        }

        let mut s: String = bare
            .chars()
            .filter(|&c| !matches!(c, '+' | 'x' | '*' | '#' | '-' | '!' | '?'))
            .collect();

        let mut promotion = None;
        if let Some(p) = s.find('=') {
            let target = s[p + 1..]
                .chars()
                .next()
                .and_then(Piece::from_char)
                .filter(|t| t.is_promotion())
                .ok_or_else(|| SanError::InvalidFormat(san.to_string()))?;
            promotion = Some(target);
            s.truncate(p);
        }
        if s.len() < 2 {
            return Err(SanError::InvalidFormat(san.to_string()));
        }

        let dest = Square::from_algebraic(&s[s.len() - 2..])
            .ok_or_else(|| SanError::InvalidFormat(san.to_string()))?;

        let mut piece = Piece::Pawn;
        let mut from_exact = None;
        let mut from_row = None;
        let mut from_col = None;

        if s.len() > 2 {
            let mut rest = &s[..s.len() - 2];
            let first = rest.chars().next().expect("rest is non-empty");
            if first.is_ascii_uppercase() {
                piece = Piece::from_char(first)
                    .ok_or_else(|| SanError::InvalidFormat(san.to_string()))?;
                rest = &rest[1..];
            }
            match rest.len() {
                0 => {}
                2 => {
                    from_exact = Some(
                        Square::from_algebraic(rest)
                            .ok_or_else(|| SanError::InvalidFormat(san.to_string()))?,
                    );
                }
                1 => {
                    let c = rest.chars().next().expect("one char");
                    if let Some(d) = c.to_digit(10) {
                        if !(1..=8).contains(&d) {
                            return Err(SanError::InvalidFormat(san.to_string()));
                        }
                        from_row = Some(8 - d as u8);
                    } else if ('a'..='h').contains(&c) {
                        from_col = Some(c as u8 - b'a');
                    } else {
                        return Err(SanError::InvalidFormat(san.to_string()));
                    }
                }
                _ => return Err(SanError::InvalidFormat(san.to_string())),
            }
        }

        if let Some(from) = from_exact {
            return Ok(Move {
                from,
                dest,
                promotion,
            });
        }

        let candidates: Vec<FullMove> = self
            .generate(self.side)
            .into_iter()
            .filter(|m| {
                m.dest() == dest
                    && m.promotion() == promotion
                    && m.placed.piece == piece
                    && match (from_row, from_col) {
                        (None, None) => true,
                        (Some(r), _) => m.from().row() == r,
                        (_, Some(c)) => m.from().column() == c,
                    }
            })
            .collect();

        match candidates.len() {
            0 => Err(SanError::NoMatchingMove(san.to_string())),
            1 => Ok(candidates[0].mv),
            _ => {
                for m in &candidates {
                    let entry = self.apply(*m);
                    let safe = !self.in_check(self.side);
                    self.revert(&entry);
                    if safe {
                        return Ok(m.mv);
                    }
                }
                Ok(candidates[0].mv)
            }
        }
    }

    fn castling_move(&self, short: bool) -> Move {
        let from = if self.side == Color::Black {
            Square::E8
        } else {
            Square::E1
        };
        let dest_idx = from.index() as i32 + if short { 2 } else { -2 };
        Move::new(
            from,
            Square::from_index(dest_idx as u8).expect("castling destination in range"),
        )
    }

    /// Renders a recorded ply in the requested notation.
    pub fn move_string(entry: &HistoryEntry, notation: Notation) -> String {
        match notation {
            Notation::San => entry.san.clone(),
            Notation::Coordinate => entry.mv.mv.to_coordinate(),
            Notation::Lan => {
                let mv = &entry.mv;
                let mut s = String::new();
                if mv.placed.piece != Piece::Pawn {
                    s.push(mv.placed.piece.to_char().to_ascii_uppercase());
                }
                s.push_str(&mv.from().to_algebraic());
                s.push(if entry.captured.is_some() { 'x' } else { '-' });
                s.push_str(&mv.dest().to_algebraic());
                if let Some(p) = mv.promotion() {
                    s.push('=');
                    s.push(p.to_char().to_ascii_uppercase());
                }
                s
            }
        }
    }

    /// Parses a whitespace- or dot-separated coordinate move list
    /// ("1.e2e4 e7e5 ...").
    pub fn coordinate_moves(text: &str) -> Vec<Move> {
        text.replace('.', " ")
            .split_whitespace()
            .filter(|tok| !tok.chars().next().is_some_and(|c| c.is_ascii_digit()))
            .filter_map(Move::from_coordinate)
            .collect()
    }

    /// Builds the SAN string for the last made move using reverse attack
    /// scans, used when no pre-move move list is available.
    pub(crate) fn record_san(&mut self) {
        let Some(entry) = self.history.last() else {
            return;
        };
        let mv = entry.mv;
        let captured = entry.captured;
        let en_passant = entry.en_passant;
        let castled = entry.castled;
        let moved = mv.placed;
        let from = mv.from().index() as i32;
        let dest = mv.dest().index() as i32;

        let san = if moved.piece == Piece::King && castled != 0 {
            if castled == CASTLE_LONG {
                "O-O-O".to_string()
            } else {
                "O-O".to_string()
            }
        } else {
            let others = match moved.piece {
                Piece::Rook => self.attack_by_rook(from, dest, moved),
                Piece::Bishop => self.attack_by_bishop(from, dest, moved),
                Piece::Queen => {
                    let mut v = self.attack_by_rook(from, dest, moved);
                    v.extend(self.attack_by_bishop(from, dest, moved));
                    v
                }
                Piece::Knight => self.attack_by_knight(dest, moved),
                Piece::Pawn => self.attack_by_pawn(
                    from,
                    dest,
                    moved,
                    captured,
                    en_passant.map(|s| s.index() as i32).unwrap_or(-1),
                ),
                Piece::King => Vec::new(),
            };
            self.build_san_body(mv, captured, &others)
        };

        let san = self.append_check_suffix(san);
        if let Some(entry) = self.history.last_mut() {
            entry.san = san;
        }
    }

    /// Builds the SAN string for the last made move from the pre-move
    /// move list produced by the checked make path.
    pub(crate) fn record_san_with(&mut self, moves: &[FullMove]) {
        let Some(entry) = self.history.last() else {
            return;
        };
        let mv = entry.mv;
        let captured = entry.captured;
        let castled = entry.castled;
        let moved = mv.placed;

        let san = if moved.piece == Piece::King && castled != 0 {
            if castled == CASTLE_LONG {
                "O-O-O".to_string()
            } else {
                "O-O".to_string()
            }
        } else {
            let others: Vec<i32> = if moved.piece == Piece::King {
                Vec::new()
            } else {
                moves
                    .iter()
                    .filter(|m| {
                        m.dest() == mv.dest()
                            && m.from() != mv.from()
                            && m.placed.piece == moved.piece
                    })
                    .map(|m| m.from().index() as i32)
                    .collect()
            };
            self.build_san_body(mv, captured, &others)
        };

        let san = self.append_check_suffix(san);
        if let Some(entry) = self.history.last_mut() {
            entry.san = san;
        }
    }

    fn build_san_body(&self, mv: FullMove, captured: Option<Placed>, others: &[i32]) -> String {
        let moved = mv.placed;
        let from = mv.from().index() as i32;
        let mut san = String::new();

        let mut same_row = false;
        let mut same_col = false;
        for &pos in others {
            if pos >> 3 == from >> 3 {
                same_row = true;
            }
            if pos & 7 == from & 7 {
                same_col = true;
            }
        }

        if moved.piece != Piece::Pawn {
            san.push(moved.piece.to_char().to_ascii_uppercase());
        }
        if !others.is_empty() {
            if same_col && same_row {
                san.push_str(&mv.from().to_algebraic());
            } else if same_col {
                san.push(mv.from().rank().to_char());
            } else {
                san.push(mv.from().file().to_char());
            }
        }

        if captured.is_some() {
            // A capturing pawn is identified by its source file even when
            // unambiguous (exd5).
            if san.is_empty() && moved.piece == Piece::Pawn {
                san.push(mv.from().file().to_char());
            }
            san.push('x');
        }

        san.push_str(&mv.dest().to_algebraic());

        if let Some(p) = mv.promotion() {
            san.push('=');
            san.push(p.to_char().to_ascii_uppercase());
        }
        san
    }

    fn append_check_suffix(&mut self, mut san: String) -> String {
        if self.in_check(self.side) {
            let replies = self.generate_legal(self.side);
            san.push(if replies.is_empty() { '#' } else { '+' });
        }
        san
    }

    /// Same-type pieces that could also have reached `dest` along rook
    /// lines. Rays from the destination stop at blockers and never pass
    /// through the vacated source square.
    fn attack_by_rook(&self, from: i32, dest: i32, moved: Placed) -> Vec<i32> {
        let mut vec = Vec::new();
        let col = dest & 7;
        let rays = [(8, 7 - (dest >> 3)), (-8, dest >> 3), (-1, col), (1, 7 - col)];
        for (step, limit) in rays {
            let mut y = dest + step;
            for _ in 0..limit {
                if y == from {
                    break;
                }
                if let Some(p) = self.at_idx(y) {
                    if p.piece == moved.piece && p.color == moved.color {
                        vec.push(y);
                    }
                    break;
                }
                y += step;
            }
        }
        vec
    }

    fn attack_by_bishop(&self, from: i32, dest: i32, moved: Placed) -> Vec<i32> {
        let mut vec = Vec::new();
        let row = dest >> 3;
        let col = dest & 7;
        let rays = [
            (9, (7 - row).min(7 - col)),
            (7, (7 - row).min(col)),
            (-9, row.min(col)),
            (-7, row.min(7 - col)),
        ];
        for (step, limit) in rays {
            let mut y = dest + step;
            for _ in 0..limit {
                if y == from {
                    break;
                }
                if let Some(p) = self.at_idx(y) {
                    if p.piece == moved.piece && p.color == moved.color {
                        vec.push(y);
                    }
                    break;
                }
                y += step;
            }
        }
        vec
    }

    fn attack_by_knight(&self, dest: i32, moved: Placed) -> Vec<i32> {
        let mut vec = Vec::new();
        let row = dest >> 3;
        let col = dest & 7;
        let jumps = [
            (-17, col > 0 && row > 1),
            (-15, col < 7 && row > 1),
            (-10, col > 1 && row > 0),
            (-6, col < 6 && row > 0),
            (6, col > 1 && row < 7),
            (10, col < 6 && row < 7),
            (15, col > 0 && row < 6),
            (17, col < 7 && row < 6),
        ];
        for (d, ok) in jumps {
            if ok && self.holds(dest + d, Piece::Knight, moved.color) {
                vec.push(dest + d);
            }
        }
        vec
    }

    fn attack_by_pawn(
        &self,
        from: i32,
        dest: i32,
        moved: Placed,
        captured: Option<Placed>,
        en_passant: i32,
    ) -> Vec<i32> {
        let mut vec = Vec::new();
        let col = dest & 7;
        let same = |i: i32| self.holds(i, Piece::Pawn, moved.color);
        let captures = captured.is_some() || en_passant == dest;

        match moved.color {
            Color::White => {
                if same(dest + 8) {
                    vec.push(dest + 8);
                } else if self.is_empty_idx(dest + 8)
                    && (32..40).contains(&dest)
                    && dest + 8 != from
                    && same(dest + 16)
                {
                    vec.push(dest + 16);
                }
                if captures {
                    if col > 0 && same(dest + 7) {
                        vec.push(dest + 7);
                    }
                    if col < 7 && same(dest + 9) {
                        vec.push(dest + 9);
                    }
                }
            }
            Color::Black => {
                if same(dest - 8) {
                    vec.push(dest - 8);
                } else if self.is_empty_idx(dest - 8)
                    && (24..32).contains(&dest)
                    && dest - 8 != from
                    && same(dest - 16)
                {
                    vec.push(dest - 16);
                }
                if captures {
                    if col > 0 && same(dest - 9) {
                        vec.push(dest - 9);
                    }
                    if col < 7 && same(dest - 7) {
                        vec.push(dest - 7);
                    }
                }
            }
        }
        vec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(s: &str) -> Move {
        Move::from_coordinate(s).unwrap()
    }

    #[test]
    fn parses_simple_pawn_move() {
        let mut board = Board::new();
        let m = board.san_to_move("e4").unwrap();
        assert_eq!(m, mv("e2e4"));
    }

    #[test]
    fn parses_piece_moves_and_decorations() {
        let mut board = Board::new();
        assert_eq!(board.san_to_move("Nf3").unwrap(), mv("g1f3"));
        assert_eq!(board.san_to_move("Nf3!?").unwrap(), mv("g1f3"));
        assert!(board.make_quick(mv("e2e4"), false));
        assert!(board.make_quick(mv("d7d5"), false));
        assert_eq!(board.san_to_move("exd5").unwrap(), mv("e4d5"));
    }

    #[test]
    fn parses_castling() {
        let mut board = Board::new();
        assert_eq!(board.san_to_move("O-O").unwrap(), mv("e1g1"));
        assert_eq!(board.san_to_move("O-O-O+").unwrap(), mv("e1c1"));
        assert!(board.make_quick(mv("e2e4"), false));
        assert_eq!(board.san_to_move("0-0").unwrap(), mv("e8g8"));
    }

    #[test]
    fn parses_disambiguation() {
        // Knights on b1 and f3 can both reach d2.
        let mut board = Board::from_fen("4k3/8/8/8/8/5N2/8/1N2K3 w - - 0 1").unwrap();
        assert_eq!(board.san_to_move("Nbd2").unwrap(), mv("b1d2"));
        assert_eq!(board.san_to_move("Nfd2").unwrap(), mv("f3d2"));
        assert_eq!(board.san_to_move("N1d2").unwrap(), mv("b1d2"));
    }

    #[test]
    fn parses_promotion() {
        let mut board = Board::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
        let m = board.san_to_move("a8=Q").unwrap();
        assert_eq!(m, mv("a7a8q"));
        assert!(board.san_to_move("a8=K").is_err());
    }

    #[test]
    fn rejects_garbage() {
        let mut board = Board::new();
        assert!(board.san_to_move("").is_err());
        assert!(board.san_to_move("Zf3").is_err());
        assert!(board.san_to_move("e9").is_err());
        assert!(board.san_to_move("Nf6").is_err(), "wrong side's move");
    }

    #[test]
    fn renders_san_for_made_moves() {
        let mut board = Board::new();
        assert!(board.make_quick(mv("e2e4"), true));
        assert!(board.make_quick(mv("e7e5"), true));
        assert!(board.make_quick(mv("g1f3"), true));
        let sans: Vec<&str> = board.history.iter().map(|h| h.san.as_str()).collect();
        assert_eq!(sans, ["e4", "e5", "Nf3"]);
    }

    #[test]
    fn renders_capture_and_check() {
        // Scholar's mate: the final capture is mate.
        let mut board = Board::new();
        for m in ["e2e4", "e7e5", "d1h5", "b8c6", "f1c4", "g8f6"] {
            assert!(board.make_quick(mv(m), true));
        }
        assert!(board.make_quick(mv("h5f7"), true));
        assert_eq!(board.history.last().unwrap().san, "Qxf7#");
    }

    #[test]
    fn renders_disambiguation() {
        // Rooks on a1 and h1 can both reach d1.
        let mut board = Board::from_fen("4k3/8/8/8/8/4K3/8/R6R w - - 0 1").unwrap();
        assert!(board.make_quick(mv("a1d1"), true));
        assert_eq!(board.history.last().unwrap().san, "Rad1");
    }

    #[test]
    fn renders_castling_san() {
        let mut board = Board::from_fen("4k3/8/8/8/8/8/8/4K2R w K - 0 1").unwrap();
        assert!(board.make_quick(mv("e1g1"), true));
        assert_eq!(board.history.last().unwrap().san, "O-O");
    }

    #[test]
    fn san_roundtrip_through_parser() {
        let mut board = Board::new();
        let moves = ["e4", "e5", "Nf3", "Nc6", "Bb5", "a6", "Bxc6", "dxc6", "O-O"];
        for san in moves {
            let m = board.san_to_move(san).unwrap();
            assert!(board.make_quick(m, true), "replaying {san}");
        }
        let recorded: Vec<&str> = board.history.iter().map(|h| h.san.as_str()).collect();
        assert_eq!(recorded, moves);
    }

    #[test]
    fn lan_and_coordinate_rendering() {
        let mut board = Board::new();
        assert!(board.make_quick(mv("g1f3"), true));
        let entry = board.history.last().unwrap();
        assert_eq!(Board::move_string(entry, Notation::San), "Nf3");
        assert_eq!(Board::move_string(entry, Notation::Lan), "Ng1-f3");
        assert_eq!(Board::move_string(entry, Notation::Coordinate), "g1f3");
    }

    #[test]
    fn coordinate_list_parsing() {
        let moves = Board::coordinate_moves("1.e2e4 e7e5 2.g1f3 b8c6");
        assert_eq!(moves.len(), 4);
        assert_eq!(moves[0], mv("e2e4"));
        assert_eq!(moves[3], mv("b8c6"));
    }
}
