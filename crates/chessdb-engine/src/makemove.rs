//! Making and unmaking moves.
//!
//! `apply`/`revert` mutate the position without touching the side to move;
//! the legality filter uses them directly. `make`/`unmake` are the public
//! pair: they record history, toggle the side, and keep the Polyglot key
//! incrementally updated. `make_quick` is the ingest fast path that
//! validates by piece geometry instead of full generation.

use chessdb_core::{Color, Move, Piece, Square};

use crate::board::{Board, FullMove, HistoryEntry, Variant, CASTLE_LONG, CASTLE_SHORT};
use crate::zobrist;

impl Board {
    /// Applies a move and returns the snapshot needed to revert it.
    /// The side to move is left unchanged.
    pub(crate) fn apply(&mut self, mv: FullMove) -> HistoryEntry {
        let from = mv.from().index() as i32;
        let dest = mv.dest().index() as i32;

        let mut entry = HistoryEntry {
            mv,
            captured: self.at_idx(dest),
            en_passant: self.en_passant,
            castling: self.castling,
            hash: self.hash(),
            quiet: self.quiet,
            castled: 0,
            san: String::new(),
            comment: None,
            fen: None,
            snapshot: None,
            evals: Vec::new(),
        };

        let mut hash = self.hash();
        hash ^= self.en_passant_hash(self.en_passant);

        let placed = self
            .at_idx(from)
            .expect("apply requires a piece on the source square");
        entry.mv.placed = placed;

        hash ^= zobrist::piece_key(placed.piece, placed.color, mv.from());
        if let Some(cap) = entry.captured {
            hash ^= zobrist::piece_key(cap.piece, cap.color, mv.dest());
        }
        self.set_idx(dest, Some(placed));
        self.set_idx(from, None);
        hash ^= zobrist::piece_key(placed.piece, placed.color, mv.dest());

        self.quiet += 1;
        self.en_passant = None;

        if (self.castling[0] | self.castling[1]) != 0 {
            if let Some(cap) = entry.captured {
                if cap.piece == Piece::Rook {
                    self.clear_castle_rights(dest, cap.color);
                }
            }
        }

        match placed.piece {
            Piece::King => {
                self.castling[placed.color.index()] &= !(CASTLE_LONG | CASTLE_SHORT);
                if (from - dest).abs() == 2 {
                    let rook_pos = from + if from < dest { 3 } else { -4 };
                    let new_rook_pos = (from + dest) / 2;
                    let rook = self
                        .at_idx(rook_pos)
                        .expect("castling requires the rook on its home square");
                    let rook_from =
                        Square::from_index(rook_pos as u8).expect("rook square in range");
                    let rook_to =
                        Square::from_index(new_rook_pos as u8).expect("rook square in range");
                    hash ^= zobrist::piece_key(rook.piece, rook.color, rook_from);
                    self.set_idx(new_rook_pos, Some(rook));
                    self.set_idx(rook_pos, None);
                    hash ^= zobrist::piece_key(rook.piece, rook.color, rook_to);
                    self.quiet = 0;
                    entry.castled = if dest == 2 || dest == 58 {
                        CASTLE_LONG
                    } else {
                        CASTLE_SHORT
                    };
                }
            }
            Piece::Rook => {
                if (self.castling[0] | self.castling[1]) != 0 {
                    self.clear_castle_rights(from, placed.color);
                }
            }
            Piece::Pawn => {
                self.quiet = 0;
                let d = (from - dest).abs();
                if d == 16 {
                    self.en_passant = Square::from_index(((from + dest) / 2) as u8);
                } else if entry.en_passant == Some(mv.dest()) {
                    // En passant: the captured pawn sits behind the
                    // destination square.
                    let cap_pos = dest + if placed.color == Color::White { 8 } else { -8 };
                    let cap_sq = Square::from_index(cap_pos as u8).expect("in range");
                    entry.captured = self.at_idx(cap_pos);
                    if let Some(cap) = entry.captured {
                        hash ^= zobrist::piece_key(cap.piece, cap.color, cap_sq);
                        self.set_idx(cap_pos, None);
                    }
                } else if let Some(promo) = mv.promotion() {
                    hash ^= zobrist::piece_key(Piece::Pawn, placed.color, mv.dest());
                    self.set_idx(
                        dest,
                        Some(crate::board::Placed {
                            piece: promo,
                            ..placed
                        }),
                    );
                    hash ^= zobrist::piece_key(promo, placed.color, mv.dest());
                }
            }
            _ => {}
        }

        if entry.captured.is_some() {
            self.quiet = 0;
        }

        let w = Color::White.index();
        let b = Color::Black.index();
        if entry.castling[w] != self.castling[w] {
            if (entry.castling[w] ^ self.castling[w]) & CASTLE_SHORT != 0 {
                hash ^= zobrist::castle_key(0);
                self.quiet = 0;
            }
            if (entry.castling[w] ^ self.castling[w]) & CASTLE_LONG != 0 {
                hash ^= zobrist::castle_key(1);
                self.quiet = 0;
            }
        }
        if entry.castling[b] != self.castling[b] {
            if (entry.castling[b] ^ self.castling[b]) & CASTLE_SHORT != 0 {
                hash ^= zobrist::castle_key(2);
                self.quiet = 0;
            }
            if (entry.castling[b] ^ self.castling[b]) & CASTLE_LONG != 0 {
                hash ^= zobrist::castle_key(3);
                self.quiet = 0;
            }
        }

        hash ^= self.en_passant_hash(self.en_passant);
        self.set_hash(hash);
        entry
    }

    /// Reverts a move applied with [`Board::apply`].
    pub(crate) fn revert(&mut self, entry: &HistoryEntry) {
        let from = entry.mv.from().index() as i32;
        let dest = entry.mv.dest().index() as i32;

        let moved = self
            .at_idx(dest)
            .expect("revert requires the moved piece on its destination");
        self.set_idx(from, Some(moved));

        let mut cap_pos = dest;
        if moved.piece == Piece::Pawn && entry.en_passant == Some(entry.mv.dest()) {
            cap_pos = dest + if moved.color == Color::White { 8 } else { -8 };
            self.set_idx(dest, None);
        }
        self.set_idx(cap_pos, entry.captured);

        if moved.piece == Piece::King && (from - dest).abs() == 2 {
            let rook_pos = from + if from < dest { 3 } else { -4 };
            let new_rook_pos = (from + dest) / 2;
            let rook = self.at_idx(new_rook_pos);
            self.set_idx(rook_pos, rook);
            self.set_idx(new_rook_pos, None);
        }

        if entry.mv.promotion().is_some() {
            if let Some(p) = self.at_idx(from) {
                self.set_idx(
                    from,
                    Some(crate::board::Placed {
                        piece: Piece::Pawn,
                        ..p
                    }),
                );
            }
        }

        self.castling = entry.castling;
        self.en_passant = entry.en_passant;
        self.quiet = entry.quiet;
        self.set_hash(entry.hash);
    }

    /// Applies a move, records it in history, and passes the turn.
    pub fn make(&mut self, mv: FullMove) {
        let mover = self.side;
        let entry = self.apply(mv);
        self.history.push(entry);
        self.side = self.side.opponent();
        self.set_hash(self.hash() ^ zobrist::turn_key());
        if mover == Color::Black {
            self.fullmove += 1;
        }
        debug_assert!(self.hash_is_consistent());
    }

    /// Undoes the last made move.
    pub fn unmake(&mut self) {
        let Some(entry) = self.history.pop() else {
            return;
        };
        if self.side == Color::White {
            self.fullmove -= 1;
        }
        self.side = self.side.opponent();
        self.revert(&entry);
        debug_assert!(self.hash_is_consistent());
    }

    fn clear_castle_rights(&mut self, rook_pos: i32, side: Color) {
        let col = rook_pos & 7;
        if (col != 0 && col != 7) || (rook_pos > 7 && rook_pos < 56) {
            return;
        }
        let home = col + if side == Color::White { 56 } else { 0 };
        if home != rook_pos {
            return;
        }
        if col == 0 {
            self.castling[side.index()] &= !CASTLE_LONG;
        } else {
            self.castling[side.index()] &= !CASTLE_SHORT;
        }
    }

    /// Validates a move against the generated move list, makes it, and
    /// rejects it if the mover's king would be left in check. Produces the
    /// SAN string for the recorded ply.
    pub fn make_checked(&mut self, mv: Move) -> bool {
        if !mv.is_valid() {
            return false;
        }
        let Some(placed) = self.at(mv.from) else {
            return false;
        };
        if placed.color != self.side {
            return false;
        }
        if let Some(cap) = self.at(mv.dest) {
            let chess960_rook_castle = self.variant == Variant::Chess960
                && placed.piece == Piece::King
                && cap.piece == Piece::Rook;
            if cap.color == placed.color && !chess960_rook_castle {
                return false;
            }
        }

        let moves = self.generate(self.side);
        let Some(&full) = moves.iter().find(|m| m.mv == mv) else {
            return false;
        };

        let mover = self.side;
        self.make(full);
        if self.in_check(mover) {
            self.unmake();
            return false;
        }
        self.record_san_with(&moves);
        true
    }

    /// The ingest fast path: validates the move by piece geometry alone,
    /// makes it, and verifies the mover's king is safe.
    pub fn make_quick(&mut self, mv: Move, create_san: bool) -> bool {
        if !mv.is_valid() {
            return false;
        }
        let Some(placed) = self.at(mv.from) else {
            return false;
        };
        if placed.color != self.side {
            return false;
        }
        if let Some(cap) = self.at(mv.dest) {
            let chess960_rook_castle = self.variant == Variant::Chess960
                && placed.piece == Piece::King
                && cap.piece == Piece::Rook;
            if cap.color == placed.color && !chess960_rook_castle {
                return false;
            }
        }
        if mv.promotion.is_some() && (placed.piece != Piece::Pawn || !matches!(mv.dest.row(), 0 | 7))
        {
            return false;
        }

        let from = mv.from.index() as i32;
        let dest = mv.dest.index() as i32;
        let ok = match placed.piece {
            Piece::King => self.quick_check_king(from, dest),
            Piece::Queen => {
                self.quick_check_rook(from, dest) || self.quick_check_bishop(from, dest)
            }
            Piece::Rook => self.quick_check_rook(from, dest),
            Piece::Bishop => self.quick_check_bishop(from, dest),
            Piece::Knight => self.quick_check_knight(from, dest),
            Piece::Pawn => self.quick_check_pawn(from, dest, placed.color),
        };
        if !ok {
            return false;
        }

        let full = FullMove { placed, mv };
        let mover = self.side;
        self.make(full);
        if self.in_check(mover) {
            self.unmake();
            return false;
        }
        if create_san {
            self.record_san();
        }
        true
    }

    fn quick_check_rook(&self, from: i32, dest: i32) -> bool {
        if from >> 3 == dest >> 3 {
            let step = if from < dest { 1 } else { -1 };
            let mut i = from + step;
            while i != dest {
                if !self.is_empty_idx(i) {
                    return false;
                }
                i += step;
            }
            return true;
        }
        if from & 7 != dest & 7 {
            return false;
        }
        let step = if from < dest { 8 } else { -8 };
        let mut i = from + step;
        while i != dest {
            if !self.is_empty_idx(i) {
                return false;
            }
            i += step;
        }
        true
    }

    fn quick_check_bishop(&self, from: i32, dest: i32) -> bool {
        let (rf, ff) = (from >> 3, from & 7);
        let (rd, fd) = (dest >> 3, dest & 7);
        if (rf - rd).abs() != (ff - fd).abs() {
            return false;
        }
        let step = if rf < rd {
            if ff < fd {
                9
            } else {
                7
            }
        } else if ff < fd {
            -7
        } else {
            -9
        };
        let mut i = from + step;
        while i != dest {
            if !self.is_empty_idx(i) {
                return false;
            }
            i += step;
        }
        true
    }

    fn quick_check_king(&self, from: i32, dest: i32) -> bool {
        let d = (from - dest).abs();
        if d == 2 {
            // Castling pattern: king on its home square, same rank, and
            // the path to the rook clear.
            let (rf, rd) = (from >> 3, dest >> 3);
            let on_home = (from == 60 && self.side == Color::White)
                || (from == 4 && self.side == Color::Black);
            if rf != rd || !on_home {
                return false;
            }
            let placed = self.at_idx(from).expect("king checked by caller");
            return if from < dest {
                let rook = self.at_idx(from + 3);
                self.is_empty_idx(from + 1)
                    && self.is_empty_idx(from + 2)
                    && matches!(rook, Some(r) if r.piece == Piece::Rook && r.color == placed.color)
            } else {
                let rook = self.at_idx(from - 4);
                self.is_empty_idx(from - 1)
                    && self.is_empty_idx(from - 2)
                    && matches!(rook, Some(r) if r.piece == Piece::Rook && r.color == placed.color)
            };
        }
        if d == 1 || (7..=9).contains(&d) {
            let (rf, rd) = (from >> 3, dest >> 3);
            if d == 1 {
                return rf == rd;
            }
            return (rf - rd).abs() == 1;
        }
        false
    }

    fn quick_check_knight(&self, from: i32, dest: i32) -> bool {
        let (r, f) = (from >> 3, from & 7);
        match from - dest {
            17 => f != 0 && r >= 2,
            15 => f != 7 && r >= 2,
            10 => f >= 2 && r >= 1,
            6 => f <= 5 && r >= 1,
            -6 => f >= 2 && r <= 6,
            -10 => f <= 5 && r <= 6,
            -15 => f != 0 && r <= 5,
            -17 => f != 7 && r <= 5,
            _ => false,
        }
    }

    fn quick_check_pawn(&self, from: i32, dest: i32, color: Color) -> bool {
        let d = (from - dest).abs();
        if d != 16 && !(7..=9).contains(&d) {
            return false;
        }
        let cap_empty = self.is_empty_idx(dest);
        match color {
            Color::White => {
                if from < dest {
                    return false;
                }
                if d == 16 {
                    return (48..=55).contains(&from) && cap_empty;
                }
                (from >> 3) - (dest >> 3) == 1
            }
            Color::Black => {
                if from > dest {
                    return false;
                }
                if d == 16 {
                    return (8..=15).contains(&from) && cap_empty;
                }
                (from >> 3) - (dest >> 3) == -1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chessdb_core::FenFields;

    fn mv(s: &str) -> Move {
        Move::from_coordinate(s).unwrap()
    }

    fn sq(s: &str) -> Square {
        Square::from_algebraic(s).unwrap()
    }

    #[test]
    fn make_unmake_restores_startpos() {
        let mut board = Board::new();
        let start_hash = board.hash();
        assert!(board.make_quick(mv("e2e4"), false));
        assert!(board.make_quick(mv("e7e5"), false));
        assert!(board.make_quick(mv("g1f3"), false));
        board.unmake();
        board.unmake();
        board.unmake();
        assert_eq!(board.fen(), FenFields::STARTPOS);
        assert_eq!(board.hash(), start_hash);
    }

    #[test]
    fn e4_sets_en_passant_and_matches_polyglot() {
        let mut board = Board::new();
        assert!(board.make_quick(mv("e2e4"), false));
        assert_eq!(board.en_passant, Some(sq("e3")));
        // No black pawn attacks e3, so the en-passant file is not hashed:
        // the key must equal the Polyglot reference for this position.
        assert_eq!(board.hash(), 0x823C9B50FD114196);
    }

    #[test]
    fn en_passant_capture_and_revert() {
        let mut board = Board::new();
        for m in ["e2e4", "a7a6", "e4e5", "d7d5"] {
            assert!(board.make_quick(mv(m), false));
        }
        assert_eq!(board.en_passant, Some(sq("d6")));
        let before = board.fen();
        assert!(board.make_quick(mv("e5d6"), false));
        assert_eq!(board.at(sq("d5")), None, "captured pawn removed");
        board.unmake();
        assert_eq!(board.fen(), before);
    }

    #[test]
    fn castling_moves_rook_and_clears_rights() {
        let mut board = Board::new();
        for m in ["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "f8c5"] {
            assert!(board.make_quick(mv(m), false));
        }
        assert!(board.make_quick(mv("e1g1"), false));
        let rook = board.at(sq("f1")).unwrap();
        assert_eq!(rook.piece, Piece::Rook);
        assert!(board.at(sq("h1")).is_none());
        assert_eq!(board.castling[Color::White.index()], 0);
        assert!(board.hash_is_consistent());
        board.unmake();
        assert!(board.at(sq("h1")).is_some());
        assert_ne!(board.castling[Color::White.index()], 0);
    }

    #[test]
    fn promotion_and_revert() {
        let mut board = Board::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
        let before = board.fen();
        assert!(board.make_quick(mv("a7a8q"), false));
        assert_eq!(board.at(sq("a8")).unwrap().piece, Piece::Queen);
        assert!(board.hash_is_consistent());
        board.unmake();
        assert_eq!(board.fen(), before);
    }

    #[test]
    fn quick_path_rejects_illegal_geometry() {
        let mut board = Board::new();
        assert!(!board.make_quick(mv("e2e5"), false));
        assert!(!board.make_quick(mv("g1g3"), false));
        assert!(!board.make_quick(mv("e1g1"), false));
        assert!(!board.make_quick(mv("a1a3"), false));
    }

    #[test]
    fn quick_path_rejects_self_check() {
        // The white king on e1 is shielded by the e2 rook from the e8 rook;
        // moving the rook away is rejected.
        let mut board = Board::from_fen("4r2k/8/8/8/8/8/4R3/4K3 w - - 0 1").unwrap();
        assert!(!board.make_quick(mv("e2a2"), false));
        assert!(board.make_quick(mv("e2e5"), false));
    }

    #[test]
    fn checked_path_matches_generator() {
        let mut board = Board::new();
        assert!(board.make_checked(mv("e2e4")));
        assert!(!board.make_checked(mv("e4e6")));
        assert_eq!(board.history.len(), 1);
        assert_eq!(board.history[0].san, "e4");
    }

    #[test]
    fn rook_capture_clears_opponent_rights() {
        let mut board =
            Board::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        assert!(board.make_quick(mv("a1a8"), false));
        assert_eq!(
            board.castling[Color::Black.index()] & CASTLE_LONG,
            0,
            "black loses queenside castling when the a8 rook falls"
        );
        assert!(board.hash_is_consistent());
    }
}
