//! Pseudo-legal move generation and attack detection.
//!
//! Generation is per-piece over the mailbox: fixed offsets for knights and
//! kings, ray walks for sliders, push/capture/en-passant rules for pawns.
//! Bitboards are not used here; they exist only as query-time snapshots.

use chessdb_core::{Color, Move, Piece, Square};

use crate::board::{Board, FullMove, Placed, CASTLE_LONG, CASTLE_SHORT};

const KNIGHT_OFFSETS: [i32; 8] = [-17, -15, -10, -6, 6, 10, 15, 17];

impl Board {
    /// Generates pseudo-legal moves for the given side.
    pub fn generate(&self, side: Color) -> Vec<FullMove> {
        let mut moves = Vec::with_capacity(64);
        for pos in 0..64i32 {
            let Some(placed) = self.at_idx(pos) else {
                continue;
            };
            if placed.color != side {
                continue;
            }
            match placed.piece {
                Piece::King => {
                    self.gen_diagonal(&mut moves, pos, true);
                    self.gen_straight(&mut moves, pos, true);
                    self.gen_castling(&mut moves, pos);
                }
                Piece::Queen => {
                    self.gen_diagonal(&mut moves, pos, false);
                    self.gen_straight(&mut moves, pos, false);
                }
                Piece::Bishop => self.gen_diagonal(&mut moves, pos, false),
                Piece::Rook => self.gen_straight(&mut moves, pos, false),
                Piece::Knight => self.gen_knight(&mut moves, pos),
                Piece::Pawn => self.gen_pawn(&mut moves, side, pos),
            }
        }
        moves
    }

    /// Generates fully legal moves: pseudo-legal moves filtered by
    /// make / own-king-attacked / unmake.
    pub fn generate_legal(&mut self, side: Color) -> Vec<FullMove> {
        let mut legal = self.generate(side);
        legal.retain(|&mv| {
            let entry = self.apply(mv);
            let ok = !self.in_check(side);
            self.revert(&entry);
            ok
        });
        legal
    }

    /// Returns true if the side to move's king is attacked.
    pub fn in_check(&self, side: Color) -> bool {
        match self.find_king(side) {
            Some(king) => self.is_attacked(king, side.opponent()),
            None => false,
        }
    }

    fn push(&self, moves: &mut Vec<FullMove>, from: i32, dest: i32) {
        let to_color = self.at_idx(dest).map(|p| p.color);
        let placed = self.at_idx(from).expect("generator scans occupied squares");
        if to_color != Some(placed.color) {
            moves.push(self.full(placed, from, dest, None));
        }
    }

    fn push_pawn(&self, moves: &mut Vec<FullMove>, from: i32, dest: i32) {
        let to_color = self.at_idx(dest).map(|p| p.color);
        let placed = self.at_idx(from).expect("generator scans occupied squares");
        if to_color == Some(placed.color) {
            return;
        }
        if (8..56).contains(&dest) {
            moves.push(self.full(placed, from, dest, None));
        } else {
            for promo in Piece::PROMOTIONS {
                moves.push(self.full(placed, from, dest, Some(promo)));
            }
        }
    }

    fn full(&self, placed: Placed, from: i32, dest: i32, promotion: Option<Piece>) -> FullMove {
        let from = Square::from_index(from as u8).expect("generator keeps squares in range");
        let dest = Square::from_index(dest as u8).expect("generator keeps squares in range");
        FullMove {
            placed,
            mv: Move {
                from,
                dest,
                promotion,
            },
        }
    }

    fn gen_knight(&self, moves: &mut Vec<FullMove>, pos: i32) {
        let col = pos & 7;
        for d in KNIGHT_OFFSETS {
            let y = pos + d;
            if !(0..64).contains(&y) {
                continue;
            }
            let ok = match d {
                -6 | 10 => col < 6,
                -10 | 6 => col > 1,
                -15 | 17 => col < 7,
                -17 | 15 => col > 0,
                _ => false,
            };
            if ok {
                self.push(moves, pos, y);
            }
        }
    }

    /// Rook-style rays; `one_step` restricts to king range.
    fn gen_straight(&self, moves: &mut Vec<FullMove>, pos: i32, one_step: bool) {
        let col = pos & 7;
        let mut y = pos - 1;
        while y >= pos - col {
            self.push(moves, pos, y);
            if one_step || !self.is_empty_idx(y) {
                break;
            }
            y -= 1;
        }
        y = pos + 1;
        while y < pos - col + 8 {
            self.push(moves, pos, y);
            if one_step || !self.is_empty_idx(y) {
                break;
            }
            y += 1;
        }
        y = pos - 8;
        while y >= 0 {
            self.push(moves, pos, y);
            if one_step || !self.is_empty_idx(y) {
                break;
            }
            y -= 8;
        }
        y = pos + 8;
        while y < 64 {
            self.push(moves, pos, y);
            if one_step || !self.is_empty_idx(y) {
                break;
            }
            y += 8;
        }
    }

    /// Bishop-style rays; `one_step` restricts to king range.
    fn gen_diagonal(&self, moves: &mut Vec<FullMove>, pos: i32, one_step: bool) {
        let mut y = pos - 9;
        while y >= 0 && y & 7 != 7 {
            self.push(moves, pos, y);
            if one_step || !self.is_empty_idx(y) {
                break;
            }
            y -= 9;
        }
        y = pos - 7;
        while y >= 0 && y & 7 != 0 {
            self.push(moves, pos, y);
            if one_step || !self.is_empty_idx(y) {
                break;
            }
            y -= 7;
        }
        y = pos + 9;
        while y < 64 && y & 7 != 0 {
            self.push(moves, pos, y);
            if one_step || !self.is_empty_idx(y) {
                break;
            }
            y += 9;
        }
        y = pos + 7;
        while y < 64 && y & 7 != 7 {
            self.push(moves, pos, y);
            if one_step || !self.is_empty_idx(y) {
                break;
            }
            y += 7;
        }
    }

    fn gen_pawn(&self, moves: &mut Vec<FullMove>, side: Color, pos: i32) {
        let col = pos & 7;
        let ep = self.en_passant.map(|s| s.index() as i32).unwrap_or(-1);
        match side {
            Color::Black => {
                if self.is_empty_idx(pos + 8) {
                    self.push_pawn(moves, pos, pos + 8);
                    if pos < 16 && self.is_empty_idx(pos + 16) {
                        self.push(moves, pos, pos + 16);
                    }
                }
                if col > 0
                    && (self.at_idx(pos + 7).map(|p| p.color) == Some(Color::White)
                        || (pos + 7 == ep && self.is_empty_idx(pos + 7)))
                {
                    self.push_pawn(moves, pos, pos + 7);
                }
                if col < 7
                    && (self.at_idx(pos + 9).map(|p| p.color) == Some(Color::White)
                        || (pos + 9 == ep && self.is_empty_idx(pos + 9)))
                {
                    self.push_pawn(moves, pos, pos + 9);
                }
            }
            Color::White => {
                if self.is_empty_idx(pos - 8) {
                    self.push_pawn(moves, pos, pos - 8);
                    if pos >= 48 && self.is_empty_idx(pos - 16) {
                        self.push(moves, pos, pos - 16);
                    }
                }
                if col < 7
                    && (self.at_idx(pos - 7).map(|p| p.color) == Some(Color::Black)
                        || (pos - 7 == ep && self.is_empty_idx(pos - 7)))
                {
                    self.push_pawn(moves, pos, pos - 7);
                }
                if col > 0
                    && (self.at_idx(pos - 9).map(|p| p.color) == Some(Color::Black)
                        || (pos - 9 == ep && self.is_empty_idx(pos - 9)))
                {
                    self.push_pawn(moves, pos, pos - 9);
                }
            }
        }
    }

    fn gen_castling(&self, moves: &mut Vec<FullMove>, king_pos: i32) {
        let (rights, home, attacker) = if king_pos == 4 {
            (
                self.castling[Color::Black.index()],
                0,
                Color::White,
            )
        } else if king_pos == 60 {
            (
                self.castling[Color::White.index()],
                56,
                Color::Black,
            )
        } else {
            return;
        };
        if rights == 0 {
            return;
        }

        let attacked =
            |i: i32| self.is_attacked(Square::from_index(i as u8).expect("in range"), attacker);

        if rights & CASTLE_LONG != 0
            && self.is_empty_idx(home + 1)
            && self.is_empty_idx(home + 2)
            && self.is_empty_idx(home + 3)
            && !attacked(home + 2)
            && !attacked(home + 3)
            && !attacked(home + 4)
        {
            self.push(moves, king_pos, home + 2);
        }
        if rights & CASTLE_SHORT != 0
            && self.is_empty_idx(home + 5)
            && self.is_empty_idx(home + 6)
            && !attacked(home + 4)
            && !attacked(home + 5)
            && !attacked(home + 6)
        {
            self.push(moves, king_pos, home + 6);
        }
    }

    /// Direction-wise scan testing whether `sq` is attacked by `attacker`.
    pub fn is_attacked(&self, sq: Square, attacker: Color) -> bool {
        let pos = sq.index() as i32;
        let row = pos >> 3;
        let col = pos & 7;

        // Knights.
        if (col > 0 && row > 1 && self.holds(pos - 17, Piece::Knight, attacker))
            || (col < 7 && row > 1 && self.holds(pos - 15, Piece::Knight, attacker))
            || (col > 1 && row > 0 && self.holds(pos - 10, Piece::Knight, attacker))
            || (col < 6 && row > 0 && self.holds(pos - 6, Piece::Knight, attacker))
            || (col > 1 && row < 7 && self.holds(pos + 6, Piece::Knight, attacker))
            || (col < 6 && row < 7 && self.holds(pos + 10, Piece::Knight, attacker))
            || (col > 0 && row < 6 && self.holds(pos + 15, Piece::Knight, attacker))
            || (col < 7 && row < 6 && self.holds(pos + 17, Piece::Knight, attacker))
        {
            return true;
        }

        // Straight rays: queen, rook, adjacent king.
        let straight = [(8, 7 - row), (-8, row), (-1, col), (1, 7 - col)];
        for (step, limit) in straight {
            let mut y = pos + step;
            for dist in 1..=limit {
                if let Some(p) = self.at_idx(y) {
                    if p.color == attacker
                        && (p.piece == Piece::Queen
                            || p.piece == Piece::Rook
                            || (p.piece == Piece::King && dist == 1))
                    {
                        return true;
                    }
                    break;
                }
                y += step;
            }
        }

        // Diagonal rays: queen, bishop, adjacent king, pawns by direction.
        let diagonals = [
            (9, (7 - row).min(7 - col), Color::White),
            (7, (7 - row).min(col), Color::White),
            (-9, row.min(col), Color::Black),
            (-7, row.min(7 - col), Color::Black),
        ];
        for (step, limit, pawn_color) in diagonals {
            let mut y = pos + step;
            for dist in 1..=limit {
                if let Some(p) = self.at_idx(y) {
                    if p.color == attacker
                        && (p.piece == Piece::Queen
                            || p.piece == Piece::Bishop
                            || (dist == 1
                                && (p.piece == Piece::King
                                    || (p.piece == Piece::Pawn && p.color == pawn_color))))
                    {
                        return true;
                    }
                    break;
                }
                y += step;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(s: &str) -> Square {
        Square::from_algebraic(s).unwrap()
    }

    #[test]
    fn startpos_has_twenty_moves() {
        let mut board = Board::new();
        assert_eq!(board.generate(Color::White).len(), 20);
        assert_eq!(board.generate_legal(Color::White).len(), 20);
    }

    #[test]
    fn kiwipete_move_count() {
        // A well-known perft position with castling, pins, and en passant.
        let mut board = Board::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        )
        .unwrap();
        assert_eq!(board.generate_legal(Color::White).len(), 48);
    }

    #[test]
    fn pinned_piece_cannot_move() {
        // The bishop on e2 is pinned against the king by the rook on e4;
        // every bishop move leaves the e-file and is filtered out.
        let mut board = Board::from_fen("4k3/8/8/8/4r3/8/4B3/4K3 w - - 0 1").unwrap();
        let legal = board.generate_legal(Color::White);
        assert!(!legal.iter().any(|m| m.placed.piece == Piece::Bishop));
        assert!(legal.iter().any(|m| m.placed.piece == Piece::King));
    }

    #[test]
    fn promotion_generates_four_moves() {
        let board = Board::from_fen("8/P7/8/8/8/8/8/K6k w - - 0 1").unwrap();
        let promos: Vec<_> = board
            .generate(Color::White)
            .into_iter()
            .filter(|m| m.placed.piece == Piece::Pawn)
            .collect();
        assert_eq!(promos.len(), 4);
        let targets: Vec<_> = promos.iter().filter_map(|m| m.promotion()).collect();
        assert!(targets.contains(&Piece::Queen));
        assert!(targets.contains(&Piece::Knight));
    }

    #[test]
    fn en_passant_capture_is_generated() {
        let board =
            Board::from_fen("rnbqkbnr/ppp1pppp/8/8/3pP3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 2")
                .unwrap();
        let found = board
            .generate(Color::Black)
            .iter()
            .any(|m| m.from() == sq("d4") && m.dest() == sq("e3"));
        assert!(found);
    }

    #[test]
    fn castling_blocked_by_attack() {
        // Black rook on f8 column attacks f1; white may not castle short.
        let board = Board::from_fen("5r2/8/8/8/8/8/8/R3K2R w KQ - 0 1").unwrap();
        let moves = board.generate(Color::White);
        assert!(!moves.iter().any(|m| m.from() == sq("e1") && m.dest() == sq("g1")));
        assert!(moves.iter().any(|m| m.from() == sq("e1") && m.dest() == sq("c1")));
    }

    #[test]
    fn attack_detection() {
        let board = Board::new();
        assert!(board.is_attacked(sq("f3"), Color::White));
        assert!(board.is_attacked(sq("e7"), Color::Black));
        assert!(!board.is_attacked(sq("e4"), Color::White));
    }
}
