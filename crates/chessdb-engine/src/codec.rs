//! Binary move codecs.
//!
//! Two independent serializations of a game's move list:
//!
//! - **2-byte**: each move is a little-endian u16 with 6 bits source (a1 =
//!   0 numbering), 6 bits destination, 3 bits promotion. Fixed width.
//! - **1-byte**: variable width. The low nibble names the mover by its
//!   per-side piece index; the high nibble (plus a second byte for queen
//!   moves) encodes the geometry relative to the mover. Both encoder and
//!   decoder must step a board through the game so the indexes stay in
//!   sync.

use chessdb_core::{Move, Piece, Square};
use thiserror::Error;

use crate::board::{Board, FullMove};

/// Errors from the binary move codecs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("move cannot be expressed by the codec: {0}")]
    UnencodableMove(String),
    #[error("no piece of the side to move has index {0}")]
    PieceNotFound(u8),
    #[error("invalid encoded move data")]
    BadData,
    #[error("encoded move list ends mid-move")]
    Truncated,
}

const KING_OFFSETS: [i32; 10] = [-9, -8, -7, -2, -1, 1, 2, 7, 8, 9];
const KNIGHT_OFFSETS: [i32; 8] = [-17, -15, -10, -6, 6, 10, 15, 17];
const PAWN_OFFSETS: [i32; 4] = [7, 8, 9, 16];

/// Per-square anchors of the two diagonals through each square: the low
/// byte holds the upper end of the down-right (+9) diagonal, the high byte
/// the lower end of the up-right (-7) diagonal.
static BISHOP_ANCHORS: [u16; 64] = build_bishop_anchors();

const fn build_bishop_anchors() -> [u16; 64] {
    let mut table = [0u16; 64];

    // Diagonals anchored on the top row.
    let mut pos = 0i32;
    while pos < 8 {
        let mut i = 0;
        while i < 8 - pos {
            table[(pos + i * 9) as usize] |= pos as u16;
            i += 1;
        }

        let mut k = 56 + pos;
        loop {
            table[k as usize] |= ((56 + pos) as u16) << 8;
            if k % 8 >= 7 {
                break;
            }
            k -= 7;
        }
        pos += 1;
    }

    // Diagonals anchored on column a.
    let mut pos = 8i32;
    while pos < 64 {
        let mut k = pos;
        while k < 64 {
            table[k as usize] |= pos as u16;
            k += 9;
        }

        let mut k = pos;
        while k >= 0 {
            table[k as usize] |= (pos as u16) << 8;
            k -= 7;
        }
        pos += 8;
    }

    table
}

/// Encodes a move into the fixed 2-byte form.
pub fn encode_2byte(mv: Move) -> u16 {
    let from = mv.from.bitboard_index() as u16;
    let dest = mv.dest.bitboard_index() as u16;
    let promo = match mv.promotion {
        Some(p) => (Piece::Pawn.index() + 1 - p.index()) as u16,
        None => 0,
    };
    from | dest << 6 | promo << 12
}

/// Decodes a move from the fixed 2-byte form.
pub fn decode_2byte(d: u16) -> Result<Move, CodecError> {
    let from = Square::from_bitboard_index((d & 0x3f) as u8).ok_or(CodecError::BadData)?;
    let dest = Square::from_bitboard_index((d >> 6 & 0x3f) as u8).ok_or(CodecError::BadData)?;
    let promotion = match d >> 12 {
        0 => None,
        bits => {
            let index = (Piece::Pawn.index() + 1).checked_sub(bits as u8);
            let piece = index.and_then(Piece::from_index).ok_or(CodecError::BadData)?;
            if !piece.is_promotion() {
                return Err(CodecError::BadData);
            }
            Some(piece)
        }
    };
    let mv = Move {
        from,
        dest,
        promotion,
    };
    if !mv.is_valid() {
        return Err(CodecError::BadData);
    }
    Ok(mv)
}

/// Encodes a move into the 1-byte form; returns the encoded value and its
/// width in bytes (1, or 2 for queen moves).
pub fn encode_1byte(mv: &FullMove) -> Result<(u16, usize), CodecError> {
    let idx = mv.placed.index as u16;
    debug_assert!(idx < 16);
    let from = mv.from().index() as i32;
    let dest = mv.dest().index() as i32;

    let unencodable = || CodecError::UnencodableMove(mv.mv.to_coordinate());

    let t = match mv.placed.piece {
        // Queen moves carry the absolute destination and need two bytes.
        Piece::Queen => return Ok((idx | (dest as u16) << 4, 2)),
        Piece::King => {
            let sel = KING_OFFSETS
                .iter()
                .position(|&d| d == dest - from)
                .ok_or_else(unencodable)?;
            idx | (sel as u16) << 4
        }
        Piece::Knight => {
            let sel = KNIGHT_OFFSETS
                .iter()
                .position(|&d| d == dest - from)
                .ok_or_else(unencodable)?;
            idx | (sel as u16) << 4
        }
        Piece::Pawn => {
            let sel = PAWN_OFFSETS
                .iter()
                .position(|&d| d == (dest - from).abs())
                .ok_or_else(unencodable)?;
            let mut t = idx | (sel as u16) << 4;
            if let Some(promo) = mv.promotion() {
                let choice = (promo.index() - Piece::Queen.index()) as u16;
                t |= choice << 6;
            }
            t
        }
        Piece::Rook => {
            if from >> 3 == dest >> 3 {
                idx | ((dest & 7) as u16) << 5
            } else if from & 7 == dest & 7 {
                idx | 1 << 4 | ((dest >> 3) as u16) << 5
            } else {
                return Err(unencodable());
            }
        }
        Piece::Bishop => {
            let sf = BISHOP_ANCHORS[from as usize];
            let sd = BISHOP_ANCHORS[dest as usize];
            if sf & 0xff == sd & 0xff {
                let s = (sd & 0xff) as i32;
                if dest < s || (dest - s) % 9 != 0 {
                    return Err(unencodable());
                }
                let k = ((dest - s) / 9) as u16;
                idx | k << 5
            } else if sf >> 8 == sd >> 8 {
                let s = (sd >> 8) as i32;
                if dest > s || (s - dest) % 7 != 0 {
                    return Err(unencodable());
                }
                let k = ((s - dest) / 7) as u16;
                idx | 1 << 4 | k << 5
            } else {
                return Err(unencodable());
            }
        }
    };
    Ok((t, 1))
}

/// Decodes one move from the head of `data`, locating the mover by its
/// piece index on the current board. Returns the move and the number of
/// bytes consumed.
pub fn decode_1byte(board: &Board, data: &[u8]) -> Result<(Move, usize), CodecError> {
    let first = *data.first().ok_or(CodecError::Truncated)?;
    let idx = first & 0xf;

    let mut from = None;
    for i in 0..64i32 {
        if let Some(p) = board.at_idx(i) {
            if p.index == idx && p.color == board.side {
                from = Some((i, p));
                break;
            }
        }
    }
    let (from, placed) = from.ok_or(CodecError::PieceNotFound(idx))?;

    let mut consumed = 1;
    let mut promotion = None;
    let dest = match placed.piece {
        Piece::King => {
            let sel = (first >> 4 & 0xf) as usize;
            from + KING_OFFSETS.get(sel).ok_or(CodecError::BadData)?
        }
        Piece::Knight => {
            let sel = (first >> 4 & 0xf) as usize;
            from + KNIGHT_OFFSETS.get(sel).ok_or(CodecError::BadData)?
        }
        Piece::Pawn => {
            let sel = (first >> 4 & 0x3) as usize;
            let x = PAWN_OFFSETS[sel];
            let dest = if placed.color == chessdb_core::Color::White {
                from - x
            } else {
                from + x
            };
            if !(0..64).contains(&dest) {
                return Err(CodecError::BadData);
            }
            if !(8..56).contains(&dest) {
                let choice = first >> 6 & 0x3;
                promotion = Piece::from_index(Piece::Queen.index() + choice);
                if promotion.is_none() {
                    return Err(CodecError::BadData);
                }
            }
            dest
        }
        Piece::Queen => {
            let second = *data.get(1).ok_or(CodecError::Truncated)?;
            consumed = 2;
            let word = first as u16 | (second as u16) << 8;
            (word >> 4) as i32
        }
        Piece::Rook => {
            let k = (first >> 5) as i32;
            if first & 1 << 4 != 0 {
                k * 8 + (from & 7)
            } else {
                (from >> 3) * 8 + k
            }
        }
        Piece::Bishop => {
            let sf = BISHOP_ANCHORS[from as usize];
            let k = (first >> 5) as i32;
            if first & 1 << 4 != 0 {
                (sf >> 8) as i32 - k * 7
            } else {
                (sf & 0xff) as i32 + k * 9
            }
        }
    };

    if !(0..64).contains(&dest) || dest == from {
        return Err(CodecError::BadData);
    }
    let mv = Move {
        from: Square::from_index(from as u8).expect("scan keeps range"),
        dest: Square::from_index(dest as u8).expect("checked above"),
        promotion,
    };
    Ok((mv, consumed))
}

/// Serializes a recorded game into the 2-byte format.
pub fn encode_game_2byte(board: &Board) -> Vec<u8> {
    let mut out = Vec::with_capacity(board.history.len() * 2);
    for entry in &board.history {
        out.extend_from_slice(&encode_2byte(entry.mv.mv).to_le_bytes());
    }
    out
}

/// Serializes a recorded game into the 1-byte format.
pub fn encode_game_1byte(board: &Board) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(board.history.len());
    for entry in &board.history {
        let (value, width) = encode_1byte(&entry.mv)?;
        out.push(value as u8);
        if width == 2 {
            out.push((value >> 8) as u8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(s: &str) -> Move {
        Move::from_coordinate(s).unwrap()
    }

    #[test]
    fn two_byte_roundtrip() {
        for s in ["e2e4", "g1f3", "e1g1", "e7e8q", "a7a8n", "h2h1r"] {
            let m = mv(s);
            assert_eq!(decode_2byte(encode_2byte(m)).unwrap(), m, "{s}");
        }
    }

    #[test]
    fn two_byte_promotion_bits() {
        // Promotion field stores pawn_index + 1 - piece_index.
        let q = encode_2byte(mv("e7e8q"));
        assert_eq!(q >> 12, 5);
        let n = encode_2byte(mv("e7e8n"));
        assert_eq!(n >> 12, 2);
        assert!(decode_2byte(0xF000 | encode_2byte(mv("e7e8")) & 0xfff).is_err());
    }

    #[test]
    fn two_byte_uses_a1_numbering() {
        let e2e4 = encode_2byte(mv("e2e4"));
        assert_eq!(e2e4 & 0x3f, 12, "e2 is 12 under a1 = 0");
        assert_eq!(e2e4 >> 6 & 0x3f, 28, "e4 is 28 under a1 = 0");
    }

    fn roundtrip_1byte(moves: &[&str]) {
        let mut encode_board = Board::new();
        for s in moves {
            assert!(encode_board.make_quick(mv(s), false), "setup move {s}");
        }
        let blob = encode_game_1byte(&encode_board).unwrap();

        let mut board = Board::new();
        let mut at = 0;
        let mut decoded = Vec::new();
        while at < blob.len() {
            let (m, width) = decode_1byte(&board, &blob[at..]).unwrap();
            at += width;
            decoded.push(m.to_coordinate());
            let full = board.full_move(m).unwrap();
            board.make(full);
        }
        let played: Vec<String> = moves.iter().map(|s| mv(s).to_coordinate()).collect();
        assert_eq!(decoded, played);
    }

    #[test]
    fn one_byte_roundtrip_with_castling() {
        // The castling king step of two squares uses the +-2 selectors.
        roundtrip_1byte(&[
            "e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "f8c5", "e1g1", "g8f6", "f1e1", "e8g8",
        ]);
    }

    #[test]
    fn one_byte_roundtrip_queen_moves() {
        roundtrip_1byte(&[
            "e2e4", "d7d5", "e4d5", "d8d5", "b1c3", "d5a5", "b2b4", "a5b4", "a2a3", "b4b2",
            "c1b2",
        ]);
    }

    #[test]
    fn one_byte_promotion_choice_bits() {
        let mut board = Board::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
        assert!(board.make_quick(mv("a7a8n"), false));
        let blob = encode_game_1byte(&board).unwrap();
        assert_eq!(blob.len(), 1);

        let decode_board = Board::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
        let (m, width) = decode_1byte(&decode_board, &blob).unwrap();
        assert_eq!(width, 1);
        assert_eq!(m, mv("a7a8n"));
    }

    #[test]
    fn queen_moves_take_two_bytes() {
        let mut board = Board::new();
        for s in ["d2d4", "d7d5", "d1d3"] {
            assert!(board.make_quick(mv(s), false));
        }
        let blob = encode_game_1byte(&board).unwrap();
        assert_eq!(blob.len(), 4, "two pawn moves plus a two-byte queen move");
    }

    #[test]
    fn decode_reports_missing_piece() {
        let board = Board::from_fen("8/8/8/8/8/8/8/K6k w - - 0 1").unwrap();
        // Index 15 does not exist with two lone kings on the board.
        let err = decode_1byte(&board, &[0x0f]).unwrap_err();
        assert_eq!(err, CodecError::PieceNotFound(15));
        assert_eq!(decode_1byte(&board, &[]).unwrap_err(), CodecError::Truncated);
    }

    #[test]
    fn bishop_anchor_table_agrees_along_diagonals() {
        // d4 (35) shares its down-right diagonal with e3 (44) and its
        // up-right diagonal with e5 (28); anchors must match along each.
        assert_eq!(BISHOP_ANCHORS[35] & 0xff, BISHOP_ANCHORS[44] & 0xff);
        assert_eq!(BISHOP_ANCHORS[35] >> 8, BISHOP_ANCHORS[28] >> 8);
        // c5 (26) lies on the other end of d4's down-right diagonal.
        assert_eq!(BISHOP_ANCHORS[35] & 0xff, BISHOP_ANCHORS[26] & 0xff);
    }

    #[test]
    fn promoted_queen_encodes_through_pawn_index() {
        // Promotion keeps the pawn-assigned index; the decoder locates the
        // new queen by that index and reads a two-byte queen move.
        let mut board = Board::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
        assert!(board.make_quick(mv("a7a8q"), false));
        assert!(board.make_quick(mv("h7g7"), false));
        assert!(board.make_quick(mv("a8d5"), false));
        let blob = encode_game_1byte(&board).unwrap();

        let mut decode_board = Board::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
        let mut at = 0;
        let mut count = 0;
        while at < blob.len() {
            let (m, width) = decode_1byte(&decode_board, &blob[at..]).unwrap();
            at += width;
            let full = decode_board.full_move(m).unwrap();
            decode_board.make(full);
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(
            decode_board
                .at(Square::from_algebraic("d5").unwrap())
                .map(|p| p.piece),
            Some(Piece::Queen)
        );
    }
}
