//! Mailbox chess engine for the game database.
//!
//! This crate provides:
//! - [`Board`] - full game state with make/unmake and history tracking
//! - Move generation and legality filtering over a plain 64-square array
//! - SAN, LAN, and coordinate notation parsing and rendering
//! - Polyglot-compatible Zobrist hashing (bit-exact key table)
//! - [`Snapshot`] - per-ply bitboard condensates for position queries
//! - The 1-byte and 2-byte binary move codecs
//! - Move-text scanning and replay with comments and variations
//!
//! # Example
//!
//! ```
//! use chessdb_engine::{Board, ReplayOptions};
//!
//! let mut board = Board::new();
//! let opts = ReplayOptions { quick_check: true, create_san: true, ..Default::default() };
//! board.replay_text("1. e4 e5 2. Nf3 Nc6", &opts, None).unwrap();
//! assert_eq!(board.ply_count(), 4);
//! ```

mod bitboard;
mod board;
pub mod codec;
mod makemove;
mod movegen;
mod movetext;
mod rules;
mod san;
pub mod zobrist;

pub use bitboard::{Snapshot, SnapshotIndex, SNAPSHOT_WORDS};
pub use board::{
    Board, EngineEval, FullMove, HistoryEntry, Placed, Variant, CASTLE_LONG, CASTLE_SHORT,
};
pub use codec::CodecError;
pub use movetext::{parse_eval_comment, ReplayError, ReplayOptions, StopCheck};
pub use rules::{DrawReason, GameOutcome};
pub use san::{Notation, SanError};

#[cfg(test)]
mod perft_tests {
    use super::*;

    fn perft(board: &mut Board, depth: u32) -> u64 {
        if depth == 0 {
            return 1;
        }
        let side = board.side;
        let mut nodes = 0;
        for mv in board.generate(side) {
            let mover = board.side;
            board.make(mv);
            if !board.in_check(mover) {
                nodes += perft(board, depth - 1);
            }
            board.unmake();
        }
        nodes
    }

    #[test]
    fn perft_startpos() {
        let mut board = Board::new();
        assert_eq!(perft(&mut board, 1), 20);
        assert_eq!(perft(&mut board, 2), 400);
        assert_eq!(perft(&mut board, 3), 8_902);
        assert_eq!(perft(&mut board, 4), 197_281);
    }

    #[test]
    fn perft_kiwipete() {
        let mut board = Board::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        )
        .unwrap();
        assert_eq!(perft(&mut board, 1), 48);
        assert_eq!(perft(&mut board, 2), 2_039);
        assert_eq!(perft(&mut board, 3), 97_862);
    }

    #[test]
    fn perft_en_passant_position() {
        // Position 3 from the standard perft suite.
        let mut board = Board::from_fen("8/2p5/3p4/KP5r/1R3p1k/8/4P3/8 w - - 0 1").unwrap();
        assert_eq!(perft(&mut board, 1), 14);
        assert_eq!(perft(&mut board, 2), 191);
        assert_eq!(perft(&mut board, 3), 2_812);
        assert_eq!(perft(&mut board, 4), 43_238);
    }
}
