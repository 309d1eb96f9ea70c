//! Game-end detection.

use chessdb_core::{Color, Piece};

use crate::board::Board;

/// Why a finished game is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawReason {
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
}

/// The outcome of a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    WhiteWins,
    BlackWins,
    Draw(DrawReason),
}

impl GameOutcome {
    /// The PGN result token for this outcome.
    pub fn result_text(self) -> &'static str {
        match self {
            GameOutcome::WhiteWins => "1-0",
            GameOutcome::BlackWins => "0-1",
            GameOutcome::Draw(_) => "1/2-1/2",
        }
    }
}

impl Board {
    /// Checks whether the game has ended in the current position.
    pub fn outcome(&mut self) -> Option<GameOutcome> {
        let side = self.side;
        let has_legal_move = !self.generate_legal(side).is_empty();

        if !has_legal_move {
            return Some(if self.in_check(side) {
                match side {
                    Color::White => GameOutcome::BlackWins,
                    Color::Black => GameOutcome::WhiteWins,
                }
            } else {
                GameOutcome::Draw(DrawReason::Stalemate)
            });
        }

        if self.insufficient_material() {
            return Some(GameOutcome::Draw(DrawReason::InsufficientMaterial));
        }

        if self.quiet >= 100 {
            return Some(GameOutcome::Draw(DrawReason::FiftyMoveRule));
        }

        if self.repetition_count() >= 2 {
            return Some(GameOutcome::Draw(DrawReason::ThreefoldRepetition));
        }

        None
    }

    /// Neither side can possibly mate: no queens, rooks, or pawns, and no
    /// side holds a knight pair, bishop-and-knight, or bishops on both
    /// square colors.
    pub fn insufficient_material(&self) -> bool {
        let mut knights = [0u32; 2];
        let mut bishops_light = [0u32; 2];
        let mut bishops_dark = [0u32; 2];

        for i in 0..64i32 {
            let Some(p) = self.at_idx(i) else {
                continue;
            };
            let sd = p.color.index();
            match p.piece {
                Piece::King => {}
                Piece::Knight => {
                    knights[sd] += 1;
                    if knights[sd] > 1 || bishops_light[sd] + bishops_dark[sd] > 0 {
                        return false;
                    }
                }
                Piece::Bishop => {
                    if ((i >> 3) + (i & 7)) & 1 == 0 {
                        bishops_light[sd] += 1;
                    } else {
                        bishops_dark[sd] += 1;
                    }
                    if (bishops_light[sd] > 0 && bishops_dark[sd] > 0) || knights[sd] > 0 {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }

    /// Counts earlier occurrences of the current position, scanning
    /// backward at two-ply steps within the quiet-move window.
    pub fn repetition_count(&self) -> u32 {
        if self.quiet < 8 {
            return 0;
        }
        let len = self.history.len() as i64;
        let window_start = len - self.quiet as i64;
        let mut count = 0;
        let mut i = len - 2;
        while i >= 0 && i >= window_start {
            if self.history[i as usize].hash == self.hash() {
                count += 1;
            }
            i -= 2;
        }
        count
    }
}
