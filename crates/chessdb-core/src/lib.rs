//! Core types for the chess database.
//!
//! This crate provides the fundamental types shared by the engine and the
//! database tooling:
//! - [`Piece`] and [`Color`] for piece representation
//! - [`Square`], [`File`], and [`Rank`] for board coordinates (a8 = 0,
//!   rank-major from the eighth rank)
//! - [`Move`] for move representation
//! - [`FenFields`] for FEN field splitting

mod color;
mod fen;
mod mov;
mod piece;
mod square;

pub use color::Color;
pub use fen::{FenError, FenFields};
pub use mov::Move;
pub use piece::Piece;
pub use square::{File, Rank, Square};
