//! FEN field splitting and validation.

use thiserror::Error;

/// Errors from FEN field splitting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FenError {
    #[error("invalid FEN: expected at least 4 fields, got {0}")]
    MissingFields(usize),
    #[error("invalid piece placement: {0}")]
    InvalidPlacement(String),
    #[error("invalid active color: expected 'w' or 'b', got '{0}'")]
    InvalidActiveColor(String),
    #[error("invalid halfmove clock: {0}")]
    InvalidHalfmoveClock(String),
    #[error("invalid fullmove number: {0}")]
    InvalidFullmoveNumber(String),
}

/// The six whitespace-separated fields of a FEN string.
///
/// The last two fields are optional in the wild; they default to 0 and 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenFields<'a> {
    pub placement: &'a str,
    pub active_color: char,
    pub castling: &'a str,
    pub en_passant: &'a str,
    pub halfmove_clock: u32,
    pub fullmove_number: u32,
}

impl<'a> FenFields<'a> {
    /// The standard starting position.
    pub const STARTPOS: &'static str =
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    /// Splits a FEN string into its fields with light validation.
    ///
    /// Piece-placement content is validated only for rank count and row
    /// widths; the board is responsible for interpreting the characters.
    pub fn split(fen: &'a str) -> Result<Self, FenError> {
        let parts: Vec<&str> = fen.split_whitespace().collect();
        if parts.len() < 4 {
            return Err(FenError::MissingFields(parts.len()));
        }

        let placement = parts[0];
        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != 8 {
            return Err(FenError::InvalidPlacement(placement.to_string()));
        }
        for rank in &ranks {
            let mut width = 0u32;
            for c in rank.chars() {
                match c.to_digit(10) {
                    Some(d) if (1..=8).contains(&d) => width += d,
                    Some(_) => return Err(FenError::InvalidPlacement(placement.to_string())),
                    None => width += 1,
                }
            }
            if width != 8 {
                return Err(FenError::InvalidPlacement(placement.to_string()));
            }
        }

        let active_color = match parts[1] {
            "w" => 'w',
            "b" => 'b',
            other => return Err(FenError::InvalidActiveColor(other.to_string())),
        };

        let halfmove_clock = match parts.get(4) {
            Some(s) => s
                .parse()
                .map_err(|_| FenError::InvalidHalfmoveClock(s.to_string()))?,
            None => 0,
        };
        let fullmove_number = match parts.get(5) {
            Some(s) => s
                .parse()
                .map_err(|_| FenError::InvalidFullmoveNumber(s.to_string()))?,
            None => 1,
        };

        Ok(FenFields {
            placement,
            active_color,
            castling: parts[2],
            en_passant: parts[3],
            halfmove_clock,
            fullmove_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_startpos() {
        let f = FenFields::split(FenFields::STARTPOS).unwrap();
        assert_eq!(f.placement, "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR");
        assert_eq!(f.active_color, 'w');
        assert_eq!(f.castling, "KQkq");
        assert_eq!(f.en_passant, "-");
        assert_eq!(f.halfmove_clock, 0);
        assert_eq!(f.fullmove_number, 1);
    }

    #[test]
    fn defaults_missing_counters() {
        let f = FenFields::split("8/8/8/8/8/8/8/4K2k w - -").unwrap();
        assert_eq!(f.halfmove_clock, 0);
        assert_eq!(f.fullmove_number, 1);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            FenFields::split("only three fields"),
            Err(FenError::MissingFields(3))
        ));
        assert!(matches!(
            FenFields::split("8/8/8/8/8/8/8 w - - 0 1"),
            Err(FenError::InvalidPlacement(_))
        ));
        assert!(matches!(
            FenFields::split("9/8/8/8/8/8/8/8 w - - 0 1"),
            Err(FenError::InvalidPlacement(_))
        ));
        assert!(matches!(
            FenFields::split("8/8/8/8/8/8/8/4K2k x - - 0 1"),
            Err(FenError::InvalidActiveColor(_))
        ));
        assert!(matches!(
            FenFields::split("8/8/8/8/8/8/8/4K2k w - - zz 1"),
            Err(FenError::InvalidHalfmoveClock(_))
        ));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    const PIECES: [char; 12] = ['p', 'n', 'b', 'r', 'q', 'k', 'P', 'N', 'B', 'R', 'Q', 'K'];

    /// Random boards rendered with canonical run-length gap digits.
    fn placement() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::option::weighted(0.3, 0usize..12), 64).prop_map(|squares| {
            let mut out = String::new();
            for rank in 0..8 {
                let mut empty = 0;
                for file in 0..8 {
                    match squares[rank * 8 + file] {
                        Some(i) => {
                            if empty > 0 {
                                out.push_str(&empty.to_string());
                                empty = 0;
                            }
                            out.push(PIECES[i]);
                        }
                        None => empty += 1,
                    }
                }
                if empty > 0 {
                    out.push_str(&empty.to_string());
                }
                if rank < 7 {
                    out.push('/');
                }
            }
            out
        })
    }

    proptest! {
        #[test]
        fn split_roundtrips_rendered_fens(
            placement in placement(),
            white_to_move in any::<bool>(),
            castling in prop::sample::select(vec!["-", "K", "Qk", "KQkq", "kq", "Kk"]),
            en_passant in prop::sample::select(vec!["-", "a3", "e3", "d6", "h6"]),
            halfmove_clock in 0u32..150,
            fullmove_number in 1u32..400,
        ) {
            let color = if white_to_move { 'w' } else { 'b' };
            let fen = format!(
                "{placement} {color} {castling} {en_passant} {halfmove_clock} {fullmove_number}"
            );

            let fields = FenFields::split(&fen).expect("rendered FEN splits");
            prop_assert_eq!(fields.placement, placement.as_str());
            prop_assert_eq!(fields.active_color, color);
            prop_assert_eq!(fields.castling, castling);
            prop_assert_eq!(fields.en_passant, en_passant);
            prop_assert_eq!(fields.halfmove_clock, halfmove_clock);
            prop_assert_eq!(fields.fullmove_number, fullmove_number);

            // Rendering the split fields reproduces the input exactly.
            let rendered = format!(
                "{} {} {} {} {} {}",
                fields.placement,
                fields.active_color,
                fields.castling,
                fields.en_passant,
                fields.halfmove_clock,
                fields.fullmove_number
            );
            prop_assert_eq!(rendered, fen);
        }

        #[test]
        fn split_never_panics_on_arbitrary_text(text in ".{0,96}") {
            let _ = FenFields::split(&text);
        }
    }
}
