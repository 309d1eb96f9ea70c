//! PGN move-text scanning and game replay.
//!
//! The scanner walks raw move text, collecting move tokens and `{...}`
//! comments, skipping `;` and leading-`%` line comments, move-number
//! runs, `!?` evaluation symbols, and nested `(...)` variations. The
//! replay drivers step a board through either the scanned tokens or a
//! binary move blob, optionally recording per-ply FEN strings, bitboard
//! snapshots, and SAN, and letting a callback stop the replay at a hit.

use std::collections::HashMap;

use thiserror::Error;

use crate::bitboard::Snapshot;
use crate::board::{Board, EngineEval};
use crate::codec::{self, CodecError};
use crate::san::SanError;

/// Options for replaying a game's moves.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Validate moves by geometry only (ingest fast path) instead of full
    /// generation.
    pub quick_check: bool,
    /// Record SAN per ply.
    pub create_san: bool,
    /// Record the pre-move FEN per ply.
    pub create_fen: bool,
    /// Record the pre-move bitboard snapshot per ply.
    pub create_snapshot: bool,
    /// Drop comments instead of attaching them.
    pub discard_comments: bool,
    /// Parse engine-evaluation comments into structured records.
    pub parse_comments: bool,
}

/// Errors from move-text replay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("malformed move text near token {0:?}")]
    BadToken(String),
    #[error("illegal move at ply {ply}: {text}")]
    IllegalMove { ply: usize, text: String },
    #[error(transparent)]
    San(#[from] SanError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A callback deciding whether the replay should stop at this position.
pub type StopCheck<'a> = &'a mut dyn FnMut(&Snapshot, &Board) -> bool;

struct ScannedText {
    moves: Vec<String>,
    /// Comment following the k-th move token (k = 0 is the pre-move
    /// comment).
    comments: HashMap<usize, String>,
}

fn scan_move_text(text: &str) -> Result<ScannedText, ReplayError> {
    #[derive(PartialEq)]
    enum State {
        None,
        Move,
        Comment,
        LineComment,
        EvalSymbol,
        Variation(u32),
        Counter,
    }

    let mut state = State::None;
    let mut moves: Vec<String> = Vec::new();
    let mut comments: HashMap<usize, String> = HashMap::new();
    let mut token = String::new();
    let mut comment = String::new();
    let mut prev = '\0';

    let mut close_comment = |comments: &mut HashMap<usize, String>,
                             comment: &mut String,
                             count: usize| {
        let trimmed = comment.trim().to_string();
        if !trimmed.is_empty() {
            comments
                .entry(count)
                .and_modify(|c| {
                    c.push(' ');
                    c.push_str(&trimmed);
                })
                .or_insert(trimmed);
        }
        comment.clear();
    };

    let chars: Vec<char> = text.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        match state {
            State::None => {
                if ch.is_ascii_alphabetic() {
                    token.clear();
                    token.push(ch);
                    state = State::Move;
                } else if ch == '!' || ch == '?' {
                    state = State::EvalSymbol;
                } else if ch == '{' {
                    comment.clear();
                    state = State::Comment;
                } else if ch == ';' || (ch == '%' && (i == 0 || prev == '\n' || prev == '\r')) {
                    state = State::LineComment;
                } else if ch == '(' {
                    state = State::Variation(1);
                } else if ch.is_ascii_digit() {
                    state = State::Counter;
                }
            }
            State::Move => {
                if ch.is_ascii_alphanumeric()
                    || ch == '='
                    || ch == '+'
                    || (ch == '-' && (prev == 'O' || prev == '0'))
                {
                    token.push(ch);
                } else {
                    if token.len() < 2 || token.len() > 8 {
                        return Err(ReplayError::BadToken(token));
                    }
                    moves.push(std::mem::take(&mut token));
                    state = State::None;
                    continue; // reprocess this character
                }
            }
            State::EvalSymbol => {
                if ch != '!' && ch != '?' {
                    state = State::None;
                    continue;
                }
            }
            State::Comment => {
                if ch == '}' {
                    close_comment(&mut comments, &mut comment, moves.len());
                    state = State::None;
                } else if ch == '\n' || ch == '\r' {
                    if !comment.ends_with(' ') && !comment.is_empty() {
                        comment.push(' ');
                    }
                } else {
                    comment.push(ch);
                }
            }
            State::LineComment => {
                if ch == '\n' || ch == '\r' {
                    state = State::None;
                }
            }
            State::Variation(level) => {
                if ch == '(' {
                    state = State::Variation(level + 1);
                } else if ch == ')' {
                    if level == 1 {
                        state = State::None;
                    } else {
                        state = State::Variation(level - 1);
                    }
                }
            }
            State::Counter => {
                if !ch.is_ascii_alphanumeric() {
                    state = State::None;
                    if ch != '.' && ch != ')' {
                        continue;
                    }
                }
            }
        }
        prev = ch;
        i += 1;
    }

    if token.len() > 1 && token.len() < 10 {
        moves.push(token);
    }
    if state == State::Comment {
        close_comment(&mut comments, &mut comment, moves.len());
    }

    Ok(ScannedText { moves, comments })
}

/// Splits an engine comment into structured evaluations and the remaining
/// plain text.
///
/// TCEC-style comments are comma-separated `key=value` lists (`d=`, `sd=`,
/// `n=`, `mt=`, `s=`, `wv=`, `mb=`, `tb=`); the common standard form is
/// `score/depth time`, e.g. `+0.25/18 12s`. Anything unrecognized stays as
/// plain comment text.
pub fn parse_eval_comment(comment: &str) -> (Option<EngineEval>, String) {
    if comment.contains("d=") && comment.contains("n=") {
        let mut eval = EngineEval::default();
        for part in comment.split(',') {
            let part = part.trim();
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            if key.is_empty() || value.is_empty() {
                continue;
            }
            match key {
                "d" => eval.depth = value.parse().unwrap_or(1).max(1),
                "sd" => eval.sel_depth = value.parse().unwrap_or(1).max(1),
                "n" => eval.nodes = value.parse().unwrap_or(0),
                "mt" => eval.time_ms = tcec_time_ms(value),
                "s" => {
                    let n: f64 = value
                        .trim_end_matches(|c: char| !c.is_ascii_digit() && c != '.')
                        .parse()
                        .unwrap_or(0.0);
                    eval.speed_nps = if value.contains("kN/s") {
                        (n * 1000.0) as u64
                    } else {
                        n as u64
                    };
                }
                "tb" => {
                    if value != "null" {
                        eval.tb_hits = value.parse().unwrap_or(0);
                    }
                }
                "wv" => {
                    let mut v = value;
                    let negative = v.starts_with('-');
                    if negative {
                        v = &v[1..];
                    }
                    if let Some(rest) = v.strip_prefix('M') {
                        eval.mating = true;
                        v = rest;
                    }
                    let score: f64 = v.parse().unwrap_or(0.0);
                    let mut score = if eval.mating {
                        score as i32
                    } else {
                        (score * 100.0) as i32
                    };
                    if negative {
                        score = -score;
                    }
                    eval.score = score;
                }
                "mb" => eval.material = value.to_string(),
                _ => {}
            }
        }
        return (Some(eval), String::new());
    }

    // "score/depth time" form.
    let parts: Vec<&str> = comment.split_whitespace().collect();
    if parts.len() >= 2 && parts[0].contains('/') {
        let first = parts[0];
        let lead = first.chars().next().unwrap_or(' ');
        if lead.is_ascii_digit() || lead == 'M' || lead == '-' || lead == '+' {
            if let Some((score_text, depth_text)) = first.split_once('/') {
                let mut eval = EngineEval::default();
                let mut s = score_text;
                if let Some(rest) = s.strip_prefix('M') {
                    eval.mating = true;
                    s = rest;
                }
                let score: f64 = s.parse().unwrap_or(0.0);
                eval.score = if eval.mating {
                    score as i32
                } else {
                    (score * 100.0) as i32
                };
                eval.depth = depth_text.parse().unwrap_or(0);
                eval.time_ms = (parts[1]
                    .trim_end_matches('s')
                    .parse::<f64>()
                    .unwrap_or(0.0)
                    * 1000.0) as u64;
                let rest = parts[2..].join(" ");
                return (Some(eval), rest);
            }
        }
    }

    (None, comment.to_string())
}

fn tcec_time_ms(value: &str) -> u64 {
    let fields: Vec<&str> = value.split(':').collect();
    if fields.len() >= 3 {
        let h: u64 = fields[0].parse().unwrap_or(0);
        let m: u64 = fields[1].parse().unwrap_or(0);
        let s: u64 = fields[2].parse().unwrap_or(0);
        (h * 3600 + m * 60 + s) * 1000
    } else {
        value.parse().unwrap_or(0)
    }
}

impl Board {
    /// Replays SAN move text on this board. Returns true when the stop
    /// callback reported a hit.
    pub fn replay_text(
        &mut self,
        move_text: &str,
        opts: &ReplayOptions,
        mut stop: Option<StopCheck<'_>>,
    ) -> Result<bool, ReplayError> {
        let scanned = scan_move_text(move_text)?;

        if let Some(first) = scanned.comments.get(&0) {
            if !opts.discard_comments {
                self.set_first_comment(first.clone());
            }
        }

        for (i, token) in scanned.moves.iter().enumerate() {
            let mut comment = None;
            let mut evals = Vec::new();
            if !opts.discard_comments {
                if let Some(text) = scanned.comments.get(&(i + 1)) {
                    if opts.parse_comments {
                        let (eval, rest) = parse_eval_comment(text);
                        evals.extend(eval);
                        if !rest.is_empty() {
                            comment = Some(rest);
                        }
                    } else {
                        comment = Some(text.clone());
                    }
                }
            }

            let fen = opts.create_fen.then(|| self.fen());
            let snapshot = if opts.create_snapshot {
                let snap = self.snapshot();
                if let Some(cb) = stop.as_deref_mut() {
                    if cb(&snap, self) {
                        return Ok(true);
                    }
                }
                Some(snap)
            } else {
                None
            };

            let mv = self.san_to_move(token)?;
            let made = if opts.quick_check {
                self.make_quick(mv, false)
            } else {
                self.make_checked(mv)
            };
            if !made {
                return Err(ReplayError::IllegalMove {
                    ply: i,
                    text: token.clone(),
                });
            }

            let entry = self
                .history
                .last_mut()
                .expect("make pushed a history entry");
            entry.comment = comment;
            entry.evals = evals;
            entry.fen = fen;
            entry.snapshot = snapshot;
            if opts.create_san {
                entry.san = token.clone();
            }
        }

        if let Some(cb) = stop.as_deref_mut() {
            let snap = self.snapshot();
            if cb(&snap, self) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Replays a binary move blob (1-byte or 2-byte encoding) on this
    /// board. Returns true when the stop callback reported a hit.
    pub fn replay_encoded(
        &mut self,
        data: &[u8],
        one_byte: bool,
        opts: &ReplayOptions,
        mut stop: Option<StopCheck<'_>>,
    ) -> Result<bool, ReplayError> {
        let mut at = 0usize;
        while at < data.len() {
            let fen = opts.create_fen.then(|| self.fen());
            let snapshot = if opts.create_snapshot {
                let snap = self.snapshot();
                if let Some(cb) = stop.as_deref_mut() {
                    if cb(&snap, self) {
                        return Ok(true);
                    }
                }
                Some(snap)
            } else {
                None
            };

            let (mv, width) = if one_byte {
                codec::decode_1byte(self, &data[at..])?
            } else {
                if at + 2 > data.len() {
                    return Err(CodecError::Truncated.into());
                }
                let word = u16::from_le_bytes([data[at], data[at + 1]]);
                (codec::decode_2byte(word)?, 2)
            };
            at += width;

            let Some(full) = self.full_move(mv) else {
                return Err(CodecError::BadData.into());
            };
            self.make(full);

            let entry = self
                .history
                .last_mut()
                .expect("make pushed a history entry");
            entry.fen = fen;
            entry.snapshot = snapshot;
            if opts.create_san {
                self.record_san();
            }
        }

        if let Some(cb) = stop.as_deref_mut() {
            let snap = self.snapshot();
            if cb(&snap, self) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_plain_game() {
        let scanned = scan_move_text("1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 1-0").unwrap();
        assert_eq!(scanned.moves, ["e4", "e5", "Nf3", "Nc6", "Bb5", "a6"]);
        assert!(scanned.comments.is_empty());
    }

    #[test]
    fn scans_comments_and_variations() {
        let text = "{King's pawn} 1. e4 {best by test} e5 (1... c5 2. Nf3 (2. c3)) 2. Nf3 $1 Nc6!?";
        let scanned = scan_move_text(text).unwrap();
        assert_eq!(scanned.moves, ["e4", "e5", "Nf3", "Nc6"]);
        assert_eq!(scanned.comments[&0], "King's pawn");
        assert_eq!(scanned.comments[&1], "best by test");
    }

    #[test]
    fn scans_line_comments() {
        let text = "; a whole-line remark\n1. e4 e5 ;trailing\n2. Nf3\n%escaped line\nNc6";
        let scanned = scan_move_text(text).unwrap();
        assert_eq!(scanned.moves, ["e4", "e5", "Nf3", "Nc6"]);
    }

    #[test]
    fn replays_and_records() {
        let mut board = Board::new();
        let opts = ReplayOptions {
            quick_check: true,
            create_san: true,
            create_snapshot: true,
            ..Default::default()
        };
        let hit = board
            .replay_text("1. e4 {good} e5 2. Nf3 Nc6", &opts, None)
            .unwrap();
        assert!(!hit);
        assert_eq!(board.ply_count(), 4);
        assert_eq!(board.history[0].comment.as_deref(), Some("good"));
        assert_eq!(board.history[0].san, "e4");
        assert!(board.history[0].snapshot.is_some());
        // The per-ply snapshot is of the position before the move.
        assert_eq!(
            board.history[0].snapshot.unwrap().hash(),
            board.history[0].hash
        );
    }

    #[test]
    fn replay_rejects_illegal_moves() {
        let mut board = Board::new();
        let opts = ReplayOptions {
            quick_check: true,
            ..Default::default()
        };
        let err = board.replay_text("1. e4 e5 2. Ke2 Ke7 3. Kd3", &opts, None);
        assert!(err.is_ok(), "legal king walk replays fine");

        let mut board = Board::new();
        let err = board.replay_text("1. e5", &opts, None).unwrap_err();
        assert!(matches!(err, ReplayError::San(_)));
    }

    #[test]
    fn stop_callback_halts_replay() {
        let mut board = Board::new();
        let opts = ReplayOptions {
            quick_check: true,
            create_snapshot: true,
            ..Default::default()
        };
        let mut seen = 0usize;
        let mut cb = |_: &Snapshot, _: &Board| {
            seen += 1;
            seen == 3
        };
        let hit = board
            .replay_text("1. e4 e5 2. Nf3 Nc6 3. Bb5 a6", &opts, Some(&mut cb))
            .unwrap();
        assert!(hit);
        assert_eq!(board.ply_count(), 2, "stopped before the third move");
    }

    #[test]
    fn binary_roundtrip_via_replay() {
        let mut board = Board::new();
        let opts = ReplayOptions {
            quick_check: true,
            ..Default::default()
        };
        board
            .replay_text("1. d4 d5 2. c4 e6 3. Nc3 Nf6 4. Bg5 Be7", &opts, None)
            .unwrap();
        let blob2 = crate::codec::encode_game_2byte(&board);
        let blob1 = crate::codec::encode_game_1byte(&board).unwrap();

        let mut replay2 = Board::new();
        replay2
            .replay_encoded(&blob2, false, &ReplayOptions::default(), None)
            .unwrap();
        assert_eq!(replay2.fen(), board.fen());

        let mut replay1 = Board::new();
        replay1
            .replay_encoded(&blob1, true, &ReplayOptions::default(), None)
            .unwrap();
        assert_eq!(replay1.fen(), board.fen());
    }

    #[test]
    fn parses_tcec_eval_comment() {
        let (eval, rest) =
            parse_eval_comment("d=20, sd=31, mt=00:00:11, s=24000 kN/s, n=264851751, wv=0.26, tb=0, mb=+0+0+0+0+0,");
        let eval = eval.unwrap();
        assert_eq!(eval.depth, 20);
        assert_eq!(eval.sel_depth, 31);
        assert_eq!(eval.time_ms, 11_000);
        assert_eq!(eval.nodes, 264_851_751);
        assert_eq!(eval.score, 26);
        assert!(!eval.mating);
        assert_eq!(eval.material, "+0+0+0+0+0");
        assert!(rest.is_empty());
    }

    #[test]
    fn parses_standard_eval_comment() {
        let (eval, rest) = parse_eval_comment("+0.25/18 12s");
        let eval = eval.unwrap();
        assert_eq!(eval.score, 25);
        assert_eq!(eval.depth, 18);
        assert_eq!(eval.time_ms, 12_000);
        assert!(rest.is_empty());

        let (eval, _) = parse_eval_comment("M5/12 1s");
        let eval = eval.unwrap();
        assert!(eval.mating);
        assert_eq!(eval.score, 5);
    }

    #[test]
    fn plain_comment_passes_through() {
        let (eval, rest) = parse_eval_comment("a typically sharp position");
        assert!(eval.is_none());
        assert_eq!(rest, "a typically sharp position");
    }
}
