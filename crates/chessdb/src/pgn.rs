//! Streaming PGN tokenizer.
//!
//! Input files are read as fixed-size blocks. A state machine scans each
//! block for tag pairs and move text and emits one [`RawGame`] per game.
//! A game straddling two blocks is reconstructed through an overflow
//! buffer: the tail of a block, from its last `[Event ` tag onward, is
//! held back; the next block contributes its prefix up to its first
//! `[Event `, and the joined bytes are scanned as a standalone span. The
//! anchor works because every PGN game opens with an Event tag; a file
//! without Event tags cannot be split across blocks.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Primary read-block size.
pub const BLOCK_SIZE: usize = 8 * 1024 * 1024;
/// Capacity of the boundary overflow buffer.
pub const OVERFLOW_SIZE: usize = 16 * 1024;

/// One tokenized game: its tag pairs and raw move text.
#[derive(Debug, Clone, Default)]
pub struct RawGame {
    pub tags: HashMap<String, String>,
    pub move_text: String,
}

/// Counters from scanning one file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanStats {
    pub blocks: u64,
    pub bytes: u64,
    /// Games dropped because they overran the overflow buffer.
    pub dropped: u64,
}

/// The block tokenizer with its boundary overflow buffer.
#[derive(Default)]
pub struct PgnScanner {
    overflow: Vec<u8>,
    dropped: u64,
}

#[derive(Clone, Copy, PartialEq)]
enum State {
    Outside,
    TagName,
    AfterName,
    TagContent,
    AfterTag,
    Comment,
}

impl PgnScanner {
    pub fn new() -> Self {
        PgnScanner::default()
    }

    /// Games dropped so far at block boundaries.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Scans one block. With `connect` set, the block is assumed to be
    /// followed by another: its tail from the last `[Event ` onward is
    /// withheld into the overflow buffer, and its head completes any game
    /// left over from the previous block.
    pub fn process_block(&mut self, block: &[u8], connect: bool, emit: &mut dyn FnMut(RawGame)) {
        let mut state = State::Outside;
        let mut tags: HashMap<String, String> = HashMap::new();
        let mut has_event = false;
        let mut event_count = 0u32;
        let mut tag_name_start = 0usize;
        let mut tag_name: Option<String> = None;
        let mut content_start = 0usize;
        let mut event_start: Option<usize> = None;
        let mut moves_start: Option<usize> = None;

        let mut i = 0usize;
        while i < block.len() {
            let ch = block[i];
            match state {
                State::Outside => {
                    if ch == b'[' {
                        i += 1;
                        // A tag bracket is only honored at line starts and
                        // when followed by an uppercase name.
                        let next = block.get(i).copied().unwrap_or(0);
                        if !next.is_ascii_uppercase()
                            || (i > 1 && block.get(i - 2).is_some_and(|&b| b >= b' '))
                        {
                            continue;
                        }

                        if let Some(moves) = moves_start {
                            if has_event && i > 2 {
                                let text = &block[moves..i - 2];
                                emit(build_game(&mut tags, text));
                            }
                            tags.clear();
                            has_event = false;
                            moves_start = None;
                        }

                        tag_name_start = i;
                        state = State::TagName;
                    } else if ch > b' ' {
                        if ch == b';'
                            || (ch == b'%'
                                && (i == 0
                                    || matches!(block.get(i - 1), Some(b'\n') | Some(b'\r'))))
                        {
                            state = State::Comment;
                        } else if moves_start.is_none() && has_event {
                            moves_start = Some(i);
                        }
                    }
                }
                State::TagName => {
                    if !ch.is_ascii_alphabetic() {
                        if ch <= b' ' {
                            tag_name = Some(
                                String::from_utf8_lossy(&block[tag_name_start..i]).into_owned(),
                            );
                            state = State::AfterName;
                        } else {
                            state = State::Outside;
                        }
                    }
                }
                State::AfterName => {
                    if ch == b'"' {
                        state = State::TagContent;
                        content_start = i + 1;
                    }
                }
                State::TagContent => {
                    if ch == b'"' || ch == 0 {
                        let name = tag_name.take().unwrap_or_default();
                        let content =
                            String::from_utf8_lossy(&block[content_start..i]).into_owned();

                        if name == "Event" {
                            let bracket = tag_name_start.saturating_sub(1);
                            if event_count == 0 && connect {
                                self.complete_overflow(&block[..bracket.saturating_sub(1)], emit);
                            }
                            event_start = Some(bracket);
                            has_event = true;
                            event_count += 1;
                        }

                        if has_event {
                            tags.insert(name, content);
                        }
                        state = State::AfterTag;
                    }
                }
                State::AfterTag => {
                    if ch == b'\n' || ch == 0 {
                        state = State::Outside;
                    }
                }
                State::Comment => {
                    if ch == b'\n' || ch == b'\r' || ch == 0 {
                        state = State::Outside;
                    }
                }
            }
            i += 1;
        }

        if connect {
            match event_start {
                Some(start) => self.hold_overflow(&block[start..]),
                None => self.overflow.clear(),
            }
        } else if let Some(moves) = moves_start {
            if has_event {
                let text = &block[moves..];
                emit(build_game(&mut tags, text));
            }
        }
    }

    /// Scans whatever is left in the overflow buffer as a final span.
    pub fn finish(&mut self, emit: &mut dyn FnMut(RawGame)) {
        if self.overflow.is_empty() {
            return;
        }
        let tail = std::mem::take(&mut self.overflow);
        self.process_block(&tail, false, emit);
    }

    /// First half of the boundary protocol: withhold the partial game at
    /// the end of a block.
    fn hold_overflow(&mut self, tail: &[u8]) {
        self.overflow.clear();
        if tail.is_empty() || tail.len() >= OVERFLOW_SIZE {
            if !tail.is_empty() {
                self.dropped += 1;
            }
            return;
        }
        self.overflow.extend_from_slice(tail);
    }

    /// Second half of the boundary protocol: append the next block's
    /// prefix and scan the joined bytes as a standalone span.
    fn complete_overflow(&mut self, prefix: &[u8], emit: &mut dyn FnMut(RawGame)) {
        if self.overflow.is_empty() {
            return;
        }
        if prefix.len() + self.overflow.len() > OVERFLOW_SIZE {
            self.overflow.clear();
            self.dropped += 1;
            return;
        }
        let mut joined = std::mem::take(&mut self.overflow);
        joined.extend_from_slice(prefix);
        self.process_block(&joined, false, emit);
    }
}

fn build_game(tags: &mut HashMap<String, String>, move_text: &[u8]) -> RawGame {
    RawGame {
        tags: std::mem::take(tags),
        move_text: String::from_utf8_lossy(move_text).trim().to_string(),
    }
}

/// Streams a PGN file block by block, emitting tokenized games.
/// `end_of_block` runs after each primary block, giving the caller its
/// batch barrier.
pub fn read_pgn_file<P: AsRef<Path>>(
    path: P,
    emit: &mut dyn FnMut(RawGame),
    end_of_block: &mut dyn FnMut(),
) -> io::Result<ScanStats> {
    read_pgn_file_sized(path, BLOCK_SIZE, emit, end_of_block)
}

fn read_pgn_file_sized<P: AsRef<Path>>(
    path: P,
    block_size: usize,
    emit: &mut dyn FnMut(RawGame),
    end_of_block: &mut dyn FnMut(),
) -> io::Result<ScanStats> {
    let mut file = File::open(path)?;
    let mut scanner = PgnScanner::new();
    let mut stats = ScanStats::default();
    let mut buffer = vec![0u8; block_size];

    loop {
        let mut filled = 0usize;
        while filled < block_size {
            let n = file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }

        stats.blocks += 1;
        stats.bytes += filled as u64;
        scanner.process_block(&buffer[..filled], true, emit);
        end_of_block();

        if filled < block_size {
            break;
        }
    }

    scanner.finish(emit);
    stats.dropped = scanner.dropped();
    Ok(stats)
}
