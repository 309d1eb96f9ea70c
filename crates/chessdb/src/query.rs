//! The position-query language.
//!
//! Grammar:
//!
//! ```text
//! query      = condition { ("and"|"or") condition }
//! condition  = expression { comparator expression }
//! expression = term       { ("+"|"-") term }
//! term       = factor     { ("*"|"/") factor }
//! factor     = number | "(" expression ")" | piece
//! piece      = pieceName [ "[" squareSpec { "," squareSpec } "]" ]
//! squareSpec = square | square "-" square | file | rank
//!            | file "-" file | rank "-" rank
//! ```
//!
//! Piece names are the FEN letters (uppercase white), or the words
//! `white`/`black` for all pieces of a side; a square spec may also be
//! glued directly onto the name (`kb7`, `white6`). Operator chains fold
//! left-associatively and division by zero evaluates to 0; truth is
//! nonzero.

use chessdb_core::{Color, Piece, Square};
use chessdb_engine::Snapshot;
use thiserror::Error;

/// Query parse errors, one per failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("no input")]
    NoInput,
    #[error("wrong lexical")]
    WrongLexical,
    #[error("missing condition")]
    MissingCondition,
    #[error("missing comparator")]
    MissingComparator,
    #[error("missing term")]
    MissingTerm,
    #[error("missing factor")]
    MissingFactor,
    #[error("missing close bracket")]
    MissingCloseBracket,
    #[error("invalid")]
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Number(i64),
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Cmp(CmpOp),
    Comma,
    Open,
    Close,
    BracketOpen,
    BracketClose,
}

/// A parsed query tree node.
#[derive(Debug, Clone)]
enum Node {
    Number(i64),
    Piece {
        side: Color,
        piece: Option<Piece>,
        mask: u64,
    },
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Arith(char, Box<Node>, Box<Node>),
    Cmp(CmpOp, Box<Node>, Box<Node>),
}

/// A compiled position query, shared read-only across workers.
#[derive(Debug, Clone)]
pub struct Query {
    root: Node,
}

impl Query {
    /// Parses a query string.
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let tokens = lex(text)?;
        if tokens.is_empty() {
            return Err(QueryError::NoInput);
        }
        let mut pos = 0usize;
        let root = parse_query(&tokens, &mut pos)?;
        if pos != tokens.len() {
            return Err(QueryError::Invalid);
        }
        Ok(Query { root })
    }

    /// Evaluates the query over a position snapshot.
    pub fn evaluate(&self, snapshot: &Snapshot) -> i64 {
        eval(&self.root, snapshot)
    }

    /// True when the query holds for the snapshot.
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        self.evaluate(snapshot) != 0
    }
}

/// Removes `//` comments, line by line.
pub fn strip_line_comments(text: &str) -> String {
    text.lines()
        .map(|line| match line.find("//") {
            Some(p) => &line[..p],
            None => line,
        })
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

fn lex(text: &str) -> Result<Vec<Token>, QueryError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(match word.as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                _ => Token::Word(word),
            });
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i < chars.len() && chars[i].is_ascii_alphabetic() {
                return Err(QueryError::WrongLexical);
            }
            let number: String = chars[start..i].iter().collect();
            tokens.push(Token::Number(
                number.parse().map_err(|_| QueryError::WrongLexical)?,
            ));
            continue;
        }
        if matches!(c, '=' | '<' | '>' | '!') {
            let start = i;
            while i < chars.len() && matches!(chars[i], '=' | '<' | '>' | '!') {
                i += 1;
            }
            let op: String = chars[start..i].iter().collect();
            let cmp = match op.as_str() {
                "=" | "==" => CmpOp::Eq,
                "!=" | "<>" => CmpOp::Ne,
                "<" => CmpOp::Lt,
                "<=" => CmpOp::Le,
                ">" => CmpOp::Gt,
                ">=" => CmpOp::Ge,
                _ => return Err(QueryError::WrongLexical),
            };
            tokens.push(Token::Cmp(cmp));
            continue;
        }
        match c {
            '+' => tokens.push(Token::Add),
            '-' => tokens.push(Token::Sub),
            '*' => tokens.push(Token::Mul),
            '/' => tokens.push(Token::Div),
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            '[' => tokens.push(Token::BracketOpen),
            ']' => tokens.push(Token::BracketClose),
            ',' => tokens.push(Token::Comma),
            c if c.is_whitespace() => {}
            _ => return Err(QueryError::WrongLexical),
        }
        i += 1;
    }
    Ok(tokens)
}

fn parse_query(tokens: &[Token], pos: &mut usize) -> Result<Node, QueryError> {
    let mut node = parse_condition(tokens, pos)?;
    while let Some(op) = tokens.get(*pos) {
        let and = match op {
            Token::And => true,
            Token::Or => false,
            _ => break,
        };
        *pos += 1;
        if *pos >= tokens.len() {
            return Err(QueryError::MissingCondition);
        }
        let rhs = parse_condition(tokens, pos)?;
        node = if and {
            Node::And(Box::new(node), Box::new(rhs))
        } else {
            Node::Or(Box::new(node), Box::new(rhs))
        };
    }
    Ok(node)
}

fn parse_condition(tokens: &[Token], pos: &mut usize) -> Result<Node, QueryError> {
    let mut node = parse_expression(tokens, pos)?;
    while let Some(&Token::Cmp(op)) = tokens.get(*pos) {
        *pos += 1;
        if *pos >= tokens.len() {
            return Err(QueryError::MissingComparator);
        }
        let rhs = parse_expression(tokens, pos)?;
        node = Node::Cmp(op, Box::new(node), Box::new(rhs));
    }
    Ok(node)
}

fn parse_expression(tokens: &[Token], pos: &mut usize) -> Result<Node, QueryError> {
    let mut node = parse_term(tokens, pos)?;
    while let Some(op) = tokens.get(*pos) {
        let sign = match op {
            Token::Add => '+',
            Token::Sub => '-',
            _ => break,
        };
        *pos += 1;
        if *pos >= tokens.len() {
            return Err(QueryError::MissingTerm);
        }
        let rhs = parse_term(tokens, pos)?;
        node = Node::Arith(sign, Box::new(node), Box::new(rhs));
    }
    Ok(node)
}

fn parse_term(tokens: &[Token], pos: &mut usize) -> Result<Node, QueryError> {
    let mut node = parse_factor(tokens, pos)?;
    while let Some(op) = tokens.get(*pos) {
        let sign = match op {
            Token::Mul => '*',
            Token::Div => '/',
            _ => break,
        };
        *pos += 1;
        if *pos >= tokens.len() {
            return Err(QueryError::MissingFactor);
        }
        let rhs = parse_factor(tokens, pos)?;
        node = Node::Arith(sign, Box::new(node), Box::new(rhs));
    }
    Ok(node)
}

fn parse_factor(tokens: &[Token], pos: &mut usize) -> Result<Node, QueryError> {
    match tokens.get(*pos) {
        Some(&Token::Number(n)) => {
            *pos += 1;
            Ok(Node::Number(n))
        }
        Some(Token::Open) => {
            *pos += 1;
            let node = parse_expression(tokens, pos)?;
            match tokens.get(*pos) {
                Some(Token::Close) => {
                    *pos += 1;
                    Ok(node)
                }
                _ => Err(QueryError::MissingCloseBracket),
            }
        }
        Some(Token::Word(_)) => parse_piece(tokens, pos),
        _ => Err(QueryError::MissingFactor),
    }
}

fn parse_piece(tokens: &[Token], pos: &mut usize) -> Result<Node, QueryError> {
    let Some(Token::Word(word)) = tokens.get(*pos) else {
        return Err(QueryError::MissingFactor);
    };
    *pos += 1;

    let (side, piece, rest) = piece_name(word)?;
    let mut mask = 0u64;
    let mut has_mask = false;
    if !rest.is_empty() {
        mask |= square_spec(rest)?;
        has_mask = true;
    }

    if let Some(Token::BracketOpen) = tokens.get(*pos) {
        *pos += 1;
        loop {
            match tokens.get(*pos) {
                Some(Token::Comma) => {
                    *pos += 1;
                }
                Some(Token::BracketClose) => {
                    *pos += 1;
                    break;
                }
                Some(first @ (Token::Word(_) | Token::Number(_))) => {
                    *pos += 1;
                    if tokens.get(*pos) == Some(&Token::Sub) {
                        *pos += 1;
                        let second = tokens.get(*pos).ok_or(QueryError::MissingCloseBracket)?;
                        *pos += 1;
                        mask |= square_range(&spec_text(first), &spec_text(second))?;
                    } else {
                        mask |= square_spec(&spec_text(first))?;
                    }
                    has_mask = true;
                }
                _ => return Err(QueryError::MissingCloseBracket),
            }
        }
    }

    Ok(Node::Piece {
        side,
        piece,
        mask: if has_mask { mask } else { u64::MAX },
    })
}

fn spec_text(token: &Token) -> String {
    match token {
        Token::Word(w) => w.clone(),
        Token::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Splits a piece token into side, optional type filter, and any glued
/// square spec.
fn piece_name(word: &str) -> Result<(Color, Option<Piece>, &str), QueryError> {
    if let Some(rest) = word.strip_prefix("white") {
        return Ok((Color::White, None, rest));
    }
    if let Some(rest) = word.strip_prefix("black") {
        return Ok((Color::Black, None, rest));
    }
    let first = word.chars().next().ok_or(QueryError::Invalid)?;
    if first == 'w' {
        return Ok((Color::White, None, &word[1..]));
    }
    let side = if first.is_ascii_uppercase() {
        Color::White
    } else {
        Color::Black
    };
    let piece = Piece::from_char(first).ok_or(QueryError::Invalid)?;
    Ok((side, Some(piece), &word[1..]))
}

/// A single square specifier: a coordinate, a file letter, or a rank
/// digit.
fn square_spec(spec: &str) -> Result<u64, QueryError> {
    if spec.len() > 2 {
        return Err(QueryError::WrongLexical);
    }
    if let Some(sq) = Square::from_algebraic(spec) {
        return Ok(sq.bitboard());
    }
    let mut chars = spec.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_lowercase() => {
            let col = c as u32 - 'a' as u32;
            if col >= 8 {
                return Err(QueryError::WrongLexical);
            }
            Ok(file_mask(col as u8))
        }
        (Some(c), None) if ('1'..='8').contains(&c) => {
            let row = 8 - c.to_digit(10).expect("digit checked") as u8;
            Ok(rank_mask(row))
        }
        _ => Err(QueryError::WrongLexical),
    }
}

/// A `from-to` range of coordinates, files, or ranks.
fn square_range(from: &str, to: &str) -> Result<u64, QueryError> {
    if from.len() == 2 && to.len() == 2 {
        let a = Square::from_algebraic(from).ok_or(QueryError::WrongLexical)?;
        let b = Square::from_algebraic(to).ok_or(QueryError::WrongLexical)?;
        if a == b {
            return Err(QueryError::WrongLexical);
        }
        let (lo, hi) = if a.index() < b.index() {
            (a.index(), b.index())
        } else {
            (b.index(), a.index())
        };
        let mut mask = 0u64;
        for i in lo..=hi {
            mask |= Square::from_index(i).expect("range checked").bitboard();
        }
        return Ok(mask);
    }

    if from.len() == 1 && to.len() == 1 {
        let (f, t) = (
            from.chars().next().expect("checked"),
            to.chars().next().expect("checked"),
        );
        if f.is_ascii_lowercase() && t.is_ascii_lowercase() {
            let (lo, hi) = if f <= t { (f, t) } else { (t, f) };
            let mut mask = 0u64;
            for c in lo..=hi {
                let col = c as u32 - 'a' as u32;
                if col >= 8 {
                    return Err(QueryError::WrongLexical);
                }
                mask |= file_mask(col as u8);
            }
            return Ok(mask);
        }
        if f.is_ascii_digit() && t.is_ascii_digit() {
            let (lo, hi) = if f <= t { (f, t) } else { (t, f) };
            let mut mask = 0u64;
            for c in lo..=hi {
                let d = c.to_digit(10).expect("digit");
                if !(1..=8).contains(&d) {
                    return Err(QueryError::WrongLexical);
                }
                mask |= rank_mask(8 - d as u8);
            }
            return Ok(mask);
        }
    }

    Err(QueryError::WrongLexical)
}

fn file_mask(col: u8) -> u64 {
    let mut mask = 0u64;
    for row in 0..8 {
        mask |= Square::from_index(row * 8 + col).expect("in range").bitboard();
    }
    mask
}

fn rank_mask(row: u8) -> u64 {
    let mut mask = 0u64;
    for col in 0..8 {
        mask |= Square::from_index(row * 8 + col).expect("in range").bitboard();
    }
    mask
}

fn eval(node: &Node, snapshot: &Snapshot) -> i64 {
    match node {
        Node::Number(n) => *n,
        Node::Piece { side, piece, mask } => {
            let mut bits = snapshot.side_bits(*side);
            if let Some(piece) = piece {
                bits &= snapshot.piece_bits(*piece);
            }
            (bits & mask).count_ones() as i64
        }
        Node::And(l, r) => i64::from(eval(l, snapshot) != 0 && eval(r, snapshot) != 0),
        Node::Or(l, r) => i64::from(eval(l, snapshot) != 0 || eval(r, snapshot) != 0),
        Node::Arith(op, l, r) => {
            let (l, r) = (eval(l, snapshot), eval(r, snapshot));
            match op {
                '+' => l.wrapping_add(r),
                '-' => l.wrapping_sub(r),
                '*' => l.wrapping_mul(r),
                _ => {
                    if r != 0 {
                        l / r
                    } else {
                        0
                    }
                }
            }
        }
        Node::Cmp(op, l, r) => {
            let (l, r) = (eval(l, snapshot), eval(r, snapshot));
            i64::from(match op {
                CmpOp::Eq => l == r,
                CmpOp::Ne => l != r,
                CmpOp::Lt => l < r,
                CmpOp::Le => l <= r,
                CmpOp::Gt => l > r,
                CmpOp::Ge => l >= r,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chessdb_engine::Board;

    fn snapshot(fen: &str) -> Snapshot {
        Board::from_fen(fen).unwrap().snapshot()
    }

    #[test]
    fn three_white_queens() {
        let snap = snapshot("3qqq2/8/8/8/8/8/8/3QQQK1 w - - 0 1");
        let query = Query::parse("Q = 3").unwrap();
        assert_eq!(query.evaluate(&snap), 1);
        assert!(query.matches(&snap));
        assert!(!Query::parse("Q = 2").unwrap().matches(&snap));
    }

    #[test]
    fn masked_pawns_and_king() {
        let snap = snapshot("8/1k6/8/4P3/3P1PP1/8/8/7K w - - 0 1");
        let query = Query::parse("P[d4,e5,f4,g4] = 4 and kb7").unwrap();
        assert!(query.matches(&snap));
        let query = Query::parse("P[d4, e5, f4, g4] = 4 and kc7").unwrap();
        assert!(!query.matches(&snap));
    }

    #[test]
    fn file_ranges_count_both_sides() {
        let snap = snapshot("8/2b5/8/8/3B4/8/8/K6k w - - 0 1");
        let query = Query::parse("B[c-f] + b[c-f] == 2").unwrap();
        assert!(query.matches(&snap));
    }

    #[test]
    fn side_terms_with_glued_rank() {
        let snap = snapshot("8/8/PPPPP3/8/8/8/8/K6k w - - 0 1");
        let query = Query::parse("white6 = 5").unwrap();
        assert!(query.matches(&snap));
        // All white men, no rank filter: five pawns plus the king.
        assert_eq!(Query::parse("white").unwrap().evaluate(&snap), 6);
    }

    #[test]
    fn black_and_bishop_names_disambiguate() {
        let snap = snapshot("8/2b5/8/8/8/8/8/K6k w - - 0 1");
        assert_eq!(Query::parse("b").unwrap().evaluate(&snap), 1, "bishop");
        assert_eq!(Query::parse("black").unwrap().evaluate(&snap), 2);
        assert_eq!(Query::parse("w").unwrap().evaluate(&snap), 1);
    }

    #[test]
    fn arithmetic_is_left_associative() {
        let snap = snapshot("8/8/8/8/8/8/8/K6k w - - 0 1");
        assert_eq!(Query::parse("7 - 3 - 2").unwrap().evaluate(&snap), 2);
        assert_eq!(Query::parse("2 + 3 * 4").unwrap().evaluate(&snap), 14);
        assert_eq!(Query::parse("(2 + 3) * 4").unwrap().evaluate(&snap), 20);
        assert_eq!(Query::parse("5 / 0").unwrap().evaluate(&snap), 0);
    }

    #[test]
    fn comparator_spellings() {
        let snap = snapshot("8/8/8/8/8/8/8/K6k w - - 0 1");
        for q in ["1 = 1", "1 == 1", "1 <= 2", "2 >= 1", "1 < 2", "2 > 1", "1 != 2", "1 <> 2"] {
            assert!(Query::parse(q).unwrap().matches(&snap), "{q}");
        }
    }

    #[test]
    fn square_range_specs() {
        let snap = snapshot("8/8/8/8/rr6/8/8/K6k w - - 0 1");
        assert!(Query::parse("r[a4-b4] = 2").unwrap().matches(&snap));
        assert!(Query::parse("r[4] = 2").unwrap().matches(&snap));
        assert!(Query::parse("r[a-b] = 2").unwrap().matches(&snap));
        assert!(Query::parse("r[1-8] = 2").unwrap().matches(&snap));
        assert!(!Query::parse("r[5-8] >= 1").unwrap().matches(&snap));
    }

    #[test]
    fn error_classes() {
        fn error_of(q: &str) -> QueryError {
            Query::parse(q).expect_err(q)
        }
        assert_eq!(error_of(""), QueryError::NoInput);
        assert_eq!(error_of("   "), QueryError::NoInput);
        assert_eq!(error_of("Q = 3 and"), QueryError::MissingCondition);
        assert_eq!(error_of("Q ="), QueryError::MissingComparator);
        assert_eq!(error_of("Q +"), QueryError::MissingTerm);
        assert_eq!(error_of("Q *"), QueryError::MissingFactor);
        assert_eq!(error_of("(Q + 3"), QueryError::MissingCloseBracket);
        assert_eq!(error_of("3k"), QueryError::WrongLexical);
        assert_eq!(error_of("==="), QueryError::WrongLexical);
        assert_eq!(error_of("Q 3"), QueryError::Invalid);
    }

    #[test]
    fn strip_comments() {
        assert_eq!(
            strip_line_comments("Q = 3 // three queens\nand kb7 // corner"),
            "Q = 3  and kb7"
        );
        assert_eq!(strip_line_comments("// only comment"), "");
    }
}
