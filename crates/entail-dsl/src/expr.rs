//! Boolean expression surface syntax for logic programs.
//!
//! Rule conditions, conclusions, axiom bodies and the query are stored as
//! plain strings on the wire (they arrive from untrusted proposers) and are
//! parsed into a typed [`Expr`] tree here.
//!
//! Supported surface forms:
//! - literals `true` / `false` (case-insensitive),
//! - atoms: `Name` (0-arity) or `Name(arg1, arg2)`,
//! - operator-style calls: `not(A)`, `and(A, B, ...)`, `or(A, B, ...)`,
//!   `implies(A, B)` (n-ary `and`/`or` fold left),
//! - infix connectives `not` / `and` / `or` / `implies` (also `->`),
//!   precedence `not > and > or > implies`, `implies` right-associative,
//! - parenthesized grouping.
//!
//! Parse failures carry the byte offset of the offending token so upstream
//! diagnostics can point into the original string.

use nom::{
    bytes::complete::{take_while, take_while1},
    combinator::recognize,
    sequence::tuple,
    IResult,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A parsed boolean expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    True,
    False,
    Atom {
        predicate: String,
        args: Vec<String>,
    },
    Not {
        inner: Box<Expr>,
    },
    And {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Or {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Implies {
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Borrowed view of one atom inside an [`Expr`] tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomRef<'a> {
    pub predicate: &'a str,
    pub args: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at byte {offset}: {message}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

const KEYWORDS: &[&str] = &["not", "and", "or", "implies", "true", "false"];

fn is_keyword(ident: &str) -> bool {
    KEYWORDS.iter().any(|k| ident.eq_ignore_ascii_case(k))
}

impl Expr {
    /// Parse an expression string. The whole input must be consumed.
    pub fn parse(input: &str) -> Result<Expr, ParseError> {
        let tokens = scan(input)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            eof_offset: input.len(),
        };
        let expr = parser.expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(ParseError::new(
                tok.offset,
                format!("unexpected trailing `{}`", tok.text()),
            )),
        }
    }

    pub fn not(inner: Expr) -> Expr {
        Expr::Not {
            inner: Box::new(inner),
        }
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn implies(left: Expr, right: Expr) -> Expr {
        Expr::Implies {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn atom(predicate: impl Into<String>, args: &[&str]) -> Expr {
        Expr::Atom {
            predicate: predicate.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// All atoms in the tree, left to right.
    pub fn atoms(&self) -> Vec<AtomRef<'_>> {
        let mut out = Vec::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms<'a>(&'a self, out: &mut Vec<AtomRef<'a>>) {
        match self {
            Expr::True | Expr::False => {}
            Expr::Atom { predicate, args } => out.push(AtomRef {
                predicate,
                args,
            }),
            Expr::Not { inner } => inner.collect_atoms(out),
            Expr::And { left, right }
            | Expr::Or { left, right }
            | Expr::Implies { left, right } => {
                left.collect_atoms(out);
                right.collect_atoms(out);
            }
        }
    }

    /// Canonical textual rendering. Compound connectives are always
    /// parenthesized, so `parse(render(e)) == e` for any tree.
    pub fn render(&self) -> String {
        match self {
            Expr::True => "true".to_string(),
            Expr::False => "false".to_string(),
            Expr::Atom { predicate, args } => render_atom(predicate, args),
            Expr::Not { inner } => format!("not {}", inner.render()),
            Expr::And { left, right } => format!("({} and {})", left.render(), right.render()),
            Expr::Or { left, right } => format!("({} or {})", left.render(), right.render()),
            Expr::Implies { left, right } => {
                format!("({} implies {})", left.render(), right.render())
            }
        }
    }
}

/// Render an atom in the canonical `Name(a,b)` form (no spaces).
pub fn render_atom(predicate: &str, args: &[String]) -> String {
    if args.is_empty() {
        predicate.to_string()
    } else {
        format!("{}({})", predicate, args.join(","))
    }
}

// ============================================================================
// Scanner
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tok<'a> {
    Ident(&'a str),
    LParen,
    RParen,
    Comma,
    Arrow,
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    tok: Tok<'a>,
    offset: usize,
}

impl Token<'_> {
    fn text(&self) -> &str {
        match self.tok {
            Tok::Ident(s) => s,
            Tok::LParen => "(",
            Tok::RParen => ")",
            Tok::Comma => ",",
            Tok::Arrow => "->",
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_ident(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        take_while1(is_ident_start),
        take_while(is_ident_continue),
    )))(input)
}

fn scan(input: &str) -> Result<Vec<Token<'_>>, ParseError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let tok = match c {
            '(' => {
                i += 1;
                Tok::LParen
            }
            ')' => {
                i += 1;
                Tok::RParen
            }
            ',' => {
                i += 1;
                Tok::Comma
            }
            '-' => {
                if bytes.get(i + 1) == Some(&b'>') {
                    i += 2;
                    Tok::Arrow
                } else {
                    return Err(ParseError::new(i, "expected `->`"));
                }
            }
            _ => match parse_ident(&input[i..]) {
                Ok((_, ident)) => {
                    i += ident.len();
                    Tok::Ident(ident)
                }
                Err(_) => {
                    return Err(ParseError::new(i, format!("unexpected character `{c}`")));
                }
            },
        };
        tokens.push(Token {
            tok,
            offset: match tok {
                Tok::Arrow => i - 2,
                Tok::Ident(s) => i - s.len(),
                _ => i - 1,
            },
        });
    }
    Ok(tokens)
}

// ============================================================================
// Recursive-descent parser
// ============================================================================

struct Parser<'a, 'b> {
    tokens: &'b [Token<'a>],
    pos: usize,
    eof_offset: usize,
}

impl<'a> Parser<'a, '_> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token<'a>> {
        let tok = self.tokens.get(self.pos).copied();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn err_here(&self, message: impl Into<String>) -> ParseError {
        let offset = self.peek().map(|t| t.offset).unwrap_or(self.eof_offset);
        ParseError::new(offset, message)
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token { tok: Tok::Ident(s), .. }) if s.eq_ignore_ascii_case(kw))
    }

    fn expect(&mut self, want: Tok<'_>, what: &str) -> Result<(), ParseError> {
        match self.peek() {
            Some(tok) if tok.tok == want => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.err_here(format!("expected `{what}`"))),
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.implies_expr()
    }

    fn implies_expr(&mut self) -> Result<Expr, ParseError> {
        let left = self.or_expr()?;
        let is_implies = self.peek_keyword("implies")
            || matches!(self.peek(), Some(Token { tok: Tok::Arrow, .. }));
        if is_implies {
            self.pos += 1;
            // Right-associative.
            let right = self.implies_expr()?;
            return Ok(Expr::implies(left, right));
        }
        Ok(left)
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::or(left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary_expr()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.unary_expr()?;
            left = Expr::and(left, right);
        }
        Ok(left)
    }

    fn unary_expr(&mut self) -> Result<Expr, ParseError> {
        if self.peek_keyword("not") {
            self.pos += 1;
            let inner = self.unary_expr()?;
            return Ok(Expr::not(inner));
        }
        self.primary_expr()
    }

    fn primary_expr(&mut self) -> Result<Expr, ParseError> {
        match self.peek().copied() {
            Some(Token { tok: Tok::LParen, .. }) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(Tok::RParen, ")")?;
                Ok(inner)
            }
            Some(Token { tok: Tok::Ident(ident), .. }) => {
                if ident.eq_ignore_ascii_case("true") {
                    self.pos += 1;
                    return Ok(Expr::True);
                }
                if ident.eq_ignore_ascii_case("false") {
                    self.pos += 1;
                    return Ok(Expr::False);
                }
                if ident.eq_ignore_ascii_case("and")
                    || ident.eq_ignore_ascii_case("or")
                    || ident.eq_ignore_ascii_case("implies")
                {
                    return self.connective_call(ident);
                }
                self.pos += 1;
                if matches!(self.peek(), Some(Token { tok: Tok::LParen, .. })) {
                    self.pos += 1;
                    let args = self.arg_list()?;
                    self.expect(Tok::RParen, ")")?;
                    return Ok(Expr::Atom {
                        predicate: ident.to_string(),
                        args,
                    });
                }
                Ok(Expr::Atom {
                    predicate: ident.to_string(),
                    args: Vec::new(),
                })
            }
            _ => Err(self.err_here("expected expression")),
        }
    }

    /// Operator-style call: `and(A, B, ...)`, `or(A, B, ...)`, `implies(A, B)`.
    fn connective_call(&mut self, keyword: &str) -> Result<Expr, ParseError> {
        let call_offset = self.peek().map(|t| t.offset).unwrap_or(self.eof_offset);
        self.pos += 1;
        self.expect(Tok::LParen, "(")?;
        let mut args = vec![self.expr()?];
        while matches!(self.peek(), Some(Token { tok: Tok::Comma, .. })) {
            self.pos += 1;
            args.push(self.expr()?);
        }
        self.expect(Tok::RParen, ")")?;

        if keyword.eq_ignore_ascii_case("implies") {
            if args.len() != 2 {
                return Err(ParseError::new(
                    call_offset,
                    format!("implies(..) takes exactly 2 arguments, got {}", args.len()),
                ));
            }
            let right = args.pop().and_then(|r| args.pop().map(|l| (l, r)));
            let (left, right) = right.ok_or_else(|| {
                ParseError::new(call_offset, "implies(..) takes exactly 2 arguments")
            })?;
            return Ok(Expr::implies(left, right));
        }

        // `and`/`or` accept one argument (pass-through) or fold left.
        let mut iter = args.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| ParseError::new(call_offset, "empty connective call"))?;
        let folded = iter.fold(first, |acc, next| {
            if keyword.eq_ignore_ascii_case("and") {
                Expr::and(acc, next)
            } else {
                Expr::or(acc, next)
            }
        });
        Ok(folded)
    }

    /// Comma-separated argument names inside an atom application.
    fn arg_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token { tok: Tok::RParen, .. })) {
            return Ok(args);
        }
        loop {
            match self.peek().copied() {
                Some(Token { tok: Tok::Ident(name), offset }) => {
                    if is_keyword(name) {
                        return Err(ParseError::new(
                            offset,
                            format!("`{name}` is reserved and cannot be an argument name"),
                        ));
                    }
                    self.pos += 1;
                    args.push(name.to_string());
                }
                _ => return Err(self.err_here("expected argument name")),
            }
            if matches!(self.peek(), Some(Token { tok: Tok::Comma, .. })) {
                self.pos += 1;
                continue;
            }
            return Ok(args);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
