use std::str::Chars;

use peekmore::{PeekMore, PeekMoreIterator};

use crate::error::{CompileError, ErrorKind};
use crate::token::{Kind, Token};

type ScanResult<T> = Result<T, CompileError>;

/// Converts a source buffer into a forward stream of tokens with position
/// metadata.
///
/// Tokens are produced lazily but retained, so the cursor can be saved
/// with [`Scanner::checkpoint`] and rewound with [`Scanner::restore`] while
/// the underlying character iterator stays forward-only. At end of input
/// the scanner returns `Eof` indefinitely.
pub struct Scanner<'a> {
    source: PeekMoreIterator<Chars<'a>>,
    tokens: Vec<Token>,
    cursor: usize,
    row: u32,
    col: u32,
}

/// An opaque save point for the scanner's token cursor.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint(usize);

impl<'a> Scanner<'a> {
    /// Creates a new scanner.
    pub fn new(source: &'a str) -> Scanner<'a> {
        Scanner {
            source: source.chars().peekmore(),
            tokens: Vec::new(),
            cursor: 0,
            row: 1,
            col: 1,
        }
    }

    /// Produces the next token and advances.
    pub fn next_token(&mut self) -> ScanResult<Token> {
        self.fill()?;

        let token = self.tokens[self.cursor.min(self.tokens.len() - 1)].clone();
        if self.cursor < self.tokens.len() {
            self.cursor += 1;
        }

        Ok(token)
    }

    /// Returns the next token without advancing.
    pub fn peek_token(&mut self) -> ScanResult<Token> {
        self.fill()?;

        Ok(self.tokens[self.cursor.min(self.tokens.len() - 1)].clone())
    }

    /// Saves the token cursor so the parser can speculate.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.cursor)
    }

    /// Rewinds the token cursor to a save point.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.cursor = checkpoint.0;
    }

    /// Makes sure the token at the cursor exists, scanning at most one
    /// fresh token. The final token in the buffer is always `Eof`.
    fn fill(&mut self) -> ScanResult<()> {
        if self.cursor < self.tokens.len() {
            return Ok(());
        }

        if matches!(self.tokens.last(), Some(token) if token.kind == Kind::Eof) {
            return Ok(());
        }

        let token = self.scan_token()?;
        self.tokens.push(token);

        Ok(())
    }

    /// Consumes the next character.
    fn advance(&mut self) -> Option<char> {
        let c = self.source.next()?;

        if c == '\n' {
            self.row += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }

        Some(c)
    }

    /// Returns the next character without consuming it.
    fn peek(&mut self) -> Option<char> {
        self.source.peek().copied()
    }

    /// Returns the character `n` places ahead without consuming anything.
    fn peek_nth(&mut self, n: usize) -> Option<char> {
        self.source.peek_nth(n).copied()
    }

    /// Consumes the next character if it matches.
    fn match_next(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            return true;
        }

        false
    }

    /// Skips whitespace and comments. Block comments may span lines.
    fn skip_trivia(&mut self) -> ScanResult<()> {
        loop {
            match self.peek() {
                Some(' ') | Some('\r') | Some('\t') | Some('\n') => {
                    self.advance();
                }
                Some('/') if self.peek_nth(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_nth(1) == Some('*') => {
                    let (row, col) = (self.row, self.col);
                    self.advance();
                    self.advance();

                    loop {
                        match self.peek() {
                            Some('*') if self.peek_nth(1) == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                            None => {
                                return Err(CompileError::new(ErrorKind::IllegalToken, row, col)
                                    .with_expected("*/"));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Scans one raw token.
    fn scan_token(&mut self) -> ScanResult<Token> {
        self.skip_trivia()?;

        let (row, col) = (self.row, self.col);
        let token = |kind: Kind, lexeme: String| Token::new(kind, lexeme, row, col);

        let Some(c) = self.peek() else {
            return Ok(Token::eof(self.row, self.col));
        };

        match c {
            '(' => { self.advance(); Ok(token(Kind::LeftParen, c.to_string())) }
            ')' => { self.advance(); Ok(token(Kind::RightParen, c.to_string())) }
            '{' => { self.advance(); Ok(token(Kind::LeftBrace, c.to_string())) }
            '}' => { self.advance(); Ok(token(Kind::RightBrace, c.to_string())) }
            '[' => { self.advance(); Ok(token(Kind::LeftBracket, c.to_string())) }
            ']' => { self.advance(); Ok(token(Kind::RightBracket, c.to_string())) }
            ',' => { self.advance(); Ok(token(Kind::Comma, c.to_string())) }
            ';' => { self.advance(); Ok(token(Kind::Semicolon, c.to_string())) }
            ':' => { self.advance(); Ok(token(Kind::Colon, c.to_string())) }
            '%' => { self.advance(); Ok(token(Kind::Percent, c.to_string())) }

            '.' => {
                if self.peek_nth(1) == Some('.') && self.peek_nth(2) == Some('.') {
                    self.advance();
                    self.advance();
                    self.advance();
                    Ok(token(Kind::Ellipsis, "...".to_string()))
                } else {
                    self.advance();
                    Ok(token(Kind::Dot, c.to_string()))
                }
            }

            '+' => {
                self.advance();
                if self.match_next('=') {
                    Ok(token(Kind::PlusEqual, "+=".to_string()))
                } else if self.match_next('+') {
                    Ok(token(Kind::Increment, "++".to_string()))
                } else {
                    Ok(token(Kind::Plus, c.to_string()))
                }
            }
            '-' => {
                self.advance();
                if self.match_next('=') {
                    Ok(token(Kind::MinusEqual, "-=".to_string()))
                } else if self.match_next('-') {
                    Ok(token(Kind::Decrement, "--".to_string()))
                } else {
                    Ok(token(Kind::Minus, c.to_string()))
                }
            }
            '*' => {
                self.advance();
                if self.match_next('=') {
                    Ok(token(Kind::StarEqual, "*=".to_string()))
                } else {
                    Ok(token(Kind::Star, c.to_string()))
                }
            }
            '/' => {
                self.advance();
                if self.match_next('=') {
                    Ok(token(Kind::SlashEqual, "/=".to_string()))
                } else {
                    Ok(token(Kind::Slash, c.to_string()))
                }
            }
            '!' => {
                self.advance();
                if self.match_next('=') {
                    Ok(token(Kind::BangEqual, "!=".to_string()))
                } else {
                    Ok(token(Kind::Bang, c.to_string()))
                }
            }
            '=' => {
                self.advance();
                if self.match_next('=') {
                    Ok(token(Kind::EqualEqual, "==".to_string()))
                } else {
                    Ok(token(Kind::Equal, c.to_string()))
                }
            }
            '<' => {
                self.advance();
                if self.match_next('=') {
                    Ok(token(Kind::LessEqual, "<=".to_string()))
                } else {
                    Ok(token(Kind::Less, c.to_string()))
                }
            }
            '>' => {
                self.advance();
                if self.match_next('=') {
                    Ok(token(Kind::GreaterEqual, ">=".to_string()))
                } else {
                    Ok(token(Kind::Greater, c.to_string()))
                }
            }
            '&' => {
                self.advance();
                if self.match_next('&') {
                    Ok(token(Kind::AndAnd, "&&".to_string()))
                } else {
                    Err(CompileError::new(ErrorKind::IllegalToken, row, col).with_expected("&&"))
                }
            }
            '|' => {
                self.advance();
                if self.match_next('|') {
                    Ok(token(Kind::OrOr, "||".to_string()))
                } else {
                    Err(CompileError::new(ErrorKind::IllegalToken, row, col).with_expected("||"))
                }
            }

            '"' => self.string(row, col),
            '\'' => self.char_literal(row, col),

            c if c.is_ascii_digit() => self.number(row, col),
            c if c.is_alphabetic() || c == '_' => Ok(self.identifier(row, col)),

            _ => {
                self.advance();
                Err(CompileError::new(ErrorKind::IllegalToken, row, col)
                    .with_expected(c.to_string()))
            }
        }
    }

    /// Decodes one escape sequence after a consumed backslash.
    fn escape(&mut self, row: u32, col: u32) -> ScanResult<char> {
        match self.advance() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('\\') => Ok('\\'),
            Some('\'') => Ok('\''),
            Some('"') => Ok('"'),
            _ => Err(CompileError::new(ErrorKind::IllegalToken, row, col).with_expected("escape")),
        }
    }

    /// Handles a string literal. The lexeme excludes the quotes.
    fn string(&mut self, row: u32, col: u32) -> ScanResult<Token> {
        self.advance();

        let mut value = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    value.push(self.escape(row, col)?);
                }
                Some(_) => {
                    value.push(self.advance().unwrap());
                }
                None => {
                    return Err(CompileError::new(ErrorKind::IllegalToken, row, col)
                        .with_expected("\""));
                }
            }
        }

        Ok(Token::new(Kind::String, value, row, col))
    }

    /// Handles a character literal: exactly one byte between the quotes.
    fn char_literal(&mut self, row: u32, col: u32) -> ScanResult<Token> {
        self.advance();

        let value = match self.peek() {
            Some('\\') => {
                self.advance();
                self.escape(row, col)?
            }
            Some('\'') | None => {
                return Err(CompileError::new(ErrorKind::IllegalToken, row, col)
                    .with_expected("character"));
            }
            Some(_) => self.advance().unwrap(),
        };

        if !self.match_next('\'') {
            return Err(CompileError::new(ErrorKind::IllegalToken, row, col).with_expected("'"));
        }

        Ok(Token::new(Kind::Char, value.to_string(), row, col))
    }

    /// Handles a number literal. A single `.` promotes to `float` and a
    /// trailing `d` promotes to `double`.
    fn number(&mut self, row: u32, col: u32) -> ScanResult<Token> {
        let mut value = String::new();
        let mut kind = Kind::Int;

        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            value.push(self.advance().unwrap());
        }

        if self.peek() == Some('.') && matches!(self.peek_nth(1), Some(c) if c.is_ascii_digit()) {
            kind = Kind::Float;
            value.push(self.advance().unwrap());

            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                value.push(self.advance().unwrap());
            }
        }

        if self.peek() == Some('d') {
            self.advance();
            kind = Kind::Double;
        }

        Ok(Token::new(kind, value, row, col))
    }

    /// Handles an identifier or a keyword.
    fn identifier(&mut self, row: u32, col: u32) -> Token {
        let mut value = String::new();

        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            value.push(self.advance().unwrap());
        }

        let kind = Kind::from_keyword(&value).unwrap_or(Kind::Ident);

        Token::new(kind, value, row, col)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn kinds(source: &str) -> Vec<Kind> {
        let mut scanner = Scanner::new(source);
        let mut kinds = Vec::new();

        loop {
            let token = scanner.next_token().unwrap();
            if token.kind == Kind::Eof {
                break;
            }
            kinds.push(token.kind);
        }

        kinds
    }

    #[test]
    fn scan_var_decl() {
        assert_eq!(
            kinds("var x = 1 + 2;"),
            vec![Kind::Var, Kind::Ident, Kind::Equal, Kind::Int, Kind::Plus, Kind::Int, Kind::Semicolon],
        );
    }

    #[test]
    fn scan_positions() {
        let mut scanner = Scanner::new("var x\n  y");

        let var = scanner.next_token().unwrap();
        assert_eq!((var.row, var.col), (1, 1));

        let x = scanner.next_token().unwrap();
        assert_eq!((x.row, x.col), (1, 5));

        let y = scanner.next_token().unwrap();
        assert_eq!((y.row, y.col), (2, 3));
    }

    #[test]
    fn scan_number_promotions() {
        assert_eq!(kinds("1 1.5 1.5d 3d"), vec![Kind::Int, Kind::Float, Kind::Double, Kind::Double]);
    }

    #[test]
    fn scan_comments() {
        assert_eq!(
            kinds("1 // line\n/* block\nstill */ 2"),
            vec![Kind::Int, Kind::Int],
        );
    }

    #[test]
    fn scan_string_escapes() {
        let mut scanner = Scanner::new(r#""a\tb\n""#);
        let token = scanner.next_token().unwrap();

        assert_eq!(token.kind, Kind::String);
        assert_eq!(token.lexeme, "a\tb\n");
    }

    #[test]
    fn scan_char_requires_one_byte() {
        let mut scanner = Scanner::new("'ab'");
        let error = scanner.next_token().unwrap_err();

        assert_eq!(error.kind, ErrorKind::IllegalToken);
    }

    #[test]
    fn scan_illegal_byte() {
        let mut scanner = Scanner::new("var #");
        scanner.next_token().unwrap();
        let error = scanner.next_token().unwrap_err();

        assert_eq!(error.kind, ErrorKind::IllegalToken);
        assert_eq!((error.row, error.col), (1, 5));
    }

    #[test]
    fn eof_repeats() {
        let mut scanner = Scanner::new("x");
        scanner.next_token().unwrap();

        assert_eq!(scanner.next_token().unwrap().kind, Kind::Eof);
        assert_eq!(scanner.next_token().unwrap().kind, Kind::Eof);
    }

    #[test]
    fn checkpoint_and_restore() {
        let mut scanner = Scanner::new("a b c");

        let checkpoint = scanner.checkpoint();
        assert_eq!(scanner.next_token().unwrap().lexeme, "a");
        assert_eq!(scanner.next_token().unwrap().lexeme, "b");

        scanner.restore(checkpoint);
        assert_eq!(scanner.next_token().unwrap().lexeme, "a");
    }

    #[test]
    fn keywords_and_type_names() {
        assert_eq!(
            kinds("func object extends int string true null"),
            vec![Kind::Func, Kind::Object, Kind::Extends, Kind::Int, Kind::String, Kind::Boolean, Kind::Null],
        );
    }
}
