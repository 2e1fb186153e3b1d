use std::fmt::{self, Display};

use thiserror::Error;

use crate::token::Token;

/// Closed set of failure kinds raised by the scanner, parser, analyzer and
/// executor. The message a user sees is derived from the kind plus an
/// optional expected-token name.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    #[error("illegal token")]
    IllegalToken,
    #[error("expected identifier")]
    ExpectedIdentifier,
    #[error("expected operator")]
    ExpectedOperator,
    #[error("expected semicolon")]
    ExpectedSemicolon,
    #[error("expected brace")]
    ExpectedBrace,
    #[error("expected parenthesis")]
    ExpectedParen,
    #[error("expected expression")]
    ExpectedExpression,
    #[error("expected type")]
    ExpectedType,
    #[error("expected string literal")]
    ExpectedString,
    #[error("invalid import")]
    InvalidImport,
    #[error("invalid assignment target")]
    InvalidAssignment,
    #[error("invalid cast")]
    InvalidCast,
    #[error("not implemented")]
    NotImplemented,
    #[error("undefined")]
    Undefined,
    #[error("duplicate member")]
    DuplicateMember,
    #[error("type mismatch")]
    TypeMismatch,
    #[error("internal error")]
    Internal,
}

/// The pipeline phase a diagnostic was raised in. Used for the printed
/// prefix and for the process exit code.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Phase {
    Parser,
    Semantic,
    Runtime,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phase::Parser => write!(f, "Parser Error"),
            Phase::Semantic => write!(f, "Semantic Error"),
            Phase::Runtime => write!(f, "Runtime Error"),
        }
    }
}

/// A position-tagged failure. Raised deep inside the recursive descent and
/// the validators, propagated with `?`, and caught once at the script
/// driver, which formats and records it.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub expected: Option<String>,
    pub row: u32,
    pub col: u32,
}

impl CompileError {
    /// Creates a new error at the given position.
    pub fn new(kind: ErrorKind, row: u32, col: u32) -> CompileError {
        CompileError { kind, expected: None, row, col }
    }

    /// Creates a new error at a token's position.
    pub fn at(kind: ErrorKind, token: &Token) -> CompileError {
        CompileError::new(kind, token.row, token.col)
    }

    /// Attaches the name of the token the parser was looking for.
    pub fn with_expected(mut self, expected: impl Into<String>) -> CompileError {
        self.expected = Some(expected.into());
        self
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.expected {
            Some(expected) => write!(f, "{} '{}'", self.kind, expected),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn message_from_kind() {
        let error = CompileError::new(ErrorKind::Undefined, 1, 9);
        assert_eq!(error.to_string(), "undefined");
        assert_eq!(error.row, 1);
        assert_eq!(error.col, 9);
    }

    #[test]
    fn message_with_expected() {
        let error = CompileError::new(ErrorKind::ExpectedBrace, 3, 1).with_expected("}");
        assert_eq!(error.to_string(), "expected brace '}'");
    }
}
