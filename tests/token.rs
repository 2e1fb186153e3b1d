extern crate cobble_lang;

use cobble_lang::token::{Kind, Token};

#[test]
fn create_token() {
    let token = Token::new(Kind::LeftParen, "(".to_string(), 1, 3);

    assert_eq!(token.kind, Kind::LeftParen);
    assert_eq!(token.lexeme, "(");
    assert_eq!(token.row, 1);
    assert_eq!(token.col, 3);
}

#[test]
fn create_token_from_str() {
    let token = Token::from("init");

    assert_eq!(token.kind, Kind::Ident);
    assert_eq!(token.lexeme, "init");
    assert_eq!((token.row, token.col), (1, 1));
}

#[test]
fn display_token() {
    let token = Token::new(Kind::LeftParen, "(".to_string(), 1, 3);

    assert_eq!(format!("{token}"), "LeftParen ( @ 1:3");
}

#[test]
fn keyword_table_covers_types() {
    assert_eq!(Kind::from_keyword("var"), Some(Kind::Var));
    assert_eq!(Kind::from_keyword("int"), Some(Kind::Int));
    assert_eq!(Kind::from_keyword("boolean"), Some(Kind::Boolean));
    assert_eq!(Kind::from_keyword("true"), Some(Kind::Boolean));
    assert_eq!(Kind::from_keyword("widget"), None);
}

#[test]
fn numeric_kinds_include_char() {
    assert!(Kind::Char.is_numeric());
    assert!(Kind::Int.is_numeric());
    assert!(!Kind::String.is_numeric());
    assert!(!Kind::Boolean.is_numeric());
}

#[test]
fn eof_token_is_empty() {
    let token = Token::eof(7, 1);

    assert_eq!(token.kind, Kind::Eof);
    assert!(token.lexeme.is_empty());
}
