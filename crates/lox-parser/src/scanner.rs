//! Logos-based scanner.
//!
//! The logos token enum is internal; scanning converts the raw matches into
//! [`Token`]s carrying a line number and a fresh [`TokenId`].

use crate::error::{Diagnostic, ParseError};
use crate::token::{Token, TokenId, TokenKind};
use logos::Logos;

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"//[^\n]*")]
enum RawToken {
    #[token("\n")]
    Newline,

    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("-")]
    Minus,
    #[token("+")]
    Plus,
    #[token(";")]
    Semicolon,
    #[token("/")]
    Slash,
    #[token("*")]
    Star,

    #[token("!")]
    Bang,
    #[token("!=")]
    BangEqual,
    #[token("=")]
    Equal,
    #[token("==")]
    EqualEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,

    #[token("and")]
    And,
    #[token("class")]
    Class,
    #[token("else")]
    Else,
    #[token("false")]
    False,
    #[token("fun")]
    Fun,
    #[token("for")]
    For,
    #[token("if")]
    If,
    #[token("nil")]
    Nil,
    #[token("or")]
    Or,
    #[token("print")]
    Print,
    #[token("return")]
    Return,
    #[token("super")]
    Super,
    #[token("this")]
    This,
    #[token("true")]
    True,
    #[token("var")]
    Var,
    #[token("while")]
    While,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Identifier,

    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,

    // Strings may span lines; line counting re-scans the lexeme.
    #[regex(r#""[^"]*""#)]
    Str,

    #[regex(r#""[^"]*"#)]
    UnterminatedStr,
}

pub struct Scanner<'src> {
    source: &'src str,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Scanner { source }
    }

    /// Scan the whole source, returning tokens ending in `Eof`.
    ///
    /// Token ids start at 1; [`TokenId::ENTRY`] stays reserved for the
    /// compiler's synthesized top-level function.
    pub fn scan(self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        let mut line: u32 = 1;
        let mut next_id: u32 = 1;
        let mut alloc = |kind, lexeme: &str, line| {
            let token = Token::new(kind, lexeme, line, TokenId(next_id));
            next_id += 1;
            token
        };

        let mut lexer = RawToken::lexer(self.source);
        while let Some(raw) = lexer.next() {
            let lexeme = lexer.slice();
            match raw {
                Ok(RawToken::Newline) => line += 1,
                Ok(RawToken::UnterminatedStr) => {
                    errors.push(Diagnostic::at_end(line, "Unterminated string."));
                    line += count_newlines(lexeme);
                }
                Ok(raw) => {
                    let start = line;
                    line += count_newlines(lexeme);
                    tokens.push(alloc(kind_of(raw), lexeme, start));
                }
                Err(()) => {
                    errors.push(Diagnostic::new(line, lexeme, "Unexpected character."));
                }
            }
        }
        tokens.push(alloc(TokenKind::Eof, "", line));

        if errors.is_empty() {
            Ok(tokens)
        } else {
            Err(ParseError(errors))
        }
    }
}

fn count_newlines(lexeme: &str) -> u32 {
    lexeme.bytes().filter(|&b| b == b'\n').count() as u32
}

fn kind_of(raw: RawToken) -> TokenKind {
    match raw {
        RawToken::LeftParen => TokenKind::LeftParen,
        RawToken::RightParen => TokenKind::RightParen,
        RawToken::LeftBrace => TokenKind::LeftBrace,
        RawToken::RightBrace => TokenKind::RightBrace,
        RawToken::Comma => TokenKind::Comma,
        RawToken::Dot => TokenKind::Dot,
        RawToken::Minus => TokenKind::Minus,
        RawToken::Plus => TokenKind::Plus,
        RawToken::Semicolon => TokenKind::Semicolon,
        RawToken::Slash => TokenKind::Slash,
        RawToken::Star => TokenKind::Star,
        RawToken::Bang => TokenKind::Bang,
        RawToken::BangEqual => TokenKind::BangEqual,
        RawToken::Equal => TokenKind::Equal,
        RawToken::EqualEqual => TokenKind::EqualEqual,
        RawToken::Greater => TokenKind::Greater,
        RawToken::GreaterEqual => TokenKind::GreaterEqual,
        RawToken::Less => TokenKind::Less,
        RawToken::LessEqual => TokenKind::LessEqual,
        RawToken::And => TokenKind::And,
        RawToken::Class => TokenKind::Class,
        RawToken::Else => TokenKind::Else,
        RawToken::False => TokenKind::False,
        RawToken::Fun => TokenKind::Fun,
        RawToken::For => TokenKind::For,
        RawToken::If => TokenKind::If,
        RawToken::Nil => TokenKind::Nil,
        RawToken::Or => TokenKind::Or,
        RawToken::Print => TokenKind::Print,
        RawToken::Return => TokenKind::Return,
        RawToken::Super => TokenKind::Super,
        RawToken::This => TokenKind::This,
        RawToken::True => TokenKind::True,
        RawToken::Var => TokenKind::Var,
        RawToken::While => TokenKind::While,
        RawToken::Identifier => TokenKind::Identifier,
        RawToken::Number => TokenKind::Number,
        RawToken::Str => TokenKind::Str,
        RawToken::Newline | RawToken::UnterminatedStr => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source).scan().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scans_declaration() {
        assert_eq!(
            kinds("var x = 1;"),
            vec![
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Equal,
                TokenKind::Number,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tracks_lines() {
        let tokens = Scanner::new("var a;\nvar b;").scan().unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[3].line, 2);
    }

    #[test]
    fn token_ids_are_unique() {
        let tokens = Scanner::new("a a a").scan().unwrap();
        assert_ne!(tokens[0].id, tokens[1].id);
        assert_ne!(tokens[1].id, tokens[2].id);
    }

    #[test]
    fn keywords_are_not_identifiers() {
        assert_eq!(kinds("class")[0], TokenKind::Class);
        assert_eq!(kinds("classy")[0], TokenKind::Identifier);
    }

    #[test]
    fn reports_unterminated_string() {
        let err = Scanner::new("\"oops").scan().unwrap_err();
        assert_eq!(err.0[0].message, "Unterminated string.");
    }
}
