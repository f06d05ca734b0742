//! Token definitions for the Garnet lexer.

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;

use crate::span::Span;

/// All token types in Garnet.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    CharLiteral(char),

    // Identifiers and keywords
    Identifier(String),

    // Keywords
    And,
    Assert,
    Break,
    By,
    Class,
    Else,
    End,
    False,
    Final,
    For,
    Func,
    If,
    In,
    InstanceOf,
    Null,
    Or,
    Print,
    PrintLn,
    Return,
    This,
    True,
    Var,
    While,

    // Type identifiers (casts and `instanceof`)
    IntIdent,
    FloatIdent,
    BoolIdent,
    StringIdent,
    CharIdent,

    // Symbols
    Colon,
    Semicolon,
    LeftParen,
    RightParen,
    Comma,
    Dot,
    DotDot,
    Minus,
    Mod,
    Plus,
    Slash,
    Star,
    StarStar,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    LessThan,
    GreaterThan,
    LessEqual,
    GreaterEqual,

    // Special
    Error(String),
    Eof,
}

lazy_static! {
    static ref KEYWORDS: HashMap<&'static str, TokenKind> = {
        let mut map = HashMap::new();
        map.insert("and", TokenKind::And);
        map.insert("assert", TokenKind::Assert);
        map.insert("break", TokenKind::Break);
        map.insert("by", TokenKind::By);
        map.insert("class", TokenKind::Class);
        map.insert("else", TokenKind::Else);
        map.insert("end", TokenKind::End);
        map.insert("false", TokenKind::False);
        map.insert("final", TokenKind::Final);
        map.insert("for", TokenKind::For);
        map.insert("func", TokenKind::Func);
        map.insert("if", TokenKind::If);
        map.insert("in", TokenKind::In);
        map.insert("instanceof", TokenKind::InstanceOf);
        map.insert("null", TokenKind::Null);
        map.insert("or", TokenKind::Or);
        map.insert("print", TokenKind::Print);
        map.insert("println", TokenKind::PrintLn);
        map.insert("return", TokenKind::Return);
        map.insert("this", TokenKind::This);
        map.insert("true", TokenKind::True);
        map.insert("var", TokenKind::Var);
        map.insert("while", TokenKind::While);
        map.insert("Int", TokenKind::IntIdent);
        map.insert("Float", TokenKind::FloatIdent);
        map.insert("Bool", TokenKind::BoolIdent);
        map.insert("String", TokenKind::StringIdent);
        map.insert("Char", TokenKind::CharIdent);
        map
    };
}

impl TokenKind {
    /// Check if an identifier is a keyword and return the corresponding kind.
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        KEYWORDS.get(ident).cloned()
    }

    /// True for the type identifiers usable in casts and `instanceof`.
    pub fn is_type_ident(&self) -> bool {
        matches!(
            self,
            TokenKind::IntIdent
                | TokenKind::FloatIdent
                | TokenKind::BoolIdent
                | TokenKind::StringIdent
                | TokenKind::CharIdent
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::IntLiteral(n) => write!(f, "{}", n),
            TokenKind::FloatLiteral(n) => write!(f, "{}", n),
            TokenKind::StringLiteral(s) => write!(f, "\"{}\"", s),
            TokenKind::CharLiteral(c) => write!(f, "'{}'", c),
            TokenKind::Identifier(s) => write!(f, "{}", s),
            TokenKind::And => write!(f, "and"),
            TokenKind::Assert => write!(f, "assert"),
            TokenKind::Break => write!(f, "break"),
            TokenKind::By => write!(f, "by"),
            TokenKind::Class => write!(f, "class"),
            TokenKind::Else => write!(f, "else"),
            TokenKind::End => write!(f, "end"),
            TokenKind::False => write!(f, "false"),
            TokenKind::Final => write!(f, "final"),
            TokenKind::For => write!(f, "for"),
            TokenKind::Func => write!(f, "func"),
            TokenKind::If => write!(f, "if"),
            TokenKind::In => write!(f, "in"),
            TokenKind::InstanceOf => write!(f, "instanceof"),
            TokenKind::Null => write!(f, "null"),
            TokenKind::Or => write!(f, "or"),
            TokenKind::Print => write!(f, "print"),
            TokenKind::PrintLn => write!(f, "println"),
            TokenKind::Return => write!(f, "return"),
            TokenKind::This => write!(f, "this"),
            TokenKind::True => write!(f, "true"),
            TokenKind::Var => write!(f, "var"),
            TokenKind::While => write!(f, "while"),
            TokenKind::IntIdent => write!(f, "Int"),
            TokenKind::FloatIdent => write!(f, "Float"),
            TokenKind::BoolIdent => write!(f, "Bool"),
            TokenKind::StringIdent => write!(f, "String"),
            TokenKind::CharIdent => write!(f, "Char"),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Dot => write!(f, "."),
            TokenKind::DotDot => write!(f, ".."),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Mod => write!(f, "%"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::StarStar => write!(f, "**"),
            TokenKind::Bang => write!(f, "!"),
            TokenKind::BangEqual => write!(f, "!="),
            TokenKind::Equal => write!(f, "="),
            TokenKind::EqualEqual => write!(f, "=="),
            TokenKind::LessThan => write!(f, "<"),
            TokenKind::GreaterThan => write!(f, ">"),
            TokenKind::LessEqual => write!(f, "<="),
            TokenKind::GreaterEqual => write!(f, ">="),
            TokenKind::Error(msg) => write!(f, "error: {}", msg),
            TokenKind::Eof => write!(f, "EOF"),
        }
    }
}

/// A token with its kind and source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn eof(position: usize, line: usize, column: usize) -> Self {
        Self {
            kind: TokenKind::Eof,
            span: Span::new(position, position, line, column),
        }
    }

    /// The identifier text, if this token is an identifier.
    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Identifier(name) => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(TokenKind::keyword("func"), Some(TokenKind::Func));
        assert_eq!(TokenKind::keyword("instanceof"), Some(TokenKind::InstanceOf));
        assert_eq!(TokenKind::keyword("Int"), Some(TokenKind::IntIdent));
        assert_eq!(TokenKind::keyword("banana"), None);
    }

    #[test]
    fn test_type_idents() {
        assert!(TokenKind::CharIdent.is_type_ident());
        assert!(!TokenKind::Identifier("Int2".to_string()).is_type_ident());
    }
}
