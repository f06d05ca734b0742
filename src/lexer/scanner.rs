//! Lexer/Scanner for Garnet source code.
//!
//! Tokens are produced one at a time; the compiler pulls them on demand.
//! Lexical problems surface as `TokenKind::Error` tokens so the compiler's
//! panic-mode recovery can keep scanning past them.

use crate::lexer::token::{Token, TokenKind};
use crate::span::Span;

/// The scanner transforms source code into a stream of tokens.
pub struct Scanner<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    line: usize,
    column: usize,
    start_pos: usize,
    start_line: usize,
    start_column: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            column: 1,
            start_pos: 0,
            start_line: 1,
            start_column: 1,
        }
    }

    /// Scan the next token.
    pub fn scan_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        self.mark_start();

        let Some((_, c)) = self.advance() else {
            return Token::eof(self.current_pos, self.line, self.column);
        };

        match c {
            '(' => self.make_token(TokenKind::LeftParen),
            ')' => self.make_token(TokenKind::RightParen),
            ':' => self.make_token(TokenKind::Colon),
            ';' => self.make_token(TokenKind::Semicolon),
            ',' => self.make_token(TokenKind::Comma),
            '+' => self.make_token(TokenKind::Plus),
            '-' => self.make_token(TokenKind::Minus),
            '/' => self.make_token(TokenKind::Slash),
            '%' => self.make_token(TokenKind::Mod),
            '*' => {
                if self.match_char('*') {
                    self.make_token(TokenKind::StarStar)
                } else {
                    self.make_token(TokenKind::Star)
                }
            }
            '.' => {
                if self.match_char('.') {
                    self.make_token(TokenKind::DotDot)
                } else {
                    self.make_token(TokenKind::Dot)
                }
            }
            '!' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::BangEqual)
                } else {
                    self.make_token(TokenKind::Bang)
                }
            }
            '=' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::EqualEqual)
                } else {
                    self.make_token(TokenKind::Equal)
                }
            }
            '<' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::LessEqual)
                } else {
                    self.make_token(TokenKind::LessThan)
                }
            }
            '>' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::GreaterEqual)
                } else {
                    self.make_token(TokenKind::GreaterThan)
                }
            }
            '"' => self.scan_string(),
            '\'' => self.scan_char(),
            c if c.is_ascii_digit() => self.scan_number(c),
            c if c.is_alphabetic() || c == '_' => self.scan_identifier(c),
            _ => self.error_token(format!("Unexpected character '{}'", c)),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                }
                Some('/') => {
                    if self.peek_next() == Some('/') {
                        // Line comment
                        while self.peek().is_some() && self.peek() != Some('\n') {
                            self.advance();
                        }
                    } else if self.peek_next() == Some('*') {
                        // Block comment, nestable
                        self.advance();
                        self.advance();
                        let mut depth = 1;
                        while depth > 0 {
                            match self.peek() {
                                None => break,
                                Some('*') if self.peek_next() == Some('/') => {
                                    self.advance();
                                    self.advance();
                                    depth -= 1;
                                }
                                Some('/') if self.peek_next() == Some('*') => {
                                    self.advance();
                                    self.advance();
                                    depth += 1;
                                }
                                Some('\n') => {
                                    self.advance();
                                    self.line += 1;
                                    self.column = 1;
                                }
                                _ => {
                                    self.advance();
                                }
                            }
                        }
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    fn escape_char(c: char) -> Option<char> {
        match c {
            't' => Some('\t'),
            'b' => Some('\u{0008}'),
            'n' => Some('\n'),
            'r' => Some('\r'),
            'f' => Some('\u{000C}'),
            '\'' => Some('\''),
            '"' => Some('"'),
            '\\' => Some('\\'),
            _ => None,
        }
    }

    fn scan_string(&mut self) -> Token {
        let mut value = String::new();

        loop {
            match self.peek() {
                None | Some('\n') => {
                    return self.error_token("Unterminated string");
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek() {
                        Some(c) => {
                            self.advance();
                            match Self::escape_char(c) {
                                Some(escaped) => value.push(escaped),
                                None => {
                                    return self.error_token(format!(
                                        "Unrecognised escape character '\\{}'",
                                        c
                                    ));
                                }
                            }
                        }
                        None => {
                            return self.error_token("Unterminated string");
                        }
                    }
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }

        self.make_token(TokenKind::StringLiteral(value))
    }

    fn scan_char(&mut self) -> Token {
        let value = match self.peek() {
            None | Some('\n') => {
                return self.error_token("Unterminated char literal");
            }
            Some('\\') => {
                self.advance();
                match self.peek() {
                    Some(c) => {
                        self.advance();
                        match Self::escape_char(c) {
                            Some(escaped) => escaped,
                            None => {
                                return self.error_token(format!(
                                    "Unrecognised escape character '\\{}'",
                                    c
                                ));
                            }
                        }
                    }
                    None => return self.error_token("Unterminated char literal"),
                }
            }
            Some('\'') => {
                self.advance();
                return self
                    .error_token("`char` must contain a single character or escape character");
            }
            Some(c) => {
                self.advance();
                c
            }
        };

        if !self.match_char('\'') {
            return self.error_token("`char` must contain a single character or escape character");
        }
        self.make_token(TokenKind::CharLiteral(value))
    }

    fn scan_number(&mut self, first: char) -> Token {
        let mut value = String::from(first);
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                value.push(c);
                self.advance();
            } else if c == '.' && !is_float {
                // A second '.' means a range, not a fractional part
                match self.peek_next() {
                    Some(next) if next.is_ascii_digit() => {
                        is_float = true;
                        value.push(c);
                        self.advance();
                    }
                    _ => break,
                }
            } else {
                break;
            }
        }

        if is_float {
            match value.parse::<f64>() {
                Ok(n) => self.make_token(TokenKind::FloatLiteral(n)),
                Err(_) => self.error_token("Float out of range."),
            }
        } else {
            match value.parse::<i64>() {
                Ok(n) => self.make_token(TokenKind::IntLiteral(n)),
                Err(_) => self.error_token("Int out of range."),
            }
        }
    }

    fn scan_identifier(&mut self, first: char) -> Token {
        let mut value = String::from(first);

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                value.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let kind = TokenKind::keyword(&value).unwrap_or(TokenKind::Identifier(value));
        self.make_token(kind)
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        if let Some((pos, c)) = self.chars.next() {
            self.current_pos = pos + c.len_utf8();
            self.column += 1;
            Some((pos, c))
        } else {
            None
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_next(&self) -> Option<char> {
        let mut iter = self.source[self.current_pos..].chars();
        iter.next();
        iter.next()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn mark_start(&mut self) {
        self.start_pos = self.current_pos;
        self.start_line = self.line;
        self.start_column = self.column;
    }

    fn current_span(&self) -> Span {
        Span::new(
            self.start_pos,
            self.current_pos,
            self.start_line,
            self.start_column,
        )
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.current_span())
    }

    fn error_token(&self, message: impl Into<String>) -> Token {
        Token::new(TokenKind::Error(message.into()), self.current_span())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut kinds = Vec::new();
        loop {
            let token = scanner.scan_token();
            let is_eof = token.kind == TokenKind::Eof;
            kinds.push(token.kind);
            if is_eof {
                break;
            }
        }
        kinds
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            scan("():;"),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::Colon,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            scan("42 3.14"),
            vec![
                TokenKind::IntLiteral(42),
                TokenKind::FloatLiteral(3.14),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_range_is_not_a_float() {
        assert_eq!(
            scan("1..11"),
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::DotDot,
                TokenKind::IntLiteral(11),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string() {
        assert_eq!(
            scan(r#""hello""#),
            vec![
                TokenKind::StringLiteral("hello".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            scan(r#""a\tb\n\"c\"""#),
            vec![
                TokenKind::StringLiteral("a\tb\n\"c\"".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let kinds = scan("\"abc");
        assert!(matches!(kinds[0], TokenKind::Error(_)));
    }

    #[test]
    fn test_char_literals() {
        assert_eq!(
            scan(r"'a' '\n'"),
            vec![
                TokenKind::CharLiteral('a'),
                TokenKind::CharLiteral('\n'),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_empty_char_is_error() {
        let kinds = scan("''");
        assert!(matches!(kinds[0], TokenKind::Error(_)));
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            scan("func var final end while"),
            vec![
                TokenKind::Func,
                TokenKind::Var,
                TokenKind::Final,
                TokenKind::End,
                TokenKind::While,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            scan("+ - * ** / % == != <="),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::StarStar,
                TokenKind::Slash,
                TokenKind::Mod,
                TokenKind::EqualEqual,
                TokenKind::BangEqual,
                TokenKind::LessEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            scan("1 // comment\n2 /* block /* nested */ */ 3"),
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::IntLiteral(2),
                TokenKind::IntLiteral(3),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_line_and_column_tracking() {
        let mut scanner = Scanner::new("var\n  x");
        let first = scanner.scan_token();
        assert_eq!(first.span.line, 1);
        assert_eq!(first.span.column, 1);
        let second = scanner.scan_token();
        assert_eq!(second.span.line, 2);
        assert_eq!(second.span.column, 3);
        assert_eq!(second.span.length(), 1);
    }

    #[test]
    fn test_type_idents() {
        assert_eq!(
            scan("Int Float x"),
            vec![
                TokenKind::IntIdent,
                TokenKind::FloatIdent,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Eof,
            ]
        );
    }
}
