// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tokenizer for the script language.

use std::iter::Peekable;
use std::str::Chars;

use super::ast::Pos;

/// Punctuators, longest first so the scanner can take the first match.
const PUNCTUATORS: &[&str] = &[
    ">>>", "===", "!==", "**", "...", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "++", "--",
    "+=", "-=", "*=", "/=", "%=", "<<", ">>", "(", ")", "{", "}", "[", "]", ";", ",", ".", "?",
    ":", "<", ">", "!", "+", "-", "*", "/", "%", "=", "&", "|", "^", "~",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("syntax error at {pos}: {message}")]
pub struct SyntaxError {
    pub message: String,
    pub pos: Pos,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    /// Template literal: `quasis` has one more element than `exprs`.
    Template {
        quasis: Vec<String>,
        exprs: Vec<Vec<Token>>,
    },
    /// Identifiers and keywords.
    Ident(String),
    Punct(&'static str),
    Eof,
}

impl TokenKind {
    /// Short description for error messages. Literal contents are not echoed.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(_) => "number".to_string(),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Template { .. } => "template literal".to_string(),
            TokenKind::Ident(name) => format!("`{name}`"),
            TokenKind::Punct(p) => format!("`{p}`"),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Pos,
}

pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the whole input. The last token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = self.scan(false)?;
        tokens.push(Token {
            kind: TokenKind::Eof,
            pos: self.pos(),
        });
        Ok(tokens)
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            col: self.col,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Scan tokens until end of input or, inside a template substitution,
    /// until the `}` that closes it.
    fn scan(&mut self, in_template: bool) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        let mut brace_depth = 0usize;

        loop {
            self.skip_trivia()?;
            let pos = self.pos();
            let Some(&c) = self.chars.peek() else {
                if in_template {
                    return Err(SyntaxError::new("unterminated template substitution", pos));
                }
                return Ok(tokens);
            };

            let kind = if c.is_ascii_digit()
                || (c == '.' && self.next_is_digit_after_dot())
            {
                TokenKind::Number(self.number(pos)?)
            } else if c == '"' || c == '\'' {
                self.bump();
                TokenKind::Str(self.string(c, pos)?)
            } else if c == '`' {
                self.bump();
                self.template(pos)?
            } else if is_ident_start(c) {
                TokenKind::Ident(self.ident())
            } else {
                let punct = self.punct(pos)?;
                if in_template {
                    match punct {
                        "{" => brace_depth += 1,
                        "}" if brace_depth == 0 => return Ok(tokens),
                        "}" => brace_depth -= 1,
                        _ => {}
                    }
                }
                TokenKind::Punct(punct)
            };
            tokens.push(Token { kind, pos });
        }
    }

    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    match ahead.peek() {
                        Some('/') => {
                            while let Some(c) = self.bump() {
                                if c == '\n' {
                                    break;
                                }
                            }
                        }
                        Some('*') => {
                            let pos = self.pos();
                            self.bump();
                            self.bump();
                            let mut closed = false;
                            while let Some(c) = self.bump() {
                                if c == '*' && self.eat('/') {
                                    closed = true;
                                    break;
                                }
                            }
                            if !closed {
                                return Err(SyntaxError::new("unterminated comment", pos));
                            }
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_is_digit_after_dot(&self) -> bool {
        let mut ahead = self.chars.clone();
        ahead.next();
        matches!(ahead.peek(), Some(c) if c.is_ascii_digit())
    }

    fn number(&mut self, pos: Pos) -> Result<f64, SyntaxError> {
        let mut text = String::new();

        if self.chars.peek() == Some(&'0') {
            let mut ahead = self.chars.clone();
            ahead.next();
            if matches!(ahead.peek(), Some('x') | Some('X')) {
                self.bump();
                self.bump();
                while let Some(&c) = self.chars.peek() {
                    if c.is_ascii_hexdigit() {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                return u64::from_str_radix(&text, 16)
                    .map(|v| v as f64)
                    .map_err(|_| SyntaxError::new("invalid hex literal", pos));
            }
        }

        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.bump();
            } else if c == 'e' || c == 'E' {
                text.push(c);
                self.bump();
                if let Some(&sign) = self.chars.peek() {
                    if sign == '+' || sign == '-' {
                        text.push(sign);
                        self.bump();
                    }
                }
            } else if c == '_' {
                self.bump();
            } else {
                break;
            }
        }

        if matches!(self.chars.peek(), Some(&c) if is_ident_start(c)) {
            return Err(SyntaxError::new("identifier directly after number", pos));
        }
        text.parse::<f64>()
            .map_err(|_| SyntaxError::new("invalid number literal", pos))
    }

    fn escape(&mut self, pos: Pos) -> Result<Option<char>, SyntaxError> {
        let Some(c) = self.bump() else {
            return Err(SyntaxError::new("unterminated escape sequence", pos));
        };
        let decoded = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            '0' => '\0',
            // Line continuation.
            '\n' => return Ok(None),
            'x' => self.hex_escape(2, pos)?,
            'u' => {
                if self.eat('{') {
                    let mut hex = String::new();
                    while let Some(c) = self.bump() {
                        if c == '}' {
                            break;
                        }
                        hex.push(c);
                    }
                    u32::from_str_radix(&hex, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| SyntaxError::new("invalid unicode escape", pos))?
                } else {
                    self.hex_escape(4, pos)?
                }
            }
            other => other,
        };
        Ok(Some(decoded))
    }

    fn hex_escape(&mut self, digits: usize, pos: Pos) -> Result<char, SyntaxError> {
        let mut hex = String::with_capacity(digits);
        for _ in 0..digits {
            match self.bump() {
                Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                _ => return Err(SyntaxError::new("invalid escape sequence", pos)),
            }
        }
        let code = u32::from_str_radix(&hex, 16)
            .map_err(|_| SyntaxError::new("invalid escape sequence", pos))?;
        // Lone surrogates have no Rust char.
        Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    fn string(&mut self, quote: char, pos: Pos) -> Result<String, SyntaxError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(SyntaxError::new("unterminated string literal", pos))
                }
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    if let Some(c) = self.escape(pos)? {
                        out.push(c);
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn template(&mut self, pos: Pos) -> Result<TokenKind, SyntaxError> {
        let mut quasis = Vec::new();
        let mut exprs = Vec::new();
        let mut current = String::new();
        loop {
            match self.bump() {
                None => return Err(SyntaxError::new("unterminated template literal", pos)),
                Some('`') => {
                    quasis.push(current);
                    return Ok(TokenKind::Template { quasis, exprs });
                }
                Some('\\') => {
                    if let Some(c) = self.escape(pos)? {
                        current.push(c);
                    }
                }
                Some('$') if self.eat('{') => {
                    quasis.push(std::mem::take(&mut current));
                    let mut inner = self.scan(true)?;
                    inner.push(Token {
                        kind: TokenKind::Eof,
                        pos: self.pos(),
                    });
                    exprs.push(inner);
                }
                Some(c) => current.push(c),
            }
        }
    }

    fn ident(&mut self) -> String {
        let mut name = String::new();
        while let Some(&c) = self.chars.peek() {
            if is_ident_part(c) {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        name
    }

    fn punct(&mut self, pos: Pos) -> Result<&'static str, SyntaxError> {
        let ahead: String = self.chars.clone().take(3).collect();
        for p in PUNCTUATORS {
            if ahead.starts_with(p) {
                for _ in 0..p.len() {
                    self.bump();
                }
                return Ok(p);
            }
        }
        Err(SyntaxError::new("unexpected character", pos))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn tokenizes_simple_function() {
        let toks = kinds("function double(x) { return x * 2; }");
        assert_eq!(toks[0], TokenKind::Ident("function".into()));
        assert_eq!(toks[1], TokenKind::Ident("double".into()));
        assert_eq!(toks[2], TokenKind::Punct("("));
        assert!(toks.contains(&TokenKind::Number(2.0)));
        assert_eq!(toks.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn longest_punctuator_wins() {
        assert_eq!(
            kinds("a === b >>> 1")[1..4],
            [
                TokenKind::Punct("==="),
                TokenKind::Ident("b".into()),
                TokenKind::Punct(">>>")
            ]
        );
        assert_eq!(kinds("x => x")[1], TokenKind::Punct("=>"));
    }

    #[test]
    fn numbers_and_strings() {
        assert_eq!(kinds("0xff")[0], TokenKind::Number(255.0));
        assert_eq!(kinds(".5")[0], TokenKind::Number(0.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Number(1000.0));
        assert_eq!(kinds(r#""a\nb""#)[0], TokenKind::Str("a\nb".into()));
        assert_eq!(kinds(r"'A'")[0], TokenKind::Str("A".into()));
    }

    #[test]
    fn comments_are_skipped() {
        let toks = kinds("a // line\n/* block\n */ b");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Ident("b".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn template_with_nested_braces() {
        let toks = kinds("`sum: ${ {a: 1}.a + 1 }!`");
        let TokenKind::Template { quasis, exprs } = &toks[0] else {
            panic!("expected template");
        };
        assert_eq!(quasis, &vec!["sum: ".to_string(), "!".to_string()]);
        assert_eq!(exprs.len(), 1);
        assert_eq!(exprs[0].last().map(|t| &t.kind), Some(&TokenKind::Eof));
    }

    #[test]
    fn positions_track_lines() {
        let toks = Lexer::new("a\n  b").tokenize().unwrap();
        assert_eq!(toks[1].pos, Pos { line: 2, col: 3 });
    }

    #[test]
    fn errors_do_not_echo_literals() {
        let err = Lexer::new("'unterminated secret").tokenize().unwrap_err();
        assert!(!err.to_string().contains("secret"));
        assert!(Lexer::new("a # b").tokenize().is_err());
    }
}
