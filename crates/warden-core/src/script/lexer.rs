//! Script lexer
//!
//! Turns source text into positioned tokens. Errors carry the location and
//! the offending line.

use std::rc::Rc;

use super::ast::{Pos, SourceText};
use crate::error::WardenResult;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Number(f64),
    Str(Rc<str>),
    Ident(String),

    // Keywords
    Let,
    Export,
    Fn,
    If,
    Else,
    While,
    Return,
    Throw,
    Try,
    Catch,
    True,
    False,
    Null,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Semi,
    Colon,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,

    Eof,
}

impl Tok {
    pub fn describe(&self) -> String {
        match self {
            Tok::Number(n) => format!("number `{}`", n),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Ident(name) => format!("`{}`", name),
            Tok::Eof => "end of input".to_string(),
            other => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Tok::Let => "let",
            Tok::Export => "export",
            Tok::Fn => "fn",
            Tok::If => "if",
            Tok::Else => "else",
            Tok::While => "while",
            Tok::Return => "return",
            Tok::Throw => "throw",
            Tok::Try => "try",
            Tok::Catch => "catch",
            Tok::True => "true",
            Tok::False => "false",
            Tok::Null => "null",
            Tok::LParen => "(",
            Tok::RParen => ")",
            Tok::LBrace => "{",
            Tok::RBrace => "}",
            Tok::LBracket => "[",
            Tok::RBracket => "]",
            Tok::Comma => ",",
            Tok::Dot => ".",
            Tok::Semi => ";",
            Tok::Colon => ":",
            Tok::Assign => "=",
            Tok::EqEq => "==",
            Tok::NotEq => "!=",
            Tok::Lt => "<",
            Tok::Le => "<=",
            Tok::Gt => ">",
            Tok::Ge => ">=",
            Tok::Plus => "+",
            Tok::Minus => "-",
            Tok::Star => "*",
            Tok::Slash => "/",
            Tok::Percent => "%",
            Tok::Bang => "!",
            Tok::AndAnd => "&&",
            Tok::OrOr => "||",
            Tok::Number(_) | Tok::Str(_) | Tok::Ident(_) | Tok::Eof => "",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub tok: Tok,
    pub pos: Pos,
}

pub fn tokenize(source: &SourceText) -> WardenResult<Vec<Token>> {
    Lexer { source, chars: source.text.chars().collect(), i: 0, line: 1, column: 1 }.run()
}

struct Lexer<'s> {
    source: &'s SourceText,
    chars: Vec<char>,
    i: usize,
    line: u32,
    column: u32,
}

impl<'s> Lexer<'s> {
    fn run(mut self) -> WardenResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let pos = self.pos();
            let Some(c) = self.peek() else {
                tokens.push(Token { tok: Tok::Eof, pos });
                return Ok(tokens);
            };

            let tok = if c.is_ascii_digit() {
                self.number(pos)?
            } else if c == '"' || c == '\'' {
                self.string(pos)?
            } else if c.is_alphabetic() || c == '_' || c == '$' {
                self.word()
            } else {
                self.bump();
                match c {
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    '{' => Tok::LBrace,
                    '}' => Tok::RBrace,
                    '[' => Tok::LBracket,
                    ']' => Tok::RBracket,
                    ',' => Tok::Comma,
                    '.' => Tok::Dot,
                    ';' => Tok::Semi,
                    ':' => Tok::Colon,
                    '+' => Tok::Plus,
                    '-' => Tok::Minus,
                    '*' => Tok::Star,
                    '/' => Tok::Slash,
                    '%' => Tok::Percent,
                    '=' if self.eat('=') => Tok::EqEq,
                    '=' => Tok::Assign,
                    '!' if self.eat('=') => Tok::NotEq,
                    '!' => Tok::Bang,
                    '<' if self.eat('=') => Tok::Le,
                    '<' => Tok::Lt,
                    '>' if self.eat('=') => Tok::Ge,
                    '>' => Tok::Gt,
                    '&' if self.eat('&') => Tok::AndAnd,
                    '|' if self.eat('|') => Tok::OrOr,
                    other => {
                        return Err(self
                            .source
                            .error(pos, format!("unexpected character `{}`", other.escape_default())))
                    }
                }
            };
            tokens.push(Token { tok, pos });
        }
    }

    fn skip_trivia(&mut self) -> WardenResult<()> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => self.bump(),
                (Some('/'), Some('/')) => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.pos();
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(), self.peek_at(1)) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => self.bump(),
                            (None, _) => return Err(self.source.error(start, "unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn number(&mut self, pos: Pos) -> WardenResult<Tok> {
        let mut text = String::new();
        self.take_digits(&mut text);
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            text.push('.');
            self.take_digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = self.peek_at(1);
            let digit_at = if matches!(sign, Some('+' | '-')) { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                text.push('e');
                self.bump();
                if digit_at == 2 {
                    if let Some(s) = sign {
                        text.push(s);
                    }
                    self.bump();
                }
                self.take_digits(&mut text);
            }
        }
        if self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            return Err(self.source.error(pos, "malformed number literal"));
        }
        text.parse::<f64>()
            .map(Tok::Number)
            .map_err(|_| self.source.error(pos, "malformed number literal"))
    }

    fn take_digits(&mut self, out: &mut String) {
        while let Some(c) = self.peek().filter(|c| c.is_ascii_digit()) {
            out.push(c);
            self.bump();
        }
    }

    fn string(&mut self, pos: Pos) -> WardenResult<Tok> {
        let quote = self.peek().unwrap_or('"');
        self.bump();
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.source.error(pos, "unterminated string literal"));
            };
            self.bump();
            match c {
                '\n' => return Err(self.source.error(pos, "unterminated string literal")),
                c if c == quote => return Ok(Tok::Str(Rc::from(out))),
                '\\' => {
                    let at = self.pos();
                    let escaped = match self.peek() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some('\\') => '\\',
                        Some('\'') => '\'',
                        Some('"') => '"',
                        Some('u') => {
                            self.bump();
                            out.push(self.unicode_escape(at)?);
                            continue;
                        }
                        _ => return Err(self.source.error(at, "invalid escape sequence")),
                    };
                    self.bump();
                    out.push(escaped);
                }
                c => out.push(c),
            }
        }
    }

    fn unicode_escape(&mut self, at: Pos) -> WardenResult<char> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .peek()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.source.error(at, "invalid \\u escape"))?;
            code = code * 16 + digit;
            self.bump();
        }
        char::from_u32(code).ok_or_else(|| self.source.error(at, "invalid \\u escape"))
    }

    fn word(&mut self) -> Tok {
        let mut word = String::new();
        while let Some(c) = self.peek().filter(|c| c.is_alphanumeric() || *c == '_' || *c == '$') {
            word.push(c);
            self.bump();
        }
        match word.as_str() {
            "let" => Tok::Let,
            "export" => Tok::Export,
            "fn" => Tok::Fn,
            "if" => Tok::If,
            "else" => Tok::Else,
            "while" => Tok::While,
            "return" => Tok::Return,
            "throw" => Tok::Throw,
            "try" => Tok::Try,
            "catch" => Tok::Catch,
            "true" => Tok::True,
            "false" => Tok::False,
            "null" => Tok::Null,
            _ => Tok::Ident(word),
        }
    }

    fn pos(&self) -> Pos {
        Pos { line: self.line, column: self.column }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.i + offset).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.i += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WardenError;

    fn toks(text: &str) -> Vec<Tok> {
        tokenize(&SourceText::new("<test>", text))
            .expect("lexes")
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn lexes_statement() {
        assert_eq!(
            toks("let x = 1.5e2; // trailing\n x != 'a\\n'"),
            vec![
                Tok::Let,
                Tok::Ident("x".into()),
                Tok::Assign,
                Tok::Number(150.0),
                Tok::Semi,
                Tok::Ident("x".into()),
                Tok::NotEq,
                Tok::Str(Rc::from("a\n")),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn member_access_on_number_is_not_a_fraction() {
        assert_eq!(
            toks("1.x"),
            vec![Tok::Number(1.0), Tok::Dot, Tok::Ident("x".into()), Tok::Eof]
        );
    }

    #[test]
    fn positions_track_lines() {
        let tokens = tokenize(&SourceText::new("<test>", "a\n  /* c\n */ b")).expect("lexes");
        assert_eq!(tokens[1].pos, Pos { line: 3, column: 5 });
    }

    #[test]
    fn reports_location_of_bad_character() {
        let err = tokenize(&SourceText::new("bad.ws", "let a = 1;\nlet b = #;")).expect_err("bad char");
        match err {
            WardenError::Source(e) => {
                assert_eq!(e.location.line, 2);
                assert_eq!(e.location.column, 9);
                assert_eq!(e.context.as_deref(), Some("let b = #;"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unterminated_constructs_fail() {
        for text in ["'abc", "/* open", "\"a\nb\""] {
            assert!(tokenize(&SourceText::new("<test>", text)).is_err(), "{}", text);
        }
    }
}
