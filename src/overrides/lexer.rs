use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::EvaluationError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Float(f64),
    Ident(String),
    True,
    False,
    And,
    Or,
    Not,
    In,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Pipe,
    Amp,
    Minus,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
}

/// Lazy tokenizer. Tokens are produced on demand so the parser reports the
/// first offending construct rather than the first unlexable character.
pub(crate) struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn take_while(&mut self, start: usize, pred: impl Fn(char) -> bool) -> &'a str {
        let mut end = start;
        while let Some(&(idx, c)) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            end = idx + c.len_utf8();
            self.chars.next();
        }
        &self.source[start..end]
    }

    fn follow(&mut self, expected: char, matched: Token, otherwise: Option<Token>, start: usize) -> Result<Token, EvaluationError> {
        if matches!(self.chars.peek(), Some((_, c)) if *c == expected) {
            self.chars.next();
            return Ok(matched);
        }
        otherwise.ok_or_else(|| syntax(start, format!("expected '{expected}'")))
    }

    fn number(&mut self, start: usize) -> Result<Token, EvaluationError> {
        let text = self.take_while(start, |c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        let cleaned = text.replace('_', "");
        let radix = match cleaned.get(..2) {
            Some("0x") | Some("0X") => Some(16),
            Some("0b") | Some("0B") => Some(2),
            Some("0o") | Some("0O") => Some(8),
            _ => None,
        };
        if let Some(radix) = radix {
            return i64::from_str_radix(&cleaned[2..], radix)
                .map(Token::Int)
                .map_err(|_| syntax(start, format!("invalid integer literal '{text}'")));
        }
        if cleaned.contains('.') || cleaned.contains(['e', 'E']) {
            return cleaned
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| syntax(start, format!("invalid float literal '{text}'")));
        }
        cleaned
            .parse::<i64>()
            .map(Token::Int)
            .map_err(|_| syntax(start, format!("invalid integer literal '{text}'")))
    }

    fn word(&mut self, start: usize) -> Token {
        let text = self.take_while(start, |c| c.is_ascii_alphanumeric() || c == '_');
        match text {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "in" => Token::In,
            "True" | "true" => Token::True,
            "False" | "false" => Token::False,
            _ => Token::Ident(text.to_string()),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<(usize, Token), EvaluationError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let &(start, c) = self.chars.peek()?;

        if c.is_ascii_digit() {
            return Some(self.number(start).map(|token| (start, token)));
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return Some(Ok((start, self.word(start))));
        }

        self.chars.next();
        let token = match c {
            '(' => Ok(Token::LParen),
            ')' => Ok(Token::RParen),
            '[' => Ok(Token::LBracket),
            ']' => Ok(Token::RBracket),
            '{' => Ok(Token::LBrace),
            '}' => Ok(Token::RBrace),
            ',' => Ok(Token::Comma),
            '-' => Ok(Token::Minus),
            '|' => self.follow('|', Token::Or, Some(Token::Pipe), start),
            '&' => self.follow('&', Token::And, Some(Token::Amp), start),
            '!' => self.follow('=', Token::Ne, Some(Token::Not), start),
            '=' => self.follow('=', Token::Eq, None, start),
            '<' => self.follow('=', Token::Le, Some(Token::Lt), start),
            '>' => self.follow('=', Token::Ge, Some(Token::Gt), start),
            other => Err(syntax(start, format!("unexpected character '{other}'"))),
        };
        Some(token.map(|token| (start, token)))
    }
}

fn syntax(position: usize, reason: String) -> EvaluationError {
    EvaluationError::Syntax { position, reason }
}
