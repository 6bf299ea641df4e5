//! Tokenizer for the schema definition language.

use super::token::{Span, SyntaxError, Token, TokenKind};

/// A lexer over definition source text.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    start: usize,
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given input.
    #[must_use]
    pub const fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            start: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
        }
    }

    /// Tokenizes the whole input. The last token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if eof {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Skips whitespace (newlines included) and `#` comments.
    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.peek().is_some_and(char::is_whitespace) {
                self.advance();
            }
            if self.peek() == Some('#') {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.advance();
                }
                continue;
            }
            break;
        }
    }

    fn span(&self) -> Span {
        Span::new(self.start, self.pos, self.start_line, self.start_column)
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.span())
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.span())
    }

    fn next_token(&mut self) -> Result<Token, SyntaxError> {
        self.skip_whitespace_and_comments();
        self.start = self.pos;
        self.start_line = self.line;
        self.start_column = self.column;

        let Some(c) = self.peek() else {
            return Ok(self.make_token(TokenKind::Eof));
        };

        match c {
            '"' | '\'' => self.scan_string(c),
            ':' => self.scan_symbol(),
            '-' if self.peek_next() == Some('>') => {
                self.advance();
                self.advance();
                Ok(self.make_token(TokenKind::Arrow))
            }
            '=' if self.peek_next() == Some('>') => {
                self.advance();
                self.advance();
                Ok(self.make_token(TokenKind::HashRocket))
            }
            '-' | '+' if self.peek_next().is_some_and(|n| n.is_ascii_digit()) => {
                self.scan_number()
            }
            c if c.is_ascii_digit() => self.scan_number(),
            c if c.is_alphabetic() || c == '_' => Ok(self.scan_word()),
            _ => {
                self.advance();
                let kind = match c {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    ',' => TokenKind::Comma,
                    '.' => TokenKind::Dot,
                    '|' => TokenKind::Pipe,
                    other => return Err(self.error(format!("unexpected character '{other}'"))),
                };
                Ok(self.make_token(kind))
            }
        }
    }

    /// Scans a word; a word directly followed by a single `:` is a label.
    fn scan_word(&mut self) -> Token {
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '?' || c == '!')
        {
            self.advance();
        }
        let text = self.input[self.start..self.pos].to_string();
        if self.peek() == Some(':') && self.peek_next() != Some(':') {
            self.advance();
            return self.make_token(TokenKind::Label(text));
        }
        self.make_token(TokenKind::Ident(text))
    }

    fn scan_symbol(&mut self) -> Result<Token, SyntaxError> {
        self.advance(); // :
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                let token = self.scan_string(q)?;
                match token.kind {
                    TokenKind::Str(s) => Ok(self.make_token(TokenKind::Symbol(s))),
                    _ => Err(self.error("malformed quoted symbol")),
                }
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let name_start = self.pos;
                while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
                    self.advance();
                }
                let name = self.input[name_start..self.pos].to_string();
                Ok(self.make_token(TokenKind::Symbol(name)))
            }
            _ => Err(self.error("expected symbol name after ':'")),
        }
    }

    fn scan_string(&mut self, quote: char) -> Result<Token, SyntaxError> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string literal")),
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escaped = self
                        .advance()
                        .ok_or_else(|| self.error("unterminated string literal"))?;
                    match (quote, escaped) {
                        ('"', 'n') => value.push('\n'),
                        ('"', 't') => value.push('\t'),
                        ('"', 'r') => value.push('\r'),
                        ('"', '0') => value.push('\0'),
                        (_, '\\') => value.push('\\'),
                        (q, c) if c == q => value.push(c),
                        // Single-quoted strings keep unknown escapes verbatim.
                        (_, other) => {
                            value.push('\\');
                            value.push(other);
                        }
                    }
                }
                Some(c) => value.push(c),
            }
        }
        Ok(self.make_token(TokenKind::Str(value)))
    }

    fn scan_number(&mut self) -> Result<Token, SyntaxError> {
        if matches!(self.peek(), Some('-' | '+')) {
            self.advance();
        }
        let mut is_float = false;
        let mut has_exponent = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.advance();
            } else if c == '.' && !is_float && self.peek_next().is_some_and(|n| n.is_ascii_digit())
            {
                is_float = true;
                self.advance();
            } else if (c == 'e' || c == 'E')
                && !has_exponent
                && self
                    .peek_next()
                    .is_some_and(|n| n.is_ascii_digit() || n == '-' || n == '+')
            {
                is_float = true;
                has_exponent = true;
                self.advance();
                if matches!(self.peek(), Some('-' | '+')) {
                    self.advance();
                }
            } else {
                break;
            }
        }
        let text: String = self.input[self.start..self.pos]
            .chars()
            .filter(|c| *c != '_')
            .collect();
        if is_float {
            text.parse()
                .map(|n| self.make_token(TokenKind::Float(n)))
                .map_err(|_| self.error(format!("invalid number '{text}'")))
        } else {
            text.parse()
                .map(|n| self.make_token(TokenKind::Integer(n)))
                .map_err(|_| self.error(format!("invalid number '{text}'")))
        }
    }
}
