//! A small SQL tokenizer for DDL inspection.
//!
//! It only needs to be good enough to split a `CREATE TABLE` statement into
//! column definitions and constraints: keywords are left as bare words and
//! matched case-insensitively by the caller.

/// Byte range of a token in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Start byte offset (inclusive).
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare identifier or keyword.
    Word(String),
    /// Quoted identifier (`"x"`, `` `x` `` or `[x]`), unescaped.
    QuotedIdent(String),
    /// String literal, unescaped.
    String(String),
    /// Blob literal (`x'00ff'`), hex digits only.
    Blob(String),
    /// Numeric literal, verbatim.
    Number(String),
    /// Any other single character (`(`, `)`, `,`, `+`, ...).
    Symbol(char),
}

/// A token with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Token kind.
    pub kind: TokenKind,
    /// Source span.
    pub span: Span,
}

impl Token {
    /// Returns true if this is the given keyword (case-insensitive).
    #[must_use]
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    /// Returns true if this is the given punctuation character.
    #[must_use]
    pub fn is_symbol(&self, symbol: char) -> bool {
        self.kind == TokenKind::Symbol(symbol)
    }

    /// Returns the token as an identifier, if it can name something.
    ///
    /// SQLite also accepts string literals in identifier position.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Word(s) | TokenKind::QuotedIdent(s) | TokenKind::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Tokenizer failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    /// A quoted identifier or literal was never closed.
    #[error("unterminated quote starting at byte {0}")]
    UnterminatedQuote(usize),
    /// A block comment was never closed.
    #[error("unterminated comment starting at byte {0}")]
    UnterminatedComment(usize),
}

/// A lexer that tokenizes SQL input.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    start: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given input.
    #[must_use]
    pub const fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            start: 0,
        }
    }

    /// Tokenizes the whole input.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            self.start = self.pos;
            let Some(c) = self.peek() else {
                return Ok(tokens);
            };

            let kind = match c {
                '\'' => TokenKind::String(self.scan_quoted('\'', '\'')?),
                '"' => TokenKind::QuotedIdent(self.scan_quoted('"', '"')?),
                '`' => TokenKind::QuotedIdent(self.scan_quoted('`', '`')?),
                '[' => TokenKind::QuotedIdent(self.scan_quoted('[', ']')?),
                'x' | 'X' if self.peek_next() == Some('\'') => {
                    self.advance();
                    TokenKind::Blob(self.scan_quoted('\'', '\'')?)
                }
                c if c.is_ascii_digit() => self.scan_number(),
                '.' if self.peek_next().is_some_and(|n| n.is_ascii_digit()) => self.scan_number(),
                c if c.is_alphabetic() || c == '_' => self.scan_word(),
                c => {
                    self.advance();
                    TokenKind::Symbol(c)
                }
            };

            tokens.push(Token {
                kind,
                span: Span {
                    start: self.start,
                    end: self.pos,
                },
            });
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
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            while self.peek().is_some_and(char::is_whitespace) {
                self.advance();
            }

            if self.peek() == Some('-') && self.peek_next() == Some('-') {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.advance();
                }
                continue;
            }

            if self.peek() == Some('/') && self.peek_next() == Some('*') {
                let opened = self.pos;
                self.advance();
                self.advance();
                loop {
                    match self.advance() {
                        Some('*') if self.peek() == Some('/') => {
                            self.advance();
                            break;
                        }
                        Some(_) => {}
                        None => return Err(LexError::UnterminatedComment(opened)),
                    }
                }
                continue;
            }

            return Ok(());
        }
    }

    /// Scans a quoted run; a doubled closing quote is an escaped quote
    /// (not applicable to `[...]`).
    fn scan_quoted(&mut self, open: char, close: char) -> Result<String, LexError> {
        let opened = self.pos;
        self.advance();
        let mut content = String::new();
        loop {
            match self.advance() {
                Some(c) if c == close => {
                    if open == close && self.peek() == Some(close) {
                        self.advance();
                        content.push(close);
                    } else {
                        return Ok(content);
                    }
                }
                Some(c) => content.push(c),
                None => return Err(LexError::UnterminatedQuote(opened)),
            }
        }
    }

    fn scan_number(&mut self) -> TokenKind {
        if self.peek() == Some('0') && self.peek_next().is_some_and(|c| c == 'x' || c == 'X') {
            self.advance();
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
        } else {
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
                self.advance();
            }
            if self.peek().is_some_and(|c| c == 'e' || c == 'E') {
                self.advance();
                if self.peek().is_some_and(|c| c == '+' || c == '-') {
                    self.advance();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
        TokenKind::Number(self.input[self.start..self.pos].to_string())
    }

    fn scan_word(&mut self) -> TokenKind {
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            self.advance();
        }
        TokenKind::Word(self.input[self.start..self.pos].to_string())
    }
}
