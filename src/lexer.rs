use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    And,
    Break,
    Class,
    Else,
    False,
    For,
    Fun,
    If,
    Let,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    While,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier,
    Number(f64),
    String(String),
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Semicolon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Bang,
    BangEqual,
    EqualEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: SourceSpan,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::str::CharIndices<'a>,
    current: usize,
    line: usize,
    peeked: Option<(usize, char)>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices(),
            current: 0,
            line: 1,
            peeked: None,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = if let Some((idx, ch)) = self.peeked.take() {
            Some((idx, ch))
        } else {
            self.chars.next()
        };
        if let Some((idx, ch)) = next {
            self.current = idx + ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
            }
            Some((idx, ch))
        } else {
            None
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    /// Looks one character past `peek` without consuming anything.
    fn peek_second(&mut self) -> Option<char> {
        self.peek();
        self.chars.clone().next().map(|(_, ch)| ch)
    }

    fn match_next(&mut self, expected: char) -> bool {
        match self.peek() {
            Some((_, ch)) if ch == expected => {
                self.bump();
                true
            }
            _ => false,
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some((_, ch)) = self.peek() {
            if ch.is_whitespace() {
                self.bump();
            } else if ch == '/' && self.peek_second() == Some('/') {
                while let Some((_, ch)) = self.peek() {
                    if ch == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn span_from(&self, start: usize, line: usize) -> SourceSpan {
        SourceSpan::new(start, self.current, line)
    }

    fn identifier_or_keyword(&mut self, start: usize, line: usize) -> Token {
        while let Some((_, ch)) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let lexeme = self.source[start..self.current].to_string();
        let kind = keyword_for(&lexeme).unwrap_or(TokenKind::Identifier);
        Token {
            kind,
            lexeme,
            span: self.span_from(start, line),
        }
    }

    fn number_literal(&mut self, start: usize, line: usize) -> Result<Token, Diagnostic> {
        while let Some((_, '0'..='9')) = self.peek() {
            self.bump();
        }
        if let Some((_, '.')) = self.peek() {
            if self.peek_second().is_some_and(|ch| ch.is_ascii_digit()) {
                self.bump();
                while let Some((_, '0'..='9')) = self.peek() {
                    self.bump();
                }
            }
        }
        let lexeme = self.source[start..self.current].to_string();
        let span = self.span_from(start, line);
        let value = lexeme.parse::<f64>().map_err(|err| {
            Diagnostic::new(
                DiagnosticKind::Lexer,
                format!("invalid number literal `{lexeme}`: {err}"),
            )
            .with_span(span)
        })?;
        Ok(Token {
            kind: TokenKind::Number(value),
            lexeme,
            span,
        })
    }

    fn string_literal(&mut self, start: usize, line: usize) -> Result<Token, Diagnostic> {
        let mut value = String::new();
        while let Some((_, ch)) = self.bump() {
            match ch {
                '"' => {
                    return Ok(Token {
                        kind: TokenKind::String(value),
                        lexeme: self.source[start..self.current].to_string(),
                        span: self.span_from(start, line),
                    });
                }
                '\\' => match self.bump() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, other)) => value.push(other),
                    None => break,
                },
                _ => value.push(ch),
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::Lexer, "Unterminated string.")
                .with_span(self.span_from(start, line)),
        )
    }

    fn simple_token(&mut self, start: usize, line: usize, kind: TokenKind) -> Token {
        Token {
            kind,
            lexeme: self.source[start..self.current].to_string(),
            span: self.span_from(start, line),
        }
    }

    fn either(
        &mut self,
        start: usize,
        line: usize,
        next: char,
        matched: TokenKind,
        otherwise: TokenKind,
    ) -> Token {
        let kind = if self.match_next(next) {
            matched
        } else {
            otherwise
        };
        self.simple_token(start, line, kind)
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let line = self.line;
            let (start, ch) = match self.bump() {
                Some(pair) => pair,
                None => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        lexeme: String::new(),
                        span: SourceSpan::new(self.current, self.current, self.line),
                    });
                    break;
                }
            };

            let token = match ch {
                'a'..='z' | 'A'..='Z' | '_' => self.identifier_or_keyword(start, line),
                '0'..='9' => self.number_literal(start, line)?,
                '"' => self.string_literal(start, line)?,
                '(' => self.simple_token(start, line, TokenKind::LParen),
                ')' => self.simple_token(start, line, TokenKind::RParen),
                '{' => self.simple_token(start, line, TokenKind::LBrace),
                '}' => self.simple_token(start, line, TokenKind::RBrace),
                ',' => self.simple_token(start, line, TokenKind::Comma),
                '.' => self.simple_token(start, line, TokenKind::Dot),
                ';' => self.simple_token(start, line, TokenKind::Semicolon),
                '+' => self.simple_token(start, line, TokenKind::Plus),
                '-' => self.simple_token(start, line, TokenKind::Minus),
                '*' => self.simple_token(start, line, TokenKind::Star),
                '/' => self.simple_token(start, line, TokenKind::Slash),
                '=' => self.either(
                    start,
                    line,
                    '=',
                    TokenKind::EqualEqual,
                    TokenKind::Assign,
                ),
                '!' => self.either(start, line, '=', TokenKind::BangEqual, TokenKind::Bang),
                '<' => self.either(start, line, '=', TokenKind::LessEqual, TokenKind::Less),
                '>' => self.either(
                    start,
                    line,
                    '=',
                    TokenKind::GreaterEqual,
                    TokenKind::Greater,
                ),
                other => {
                    return Err(Diagnostic::new(
                        DiagnosticKind::Lexer,
                        format!("Unexpected character `{other}`."),
                    )
                    .with_span(self.span_from(start, line)));
                }
            };
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "and" => Kw::And,
        "break" => Kw::Break,
        "class" => Kw::Class,
        "else" => Kw::Else,
        "false" => Kw::False,
        "for" => Kw::For,
        "fun" => Kw::Fun,
        "if" => Kw::If,
        "let" => Kw::Let,
        "nil" => Kw::Nil,
        "or" => Kw::Or,
        "print" => Kw::Print,
        "return" => Kw::Return,
        "super" => Kw::Super,
        "this" => Kw::This,
        "true" => Kw::True,
        "while" => Kw::While,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}
