use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceSpan};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    While,
    For,
    In,
    Break,
    Return,
    True,
    False,
    Null,
    Struct,
}

/// Piece of a triple-quoted template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Text(String),
    /// Source of an `${...}` segment and its byte offset in the whole input.
    Code { source: String, offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    Template(Vec<TemplatePart>),
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    DotDot,
    Colon,
    Semicolon,
    FatArrow,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    DoubleAmpersand,
    DoublePipe,
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
    /// Whether a newline separates this token from the previous one.
    pub line_break_before: bool,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::str::CharIndices<'a>,
    current: usize,
    peeked: Option<(usize, char)>,
    offset: usize,
    saw_newline: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::with_offset(source, 0)
    }

    /// Lexes a fragment embedded at `offset` bytes into a larger input, so
    /// spans point into the enclosing source.
    pub fn with_offset(source: &'a str, offset: usize) -> Self {
        Self {
            source,
            chars: source.char_indices(),
            current: 0,
            peeked: None,
            offset,
            saw_newline: false,
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

    /// Character after the peeked one.
    fn peek_second(&mut self) -> Option<char> {
        self.peek()?;
        self.chars.clone().next().map(|(_, ch)| ch)
    }

    fn match_next(&mut self, expected: char) -> bool {
        if let Some((idx, ch)) = self.peek() {
            if ch == expected {
                self.peeked = None;
                self.current = idx + ch.len_utf8();
                true
            } else {
                false
            }
        } else {
            false
        }
    }

    fn span(&self, start: usize, end: usize) -> SourceSpan {
        SourceSpan::new(start, end).shifted(self.offset)
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some((_, ch)) = self.peek() {
            if ch == '\n' {
                self.saw_newline = true;
                self.bump();
            } else if ch.is_whitespace() {
                self.bump();
            } else if ch == '#' {
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

    fn identifier_or_keyword(&mut self, start: usize) -> (TokenKind, usize) {
        while let Some((_, ch)) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let end = self.current;
        let kind = keyword_for(&self.source[start..end]).unwrap_or(TokenKind::Identifier);
        (kind, end)
    }

    fn number_literal(&mut self) -> usize {
        let mut seen_dot = false;
        let mut seen_exponent = false;
        while let Some((_, ch)) = self.peek() {
            match ch {
                '0'..='9' | '_' => {
                    self.bump();
                }
                '.' if !seen_dot && !seen_exponent => {
                    // `0..10` is a range, `x.0.` never occurs in the grammar
                    if self.peek_second() == Some('.') {
                        break;
                    }
                    seen_dot = true;
                    self.bump();
                }
                'e' | 'E' if !seen_exponent => {
                    let next = self.peek_second();
                    if !matches!(next, Some('0'..='9' | '+' | '-')) {
                        break;
                    }
                    seen_exponent = true;
                    self.bump();
                    if let Some((_, '+' | '-')) = self.peek() {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        self.current
    }

    fn string_literal(&mut self, start: usize) -> Result<(String, usize), Diagnostic> {
        let mut value = String::new();
        while let Some((_, ch)) = self.bump() {
            match ch {
                '"' => return Ok((value, self.current)),
                '\\' => match self.bump() {
                    Some((_, esc)) => match esc {
                        'n' => value.push('\n'),
                        'r' => value.push('\r'),
                        't' => value.push('\t'),
                        '0' => value.push('\0'),
                        '"' => value.push('"'),
                        '\\' => value.push('\\'),
                        other => value.push(other),
                    },
                    None => break,
                },
                _ => value.push(ch),
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::Lexer, "unterminated string literal")
                .with_span(self.span(start, self.current)),
        )
    }

    /// Body of a `"""` template; the opening quotes are already consumed.
    fn template_literal(&mut self, start: usize) -> Result<(Vec<TemplatePart>, usize), Diagnostic> {
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            let Some((idx, ch)) = self.bump() else {
                return Err(Diagnostic::new(
                    DiagnosticKind::Lexer,
                    "unterminated template string",
                )
                .with_span(self.span(start, self.current)));
            };
            match ch {
                '"' if self.source[idx..].starts_with("\"\"\"") => {
                    self.bump();
                    self.bump();
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(text));
                    }
                    return Ok((parts, self.current));
                }
                '$' if self.peek().map(|(_, c)| c) == Some('{') => {
                    self.bump();
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    parts.push(self.template_code(idx)?);
                }
                _ => text.push(ch),
            }
        }
    }

    fn template_code(&mut self, dollar: usize) -> Result<TemplatePart, Diagnostic> {
        let code_start = self.current;
        let mut depth = 1usize;
        let mut in_string = false;
        while let Some((idx, ch)) = self.bump() {
            match ch {
                '\\' if in_string => {
                    self.bump();
                }
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        let source = &self.source[code_start..idx];
                        if source.trim().is_empty() {
                            return Err(Diagnostic::new(
                                DiagnosticKind::Lexer,
                                "empty interpolation segment",
                            )
                            .with_span(self.span(dollar, self.current)));
                        }
                        return Ok(TemplatePart::Code {
                            source: source.to_string(),
                            offset: self.offset + code_start,
                        });
                    }
                }
                _ => {}
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::Lexer, "unterminated `${` in template string")
                .with_span(self.span(dollar, self.current)),
        )
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let line_break_before = std::mem::take(&mut self.saw_newline);
            let (start, ch) = match self.bump() {
                Some(pair) => pair,
                None => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        lexeme: String::new(),
                        span: self.span(self.current, self.current),
                        line_break_before,
                    });
                    break;
                }
            };

            let (kind, end, lexeme) = match ch {
                c if c.is_alphabetic() || c == '_' => {
                    let (kind, end) = self.identifier_or_keyword(start);
                    (kind, end, None)
                }
                '0'..='9' => {
                    let end = self.number_literal();
                    (TokenKind::Number, end, None)
                }
                '"' => {
                    if self.source[start..].starts_with("\"\"\"") {
                        self.bump();
                        self.bump();
                        let (parts, end) = self.template_literal(start)?;
                        (TokenKind::Template(parts), end, None)
                    } else {
                        let (value, end) = self.string_literal(start)?;
                        (TokenKind::String, end, Some(value))
                    }
                }
                _ => {
                    let kind = self.operator(ch).ok_or_else(|| {
                        Diagnostic::new(
                            DiagnosticKind::Lexer,
                            format!("unexpected character `{ch}`"),
                        )
                        .with_span(self.span(start, self.current))
                    })?;
                    (kind, self.current, None)
                }
            };
            tokens.push(Token {
                kind,
                lexeme: lexeme.unwrap_or_else(|| self.source[start..end].to_string()),
                span: self.span(start, end),
                line_break_before,
            });
        }
        Ok(tokens)
    }

    fn operator(&mut self, ch: char) -> Option<TokenKind> {
        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '.' => {
                if self.match_next('.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            '+' => self.with_assign(TokenKind::Plus, TokenKind::PlusAssign),
            '-' => self.with_assign(TokenKind::Minus, TokenKind::MinusAssign),
            '*' => self.with_assign(TokenKind::Star, TokenKind::StarAssign),
            '/' => self.with_assign(TokenKind::Slash, TokenKind::SlashAssign),
            '%' => self.with_assign(TokenKind::Percent, TokenKind::PercentAssign),
            '^' => TokenKind::Caret,
            '=' => {
                if self.match_next('>') {
                    TokenKind::FatArrow
                } else if self.match_next('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Assign
                }
            }
            '!' => self.with_assign(TokenKind::Bang, TokenKind::BangEqual),
            '<' => self.with_assign(TokenKind::Less, TokenKind::LessEqual),
            '>' => self.with_assign(TokenKind::Greater, TokenKind::GreaterEqual),
            '&' if self.match_next('&') => TokenKind::DoubleAmpersand,
            '|' if self.match_next('|') => TokenKind::DoublePipe,
            _ => return None,
        };
        Some(kind)
    }

    fn with_assign(&mut self, plain: TokenKind, assign: TokenKind) -> TokenKind {
        if self.match_next('=') { assign } else { plain }
    }
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "if" => Kw::If,
        "else" => Kw::Else,
        "while" => Kw::While,
        "for" => Kw::For,
        "in" => Kw::In,
        "break" => Kw::Break,
        "return" => Kw::Return,
        "true" => Kw::True,
        "false" => Kw::False,
        "null" => Kw::Null,
        "struct" => Kw::Struct,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .expect("lexing should succeed")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn range_is_not_a_float() {
        assert_eq!(
            kinds("0..10"),
            vec![
                TokenKind::Number,
                TokenKind::DotDot,
                TokenKind::Number,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn trailing_dot_float() {
        let tokens = Lexer::new("3. 2.5").tokenize().unwrap();
        assert_eq!(tokens[0].lexeme, "3.");
        assert_eq!(tokens[1].lexeme, "2.5");
    }

    #[test]
    fn compound_operators() {
        assert_eq!(
            kinds("a += 1 b %= 2"),
            vec![
                TokenKind::Identifier,
                TokenKind::PlusAssign,
                TokenKind::Number,
                TokenKind::Identifier,
                TokenKind::PercentAssign,
                TokenKind::Number,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn caret_is_a_single_token() {
        assert_eq!(
            kinds("2^-1"),
            vec![
                TokenKind::Number,
                TokenKind::Caret,
                TokenKind::Minus,
                TokenKind::Number,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn hash_comments_are_skipped() {
        assert_eq!(
            kinds("x # comment\n# another\ny"),
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn tracks_line_breaks() {
        let tokens = Lexer::new("a\n(b)").tokenize().unwrap();
        assert!(!tokens[0].line_break_before);
        assert!(tokens[1].line_break_before);
        assert!(!tokens[2].line_break_before);
    }

    #[test]
    fn template_segments_carry_offsets() {
        let tokens = Lexer::new(r#"x = """a ${b + 1} c""""#).tokenize().unwrap();
        match &tokens[2].kind {
            TokenKind::Template(parts) => {
                assert_eq!(
                    parts,
                    &vec![
                        TemplatePart::Text("a ".into()),
                        TemplatePart::Code {
                            source: "b + 1".into(),
                            offset: 11,
                        },
                        TemplatePart::Text(" c".into()),
                    ]
                );
            }
            other => panic!("expected template, found {other:?}"),
        }
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new("\"abc").tokenize().unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::Lexer);
        assert_eq!(err.span, Some(SourceSpan::new(0, 4)));
    }

    #[test]
    fn unknown_character_is_an_error() {
        let err = Lexer::new("a @ b").tokenize().unwrap_err();
        assert!(err.message.contains('@'));
    }
}
