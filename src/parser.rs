use std::rc::Rc;

use crate::{
    ast::{BinaryOp, Expr, ExprKind, Literal, Program, Stmt, StmtKind, TemplateSegment, UnaryOp},
    diagnostics::{Diagnostic, DiagnosticKind, SourceSpan},
    lexer::{Keyword, Lexer, TemplatePart, Token, TokenKind},
    stack::ensure_sufficient_stack,
};

/// Deepest allowed nesting of groups, blocks and prefix operators.
pub const MAX_NESTING: usize = 4_096;

/// Parses a whole script. Fails on the first syntax error; nothing is
/// evaluated on failure.
pub fn parse_program(source: &str) -> Result<Program, Diagnostic> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

/// Parses an `${...}` template segment lexed at `offset` in the full input.
fn parse_fragment(source: &str, offset: usize, depth: usize) -> Result<Expr, Diagnostic> {
    let tokens = Lexer::with_offset(source, offset).tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.depth = depth;
    let expr = parser.parse_expression()?;
    if !parser.check(TokenKind::Eof) {
        let token = parser.advance();
        return Err(parser.error(&token, "unexpected token in interpolation"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            depth: 0,
        }
    }

    /// Runs one level of recursive descent, refusing to go past
    /// [`MAX_NESTING`].
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, Diagnostic>,
    ) -> Result<T, Diagnostic> {
        if self.depth >= MAX_NESTING {
            let message = format!("nesting exceeds the limit of {MAX_NESTING} levels");
            return Err(self
                .peek()
                .map(|tok| self.error(tok, &message))
                .unwrap_or_else(|| self.error_eof(&message)));
        }
        self.depth += 1;
        let result = ensure_sufficient_stack(|| f(self));
        self.depth -= 1;
        result
    }

    fn parse_program(&mut self) -> Result<Program, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(TokenKind::Eof) {
            items.push(self.parse_statement()?);
        }
        Ok(Program { items })
    }

    fn parse_block_items(&mut self, terminator: TokenKind) -> Result<Vec<Stmt>, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(terminator.clone()) && !self.check(TokenKind::Eof) {
            items.push(self.parse_statement()?);
        }
        self.consume(terminator, "expected `}` to close block")?;
        Ok(items)
    }

    fn parse_block(&mut self) -> Result<(Vec<Stmt>, SourceSpan), Diagnostic> {
        let lbrace = self.consume(TokenKind::LBrace, "expected `{` to start block")?;
        let items = self.nested(|parser| parser.parse_block_items(TokenKind::RBrace))?;
        let end = self.previous().span.end;
        Ok((
            items,
            SourceSpan {
                start: lbrace.span.start,
                end,
            },
        ))
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let stmt = match self.peek().map(|token| &token.kind) {
            Some(TokenKind::Keyword(Keyword::If)) => self.parse_if()?,
            Some(TokenKind::Keyword(Keyword::While)) => self.parse_while()?,
            Some(TokenKind::Keyword(Keyword::For)) => self.parse_for()?,
            Some(TokenKind::Keyword(Keyword::Break)) => {
                let token = self.advance();
                Stmt {
                    kind: StmtKind::Break,
                    span: token.span,
                }
            }
            Some(TokenKind::Keyword(Keyword::Return)) => self.parse_return()?,
            Some(TokenKind::LBrace) => {
                let (items, span) = self.parse_block()?;
                Stmt {
                    kind: StmtKind::Block(items),
                    span,
                }
            }
            _ => {
                let expr = self.parse_expression()?;
                Stmt {
                    span: expr.span,
                    kind: StmtKind::Expr(expr),
                }
            }
        };
        self.consume_optional_semicolon();
        Ok(stmt)
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::If)?.span.start;
        let condition = self.parse_expression()?;
        let (then_branch, then_span) = self.parse_block()?;
        let mut end = then_span.end;
        let else_branch = if self.matches_keyword(Keyword::Else) {
            if self.check(TokenKind::Keyword(Keyword::If)) {
                let else_if = self.parse_if()?;
                end = else_if.span.end;
                Some(vec![else_if])
            } else {
                let (branch, span) = self.parse_block()?;
                end = span.end;
                Some(branch)
            }
        } else {
            None
        };
        Ok(Stmt {
            span: SourceSpan { start, end },
            kind: StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::While)?.span.start;
        let condition = self.parse_expression()?;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: SourceSpan {
                start,
                end: span.end,
            },
            kind: StmtKind::While { condition, body },
        })
    }

    /// `for item in xs { .. }`, `for index, item in xs { .. }`, and either
    /// header wrapped in parentheses.
    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::For)?.span.start;
        let parenthesized = self.matches(TokenKind::LParen);
        let first = self.consume_identifier("expected loop variable after `for`")?;
        let (index, binding) = if self.matches(TokenKind::Comma) {
            let item = self.consume_identifier("expected loop variable after `,`")?;
            if item.lexeme == first.lexeme {
                return Err(self.error(
                    &item,
                    &format!("duplicate loop variable `{}`", item.lexeme),
                ));
            }
            (Some(first.lexeme), item)
        } else {
            (None, first)
        };
        self.consume_keyword(Keyword::In)?;
        let iterable = self.parse_expression()?;
        if parenthesized {
            self.consume(TokenKind::RParen, "expected `)` after loop header")?;
        }
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: SourceSpan {
                start,
                end: span.end,
            },
            kind: StmtKind::For {
                index,
                binding: binding.lexeme,
                iterable,
                body,
            },
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.consume_keyword(Keyword::Return)?;
        let ends_here = match self.peek() {
            Some(next) => {
                next.line_break_before
                    || matches!(
                        next.kind,
                        TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
                    )
            }
            None => true,
        };
        let expr = if ends_here {
            None
        } else {
            Some(self.parse_expression()?)
        };
        let end = expr.as_ref().map(|e| e.span.end).unwrap_or(token.span.end);
        Ok(Stmt {
            span: SourceSpan {
                start: token.span.start,
                end,
            },
            kind: StmtKind::Return(expr),
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        self.nested(Self::parse_assignment)
    }

    fn parse_assignment(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.parse_or()?;
        let op = match self.peek().map(|token| &token.kind) {
            Some(TokenKind::Assign) => None,
            Some(TokenKind::PlusAssign) => Some(BinaryOp::Add),
            Some(TokenKind::MinusAssign) => Some(BinaryOp::Sub),
            Some(TokenKind::StarAssign) => Some(BinaryOp::Mul),
            Some(TokenKind::SlashAssign) => Some(BinaryOp::Div),
            Some(TokenKind::PercentAssign) => Some(BinaryOp::Mod),
            _ => return Ok(expr),
        };
        let operator = self.advance();
        if !is_assignable(&expr) {
            return Err(
                Diagnostic::new(DiagnosticKind::Parser, "invalid assignment target")
                    .with_span(expr.span.to(operator.span))
                    .with_note("only variables and their indexes or fields can be assigned"),
            );
        }
        let value = self.parse_assignment()?;
        Ok(Expr {
            span: expr.span.to(value.span),
            kind: ExprKind::Assign {
                target: Box::new(expr),
                op,
                value: Box::new(value),
            },
        })
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_and()?;
        while self.matches(TokenKind::DoublePipe) {
            let right = self.parse_and()?;
            expr = binary(BinaryOp::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_equality()?;
        while self.matches(TokenKind::DoubleAmpersand) {
            let right = self.parse_equality()?;
            expr = binary(BinaryOp::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = if self.matches(TokenKind::EqualEqual) {
                BinaryOp::Equal
            } else if self.matches(TokenKind::BangEqual) {
                BinaryOp::NotEqual
            } else {
                break;
            };
            let right = self.parse_comparison()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_range()?;
        while let Some(op) = if self.matches(TokenKind::LessEqual) {
            Some(BinaryOp::LessEqual)
        } else if self.matches(TokenKind::GreaterEqual) {
            Some(BinaryOp::GreaterEqual)
        } else if self.matches(TokenKind::Less) {
            Some(BinaryOp::Less)
        } else if self.matches(TokenKind::Greater) {
            Some(BinaryOp::Greater)
        } else {
            None
        } {
            let right = self.parse_range()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_range(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.parse_term()?;
        if !self.matches(TokenKind::DotDot) {
            return Ok(start);
        }
        let end = self.parse_term()?;
        if self.check(TokenKind::DotDot) {
            let token = self.advance();
            return Err(self.error(&token, "range expressions cannot be chained"));
        }
        Ok(Expr {
            span: start.span.to(end.span),
            kind: ExprKind::Range {
                start: Box::new(start),
                end: Box::new(end),
            },
        })
    }

    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = if self.matches(TokenKind::Plus) {
                BinaryOp::Add
            } else if self.matches(TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_factor()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = if self.matches(TokenKind::Star) {
                BinaryOp::Mul
            } else if self.matches(TokenKind::Slash) {
                BinaryOp::Div
            } else if self.matches(TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.parse_unary()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let op = if self.matches(TokenKind::Minus) {
            UnaryOp::Negate
        } else if self.matches(TokenKind::Bang) {
            UnaryOp::Not
        } else {
            return self.parse_power();
        };
        let operator = self.previous().span;
        let right = self.nested(Self::parse_unary)?;
        Ok(Expr {
            span: operator.to(right.span),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(right),
            },
        })
    }

    /// `^` binds tighter than prefix operators on its left and is right
    /// associative: `-2^2` is `-(2^2)`, `2^-1` and `2^3^2` parse naturally.
    fn parse_power(&mut self) -> Result<Expr, Diagnostic> {
        let base = self.parse_call()?;
        if !self.matches(TokenKind::Caret) {
            return Ok(base);
        }
        let exponent = self.nested(Self::parse_unary)?;
        Ok(binary(BinaryOp::Pow, base, exponent))
    }

    fn parse_call(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check_same_line(TokenKind::LParen) {
                self.advance();
                let args = self.parse_comma_list(TokenKind::RParen, Self::parse_expression)?;
                let paren = self.consume(TokenKind::RParen, "expected `)` after arguments")?;
                expr = Expr {
                    span: expr.span.to(paren.span),
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
            } else if self.check_same_line(TokenKind::LBracket) {
                self.advance();
                let index = self.parse_expression()?;
                let bracket = self.consume(TokenKind::RBracket, "expected `]` after index")?;
                expr = Expr {
                    span: expr.span.to(bracket.span),
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                };
            } else if self.matches(TokenKind::Dot) {
                let ident = self.consume_identifier("expected field name after `.`")?;
                expr = Expr {
                    span: expr.span.to(ident.span),
                    kind: ExprKind::Field {
                        target: Box::new(expr),
                        field: ident.lexeme,
                    },
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_eof("unexpected end of expression"));
        };
        let literal = |kind| Expr {
            span: token.span,
            kind: ExprKind::Literal(kind),
        };
        match &token.kind {
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(literal(Literal::Bool(true)))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(literal(Literal::Bool(false)))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(literal(Literal::Null))
            }
            TokenKind::Number => {
                self.advance();
                Ok(literal(self.number_literal(&token)?))
            }
            TokenKind::String => {
                self.advance();
                Ok(literal(Literal::String(token.lexeme.clone())))
            }
            TokenKind::Template(parts) => {
                self.advance();
                let mut segments = Vec::with_capacity(parts.len());
                for part in parts {
                    segments.push(match part {
                        TemplatePart::Text(text) => TemplateSegment::Text(text.clone()),
                        TemplatePart::Code { source, offset } => {
                            TemplateSegment::Expr(parse_fragment(source, *offset, self.depth)?)
                        }
                    });
                }
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::Template(segments),
                })
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::Variable(token.lexeme.clone()),
                })
            }
            TokenKind::Keyword(Keyword::Struct) => self.parse_struct_literal(),
            TokenKind::LParen if self.looks_like_lambda() => self.parse_lambda(),
            TokenKind::LParen => {
                let lparen = self.advance();
                let inner = self.parse_expression()?;
                let rparen = self.consume(TokenKind::RParen, "expected `)` after expression")?;
                Ok(Expr {
                    span: lparen.span.to(rparen.span),
                    kind: ExprKind::Group(Box::new(inner)),
                })
            }
            TokenKind::LBracket => {
                let lbracket = self.advance();
                let elements = self.parse_comma_list(TokenKind::RBracket, Self::parse_expression)?;
                let rbracket =
                    self.consume(TokenKind::RBracket, "expected `]` after array literal")?;
                Ok(Expr {
                    span: lbracket.span.to(rbracket.span),
                    kind: ExprKind::ArrayLiteral(elements),
                })
            }
            TokenKind::Eof => Err(self.error(&token, "unexpected end of input")),
            _ => Err(self.error(
                &token,
                &format!("unexpected token `{}` in expression", token.lexeme),
            )),
        }
    }

    fn number_literal(&self, token: &Token) -> Result<Literal, Diagnostic> {
        let digits = token.lexeme.replace('_', "");
        if digits.contains(['.', 'e', 'E']) {
            digits
                .parse()
                .map(Literal::Float)
                .map_err(|_| self.error(token, "invalid float literal"))
        } else {
            digits
                .parse()
                .map(Literal::Int)
                .map_err(|_| self.error(token, "integer literal out of range"))
        }
    }

    fn parse_struct_literal(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.consume_keyword(Keyword::Struct)?.span.start;
        self.consume(TokenKind::LBrace, "expected `{` after `struct`")?;
        let mut fields: Vec<(String, Expr)> = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let name = self.consume_identifier("expected field name in struct literal")?;
            if fields.iter().any(|(existing, _)| *existing == name.lexeme) {
                return Err(self.error(
                    &name,
                    &format!("duplicate field `{}` in struct literal", name.lexeme),
                ));
            }
            self.consume(TokenKind::Colon, "expected `:` after field name")?;
            let value = self.parse_expression()?;
            fields.push((name.lexeme, value));
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after struct fields")?;
        Ok(Expr {
            span: SourceSpan {
                start,
                end: rbrace.span.end,
            },
            kind: ExprKind::StructLiteral(fields),
        })
    }

    /// `(` already peeked: decides between a parenthesized expression and
    /// an arrow function by scanning for `(ident, ...) =>`.
    fn looks_like_lambda(&self) -> bool {
        let mut idx = self.current + 1;
        let kind_at = |idx: usize| self.tokens.get(idx).map(|token| &token.kind);
        loop {
            match kind_at(idx) {
                Some(TokenKind::RParen) => break,
                Some(TokenKind::Identifier) => {
                    idx += 1;
                    match kind_at(idx) {
                        Some(TokenKind::Comma) => idx += 1,
                        Some(TokenKind::RParen) => break,
                        _ => return false,
                    }
                }
                _ => return false,
            }
        }
        matches!(kind_at(idx + 1), Some(TokenKind::FatArrow))
    }

    fn parse_lambda(&mut self) -> Result<Expr, Diagnostic> {
        let lparen = self.consume(TokenKind::LParen, "expected `(` to start function")?;
        let params = self.parse_comma_list(TokenKind::RParen, |parser| {
            parser
                .consume_identifier("expected parameter name")
                .map(|token| token.lexeme)
        })?;
        for (idx, name) in params.iter().enumerate() {
            if params[..idx].contains(name) {
                return Err(Diagnostic::new(
                    DiagnosticKind::Parser,
                    format!("duplicate parameter `{name}`"),
                )
                .with_span(lparen.span));
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        self.consume(TokenKind::FatArrow, "expected `=>` after parameters")?;
        let (body, span) = self.parse_block()?;
        Ok(Expr {
            span: lparen.span.to(span),
            kind: ExprKind::Lambda {
                params,
                body: Rc::from(body),
            },
        })
    }

    /// Comma separated items up to (not including) `terminator`; a trailing
    /// comma is accepted.
    fn parse_comma_list<T>(
        &mut self,
        terminator: TokenKind,
        mut item: impl FnMut(&mut Self) -> Result<T, Diagnostic>,
    ) -> Result<Vec<T>, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(terminator.clone()) {
            items.push(item(self)?);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn consume_optional_semicolon(&mut self) {
        let _ = self.matches(TokenKind::Semicolon);
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        self.matches(TokenKind::Keyword(keyword))
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self
                .peek()
                .map(|tok| self.error(tok, message))
                .unwrap_or_else(|| self.error_eof(message)))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<Token, Diagnostic> {
        let message = format!("expected keyword `{}`", format!("{keyword:?}").to_lowercase());
        self.consume(TokenKind::Keyword(keyword), &message)
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        self.consume(TokenKind::Identifier, message)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|token| token.kind == kind)
    }

    /// Like `check`, but a token that starts a new line does not count.
    fn check_same_line(&self, kind: TokenKind) -> bool {
        self.peek()
            .is_some_and(|token| token.kind == kind && !token.line_break_before)
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous().clone()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Eof) | None)
    }

    fn error(&self, token: &Token, message: &str) -> Diagnostic {
        let message = if token.kind == TokenKind::Eof {
            format!("{message} (found end of input)")
        } else {
            message.to_string()
        };
        Diagnostic::new(DiagnosticKind::Parser, message).with_span(token.span)
    }

    fn error_eof(&self, message: &str) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::Parser, message.to_string())
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr {
        span: left.span.to(right.span),
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

/// Variables, and index/field chains rooted at a variable.
fn is_assignable(expr: &Expr) -> bool {
    let mut cursor = expr;
    loop {
        match &cursor.kind {
            ExprKind::Variable(_) => return true,
            ExprKind::Index { target, .. } | ExprKind::Field { target, .. } => cursor = target,
            _ => return false,
        }
    }
}
