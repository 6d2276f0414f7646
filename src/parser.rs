use std::rc::Rc;

use crate::{
    ast::{
        BinaryOp, Expr, ExprKind, FunctionDecl, Literal, LogicalOp, Param, Program, Stmt,
        StmtKind, SuperclassRef, UnaryOp,
    },
    diagnostics::{Diagnostic, DiagnosticKind, SourceSpan},
    lexer::{Keyword, Lexer, Token, TokenKind},
};

const MAX_ARGUMENTS: usize = 255;

pub fn parse_program(source: &str) -> Result<Program, Diagnostic> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    fn parse_program(&mut self) -> Result<Program, Diagnostic> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.parse_declaration()?);
        }
        Ok(Program { statements })
    }

    fn parse_declaration(&mut self) -> Result<Stmt, Diagnostic> {
        if self.matches_keyword(Keyword::Class) {
            return self.parse_class();
        }
        if self.matches_keyword(Keyword::Fun) {
            let start = self.previous().span;
            let decl = self.parse_function("function")?;
            return Ok(Stmt {
                span: start.to(decl.span),
                kind: StmtKind::Function(decl),
            });
        }
        if self.matches_keyword(Keyword::Let) {
            return self.parse_let();
        }
        self.parse_statement()
    }

    fn parse_class(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.previous().span;
        let name = self.consume_identifier("Expect class name.")?;
        let superclass = if self.matches(TokenKind::Less) {
            let token = self.consume_identifier("Expect superclass name.")?;
            Some(SuperclassRef {
                name: token.lexeme,
                span: token.span,
            })
        } else {
            None
        };
        self.consume(TokenKind::LBrace, "Expect '{' before class body.")?;
        let mut methods = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            methods.push(self.parse_function("method")?);
        }
        let rbrace = self.consume(TokenKind::RBrace, "Expect '}' after class body.")?;
        Ok(Stmt {
            span: start.to(rbrace.span),
            kind: StmtKind::Class {
                name: name.lexeme,
                superclass,
                methods,
            },
        })
    }

    fn parse_function(&mut self, kind: &str) -> Result<Rc<FunctionDecl>, Diagnostic> {
        let name = self.consume_identifier(&format!("Expect {kind} name."))?;
        self.consume(
            TokenKind::LParen,
            &format!("Expect '(' after {kind} name."),
        )?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                if params.len() >= MAX_ARGUMENTS {
                    return Err(self.error_at_current("Can't have more than 255 parameters."));
                }
                let param = self.consume_identifier("Expect parameter name.")?;
                params.push(Param {
                    name: param.lexeme,
                    span: param.span,
                });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expect ')' after parameters.")?;
        self.consume(
            TokenKind::LBrace,
            &format!("Expect '{{' before {kind} body."),
        )?;
        let (body, end) = self.parse_block_items()?;
        Ok(Rc::new(FunctionDecl {
            name: name.lexeme,
            params,
            body,
            span: name.span.to(end),
        }))
    }

    fn parse_let(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.previous().span;
        let name = self.consume_identifier("Expect variable name.")?;
        let initializer = if self.matches(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let semicolon = self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        )?;
        Ok(Stmt {
            span: start.to(semicolon.span),
            kind: StmtKind::Let {
                name: name.lexeme,
                initializer,
            },
        })
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        if let TokenKind::Keyword(keyword) = self.peek().kind {
            match keyword {
                Keyword::For => return self.parse_for(),
                Keyword::If => return self.parse_if(),
                Keyword::Print => return self.parse_print(),
                Keyword::Return => return self.parse_return(),
                Keyword::While => return self.parse_while(),
                Keyword::Break => return self.parse_break(),
                _ => {}
            }
        }
        if self.matches(TokenKind::LBrace) {
            let start = self.previous().span;
            let (items, end) = self.parse_block_items()?;
            return Ok(Stmt {
                span: start.to(end),
                kind: StmtKind::Block(items),
            });
        }
        self.parse_expression_statement()
    }

    /// Parses declarations up to the closing `}`; the opening brace has
    /// already been consumed.
    fn parse_block_items(&mut self) -> Result<(Vec<Stmt>, SourceSpan), Diagnostic> {
        let mut items = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            items.push(self.parse_declaration()?);
        }
        let rbrace = self.consume(TokenKind::RBrace, "Expect '}' after block.")?;
        Ok((items, rbrace.span))
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        self.consume(TokenKind::LParen, "Expect '(' after 'for'.")?;
        let initializer = if self.matches(TokenKind::Semicolon) {
            None
        } else if self.matches_keyword(Keyword::Let) {
            Some(self.parse_let()?)
        } else {
            Some(self.parse_expression_statement()?)
        };
        let condition = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        let semicolon = self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.")?;
        let increment = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume(TokenKind::RParen, "Expect ')' after for clauses.")?;
        let mut body = self.parse_statement()?;
        let span = start.to(body.span);

        if let Some(increment) = increment {
            let increment_span = increment.span;
            body = Stmt {
                span: body.span,
                kind: StmtKind::Block(vec![
                    body,
                    Stmt {
                        span: increment_span,
                        kind: StmtKind::Expr(increment),
                    },
                ]),
            };
        }
        let condition = condition.unwrap_or(Expr {
            span: semicolon.span,
            kind: ExprKind::Literal(Literal::Bool(true)),
        });
        let mut desugared = Stmt {
            span,
            kind: StmtKind::While {
                condition,
                body: Box::new(body),
            },
        };
        if let Some(initializer) = initializer {
            desugared = Stmt {
                span,
                kind: StmtKind::Block(vec![initializer, desugared]),
            };
        }
        Ok(desugared)
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        self.consume(TokenKind::LParen, "Expect '(' after 'if'.")?;
        let condition = self.parse_expression()?;
        self.consume(TokenKind::RParen, "Expect ')' after if condition.")?;
        let then_branch = self.parse_statement()?;
        let else_branch = if self.matches_keyword(Keyword::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        let end = else_branch
            .as_ref()
            .map(|stmt| stmt.span)
            .unwrap_or(then_branch.span);
        Ok(Stmt {
            span: start.to(end),
            kind: StmtKind::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch,
            },
        })
    }

    fn parse_print(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        let value = self.parse_expression()?;
        let semicolon = self.consume(TokenKind::Semicolon, "Expect ';' after value.")?;
        Ok(Stmt {
            span: start.to(semicolon.span),
            kind: StmtKind::Print(value),
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        let value = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        let semicolon = self.consume(TokenKind::Semicolon, "Expect ';' after return value.")?;
        Ok(Stmt {
            span: start.to(semicolon.span),
            kind: StmtKind::Return(value),
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        self.consume(TokenKind::LParen, "Expect '(' after 'while'.")?;
        let condition = self.parse_expression()?;
        self.consume(TokenKind::RParen, "Expect ')' after condition.")?;
        let body = self.parse_statement()?;
        Ok(Stmt {
            span: start.to(body.span),
            kind: StmtKind::While {
                condition,
                body: Box::new(body),
            },
        })
    }

    fn parse_break(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        let semicolon = self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.")?;
        Ok(Stmt {
            span: start.to(semicolon.span),
            kind: StmtKind::Break,
        })
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let expr = self.parse_expression()?;
        let semicolon = self.consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
        Ok(Stmt {
            span: expr.span.to(semicolon.span),
            kind: StmtKind::Expr(expr),
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.parse_or()?;
        if self.matches(TokenKind::Assign) {
            let equals = self.previous().span;
            let value = self.parse_assignment()?;
            let span = expr.span.to(value.span);
            match expr.kind {
                ExprKind::Variable(name) => Ok(Expr {
                    span,
                    kind: ExprKind::Assign {
                        name,
                        value: Box::new(value),
                    },
                }),
                ExprKind::Get { object, name } => Ok(Expr {
                    span,
                    kind: ExprKind::Set {
                        object,
                        name,
                        value: Box::new(value),
                    },
                }),
                _ => Err(
                    Diagnostic::new(DiagnosticKind::Parser, "Invalid assignment target.")
                        .with_span(equals),
                ),
            }
        } else {
            Ok(expr)
        }
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_and()?;
        while self.matches_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            expr = logical(LogicalOp::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_equality()?;
        while self.matches_keyword(Keyword::And) {
            let right = self.parse_equality()?;
            expr = logical(LogicalOp::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_comparison()?;
        while let Some(op) = self.match_operator(&[
            (TokenKind::EqualEqual, BinaryOp::Equal),
            (TokenKind::BangEqual, BinaryOp::NotEqual),
        ]) {
            let right = self.parse_comparison()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_term()?;
        while let Some(op) = self.match_operator(&[
            (TokenKind::LessEqual, BinaryOp::LessEqual),
            (TokenKind::GreaterEqual, BinaryOp::GreaterEqual),
            (TokenKind::Less, BinaryOp::Less),
            (TokenKind::Greater, BinaryOp::Greater),
        ]) {
            let right = self.parse_term()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_factor()?;
        while let Some(op) = self.match_operator(&[
            (TokenKind::Plus, BinaryOp::Add),
            (TokenKind::Minus, BinaryOp::Sub),
        ]) {
            let right = self.parse_factor()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_unary()?;
        while let Some(op) = self.match_operator(&[
            (TokenKind::Star, BinaryOp::Mul),
            (TokenKind::Slash, BinaryOp::Div),
        ]) {
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
            return self.parse_call();
        };
        let operator = self.previous().span;
        let right = self.parse_unary()?;
        Ok(Expr {
            span: operator.to(right.span),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(right),
            },
        })
    }

    fn parse_call(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.matches(TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        if args.len() >= MAX_ARGUMENTS {
                            return Err(
                                self.error_at_current("Can't have more than 255 arguments.")
                            );
                        }
                        args.push(self.parse_expression()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let paren = self.consume(TokenKind::RParen, "Expect ')' after arguments.")?;
                expr = Expr {
                    span: expr.span.to(paren.span),
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
            } else if self.matches(TokenKind::Dot) {
                let name = self.consume_identifier("Expect property name after '.'.")?;
                expr = Expr {
                    span: expr.span.to(name.span),
                    kind: ExprKind::Get {
                        object: Box::new(expr),
                        name: name.lexeme,
                    },
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.peek().clone();
        let kind = match &token.kind {
            TokenKind::Keyword(Keyword::True) => ExprKind::Literal(Literal::Bool(true)),
            TokenKind::Keyword(Keyword::False) => ExprKind::Literal(Literal::Bool(false)),
            TokenKind::Keyword(Keyword::Nil) => ExprKind::Literal(Literal::Nil),
            TokenKind::Keyword(Keyword::This) => ExprKind::This,
            TokenKind::Number(value) => ExprKind::Literal(Literal::Number(*value)),
            TokenKind::String(value) => ExprKind::Literal(Literal::String(value.clone())),
            TokenKind::Identifier => ExprKind::Variable(token.lexeme.clone()),
            TokenKind::Keyword(Keyword::Super) => {
                self.advance();
                self.consume(TokenKind::Dot, "Expect '.' after 'super'.")?;
                let method = self.consume_identifier("Expect superclass method name.")?;
                return Ok(Expr {
                    span: token.span.to(method.span),
                    kind: ExprKind::Super {
                        method: method.lexeme,
                    },
                });
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                let rparen = self.consume(TokenKind::RParen, "Expect ')' after expression.")?;
                return Ok(Expr {
                    span: token.span.to(rparen.span),
                    kind: ExprKind::Group(Box::new(inner)),
                });
            }
            _ => return Err(self.error(&token, "Expect expression.")),
        };
        self.advance();
        Ok(Expr {
            span: token.span,
            kind,
        })
    }

    fn match_operator(&mut self, table: &[(TokenKind, BinaryOp)]) -> Option<BinaryOp> {
        for (kind, op) in table {
            if self.check(kind) {
                self.advance();
                return Some(*op);
            }
        }
        None
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(&kind) {
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
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error_at_current(message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        self.consume(TokenKind::Identifier, message)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        match (&self.peek().kind, kind) {
            (TokenKind::Number(_), TokenKind::Number(_)) => true,
            (TokenKind::String(_), TokenKind::String(_)) => true,
            (current, expected) => current == expected,
        }
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

    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with `Eof`.
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn error_at_current(&self, message: &str) -> Diagnostic {
        let token = self.peek();
        self.error(token, message)
    }

    fn error(&self, token: &Token, message: &str) -> Diagnostic {
        let location = if token.kind == TokenKind::Eof {
            "at end".to_string()
        } else {
            format!("at '{}'", token.lexeme)
        };
        Diagnostic::new(DiagnosticKind::Parser, message.to_string())
            .with_span(token.span)
            .with_note(location)
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

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr {
        span: left.span.to(right.span),
        kind: ExprKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}
