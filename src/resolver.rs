//! Static checks over a parsed program.
//!
//! Variable lookup stays dynamic; this pass only rejects programs that are
//! malformed in ways the parser cannot see (misplaced `return`, `this`,
//! `super` and `break`, duplicate locals, self-referencing initializers).

use std::collections::HashMap;

use crate::{
    ast::{Expr, ExprKind, FunctionDecl, Program, Stmt, StmtKind},
    diagnostics::{Diagnostic, DiagnosticKind, HootError, SourceSpan},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionContext {
    None,
    Function,
    Method,
    Initializer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassContext {
    None,
    Class,
    Subclass,
}

pub fn resolve(program: &Program) -> Result<(), HootError> {
    let mut resolver = Resolver::default();
    for stmt in &program.statements {
        resolver.statement(stmt);
    }
    if resolver.errors.is_empty() {
        Ok(())
    } else {
        Err(HootError::Resolve(resolver.errors))
    }
}

struct Resolver {
    /// Local scopes only; `false` marks a name declared but not yet initialized.
    scopes: Vec<HashMap<String, bool>>,
    function: FunctionContext,
    class: ClassContext,
    loop_depth: usize,
    errors: Vec<Diagnostic>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            scopes: Vec::new(),
            function: FunctionContext::None,
            class: ClassContext::None,
            loop_depth: 0,
            errors: Vec::new(),
        }
    }
}

impl Resolver {
    fn error(&mut self, span: SourceSpan, message: impl Into<String>) {
        self.errors
            .push(Diagnostic::new(DiagnosticKind::Resolve, message).with_span(span));
    }

    fn declare(&mut self, name: &str, span: SourceSpan) {
        let duplicate = match self.scopes.last_mut() {
            Some(scope) => scope.insert(name.to_string(), false).is_some(),
            None => false,
        };
        if duplicate {
            self.error(
                span,
                format!("Already a variable named '{name}' in this scope."),
            );
        }
    }

    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }

    fn with_scope(&mut self, body: impl FnOnce(&mut Self)) {
        self.scopes.push(HashMap::new());
        body(self);
        self.scopes.pop();
    }

    fn statement(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let { name, initializer } => {
                self.declare(name, stmt.span);
                if let Some(init) = initializer {
                    self.expression(init);
                }
                self.define(name);
            }
            StmtKind::Function(decl) => {
                self.declare(&decl.name, decl.span);
                self.define(&decl.name);
                self.function(decl, FunctionContext::Function);
            }
            StmtKind::Class {
                name,
                superclass,
                methods,
            } => {
                let enclosing = self.class;
                self.class = ClassContext::Class;
                self.declare(name, stmt.span);
                self.define(name);

                if let Some(superclass) = superclass {
                    if superclass.name == *name {
                        self.error(superclass.span, "A class can't inherit from itself.");
                    }
                    self.class = ClassContext::Subclass;
                    self.variable(&superclass.name, superclass.span);
                }

                for method in methods {
                    let context = if method.name == "init" {
                        FunctionContext::Initializer
                    } else {
                        FunctionContext::Method
                    };
                    self.function(method, context);
                }
                self.class = enclosing;
            }
            StmtKind::Expr(expr) | StmtKind::Print(expr) => self.expression(expr),
            StmtKind::Block(statements) => self.with_scope(|this| {
                for stmt in statements {
                    this.statement(stmt);
                }
            }),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expression(condition);
                self.statement(then_branch);
                if let Some(branch) = else_branch {
                    self.statement(branch);
                }
            }
            StmtKind::While { condition, body } => {
                self.expression(condition);
                self.loop_depth += 1;
                self.statement(body);
                self.loop_depth -= 1;
            }
            StmtKind::Return(value) => {
                if self.function == FunctionContext::None {
                    self.error(stmt.span, "Can't return from top-level code.");
                }
                if let Some(value) = value {
                    if self.function == FunctionContext::Initializer {
                        self.error(stmt.span, "Can't return a value from an initializer.");
                    }
                    self.expression(value);
                }
            }
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.error(stmt.span, "Can't break outside of a loop.");
                }
            }
        }
    }

    fn function(&mut self, decl: &FunctionDecl, context: FunctionContext) {
        let enclosing_function = self.function;
        let enclosing_loops = self.loop_depth;
        self.function = context;
        self.loop_depth = 0;
        self.with_scope(|this| {
            for param in &decl.params {
                this.declare(&param.name, param.span);
                this.define(&param.name);
            }
            for stmt in &decl.body {
                this.statement(stmt);
            }
        });
        self.function = enclosing_function;
        self.loop_depth = enclosing_loops;
    }

    fn variable(&mut self, name: &str, span: SourceSpan) {
        let uninitialized = self
            .scopes
            .last()
            .and_then(|scope| scope.get(name))
            .is_some_and(|defined| !defined);
        if uninitialized {
            self.error(
                span,
                "Can't read local variable in its own initializer.",
            );
        }
    }

    fn expression(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal(_) => {}
            ExprKind::Variable(name) => self.variable(name, expr.span),
            ExprKind::Assign { value, .. } => self.expression(value),
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                self.expression(left);
                self.expression(right);
            }
            ExprKind::Unary { expr: inner, .. } | ExprKind::Group(inner) => {
                self.expression(inner)
            }
            ExprKind::Call { callee, args } => {
                self.expression(callee);
                for arg in args {
                    self.expression(arg);
                }
            }
            ExprKind::Get { object, .. } => self.expression(object),
            ExprKind::Set { object, value, .. } => {
                self.expression(value);
                self.expression(object);
            }
            ExprKind::This => {
                if self.class == ClassContext::None {
                    self.error(expr.span, "Can't use 'this' outside of a class.");
                }
            }
            ExprKind::Super { .. } => match self.class {
                ClassContext::None => {
                    self.error(expr.span, "Can't use 'super' outside of a class.")
                }
                ClassContext::Class => self.error(
                    expr.span,
                    "Can't use 'super' in a class with no superclass.",
                ),
                ClassContext::Subclass => {}
            },
        }
    }
}
