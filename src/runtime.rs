use std::{
    mem,
    rc::{Rc, Weak},
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    ast::{
        BinaryOp, Expr, ExprKind, FunctionDecl, Literal, LogicalOp, Program, Stmt, StmtKind,
        UnaryOp,
    },
    diagnostics::{Diagnostic, HootError, Result, RuntimeErrorKind, SourceSpan},
    environment::{Environment, EnvironmentRef},
    parser, resolver,
    scheduler::{ClockMode, Scheduler, TaskAction},
    stdlib,
    value::{arity_error, BoundMethod, Class, UserFunction, Value, ValueKind},
};

/// Bytes of stack that must remain before a call grows the stack.
const RED_ZONE: usize = 64 * 1024;
/// Size of each newly allocated stack segment.
const STACK_SEGMENT: usize = 2 * 1024 * 1024;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 2048;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Exec<T> = std::result::Result<T, Diagnostic>;

/// Run options for one interpreter.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub script_name: Option<String>,
    pub clock: ClockMode,
    pub request_timeout: Duration,
    pub max_call_depth: usize,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            script_name: None,
            clock: ClockMode::Real,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// Where `print` writes and where reported errors go.
#[derive(Debug, Clone)]
pub enum OutputSink {
    /// `print` to stdout, errors to stderr.
    Stdout,
    /// Keep printed lines in memory and errors only in `reported_errors`.
    Capture(String),
}

struct CallFrame {
    /// Class whose method body is executing, if any.
    class: Option<Rc<Class>>,
}

pub struct Interpreter {
    globals: EnvironmentRef,
    env: EnvironmentRef,
    frames: Vec<CallFrame>,
    scheduler: Scheduler,
    context: ExecutionContext,
    output: OutputSink,
    reported: Vec<Diagnostic>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_context(ExecutionContext::default())
    }

    pub fn with_context(context: ExecutionContext) -> Self {
        Self::with_output(context, OutputSink::Stdout)
    }

    /// An interpreter that records printed output instead of writing it.
    pub fn capturing(context: ExecutionContext) -> Self {
        Self::with_output(context, OutputSink::Capture(String::new()))
    }

    pub fn with_output(context: ExecutionContext, output: OutputSink) -> Self {
        let globals = Environment::new();
        stdlib::install(&globals);
        Self {
            env: Rc::clone(&globals),
            globals,
            frames: Vec::new(),
            scheduler: Scheduler::new(context.clock),
            context,
            output,
            reported: Vec::new(),
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Every runtime error reported so far, in order.
    pub fn reported_errors(&self) -> &[Diagnostic] {
        &self.reported
    }

    /// Captured output; empty when printing to stdout.
    pub fn output(&self) -> &str {
        match &self.output {
            OutputSink::Stdout => "",
            OutputSink::Capture(buffer) => buffer,
        }
    }

    pub fn take_output(&mut self) -> String {
        match &mut self.output {
            OutputSink::Stdout => String::new(),
            OutputSink::Capture(buffer) => mem::take(buffer),
        }
    }

    /// Parses, checks and runs `source`, then drains the event loop.
    /// Runtime errors are reported as they happen and returned together.
    pub fn eval_source(&mut self, source: &str) -> Result<()> {
        let program = parser::parse_program(source)?;
        resolver::resolve(&program)?;
        self.interpret(&program)
    }

    pub fn interpret(&mut self, program: &Program) -> Result<()> {
        debug!(
            script = self.context.script_name.as_deref().unwrap_or("<input>"),
            statements = program.statements.len(),
            "running program"
        );
        let first_new = self.reported.len();
        self.run_body(&program.statements);
        self.run_event_loop();
        let errors = self.reported[first_new..].to_vec();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HootError::Runtime(errors))
        }
    }

    fn run_body(&mut self, statements: &[Stmt]) {
        self.env = Rc::clone(&self.globals);
        self.frames.clear();
        for stmt in statements {
            match self.execute(stmt) {
                Ok(FlowControl::Next) => {}
                Ok(_) => break,
                Err(diagnostic) => {
                    self.report(diagnostic);
                    break;
                }
            }
        }
        self.env = Rc::clone(&self.globals);
    }

    /// Runs queued tasks until nothing is queued or pending.
    pub fn run_event_loop(&mut self) {
        while let Some(task) = self.scheduler.next_task() {
            self.env = Rc::clone(&self.globals);
            self.frames.clear();
            let outcome = match task.action {
                TaskAction::Call { callable, args } => self.call(&callable, args).map(|_| ()),
                TaskAction::Fail(diagnostic) => Err(diagnostic),
            };
            if let Err(diagnostic) = outcome {
                self.report(diagnostic);
            }
        }
        self.env = Rc::clone(&self.globals);
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        warn!(
            line = ?diagnostic.span.map(|span| span.line),
            kind = ?diagnostic.kind,
            "{}",
            diagnostic.message
        );
        if let OutputSink::Stdout = self.output {
            eprintln!("{diagnostic}");
        }
        self.reported.push(diagnostic);
    }

    fn emit(&mut self, text: String) {
        match &mut self.output {
            OutputSink::Stdout => println!("{text}"),
            OutputSink::Capture(buffer) => {
                buffer.push_str(&text);
                buffer.push('\n');
            }
        }
    }

    fn execute_all(&mut self, statements: &[Stmt]) -> Exec<FlowControl> {
        for stmt in statements {
            match self.execute(stmt)? {
                FlowControl::Next => {}
                other => return Ok(other),
            }
        }
        Ok(FlowControl::Next)
    }

    fn execute_block(&mut self, statements: &[Stmt], env: EnvironmentRef) -> Exec<FlowControl> {
        let previous = mem::replace(&mut self.env, env);
        let result = self.execute_all(statements);
        self.env = previous;
        result
    }

    fn execute(&mut self, stmt: &Stmt) -> Exec<FlowControl> {
        match &stmt.kind {
            StmtKind::Let { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::nil(),
                };
                self.env.borrow_mut().define(name.clone(), value);
                Ok(FlowControl::Next)
            }
            StmtKind::Function(decl) => {
                let function = self.closure(decl);
                self.env.borrow_mut().define(decl.name.clone(), function);
                Ok(FlowControl::Next)
            }
            StmtKind::Class {
                name,
                superclass,
                methods,
            } => {
                let superclass = match superclass {
                    Some(reference) => {
                        let value = Environment::get(&self.env, &reference.name, reference.span)?;
                        match &*value.0 {
                            ValueKind::Class(class) => Some(Rc::clone(class)),
                            _ => {
                                return Err(type_error("Superclass must be a class.")
                                    .with_span(reference.span));
                            }
                        }
                    }
                    None => None,
                };
                let closure = Rc::clone(&self.env);
                let class = Rc::new_cyclic(|home: &Weak<Class>| Class {
                    name: name.clone(),
                    superclass,
                    methods: methods
                        .iter()
                        .map(|decl| {
                            let method = UserFunction {
                                decl: Rc::clone(decl),
                                closure: Rc::clone(&closure),
                                home: Some(home.clone()),
                                is_initializer: decl.name == "init",
                            };
                            (decl.name.clone(), Rc::new(method))
                        })
                        .collect(),
                });
                self.env
                    .borrow_mut()
                    .define(name.clone(), Value::new(ValueKind::Class(class)));
                Ok(FlowControl::Next)
            }
            StmtKind::Expr(expr) => {
                self.evaluate(expr)?;
                Ok(FlowControl::Next)
            }
            StmtKind::Print(expr) => {
                let value = self.evaluate(expr)?;
                self.emit(value.to_string());
                Ok(FlowControl::Next)
            }
            StmtKind::Block(statements) => {
                let env = Environment::with_parent(Rc::clone(&self.env));
                self.execute_block(statements, env)
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(branch) = else_branch {
                    self.execute(branch)
                } else {
                    Ok(FlowControl::Next)
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute(body)? {
                        FlowControl::Next => {}
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::nil(),
                };
                Ok(FlowControl::Return(value))
            }
            StmtKind::Break => Ok(FlowControl::Break),
        }
    }

    /// Closes `decl` over the current scope. Functions nested in a method
    /// keep that method's class for `super`.
    fn closure(&self, decl: &Rc<FunctionDecl>) -> Value {
        let home = self
            .frames
            .last()
            .and_then(|frame| frame.class.as_ref())
            .map(Rc::downgrade);
        Value::new(ValueKind::Function(Rc::new(UserFunction {
            decl: Rc::clone(decl),
            closure: Rc::clone(&self.env),
            home,
            is_initializer: false,
        })))
    }

    fn evaluate(&mut self, expr: &Expr) -> Exec<Value> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(match literal {
                Literal::Number(n) => Value::number(*n),
                Literal::String(s) => Value::string(s.clone()),
                Literal::Bool(b) => Value::bool(*b),
                Literal::Nil => Value::nil(),
            }),
            ExprKind::Variable(name) => Environment::get(&self.env, name, expr.span),
            ExprKind::Assign { name, value } => {
                let value = self.evaluate(value)?;
                Environment::assign(&self.env, name, value.clone(), expr.span)?;
                Ok(value)
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                binary(*op, &left, &right).map_err(|err| err.with_span(expr.span))
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.evaluate(left)?;
                let short_circuits = match op {
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::And => !left.is_truthy(),
                };
                if short_circuits {
                    Ok(left)
                } else {
                    self.evaluate(right)
                }
            }
            ExprKind::Unary { op, expr: operand } => {
                let value = self.evaluate(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::bool(!value.is_truthy())),
                    UnaryOp::Negate => match value.as_number() {
                        Some(n) => Ok(Value::number(-n)),
                        None => {
                            Err(type_error("Operand must be a number.").with_span(expr.span))
                        }
                    },
                }
            }
            ExprKind::Call { callee, args } => {
                let callee = self.evaluate(callee)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.evaluate(arg)?);
                }
                self.call_at(&callee, values, expr.span)
                    .map_err(|err| err.or_span(expr.span))
            }
            ExprKind::Get { object, name } => {
                let object = self.evaluate(object)?;
                get_property(&object, name).map_err(|err| err.with_span(expr.span))
            }
            ExprKind::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object)?;
                let ValueKind::Instance(instance) = &*object.0 else {
                    return Err(type_error("Only instances have fields.").with_span(expr.span));
                };
                let value = self.evaluate(value)?;
                instance
                    .fields
                    .borrow_mut()
                    .insert(name.clone(), value.clone());
                Ok(value)
            }
            ExprKind::Group(inner) => self.evaluate(inner),
            ExprKind::This => Environment::get(&self.env, "this", expr.span),
            ExprKind::Super { method } => self.super_method(method, expr.span),
        }
    }

    /// Resolves `super.method` against the superclass of the class whose
    /// method body is running, not the receiver's class.
    fn super_method(&mut self, method: &str, span: SourceSpan) -> Exec<Value> {
        let superclass = self
            .frames
            .last()
            .and_then(|frame| frame.class.as_ref())
            .and_then(|class| class.superclass.clone())
            .ok_or_else(|| {
                type_error("Can't use 'super' in a class with no superclass.").with_span(span)
            })?;
        let receiver = Environment::get(&self.env, "this", span)?;
        let found = superclass.find_method(method).ok_or_else(|| {
            Diagnostic::runtime(
                RuntimeErrorKind::UndefinedProperty,
                format!("Undefined property '{method}'."),
            )
            .with_span(span)
        })?;
        Ok(bind(receiver, found))
    }

    /// Invokes `callee` with already evaluated arguments.
    pub fn call(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
    ) -> std::result::Result<Value, Diagnostic> {
        self.call_at(callee, args, SourceSpan::default())
    }

    fn call_at(&mut self, callee: &Value, args: Vec<Value>, span: SourceSpan) -> Exec<Value> {
        match &*callee.0 {
            ValueKind::Function(function) => self.call_function(function, args, None),
            ValueKind::BoundMethod(bound) => {
                self.call_function(&bound.method, args, Some(bound.receiver.clone()))
            }
            ValueKind::Class(class) => self.instantiate(class, args),
            ValueKind::Native(native) => {
                native.call(&args, &mut self.scheduler, &self.context, span)
            }
            _ => Err(type_error(format!(
                "Can only call functions and classes, not {}.",
                callee.type_name()
            ))),
        }
    }

    fn instantiate(&mut self, class: &Rc<Class>, args: Vec<Value>) -> Exec<Value> {
        let arity = class.arity();
        if args.len() != arity {
            return Err(arity_error(arity, args.len()));
        }
        let instance = Value::instance(Rc::clone(class));
        if let Some(init) = class.find_method("init") {
            self.call_function(&init, args, Some(instance.clone()))?;
        }
        Ok(instance)
    }

    fn call_function(
        &mut self,
        function: &Rc<UserFunction>,
        args: Vec<Value>,
        receiver: Option<Value>,
    ) -> Exec<Value> {
        if args.len() != function.arity() {
            return Err(arity_error(function.arity(), args.len()));
        }
        if self.frames.len() >= self.context.max_call_depth {
            return Err(Diagnostic::runtime(
                RuntimeErrorKind::StackOverflow,
                format!(
                    "Stack overflow: call depth exceeded {} in '{}'.",
                    self.context.max_call_depth,
                    function.name()
                ),
            ));
        }

        let env = Environment::with_parent(Rc::clone(&function.closure));
        {
            let mut scope = env.borrow_mut();
            if let Some(receiver) = &receiver {
                scope.define("this", receiver.clone());
            }
            for (param, arg) in function.decl.params.iter().zip(args) {
                scope.define(param.name.clone(), arg);
            }
        }

        self.frames.push(CallFrame {
            class: function.home_class(),
        });
        let previous = mem::replace(&mut self.env, env);
        let result = stacker::maybe_grow(RED_ZONE, STACK_SEGMENT, || {
            self.execute_all(&function.decl.body)
        });
        self.env = previous;
        self.frames.pop();

        let flow = result?;
        if function.is_initializer {
            return Ok(receiver.unwrap_or_else(Value::nil));
        }
        match flow {
            FlowControl::Return(value) => Ok(value),
            FlowControl::Next | FlowControl::Break => Ok(Value::nil()),
        }
    }
}

enum FlowControl {
    Next,
    Return(Value),
    Break,
}

fn type_error(message: impl Into<String>) -> Diagnostic {
    Diagnostic::runtime(RuntimeErrorKind::Type, message)
}

fn bind(receiver: Value, method: Rc<UserFunction>) -> Value {
    Value::new(ValueKind::BoundMethod(BoundMethod { receiver, method }))
}

/// Fields shadow methods; methods are looked up through the superclass chain.
fn get_property(object: &Value, name: &str) -> Exec<Value> {
    match &*object.0 {
        ValueKind::Instance(instance) => {
            let field = instance.fields.borrow().get(name).cloned();
            if let Some(field) = field {
                return Ok(field);
            }
            match instance.class.find_method(name) {
                Some(method) => Ok(bind(object.clone(), method)),
                None => Err(Diagnostic::runtime(
                    RuntimeErrorKind::UndefinedProperty,
                    format!("Undefined property '{name}'."),
                )),
            }
        }
        ValueKind::String(_) | ValueKind::List(_) | ValueKind::Map(_) => {
            stdlib::builtin_method(object, name).ok_or_else(|| {
                Diagnostic::runtime(
                    RuntimeErrorKind::UndefinedProperty,
                    format!("Can't call '{name}' on a {}.", object.type_name()),
                )
            })
        }
        _ => Err(type_error(format!(
            "Only instances have properties, not {}.",
            object.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Exec<Value> {
    use BinaryOp::*;
    match op {
        Equal => return Ok(Value::bool(left.equals(right))),
        NotEqual => return Ok(Value::bool(!left.equals(right))),
        Add => {
            if let (ValueKind::String(a), ValueKind::String(b)) = (&*left.0, &*right.0) {
                let joined = format!("{}{}", a.borrow(), b.borrow());
                return Ok(Value::string(joined));
            }
        }
        _ => {}
    }
    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        let message = if op == Add {
            "Operands must be two numbers or two strings.".to_string()
        } else {
            format!(
                "Operands of '{}' must be numbers, got {} and {}.",
                op.symbol(),
                left.type_name(),
                right.type_name()
            )
        };
        return Err(type_error(message));
    };
    Ok(match op {
        Add => Value::number(a + b),
        Sub => Value::number(a - b),
        Mul => Value::number(a * b),
        Div => Value::number(a / b),
        Less => Value::bool(a < b),
        LessEqual => Value::bool(a <= b),
        Greater => Value::bool(a > b),
        GreaterEqual => Value::bool(a >= b),
        Equal | NotEqual => Value::bool(false),
    })
}
