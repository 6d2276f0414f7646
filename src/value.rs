use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;
use ordered_float::OrderedFloat;

use crate::{
    ast::FunctionDecl,
    diagnostics::{Diagnostic, RuntimeErrorKind, SourceSpan},
    environment::EnvironmentRef,
    runtime::ExecutionContext,
    scheduler::Scheduler,
};

#[derive(Clone)]
pub struct Value(pub Rc<ValueKind>);

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn nil() -> Self {
        Self::new(ValueKind::Nil)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn number(value: f64) -> Self {
        Self::new(ValueKind::Number(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::String(RefCell::new(value.into())))
    }

    pub fn list(values: Vec<Value>) -> Self {
        Self::new(ValueKind::List(RefCell::new(values)))
    }

    pub fn map(entries: MapEntries) -> Self {
        Self::new(ValueKind::Map(RefCell::new(entries)))
    }

    pub fn instance(class: Rc<Class>) -> Self {
        Self::new(ValueKind::Instance(Instance {
            class,
            fields: RefCell::new(IndexMap::new()),
        }))
    }

    pub fn is_nil(&self) -> bool {
        matches!(&*self.0, ValueKind::Nil)
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(&*self.0, ValueKind::Nil | ValueKind::Bool(false))
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            &*self.0,
            ValueKind::Function(_)
                | ValueKind::BoundMethod(_)
                | ValueKind::Class(_)
                | ValueKind::Native(_)
        )
    }

    pub fn as_number(&self) -> Option<f64> {
        match &*self.0 {
            ValueKind::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &*self.0 {
            ValueKind::Nil => "nil",
            ValueKind::Bool(_) => "boolean",
            ValueKind::Number(_) => "number",
            ValueKind::String(_) => "string",
            ValueKind::List(_) => "list",
            ValueKind::Map(_) => "map",
            ValueKind::Function(_) | ValueKind::BoundMethod(_) => "function",
            ValueKind::Class(_) => "class",
            ValueKind::Instance(_) => "instance",
            ValueKind::Native(_) => "native function",
        }
    }

    /// Value equality for nil, booleans, numbers and strings; identity for
    /// everything else.
    pub fn equals(&self, other: &Value) -> bool {
        match (&*self.0, &*other.0) {
            (ValueKind::Nil, ValueKind::Nil) => true,
            (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
            (ValueKind::Number(a), ValueKind::Number(b)) => a == b,
            (ValueKind::String(a), ValueKind::String(b)) => *a.borrow() == *b.borrow(),
            _ => Rc::ptr_eq(&self.0, &other.0),
        }
    }

    pub fn map_key(&self) -> MapKey {
        match &*self.0 {
            ValueKind::Nil => MapKey::Nil,
            ValueKind::Bool(b) => MapKey::Bool(*b),
            ValueKind::Number(n) => MapKey::Number(OrderedFloat(*n)),
            ValueKind::String(s) => MapKey::String(s.borrow().clone()),
            _ => MapKey::Identity(Rc::as_ptr(&self.0) as *const () as usize),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

/// Hashable projection of a map key. Identity keys stay valid because the
/// map entry keeps the key value alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Nil,
    Bool(bool),
    Number(OrderedFloat<f64>),
    String(String),
    Identity(usize),
}

pub type MapEntries = IndexMap<MapKey, (Value, Value)>;

pub enum ValueKind {
    Nil,
    Bool(bool),
    Number(f64),
    String(RefCell<String>),
    List(RefCell<Vec<Value>>),
    Map(RefCell<MapEntries>),
    Function(Rc<UserFunction>),
    BoundMethod(BoundMethod),
    Class(Rc<Class>),
    Instance(Instance),
    Native(NativeFunction),
}

/// A declaration closed over the environment it was created in.
pub struct UserFunction {
    pub decl: Rc<FunctionDecl>,
    pub closure: EnvironmentRef,
    /// Class whose body lexically encloses this function, used for `super`.
    pub home: Option<Weak<Class>>,
    pub is_initializer: bool,
}

impl UserFunction {
    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn arity(&self) -> usize {
        self.decl.params.len()
    }

    pub fn home_class(&self) -> Option<Rc<Class>> {
        self.home.as_ref().and_then(Weak::upgrade)
    }
}

pub struct Class {
    pub name: String,
    pub superclass: Option<Rc<Class>>,
    pub methods: IndexMap<String, Rc<UserFunction>>,
}

impl Class {
    /// Looks `name` up on this class, then on each ancestor in turn.
    pub fn find_method(&self, name: &str) -> Option<Rc<UserFunction>> {
        if let Some(method) = self.methods.get(name) {
            return Some(Rc::clone(method));
        }
        self.superclass
            .as_ref()
            .and_then(|superclass| superclass.find_method(name))
    }

    /// Constructor arity: that of `init` when one is inherited, zero otherwise.
    pub fn arity(&self) -> usize {
        self.find_method("init")
            .map(|init| init.arity())
            .unwrap_or(0)
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub fields: RefCell<IndexMap<String, Value>>,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub method: Rc<UserFunction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Variadic,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Exact(expected) => *expected == count,
            Arity::Variadic => true,
        }
    }
}

/// Everything a native needs while it runs: its arguments, the receiver for
/// built-in methods, and the scheduler for deferred work.
pub struct NativeCall<'a> {
    pub receiver: Option<&'a Value>,
    pub args: &'a [Value],
    pub scheduler: &'a mut Scheduler,
    pub context: &'a ExecutionContext,
    pub span: SourceSpan,
}

pub type NativeFn = fn(NativeCall<'_>) -> Result<Value, Diagnostic>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: Arity,
    pub receiver: Option<Value>,
    pub callback: NativeFn,
}

impl NativeFunction {
    pub fn call(
        &self,
        args: &[Value],
        scheduler: &mut Scheduler,
        context: &ExecutionContext,
        span: SourceSpan,
    ) -> Result<Value, Diagnostic> {
        if !self.arity.accepts(args.len()) {
            let expected = match self.arity {
                Arity::Exact(n) => n,
                Arity::Variadic => args.len(),
            };
            return Err(arity_error(expected, args.len()).with_span(span));
        }
        (self.callback)(NativeCall {
            receiver: self.receiver.as_ref(),
            args,
            scheduler,
            context,
            span,
        })
    }
}

pub fn arity_error(expected: usize, received: usize) -> Diagnostic {
    Diagnostic::runtime(
        RuntimeErrorKind::Arity,
        format!("Expected {expected} arguments but got {received}."),
    )
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::String(s) => write!(f, "{:?}", s.borrow()),
            _ => write!(f, "{self}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.display(f, &mut Vec::new())
    }
}

impl Value {
    /// Writes the display form; `open` holds the containers currently being
    /// written so a self-containing list or map prints `[...]` or `{...}`.
    fn display(
        &self,
        f: &mut fmt::Formatter<'_>,
        open: &mut Vec<*const ValueKind>,
    ) -> fmt::Result {
        let this = Rc::as_ptr(&self.0);
        match &*self.0 {
            ValueKind::Nil => write!(f, "nil"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Number(n) => write!(f, "{n}"),
            ValueKind::String(s) => write!(f, "{}", s.borrow()),
            ValueKind::List(_) if open.contains(&this) => write!(f, "[...]"),
            ValueKind::Map(_) if open.contains(&this) => write!(f, "{{...}}"),
            ValueKind::List(values) => {
                open.push(this);
                write!(f, "[")?;
                for (idx, value) in values.borrow().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    value.display(f, open)?;
                }
                open.pop();
                write!(f, "]")
            }
            ValueKind::Map(map) => {
                open.push(this);
                write!(f, "{{")?;
                for (idx, (key, value)) in map.borrow().values().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    key.display(f, open)?;
                    write!(f, ": ")?;
                    value.display(f, open)?;
                }
                open.pop();
                write!(f, "}}")
            }
            ValueKind::Function(fun) => write!(f, "<fn {}>", fun.name()),
            ValueKind::BoundMethod(bound) => write!(f, "<fn {}>", bound.method.name()),
            ValueKind::Class(class) => write!(f, "{}", class.name),
            ValueKind::Instance(instance) => write!(f, "<{} instance>", instance.class.name),
            ValueKind::Native(fun) => write!(f, "<native fn {}>", fun.name),
        }
    }
}
