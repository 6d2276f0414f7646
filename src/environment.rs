use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::{Diagnostic, RuntimeErrorKind, SourceSpan},
    value::Value,
};

pub type EnvironmentRef = Rc<RefCell<Environment>>;

/// One lexical scope. Closures keep their defining scope alive through the
/// shared parent link.
#[derive(Default)]
pub struct Environment {
    parent: Option<EnvironmentRef>,
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_parent(parent: EnvironmentRef) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: Some(parent),
            bindings: IndexMap::new(),
        }))
    }

    /// Declares `name` in this scope, replacing any previous binding here.
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    /// Rebinds the nearest existing `name`, walking outward.
    pub fn assign(
        env: &EnvironmentRef,
        name: &str,
        value: Value,
        span: SourceSpan,
    ) -> Result<(), Diagnostic> {
        let mut current = Rc::clone(env);
        loop {
            let parent = {
                let mut scope = current.borrow_mut();
                if let Some(slot) = scope.bindings.get_mut(name) {
                    *slot = value;
                    return Ok(());
                }
                scope.parent.clone()
            };
            match parent {
                Some(parent) => current = parent,
                None => return Err(undefined(name, span)),
            }
        }
    }

    pub fn get(env: &EnvironmentRef, name: &str, span: SourceSpan) -> Result<Value, Diagnostic> {
        let mut current = Rc::clone(env);
        loop {
            let parent = {
                let scope = current.borrow();
                if let Some(value) = scope.bindings.get(name) {
                    return Ok(value.clone());
                }
                scope.parent.clone()
            };
            match parent {
                Some(parent) => current = parent,
                None => return Err(undefined(name, span)),
            }
        }
    }
}

fn undefined(name: &str, span: SourceSpan) -> Diagnostic {
    Diagnostic::runtime(
        RuntimeErrorKind::UndefinedVariable,
        format!("Undefined variable '{name}'."),
    )
    .with_span(span)
}
