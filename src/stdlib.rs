//! The native bridge: global natives and the methods of built-in values.
//!
//! Synchronous natives return their result directly. Asynchronous ones
//! validate their arguments, register an operation with the scheduler, hand
//! the blocking work to a helper thread and return `nil`.

use std::{
    fs::{self, OpenOptions},
    io::{self, BufRead, Write},
    rc::Rc,
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::{
    diagnostics::{Diagnostic, RuntimeErrorKind},
    environment::EnvironmentRef,
    scheduler::{Completer, Payload},
    value::{Arity, Class, MapEntries, NativeCall, NativeFn, NativeFunction, Value, ValueKind},
};

pub fn install(env: &EnvironmentRef) {
    let mut scope = env.borrow_mut();
    scope.define("input", native("input", Arity::Exact(1), io_input));
    scope.define("clock", native("clock", Arity::Exact(0), time_clock));
    scope.define("delay", native("delay", Arity::Exact(2), time_delay));
    scope.define("read", native("read", Arity::Exact(2), fs_read));
    scope.define("write", native("write", Arity::Exact(4), fs_write));
    scope.define("request", native("request", Arity::Exact(5), net_request));
    scope.define("string", native("string", Arity::Exact(1), string_new));
    scope.define("list", native("list", Arity::Variadic, list_new));
    scope.define("map", native("map", Arity::Exact(0), map_new));
}

/// Resolves a method on a string, list or map, bound to `value`.
pub fn builtin_method(value: &Value, name: &str) -> Option<Value> {
    let (name, arity, callback): (&'static str, usize, NativeFn) = match (&*value.0, name) {
        (ValueKind::String(_), "at") => ("at", 1, string_at),
        (ValueKind::String(_), "alter") => ("alter", 2, string_alter),
        (ValueKind::String(_), "length") => ("length", 0, string_length),
        (ValueKind::List(_), "at") => ("at", 1, list_at),
        (ValueKind::List(_), "alter") => ("alter", 2, list_alter),
        (ValueKind::List(_), "length") => ("length", 0, list_length),
        (ValueKind::List(_), "push") => ("push", 1, list_push),
        (ValueKind::List(_), "pop") => ("pop", 0, list_pop),
        (ValueKind::Map(_), "get") => ("get", 1, map_get),
        (ValueKind::Map(_), "set") => ("set", 2, map_set),
        _ => return None,
    };
    Some(Value::new(ValueKind::Native(NativeFunction {
        name,
        arity: Arity::Exact(arity),
        receiver: Some(value.clone()),
        callback,
    })))
}

fn native(name: &'static str, arity: Arity, callback: NativeFn) -> Value {
    Value::new(ValueKind::Native(NativeFunction {
        name,
        arity,
        receiver: None,
        callback,
    }))
}

pub fn map_from(pairs: impl IntoIterator<Item = (Value, Value)>) -> Value {
    let mut entries = MapEntries::new();
    for (key, value) in pairs {
        entries.insert(key.map_key(), (key, value));
    }
    Value::map(entries)
}

fn type_error(message: impl Into<String>) -> Diagnostic {
    Diagnostic::runtime(RuntimeErrorKind::Type, message)
}

fn native_error(message: impl Into<String>) -> Diagnostic {
    Diagnostic::runtime(RuntimeErrorKind::Native, message)
}

fn expect_string(value: &Value, name: &str) -> Result<String, Diagnostic> {
    match &*value.0 {
        ValueKind::String(s) => Ok(s.borrow().clone()),
        _ => Err(type_error(format!(
            "`{name}` expected a string but got {}.",
            value.type_name()
        ))),
    }
}

fn expect_callback(value: &Value, name: &str) -> Result<Option<Value>, Diagnostic> {
    if value.is_nil() {
        Ok(None)
    } else if value.is_callable() {
        Ok(Some(value.clone()))
    } else {
        Err(type_error(format!(
            "`{name}` expected a callback but got {}.",
            value.type_name()
        )))
    }
}

/// Interprets `value` as an index into a container of `len` elements,
/// truncating toward zero.
fn expect_index(value: &Value, len: usize, name: &str) -> Result<usize, Diagnostic> {
    let Some(number) = value.as_number() else {
        return Err(type_error(format!(
            "'{name}' only accepts a number index. Got '{value}'."
        )));
    };
    let index = number.trunc();
    if index < 0.0 || index >= len as f64 || index.is_nan() {
        return Err(Diagnostic::runtime(
            RuntimeErrorKind::Index,
            format!("'{name}' index {value} out of bounds for length {len}."),
        ));
    }
    Ok(index as usize)
}

fn receiver<'a>(call: &NativeCall<'a>) -> Result<&'a Value, Diagnostic> {
    call.receiver
        .ok_or_else(|| type_error("built-in method called without a receiver."))
}

fn describe_io_error(path: &str, err: &io::Error) -> String {
    let mut message = format!("`{path}`: {err}");
    if let Some(code) = err.raw_os_error() {
        message.push_str(&format!(" (os error code {code})"));
    }
    message
}

/// Runs `work` on a helper thread, reporting its outcome through `completer`.
fn spawn_collaborator(
    label: &'static str,
    completer: Completer,
    work: impl FnOnce() -> Result<Payload, String> + Send + 'static,
) {
    let id = completer.id();
    let spawned = thread::Builder::new()
        .name(format!("hoot-{label}-{id}"))
        .spawn(move || {
            let outcome = work();
            debug!(id, label, ok = outcome.is_ok(), "collaborator done");
            completer.complete(outcome);
        });
    if let Err(err) = spawned {
        // The completer was dropped with the closure and reports the failure.
        warn!(id, label, %err, "failed to spawn collaborator thread");
    }
}

fn io_input(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let prompt = call.args[0].to_string();
    let mut stdout = io::stdout();
    write!(stdout, "{prompt}")
        .and_then(|_| stdout.flush())
        .map_err(|err| native_error(format!("input failed: {err}")))?;
    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|err| native_error(format!("input failed: {err}")))?;
    if read == 0 {
        return Ok(Value::nil());
    }
    let trimmed = line.trim_end_matches(['\n', '\r']);
    Ok(Value::string(trimmed))
}

fn time_clock(_: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| native_error(format!("clock failed: {err}")))?;
    Ok(Value::number(now.as_secs_f64()))
}

fn time_delay(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let (millis, callback) = if call.args[0].is_callable() {
        (&call.args[1], &call.args[0])
    } else {
        (&call.args[0], &call.args[1])
    };
    if !callback.is_callable() {
        return Err(type_error(format!(
            "`delay` expected a callback but got {}.",
            callback.type_name()
        )));
    }
    let Some(millis) = millis.as_number() else {
        return Err(type_error(format!(
            "`delay` expected milliseconds as a number but got {}.",
            millis.type_name()
        )));
    };
    let delay = Duration::try_from_secs_f64(millis.max(0.0) / 1000.0)
        .map_err(|_| type_error(format!("`delay` cannot wait {millis} milliseconds.")))?;
    call.scheduler.schedule(delay, callback.clone(), Vec::new());
    Ok(Value::nil())
}

fn fs_read(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let path = expect_string(&call.args[0], "read")?;
    let callback = expect_callback(&call.args[1], "read")?;
    let completer = call.scheduler.begin_operation("read", call.span, callback, |payload| {
        match payload {
            Payload::Text(text) => vec![Value::string(text)],
            _ => Vec::new(),
        }
    });
    spawn_collaborator("read", completer, move || {
        fs::read_to_string(&path)
            .map(Payload::Text)
            .map_err(|err| describe_io_error(&path, &err))
    });
    Ok(Value::nil())
}

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    Truncate,
    Append,
    CreateNew,
}

impl WriteMode {
    fn parse(mode: &str) -> Option<Self> {
        match mode.trim_end_matches('+') {
            "w" => Some(WriteMode::Truncate),
            "a" => Some(WriteMode::Append),
            "x" => Some(WriteMode::CreateNew),
            _ => None,
        }
    }

    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            WriteMode::Truncate => options.write(true).create(true).truncate(true),
            WriteMode::Append => options.append(true).create(true),
            WriteMode::CreateNew => options.write(true).create_new(true),
        };
        options
    }
}

fn fs_write(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let path = expect_string(&call.args[0], "write")?;
    let mode_name = expect_string(&call.args[1], "write")?;
    let mode = WriteMode::parse(&mode_name)
        .ok_or_else(|| native_error(format!("Unknown file mode '{mode_name}'.")))?;
    let data = call.args[2].to_string();
    let callback = expect_callback(&call.args[3], "write")?;
    let completer = call
        .scheduler
        .begin_operation("write", call.span, callback, |_| Vec::new());
    spawn_collaborator("write", completer, move || {
        mode.options()
            .open(&path)
            .and_then(|mut file| file.write_all(data.as_bytes()))
            .map(|_| Payload::Unit)
            .map_err(|err| describe_io_error(&path, &err))
    });
    Ok(Value::nil())
}

fn response_class() -> Rc<Class> {
    Rc::new(Class {
        name: "Response".into(),
        superclass: None,
        methods: IndexMap::new(),
    })
}

fn response_value(payload: Payload) -> Vec<Value> {
    let Payload::Response {
        status,
        headers,
        body,
    } = payload
    else {
        return Vec::new();
    };
    let instance = Value::instance(response_class());
    if let ValueKind::Instance(inner) = &*instance.0 {
        let headers = map_from(
            headers
                .into_iter()
                .map(|(name, value)| (Value::string(name), Value::string(value))),
        );
        let mut fields = inner.fields.borrow_mut();
        fields.insert("body".into(), Value::string(body));
        fields.insert("headers".into(), headers);
        fields.insert("status".into(), Value::number(f64::from(status)));
    }
    vec![instance]
}

fn net_request(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let url = expect_string(&call.args[0], "request")?;
    let body = match &*call.args[1].0 {
        ValueKind::Nil => None,
        _ => Some(call.args[1].to_string()),
    };
    let headers: Vec<(String, String)> = match &*call.args[2].0 {
        ValueKind::Nil => Vec::new(),
        ValueKind::Map(entries) => entries
            .borrow()
            .values()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        _ => {
            return Err(type_error(format!(
                "`request` expected headers as a map but got {}.",
                call.args[2].type_name()
            )));
        }
    };
    let method_name = expect_string(&call.args[3], "request")?.to_uppercase();
    let method = reqwest::Method::from_bytes(method_name.as_bytes())
        .map_err(|_| native_error(format!("Unknown request method '{method_name}'.")))?;
    let callback = expect_callback(&call.args[4], "request")?;
    let timeout = call.context.request_timeout;

    let completer = call
        .scheduler
        .begin_operation("request", call.span, callback, response_value);
    spawn_collaborator("request", completer, move || {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| format!("http client init failed: {err}"))?;
        let mut request = client.request(method, &url);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request.send().map_err(|err| {
            if err.is_timeout() {
                format!("`{url}` timed out: {err}")
            } else {
                format!("`{url}`: {err}")
            }
        })?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .text()
            .map_err(|err| format!("response body read failed: {err}"))?;
        Ok(Payload::Response {
            status,
            headers,
            body,
        })
    });
    Ok(Value::nil())
}

fn string_new(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    Ok(Value::string(call.args[0].to_string()))
}

fn list_new(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    Ok(Value::list(call.args.to_vec()))
}

fn map_new(_: NativeCall<'_>) -> Result<Value, Diagnostic> {
    Ok(Value::map(MapEntries::new()))
}

fn string_at(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let ValueKind::String(text) = &*receiver(&call)?.0 else {
        return Err(type_error("'at' expects a string receiver."));
    };
    let text = text.borrow();
    let index = expect_index(&call.args[0], text.chars().count(), "at")?;
    let ch = text.chars().nth(index).map(String::from).unwrap_or_default();
    Ok(Value::string(ch))
}

fn string_alter(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let ValueKind::String(text) = &*receiver(&call)?.0 else {
        return Err(type_error("'alter' expects a string receiver."));
    };
    let index = expect_index(&call.args[0], text.borrow().chars().count(), "alter")?;
    let replacement = call.args[1].to_string();
    let altered: String = text
        .borrow()
        .chars()
        .enumerate()
        .map(|(idx, ch)| {
            if idx == index {
                replacement.clone()
            } else {
                ch.to_string()
            }
        })
        .collect();
    *text.borrow_mut() = altered;
    Ok(Value::nil())
}

fn string_length(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let ValueKind::String(text) = &*receiver(&call)?.0 else {
        return Err(type_error("'length' expects a string receiver."));
    };
    let length = text.borrow().chars().count();
    Ok(Value::number(length as f64))
}

fn list_at(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let ValueKind::List(items) = &*receiver(&call)?.0 else {
        return Err(type_error("'at' expects a list receiver."));
    };
    let items = items.borrow();
    let index = expect_index(&call.args[0], items.len(), "at")?;
    Ok(items[index].clone())
}

fn list_alter(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let ValueKind::List(items) = &*receiver(&call)?.0 else {
        return Err(type_error("'alter' expects a list receiver."));
    };
    let index = expect_index(&call.args[0], items.borrow().len(), "alter")?;
    items.borrow_mut()[index] = call.args[1].clone();
    Ok(Value::nil())
}

fn list_length(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let ValueKind::List(items) = &*receiver(&call)?.0 else {
        return Err(type_error("'length' expects a list receiver."));
    };
    let length = items.borrow().len();
    Ok(Value::number(length as f64))
}

fn list_push(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let ValueKind::List(items) = &*receiver(&call)?.0 else {
        return Err(type_error("'push' expects a list receiver."));
    };
    items.borrow_mut().push(call.args[0].clone());
    Ok(Value::nil())
}

fn list_pop(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let ValueKind::List(items) = &*receiver(&call)?.0 else {
        return Err(type_error("'pop' expects a list receiver."));
    };
    let popped = items.borrow_mut().pop();
    popped.ok_or_else(|| {
        Diagnostic::runtime(RuntimeErrorKind::Index, "Can't pop from an empty list.")
    })
}

fn map_get(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let ValueKind::Map(entries) = &*receiver(&call)?.0 else {
        return Err(type_error("'get' expects a map receiver."));
    };
    let key = call.args[0].map_key();
    let found = entries
        .borrow()
        .get(&key)
        .map(|(_, value)| value.clone())
        .unwrap_or_else(Value::nil);
    Ok(found)
}

fn map_set(call: NativeCall<'_>) -> Result<Value, Diagnostic> {
    let ValueKind::Map(entries) = &*receiver(&call)?.0 else {
        return Err(type_error("'set' expects a map receiver."));
    };
    // String keys are stored as copies so the entry keeps the content it was hashed by.
    let key = match &*call.args[0].0 {
        ValueKind::String(text) => Value::string(text.borrow().clone()),
        _ => call.args[0].clone(),
    };
    entries
        .borrow_mut()
        .insert(key.map_key(), (key, call.args[1].clone()));
    Ok(Value::nil())
}
