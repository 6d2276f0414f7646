use std::{
    fs,
    io::{Read, Write},
    net::TcpListener,
    path::Path,
    thread,
    time::Duration,
};

use hoot::{
    diagnostics::{HootError, RuntimeErrorKind},
    runtime::{ExecutionContext, Interpreter},
    scheduler::ClockMode,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn interpreter() -> Interpreter {
    Interpreter::capturing(ExecutionContext {
        clock: ClockMode::Virtual,
        request_timeout: Duration::from_secs(5),
        ..ExecutionContext::default()
    })
}

fn run(source: &str) -> String {
    let mut interpreter = interpreter();
    if let Err(err) = interpreter.eval_source(source) {
        panic!("evaluation failed: {err}");
    }
    interpreter.take_output()
}

fn run_failing(source: &str) -> (String, Vec<(RuntimeErrorKind, String)>) {
    let mut interpreter = interpreter();
    match interpreter.eval_source(source) {
        Ok(()) => panic!("expected runtime errors, program succeeded"),
        Err(HootError::Runtime(errors)) => {
            let errors = errors
                .into_iter()
                .map(|diag| (diag.runtime_kind().expect("runtime kind"), diag.message))
                .collect();
            (interpreter.take_output(), errors)
        }
        Err(other) => panic!("expected runtime errors, got {other}"),
    }
}

fn path_literal(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "\\\\")
}

#[test]
fn write_then_read_through_callbacks() {
    let dir = tempdir().expect("temp dir");
    let path = path_literal(&dir.path().join("note.txt"));
    let output = run(&format!(
        r#"
        fun show(text) {{ print text; }}
        fun written() {{ read("{path}", show); }}
        write("{path}", "w", "hello", written);
        print "queued";
        "#
    ));
    assert_eq!(output, "queued\nhello\n");
}

#[test]
fn append_mode_extends_the_file() {
    let dir = tempdir().expect("temp dir");
    let file = dir.path().join("log.txt");
    let path = path_literal(&file);
    run(&format!(
        r#"
        fun second() {{ write("{path}", "a+", "b", nil); }}
        write("{path}", "w", "a", second);
        "#
    ));
    assert_eq!(fs::read_to_string(&file).expect("read log"), "ab");
}

#[test]
fn write_without_callback_still_writes_display_form() {
    let dir = tempdir().expect("temp dir");
    let file = dir.path().join("number.txt");
    let output = run(&format!(
        r#"write("{}", "w", 42, nil); print "done";"#,
        path_literal(&file)
    ));
    assert_eq!(output, "done\n");
    assert_eq!(fs::read_to_string(&file).expect("read number"), "42");
}

#[test]
fn exclusive_create_fails_when_the_file_exists() {
    let dir = tempdir().expect("temp dir");
    let file = dir.path().join("taken.txt");
    fs::write(&file, "original").expect("seed file");
    let (output, errors) = run_failing(&format!(
        r#"
        fun never() {{ print "callback ran"; }}
        write("{}", "x", "new", never);
        "#,
        path_literal(&file)
    ));
    assert_eq!(output, "");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, RuntimeErrorKind::Native);
    assert!(errors[0].1.starts_with("write failed"), "{}", errors[0].1);
    assert_eq!(fs::read_to_string(&file).expect("read"), "original");
}

#[test]
fn reading_a_missing_file_reports_and_keeps_draining() {
    let dir = tempdir().expect("temp dir");
    let missing = path_literal(&dir.path().join("missing.txt"));
    let (output, errors) = run_failing(&format!(
        r#"
        fun never(text) {{ print "callback ran"; }}
        fun after() {{ print "after"; }}
        read("{missing}", never);
        delay(10, after);
        "#
    ));
    assert_eq!(output, "after\n");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, RuntimeErrorKind::Native);
    assert!(errors[0].1.starts_with("read failed"), "{}", errors[0].1);
}

#[test]
fn delay_clamps_negative_waits_and_accepts_either_order() {
    let output = run(r#"
        fun a() { print "a"; }
        fun b() { print "b"; }
        delay(b, 5);
        delay(-20, a);
        print "sync";
    "#);
    assert_eq!(output, "sync\na\nb\n");
}

#[test]
fn clock_reports_unix_seconds() {
    let output = run("print clock() > 1600000000;");
    assert_eq!(output, "true\n");
}

#[test]
fn invalid_native_arguments_fail_synchronously() {
    let cases = [
        "fun f(t) {} read(1, f);",
        "fun f() {} delay(\"soon\", f);",
        "delay(1, 2);",
        "write(\"a\", \"w\", \"data\", 3);",
        "request(1, nil, nil, \"GET\", nil);",
        "request(\"http://localhost\", nil, 5, \"GET\", nil);",
    ];
    for source in cases {
        let (_, errors) = run_failing(source);
        assert_eq!(errors.len(), 1, "{source}");
        assert_eq!(errors[0].0, RuntimeErrorKind::Type, "{source}");
    }
}

/// Serves one HTTP exchange on a local port and returns the raw request text.
fn serve_once(response: &'static [u8]) -> (u16, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let port = listener.local_addr().expect("local addr").port();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        let mut header_end = None;
        loop {
            if header_end.is_none() {
                header_end = request
                    .windows(4)
                    .position(|window| window == b"\r\n\r\n")
                    .map(|at| at + 4);
            }
            if let Some(end) = header_end {
                let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + length {
                    break;
                }
            }
            let read = stream.read(&mut chunk).expect("read request");
            if read == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..read]);
        }
        stream.write_all(response).expect("write response");
        String::from_utf8_lossy(&request).into_owned()
    });
    (port, server)
}

#[test]
fn request_yields_a_response_instance() {
    let (port, server) = serve_once(
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Test: yes\r\nConnection: close\r\n\r\nhello",
    );

    let output = run(&format!(
        r#"
        fun got(response) {{
            print response.status;
            print response.body;
            print response.headers.get("x-test");
            print response;
        }}
        let headers = map();
        headers.set("X-Client", "hoot");
        request("http://127.0.0.1:{port}/ping", nil, headers, "get", got);
        "#
    ));
    let request = server.join().expect("server thread");

    assert_eq!(output, "200\nhello\nyes\n<Response instance>\n");
    assert!(request.starts_with("GET /ping"), "{request}");
    assert!(request.to_lowercase().contains("x-client: hoot"), "{request}");
}

#[test]
fn request_sends_the_display_form_of_its_data() {
    let (port, server) = serve_once(
        b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
    );

    let output = run(&format!(
        r#"
        fun got(response) {{ print response.status; print response.body; }}
        request("http://127.0.0.1:{port}/items", list(1, "two", 3.5), nil, "post", got);
        "#
    ));
    let request = server.join().expect("server thread");

    assert_eq!(output, "201\nok\n");
    assert!(request.starts_with("POST /items"), "{request}");
    assert!(request.ends_with("\r\n\r\n[1, two, 3.5]"), "{request}");
}

#[test]
fn unreachable_request_reports_a_native_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
        listener.local_addr().expect("local addr").port()
    };
    let (output, errors) = run_failing(&format!(
        r#"
        fun got(response) {{ print "callback ran"; }}
        request("http://127.0.0.1:{port}/", nil, nil, "GET", got);
        "#
    ));
    assert_eq!(output, "");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, RuntimeErrorKind::Native);
    assert!(errors[0].1.starts_with("request failed"), "{}", errors[0].1);
}
