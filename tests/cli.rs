use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn hoot() -> Command {
    let mut cmd = Command::cargo_bin("hoot").expect("binary exists");
    cmd.env_remove("HOOT_LOG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn run_quickstart_demo() {
    hoot()
        .arg("run")
        .arg("demos/quickstart.hoot")
        .assert()
        .success()
        .stdout("Hello from Hoot!\n2\n");
}

#[test]
fn run_classes_demo() {
    hoot()
        .arg("run")
        .arg("demos/classes.hoot")
        .assert()
        .success()
        .stdout("a square with area 9\n[-1, 0.5, 1, 2, 12]\n");
}

#[test]
fn timers_run_after_the_body_in_due_order() {
    hoot()
        .args(["--virtual-time", "run", "demos/events.hoot"])
        .assert()
        .success()
        .stdout("body\nnow\nsoon\nlate\n");
}

#[test]
fn timers_also_order_on_the_wall_clock() {
    hoot()
        .args(["run", "demos/events.hoot"])
        .assert()
        .success()
        .stdout("body\nnow\nsoon\nlate\n");
}

#[test]
fn failing_task_exits_with_runtime_status() {
    hoot()
        .args(["run", "demos/failing_task.hoot"])
        .env("HOOT_VIRTUAL_TIME", "true")
        .assert()
        .code(70)
        .stdout("body done\nstill running\n")
        .stderr(predicate::str::contains(
            "[line 1] Undefined variable 'missing'.",
        ));
}

#[test]
fn eval_snippet() {
    hoot()
        .args(["eval", "print 1 + 2 + 3;"])
        .assert()
        .success()
        .stdout("6\n");
}

#[test]
fn static_errors_exit_65_without_running() {
    hoot()
        .args(["eval", "print \"side effect\"; return 1;"])
        .assert()
        .code(65)
        .stdout("")
        .stderr(predicate::str::contains("Can't return from top-level code."));
}

#[test]
fn parse_errors_exit_65() {
    hoot()
        .args(["eval", "print 1"])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Expect ';' after value."));
}

#[test]
fn missing_script_exits_74() {
    let dir = tempdir().expect("temp dir");
    hoot()
        .arg("run")
        .arg(dir.path().join("absent.hoot"))
        .assert()
        .code(74);
}

#[test]
fn call_depth_is_configurable() {
    let dir = tempdir().expect("temp dir");
    let script = dir.path().join("deep.hoot");
    fs::write(
        &script,
        "fun down(n) { if (n == 0) return 0; return down(n - 1); }\nprint down(100);\n",
    )
    .expect("write script");

    hoot().arg("run").arg(&script).assert().success().stdout("0\n");
    hoot()
        .args(["--max-call-depth", "50", "run"])
        .arg(&script)
        .assert()
        .code(70)
        .stderr(predicate::str::contains("Stack overflow"));
}

#[test]
fn repl_keeps_definitions_between_lines() {
    hoot()
        .arg("repl")
        .write_stdin("let x = 40;\nprint x + 2;\n:quit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("42"));
}

#[test]
fn input_reads_a_line_and_yields_nil_at_end_of_input() {
    hoot()
        .args(["eval", "print input(\"? \"); print input(\"? \");"])
        .write_stdin("hoot\n")
        .assert()
        .success()
        .stdout("? hoot\n? nil\n");
}
