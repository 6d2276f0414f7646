use hoot::{
    diagnostics::{Diagnostic, HootError, RuntimeErrorKind},
    runtime::{ExecutionContext, Interpreter},
    scheduler::ClockMode,
};
use pretty_assertions::assert_eq;

fn interpreter() -> Interpreter {
    Interpreter::capturing(ExecutionContext {
        clock: ClockMode::Virtual,
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

/// Runs a program expected to report runtime errors; returns what it printed
/// and the kinds of errors reported.
fn run_failing(source: &str) -> (String, Vec<RuntimeErrorKind>) {
    let mut interpreter = interpreter();
    match interpreter.eval_source(source) {
        Ok(()) => panic!("expected runtime errors, program succeeded"),
        Err(HootError::Runtime(errors)) => (interpreter.take_output(), kinds(&errors)),
        Err(other) => panic!("expected runtime errors, got {other}"),
    }
}

fn kinds(errors: &[Diagnostic]) -> Vec<RuntimeErrorKind> {
    errors
        .iter()
        .map(|diag| diag.runtime_kind().expect("runtime diagnostic"))
        .collect()
}

fn static_error(source: &str) -> HootError {
    let mut interpreter = interpreter();
    match interpreter.eval_source(source) {
        Ok(()) => panic!("expected a static error"),
        Err(err @ (HootError::Diagnostic(_) | HootError::Resolve(_))) => err,
        Err(other) => panic!("expected a static error, got {other}"),
    }
}

#[test]
fn closures_capture_variables_by_reference() {
    let output = run("let x = 1; fun f() { return x; } x = 2; print f();");
    assert_eq!(output, "2\n");
}

#[test]
fn sibling_closures_share_their_scope() {
    let output = run(r#"
        fun make() {
            let n = 0;
            fun inc() { n = n + 1; return n; }
            fun get() { return n; }
            return list(inc, get);
        }
        let pair = make();
        let inc = pair.at(0);
        let get = pair.at(1);
        inc();
        inc();
        print get();
    "#);
    assert_eq!(output, "2\n");
}

#[test]
fn calls_use_the_defining_scope_not_the_caller() {
    let output = run(r#"
        let a = "global";
        fun show() { print a; }
        fun caller() { let a = "local"; show(); }
        caller();
    "#);
    assert_eq!(output, "global\n");
}

#[test]
fn blocks_shadow_outer_bindings() {
    let output = run(r#"
        let a = "global";
        {
            let a = "block";
            print a;
        }
        print a;
    "#);
    assert_eq!(output, "block\nglobal\n");
}

#[test]
fn bubble_sort_orders_a_list() {
    let output = run(r#"
        fun sort(xs) {
            let n = xs.length();
            for (let i = 0; i < n; i = i + 1) {
                for (let j = 0; j < n - i - 1; j = j + 1) {
                    if (xs.at(j) > xs.at(j + 1)) {
                        let tmp = xs.at(j);
                        xs.alter(j, xs.at(j + 1));
                        xs.alter(j + 1, tmp);
                    }
                }
            }
            return xs;
        }
        print sort(list(1, -1, 0.5, 12, 2));
    "#);
    assert_eq!(output, "[-1, 0.5, 1, 2, 12]\n");
}

#[test]
fn recursion_and_arithmetic() {
    let output = run(r#"
        fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
        print fib(10);
        print 10 / 4;
        print 3 * 2;
        print "ab" + "cd";
    "#);
    assert_eq!(output, "55\n2.5\n6\nabcd\n");
}

#[test]
fn loops_break_and_return() {
    let output = run(r#"
        let i = 0;
        while (true) {
            i = i + 1;
            if (i == 3) break;
        }
        print i;
        for (let k = 0; k < 3; k = k + 1) print k;
        fun find() {
            for (let j = 0; j < 10; j = j + 1) {
                if (j == 4) return j;
            }
            return -1;
        }
        print find();
    "#);
    assert_eq!(output, "3\n0\n1\n2\n4\n");
}

#[test]
fn truthiness_and_logical_operators() {
    let output = run(r#"
        if (0) print "zero";
        if ("") print "empty";
        if (nil) print "nil"; else print "falsy";
        print nil or "x";
        print 1 and 2;
        print false and missing;
    "#);
    assert_eq!(output, "zero\nempty\nfalsy\nx\n2\nfalse\n");
}

#[test]
fn equality_is_by_value_for_scalars_and_identity_otherwise() {
    let output = run(r#"
        print "a" == "a";
        print 1 == 1;
        print nil == false;
        print list() == list();
        let l = list();
        print l == l;
    "#);
    assert_eq!(output, "true\ntrue\nfalse\nfalse\ntrue\n");
}

#[test]
fn values_display_in_their_canonical_form() {
    let output = run(r#"
        fun f() {}
        class A {}
        print f;
        print clock;
        print A;
        print A();
        print nil;
    "#);
    assert_eq!(
        output,
        "<fn f>\n<native fn clock>\nA\n<A instance>\nnil\n"
    );
}

#[test]
fn initializer_binds_fields_and_methods_see_them() {
    let output = run(r#"
        class Point {
            init(x, y) { this.x = x; this.y = y; }
            sum() { return this.x + this.y; }
        }
        let p = Point(1, 2);
        print p.sum();
        print p.init(3, 4) == p;
        print p.sum();
    "#);
    assert_eq!(output, "3\ntrue\n7\n");
}

#[test]
fn fields_shadow_methods() {
    let output = run(r#"
        class Box { value() { return "method"; } }
        let b = Box();
        print b.value();
        b.value = "field";
        print b.value;
    "#);
    assert_eq!(output, "method\nfield\n");
}

#[test]
fn super_chains_through_three_levels() {
    let output = run(r#"
        class A { m() { return "A"; } }
        class B < A { m() { return "B>" + super.m(); } }
        class C < B { m() { return "C>" + super.m(); } }
        print C().m();
    "#);
    assert_eq!(output, "C>B>A\n");
}

#[test]
fn super_resolves_from_the_defining_class() {
    let output = run(r#"
        class A { say() { return "A"; } }
        class B < A {
            say() { return "B"; }
            test() { return super.say(); }
        }
        class C < B { say() { return "C"; } }
        print C().test();
    "#);
    assert_eq!(output, "A\n");
}

#[test]
fn inherited_methods_and_initializers() {
    let output = run(r#"
        class Animal {
            init(name) { this.name = name; }
            speak() { return this.name + " makes a sound"; }
        }
        class Dog < Animal {
            speak() { return super.speak() + " (woof)"; }
        }
        print Dog("rex").speak();
    "#);
    assert_eq!(output, "rex makes a sound (woof)\n");
}

#[test]
fn string_methods_mutate_in_place() {
    let output = run(r#"
        let s = string("hello");
        let t = s;
        t.alter(0, "j");
        print s;
        print s.length();
        print s.at(1);
        print string(12) + "!";
    "#);
    assert_eq!(output, "jello\n5\ne\n12!\n");
}

#[test]
fn list_and_map_methods() {
    let output = run(r#"
        let xs = list(1, 2);
        xs.push(3);
        print xs.length();
        print xs.pop();
        print xs;
        print xs.at(1.9);
        let m = map();
        m.set("a", 1);
        m.set(2, "two");
        print m.get("a");
        print m.get(2);
        print m.get("missing");
        print m;
    "#);
    assert_eq!(output, "3\n3\n[1, 2]\n2\n1\ntwo\nnil\n{a: 1, 2: two}\n");
}

#[test]
fn self_containing_containers_display_without_recursing() {
    let output = run(r#"
        let xs = list(1);
        xs.push(xs);
        print xs;
        let m = map();
        m.set("me", m);
        m.set("xs", xs);
        print m;
        print string(xs).length();
        let pair = list(xs, xs);
        print pair;
    "#);
    assert_eq!(
        output,
        "[1, [...]]\n{me: {...}, xs: [1, [...]]}\n10\n[[1, [...]], [1, [...]]]\n"
    );
}

#[test]
fn string_keys_are_copied_into_the_map() {
    let output = run(r#"
        let k = string("a");
        let m = map();
        m.set(k, 1);
        k.alter(0, "b");
        print m.get(k);
        print m.get("a");
        print m;
    "#);
    assert_eq!(output, "nil\n1\n{a: 1}\n");
}

#[test]
fn interpreter_exposes_its_run_state() {
    let mut interpreter = interpreter();
    assert_eq!(interpreter.context().clock, ClockMode::Virtual);
    assert_eq!(interpreter.scheduler().clock(), ClockMode::Virtual);

    interpreter
        .eval_source("fun later() { print \"later\"; } delay(5, later); print \"now\";")
        .expect("program runs");
    assert!(interpreter.scheduler().is_idle());
    assert_eq!(interpreter.output(), "now\nlater\n");
    assert_eq!(interpreter.take_output(), "now\nlater\n");
    assert_eq!(interpreter.output(), "");
}

#[test]
fn delayed_callbacks_run_after_the_script_body() {
    let output = run(r#"
        fun f() { print "f"; }
        delay(f, 0);
        print "a";
    "#);
    assert_eq!(output, "a\nf\n");
}

#[test]
fn shorter_delays_run_first_and_ties_are_fifo() {
    let output = run(r#"
        fun slow() { print "slow"; }
        fun fast() { print "fast"; }
        fun one() { print "one"; }
        fun two() { print "two"; }
        delay(100, slow);
        delay(50, fast);
        delay(0, one);
        delay(0, two);
        print "sync";
    "#);
    assert_eq!(output, "sync\none\ntwo\nfast\nslow\n");
}

#[test]
fn callbacks_keep_this_and_super() {
    let output = run(r#"
        class Base { hi() { print "base hi"; } }
        class Counter < Base {
            init() { this.count = 0; }
            start() {
                fun tick() {
                    this.count = this.count + 1;
                    print this.count;
                    super.hi();
                }
                delay(0, tick);
                delay(0, tick);
            }
        }
        Counter().start();
    "#);
    assert_eq!(output, "1\nbase hi\n2\nbase hi\n");
}

#[test]
fn failing_task_does_not_stop_the_loop() {
    let (output, errors) = run_failing(r#"
        fun bad() { print undefined_thing; }
        fun good() { print "good"; }
        delay(0, bad);
        delay(0, good);
    "#);
    assert_eq!(output, "good\n");
    assert_eq!(errors, vec![RuntimeErrorKind::UndefinedVariable]);
}

#[test]
fn body_error_aborts_the_body_but_tasks_still_drain() {
    let (output, errors) = run_failing(r#"
        fun later() { print "later"; }
        delay(0, later);
        print nope;
        print "unreached";
    "#);
    assert_eq!(output, "later\n");
    assert_eq!(errors, vec![RuntimeErrorKind::UndefinedVariable]);
}

#[test]
fn arity_mismatch_does_not_run_the_body() {
    let mut interpreter = interpreter();
    let err = interpreter
        .eval_source("let calls = 0; fun f(a, b) { calls = calls + 1; } f(1);")
        .expect_err("arity mismatch");
    assert_eq!(kinds(&err.diagnostics()), vec![RuntimeErrorKind::Arity]);
    interpreter
        .eval_source("print calls;")
        .expect("globals persist");
    assert_eq!(interpreter.take_output(), "0\n");
}

#[test]
fn classes_without_init_take_no_arguments() {
    let (_, errors) = run_failing("class E {} E(1);");
    assert_eq!(errors, vec![RuntimeErrorKind::Arity]);
}

#[test]
fn runtime_error_kinds() {
    let cases = [
        ("print 1 + \"a\";", RuntimeErrorKind::Type),
        ("print -\"a\";", RuntimeErrorKind::Type),
        ("\"a\"();", RuntimeErrorKind::Type),
        ("let n = 1; print n.x;", RuntimeErrorKind::Type),
        ("let n = 1; n.x = 2;", RuntimeErrorKind::Type),
        ("print 1 < \"2\";", RuntimeErrorKind::Type),
        ("y = 1;", RuntimeErrorKind::UndefinedVariable),
        ("class A {} print A().nope;", RuntimeErrorKind::UndefinedProperty),
        ("list().nope();", RuntimeErrorKind::UndefinedProperty),
        ("list(1).at(5);", RuntimeErrorKind::Index),
        ("list(1).at(-1);", RuntimeErrorKind::Index),
        ("list().pop();", RuntimeErrorKind::Index),
        ("string(\"ab\").at(2);", RuntimeErrorKind::Index),
        ("list(1).at(\"a\");", RuntimeErrorKind::Type),
        ("list(1).push();", RuntimeErrorKind::Arity),
        ("map(1);", RuntimeErrorKind::Arity),
        ("write(\"x\", \"q\", \"data\", nil);", RuntimeErrorKind::Native),
    ];
    for (source, expected) in cases {
        let (_, errors) = run_failing(source);
        assert_eq!(errors, vec![expected], "{source}");
    }
}

#[test]
fn runaway_recursion_is_a_stack_overflow() {
    let mut interpreter = Interpreter::capturing(ExecutionContext {
        clock: ClockMode::Virtual,
        max_call_depth: 64,
        ..ExecutionContext::default()
    });
    let err = interpreter
        .eval_source("fun r(n) { return r(n + 1); } r(0);")
        .expect_err("overflow");
    assert_eq!(kinds(&err.diagnostics()), vec![RuntimeErrorKind::StackOverflow]);
    assert_eq!(err.exit_code(), 70);
}

#[test]
fn runtime_errors_carry_their_line() {
    let mut interpreter = interpreter();
    let err = interpreter
        .eval_source("print 1;\nprint missing;")
        .expect_err("undefined variable");
    assert_eq!(err.to_string(), "[line 2] Undefined variable 'missing'.");
}

#[test]
fn static_errors_abort_before_running() {
    let sources = [
        "return 1;",
        "print this;",
        "print super.x;",
        "class A { m() { return super.m(); } }",
        "class A < A {}",
        "{ let a = a; }",
        "{ let a = 1; let a = 2; }",
        "break;",
        "fun f() { while (true) { fun g() { break; } } }",
        "class A { init() { return 1; } }",
    ];
    for source in sources {
        let err = static_error(source);
        assert!(matches!(err, HootError::Resolve(_)), "{source}: {err}");
        assert_eq!(err.exit_code(), 65);
    }
}

#[test]
fn parse_errors_are_reported_with_location() {
    for source in ["print 1", "1 = 2;", "let = 3;", "print \"open;", "print 1 # 2;"] {
        let err = static_error(source);
        assert!(matches!(err, HootError::Diagnostic(_)), "{source}: {err}");
        assert_eq!(err.exit_code(), 65);
    }
}

#[test]
fn static_errors_run_nothing() {
    let mut interpreter = interpreter();
    let err = interpreter
        .eval_source("print \"before\"; return 1;")
        .expect_err("top-level return");
    assert!(matches!(err, HootError::Resolve(_)));
    assert_eq!(interpreter.take_output(), "");
}
