use pretty_assertions::assert_eq;
use quill::{
    diagnostics::{DiagnosticKind, QuillError},
    runtime::{Interpreter, InterpreterConfig},
    value::{Value, ValueKind},
};

fn eval(source: &str) -> Value {
    let mut interpreter = Interpreter::new();
    interpreter
        .eval_source(source)
        .expect("evaluation should succeed")
}

fn output(source: &str) -> String {
    let mut interpreter = Interpreter::new();
    interpreter
        .eval_source(source)
        .expect("evaluation should succeed");
    interpreter.take_output()
}

fn eval_error(source: &str) -> QuillError {
    let mut interpreter = Interpreter::new();
    match interpreter.eval_source(source) {
        Ok(value) => panic!("expected error, received value {value}"),
        Err(err) => err,
    }
}

fn runtime_message(source: &str) -> String {
    match eval_error(source) {
        QuillError::Diagnostic(diag) => {
            assert_eq!(diag.kind, DiagnosticKind::Runtime, "{}", diag.message);
            diag.message
        }
        other => panic!("expected runtime error, found {other}"),
    }
}

fn expect_int(value: &Value) -> i64 {
    match value.kind() {
        ValueKind::Int(n) => *n,
        _ => panic!("expected Int, found {}", value.type_name()),
    }
}

fn expect_float(value: &Value) -> f64 {
    match value.kind() {
        ValueKind::Float(n) => *n,
        _ => panic!("expected Float, found {}", value.type_name()),
    }
}

fn expect_bool(value: &Value) -> bool {
    match value.kind() {
        ValueKind::Bool(b) => *b,
        _ => panic!("expected Bool, found {}", value.type_name()),
    }
}

#[test]
fn prints_arithmetic() {
    assert_eq!(output("println(1+2)"), "3\n");
}

#[test]
fn program_value_is_last_statement() {
    assert_eq!(expect_int(&eval("x = 4\nx * 10")), 40);
    assert!(eval("x = 1\nwhile false { }").is_null());
}

#[test]
fn fizzbuzz_prints_the_classic_sequence() {
    let source = r#"
count = 1
while count <= 15 {
    if count % 3 == 0 && count % 5 == 0 {
        println(count + " = FizzBuzz")
    } else if count % 5 == 0 {
        println(count + " = Buzz")
    } else if count % 3 == 0 {
        println(count + " = Fizz")
    } else {
        println(count + " neither fizz nor buzz")
    }
    count += 1
}
"#;
    let lines: Vec<String> = output(source).lines().map(str::to_string).collect();
    assert_eq!(lines.len(), 15);
    assert_eq!(lines[0], "1 neither fizz nor buzz");
    assert_eq!(lines[2], "3 = Fizz");
    assert_eq!(lines[4], "5 = Buzz");
    assert_eq!(lines[14], "15 = FizzBuzz");
}

#[test]
fn fibonacci_with_accumulators() {
    let source = r#"
fib = (n) => {
    a = 0
    b = 1
    c = n
    while n > 1 {
        n -= 1
        c = a + b
        a = b
        b = c
    }
    c
}
for i in 0..10 {
    println(fib(i))
}
"#;
    assert_eq!(output(source), "0\n1\n1\n2\n3\n5\n8\n13\n21\n34\n");
}

#[test]
fn recursive_closure_sees_its_own_binding() {
    let source = r#"
fact = (n) => {
    if n >= 1 { n * fact(n - 1) } else { 1 }
}
[fact(0), fact(5)]
"#;
    assert_eq!(eval(source).to_string(), "[1, 120]");
}

#[test]
fn string_index_assignment() {
    assert_eq!(output(r#"v = "ab"; v[0] = "z"; println(v)"#), "zb\n");
}

#[test]
fn string_index_assignment_requires_one_character() {
    let message = runtime_message(r#"v = "ab"; v[0] = "zz""#);
    assert!(message.contains("single-character"), "{message}");
}

#[test]
fn for_range_runs_once_per_value() {
    for (start, end) in [(0, 0), (0, 5), (-3, 2), (7, 8)] {
        let source = format!("seen = []\nfor i in {start}..{end} {{ seen += [i] }}\nseen");
        let expected: Vec<String> = (start..end).map(|n: i64| n.to_string()).collect();
        assert_eq!(eval(&source).to_string(), format!("[{}]", expected.join(", ")));
    }
}

#[test]
fn reversed_range_is_empty() {
    assert_eq!(expect_int(&eval("n = 0\nfor i in 5..2 { n += 1 }\nn")), 0);
}

#[test]
fn range_outside_for_materializes() {
    assert_eq!(eval("r = 2..5\nr").to_string(), "[2, 3, 4]");
}

#[test]
fn for_iterates_arrays_and_strings() {
    assert_eq!(
        output("for x in [1, \"a\"] { println(x) }\nfor c in \"hé\" { println(c) }"),
        "1\na\nh\né\n"
    );
}

#[test]
fn copy_semantics_for_arrays_and_structs() {
    let source = r#"
x = [1, 2, 3]
y = x
y[0] = 99
s = struct { a: 1, inner: struct { b: 2 } }
t = s
t.inner.b = 5
s.a = 7
[x, y, s, t]
"#;
    assert_eq!(
        eval(source).to_string(),
        "[[1, 2, 3], [99, 2, 3], struct { a: 7, inner: struct { b: 2 } }, struct { a: 1, inner: struct { b: 5 } }]"
    );
}

#[test]
fn arguments_are_copies() {
    let source = r#"
poke = (xs) => { xs[0] = 0; xs }
a = [1, 2]
b = poke(a)
[a, b]
"#;
    assert_eq!(eval(source).to_string(), "[[1, 2], [0, 2]]");
}

#[test]
fn length_is_stable_and_tracks_append() {
    let source = "arr = [1, 2, 3]\n[length(arr) == length(arr), length(arr + [4]) == length(arr) + 1]";
    assert_eq!(eval(source).to_string(), "[true, true]");
    assert_eq!(expect_int(&eval("length(struct { a: 1, b: 2 })")), 2);
    assert_eq!(expect_int(&eval("length(\"\")")), 0);
}

#[test]
fn bounds_are_checked() {
    for source in ["[1, 2][2]", "[1, 2][-1]", "\"ab\"[2]", "\"ab\"[-1]", "x = [1]\nx[1] = 2"] {
        let message = runtime_message(source);
        assert!(message.contains("out of bounds"), "{source}: {message}");
    }
    assert!(runtime_message("[1][0.5]").contains("must be an Integer"));
}

#[test]
fn break_leaves_only_the_innermost_loop() {
    let source = r#"
for i in 0..3 {
    for j in 0..10 {
        if j == 1 { break }
        println("""${i}:${j}""")
    }
}
"#;
    assert_eq!(output(source), "0:0\n1:0\n2:0\n");
}

#[test]
fn break_in_while() {
    assert_eq!(expect_int(&eval("n = 0\nwhile true { n += 1\nif n == 4 { break } }\nn")), 4);
}

#[test]
fn break_cannot_escape() {
    assert!(runtime_message("break").contains("outside loop"));
    let message = runtime_message("f = () => { break }\nfor i in 0..2 { f() }");
    assert!(message.contains("cannot escape"), "{message}");
}

#[test]
fn early_return() {
    let source = r#"
find = (xs, target) => {
    for i in 0..length(xs) {
        if xs[i] == target { return i }
    }
    null
}
[find([4, 5, 6], 6), find([4], 1)]
"#;
    assert_eq!(eval(source).to_string(), "[2, null]");
}

#[test]
fn block_scoped_bindings_vanish() {
    let message = runtime_message("if true { inner = 1 }\ninner");
    assert!(message.contains("undefined variable `inner`"));
    assert_eq!(expect_int(&eval("outer = 1\nif true { outer = 2 }\nouter")), 2);
}

#[test]
fn closures_share_captured_scopes() {
    let source = r#"
make_counter = () => {
    count = 0
    () => { count += 1; count }
}
next = make_counter()
next()
next()
next()
"#;
    assert_eq!(expect_int(&eval(source)), 3);
}

#[test]
fn closures_are_lexically_scoped() {
    let source = r#"
x = "global"
show = () => { x }
call_with_local = () => { x = "shadow"; show() }
call_with_local()
"#;
    // the assignment inside call_with_local rebinds the root `x`
    assert_eq!(eval(source).to_string(), "shadow");
    let source = "f = (y) => { g() }\ng = () => { y }\nf(1)";
    assert!(runtime_message(source).contains("undefined variable `y`"));
}

#[test]
fn builtins_can_be_shadowed() {
    assert_eq!(expect_int(&eval("length = (x) => { 42 }\nlength([1])")), 42);
    assert_eq!(expect_int(&eval("length([1, 2])")), 2);
}

#[test]
fn coercion_table() {
    let cases = [
        ("1 + 2", "3"),
        ("1 + 2.5", "3.5"),
        ("7 / 2", "3"),
        ("7.0 / 2", "3.5"),
        ("-7 % 3", "-1"),
        ("\"a\" + 1", "a1"),
        ("1.5 + \"a\"", "1.5a"),
        ("\"x\" + true + null", "xtruenull"),
        ("[1] + [2]", "[1, 2]"),
        ("\"ze\" * 3", "zezeze"),
        ("2 * [0]", "[0, 0]"),
        ("\"a\" * 0", ""),
        ("1 == 1.0", "true"),
        ("[1, [2]] == [1, [2]]", "true"),
        ("struct { a: 1 } == struct { a: 2 }", "false"),
        ("\"abc\" < \"abd\"", "true"),
        ("null == false", "false"),
        ("3. == 3", "true"),
    ];
    for (source, expected) in cases {
        assert_eq!(eval(source).to_string(), expected, "{source}");
    }
}

#[test]
fn float_division_follows_ieee() {
    assert!(expect_float(&eval("1.0 / 0")).is_infinite());
    assert!(expect_float(&eval("0.0 / 0.0")).is_nan());
}

#[test]
fn arithmetic_errors() {
    let cases = [
        ("1 / 0", "division by zero"),
        ("5 % 0", "division by zero"),
        ("9223372036854775807 + 1", "integer overflow"),
        ("-9223372036854775807 - 2", "integer overflow"),
        ("\"a\" - 1", "unsupported operand types for `-`"),
        ("[1] + 1", "unsupported operand types for `+`"),
        ("\"a\" * -1", "cannot repeat"),
        ("[1] < [2]", "cannot compare"),
        ("-\"a\"", "unary `-`"),
        ("f = () => { 1 }\nf == f", "functions cannot be compared"),
    ];
    for (source, expected) in cases {
        let message = runtime_message(source);
        assert!(message.contains(expected), "{source}: {message}");
    }
}

#[test]
fn logic_requires_booleans_and_short_circuits() {
    assert!(!expect_bool(&eval("false && undefined_name")));
    assert!(expect_bool(&eval("true || undefined_name")));
    assert!(runtime_message("1 && true").contains("expected Bool"));
    assert!(runtime_message("if 1 { }").contains("expected Bool"));
    assert!(runtime_message("while null { }").contains("expected Bool"));
    assert!(runtime_message("!0").contains("expected Bool"));
}

#[test]
fn struct_fields() {
    let source = r#"
p = struct { x: 1, y: 2 }
p.x += 10
p
"#;
    assert_eq!(eval(source).to_string(), "struct { x: 11, y: 2 }");
    assert!(runtime_message("p = struct { x: 1 }\np.z").contains("no field `z`"));
    assert!(runtime_message("p = struct { x: 1 }\np.z = 2").contains("no field `z`"));
    assert!(runtime_message("n = 1\nn.x").contains("on a Integer"));
    assert_eq!(eval("struct {}").to_string(), "struct {}");
}

#[test]
fn compound_assignment_on_nested_paths() {
    let source = r#"
grid = [[1, 2], [3, 4]]
grid[1][0] *= 10
grid[0] += [9]
grid
"#;
    assert_eq!(eval(source).to_string(), "[[1, 2, 9], [30, 4]]");
}

#[test]
fn display_forms() {
    let cases = [
        ("null", "null"),
        ("2.0", "2.0"),
        ("[\"a\", 1.5, null, true]", "[\"a\", 1.5, null, true]"),
        ("(a, b) => { a }", "(a, b) => {..}"),
        ("println", "<builtin println>"),
        ("struct { s: \"q\" }", "struct { s: \"q\" }"),
    ];
    for (source, expected) in cases {
        assert_eq!(eval(source).to_string(), expected, "{source}");
    }
}

#[test]
fn templates_interpolate_display_forms() {
    let source = r#"
name = "quill"
xs = [1, "two"]
"""${name} has ${length(xs)} items: ${xs} ${1 + 1}"""
"#;
    assert_eq!(eval(source).to_string(), "quill has 2 items: [1, \"two\"] 2");
}

#[test]
fn calling_errors() {
    assert!(runtime_message("x = 3\nx()").contains("not callable"));
    assert!(runtime_message("f = (a) => { a }\nf()").contains("expected 1 arguments"));
    assert!(runtime_message("println(1, 2)").contains("expected 1 argument"));
    assert!(runtime_message("length(3)").contains("found Integer"));
    assert!(runtime_message("for x in 3 { }").contains("cannot iterate"));
    assert!(runtime_message("for x in 0..\"a\" { }").contains("range bounds"));
}

#[test]
fn call_depth_limit_is_a_fault() {
    let mut interpreter = Interpreter::with_config(InterpreterConfig {
        max_call_depth: 50,
        ..InterpreterConfig::default()
    });
    let err = interpreter
        .eval_source("down = (n) => { down(n + 1) }\ndown(0)")
        .expect_err("recursion should be cut off");
    assert!(err.is_fault(), "{err}");

    let mut interpreter = Interpreter::with_config(InterpreterConfig {
        max_call_depth: 50,
        ..InterpreterConfig::default()
    });
    let value = interpreter
        .eval_source("down = (n) => { if n == 0 { 0 } else { down(n - 1) } }\ndown(40)")
        .expect("bounded recursion fits");
    assert_eq!(expect_int(&value), 0);
}

#[test]
fn deep_recursion_within_default_limit() {
    let value = eval("sum = (n) => { if n == 0 { 0 } else { n + sum(n - 1) } }\nsum(1500)");
    assert_eq!(expect_int(&value), 1500 * 1501 / 2);
}

#[test]
fn scopes_are_reclaimed_after_loops() {
    let mut interpreter = Interpreter::new();
    interpreter
        .eval_source("n = 0\nfor i in 0..1000 { if i % 2 == 0 { n += i } }")
        .expect("loop runs");
    // prelude and root
    assert_eq!(interpreter.live_scopes(), 2);
}

#[test]
fn closure_scopes_are_reclaimed_once_unreachable() {
    let mut interpreter = Interpreter::new();
    let value = interpreter
        .eval_source("n = 0\nfor i in 0..100000 { f = () => { i }\n n += f() }\nn")
        .expect("loop runs");
    assert_eq!(expect_int(&value), 99_999 * 100_000 / 2);
    assert_eq!(interpreter.live_scopes(), 2);
}

#[test]
fn a_scope_stays_alive_while_its_closure_is_reachable() {
    let mut interpreter = Interpreter::new();
    interpreter
        .eval_source("f = null\nfor i in 0..1000 { f = () => { i } }")
        .expect("loop runs");
    // the last iteration scope is still held through `f`
    assert_eq!(interpreter.live_scopes(), 3);
    let value = interpreter.eval_source("f()").expect("closure still callable");
    assert_eq!(expect_int(&value), 999);

    interpreter.eval_source("f = null").expect("drop the closure");
    assert_eq!(interpreter.live_scopes(), 2);
}

#[test]
fn escaping_closures_survive_scope_sweeps() {
    let mut interpreter = Interpreter::new();
    let source = r#"
make = (x) => { get = () => { x }; get }
keep = []
for i in 0..600 { keep = keep + [make(i)] }
total = 0
for g in keep { total += g() }
total
"#;
    let value = interpreter.eval_source(source).expect("closures stay valid");
    assert_eq!(expect_int(&value), 599 * 600 / 2);
    assert_eq!(interpreter.live_scopes(), 2 + 600);

    interpreter.eval_source("keep = null").expect("drop the closures");
    assert_eq!(interpreter.live_scopes(), 2);
}

#[test]
fn for_with_an_index_binding() {
    let source = r#"
total = 0
idx_total = 0
for index, a in [1, 2, 3, 4] {
    total = total + a
    idx_total = idx_total + index
}
[total, idx_total]
"#;
    assert_eq!(eval(source).to_string(), "[10, 6]");
    let source = "for i, c in \"ab\" { println(i + \":\" + c) }\nfor i, n in 5..7 { println([i, n]) }";
    assert_eq!(output(source), "0:a\n1:b\n[0, 5]\n[1, 6]\n");
    assert_eq!(
        runtime_message("for i, a in [1] { i }\ni"),
        "undefined variable `i`"
    );
}

#[test]
fn for_header_may_be_parenthesized() {
    let source = r#"
arr = [1, 2, 3, 4]
total = 0
for (a in arr) { total += a }
for (index, a in arr) { total += index }
total
"#;
    assert_eq!(expect_int(&eval(source)), 16);
}

#[test]
fn for_over_a_struct_yields_key_value_entries() {
    let source = r#"
s = struct { name: "nordine", age: 34 }
for id, entry in s {
    println("Id: " + id + " Key: " + entry.key + " Value: " + entry.value)
}
for entry in s { println(entry) }
"#;
    assert_eq!(
        output(source),
        "Id: 0 Key: name Value: nordine\n\
         Id: 1 Key: age Value: 34\n\
         struct { key: \"name\", value: \"nordine\" }\n\
         struct { key: \"age\", value: 34 }\n"
    );
}

#[test]
fn power_operator() {
    assert_eq!(expect_int(&eval("5^5")), 3125);
    assert_eq!(expect_int(&eval("5^0")), 1);
    assert_eq!(expect_int(&eval("-5^2")), -25);
    assert_eq!(expect_int(&eval("2^3^2")), 512);
    assert_eq!(expect_int(&eval("2 * 3^2")), 18);
    assert!((expect_float(&eval("5^-2")) - 0.04).abs() < 1e-12);
    assert_eq!(expect_float(&eval("-2^-1")), -0.5);
    assert_eq!(expect_float(&eval("4^0.5")), 2.0);
    assert_eq!(expect_int(&eval("1^5000000000")), 1);
    assert_eq!(runtime_message("2^63"), "integer overflow");
    assert!(runtime_message("\"a\"^2").contains("unsupported operand types for `^`"));
}

#[test]
fn output_limit_is_a_fault() {
    let mut interpreter = Interpreter::with_config(InterpreterConfig {
        max_output_bytes: Some(8),
        ..InterpreterConfig::default()
    });
    let err = interpreter
        .eval_source("while true { println(\"spam\") }")
        .expect_err("output should be capped");
    assert!(err.is_fault());
    assert_eq!(interpreter.output(), "spam\n");
}
