use pretty_assertions::assert_eq;
use quill::{
    ast::{BinaryOp, ExprKind, StmtKind},
    diagnostics::{Diagnostic, DiagnosticKind},
    parser::{MAX_NESTING, parse_program},
};

fn syntax_error(source: &str) -> Diagnostic {
    match parse_program(source) {
        Ok(program) => panic!("expected syntax error, parsed {} statements", program.items.len()),
        Err(diag) => {
            assert!(diag.kind.is_syntax(), "{diag}");
            diag
        }
    }
}

fn single_expr(source: &str) -> ExprKind {
    let program = parse_program(source).expect("source should parse");
    assert_eq!(program.items.len(), 1);
    match &program.items[0].kind {
        StmtKind::Expr(expr) => expr.kind.clone(),
        other => panic!("expected expression statement, found {other:?}"),
    }
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let ExprKind::Binary { op, right, .. } = single_expr("1 + 2 * 3") else {
        panic!("expected binary expression");
    };
    assert_eq!(op, BinaryOp::Add);
    assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
}

#[test]
fn and_binds_tighter_than_or() {
    let ExprKind::Binary { op, right, .. } = single_expr("a || b && c") else {
        panic!("expected binary expression");
    };
    assert_eq!(op, BinaryOp::Or);
    assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::And, .. }));
}

#[test]
fn range_sits_above_comparison_and_below_addition() {
    let ExprKind::Range { end, .. } = single_expr("0..n - 1") else {
        panic!("expected range");
    };
    assert!(matches!(end.kind, ExprKind::Binary { op: BinaryOp::Sub, .. }));
    assert!(syntax_error("0..1..2").message.contains("cannot be chained"));
}

#[test]
fn compound_assignment_keeps_operator() {
    let ExprKind::Assign { op, target, .. } = single_expr("xs[0].count %= 2") else {
        panic!("expected assignment");
    };
    assert_eq!(op, Some(BinaryOp::Mod));
    assert!(matches!(target.kind, ExprKind::Field { .. }));
}

#[test]
fn newline_stops_call_and_index_continuation() {
    let program = parse_program("f = g\n(1 + 2)\n[3]").expect("source should parse");
    assert_eq!(program.items.len(), 3);
}

#[test]
fn statements_may_share_a_line_with_semicolons() {
    let program = parse_program("a = 1; b = 2; a + b;").expect("source should parse");
    assert_eq!(program.items.len(), 3);
}

#[test]
fn else_if_chains_nest() {
    let program = parse_program("if a { 1 } else if b { 2 } else { 3 }").expect("parses");
    let StmtKind::If { else_branch, .. } = &program.items[0].kind else {
        panic!("expected if");
    };
    let nested = else_branch.as_ref().expect("else branch");
    assert!(matches!(nested[0].kind, StmtKind::If { .. }));
}

#[test]
fn trailing_commas_are_allowed() {
    parse_program("f = (a, b,) => { a }\nf(1, 2,)\n[1, 2,]\nstruct { a: 1, }")
        .expect("trailing commas parse");
}

#[test]
fn lambda_versus_group() {
    assert!(matches!(single_expr("(a, b) => { a }"), ExprKind::Lambda { .. }));
    assert!(matches!(single_expr("() => { 1 }"), ExprKind::Lambda { .. }));
    assert!(matches!(single_expr("(a)"), ExprKind::Group(_)));
}

#[test]
fn template_segments_parse_as_expressions() {
    let ExprKind::Template(segments) = single_expr(r#""""a ${b + 1} c""""#) else {
        panic!("expected template");
    };
    assert_eq!(segments.len(), 3);
}

#[test]
fn syntax_errors_carry_positions() {
    let source = "x = 1\ny = (2 +\n";
    let diag = syntax_error(source);
    assert!(diag.span.is_some());
    assert!(diag.render(source).starts_with("syntax error at "), "{}", diag.render(source));
}

#[test]
fn rendered_errors_include_notes() {
    let source = "f() = 1";
    assert_eq!(
        syntax_error(source).render(source),
        "syntax error at 1:1: invalid assignment target\n  note: only variables and their indexes or fields can be assigned"
    );
}

#[test]
fn template_errors_point_into_the_template() {
    let source = "x = 1\ns = \"\"\"value: ${x +}\"\"\"";
    let diag = syntax_error(source);
    let span = diag.span.expect("span");
    let (line, _) = span.line_col(source);
    assert_eq!(line, 2);
}

#[test]
fn rejected_sources() {
    let cases = [
        ("1 = 2", "invalid assignment target"),
        ("f() = 2", "invalid assignment target"),
        ("struct { a: 1, a: 2 }", "duplicate field `a`"),
        ("(a, a) => { a }", "duplicate parameter `a`"),
        ("\"\"\"${}\"\"\"", "empty interpolation"),
        ("\"open", "unterminated string"),
        ("99999999999999999999", "out of range"),
        ("if x { 1", "expected `}`"),
        ("x = 1 @ 2", "unexpected character"),
    ];
    for (source, expected) in cases {
        let diag = syntax_error(source);
        assert!(diag.message.contains(expected), "{source}: {}", diag.message);
    }
}

#[test]
fn lexer_errors_are_syntax_errors() {
    assert_eq!(syntax_error("\"open").kind, DiagnosticKind::Lexer);
    assert_eq!(syntax_error("if x { 1").kind, DiagnosticKind::Parser);
}

#[test]
fn deeply_nested_input_does_not_overflow() {
    let depth = 4_000;
    let source = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
    parse_program(&source).expect("nested groups parse");
    let source = format!("{}{}", "if true { ".repeat(depth), "}".repeat(depth));
    parse_program(&source).expect("nested blocks parse");
}

#[test]
fn nesting_beyond_the_limit_is_a_syntax_error() {
    let depth = MAX_NESTING + 1;
    let sources = [
        format!("{}1{}", "(".repeat(depth), ")".repeat(depth)),
        format!("x = {}1", "-".repeat(depth)),
        format!("{}{}", "{ ".repeat(depth), "}".repeat(depth)),
        format!("x = {}", "2^".repeat(depth) + "2"),
    ];
    for source in &sources {
        let diag = syntax_error(source);
        assert_eq!(
            diag.message,
            format!("nesting exceeds the limit of {MAX_NESTING} levels")
        );
    }
}

#[test]
fn long_flat_chains_parse_and_drop() {
    let terms = 100_000;
    let sum = format!("1{}", " + 1".repeat(terms));
    let program = parse_program(&sum).expect("long sum parses");
    drop(program);

    let indexes = format!("x{} = 1", "[0]".repeat(terms));
    let program = parse_program(&indexes).expect("long index chain parses");
    assert!(matches!(
        &program.items[0].kind,
        StmtKind::Expr(expr) if matches!(expr.kind, ExprKind::Assign { .. })
    ));
}

#[test]
fn for_headers() {
    let cases = [
        ("for a in xs { a }", None),
        ("for (a in xs) { a }", None),
        ("for i, a in xs { a }", Some("i")),
        ("for (i , a in xs) { a }", Some("i")),
    ];
    for (source, expected_index) in cases {
        let program = parse_program(source).expect("loop parses");
        let StmtKind::For { index, binding, .. } = &program.items[0].kind else {
            panic!("expected for loop in {source}");
        };
        assert_eq!(index.as_deref(), expected_index, "{source}");
        assert_eq!(binding, "a");
    }
    assert!(syntax_error("for (a in xs { a }").message.contains("expected `)`"));
    assert!(syntax_error("for a, a in xs { a }").message.contains("duplicate loop variable"));
}

#[test]
fn power_binds_tighter_than_negation_and_is_right_associative() {
    let ExprKind::Unary { expr, .. } = single_expr("-5^2") else {
        panic!("expected negation");
    };
    assert!(matches!(expr.kind, ExprKind::Binary { op: BinaryOp::Pow, .. }));

    let ExprKind::Binary { op, right, .. } = single_expr("2^3^2") else {
        panic!("expected power");
    };
    assert_eq!(op, BinaryOp::Pow);
    assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Pow, .. }));

    let ExprKind::Binary { op, right, .. } = single_expr("5^-2") else {
        panic!("expected power");
    };
    assert_eq!(op, BinaryOp::Pow);
    assert!(matches!(right.kind, ExprKind::Unary { .. }));
}
