use rstest::rstest;
use susa::interpreter::Interpreter;
use susa::{ErrorKind, execute};

fn run_fixture(source: &str) -> Vec<String> {
    let mut interp = Interpreter::new();
    interp.run(source).expect("program should succeed");
    interp.output().to_vec()
}

#[rstest]
#[case(include_str!("../fixtures/arithmetic.susa"), include_str!("../fixtures/arithmetic.expected"))]
#[case(include_str!("../fixtures/control_flow.susa"), include_str!("../fixtures/control_flow.expected"))]
#[case(include_str!("../fixtures/functions.susa"), include_str!("../fixtures/functions.expected"))]
#[case(include_str!("../fixtures/classes.susa"), include_str!("../fixtures/classes.expected"))]
#[case(include_str!("../fixtures/errors.susa"), include_str!("../fixtures/errors.expected"))]
fn fixtures(#[case] source: &str, #[case] expected: &str) {
    let expected_lines: Vec<&str> = expected.lines().collect();
    assert_eq!(run_fixture(source), expected_lines);
}

#[test]
fn execute_joins_output_lines() {
    let source = include_str!("../fixtures/control_flow.susa");
    let expected = include_str!("../fixtures/control_flow.expected");
    assert_eq!(execute(source), expected.trim_end());
}

#[test]
fn execute_keeps_output_before_failure() {
    let out = execute("print \"start\"\nlet items = [1, 2, 3]\nprint items[5]\nprint \"never\"");
    let mut lines = out.lines();
    assert_eq!(lines.next(), Some("start"));
    let report = lines.next().expect("error line");
    assert!(report.starts_with("[IndexError] Line 3"), "{report}");
    assert!(report.ends_with("List index out of range: 5 (size: 3)"), "{report}");
    assert_eq!(lines.next(), Some("  > print items[5]"));
    assert!(!out.contains("never"));
}

#[test]
fn execute_reports_unclosed_block() {
    let out = execute("print 1\nwhile true:\nSTART:\nprint 2\n");
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "1");
    assert!(
        lines[1].starts_with("[SyntaxError] Line 3, Col 1: Missing 'END:' for while block"),
        "{out}"
    );
    assert!(!lines.contains(&"2"));
}

#[test]
fn execute_is_isolated_between_calls() {
    assert_eq!(execute("let shared = 1\nprint shared"), "1");
    assert!(execute("print shared").starts_with("[NameError]"));
}

#[test]
fn output_before_failure_is_kept_by_run() {
    let mut interp = Interpreter::new();
    let err = interp
        .run("print \"a\"\nprint 1 / 0\nprint \"b\"")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ZeroDivision);
    assert_eq!(err.line, 2);
    assert_eq!(interp.output(), ["a"]);
}

#[test]
fn repl_style_sessions_accumulate_definitions() {
    let mut interp = Interpreter::new();
    interp
        .run_additional("func double(x):\nSTART:\nreturn x * 2\nEND:")
        .unwrap();
    interp.run_additional("let v = double(21)").unwrap();
    assert!(interp.run_additional("print nope").is_err());
    interp.run_additional("print v").unwrap();
    assert_eq!(interp.output(), ["42"]);
}

#[test]
fn spread_of_non_list_is_type_error() {
    let mut interp = Interpreter::new();
    let err = interp
        .run("func f(*xs): START: return len(xs) END:\nf(...5)")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}
