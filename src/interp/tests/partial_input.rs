use crate::interp::input_source::ParseError;
use crate::interp::{needs_more_input, EvalError, Interpreter};

fn parse_error(src: &str) -> ParseError {
    match Interpreter::default().eval(src) {
        Err(EvalError::Compile(err)) => err,
        Err(other) => panic!("Expected a compile error for {:?}, but got: {}", src, other),
        Ok(value) => panic!("Expected a compile error for {:?}, but got {:?}", src, value),
    }
}

fn last_line(src: &str) -> &str {
    src.lines().last().unwrap_or("")
}

#[test]
fn test_incomplete_input() {
    let sources = [
        "func f() {",
        "if true {\n\tprintln(1)",
        "x := 1 +",
        "s := `raw\nstring",
        "p := []int{1, 2,",
    ];
    for src in sources.iter() {
        let err = parse_error(src);
        assert!(needs_more_input(&err, last_line(src)), "{:?}: {}", src, err.message());
    }
}

#[test]
fn test_complete_input() {
    let sources = [
        "x := )",
        "func f() { return 1 2 }",
        "s := \"unterminated",
        "var 1",
    ];
    for src in sources.iter() {
        let err = parse_error(src);
        assert!(!needs_more_input(&err, last_line(src)), "{:?}: {}", src, err.message());
    }
}

#[test]
fn test_closing_brace() {
    let err = ParseError::new_detached("_.go", String::from("expected operand, found '}'"));
    // The brace came from an earlier line: more input may complete it
    assert!(needs_more_input(&err, "x := 1 +"));
    // The line just read closed a block on purpose
    assert!(!needs_more_input(&err, "}"));
    assert!(!needs_more_input(&err, "\t} "));
}
