use super::*;
use crate::interp::{Exports, Native};

/// Frames of a rendered stack positioned in evaluated source, or native.
/// They must come first, directly below the goroutine header: every frame
/// after them belongs to the host below the interpreter, and none of those
/// may be part of the interpreter's own dispatch.
fn interpreted_lines(stack: &str) -> Vec<String> {
    let lines: Vec<&str> = stack.lines().collect();
    assert!(lines[0].starts_with("goroutine "), "{}", stack);
    let is_source = |pos: &str| pos.starts_with("\t_.go:") || pos == "\t<native>";

    let mut result = vec![lines[0].to_string()];
    let mut pairs = lines[1..].chunks(2);
    let mut host = Vec::new();
    for pair in &mut pairs {
        match pair {
            [func, pos] if is_source(*pos) => result.push(format!("{}\n{}", func, pos)),
            other => {
                host.extend_from_slice(other);
                break;
            }
        }
    }
    for pair in pairs {
        host.extend_from_slice(pair);
    }
    for line in host.iter() {
        assert!(!is_source(*line), "interpreted frame below host frames:\n{}", stack);
        assert!(!line.contains("gointerp::interp::eval"), "interpreter frame in stack:\n{}", stack);
    }
    result
}

#[test]
fn test_panic_stack() {
    Tester::new_single_source_expect_err("nested calls", "func inner() {
	panic(\"deep\")
}
func middle() {
	inner()
}
middle()
")
        .for_panic(|interp, panic| {
            let lines = interpreted_lines(&panic.filtered_stack);
            assert!(lines[0].starts_with("goroutine "), "{}", panic.filtered_stack);
            assert!(lines[0].ends_with(" [running]:"), "{}", panic.filtered_stack);
            assert_eq!(lines.len(), 4, "{}", panic.filtered_stack);
            assert!(lines[1].starts_with("main.inner()\n\t_.go:2:"), "{}", lines[1]);
            assert!(lines[2].starts_with("main.middle()\n\t_.go:5:"), "{}", lines[2]);
            assert!(lines[3].starts_with("main.main()\n\t_.go:7:"), "{}", lines[3]);

            let func = interp.func_for_pc(panic.filtered_callers[0]).expect("interpreted frame");
            assert_eq!(func.name(), "main.inner");
            assert_eq!(func.file_line(), ("_.go", 2));
            let func = interp.func_for_pc(panic.filtered_callers[2]).expect("interpreted frame");
            assert_eq!(func.name(), "main.main");
            assert_eq!(func.file_line(), ("_.go", 7));
        });
}

#[test]
fn test_closure_names() {
    Tester::new_single_source_expect_err("function literal", "func outer() {
	f := func() {
		panic(\"closure\")
	}
	f()
}
outer()
")
        .for_panic(|_, panic| {
            let lines = interpreted_lines(&panic.filtered_stack);
            assert!(lines[1].starts_with("main.outer.func1()\n\t_.go:3:"), "{}", panic.filtered_stack);
            assert!(lines[2].starts_with("main.outer()\n\t_.go:5:"), "{}", panic.filtered_stack);
        });
}

#[test]
fn test_runtime_error_position() {
    Tester::new_single_source_expect_err("position of the failing node", "func at(s []int, i int) int {
	return s[i]
}
at([]int{1, 2}, 5)
")
        .assert_msg_has("runtime error: index out of range [5] with length 2")
        .for_panic(|_, panic| {
            let lines = interpreted_lines(&panic.filtered_stack);
            assert!(lines[1].starts_with("main.at()\n\t_.go:2:"), "{}", panic.filtered_stack);
        });
}

#[test]
fn test_native_sees_interpreted_stack() {
    let exports = Exports::new()
        .with("example.com/host/host", "Trace", Native::func("func() string", |call, _| {
            Ok(vec![Value::from(call.filtered_stack(0))])
        }))
        .with("example.com/host/host", "Callers", Native::func("func() int", |call, _| {
            Ok(vec![Value::from(call.filtered_callers(0).len() as i64)])
        }));

    Tester::new("filtered stack of a native call")
        .with_exports(exports)
        .eval("import \"example.com/host\"
func show() string {
	return host.Trace()
}
show()
")
        .expect_ok()
        .for_value(|value| {
            let stack = value.to_string();
            let lines = interpreted_lines(&stack);
            assert_eq!(lines.len(), 4, "{}", stack);
            assert_eq!(lines[1], "host.Trace()\n\t<native>");
            assert!(lines[2].starts_with("main.show()\n\t_.go:3:"), "{}", stack);
            assert!(lines[3].starts_with("main.main()\n\t_.go:5:"), "{}", stack);
        })
        // Native frames have no handle: one per interpreted frame, then
        // the host frames
        .eval("func count() int {\n\treturn host.Callers()\n}\ncount()")
        .expect_ok()
        .for_value(|value| {
            assert!(value.as_int().unwrap_or(0) >= 2, "{:?}", value);
        });
}

#[test]
fn test_native_skips_frames() {
    let exports = Exports::new()
        .with("example.com/host/host", "Caller", Native::func("func(int) string", |call, args| {
            let skip = args[0].as_int().unwrap_or(0) as usize;
            Ok(vec![Value::from(call.filtered_stack(skip))])
        }))
        .with("example.com/host/host", "CallerPC", Native::func("func(int) int", |call, args| {
            let skip = args[0].as_int().unwrap_or(0) as usize;
            Ok(vec![Value::from(call.filtered_callers(skip)[0] as i64)])
        }));

    let mut pc = 0;
    Tester::new("leading frames are skipped")
        .with_exports(exports)
        .eval("import \"example.com/host\"
func show(skip int) string {
	return host.Caller(skip)
}
")
        .expect_ok()
        .eval("show(1)")
        .expect_ok()
        .for_value(|value| {
            let stack = value.to_string();
            let lines = interpreted_lines(&stack);
            assert_eq!(lines.len(), 3, "{}", stack);
            assert!(lines[1].starts_with("main.show()\n\t_.go:3:"), "{}", stack);
        })
        .eval("show(2)")
        .expect_ok()
        .for_value(|value| {
            let stack = value.to_string();
            let lines = interpreted_lines(&stack);
            assert_eq!(lines.len(), 2, "{}", stack);
            assert!(lines[1].starts_with("main.main()\n\t_.go:1:"), "{}", stack);
        })
        // The native frame has no handle, skipping it leaves the callers
        // starting at the interpreted caller
        .eval("func pc() int {\n\treturn host.CallerPC(1)\n}\npc()")
        .expect_ok()
        .for_value(|value| pc = value.as_int().unwrap_or(0) as usize)
        .for_interpreter(|interp| {
            let func = interp.func_for_pc(pc).expect("interpreted frame");
            assert_eq!(func.name(), "main.pc");
            assert_eq!(func.file_line(), ("_.go", 2));
        });
}

#[test]
fn test_unknown_pc() {
    let interp = crate::interp::Interpreter::default();
    assert!(interp.func_for_pc(0).is_none());
}
