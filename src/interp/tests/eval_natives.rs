use super::*;
use crate::interp::{EvalError, Exports, ExportsError, Interpreter, Native};

fn strings_exports() -> Exports {
    Exports::new()
        .with("strings/strings", "ToUpper", Native::func("func(string) string", |_, args| {
            let s = args[0].as_str().unwrap_or_default().to_uppercase();
            Ok(vec![Value::from(s)])
        }))
        .with("strings/strings", "Repeat", Native::func("func(string, int) string", |_, args| {
            let s = args[0].as_str().unwrap_or_default();
            let n = args[1].as_int().unwrap_or(0);
            if n < 0 {
                return Err(Value::from("strings: negative Repeat count"));
            }
            Ok(vec![Value::from(s.repeat(n as usize))])
        }))
        .with("example.com/config/config", "Answer", Native::value(42i64, "int"))
}

#[test]
fn test_native_functions() {
    Tester::new("imported natives")
        .with_exports(strings_exports())
        .eval("
        import \"strings\"
        strings.ToUpper(\"go\") + strings.Repeat(\"!\", 3)
        ")
        .expect_ok()
        .assert_text("GO!!!");

    Tester::new("native value")
        .with_exports(strings_exports())
        .eval("
        import \"example.com/config\"
        config.Answer + 1
        ")
        .expect_ok()
        .assert_value(43);

    Tester::new("renamed import")
        .with_exports(strings_exports())
        .eval("
        import str \"strings\"
        str.ToUpper(\"x\")
        ")
        .expect_ok()
        .assert_text("X");

    Tester::new("unique package name without import")
        .with_exports(strings_exports())
        .eval("strings.ToUpper(\"x\")")
        .expect_ok()
        .assert_text("X");

    let rand = Exports::new()
        .with("crypto/rand/rand", "Int", Native::func("func() int", |_, _| Ok(vec![Value::from(1i64)])))
        .with("math/rand/rand", "Int", Native::func("func() int", |_, _| Ok(vec![Value::from(2i64)])));
    Tester::new("shared package name without import")
        .with_exports(rand.clone())
        .eval("rand.Int()")
        .expect_err()
        .assert_compile_error("undefined: rand");

    Tester::new("shared package name imported")
        .with_exports(rand)
        .eval("
        import \"math/rand\"
        rand.Int()
        ")
        .expect_ok()
        .assert_value(2);

    Tester::new("argument count is checked")
        .with_exports(strings_exports())
        .eval("
        import \"strings\"
        strings.Repeat(\"x\")
        ")
        .expect_err()
        .assert_compile_error("not enough arguments in call to strings.Repeat");
}

#[test]
fn test_native_errors_panic() {
    Tester::new("native returns an error value")
        .with_exports(strings_exports())
        .eval("
        import \"strings\"
        strings.Repeat(\"x\", -1)
        ")
        .expect_err()
        .assert_msg_has("panic: strings: negative Repeat count")
        .assert_panic_value("strings: negative Repeat count");

    Tester::new("recovered in interpreted code")
        .with_exports(strings_exports())
        .eval("
        import \"strings\"
        func safe() (msg string) {
            defer func() {
                if r := recover(); r != nil {
                    msg = \"recovered\"
                }
            }()
            return strings.Repeat(\"x\", -1)
        }
        safe()
        ")
        .expect_ok()
        .assert_text("recovered");
}

#[test]
fn test_callbacks() {
    let exports = Exports::new()
        .with("example.com/host/host", "Apply", Native::func("func(func(int) int, int) int", |call, args| {
            match call.call(&args[0], vec![args[1].clone()]) {
                Ok(results) => Ok(results),
                Err(_) => Ok(vec![Value::from(-1i64)]),
            }
        }))
        .with("example.com/host/host", "Say", Native::func("func(string)", |call, args| {
            call.write_stdout(&format!("{}: {}\n", call.name(), args[0]));
            Ok(vec![])
        }));

    Tester::new("callback into interpreted code")
        .with_exports(exports.clone())
        .eval("
        import \"example.com/host\"
        base := 100
        host.Apply(func(n int) int { return base + n }, 5)
        ")
        .expect_ok()
        .assert_value(105);

    Tester::new("native writes to stdout")
        .with_exports(exports.clone())
        .eval("
        import \"example.com/host\"
        host.Say(\"hi\")
        ")
        .expect_ok()
        .assert_output("host.Say: hi\n");

    // The panic does not cross the native call, it stays in the backlog
    Tester::new("panicking callback")
        .with_exports(exports)
        .eval("
        import \"example.com/host\"
        host.Apply(func(n int) int {
            panic(\"bad callback\")
        }, 1)
        ")
        .expect_ok()
        .assert_value(-1)
        .for_interpreter(|interp| {
            let panic = interp.recover_nearest_panic_for(&Value::from("bad callback"));
            let panic = panic.expect("recorded panic");
            assert!(panic.value.equals(&Value::from("bad callback")));
            assert!(panic.to_string().contains("host.Apply()\n\t<native>"));
        });
}

#[test]
fn test_exports_are_checked() {
    let interp = Interpreter::default();
    let err = interp
        .use_exports(Exports::new().with("strings", "ToUpper", Native::func("func(string) string", |_, _| Ok(vec![]))))
        .unwrap_err();
    assert_eq!(err, ExportsError::MalformedKey(String::from("strings")));

    let err = interp
        .use_exports(Exports::new().with("strings/strings", "Bad", Native::func("int", |_, _| Ok(vec![]))))
        .unwrap_err();
    match err {
        ExportsError::BadSymbol{ package, name, .. } => {
            assert_eq!(package, "strings/strings");
            assert_eq!(name, "Bad");
        }
        other => panic!("unexpected error: {}", other),
    }

    let err = interp
        .use_exports(Exports::new().with("strings/strings", "N", Native::value(1i64, "nosuchtype")))
        .unwrap_err();
    assert!(matches!(err, ExportsError::BadSymbol{ .. }), "unexpected error: {}", err);

    // Nothing from the failed registrations is visible
    let err = interp.eval("import \"strings\"\nstrings.ToUpper(\"x\")").unwrap_err();
    assert!(matches!(err, EvalError::Compile(_)), "unexpected error: {}", err);
}

#[test]
fn test_exports_merge() {
    let more = Exports::new()
        .with("strings/strings", "ToLower", Native::func("func(string) string", |_, args| {
            Ok(vec![Value::from(args[0].as_str().unwrap_or_default().to_lowercase())])
        }));

    Tester::new("members are added")
        .with_exports(strings_exports())
        .with_exports(more)
        .eval("
        import \"strings\"
        strings.ToLower(\"AB\") + strings.ToUpper(\"cd\")
        ")
        .expect_ok()
        .assert_text("abCD");
}

#[test]
fn test_import_used() {
    let rand = Exports::new()
        .with("crypto/rand/rand", "Int", Native::func("func() int", |_, _| Ok(vec![Value::from(1i64)])))
        .with("math/rand/rand", "Int", Native::func("func() int", |_, _| Ok(vec![Value::from(2i64)])));

    Tester::new("unique names are bound as is")
        .with_exports(strings_exports())
        .with_import_used()
        .eval("strings.ToUpper(\"a\")")
        .expect_ok()
        .assert_text("A");

    Tester::new("colliding names use the import path")
        .with_exports(strings_exports())
        .with_exports(rand)
        .with_import_used()
        .eval("crypto_rand.Int()*10 + math_rand.Int()")
        .expect_ok()
        .assert_value(12)
        .eval("rand.Int()")
        .expect_err()
        .assert_compile_error("undefined: rand")
        .for_interpreter(|interp| {
            assert!(matches!(interp.import_used(), Err(EvalError::ImportUsed)));
        });

    let interp = Interpreter::default();
    interp.eval("1").unwrap();
    assert!(matches!(interp.import_used(), Err(EvalError::ImportUsed)));
}
