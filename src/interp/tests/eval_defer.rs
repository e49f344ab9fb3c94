use super::*;
use crate::common::Arc;

#[test]
fn test_deferred_calls_run_in_reverse() {
    Tester::new_single_source_expect_ok("builtin defers", "
    func f() {
        defer println(\"one\")
        defer println(\"two\")
        println(\"body\")
    }
    f()
    ").assert_output("body\ntwo\none\n");

    Tester::new_single_source_expect_ok("arguments are evaluated at the defer", "
    func f() {
        x := 1
        defer println(x)
        x = 2
        println(x)
    }
    f()
    ").assert_output("2\n1\n");

    Tester::new_single_source_expect_ok("deferred closure sees named results", "
    func f() (n int) {
        defer func() {
            n *= 2
        }()
        n = 21
        return n
    }
    f()
    ").assert_value(42);
}

#[test]
fn test_recover() {
    Tester::new_single_source_expect_ok("recover from panic", "
    func safe() (r string) {
        defer func() {
            v := recover()
            if v != nil {
                r = \"recovered\"
            }
        }()
        panic(\"boom\")
    }
    safe()
    ").assert_text("recovered");

    Tester::new_single_source_expect_ok("recover from runtime error", "
    func div(a, b int) (q int, failed bool) {
        defer func() {
            if recover() != nil {
                failed = true
            }
        }()
        q = a / b
        return q, false
    }
    _, failed := div(1, 0)
    failed
    ").assert_value(true);

    Tester::new_single_source_expect_ok("recover outside of a deferred call", "
    func f() interface{} {
        return recover()
    }
    f()
    ").assert_nil();

    Tester::new_single_source_expect_ok("deferred calls of outer frames run too", "
    func inner() {
        defer println(\"inner\")
        panic(\"x\")
    }
    func outer() (ok bool) {
        defer func() {
            ok = recover() != nil
        }()
        defer println(\"outer\")
        inner()
        return false
    }
    outer()
    ").assert_value(true).assert_output("inner\nouter\n");
}

#[test]
fn test_unrecovered_panics() {
    Tester::new_single_source_expect_err("panic crosses the evaluation", "
    func f() {
        defer println(\"deferred\")
        panic(\"oops\")
    }
    f()
    ")
        .assert_msg_has("panic: oops")
        .assert_panic_value("oops")
        .assert_output("deferred\n");

    Tester::new_single_source_expect_err("panic in a deferred call replaces the first", "
    func f() {
        defer func() {
            panic(\"second\")
        }()
        panic(\"first\")
    }
    f()
    ").assert_panic_value("second");
}

#[test]
fn test_panic_backlog() {
    Tester::new_single_source_expect_err("recover nearest panic", "panic(\"lost\")")
        .for_panic(|interp, panic| {
            let found = interp.recover_nearest_panic_for(&Value::from("lost"));
            let found = found.expect("panic record");
            assert!(Arc::ptr_eq(&found, panic));
            assert!(found.to_string().starts_with("panic: lost\ngoroutine "));
            // The backlog is cleared by the lookup
            assert!(interp.recover_nearest_panic_for(&Value::from("lost")).is_none());
        });

    Tester::new_single_source_expect_err("unknown value", "panic(\"one\")")
        .for_panic(|interp, _| {
            assert!(interp.recover_nearest_panic_for(&Value::from("two")).is_none());
            assert!(interp.recover_nearest_panic_for(&Value::from("one")).is_none());
        });
}
