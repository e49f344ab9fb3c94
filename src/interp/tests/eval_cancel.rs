use std::time::{Duration, Instant};

use super::*;
use crate::interp::{Context, EvalError};

#[test]
fn test_deadline() {
    let ctx = Context::with_timeout(&Context::background(), Duration::from_millis(100));
    let started = Instant::now();
    Tester::new("blocked receive")
        .with_source("ch := make(chan int)")
        .with_context(ctx)
        .eval("<-ch")
        .expect_err()
        .assert_cancelled()
        .for_interpreter(|_| {
            assert!(started.elapsed() < Duration::from_secs(10));
        })
        // The interpreter stays usable
        .eval("x := 2\nx * 21")
        .expect_ok()
        .assert_value(42);
}

#[test]
fn test_deadline_error_kind() {
    let interp = crate::interp::Interpreter::default();
    let ctx = Context::with_timeout(&Context::background(), Duration::from_millis(20));
    let result = interp.eval_with_context(&ctx, "var ch chan int\n<-ch");
    assert!(matches!(result, Err(EvalError::DeadlineExceeded)), "{:?}", result.map(|v| v.to_string()));

    // A context that is done already prevents the evaluation
    let result = interp.eval_with_context(&ctx, "println(\"never\")");
    assert!(matches!(result, Err(EvalError::DeadlineExceeded)));
}

#[test]
fn test_cancel_from_another_thread() {
    let (ctx, cancel) = Context::with_cancel(&Context::background());
    crossbeam_utils::thread::scope(|s| {
        s.spawn(|_| {
            std::thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });

        Tester::new("cancelled receive")
            .with_context(ctx.clone())
            .eval("
            ch := make(chan int)
            <-ch
            ")
            .expect_err()
            .assert_cancelled();
    }).unwrap();
    assert!(matches!(ctx.err(), Some(EvalError::Cancelled)));
}

#[test]
fn test_cancel_busy_loop() {
    let ctx = Context::with_timeout(&Context::background(), Duration::from_millis(50));
    Tester::new("loop without blocking operations")
        .with_options(|o| o.with_cancel_check_interval(16))
        .with_context(ctx)
        .eval("
        i := 0
        for {
            i++
        }
        ")
        .expect_err()
        .assert_cancelled();
}

#[test]
fn test_goroutines() {
    Tester::new_single_source_expect_ok("send from a goroutine", "
    ch := make(chan int)
    go func() {
        ch <- 42
    }()
    <-ch
    ").assert_value(42);

    Tester::new_single_source_expect_ok("buffered channel", "
    ch := make(chan int, 3)
    for i := 1; i <= 3; i++ {
        ch <- i
    }
    close(ch)
    sum := 0
    for i := 0; i < 4; i++ {
        // Zero once drained
        sum += <-ch
    }
    sum
    ").assert_value(6);

    Tester::new_single_source_expect_ok("goroutines with arguments", "
    func worker(id int, out chan int) {
        out <- id * id
    }
    out := make(chan int)
    for i := 1; i <= 3; i++ {
        go worker(i, out)
    }
    total := 0
    for i := 0; i < 3; i++ {
        total += <-out
    }
    total
    ").assert_value(14);

    Tester::new_single_source_expect_err("send on closed channel", "
    ch := make(chan int, 1)
    close(ch)
    ch <- 1
    ").assert_msg_has("send on closed channel");
}

#[test]
fn test_fast_chan() {
    Tester::new("fast channels")
        .with_options(|o| o.with_fast_chan(true))
        .eval("
        ch := make(chan string, 1)
        go func() {
            ch <- \"done\"
        }()
        <-ch
        ")
        .expect_ok()
        .assert_text("done");
}
