use super::*;

#[test]
fn test_expression_results() {
    Tester::new_single_source_expect_ok("arithmetic", "1 + 2*3")
        .assert_value(7);

    Tester::new_single_source_expect_ok("last expression wins", "
    x := 10
    x * 2
    x - 1
    ").assert_value(9);

    Tester::new_single_source_expect_ok("no expression", "x := 1")
        .assert_nil();

    Tester::new_single_source_expect_ok("strings", "
    s := \"hello\"
    s + \", world\"
    ").assert_text("hello, world");
}

#[test]
fn test_evaluations_accumulate() {
    Tester::new("declarations survive")
        .with_source("x := 40")
        .with_source("func add(a, b int) int { return a + b }")
        .eval("add(x, 2)")
        .expect_ok()
        .assert_value(42)
        .eval("x = add(x, 1)\nx")
        .expect_ok()
        .assert_value(41);

    // A failed compilation leaves earlier declarations alone
    Tester::new("failed evaluation")
        .with_source("x := 1")
        .eval("x = y")
        .expect_err()
        .assert_compile_error("undefined: y")
        .eval("x")
        .expect_ok()
        .assert_value(1);
}

#[test]
fn test_printing() {
    Tester::new_single_source_expect_ok("println", "
    println(\"hi\", 3, true)
    print(\"a\", \"b\")
    println()
    ").assert_output("hi 3 true\nab\n");
}

#[test]
fn test_closures() {
    Tester::new_single_source_expect_ok("counter", "
    func counter() func() int {
        n := 0
        return func() int {
            n++
            return n
        }
    }
    c := counter()
    c()
    c()
    c()
    ").assert_value(3);

    Tester::new_single_source_expect_ok("independent closures", "
    func counter() func() int {
        n := 0
        return func() int {
            n++
            return n
        }
    }
    a := counter()
    b := counter()
    a()
    a()
    b()
    a()*10 + b()
    ").assert_value(32);
}

#[test]
fn test_structs_and_methods() {
    Tester::new_single_source_expect_ok("methods", "
    type Point struct {
        X, Y int
    }
    func (p *Point) Move(dx int) {
        p.X += dx
    }
    func (p Point) Sum() int {
        return p.X + p.Y
    }
    p := Point{X: 1, Y: 2}
    p.Move(10)
    p.Sum()
    ").assert_value(13);

    Tester::new_single_source_expect_ok("pointers", "
    type Box struct {
        V int
    }
    b := &Box{V: 1}
    c := b
    c.V = 5
    b.V
    ").assert_value(5);
}

#[test]
fn test_slices_and_loops() {
    Tester::new_single_source_expect_ok("append and index", "
    s := []int{}
    for i := 0; i < 5; i++ {
        s = append(s, i*i)
    }
    total := 0
    for i := 0; i < len(s); i++ {
        total += s[i]
    }
    total
    ").assert_value(30);

    Tester::new_single_source_expect_ok("break and continue", "
    n := 0
    for i := 0; i < 100; i++ {
        if i%2 == 0 {
            continue
        }
        if i > 9 {
            break
        }
        n += i
    }
    n
    ").assert_value(25);

    Tester::new_single_source_expect_ok("branches of nested loops and closures", "
    n := 0
    for i := 0; i < 3; i++ {
        for j := 0; j < 10; j++ {
            if j == 2 {
                break
            }
            n += j
        }
        f := func() int {
            c := 0
            for k := 0; k < 5; k++ {
                if k == 3 {
                    break
                }
                c++
            }
            return c
        }
        n += f()
    }
    n
    ").assert_value(12);

    Tester::new_single_source_expect_ok("multiple results", "
    func divmod(a, b int) (int, int) {
        return a / b, a % b
    }
    q, r := divmod(17, 5)
    q*10 + r
    ").assert_value(32);
}

#[test]
fn test_string_slicing() {
    Tester::new_single_source_expect_ok("on character boundaries", "
    s := \"héllo\"
    s[:1] + s[3:]
    ").assert_text("hllo");

    // Strings stay valid UTF-8: the cut byte is replaced
    Tester::new_single_source_expect_ok("inside a character", "
    s := \"é\"
    s[:1]
    ").assert_text("\u{fffd}");
}

#[test]
fn test_runtime_errors() {
    Tester::new_single_source_expect_err("index out of range", "
    s := []int{1}
    i := 3
    s[i]
    ").assert_msg_has("runtime error: index out of range [3] with length 1");

    Tester::new_single_source_expect_err("divide by zero", "
    a, b := 1, 0
    a / b
    ").assert_msg_has("runtime error: integer divide by zero");

    Tester::new_single_source_expect_err("nil pointer", "
    type T struct {
        V int
    }
    var p *T
    p.V
    ").assert_msg_has("invalid memory address or nil pointer dereference");

    Tester::new_single_source_expect_err("nil function", "
    var f func()
    f()
    ").assert_msg_has("invalid memory address or nil pointer dereference");

    Tester::new("stack overflow")
        .with_options(|o| o.with_max_call_depth(50))
        .eval("
        func down(n int) int {
            return down(n + 1)
        }
        down(0)
        ")
        .expect_err()
        .assert_msg_has("stack overflow");
}

#[test]
fn test_no_run() {
    Tester::new("compile only")
        .with_options(|o| o.with_no_run(true))
        .eval("println(\"never\")\n42")
        .expect_ok()
        .assert_nil()
        .assert_output("");
}
