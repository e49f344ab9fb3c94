use super::*;
use crate::interp::{Exports, Native};
use crate::interp::types::Type;

#[test]
fn test_pointer_to_argument() {
    Tester::new("address of argument")
        .with_source("
        func Ptr[T any](v T) *T {
            return &v
        }
        a := Ptr(5)
        ")
        .eval("*a")
        .expect_ok()
        .assert_value(5)
        .eval("b := Ptr(\"five\")\n*b")
        .expect_ok()
        .assert_text("five")
        .eval("c := Ptr(7)\n*a + *c")
        .expect_ok()
        .assert_value(12)
        .for_interpreter(|interp| {
            // One instance for int, one for string
            assert_eq!(interp.program().instances.len(), 2);
        });
}

#[test]
fn test_instances_run_once_per_call() {
    Tester::new_single_source_expect_ok("side effects", "
    count := 0
    func bump() int {
        count++
        return count
    }
    func Twice[T any](v T) T {
        bump()
        return v
    }
    Twice[int](1)
    Twice[int](2)
    Twice(3)
    count
    ")
        .assert_value(3)
        .for_interpreter(|interp| {
            assert_eq!(interp.program().instances.len(), 1);
        });
}

#[test]
fn test_inference() {
    Tester::new_single_source_expect_ok("from a callback parameter", "
    type Point struct {
        X, Y int
    }
    func Make[T any](init func(*T)) *T {
        v := new(T)
        init(v)
        return v
    }
    p := Make(func(p *Point) {
        p.X = 3
        p.Y = 4
    })
    p.X * p.Y
    ").assert_value(12);

    Tester::new_single_source_expect_ok("several parameters", "
    func Map[T, U any](s []T, f func(T) U) []U {
        r := []U{}
        for i := 0; i < len(s); i++ {
            r = append(r, f(s[i]))
        }
        return r
    }
    lens := Map([]string{\"a\", \"bb\", \"ccc\"}, func(s string) int { return len(s) })
    lens[0] + lens[1]*10 + lens[2]*100
    ").assert_value(321);

    Tester::new_single_source_expect_ok("untyped constants default", "
    func Id[T any](v T) T {
        return v
    }
    Id(2.5) * 2
    ").assert_value(5.0);

    Tester::new_single_source_expect_ok("explicit instantiation", "
    func Zero[T any]() T {
        var z T
        return z
    }
    Zero[int]() + 1
    ").assert_value(1);
}

#[test]
fn test_type_arguments_as_call_arguments() {
    Tester::new_single_source_expect_ok("declared in the evaluated source", "
func New[T any]() *T { return new(T) }
func AddAt[T any](init func(n *T)) { v := New(T); init(v); println(*v) }
func main() {
AddAt(func(w *int) { *w = 3 })
}
")
        .assert_output("3\n")
        .for_interpreter(|interp| {
            // AddAt[int] and the New[int] it calls
            let prog = interp.program();
            assert_eq!(prog.instances.len(), 2);
            assert!(prog.instances.keys().all(|(_, targs)| targs == &vec![Type::INT]));
        });

    let exports = Exports::new()
        .with("guthib.com/generic/generic", "New", Native::generic("func New[T any]() *T { return new(T) }"))
        .with("guthib.com/generic/generic", "AddAt", Native::generic(
            "func AddAt[T any](init func(n *T)) { v := New(T); init(v); println(*v) }",
        ));
    Tester::new("exported generics")
        .with_exports(exports)
        .with_import_used()
        .eval("
func main() {
generic.AddAt(func(w *int) { *w = 3 })
}
")
        .expect_ok()
        .assert_output("3\n");

    Tester::new_single_source_expect_ok("value of the instance", "
    func New[T any]() *T { return new(T) }
    p := New(string)
    *p = \"set\"
    *p
    ").assert_text("set");
}

#[test]
fn test_generic_errors() {
    Tester::new_single_source_expect_err("duplicate declaration", "
    func Max[T any](a, b T) T {
        return a
    }
    func Max[T any](a, b T) T {
        return b
    }
    ").assert_compile_error("Max redeclared in this block");

    Tester::new_single_source_expect_err("cannot infer", "
    func Zero[T any]() T {
        var z T
        return z
    }
    Zero()
    ").assert_compile_error("in call to Zero, cannot infer T");

    Tester::new_single_source_expect_err("conflicting inference", "
    func Pair[T any](a, b T) {
    }
    x := 1
    y := \"s\"
    Pair(x, y)
    ").assert_compile_error("type string does not match inferred type int for T");

    Tester::new_single_source_expect_err("comparable", "
    func Eq[T comparable](a, b T) bool {
        return a == b
    }
    Eq([]int{}, []int{})
    ").assert_compile_error("[]int does not satisfy comparable");

    Tester::new_single_source_expect_err("too many type arguments", "
    func Id[T any](v T) T {
        return v
    }
    Id[int, string](1)
    ").assert_compile_error("got 2 type arguments but Id has 1 type parameters");
}

#[test]
fn test_native_generics() {
    let exports = Exports::new()
        .with("example.com/util/util", "Sum", Native::generic("
        func Sum[T any](s []T, add func(T, T) T) T {
            var total T
            for i := 0; i < len(s); i++ {
                total = add(total, s[i])
            }
            return total
        }
        "))
        .with("example.com/util/util", "Twice", Native::generic("
        func Twice[T any](s []T, add func(T, T) T) T {
            return add(Sum(s, add), Sum(s, add))
        }
        "));

    Tester::new("imported generic")
        .with_exports(exports.clone())
        .eval("
        import \"example.com/util\"
        func add(a, b int) int {
            return a + b
        }
        util.Sum([]int{1, 2, 3}, add)
        ")
        .expect_ok()
        .assert_value(6);

    Tester::new("generic using its package")
        .with_exports(exports)
        .eval("
        import \"example.com/util\"
        func cat(a, b string) string {
            return a + b
        }
        util.Twice([]string{\"a\", \"b\"}, cat)
        ")
        .expect_ok()
        .assert_text("abab")
        .for_interpreter(|interp| {
            let prog = interp.program();
            // Twice[string] and the Sum[string] it calls
            assert_eq!(prog.instances.len(), 2);
            let scope = prog.packages["example.com/util/util"];
            assert!(prog.scopes.lookup_local(scope, "Sum[string]").is_some());
            assert!(prog.scopes.lookup_local(scope, "Twice[string]").is_some());
        });
}
