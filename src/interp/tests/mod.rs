/**
 * interp/tests
 *
 * Tests evaluating source text end to end: compilation, execution, native
 * bindings, generics, panics with their stack traces and cancellation. Unit
 * tests of the individual pieces live next to their code.
 */

mod utils;
mod eval_basics;
mod eval_defer;
mod eval_generics;
mod eval_natives;
mod eval_stack;
mod eval_cancel;
mod partial_input;

pub(crate) use utils::Tester; // the testing harness
pub(crate) use crate::interp::Value;
