#[macro_use]
mod macros;

mod common;
mod interp;

pub use interp::{
    needs_more_input, CancelHandle, Context, EvalError, Exports, ExportsError, Func, GenericFunc,
    Interpreter, Native, NativeCall, NativeFunc, Options, Panic, ParseError, Value,
};
