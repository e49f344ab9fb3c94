pub(crate) mod arena;
pub(crate) mod ast;
pub(crate) mod compile;
pub(crate) mod context;
pub(crate) mod error;
pub(crate) mod eval;
pub(crate) mod exports;
pub(crate) mod generic;
pub(crate) mod input_source;
pub(crate) mod interpreter;
pub(crate) mod panic;
pub(crate) mod parser;
pub(crate) mod program;
pub(crate) mod scope;
pub(crate) mod stack;
pub(crate) mod tokenizer;
pub(crate) mod tokens;
pub(crate) mod types;

#[cfg(test)]
pub(crate) mod tests;

pub use context::{CancelHandle, Context};
pub use error::EvalError;
pub use eval::value::Value;
pub use exports::{Exports, ExportsError, GenericFunc, Native, NativeCall, NativeFunc};
pub use input_source::ParseError;
pub use interpreter::{Interpreter, Options};
pub use panic::Panic;
pub use stack::Func;

/// Whether a parse error only means that the input is incomplete, so that a
/// line based front end should read another line and parse again.
/// `last_line` is the most recently read line.
pub fn needs_more_input(err: &ParseError, last_line: &str) -> bool {
    let msg = err.message();
    if msg.ends_with("found 'EOF'") || msg == "raw string literal not terminated" {
        return true;
    }
    msg.starts_with("expected operand, found '}'") && !last_line.trim_end().ends_with('}')
}
