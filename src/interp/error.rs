use crate::common::*;
use super::exports::ExportsError;
use super::input_source::ParseError;
use super::panic::Panic;

/// Error returned by the evaluation entry points.
#[derive(Debug, Clone, derive_more::Display)]
pub enum EvalError {
    /// Syntax, resolution, typing and instantiation errors. Nothing ran.
    #[display(fmt = "{}", _0)]
    Compile(ParseError),
    /// Unrecovered panic of the interpreted program
    #[display(fmt = "{}", _0)]
    Panic(Arc<Panic>),
    #[display(fmt = "context canceled")]
    Cancelled,
    #[display(fmt = "context deadline exceeded")]
    DeadlineExceeded,
    #[display(fmt = "{}", _0)]
    Exports(ExportsError),
    #[display(fmt = "import_used may only be called once, before the first evaluation")]
    ImportUsed,
    /// The host could not run the evaluation
    #[display(fmt = "evaluation task: {}", _0)]
    Thread(String),
}

impl std::error::Error for EvalError {}

impl EvalError {
    /// Message of a compile error without its source context.
    pub fn compile_message(&self) -> Option<&str> {
        match self {
            EvalError::Compile(e) => Some(e.message()),
            _ => None,
        }
    }

    pub fn panic(&self) -> Option<&Arc<Panic>> {
        match self {
            EvalError::Panic(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, EvalError::Cancelled | EvalError::DeadlineExceeded)
    }
}

impl From<ParseError> for EvalError {
    fn from(e: ParseError) -> Self {
        EvalError::Compile(e)
    }
}

impl From<ExportsError> for EvalError {
    fn from(e: ExportsError) -> Self {
        EvalError::Exports(e)
    }
}

impl From<Arc<Panic>> for EvalError {
    fn from(p: Arc<Panic>) -> Self {
        EvalError::Panic(p)
    }
}
