/// action.rs
///
/// Executable operations attached to compiled nodes. An action reads its
/// operands from fixed frame coordinates (or constants) and produces the
/// value stored in its node's own slot.

use std::sync::Arc;

use crate::interp::ast::{NodeId, Op};
use crate::interp::types::Basic;
use super::builtins::BuiltinOp;
use super::value::Value;

/// Where a value is read from.
#[derive(Debug, Clone)]
pub enum Operand {
    /// Slot `index` of the frame `level` steps up the lexical chain
    Slot{ level: usize, index: usize },
    /// Package level variable in the root frame
    Global(usize),
    Const(Value),
}

impl Operand {
    pub fn is_const(&self) -> bool {
        matches!(self, Operand::Const(_))
    }

    pub fn as_const(&self) -> Option<&Value> {
        match self {
            Operand::Const(v) => Some(v),
            _ => None,
        }
    }
}

/// Where a value is written to. `path` selects nested struct fields.
#[derive(Debug, Clone)]
pub enum Target {
    /// Blank identifier
    Discard,
    /// Variable slot (`Slot` or `Global` operand)
    Var{ op: Operand, path: Vec<usize> },
    /// Through a pointer: `*p = v`, `p.f = v`
    Deref{ ptr: Operand, path: Vec<usize> },
    /// Slice element: `s[i] = v`, `s[i].f = v`
    Index{ x: Operand, index: Operand, path: Vec<usize> },
}

/// Function being called by a call node.
#[derive(Debug, Clone)]
pub enum Callee {
    /// Declared function or generic instance
    Static(NodeId),
    /// Function value: closure, native function or nil
    Dynamic(Operand),
}

/// How a method receiver is produced from the selector's operand.
#[derive(Debug, Clone)]
pub enum RecvArg {
    Value(Operand),
    /// Pointer method called on an addressable value
    AddrOf(Target),
    /// Value method called through a pointer
    Deref(Operand),
}

#[derive(Debug, Clone)]
pub struct CallAction {
    pub callee: Callee,
    pub recv: Option<RecvArg>,
    pub args: Vec<Operand>,
    /// Single argument holding the results of a multi-value call
    pub spread_tuple: bool,
    /// Number of fixed parameters of a variadic callee when the trailing
    /// arguments must be packed into a slice
    pub variadic: Option<usize>,
    /// Name of a native callee, for call stacks
    pub native_name: Option<Arc<str>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Integer kinds, truncating to the width of the target
    Int(Basic),
    Float(Basic),
    /// Integer to the string holding that code point
    RuneToString,
    BytesToString,
    RunesToString,
    StringToBytes,
    StringToRunes,
    /// Same representation, nothing to do
    Identity,
}

#[derive(Debug, Clone)]
pub enum CompositeKind {
    /// Zero value of the struct and the explicitly set fields
    Struct{ zero: Value, fields: Vec<(usize, Operand)> },
    Slice{ elems: Vec<Operand> },
}

#[derive(Debug, Clone)]
pub enum Action {
    Nop,
    Unary{ op: Op, x: Operand, kind: Basic },
    Binary{ op: Op, x: Operand, y: Operand, kind: Basic },
    /// `x && y`: `y` is only evaluated if `x` holds
    LogicalAnd{ x: Operand, y: Operand },
    LogicalOr{ x: Operand, y: Operand },
    AddrOf(Target),
    /// Heap allocation of a value, as in `&T{...}`
    Alloc(Operand),
    Deref(Operand),
    Field{ x: Operand, path: Vec<usize>, through_ptr: bool },
    Index{ x: Operand, index: Operand },
    Slice{ x: Operand, low: Option<Operand>, high: Option<Operand> },
    Composite(CompositeKind),
    Convert{ x: Operand, conv: Conversion },
    /// Closure creation for a function literal
    MakeFunc(NodeId),
    Call(Box<CallAction>),
    Builtin{ op: BuiltinOp, args: Vec<Operand> },
    /// `Error()` called on a value of the error interface
    ErrorMethod(Operand),
    Assign{ targets: Vec<Target>, values: Vec<Operand> },
    /// Multi-value assignment from a single call
    AssignTuple{ targets: Vec<Target>, value: Operand },
    OpAssign{ target: Target, op: Op, y: Operand, kind: Basic },
    /// Receive; `zero` is the result once the channel is closed
    Recv{ ch: Operand, zero: Value },
    Send{ ch: Operand, value: Operand },
    /// Writes the result slots and leaves the function. A single operand
    /// holding a tuple fills all results.
    Return{ values: Vec<Operand>, tuple: bool },
    /// Evaluates the callee and arguments of the call node and defers it
    Defer(NodeId),
    Go(NodeId),
    /// Records the value of a top-level expression statement
    SetResult(Operand),
}

impl Default for Action {
    fn default() -> Self {
        Action::Nop
    }
}
