use std::io::Write;

use crate::common::*;
use crate::interp::ast::Node;
use super::channel::Channel;
use super::executor::{Executor, Unwind};
use super::frame::Frame;
use super::value::{Pointer, Slice, Value};

/// Predeclared functions of the universe scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Append,
    Cap,
    Close,
    Copy,
    Len,
    Make,
    New,
    Panic,
    Print,
    Println,
    Recover,
}

impl Builtin {
    pub const ALL: [Builtin; 11] = [
        Builtin::Append, Builtin::Cap, Builtin::Close, Builtin::Copy, Builtin::Len, Builtin::Make,
        Builtin::New, Builtin::Panic, Builtin::Print, Builtin::Println, Builtin::Recover,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Append => "append",
            Builtin::Cap => "cap",
            Builtin::Close => "close",
            Builtin::Copy => "copy",
            Builtin::Len => "len",
            Builtin::Make => "make",
            Builtin::New => "new",
            Builtin::Panic => "panic",
            Builtin::Print => "print",
            Builtin::Println => "println",
            Builtin::Recover => "recover",
        }
    }
}

/// Builtin call as compiled: the type dependent parts (zero values, the
/// kind made by `make`) are resolved statically.
#[derive(Debug, Clone)]
pub enum BuiltinOp {
    Append{ spread: bool },
    Cap,
    Close,
    Copy,
    Len,
    MakeSlice{ zero: Value },
    MakeChan,
    New{ zero: Value },
    Panic,
    Print{ newline: bool },
    Recover,
}

fn length(v: &Value) -> Option<usize> {
    match v {
        Value::Nil => Some(0),
        Value::String(s) => Some(s.len()),
        Value::Slice(s) => Some(s.len()),
        Value::Chan(c) => Some(c.len()),
        _ => None,
    }
}

/// Elements appended by `append(s, x...)`: a slice, or the bytes of a string.
fn spread_elements(v: &Value) -> Vec<Value> {
    match v {
        Value::String(s) => s.bytes().map(|b| Value::Uint(b as u64)).collect(),
        other => other.elements().unwrap_or_default(),
    }
}

impl Executor {
    pub(crate) fn exec_builtin(
        &mut self, node: &Node, op: &BuiltinOp, mut args: Vec<Value>, frame: &Arc<Frame>,
    ) -> Result<Value, Unwind> {
        match op {
            BuiltinOp::Len => {
                let v = args.first().cloned().unwrap_or(Value::Nil);
                Ok(Value::Int(length(&v).unwrap_or(0) as i64))
            }
            BuiltinOp::Cap => match args.first() {
                Some(Value::Slice(s)) => Ok(Value::Int(s.cap as i64)),
                Some(Value::Chan(c)) => Ok(Value::Int(c.cap() as i64)),
                _ => Ok(Value::Int(0)),
            },
            BuiltinOp::Append{ spread } => {
                let base = if args.is_empty() { Value::Nil } else { args.remove(0) };
                let values = if *spread {
                    args.first().map(spread_elements).unwrap_or_default()
                } else {
                    args
                };
                match base {
                    Value::Slice(s) => Ok(Value::Slice(s.append(values))),
                    _ if values.is_empty() => Ok(Value::Nil),
                    _ => Ok(Value::Slice(Slice::from_vec(values))),
                }
            }
            BuiltinOp::Copy => {
                let dst = match args.first() {
                    Some(Value::Slice(s)) => s.clone(),
                    _ => return Ok(Value::Int(0)),
                };
                let src = args.get(1).map(spread_elements).unwrap_or_default();
                let n = dst.len().min(src.len());
                for (i, v) in src.into_iter().take(n).enumerate() {
                    dst.set(i, v);
                }
                Ok(Value::Int(n as i64))
            }
            BuiltinOp::MakeSlice{ zero } => {
                let len = args.first().and_then(Value::as_int).unwrap_or(0);
                let cap = args.get(1).and_then(Value::as_int).unwrap_or(len);
                if len < 0 || cap < len {
                    let msg = if len < 0 { "len" } else { "cap" };
                    return Err(self.runtime_panic(node, format!("runtime error: makeslice: {} out of range", msg)));
                }
                Ok(Value::Slice(Slice::with_len(len as usize, cap as usize, zero)))
            }
            BuiltinOp::MakeChan => {
                let cap = args.first().and_then(Value::as_int).unwrap_or(0);
                if cap < 0 {
                    return Err(self.runtime_panic(node, String::from("makechan: size out of range")));
                }
                Ok(Value::Chan(Channel::new(cap as usize)))
            }
            BuiltinOp::New{ zero } => Ok(Value::Pointer(Pointer::new_cell(zero.clone()))),
            BuiltinOp::Close => match args.first() {
                Some(Value::Chan(ch)) => {
                    if !ch.close() {
                        return Err(self.runtime_panic(node, String::from("close of closed channel")));
                    }
                    Ok(Value::Nil)
                }
                _ => Err(self.runtime_panic(node, String::from("close of nil channel"))),
            },
            BuiltinOp::Panic => {
                let value = args.pop().unwrap_or(Value::Nil);
                Err(self.panic_with(node.this, value))
            }
            BuiltinOp::Print{ newline } => {
                let sep = if *newline { " " } else { "" };
                let mut line = args.iter().map(Value::print_repr).collect::<Vec<_>>().join(sep);
                if *newline {
                    line.push('\n');
                }
                let mut out = self.shared.options.stdout.lock();
                // Output errors are not observable by the interpreted program
                let _ = out.write_all(line.as_bytes());
                let _ = out.flush();
                Ok(Value::Nil)
            }
            BuiltinOp::Recover => {
                // Only a function invoked as a deferred call may stop a panic
                let recovered = frame.defer_parent.as_ref().and_then(|parent| parent.recovered.lock().take());
                if recovered.is_some() {
                    tracing::debug!(task = self.task, "panic recovered");
                }
                Ok(recovered.unwrap_or(Value::Nil))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_are_unique() {
        let names: HashSet<_> = Builtin::ALL.iter().map(|b| b.name()).collect();
        assert_eq!(names.len(), Builtin::ALL.len());
    }

    #[test]
    fn appending_a_string_spreads_bytes() {
        let bytes = spread_elements(&Value::from("hi"));
        assert_eq!(bytes.len(), 2);
        assert_eq!(bytes[0].as_uint(), Some(b'h' as u64));
        assert_eq!(length(&Value::from("héllo")), Some(6));
    }
}
