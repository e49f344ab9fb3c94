/// ops.rs
///
/// Operator and conversion semantics on runtime values, shared by the
/// executor and by constant folding in the compiler. The operand kind is the
/// underlying basic type both operands were converted to.

use crate::common::*;
use crate::interp::ast::Op;
use crate::interp::types::Basic;
use super::action::Conversion;
use super::value::{Slice, Value};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OpError {
    DivideByZero,
    /// Overflow of an untyped constant
    Overflow,
    Invalid(String),
}

impl OpError {
    pub fn message(&self) -> String {
        match self {
            OpError::DivideByZero => String::from("runtime error: integer divide by zero"),
            OpError::Overflow => String::from("constant overflow"),
            OpError::Invalid(msg) => msg.clone(),
        }
    }
}

fn invalid(op: Op, kind: Basic) -> OpError {
    OpError::Invalid(format!("operator {} not defined on {}", op.token(), kind.name()))
}

/// Truncates a signed value to the width of the kind.
pub(crate) fn wrap_int(v: i64, kind: Basic) -> Value {
    match kind.bits() {
        Some(8) => Value::Int(v as i8 as i64),
        Some(16) => Value::Int(v as i16 as i64),
        Some(32) => Value::Int(v as i32 as i64),
        _ => Value::Int(v),
    }
}

pub(crate) fn wrap_uint(v: u64, kind: Basic) -> Value {
    match kind.bits() {
        Some(8) => Value::Uint(v as u8 as u64),
        Some(16) => Value::Uint(v as u16 as u64),
        Some(32) => Value::Uint(v as u32 as u64),
        _ => Value::Uint(v),
    }
}

fn float_of(kind: Basic, v: f64) -> Value {
    if kind == Basic::Float32 {
        Value::Float(v as f32 as f64)
    } else {
        Value::Float(v)
    }
}

pub(crate) fn unary(op: Op, x: &Value, kind: Basic) -> Result<Value, OpError> {
    match op {
        Op::Pos => Ok(x.clone()),
        Op::Not => match x {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            _ => Err(invalid(op, kind)),
        },
        Op::Neg => {
            if kind.is_float() {
                return Ok(float_of(kind, -x.as_float().unwrap_or(0.0)));
            }
            if kind.is_unsigned() {
                return Ok(wrap_uint(x.as_uint().unwrap_or(0).wrapping_neg(), kind));
            }
            if kind.is_integer() {
                let v = x.as_int().unwrap_or(0);
                if kind.is_untyped() {
                    return v.checked_neg().map(Value::Int).ok_or(OpError::Overflow);
                }
                return Ok(wrap_int(v.wrapping_neg(), kind));
            }
            Err(invalid(op, kind))
        }
        Op::BitNot => {
            if kind.is_unsigned() {
                return Ok(wrap_uint(!x.as_uint().unwrap_or(0), kind));
            }
            if kind.is_integer() {
                return Ok(wrap_int(!x.as_int().unwrap_or(0), kind));
            }
            Err(invalid(op, kind))
        }
        _ => Err(invalid(op, kind)),
    }
}

fn compare<T: PartialOrd>(op: Op, a: T, b: T) -> bool {
    match op {
        Op::Lss => a < b,
        Op::Leq => a <= b,
        Op::Gtr => a > b,
        Op::Geq => a >= b,
        _ => false,
    }
}

pub(crate) fn binary(op: Op, x: &Value, y: &Value, kind: Basic) -> Result<Value, OpError> {
    match op {
        Op::Eql => return Ok(Value::Bool(x.equals(y))),
        Op::Neq => return Ok(Value::Bool(!x.equals(y))),
        Op::Lss | Op::Leq | Op::Gtr | Op::Geq => {
            let result = if kind.is_string() {
                compare(op, x.as_str().unwrap_or(""), y.as_str().unwrap_or(""))
            } else if kind.is_float() {
                compare(op, x.as_float().unwrap_or(0.0), y.as_float().unwrap_or(0.0))
            } else if kind.is_unsigned() {
                compare(op, x.as_uint().unwrap_or(0), y.as_uint().unwrap_or(0))
            } else if kind.is_integer() {
                compare(op, x.as_int().unwrap_or(0), y.as_int().unwrap_or(0))
            } else {
                return Err(invalid(op, kind));
            };
            return Ok(Value::Bool(result));
        }
        Op::LAnd => return Ok(Value::Bool(x.truthy() && y.truthy())),
        Op::LOr => return Ok(Value::Bool(x.truthy() || y.truthy())),
        _ => {}
    }

    if kind.is_string() {
        return match (op, x.as_str(), y.as_str()) {
            (Op::Add, Some(a), Some(b)) => Ok(Value::String(Arc::from(format!("{}{}", a, b)))),
            _ => Err(invalid(op, kind)),
        };
    }
    if kind.is_float() {
        let (a, b) = (x.as_float().unwrap_or(0.0), y.as_float().unwrap_or(0.0));
        let v = match op {
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
            Op::Quo => a / b,
            _ => return Err(invalid(op, kind)),
        };
        return Ok(float_of(kind, v));
    }
    if kind.is_unsigned() {
        return unsigned(op, x.as_uint().unwrap_or(0), y.as_uint().unwrap_or(0), kind);
    }
    if kind.is_integer() {
        let (a, b) = (x.as_int().unwrap_or(0), y.as_int().unwrap_or(0));
        if kind.is_untyped() {
            return untyped_int(op, a, b);
        }
        return signed(op, a, b, kind);
    }
    Err(invalid(op, kind))
}

fn shift_count(b: u64) -> u32 {
    b.min(64) as u32
}

fn signed(op: Op, a: i64, b: i64, kind: Basic) -> Result<Value, OpError> {
    let v = match op {
        Op::Add => a.wrapping_add(b),
        Op::Sub => a.wrapping_sub(b),
        Op::Mul => a.wrapping_mul(b),
        Op::Quo | Op::Rem if b == 0 => return Err(OpError::DivideByZero),
        Op::Quo => a.wrapping_div(b),
        Op::Rem => a.wrapping_rem(b),
        Op::And => a & b,
        Op::Or => a | b,
        Op::Xor => a ^ b,
        Op::AndNot => a & !b,
        Op::Shl | Op::Shr if b < 0 => {
            return Err(OpError::Invalid(String::from("runtime error: negative shift amount")))
        }
        Op::Shl => a.checked_shl(shift_count(b as u64)).unwrap_or(0),
        Op::Shr => a.checked_shr(shift_count(b as u64)).unwrap_or(if a < 0 { -1 } else { 0 }),
        _ => return Err(invalid(op, kind)),
    };
    Ok(wrap_int(v, kind))
}

fn unsigned(op: Op, a: u64, b: u64, kind: Basic) -> Result<Value, OpError> {
    let v = match op {
        Op::Add => a.wrapping_add(b),
        Op::Sub => a.wrapping_sub(b),
        Op::Mul => a.wrapping_mul(b),
        Op::Quo | Op::Rem if b == 0 => return Err(OpError::DivideByZero),
        Op::Quo => a / b,
        Op::Rem => a % b,
        Op::And => a & b,
        Op::Or => a | b,
        Op::Xor => a ^ b,
        Op::AndNot => a & !b,
        Op::Shl => a.checked_shl(shift_count(b)).unwrap_or(0),
        Op::Shr => a.checked_shr(shift_count(b)).unwrap_or(0),
        _ => return Err(invalid(op, kind)),
    };
    Ok(wrap_uint(v, kind))
}

/// Untyped integer constants do not wrap.
fn untyped_int(op: Op, a: i64, b: i64) -> Result<Value, OpError> {
    let v = match op {
        Op::Add => a.checked_add(b),
        Op::Sub => a.checked_sub(b),
        Op::Mul => a.checked_mul(b),
        Op::Quo | Op::Rem if b == 0 => return Err(OpError::DivideByZero),
        Op::Quo => a.checked_div(b),
        Op::Rem => a.checked_rem(b),
        Op::And => Some(a & b),
        Op::Or => Some(a | b),
        Op::Xor => Some(a ^ b),
        Op::AndNot => Some(a & !b),
        Op::Shl if (0..63).contains(&b) => a.checked_mul(1i64 << b),
        Op::Shr if b >= 0 => Some(a.checked_shr(shift_count(b as u64)).unwrap_or(if a < 0 { -1 } else { 0 })),
        Op::Shl | Op::Shr => None,
        _ => return Err(invalid(op, Basic::UntypedInt)),
    };
    v.map(Value::Int).ok_or(OpError::Overflow)
}

fn utf8_of(bytes: Vec<u8>) -> Value {
    Value::String(Arc::from(String::from_utf8_lossy(&bytes).as_ref()))
}

pub(crate) fn convert(x: &Value, conv: Conversion) -> Value {
    match conv {
        Conversion::Identity => x.clone(),
        Conversion::Int(kind) => {
            let v = match x {
                Value::Float(f) if kind.is_unsigned() => Value::Uint(*f as u64),
                Value::Float(f) => Value::Int(*f as i64),
                other => other.clone(),
            };
            if kind.is_unsigned() {
                wrap_uint(v.as_uint().unwrap_or(0), kind)
            } else {
                wrap_int(v.as_int().unwrap_or(0), kind)
            }
        }
        Conversion::Float(kind) => float_of(kind, x.as_float().unwrap_or(0.0)),
        Conversion::RuneToString => {
            let c = x.as_int()
                .and_then(|i| u32::try_from(i).ok())
                .and_then(char::from_u32)
                .unwrap_or(char::REPLACEMENT_CHARACTER);
            Value::String(Arc::from(c.to_string()))
        }
        Conversion::BytesToString => {
            let bytes = x.elements().unwrap_or_default().iter().map(|b| b.as_uint().unwrap_or(0) as u8).collect();
            utf8_of(bytes)
        }
        Conversion::RunesToString => {
            let s: String = x.elements().unwrap_or_default().iter()
                .map(|r| r.as_int()
                    .and_then(|i| u32::try_from(i).ok())
                    .and_then(char::from_u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect();
            Value::String(Arc::from(s))
        }
        Conversion::StringToBytes => {
            let s = x.as_str().unwrap_or("");
            Value::Slice(Slice::from_vec(s.bytes().map(|b| Value::Uint(b as u64)).collect()))
        }
        Conversion::StringToRunes => {
            let s = x.as_str().unwrap_or("");
            Value::Slice(Slice::from_vec(s.chars().map(|c| Value::Int(c as i64)).collect()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sized_integers_wrap() {
        let v = binary(Op::Add, &Value::Int(127), &Value::Int(1), Basic::Int8).unwrap();
        assert_eq!(v.as_int(), Some(-128));
        let v = binary(Op::Sub, &Value::Uint(0), &Value::Uint(1), Basic::Uint8).unwrap();
        assert_eq!(v.as_uint(), Some(255));
        let v = unary(Op::BitNot, &Value::Uint(0), Basic::Uint16).unwrap();
        assert_eq!(v.as_uint(), Some(0xffff));
    }

    #[test]
    fn integer_division_by_zero_is_reported() {
        assert!(matches!(binary(Op::Quo, &Value::Int(1), &Value::Int(0), Basic::Int), Err(OpError::DivideByZero)));
        assert!(matches!(binary(Op::Rem, &Value::Uint(1), &Value::Uint(0), Basic::Uint), Err(OpError::DivideByZero)));
        let inf = binary(Op::Quo, &Value::Float(1.0), &Value::Float(0.0), Basic::Float64).unwrap();
        assert_eq!(inf.as_float(), Some(f64::INFINITY));
    }

    #[test]
    fn untyped_constants_do_not_overflow_silently() {
        let max = Value::Int(i64::MAX);
        assert!(matches!(binary(Op::Add, &max, &Value::Int(1), Basic::UntypedInt), Err(OpError::Overflow)));
        assert_eq!(binary(Op::Add, &max, &Value::Int(1), Basic::Int).unwrap().as_int(), Some(i64::MIN));
    }

    #[test]
    fn strings_concatenate_and_compare() {
        let v = binary(Op::Add, &Value::from("go"), &Value::from("pher"), Basic::String).unwrap();
        assert_eq!(v.as_str(), Some("gopher"));
        let lt = binary(Op::Lss, &Value::from("a"), &Value::from("b"), Basic::String).unwrap();
        assert!(lt.truthy());
        assert!(binary(Op::Sub, &Value::from("a"), &Value::from("b"), Basic::String).is_err());
    }

    #[test]
    fn conversions() {
        assert_eq!(convert(&Value::Float(3.9), Conversion::Int(Basic::Int)).as_int(), Some(3));
        assert_eq!(convert(&Value::Int(300), Conversion::Int(Basic::Uint8)).as_uint(), Some(44));
        assert_eq!(convert(&Value::Int(65), Conversion::RuneToString).as_str(), Some("A"));
        let bytes = convert(&Value::from("hé"), Conversion::StringToBytes);
        assert_eq!(bytes.elements().unwrap().len(), 3);
        assert_eq!(convert(&bytes, Conversion::BytesToString).as_str(), Some("hé"));
        let runes = convert(&Value::from("hé"), Conversion::StringToRunes);
        assert_eq!(convert(&runes, Conversion::RunesToString).as_str(), Some("hé"));
    }
}
