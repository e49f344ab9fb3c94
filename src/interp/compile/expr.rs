use crate::common::*;
use crate::interp::ast::{Literal, NodeId, NodeKind, Op};
use crate::interp::eval::action::{Action, CallAction, Callee, CompositeKind, Conversion, Operand, RecvArg, Target};
use crate::interp::eval::builtins::{Builtin, BuiltinOp};
use crate::interp::eval::ops::{self, OpError};
use crate::interp::eval::value::{format_float, FuncValue, Value};
use crate::interp::input_source::ParseError;
use crate::interp::scope::{SymKind, Symbol};
use crate::interp::types::{Basic, ChanDir, FuncType, Type};
use super::Compiler;

const RED_ZONE: usize = 64 * 1024;
const STACK_PER_RECURSION: usize = 1024 * 1024;

fn untyped_rank(t: &Type) -> u8 {
    match t {
        Type::Basic(Basic::UntypedInt) => 1,
        Type::Basic(Basic::UntypedRune) => 2,
        Type::Basic(Basic::UntypedFloat) => 3,
        _ => 0,
    }
}

/// Range of values an integer kind can hold.
fn int_range(kind: Basic) -> (i128, i128) {
    match (kind.is_unsigned(), kind.bits()) {
        (true, Some(n)) => (0, (1i128 << n) - 1),
        (false, Some(n)) => (-(1i128 << (n - 1)), (1i128 << (n - 1)) - 1),
        _ => (i64::MIN as i128, u64::MAX as i128),
    }
}

impl<'a> Compiler<'a> {
    pub(super) fn expr(&mut self, id: NodeId) -> Result<(), ParseError> {
        self.expr_hint(id, None)
    }

    /// Compiles an expression. `hint` is the type of an element whose
    /// composite literal type was elided.
    pub(super) fn expr_hint(&mut self, id: NodeId, hint: Option<&Type>) -> Result<(), ParseError> {
        stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, || self.expr_inner(id, hint))
    }

    fn expr_inner(&mut self, id: NodeId, hint: Option<&Type>) -> Result<(), ParseError> {
        match self.prog.nodes[id].kind {
            NodeKind::Ident => self.ident_expr(id),
            NodeKind::BasicLit => self.literal(id),
            NodeKind::FuncLit => self.func_lit(id),
            NodeKind::CompositeLit => self.composite(id, hint),
            NodeKind::Selector => self.selector(id),
            NodeKind::Index | NodeKind::IndexList => self.index(id),
            NodeKind::SliceExpr => self.slice_expr(id),
            NodeKind::Call => self.call(id),
            NodeKind::Star => self.star(id),
            NodeKind::Unary => self.unary(id),
            NodeKind::Binary => self.binary(id),
            _ => match self.try_type(id)? {
                Some(t) => Err(self.error(id, format!("{} (type) is not an expression", self.show(&t)))),
                None => Err(self.error(id, String::from("expected expression"))),
            },
        }
    }

    // --- Values and their types

    /// Short source-like rendering of an expression for messages.
    pub(super) fn describe(&self, id: NodeId) -> String {
        let n = &self.prog.nodes[id];
        match n.kind {
            NodeKind::Ident => n.ident.clone(),
            NodeKind::BasicLit => match &n.lit {
                Some(Literal::Int(i)) => i.to_string(),
                Some(Literal::Float(f)) => format_float(*f),
                Some(Literal::Rune(c)) => format!("{:?}", c),
                Some(Literal::String(s)) => format!("{:?}", s),
                None => String::new(),
            },
            NodeKind::Selector => format!("{}.{}", self.describe(n.child(0)), n.ident),
            NodeKind::Call if n.children.len() == 1 => format!("{}()", self.describe(n.child(0))),
            NodeKind::Call => format!("{}(...)", self.describe(n.child(0))),
            NodeKind::Index => format!("{}[{}]", self.describe(n.child(0)), self.describe(n.child(1))),
            NodeKind::Star => format!("*{}", self.describe(n.child(0))),
            NodeKind::Unary => format!("{}{}", n.op.token(), self.describe(n.child(0))),
            NodeKind::Binary => format!("{} {} {}", self.describe(n.child(0)), n.op.token(), self.describe(n.child(1))),
            NodeKind::FuncLit => String::from("func literal"),
            NodeKind::CompositeLit => String::from("composite literal"),
            _ => String::from("expression"),
        }
    }

    /// Type of a compiled expression used as a single value.
    pub(super) fn value_type(&self, id: NodeId) -> Result<Type, ParseError> {
        match &self.prog.nodes[id].typ {
            None => Err(self.error(id, format!("{} (no value) used as value", self.describe(id)))),
            Some(Type::Tuple(_)) => Err(self.error(id, format!("multiple-value {} in single-value context", self.describe(id)))),
            Some(t) => Ok(t.clone()),
        }
    }

    pub(super) fn operand(&self, id: NodeId) -> Result<Operand, ParseError> {
        match &self.prog.nodes[id].value {
            Some(op) => Ok(op.clone()),
            None => Err(self.error(id, format!("{} (no value) used as value", self.describe(id)))),
        }
    }

    fn cannot_use(&self, id: NodeId, from: &Type, to: &Type) -> ParseError {
        let msg = format!("cannot use {} (value of type {}) as {} value", self.describe(id), self.show(from), self.show(to));
        self.error(id, msg)
    }

    /// Operand of a compiled expression converted for a destination of type
    /// `to`: constants take the destination's representation, other values
    /// must be assignable.
    pub(super) fn value_of(&mut self, id: NodeId, to: &Type) -> Result<Operand, ParseError> {
        let from = self.value_type(id)?;
        let op = self.operand(id)?;
        if !from.assignable_to(to, &self.prog.named, &|_| false) {
            return Err(self.cannot_use(id, &from, to));
        }
        match &op {
            Operand::Const(v) if from.is_untyped() => Ok(Operand::Const(self.convert_const(id, v, &from, to)?)),
            _ => Ok(op),
        }
    }

    /// Operand and type of a value in a context without a type: untyped
    /// constants take their default type.
    pub(super) fn value_default(&mut self, id: NodeId) -> Result<(Operand, Type), ParseError> {
        let from = self.value_type(id)?;
        if from == Type::NIL {
            return Err(self.error(id, String::from("use of untyped nil in assignment")));
        }
        if from.is_untyped() {
            let to = from.defaulted();
            let op = self.value_of(id, &to)?;
            return Ok((op, to));
        }
        Ok((self.operand(id)?, from))
    }

    /// Representation of a constant of type `from` in a slot of type `to`.
    pub(super) fn convert_const(&self, at: NodeId, v: &Value, from: &Type, to: &Type) -> Result<Value, ParseError> {
        if from == to {
            return Ok(v.clone());
        }
        if *from == Type::NIL {
            return Ok(Value::Nil);
        }
        let target = if to.is_interface(&self.prog.named) { from.defaulted() } else { to.clone() };
        let kind = match target.underlying_basic(&self.prog.named) {
            Some(kind) => kind,
            None => return Ok(v.clone()),
        };
        let shown = match v {
            Value::Float(f) => format_float(*f),
            other => other.print_repr(),
        };
        if kind.is_integer() {
            let i = match v {
                Value::Int(i) => *i as i128,
                Value::Uint(u) => *u as i128,
                Value::Float(f) => {
                    if f.fract() != 0.0 || !f.is_finite() {
                        return Err(self.error(at, format!("constant {} truncated to integer", shown)));
                    }
                    *f as i128
                }
                other => return Ok(other.clone()),
            };
            let (min, max) = int_range(kind);
            if i < min || i > max {
                return Err(self.error(at, format!("constant {} overflows {}", shown, self.show(&target))));
            }
            return Ok(if kind.is_unsigned() { Value::Uint(i as u64) } else { Value::Int(i as i64) });
        }
        if kind.is_float() {
            let f = v.as_float().unwrap_or(0.0);
            return Ok(Value::Float(if kind == Basic::Float32 { f as f32 as f64 } else { f }));
        }
        Ok(v.clone())
    }

    fn const_error(&self, at: NodeId, err: OpError) -> ParseError {
        match err {
            OpError::DivideByZero => self.error(at, String::from("invalid operation: division by zero")),
            OpError::Overflow => self.error(at, format!("constant overflow in {}", self.describe(at))),
            OpError::Invalid(msg) => self.error(at, msg),
        }
    }

    // --- Leaves

    fn ident_expr(&mut self, id: NodeId) -> Result<(), ParseError> {
        let name = self.ident(id).to_string();
        if name == "_" {
            return Err(self.error(id, String::from("cannot use _ as value")));
        }
        match self.lookup(&name) {
            Some(sym) => self.symbol_expr(id, sym, &name),
            None => Err(self.error(id, format!("undefined: {}", name))),
        }
    }

    /// Compiles a reference to a resolved symbol.
    pub(super) fn symbol_expr(&mut self, id: NodeId, sym: Symbol, name: &str) -> Result<(), ParseError> {
        match sym.kind {
            SymKind::Var => {
                let op = self.sym_operand(&sym);
                let node = &mut self.prog.nodes[id];
                if let Operand::Slot{ level, .. } = op {
                    node.level = level;
                }
                node.global = sym.global;
                node.findex = Some(sym.index);
                node.sym = Some(sym.clone());
                self.finish_static(id, sym.typ, op);
                Ok(())
            }
            SymKind::Const | SymKind::Func | SymKind::Native => {
                let value = sym.value.clone().unwrap_or(Value::Nil);
                self.prog.nodes[id].sym = Some(sym.clone());
                self.finish_static(id, sym.typ, Operand::Const(value));
                Ok(())
            }
            SymKind::Type => Err(self.error(id, format!("{} (type) is not an expression", name))),
            SymKind::Generic => Err(self.error(id, format!("cannot use generic function {} without instantiation", name))),
            SymKind::Builtin(_) => Err(self.error(id, format!("{} (built-in function) must be called", name))),
            SymKind::Package => Err(self.error(id, format!("use of package {} without selector", name))),
        }
    }

    fn literal(&mut self, id: NodeId) -> Result<(), ParseError> {
        let (typ, value) = match self.prog.nodes[id].lit.clone() {
            Some(Literal::Int(i)) => {
                let value = if let Ok(v) = i64::try_from(i) {
                    Value::Int(v)
                } else if let Ok(v) = u64::try_from(i) {
                    Value::Uint(v)
                } else {
                    return Err(self.error(id, format!("constant {} overflows", i)));
                };
                (Basic::UntypedInt, value)
            }
            Some(Literal::Float(f)) => (Basic::UntypedFloat, Value::Float(f)),
            Some(Literal::Rune(c)) => (Basic::UntypedRune, Value::Int(c as i64)),
            Some(Literal::String(s)) => (Basic::UntypedString, Value::String(s)),
            None => return Err(self.error(id, String::from("missing literal"))),
        };
        self.finish_static(id, Type::Basic(typ), Operand::Const(value));
        Ok(())
    }

    fn func_lit(&mut self, id: NodeId) -> Result<(), ParseError> {
        let (ftype, body) = (self.prog.nodes[id].child(0), self.prog.nodes[id].child(1));
        let sig = self.signature(ftype)?;
        let layout = self.function(id, None, &sig, body)?;
        self.prog.nodes[id].frame = Some(layout);
        self.finish_dynamic(id, Some(sig.func_type()), "closure", Action::MakeFunc(id), &[]);
        Ok(())
    }

    // --- Operators

    fn binary(&mut self, id: NodeId) -> Result<(), ParseError> {
        let op = self.prog.nodes[id].op;
        let (x, y) = (self.prog.nodes[id].child(0), self.prog.nodes[id].child(1));
        if matches!(op, Op::LAnd | Op::LOr) {
            return self.logical(id, op, x, y);
        }
        self.expr(x)?;
        self.expr(y)?;
        let (tx, ty) = (self.value_type(x)?, self.value_type(y)?);
        if op.is_shift() {
            return self.shift(id, op, x, y, &tx, &ty);
        }

        let typ = self.operand_type(id, op, &tx, &ty)?;
        let named = &self.prog.named;
        let kind = typ.underlying_basic(named);
        let nil_compare = tx == Type::NIL || ty == Type::NIL;
        let defined = match op {
            Op::Eql | Op::Neq => typ.is_comparable(named) || nil_compare,
            Op::Lss | Op::Leq | Op::Gtr | Op::Geq => kind.map_or(false, |k| k.is_numeric() || k.is_string()),
            Op::Add => kind.map_or(false, |k| k.is_numeric() || k.is_string()),
            Op::Sub | Op::Mul | Op::Quo => kind.map_or(false, |k| k.is_numeric()),
            Op::Rem | Op::And | Op::Or | Op::Xor | Op::AndNot => kind.map_or(false, |k| k.is_integer()),
            _ => false,
        };
        if !defined {
            let msg = format!("invalid operation: operator {} not defined on {} (value of type {})", op.token(), self.describe(x), self.show(&typ));
            return Err(self.error(id, msg));
        }
        let kind = kind.unwrap_or(Basic::UntypedNil);

        let (ox, oy) = (self.value_of(x, &typ)?, self.value_of(y, &typ)?);
        if matches!(op, Op::Quo | Op::Rem) && kind.is_integer() {
            if let Some(v) = oy.as_const() {
                if v.as_int() == Some(0) {
                    return Err(self.error(id, String::from("invalid operation: division by zero")));
                }
            }
        }

        if let (Some(vx), Some(vy)) = (ox.as_const(), oy.as_const()) {
            let v = ops::binary(op, vx, vy, kind).map_err(|e| self.const_error(id, e))?;
            let typ = if op.is_comparison() { Type::Basic(Basic::UntypedBool) } else { typ };
            self.finish_static(id, typ, Operand::Const(v));
            return Ok(());
        }
        let typ = if op.is_comparison() { Type::BOOL } else { typ };
        self.finish_dynamic(id, Some(typ), "binary", Action::Binary{ op, x: ox, y: oy, kind }, &[x, y]);
        Ok(())
    }

    /// Common type both operands of a binary operator are converted to.
    fn operand_type(&self, id: NodeId, op: Op, tx: &Type, ty: &Type) -> Result<Type, ParseError> {
        let named = &self.prog.named;
        let mismatch = || {
            let msg = format!("invalid operation: {} (mismatched types {} and {})", self.describe(id), self.show(tx), self.show(ty));
            self.error(id, msg)
        };
        match (tx.is_untyped(), ty.is_untyped()) {
            (true, true) => {
                if tx == ty {
                    return Ok(tx.clone());
                }
                match (untyped_rank(tx), untyped_rank(ty)) {
                    (0, _) | (_, 0) => Err(mismatch()),
                    (a, b) => Ok(if a >= b { tx.clone() } else { ty.clone() }),
                }
            }
            (true, false) => Ok(ty.clone()),
            (false, true) => Ok(tx.clone()),
            (false, false) => {
                if tx == ty {
                    return Ok(tx.clone());
                }
                if op.is_comparison() {
                    if ty.assignable_to(tx, named, &|_| false) {
                        return Ok(tx.clone());
                    }
                    if tx.assignable_to(ty, named, &|_| false) {
                        return Ok(ty.clone());
                    }
                }
                Err(mismatch())
            }
        }
    }

    fn shift(&mut self, id: NodeId, op: Op, x: NodeId, y: NodeId, tx: &Type, ty: &Type) -> Result<(), ParseError> {
        let both_const = self.operand(x)?.is_const() && self.operand(y)?.is_const();
        let typ = if tx.is_untyped() && !both_const { Type::INT } else { tx.clone() };
        let typ = if typ == Type::Basic(Basic::UntypedFloat) { Type::Basic(Basic::UntypedInt) } else { typ };
        let kind = match typ.underlying_basic(&self.prog.named) {
            Some(k) if k.is_integer() => k,
            _ => return Err(self.error(x, format!("invalid operation: shifted operand {} must be integer", self.describe(x)))),
        };
        if !ty.underlying_basic(&self.prog.named).map_or(false, |k| k.is_integer() || k == Basic::UntypedFloat) {
            return Err(self.error(y, format!("invalid operation: shift count type {}, must be integer", self.show(ty))));
        }

        let ox = self.value_of(x, &typ)?;
        let oy = match self.operand(y)? {
            Operand::Const(v) => {
                let n = v.as_int().or_else(|| v.as_float().map(|f| f as i64)).unwrap_or(0);
                if n < 0 {
                    return Err(self.error(y, format!("invalid shift count {}", n)));
                }
                Operand::Const(Value::Uint(n as u64))
            }
            other => other,
        };
        if let (Some(vx), Some(vy)) = (ox.as_const(), oy.as_const()) {
            let v = ops::binary(op, vx, vy, kind).map_err(|e| self.const_error(id, e))?;
            self.finish_static(id, typ, Operand::Const(v));
            return Ok(());
        }
        self.finish_dynamic(id, Some(typ), "shift", Action::Binary{ op, x: ox, y: oy, kind }, &[x, y]);
        Ok(())
    }

    /// `x && y` and `x || y`: `y` only runs when `x` does not decide.
    fn logical(&mut self, id: NodeId, op: Op, x: NodeId, y: NodeId) -> Result<(), ParseError> {
        self.expr(x)?;
        self.expr(y)?;
        for side in [x, y].iter() {
            let t = self.value_type(*side)?;
            if !t.underlying_basic(&self.prog.named).map_or(false, |k| k.is_bool()) {
                let msg = format!("invalid operation: operator {} not defined on {} (value of type {})", op.token(), self.describe(*side), self.show(&t));
                return Err(self.error(*side, msg));
            }
        }
        let (ox, oy) = (self.value_of(x, &Type::BOOL)?, self.value_of(y, &Type::BOOL)?);
        if let (Some(vx), Some(vy)) = (ox.as_const(), oy.as_const()) {
            let v = if op == Op::LAnd { vx.truthy() && vy.truthy() } else { vx.truthy() || vy.truthy() };
            self.finish_static(id, Type::Basic(Basic::UntypedBool), Operand::Const(Value::Bool(v)));
            return Ok(());
        }

        self.ensure_step(x);
        let y_entry = self.chain(&[y], id);
        {
            let xn = &mut self.prog.nodes[x];
            if op == Op::LAnd {
                xn.tnext = Some(y_entry);
                xn.fnext = Some(id);
            } else {
                xn.tnext = Some(id);
                xn.fnext = Some(y_entry);
            }
        }
        let action = if op == Op::LAnd { Action::LogicalAnd{ x: ox, y: oy } } else { Action::LogicalOr{ x: ox, y: oy } };
        let slot = self.temp(Type::BOOL);
        self.set_action(id, "logical", action);
        let start = self.prog.nodes[x].start;
        let node = &mut self.prog.nodes[id];
        node.typ = Some(Type::BOOL);
        node.findex = Some(slot);
        node.value = Some(Operand::Slot{ level: 0, index: slot });
        node.start = start;
        Ok(())
    }

    fn unary(&mut self, id: NodeId) -> Result<(), ParseError> {
        let op = self.prog.nodes[id].op;
        let x = self.prog.nodes[id].child(0);
        match op {
            Op::Addr => return self.addr_of(id, x),
            Op::Arrow => return self.recv(id, x),
            _ => {}
        }
        self.expr(x)?;
        let typ = self.value_type(x)?;
        let kind = typ.underlying_basic(&self.prog.named);
        let defined = match op {
            Op::Not => kind.map_or(false, |k| k.is_bool()),
            Op::Neg | Op::Pos => kind.map_or(false, |k| k.is_numeric()),
            Op::BitNot => kind.map_or(false, |k| k.is_integer()),
            _ => false,
        };
        let kind = match kind {
            Some(k) if defined => k,
            _ => {
                let msg = format!("invalid operation: operator {} not defined on {} (value of type {})", op.token(), self.describe(x), self.show(&typ));
                return Err(self.error(id, msg));
            }
        };
        let ox = self.operand(x)?;
        if let Some(v) = ox.as_const() {
            let v = ops::unary(op, v, kind).map_err(|e| self.const_error(id, e))?;
            self.finish_static(id, typ, Operand::Const(v));
            return Ok(());
        }
        self.finish_dynamic(id, Some(typ), "unary", Action::Unary{ op, x: ox, kind }, &[x]);
        Ok(())
    }

    fn addr_of(&mut self, id: NodeId, x: NodeId) -> Result<(), ParseError> {
        self.expr(x)?;
        let typ = self.value_type(x)?;
        let ptr = Type::Pointer(Box::new(typ));
        if self.prog.nodes[x].kind == NodeKind::CompositeLit {
            let op = self.operand(x)?;
            self.finish_dynamic(id, Some(ptr), "alloc", Action::Alloc(op), &[x]);
            return Ok(());
        }
        let (target, parts) = self.target_of_compiled(x)?;
        if let Target::Discard = target {
            return Err(self.error(x, String::from("cannot use _ as value")));
        }
        self.finish_dynamic(id, Some(ptr), "addr", Action::AddrOf(target), &parts);
        Ok(())
    }

    fn recv(&mut self, id: NodeId, ch: NodeId) -> Result<(), ParseError> {
        self.expr(ch)?;
        let typ = self.value_type(ch)?;
        let elem = match typ.underlying(&self.prog.named) {
            Type::Chan(ChanDir::Send, _) => {
                let msg = format!("invalid operation: cannot receive from send-only channel {}", self.describe(ch));
                return Err(self.error(id, msg));
            }
            Type::Chan(_, elem) => (**elem).clone(),
            _ => {
                let msg = format!("invalid operation: cannot receive from non-channel {}", self.describe(ch));
                return Err(self.error(id, msg));
            }
        };
        let zero = elem.zero(&self.prog.named);
        let op = self.operand(ch)?;
        self.finish_dynamic(id, Some(elem), "recv", Action::Recv{ ch: op, zero }, &[ch]);
        Ok(())
    }

    fn star(&mut self, id: NodeId) -> Result<(), ParseError> {
        let x = self.prog.nodes[id].child(0);
        if let Some(t) = self.try_type(id)? {
            return Err(self.error(id, format!("{} (type) is not an expression", self.show(&t))));
        }
        self.expr(x)?;
        let typ = self.value_type(x)?;
        match typ.underlying(&self.prog.named).clone() {
            Type::Pointer(elem) => {
                let op = self.operand(x)?;
                self.finish_dynamic(id, Some(*elem), "deref", Action::Deref(op), &[x]);
                Ok(())
            }
            _ => Err(self.error(id, format!("invalid operation: cannot indirect {}", self.describe(x)))),
        }
    }

    // --- Selectors, indexing and literals

    fn selector(&mut self, id: NodeId) -> Result<(), ParseError> {
        let (x, sel) = (self.prog.nodes[id].child(0), self.prog.nodes[id].child(1));
        if let Some(pkg) = self.package_of(x)? {
            let sym = self.package_member(pkg, sel)?;
            let name = format!("{}.{}", self.prog.scopes[pkg].pkg_name, self.ident(sel));
            return self.symbol_expr(id, sym, &name);
        }
        self.expr(x)?;
        self.field_access(id, x)
    }

    /// Field selection on an already compiled operand.
    fn field_access(&mut self, id: NodeId, x: NodeId) -> Result<(), ParseError> {
        let name = self.prog.nodes[id].ident.clone();
        let typ = self.value_type(x)?;
        match typ.field(&self.prog.named, &name) {
            Some((idx, ftyp)) => {
                let through_ptr = matches!(typ.underlying(&self.prog.named), Type::Pointer(_));
                let op = self.operand(x)?;
                self.finish_dynamic(id, Some(ftyp), "field", Action::Field{ x: op, path: vec![idx], through_ptr }, &[x]);
                Ok(())
            }
            None if self.method_of(&typ, &name).is_some() => {
                Err(self.error(id, format!("method value {} is not supported, call the method instead", self.describe(id))))
            }
            None => {
                let msg = format!("{} undefined (type {} has no field or method {})", self.describe(id), self.show(&typ), name);
                Err(self.error(id, msg))
            }
        }
    }

    /// Method declared for the named type of `typ` (or the type it points
    /// to): its declaration, whether it takes a pointer receiver, and whether
    /// `typ` is a pointer.
    fn method_of(&self, typ: &Type, name: &str) -> Option<(NodeId, bool, bool)> {
        let (named, is_ptr) = match typ {
            Type::Named(r) => (r, false),
            Type::Pointer(inner) => match &**inner {
                Type::Named(r) => (r, true),
                _ => return None,
            },
            _ => return None,
        };
        let decl = *self.prog.methods.get(&(named.id, name.to_string()))?;
        let recv_list = self.prog.nodes[decl].child(0);
        let recv_ptr = self.prog.nodes[recv_list].children.first()
            .and_then(|field| self.prog.nodes[*field].children.last())
            .map_or(false, |t| matches!(self.prog.nodes[*t].kind, NodeKind::PointerType | NodeKind::Star));
        Some((decl, recv_ptr, is_ptr))
    }

    /// Generic template referenced by `id`, with the nodes of explicit type
    /// arguments: `F`, `pkg.F`, `F[int]` or `pkg.F[int, bool]`.
    fn generic_ref(&mut self, id: NodeId) -> Result<Option<(NodeId, Vec<NodeId>)>, ParseError> {
        let kind = self.prog.nodes[id].kind;
        match kind {
            NodeKind::Ident => match self.lookup(self.ident(id)) {
                Some(sym) if sym.kind == SymKind::Generic => Ok(sym.node.map(|decl| (decl, Vec::new()))),
                _ => Ok(None),
            },
            NodeKind::Selector => {
                let (x, sel) = (self.prog.nodes[id].child(0), self.prog.nodes[id].child(1));
                match self.package_of(x)? {
                    Some(pkg) => match self.prog.scopes.lookup_local(pkg, self.ident(sel)) {
                        Some(sym) if sym.kind == SymKind::Generic => Ok(sym.node.map(|decl| (decl, Vec::new()))),
                        _ => Ok(None),
                    },
                    None => Ok(None),
                }
            }
            NodeKind::Index | NodeKind::IndexList => {
                let children = self.prog.nodes[id].children.clone();
                match self.generic_ref(children[0])? {
                    Some((decl, targs)) if targs.is_empty() => Ok(Some((decl, children[1..].to_vec()))),
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    fn resolve_types(&mut self, nodes: &[NodeId]) -> Result<Vec<Type>, ParseError> {
        nodes.iter().map(|t| self.resolve_type(*t)).collect()
    }

    fn index(&mut self, id: NodeId) -> Result<(), ParseError> {
        if let Some((decl, targ_nodes)) = self.generic_ref(id)? {
            // Explicit instantiation used as a function value
            let explicit = self.resolve_types(&targ_nodes)?;
            let targs = self.infer(id, decl, explicit, &[])?;
            let (inst, typ) = self.instantiate(decl, &targs)?;
            self.finish_static(id, typ, Operand::Const(Value::Func(FuncValue{ node: inst, env: None })));
            return Ok(());
        }
        if self.prog.nodes[id].kind == NodeKind::IndexList {
            return Err(self.error(id, format!("invalid operation: more than one index in {}", self.describe(self.prog.nodes[id].child(0)))));
        }

        let (x, i) = (self.prog.nodes[id].child(0), self.prog.nodes[id].child(1));
        self.expr(x)?;
        self.expr(i)?;
        let typ = self.value_type(x)?;
        let elem = match typ.underlying(&self.prog.named) {
            Type::Slice(elem) => (**elem).clone(),
            Type::Basic(b) if b.is_string() => Type::Basic(Basic::Uint8),
            _ => {
                let msg = format!("invalid operation: cannot index {} (value of type {})", self.describe(x), self.show(&typ));
                return Err(self.error(id, msg));
            }
        };
        let oi = self.index_operand(i)?;
        let ox = self.operand(x)?;

        if let (Some(Value::String(s)), Some(idx)) = (ox.as_const(), oi.as_const().and_then(Value::as_int)) {
            let byte = s.as_bytes().get(idx as usize).copied();
            return match byte {
                Some(b) => {
                    self.finish_static(id, Type::Basic(Basic::Uint8), Operand::Const(Value::Uint(b as u64)));
                    Ok(())
                }
                None => Err(self.error(i, format!("invalid argument: index {} out of bounds [0:{}]", idx, s.len()))),
            };
        }
        self.finish_dynamic(id, Some(elem), "index", Action::Index{ x: ox, index: oi }, &[x, i]);
        Ok(())
    }

    /// Index or slice bound: an integer, never a negative constant.
    fn index_operand(&mut self, i: NodeId) -> Result<Operand, ParseError> {
        let typ = self.value_type(i)?;
        if !typ.underlying_basic(&self.prog.named).map_or(false, |k| k.is_integer() || k == Basic::UntypedFloat) {
            let msg = format!("invalid argument: index {} (value of type {}) must be integer", self.describe(i), self.show(&typ));
            return Err(self.error(i, msg));
        }
        let op = if typ.is_untyped() { self.value_of(i, &Type::INT)? } else { self.operand(i)? };
        if let Some(v) = op.as_const().and_then(Value::as_int) {
            if v < 0 {
                return Err(self.error(i, format!("invalid argument: index {} (constant of type int) must not be negative", v)));
            }
        }
        Ok(op)
    }

    fn slice_expr(&mut self, id: NodeId) -> Result<(), ParseError> {
        let children = self.prog.nodes[id].children.clone();
        let x = children[0];
        self.expr(x)?;
        let typ = self.value_type(x)?;
        let typ = match typ.underlying(&self.prog.named) {
            Type::Slice(_) => typ.clone(),
            Type::Basic(b) if b.is_string() => typ.defaulted(),
            _ => return Err(self.error(id, format!("cannot slice {} (value of type {})", self.describe(x), self.show(&typ)))),
        };
        let mut parts = vec![x];
        let mut bounds = Vec::new();
        for bound in children[1..].iter().copied() {
            if self.prog.nodes[bound].kind == NodeKind::Empty {
                bounds.push(None);
                continue;
            }
            self.expr(bound)?;
            bounds.push(Some(self.index_operand(bound)?));
            parts.push(bound);
        }
        let high = bounds.pop().flatten();
        let low = bounds.pop().flatten();
        let ox = self.value_of(x, &typ)?;
        self.finish_dynamic(id, Some(typ), "slice", Action::Slice{ x: ox, low, high }, &parts);
        Ok(())
    }

    fn composite(&mut self, id: NodeId, hint: Option<&Type>) -> Result<(), ParseError> {
        let children = self.prog.nodes[id].children.clone();
        let (type_node, elems) = (children[0], &children[1..]);
        let typ = if self.prog.nodes[type_node].kind == NodeKind::Empty {
            match hint {
                Some(t) => t.clone(),
                None => return Err(self.error(id, String::from("invalid composite literal type: missing type"))),
            }
        } else {
            self.resolve_type(type_node)?
        };

        let mut parts = Vec::new();
        let kind = match typ.underlying(&self.prog.named).clone() {
            Type::Struct(fields) => {
                let keyed = elems.first().map_or(false, |e| self.prog.nodes[*e].kind == NodeKind::KeyValue);
                if !keyed && !elems.is_empty() && elems.len() != fields.len() {
                    let which = if elems.len() < fields.len() { "few" } else { "many" };
                    return Err(self.error(id, format!("too {} values in struct literal of type {}", which, self.show(&typ))));
                }
                let mut set: Vec<(usize, Operand)> = Vec::new();
                for (i, elem) in elems.iter().copied().enumerate() {
                    let is_kv = self.prog.nodes[elem].kind == NodeKind::KeyValue;
                    if is_kv != keyed {
                        return Err(self.error(elem, String::from("mixture of field:value and value elements in struct literal")));
                    }
                    let (idx, value) = if keyed {
                        let (key, value) = (self.prog.nodes[elem].child(0), self.prog.nodes[elem].child(1));
                        let name = self.ident(key).to_string();
                        let idx = match fields.iter().position(|f| *f.name == *name) {
                            Some(idx) if self.prog.nodes[key].kind == NodeKind::Ident => idx,
                            _ => {
                                let msg = format!("unknown field {} in struct literal of type {}", name, self.show(&typ));
                                return Err(self.error(key, msg));
                            }
                        };
                        if set.iter().any(|(j, _)| *j == idx) {
                            return Err(self.error(key, format!("duplicate field name {} in struct literal", name)));
                        }
                        (idx, value)
                    } else {
                        (i, elem)
                    };
                    let ftyp = fields[idx].typ.clone();
                    self.expr_hint(value, Some(&ftyp))?;
                    set.push((idx, self.value_of(value, &ftyp)?));
                    parts.push(value);
                }
                CompositeKind::Struct{ zero: typ.zero(&self.prog.named), fields: set }
            }
            Type::Slice(elem) => {
                let mut values = Vec::new();
                for value in elems.iter().copied() {
                    if self.prog.nodes[value].kind == NodeKind::KeyValue {
                        return Err(self.error(value, String::from("indexed slice literals are not supported")));
                    }
                    self.expr_hint(value, Some(&elem))?;
                    values.push(self.value_of(value, &elem)?);
                    parts.push(value);
                }
                CompositeKind::Slice{ elems: values }
            }
            _ => return Err(self.error(id, format!("invalid composite literal type {}", self.show(&typ)))),
        };
        self.finish_dynamic(id, Some(typ), "composite", Action::Composite(kind), &parts);
        Ok(())
    }

    // --- Assignable operands

    /// Where a write to an already compiled operand goes, and the operand's
    /// parts which must run before the write.
    pub(super) fn target_of_compiled(&self, x: NodeId) -> Result<(Target, Vec<NodeId>), ParseError> {
        let node = &self.prog.nodes[x];
        let unassignable = || {
            let msg = format!("cannot assign to {} (neither addressable nor a map index expression)", self.describe(x));
            self.error(x, msg)
        };
        if node.kind == NodeKind::Ident && node.ident == "_" {
            return Ok((Target::Discard, Vec::new()));
        }
        match (&node.kind, &node.action) {
            (NodeKind::Ident, _) | (NodeKind::Selector, Action::Nop) => match (&node.sym, &node.value) {
                (Some(sym), Some(op)) if sym.kind == SymKind::Var && !op.is_const() => {
                    Ok((Target::Var{ op: op.clone(), path: Vec::new() }, Vec::new()))
                }
                _ => Err(unassignable()),
            },
            (NodeKind::Selector, Action::Field{ x: base_op, path, through_ptr }) => {
                let base = node.child(0);
                if *through_ptr {
                    return Ok((Target::Deref{ ptr: base_op.clone(), path: path.clone() }, vec![base]));
                }
                let (inner, parts) = self.target_of_compiled(base).map_err(|_| unassignable())?;
                let target = match inner {
                    Target::Var{ op, path: mut p } => {
                        p.extend(path.iter().copied());
                        Target::Var{ op, path: p }
                    }
                    Target::Deref{ ptr, path: mut p } => {
                        p.extend(path.iter().copied());
                        Target::Deref{ ptr, path: p }
                    }
                    Target::Index{ x, index, path: mut p } => {
                        p.extend(path.iter().copied());
                        Target::Index{ x, index, path: p }
                    }
                    Target::Discard => return Err(unassignable()),
                };
                Ok((target, parts))
            }
            (NodeKind::Index, Action::Index{ x: base_op, index }) => {
                let base = node.child(0);
                let is_slice = self.prog.nodes[base].typ.as_ref()
                    .map_or(false, |t| matches!(t.underlying(&self.prog.named), Type::Slice(_)));
                if !is_slice {
                    return Err(unassignable());
                }
                let target = Target::Index{ x: base_op.clone(), index: index.clone(), path: Vec::new() };
                Ok((target, vec![base, node.child(1)]))
            }
            (NodeKind::Star, Action::Deref(ptr)) => {
                Ok((Target::Deref{ ptr: ptr.clone(), path: Vec::new() }, vec![node.child(0)]))
            }
            _ => Err(unassignable()),
        }
    }

    // --- Calls

    fn call(&mut self, id: NodeId) -> Result<(), ParseError> {
        let children = self.prog.nodes[id].children.clone();
        let (fun, args) = (children[0], &children[1..]);

        if let Some(typ) = self.try_type(fun)? {
            return self.conversion(id, typ, args);
        }
        if self.prog.nodes[fun].kind == NodeKind::Ident {
            if let Some(SymKind::Builtin(b)) = self.lookup(self.ident(fun)).map(|s| s.kind) {
                return self.builtin_call(id, b, args);
            }
        }
        if let Some((decl, targ_nodes)) = self.generic_ref(fun)? {
            return self.generic_call(id, decl, &targ_nodes, args);
        }
        if self.prog.nodes[fun].kind == NodeKind::Selector {
            let x = self.prog.nodes[fun].child(0);
            if self.package_of(x)?.is_none() {
                return self.method_call(id, fun, x, args);
            }
        }
        self.expr(fun)?;
        self.value_call(id, fun, args)
    }

    /// Call of a function value: declared, native or a closure.
    fn value_call(&mut self, id: NodeId, fun: NodeId, args: &[NodeId]) -> Result<(), ParseError> {
        let typ = self.value_type(fun)?;
        let ftype = match typ.func_type(&self.prog.named) {
            Some(f) => f.clone(),
            None => {
                let msg = format!("invalid operation: cannot call non-function {} (value of type {})", self.describe(fun), self.show(&typ));
                return Err(self.error(id, msg));
            }
        };
        let op = self.operand(fun)?;
        let (callee, native_name) = match &op {
            Operand::Const(Value::Func(f)) if f.env.is_none() => (Callee::Static(f.node), None),
            Operand::Const(Value::Native(_)) => (Callee::Dynamic(op.clone()), Some(Arc::from(self.native_name(fun)))),
            _ => (Callee::Dynamic(op.clone()), None),
        };
        self.finish_call(id, callee, None, &ftype, args, vec![fun], native_name, false)
    }

    /// `pkg.Name` of a native function, as shown in call stacks.
    fn native_name(&self, fun: NodeId) -> String {
        let node = &self.prog.nodes[fun];
        if node.kind == NodeKind::Selector {
            let x = &self.prog.nodes[node.child(0)];
            if let Some(pkg) = self.lookup(&x.ident).and_then(|s| s.pkg) {
                return format!("{}.{}", self.prog.scopes[pkg].pkg_name, node.ident);
            }
        }
        self.describe(fun)
    }

    fn method_call(&mut self, id: NodeId, fun: NodeId, x: NodeId, args: &[NodeId]) -> Result<(), ParseError> {
        let name = self.prog.nodes[fun].ident.clone();
        self.expr(x)?;
        let typ = self.value_type(x)?;

        if typ.is_interface(&self.prog.named) && *typ.underlying(&self.prog.named) == Type::ERROR && name == "Error" {
            if !args.is_empty() {
                return Err(self.error(id, format!("too many arguments in call to {}", self.describe(fun))));
            }
            let op = self.operand(x)?;
            self.prog.nodes[fun].typ = Some(Type::func(Vec::new(), vec![Type::STRING], false));
            self.finish_dynamic(id, Some(Type::STRING), "call", Action::ErrorMethod(op), &[x]);
            return Ok(());
        }

        if let Some((decl, recv_ptr, is_ptr)) = self.method_of(&typ, &name) {
            let op = self.operand(x)?;
            let (recv, parts) = match (recv_ptr, is_ptr) {
                (true, false) => {
                    let (target, parts) = self.target_of_compiled(x).map_err(|_| {
                        let msg = format!("cannot call pointer method {} on {}", name, self.show(&typ));
                        self.error(id, msg)
                    })?;
                    (RecvArg::AddrOf(target), parts)
                }
                (false, true) => (RecvArg::Deref(op), vec![x]),
                _ => (RecvArg::Value(op), vec![x]),
            };
            let ftype = match self.prog.nodes[decl].typ.as_ref().and_then(|t| t.func_type(&self.prog.named)) {
                Some(f) => f.clone(),
                None => return Err(self.error(id, format!("method {} has no signature", name))),
            };
            self.prog.nodes[fun].typ = Some(Type::Func(Arc::new(ftype.clone())));
            return self.finish_call(id, Callee::Static(decl), Some(recv), &ftype, args, parts, None, false);
        }

        // Field holding a function value
        self.field_access(fun, x)?;
        self.value_call(id, fun, args)
    }

    fn generic_call(&mut self, id: NodeId, decl: NodeId, targ_nodes: &[NodeId], args: &[NodeId]) -> Result<(), ParseError> {
        if let Some(explicit) = self.types_as_targs(decl, targ_nodes, args)? {
            return self.generic_call_with(id, decl, explicit, &[]);
        }
        let explicit = self.resolve_types(targ_nodes)?;
        self.generic_call_with(id, decl, explicit, args)
    }

    /// `F(T)` for a template without value parameters is `F[T]()`.
    fn types_as_targs(&mut self, decl: NodeId, targ_nodes: &[NodeId], args: &[NodeId]) -> Result<Option<Vec<Type>>, ParseError> {
        if !targ_nodes.is_empty() || args.is_empty() || !self.generic_signature(decl)?.params.is_empty() {
            return Ok(None);
        }
        let mut types = Vec::with_capacity(args.len());
        for arg in args.iter() {
            match self.try_type(*arg)? {
                Some(typ) => types.push(typ),
                None => return Ok(None),
            }
        }
        Ok(Some(types))
    }

    fn generic_call_with(&mut self, id: NodeId, decl: NodeId, explicit: Vec<Type>, args: &[NodeId]) -> Result<(), ParseError> {
        for arg in args.iter() {
            self.expr(*arg)?;
        }
        let arg_types = args.iter().map(|a| self.value_type(*a)).collect::<Result<Vec<_>, _>>()?;
        let targs = self.infer(id, decl, explicit, &arg_types)?;
        let (inst, typ) = self.instantiate(decl, &targs)?;

        let fun = self.prog.nodes[id].child(0);
        self.finish_static(fun, typ.clone(), Operand::Const(Value::Func(FuncValue{ node: inst, env: None })));
        let ftype = match typ.func_type(&self.prog.named) {
            Some(f) => f.clone(),
            None => return Err(self.error(id, String::from("generic instance is not a function"))),
        };
        self.finish_call(id, Callee::Static(inst), None, &ftype, args, Vec::new(), None, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_call(
        &mut self, id: NodeId, callee: Callee, recv: Option<RecvArg>, ftype: &FuncType,
        args: &[NodeId], mut parts: Vec<NodeId>, native_name: Option<Arc<str>>, compiled: bool,
    ) -> Result<(), ParseError> {
        let (ops, spread_tuple, variadic) = self.call_args(id, ftype, args, compiled)?;
        parts.extend_from_slice(args);
        let typ = Type::from_results(ftype.results.clone());
        let action = Action::Call(Box::new(CallAction{ callee, recv, args: ops, spread_tuple, variadic, native_name }));
        self.finish_dynamic(id, typ, "call", action, &parts);
        Ok(())
    }

    /// Argument operands of a call: `(operands, spread_tuple, variadic)`, see
    /// `CallAction`.
    fn call_args(&mut self, id: NodeId, ftype: &FuncType, args: &[NodeId], compiled: bool) -> Result<(Vec<Operand>, bool, Option<usize>), ParseError> {
        let name = self.describe(self.prog.nodes[id].child(0));
        let ellipsis = self.prog.nodes[id].ellipsis;
        if !compiled {
            for arg in args.iter() {
                self.expr(*arg)?;
            }
        }
        let param_type = |i: usize| -> Type {
            let last = ftype.params.len().saturating_sub(1);
            if ftype.variadic && i >= last {
                match &ftype.params[last] {
                    Type::Slice(elem) => (**elem).clone(),
                    other => other.clone(),
                }
            } else {
                ftype.params.get(i).cloned().unwrap_or(Type::ANY)
            }
        };
        let fixed = if ftype.variadic { ftype.params.len() - 1 } else { ftype.params.len() };
        let count_error = |c: &Self, have: usize| {
            let which = if have < fixed { "not enough" } else { "too many" };
            c.error(id, format!("{} arguments in call to {}", which, name))
        };

        // f(g()) where g returns several values
        if args.len() == 1 && !ellipsis {
            if let Some(Type::Tuple(results)) = self.prog.nodes[args[0]].typ.clone() {
                if results.len() < fixed || (!ftype.variadic && results.len() > fixed) {
                    return Err(count_error(self, results.len()));
                }
                for (i, t) in results.iter().enumerate() {
                    let p = param_type(i);
                    if !t.assignable_to(&p, &self.prog.named, &|_| false) {
                        return Err(self.cannot_use(args[0], t, &p));
                    }
                }
                let op = self.operand(args[0])?;
                return Ok((vec![op], true, ftype.variadic.then(|| fixed)));
            }
        }

        if ellipsis {
            if !ftype.variadic {
                return Err(self.error(id, format!("have (...) arguments in call to non-variadic {}", name)));
            }
            if args.len() != ftype.params.len() {
                return Err(count_error(self, args.len()));
            }
            let mut ops = Vec::with_capacity(args.len());
            for (i, arg) in args.iter().enumerate() {
                ops.push(self.value_of(*arg, &ftype.params[i])?);
            }
            return Ok((ops, false, None));
        }

        if args.len() < fixed || (!ftype.variadic && args.len() > fixed) {
            return Err(count_error(self, args.len()));
        }
        let mut ops = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            ops.push(self.value_of(*arg, &param_type(i))?);
        }
        Ok((ops, false, ftype.variadic.then(|| fixed)))
    }

    fn conversion(&mut self, id: NodeId, typ: Type, args: &[NodeId]) -> Result<(), ParseError> {
        let shown = self.show(&typ);
        let arg = match args {
            [arg] if !self.prog.nodes[id].ellipsis => *arg,
            [] => return Err(self.error(id, format!("missing argument in conversion to {}", shown))),
            _ => return Err(self.error(id, format!("too many arguments in conversion to {}", shown))),
        };
        self.expr_hint(arg, Some(&typ))?;
        let from = self.value_type(arg)?;
        let op = self.operand(arg)?;
        let named = &self.prog.named;
        let (fb, tb) = (from.underlying_basic(named), typ.underlying_basic(named));

        if let (Operand::Const(v), Some(f), Some(t)) = (&op, fb, tb) {
            let folded = if t.is_string() && f.is_integer() {
                Some(ops::convert(v, Conversion::RuneToString))
            } else if (t.is_numeric() && f.is_numeric()) || (t.is_string() && f.is_string()) || (t.is_bool() && f.is_bool()) {
                Some(self.convert_const(arg, v, &from, &typ)?)
            } else {
                None
            };
            if let Some(v) = folded {
                self.finish_static(id, typ, Operand::Const(v));
                return Ok(());
            }
        }

        let elem_kind = |t: &Type| match t.underlying(named) {
            Type::Slice(e) => e.underlying_basic(named),
            _ => None,
        };
        let conv = match (fb, tb) {
            (Some(f), Some(t)) if f.is_numeric() && t.is_numeric() => {
                if t.is_integer() { Conversion::Int(t) } else { Conversion::Float(t) }
            }
            (Some(f), Some(t)) if f.is_integer() && t.is_string() => Conversion::RuneToString,
            (None, Some(t)) if t.is_string() && elem_kind(&from) == Some(Basic::Uint8) => Conversion::BytesToString,
            (None, Some(t)) if t.is_string() && elem_kind(&from) == Some(Basic::Int32) => Conversion::RunesToString,
            (Some(f), None) if f.is_string() && elem_kind(&typ) == Some(Basic::Uint8) => Conversion::StringToBytes,
            (Some(f), None) if f.is_string() && elem_kind(&typ) == Some(Basic::Int32) => Conversion::StringToRunes,
            _ if from.underlying(named) == typ.underlying(named) || from.assignable_to(&typ, named, &|_| false) => {
                Conversion::Identity
            }
            _ => {
                let msg = format!("cannot convert {} (value of type {}) to type {}", self.describe(arg), self.show(&from), shown);
                return Err(self.error(id, msg));
            }
        };
        let op = if from.is_untyped() {
            let to = if typ.is_interface(&self.prog.named) { typ.clone() } else { from.defaulted() };
            self.value_of(arg, &to)?
        } else {
            op
        };
        self.finish_dynamic(id, Some(typ), "convert", Action::Convert{ x: op, conv }, &[arg]);
        Ok(())
    }

    fn builtin_call(&mut self, id: NodeId, builtin: Builtin, args: &[NodeId]) -> Result<(), ParseError> {
        let name = builtin.name();
        let ellipsis = self.prog.nodes[id].ellipsis;
        let arity = |c: &Self, min: usize, max: usize| -> Result<(), ParseError> {
            if args.len() < min {
                return Err(c.error(id, format!("not enough arguments for {}() (expected {}, found {})", name, min, args.len())));
            }
            if args.len() > max {
                return Err(c.error(id, format!("too many arguments for {}() (expected {}, found {})", name, max, args.len())));
            }
            Ok(())
        };
        if ellipsis && builtin != Builtin::Append {
            return Err(self.error(id, format!("invalid use of ... with built-in {}", name)));
        }

        let mut ops = Vec::new();
        let mut parts = Vec::new();
        let (op, typ) = match builtin {
            Builtin::Len | Builtin::Cap => {
                arity(self, 1, 1)?;
                let a = args[0];
                self.expr(a)?;
                let t = self.value_type(a)?;
                let valid = match t.underlying(&self.prog.named) {
                    Type::Slice(_) | Type::Chan(..) => true,
                    Type::Basic(b) => b.is_string() && builtin == Builtin::Len,
                    _ => false,
                };
                if !valid {
                    let msg = format!("invalid argument: {} (value of type {}) for built-in {}", self.describe(a), self.show(&t), name);
                    return Err(self.error(a, msg));
                }
                let op = self.operand(a)?;
                if let Some(Value::String(s)) = op.as_const() {
                    let n = s.len() as i64;
                    self.finish_static(id, Type::INT, Operand::Const(Value::Int(n)));
                    return Ok(());
                }
                ops.push(op);
                parts.push(a);
                (if builtin == Builtin::Len { BuiltinOp::Len } else { BuiltinOp::Cap }, Some(Type::INT))
            }
            Builtin::Append => {
                arity(self, 1, usize::MAX)?;
                let s = args[0];
                self.expr(s)?;
                let ts = self.value_type(s)?;
                let elem = match ts.underlying(&self.prog.named) {
                    Type::Slice(elem) => (**elem).clone(),
                    _ => {
                        let msg = format!("invalid argument: {} (value of type {}) is not a slice", self.describe(s), self.show(&ts));
                        return Err(self.error(s, msg));
                    }
                };
                ops.push(self.operand(s)?);
                parts.push(s);
                if ellipsis {
                    arity(self, 2, 2)?;
                    let rest = args[1];
                    self.expr(rest)?;
                    let tr = self.value_type(rest)?;
                    let is_bytes = elem.underlying_basic(&self.prog.named) == Some(Basic::Uint8);
                    let is_string = tr.underlying_basic(&self.prog.named).map_or(false, |b| b.is_string());
                    let op = if is_bytes && is_string { self.value_of(rest, &Type::STRING)? } else { self.value_of(rest, &ts)? };
                    ops.push(op);
                    parts.push(rest);
                } else {
                    for value in args[1..].iter().copied() {
                        self.expr_hint(value, Some(&elem))?;
                        ops.push(self.value_of(value, &elem)?);
                        parts.push(value);
                    }
                }
                (BuiltinOp::Append{ spread: ellipsis }, Some(ts))
            }
            Builtin::Copy => {
                arity(self, 2, 2)?;
                for a in args.iter().copied() {
                    self.expr(a)?;
                    let t = self.value_type(a)?;
                    let op = if t.is_untyped() { self.value_of(a, &Type::STRING)? } else { self.operand(a)? };
                    ops.push(op);
                    parts.push(a);
                }
                (BuiltinOp::Copy, Some(Type::INT))
            }
            Builtin::Make => {
                arity(self, 1, 3)?;
                let typ = self.resolve_type(args[0])?;
                let op = match typ.underlying(&self.prog.named).clone() {
                    Type::Slice(elem) => {
                        arity(self, 2, 3)?;
                        BuiltinOp::MakeSlice{ zero: elem.zero(&self.prog.named) }
                    }
                    Type::Chan(..) => {
                        arity(self, 1, 2)?;
                        BuiltinOp::MakeChan
                    }
                    _ => {
                        let msg = format!("invalid argument: cannot make {}; type must be slice, map, or channel", self.show(&typ));
                        return Err(self.error(args[0], msg));
                    }
                };
                for size in args[1..].iter().copied() {
                    self.expr(size)?;
                    ops.push(self.index_operand(size)?);
                    parts.push(size);
                }
                if let (Some(len), Some(cap)) = (ops.first().and_then(|o| o.as_const()), ops.get(1).and_then(|o| o.as_const())) {
                    if len.as_int() > cap.as_int() {
                        return Err(self.error(id, String::from("invalid argument: length and capacity swapped")));
                    }
                }
                (op, Some(typ))
            }
            Builtin::New => {
                arity(self, 1, 1)?;
                let typ = self.resolve_type(args[0])?;
                let zero = typ.zero(&self.prog.named);
                (BuiltinOp::New{ zero }, Some(Type::Pointer(Box::new(typ))))
            }
            Builtin::Panic => {
                arity(self, 1, 1)?;
                self.expr(args[0])?;
                ops.push(self.value_of(args[0], &Type::ANY)?);
                parts.push(args[0]);
                (BuiltinOp::Panic, None)
            }
            Builtin::Print | Builtin::Println => {
                for a in args.iter().copied() {
                    self.expr(a)?;
                    let (op, _) = self.value_default(a)?;
                    ops.push(op);
                    parts.push(a);
                }
                (BuiltinOp::Print{ newline: builtin == Builtin::Println }, None)
            }
            Builtin::Recover => {
                arity(self, 0, 0)?;
                (BuiltinOp::Recover, Some(Type::ANY))
            }
            Builtin::Close => {
                arity(self, 1, 1)?;
                let a = args[0];
                self.expr(a)?;
                let t = self.value_type(a)?;
                match t.underlying(&self.prog.named) {
                    Type::Chan(ChanDir::Recv, _) => {
                        return Err(self.error(a, format!("invalid operation: cannot close receive-only channel {}", self.describe(a))));
                    }
                    Type::Chan(..) => {}
                    _ => {
                        let msg = format!("invalid operation: cannot close non-channel {}", self.describe(a));
                        return Err(self.error(a, msg));
                    }
                }
                ops.push(self.operand(a)?);
                parts.push(a);
                (BuiltinOp::Close, None)
            }
        };
        self.finish_dynamic(id, typ, "builtin", Action::Builtin{ op, args: ops }, &parts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ranges() {
        assert_eq!(int_range(Basic::Int8), (-128, 127));
        assert_eq!(int_range(Basic::Uint8), (0, 255));
        assert_eq!(int_range(Basic::Int), (i64::MIN as i128, i64::MAX as i128));
        assert_eq!(int_range(Basic::Uint64), (0, u64::MAX as i128));
    }

    #[test]
    fn untyped_kinds_are_ranked() {
        assert!(untyped_rank(&Type::Basic(Basic::UntypedFloat)) > untyped_rank(&Type::Basic(Basic::UntypedRune)));
        assert!(untyped_rank(&Type::Basic(Basic::UntypedRune)) > untyped_rank(&Type::Basic(Basic::UntypedInt)));
        assert_eq!(untyped_rank(&Type::STRING), 0);
    }
}
