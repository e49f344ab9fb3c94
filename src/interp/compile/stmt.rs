use crate::common::*;
use crate::interp::ast::{walk, NodeGraph, NodeId, NodeKind, Op, Visit, Visitor};
use crate::interp::eval::action::{Action, Operand, Target};
use crate::interp::eval::value::Value;
use crate::interp::input_source::ParseError;
use crate::interp::scope::{ScopeKind, SymKind, Symbol};
use crate::interp::types::{Basic, ChanDir, Type};
use super::Compiler;

const RED_ZONE: usize = 64 * 1024;
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Whether an assignment operator applies to values of the basic kind.
fn op_assign_defined(op: Op, kind: Option<Basic>) -> bool {
    let kind = match kind {
        Some(kind) => kind,
        None => return false,
    };
    match op {
        Op::Add => kind.is_numeric() || kind.is_string(),
        Op::Sub | Op::Mul | Op::Quo => kind.is_numeric(),
        Op::Rem | Op::And | Op::Or | Op::Xor | Op::AndNot | Op::Shl | Op::Shr => kind.is_integer(),
        _ => false,
    }
}

impl<'a> Compiler<'a> {
    pub(super) fn stmt(&mut self, id: NodeId) -> Result<(), ParseError> {
        stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, || self.stmt_inner(id))
    }

    fn stmt_inner(&mut self, id: NodeId) -> Result<(), ParseError> {
        match self.prog.nodes[id].kind {
            NodeKind::Block => self.block(id),
            NodeKind::ExprStmt => self.expr_stmt(id),
            NodeKind::Define => self.define(id),
            NodeKind::Assign => self.assign(id),
            NodeKind::OpAssign => self.op_assign(id),
            NodeKind::IncDec => self.inc_dec(id),
            NodeKind::VarDecl => self.var_decl(id),
            NodeKind::ConstDecl => self.const_decl(id),
            NodeKind::TypeSpec => self.declare_types(&[id]),
            NodeKind::If => self.if_stmt(id),
            NodeKind::For => self.for_stmt(id),
            NodeKind::Break | NodeKind::Continue => self.branch(id),
            NodeKind::Return => self.return_stmt(id),
            NodeKind::Defer | NodeKind::Go => self.defer_or_go(id),
            NodeKind::Send => self.send(id),
            NodeKind::Empty => Ok(()),
            kind => Err(self.error(id, format!("unexpected {:?} in statement position", kind))),
        }
    }

    /// Block with a scope of its own. The block node is the join point its
    /// statements end at.
    fn block(&mut self, id: NodeId) -> Result<(), ParseError> {
        let saved = self.push_scope(ScopeKind::Block);
        self.prog.nodes[id].scope = Some(self.scope);
        let result = self.block_in_scope(id);
        self.pop_scope(saved);
        result
    }

    /// Compiles the statements of a block in the current scope.
    pub(super) fn block_in_scope(&mut self, body: NodeId) -> Result<(), ParseError> {
        let stmts = self.prog.nodes[body].children.clone();
        for stmt in stmts.iter() {
            self.stmt(*stmt)?;
        }
        let entry = self.chain(&stmts, body);
        self.set_action(body, "block", Action::Nop);
        self.prog.nodes[body].start = Some(entry);
        Ok(())
    }

    fn at_top_level(&self) -> bool {
        self.funcs.last().map_or(false, |f| self.prog.nodes[f.def].kind == NodeKind::File)
    }

    fn expr_stmt(&mut self, id: NodeId) -> Result<(), ParseError> {
        let x = self.prog.nodes[id].child(0);
        self.expr(x)?;
        if self.at_top_level() {
            // The last package level expression is the result of an evaluation
            let op = match self.prog.nodes[x].typ.clone() {
                None => Operand::Const(Value::Nil),
                Some(Type::Tuple(_)) => self.operand(x)?,
                Some(t) if t == Type::NIL => Operand::Const(Value::Nil),
                Some(_) => self.value_default(x)?.0,
            };
            self.finish_dynamic(id, None, "result", Action::SetResult(op), &[x]);
            return Ok(());
        }
        let node = &self.prog.nodes[x];
        let used = node.kind == NodeKind::Call || (node.kind == NodeKind::Unary && node.op == Op::Arrow);
        if !used || !node.is_dynamic() {
            return Err(self.error(x, format!("{} is not used", self.describe(x))));
        }
        self.finish_dynamic(id, None, "stmt", Action::Nop, &[x]);
        Ok(())
    }

    /// Left and right hand sides of an assignment like node.
    fn sides(&self, id: NodeId) -> (Vec<NodeId>, Vec<NodeId>) {
        let node = &self.prog.nodes[id];
        let (lhs, rhs) = node.children.split_at(node.nleft);
        (lhs.to_vec(), rhs.to_vec())
    }

    /// Types of the values produced by the right hand side for `n`
    /// destinations, and whether they come from a single multi-value call.
    fn rhs_types(&self, at: NodeId, n: usize, rhs: &[NodeId]) -> Result<(Vec<Type>, bool), ParseError> {
        if rhs.len() == 1 && n > 1 {
            return match self.prog.nodes[rhs[0]].typ.clone() {
                Some(Type::Tuple(ts)) if ts.len() == n => Ok(((*ts).clone(), true)),
                typ => {
                    let have = typ.map_or(0, |t| t.arity());
                    let msg = format!("assignment mismatch: {} variables but {} returns {} value{}", n, self.describe(rhs[0]), have, if have == 1 { "" } else { "s" });
                    Err(self.error(at, msg))
                }
            };
        }
        if rhs.len() != n {
            let msg = format!("assignment mismatch: {} variable{} but {} value{}", n, if n == 1 { "" } else { "s" }, rhs.len(), if rhs.len() == 1 { "" } else { "s" });
            return Err(self.error(at, msg));
        }
        let types = rhs.iter().map(|r| self.value_type(*r)).collect::<Result<Vec<_>, _>>()?;
        Ok((types, false))
    }

    /// Assignment action once the targets and their types are known.
    fn assign_action(&mut self, targets: Vec<Target>, types: &[Option<Type>], rhs: &[NodeId], tuple: bool) -> Result<Action, ParseError> {
        if tuple {
            let value = self.operand(rhs[0])?;
            let results = match &self.prog.nodes[rhs[0]].typ {
                Some(Type::Tuple(ts)) => ts.clone(),
                _ => Arc::new(Vec::new()),
            };
            for (result, typ) in results.iter().zip(types.iter()) {
                if let Some(typ) = typ {
                    if !result.assignable_to(typ, &self.prog.named, &|_| false) {
                        let msg = format!("cannot use {} value as {} value in assignment", self.show(result), self.show(typ));
                        return Err(self.error(rhs[0], msg));
                    }
                }
            }
            return Ok(Action::AssignTuple{ targets, value });
        }
        let mut values = Vec::with_capacity(rhs.len());
        for (r, typ) in rhs.iter().zip(types.iter()) {
            let op = match typ {
                Some(typ) => self.value_of(*r, typ)?,
                None => self.value_default(*r)?.0,
            };
            values.push(op);
        }
        Ok(Action::Assign{ targets, values })
    }

    fn define(&mut self, id: NodeId) -> Result<(), ParseError> {
        let (lhs, rhs) = self.sides(id);
        for r in rhs.iter() {
            self.expr(*r)?;
        }
        let (types, tuple) = self.rhs_types(id, lhs.len(), &rhs)?;

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(lhs.len());
        let mut target_types = Vec::with_capacity(lhs.len());
        let mut any_new = false;
        for (l, typ) in lhs.iter().copied().zip(types.into_iter()) {
            if self.prog.nodes[l].kind != NodeKind::Ident {
                return Err(self.error(l, format!("non-name {} on left side of :=", self.describe(l))));
            }
            let name = self.ident(l).to_string();
            if name == "_" {
                targets.push(Target::Discard);
                target_types.push(None);
                continue;
            }
            if !seen.insert(name.clone()) {
                return Err(self.error(l, format!("{} repeated on left side of :=", name)));
            }

            let existing = self.prog.scopes.lookup_local(self.scope, &name)
                .filter(|sym| sym.kind == SymKind::Var)
                .filter(|sym| self.scope != self.prog.main || sym.unit == self.unit)
                .cloned();
            match existing {
                Some(sym) => {
                    let var_type = sym.typ.clone();
                    self.symbol_expr(l, sym, &name)?;
                    let op = self.operand(l)?;
                    targets.push(Target::Var{ op, path: Vec::new() });
                    target_types.push(Some(var_type));
                }
                None => {
                    if typ == Type::NIL {
                        return Err(self.error(l, String::from("use of untyped nil in assignment")));
                    }
                    let typ = typ.defaulted();
                    any_new = true;
                    let op = self.declare_var(l, typ.clone())?;
                    self.finish_static(l, typ.clone(), op.clone());
                    targets.push(Target::Var{ op, path: Vec::new() });
                    target_types.push(Some(typ));
                }
            }
        }
        if !any_new {
            return Err(self.error(id, String::from("no new variables on left side of :=")));
        }
        let action = self.assign_action(targets, &target_types, &rhs, tuple)?;
        self.finish_dynamic(id, None, "define", action, &rhs);
        Ok(())
    }

    fn assign(&mut self, id: NodeId) -> Result<(), ParseError> {
        let (lhs, rhs) = self.sides(id);
        let mut parts = Vec::new();
        let mut targets = Vec::with_capacity(lhs.len());
        let mut target_types = Vec::with_capacity(lhs.len());
        for l in lhs.iter().copied() {
            if self.prog.nodes[l].kind == NodeKind::Ident && self.ident(l) == "_" {
                targets.push(Target::Discard);
                target_types.push(None);
                continue;
            }
            self.expr(l)?;
            let typ = self.value_type(l)?;
            let (target, target_parts) = self.target_of_compiled(l)?;
            parts.extend(target_parts);
            targets.push(target);
            target_types.push(Some(typ));
        }
        for r in rhs.iter() {
            self.expr(*r)?;
        }
        let (_, tuple) = self.rhs_types(id, lhs.len(), &rhs)?;
        let action = self.assign_action(targets, &target_types, &rhs, tuple)?;
        parts.extend(rhs.iter().copied());
        self.finish_dynamic(id, None, "assign", action, &parts);
        Ok(())
    }

    fn op_assign(&mut self, id: NodeId) -> Result<(), ParseError> {
        let op = self.prog.nodes[id].op;
        let (l, r) = (self.prog.nodes[id].child(0), self.prog.nodes[id].child(1));
        self.expr(l)?;
        self.expr(r)?;
        let typ = self.value_type(l)?;
        let kind = typ.underlying_basic(&self.prog.named);
        if !op_assign_defined(op, kind) {
            let msg = format!("invalid operation: operator {} not defined on {} (value of type {})", op.token(), self.describe(l), self.show(&typ));
            return Err(self.error(id, msg));
        }
        let kind = kind.unwrap_or(Basic::Int);

        let y = if op.is_shift() {
            let ty = self.value_type(r)?;
            if !ty.underlying_basic(&self.prog.named).map_or(false, |k| k.is_integer()) {
                return Err(self.error(r, format!("invalid operation: shift count type {}, must be integer", self.show(&ty))));
            }
            match self.operand(r)? {
                Operand::Const(v) => match v.as_int() {
                    Some(n) if n < 0 => return Err(self.error(r, format!("invalid shift count {}", n))),
                    Some(n) => Operand::Const(Value::Uint(n as u64)),
                    None => Operand::Const(v),
                },
                other => other,
            }
        } else {
            self.value_of(r, &typ)?
        };
        if matches!(op, Op::Quo | Op::Rem) && kind.is_integer() && y.as_const().and_then(Value::as_int) == Some(0) {
            return Err(self.error(id, String::from("invalid operation: division by zero")));
        }

        let (target, mut parts) = self.target_of_compiled(l)?;
        if let Target::Discard = target {
            return Err(self.error(l, String::from("cannot use _ as value")));
        }
        parts.push(r);
        self.finish_dynamic(id, None, "opassign", Action::OpAssign{ target, op, y, kind }, &parts);
        Ok(())
    }

    fn inc_dec(&mut self, id: NodeId) -> Result<(), ParseError> {
        let x = self.prog.nodes[id].child(0);
        self.expr(x)?;
        let typ = self.value_type(x)?;
        let kind = match typ.underlying_basic(&self.prog.named) {
            Some(kind) if kind.is_numeric() => kind,
            _ => {
                let what = if self.prog.nodes[id].op == Op::Inc { "++" } else { "--" };
                let msg = format!("invalid operation: {}{} (non-numeric type {})", self.describe(x), what, self.show(&typ));
                return Err(self.error(id, msg));
            }
        };
        let one = if kind.is_float() {
            Value::Float(1.0)
        } else if kind.is_unsigned() {
            Value::Uint(1)
        } else {
            Value::Int(1)
        };
        let op = if self.prog.nodes[id].op == Op::Inc { Op::Add } else { Op::Sub };
        let (target, parts) = self.target_of_compiled(x)?;
        if let Target::Discard = target {
            return Err(self.error(x, String::from("cannot use _ as value")));
        }
        self.finish_dynamic(id, None, "incdec", Action::OpAssign{ target, op, y: Operand::Const(one), kind }, &parts);
        Ok(())
    }

    /// `var` declaration: always assigns, so a variable declared in a loop
    /// body starts from its zero value on every iteration.
    fn var_decl(&mut self, id: NodeId) -> Result<(), ParseError> {
        let nleft = self.prog.nodes[id].nleft;
        let children = self.prog.nodes[id].children.clone();
        let (names, type_node, values) = (&children[..nleft], children[nleft], &children[nleft + 1..]);
        let declared = if self.prog.nodes[type_node].kind == NodeKind::Empty {
            None
        } else {
            Some(self.resolve_type(type_node)?)
        };
        for v in values.iter() {
            match &declared {
                Some(t) => self.expr_hint(*v, Some(t))?,
                None => self.expr(*v)?,
            }
        }

        let (types, tuple) = if values.is_empty() {
            match &declared {
                Some(t) => (vec![t.clone(); names.len()], false),
                None => return Err(self.error(id, String::from("missing type or init expr"))),
            }
        } else {
            self.rhs_types(id, names.len(), values)?
        };

        let mut targets = Vec::with_capacity(names.len());
        let mut target_types = Vec::with_capacity(names.len());
        for (name, typ) in names.iter().copied().zip(types.into_iter()) {
            let typ = match &declared {
                Some(t) => t.clone(),
                None if typ == Type::NIL => return Err(self.error(name, String::from("use of untyped nil in variable declaration"))),
                None => typ.defaulted(),
            };
            target_types.push(Some(typ.clone()));
            if self.ident(name) == "_" {
                targets.push(Target::Discard);
                continue;
            }
            let op = self.declare_var(name, typ.clone())?;
            self.finish_static(name, typ, op.clone());
            targets.push(Target::Var{ op, path: Vec::new() });
        }

        let action = if values.is_empty() {
            let zeros = target_types.iter()
                .map(|t| Operand::Const(t.as_ref().map_or(Value::Nil, |t| t.zero(&self.prog.named))))
                .collect();
            Action::Assign{ targets, values: zeros }
        } else {
            self.assign_action(targets, &target_types, values, tuple)?
        };
        self.finish_dynamic(id, None, "var", action, values);
        Ok(())
    }

    fn const_decl(&mut self, id: NodeId) -> Result<(), ParseError> {
        let nleft = self.prog.nodes[id].nleft;
        let children = self.prog.nodes[id].children.clone();
        let (names, type_node, values) = (&children[..nleft], children[nleft], &children[nleft + 1..]);
        if names.len() != values.len() {
            let which = if values.len() < names.len() { "missing init expr for const declaration" } else { "extra init expr" };
            return Err(self.error(id, String::from(which)));
        }
        let declared = if self.prog.nodes[type_node].kind == NodeKind::Empty {
            None
        } else {
            Some(self.resolve_type(type_node)?)
        };

        for (name, v) in names.iter().copied().zip(values.iter().copied()) {
            self.expr(v)?;
            let from = self.value_type(v)?;
            if !self.operand(v)?.is_const() {
                return Err(self.error(v, format!("{} (value of type {}) is not constant", self.describe(v), self.show(&from))));
            }
            let (typ, op) = match &declared {
                Some(t) => (t.clone(), self.value_of(v, t)?),
                None => (from, self.operand(v)?),
            };
            let value = op.as_const().cloned().unwrap_or(Value::Nil);
            if self.ident(name) == "_" {
                continue;
            }
            let mut sym = Symbol::constant(typ.clone(), value.clone());
            sym.node = Some(name);
            let ident = self.ident(name).to_string();
            self.declare_here(name, &ident, sym)?;
            self.finish_static(name, typ, Operand::Const(value));
        }
        Ok(())
    }

    fn condition(&mut self, cond: NodeId, what: &str) -> Result<(), ParseError> {
        self.expr(cond)?;
        let typ = self.value_type(cond)?;
        if !typ.underlying_basic(&self.prog.named).map_or(false, |k| k.is_bool()) {
            let msg = format!("non-boolean condition in {} statement", what);
            return Err(self.error(cond, msg));
        }
        self.ensure_step(cond);
        Ok(())
    }

    fn if_stmt(&mut self, id: NodeId) -> Result<(), ParseError> {
        let saved = self.push_scope(ScopeKind::Block);
        self.prog.nodes[id].scope = Some(self.scope);
        let result = self.if_inner(id);
        self.pop_scope(saved);
        result
    }

    fn if_inner(&mut self, id: NodeId) -> Result<(), ParseError> {
        let children = self.prog.nodes[id].children.clone();
        let (init, cond, body, els) = (children[0], children[1], children[2], children[3]);
        self.stmt(init)?;
        self.condition(cond, "if")?;
        self.block(body)?;
        let has_else = match self.prog.nodes[els].kind {
            NodeKind::Empty => false,
            NodeKind::Block => {
                self.block(els)?;
                true
            }
            _ => {
                self.stmt(els)?;
                true
            }
        };

        let body_entry = self.prog.nodes[body].start;
        let else_entry = if has_else { self.prog.nodes[els].start } else { Some(id) };
        {
            let c = &mut self.prog.nodes[cond];
            c.tnext = body_entry;
            c.fnext = else_entry;
        }
        self.prog.nodes[body].tnext = Some(id);
        if has_else {
            self.prog.nodes[els].tnext = Some(id);
        }
        self.set_action(id, "if", Action::Nop);
        let cond_entry = self.prog.nodes[cond].start.unwrap_or(cond);
        let start = self.chain(&[init], cond_entry);
        self.prog.nodes[id].start = Some(start);
        Ok(())
    }

    fn for_stmt(&mut self, id: NodeId) -> Result<(), ParseError> {
        let saved = self.push_scope(ScopeKind::Block);
        self.prog.nodes[id].scope = Some(self.scope);
        let result = self.for_inner(id);
        self.pop_scope(saved);
        result
    }

    fn for_inner(&mut self, id: NodeId) -> Result<(), ParseError> {
        let children = self.prog.nodes[id].children.clone();
        let (init, cond, post, body) = (children[0], children[1], children[2], children[3]);
        let has_cond = self.prog.nodes[cond].kind != NodeKind::Empty;
        self.stmt(init)?;
        if has_cond {
            self.condition(cond, "for")?;
        }
        self.stmt(post)?;
        self.block(body)?;

        let body_entry = self.prog.nodes[body].start.unwrap_or(body);
        let head = if has_cond { self.prog.nodes[cond].start.unwrap_or(cond) } else { body_entry };
        if has_cond {
            let c = &mut self.prog.nodes[cond];
            c.tnext = Some(body_entry);
            c.fnext = Some(id);
        }
        let cont = match self.prog.nodes[post].start {
            Some(post_entry) => {
                self.prog.nodes[post].tnext = Some(head);
                post_entry
            }
            None => head,
        };
        self.prog.nodes[body].tnext = Some(cont);

        // Branches of this loop, not of loops or closures nested in it
        let mut branches = LoopBranches{ graph: &self.prog.nodes, body, found: Vec::new() };
        walk(&mut branches, body).unwrap_or_else(|never| match never {});
        for (branch, kind) in branches.found {
            self.prog.nodes[branch].tnext = Some(if kind == NodeKind::Break { id } else { cont });
        }

        self.set_action(id, "for", Action::Nop);
        let start = self.chain(&[init], head);
        self.prog.nodes[id].start = Some(start);
        Ok(())
    }

    /// `break` and `continue`; their targets are linked by the enclosing loop.
    fn branch(&mut self, id: NodeId) -> Result<(), ParseError> {
        let owner = self.prog.nodes.find_anc(id, |n| {
            matches!(n.kind, NodeKind::For | NodeKind::FuncLit | NodeKind::FuncDecl | NodeKind::File)
        });
        let in_loop = owner.map_or(false, |o| self.prog.nodes[o].kind == NodeKind::For);
        if !in_loop {
            let what = if self.prog.nodes[id].kind == NodeKind::Break { "break" } else { "continue" };
            return Err(self.error(id, format!("{} is not in a loop", what)));
        }
        self.set_action(id, "branch", Action::Nop);
        self.prog.nodes[id].start = Some(id);
        Ok(())
    }

    /// Whether the function being compiled names its results.
    fn named_results(&self) -> bool {
        let def = match self.funcs.last() {
            Some(ctx) => ctx.def,
            None => return false,
        };
        let node = &self.prog.nodes[def];
        let ftype = match node.kind {
            NodeKind::FuncDecl => node.child(3),
            NodeKind::FuncLit => node.child(0),
            _ => return false,
        };
        let results = self.prog.nodes[ftype].child(1);
        self.prog.nodes[results].children.iter().any(|f| self.prog.nodes[*f].children.len() > 1)
    }

    fn return_stmt(&mut self, id: NodeId) -> Result<(), ParseError> {
        if self.at_top_level() {
            return Err(self.error(id, String::from("return statement outside function body")));
        }
        let results = self.funcs.last().map(|f| f.results.clone()).unwrap_or_default();
        let values = self.prog.nodes[id].children.clone();
        for (i, v) in values.iter().enumerate() {
            let hint = if values.len() == results.len() { results.get(i).cloned() } else { None };
            self.expr_hint(*v, hint.as_ref())?;
        }

        let action = if values.is_empty() {
            if !results.is_empty() && !self.named_results() {
                return Err(self.error(id, String::from("not enough return values")));
            }
            Action::Return{ values: Vec::new(), tuple: false }
        } else if values.len() == 1 && results.len() > 1 {
            let (types, _) = self.rhs_types(id, results.len(), &values).map_err(|_| {
                self.error(id, String::from("not enough return values"))
            })?;
            for (have, want) in types.iter().zip(results.iter()) {
                if !have.assignable_to(want, &self.prog.named, &|_| false) {
                    let msg = format!("cannot use {} value as {} value in return statement", self.show(have), self.show(want));
                    return Err(self.error(values[0], msg));
                }
            }
            Action::Return{ values: vec![self.operand(values[0])?], tuple: true }
        } else if values.len() != results.len() {
            let which = if values.len() > results.len() { "too many" } else { "not enough" };
            return Err(self.error(id, format!("{} return values", which)));
        } else {
            let mut ops = Vec::with_capacity(values.len());
            for (v, t) in values.iter().zip(results.iter()) {
                ops.push(self.value_of(*v, t)?);
            }
            Action::Return{ values: ops, tuple: false }
        };
        self.finish_dynamic(id, None, "return", action, &values);
        Ok(())
    }

    /// `defer f(x)` and `go f(x)`: the callee and arguments are evaluated by
    /// the statement, the call itself runs later (or concurrently).
    fn defer_or_go(&mut self, id: NodeId) -> Result<(), ParseError> {
        let is_defer = self.prog.nodes[id].kind == NodeKind::Defer;
        let what = if is_defer { "defer" } else { "go" };
        let call = self.prog.nodes[id].child(0);
        self.expr(call)?;
        match &self.prog.nodes[call].action {
            Action::Call(_) | Action::Builtin{ .. } if self.prog.nodes[call].is_dynamic() => {}
            Action::Convert{ .. } => {
                return Err(self.error(call, format!("{} requires function call, not conversion", what)));
            }
            _ => return Err(self.error(call, format!("{} discards result of {}", what, self.describe(call)))),
        }

        // The parts of the call run here, then the statement instead of the call
        let entry = match self.prog.nodes[call].start {
            Some(start) if start != call => {
                let mut cur = start;
                for _ in 0..self.prog.nodes.len() {
                    match self.prog.nodes[cur].tnext {
                        Some(next) if next == call => {
                            self.prog.nodes[cur].tnext = Some(id);
                            break;
                        }
                        Some(next) => cur = next,
                        None => break,
                    }
                }
                start
            }
            _ => id,
        };
        let action = if is_defer { Action::Defer(call) } else { Action::Go(call) };
        self.set_action(id, what, action);
        self.prog.nodes[id].start = Some(entry);
        Ok(())
    }

    fn send(&mut self, id: NodeId) -> Result<(), ParseError> {
        let (ch, value) = (self.prog.nodes[id].child(0), self.prog.nodes[id].child(1));
        self.expr(ch)?;
        let typ = self.value_type(ch)?;
        let elem = match typ.underlying(&self.prog.named) {
            Type::Chan(ChanDir::Recv, _) => {
                return Err(self.error(id, format!("invalid operation: cannot send to receive-only channel {}", self.describe(ch))));
            }
            Type::Chan(_, elem) => (**elem).clone(),
            _ => return Err(self.error(id, format!("invalid operation: cannot send to non-channel {}", self.describe(ch)))),
        };
        self.expr_hint(value, Some(&elem))?;
        let ch_op = self.operand(ch)?;
        let value_op = self.value_of(value, &elem)?;
        self.finish_dynamic(id, None, "send", Action::Send{ ch: ch_op, value: value_op }, &[ch, value]);
        Ok(())
    }
}

/// Collects the `break` and `continue` statements of a loop body, leaving
/// out those of nested loops and closures.
struct LoopBranches<'g> {
    graph: &'g NodeGraph,
    body: NodeId,
    found: Vec<(NodeId, NodeKind)>,
}

impl<'g> Visitor for LoopBranches<'g> {
    type Error = std::convert::Infallible;

    fn graph(&self) -> &NodeGraph {
        self.graph
    }

    fn pre(&mut self, id: NodeId) -> Result<Visit, Self::Error> {
        let kind = self.graph[id].kind;
        Ok(match kind {
            NodeKind::Break | NodeKind::Continue => {
                self.found.push((id, kind));
                Visit::Skip
            }
            NodeKind::For | NodeKind::FuncLit if id != self.body => Visit::Skip,
            _ => Visit::Children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_operators_follow_operand_kinds() {
        assert!(op_assign_defined(Op::Add, Some(Basic::String)));
        assert!(!op_assign_defined(Op::Sub, Some(Basic::String)));
        assert!(op_assign_defined(Op::Shl, Some(Basic::Uint8)));
        assert!(!op_assign_defined(Op::Rem, Some(Basic::Float64)));
        assert!(!op_assign_defined(Op::Add, None));
    }
}
