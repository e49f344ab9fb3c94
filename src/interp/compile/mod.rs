/// compile
///
/// Turns parsed units into executable node graphs. The compiler resolves
/// identifiers against the scope tree, assigns a static type to every
/// expression, allocates frame slots, links the control flow (`start`,
/// `tnext`, `fnext`) and attaches the action each dynamic node executes.
///
/// A unit is compiled in passes: imports, type declarations, function
/// signatures, then the package level statements in source order and
/// finally the function bodies. Generic templates are skipped; they are
/// compiled per instantiation (see `generic.rs`).

mod expr;
mod resolve;
mod stmt;

use crate::common::*;
use super::ast::{FrameLayout, NodeId, NodeKind};
use super::eval::action::{Action, Operand};
use super::eval::value::Value;
use super::exports::Registry;
use super::input_source::ParseError;
use super::program::Program;
use super::scope::{ScopeId, ScopeKind, SymKind, Symbol};
use super::types::{NamedRef, NamedType, Type};

pub(crate) use resolve::{load_native_package, resolve_type_text};

/// Function being compiled: a declaration, a literal, or the package level
/// code of a unit.
pub(super) struct FuncCtx {
    pub def: NodeId,
    /// Slot types, in layout order
    pub types: Vec<Type>,
    pub results: Vec<Type>,
}

/// A parameter or result: its name identifier (`None` when unnamed) and type.
pub(super) type Param = (Option<NodeId>, Type);

pub(super) struct Signature {
    pub params: Vec<Param>,
    pub results: Vec<Param>,
    pub variadic: bool,
}

impl Signature {
    pub fn func_type(&self) -> Type {
        Type::func(
            self.params.iter().map(|(_, t)| t.clone()).collect(),
            self.results.iter().map(|(_, t)| t.clone()).collect(),
            self.variadic,
        )
    }
}

/// Result of compiling a unit of evaluated source.
pub(crate) struct CompiledUnit {
    pub file: NodeId,
    /// `main` declared by the unit, called after the package level code
    pub main: Option<NodeId>,
}

pub(crate) struct Compiler<'a> {
    pub(super) prog: &'a mut Program,
    pub(super) registry: &'a Registry,
    /// Unit being compiled, for redeclaration checks
    pub(super) unit: u32,
    pub(super) scope: ScopeId,
    pub(super) funcs: Vec<FuncCtx>,
}

impl<'a> Compiler<'a> {
    pub fn new(prog: &'a mut Program, registry: &'a Registry, unit: u32) -> Self {
        let scope = prog.main;
        Self{ prog, registry, unit, scope, funcs: Vec::new() }
    }

    // --- Shared helpers

    pub(super) fn error(&self, node: NodeId, msg: String) -> ParseError {
        self.prog.error_at(node, msg)
    }

    pub(super) fn named(&self) -> &[NamedType] {
        &self.prog.named
    }

    pub(super) fn show(&self, typ: &Type) -> String {
        typ.display(&self.prog.named).to_string()
    }

    pub(super) fn ident(&self, node: NodeId) -> &str {
        &self.prog.nodes[node].ident
    }

    /// Allocates a slot in the current function's frame.
    pub(super) fn temp(&mut self, typ: Type) -> usize {
        match self.funcs.last_mut() {
            Some(ctx) => {
                ctx.types.push(typ);
                ctx.types.len() - 1
            }
            None => 0,
        }
    }

    pub(super) fn depth(&self) -> usize {
        self.funcs.len()
    }

    /// Operand reading a variable symbol from the current function.
    pub(super) fn sym_operand(&self, sym: &Symbol) -> Operand {
        if sym.global {
            Operand::Global(sym.index)
        } else {
            Operand::Slot{ level: self.depth().saturating_sub(sym.depth), index: sym.index }
        }
    }

    /// Links the dynamic parts in order and then `last`. Returns the entry of
    /// the resulting sequence.
    pub(super) fn chain(&mut self, parts: &[NodeId], last: NodeId) -> NodeId {
        let mut next = last;
        for part in parts.iter().rev() {
            let node = &mut self.prog.nodes[*part];
            if let Some(start) = node.start {
                node.tnext = Some(next);
                next = start;
            }
        }
        next
    }

    /// Makes a node dynamic as a step of its own, so that it can carry a
    /// branch. Static nodes keep their operand.
    pub(super) fn ensure_step(&mut self, id: NodeId) {
        let node = &mut self.prog.nodes[id];
        if node.start.is_none() {
            node.start = Some(id);
            node.gen = "step";
            node.action = Action::Nop;
        }
    }

    pub(super) fn set_action(&mut self, id: NodeId, gen: &'static str, action: Action) {
        let node = &mut self.prog.nodes[id];
        node.gen = gen;
        node.action = action;
    }

    /// Finishes a dynamic expression node: its parts run first, then its
    /// action, whose result lands in a fresh slot when the node has a type.
    pub(super) fn finish_dynamic(&mut self, id: NodeId, typ: Option<Type>, gen: &'static str, action: Action, parts: &[NodeId]) {
        let slot = typ.clone().map(|t| self.temp(t));
        self.set_action(id, gen, action);
        let start = self.chain(parts, id);
        let node = &mut self.prog.nodes[id];
        node.typ = typ;
        node.findex = slot;
        node.value = slot.map(|index| Operand::Slot{ level: 0, index });
        node.start = Some(start);
    }

    pub(super) fn finish_static(&mut self, id: NodeId, typ: Type, value: Operand) {
        let node = &mut self.prog.nodes[id];
        node.typ = Some(typ);
        node.value = Some(value);
    }

    /// Declares a package level name. A name from an earlier unit is
    /// replaced, a second declaration within the unit is an error.
    pub(super) fn declare_global(&mut self, at: NodeId, name: &str, mut sym: Symbol) -> Result<(), ParseError> {
        let pkg = self.prog.main;
        sym.unit = self.unit;
        if let Some(prev) = self.prog.scopes.lookup_local(pkg, name) {
            if prev.unit == self.unit {
                return Err(self.error(at, format!("{} redeclared in this block", name)));
            }
        }
        self.prog.scopes.bind(pkg, name, sym);
        Ok(())
    }

    pub(super) fn declare_local(&mut self, at: NodeId, name: &str, mut sym: Symbol) -> Result<(), ParseError> {
        sym.unit = self.unit;
        if self.prog.scopes.declare(self.scope, name, sym).is_err() {
            return Err(self.error(at, format!("{} redeclared in this block", name)));
        }
        Ok(())
    }

    /// Declares a variable named by the identifier node in the current
    /// scope and returns where it lives.
    pub(super) fn declare_var(&mut self, name_node: NodeId, typ: Type) -> Result<Operand, ParseError> {
        let name = self.ident(name_node).to_string();
        let top_level = self.prog.scopes[self.scope].kind == ScopeKind::Package;
        if name == "_" {
            let index = self.temp(typ);
            return Ok(Operand::Slot{ level: 0, index });
        }

        let mut sym = Symbol::new(SymKind::Var, typ.clone());
        sym.node = Some(name_node);
        if top_level {
            let zero = typ.zero(&self.prog.named);
            sym.global = true;
            sym.index = self.prog.alloc_global(typ, zero);
            self.declare_global(name_node, &name, sym.clone())?;
        } else {
            sym.index = self.temp(typ);
            sym.depth = self.depth();
            self.declare_local(name_node, &name, sym.clone())?;
        }
        let op = self.sym_operand(&sym);
        let node = &mut self.prog.nodes[name_node];
        node.global = sym.global;
        node.findex = Some(sym.index);
        node.sym = Some(sym);
        node.scope = Some(self.scope);
        Ok(op)
    }

    pub(super) fn push_scope(&mut self, kind: ScopeKind) -> ScopeId {
        let scope = self.prog.scopes.push(Some(self.scope), kind, None);
        std::mem::replace(&mut self.scope, scope)
    }

    pub(super) fn pop_scope(&mut self, saved: ScopeId) {
        self.scope = saved;
    }

    // --- Units

    /// Compiles a parsed unit of evaluated source in the main package.
    #[tracing::instrument(level = "debug", skip_all, fields(unit = self.unit))]
    pub fn compile_file(&mut self, file: NodeId) -> Result<CompiledUnit, ParseError> {
        let pkg = self.prog.main;
        if let Some(name) = Some(self.prog.nodes[file].ident.clone()).filter(|n| !n.is_empty()) {
            if name != self.prog.scopes[pkg].pkg_name {
                compile_log!(package = %name, "package clause renames the main package");
                self.prog.scopes[pkg].pkg_name = name;
            }
        }
        self.scope = pkg;
        self.prog.nodes[file].scope = Some(pkg);
        self.funcs = vec![FuncCtx{ def: file, types: Vec::new(), results: Vec::new() }];

        let children = self.prog.nodes[file].children.clone();
        let of_kind = |c: &Compiler<'_>, kinds: &[NodeKind]| -> Vec<NodeId> {
            children.iter().copied().filter(|id| kinds.contains(&c.prog.nodes[*id].kind)).collect()
        };

        for import in of_kind(self, &[NodeKind::Import]) {
            self.import(import)?;
        }
        let types = of_kind(self, &[NodeKind::TypeSpec]);
        self.declare_types(&types)?;
        let decls = of_kind(self, &[NodeKind::FuncDecl]);
        let mut bodies = Vec::new();
        for decl in decls.iter() {
            if self.declare_func(*decl)? {
                bodies.push(*decl);
            }
        }

        // Package level statements, in order
        let mut stmts = Vec::new();
        for id in children.iter() {
            match self.prog.nodes[*id].kind {
                NodeKind::Import | NodeKind::TypeSpec | NodeKind::FuncDecl => {}
                _ => {
                    self.stmt(*id)?;
                    stmts.push(*id);
                }
            }
        }

        for decl in bodies {
            self.func_decl_body(decl, pkg)?;
        }

        let entry = self.chain(&stmts, file);
        self.set_action(file, "unit", Action::Nop);
        let ctx = self.funcs.pop();
        let types = ctx.map(|c| c.types).unwrap_or_default();
        let node = &mut self.prog.nodes[file];
        node.start = Some(entry);
        node.frame = Some(FrameLayout{ results: 0, params: 0, types, entry: Some(entry) });

        let main = decls.iter().copied().find(|d| {
            let n = &self.prog.nodes[*d];
            n.ident == "main" && self.prog.nodes[n.child(0)].children.is_empty()
        });
        compile_log!(nodes = self.prog.nodes.len(), has_main = main.is_some(), "unit compiled");
        Ok(CompiledUnit{ file, main })
    }

    // --- Declarations

    /// Declares the named types first and resolves their underlying types
    /// afterwards, so that types may refer to each other.
    pub(super) fn declare_types(&mut self, specs: &[NodeId]) -> Result<(), ParseError> {
        let mut pending = Vec::new();
        for spec in specs.iter().copied() {
            let name = self.ident(spec).to_string();
            self.prog.nodes[spec].scope = Some(self.scope);
            if self.prog.nodes[spec].op == super::ast::Op::Eql {
                // Alias: resolved in order, nothing to predeclare
                pending.push((spec, None));
                continue;
            }
            let id = self.prog.named.len() as u32;
            let pkg_name = self.prog.scopes[self.scope].pkg_name.clone();
            self.prog.named.push(NamedType{ name: Arc::from(name.as_str()), pkg: Arc::from(pkg_name), underlying: Type::ANY });
            let typ = Type::Named(NamedRef{ id, name: Arc::from(name.as_str()) });
            let mut sym = Symbol::new(SymKind::Type, typ);
            sym.node = Some(spec);
            self.declare_here(spec, &name, sym)?;
            pending.push((spec, Some(id)));
        }
        for (spec, id) in pending {
            let type_node = self.prog.nodes[spec].child(2);
            let resolved = self.resolve_type(type_node)?;
            match id {
                Some(id) => {
                    if let Type::Named(r) = &resolved {
                        if r.id == id {
                            return Err(self.error(spec, format!("invalid recursive type {}", self.ident(spec))));
                        }
                    }
                    let underlying = resolved.underlying(&self.prog.named).clone();
                    self.prog.named[id as usize].underlying = underlying;
                }
                None => {
                    let name = self.ident(spec).to_string();
                    let mut sym = Symbol::new(SymKind::Type, resolved);
                    sym.node = Some(spec);
                    self.declare_here(spec, &name, sym)?;
                }
            }
        }
        Ok(())
    }

    /// Declares in the current scope, with package level replacement rules
    /// at the package level.
    pub(super) fn declare_here(&mut self, at: NodeId, name: &str, sym: Symbol) -> Result<(), ParseError> {
        if self.scope == self.prog.main {
            self.declare_global(at, name, sym)
        } else {
            self.declare_local(at, name, sym)
        }
    }

    /// Declares a function or method. Returns whether its body needs
    /// compiling, which generic templates do not.
    fn declare_func(&mut self, decl: NodeId) -> Result<bool, ParseError> {
        let pkg = self.prog.main;
        self.prog.nodes[decl].scope = Some(pkg);
        let name = self.ident(decl).to_string();
        let tparams = self.prog.nodes[decl].params.clone();
        let recv = self.prog.nodes[self.prog.nodes[decl].child(0)].children.clone();

        if !tparams.is_empty() {
            if !recv.is_empty() {
                return Err(self.error(decl, String::from("methods cannot have type parameters")));
            }
            let typ = self.generic_signature(decl)?.func_type();
            let mut sym = Symbol::new(SymKind::Generic, typ);
            sym.node = Some(decl);
            self.declare_global(decl, &name, sym)?;
            compile_log!(name = %name, "generic template declared");
            return Ok(false);
        }

        let sig = self.signature(self.prog.nodes[decl].child(3))?;
        let typ = sig.func_type();
        self.prog.nodes[decl].typ = Some(typ.clone());

        if recv.is_empty() {
            if name == "init" {
                return Err(self.error(decl, String::from("init functions are not supported")));
            }
            let mut sym = Symbol::new(SymKind::Func, typ);
            sym.node = Some(decl);
            sym.value = Some(Value::Func(super::eval::value::FuncValue{ node: decl, env: None }));
            self.declare_global(decl, &name, sym)?;
        } else {
            let (named, _) = self.receiver_type(decl)?;
            let key = (named.id, name.clone());
            if let Some(prev) = self.prog.methods.get(&key) {
                if self.prog.nodes[*prev].unit == self.unit {
                    return Err(self.error(decl, format!("method {}.{} already declared", named.name, name)));
                }
            }
            self.prog.methods.insert(key, decl);
        }
        Ok(true)
    }

    /// Named type of a method's receiver, and whether it is a pointer
    /// receiver.
    pub(super) fn receiver_type(&mut self, decl: NodeId) -> Result<(NamedRef, bool), ParseError> {
        let recv_list = self.prog.nodes[decl].child(0);
        let field = match self.prog.nodes[recv_list].children.as_slice() {
            [field] => *field,
            _ => return Err(self.error(recv_list, String::from("method has multiple receivers"))),
        };
        let type_node = match self.prog.nodes[field].children.last() {
            Some(t) => *t,
            None => return Err(self.error(field, String::from("missing receiver type"))),
        };
        let typ = self.resolve_type(type_node)?;
        let (base, pointer) = match &typ {
            Type::Pointer(inner) => ((**inner).clone(), true),
            other => (other.clone(), false),
        };
        match base {
            Type::Named(named) => Ok((named, pointer)),
            other => {
                let msg = format!("invalid receiver type {}", self.show(&other));
                Err(self.error(type_node, msg))
            }
        }
    }

    /// Resolves the parameter and result lists of a `FuncType` node.
    pub(super) fn signature(&mut self, ftype: NodeId) -> Result<Signature, ParseError> {
        let (params_list, results_list) = match self.prog.nodes[ftype].children.as_slice() {
            [p, r] => (*p, *r),
            _ => return Err(self.error(ftype, String::from("malformed function type"))),
        };
        let (params, variadic) = self.fields(params_list, true)?;
        let (results, _) = self.fields(results_list, false)?;
        Ok(Signature{ params, results, variadic })
    }

    fn fields(&mut self, list: NodeId, allow_variadic: bool) -> Result<(Vec<Param>, bool), ParseError> {
        let fields = self.prog.nodes[list].children.clone();
        let mut out = Vec::new();
        let mut variadic = false;
        for (i, field) in fields.iter().enumerate() {
            let children = self.prog.nodes[*field].children.clone();
            let (type_node, names) = match children.split_last() {
                Some((t, names)) => (*t, names.to_vec()),
                None => continue,
            };
            let typ = if self.prog.nodes[type_node].kind == NodeKind::Ellipsis {
                if !allow_variadic || i + 1 != fields.len() || names.len() > 1 {
                    return Err(self.error(type_node, String::from("can only use ... with final parameter in list")));
                }
                variadic = true;
                let elem = self.prog.nodes[type_node].child(0);
                Type::Slice(Box::new(self.resolve_type(elem)?))
            } else {
                self.resolve_type(type_node)?
            };
            if names.is_empty() {
                out.push((None, typ));
            } else {
                out.extend(names.into_iter().map(|n| (Some(n), typ.clone())));
            }
        }
        Ok((out, variadic))
    }

    /// Compiles the body of a declared function (or generic instance) whose
    /// free names resolve in `outer`.
    pub(super) fn func_decl_body(&mut self, decl: NodeId, outer: ScopeId) -> Result<(), ParseError> {
        let sig = {
            let saved = std::mem::replace(&mut self.scope, outer);
            let sig = self.signature(self.prog.nodes[decl].child(3));
            self.scope = saved;
            sig?
        };
        self.prog.nodes[decl].typ = Some(sig.func_type());

        let recv = if self.prog.nodes[self.prog.nodes[decl].child(0)].children.is_empty() {
            None
        } else {
            let (named, pointer) = self.receiver_type(decl)?;
            let field = self.prog.nodes[self.prog.nodes[decl].child(0)].child(0);
            let name = match self.prog.nodes[field].children.as_slice() {
                [name, _] => Some(*name),
                _ => None,
            };
            let typ = Type::Named(named);
            let typ = if pointer { Type::Pointer(Box::new(typ)) } else { typ };
            Some((name, typ))
        };

        let saved_funcs = std::mem::take(&mut self.funcs);
        let saved_scope = std::mem::replace(&mut self.scope, outer);
        let body = self.prog.nodes[decl].child(4);
        let layout = self.function(decl, recv, &sig, body);
        self.funcs = saved_funcs;
        self.scope = saved_scope;

        self.prog.nodes[decl].frame = Some(layout?);
        Ok(())
    }

    /// Compiles a function body in a new function scope below the current
    /// scope, and returns its frame layout.
    pub(super) fn function(&mut self, def: NodeId, recv: Option<Param>, sig: &Signature, body: NodeId) -> Result<FrameLayout, ParseError> {
        let scope = self.prog.scopes.push(Some(self.scope), ScopeKind::Func, Some(def));
        self.prog.nodes[def].scope = Some(scope);
        let saved = std::mem::replace(&mut self.scope, scope);
        self.funcs.push(FuncCtx{
            def,
            types: Vec::new(),
            results: sig.results.iter().map(|(_, t)| t.clone()).collect(),
        });

        let result = self.function_inner(recv, sig, body);
        let ctx = self.funcs.pop();
        self.scope = saved;
        let (results, params) = result?;

        Ok(FrameLayout{
            results,
            params,
            types: ctx.map(|c| c.types).unwrap_or_default(),
            entry: self.prog.nodes[body].start,
        })
    }

    fn function_inner(&mut self, recv: Option<Param>, sig: &Signature, body: NodeId) -> Result<(usize, usize), ParseError> {
        let bind = |c: &mut Compiler<'_>, (name, typ): &Param| -> Result<(), ParseError> {
            match name {
                Some(name) => {
                    c.declare_var(*name, typ.clone())?;
                }
                None => {
                    c.temp(typ.clone());
                }
            }
            Ok(())
        };
        for result in sig.results.iter() {
            bind(self, result)?;
        }
        let mut params = 0;
        if let Some(recv) = recv.as_ref() {
            bind(self, recv)?;
            params += 1;
        }
        for param in sig.params.iter() {
            bind(self, param)?;
            params += 1;
        }

        // The body shares the function scope with the parameters
        self.block_in_scope(body)?;
        Ok((sig.results.len(), params))
    }
}
