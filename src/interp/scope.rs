/// scope.rs
///
/// Lexical environments. Scopes nest from the universe down through package,
/// function and block scopes. Every scope knows the function declaration or
/// literal it belongs to, which is what call stack rendering walks to name
/// the function executing at a call site.

use std::collections::hash_map::Entry;

use crate::common::*;
use super::ast::NodeId;
use super::eval::builtins::Builtin;
use super::eval::value::Value;
use super::types::{Basic, Iface, Type};

pub type ScopeId = Id<Scope>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymKind {
    Var,
    Const,
    Type,
    Func,
    /// Generic function template, only callable through instantiation
    Generic,
    Native,
    Builtin(Builtin),
    Package,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub kind: SymKind,
    pub typ: Type,
    /// Frame slot, or index in the root frame for package level variables
    pub index: usize,
    /// Number of enclosing function contexts at the declaration
    pub depth: usize,
    pub global: bool,
    pub node: Option<NodeId>,
    /// Constant value, or the native function
    pub value: Option<Value>,
    /// Scope of the package a package symbol refers to
    pub pkg: Option<ScopeId>,
    /// Unit in which the symbol was declared
    pub unit: u32,
}

impl Symbol {
    pub fn new(kind: SymKind, typ: Type) -> Self {
        Self{
            kind, typ,
            index: 0,
            depth: 0,
            global: false,
            node: None,
            value: None,
            pkg: None,
            unit: u32::MAX,
        }
    }

    pub fn constant(typ: Type, value: Value) -> Self {
        Self{ value: Some(value), ..Self::new(SymKind::Const, typ) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Universe,
    Package,
    Func,
    Block,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub this: ScopeId,
    pub anc: Option<ScopeId>,
    pub kind: ScopeKind,
    /// Function declaration or literal owning the scope
    pub def: Option<NodeId>,
    pub pkg_name: String,
    pub syms: HashMap<String, Symbol>,
}

#[derive(Clone, Default)]
pub struct Scopes {
    arena: Arena<Scope>,
}

impl Scopes {
    pub fn new() -> Self {
        Self{ arena: Arena::new() }
    }

    pub fn push(&mut self, anc: Option<ScopeId>, kind: ScopeKind, def: Option<NodeId>) -> ScopeId {
        let (pkg_name, def) = match anc {
            Some(anc) => {
                let parent = &self.arena[anc];
                let inherited_def = if kind == ScopeKind::Block { parent.def } else { None };
                (parent.pkg_name.clone(), def.or(inherited_def))
            }
            None => (String::new(), def),
        };
        self.arena.alloc_with_id(|this| Scope{
            this, anc, kind, def, pkg_name,
            syms: HashMap::new(),
        })
    }

    pub fn push_package(&mut self, universe: ScopeId, name: &str) -> ScopeId {
        let id = self.push(Some(universe), ScopeKind::Package, None);
        self.arena[id].pkg_name = name.to_string();
        id
    }

    /// Resolves a name from a scope outwards. Returns the declaring scope.
    pub fn lookup(&self, mut scope: ScopeId, name: &str) -> Option<(ScopeId, &Symbol)> {
        loop {
            let s = &self.arena[scope];
            if let Some(sym) = s.syms.get(name) {
                return Some((scope, sym));
            }
            scope = s.anc?;
        }
    }

    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        self.arena[scope].syms.get(name)
    }

    /// Declares a name in a scope. Fails with the previous symbol if the name
    /// was declared in this scope before.
    pub fn declare(&mut self, scope: ScopeId, name: &str, sym: Symbol) -> Result<(), Symbol> {
        match self.arena[scope].syms.entry(name.to_string()) {
            Entry::Occupied(e) => Err(e.get().clone()),
            Entry::Vacant(e) => {
                e.insert(sym);
                Ok(())
            }
        }
    }

    /// Declares or replaces a name.
    pub fn bind(&mut self, scope: ScopeId, name: &str, sym: Symbol) {
        self.arena[scope].syms.insert(name.to_string(), sym);
    }

    pub fn unbind(&mut self, scope: ScopeId, name: &str) -> Option<Symbol> {
        self.arena[scope].syms.remove(name)
    }
}

impl std::ops::Index<ScopeId> for Scopes {
    type Output = Scope;
    fn index(&self, id: ScopeId) -> &Self::Output {
        &self.arena[id]
    }
}

impl std::ops::IndexMut<ScopeId> for Scopes {
    fn index_mut(&mut self, id: ScopeId) -> &mut Self::Output {
        &mut self.arena[id]
    }
}

/// Builds the universe scope: predeclared types, constants and builtins.
pub fn universe(scopes: &mut Scopes) -> ScopeId {
    let id = scopes.push(None, ScopeKind::Universe, None);

    let types = [
        ("bool", Type::Basic(Basic::Bool)),
        ("int", Type::Basic(Basic::Int)),
        ("int8", Type::Basic(Basic::Int8)),
        ("int16", Type::Basic(Basic::Int16)),
        ("int32", Type::Basic(Basic::Int32)),
        ("rune", Type::Basic(Basic::Int32)),
        ("int64", Type::Basic(Basic::Int64)),
        ("uint", Type::Basic(Basic::Uint)),
        ("uint8", Type::Basic(Basic::Uint8)),
        ("byte", Type::Basic(Basic::Uint8)),
        ("uint16", Type::Basic(Basic::Uint16)),
        ("uint32", Type::Basic(Basic::Uint32)),
        ("uint64", Type::Basic(Basic::Uint64)),
        ("uintptr", Type::Basic(Basic::Uintptr)),
        ("float32", Type::Basic(Basic::Float32)),
        ("float64", Type::Basic(Basic::Float64)),
        ("string", Type::Basic(Basic::String)),
        ("error", Type::Interface(Iface::Error)),
        ("any", Type::Interface(Iface::Any)),
        ("comparable", Type::Interface(Iface::Comparable)),
    ];
    for (name, typ) in types.iter() {
        scopes.bind(id, name, Symbol::new(SymKind::Type, typ.clone()));
    }

    scopes.bind(id, "true", Symbol::constant(Type::Basic(Basic::UntypedBool), Value::Bool(true)));
    scopes.bind(id, "false", Symbol::constant(Type::Basic(Basic::UntypedBool), Value::Bool(false)));
    scopes.bind(id, "nil", Symbol::constant(Type::NIL, Value::Nil));

    for builtin in Builtin::ALL.iter() {
        scopes.bind(id, builtin.name(), Symbol::new(SymKind::Builtin(*builtin), Type::ANY));
    }

    scopes[id].pkg_name = String::from("_");
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_outwards_and_shadows() {
        let mut scopes = Scopes::new();
        let uni = universe(&mut scopes);
        let pkg = scopes.push_package(uni, "main");
        let block = scopes.push(Some(pkg), ScopeKind::Block, None);

        scopes.declare(pkg, "x", Symbol::new(SymKind::Var, Type::INT)).unwrap();
        scopes.declare(block, "x", Symbol::new(SymKind::Var, Type::STRING)).unwrap();
        assert!(scopes.declare(block, "x", Symbol::new(SymKind::Var, Type::BOOL)).is_err());

        let (found, sym) = scopes.lookup(block, "x").unwrap();
        assert_eq!(found, block);
        assert_eq!(sym.typ, Type::STRING);
        let (found, _) = scopes.lookup(block, "int").unwrap();
        assert_eq!(found, uni);
        assert_eq!(scopes[block].pkg_name, "main");
        assert_eq!(scopes[block].anc, Some(pkg));
        assert!(scopes.lookup(block, "undefined").is_none());
    }
}
