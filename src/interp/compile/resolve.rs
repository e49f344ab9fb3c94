use crate::common::*;
use crate::interp::ast::{NodeId, NodeKind, Op};
use crate::interp::eval::value::Value;
use crate::interp::exports::{Native, NativePackage, Registry};
use crate::interp::input_source::{InputSource, ParseError};
use crate::interp::parser::{parse_type_text, parse_unit};
use crate::interp::program::Program;
use crate::interp::scope::{ScopeId, SymKind, Symbol};
use crate::interp::types::{ChanDir, Iface, StructField, Type};
use super::Compiler;

impl<'a> Compiler<'a> {
    // --- Names

    pub(super) fn lookup(&self, name: &str) -> Option<Symbol> {
        self.prog.scopes.lookup(self.scope, name).map(|(_, sym)| sym.clone())
    }

    /// Scope of the package an identifier names: an imported package, or a
    /// registered package that was not imported but whose name is unique.
    pub(super) fn package_of(&mut self, x: NodeId) -> Result<Option<ScopeId>, ParseError> {
        if self.prog.nodes[x].kind != NodeKind::Ident {
            return Ok(None);
        }
        let name = self.ident(x).to_string();
        match self.lookup(&name) {
            Some(sym) if sym.kind == SymKind::Package => Ok(sym.pkg),
            Some(_) => Ok(None),
            None => {
                let key = match self.registry.by_name(&name) {
                    Some(pkg) => pkg.key.clone(),
                    None => return Ok(None),
                };
                compile_log!(package = %name, "resolving package without import");
                self.native_scope(&key).map(Some)
            }
        }
    }

    /// Member of a package, for a selector `pkg.Name`.
    pub(super) fn package_member(&mut self, pkg: ScopeId, sel: NodeId) -> Result<Symbol, ParseError> {
        let name = self.ident(sel).to_string();
        match self.prog.scopes.lookup_local(pkg, &name) {
            Some(sym) => Ok(sym.clone()),
            None => {
                let pkg_name = self.prog.scopes[pkg].pkg_name.clone();
                Err(self.error(sel, format!("undefined: {}.{}", pkg_name, name)))
            }
        }
    }

    /// Scope of a registered native package, loaded on first use.
    pub(super) fn native_scope(&mut self, key: &str) -> Result<ScopeId, ParseError> {
        if let Some(scope) = self.prog.packages.get(key) {
            return Ok(*scope);
        }
        let pkg = match self.registry.packages.get(key) {
            Some(pkg) => pkg.clone(),
            None => return Err(ParseError::new_detached("?", format!("unable to find source related to: {:?}", key))),
        };
        load_native_package(self.prog, &pkg)
    }

    pub(super) fn import(&mut self, node: NodeId) -> Result<(), ParseError> {
        let path = match &self.prog.nodes[node].lit {
            Some(crate::interp::ast::Literal::String(path)) => path.to_string(),
            _ => return Err(self.error(node, String::from("missing import path"))),
        };
        let (key, name) = match self.registry.by_path(&path) {
            Some(pkg) => (pkg.key.clone(), pkg.name.clone()),
            None => return Err(self.error(node, format!("unable to find source related to: {:?}", path))),
        };
        let scope = self.native_scope(&key)?;
        let alias = self.ident(node).to_string();
        compile_log!(path = %path, alias = %alias, "import");

        match alias.as_str() {
            "_" => {}
            "." => {
                let members: Vec<(String, Symbol)> = self.prog.scopes[scope].syms.iter()
                    .map(|(n, s)| (n.clone(), s.clone()))
                    .collect();
                for (member, sym) in members {
                    self.declare_global(node, &member, sym)?;
                }
            }
            _ => {
                let name = if alias.is_empty() { name } else { alias };
                let mut sym = Symbol::new(SymKind::Package, Type::ANY);
                sym.pkg = Some(scope);
                sym.node = Some(node);
                self.declare_global(node, &name, sym)?;
            }
        }
        Ok(())
    }

    // --- Types

    pub(crate) fn resolve_type(&mut self, id: NodeId) -> Result<Type, ParseError> {
        match self.try_type(id)? {
            Some(typ) => Ok(typ),
            None => {
                let node = &self.prog.nodes[id];
                let msg = match node.kind {
                    NodeKind::Ident if self.lookup(&node.ident).is_none() => format!("undefined: {}", node.ident),
                    NodeKind::Ident => format!("{} is not a type", node.ident),
                    NodeKind::Index | NodeKind::IndexList => String::from("generic types are not supported"),
                    _ => String::from("expected type"),
                };
                Err(self.error(id, msg))
            }
        }
    }

    /// Type denoted by an expression, if it denotes one.
    pub(super) fn try_type(&mut self, id: NodeId) -> Result<Option<Type>, ParseError> {
        let kind = self.prog.nodes[id].kind;
        let typ = match kind {
            NodeKind::Ident => match self.lookup(self.ident(id)) {
                Some(sym) if sym.kind == SymKind::Type => sym.typ,
                _ => return Ok(None),
            },
            NodeKind::Selector => {
                let (x, sel) = (self.prog.nodes[id].child(0), self.prog.nodes[id].child(1));
                match self.package_of(x)? {
                    Some(pkg) => match self.package_member(pkg, sel)? {
                        sym if sym.kind == SymKind::Type => sym.typ,
                        _ => return Ok(None),
                    },
                    None => return Ok(None),
                }
            }
            NodeKind::PointerType => {
                let elem = self.prog.nodes[id].child(0);
                Type::Pointer(Box::new(self.resolve_type(elem)?))
            }
            NodeKind::Star => {
                let elem = self.prog.nodes[id].child(0);
                match self.try_type(elem)? {
                    Some(t) => Type::Pointer(Box::new(t)),
                    None => return Ok(None),
                }
            }
            NodeKind::SliceType => {
                let elem = self.prog.nodes[id].child(0);
                Type::Slice(Box::new(self.resolve_type(elem)?))
            }
            NodeKind::ChanType => {
                let dir = match self.prog.nodes[id].op {
                    Op::SendOnly => ChanDir::Send,
                    Op::RecvOnly => ChanDir::Recv,
                    _ => ChanDir::Both,
                };
                let elem = self.prog.nodes[id].child(0);
                Type::Chan(dir, Box::new(self.resolve_type(elem)?))
            }
            NodeKind::FuncType => self.signature(id)?.func_type(),
            NodeKind::StructType => self.struct_type(id)?,
            NodeKind::InterfaceType => self.interface_type(id)?,
            _ => return Ok(None),
        };
        self.prog.nodes[id].typ = Some(typ.clone());
        Ok(Some(typ))
    }

    fn struct_type(&mut self, id: NodeId) -> Result<Type, ParseError> {
        let mut fields: Vec<StructField> = Vec::new();
        for field in self.prog.nodes[id].children.clone() {
            let children = self.prog.nodes[field].children.clone();
            let (type_node, names) = match children.split_last() {
                Some(split) => split,
                None => continue,
            };
            let typ = self.resolve_type(*type_node)?;
            for name in names {
                let name = self.ident(*name).to_string();
                if name != "_" && fields.iter().any(|f| *f.name == *name) {
                    return Err(self.error(field, format!("{} redeclared", name)));
                }
                fields.push(StructField{ name: Arc::from(name), typ: typ.clone() });
            }
        }
        Ok(Type::Struct(Arc::new(fields)))
    }

    /// Interfaces are limited to `any`, `error` (an interface whose only
    /// method is `Error`) and constraints. A union constraint admits any type.
    fn interface_type(&mut self, id: NodeId) -> Result<Type, ParseError> {
        let elems = self.prog.nodes[id].children.clone();
        let mut result = Type::ANY;
        for (i, elem) in elems.iter().copied().enumerate() {
            let n = &self.prog.nodes[elem];
            if n.kind == NodeKind::Ident {
                let name = n.ident.clone();
                match self.lookup(&name) {
                    Some(sym) if sym.kind == SymKind::Type => {
                        if elems.len() == 1 && sym.typ == Type::Interface(Iface::Comparable) {
                            result = sym.typ;
                        }
                        continue;
                    }
                    _ => {}
                }
                // Method name
                if name == "Error" && elems.len() == 1 && i == 0 {
                    result = Type::ERROR;
                    continue;
                }
                return Err(self.error(elem, format!("interface method {} is not supported", name)));
            }
            // Union or embedded type: a constraint only
            self.try_type(elem)?;
        }
        Ok(result)
    }
}

/// Resolves a type written as text, with only the predeclared types in scope.
pub(crate) fn resolve_type_text(text: &str) -> Result<Type, ParseError> {
    let mut prog = Program::new();
    let mut source = InputSource::new(String::from("<type>"), text.as_bytes().to_vec());
    let root = parse_type_text(&mut prog.nodes, 0, &mut source)?;
    let unit = prog.add_unit(String::from("<type>"), source);
    let registry = Registry::default();
    let mut compiler = Compiler::new(&mut prog, &registry, unit);
    compiler.resolve_type(root)
}

/// Creates the scope of a registered native package in the program and binds
/// its members.
pub(crate) fn load_native_package(prog: &mut Program, pkg: &NativePackage) -> Result<ScopeId, ParseError> {
    let scope = prog.scopes.push_package(prog.universe, &pkg.name);
    prog.packages.insert(pkg.key.clone(), scope);

    let mut names: Vec<&String> = pkg.members.keys().collect();
    names.sort();
    for name in names {
        let member = &pkg.members[name];
        match &member.native {
            Native::Func(f) => {
                let typ = member.typ.clone().unwrap_or(Type::ANY);
                let mut sym = Symbol::new(SymKind::Native, typ);
                sym.value = Some(Value::Native(f.clone()));
                prog.scopes.bind(scope, name, sym);
            }
            Native::Value{ value, .. } => {
                let typ = member.typ.clone().unwrap_or(Type::ANY);
                let mut sym = Symbol::new(SymKind::Var, typ.clone());
                sym.global = true;
                sym.index = prog.alloc_global(typ, value.clone());
                prog.scopes.bind(scope, name, sym);
            }
            Native::Generic(generic) => {
                let unit_name = format!("{}/{}.go", pkg.path, name);
                let mut source = InputSource::new(unit_name.clone(), generic.0.as_bytes().to_vec());
                let unit = prog.units.len() as u32;
                let file = parse_unit(&mut prog.nodes, unit, &mut source)?;
                prog.add_unit(unit_name, source);
                let decl = prog.nodes[file].children.iter().copied()
                    .find(|d| prog.nodes[*d].kind == NodeKind::FuncDecl && prog.nodes[*d].ident == *name);
                let decl = match decl {
                    Some(decl) => decl,
                    None => return Err(prog.error_at(file, format!("source of {}.{} does not declare {}", pkg.name, name, name))),
                };
                prog.nodes[decl].scope = Some(scope);

                let registry = Registry::default();
                let mut compiler = Compiler::new(prog, &registry, unit);
                compiler.scope = scope;
                let typ = compiler.generic_signature(decl)?.func_type();
                let mut sym = Symbol::new(SymKind::Generic, typ);
                sym.node = Some(decl);
                sym.unit = unit;
                prog.scopes.bind(scope, name, sym);
            }
        }
    }
    tracing::debug!(package = %pkg.key, members = pkg.members.len(), "native package loaded");
    Ok(scope)
}
