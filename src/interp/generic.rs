/// generic.rs
///
/// Generic functions. A generic declaration is a template which never runs
/// itself: every distinct list of type arguments gets its own copy of the
/// declaration, compiled with the type parameters bound to the arguments.
/// Copies are cached by template and type arguments, and registered in the
/// template's package under the name `Name[T1,T2]`.

use crate::common::*;
use super::ast::NodeId;
use super::compile::{Compiler, Signature};
use super::eval::value::{FuncValue, Value};
use super::input_source::ParseError;
use super::scope::{ScopeId, ScopeKind, SymKind, Symbol};
use super::types::{Iface, NamedType, Type};

struct TypeParam {
    name: Arc<str>,
    node: NodeId,
    constraint: NodeId,
}

impl<'a> Compiler<'a> {
    fn type_params(&self, decl: NodeId) -> Vec<TypeParam> {
        let mut params = Vec::new();
        for field in self.prog.nodes[decl].params.iter() {
            if let Some((constraint, names)) = self.prog.nodes[*field].children.split_last() {
                for name in names {
                    params.push(TypeParam{
                        name: Arc::from(self.prog.nodes[*name].ident.as_str()),
                        node: *name,
                        constraint: *constraint,
                    });
                }
            }
        }
        params
    }

    /// Package scope the template was declared in.
    fn template_scope(&self, decl: NodeId) -> ScopeId {
        self.prog.nodes[decl].scope.unwrap_or(self.prog.main)
    }

    /// New scope below the template's package binding each type parameter
    /// name to a type.
    fn bind_type_params(&mut self, decl: NodeId, params: &[TypeParam], types: &[Type]) -> ScopeId {
        let outer = self.template_scope(decl);
        let scope = self.prog.scopes.push(Some(outer), ScopeKind::Block, None);
        for (param, typ) in params.iter().zip(types.iter()) {
            let mut sym = Symbol::new(SymKind::Type, typ.clone());
            sym.node = Some(param.node);
            self.prog.scopes.bind(scope, &param.name, sym);
        }
        scope
    }

    fn in_scope<T>(&mut self, scope: ScopeId, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = std::mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = saved;
        result
    }

    /// Signature of a template in terms of its type parameters.
    pub(super) fn generic_signature(&mut self, decl: NodeId) -> Result<Signature, ParseError> {
        let params = self.type_params(decl);
        let types: Vec<Type> = params.iter().map(|p| Type::Param(p.name.clone())).collect();
        let scope = self.bind_type_params(decl, &params, &types);
        let ftype = self.prog.nodes[decl].child(3);
        self.in_scope(scope, |c| c.signature(ftype))
    }

    /// Type arguments of a call to a template: the explicit ones, completed
    /// by inference from the argument types.
    pub(super) fn infer(&mut self, site: NodeId, decl: NodeId, explicit: Vec<Type>, args: &[Type]) -> Result<Vec<Type>, ParseError> {
        let params = self.type_params(decl);
        let name = self.ident(decl).to_string();
        if explicit.len() > params.len() {
            let msg = format!("got {} type arguments but {} has {} type parameters", explicit.len(), name, params.len());
            return Err(self.error(site, msg));
        }

        let sig = self.generic_signature(decl)?;
        let mut bound: HashMap<Arc<str>, Type> = params.iter().map(|p| p.name.clone()).zip(explicit.into_iter()).collect();
        let param_at = |i: usize| -> Option<&Type> {
            let last = sig.params.len().checked_sub(1)?;
            match (sig.variadic, i >= last) {
                (true, true) => match &sig.params[last].1 {
                    Type::Slice(elem) => Some(&**elem),
                    other => Some(other),
                },
                _ => sig.params.get(i).map(|(_, t)| t),
            }
        };

        // Typed arguments first, untyped constants only fill what is left
        for (i, arg) in args.iter().enumerate() {
            if arg.is_untyped() {
                continue;
            }
            if let Some(param) = param_at(i) {
                unify(&self.prog.named, param, arg, &mut bound).map_err(|msg| self.prog.error_at(site, msg))?;
            }
        }
        for (i, arg) in args.iter().enumerate() {
            if !arg.is_untyped() || *arg == Type::NIL {
                continue;
            }
            if let Some(Type::Param(p)) = param_at(i) {
                bound.entry(p.clone()).or_insert_with(|| arg.defaulted());
            }
        }

        let mut targs = Vec::with_capacity(params.len());
        for param in params.iter() {
            match bound.get(&param.name) {
                Some(t) => targs.push(t.clone()),
                None => return Err(self.error(site, format!("in call to {}, cannot infer {}", name, param.name))),
            }
        }

        // Constraints are resolved with the parameters bound to the arguments
        let scope = self.bind_type_params(decl, &params, &targs);
        for (param, targ) in params.iter().zip(targs.iter()) {
            let constraint = self.in_scope(scope, |c| c.resolve_type(param.constraint))?;
            if constraint == Type::Interface(Iface::Comparable) && !targ.is_comparable(&self.prog.named) {
                let msg = format!("{} does not satisfy comparable", self.show(targ));
                return Err(self.error(site, msg));
            }
        }
        compile_log!(template = %name, targs = targs.len(), "type arguments inferred");
        Ok(targs)
    }

    /// Instance of a template for the type arguments, compiled on first use.
    /// Returns the instance declaration and its function type.
    pub(super) fn instantiate(&mut self, decl: NodeId, targs: &[Type]) -> Result<(NodeId, Type), ParseError> {
        let name = self.ident(decl).to_string();
        let key = (decl, targs.to_vec());
        if let Some(inst) = self.prog.instances.get(&key).copied() {
            compile_log!(template = %name, "generic instance reused");
            if let Some(typ) = self.prog.nodes[inst].typ.clone() {
                return Ok((inst, typ));
            }
        }

        let params = self.type_params(decl);
        let bound: HashMap<Arc<str>, Type> = params.iter().map(|p| p.name.clone()).zip(targs.iter().cloned()).collect();
        let typ = self.generic_signature(decl)?.func_type().subst(&bound);

        let mut remap = HashMap::new();
        let inst = self.prog.nodes.clone_subtree(decl, &mut remap);
        self.prog.nodes[inst].anc = None;
        self.prog.nodes[inst].typ = Some(typ.clone());
        // Registered before the body is compiled, recursive calls find it
        self.prog.instances.insert(key, inst);

        let shown: Vec<String> = targs.iter().map(|t| self.show(t)).collect();
        let inst_name = format!("{}[{}]", name, shown.join(","));
        compile_log!(instance = %inst_name, nodes = remap.len(), "instantiating generic");

        let pkg = self.template_scope(decl);
        let mut sym = Symbol::new(SymKind::Func, typ.clone());
        sym.node = Some(inst);
        sym.value = Some(Value::Func(FuncValue{ node: inst, env: None }));
        self.prog.scopes.bind(pkg, &inst_name, sym);

        let tscope = self.bind_type_params(decl, &params, targs);
        self.func_decl_body(inst, tscope)?;
        Ok((inst, typ))
    }
}

/// Matches a parameter type against an argument type, binding the type
/// parameters it contains.
fn unify(named: &[NamedType], param: &Type, arg: &Type, bound: &mut HashMap<Arc<str>, Type>) -> Result<(), String> {
    if let Type::Param(name) = param {
        return match bound.get(name) {
            Some(prev) if prev != arg => Err(format!(
                "type {} does not match inferred type {} for {}",
                arg.display(named), prev.display(named), name,
            )),
            Some(_) => Ok(()),
            None => {
                bound.insert(name.clone(), arg.clone());
                Ok(())
            }
        };
    }
    if !param.contains_params() {
        return Ok(());
    }

    let mismatch = || format!("type {} does not match {}", arg.display(named), param.display(named));
    let structural = arg.underlying(named);
    match (param, structural) {
        (Type::Pointer(p), Type::Pointer(a)) | (Type::Slice(p), Type::Slice(a)) | (Type::Chan(_, p), Type::Chan(_, a)) => {
            unify(named, p, a, bound)
        }
        (Type::Func(p), Type::Func(a)) if p.params.len() == a.params.len() && p.results.len() == a.results.len() => {
            for (p, a) in p.params.iter().zip(a.params.iter()).chain(p.results.iter().zip(a.results.iter())) {
                unify(named, p, a, bound)?;
            }
            Ok(())
        }
        (Type::Struct(p), Type::Struct(a)) if p.len() == a.len() => {
            for (p, a) in p.iter().zip(a.iter()) {
                unify(named, &p.typ, &a.typ, bound)?;
            }
            Ok(())
        }
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str) -> Type {
        Type::Param(Arc::from(name))
    }

    #[test]
    fn unify_binds_through_composite_types() {
        let named = Vec::new();
        let mut bound = HashMap::new();
        let p = Type::func(vec![Type::Pointer(Box::new(param("T")))], vec![param("F")], false);
        let a = Type::func(vec![Type::Pointer(Box::new(Type::INT))], vec![Type::BOOL], false);
        unify(&named, &p, &a, &mut bound).unwrap();
        assert_eq!(bound["T"], Type::INT);
        assert_eq!(bound["F"], Type::BOOL);
    }

    #[test]
    fn unify_reports_conflicts() {
        let named = Vec::new();
        let mut bound = hashmap!{ Arc::from("T") => Type::INT };
        let err = unify(&named, &param("T"), &Type::STRING, &mut bound).unwrap_err();
        assert_eq!(err, "type string does not match inferred type int for T");
        let err = unify(&named, &Type::Slice(Box::new(param("T"))), &Type::INT, &mut bound).unwrap_err();
        assert_eq!(err, "type int does not match []T");
    }
}
