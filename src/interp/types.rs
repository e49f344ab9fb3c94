use crate::common::*;
use super::eval::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Basic {
    Bool,
    Int, Int8, Int16, Int32, Int64,
    Uint, Uint8, Uint16, Uint32, Uint64, Uintptr,
    Float32, Float64,
    String,
    // Types of constants that have not met a typed context yet
    UntypedBool, UntypedInt, UntypedRune, UntypedFloat, UntypedString, UntypedNil,
}

impl Basic {
    pub fn is_untyped(&self) -> bool {
        use Basic::*;
        matches!(self, UntypedBool | UntypedInt | UntypedRune | UntypedFloat | UntypedString | UntypedNil)
    }

    pub fn is_signed(&self) -> bool {
        use Basic::*;
        matches!(self, Int | Int8 | Int16 | Int32 | Int64 | UntypedInt | UntypedRune)
    }

    pub fn is_unsigned(&self) -> bool {
        use Basic::*;
        matches!(self, Uint | Uint8 | Uint16 | Uint32 | Uint64 | Uintptr)
    }

    pub fn is_integer(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Basic::Float32 | Basic::Float64 | Basic::UntypedFloat)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Basic::String | Basic::UntypedString)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Basic::Bool | Basic::UntypedBool)
    }

    /// Width in bits of a sized integer kind, `None` for other kinds.
    pub fn bits(&self) -> Option<u32> {
        use Basic::*;
        match self {
            Int8 | Uint8 => Some(8),
            Int16 | Uint16 => Some(16),
            Int32 | Uint32 => Some(32),
            Int | Int64 | Uint | Uint64 | Uintptr => Some(64),
            _ => None,
        }
    }

    /// The type an untyped constant takes when nothing else is known.
    pub fn default_type(&self) -> Basic {
        match self {
            Basic::UntypedBool => Basic::Bool,
            Basic::UntypedInt => Basic::Int,
            Basic::UntypedRune => Basic::Int32,
            Basic::UntypedFloat => Basic::Float64,
            Basic::UntypedString => Basic::String,
            other => *other,
        }
    }

    pub fn name(&self) -> &'static str {
        use Basic::*;
        match self {
            Bool => "bool",
            Int => "int",
            Int8 => "int8",
            Int16 => "int16",
            Int32 => "int32",
            Int64 => "int64",
            Uint => "uint",
            Uint8 => "uint8",
            Uint16 => "uint16",
            Uint32 => "uint32",
            Uint64 => "uint64",
            Uintptr => "uintptr",
            Float32 => "float32",
            Float64 => "float64",
            String => "string",
            UntypedBool => "untyped bool",
            UntypedInt => "untyped int",
            UntypedRune => "untyped rune",
            UntypedFloat => "untyped float",
            UntypedString => "untyped string",
            UntypedNil => "untyped nil",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Iface {
    /// `any` and `interface{}`
    Any,
    /// The predeclared `error` interface
    Error,
    /// The `comparable` constraint
    Comparable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChanDir {
    Both,
    Send,
    Recv,
}

/// Reference to a declared named type. Identity is the index into the
/// program's table of named types.
#[derive(Debug, Clone)]
pub struct NamedRef {
    pub id: u32,
    pub name: Arc<str>,
}

impl PartialEq for NamedRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for NamedRef {}
impl std::hash::Hash for NamedRef {
    fn hash<H: std::hash::Hasher>(&self, h: &mut H) {
        self.id.hash(h)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    pub params: Vec<Type>,
    pub results: Vec<Type>,
    pub variadic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructField {
    pub name: Arc<str>,
    pub typ: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Basic(Basic),
    Named(NamedRef),
    Pointer(Box<Type>),
    Slice(Box<Type>),
    Chan(ChanDir, Box<Type>),
    Func(Arc<FuncType>),
    Struct(Arc<Vec<StructField>>),
    Interface(Iface),
    /// Type parameter of a generic template
    Param(Arc<str>),
    /// Results of a call with more than one result
    Tuple(Arc<Vec<Type>>),
}

/// Declared named type: its underlying type and owning package.
#[derive(Debug, Clone)]
pub struct NamedType {
    pub name: Arc<str>,
    pub pkg: Arc<str>,
    pub underlying: Type,
}

impl Type {
    pub const INT: Type = Type::Basic(Basic::Int);
    pub const BOOL: Type = Type::Basic(Basic::Bool);
    pub const STRING: Type = Type::Basic(Basic::String);
    pub const NIL: Type = Type::Basic(Basic::UntypedNil);
    pub const ANY: Type = Type::Interface(Iface::Any);
    pub const ERROR: Type = Type::Interface(Iface::Error);

    pub fn func(params: Vec<Type>, results: Vec<Type>, variadic: bool) -> Type {
        Type::Func(Arc::new(FuncType{ params, results, variadic }))
    }

    pub fn basic(&self) -> Option<Basic> {
        match self {
            Type::Basic(b) => Some(*b),
            _ => None,
        }
    }

    /// Follows named types down to their underlying type.
    pub fn underlying<'a>(&'a self, named: &'a [NamedType]) -> &'a Type {
        let mut cur = self;
        while let Type::Named(r) = cur {
            match named.get(r.id as usize) {
                Some(n) => cur = &n.underlying,
                None => break,
            }
        }
        cur
    }

    pub fn underlying_basic(&self, named: &[NamedType]) -> Option<Basic> {
        self.underlying(named).basic()
    }

    pub fn is_untyped(&self) -> bool {
        matches!(self, Type::Basic(b) if b.is_untyped())
    }

    pub fn is_interface(&self, named: &[NamedType]) -> bool {
        matches!(self.underlying(named), Type::Interface(_))
    }

    /// Default type for an untyped constant type, identity otherwise.
    pub fn defaulted(&self) -> Type {
        match self {
            Type::Basic(b) if b.is_untyped() && *b != Basic::UntypedNil => Type::Basic(b.default_type()),
            other => other.clone(),
        }
    }

    pub fn is_comparable(&self, named: &[NamedType]) -> bool {
        match self.underlying(named) {
            Type::Slice(_) | Type::Func(_) | Type::Tuple(_) => false,
            Type::Struct(fields) => fields.iter().all(|f| f.typ.is_comparable(named)),
            _ => true,
        }
    }

    pub fn contains_params(&self) -> bool {
        match self {
            Type::Param(_) => true,
            Type::Pointer(t) | Type::Slice(t) | Type::Chan(_, t) => t.contains_params(),
            Type::Func(f) => f.params.iter().chain(f.results.iter()).any(|t| t.contains_params()),
            Type::Struct(fields) => fields.iter().any(|f| f.typ.contains_params()),
            Type::Tuple(ts) => ts.iter().any(|t| t.contains_params()),
            _ => false,
        }
    }

    /// Replaces type parameters by their bound types.
    pub fn subst(&self, bound: &HashMap<Arc<str>, Type>) -> Type {
        match self {
            Type::Param(name) => bound.get(name).cloned().unwrap_or_else(|| self.clone()),
            Type::Pointer(t) => Type::Pointer(Box::new(t.subst(bound))),
            Type::Slice(t) => Type::Slice(Box::new(t.subst(bound))),
            Type::Chan(dir, t) => Type::Chan(*dir, Box::new(t.subst(bound))),
            Type::Func(f) => Type::func(
                f.params.iter().map(|t| t.subst(bound)).collect(),
                f.results.iter().map(|t| t.subst(bound)).collect(),
                f.variadic,
            ),
            Type::Struct(fields) => Type::Struct(Arc::new(fields.iter().map(|f| StructField{
                name: f.name.clone(), typ: f.typ.subst(bound),
            }).collect())),
            Type::Tuple(ts) => Type::Tuple(Arc::new(ts.iter().map(|t| t.subst(bound)).collect())),
            other => other.clone(),
        }
    }

    pub fn elem(&self, named: &[NamedType]) -> Option<Type> {
        match self.underlying(named) {
            Type::Pointer(t) | Type::Slice(t) | Type::Chan(_, t) => Some((**t).clone()),
            Type::Basic(b) if b.is_string() => Some(Type::Basic(Basic::Uint8)),
            _ => None,
        }
    }

    pub fn func_type<'a>(&'a self, named: &'a [NamedType]) -> Option<&'a FuncType> {
        match self.underlying(named) {
            Type::Func(f) => Some(f),
            _ => None,
        }
    }

    /// Field index and type of a struct field, looking through one pointer.
    pub fn field(&self, named: &[NamedType], name: &str) -> Option<(usize, Type)> {
        let base = match self.underlying(named) {
            Type::Pointer(t) => t.underlying(named),
            other => other,
        };
        match base {
            Type::Struct(fields) => fields.iter().enumerate()
                .find(|(_, f)| &*f.name == name)
                .map(|(i, f)| (i, f.typ.clone())),
            _ => None,
        }
    }

    /// Number of values a call of this result type produces.
    pub fn arity(&self) -> usize {
        match self {
            Type::Tuple(ts) => ts.len(),
            _ => 1,
        }
    }

    pub fn from_results(mut results: Vec<Type>) -> Option<Type> {
        match results.len() {
            0 => None,
            1 => results.pop(),
            _ => Some(Type::Tuple(Arc::new(results))),
        }
    }

    pub fn zero(&self, named: &[NamedType]) -> Value {
        match self.underlying(named) {
            Type::Basic(b) => {
                if b.is_bool() {
                    Value::Bool(false)
                } else if b.is_unsigned() {
                    Value::Uint(0)
                } else if b.is_integer() {
                    Value::Int(0)
                } else if b.is_float() {
                    Value::Float(0.0)
                } else if b.is_string() {
                    Value::String(Arc::from(""))
                } else {
                    Value::Nil
                }
            }
            Type::Struct(fields) => Value::Struct(fields.iter().map(|f| f.typ.zero(named)).collect()),
            Type::Tuple(ts) => Value::Tuple(ts.iter().map(|t| t.zero(named)).collect()),
            _ => Value::Nil,
        }
    }

    /// Assignability of a value of type `self` to a slot of type `to`.
    pub fn assignable_to(&self, to: &Type, named: &[NamedType], implements_error: &dyn Fn(&Type) -> bool) -> bool {
        if self == to {
            return true;
        }
        if let Type::Param(_) = to {
            return false;
        }
        match (self, to.underlying(named)) {
            (_, Type::Interface(Iface::Any)) => !matches!(self, Type::Tuple(_)),
            (Type::Basic(Basic::UntypedNil), t) => matches!(
                t, Type::Pointer(_) | Type::Slice(_) | Type::Chan(..) | Type::Func(_) | Type::Interface(_)
            ),
            (_, Type::Interface(Iface::Error)) => {
                matches!(self, Type::Interface(Iface::Error)) || implements_error(self)
            }
            (Type::Basic(from), Type::Basic(into)) if from.is_untyped() => {
                match from {
                    Basic::UntypedBool => into.is_bool(),
                    Basic::UntypedString => into.is_string(),
                    Basic::UntypedInt | Basic::UntypedRune => into.is_numeric(),
                    Basic::UntypedFloat => into.is_numeric(),
                    _ => false,
                }
            }
            (Type::Chan(ChanDir::Both, e1), Type::Chan(_, e2)) => {
                e1 == e2 && !matches!(to, Type::Named(_))
            }
            (from, into) => {
                // Identical underlying types where at least one side is unnamed
                let unnamed = !matches!(self, Type::Named(_)) || !matches!(to, Type::Named(_));
                unnamed && from.underlying(named) == into
            }
        }
    }

    /// Renders the type the way the source language spells it.
    pub fn display<'a>(&'a self, named: &'a [NamedType]) -> TypeDisplay<'a> {
        TypeDisplay{ typ: self, named }
    }
}

pub struct TypeDisplay<'a> {
    typ: &'a Type,
    named: &'a [NamedType],
}

impl<'a> Display for TypeDisplay<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let named = self.named;
        let list = |f: &mut Formatter<'_>, ts: &[Type], variadic: bool| -> fmt::Result {
            for (i, t) in ts.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                if variadic && i == ts.len() - 1 {
                    f.write_str("...")?;
                    if let Some(elem) = t.elem(named) {
                        write!(f, "{}", elem.display(named))?;
                        continue;
                    }
                }
                write!(f, "{}", t.display(named))?;
            }
            Ok(())
        };
        match self.typ {
            Type::Basic(b) => f.write_str(b.name()),
            Type::Named(r) => f.write_str(&r.name),
            Type::Pointer(t) => write!(f, "*{}", t.display(named)),
            Type::Slice(t) => write!(f, "[]{}", t.display(named)),
            Type::Chan(ChanDir::Both, t) => write!(f, "chan {}", t.display(named)),
            Type::Chan(ChanDir::Send, t) => write!(f, "chan<- {}", t.display(named)),
            Type::Chan(ChanDir::Recv, t) => write!(f, "<-chan {}", t.display(named)),
            Type::Func(ft) => {
                f.write_str("func(")?;
                list(f, &ft.params, ft.variadic)?;
                f.write_str(")")?;
                match ft.results.len() {
                    0 => Ok(()),
                    1 => write!(f, " {}", ft.results[0].display(named)),
                    _ => {
                        f.write_str(" (")?;
                        list(f, &ft.results, false)?;
                        f.write_str(")")
                    }
                }
            }
            Type::Struct(fields) => {
                f.write_str("struct {")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(";")?;
                    }
                    write!(f, " {} {}", field.name, field.typ.display(named))?;
                }
                if !fields.is_empty() {
                    f.write_str(" ")?;
                }
                f.write_str("}")
            }
            Type::Interface(Iface::Any) => f.write_str("interface {}"),
            Type::Interface(Iface::Error) => f.write_str("error"),
            Type::Interface(Iface::Comparable) => f.write_str("comparable"),
            Type::Param(name) => f.write_str(name),
            Type::Tuple(ts) => {
                f.write_str("(")?;
                list(f, ts, false)?;
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_like_source() {
        let named = vec![NamedType{ name: Arc::from("Point"), pkg: Arc::from("main"), underlying: Type::INT }];
        let point = Type::Named(NamedRef{ id: 0, name: Arc::from("Point") });
        let t = Type::func(
            vec![Type::Pointer(Box::new(point.clone())), Type::Slice(Box::new(Type::STRING))],
            vec![Type::INT, Type::ERROR],
            true,
        );
        assert_eq!(t.display(&named).to_string(), "func(*Point, ...string) (int, error)");
        assert_eq!(Type::Chan(ChanDir::Recv, Box::new(Type::BOOL)).display(&named).to_string(), "<-chan bool");
        assert_eq!(point.underlying(&named), &Type::INT);
    }

    #[test]
    fn substitution_reaches_callback_signatures() {
        let t = Type::Param(Arc::from("T"));
        let callback = Type::func(vec![Type::Pointer(Box::new(t.clone()))], vec![], false);
        assert!(callback.contains_params());
        let bound = hashmap!{ Arc::from("T") => Type::INT };
        let concrete = callback.subst(&bound);
        assert_eq!(concrete, Type::func(vec![Type::Pointer(Box::new(Type::INT))], vec![], false));
        assert!(!concrete.contains_params());
    }

    #[test]
    fn untyped_constants_are_assignable() {
        let named = Vec::new();
        let never = |_: &Type| false;
        assert!(Type::Basic(Basic::UntypedInt).assignable_to(&Type::Basic(Basic::Float64), &named, &never));
        assert!(!Type::Basic(Basic::UntypedString).assignable_to(&Type::INT, &named, &never));
        assert!(Type::NIL.assignable_to(&Type::Pointer(Box::new(Type::INT)), &named, &never));
        assert!(!Type::NIL.assignable_to(&Type::INT, &named, &never));
        assert!(Type::INT.assignable_to(&Type::ANY, &named, &never));
    }
}
