use crate::common::*;
use crate::interp::ast::NodeId;
use crate::interp::exports::NativeFunc;
use super::channel::Channel;
use super::frame::Frame;

/// Dynamically typed runtime value. The static type of a value is only known
/// to the compiler; at runtime every value carries just enough to operate on
/// it. `Nil` is the nil value of every nillable type.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    /// Always valid UTF-8. Slicing inside a multi-byte character replaces
    /// the cut bytes with U+FFFD instead of keeping them.
    String(Arc<str>),
    Pointer(Pointer),
    Slice(Slice),
    Struct(Vec<Value>),
    Func(FuncValue),
    Native(NativeFunc),
    Chan(Channel),
    Error(ErrorValue),
    Tuple(Vec<Value>),
}

/// Interpreted function value: the function or function literal node and,
/// for closures, the frame it was created in.
#[derive(Clone)]
pub struct FuncValue {
    pub(crate) node: NodeId,
    pub(crate) env: Option<Arc<Frame>>,
}

/// Error value created by the runtime or by native code. Two error values
/// are equal only if they are the same error.
#[derive(Clone)]
pub struct ErrorValue(pub(crate) Arc<str>);

impl ErrorValue {
    pub fn message(&self) -> &str {
        &self.0
    }
}

#[derive(Clone)]
pub(crate) enum PtrRoot {
    /// Heap cell created by `new`, `&T{...}` or escaping temporaries
    Cell(Arc<Mutex<Value>>),
    /// Variable slot of a frame
    Slot(Arc<Frame>, usize),
    /// Element of a slice backing array
    Elem(Arc<Mutex<Vec<Value>>>, usize),
}

/// Address of a value: a root plus a path of struct field indices.
#[derive(Clone)]
pub struct Pointer {
    pub(crate) root: PtrRoot,
    pub(crate) path: Vec<usize>,
}

fn at_path<'a>(mut v: &'a mut Value, path: &[usize]) -> Option<&'a mut Value> {
    for idx in path {
        match v {
            Value::Struct(fields) => v = fields.get_mut(*idx)?,
            _ => return None,
        }
    }
    Some(v)
}

impl Pointer {
    pub(crate) fn new_cell(v: Value) -> Self {
        Pointer{ root: PtrRoot::Cell(Arc::new(Mutex::new(v))), path: Vec::new() }
    }

    pub(crate) fn field(&self, idx: usize) -> Self {
        let mut path = self.path.clone();
        path.push(idx);
        Pointer{ root: self.root.clone(), path }
    }

    /// Runs `f` on the pointed-to value while holding its lock.
    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut Value) -> R) -> Option<R> {
        match &self.root {
            PtrRoot::Cell(cell) => {
                let mut guard = cell.lock();
                at_path(&mut guard, &self.path).map(f)
            }
            PtrRoot::Slot(frame, idx) => {
                let mut data = frame.data.write();
                data.get_mut(*idx).and_then(|v| at_path(v, &self.path)).map(f)
            }
            PtrRoot::Elem(backing, idx) => {
                let mut data = backing.lock();
                data.get_mut(*idx).and_then(|v| at_path(v, &self.path)).map(f)
            }
        }
    }

    pub fn load(&self) -> Value {
        self.with_mut(|v| v.clone()).unwrap_or(Value::Nil)
    }

    pub fn store(&self, value: Value) {
        self.with_mut(|v| *v = value);
    }

    fn same(&self, other: &Pointer) -> bool {
        let root = match (&self.root, &other.root) {
            (PtrRoot::Cell(a), PtrRoot::Cell(b)) => Arc::ptr_eq(a, b),
            (PtrRoot::Slot(a, i), PtrRoot::Slot(b, j)) => Arc::ptr_eq(a, b) && i == j,
            (PtrRoot::Elem(a, i), PtrRoot::Elem(b, j)) => Arc::ptr_eq(a, b) && i == j,
            _ => false,
        };
        root && self.path == other.path
    }

    fn addr(&self) -> usize {
        let base = match &self.root {
            PtrRoot::Cell(c) => Arc::as_ptr(c) as usize,
            PtrRoot::Slot(f, i) => Arc::as_ptr(f) as usize + i * 8,
            PtrRoot::Elem(b, i) => Arc::as_ptr(b) as usize + i * 8,
        };
        base + self.path.iter().sum::<usize>() * 8
    }
}

/// Window onto a shared backing array. The backing vector always holds at
/// least `offset + cap` elements.
#[derive(Clone)]
pub struct Slice {
    pub(crate) data: Arc<Mutex<Vec<Value>>>,
    pub(crate) offset: usize,
    pub(crate) len: usize,
    pub(crate) cap: usize,
}

impl Slice {
    pub fn from_vec(values: Vec<Value>) -> Self {
        let len = values.len();
        Slice{ data: Arc::new(Mutex::new(values)), offset: 0, len, cap: len }
    }

    pub fn with_len(len: usize, cap: usize, zero: &Value) -> Self {
        let cap = cap.max(len);
        Slice{ data: Arc::new(Mutex::new(vec![zero.clone(); cap])), offset: 0, len, cap }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn get(&self, idx: usize) -> Option<Value> {
        if idx >= self.len {
            return None;
        }
        self.data.lock().get(self.offset + idx).cloned()
    }

    pub fn set(&self, idx: usize, value: Value) -> bool {
        if idx >= self.len {
            return false;
        }
        match self.data.lock().get_mut(self.offset + idx) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub(crate) fn elem_ptr(&self, idx: usize) -> Option<Pointer> {
        if idx >= self.len {
            return None;
        }
        Some(Pointer{ root: PtrRoot::Elem(self.data.clone(), self.offset + idx), path: Vec::new() })
    }

    pub fn to_vec(&self) -> Vec<Value> {
        let data = self.data.lock();
        data[self.offset..self.offset + self.len].to_vec()
    }

    pub(crate) fn reslice(&self, low: usize, high: usize) -> Option<Slice> {
        if low > high || high > self.cap {
            return None;
        }
        Some(Slice{ data: self.data.clone(), offset: self.offset + low, len: high - low, cap: self.cap - low })
    }

    /// Appends in place when capacity allows, otherwise copies into a new
    /// backing array of at least twice the capacity.
    pub(crate) fn append(&self, values: Vec<Value>) -> Slice {
        let needed = self.len + values.len();
        if needed <= self.cap {
            let mut data = self.data.lock();
            for (i, v) in values.into_iter().enumerate() {
                data[self.offset + self.len + i] = v;
            }
            return Slice{ data: self.data.clone(), offset: self.offset, len: needed, cap: self.cap };
        }
        let cap = needed.max(self.cap * 2).max(4);
        let mut fresh = self.to_vec();
        fresh.extend(values);
        let fill = fresh.last().cloned().unwrap_or(Value::Nil);
        fresh.resize(cap, fill);
        Slice{ data: Arc::new(Mutex::new(fresh)), offset: 0, len: needed, cap }
    }
}

impl Value {
    pub fn error(msg: impl Into<String>) -> Value {
        Value::Error(ErrorValue(Arc::from(msg.into())))
    }

    pub fn string(s: &str) -> Value {
        Value::String(Arc::from(s))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Uint(u) => Some(*u as i64),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::Int(i) => Some(*i as u64),
            Value::Uint(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Uint(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Error(e) => Some(e.message()),
            _ => None,
        }
    }

    pub(crate) fn truthy(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    /// The pointed-to value of a pointer.
    pub fn deref(&self) -> Option<Value> {
        match self {
            Value::Pointer(p) => Some(p.load()),
            _ => None,
        }
    }

    /// Elements of a slice value.
    pub fn elements(&self) -> Option<Vec<Value>> {
        match self {
            Value::Slice(s) => Some(s.to_vec()),
            Value::Nil => Some(Vec::new()),
            _ => None,
        }
    }

    pub fn tuple(mut values: Vec<Value>) -> Value {
        match values.len() {
            0 => Value::Nil,
            1 => values.pop().unwrap_or(Value::Nil),
            _ => Value::Tuple(values),
        }
    }

    /// Equality as defined by the `==` operator of the language.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Uint(a), Value::Uint(b)) => a == b,
            (Value::Int(a), Value::Uint(b)) | (Value::Uint(b), Value::Int(a)) => *a >= 0 && *a as u64 == *b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a.same(b),
            (Value::Struct(a), Value::Struct(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Chan(a), Value::Chan(b)) => a.same(b),
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            _ => false,
        }
    }

    /// Identity used to match panic values: reference identity for errors,
    /// pointers and channels, equality for everything else.
    pub fn same_identity(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Func(a), Value::Func(b)) => a.node == b.node && match (&a.env, &b.env) {
                (Some(x), Some(y)) => Arc::ptr_eq(x, y),
                (None, None) => true,
                _ => false,
            },
            (Value::Native(a), Value::Native(b)) => a.same(b),
            (Value::Slice(a), Value::Slice(b)) => Arc::ptr_eq(&a.data, &b.data) && a.offset == b.offset && a.len == b.len,
            _ => self.equals(other),
        }
    }

    fn addr(&self) -> usize {
        match self {
            Value::Pointer(p) => p.addr(),
            Value::Slice(s) => Arc::as_ptr(&s.data) as usize + s.offset * 8,
            Value::Func(f) => match &f.env {
                Some(env) => Arc::as_ptr(env) as usize + f.node.index(),
                None => 0x1000 + f.node.index() * 16,
            },
            Value::Native(n) => n.addr(),
            Value::Chan(c) => c.addr(),
            _ => 0,
        }
    }

    /// Formatting used by the `print` and `println` builtins.
    pub(crate) fn print_repr(&self) -> String {
        match self {
            Value::Nil => String::from("nil"),
            Value::Float(f) => format_print_float(*f),
            Value::Struct(_) | Value::Tuple(_) => self.to_string(),
            Value::Error(e) => format!("(error) {:#x}", Arc::as_ptr(&e.0) as *const u8 as usize),
            Value::Slice(s) => format!("[{}/{}]{:#x}", s.len, s.cap, self.addr()),
            Value::Pointer(_) | Value::Func(_) | Value::Native(_) | Value::Chan(_) => format!("{:#x}", self.addr()),
            _ => self.to_string(),
        }
    }
}

/// `%e` formatting of floats as done by the `println` builtin, for example
/// `+3.000000e+000`.
fn format_print_float(f: f64) -> String {
    if f.is_nan() {
        return String::from("NaN");
    }
    if f.is_infinite() {
        return String::from(if f > 0.0 { "+Inf" } else { "-Inf" });
    }
    let formatted = format!("{:+.6e}", f);
    match formatted.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:03}", mantissa, sign, exp.abs())
        }
        None => formatted,
    }
}

/// Shortest representation, switching to exponent notation for very large
/// and very small magnitudes like `%v` does.
pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        return String::from("NaN");
    }
    if f.is_infinite() {
        return String::from(if f > 0.0 { "+Inf" } else { "-Inf" });
    }
    let abs = f.abs();
    if abs == 0.0 || (1e-4..1e21).contains(&abs) {
        return format!("{}", f);
    }
    let formatted = format!("{:e}", f);
    match formatted.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => formatted,
    }
}

fn write_list(f: &mut Formatter<'_>, values: &[Value]) -> fmt::Result {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{}", v)?;
    }
    Ok(())
}

/// Renders values like the `%v` verb.
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("<nil>"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Uint(u) => write!(f, "{}", u),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::String(s) => f.write_str(s),
            Value::Pointer(p) => match p.load() {
                Value::Struct(fields) => {
                    f.write_str("&{")?;
                    write_list(f, &fields)?;
                    f.write_str("}")
                }
                _ => write!(f, "{:#x}", p.addr()),
            },
            Value::Slice(s) => {
                f.write_str("[")?;
                write_list(f, &s.to_vec())?;
                f.write_str("]")
            }
            Value::Struct(fields) => {
                f.write_str("{")?;
                write_list(f, fields)?;
                f.write_str("}")
            }
            Value::Error(e) => f.write_str(e.message()),
            Value::Tuple(values) => write_list(f, values),
            Value::Func(_) | Value::Native(_) | Value::Chan(_) => write!(f, "{:#x}", self.addr()),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Error(e) => write!(f, "error({:?})", e.message()),
            Value::Func(func) => write!(f, "func{:?}", func.node),
            Value::Native(n) => write!(f, "native({})", n.signature()),
            Value::Pointer(p) => write!(f, "&{:?}", p.load()),
            Value::Tuple(values) => f.debug_tuple("").field(values).finish(),
            other => Display::fmt(other, f),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Slice(Slice::from_vec(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_like_the_builtins() {
        assert_eq!(format_print_float(3.0), "+3.000000e+000");
        assert_eq!(format_print_float(-0.25), "-2.500000e-001");
        assert_eq!(format_float(3.5), "3.5");
        assert_eq!(format_float(1e21), "1e+21");
        assert_eq!(format_float(1e-5), "1e-05");
        let v = Value::Struct(vec![Value::Int(1), Value::from("a"), Value::Nil]);
        assert_eq!(v.to_string(), "{1 a <nil>}");
        assert_eq!(Value::from(vec![Value::Int(1), Value::Int(2)]).to_string(), "[1 2]");
    }

    #[test]
    fn errors_compare_by_identity() {
        let a = Value::error("boom");
        let b = Value::error("boom");
        assert!(a.equals(&a.clone()));
        assert!(!a.equals(&b));
        assert!(a.same_identity(&a.clone()));
        assert!(Value::Int(3).same_identity(&Value::Int(3)));
    }

    #[test]
    fn pointers_alias_their_target() {
        let p = Pointer::new_cell(Value::Struct(vec![Value::Int(1), Value::Int(2)]));
        let field = p.field(1);
        field.store(Value::Int(5));
        assert_eq!(p.load().to_string(), "{1 5}");
        assert!(Value::Pointer(field.clone()).equals(&Value::Pointer(p.field(1))));
        assert!(!Value::Pointer(field).equals(&Value::Pointer(p.field(0))));
    }

    #[test]
    fn append_shares_backing_until_full() {
        let s = Slice::with_len(1, 2, &Value::Int(0));
        let grown = s.append(vec![Value::Int(7)]);
        assert!(Arc::ptr_eq(&s.data, &grown.data));
        let moved = grown.append(vec![Value::Int(8)]);
        assert!(!Arc::ptr_eq(&grown.data, &moved.data));
        assert_eq!(moved.to_vec().len(), 3);
        assert_eq!(s.len(), 1);
    }
}
