/// exports.rs
///
/// Native bindings handed to the interpreter by the host: functions written
/// in Rust, plain values, and generic functions supplied as source text.

use crate::common::*;
use super::eval::executor::{Executor, Unwind};
use super::eval::value::Value;
use super::stack::{render_stack, skip_frames};
use super::types::Type;

/// Rust implementation of a native function. Returning `Err(v)` panics in
/// the interpreted caller with the value `v`.
pub type NativeFn = dyn Fn(&mut NativeCall<'_>, Vec<Value>) -> Result<Vec<Value>, Value> + Send + Sync;

struct NativeInner {
    signature: Arc<str>,
    f: Box<NativeFn>,
}

/// Native function: a textual signature in the source language's type
/// syntax, for example `func(int, string) error`, and its implementation.
#[derive(Clone)]
pub struct NativeFunc {
    inner: Arc<NativeInner>,
}

impl NativeFunc {
    pub fn new<F>(signature: &str, f: F) -> Self
        where F: Fn(&mut NativeCall<'_>, Vec<Value>) -> Result<Vec<Value>, Value> + Send + Sync + 'static
    {
        NativeFunc{ inner: Arc::new(NativeInner{ signature: Arc::from(signature), f: Box::new(f) }) }
    }

    pub fn signature(&self) -> &str {
        &self.inner.signature
    }

    pub(crate) fn same(&self, other: &NativeFunc) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const u8 as usize
    }

    pub(crate) fn invoke(&self, call: &mut NativeCall<'_>, args: Vec<Value>) -> Result<Vec<Value>, Value> {
        (self.inner.f)(call, args)
    }
}

/// Source text of a generic function declaration, instantiated on demand
/// when interpreted code calls it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericFunc(pub String);

#[derive(Clone)]
pub enum Native {
    Func(NativeFunc),
    /// A value with the type it has for interpreted code, e.g. `int`
    Value{ value: Value, typ: String },
    Generic(GenericFunc),
}

impl Native {
    pub fn func<F>(signature: &str, f: F) -> Self
        where F: Fn(&mut NativeCall<'_>, Vec<Value>) -> Result<Vec<Value>, Value> + Send + Sync + 'static
    {
        Native::Func(NativeFunc::new(signature, f))
    }

    pub fn value(value: impl Into<Value>, typ: &str) -> Self {
        Native::Value{ value: value.into(), typ: typ.to_string() }
    }

    pub fn generic(source: &str) -> Self {
        Native::Generic(GenericFunc(source.to_string()))
    }
}

/// Native symbols by package key (`<import path>/<package name>`) and name.
#[derive(Clone, Default)]
pub struct Exports {
    pub(crate) packages: HashMap<String, HashMap<String, Native>>,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, name: &str, native: Native) -> Self {
        self.insert(key, name, native);
        self
    }

    pub fn insert(&mut self, key: &str, name: &str, native: Native) {
        self.packages.entry(key.to_string()).or_default().insert(name.to_string(), native);
    }
}

impl From<HashMap<String, HashMap<String, Native>>> for Exports {
    fn from(packages: HashMap<String, HashMap<String, Native>>) -> Self {
        Exports{ packages }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ExportsError {
    #[display(fmt = "invalid package key {:?}: expected \"<import path>/<package name>\"", _0)]
    MalformedKey(String),
    #[display(fmt = "{}.{}: {}", package, name, message)]
    BadSymbol{ package: String, name: String, message: String },
}

impl std::error::Error for ExportsError {}

/// Splits a package key into import path and package name.
pub(crate) fn split_key(key: &str) -> Result<(&str, &str), ExportsError> {
    match key.rfind('/') {
        Some(idx) if idx > 0 && idx + 1 < key.len() => Ok((&key[..idx], &key[idx + 1..])),
        _ => Err(ExportsError::MalformedKey(key.to_string())),
    }
}

/// Import path with its last `/` replaced by `_`, the name given to a package
/// whose default name collides with another one.
pub(crate) fn fix_key(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => format!("{}_{}", &path[..idx], &path[idx + 1..]),
        None => path.to_string(),
    }
}

/// A checked native symbol: the native and its type for interpreted code.
#[derive(Clone)]
pub(crate) struct NativeSymbol {
    pub native: Native,
    pub typ: Option<Type>,
}

#[derive(Clone)]
pub(crate) struct NativePackage {
    pub key: String,
    pub path: String,
    pub name: String,
    pub members: HashMap<String, NativeSymbol>,
}

/// All packages registered with `use_exports`.
#[derive(Clone, Default)]
pub(crate) struct Registry {
    pub packages: HashMap<String, NativePackage>,
}

impl Registry {
    pub fn by_path(&self, path: &str) -> Option<&NativePackage> {
        self.packages.values().find(|p| p.path == path || p.key == path)
    }

    /// The only registered package with the given name.
    pub fn by_name(&self, name: &str) -> Option<&NativePackage> {
        let mut found = self.packages.values().filter(|p| p.name == name);
        match (found.next(), found.next()) {
            (Some(p), None) => Some(p),
            _ => None,
        }
    }
}

/// Handle passed to native functions, through which they may call back into
/// interpreted code.
pub struct NativeCall<'a> {
    pub(crate) exec: &'a mut Executor,
    pub(crate) name: Arc<str>,
}

impl<'a> NativeCall<'a> {
    /// Calls an interpreted (or native) function value. A panic in the
    /// callee is recorded in the panic backlog and returned as `Err` with
    /// the panic value.
    pub fn call(&mut self, f: &Value, args: Vec<Value>) -> Result<Vec<Value>, Value> {
        match self.exec.call_from_native(f.clone(), args) {
            Ok(results) => Ok(results),
            Err(Unwind::Panic(state)) => {
                let value = state.value.clone();
                self.exec.record_panic(&state);
                Err(value)
            }
            Err(Unwind::Cancelled) => {
                self.exec.cancelled = true;
                Err(Value::error("context canceled"))
            }
        }
    }

    /// Name of the native function being executed.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writes to the interpreter's standard output.
    pub fn write_stdout(&self, text: &str) {
        use std::io::Write;
        let mut out = self.exec.shared.options.stdout.lock();
        let _ = out.write_all(text.as_bytes());
    }

    /// Call stack of the calling task, rendered like a panic stack trace.
    /// The first frame is this native function; `skip` leading frames are
    /// left out.
    pub fn filtered_stack(&self, skip: usize) -> String {
        let frames = self.exec.current_frames();
        let host = self.exec.host_callers();
        render_stack(&self.exec.prog, self.exec.task, &frames, &host, skip)
    }

    /// Handles of the interpreted frames of the calling task, top first,
    /// followed by the host program counters below the interpreter. `skip`
    /// counts frames as `filtered_stack` does, native frames included.
    pub fn filtered_callers(&self, skip: usize) -> Vec<usize> {
        let frames = self.exec.current_frames();
        let host = self.exec.host_callers();
        let (frames, host) = skip_frames(&frames, &host, skip);
        let mut callers = self.exec.shared.register_handles(frames);
        callers.extend_from_slice(host);
        callers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_split_at_last_slash() {
        assert_eq!(split_key("guthib.com/generic/generic").unwrap(), ("guthib.com/generic", "generic"));
        assert!(split_key("generic").is_err());
        assert!(split_key("generic/").is_err());
        assert_eq!(fix_key("crypto/rand"), "crypto_rand");
        assert_eq!(fix_key("rand"), "rand");
    }

    #[test]
    fn registry_resolves_unique_names_only() {
        let mut registry = Registry::default();
        for key in ["crypto/rand/rand", "math/rand/rand", "strings/strings"].iter() {
            let (path, name) = split_key(key).unwrap();
            registry.packages.insert(key.to_string(), NativePackage{
                key: key.to_string(),
                path: path.to_string(),
                name: name.to_string(),
                members: HashMap::new(),
            });
        }
        assert!(registry.by_name("rand").is_none());
        assert_eq!(registry.by_name("strings").map(|p| p.path.as_str()), Some("strings"));
        assert_eq!(registry.by_path("math/rand").map(|p| p.key.as_str()), Some("math/rand/rand"));
    }
}
