use std::io::Write;
use std::sync::atomic::AtomicBool;

use crossbeam::channel::{self, Receiver, Sender};

use crate::common::*;
use super::ast::NodeId;
use super::compile::{load_native_package, resolve_type_text, CompiledUnit, Compiler};
use super::context::Context;
use super::error::EvalError;
use super::eval::executor::{Executor, Unwind};
use super::eval::frame::Frame;
use super::eval::value::Value;
use super::exports::{fix_key, split_key, Exports, ExportsError, Native, NativePackage, NativeSymbol, Registry};
use super::input_source::InputSource;
use super::panic::{Backlog, Panic};
use super::parser::parse_unit;
use super::program::Program;
use super::scope::{SymKind, Symbol};
use super::stack::{func_for_host, func_for_node, handle_of, Func, StackFrame};
use super::types::Type;

pub type Stdout = Arc<Mutex<Box<dyn Write + Send>>>;

/// Interpreter configuration.
#[derive(Clone)]
pub struct Options {
    /// Destination of `print` and `println`
    pub stdout: Stdout,
    /// Calls deeper than this panic with `stack overflow`
    pub max_call_depth: usize,
    /// Executed nodes between two checks for cancellation
    pub cancel_check_interval: usize,
    /// Compile evaluated source without running it
    pub no_run: bool,
    /// Channel operations do not wait for cancellation
    pub fast_chan: bool,
    /// File name of evaluated source in positions and stack traces
    pub source_name: String,
}

lazy_static::lazy_static! {
    static ref ENV_NO_RUN: bool = env_flag("GOINTERP_NO_RUN");
    static ref ENV_FAST_CHAN: bool = env_flag("GOINTERP_FAST_CHAN");
}

/// Boolean spelled like `1`, `t`, `TRUE`, `False`, ... Anything else is unset.
fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).ok().and_then(|v| parse_bool(&v)).unwrap_or(false)
}

impl Default for Options {
    fn default() -> Self {
        Self{
            stdout: Arc::new(Mutex::new(Box::new(std::io::stdout()))),
            max_call_depth: 10_000,
            cancel_check_interval: 1024,
            no_run: false,
            fast_chan: false,
            source_name: String::from("_.go"),
        }
    }
}

impl Options {
    /// Defaults, with `no_run` and `fast_chan` taken from `GOINTERP_NO_RUN`
    /// and `GOINTERP_FAST_CHAN`.
    pub fn from_env() -> Self {
        Self{ no_run: *ENV_NO_RUN, fast_chan: *ENV_FAST_CHAN, ..Self::default() }
    }

    pub fn with_stdout(mut self, out: impl Write + Send + 'static) -> Self {
        self.stdout = Arc::new(Mutex::new(Box::new(out)));
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_cancel_check_interval(mut self, steps: usize) -> Self {
        self.cancel_check_interval = steps.max(1);
        self
    }

    pub fn with_no_run(mut self, no_run: bool) -> Self {
        self.no_run = no_run;
        self
    }

    pub fn with_fast_chan(mut self, fast_chan: bool) -> Self {
        self.fast_chan = fast_chan;
        self
    }

    pub fn with_source_name(mut self, name: &str) -> Self {
        self.source_name = name.to_string();
        self
    }
}

impl Debug for Options {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("max_call_depth", &self.max_call_depth)
            .field("cancel_check_interval", &self.cancel_check_interval)
            .field("no_run", &self.no_run)
            .field("fast_chan", &self.fast_chan)
            .field("source_name", &self.source_name)
            .finish()
    }
}

/// State shared by the interpreter and all of its running tasks.
pub(crate) struct Shared {
    pub options: Options,
    pub backlog: Backlog,
    /// Interpreted call sites by handle
    handles: RwLock<HashMap<usize, NodeId>>,
    /// Current run id. Frames of a cancelled run carry an older one.
    pub run_id: AtomicU64,
    next_task: AtomicU64,
}

impl Shared {
    fn new(options: Options) -> Self {
        Self{
            options,
            backlog: Backlog::default(),
            handles: RwLock::new(HashMap::new()),
            run_id: AtomicU64::new(1),
            next_task: AtomicU64::new(1),
        }
    }

    /// Handles of the interpreted frames, registering those seen for the
    /// first time.
    pub fn register_handles(&self, frames: &[StackFrame]) -> Vec<usize> {
        let mut handles = self.handles.write();
        frames.iter()
            .filter_map(|frame| match frame {
                StackFrame::Interpreted(node) => {
                    let handle = handle_of(*node);
                    handles.entry(handle).or_insert(*node);
                    Some(handle)
                }
                StackFrame::Native(_) => None,
            })
            .collect()
    }

    pub fn node_for_handle(&self, handle: usize) -> Option<NodeId> {
        self.handles.read().get(&handle).copied()
    }

    pub fn next_task(&self) -> TaskId {
        self.next_task.fetch_add(1, Ordering::Relaxed)
    }
}

/// Cancellation signal of the running evaluations. Closed by dropping its
/// sender; a closed signal is replaced when the next evaluation begins.
struct DoneSignal {
    tx: Option<Sender<()>>,
    rx: Receiver<()>,
}

impl DoneSignal {
    fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self{ tx: Some(tx), rx }
    }
}

/// Interpreter for a Go-like language. Evaluated source accumulates: later
/// evaluations see the declarations of earlier ones.
pub struct Interpreter {
    shared: Arc<Shared>,
    /// Latest compiled program. Running code holds on to the snapshot it
    /// started with.
    prog: RwLock<Arc<Program>>,
    /// Serializes compilation
    compiling: Mutex<()>,
    registry: RwLock<Registry>,
    /// Package level variables
    root: Arc<Frame>,
    done: Mutex<DoneSignal>,
    evaluated: AtomicBool,
    imported: AtomicBool,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

impl Interpreter {
    pub fn new(options: Options) -> Self {
        let shared = Arc::new(Shared::new(options));
        let done = DoneSignal::new();
        let root = Arc::new(Frame::new_root(shared.run_id.load(Ordering::SeqCst), done.rx.clone()));
        tracing::debug!(options = ?shared.options, "interpreter created");
        Self{
            shared,
            prog: RwLock::new(Arc::new(Program::new())),
            compiling: Mutex::new(()),
            registry: RwLock::new(Registry::default()),
            root,
            done: Mutex::new(done),
            evaluated: AtomicBool::new(false),
            imported: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    #[cfg(test)]
    pub(crate) fn program(&self) -> Arc<Program> {
        self.prog.read().clone()
    }

    /// Compiles and runs source text. Returns the value of the last package
    /// level expression statement, or `Value::Nil`.
    pub fn eval(&self, src: &str) -> Result<Value, EvalError> {
        self.eval_with_context(&Context::background(), src)
    }

    /// Like `eval`, but returns as soon as the context is done. The
    /// evaluation is then cancelled: its tasks unwind in the background.
    pub fn eval_with_context(&self, ctx: &Context, src: &str) -> Result<Value, EvalError> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let (prog, unit) = self.compile(src)?;
        self.evaluated.store(true, Ordering::SeqCst);
        if self.shared.options.no_run {
            tracing::debug!("compiled without running");
            return Ok(Value::Nil);
        }

        let (run_id, done) = self.begin();
        let task = self.shared.next_task();
        let mut exec = Executor::new(self.shared.clone(), prog, self.root.clone(), run_id, done, task);
        tracing::debug!(task, run_id, "evaluation started");

        if ctx.is_background() {
            exec.capture_entry();
            let result = finish(&mut exec, unit);
            tracing::debug!(task, ok = result.is_ok(), "evaluation finished");
            return result;
        }

        let (tx, rx) = channel::bounded(1);
        std::thread::Builder::new()
            .name(format!("gointerp-task-{}", task))
            .spawn(move || {
                exec.capture_entry();
                let _ = tx.send(finish(&mut exec, unit));
            })
            .map_err(|e| EvalError::Thread(e.to_string()))?;

        match ctx.wait(&rx) {
            Ok(Some(result)) => {
                tracing::debug!(task, ok = result.is_ok(), "evaluation finished");
                result
            }
            Ok(None) => Err(EvalError::Thread(String::from("evaluation task stopped unexpectedly"))),
            Err(err) => {
                tracing::debug!(task, error = %err, "evaluation cancelled");
                self.stop();
                Err(err)
            }
        }
    }

    /// Parses and compiles source text on a copy of the program, which
    /// replaces the current snapshot once compilation succeeded.
    fn compile(&self, src: &str) -> Result<(Arc<Program>, CompiledUnit), EvalError> {
        let _guard = self.compiling.lock();
        let mut prog = Program::clone(&self.prog.read());
        let registry = self.registry.read();

        let name = self.shared.options.source_name.clone();
        let mut source = InputSource::new(name.clone(), src.as_bytes().to_vec());
        let unit = prog.units.len() as u32;
        let file = parse_unit(&mut prog.nodes, unit, &mut source)?;
        prog.add_unit(name, source);
        let compiled = Compiler::new(&mut prog, &registry, unit).compile_file(file)?;

        let prog = Arc::new(prog);
        self.root.ensure_len(&prog.global_init);
        *self.prog.write() = prog.clone();
        Ok((prog, compiled))
    }

    /// Run id and cancellation signal for a new evaluation.
    fn begin(&self) -> (u64, Receiver<()>) {
        let mut done = self.done.lock();
        if done.tx.is_none() {
            *done = DoneSignal::new();
        }
        (self.shared.run_id.load(Ordering::SeqCst), done.rx.clone())
    }

    /// Cancels every running evaluation.
    fn stop(&self) {
        let mut done = self.done.lock();
        self.shared.run_id.fetch_add(1, Ordering::SeqCst);
        done.tx.take();
    }

    /// Registers native packages. Members of an already registered package
    /// are added to it, replacing those with the same name.
    pub fn use_exports(&self, exports: Exports) -> Result<(), ExportsError> {
        let mut checked = Vec::new();
        for (key, members) in exports.packages {
            let (path, name) = split_key(&key)?;
            let (path, name) = (path.to_string(), name.to_string());
            let mut symbols = HashMap::new();
            for (member, native) in members {
                let typ = member_type(&native).map_err(|message| ExportsError::BadSymbol{
                    package: key.clone(),
                    name: member.clone(),
                    message,
                })?;
                symbols.insert(member, NativeSymbol{ native, typ });
            }
            checked.push(NativePackage{ key, path, name, members: symbols });
        }

        let mut registry = self.registry.write();
        for pkg in checked {
            tracing::debug!(package = %pkg.key, members = pkg.members.len(), "exports registered");
            match registry.packages.get_mut(&pkg.key) {
                Some(existing) => existing.members.extend(pkg.members),
                None => {
                    registry.packages.insert(pkg.key.clone(), pkg);
                }
            }
        }
        Ok(())
    }

    /// Makes every registered package usable without an import, under its
    /// package name. Packages sharing a name are all bound under their
    /// import path instead, with its last `/` replaced by `_`.
    pub fn import_used(&self) -> Result<(), EvalError> {
        if self.evaluated.load(Ordering::SeqCst) || self.imported.swap(true, Ordering::SeqCst) {
            return Err(EvalError::ImportUsed);
        }
        let _guard = self.compiling.lock();
        let mut prog = Program::clone(&self.prog.read());
        let registry = self.registry.read();

        let mut keys: Vec<&String> = registry.packages.keys().collect();
        keys.sort();
        // Bound name to the package currently holding it
        let mut bound: HashMap<String, &NativePackage> = HashMap::new();
        let mut collided: HashSet<String> = HashSet::new();
        for key in keys {
            let pkg = &registry.packages[key];
            let scope = match prog.packages.get(key) {
                Some(scope) => *scope,
                None => load_native_package(&mut prog, pkg)?,
            };
            let universe = prog.universe;

            let name = if collided.contains(&pkg.name) {
                fix_key(&pkg.path)
            } else if let Some(prev) = bound.remove(&pkg.name) {
                // Rebind the earlier package under its path
                prog.scopes.unbind(universe, &pkg.name);
                let prev_name = fix_key(&prev.path);
                let prev_scope = prog.packages[&prev.key];
                prog.scopes.bind(universe, &prev_name, package_symbol(prev_scope));
                tracing::debug!(package = %prev.key, name = %prev_name, "package renamed");
                bound.insert(prev_name, prev);
                collided.insert(pkg.name.clone());
                fix_key(&pkg.path)
            } else {
                pkg.name.clone()
            };
            if name != pkg.name {
                tracing::debug!(package = %pkg.key, name = %name, "package renamed");
            }
            prog.scopes.bind(universe, &name, package_symbol(scope));
            bound.insert(name, pkg);
        }

        *self.prog.write() = Arc::new(prog);
        Ok(())
    }

    /// The latest panic record for a value obtained from an earlier panic,
    /// such as the value of an `EvalError::Panic` or an error value returned
    /// to native code by `NativeCall::call`. The backlog is cleared.
    pub fn recover_nearest_panic_for(&self, value: &Value) -> Option<Arc<Panic>> {
        self.shared.backlog.recover_nearest(value)
    }

    /// Describes a program counter from `Panic::filtered_callers` or
    /// `NativeCall::filtered_callers`: an interpreted call site, or a host
    /// function.
    pub fn func_for_pc(&self, pc: usize) -> Option<Func> {
        match self.shared.node_for_handle(pc) {
            Some(node) => {
                let prog = self.prog.read().clone();
                Some(func_for_node(&prog, node, pc))
            }
            None => func_for_host(pc),
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs a compiled unit and turns its outcome into the evaluation result.
fn finish(exec: &mut Executor, unit: CompiledUnit) -> Result<Value, EvalError> {
    match exec.run_file(unit.file, unit.main) {
        Ok(value) => Ok(value),
        Err(Unwind::Panic(state)) => Err(EvalError::Panic(exec.record_panic(&state))),
        Err(Unwind::Cancelled) => Err(EvalError::Cancelled),
    }
}

fn package_symbol(scope: super::scope::ScopeId) -> Symbol {
    let mut sym = Symbol::new(SymKind::Package, Type::ANY);
    sym.pkg = Some(scope);
    sym
}

/// Type of a native member for interpreted code.
fn member_type(native: &Native) -> Result<Option<Type>, String> {
    let text = match native {
        Native::Func(f) => f.signature(),
        Native::Value{ typ, .. } => typ.as_str(),
        Native::Generic(_) => return Ok(None),
    };
    match resolve_type_text(text) {
        Ok(typ @ Type::Func(_)) => Ok(Some(typ)),
        Ok(_) if matches!(native, Native::Func(_)) => Err(format!("signature {:?} is not a function type", text)),
        Ok(typ) => Ok(Some(typ)),
        Err(e) => Err(e.message().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booleans_parse_like_the_source_language() {
        for text in ["1", "t", "T", "true", "TRUE", "True"].iter() {
            assert_eq!(parse_bool(text), Some(true), "{}", text);
        }
        for text in ["0", "f", "F", "false", "FALSE", "False"].iter() {
            assert_eq!(parse_bool(text), Some(false), "{}", text);
        }
        assert_eq!(parse_bool("yes"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn handles_are_registered_once() {
        let shared = Shared::new(Options::default());
        let mut graph = crate::interp::ast::NodeGraph::new();
        let node = graph.alloc(crate::interp::ast::NodeKind::Call, 0, Default::default());
        let frames = vec![StackFrame::Native(Arc::from("fmt.Println")), StackFrame::Interpreted(node)];
        let first = shared.register_handles(&frames);
        let second = shared.register_handles(&frames);
        assert_eq!(first, vec![handle_of(node)]);
        assert_eq!(first, second);
        assert_eq!(shared.node_for_handle(first[0]), Some(node));
        assert_eq!(shared.node_for_handle(12345), None);
    }

    #[test]
    fn member_types_are_checked() {
        let f = Native::func("func(int) string", |_, _| Ok(vec![]));
        assert!(matches!(member_type(&f), Ok(Some(Type::Func(_)))));
        let bad = Native::func("int", |_, _| Ok(vec![]));
        assert!(member_type(&bad).is_err());
        let v = Native::value(3i64, "int");
        assert_eq!(member_type(&v), Ok(Some(Type::INT)));
        assert_eq!(member_type(&Native::generic("func F[T any]() {}")), Ok(None));
    }
}
