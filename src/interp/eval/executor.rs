/// executor.rs
///
/// Execution driver. Runs compiled node graphs against frames by following
/// the control flow links: after a node's action ran, a branch node (one
/// with `fnext`) continues at `tnext` if its value holds and at `fnext`
/// otherwise, every other node continues at `tnext`. Leaving the last node of
/// a function body returns from the function.
///
/// Panics unwind as `Err(Unwind::Panic)` through the Rust call stack of the
/// executor, running the deferred calls of every frame they leave.

use backtrace::Backtrace;
use crossbeam::channel::Receiver;

use crate::common::*;
use crate::interp::ast::{Node, NodeId};
use crate::interp::exports::{NativeCall, NativeFunc};
use crate::interp::interpreter::Shared;
use crate::interp::panic::Panic;
use crate::interp::program::Program;
use crate::interp::stack::{backtrace_ips, collect_frames, host_callers, render_stack, CallRecord, CallStack, StackFrame};
use super::action::{Action, CallAction, Callee, CompositeKind, Operand, RecvArg, Target};
use super::channel::{block_forever, ChanOutcome};
use super::frame::{DeferredCall, Frame};
use super::ops;
use super::value::{FuncValue, Pointer, PtrRoot, Slice, Value};

/// Stack space kept free before recursing into another interpreted call.
const RED_ZONE: usize = 128 * 1024;
const STACK_PER_CALL: usize = 2 * 1024 * 1024;

const NIL_DEREF: &str = "runtime error: invalid memory address or nil pointer dereference";

/// Panic on its way up the call stack.
pub(crate) struct PanicState {
    pub value: Value,
    /// Node executing when the panic started
    pub node: Option<NodeId>,
    /// Call records of the task at that moment
    pub records: Vec<CallRecord>,
    pub backtrace: Backtrace,
}

/// Why an activation stopped early.
pub(crate) enum Unwind {
    Panic(Box<PanicState>),
    /// The evaluation was cancelled
    Cancelled,
}

/// What the driver does after a node's action.
enum Flow {
    Next,
    /// The action produced the node's value
    Store(Value),
    Return,
}

/// Executes interpreted code for one task.
pub(crate) struct Executor {
    pub(crate) shared: Arc<Shared>,
    pub(crate) prog: Arc<Program>,
    pub(crate) task: TaskId,
    /// Set when a callback made by native code was cancelled
    pub(crate) cancelled: bool,
    root: Arc<Frame>,
    run_id: u64,
    done: Receiver<()>,
    stack: CallStack,
    /// Node the innermost activation is executing
    current: Option<NodeId>,
    /// Host program counters when the task entered the interpreter
    entry: Vec<usize>,
    steps: usize,
    /// Value of the last package level expression statement
    result: Value,
}

impl Executor {
    pub fn new(shared: Arc<Shared>, prog: Arc<Program>, root: Arc<Frame>, run_id: u64, done: Receiver<()>, task: TaskId) -> Self {
        let max_depth = shared.options.max_call_depth;
        Self{
            shared, prog, task,
            cancelled: false,
            root, run_id, done,
            stack: CallStack::new(max_depth),
            current: None,
            entry: Vec::new(),
            steps: 0,
            result: Value::Nil,
        }
    }

    /// Remembers the host stack the task started on. Host frames below this
    /// point are appended to rendered stacks unchanged.
    pub fn capture_entry(&mut self) {
        self.entry = backtrace_ips(&Backtrace::new_unresolved());
    }

    /// Runs the package level code of a unit and then its `main`, if any.
    /// Returns the value of the last package level expression.
    pub fn run_file(&mut self, file: NodeId, main: Option<NodeId>) -> Result<Value, Unwind> {
        let prog = self.prog.clone();
        let layout = match &prog.nodes[file].frame {
            Some(layout) => layout,
            None => return Ok(Value::Nil),
        };
        let data = layout.types.iter().map(|t| t.zero(&prog.named)).collect();
        let frame = Arc::new(Frame::new(&self.root, None, data, self.run_id, self.done.clone(), None));
        let outcome = self.run_body(&frame, layout.entry);
        self.unwind_deferred(&frame, outcome)?;

        if let Some(main) = main {
            self.invoke(None, Value::Func(FuncValue{ node: main, env: None }), Vec::new(), None, None)?;
        }
        Ok(std::mem::replace(&mut self.result, Value::Nil))
    }

    // --- Driver

    fn run_body(&mut self, frame: &Arc<Frame>, entry: Option<NodeId>) -> Result<(), Unwind> {
        let prog = self.prog.clone();
        let mut cur = entry;
        while let Some(id) = cur {
            let node = &prog.nodes[id];
            self.current = Some(id);
            self.tick(frame)?;
            exec_log!(task = self.task, node = id.index(), gen = node.gen);

            match self.step(node, frame)? {
                Flow::Next => {}
                Flow::Store(value) => {
                    if let Some(slot) = node.findex {
                        frame.set(slot, value);
                    }
                }
                Flow::Return => return Ok(()),
            }

            cur = match node.fnext {
                Some(fnext) => {
                    let cond = node.value.as_ref().map_or(false, |op| self.read(frame, op).truthy());
                    if cond { node.tnext } else { Some(fnext) }
                }
                None => node.tnext,
            };
        }
        Ok(())
    }

    /// Checks for cancellation every `cancel_check_interval` steps.
    fn tick(&mut self, frame: &Frame) -> Result<(), Unwind> {
        self.steps += 1;
        if self.steps < self.shared.options.cancel_check_interval {
            return Ok(());
        }
        self.steps = 0;
        if frame.id.load(Ordering::Relaxed) != self.shared.run_id.load(Ordering::SeqCst) {
            tracing::debug!(task = self.task, "stale run id, unwinding");
            return Err(Unwind::Cancelled);
        }
        Ok(())
    }

    fn step(&mut self, node: &Node, frame: &Arc<Frame>) -> Result<Flow, Unwind> {
        let flow = match &node.action {
            Action::Nop => Flow::Next,
            Action::Unary{ op, x, kind } => {
                let x = self.read(frame, x);
                let v = ops::unary(*op, &x, *kind).map_err(|e| self.runtime_panic(node, e.message()))?;
                Flow::Store(v)
            }
            Action::Binary{ op, x, y, kind } => {
                let (x, y) = (self.read(frame, x), self.read(frame, y));
                let v = ops::binary(*op, &x, &y, *kind).map_err(|e| self.runtime_panic(node, e.message()))?;
                Flow::Store(v)
            }
            Action::LogicalAnd{ x, y } => {
                Flow::Store(Value::Bool(self.read(frame, x).truthy() && self.read(frame, y).truthy()))
            }
            Action::LogicalOr{ x, y } => {
                Flow::Store(Value::Bool(self.read(frame, x).truthy() || self.read(frame, y).truthy()))
            }
            Action::AddrOf(target) => Flow::Store(Value::Pointer(self.address(node, frame, target)?)),
            Action::Alloc(x) => Flow::Store(Value::Pointer(Pointer::new_cell(self.read(frame, x)))),
            Action::Deref(p) => match self.read(frame, p) {
                Value::Pointer(p) => Flow::Store(p.load()),
                _ => return Err(self.runtime_panic(node, String::from(NIL_DEREF))),
            },
            Action::Field{ x, path, through_ptr } => {
                let x = self.read(frame, x);
                let v = if *through_ptr {
                    match x {
                        Value::Pointer(p) => Pointer{ root: p.root, path: concat(&p.path, path) }.load(),
                        _ => return Err(self.runtime_panic(node, String::from(NIL_DEREF))),
                    }
                } else {
                    select_path(x, path)
                };
                Flow::Store(v)
            }
            Action::Index{ x, index } => {
                let i = self.read(frame, index).as_int().unwrap_or(0);
                let v = match self.read(frame, x) {
                    Value::String(s) => match usize::try_from(i).ok().and_then(|i| s.as_bytes().get(i)) {
                        Some(b) => Value::Uint(*b as u64),
                        None => return Err(self.index_panic(node, i, s.len())),
                    },
                    Value::Slice(s) => match usize::try_from(i).ok().and_then(|i| s.get(i)) {
                        Some(v) => v,
                        None => return Err(self.index_panic(node, i, s.len())),
                    },
                    _ => return Err(self.index_panic(node, i, 0)),
                };
                Flow::Store(v)
            }
            Action::Slice{ x, low, high } => {
                let x = self.read(frame, x);
                let low = low.as_ref().map(|op| self.read(frame, op).as_int().unwrap_or(0));
                let high = high.as_ref().map(|op| self.read(frame, op).as_int().unwrap_or(0));
                Flow::Store(self.slice(node, x, low, high)?)
            }
            Action::Composite(CompositeKind::Struct{ zero, fields }) => {
                let mut v = zero.clone();
                if let Value::Struct(slots) = &mut v {
                    for (idx, op) in fields.iter() {
                        if let Some(slot) = slots.get_mut(*idx) {
                            *slot = self.read(frame, op);
                        }
                    }
                }
                Flow::Store(v)
            }
            Action::Composite(CompositeKind::Slice{ elems }) => {
                let values = elems.iter().map(|op| self.read(frame, op)).collect();
                Flow::Store(Value::Slice(Slice::from_vec(values)))
            }
            Action::Convert{ x, conv } => Flow::Store(ops::convert(&self.read(frame, x), *conv)),
            Action::MakeFunc(lit) => Flow::Store(Value::Func(FuncValue{ node: *lit, env: Some(frame.clone()) })),
            Action::Call(call) => {
                let (fun, args) = self.call_parts(node, frame, call)?;
                let results = self.invoke(Some(node.this), fun, args, call.native_name.clone(), None)?;
                Flow::Store(Value::tuple(results))
            }
            Action::Builtin{ op, args } => {
                let args = args.iter().map(|a| self.read(frame, a)).collect();
                Flow::Store(self.exec_builtin(node, op, args, frame)?)
            }
            Action::ErrorMethod(x) => match self.read(frame, x) {
                Value::Error(e) => Flow::Store(Value::string(e.message())),
                Value::Nil => return Err(self.runtime_panic(node, String::from(NIL_DEREF))),
                other => Flow::Store(Value::from(other.to_string())),
            },
            Action::Assign{ targets, values } => {
                // Right hand sides are all evaluated before any write
                let values: Vec<Value> = values.iter().map(|op| self.read(frame, op)).collect();
                for (target, value) in targets.iter().zip(values.into_iter()) {
                    self.write(node, frame, target, value)?;
                }
                Flow::Next
            }
            Action::AssignTuple{ targets, value } => {
                let values = match self.read(frame, value) {
                    Value::Tuple(values) => values,
                    other => vec![other],
                };
                for (target, value) in targets.iter().zip(values.into_iter()) {
                    self.write(node, frame, target, value)?;
                }
                Flow::Next
            }
            Action::OpAssign{ target, op, y, kind } => {
                let x = self.load_target(node, frame, target)?;
                let y = self.read(frame, y);
                let v = ops::binary(*op, &x, &y, *kind).map_err(|e| self.runtime_panic(node, e.message()))?;
                self.write(node, frame, target, v)?;
                Flow::Next
            }
            Action::Recv{ ch, zero } => match self.read(frame, ch) {
                Value::Chan(ch) => match ch.recv(self.cancel_signal(frame)) {
                    ChanOutcome::Ready(Some(v)) => Flow::Store(v),
                    ChanOutcome::Ready(None) | ChanOutcome::Closed => Flow::Store(zero.clone()),
                    ChanOutcome::Cancelled => return Err(Unwind::Cancelled),
                },
                _ => {
                    block_forever(&frame.done);
                    return Err(Unwind::Cancelled);
                }
            },
            Action::Send{ ch, value } => {
                let value = self.read(frame, value);
                match self.read(frame, ch) {
                    Value::Chan(ch) => match ch.send(value, self.cancel_signal(frame)) {
                        ChanOutcome::Ready(()) => Flow::Next,
                        ChanOutcome::Closed => return Err(self.runtime_panic(node, String::from("send on closed channel"))),
                        ChanOutcome::Cancelled => return Err(Unwind::Cancelled),
                    },
                    _ => {
                        block_forever(&frame.done);
                        return Err(Unwind::Cancelled);
                    }
                }
            }
            Action::Return{ values, tuple } => {
                let mut results: Vec<Value> = values.iter().map(|op| self.read(frame, op)).collect();
                if *tuple {
                    if let Some(Value::Tuple(spread)) = results.pop() {
                        results = spread;
                    }
                }
                for (i, v) in results.into_iter().enumerate() {
                    frame.set(i, v);
                }
                Flow::Return
            }
            Action::Defer(call) => {
                let deferred = self.capture_call(frame, *call)?;
                frame.deferred.lock().extend(deferred);
                Flow::Next
            }
            Action::Go(call) => {
                self.spawn(node, frame, *call)?;
                Flow::Next
            }
            Action::SetResult(x) => {
                self.result = self.read(frame, x);
                Flow::Next
            }
        };
        Ok(flow)
    }

    // --- Operands and targets

    fn slot(&self, frame: &Arc<Frame>, op: &Operand) -> Option<(Arc<Frame>, usize)> {
        match op {
            Operand::Slot{ level, index } => frame.at_level(*level).map(|f| (f, *index)),
            Operand::Global(index) => Some((frame.globals(), *index)),
            Operand::Const(_) => None,
        }
    }

    pub(crate) fn read(&self, frame: &Arc<Frame>, op: &Operand) -> Value {
        match op {
            Operand::Const(v) => v.clone(),
            _ => self.slot(frame, op).map_or(Value::Nil, |(f, i)| f.get(i)),
        }
    }

    /// Pointer to the location a target designates.
    fn address(&self, node: &Node, frame: &Arc<Frame>, target: &Target) -> Result<Pointer, Unwind> {
        match target {
            Target::Discard => Err(self.runtime_panic(node, String::from("cannot take the address of _"))),
            Target::Var{ op, path } => match self.slot(frame, op) {
                Some((f, i)) => Ok(Pointer{ root: PtrRoot::Slot(f, i), path: path.clone() }),
                None => Err(self.runtime_panic(node, String::from("cannot take the address of a constant"))),
            },
            Target::Deref{ ptr, path } => match self.read(frame, ptr) {
                Value::Pointer(p) => Ok(Pointer{ root: p.root, path: concat(&p.path, path) }),
                _ => Err(self.runtime_panic(node, String::from(NIL_DEREF))),
            },
            Target::Index{ x, index, path } => {
                let i = self.read(frame, index).as_int().unwrap_or(0);
                match self.read(frame, x) {
                    Value::Slice(s) => match usize::try_from(i).ok().and_then(|i| s.elem_ptr(i)) {
                        Some(p) => Ok(Pointer{ root: p.root, path: path.clone() }),
                        None => Err(self.index_panic(node, i, s.len())),
                    },
                    _ => Err(self.index_panic(node, i, 0)),
                }
            }
        }
    }

    fn write(&self, node: &Node, frame: &Arc<Frame>, target: &Target, value: Value) -> Result<(), Unwind> {
        match target {
            Target::Discard => Ok(()),
            Target::Var{ op, path } if path.is_empty() => {
                if let Some((f, i)) = self.slot(frame, op) {
                    f.set(i, value);
                }
                Ok(())
            }
            Target::Index{ x, index, path } if path.is_empty() => {
                let i = self.read(frame, index).as_int().unwrap_or(0);
                match self.read(frame, x) {
                    Value::Slice(s) => match usize::try_from(i) {
                        Ok(idx) if idx < s.len() => {
                            s.set(idx, value);
                            Ok(())
                        }
                        _ => Err(self.index_panic(node, i, s.len())),
                    },
                    _ => Err(self.index_panic(node, i, 0)),
                }
            }
            _ => {
                self.address(node, frame, target)?.store(value);
                Ok(())
            }
        }
    }

    fn load_target(&self, node: &Node, frame: &Arc<Frame>, target: &Target) -> Result<Value, Unwind> {
        match target {
            Target::Discard => Ok(Value::Nil),
            Target::Var{ op, path } if path.is_empty() => Ok(self.read(frame, op)),
            _ => Ok(self.address(node, frame, target)?.load()),
        }
    }

    fn slice(&self, node: &Node, x: Value, low: Option<i64>, high: Option<i64>) -> Result<Value, Unwind> {
        let (len, cap) = match &x {
            Value::String(s) => (s.len(), s.len()),
            Value::Slice(s) => (s.len, s.cap),
            _ => (0, 0),
        };
        let low = low.unwrap_or(0);
        let high = high.unwrap_or(len as i64);
        if high < 0 || high as usize > cap {
            let what = if matches!(x, Value::String(_)) { "length" } else { "capacity" };
            let msg = format!("runtime error: slice bounds out of range [:{}] with {} {}", high, what, cap);
            return Err(self.runtime_panic(node, msg));
        }
        if low < 0 || low > high {
            let msg = format!("runtime error: slice bounds out of range [{}:{}]", low, high);
            return Err(self.runtime_panic(node, msg));
        }
        let (low, high) = (low as usize, high as usize);
        Ok(match x {
            Value::String(s) => match s.get(low..high) {
                Some(sub) => Value::string(sub),
                // Cut inside a character
                None => Value::from(String::from_utf8_lossy(&s.as_bytes()[low..high]).into_owned()),
            },
            Value::Slice(s) => s.reslice(low, high).map_or(Value::Nil, Value::Slice),
            other => other,
        })
    }

    /// Signal a blocking channel operation of `frame` also waits on.
    fn cancel_signal<'f>(&self, frame: &'f Frame) -> Option<&'f Receiver<()>> {
        if self.shared.options.fast_chan {
            None
        } else {
            Some(&frame.done)
        }
    }

    // --- Calls

    /// Callee and arguments of a call node, read from the frame.
    fn call_parts(&self, node: &Node, frame: &Arc<Frame>, call: &CallAction) -> Result<(Value, Vec<Value>), Unwind> {
        let fun = match &call.callee {
            Callee::Static(decl) => Value::Func(FuncValue{ node: *decl, env: None }),
            Callee::Dynamic(op) => self.read(frame, op),
        };
        let mut args = Vec::with_capacity(call.args.len() + 1);
        match &call.recv {
            Some(RecvArg::Value(op)) => args.push(self.read(frame, op)),
            Some(RecvArg::AddrOf(target)) => args.push(Value::Pointer(self.address(node, frame, target)?)),
            Some(RecvArg::Deref(op)) => match self.read(frame, op) {
                Value::Pointer(p) => args.push(p.load()),
                _ => return Err(self.runtime_panic(node, String::from(NIL_DEREF))),
            },
            None => {}
        }

        let mut values: Vec<Value> = call.args.iter().map(|op| self.read(frame, op)).collect();
        if call.spread_tuple {
            values = match values.pop() {
                Some(Value::Tuple(spread)) => spread,
                Some(single) => vec![single],
                None => Vec::new(),
            };
        }
        if let Some(fixed) = call.variadic {
            let rest = values.split_off(fixed.min(values.len()));
            values.push(if rest.is_empty() { Value::Nil } else { Value::Slice(Slice::from_vec(rest)) });
        }
        args.extend(values);
        Ok((fun, args))
    }

    /// Calls a function value. `site` is the call node, `None` for calls
    /// made by native code and for the entry call of a task.
    fn invoke(
        &mut self, site: Option<NodeId>, fun: Value, args: Vec<Value>,
        native_name: Option<Arc<str>>, defer_parent: Option<Arc<Frame>>,
    ) -> Result<Vec<Value>, Unwind> {
        match fun {
            Value::Func(f) => self.call_interpreted(site, &f, args, defer_parent),
            Value::Native(f) => {
                let name = native_name.unwrap_or_else(|| Arc::from(f.signature()));
                self.call_native(site, &f, name, args)
            }
            _ => Err(self.fault(site, Value::error(NIL_DEREF))),
        }
    }

    fn call_interpreted(&mut self, site: Option<NodeId>, f: &FuncValue, args: Vec<Value>, defer_parent: Option<Arc<Frame>>) -> Result<Vec<Value>, Unwind> {
        let prog = self.prog.clone();
        let layout = match &prog.nodes[f.node].frame {
            Some(layout) => layout,
            None => {
                let msg = format!("function {} has no body", prog.nodes[f.node].ident);
                return Err(self.fault(site, Value::error(msg)));
            }
        };
        if !self.stack.push(CallRecord::interpreted(site, f.node)) {
            return Err(self.fault(site, Value::error("stack overflow")));
        }

        let mut data: Vec<Value> = layout.types.iter().map(|t| t.zero(&prog.named)).collect();
        for (i, arg) in args.into_iter().take(layout.params).enumerate() {
            if let Some(slot) = data.get_mut(layout.results + i) {
                *slot = arg;
            }
        }
        let frame = Arc::new(Frame::new(&self.root, f.env.clone(), data, self.run_id, self.done.clone(), defer_parent));

        let saved = self.current;
        let outcome = stacker::maybe_grow(RED_ZONE, STACK_PER_CALL, || self.run_body(&frame, layout.entry));
        let outcome = self.unwind_deferred(&frame, outcome);
        self.stack.pop();
        self.current = saved;
        outcome?;

        let data = frame.data.read();
        Ok(data.iter().take(layout.results).cloned().collect())
    }

    fn call_native(&mut self, site: Option<NodeId>, f: &NativeFunc, name: Arc<str>, args: Vec<Value>) -> Result<Vec<Value>, Unwind> {
        if !self.stack.push(CallRecord::native(site, name.clone())) {
            return Err(self.fault(site, Value::error("stack overflow")));
        }
        let saved = self.current;
        let result = {
            let mut call = NativeCall{ exec: self, name };
            f.invoke(&mut call, args)
        };
        self.stack.pop();
        self.current = saved;
        if std::mem::take(&mut self.cancelled) {
            return Err(Unwind::Cancelled);
        }
        result.map_err(|value| self.fault(site, value))
    }

    /// Entry point for native code calling a function value.
    pub(crate) fn call_from_native(&mut self, fun: Value, args: Vec<Value>) -> Result<Vec<Value>, Unwind> {
        self.invoke(None, fun, args, None, None)
    }

    /// Runs the deferred calls of a frame that is being left, most recent
    /// first. A deferred call may stop a panic with `recover`, or replace it
    /// by panicking itself.
    fn unwind_deferred(&mut self, frame: &Arc<Frame>, mut outcome: Result<(), Unwind>) -> Result<(), Unwind> {
        loop {
            if let Err(Unwind::Cancelled) = outcome {
                frame.deferred.lock().clear();
                break;
            }
            let deferred = match frame.deferred.lock().pop() {
                Some(d) => d,
                None => break,
            };
            let panicking = if let Err(Unwind::Panic(state)) = &outcome {
                *frame.recovered.lock() = Some(state.value.clone());
                true
            } else {
                false
            };

            match self.run_deferred(frame, deferred) {
                Err(unwind) => outcome = Err(unwind),
                Ok(()) if panicking && frame.recovered.lock().is_none() => outcome = Ok(()),
                Ok(()) => {}
            }
        }
        frame.recovered.lock().take();
        outcome
    }

    fn run_deferred(&mut self, frame: &Arc<Frame>, deferred: DeferredCall) -> Result<(), Unwind> {
        let prog = self.prog.clone();
        let site = &prog.nodes[deferred.site];
        self.current = Some(deferred.site);
        match &site.action {
            Action::Builtin{ op, .. } if deferred.builtin => {
                self.exec_builtin(site, op, deferred.args, frame)?;
            }
            Action::Call(call) => {
                let name = call.native_name.clone();
                self.invoke(Some(deferred.site), deferred.fun, deferred.args, name, Some(frame.clone()))?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Evaluates the callee and arguments of a call node for a later run.
    fn capture_call(&self, frame: &Arc<Frame>, call: NodeId) -> Result<Option<DeferredCall>, Unwind> {
        let prog = self.prog.clone();
        let node = &prog.nodes[call];
        let deferred = match &node.action {
            Action::Call(action) => {
                let (fun, args) = self.call_parts(node, frame, action)?;
                DeferredCall{ site: call, fun, args, builtin: false }
            }
            Action::Builtin{ args, .. } => {
                let args = args.iter().map(|op| self.read(frame, op)).collect();
                DeferredCall{ site: call, fun: Value::Nil, args, builtin: true }
            }
            _ => return Ok(None),
        };
        Ok(Some(deferred))
    }

    /// Starts the call of a `go` statement on a new host thread, with a clone
    /// of the current frame.
    fn spawn(&mut self, node: &Node, frame: &Arc<Frame>, call: NodeId) -> Result<(), Unwind> {
        let clone = Arc::new(frame.clone_frame());
        let deferred = match self.capture_call(&clone, call)? {
            Some(d) => d,
            None => return Ok(()),
        };
        let task = self.shared.next_task();
        let mut exec = Executor::new(
            self.shared.clone(), self.prog.clone(), self.root.clone(), self.run_id, self.done.clone(), task,
        );
        tracing::debug!(parent = self.task, task, "starting task");

        let spawned = std::thread::Builder::new()
            .name(format!("gointerp-task-{}", task))
            .spawn(move || {
                exec.capture_entry();
                exec.current = Some(deferred.site);
                let outcome = if deferred.builtin {
                    exec.run_deferred(&clone, deferred)
                } else {
                    exec.invoke(None, deferred.fun, deferred.args, None, None).map(|_| ())
                };
                match outcome {
                    Ok(()) => tracing::debug!(task, "task finished"),
                    Err(Unwind::Cancelled) => tracing::debug!(task, "task cancelled"),
                    Err(Unwind::Panic(state)) => {
                        let panic = exec.record_panic(&state);
                        tracing::warn!(task, "unrecovered panic in task: {}", panic.value);
                    }
                }
            });
        match spawned {
            Ok(_) => Ok(()),
            Err(e) => Err(self.runtime_panic(node, format!("cannot start task: {}", e))),
        }
    }

    // --- Panics and stacks

    fn fault(&self, at: Option<NodeId>, value: Value) -> Unwind {
        Unwind::Panic(Box::new(PanicState{
            value,
            node: at.or(self.current),
            records: self.stack.records().to_vec(),
            backtrace: Backtrace::new_unresolved(),
        }))
    }

    pub(crate) fn panic_with(&self, node: NodeId, value: Value) -> Unwind {
        self.fault(Some(node), value)
    }

    /// Runtime error raised by the node, like an out of range index.
    pub(crate) fn runtime_panic(&self, node: &Node, msg: String) -> Unwind {
        self.fault(Some(node.this), Value::error(msg))
    }

    fn index_panic(&self, node: &Node, index: i64, len: usize) -> Unwind {
        self.runtime_panic(node, format!("runtime error: index out of range [{}] with length {}", index, len))
    }

    /// Logical frames of the task, top first.
    pub(crate) fn current_frames(&self) -> Vec<StackFrame> {
        self.stack.frames(self.current)
    }

    /// Host program counters below the point where the task entered the
    /// interpreter.
    pub(crate) fn host_callers(&self) -> Vec<usize> {
        host_callers(&Backtrace::new_unresolved(), &self.entry)
    }

    /// Turns a panic crossing an evaluation boundary into a record of the
    /// panic backlog.
    pub(crate) fn record_panic(&self, state: &PanicState) -> Arc<Panic> {
        let frames = collect_frames(&state.records, state.node);
        let mut trace = state.backtrace.clone();
        trace.resolve();
        let host = host_callers(&trace, &self.entry);

        let mut filtered_callers = self.shared.register_handles(&frames);
        filtered_callers.extend(host.iter().copied());
        let panic = Panic{
            value: state.value.clone(),
            callers: backtrace_ips(&trace),
            stack: format!("{:?}", trace),
            filtered_callers,
            filtered_stack: render_stack(&self.prog, self.task, &frames, &host, 0),
        };
        tracing::debug!(task = self.task, frames = frames.len(), "panic captured");
        self.shared.backlog.record(panic)
    }
}

fn concat(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut path = a.to_vec();
    path.extend_from_slice(b);
    path
}

/// Nested struct field of a value.
fn select_path(mut v: Value, path: &[usize]) -> Value {
    for idx in path {
        v = match v {
            Value::Struct(mut fields) if *idx < fields.len() => fields.swap_remove(*idx),
            _ => return Value::Nil,
        };
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_paths_select_nested_values() {
        let inner = Value::Struct(vec![Value::Int(1), Value::from("x")]);
        let outer = Value::Struct(vec![Value::Bool(true), inner]);
        assert_eq!(select_path(outer.clone(), &[1, 1]).as_str(), Some("x"));
        assert_eq!(select_path(outer.clone(), &[0]).as_bool(), Some(true));
        assert!(select_path(outer, &[0, 3]).is_nil());
        assert_eq!(concat(&[1], &[2, 3]), vec![1, 2, 3]);
    }
}
