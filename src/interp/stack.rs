/// stack.rs
///
/// Structured call stacks. Every task keeps the list of calls it is inside
/// of; a stack trace is rendered from those records instead of from the host
/// stack, so that it names interpreted functions and source positions. Host
/// frames below the point where the task entered the interpreter are kept as
/// they are.

use backtrace::Backtrace;

use crate::common::*;
use super::ast::{NodeGraph, NodeId, NodeKind};
use super::program::Program;
use super::scope::{ScopeId, Scopes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Interpreted,
    Native,
}

#[derive(Debug, Clone)]
pub(crate) struct CallRecord {
    /// Call node in the caller; `None` for calls made by native code and for
    /// the entry call of a task
    pub site: Option<NodeId>,
    /// Declaration or literal of an interpreted callee
    pub callee: Option<NodeId>,
    pub kind: CallKind,
    /// Name of a native callee
    pub native: Option<Arc<str>>,
}

impl CallRecord {
    pub fn interpreted(site: Option<NodeId>, callee: NodeId) -> Self {
        Self{ site, callee: Some(callee), kind: CallKind::Interpreted, native: None }
    }

    pub fn native(site: Option<NodeId>, name: Arc<str>) -> Self {
        Self{ site, callee: None, kind: CallKind::Native, native: Some(name) }
    }
}

/// One logical frame of a rendered stack.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StackFrame {
    /// Interpreted function, positioned at the node it is executing
    Interpreted(NodeId),
    Native(Arc<str>),
}

pub(crate) struct CallStack {
    records: Vec<CallRecord>,
    max_depth: usize,
}

impl CallStack {
    pub fn new(max_depth: usize) -> Self {
        Self{ records: Vec::new(), max_depth }
    }

    /// Pushes a record, unless the maximum depth is reached.
    pub fn push(&mut self, record: CallRecord) -> bool {
        if self.records.len() >= self.max_depth {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn pop(&mut self) -> Option<CallRecord> {
        self.records.pop()
    }

    pub fn records(&self) -> &[CallRecord] {
        &self.records
    }

    /// Logical frames, top first. `origin` is the node the innermost
    /// interpreted activation is executing.
    pub fn frames(&self, origin: Option<NodeId>) -> Vec<StackFrame> {
        collect_frames(&self.records, origin)
    }
}

pub(crate) fn collect_frames(records: &[CallRecord], origin: Option<NodeId>) -> Vec<StackFrame> {
    let mut frames = Vec::with_capacity(records.len() + 1);
    // Position within the activation being rendered, walking downwards: the
    // call site recorded by the activation above it
    let mut here = origin;
    for record in records.iter().rev() {
        match record.kind {
            CallKind::Native => {
                let name = record.native.clone().unwrap_or_else(|| Arc::from("?"));
                frames.push(StackFrame::Native(name));
            }
            CallKind::Interpreted => {
                if let Some(node) = here.or(record.callee) {
                    frames.push(StackFrame::Interpreted(node));
                }
            }
        }
        here = record.site;
    }
    // Package level code of the evaluation
    if let Some(node) = here {
        frames.push(StackFrame::Interpreted(node));
    }
    frames
}

/// Handle of a node. Handles count down from the top of the address space,
/// where no host code lives.
pub(crate) fn handle_of(node: NodeId) -> usize {
    usize::MAX - node.index()
}

/// Nearest scope recorded on the node or one of its ancestors.
pub(crate) fn scope_of(nodes: &NodeGraph, node: NodeId) -> Option<ScopeId> {
    let mut cur = Some(node);
    while let Some(id) = cur {
        if let Some(scope) = nodes[id].scope {
            return Some(scope);
        }
        cur = nodes[id].anc;
    }
    None
}

/// Name of a function declaration, with its receiver for methods.
fn decl_name(nodes: &NodeGraph, decl: NodeId) -> String {
    let node = &nodes[decl];
    let mut name = node.ident.clone();
    if node.children.len() < 5 {
        return name;
    }
    if !nodes[node.child(2)].children.is_empty() {
        name.push_str("[...]");
    }
    let recv = &nodes[node.child(0)];
    let recv_type = recv.children.first().and_then(|field| nodes[*field].children.last().copied());
    match recv_type.map(|t| &nodes[t]) {
        Some(t) if t.kind == NodeKind::PointerType => {
            format!("(*{}).{}", nodes[t.child(0)].ident, name)
        }
        Some(t) => format!("{}.{}", t.ident, name),
        None => name,
    }
}

/// 1-based position of a function literal among the literals directly
/// inside `container` (literals nested in other literals do not count).
fn closure_ordinal(nodes: &NodeGraph, container: NodeId, lit: NodeId) -> usize {
    let mut count = 0;
    let mut found = 0;
    nodes.dfs(container, &mut |n| {
        if n.this == container {
            return true;
        }
        if n.kind == NodeKind::FuncDecl {
            return false;
        }
        if n.kind == NodeKind::FuncLit {
            count += 1;
            if n.this == lit {
                found = count;
            }
            return false;
        }
        true
    });
    found
}

fn body_of(nodes: &NodeGraph, def: NodeId) -> NodeId {
    let node = &nodes[def];
    match node.kind {
        NodeKind::FuncDecl if node.children.len() == 5 => node.child(4),
        NodeKind::FuncLit if node.children.len() == 2 => node.child(1),
        _ => def,
    }
}

/// Qualified name of the function owning `scope`: `pkg.Func`,
/// `pkg.(*Recv).Method`, `pkg.Func.func1` for closures and
/// `pkg.Func.func1.2` for closures inside closures. Package level code is
/// named `pkg.main`.
pub(crate) fn func_name(scopes: &Scopes, nodes: &NodeGraph, scope: ScopeId) -> String {
    let pkg = scopes[scope].pkg_name.clone();

    // Function literals from the innermost outwards
    let mut lits = Vec::new();
    let mut def = scopes[scope].def;
    while let Some(id) = def {
        if nodes[id].kind != NodeKind::FuncLit {
            break;
        }
        lits.push(id);
        def = nodes[id].scope
            .and_then(|own| scopes[own].anc)
            .and_then(|outer| scopes[outer].def);
    }

    let mut name = match def {
        Some(decl) => decl_name(nodes, decl),
        None => String::from("main"),
    };
    let mut container = match def {
        Some(decl) => Some(body_of(nodes, decl)),
        None => lits.last().and_then(|lit| nodes.find_anc(*lit, |n| n.kind == NodeKind::File)),
    };
    for (depth, lit) in lits.iter().rev().enumerate() {
        let ordinal = container.map(|c| closure_ordinal(nodes, c, *lit)).unwrap_or(0);
        if depth == 0 {
            name.push_str(&format!(".func{}", ordinal));
        } else {
            name.push_str(&format!(".{}", ordinal));
        }
        container = Some(body_of(nodes, *lit));
    }

    format!("{}.{}", pkg, name)
}

/// Function name at a node, for stack frames and `func_for_pc`.
pub(crate) fn func_name_at(prog: &Program, node: NodeId) -> String {
    match scope_of(&prog.nodes, node) {
        Some(scope) => func_name(&prog.scopes, &prog.nodes, scope),
        None => String::from("?"),
    }
}

/// Host program counters below the point where a task entered the
/// interpreter: the common tail of a capture and the task's entry capture.
pub(crate) fn host_callers(capture: &Backtrace, entry: &[usize]) -> Vec<usize> {
    let ips: Vec<usize> = capture.frames().iter().map(|f| f.ip() as usize).collect();
    let common = ips.iter().rev()
        .zip(entry.iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    ips[ips.len() - common..].to_vec()
}

pub(crate) fn backtrace_ips(capture: &Backtrace) -> Vec<usize> {
    capture.frames().iter().map(|f| f.ip() as usize).collect()
}

fn resolve_host(pc: usize) -> Option<(String, Option<String>, u32, u32, usize)> {
    let mut found = None;
    backtrace::resolve(pc as *mut std::ffi::c_void, |sym| {
        if found.is_some() {
            return;
        }
        let name = match sym.name() {
            Some(name) => name.to_string(),
            None => return,
        };
        let file = sym.filename().map(|f| f.display().to_string());
        let entry = sym.addr().map(|a| a as usize).unwrap_or(pc);
        found = Some((name, file, sym.lineno().unwrap_or(0), sym.colno().unwrap_or(0), entry));
    });
    found
}

fn render_host(pc: usize) -> String {
    match resolve_host(pc) {
        Some((name, Some(file), line, _, _)) => format!("{}()\n\t{}:{}", name, file, line),
        Some((name, None, _, _, _)) => format!("{}()\n\t?", name),
        None => format!("{:#x}()\n\t?", pc),
    }
}

/// Drops `skip` leading frames of a stack made of the logical frames followed
/// by the host frames.
pub(crate) fn skip_frames<'a>(frames: &'a [StackFrame], host: &'a [usize], skip: usize) -> (&'a [StackFrame], &'a [usize]) {
    let in_frames = skip.min(frames.len());
    let in_host = (skip - in_frames).min(host.len());
    (&frames[in_frames..], &host[in_host..])
}

/// Renders a stack: a goroutine header, the interpreted frames and then the
/// host frames, dropping `skip` leading frames.
pub(crate) fn render_stack(prog: &Program, task: TaskId, frames: &[StackFrame], host: &[usize], skip: usize) -> String {
    let (frames, host) = skip_frames(frames, host, skip);
    let interpreted = frames.iter().map(|frame| match frame {
        StackFrame::Interpreted(node) if prog.nodes.contains(*node) => {
            format!("{}()\n\t{}", func_name_at(prog, *node), prog.position(*node))
        }
        StackFrame::Interpreted(_) => String::from("?()\n\t?"),
        StackFrame::Native(name) => format!("{}()\n\t<native>", name),
    });
    let host = host.iter().map(|pc| render_host(*pc));

    let mut lines = vec![format!("goroutine {} [running]:", task)];
    lines.extend(interpreted.chain(host));
    lines.join("\n")
}

/// Function description returned by `Interpreter::func_for_pc`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Func {
    pub name: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    /// Handle (or host address) of the function's entry
    pub entry: usize,
}

impl Func {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_line(&self) -> (&str, u32) {
        (&self.file, self.line)
    }
}

/// Describes the interpreted call site a handle was registered for.
pub(crate) fn func_for_node(prog: &Program, node: NodeId, handle: usize) -> Func {
    let n = &prog.nodes[node];
    Func{
        name: func_name_at(prog, node),
        file: prog.unit_name(n.unit).to_string(),
        line: n.pos.line,
        column: n.pos.column,
        entry: handle,
    }
}

/// Describes a host program counter with the host's symbol information.
pub(crate) fn func_for_host(pc: usize) -> Option<Func> {
    let (name, file, line, column, entry) = resolve_host(pc)?;
    Some(Func{ name, file: file.unwrap_or_default(), line, column, entry })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::input_source::InputPosition;
    use crate::interp::scope::{universe, ScopeKind};

    fn node(graph: &mut NodeGraph, kind: NodeKind, children: Vec<NodeId>) -> NodeId {
        let id = graph.alloc(kind, 0, InputPosition::default());
        graph.set_children(id, children);
        id
    }

    fn func_lit(graph: &mut NodeGraph, stmts: Vec<NodeId>) -> NodeId {
        let ftype = node(graph, NodeKind::FuncType, vec![]);
        let body = node(graph, NodeKind::Block, stmts);
        node(graph, NodeKind::FuncLit, vec![ftype, body])
    }

    fn func_decl(graph: &mut NodeGraph, name: &str, recv: Vec<NodeId>, stmts: Vec<NodeId>) -> NodeId {
        let recv = node(graph, NodeKind::FieldList, recv);
        let ident = node(graph, NodeKind::Ident, vec![]);
        let tparams = node(graph, NodeKind::FieldList, vec![]);
        let ftype = node(graph, NodeKind::FuncType, vec![]);
        let body = node(graph, NodeKind::Block, stmts);
        let decl = node(graph, NodeKind::FuncDecl, vec![recv, ident, tparams, ftype, body]);
        graph[decl].ident = name.to_string();
        decl
    }

    #[test]
    fn closures_are_numbered_per_enclosing_function() {
        let mut graph = NodeGraph::new();
        let mut scopes = Scopes::new();
        let uni = universe(&mut scopes);
        let pkg = scopes.push_package(uni, "main");

        let inner = func_lit(&mut graph, vec![]);
        let first = func_lit(&mut graph, vec![]);
        let second = func_lit(&mut graph, vec![inner]);
        let run = func_decl(&mut graph, "Run", vec![], vec![first, second]);
        let top = func_lit(&mut graph, vec![]);
        node(&mut graph, NodeKind::File, vec![run, top]);

        let run_scope = scopes.push(Some(pkg), ScopeKind::Func, Some(run));
        let block = scopes.push(Some(run_scope), ScopeKind::Block, None);
        let second_scope = scopes.push(Some(block), ScopeKind::Func, Some(second));
        let inner_scope = scopes.push(Some(second_scope), ScopeKind::Func, Some(inner));
        let top_scope = scopes.push(Some(pkg), ScopeKind::Func, Some(top));
        graph[run].scope = Some(run_scope);
        graph[second].scope = Some(second_scope);
        graph[inner].scope = Some(inner_scope);
        graph[top].scope = Some(top_scope);

        assert_eq!(func_name(&scopes, &graph, block), "main.Run");
        assert_eq!(func_name(&scopes, &graph, second_scope), "main.Run.func2");
        assert_eq!(func_name(&scopes, &graph, inner_scope), "main.Run.func2.1");
        assert_eq!(func_name(&scopes, &graph, top_scope), "main.main.func1");
        assert_eq!(func_name(&scopes, &graph, pkg), "main.main");
    }

    #[test]
    fn methods_name_their_receiver() {
        let mut graph = NodeGraph::new();
        let mut scopes = Scopes::new();
        let uni = universe(&mut scopes);
        let pkg = scopes.push_package(uni, "geo");

        let point = node(&mut graph, NodeKind::Ident, vec![]);
        graph[point].ident = String::from("Point");
        let ptr = node(&mut graph, NodeKind::PointerType, vec![point]);
        let recv_name = node(&mut graph, NodeKind::Ident, vec![]);
        let field = node(&mut graph, NodeKind::Field, vec![recv_name, ptr]);
        let method = func_decl(&mut graph, "Move", vec![field], vec![]);

        let value_type = node(&mut graph, NodeKind::Ident, vec![]);
        graph[value_type].ident = String::from("Point");
        let value_field = node(&mut graph, NodeKind::Field, vec![value_type]);
        let getter = func_decl(&mut graph, "X", vec![value_field], vec![]);

        let method_scope = scopes.push(Some(pkg), ScopeKind::Func, Some(method));
        let getter_scope = scopes.push(Some(pkg), ScopeKind::Func, Some(getter));
        assert_eq!(func_name(&scopes, &graph, method_scope), "geo.(*Point).Move");
        assert_eq!(func_name(&scopes, &graph, getter_scope), "geo.Point.X");
    }

    #[test]
    fn frames_follow_call_sites_downwards() {
        let mut graph = NodeGraph::new();
        let ids: Vec<NodeId> = (0..5).map(|_| node(&mut graph, NodeKind::Call, vec![])).collect();
        let (top_call, f_decl, f_call, g_decl, panic_site) = (ids[0], ids[1], ids[2], ids[3], ids[4]);

        let records = vec![
            CallRecord::interpreted(Some(top_call), f_decl),
            CallRecord::interpreted(Some(f_call), g_decl),
        ];
        let frames = collect_frames(&records, Some(panic_site));
        assert_eq!(frames, vec![
            StackFrame::Interpreted(panic_site),
            StackFrame::Interpreted(f_call),
            StackFrame::Interpreted(top_call),
        ]);

        // A native function calling back into interpreted code
        let records = vec![
            CallRecord::native(Some(top_call), Arc::from("pkg.Do")),
            CallRecord::interpreted(None, g_decl),
        ];
        let frames = collect_frames(&records, Some(panic_site));
        assert_eq!(frames, vec![
            StackFrame::Interpreted(panic_site),
            StackFrame::Native(Arc::from("pkg.Do")),
            StackFrame::Interpreted(top_call),
        ]);
        assert_eq!(records[0].site.map(handle_of), Some(usize::MAX - top_call.index()));
    }

    #[test]
    fn call_depth_is_bounded() {
        let mut stack = CallStack::new(2);
        let mut graph = NodeGraph::new();
        let decl = node(&mut graph, NodeKind::FuncDecl, vec![]);
        assert!(stack.push(CallRecord::interpreted(None, decl)));
        assert!(stack.push(CallRecord::interpreted(None, decl)));
        assert!(!stack.push(CallRecord::interpreted(None, decl)));
        assert_eq!(stack.records().len(), 2);
        stack.pop();
        assert_eq!(stack.records().len(), 1);
    }

    #[test]
    fn skipped_frames_run_into_host_frames() {
        let frames = vec![StackFrame::Native(Arc::from("host.Caller")), StackFrame::Native(Arc::from("pkg.Do"))];
        let host = [10usize, 20];
        let (f, h) = skip_frames(&frames, &host, 1);
        assert_eq!(f, &frames[1..]);
        assert_eq!(h, &host[..]);
        let (f, h) = skip_frames(&frames, &host, 3);
        assert!(f.is_empty());
        assert_eq!(h, &[20]);
        let (f, h) = skip_frames(&frames, &host, 9);
        assert!(f.is_empty() && h.is_empty());
    }
}
