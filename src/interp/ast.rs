use std::ops::{Index, IndexMut};

use crate::common::*;
use super::eval::action::{Action, Operand};
use super::input_source::InputPosition;
use super::scope::{ScopeId, Symbol};
use super::types::Type;

pub type NodeId = Id<Node>;

/// Closed set of node kinds. The same node serves as syntax (through its
/// children) and as a control flow vertex (through `start`, `tnext` and
/// `fnext`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    // Units and declarations
    File,           // [package-level declarations and statements...]
    Import,         // ident: alias (or "." / ""), lit: path
    FuncDecl,       // [recv FieldList, name Ident, tparams FieldList, FuncType, body Block]
    FuncLit,        // [FuncType, body Block]
    TypeSpec,       // [name Ident, tparams FieldList, type]
    VarDecl,        // [names..., type or Empty, values...]
    ConstDecl,      // [names..., type or Empty, values...]
    // Type expressions
    FuncType,       // [params FieldList, results FieldList]
    FieldList,      // [Field...]
    Field,          // [names..., type]
    PointerType,    // [elem]
    SliceType,      // [elem]
    ChanType,       // [elem], op: direction
    StructType,     // [Field...]
    InterfaceType,  // [embedded constraint or method names...]
    Ellipsis,       // [elem], variadic parameter type
    // Statements
    Block,          // [stmts...]
    Define,         // [lhs..., rhs...], nleft/nright
    Assign,         // [lhs..., rhs...], nleft/nright
    OpAssign,       // [lhs, rhs], op
    IncDec,         // [operand], op
    If,             // [init or Empty, cond, body Block, else or Empty]
    For,            // [init or Empty, cond or Empty, post or Empty, body Block]
    Break,
    Continue,
    Return,         // [values...]
    Defer,          // [Call]
    Go,             // [Call]
    Send,           // [chan, value]
    ExprStmt,       // [expr]
    Empty,
    // Expressions
    Ident,
    BasicLit,       // lit
    CompositeLit,   // [type, elems or KeyValue...]
    KeyValue,       // [key, value]
    Selector,       // [x, sel Ident]
    Index,          // [x, index]
    IndexList,      // [x, type arguments...]
    SliceExpr,      // [x, low or Empty, high or Empty]
    Call,           // [fun, args...], ellipsis
    Star,           // [x], dereference (or pointer type in a conversion)
    Unary,          // [x], op
    Binary,         // [x, y], op
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    None,
    // Arithmetic and bitwise
    Add, Sub, Mul, Quo, Rem,
    And, Or, Xor, Shl, Shr, AndNot,
    // Logical
    LAnd, LOr, Not,
    // Comparison
    Eql, Neq, Lss, Leq, Gtr, Geq,
    // Unary only
    Neg, Pos, BitNot, Arrow, Addr,
    // Increment and decrement
    Inc, Dec,
    // Channel direction on ChanType
    SendOnly, RecvOnly,
}

impl Op {
    pub fn is_comparison(&self) -> bool {
        matches!(self, Op::Eql | Op::Neq | Op::Lss | Op::Leq | Op::Gtr | Op::Geq)
    }

    pub fn is_shift(&self) -> bool {
        matches!(self, Op::Shl | Op::Shr)
    }

    pub fn token(&self) -> &'static str {
        match self {
            Op::None => "",
            Op::Add | Op::Pos => "+",
            Op::Sub | Op::Neg => "-",
            Op::Mul => "*",
            Op::Quo => "/",
            Op::Rem => "%",
            Op::And | Op::Addr => "&",
            Op::Or => "|",
            Op::Xor | Op::BitNot => "^",
            Op::Shl => "<<",
            Op::Shr => ">>",
            Op::AndNot => "&^",
            Op::LAnd => "&&",
            Op::LOr => "||",
            Op::Not => "!",
            Op::Eql => "==",
            Op::Neq => "!=",
            Op::Lss => "<",
            Op::Leq => "<=",
            Op::Gtr => ">",
            Op::Geq => ">=",
            Op::Arrow | Op::SendOnly | Op::RecvOnly => "<-",
            Op::Inc => "++",
            Op::Dec => "--",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i128),
    Float(f64),
    Rune(char),
    String(Arc<str>),
}

/// Frame layout of a function: result slots first, then the receiver and
/// parameters, then locals and temporaries.
#[derive(Debug, Clone, Default)]
pub struct FrameLayout {
    pub results: usize,
    pub params: usize,
    pub types: Vec<Type>,
    pub entry: Option<NodeId>,
}

impl FrameLayout {
    pub fn size(&self) -> usize {
        self.types.len()
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub this: NodeId,
    pub kind: NodeKind,
    pub anc: Option<NodeId>,
    pub children: Vec<NodeId>,
    // Control flow links
    pub start: Option<NodeId>,
    pub tnext: Option<NodeId>,
    pub fnext: Option<NodeId>,
    // Source
    pub unit: u32,
    pub pos: InputPosition,
    pub ident: String,
    pub op: Op,
    pub lit: Option<Literal>,
    pub nleft: usize,
    pub nright: usize,
    pub ellipsis: bool,
    // Static metadata, filled in by the compiler
    pub typ: Option<Type>,
    pub sym: Option<Symbol>,
    pub scope: Option<ScopeId>,
    pub findex: Option<usize>,
    pub level: usize,
    pub global: bool,
    pub value: Option<Operand>,
    pub params: Vec<NodeId>,
    pub frame: Option<FrameLayout>,
    pub gen: &'static str,
    pub action: Action,
}

impl Node {
    fn new(this: NodeId, kind: NodeKind, unit: u32, pos: InputPosition) -> Self {
        Self{
            this, kind,
            anc: None,
            children: Vec::new(),
            start: None,
            tnext: None,
            fnext: None,
            unit, pos,
            ident: String::new(),
            op: Op::None,
            lit: None,
            nleft: 0,
            nright: 0,
            ellipsis: false,
            typ: None,
            sym: None,
            scope: None,
            findex: None,
            level: 0,
            global: false,
            value: None,
            params: Vec::new(),
            frame: None,
            gen: "nop",
            action: Action::Nop,
        }
    }

    pub fn child(&self, idx: usize) -> NodeId {
        self.children[idx]
    }

    /// Whether the node takes part in execution. Static leaves (identifiers,
    /// literals, types) are read through their operand instead.
    pub fn is_dynamic(&self) -> bool {
        self.start.is_some()
    }
}

pub(crate) enum Visit {
    Children,
    Skip,
}

/// Depth-first traversal with a pre-visit callback, which chooses the
/// children to descend into, and a post-visit callback.
pub(crate) trait Visitor {
    type Error;

    fn graph(&self) -> &NodeGraph;

    fn pre(&mut self, _id: NodeId) -> Result<Visit, Self::Error> {
        Ok(Visit::Children)
    }

    fn post(&mut self, _id: NodeId) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Stack space kept free before recursing further into deeply nested trees.
const RED_ZONE: usize = 100 * 1024;
const STACK_PER_RECURSION: usize = 1024 * 1024;

pub(crate) fn walk<V: Visitor>(v: &mut V, root: NodeId) -> Result<(), V::Error> {
    let children = match v.pre(root)? {
        Visit::Children => v.graph()[root].children.clone(),
        Visit::Skip => return Ok(()),
    };
    for child in children {
        stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, || walk(v, child))?;
    }
    v.post(root)
}

/// Arena of all nodes of a program. Nodes are never removed, so ids remain
/// valid in every later snapshot of the graph.
#[derive(Clone, Default)]
pub struct NodeGraph {
    nodes: Arena<Node>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self{ nodes: Arena::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn alloc(&mut self, kind: NodeKind, unit: u32, pos: InputPosition) -> NodeId {
        self.nodes.alloc_with_id(|id| Node::new(id, kind, unit, pos))
    }

    #[cfg(test)]
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child].anc = Some(parent);
        self.nodes[parent].children.push(child);
    }

    pub fn set_children(&mut self, parent: NodeId, children: Vec<NodeId>) {
        for child in children.iter() {
            self.nodes[*child].anc = Some(parent);
        }
        self.nodes[parent].children = children;
    }

    /// Walks the subtree rooted at `root` in depth-first order without
    /// mutation. `f` returns whether to descend into the node's children.
    pub fn dfs(&self, root: NodeId, f: &mut dyn FnMut(&Node) -> bool) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if f(node) {
                stack.extend(node.children.iter().rev());
            }
        }
    }

    /// Nearest ancestor (excluding the node itself) matching the predicate.
    pub fn find_anc(&self, id: NodeId, pred: impl Fn(&Node) -> bool) -> Option<NodeId> {
        let mut cur = self.nodes[id].anc;
        while let Some(anc) = cur {
            if pred(&self.nodes[anc]) {
                return Some(anc);
            }
            cur = self.nodes[anc].anc;
        }
        None
    }

    /// Structural copy of the subtree rooted at `root`. All links between
    /// nodes of the subtree are remapped to the copies, links leaving the
    /// subtree are kept. `remap` receives the old to new id mapping.
    pub fn clone_subtree(&mut self, root: NodeId, remap: &mut HashMap<NodeId, NodeId>) -> NodeId {
        let mut order = Vec::new();
        self.dfs(root, &mut |n| {
            order.push(n.this);
            true
        });

        for old in order.iter() {
            let copy = self.nodes[*old].clone();
            let new = self.nodes.alloc_with_id(|id| Node{ this: id, ..copy });
            remap.insert(*old, new);
        }

        let map = |id: Option<NodeId>, remap: &HashMap<NodeId, NodeId>| {
            id.map(|id| remap.get(&id).copied().unwrap_or(id))
        };
        for old in order.iter() {
            let new = remap[old];
            let node = &mut self.nodes[new];
            for child in node.children.iter_mut() {
                *child = remap.get(child).copied().unwrap_or(*child);
            }
            for param in node.params.iter_mut() {
                *param = remap.get(param).copied().unwrap_or(*param);
            }
            node.anc = map(node.anc, remap);
            node.start = map(node.start, remap);
            node.tnext = map(node.tnext, remap);
            node.fnext = map(node.fnext, remap);
        }

        remap[&root]
    }
}

impl Index<NodeId> for NodeGraph {
    type Output = Node;
    fn index(&self, id: NodeId) -> &Self::Output {
        &self.nodes[id]
    }
}

impl IndexMut<NodeId> for NodeGraph {
    fn index_mut(&mut self, id: NodeId) -> &mut Self::Output {
        &mut self.nodes[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(graph: &mut NodeGraph, kind: NodeKind, ident: &str) -> NodeId {
        let id = graph.alloc(kind, 0, InputPosition::default());
        graph[id].ident = ident.to_string();
        id
    }

    #[test]
    fn clone_subtree_remaps_internal_links_only() {
        let mut graph = NodeGraph::new();
        let outside = leaf(&mut graph, NodeKind::Block, "");
        let call = leaf(&mut graph, NodeKind::Call, "");
        let fun = leaf(&mut graph, NodeKind::Ident, "f");
        let arg = leaf(&mut graph, NodeKind::Ident, "x");
        graph.add_child(outside, call);
        graph.set_children(call, vec![fun, arg]);
        graph[call].start = Some(fun);
        graph[fun].tnext = Some(call);
        graph[call].tnext = Some(outside);

        let mut remap = HashMap::new();
        let copy = graph.clone_subtree(call, &mut remap);

        assert_ne!(copy, call);
        assert_eq!(remap.len(), 3);
        let new_fun = remap[&fun];
        assert_eq!(graph[copy].children, vec![new_fun, remap[&arg]]);
        assert_eq!(graph[copy].start, Some(new_fun));
        assert_eq!(graph[new_fun].tnext, Some(copy));
        assert_eq!(graph[new_fun].anc, Some(copy));
        // Links leaving the subtree are kept
        assert_eq!(graph[copy].tnext, Some(outside));
        assert_eq!(graph[copy].anc, Some(outside));
        // The original is untouched
        assert_eq!(graph[call].children, vec![fun, arg]);
        assert_eq!(graph[fun].ident, "f");
    }

    #[test]
    fn dfs_can_prune() {
        let mut graph = NodeGraph::new();
        let root = leaf(&mut graph, NodeKind::Block, "");
        let lit = leaf(&mut graph, NodeKind::FuncLit, "");
        let inner = leaf(&mut graph, NodeKind::Ident, "inner");
        let after = leaf(&mut graph, NodeKind::Ident, "after");
        graph.set_children(root, vec![lit, after]);
        graph.add_child(lit, inner);

        let mut seen = Vec::new();
        graph.dfs(root, &mut |n| {
            seen.push(n.ident.clone());
            n.kind != NodeKind::FuncLit
        });
        assert_eq!(seen, vec!["", "", "after"]);
    }
}
