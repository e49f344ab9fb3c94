use crate::common::*;
use super::ast::{NodeGraph, NodeId};
use super::eval::value::Value;
use super::input_source::{InputPosition, InputSource, ParseError};
use super::scope::{universe, ScopeId, Scopes};
use super::types::{NamedType, Type};

/// A compiled unit of source text: an evaluated snippet, or the source of a
/// native generic function.
pub(crate) struct Unit {
    pub name: String,
    pub source: InputSource,
}

/// Everything compiled so far. Compilation works on a private copy which is
/// published as the new snapshot once it succeeds; running code keeps using
/// the snapshot it started with. Node and scope ids are stable across
/// snapshots because both arenas only grow.
#[derive(Clone)]
pub(crate) struct Program {
    pub nodes: NodeGraph,
    pub scopes: Scopes,
    pub units: Vec<Arc<Unit>>,
    pub named: Vec<NamedType>,
    /// Methods by (named type id, method name)
    pub methods: HashMap<(u32, String), NodeId>,
    /// Types of the package level variables, indexed like the root frame
    pub globals: Vec<Type>,
    /// Initial content of each root frame slot
    pub global_init: Vec<Value>,
    /// Scopes of imported native packages by registration key
    pub packages: HashMap<String, ScopeId>,
    /// Monomorphization cache: (template, type arguments) to the
    /// instantiated declaration
    pub instances: HashMap<(NodeId, Vec<Type>), NodeId>,
    pub universe: ScopeId,
    /// Package scope of the evaluated code
    pub main: ScopeId,
}

impl Program {
    pub fn new() -> Self {
        let mut scopes = Scopes::new();
        let universe = universe(&mut scopes);
        let main = scopes.push_package(universe, "main");
        Self{
            nodes: NodeGraph::new(),
            scopes,
            units: Vec::new(),
            named: Vec::new(),
            methods: HashMap::new(),
            globals: Vec::new(),
            global_init: Vec::new(),
            packages: HashMap::new(),
            instances: HashMap::new(),
            universe,
            main,
        }
    }

    pub fn add_unit(&mut self, name: String, source: InputSource) -> u32 {
        let id = self.units.len() as u32;
        self.units.push(Arc::new(Unit{ name, source }));
        id
    }

    pub fn unit_name(&self, unit: u32) -> &str {
        self.units.get(unit as usize).map(|u| u.name.as_str()).unwrap_or("?")
    }

    pub fn error_at(&self, node: NodeId, msg: String) -> ParseError {
        let n = &self.nodes[node];
        self.error_at_pos(n.unit, n.pos, msg)
    }

    pub fn error_at_pos(&self, unit: u32, pos: InputPosition, msg: String) -> ParseError {
        match self.units.get(unit as usize) {
            Some(u) => ParseError::new_error_at_pos(&u.source, pos, msg),
            None => ParseError::new_detached("?", msg),
        }
    }

    pub fn alloc_global(&mut self, typ: Type, init: Value) -> usize {
        self.globals.push(typ);
        self.global_init.push(init);
        self.globals.len() - 1
    }

    /// `file:line:col` of a node.
    pub fn position(&self, node: NodeId) -> String {
        let n = &self.nodes[node];
        format!("{}:{}:{}", self.unit_name(n.unit), n.pos.line, n.pos.column)
    }
}
