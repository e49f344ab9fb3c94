use crossbeam::channel::Receiver;

use crate::common::*;
use crate::interp::ast::NodeId;
use super::value::Value;

/// Call captured by a `defer` statement: callee and arguments are evaluated
/// when the statement runs.
#[derive(Clone)]
pub(crate) struct DeferredCall {
    pub site: NodeId,
    pub fun: Value,
    pub args: Vec<Value>,
    /// The call is a builtin such as `close(ch)`, executed through the
    /// builtin action of `site`
    pub builtin: bool,
}

/// Activation record of an interpreted function (or of the package level
/// code, for the root frame).
pub(crate) struct Frame {
    /// Run id of the evaluation this frame belongs to
    pub id: AtomicU64,
    /// Frame of the package level variables, `None` for the root itself
    pub root: Option<Arc<Frame>>,
    /// Lexically enclosing frame
    pub anc: Option<Arc<Frame>>,
    pub data: RwLock<Vec<Value>>,
    pub deferred: Mutex<Vec<DeferredCall>>,
    /// Panic value offered to `recover` while deferred calls run
    pub recovered: Mutex<Option<Value>>,
    /// Set on frames of deferred calls: the frame whose panic they may recover
    pub defer_parent: Option<Arc<Frame>>,
    /// Closed when the evaluation this frame belongs to is cancelled
    pub done: Receiver<()>,
}

impl Frame {
    pub fn new_root(id: u64, done: Receiver<()>) -> Self {
        Self{
            id: AtomicU64::new(id),
            root: None,
            anc: None,
            data: RwLock::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
            recovered: Mutex::new(None),
            defer_parent: None,
            done,
        }
    }

    pub fn new(
        root: &Arc<Frame>, anc: Option<Arc<Frame>>, data: Vec<Value>,
        id: u64, done: Receiver<()>, defer_parent: Option<Arc<Frame>>,
    ) -> Self {
        Self{
            id: AtomicU64::new(id),
            root: Some(root.clone()),
            anc,
            data: RwLock::new(data),
            deferred: Mutex::new(Vec::new()),
            recovered: Mutex::new(None),
            defer_parent,
            done,
        }
    }

    /// Clone for a concurrent task: slot data is copied, the ancestor chain
    /// and the cancellation signal are shared.
    pub fn clone_frame(&self) -> Self {
        Self{
            id: AtomicU64::new(self.id.load(Ordering::SeqCst)),
            root: self.root.clone(),
            anc: self.anc.clone(),
            data: RwLock::new(self.data.read().clone()),
            deferred: Mutex::new(Vec::new()),
            recovered: Mutex::new(None),
            defer_parent: None,
            done: self.done.clone(),
        }
    }

    /// Frame `level` steps up the lexical chain.
    pub fn at_level(self: &Arc<Frame>, level: usize) -> Option<Arc<Frame>> {
        let mut cur = self.clone();
        for _ in 0..level {
            cur = cur.anc.clone()?;
        }
        Some(cur)
    }

    /// The root frame holding package level variables.
    pub fn globals(self: &Arc<Frame>) -> Arc<Frame> {
        match &self.root {
            Some(root) => root.clone(),
            None => self.clone(),
        }
    }

    pub fn get(&self, idx: usize) -> Value {
        self.data.read().get(idx).cloned().unwrap_or(Value::Nil)
    }

    pub fn set(&self, idx: usize, value: Value) {
        let mut data = self.data.write();
        if idx >= data.len() {
            data.resize(idx + 1, Value::Nil);
        }
        data[idx] = value;
    }

    /// Grows the root frame to hold newly declared package level variables.
    pub fn ensure_len(&self, zeros: &[Value]) {
        let mut data = self.data.write();
        if data.len() < zeros.len() {
            let start = data.len();
            data.extend_from_slice(&zeros[start..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloned_frame_slots_are_isolated() {
        let (_tx, done) = crossbeam::channel::bounded::<()>(0);
        let root = Arc::new(Frame::new_root(1, done.clone()));
        let parent = Arc::new(Frame::new(&root, None, vec![Value::Int(1)], 1, done.clone(), None));
        let frame = Frame::new(&root, Some(parent.clone()), vec![Value::Int(10), Value::from("a")], 1, done, None);

        let clone = frame.clone_frame();
        clone.set(0, Value::Int(20));
        clone.set(1, Value::from("b"));

        assert_eq!(frame.get(0).as_int(), Some(10));
        assert_eq!(frame.get(1).as_str(), Some("a"));
        assert_eq!(clone.get(0).as_int(), Some(20));
        // Ancestors are shared, not copied
        assert!(Arc::ptr_eq(frame.anc.as_ref().unwrap(), clone.anc.as_ref().unwrap()));
        parent.set(0, Value::Int(2));
        assert_eq!(clone.anc.as_ref().unwrap().get(0).as_int(), Some(2));
    }

    #[test]
    fn root_frame_grows_in_place() {
        let (_tx, done) = crossbeam::channel::bounded::<()>(0);
        let root = Arc::new(Frame::new_root(0, done));
        root.ensure_len(&[Value::Int(0)]);
        root.set(0, Value::Int(4));
        root.ensure_len(&[Value::Int(0), Value::Bool(false)]);
        assert_eq!(root.get(0).as_int(), Some(4));
        assert_eq!(root.get(1).as_bool(), Some(false));
        assert!(Arc::ptr_eq(&root.globals(), &root));
    }
}
