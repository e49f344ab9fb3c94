/// context.rs
///
/// Cancellation contexts for `Interpreter::eval_with_context`. A context is
/// done once any of its cancel signals fired or its deadline passed; derived
/// contexts inherit every signal and the earliest deadline of their parent.

use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Select, Sender, TryRecvError};

use crate::common::*;
use super::error::EvalError;

#[derive(Clone, Default)]
pub struct Context {
    cancels: Vec<Arc<CancelSignal>>,
    deadline: Option<Instant>,
}

/// One-shot broadcast: `rx` is disconnected once the sender is taken.
struct CancelSignal {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

/// Cancels the context it was created with. Dropping the handle does not.
#[derive(Clone)]
pub struct CancelHandle {
    signal: Arc<CancelSignal>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.signal.tx.lock().take();
    }
}

impl Context {
    /// A context that is never done.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel(parent: &Context) -> (Context, CancelHandle) {
        let (tx, rx) = channel::bounded(0);
        let signal = Arc::new(CancelSignal{ tx: Mutex::new(Some(tx)), rx });
        let mut ctx = parent.clone();
        ctx.cancels.push(signal.clone());
        (ctx, CancelHandle{ signal })
    }

    pub fn with_deadline(parent: &Context, deadline: Instant) -> Context {
        let mut ctx = parent.clone();
        ctx.deadline = Some(match parent.deadline {
            Some(earlier) if earlier < deadline => earlier,
            _ => deadline,
        });
        ctx
    }

    pub fn with_timeout(parent: &Context, timeout: Duration) -> Context {
        Self::with_deadline(parent, Instant::now() + timeout)
    }

    /// Whether the context can never be done.
    pub(crate) fn is_background(&self) -> bool {
        self.cancels.is_empty() && self.deadline.is_none()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, or `None` while it is not.
    pub fn err(&self) -> Option<EvalError> {
        let cancelled = self.cancels.iter().any(|c| matches!(c.rx.try_recv(), Err(TryRecvError::Disconnected)));
        if cancelled {
            return Some(EvalError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(EvalError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Waits for a message on `rx` unless the context is done first. The
    /// message is `None` if the sender went away.
    pub(crate) fn wait<T>(&self, rx: &Receiver<T>) -> Result<Option<T>, EvalError> {
        let timer = self.deadline.map(channel::at);
        let mut sel = Select::new();
        let result = sel.recv(rx);
        let cancels: Vec<usize> = self.cancels.iter().map(|c| sel.recv(&c.rx)).collect();
        let timeout = timer.as_ref().map(|t| sel.recv(t));

        let op = sel.select();
        let index = op.index();
        if index == result {
            return Ok(op.recv(rx).ok());
        }
        if let Some(pos) = cancels.iter().position(|i| *i == index) {
            let _ = op.recv(&self.cancels[pos].rx);
            return Err(EvalError::Cancelled);
        }
        match (timeout, timer.as_ref()) {
            (Some(i), Some(t)) if i == index => {
                let _ = op.recv(t);
                Err(EvalError::DeadlineExceeded)
            }
            _ => unreachable!("select returned an operation that was not registered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_inherited() {
        let (parent, cancel) = Context::with_cancel(&Context::background());
        let child = Context::with_timeout(&parent, Duration::from_secs(60));
        assert!(child.err().is_none());
        cancel.cancel();
        assert!(matches!(parent.err(), Some(EvalError::Cancelled)));
        assert!(matches!(child.err(), Some(EvalError::Cancelled)));
    }

    #[test]
    fn dropping_the_handle_does_not_cancel() {
        let (ctx, cancel) = Context::with_cancel(&Context::background());
        drop(cancel);
        assert!(ctx.err().is_none());

        let (ctx, _) = Context::with_cancel(&Context::background());
        let (tx, rx) = channel::bounded(1);
        tx.send(1).unwrap();
        assert_eq!(ctx.wait(&rx).unwrap(), Some(1));
    }

    #[test]
    fn earliest_deadline_wins() {
        let parent = Context::with_timeout(&Context::background(), Duration::from_millis(10));
        let child = Context::with_timeout(&parent, Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let (_tx, rx) = channel::bounded::<()>(0);
        assert!(matches!(child.wait(&rx), Err(EvalError::DeadlineExceeded)));
    }

    #[test]
    fn wait_returns_the_message() {
        let (ctx, _cancel) = Context::with_cancel(&Context::background());
        let (tx, rx) = channel::bounded(1);
        tx.send(5).unwrap();
        assert_eq!(ctx.wait(&rx).unwrap(), Some(5));
        drop(tx);
        assert_eq!(ctx.wait(&rx).unwrap(), None);
    }
}
