use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};
use crossbeam::select;
use std::sync::atomic::AtomicBool;

use crate::common::*;
use super::value::Value;

/// Outcome of a blocking channel operation.
pub(crate) enum ChanOutcome<T> {
    Ready(T),
    /// Send on (or close of) a closed channel
    Closed,
    /// The evaluation was cancelled while blocked
    Cancelled,
}

struct ChanInner {
    tx: Sender<Value>,
    rx: Receiver<Value>,
    closed: AtomicBool,
    // Dropping the sender wakes every operation blocked on the channel
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    cap: usize,
}

/// Interpreted channel. Unbuffered channels are zero capacity crossbeam
/// channels, so a send completes only when a receiver takes the value.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChanInner>,
}

impl Channel {
    pub fn new(cap: usize) -> Self {
        let (tx, rx) = bounded(cap);
        let (close_tx, close_rx) = bounded(0);
        Channel{ inner: Arc::new(ChanInner{
            tx, rx,
            closed: AtomicBool::new(false),
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            cap,
        }) }
    }

    pub fn cap(&self) -> usize {
        self.inner.cap
    }

    pub fn len(&self) -> usize {
        self.inner.rx.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn same(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Closes the channel, returns false if it was closed already.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.close_tx.lock().take();
        true
    }

    pub(crate) fn send(&self, value: Value, done: Option<&Receiver<()>>) -> ChanOutcome<()> {
        if self.is_closed() {
            return ChanOutcome::Closed;
        }
        let inner = &self.inner;
        match done {
            Some(done) => select! {
                send(inner.tx, value) -> _ => ChanOutcome::Ready(()),
                recv(inner.close_rx) -> _ => ChanOutcome::Closed,
                recv(done) -> _ => ChanOutcome::Cancelled,
            },
            None => select! {
                send(inner.tx, value) -> _ => ChanOutcome::Ready(()),
                recv(inner.close_rx) -> _ => ChanOutcome::Closed,
            },
        }
    }

    /// Receives a value, `None` once the channel is closed and drained.
    pub(crate) fn recv(&self, done: Option<&Receiver<()>>) -> ChanOutcome<Option<Value>> {
        let inner = &self.inner;
        let drained = || match inner.rx.try_recv() {
            Ok(v) => ChanOutcome::Ready(Some(v)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => ChanOutcome::Ready(None),
        };
        match done {
            Some(done) => select! {
                recv(inner.rx) -> v => ChanOutcome::Ready(v.ok()),
                recv(inner.close_rx) -> _ => drained(),
                recv(done) -> _ => ChanOutcome::Cancelled,
            },
            None => select! {
                recv(inner.rx) -> v => ChanOutcome::Ready(v.ok()),
                recv(inner.close_rx) -> _ => drained(),
            },
        }
    }
}

/// Operations on a nil channel block until the evaluation is cancelled.
pub(crate) fn block_forever(done: &Receiver<()>) -> ChanOutcome<()> {
    let _ = done.recv();
    ChanOutcome::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_values_survive_close() {
        let ch = Channel::new(2);
        assert!(matches!(ch.send(Value::Int(1), None), ChanOutcome::Ready(())));
        assert!(!ch.is_closed());
        assert!(ch.close());
        assert!(ch.is_closed());
        assert!(!ch.close());
        assert!(matches!(ch.send(Value::Int(2), None), ChanOutcome::Closed));
        match ch.recv(None) {
            ChanOutcome::Ready(Some(v)) => assert_eq!(v.as_int(), Some(1)),
            _ => panic!("expected buffered value"),
        }
        assert!(matches!(ch.recv(None), ChanOutcome::Ready(None)));
    }

    #[test]
    fn cancellation_unblocks_receive() {
        let ch = Channel::new(0);
        let (done_tx, done_rx) = bounded::<()>(0);
        crossbeam_utils::thread::scope(|s| {
            s.spawn(|_| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                drop(done_tx);
            });
            assert!(matches!(ch.recv(Some(&done_rx)), ChanOutcome::Cancelled));
        }).unwrap();
    }
}
