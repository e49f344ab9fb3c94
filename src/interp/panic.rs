use crate::common::*;
use super::eval::value::Value;

/// Record of an unrecovered panic of interpreted code.
#[derive(Debug, Clone)]
pub struct Panic {
    /// Value passed to `panic`, or the runtime error
    pub value: Value,
    /// Host program counters at the moment the record was created
    pub callers: Vec<usize>,
    /// Host stack at the moment the record was created
    pub stack: String,
    /// Handles of the interpreted frames, then the host frames below the
    /// interpreter
    pub filtered_callers: Vec<usize>,
    /// Source level stack trace, see `Panic::fmt`
    pub filtered_stack: String,
}

impl Display for Panic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}\n{}\n", self.value, self.filtered_stack)
    }
}

impl std::error::Error for Panic {}

/// Panics that crossed an evaluation boundary and were not asked for yet.
#[derive(Default)]
pub(crate) struct Backlog {
    records: Mutex<Vec<Arc<Panic>>>,
}

impl Backlog {
    /// Stores a record unless the latest one is for the same value. Returns
    /// the stored record.
    pub fn record(&self, panic: Panic) -> Arc<Panic> {
        let mut records = self.records.lock();
        if let Some(last) = records.last() {
            if last.value.same_identity(&panic.value) {
                return last.clone();
            }
        }
        let panic = Arc::new(panic);
        records.push(panic.clone());
        tracing::debug!(count = records.len(), "panic recorded");
        panic
    }

    /// Most recent record for the value. The backlog is cleared either way.
    pub fn recover_nearest(&self, value: &Value) -> Option<Arc<Panic>> {
        let mut records = self.records.lock();
        let found = records.iter().rev().find(|p| p.value.same_identity(value)).cloned();
        records.clear();
        found
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.records.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> Panic {
        Panic{
            value,
            callers: Vec::new(),
            stack: String::new(),
            filtered_callers: Vec::new(),
            filtered_stack: String::from("goroutine 1 [running]:"),
        }
    }

    #[test]
    fn repeated_value_is_recorded_once() {
        let backlog = Backlog::default();
        let err = Value::error("boom");
        let first = backlog.record(record(err.clone()));
        let again = backlog.record(record(err.clone()));
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(backlog.len(), 1);

        // An equal message is a different error
        backlog.record(record(Value::error("boom")));
        assert_eq!(backlog.len(), 2);
    }

    #[test]
    fn lookup_finds_latest_match_and_clears() {
        let backlog = Backlog::default();
        let err = Value::error("boom");
        backlog.record(record(err.clone()));
        backlog.record(record(Value::from("other")));
        let newest = backlog.record(record(err.clone()));

        let found = backlog.recover_nearest(&err).unwrap();
        assert!(Arc::ptr_eq(&found, &newest));
        assert_eq!(backlog.len(), 0);
        assert!(backlog.recover_nearest(&err).is_none());
    }

    #[test]
    fn display_shows_value_and_stack() {
        let p = record(Value::from("boom"));
        assert_eq!(p.to_string(), "panic: boom\ngoroutine 1 [running]:\n");
    }
}
