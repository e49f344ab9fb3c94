use std::io::Write;

use crate::common::*;
use crate::interp::{Context, EvalError, Exports, Interpreter, Options, Panic, Value};

lazy_static::lazy_static! {
    static ref LOGGING: () = {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    };
}

/// Writer collecting everything the interpreted program prints.
#[derive(Clone, Default)]
pub(crate) struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

//------------------------------------------------------------------------------
// Interface for setting up an interpreter
//------------------------------------------------------------------------------

pub(crate) struct Tester {
    test_name: String,
    options: Options,
    exports: Vec<Exports>,
    import_used: bool,
    // Evaluated in order before the source under test, must succeed
    preludes: Vec<String>,
    context: Option<Context>,
}

impl Tester {
    pub(crate) fn new<S: ToString>(test_name: S) -> Self {
        lazy_static::initialize(&LOGGING);
        Self{
            test_name: test_name.to_string(),
            options: Options::default(),
            exports: Vec::new(),
            import_used: false,
            preludes: Vec::new(),
            context: None,
        }
    }

    /// Utility for tests evaluating a single source that must succeed.
    pub(crate) fn new_single_source_expect_ok<T: ToString, S: ToString>(test_name: T, source: S) -> EvalOkTester {
        Self::new(test_name).eval(source).expect_ok()
    }

    /// Utility for tests evaluating a single source that must fail.
    pub(crate) fn new_single_source_expect_err<T: ToString, S: ToString>(test_name: T, source: S) -> EvalErrTester {
        Self::new(test_name).eval(source).expect_err()
    }

    pub(crate) fn with_options<F: FnOnce(Options) -> Options>(mut self, f: F) -> Self {
        self.options = f(self.options);
        self
    }

    pub(crate) fn with_exports(mut self, exports: Exports) -> Self {
        self.exports.push(exports);
        self
    }

    pub(crate) fn with_import_used(mut self) -> Self {
        self.import_used = true;
        self
    }

    pub(crate) fn with_source<S: ToString>(mut self, source: S) -> Self {
        self.preludes.push(source.to_string());
        self
    }

    pub(crate) fn with_context(mut self, ctx: Context) -> Self {
        self.context = Some(ctx);
        self
    }

    pub(crate) fn eval<S: ToString>(self, source: S) -> EvalTesterResult {
        let output = Output::default();
        let interp = Interpreter::new(self.options.with_stdout(output.clone()));
        for exports in self.exports {
            if let Err(err) = interp.use_exports(exports) {
                panic!("[{}] Failed to register exports: {}", self.test_name, err);
            }
        }
        if self.import_used {
            if let Err(err) = interp.import_used() {
                panic!("[{}] Failed to import registered packages: {}", self.test_name, err);
            }
        }
        for (idx, prelude) in self.preludes.iter().enumerate() {
            if let Err(err) = interp.eval(prelude) {
                panic!("[{}] Evaluation of source {} failed:\n{}", self.test_name, idx + 1, err);
            }
        }

        let state = TesterState{ test_name: self.test_name, interp, output };
        let result = match &self.context {
            Some(ctx) => state.interp.eval_with_context(ctx, &source.to_string()),
            None => state.interp.eval(&source.to_string()),
        };
        EvalTesterResult::new(state, result)
    }
}

/// What a tester keeps across evaluations.
pub(crate) struct TesterState {
    test_name: String,
    interp: Interpreter,
    output: Output,
}

pub(crate) enum EvalTesterResult {
    Ok(EvalOkTester),
    Err(EvalErrTester),
}

impl EvalTesterResult {
    fn new(state: TesterState, result: Result<Value, EvalError>) -> Self {
        match result {
            Ok(value) => EvalTesterResult::Ok(EvalOkTester{ state, value }),
            Err(error) => EvalTesterResult::Err(EvalErrTester{ state, error }),
        }
    }

    pub(crate) fn expect_ok(self) -> EvalOkTester {
        match self {
            EvalTesterResult::Ok(ok) => ok,
            EvalTesterResult::Err(err) => {
                println!("DEBUG: Full error:\n{}", &err.error);
                panic!("[{}] Expected evaluation to succeed, but it failed with: {}", err.state.test_name, err.error);
            }
        }
    }

    pub(crate) fn expect_err(self) -> EvalErrTester {
        match self {
            EvalTesterResult::Ok(ok) => {
                panic!("[{}] Expected evaluation to fail, but it returned {:?}", ok.state.test_name, ok.value);
            }
            EvalTesterResult::Err(err) => err,
        }
    }
}

//------------------------------------------------------------------------------
// Interface for successful evaluation
//------------------------------------------------------------------------------

pub(crate) struct EvalOkTester {
    state: TesterState,
    value: Value,
}

impl EvalOkTester {
    pub(crate) fn assert_value<V: Into<Value>>(self, expected: V) -> Self {
        let expected = expected.into();
        assert!(
            self.value.equals(&expected),
            "[{}] Expected value {:?}, but got {:?}", self.state.test_name, expected, self.value
        );
        self
    }

    pub(crate) fn assert_nil(self) -> Self {
        assert!(self.value.is_nil(), "[{}] Expected nil, but got {:?}", self.state.test_name, self.value);
        self
    }

    pub(crate) fn assert_text(self, expected: &str) -> Self {
        let text = self.value.to_string();
        pretty_assertions::assert_eq!(text, expected, "[{}] Unexpected value", self.state.test_name);
        self
    }

    pub(crate) fn assert_text_has(self, pattern: &str) -> Self {
        let text = self.value.to_string();
        assert!(
            text.contains(pattern),
            "[{}] Expected value to contain '{}', but it is:\n{}", self.state.test_name, pattern, text
        );
        self
    }

    pub(crate) fn assert_output(self, expected: &str) -> Self {
        let output = self.state.output.text();
        pretty_assertions::assert_eq!(output, expected, "[{}] Unexpected output", self.state.test_name);
        self
    }

    pub(crate) fn for_value<F: FnOnce(&Value)>(self, f: F) -> Self {
        f(&self.value);
        self
    }

    pub(crate) fn for_interpreter<F: FnOnce(&Interpreter)>(self, f: F) -> Self {
        f(&self.state.interp);
        self
    }

    /// Evaluates more source on the same interpreter.
    pub(crate) fn eval<S: ToString>(self, source: S) -> EvalTesterResult {
        let result = self.state.interp.eval(&source.to_string());
        EvalTesterResult::new(self.state, result)
    }
}

//------------------------------------------------------------------------------
// Interface for failed evaluation
//------------------------------------------------------------------------------

pub(crate) struct EvalErrTester {
    state: TesterState,
    error: EvalError,
}

impl EvalErrTester {
    pub(crate) fn assert_msg_has(self, pattern: &str) -> Self {
        let msg = self.error.to_string();
        assert!(
            msg.contains(pattern),
            "[{}] Expected error to contain '{}', but it is:\n{}", self.state.test_name, pattern, msg
        );
        self
    }

    pub(crate) fn assert_compile_error(self, message: &str) -> Self {
        match self.error.compile_message() {
            Some(msg) => pretty_assertions::assert_eq!(msg, message, "[{}] Unexpected compile error", self.state.test_name),
            None => panic!("[{}] Expected a compile error, but got: {}", self.state.test_name, self.error),
        }
        self
    }

    pub(crate) fn assert_cancelled(self) -> Self {
        assert!(
            self.error.is_cancellation(),
            "[{}] Expected a cancellation, but got: {}", self.state.test_name, self.error
        );
        self
    }

    pub(crate) fn assert_output(self, expected: &str) -> Self {
        let output = self.state.output.text();
        pretty_assertions::assert_eq!(output, expected, "[{}] Unexpected output", self.state.test_name);
        self
    }

    pub(crate) fn for_interpreter<F: FnOnce(&Interpreter)>(self, f: F) -> Self {
        f(&self.state.interp);
        self
    }

    /// Runs `f` on the panic record of an unrecovered panic.
    pub(crate) fn for_panic<F: FnOnce(&Interpreter, &Arc<Panic>)>(self, f: F) -> Self {
        match self.error.panic() {
            Some(panic) => f(&self.state.interp, panic),
            None => panic!("[{}] Expected a panic, but got: {}", self.state.test_name, self.error),
        }
        self
    }

    pub(crate) fn assert_panic_value<V: Into<Value>>(self, expected: V) -> Self {
        let expected = expected.into();
        let test_name = self.state.test_name.clone();
        self.for_panic(|_, panic| {
            assert!(
                panic.value.equals(&expected) || panic.value.to_string() == expected.to_string(),
                "[{}] Expected panic value {:?}, but got {:?}", test_name, expected, panic.value
            );
        })
    }

    /// Evaluates more source on the same interpreter.
    pub(crate) fn eval<S: ToString>(self, source: S) -> EvalTesterResult {
        let result = self.state.interp.eval(&source.to_string());
        EvalTesterResult::new(self.state, result)
    }
}
