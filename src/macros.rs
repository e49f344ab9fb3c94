// Per-node execution tracing. Compiled out unless the `exec_trace` feature is
// enabled.
#[cfg(feature = "exec_trace")]
macro_rules! exec_log {
    ($($arg:tt)*) => {{
        tracing::trace!(target: "gointerp::exec", $($arg)*);
    }};
}
#[cfg(not(feature = "exec_trace"))]
macro_rules! exec_log {
    ($($arg:tt)*) => {{}};
}

// Logs under the compiler target
macro_rules! compile_log {
    ($($arg:tt)*) => {{
        tracing::debug!(target: "gointerp::compile", $($arg)*);
    }};
}
