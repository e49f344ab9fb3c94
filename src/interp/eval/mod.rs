pub(crate) mod action;
pub(crate) mod builtins;
pub(crate) mod channel;
pub(crate) mod executor;
pub(crate) mod frame;
pub(crate) mod ops;
pub(crate) mod value;
