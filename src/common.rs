///////////////////// PRELUDE /////////////////////

pub(crate) use crate::interp::arena::{Arena, Id};

pub(crate) use core::fmt::{self, Debug, Display, Formatter};
#[cfg(test)]
pub(crate) use maplit::hashmap;
pub(crate) use parking_lot::{Mutex, RwLock};
pub(crate) use std::{
    collections::{HashMap, HashSet},
    convert::TryFrom,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Identifies an interpreted concurrent task (the evaluation itself, or any
/// task spawned with `go`). Only used when rendering stacks.
pub type TaskId = u64;
