//! The shared read-only facade actions are built against. Kept as a trait so
//! the target graph and rule library don't need to depend on the concrete
//! `BuildSession` type — only `BuildSession` (in `session.rs`) implements it.
//!
//! Everything here is read-only by design: the global target map and
//! context arena are only ever mutated during the single-threaded parse/
//! bind/post-bind phases (per the locking note this crate's build loop
//! follows); the parallel build phase only touches per-target interior
//! mutability, so handing out a shared `&dyn BuildEnv` across worker threads
//! needs no additional synchronization here.

use std::collections::HashSet;
use std::path::Path;

use crate::commandpool::CommandPool;
use crate::target::TargetGraph;
use crate::varctx::ContextArena;

pub trait BuildEnv: Send + Sync {
    fn targets(&self) -> &TargetGraph;
    fn contexts(&self) -> &ContextArena;
    fn command_pool(&self) -> &CommandPool;
    fn cwd(&self) -> &Path;
    fn debug_enabled(&self, channel: &str) -> bool;
    /// Names currently exported into actions' shell environment (see
    /// `api::export`/`api::unexport`). An action's env is built from this
    /// set, never the whole inherited process environment, so concurrent
    /// actions never observe each other's in-flight env mutations.
    fn exported(&self) -> &HashSet<String>;
}
