//! Inheritable variable store: `Var`/`LazyVar` hold list semantics, `Context`
//! composes them into named, parent-linked scopes.

mod context;
mod var;

pub use context::{Context, ContextArena, ContextId};
pub use var::{LazyVar, Var};
