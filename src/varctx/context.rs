use std::collections::{HashMap, HashSet};

use super::var::{LazyVar, Var};

/// Stable index into a `ContextArena`. Contexts form a DAG; identity is by
/// index (arena slot), so two handles are equal iff they name the same
/// context, without needing reference-counted cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub usize);

/// A named scope holding a `name -> Var` map and an ordered list of parent
/// contexts. Contexts compose lazily: reading an attribute assembles a
/// `LazyVar` view on demand rather than eagerly materializing inherited
/// state, so additions to a parent context remain visible to everything
/// that already looked it up earlier in the same build.
#[derive(Debug, Clone)]
pub struct Context {
    pub name: String,
    vars: HashMap<String, Var>,
    pub parents: Vec<ContextId>,
}

impl Context {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: HashMap::new(),
            parents: Vec::new(),
        }
    }

    /// All attribute names declared directly on this context (not parents).
    pub fn own_names(&self) -> impl Iterator<Item = &String> {
        self.vars.keys()
    }

    pub fn get_own(&self, name: &str) -> Option<&Var> {
        self.vars.get(name)
    }

    pub fn get_own_mut_or_default(&mut self, name: &str) -> &mut Var {
        self.vars.entry(name.to_string()).or_insert_with(Var::new)
    }

    /// Assign a plain value: wraps it in a non-inheriting Var, or mutates an
    /// existing Var in place via `set` if one already exists (so the caller
    /// keeps whatever joiner was configured).
    pub fn set_value(&mut self, name: &str, value: impl Into<String>) {
        self.vars
            .entry(name.to_string())
            .and_modify(|v| v.set(value.to_string()))
            .or_insert_with(|| Var::from_value(value));
    }

    pub fn append_value(&mut self, name: &str, value: impl Into<String>) {
        self.get_own_mut_or_default(name).append(value);
    }

    /// Assigning a Var deep-copies it into this context.
    pub fn set_var(&mut self, name: &str, var: Var) {
        self.vars.insert(name.to_string(), var);
    }
}

/// Arena owning every `Context` created during a build. Traversal (lookup,
/// field enumeration) is cycle-safe: every recursive walk threads a visited
/// set keyed by `ContextId` and stops on revisit.
#[derive(Debug, Default)]
pub struct ContextArena {
    contexts: Vec<Context>,
}

impl ContextArena {
    pub fn new() -> Self {
        Self { contexts: Vec::new() }
    }

    pub fn create(&mut self, name: impl Into<String>) -> ContextId {
        let id = ContextId(self.contexts.len());
        self.contexts.push(Context::new(name));
        id
    }

    pub fn create_with_parents(&mut self, name: impl Into<String>, parents: Vec<ContextId>) -> ContextId {
        let id = self.create(name);
        self.get_mut(id).parents = parents;
        id
    }

    pub fn get(&self, id: ContextId) -> &Context {
        &self.contexts[id.0]
    }

    pub fn get_mut(&mut self, id: ContextId) -> &mut Context {
        &mut self.contexts[id.0]
    }

    pub fn add_parent(&mut self, id: ContextId, parent: ContextId) {
        let ctx = self.get_mut(id);
        if !ctx.parents.contains(&parent) {
            ctx.parents.push(parent);
        }
    }

    /// Attribute read: returns a freshly-assembled `LazyVar` whose parent
    /// views are populated from each parent context's Var with the same
    /// name, recursively. Cycle-safe via an explicit visited set.
    pub fn lookup(&self, id: ContextId, name: &str) -> LazyVar {
        let mut visited = HashSet::new();
        self.lookup_inner(id, name, &mut visited)
    }

    fn lookup_inner(&self, id: ContextId, name: &str, visited: &mut HashSet<ContextId>) -> LazyVar {
        if !visited.insert(id) {
            return LazyVar::empty();
        }
        let ctx = self.get(id);
        let local = ctx.get_own(name).cloned().unwrap_or_default();
        let parents: Vec<LazyVar> = ctx
            .parents
            .iter()
            .map(|p| self.lookup_inner(*p, name, visited))
            .collect();
        LazyVar::new(local, parents)
    }

    /// Union of attribute names visible anywhere in the DAG rooted at `id`.
    pub fn field_names(&self, id: ContextId) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut names = HashSet::new();
        self.field_names_inner(id, &mut visited, &mut names);
        let mut out: Vec<String> = names.into_iter().collect();
        out.sort();
        out
    }

    fn field_names_inner(&self, id: ContextId, visited: &mut HashSet<ContextId>, out: &mut HashSet<String>) {
        if !visited.insert(id) {
            return;
        }
        let ctx = self.get(id);
        out.extend(ctx.own_names().cloned());
        for p in &ctx.parents {
            self.field_names_inner(*p, visited, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_merges_parent_chain() {
        let mut arena = ContextArena::new();
        let base = arena.create("base");
        arena.get_mut(base).append_value("includes", "/base/include");

        let child = arena.create_with_parents("child", vec![base]);
        arena.get_mut(child).append_value("includes", "/child/include");

        let view = arena.lookup(child, "includes");
        assert_eq!(view.combined(), vec!["/base/include", "/child/include"]);
    }

    #[test]
    fn lookup_is_cycle_safe() {
        let mut arena = ContextArena::new();
        let a = arena.create("a");
        let b = arena.create_with_parents("b", vec![a]);
        arena.add_parent(a, b); // introduce a cycle a -> b -> a
        arena.get_mut(a).append_value("defines", "A");
        arena.get_mut(b).append_value("defines", "B");

        // Should terminate and not infinitely recurse/duplicate.
        let view = arena.lookup(a, "defines");
        let combined = view.combined();
        assert!(combined.contains(&"A".to_string()));
    }

    #[test]
    fn field_names_unions_whole_dag() {
        let mut arena = ContextArena::new();
        let base = arena.create("base");
        arena.get_mut(base).set_value("CFLAGS", "-O2");
        let child = arena.create_with_parents("child", vec![base]);
        arena.get_mut(child).set_value("LIBS", "-lm");

        let names = arena.field_names(child);
        assert_eq!(names, vec!["CFLAGS".to_string(), "LIBS".to_string()]);
    }

    #[test]
    fn set_value_on_existing_var_preserves_joiner_behavior() {
        let mut arena = ContextArena::new();
        let ctx = arena.create("ctx");
        arena.get_mut(ctx).append_value("NAME", "first");
        arena.get_mut(ctx).set_value("NAME", "second");
        let view = arena.lookup(ctx, "NAME");
        assert_eq!(view.combined(), vec!["second"]);
    }
}
