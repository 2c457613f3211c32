//! Module system: named groups of objects with transitive `uses`/`needs`,
//! conditional activation via boolean expressions, and post-bind context
//! merging.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::boolexpr::BoolExpr;
use crate::error::Result;
use crate::target::TargetId;
use crate::varctx::ContextId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub usize);

#[derive(Debug)]
pub struct Module {
    pub id: ModuleId,
    /// Canonical name: a bin-path string, e.g. `libfoo`.
    pub name: String,
    pub context: ContextId,
    /// Object-file targets produced by this module's compile rules.
    pub objects: Vec<TargetId>,
    /// Every module referenced via `needs`, in declaration order.
    pub uses: Vec<ModuleId>,
    /// Subset of `uses` that forces inclusion (hard edges also add a target
    /// dependency, which `ModuleRegistry::needs` wires up).
    pub uses_hard: HashSet<ModuleId>,
    pub used: bool,
}

/// Owns every module plus the pending `use_if` predicates and the
/// name -> id map used to detect redefinitions and to serve as the
/// `BoolExpr` oracle (`is_used(name) := map[locate_bin(name)].used`).
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Vec<Module>,
    by_name: HashMap<String, ModuleId>,
    /// Pending `(module, expr)` pairs recorded by `use_if`, preserved in
    /// declaration order so the fixed-point loop is deterministic.
    pending_use_if: Vec<(ModuleId, BoolExpr)>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module. Warns (does not error) on redefinition.
    pub fn register(&mut self, name: &str, context: ContextId) -> ModuleId {
        if let Some(&existing) = self.by_name.get(name) {
            warn!(module = name, "module redefined, keeping the newest registration's id mapping");
            return existing;
        }
        let id = ModuleId(self.modules.len());
        self.modules.push(Module {
            id,
            name: name.to_string(),
            context,
            objects: Vec::new(),
            uses: Vec::new(),
            uses_hard: HashSet::new(),
            used: false,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    pub fn find(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    pub fn add_object(&mut self, id: ModuleId, target: TargetId) {
        self.modules[id.0].objects.push(target);
    }

    /// `needs(other, hard, locate)`: adds `other` to `uses`, marking it a
    /// hard edge when requested. `locate` (resolving through the bin-path
    /// map) is the loader's job before calling this — by the time a caller
    /// reaches here, `other` is already a resolved `ModuleId`.
    pub fn needs(&mut self, id: ModuleId, other: ModuleId, hard: bool) {
        let m = &mut self.modules[id.0];
        if !m.uses.contains(&other) {
            m.uses.push(other);
        }
        if hard {
            m.uses_hard.insert(other);
        }
    }

    pub fn use_if(&mut self, id: ModuleId, expr: BoolExpr) {
        self.pending_use_if.push((id, expr));
    }

    /// Fixed-point activation: iterates the pending `(module, expr)` list,
    /// dropping entries whose module is already used and activating any
    /// whose expression now evaluates true, until a pass makes no change.
    /// Monotone: `used` only flips false -> true, so this always terminates.
    pub fn process_use_if_list(&mut self) {
        loop {
            let mut changed = false;
            let mut still_pending = Vec::new();

            for (m, expr) in std::mem::take(&mut self.pending_use_if) {
                if self.modules[m.0].used {
                    continue;
                }
                if expr.evaluate(&|name| self.is_used_by_name(name)) {
                    self.activate(m);
                    changed = true;
                } else {
                    still_pending.push((m, expr));
                }
            }

            self.pending_use_if = still_pending;
            if !changed {
                break;
            }
        }
    }

    fn is_used_by_name(&self, name: &str) -> bool {
        self.by_name.get(name).map(|&id| self.modules[id.0].used).unwrap_or(false)
    }

    /// `_use(m)`: sets `used := true` and recursively activates every hard
    /// dependency. Soft deps are left alone — they only become used if
    /// separately activated (by `want_targets` or their own `use_if`).
    pub fn activate(&mut self, id: ModuleId) {
        if self.modules[id.0].used {
            return;
        }
        self.modules[id.0].used = true;
        let hard: Vec<ModuleId> = self.modules[id.0].uses_hard.iter().copied().collect();
        for h in hard {
            self.activate(h);
        }
    }

    pub fn is_used(&self, id: ModuleId) -> bool {
        self.modules[id.0].used
    }

    pub fn all_ids(&self) -> Vec<ModuleId> {
        (0..self.modules.len()).map(ModuleId).collect()
    }

    /// Post-bind context linking: for every used module, for every used
    /// direct dependency, append the dep's context to the module's context's
    /// parent list. Run once, after binding, before the link line is built.
    pub fn link_contexts(&self, contexts: &mut crate::varctx::ContextArena) {
        for m in &self.modules {
            if !m.used {
                continue;
            }
            for &dep in &m.uses {
                if self.modules[dep.0].used {
                    contexts.add_parent(m.context, self.modules[dep.0].context);
                }
            }
        }
    }

    /// DFS over used modules collecting their `objects` lists. `unique`
    /// deduplicates, preserving first occurrence.
    pub fn get_objects(&self, root: ModuleId, unique: bool) -> Vec<TargetId> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.get_objects_inner(root, unique, &mut visited, &mut out);
        out
    }

    fn get_objects_inner(
        &self,
        id: ModuleId,
        unique: bool,
        visited: &mut HashSet<ModuleId>,
        out: &mut Vec<TargetId>,
    ) {
        if !visited.insert(id) {
            return;
        }
        let m = &self.modules[id.0];
        if !m.used {
            return;
        }
        for &obj in &m.objects {
            if !unique || !out.contains(&obj) {
                out.push(obj);
            }
        }
        for &dep in &m.uses {
            self.get_objects_inner(dep, unique, visited, out);
        }
    }

    /// DFS over used modules reachable from `root` (including `root` itself),
    /// in the same traversal order as `get_objects`. Used by
    /// `api::link_module` to fold each constituent module's context into the
    /// link target's own context, the way `link_contexts` folds a used
    /// module's direct deps into its own context during `post_bind` — here
    /// the "dependent" is the link target rather than another module.
    pub fn used_closure(&self, root: ModuleId) -> Vec<ModuleId> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.used_closure_inner(root, &mut visited, &mut out);
        out
    }

    fn used_closure_inner(&self, id: ModuleId, visited: &mut HashSet<ModuleId>, out: &mut Vec<ModuleId>) {
        if !visited.insert(id) {
            return;
        }
        let m = &self.modules[id.0];
        if !m.used {
            return;
        }
        out.push(id);
        for &dep in &m.uses {
            self.used_closure_inner(dep, visited, out);
        }
    }
}

/// Validates the fixed-point result: used modules form a set closed under
/// hard-use edges. Called from the post-parse phase driver as a sanity
/// check; returns an error only if invariants the activation algorithm is
/// supposed to guarantee were somehow violated.
pub fn check_hard_closure(registry: &ModuleRegistry) -> Result<()> {
    for id in registry.all_ids() {
        let m = registry.get(id);
        if !m.used {
            continue;
        }
        for &h in &m.uses_hard {
            if !registry.get(h).used {
                return Err(crate::error::MillError::ModuleError(format!(
                    "module `{}` is used but its hard dependency `{}` is not",
                    m.name,
                    registry.get(h).name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varctx::ContextArena;

    fn setup() -> (ModuleRegistry, ContextArena) {
        (ModuleRegistry::new(), ContextArena::new())
    }

    #[test]
    fn use_if_activates_when_predicate_becomes_true() {
        let (mut reg, mut ctx) = setup();
        let a = reg.register("a", ctx.create("a"));
        let b = reg.register("b", ctx.create("b"));
        reg.use_if(b, BoolExpr::parse("a").unwrap());

        reg.process_use_if_list();
        assert!(!reg.is_used(b));

        reg.activate(a);
        reg.process_use_if_list();
        assert!(reg.is_used(b));
    }

    #[test]
    fn hard_dependency_is_activated_transitively() {
        let (mut reg, mut ctx) = setup();
        let a = reg.register("a", ctx.create("a"));
        let b = reg.register("b", ctx.create("b"));
        reg.needs(a, b, true);

        reg.activate(a);
        assert!(reg.is_used(a));
        assert!(reg.is_used(b));
        assert!(check_hard_closure(&reg).is_ok());
    }

    #[test]
    fn soft_dependency_does_not_auto_activate() {
        let (mut reg, mut ctx) = setup();
        let a = reg.register("a", ctx.create("a"));
        let b = reg.register("b", ctx.create("b"));
        reg.needs(a, b, false);

        reg.activate(a);
        assert!(reg.is_used(a));
        assert!(!reg.is_used(b));
    }

    #[test]
    fn get_objects_dedups_and_preserves_first_occurrence() {
        let (mut reg, mut ctx) = setup();
        let a = reg.register("a", ctx.create("a"));
        let b = reg.register("b", ctx.create("b"));
        reg.needs(a, b, true);
        reg.add_object(a, TargetId(0));
        reg.add_object(b, TargetId(1));
        reg.add_object(b, TargetId(0)); // shared object, would duplicate without dedup

        reg.activate(a);
        let objs = reg.get_objects(a, true);
        assert_eq!(objs, vec![TargetId(0), TargetId(1)]);
    }

    #[test]
    fn used_closure_includes_root_and_soft_deps_once_activated() {
        let (mut reg, mut ctx) = setup();
        let a = reg.register("a", ctx.create("a"));
        let b = reg.register("b", ctx.create("b"));
        let c = reg.register("c", ctx.create("c"));
        reg.needs(a, b, true);
        reg.needs(a, c, false); // soft: only in the closure once separately activated

        reg.activate(a);
        assert_eq!(reg.used_closure(a), vec![a, b]);

        reg.activate(c);
        assert_eq!(reg.used_closure(a), vec![a, b, c]);
    }

    #[test]
    fn link_contexts_appends_used_dep_context_as_parent() {
        let (mut reg, mut ctx) = setup();
        let a = reg.register("a", ctx.create("a"));
        let b = reg.register("b", ctx.create("b"));
        reg.needs(a, b, true);
        ctx.get_mut(reg.get(b).context).append_value("includes", "/b/include");

        reg.activate(a);
        reg.link_contexts(&mut ctx);

        let view = ctx.lookup(reg.get(a).context, "includes");
        assert_eq!(view.combined(), vec!["/b/include"]);
    }
}
