//! Target graph: typed nodes (phony, file), dependency edges in both
//! directions, mtime-based staleness, and cycle detection.
//!
//! Targets live in a flat arena (`Vec<Target>`) owned by `TargetGraph` and
//! are addressed by the stable `TargetId` index rather than a reference, so
//! the forward (`deps`) and back (`needed_for`) edges that would otherwise
//! be a cyclic ownership graph are just index lists. Everything that can
//! change once the single-threaded parse/bind/post-bind phases are done
//! (`ndeps`, `queued`, `done`, `missing`, `prio`, `stable`, `mtime`, the
//! rebuild flag) lives behind a per-target mutex so the scheduler can hand
//! out a shared `&TargetGraph` to every worker thread without additional
//! synchronization at the graph level. Structural fields (`name`, `kind`,
//! `context`, `actions`) are only ever touched during the single-threaded
//! phase, through `&mut TargetGraph`, and are plain fields.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tracing::warn;

use crate::env::BuildEnv;
use crate::error::{MillError, Result};
use crate::varctx::ContextId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub usize);

/// A command recipe attached to a target's action list. `describe()` has a
/// default so simple test doubles don't need to implement it.
pub trait Action: std::fmt::Debug + Send + Sync {
    fn run(&self, target: TargetId, env: &dyn BuildEnv) -> bool;

    fn describe(&self) -> String {
        format!("{:?}", self)
    }

    /// Since no state is persisted between invocations, a target whose
    /// output happens to already be newer than its declared deps would
    /// never otherwise learn about a header an *earlier* invocation's `.d`
    /// file recorded as a prerequisite. Called during `pre_build`, before
    /// any staleness check, so a compile rule can re-read its on-disk `.d`
    /// file and re-register those extra deps for this invocation. `cwd` is
    /// the directory actions run from (entries in a `.d` file are relative
    /// to it). No-op for rules that don't track extra dependency files.
    fn preload_deps(&self, _target: TargetId, _graph: &TargetGraph, _cwd: &std::path::Path) {}
}

#[derive(Debug, Clone)]
enum TargetKind {
    /// Interned by name but not yet bound to a kind; `bind_target` or
    /// `make_phony` resolves this. A target must not reach the build phases
    /// still in this state.
    Unbound,
    Phony,
    File(PathBuf),
}

/// mtime comparisons treat phony targets and missing files as infinitely
/// new, so they always look stale to themselves and to anything depending
/// on them, without needing a sentinel `SystemTime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MTime {
    At(SystemTime),
    Infinite,
}

impl MTime {
    fn is_newer_than(&self, other: &MTime) -> bool {
        match (self, other) {
            (MTime::Infinite, MTime::Infinite) => false,
            (MTime::Infinite, _) => true,
            (_, MTime::Infinite) => false,
            (MTime::At(a), MTime::At(b)) => a > b,
        }
    }
}

#[derive(Debug)]
struct TargetState {
    deps: Vec<TargetId>,
    needed_for: Vec<TargetId>,
    ndeps: i64,
    /// DFS-assigned scheduling priority; negative means "not yet assigned".
    prio: i64,
    wanted: bool,
    always: bool,
    rebuild: bool,
    stable: bool,
    queued: bool,
    done: bool,
    mtime: MTime,
    missing: Vec<String>,
    /// Header paths injected by `.d`-file parsing after a successful
    /// compile; tracked for mtime comparisons without promoting them to
    /// full graph nodes (see `TargetGraph::link_extra_dep`).
    extra_deps: Vec<PathBuf>,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            deps: Vec::new(),
            needed_for: Vec::new(),
            ndeps: 0,
            prio: -1,
            wanted: false,
            always: false,
            rebuild: false,
            stable: false,
            queued: false,
            done: false,
            mtime: MTime::Infinite,
            missing: Vec::new(),
            extra_deps: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    pub context: Option<ContextId>,
    pub actions: Vec<Arc<dyn Action>>,
    kind: TargetKind,
    bound: bool,
    state: Mutex<TargetState>,
}

impl Target {
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        match &self.kind {
            TargetKind::File(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn deps(&self) -> Vec<TargetId> {
        self.state.lock().unwrap().deps.clone()
    }

    pub fn needed_for(&self) -> Vec<TargetId> {
        self.state.lock().unwrap().needed_for.clone()
    }

    pub fn set_wanted(&self, v: bool) {
        self.state.lock().unwrap().wanted = v;
    }

    pub fn is_wanted(&self) -> bool {
        self.state.lock().unwrap().wanted
    }

    pub fn set_always(&self, v: bool) {
        self.state.lock().unwrap().always = v;
    }

    pub fn is_always(&self) -> bool {
        self.state.lock().unwrap().always
    }

    pub fn force_rebuild(&self) {
        self.state.lock().unwrap().rebuild = true;
    }

    pub fn rebuild(&self) -> bool {
        self.state.lock().unwrap().rebuild
    }

    pub fn is_stable(&self) -> bool {
        self.state.lock().unwrap().stable
    }

    fn set_stable(&self, v: bool) {
        self.state.lock().unwrap().stable = v;
    }

    pub fn is_queued(&self) -> bool {
        self.state.lock().unwrap().queued
    }

    pub fn mark_queued(&self) {
        self.state.lock().unwrap().queued = true;
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().unwrap().done
    }

    pub fn mark_done(&self) {
        self.state.lock().unwrap().done = true;
    }

    pub fn prio(&self) -> i64 {
        self.state.lock().unwrap().prio
    }

    /// Assigns `p` only if no priority has been assigned yet — priorities
    /// are sticky once set.
    pub fn assign_prio_if_unset(&self, p: i64) {
        let mut s = self.state.lock().unwrap();
        if s.prio < 0 {
            s.prio = p;
        }
    }

    pub fn missing(&self) -> Vec<String> {
        self.state.lock().unwrap().missing.clone()
    }

    pub fn add_missing(&self, name: String) {
        let mut s = self.state.lock().unwrap();
        if !s.missing.contains(&name) {
            s.missing.push(name);
        }
    }

    /// Decrements the unsatisfied-dependency counter and returns what's
    /// left, so the caller can tell whether this target just became ready
    /// without a separate read under a second lock acquisition.
    pub fn decrement_ndeps(&self) -> i64 {
        let mut s = self.state.lock().unwrap();
        s.ndeps -= 1;
        s.ndeps
    }

    fn ndeps(&self) -> i64 {
        self.state.lock().unwrap().ndeps
    }

    fn set_ndeps(&self, n: i64) {
        self.state.lock().unwrap().ndeps = n;
    }

    fn mtime(&self) -> MTime {
        self.state.lock().unwrap().mtime
    }

    fn extra_deps(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().extra_deps.clone()
    }

    fn add_extra_dep(&self, path: PathBuf) {
        let mut s = self.state.lock().unwrap();
        if !s.extra_deps.contains(&path) {
            s.extra_deps.push(path);
        }
    }

    /// Phony targets (and files that fail to `stat`) get an infinite mtime
    /// and an immediate forced rebuild; a file target that stats cleanly
    /// just records its mtime for later comparison.
    fn refresh_mtime(&self) {
        let mut s = self.state.lock().unwrap();
        match &self.kind {
            TargetKind::Phony | TargetKind::Unbound => {
                s.mtime = MTime::Infinite;
                s.rebuild = true;
            }
            TargetKind::File(path) => match std::fs::metadata(path).and_then(|m| m.modified()) {
                Ok(t) => s.mtime = MTime::At(t),
                Err(_) => {
                    s.mtime = MTime::Infinite;
                    s.rebuild = true;
                }
            },
        }
    }

    /// `¬queued ∧ ndeps == 0 ∧ stable ∧ is_needed()`.
    pub fn ready_for_building(&self, graph: &TargetGraph) -> bool {
        !self.is_queued() && self.ndeps() == 0 && self.is_stable() && graph.is_needed(self.id)
    }
}

/// Owns every target ever interned during a build. Populated only during
/// the single-threaded parse/bind/post-bind phases (`&mut self` methods);
/// the parallel build phase only reads through `&self`, mutating per-target
/// scheduling state behind each target's own mutex.
#[derive(Debug, Default)]
pub struct TargetGraph {
    targets: Vec<Target>,
    by_name: HashMap<String, TargetId>,
}

impl TargetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_target(&mut self, name: &str, kind: TargetKind, context: Option<ContextId>) -> TargetId {
        let id = TargetId(self.targets.len());
        let bound = !matches!(kind, TargetKind::Unbound);
        self.targets.push(Target {
            id,
            name: name.to_string(),
            context,
            actions: Vec::new(),
            kind,
            bound,
            state: Mutex::new(TargetState::default()),
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, id: TargetId) -> &Target {
        &self.targets[id.0]
    }

    pub fn find(&self, name: &str) -> Option<TargetId> {
        self.by_name.get(name).copied()
    }

    pub fn all_ids(&self) -> Vec<TargetId> {
        (0..self.targets.len()).map(TargetId).collect()
    }

    /// Interns `name`, creating an `Unbound` placeholder if it's new.
    /// Associates `context` with the target only if it doesn't already
    /// have one — a later call with `context: None` never clears it.
    pub fn get_unbound_target(&mut self, name: &str, context: Option<ContextId>) -> TargetId {
        if let Some(&id) = self.by_name.get(name) {
            if context.is_some() {
                let t = &mut self.targets[id.0];
                if t.context.is_none() {
                    t.context = context;
                }
            }
            return id;
        }
        self.insert_target(name, TargetKind::Unbound, context)
    }

    /// Interns `name` as a phony target, idempotently. An existing
    /// `Unbound` placeholder is bound to `Phony` in place; an existing
    /// bound target (phony or file) is returned unchanged.
    pub fn make_phony(&mut self, name: &str) -> TargetId {
        if let Some(&id) = self.by_name.get(name) {
            let t = &mut self.targets[id.0];
            if matches!(t.kind, TargetKind::Unbound) {
                t.kind = TargetKind::Phony;
                t.bound = true;
            }
            return id;
        }
        self.insert_target(name, TargetKind::Phony, None)
    }

    /// A target is bound at most once; calling this on an already-bound
    /// target is a no-op, so callers that always bind right after creating
    /// don't need to guard the call themselves.
    pub fn bind_target(&mut self, id: TargetId, path: PathBuf) -> TargetId {
        let t = &mut self.targets[id.0];
        if !t.bound {
            t.kind = TargetKind::File(path);
            t.bound = true;
        }
        id
    }

    /// Adds `deps` as dependencies of every target in `targets`, wiring the
    /// `needed_for` back-edge on each dep at the same time. A target that
    /// lists itself as a dependency gets a warning and the self-edge is
    /// dropped rather than introducing a trivial cycle. `bind`, when set,
    /// closes out any still-`Unbound` target in `targets` as phony — the
    /// description-file API always binds explicitly before this is likely
    /// to matter, so this is mostly a safety net.
    pub fn depends(&mut self, targets: &[TargetId], deps: &[TargetId], bind: bool) {
        for &t in targets {
            for &d in deps {
                if d == t {
                    warn!(target = %self.get(t).name, "target depends on itself; dropping the self-edge");
                    continue;
                }
                let already_wired = self.get(t).state.lock().unwrap().deps.contains(&d);
                if already_wired {
                    continue;
                }
                self.get(t).state.lock().unwrap().deps.push(d);
                self.get(d).state.lock().unwrap().needed_for.push(t);
            }
            if bind {
                let tt = &mut self.targets[t.0];
                if matches!(tt.kind, TargetKind::Unbound) {
                    tt.kind = TargetKind::Phony;
                    tt.bound = true;
                }
            }
        }
    }

    pub fn add_action(&mut self, id: TargetId, action: Arc<dyn Action>) {
        self.targets[id.0].actions.push(action);
    }

    /// `is_needed() := wanted ∨ always ∨ any needed_for.is_needed()`,
    /// computed as a DFS over back-edges with a visited set so a diamond in
    /// the `needed_for` graph is only walked once.
    pub fn is_needed(&self, id: TargetId) -> bool {
        let mut visited = HashSet::new();
        self.is_needed_inner(id, &mut visited)
    }

    fn is_needed_inner(&self, id: TargetId, visited: &mut HashSet<TargetId>) -> bool {
        if !visited.insert(id) {
            return false;
        }
        let t = self.get(id);
        if t.is_wanted() || t.is_always() {
            return true;
        }
        t.needed_for().iter().any(|&r| self.is_needed_inner(r, visited))
    }

    /// Idempotent: stamps `stable` and a freshly-read `mtime`, sets `ndeps`
    /// to the direct dependency count (none of them can be `done` yet, this
    /// being the stabilization pass that runs before any target is built),
    /// and recurses into every dependency. A target already marked `stable`
    /// is left alone, so sharing a dependency across multiple wanted roots
    /// only stabilizes it once.
    pub fn prepare(&self, id: TargetId) {
        let t = self.get(id);
        if t.is_stable() {
            return;
        }
        t.refresh_mtime();
        let deps = t.deps();
        t.set_ndeps(deps.len() as i64);
        t.set_stable(true);
        for d in deps {
            self.prepare(d);
        }
    }

    /// True if `id` already has `rebuild` set, any direct dependency itself
    /// rebuilt or has a newer mtime, or an injected `.d`-file header is
    /// newer than `id`. Setting `rebuild` here is what makes the staleness
    /// check propagate upward: a dependent's own `check_update` call sees
    /// this target's `rebuild` flag already flipped.
    pub fn check_update(&self, id: TargetId) -> bool {
        let t = self.get(id);
        if t.rebuild() {
            return true;
        }
        let my_mtime = t.mtime();
        let mut needs = t
            .deps()
            .iter()
            .any(|&d| {
                let dep = self.get(d);
                dep.rebuild() || dep.mtime().is_newer_than(&my_mtime)
            });
        if !needs {
            needs = t.extra_deps().iter().any(|p| {
                std::fs::metadata(p)
                    .and_then(|m| m.modified())
                    .map(|modified| MTime::At(modified).is_newer_than(&my_mtime))
                    .unwrap_or(false)
            });
        }
        if needs {
            t.force_rebuild();
        }
        t.rebuild()
    }

    /// Records a header (or other file) a compile action's `.d` output
    /// listed as a prerequisite of `id`. Tracked as a plain path rather than
    /// promoted to its own graph node: headers have no action and aren't
    /// scheduled, they only need to participate in `check_update`'s mtime
    /// comparison, and the global target map is off-limits to mutation once
    /// the parallel build phase (where this runs) has started.
    pub fn link_extra_dep(&self, id: TargetId, dep_path: &str) {
        self.get(id).add_extra_dep(PathBuf::from(dep_path));
    }

    /// DFS cycle check over every target in `ids`. `done` carries fully
    /// explored targets across calls so later roots in the same pass don't
    /// redo work; the current DFS path is tracked separately so a cycle is
    /// reported with the exact path that closes it.
    pub fn check_all_circular(&self, ids: &[TargetId]) -> Result<()> {
        let mut done = HashSet::new();
        for &id in ids {
            if !done.contains(&id) {
                let mut stack = Vec::new();
                self.check_circular_dep(id, &mut stack, &mut done)?;
            }
        }
        Ok(())
    }

    fn check_circular_dep(&self, id: TargetId, stack: &mut Vec<TargetId>, done: &mut HashSet<TargetId>) -> Result<()> {
        if stack.contains(&id) {
            let mut names: Vec<String> = stack.iter().map(|&s| self.get(s).name.clone()).collect();
            names.push(self.get(id).name.clone());
            return Err(MillError::CircularDependency(names.join(" -> ")));
        }
        if done.contains(&id) {
            return Ok(());
        }
        stack.push(id);
        for d in self.get(id).deps() {
            self.check_circular_dep(d, stack, done)?;
        }
        stack.pop();
        done.insert(id);
        Ok(())
    }
}
