//! Priority-queue scheduler: assigns DFS-ordered sticky priorities, then
//! feeds a worker pool that builds targets as their dependencies clear.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::env::BuildEnv;
use crate::target::{TargetGraph, TargetId};

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildReport {
    pub built: usize,
    pub skipped: usize,
    pub fail_fast_triggered: bool,
}

/// Assigns priorities to every target reachable from `roots`, in DFS
/// preorder (a target is numbered before its own deps). Assignment is
/// sticky and idempotent — a target visited through two different roots
/// keeps whichever number it got first.
pub fn assign_priorities(graph: &TargetGraph, roots: &[TargetId]) {
    let mut next: i64 = 0;
    let mut visited = HashSet::new();
    for &root in roots {
        assign_priorities_dfs(graph, root, &mut next, &mut visited);
    }
}

fn assign_priorities_dfs(graph: &TargetGraph, t: TargetId, next: &mut i64, visited: &mut HashSet<TargetId>) {
    if !visited.insert(t) {
        return;
    }
    let target = graph.get(t);
    if target.prio() < 0 {
        target.assign_prio_if_unset(*next);
        *next += 1;
    }
    for d in target.deps() {
        assign_priorities_dfs(graph, d, next, visited);
    }
}

/// Runs a target's actions sequentially in insertion order; the first
/// failure short-circuits the rest.
fn run_actions(graph: &TargetGraph, id: TargetId, env: &dyn BuildEnv) -> bool {
    for action in &graph.get(id).actions {
        if !action.run(id, env) {
            return false;
        }
    }
    true
}

/// Seeds the queue with every target, among those reachable from `roots`,
/// that is already `stable ∧ ¬queued` and `ready_for_building()`.
fn seed_ready(graph: &TargetGraph, roots: &[TargetId], queue: &Mutex<BinaryHeap<Reverse<(i64, usize)>>>) {
    let mut visited = HashSet::new();
    let mut stack: Vec<TargetId> = roots.to_vec();
    while let Some(t) = stack.pop() {
        if !visited.insert(t) {
            continue;
        }
        let target = graph.get(t);
        if !target.is_queued() && target.ready_for_building(graph) {
            target.mark_queued();
            queue.lock().unwrap().push(Reverse((target.prio(), t.0)));
        }
        stack.extend(target.deps());
    }
}

/// Builds every target reachable from `roots`, in dependency order, using up
/// to `jobs` concurrent workers. `fail_fast` drains the queue and stops
/// dispatching new work at the first action failure.
pub fn build_targets(
    graph: &TargetGraph,
    env: &dyn BuildEnv,
    roots: &[TargetId],
    jobs: usize,
    fail_fast: bool,
) -> BuildReport {
    assign_priorities(graph, roots);

    let queue: Mutex<BinaryHeap<Reverse<(i64, usize)>>> = Mutex::new(BinaryHeap::new());
    seed_ready(graph, roots, &queue);

    let total_reachable = {
        let mut visited = HashSet::new();
        let mut stack: Vec<TargetId> = roots.to_vec();
        while let Some(t) = stack.pop() {
            if visited.insert(t) {
                stack.extend(graph.get(t).deps());
            }
        }
        visited.len()
    };

    let built = Arc::new(Mutex::new(0usize));
    let skipped = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(Mutex::new(HashSet::<TargetId>::new()));
    let in_flight = Arc::new(Mutex::new(0usize));
    let aborted = AtomicBool::new(false);

    std::thread::scope(|scope| {
        loop {
            if finished.lock().unwrap().len() >= total_reachable {
                break;
            }
            if aborted.load(Ordering::SeqCst) && *in_flight.lock().unwrap() == 0 {
                break;
            }

            let next = {
                let mut q = queue.lock().unwrap();
                if aborted.load(Ordering::SeqCst) {
                    // Fail-fast: drain without dispatching further work.
                    q.clear();
                    None
                } else {
                    q.pop()
                }
            };

            let Some(Reverse((_, id_raw))) = next else {
                if *in_flight.lock().unwrap() == 0 {
                    // Nothing queued and nothing running: either we're done
                    // or the dependency graph has a gap (should have been
                    // caught by cycle detection already).
                    break;
                }
                std::thread::yield_now();
                continue;
            };

            let id = TargetId(id_raw);
            *in_flight.lock().unwrap() += 1;

            let built = built.clone();
            let skipped = skipped.clone();
            let finished = finished.clone();
            let in_flight = in_flight.clone();
            let aborted_ref = &aborted;

            scope.spawn(move || {
                let target = graph.get(id);
                let has_missing = !target.missing().is_empty();
                let needs_build = !has_missing && graph.check_update(id) && target.rebuild();

                let success = if has_missing {
                    false
                } else if needs_build {
                    run_actions(graph, id, env)
                } else {
                    true
                };

                target.mark_done();
                if !success && !has_missing {
                    error!(target = %target.name, "action failed");
                    if fail_fast {
                        aborted_ref.store(true, Ordering::SeqCst);
                    }
                }
                if has_missing {
                    warn!(target = %target.name, missing = ?target.missing(), "skipped for lack of dependency");
                }

                for r_id in target.needed_for() {
                    let dependent = graph.get(r_id);
                    if !success {
                        dependent.add_missing(target.name.clone());
                    } else {
                        let remaining = dependent.decrement_ndeps();
                        if remaining == 0
                            && dependent.ready_for_building(graph)
                            && !dependent.is_queued()
                            && !aborted_ref.load(Ordering::SeqCst)
                        {
                            dependent.mark_queued();
                            queue.lock().unwrap().push(Reverse((dependent.prio(), r_id.0)));
                        }
                    }
                }

                // `built` counts targets whose action(s) actually ran (the
                // testable property this report exists to support is "zero
                // actions ran without -a" — a target that was already
                // up to date and needed no action is neither built nor
                // skipped).
                if !success {
                    *skipped.lock().unwrap() += 1;
                } else if needs_build {
                    *built.lock().unwrap() += 1;
                }
                finished.lock().unwrap().insert(id);
                *in_flight.lock().unwrap() -= 1;
            });

            // Crude backpressure: block dispatch once `jobs` workers are
            // outstanding.
            while *in_flight.lock().unwrap() >= jobs.max(1) {
                std::thread::yield_now();
            }
        }
    });

    let report = BuildReport {
        built: *built.lock().unwrap(),
        skipped: *skipped.lock().unwrap(),
        fail_fast_triggered: aborted.load(Ordering::SeqCst),
    };
    if report.skipped > 0 {
        info!(skipped = report.skipped, "some targets were skipped for lack of a dependency");
    }
    report
}
