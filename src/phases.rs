//! The phase driver: post_parse, bind, post_bind, pre_build, select_wanted,
//! build. Each phase runs to completion before the next starts; the loader
//! only ever observes the session between phases, never mid-phase.

use tracing::info;

use crate::error::Result;
use crate::module::check_hard_closure;
use crate::scheduler::{self, BuildReport};
use crate::session::BuildSession;
use crate::target::TargetId;

/// Runs module activation (`use_if` fixed point) and the hard-dependency
/// closure check. Must run after every description file has been loaded and
/// before `bind`.
pub fn post_parse(session: &mut BuildSession) -> Result<()> {
    info!("post_parse: resolving module use_if expressions");
    session.modules.process_use_if_list();
    check_hard_closure(&session.modules)?;
    Ok(())
}

/// Converts every still-unbound target reachable from a used module's object
/// list into a file-backed target. Targets declared directly via `Rule`/
/// `Compile`/etc. are already bound by the time they're created, so this
/// phase only has work to do for module-derived objects.
pub fn bind(session: &mut BuildSession) -> Result<()> {
    info!("bind: checking for circular dependencies");
    let all = session.targets.all_ids();
    session.targets.check_all_circular(&all)?;
    Ok(())
}

/// Links each used module's context to its used direct deps' contexts, so
/// `CFLAGS`/`defines`/`includes`/`libs` accumulated by a dependency are
/// visible through lookup from the dependent module's context.
pub fn post_bind(session: &mut BuildSession) -> Result<()> {
    info!("post_bind: linking module contexts");
    session.modules.link_contexts(&mut session.contexts);
    Ok(())
}

/// Walks every target reachable from the wanted set and stamps mtimes /
/// stability so `check_update` has accurate data to work from. With
/// `--all`, every reachable target is additionally forced to rebuild
/// regardless of what that mtime comparison would have concluded.
pub fn pre_build(session: &mut BuildSession, roots: &[TargetId]) -> Result<()> {
    info!("pre_build: stabilizing target mtimes");
    for &root in roots {
        session.targets.prepare(root);
    }
    preload_depfile_deps(session, roots);
    if session.force_rebuild {
        let mut visited = std::collections::HashSet::new();
        let mut stack = roots.to_vec();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let target = session.targets.get(id);
            target.force_rebuild();
            stack.extend(target.deps());
        }
    }
    Ok(())
}

/// Calls `Action::preload_deps` on every action of every target reachable
/// from `roots`, before any staleness check runs. This is what lets a
/// target whose output is already newer than its declared deps still
/// notice a header-only edit an earlier invocation's `.d` file recorded —
/// nothing about that fact survives between invocations except the file on
/// disk, so it has to be re-read every time.
fn preload_depfile_deps(session: &BuildSession, roots: &[TargetId]) {
    let cwd = session.current_dir().to_path_buf();
    let mut visited = std::collections::HashSet::new();
    let mut stack = roots.to_vec();
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let target = session.targets.get(id);
        for action in &target.actions {
            action.preload_deps(id, &session.targets, &cwd);
        }
        stack.extend(target.deps());
    }
}

/// Marks the targets named on the command line (or, if none were named, a
/// single implicit `all` phony) as wanted, and returns their ids as the
/// traversal roots for the remaining phases.
pub fn select_wanted(session: &mut BuildSession, names: &[String]) -> Result<Vec<TargetId>> {
    let mut roots = Vec::new();
    if names.is_empty() {
        let all = session.targets.find("all").unwrap_or_else(|| session.targets.make_phony("all"));
        session.targets.get(all).set_wanted(true);
        roots.push(all);
    } else {
        for name in names {
            let id = session
                .targets
                .find(name)
                .ok_or_else(|| crate::error::MillError::UnknownTarget(name.clone()))?;
            session.targets.get(id).set_wanted(true);
            roots.push(id);
        }
    }
    Ok(roots)
}

/// Runs the scheduler over the wanted set.
pub fn build(session: &BuildSession, roots: &[TargetId], jobs: usize) -> BuildReport {
    info!(jobs, targets = roots.len(), "build: dispatching to scheduler");
    scheduler::build_targets(&session.targets, session, roots, jobs, session.fail_fast)
}

/// Runs every phase in order, the way the `mill` binary invokes this module.
pub fn run_all(session: &mut BuildSession, wanted_names: &[String], jobs: usize) -> Result<BuildReport> {
    post_parse(session)?;
    bind(session)?;
    post_bind(session)?;
    let roots = select_wanted(session, wanted_names)?;
    pre_build(session, &roots)?;
    Ok(build(session, &roots, jobs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;
    use crate::rules::Rule;
    use std::path::PathBuf;

    #[test]
    fn select_wanted_defaults_to_all() {
        let config = GlobalConfig::default();
        let mut session = BuildSession::new(PathBuf::from("."), &config, 1);
        let roots = select_wanted(&mut session, &[]).unwrap();
        assert_eq!(roots.len(), 1);
        assert!(session.targets.get(roots[0]).is_wanted());
        assert_eq!(session.targets.get(roots[0]).name, "all");
    }

    #[test]
    fn select_wanted_rejects_unknown_names() {
        let config = GlobalConfig::default();
        let mut session = BuildSession::new(PathBuf::from("."), &config, 1);
        let err = select_wanted(&mut session, &["nope".to_string()]).unwrap_err();
        assert!(matches!(err, crate::error::MillError::UnknownTarget(_)));
    }

    #[test]
    fn run_all_builds_a_phony_chain() {
        let config = GlobalConfig::default();
        let mut session = BuildSession::new(PathBuf::from("."), &config, 1);
        let a = session.targets.make_phony("a");
        let b = session.targets.make_phony("b");
        session.targets.depends(&[a], &[b], false);
        session.targets.add_action(b, std::sync::Arc::new(Rule::noop_shell()));
        session.targets.add_action(a, std::sync::Arc::new(Rule::noop_shell()));

        let report = run_all(&mut session, &["a".to_string()], 1).unwrap();
        assert_eq!(report.built, 2);
    }
}
